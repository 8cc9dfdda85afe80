//! Cron-triggered runs
//!
//! A [`Scheduler`] waits for the next fire time of a [`CronSchedule`], runs the
//! job to completion, then computes the following fire time. Runs therefore
//! never overlap within one process. A failed run is logged and the schedule
//! stays alive.

use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, TimeZone};
use tracing::{debug, error, info, warn};

use crate::backup::RunOutcome;
use crate::{BackupError, Result};

/// Runs slower than this are logged as a warning
pub const SLOW_RUN_WARNING: Duration = Duration::from_secs(15 * 60);

/// A parsed cron expression
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// Parse a cron expression; classic 5-field expressions fire at second 0
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let normalized = if expression.split_whitespace().count() == 5 {
            format!("0 {}", expression)
        } else {
            expression.to_string()
        };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            error!(expression, error = %e, "Invalid cron expression");
            BackupError::Schedule(format!("Invalid cron expression {:?}: {}", expression, e))
        })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The expression as configured
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`
    pub fn next_after<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
        self.schedule.after(after).next()
    }
}

impl FromStr for CronSchedule {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Runs a job on a cron schedule until shut down
pub struct Scheduler {
    schedule: CronSchedule,
    name: String,
    slow_run_warning: Duration,
}

impl Scheduler {
    pub fn new(schedule: CronSchedule) -> Self {
        Self {
            schedule,
            name: "auto-backup".to_string(),
            slow_run_warning: SLOW_RUN_WARNING,
        }
    }

    /// Name used in run logs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_slow_run_warning(mut self, threshold: Duration) -> Self {
        self.slow_run_warning = threshold;
        self
    }

    /// Fire `job` at every scheduled time until `shutdown` resolves.
    ///
    /// A run still in progress when `shutdown` resolves is dropped.
    pub async fn run<F, Fut, S>(&self, mut job: F, shutdown: S) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RunOutcome>>,
        S: Future<Output = ()>,
    {
        info!("Cron has been set to {}", self.schedule.expression());
        tokio::pin!(shutdown);

        loop {
            let now = Local::now();
            let Some(next) = self.schedule.next_after(&now) else {
                warn!(expression = self.schedule.expression(), "Schedule has no upcoming run");
                return Ok(());
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "Waiting for next run");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let started_at = Local::now();
            let clock = Instant::now();

            let outcome = tokio::select! {
                outcome = job() => outcome,
                _ = &mut shutdown => {
                    warn!(name = %self.name, "Scheduler stopped during a run");
                    return Ok(());
                }
            };

            let took = clock.elapsed();
            match outcome {
                Ok(_) => {
                    if took > self.slow_run_warning {
                        warn!(
                            "[{}] {} took {}ms",
                            started_at.format("%Y-%m-%d %H:%M:%S"),
                            self.name,
                            took.as_millis()
                        );
                    }
                }
                Err(e) => {
                    error!(
                        error = %e,
                        stage = e.stage(),
                        "[{}] {} started at {} and failed after {}ms",
                        Local::now().format("%Y-%m-%d %H:%M:%S"),
                        self.name,
                        started_at.format("%Y-%m-%d %H:%M:%S"),
                        took.as_millis()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_five_field_expression() {
        let schedule = CronSchedule::parse("0 2 * * *").unwrap();
        assert_eq!(schedule.expression(), "0 2 * * *");

        let after = Utc.with_ymd_and_hms(2024, 3, 1, 1, 30, 0).unwrap();
        let next = schedule.next_after(&after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_six_field_expression() {
        let schedule: CronSchedule = "30 * * * * *".parse().unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 1, 30, 0).unwrap();
        let next = schedule.next_after(&after).unwrap();
        assert_eq!(next.second(), 30);
    }

    #[test]
    fn test_invalid_expression() {
        let err = CronSchedule::parse("every day").unwrap_err();
        assert!(matches!(err, BackupError::Schedule(_)));
    }

    #[tokio::test]
    async fn test_failed_run_keeps_schedule_alive() {
        let schedule = CronSchedule::parse("* * * * * *").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = parking_lot::Mutex::new(Some(tx));

        let job = || {
            let count = runs.fetch_add(1, Ordering::SeqCst) + 1;
            if count == 2 {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }
            async move {
                if count == 1 {
                    Err(BackupError::Schedule("first run fails".to_string()))
                } else {
                    Ok(RunOutcome::Declined)
                }
            }
        };

        Scheduler::new(schedule)
            .run(job, async {
                let _ = rx.await;
            })
            .await
            .unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_run() {
        let schedule = CronSchedule::parse("0 0 1 1 *").unwrap();
        let runs = AtomicUsize::new(0);

        Scheduler::new(schedule)
            .run(
                || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    async { Ok(RunOutcome::Declined) }
                },
                async {},
            )
            .await
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
