//! Progress reporting
//!
//! Stages receive a `&dyn ProgressReporter` explicitly instead of sharing a
//! global spinner. Interactive runs use [`SpinnerReporter`]; scheduled runs and
//! tests use [`SilentReporter`].

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;

/// Receives progress updates from pipeline stages
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started
    fn start(&self, message: &str);

    /// Replace the message of the current stage
    fn set_message(&self, message: &str);

    /// Bytes transferred so far
    fn transfer(&self, loaded: u64, total: u64) {
        if total > 0 {
            let percent = (loaded as f64 / total as f64 * 100.0).round() as u64;
            self.set_message(&format!("Uploading backup ({}%)", percent.min(100)));
        }
    }

    /// The current stage has finished
    fn finish(&self);
}

/// Discards every update
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn start(&self, _message: &str) {}

    fn set_message(&self, _message: &str) {}

    fn transfer(&self, _loaded: u64, _total: u64) {}

    fn finish(&self) {}
}

/// Terminal spinner on stderr; does nothing when stderr is not a terminal
#[derive(Default)]
pub struct SpinnerReporter {
    bar: Mutex<Option<ProgressBar>>,
    enabled: bool,
}

impl SpinnerReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
            enabled: std::io::stderr().is_terminal(),
        }
    }
}

impl ProgressReporter for SpinnerReporter {
    fn start(&self, message: &str) {
        if !self.enabled {
            return;
        }

        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message(message.to_string());

        if let Some(previous) = self.bar.lock().replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn set_message(&self, message: &str) {
        if let Some(bar) = self.bar.lock().as_ref() {
            bar.set_message(message.to_string());
        }
    }

    fn finish(&self) {
        if let Some(bar) = self.bar.lock().take() {
            bar.finish_and_clear();
        }
    }
}

impl Drop for SpinnerReporter {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.get_mut().take() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl ProgressReporter for Recording {
        fn start(&self, message: &str) {
            self.0.lock().push(format!("start:{}", message));
        }

        fn set_message(&self, message: &str) {
            self.0.lock().push(message.to_string());
        }

        fn finish(&self) {
            self.0.lock().push("finish".to_string());
        }
    }

    #[test]
    fn test_default_transfer_reports_percent() {
        let reporter = Recording::default();
        reporter.transfer(1, 4);
        reporter.transfer(10, 10);
        reporter.transfer(5, 0);

        assert_eq!(
            *reporter.0.lock(),
            vec!["Uploading backup (25%)", "Uploading backup (100%)"]
        );
    }

    #[test]
    fn test_spinner_lifecycle_without_terminal() {
        let reporter = SpinnerReporter::default();
        reporter.start("Creating backup");
        reporter.set_message("Creating backup (1 KB)");
        reporter.finish();
        assert!(reporter.bar.lock().is_none());
    }
}
