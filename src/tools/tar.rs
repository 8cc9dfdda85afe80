//! Archive creation with `tar`

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error};

use super::{exclusion_args, ToolCommand};
use crate::progress::ProgressReporter;
use crate::utils::format::format_bytes;
use crate::{BackupError, Result};

/// How often the archive size is reported while `tar` runs
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Builds a compressed archive of the configured paths
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Write a gzip-compressed archive of `paths` to `dest`
    async fn build(
        &self,
        paths: &[PathBuf],
        ignore: &[String],
        dest: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<()>;
}

/// [`Archiver`] backed by `tar -czf`
#[derive(Debug, Clone)]
pub struct TarArchiver {
    program: String,
    progress_interval: Duration,
}

impl TarArchiver {
    pub fn new() -> Self {
        Self {
            program: "tar".to_string(),
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    /// Use a different `tar` binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Change how often the archive size is reported
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    fn command(&self, paths: &[PathBuf], ignore: &[String], dest: &Path) -> ToolCommand {
        ToolCommand::new(&self.program)
            .args(exclusion_args(ignore))
            .arg("-czf")
            .arg(dest)
            .args(paths)
    }
}

impl Default for TarArchiver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Archiver for TarArchiver {
    async fn build(
        &self,
        paths: &[PathBuf],
        ignore: &[String],
        dest: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let command = self.command(paths, ignore, dest);
        let child = command.spawn().map_err(|e| {
            error!(error = %e, "Error creating backup");
            BackupError::Archive(e)
        })?;

        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let mut ticker = interval_at(
            Instant::now() + self.progress_interval,
            self.progress_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let output = loop {
            tokio::select! {
                output = &mut wait => break output,
                _ = ticker.tick() => {
                    // The file may not exist yet on the first tick
                    if let Ok(meta) = tokio::fs::metadata(dest).await {
                        let size = format_bytes(meta.len());
                        debug!(size = %size, "Archive in progress");
                        progress.set_message(&format!("Creating backup ({})", size));
                    }
                }
            }
        };

        command.check(output).map_err(|e| {
            error!(error = %e, "Error creating backup");
            BackupError::Archive(e)
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;

    #[test]
    fn test_command_layout() {
        let command = TarArchiver::new().command(
            &[PathBuf::from("/data"), PathBuf::from("/etc")],
            &["*.log".to_string()],
            Path::new(".tmp/run/backup.tar.gz"),
        );

        let args: Vec<String> = command
            .get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--exclude=*.log",
                "-czf",
                ".tmp/run/backup.tar.gz",
                "/data",
                "/etc"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_builds_archive() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"hello").unwrap();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("backup.tar.gz");

        TarArchiver::new()
            .build(&[source.path().to_path_buf()], &[], &dest, &SilentReporter)
            .await
            .unwrap();

        assert!(std::fs::metadata(&dest).unwrap().len() > 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_source_is_archive_error() {
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("backup.tar.gz");

        let err = TarArchiver::new()
            .build(
                &[out.path().join("missing")],
                &[],
                &dest,
                &SilentReporter,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Archive(_)));
    }
}
