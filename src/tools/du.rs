//! Size estimation with `du`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::try_join_all;

use super::{exclusion_args, ToolCommand, ToolError};
use crate::utils::format::format_kilobytes;
use crate::{BackupError, Result};

/// Size of one configured path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSize {
    /// Path as passed to `du`
    pub path: PathBuf,
    /// Reported size in kilobytes
    pub kilobytes: u64,
}

/// Per-path sizes in the order of the configured paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeReport {
    /// One entry per configured path
    pub entries: Vec<PathSize>,
}

impl SizeReport {
    /// Sum of all entries in kilobytes
    pub fn total_kilobytes(&self) -> u64 {
        self.entries.iter().map(|e| e.kilobytes).sum()
    }

    /// Human readable total (`KB`/`MB`/`GB`)
    pub fn total_display(&self) -> String {
        format_kilobytes(self.total_kilobytes())
    }
}

/// Estimates how much data a backup will contain
#[async_trait]
pub trait SizeEstimate: Send + Sync {
    /// Measure every path with the exclusions applied; any failure fails the whole estimate
    async fn estimate(&self, paths: &[PathBuf], ignore: &[String]) -> Result<SizeReport>;
}

/// [`SizeEstimate`] backed by `du -s`
#[derive(Debug, Clone)]
pub struct DiskUsage {
    program: String,
}

impl DiskUsage {
    pub fn new() -> Self {
        Self {
            program: "du".to_string(),
        }
    }

    /// Use a different `du` binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn query(&self, path: &Path, ignore: &[String]) -> Result<PathSize> {
        let command = ToolCommand::new(&self.program)
            .arg("-s")
            .args(exclusion_args(ignore))
            .arg(path);

        let to_error = |source: ToolError| {
            tracing::error!(path = %path.display(), error = %source, "Error getting size");
            BackupError::Estimation {
                path: path.to_path_buf(),
                source,
            }
        };

        let stdout = command.output().await.map_err(to_error)?;
        let kilobytes = parse_du_output(&stdout).ok_or_else(|| {
            to_error(ToolError::UnexpectedOutput {
                program: self.program.clone(),
                output: stdout.clone(),
            })
        })?;

        Ok(PathSize {
            path: path.to_path_buf(),
            kilobytes,
        })
    }
}

impl Default for DiskUsage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SizeEstimate for DiskUsage {
    async fn estimate(&self, paths: &[PathBuf], ignore: &[String]) -> Result<SizeReport> {
        let entries = try_join_all(paths.iter().map(|path| self.query(path, ignore))).await?;
        Ok(SizeReport { entries })
    }
}

/// Leading integer field of `du -s` output (`12345\t/path`)
pub fn parse_du_output(stdout: &str) -> Option<u64> {
    stdout.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_du_output() {
        assert_eq!(parse_du_output("12345\t/data\n"), Some(12345));
        assert_eq!(parse_du_output("0\t/empty"), Some(0));
        assert_eq!(parse_du_output("du: cannot access"), None);
        assert_eq!(parse_du_output(""), None);
    }

    #[test]
    fn test_report_total() {
        let report = SizeReport {
            entries: vec![
                PathSize {
                    path: PathBuf::from("/a"),
                    kilobytes: 600,
                },
                PathSize {
                    path: PathBuf::from("/b"),
                    kilobytes: 900,
                },
            ],
        };
        assert_eq!(report.total_kilobytes(), 1500);
        assert_eq!(report.total_display(), "1.5 MB");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_du_on_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.bin"), vec![0u8; 64 * 1024]).unwrap();

        let report = DiskUsage::new()
            .estimate(&[dir.path().to_path_buf()], &[])
            .await
            .unwrap();

        assert_eq!(report.entries.len(), 1);
        assert!(report.entries[0].kilobytes > 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_path_fails_whole_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            dir.path().to_path_buf(),
            dir.path().join("does-not-exist"),
        ];

        let err = DiskUsage::new().estimate(&paths, &[]).await.unwrap_err();
        match err {
            BackupError::Estimation { path, .. } => assert!(path.ends_with("does-not-exist")),
            other => panic!("unexpected error: {}", other),
        }
    }
}
