//! # sss-backup
//!
//! Scheduled or on-demand encrypted backups to S3-compatible object storage.
//!
//! ## Overview
//!
//! A backup run estimates the size of the configured paths, asks for
//! confirmation, builds a compressed `tar` archive, encrypts it with `gpg` for
//! a configured recipient, uploads the result with bounded retry and finally
//! prunes old remote backups according to a retention policy. The run's
//! temporary directory is always cleaned up, except when upload is disabled and
//! the local artifact is the only copy.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sss_backup::backup::{BackupOrchestrator, RunOutcome};
//! use sss_backup::config::{BackupJobConfig, RunOptions};
//! use sss_backup::storage::MemoryObjectStore;
//!
//! # async fn example() -> sss_backup::Result<()> {
//! let config = BackupJobConfig::from_json(
//!     r#"{ "paths": ["/data"], "gpgKeyRecipient": "ABC", "deleteOlderThan": "86400000" }"#,
//! )?;
//! let store = Arc::new(MemoryObjectStore::new("backups"));
//!
//! let orchestrator = BackupOrchestrator::new(config, store);
//! let options = RunOptions { non_interactive: true, ..RunOptions::default() };
//!
//! if let RunOutcome::Completed(summary) = orchestrator.run(&options).await? {
//!     println!("uploaded {:?}", summary.remote_key);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: job configuration file, environment and run options
//! - [`tools`]: external `du`, `tar` and `gpg` invocations
//! - [`storage`]: object storage abstraction (S3 and in-memory)
//! - [`backup`]: artifact naming, upload, retention and orchestration
//! - [`resilience`]: retry with configurable backoff
//! - [`progress`]: progress reporting passed explicitly to each stage
//! - [`schedule`]: cron-triggered runs

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use std::path::PathBuf;

use thiserror::Error;

/// Result type for backup operations
pub type Result<T> = std::result::Result<T, BackupError>;

/// Main error type for a backup run
#[derive(Error, Debug)]
pub enum BackupError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Size estimation failed for one of the configured paths
    #[error("Error getting size of {}: {source}", path.display())]
    Estimation {
        /// Path whose query failed
        path: PathBuf,
        /// Underlying tool failure
        #[source]
        source: tools::ToolError,
    },

    /// Archive creation failed
    #[error("Error creating backup: {0}")]
    Archive(#[source] tools::ToolError),

    /// Encryption failed
    #[error("Error encrypting backup: {0}")]
    Encryption(#[source] tools::ToolError),

    /// Every upload attempt failed
    #[error("Error uploading backup after {attempts} attempt(s): {source}")]
    Upload {
        /// Number of attempts made
        attempts: usize,
        /// Error of the final attempt
        #[source]
        source: storage::StorageError,
    },

    /// Listing remote backups failed
    #[error("Error listing old backups: {0}")]
    Listing(#[source] storage::StorageError),

    /// Deleting a remote backup failed
    #[error("Error deleting old backup {key}: {source}")]
    Deletion {
        /// Key that could not be deleted
        key: String,
        /// Underlying storage failure
        #[source]
        source: storage::StorageError,
    },

    /// The configured retention age is not an integer
    #[error("Error parsing deleteOlderThan in config: {0}")]
    InvalidRetention(String),

    /// The run's temporary directory could not be removed
    #[error("Error deleting tmp directory {}: {source}", path.display())]
    Cleanup {
        /// Directory that could not be removed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Invalid cron expression or scheduler failure
    #[error("Schedule error: {0}")]
    Schedule(String),

    /// Local file system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Join error from blocking tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BackupError {
    /// Name of the pipeline stage the error belongs to
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::Estimation { .. } => "size estimation",
            Self::Archive(_) => "archive",
            Self::Encryption(_) => "encryption",
            Self::Upload { .. } => "upload",
            Self::Listing(_) | Self::Deletion { .. } | Self::InvalidRetention(_) => "retention",
            Self::Cleanup { .. } => "cleanup",
            Self::Schedule(_) => "schedule",
            Self::Io(_) | Self::Join(_) => "local I/O",
        }
    }
}

/// Job configuration, environment and run options
pub mod config;

/// External tool invocations (`du`, `tar`, `gpg`)
pub mod tools;

/// Object storage abstraction
pub mod storage;

/// Backup artifact, upload, retention and orchestration
pub mod backup;

/// Retry with configurable backoff
pub mod resilience;

/// Progress reporting
pub mod progress;

/// Cron-triggered runs
pub mod schedule;

/// Formatting helpers
pub mod utils;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackupError::InvalidRetention("not-a-number".to_string());
        assert_eq!(
            err.to_string(),
            "Error parsing deleteOlderThan in config: not-a-number"
        );
        assert_eq!(err.stage(), "retention");
    }

    #[test]
    fn test_upload_error_keeps_attempts() {
        let err = BackupError::Upload {
            attempts: 5,
            source: storage::StorageError::Request("connection reset".to_string()),
        };
        assert!(err.to_string().contains("after 5 attempt(s)"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BackupError = io_err.into();
        assert!(matches!(err, BackupError::Io(_)));
        assert_eq!(err.stage(), "local I/O");
    }
}
