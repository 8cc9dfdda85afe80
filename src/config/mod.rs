//! Backup job configuration
//!
//! The job is described by a JSON document (`bkp-config.json` by default):
//!
//! ```json
//! {
//!   "paths": ["/etc", "/srv/data"],
//!   "ignore": ["*.cache", "node_modules"],
//!   "gpgKeyRecipient": "ops@example.com",
//!   "s3Folder": "host-a",
//!   "deleteOlderThan": "604800000",
//!   "uploadRetry": { "initialDelayMs": 1000, "backoffMultiplier": 2.0 }
//! }
//! ```
//!
//! Process-level settings (object storage credentials, host root, schedule)
//! come from the environment, see [`env::Environment`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::error;

use crate::backup::MAX_UPLOAD_ATTEMPTS;
use crate::resilience::RetryConfig;
use crate::{BackupError, Result};

pub mod env;

pub use env::{Environment, StorageSettings};

/// Default location of the job configuration file
pub const DEFAULT_CONFIG_FILE: &str = "bkp-config.json";

/// Backup job configuration, loaded once per run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupJobConfig {
    /// Paths to back up, relative to the host root
    #[serde(default)]
    pub paths: Vec<String>,

    /// Exclusion patterns passed to `du` and `tar`
    #[serde(default)]
    pub ignore: Vec<String>,

    /// GPG key the archive is encrypted for
    #[serde(default)]
    pub gpg_key_recipient: Option<String>,

    /// Keep the encrypted archive locally instead of uploading it
    #[serde(default)]
    pub no_upload: bool,

    /// Key prefix ("folder") in the bucket
    #[serde(default)]
    pub s3_folder: Option<String>,

    /// Maximum backup age in milliseconds, written as a string or a number
    #[serde(default, deserialize_with = "string_or_number")]
    pub delete_older_than: Option<String>,

    /// Delete every remote backup except the one uploaded by this run
    #[serde(default)]
    pub delete_all: bool,

    /// Delay between upload attempts
    #[serde(default)]
    pub upload_retry: Option<UploadRetrySettings>,
}

/// Backoff between upload attempts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRetrySettings {
    /// Delay before the second attempt
    #[serde(default)]
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,

    /// Upper bound for a single delay
    #[serde(default)]
    pub max_delay_ms: Option<u64>,

    /// Add up to 10% random jitter to each delay
    #[serde(default)]
    pub jitter: bool,
}

impl BackupJobConfig {
    /// Read and parse the configuration file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "Error reading config file");
            BackupError::Config(format!(
                "Error reading config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_json(&contents)
    }

    /// Parse a configuration document
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| {
            error!(error = %e, "Error parsing config file");
            BackupError::Config(format!("Invalid config file: {}", e))
        })
    }

    /// Check the required fields
    pub fn validate(&self) -> Result<()> {
        if self.paths.is_empty() {
            error!("No paths to backup in config");
            return Err(BackupError::Config("No paths to backup in config".to_string()));
        }

        if self.recipient().is_none() {
            error!("No GPG key recipient in config");
            return Err(BackupError::Config("No GPG key recipient in config".to_string()));
        }

        Ok(())
    }

    /// The GPG recipient, if set and not blank
    pub fn recipient(&self) -> Option<&str> {
        self.gpg_key_recipient
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Key prefix, empty when unset
    pub fn prefix(&self) -> &str {
        self.s3_folder.as_deref().unwrap_or("")
    }

    /// Whether this run uploads (and therefore prunes and cleans up)
    pub fn upload_enabled(&self, options: &RunOptions) -> bool {
        !options.no_upload && !self.no_upload
    }

    /// Retry settings for the upload stage
    pub fn retry_config(&self) -> RetryConfig {
        let defaults = RetryConfig {
            max_attempts: MAX_UPLOAD_ATTEMPTS,
            ..RetryConfig::default()
        };

        match &self.upload_retry {
            None => defaults,
            Some(settings) => RetryConfig {
                max_attempts: MAX_UPLOAD_ATTEMPTS,
                initial_delay: Duration::from_millis(settings.initial_delay_ms),
                max_delay: settings
                    .max_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.max_delay),
                backoff_multiplier: settings
                    .backoff_multiplier
                    .unwrap_or(defaults.backoff_multiplier),
                jitter: settings.jitter,
            },
        }
    }
}

/// Caller-level options for a single run, never persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Skip the `du` size estimation
    pub skip_estimation: bool,
    /// Do not ask for confirmation
    pub non_interactive: bool,
    /// Keep the artifact locally, skip upload and pruning
    pub no_upload: bool,
}

impl RunOptions {
    /// Options used for cron-triggered runs
    pub fn scheduled() -> Self {
        Self {
            skip_estimation: true,
            non_interactive: true,
            no_upload: false,
        }
    }
}

/// Join every configured path onto the host root.
///
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Integer(millis) => millis.to_string(),
        Raw::Float(millis) => format!("{:.0}", millis.trunc()),
    }))
}

/// Configured paths are usually absolute (`/etc`); they are re-rooted under
/// `host_root` when one is set, so a container can back up a mounted host.
pub fn resolve_paths(host_root: &Path, paths: &[String]) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|p| {
            if host_root.as_os_str().is_empty() {
                PathBuf::from(p)
            } else {
                host_root.join(p.trim_start_matches('/'))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = BackupJobConfig::from_json(
            r#"{
                "paths": ["/data", "/etc"],
                "ignore": ["*.log"],
                "gpgKeyRecipient": "ABC",
                "noUpload": false,
                "s3Folder": "host-a",
                "deleteOlderThan": "86400000",
                "deleteAll": false
            }"#,
        )
        .unwrap();

        assert_eq!(config.paths, vec!["/data", "/etc"]);
        assert_eq!(config.ignore, vec!["*.log"]);
        assert_eq!(config.recipient(), Some("ABC"));
        assert_eq!(config.prefix(), "host-a");
        assert_eq!(config.delete_older_than.as_deref(), Some("86400000"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_numeric_delete_older_than() {
        let config = BackupJobConfig::from_json(
            r#"{ "paths": ["/data"], "gpgKeyRecipient": "R", "deleteOlderThan": 86400000 }"#,
        )
        .unwrap();
        assert_eq!(config.delete_older_than.as_deref(), Some("86400000"));

        let config = BackupJobConfig::from_json(
            r#"{ "paths": ["/data"], "gpgKeyRecipient": "R", "deleteOlderThan": 99999999999999999999 }"#,
        )
        .unwrap();
        assert_eq!(config.delete_older_than.as_deref(), Some("100000000000000000000"));

        let config =
            BackupJobConfig::from_json(r#"{ "paths": ["/data"], "gpgKeyRecipient": "R", "deleteOlderThan": null }"#)
                .unwrap();
        assert_eq!(config.delete_older_than, None);

        let err = BackupJobConfig::from_json(
            r#"{ "paths": ["/data"], "gpgKeyRecipient": "R", "deleteOlderThan": true }"#,
        )
        .unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_missing_paths_is_config_error() {
        let config = BackupJobConfig::from_json(r#"{ "gpgKeyRecipient": "ABC" }"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BackupError::Config(ref m) if m.contains("No paths")));
    }

    #[test]
    fn test_missing_recipient_is_config_error() {
        let config = BackupJobConfig::from_json(r#"{ "paths": ["/data"], "gpgKeyRecipient": "  " }"#)
            .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BackupError::Config(ref m) if m.contains("GPG key recipient")));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = BackupJobConfig::from_json("{ paths: ").unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_upload_enabled_flags() {
        let mut config = BackupJobConfig::default();
        assert!(config.upload_enabled(&RunOptions::default()));

        let opts = RunOptions {
            no_upload: true,
            ..RunOptions::default()
        };
        assert!(!config.upload_enabled(&opts));

        config.no_upload = true;
        assert!(!config.upload_enabled(&RunOptions::default()));
    }

    #[test]
    fn test_default_retry_has_no_delay() {
        let config = BackupJobConfig::default();
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, MAX_UPLOAD_ATTEMPTS);
        assert_eq!(retry.initial_delay, Duration::ZERO);
    }

    #[test]
    fn test_retry_settings_from_config() {
        let config = BackupJobConfig::from_json(
            r#"{ "paths": ["/a"], "uploadRetry": { "initialDelayMs": 500, "maxDelayMs": 4000 } }"#,
        )
        .unwrap();
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, MAX_UPLOAD_ATTEMPTS);
        assert_eq!(retry.initial_delay, Duration::from_millis(500));
        assert_eq!(retry.max_delay, Duration::from_millis(4000));
        assert_eq!(retry.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_resolve_paths_with_host_root() {
        let paths = vec!["/data".to_string(), "etc/nginx".to_string()];
        assert_eq!(
            resolve_paths(Path::new("/host"), &paths),
            vec![PathBuf::from("/host/data"), PathBuf::from("/host/etc/nginx")]
        );
        assert_eq!(
            resolve_paths(Path::new(""), &paths),
            vec![PathBuf::from("/data"), PathBuf::from("etc/nginx")]
        );
    }
}
