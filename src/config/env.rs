//! Process environment settings

use std::path::PathBuf;

use tracing::error;

use crate::{BackupError, Result};

/// Default root for per-run work directories
pub const DEFAULT_TMP_ROOT: &str = ".tmp";

/// Connection settings for the destination bucket
#[derive(Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Bucket region
    pub region: String,
    /// Destination bucket
    pub bucket: String,
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// S3-compatible endpoint URL
    pub endpoint: String,
    /// Use path-style addressing (MinIO and friends)
    pub force_path_style: bool,
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Settings read from the process environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Object storage connection
    pub storage: StorageSettings,
    /// Root every configured path is joined onto
    pub host_root: PathBuf,
    /// Cron expression; when set the binary runs on a schedule
    pub cron: Option<String>,
    /// Root for per-run work directories
    pub tmp_root: PathBuf,
}

const REQUIRED: [&str; 5] = [
    "S3_REGION",
    "S3_BUCKET_NAME",
    "S3_ACCESS_KEY_ID",
    "S3_SECRET_ACCESS_KEY",
    "S3_ENDPOINT",
];

impl Environment {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let missing: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|key| value(*key).is_none())
            .collect();
        if !missing.is_empty() {
            let message = format!("Missing required env variable(s): {}", missing.join(", "));
            error!("{}", message);
            return Err(BackupError::Config(message));
        }

        let required = |key: &str| value(key).unwrap_or_default();

        Ok(Self {
            storage: StorageSettings {
                region: required("S3_REGION"),
                bucket: required("S3_BUCKET_NAME"),
                access_key_id: required("S3_ACCESS_KEY_ID"),
                secret_access_key: required("S3_SECRET_ACCESS_KEY"),
                endpoint: required("S3_ENDPOINT"),
                force_path_style: value("S3_FORCE_PATH_STYLE")
                    .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false),
            },
            host_root: value("HOST_ROOT").map(PathBuf::from).unwrap_or_default(),
            cron: value("CRON"),
            tmp_root: value("SSS_TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TMP_ROOT)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("S3_REGION", "eu-west-3"),
            ("S3_BUCKET_NAME", "backups"),
            ("S3_ACCESS_KEY_ID", "AKIA"),
            ("S3_SECRET_ACCESS_KEY", "secret"),
            ("S3_ENDPOINT", "https://s3.example.com"),
        ]
    }

    #[test]
    fn test_defaults_for_optional_vars() {
        let env = Environment::from_lookup(lookup_from(&required_vars())).unwrap();
        assert_eq!(env.storage.bucket, "backups");
        assert_eq!(env.host_root, PathBuf::new());
        assert_eq!(env.tmp_root, PathBuf::from(DEFAULT_TMP_ROOT));
        assert!(env.cron.is_none());
        assert!(!env.storage.force_path_style);
    }

    #[test]
    fn test_optional_vars() {
        let mut vars = required_vars();
        vars.push(("HOST_ROOT", "/host"));
        vars.push(("CRON", "0 2 * * *"));
        vars.push(("S3_FORCE_PATH_STYLE", "true"));
        vars.push(("SSS_TMP_DIR", "/var/tmp/sss"));

        let env = Environment::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(env.host_root, PathBuf::from("/host"));
        assert_eq!(env.cron.as_deref(), Some("0 2 * * *"));
        assert!(env.storage.force_path_style);
        assert_eq!(env.tmp_root, PathBuf::from("/var/tmp/sss"));
    }

    #[test]
    fn test_missing_required_vars_are_listed() {
        let vars: Vec<_> = required_vars()
            .into_iter()
            .filter(|(k, _)| *k != "S3_ENDPOINT" && *k != "S3_REGION")
            .collect();

        let err = Environment::from_lookup(lookup_from(&vars)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("S3_REGION"));
        assert!(message.contains("S3_ENDPOINT"));
    }

    #[test]
    fn test_secret_is_not_debug_printed() {
        let env = Environment::from_lookup(lookup_from(&required_vars())).unwrap();
        let printed = format!("{:?}", env.storage);
        assert!(!printed.contains("secret\""));
        assert!(printed.contains("<redacted>"));
    }
}
