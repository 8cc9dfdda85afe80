// Backup artifact naming and remote keys

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Marker every backup name starts with
pub const NAME_MARKER: &str = "sss-bkp--";

/// Suffix of every uploaded backup object
pub const ARTIFACT_SUFFIX: &str = ".tar.gz.gpg";

const ARCHIVE_FILE: &str = "backup.tar.gz";
const ENCRYPTED_FILE: &str = "backup.tar.gz.gpg";

/// Remote key of a backup: `{prefix}/sss-bkp--{timestamp}.tar.gz.gpg`
///
/// The creation time is kept as a value rather than recovered by string
/// surgery on the key, so keys round-trip through [`ArtifactKey::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    prefix: String,
    created_at: DateTime<Utc>,
}

impl ArtifactKey {
    /// Key for a backup created at `created_at` under `prefix`
    pub fn new(prefix: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            prefix: normalize_prefix(prefix).to_string(),
            created_at,
        }
    }

    /// `sss-bkp--2024-03-01T02:00:00.123Z`
    pub fn name(&self) -> String {
        format!("{}{}", NAME_MARKER, format_timestamp(self.created_at))
    }

    /// Full object key
    pub fn key(&self) -> String {
        if self.prefix.is_empty() {
            format!("{}{}", self.name(), ARTIFACT_SUFFIX)
        } else {
            format!("{}/{}{}", self.prefix, self.name(), ARTIFACT_SUFFIX)
        }
    }

    /// Recover a key produced by [`ArtifactKey::key`] under `prefix`.
    ///
    /// Returns `None` for keys outside the prefix, in nested folders, or with
    /// a timestamp that does not parse.
    pub fn parse(key: &str, prefix: &str) -> Option<Self> {
        let prefix = normalize_prefix(prefix);
        let file_name = if prefix.is_empty() {
            key
        } else {
            key.strip_prefix(prefix)?.strip_prefix('/')?
        };

        let timestamp = file_name
            .strip_suffix(ARTIFACT_SUFFIX)?
            .strip_prefix(NAME_MARKER)?;
        let created_at = DateTime::parse_from_rfc3339(timestamp)
            .ok()?
            .with_timezone(&Utc);

        Some(Self {
            prefix: prefix.to_string(),
            created_at,
        })
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Prefix without its trailing `/`
pub fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim_end_matches('/')
}

/// Prefix used when listing: `"{prefix}/"`, or empty
pub fn listing_prefix(prefix: &str) -> String {
    let prefix = normalize_prefix(prefix);
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix)
    }
}

/// ISO-8601 UTC with milliseconds and a `Z` suffix
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Local files and remote key of one backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    key: ArtifactKey,
    work_dir: PathBuf,
}

impl BackupArtifact {
    /// Artifact for a run started at `created_at`, truncated to milliseconds
    pub fn new(tmp_root: &Path, prefix: &str, created_at: DateTime<Utc>) -> Self {
        let key = ArtifactKey::new(prefix, created_at.trunc_subsecs(3));
        let work_dir = tmp_root.join(key.name());
        Self { key, work_dir }
    }

    pub fn name(&self) -> String {
        self.key.name()
    }

    /// Per-run directory holding the archive and its encrypted copy
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(ARCHIVE_FILE)
    }

    pub fn encrypted_path(&self) -> PathBuf {
        self.work_dir.join(ENCRYPTED_FILE)
    }

    pub fn remote_key(&self) -> String {
        self.key.key()
    }

    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.key.created_at()
    }
}
