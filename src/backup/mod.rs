//! Backup pipeline
//!
//! - [`artifact`]: run name, local paths and remote key
//! - [`upload`]: upload with bounded retry
//! - [`retention`]: pruning of old remote backups
//! - [`orchestrator`]: the end-to-end run

pub mod artifact;
pub mod orchestrator;
pub mod retention;
pub mod upload;

pub use artifact::{ArtifactKey, BackupArtifact, ARTIFACT_SUFFIX, NAME_MARKER};
pub use orchestrator::{
    AutoConfirm, BackupOrchestrator, Confirmation, RunOutcome, RunSummary, TerminalPrompt,
};
pub use retention::{
    select_for_deletion, PruneReport, RemoteBackupEntry, RetentionPolicy, RetentionPruner,
};
pub use upload::{UploadReceipt, Uploader};

/// Total upload attempts, including the first
pub const MAX_UPLOAD_ATTEMPTS: usize = 5;
