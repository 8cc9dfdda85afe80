// Backup orchestration: estimate, confirm, archive, encrypt, upload, prune, clean up

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use super::artifact::BackupArtifact;
use super::retention::{PruneReport, RetentionPolicy, RetentionPruner};
use super::upload::{UploadReceipt, Uploader};
use crate::config::env::DEFAULT_TMP_ROOT;
use crate::config::{resolve_paths, BackupJobConfig, RunOptions};
use crate::progress::{ProgressReporter, SilentReporter};
use crate::resilience::RetryConfig;
use crate::storage::ObjectStore;
use crate::tools::{
    Archiver, DiskUsage, Encryptor, GpgEncryptor, SizeEstimate, SizeReport, TarArchiver,
};
use crate::utils::format::{format_elapsed, format_kilobytes};
use crate::{BackupError, Result};

/// Asks whether the backup should go ahead
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, message: &str) -> Result<bool>;
}

/// Prompt on the terminal; an empty answer means yes, end of input means no
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

#[async_trait]
impl Confirmation for TerminalPrompt {
    async fn confirm(&self, message: &str) -> Result<bool> {
        let message = message.to_string();
        let answer = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
            eprint!("{} [Y/n] ", message);
            io::stderr().flush()?;

            let mut input = String::new();
            if io::stdin().read_line(&mut input)? == 0 {
                return Ok(None);
            }
            Ok(Some(input))
        })
        .await??;

        Ok(answer.map(|a| parse_answer(&a)).unwrap_or(false))
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "" | "y" | "yes"
    )
}

/// Always answers yes
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Confirmation for AutoConfirm {
    async fn confirm(&self, _message: &str) -> Result<bool> {
        Ok(true)
    }
}

/// What a completed run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Backup name (`sss-bkp--<timestamp>`)
    pub name: String,
    /// Uploaded key, `None` when upload was disabled
    pub remote_key: Option<String>,
    /// Kept encrypted file, `Some` only when upload was disabled
    pub local_artifact: Option<PathBuf>,
    pub sizes: Option<SizeReport>,
    pub upload: Option<UploadReceipt>,
    pub prune: Option<PruneReport>,
    pub elapsed: Duration,
}

/// Result of [`BackupOrchestrator::run`]
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// The operator declined the confirmation prompt; nothing was written
    Declined,
}

/// Runs one backup from start to cleanup
pub struct BackupOrchestrator {
    config: BackupJobConfig,
    store: Arc<dyn ObjectStore>,
    estimator: Arc<dyn SizeEstimate>,
    archiver: Arc<dyn Archiver>,
    encryptor: Arc<dyn Encryptor>,
    confirmation: Arc<dyn Confirmation>,
    reporter: Arc<dyn ProgressReporter>,
    retry_config: RetryConfig,
    tmp_root: PathBuf,
    host_root: PathBuf,
}

impl BackupOrchestrator {
    /// Orchestrator using `du`, `tar`, `gpg` and a terminal prompt
    pub fn new(config: BackupJobConfig, store: Arc<dyn ObjectStore>) -> Self {
        let retry_config = config.retry_config();
        Self {
            config,
            store,
            estimator: Arc::new(DiskUsage::new()),
            archiver: Arc::new(TarArchiver::new()),
            encryptor: Arc::new(GpgEncryptor::new()),
            confirmation: Arc::new(TerminalPrompt),
            reporter: Arc::new(SilentReporter),
            retry_config,
            tmp_root: PathBuf::from(DEFAULT_TMP_ROOT),
            host_root: PathBuf::new(),
        }
    }

    pub fn with_estimator(mut self, estimator: impl SizeEstimate + 'static) -> Self {
        self.estimator = Arc::new(estimator);
        self
    }

    pub fn with_archiver(mut self, archiver: impl Archiver + 'static) -> Self {
        self.archiver = Arc::new(archiver);
        self
    }

    pub fn with_encryptor(mut self, encryptor: impl Encryptor + 'static) -> Self {
        self.encryptor = Arc::new(encryptor);
        self
    }

    pub fn with_confirmation(mut self, confirmation: impl Confirmation + 'static) -> Self {
        self.confirmation = Arc::new(confirmation);
        self
    }

    pub fn with_reporter(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Override the retry settings taken from the job configuration
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Directory under which per-run work directories are created
    pub fn with_tmp_root(mut self, tmp_root: impl Into<PathBuf>) -> Self {
        self.tmp_root = tmp_root.into();
        self
    }

    /// Root every configured path is joined onto
    pub fn with_host_root(mut self, host_root: impl Into<PathBuf>) -> Self {
        self.host_root = host_root.into();
        self
    }

    pub fn config(&self) -> &BackupJobConfig {
        &self.config
    }

    /// Run the whole pipeline once.
    ///
    /// Nothing touches the file system before the confirmation. Once the work
    /// directory exists it is removed whatever the outcome, unless upload is
    /// disabled and the encrypted file is the only copy.
    #[instrument(skip(self), fields(bucket = self.store.bucket()))]
    pub async fn run(&self, options: &RunOptions) -> Result<RunOutcome> {
        let start = Instant::now();

        self.config.validate()?;
        let recipient = self
            .config
            .recipient()
            .ok_or_else(|| BackupError::Config("No GPG key recipient in config".to_string()))?;
        let paths = resolve_paths(&self.host_root, &self.config.paths);
        let upload_enabled = self.config.upload_enabled(options);
        let artifact = BackupArtifact::new(&self.tmp_root, self.config.prefix(), Utc::now());

        info!(name = %artifact.name(), paths = paths.len(), upload_enabled, "Starting backup");

        let sizes = if options.skip_estimation {
            None
        } else {
            Some(self.estimate(&paths).await?)
        };

        if !options.non_interactive && !self.confirmation.confirm("Confirm backup?").await? {
            info!("Aborting backup");
            return Ok(RunOutcome::Declined);
        }

        let mut workspace = Workspace::create(artifact.work_dir(), !upload_enabled).await?;
        let stages = self
            .run_stages(&artifact, &paths, recipient, upload_enabled)
            .await;
        let cleanup = workspace.cleanup().await;

        let (upload, prune) = match (stages, cleanup) {
            (Ok(done), Ok(())) => done,
            (Ok(_), Err(cleanup_err)) => return Err(cleanup_err),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(cleanup_err)) => {
                error!(error = %cleanup_err, stage = e.stage(), "Cleanup failed after stage error");
                return Err(e);
            }
        };

        let elapsed = start.elapsed();
        info!("Backup completed in {}", format_elapsed(elapsed));

        Ok(RunOutcome::Completed(RunSummary {
            name: artifact.name(),
            remote_key: upload.as_ref().map(|u| u.key.clone()),
            local_artifact: (!upload_enabled).then(|| artifact.encrypted_path()),
            sizes,
            upload,
            prune,
            elapsed,
        }))
    }

    async fn estimate(&self, paths: &[PathBuf]) -> Result<SizeReport> {
        self.reporter.start("Getting sizes of directories");
        let report = self.estimator.estimate(paths, &self.config.ignore).await;
        self.reporter.finish();
        let report = report?;

        for entry in &report.entries {
            info!("{}: {}", entry.path.display(), format_kilobytes(entry.kilobytes));
        }
        info!("Total size: {}", report.total_display());
        Ok(report)
    }

    async fn run_stages(
        &self,
        artifact: &BackupArtifact,
        paths: &[PathBuf],
        recipient: &str,
        upload_enabled: bool,
    ) -> Result<(Option<UploadReceipt>, Option<PruneReport>)> {
        let reporter = self.reporter.as_ref();
        let archive_path = artifact.archive_path();
        let encrypted_path = artifact.encrypted_path();

        reporter.start("Creating backup");
        let archived = self
            .archiver
            .build(paths, &self.config.ignore, &archive_path, reporter)
            .await;
        reporter.finish();
        archived?;
        info!("Backup created");

        reporter.start("Encrypting backup");
        let encrypted = self
            .encryptor
            .encrypt(&archive_path, recipient, &encrypted_path)
            .await;
        reporter.finish();
        encrypted?;
        info!("Backup encrypted");

        if !upload_enabled {
            info!(path = %encrypted_path.display(), "Upload disabled, backup kept locally");
            return Ok((None, None));
        }

        let receipt = Uploader::new(self.store.clone(), self.retry_config.clone())
            .upload(artifact, reporter)
            .await?;

        let prune = match RetentionPolicy::from_config(&self.config)? {
            Some(policy) => {
                reporter.start("Deleting old backups");
                let report = RetentionPruner::new(self.store.clone(), self.config.prefix())
                    .prune(&policy, artifact.key(), Utc::now())
                    .await;
                reporter.finish();
                Some(report?)
            }
            None => None,
        };

        Ok((Some(receipt), prune))
    }
}

/// Per-run work directory, removed on cleanup or when dropped mid-run
struct Workspace {
    path: PathBuf,
    preserve: bool,
    armed: bool,
}

impl Workspace {
    async fn create(path: &Path, preserve: bool) -> Result<Self> {
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "Error creating tmp directory");
            BackupError::Io(e)
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            preserve,
            armed: true,
        })
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.armed = false;

        if self.preserve {
            info!("Skipping deletion of tmp directory due to no upload");
            return Ok(());
        }

        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Error deleting tmp directory");
                Err(BackupError::Cleanup {
                    path: self.path.clone(),
                    source: e,
                })
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.armed && !self.preserve && self.path.exists() {
            warn!(path = %self.path.display(), "Run interrupted, removing tmp directory");
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
