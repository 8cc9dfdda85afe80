use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sss_backup::backup::{AutoConfirm, BackupOrchestrator, RunOutcome, TerminalPrompt};
use sss_backup::config::{BackupJobConfig, Environment, RunOptions, DEFAULT_CONFIG_FILE};
use sss_backup::progress::{SilentReporter, SpinnerReporter};
use sss_backup::schedule::{CronSchedule, Scheduler};
use sss_backup::storage::{ObjectStore, S3ObjectStore};

#[derive(Parser)]
#[command(
    name = "sss-backup",
    version,
    about = "Encrypted tar+gpg backups to S3-compatible storage",
    long_about = "Archives the configured paths with tar, encrypts the archive with gpg, \
                  uploads it to an S3-compatible bucket and prunes old backups. \
                  Runs once, or on a cron schedule when --cron or CRON is set."
)]
struct Cli {
    /// Path to the job configuration file
    #[arg(short, long, env = "SSS_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Skip the size estimation
    #[arg(long)]
    skip_estimation: bool,

    /// Do not ask for confirmation
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// Keep the encrypted archive locally instead of uploading it
    #[arg(long)]
    no_upload: bool,

    /// Cron expression; overrides the CRON environment variable
    #[arg(long)]
    cron: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sss_backup=info")),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let env = Environment::from_env()?;
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(&env.storage).await);

    match cli.cron.clone().or_else(|| env.cron.clone()) {
        Some(expression) => run_scheduled(&cli, &env, store, &expression).await,
        None => run_once(&cli, &env, store).await,
    }
}

async fn run_once(cli: &Cli, env: &Environment, store: Arc<dyn ObjectStore>) -> Result<()> {
    let config = BackupJobConfig::load(&cli.config).await?;
    let options = RunOptions {
        skip_estimation: cli.skip_estimation,
        non_interactive: cli.yes,
        no_upload: cli.no_upload,
    };

    let outcome = BackupOrchestrator::new(config, store)
        .with_tmp_root(&env.tmp_root)
        .with_host_root(&env.host_root)
        .with_confirmation(TerminalPrompt)
        .with_reporter(SpinnerReporter::new())
        .run(&options)
        .await
        .context("Backup failed")?;

    if let RunOutcome::Completed(summary) = outcome {
        if let Some(path) = summary.local_artifact {
            info!(path = %path.display(), "Encrypted backup kept locally");
        }
    }

    Ok(())
}

async fn run_scheduled(
    cli: &Cli,
    env: &Environment,
    store: Arc<dyn ObjectStore>,
    expression: &str,
) -> Result<()> {
    let schedule = CronSchedule::parse(expression)?;
    let options = RunOptions {
        no_upload: cli.no_upload,
        ..RunOptions::scheduled()
    };

    // The configuration is re-read for every run
    let job = || {
        let store = store.clone();
        let config_path = cli.config.clone();
        let tmp_root = env.tmp_root.clone();
        let host_root = env.host_root.clone();
        async move {
            let config = BackupJobConfig::load(&config_path).await?;
            BackupOrchestrator::new(config, store)
                .with_tmp_root(tmp_root)
                .with_host_root(host_root)
                .with_confirmation(AutoConfirm)
                .with_reporter(SilentReporter)
                .run(&options)
                .await
        }
    };

    Scheduler::new(schedule).run(job, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
