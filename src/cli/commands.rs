//! CLI command definitions for msa-worker.
//!
//! `worker` runs the long-lived loop against Redis, `run` handles a single
//! job specification in-process and `check-config` prints the resolved
//! configuration.

use crate::config::WorkerConfig;
use crate::notify::{Notifier, SmtpTransport, StatusBridge};
use crate::pipeline::Dispatcher;
use crate::runner::ProcessRunner;
use crate::scheduler::{
    read_job_request, JobId, JobQueue, MemoryJobQueue, RedisJobQueue, Status, Worker,
};
use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Queue worker for MMseqs2 and Foldseek search jobs.
#[derive(Parser)]
#[command(name = "msa-worker")]
#[command(about = "Run MMseqs2/Foldseek search and MSA jobs from a shared queue")]
#[command(version)]
#[command(
    long_about = "msa-worker takes job tickets from a Redis queue, runs the requested search or MSA pipeline and packs the results into an archive in the job directory.\n\nExample usage:\n  msa-worker --config worker.yaml worker --graceful-exit"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Configuration file (YAML or JSON). Built-in defaults apply when omitted.
    #[arg(short, long, env = "MSA_WORKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Take tickets from the queue until stopped.
    Worker(WorkerArgs),

    /// Dispatch one job specification and print the outcome.
    Run(RunArgs),

    /// Push a job id onto the pending queue.
    Enqueue(EnqueueArgs),

    /// Load, validate and print the configuration.
    CheckConfig,
}

/// Arguments for the worker command.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Finish the current job and exit on SIGINT or SIGTERM.
    #[arg(long)]
    pub graceful_exit: bool,
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to a job.json file.
    pub job: PathBuf,
}

/// Arguments for the enqueue command.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Job id; the job directory must already hold its job.json.
    pub id: String,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Worker(args) => run_worker_command(config, args).await,
        Commands::Run(args) => run_job_command(config, args).await,
        Commands::Enqueue(args) => run_enqueue_command(config, args).await,
        Commands::CheckConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<WorkerConfig> {
    match path {
        Some(path) => WorkerConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let mut config = WorkerConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
    }
}

fn build_notifier(config: &WorkerConfig) -> anyhow::Result<Notifier> {
    match &config.mail.mailer {
        Some(smtp) => {
            let transport = SmtpTransport::new(smtp).context("Failed to set up SMTP transport")?;
            Ok(Notifier::new(
                config.mail.sender.clone(),
                config.mail.templates.clone(),
                Arc::new(transport),
            ))
        }
        None => Ok(Notifier::disabled()),
    }
}

// ============================================================================
// Worker Command
// ============================================================================

async fn run_worker_command(config: WorkerConfig, args: WorkerArgs) -> anyhow::Result<()> {
    let graceful = args.graceful_exit || config.worker.graceful_exit;

    let queue = RedisJobQueue::connect(&config.queue.url, &config.queue.prefix)
        .await
        .with_context(|| format!("Failed to connect to {}", config.queue.url))?;
    let notifier = build_notifier(&config)?;
    let dispatcher = Dispatcher::new(&config, ProcessRunner::new(config.verbose));
    let worker = Worker::new(&config, Arc::new(queue), dispatcher, notifier);

    let shutdown = CancellationToken::new();
    if graceful {
        tokio::spawn(shutdown_signal(shutdown.clone()));
    }

    info!(
        prefix = %config.queue.prefix,
        graceful_exit = graceful,
        "Starting worker"
    );
    let handled = worker.run(shutdown).await;
    info!(handled = handled, "Worker stopped");
    Ok(())
}

/// Cancels `shutdown` on the first SIGINT or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, finishing current job before exit"),
        () = terminate => info!("Received SIGTERM, finishing current job before exit"),
    }
    shutdown.cancel();
}

// ============================================================================
// Run Command
// ============================================================================

async fn run_job_command(config: WorkerConfig, args: RunArgs) -> anyhow::Result<()> {
    let request = read_job_request(&args.job)?;
    let notifier = build_notifier(&config)?;
    let dispatcher = Dispatcher::new(&config, ProcessRunner::new(config.verbose));

    let queue = Arc::new(MemoryJobQueue::new());
    let bridge = StatusBridge::new(Arc::clone(&queue) as Arc<dyn JobQueue>);
    let mut lifecycle = bridge.lifecycle(request.id.clone());
    lifecycle.advance(Status::Running).await;

    let outcome = dispatcher.run(&request).await;
    lifecycle.advance(outcome.status()).await;

    if let Some(email) = &request.email {
        if let Err(e) = notifier.notify(&request.id, email, outcome.template()).await {
            warn!(job_id = %request.id, error = %e, "Failed to send notification");
        }
    }

    let history: Vec<&str> = queue.history(&request.id).iter().map(Status::as_str).collect();
    println!("{}: {} ({})", request.id, outcome, history.join(" -> "));

    if !outcome.is_success() {
        anyhow::bail!("job {} finished with status {}", request.id, outcome.status());
    }
    Ok(())
}

// ============================================================================
// Enqueue Command
// ============================================================================

async fn run_enqueue_command(config: WorkerConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    let id = JobId::new(args.id);
    let spec = crate::scheduler::job_spec_path(&config.paths.results, &id);
    if !spec.exists() {
        warn!(job_id = %id, path = %spec.display(), "No job specification found yet");
    }

    let queue = RedisJobQueue::connect(&config.queue.url, &config.queue.prefix)
        .await
        .with_context(|| format!("Failed to connect to {}", config.queue.url))?;
    queue.enqueue(&id).await?;

    info!(job_id = %id, pending = queue.len().await?, "Job enqueued");
    Ok(())
}
