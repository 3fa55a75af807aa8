use std::path::Path;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use artifacthub_core::{PipelineDeleted, ScopeDeleted, WorkflowDeleted};
use artifacthub_server::config::ArtifactHubConfig;
use artifacthub_server::factory::{create_database, create_storage};
use artifacthub_server::pipeline::Pipeline;

/// Artifact bucket cleanup process.
#[derive(Parser, Debug)]
#[command(
    name = "artifacthub-server",
    about = "Applies artifact retention policies to their storage buckets"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "artifacthub.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler and workers until interrupted (default).
    Run,
    /// Run database migrations, then exit.
    Migrate,
    /// Run one scheduling tick, process every resulting request, then exit.
    ScheduleOnce,
    /// Delete the stored artifacts of a removed workflow, then exit.
    DeleteWorkflow {
        #[arg(long)]
        workflow_id: String,
        #[arg(long)]
        artifact_store_id: String,
    },
    /// Delete the stored artifacts of a removed pipeline, then exit.
    DeletePipeline {
        #[arg(long)]
        pipeline_id: String,
        #[arg(long)]
        artifact_store_id: String,
    },
}

/// How long in-flight cleaner runs may take to finish after shutdown.
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ArtifactHubConfig::load(Path::new(&cli.config))?;
    artifacthub_server::telemetry::init(&config.logging);

    if !Path::new(&cli.config).exists() {
        info!(path = %cli.config, "config file not found, using defaults");
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Migrate => run_migrate(&config).await,
        Commands::ScheduleOnce => run_schedule_once(&config).await,
        Commands::Run => run(&config).await,
        Commands::DeleteWorkflow {
            workflow_id,
            artifact_store_id,
        } => run_delete(&config, &WorkflowDeleted::new(workflow_id, artifact_store_id)).await,
        Commands::DeletePipeline {
            pipeline_id,
            artifact_store_id,
        } => run_delete(&config, &PipelineDeleted::new(pipeline_id, artifact_store_id)).await,
    }
}

async fn run(config: &ArtifactHubConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db = create_database(&config.database).await?;
    let storage = create_storage(&config.storage).await?;
    let pipeline = Pipeline::new(config, db, storage);

    if config.scheduler.enabled != config.worker.enabled {
        warn!(
            scheduler = config.scheduler.enabled,
            worker = config.worker.enabled,
            "the clean request queue is in-process; requests need both a scheduler and workers"
        );
    }

    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();
    if config.worker.enabled {
        pipeline.spawn_workers(config.worker.concurrency, &tracker, &cancel);
    }
    if config.deletion.enabled {
        pipeline.spawn_deletion_workers(config.deletion.concurrency, &tracker, &cancel);
    }

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let scheduler = if config.scheduler.enabled {
        let scheduler = pipeline.scheduler;
        Some(tokio::spawn(async move { scheduler.run(shutdown_rx).await }))
    } else {
        None
    };

    info!("artifacthub-server started");
    shutdown_signal().await;

    if let Some(handle) = scheduler {
        let _ = shutdown_tx.send(()).await;
        if let Err(e) = handle.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
    }

    cancel.cancel();
    tracker.close();
    if tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = WORKER_SHUTDOWN_TIMEOUT.as_secs(),
            "shutdown timeout exceeded, in-flight cleaner runs were abandoned"
        );
    }

    let pending = pipeline.broker.len(artifacthub_core::ROUTING_KEY);
    if pending > 0 {
        warn!(pending, "unprocessed clean requests dropped at shutdown");
    }
    let snapshot = pipeline.metrics.snapshot();
    info!(?snapshot, "artifacthub-server shut down");
    Ok(())
}

async fn run_migrate(config: &ArtifactHubConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(backend = %config.database.backend, "running database migrations...");
    let _db = create_database(&config.database).await?;
    info!("all migrations complete");
    Ok(())
}

async fn run_schedule_once(config: &ArtifactHubConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db = create_database(&config.database).await?;
    let storage = create_storage(&config.storage).await?;
    let pipeline = Pipeline::new(config, db, storage);

    pipeline.schedule_once().await?;

    let dead_letters = pipeline.broker.dead_letter_count();
    if dead_letters > 0 {
        warn!(dead_letters, "some clean requests failed permanently");
    }
    let snapshot = pipeline.metrics.snapshot();
    info!(?snapshot, "scheduling pass complete");
    Ok(())
}

async fn run_delete<E: ScopeDeleted>(
    config: &ArtifactHubConfig,
    event: &E,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = create_database(&config.database).await?;
    let storage = create_storage(&config.storage).await?;
    let pipeline = Pipeline::new(config, db, storage);

    pipeline.delete_now(event).await?;
    if pipeline.broker.dead_letter_count() > 0 {
        return Err(format!("deleting {} artifacts failed", E::SCOPE).into());
    }
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
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
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
