//! # JACS Services Command Line
//!
//! Runs built-in services against a local engine, shows their argument schemas and looks up
//! persisted service records.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use jacs_services::config::EngineConfig;
use jacs_services::constants::system::DEFAULT_CONFIG_PATH;
use jacs_services::logging::init_structured_logging;
use jacs_services::{
    JacsServiceDataPersistence, JacsServiceEngine, JacsServiceState, ProcessingLocation,
    ServiceId, ServiceSubmission,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "jacs-services")]
#[command(about = "Submit and inspect JACS services")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (default: config/jacs-services.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a service, optionally running it to completion
    Submit {
        /// Registered service name, e.g. mergeLsmPair
        name: String,

        /// Run the service in this process and wait until it finishes
        #[arg(long)]
        wait: bool,

        #[arg(long)]
        owner: Option<String>,

        /// Processing location (local or cluster)
        #[arg(long, default_value = "local")]
        location: ProcessingLocation,

        #[arg(long)]
        workspace: Option<String>,

        /// Service arguments, passed after `--`
        #[arg(last = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show the argument schema of one service, or of all of them
    Metadata { name: Option<String> },

    /// Show a persisted service record and its children
    Status { id: ServiceId },

    /// Run the engine until interrupted, resuming services left unfinished in the store
    Run {
        /// Seconds to wait for in-flight services on shutdown
        #[arg(long, default_value_t = 30)]
        shutdown_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = EngineConfig::load(Some(&config_path))
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let (engine, durable) = build_engine(config).await?;

    match cli.command {
        Commands::Metadata { name: Some(name) } => {
            let metadata = engine.get_service_metadata(&name)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Metadata { name: None } => {
            println!(
                "{}",
                serde_json::to_string_pretty(&engine.list_service_metadata())?
            );
        }
        Commands::Status { id } => {
            let Some(service) = engine.get_service_by_id(id).await? else {
                bail!("service {id} not found");
            };
            let children = engine.get_child_services(id).await?;
            println!("{}", serde_json::to_string_pretty(&service)?);
            for child in children {
                println!("  child {child}: {}", child.state);
            }
        }
        Commands::Submit {
            name,
            wait,
            owner,
            location,
            workspace,
            args,
        } => {
            let mut submission = ServiceSubmission::new(name).args(args).location(location);
            if let Some(owner) = owner {
                submission = submission.owner(owner);
            }
            if let Some(workspace) = workspace {
                submission = submission.workspace(workspace);
            }

            if !wait {
                if !durable {
                    warn!("Without a database the submitted service is lost when this process exits");
                }
                let service = engine.submit_single_service(submission).await?;
                info!(service_id = %service.id, service_name = %service.name, "📥 CLI: Service queued");
                println!("{}", serde_json::to_string_pretty(&service)?);
                return Ok(());
            }

            start_and_recover(&engine).await?;
            let service = engine.submit_single_service(submission).await?;
            info!(service_id = %service.id, service_name = %service.name, "📥 CLI: Service submitted");
            let finished = engine.wait_for_completion(service.id).await?;
            if let Err(e) = engine.shutdown(Duration::from_secs(30)).await {
                warn!(error = %e, "Engine did not shut down cleanly");
            }

            println!("{}", serde_json::to_string_pretty(&finished)?);
            if finished.state != JacsServiceState::Success {
                bail!("service {finished} finished {}", finished.state);
            }
        }
        Commands::Run { shutdown_timeout } => {
            if !durable {
                warn!("Running without a database; only services submitted to this process exist");
            }
            start_and_recover(&engine).await?;
            tokio::signal::ctrl_c()
                .await
                .context("waiting for the interrupt signal")?;
            info!("🛑 CLI: Interrupted, shutting down");
            engine
                .shutdown(Duration::from_secs(shutdown_timeout))
                .await?;
        }
    }

    Ok(())
}

async fn start_and_recover(engine: &JacsServiceEngine) -> anyhow::Result<()> {
    let recovered = engine
        .start_and_recover()
        .await
        .context("re-enqueueing unfinished services")?;
    if recovered > 0 {
        info!(recovered, "♻️ CLI: Resumed unfinished services");
    }
    Ok(())
}

/// Builds the engine; the flag tells whether its store outlives the process
#[cfg(feature = "postgres")]
async fn build_engine(config: EngineConfig) -> anyhow::Result<(JacsServiceEngine, bool)> {
    use jacs_services::PgServiceDataPersistence;

    let mut builder = JacsServiceEngine::builder();
    let durable = config.database.url.is_some();
    if let Some(url) = config.database.url.as_deref() {
        let store = PgServiceDataPersistence::connect(url, config.database.max_connections)
            .await
            .context("connecting to the service database")?;
        store.migrate().await.context("running migrations")?;
        let store: Arc<dyn JacsServiceDataPersistence> = Arc::new(store);
        builder = builder.persistence(store);
    }
    Ok((builder.config(config).build()?, durable))
}

#[cfg(not(feature = "postgres"))]
async fn build_engine(config: EngineConfig) -> anyhow::Result<(JacsServiceEngine, bool)> {
    if config.database.url.is_some() {
        warn!("database.url is set but postgres support is disabled; using the in-memory store");
    }
    let store: Arc<dyn JacsServiceDataPersistence> =
        Arc::new(jacs_services::InMemoryServiceDataPersistence::new());
    let engine = JacsServiceEngine::builder()
        .config(config)
        .persistence(store)
        .build()?;
    Ok((engine, false))
}
