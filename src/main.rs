use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use portal_ingest::auth::{Actor, Role};
use portal_ingest::config::Config;
use portal_ingest::constants::ENV_METRICS_PORT;
use portal_ingest::drive::GoogleDriveClient;
use portal_ingest::ga::{import_llm_dashboard, reset_property, DateRange, GaMetricsService, MetricsServiceClient};
use portal_ingest::observability;
use portal_ingest::server::{self, AppState};
use portal_ingest::storage::{SqliteStorage, Storage};
use portal_ingest::sync::RecipientSyncService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "portal_ingest")]
#[command(about = "Campaign recipient sync and GA metrics pipelines for the marketing portal")]
#[command(version)]
struct Cli {
    /// Optional TOML config file (defaults to ./portal.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull recipient files from Drive into matching campaigns
    SyncRecipients {
        /// Override the source folder id
        #[arg(long)]
        folder: Option<String>,
    },
    /// Import a saved dashboard payload (JSON) into the GA tables
    ImportGa {
        #[arg(long)]
        property: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Print the assembled GA metrics response for a property
    GaMetrics {
        #[arg(long)]
        property: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Delete every stored GA row for a property
    ResetProperty {
        #[arg(long)]
        property: String,
    },
    /// Run the HTTP server
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

/// The CLI runs with full rights; HTTP callers go through the policy per request.
fn operator() -> Actor {
    Actor::new("cli", Role::Admin)
}

fn ga_service(config: &Config, storage: Arc<dyn Storage>) -> GaMetricsService {
    let service = GaMetricsService::new(storage);
    match MetricsServiceClient::new(&config.metrics_service) {
        Ok(client) => service.with_source(Arc::new(client)),
        Err(e) => {
            info!("Metrics service disabled: {}", e);
            service
        }
    }
}

fn sync_service(config: &Config, storage: Arc<dyn Storage>, folder: Option<String>) -> Result<RecipientSyncService> {
    let drive = GoogleDriveClient::new(&config.drive)?;
    let folder = match folder {
        Some(folder) => folder,
        None => config.drive.require_source_folder_id()?.to_string(),
    };
    Ok(RecipientSyncService::new(Arc::new(drive), storage, folder))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    observability::init_logging();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Ok(port) = std::env::var(ENV_METRICS_PORT) {
        let port: u16 = port.trim().parse().with_context(|| format!("{} must be a port number", ENV_METRICS_PORT))?;
        observability::init_metrics(port);
    }

    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(&config.storage.sqlite_path)
            .with_context(|| format!("opening database at {}", config.storage.sqlite_path))?,
    );

    match cli.command {
        Commands::SyncRecipients { folder } => {
            let service = sync_service(&config, storage, folder)?;
            let summary = service.sync_and_persist_recipients().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::ImportGa { property, file } => {
            let content = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let payload: serde_json::Value = serde_json::from_str(&content)?;
            let counts = import_llm_dashboard(storage.as_ref(), &property, &payload).await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Commands::GaMetrics { property, from, to } => {
            let service = ga_service(&config, storage);
            let response = service.fetch(&operator(), &property, DateRange::new(from, to)).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::ResetProperty { property } => {
            let removed = reset_property(storage.as_ref(), &property).await?;
            println!("{}", serde_json::to_string_pretty(&removed)?);
        }
        Commands::Serve { port } => {
            let sync = match sync_service(&config, storage.clone(), None) {
                Ok(service) => Some(Arc::new(service)),
                Err(e) => {
                    warn!("Recipient sync endpoint disabled: {}", e);
                    None
                }
            };
            let state = AppState {
                storage: storage.clone(),
                ga: Arc::new(ga_service(&config, storage)),
                sync,
            };
            server::start_server(state, port.unwrap_or(config.server.port)).await?;
        }
    }
    Ok(())
}
