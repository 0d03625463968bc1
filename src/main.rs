use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use rfid_images::config::{AppConfig, SearchEngine};
use rfid_images::search::Searcher;
use rfid_images::search_clients::{elasticsearch::ElasticsearchSearcher, tantivy::TantivySearcher};
use rfid_images::service::ImageService;
use rfid_images::store::RecordStore;
use rfid_images::sync::SyncBridge;
use rfid_images::web_server;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "rfid_images", version, about = "Gantry image captures with a synced search index")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and the index sync worker (default)
    Serve,
    /// Compare the record store with the search index once, then exit
    Reconcile {
        /// Report drift without touching the index
        #[arg(long)]
        dry_run: bool,
    },
}

pub fn start_reconcile_job(bridge: Arc<SyncBridge>, repair: bool) {
    tokio::spawn(async move {
        bridge.prepare_index().await;
        match bridge.reconcile(repair).await {
            Ok(report) => info!(
                "Startup reconcile: checked {}, drift {}, repaired {}",
                report.checked,
                report.drift(),
                report.repaired
            ),
            Err(e) => log::error!("Startup reconcile failed: {}", e),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::new()?;

    // Initialize env_logger based on config.log_level
    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting rfid_images");

    let store = RecordStore::open(&config.database_path)?;
    let searcher: Arc<dyn Searcher> = match config.engine {
        SearchEngine::Elasticsearch => Arc::new(ElasticsearchSearcher::new(&config)?),
        SearchEngine::Tantivy => Arc::new(TantivySearcher::new(&config)?),
    };
    let bridge = SyncBridge::new(store.clone(), searcher.clone(), config.sync.clone());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Reconcile { dry_run } => {
            searcher.ensure_index_exists().await?;
            let report = bridge.reconcile(!dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve => {
            // the worker creates the index once the engine is reachable
            let worker = bridge.spawn();
            if config.sync.reconcile_on_startup {
                start_reconcile_job(bridge.clone(), config.sync.reconcile_repair);
            }

            let service = ImageService::new(store, searcher, bridge);
            // Run the web server in the foreground
            if let Err(e) = web_server::start_web_server(Arc::new(config), service).await {
                log::error!("Web server error: {}", e);
            }
            worker.abort();
        }
    }

    info!("rfid_images finished");

    Ok(())
}
