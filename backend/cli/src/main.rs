mod api;
mod config;
mod stream;
mod webhooks;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use callforge_core::{CallOrchestrator, Component};
use callforge_llm::{LlmConfig, OllamaModel};
use callforge_orchestrator::CallEngine;
use callforge_scheduler::CallScheduler;
use callforge_store::SqliteStore;
use callforge_telephony::{AdapterRegistry, TelephonyConfig};

use api::AppState;
use config::Config;

#[derive(Parser)]
#[command(name = "callforge")]
#[command(about = "CallForge: outbound voice call orchestration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API, webhook endpoints and scheduler
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Query a running server's health endpoint
    Status,
    /// List the providers configured in the environment
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            callforge_logging::init_logger(&config.log_dir, &config.log_level)?;
            let config = Config {
                port: port.unwrap_or(config.port),
                ..config
            };
            run_server(config).await?;
        }
        Commands::Status => {
            println!("CallForge status: checking...");
            let client = reqwest::Client::new();
            match client
                .get(format!("http://localhost:{}/api/health", config.port))
                .send()
                .await
            {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(_) => {
                    println!("CallForge is not running on port {}", config.port);
                }
            }
        }
        Commands::Providers => {
            let telephony = TelephonyConfig::from_env();
            let configured = telephony.configured();
            if configured.is_empty() {
                println!("No providers configured");
            }
            let default = telephony.default_provider();
            for kind in configured {
                let marker = if Some(kind) == default { " (default)" } else { "" };
                println!("{kind}{marker}");
            }
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    info!(
        port = config.port,
        bind = %config.bind_address,
        db = %config.db_path,
        public_url = %config.public_url,
        "Starting CallForge"
    );

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("opening database {}", config.db_path))?,
    );

    let registry = AdapterRegistry::from_config(&TelephonyConfig::from_env());
    if registry.is_empty() {
        warn!("No telephony providers configured; calls cannot be placed");
    } else {
        info!(providers = ?registry.kinds(), default = ?registry.default_kind(), "Providers registered");
    }

    let llm = LlmConfig::from_env();
    info!(url = %llm.base_url, model = %llm.model, "Language model configured");
    let engine = Arc::new(CallEngine::new(
        registry,
        store.clone(),
        store.clone(),
        Arc::new(OllamaModel::new(&llm)),
        config.engine_settings(),
    ));

    let (scheduler_tx, scheduler_rx) = mpsc::channel(32);
    let orchestrator: Arc<dyn CallOrchestrator> = engine.clone();
    let scheduler = CallScheduler::new(store.clone(), orchestrator, config.scheduler_config());
    tokio::spawn(async move {
        if let Err(e) = Component::start(&scheduler, scheduler_rx).await {
            error!(error = %e, "Scheduler task failed");
        }
    });
    info!("Scheduler started");

    let state = Arc::new(AppState {
        engine,
        store,
        scheduler_tx,
    });
    let app = api::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "HTTP API listening");

    axum::serve(listener, app).await?;

    Ok(())
}
