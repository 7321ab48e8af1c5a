// src/main.rs - Fleet orchestrator entry point
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use printfleet::config::{self, Config};
use printfleet::gateway::{HttpGateway, PrinterGateway, SimulatedGateway};
use printfleet::guard::{BedClearanceGuard, HttpSnapshotSource, HttpVisionAnalyzer};
use printfleet::orchestrator::Orchestrator;
use printfleet::poller::CompletionPoller;
use printfleet::snapshot::SnapshotVault;
use printfleet::store::{InMemoryRecordStore, RecordStore};
use printfleet::web::{self, AppStateInner};
use printfleet_shared::{InMemoryAuthBackend, SystemClock};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Print fleet orchestrator
#[derive(Parser, Debug)]
#[command(name = "printfleet", about = "Runs print jobs across a fleet of networked 3D printers.")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "fleet.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API and run the completion poller (default)
    Serve {
        /// Drive simulated printers instead of real controllers
        #[arg(long)]
        simulate: bool,
    },
    /// Print a bearer token for a user
    Token {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let loaded = config::load_config(&cli.config);
    let level = loaded
        .as_ref()
        .ok()
        .and_then(|c| c.logging.level().ok())
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = loaded.map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", cli.config, e);
        Box::new(e) as BoxError
    })?;
    config.validate()?;

    match cli.command.unwrap_or(Commands::Serve { simulate: false }) {
        Commands::Token { user } => {
            let token = web::auth::issue_token(&config.auth.secret(), &user, config.auth.token_ttl_secs)?;
            println!("{token}");
            Ok(())
        }
        Commands::Serve { simulate } => serve(config, simulate).await,
    }
}

async fn serve(config: Config, simulate: bool) -> Result<(), BoxError> {
    tracing::info!("Starting printfleet with {} configured printer(s)", config.printers.len());

    let store = Arc::new(InMemoryRecordStore::new());
    for entry in &config.printers {
        let printer = entry.to_printer();
        tracing::info!(printer_id = %printer.id, name = %printer.name, owner = %printer.owner, "Registered printer");
        store.insert_printer(printer).await?;
    }

    let gateway: Arc<dyn PrinterGateway> = if simulate {
        tracing::warn!("Using simulated printers");
        Arc::new(SimulatedGateway::new(Duration::from_secs(60)))
    } else {
        Arc::new(HttpGateway::new(&config.gateway)?)
    };

    let mut orchestrator = Orchestrator::new(store, gateway, Arc::new(SystemClock));
    if config.bed_clearance.enabled {
        let bed = &config.bed_clearance;
        let vision_url = bed.vision_url.clone().unwrap_or_default();
        let vault = SnapshotVault::new(bed.snapshot_ttl(), config.server.public_url.clone());
        let guard = BedClearanceGuard::new(
            Arc::new(HttpSnapshotSource::new(bed.timeout())?),
            Arc::new(HttpVisionAnalyzer::new(vision_url, bed.timeout())?),
            vault.clone(),
            bed.timeout(),
        );
        orchestrator = orchestrator.with_guard(guard);

        // Expire published snapshots in the background.
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(vault.ttl);
            loop {
                interval.tick().await;
                let dropped = vault.cleanup().await;
                if dropped > 0 {
                    tracing::debug!(dropped, "Expired bed snapshots");
                }
            }
        });
    } else {
        tracing::warn!("Bed clearance checking is disabled");
    }
    let orchestrator = Arc::new(orchestrator);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let poller = CompletionPoller::new(orchestrator.clone(), &config.poller).spawn(shutdown_rx);

    let users: HashMap<String, String> = config
        .auth
        .users
        .iter()
        .map(|u| (u.username.clone(), u.password.clone()))
        .collect();
    let state = Arc::new(AppStateInner {
        orchestrator,
        auth_backend: Box::new(InMemoryAuthBackend::new(users)),
        jwt_secret: config.auth.secret(),
        token_ttl_secs: config.auth.token_ttl_secs,
    });
    let app = web::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(());
    poller.await?;
    tracing::info!("printfleet stopped");
    Ok(())
}
