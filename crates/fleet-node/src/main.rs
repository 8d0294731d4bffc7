//! Fleet node daemon.
//!
//! Owns the server processes of one host and serves health endpoints. On
//! Ctrl-C every tracked server is stopped before the process exits.
//!
//! This binary is a single-process daemon. Its packet bus is an in-process
//! [`LocalBroker`], so shutdown requests only reach participants connected
//! inside this process; servers running as separate processes never see them
//! and are stopped by signal once the ack timeout passes. It exposes no
//! surface for starting servers. Embedders that need either drive
//! [`LifecycleCoordinator`] directly with their own transport.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use fleet_node::{
    Catalog, DirectoryStager, LifecycleCoordinator, NodeConfig, OsLauncher, ProcessSupervisor,
};
use fleet_packets::{LocalBroker, PacketDispatcher, PacketRegistry};
use fleet_store::{RocksStore, Store};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
    coordinator: Arc<LifecycleCoordinator>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    node: String,
    running: usize,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "fleet-node",
        node: state.coordinator.node_id().to_name(),
        running: state.coordinator.running().len(),
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state
        .store
        .list_servers_by_host(&state.coordinator.node_id())
    {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "Store not ready");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fleet node");

    // Load configuration from environment
    let config = NodeConfig::from_env();
    let node_id = config.node_id();

    // Initialize store
    let store: Arc<dyn Store> = Arc::new(RocksStore::open(&config.data_dir)?);
    tracing::info!(data_dir = %config.data_dir.display(), "Initialized RocksDB store");

    // Connect to the bus
    let registry = Arc::new(PacketRegistry::with_builtin());
    let dispatcher = PacketDispatcher::connect(node_id, Arc::new(LocalBroker::new()), registry)?;

    let catalog_path = config.cloud_path.join("catalog.json");
    let catalog = if catalog_path.exists() {
        Catalog::load(&catalog_path)?
    } else {
        tracing::warn!(path = %catalog_path.display(), "No catalog found, starting empty");
        Catalog::new()
    };

    let supervisor = ProcessSupervisor::new(
        &config,
        Arc::new(catalog),
        Arc::new(OsLauncher::new()),
        Arc::new(DirectoryStager::new(&config.work_root)),
    );
    let coordinator = Arc::new(LifecycleCoordinator::new(
        node_id,
        Arc::clone(&store),
        dispatcher,
        supervisor,
        config.stop,
    ));

    let app = create_router(AppState {
        store,
        coordinator: Arc::clone(&coordinator),
    });

    // Start server
    tracing::info!(node = %node_id, listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for (id, outcome) in coordinator.stop_all(false).await {
        tracing::info!(server = %id, ?outcome, "Stopped on shutdown");
    }

    Ok(())
}
