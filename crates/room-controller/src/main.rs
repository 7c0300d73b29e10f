//! Room Controller
//!
//! Provisions a dedicated voice room for every member who joins a tenant's
//! trigger room, moves them into it, and reclaims the room once it is empty.
//!
//! # Servers
//!
//! One HTTP server (default: 0.0.0.0:8090) carries:
//! - Event ingest from the gateway relay (`/events/*`, bearer-authenticated)
//! - Liveness and readiness probes (`/health`, `/ready`)
//! - Prometheus metrics (`/metrics`)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment (missing bot or ingest token is fatal)
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Open the mapping store (JSON file or Redis) and load every entry
//! 4. Create the REST gateway client and the occupancy tracker
//! 5. Spawn the serializer with the provisioning engine
//! 6. Start the HTTP server
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::secret::ExposeSecret;
use room_controller::config::{Config, StoreConfig};
use room_controller::engine::{EnginePolicy, ProvisioningEngine};
use room_controller::gateway::{GatewayClient, RestGatewayClient, VoiceStateTracker};
use room_controller::mapping::{JsonFileBackend, MappingBackend, MappingStore, RedisBackend};
use room_controller::observability::{
    health_router, init_metrics_recorder, while_serializer_runs, HealthState,
};
use room_controller::queue::{Serializer, WorkQueue};
use room_controller::reactor::EventReactor;
use room_controller::routes::{ingest_router, IngestAuth};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long the serializer gets to finish its current item on shutdown.
const SERIALIZER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration decides the log format, so load it first and report
    // failures once tracing is up
    let config = Config::from_env();
    init_tracing(config.as_ref().is_ok_and(|c| c.log_json));

    info!("Starting Room Controller");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        store = ?config.store,
        api_base_url = %config.api_base_url,
        http_bind_address = %config.http_bind_address,
        http_timeout_secs = config.http_timeout.as_secs(),
        item_spacing_ms = config.item_spacing.as_millis(),
        reclaim_settle_ms = config.reclaim_settle_delay.as_millis(),
        group_name = %config.group_name,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    // Open the mapping store; an unreadable store is fatal so that committed
    // entries are never silently dropped
    let backend: Arc<dyn MappingBackend> = match &config.store {
        StoreConfig::File(path) => {
            let backend = JsonFileBackend::new(path.clone());
            info!(path = %backend.path().display(), "Using JSON file mapping store");
            Arc::new(backend)
        }
        StoreConfig::Redis(url) => {
            info!("Connecting to Redis mapping store...");
            let backend = RedisBackend::connect(url.expose_secret())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to Redis");
                    e
                })?;
            info!("Redis connection established");
            Arc::new(backend)
        }
    };
    let store = MappingStore::open(backend).await.map_err(|e| {
        error!(error = %e, "Failed to load mapping store");
        e
    })?;
    let routing = store.subscribe();
    health_state.set_store_loaded();

    // Gateway client; occupancy comes from voice-state events
    let voice_states = Arc::new(VoiceStateTracker::new());
    let gateway: Arc<dyn GatewayClient> = Arc::new(RestGatewayClient::new(
        config.api_base_url.clone(),
        config.bot_token.clone(),
        config.http_timeout,
        Arc::clone(&voice_states),
    )?);

    // Serializer owns the engine, which owns the store
    let shutdown_token = CancellationToken::new();
    let (queue, receiver) = WorkQueue::new();
    let engine = ProvisioningEngine::new(gateway, store, EnginePolicy::from(&config));
    let serializer = Serializer::new(receiver, engine, config.item_spacing);
    let serializer_task = tokio::spawn(while_serializer_runs(
        Arc::clone(&health_state),
        serializer.run(shutdown_token.child_token()),
    ));
    info!("Serializer started");

    let reactor = Arc::new(EventReactor::new(queue, routing, voice_states));

    // Start HTTP server (MUST succeed - fail startup if it doesn't)
    let http_addr: SocketAddr = config.http_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.http_bind_address, "Invalid HTTP bind address");
        format!("Invalid HTTP bind address: {e}")
    })?;

    // Add /metrics endpoint served by Prometheus exporter
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let ingest_auth = Arc::new(IngestAuth::new(config.ingest_token.clone()));
    let app = ingest_router(reactor, ingest_auth)
        .merge(health_router(Arc::clone(&health_state)))
        .merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %http_addr, "Failed to bind HTTP server");
            format!("Failed to bind HTTP server to {http_addr}: {e}")
        })?;
    info!(addr = %http_addr, "HTTP server bound successfully");

    let http_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %http_addr, "HTTP server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            http_shutdown_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    info!("Room Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so the relay stops sending events
    health_state.begin_shutdown();
    shutdown_token.cancel();

    // The serializer stops between items; give an in-flight item time to end
    match tokio::time::timeout(SERIALIZER_SHUTDOWN_TIMEOUT, serializer_task).await {
        Ok(Ok(engine)) => info!(
            mapping_entries = engine.store().len(),
            "Serializer stopped"
        ),
        Ok(Err(e)) => warn!(error = %e, "Serializer task failed"),
        Err(_) => warn!(
            timeout_secs = SERIALIZER_SHUTDOWN_TIMEOUT.as_secs(),
            "Serializer did not stop in time"
        ),
    }

    info!("Room Controller shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "room_controller=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
