//! Liveness and readiness for the Room Controller.
//!
//! - `GET /health` - liveness, `200` while the process is up
//! - `GET /ready` - readiness, `200` only while the mapping store is loaded,
//!   the serializer task is running and shutdown has not begun; otherwise
//!   `503`. Both answers carry a [`ReadinessReport`] body.
//!
//! The serializer flag is owned by [`while_serializer_runs`], which wraps the
//! serializer future, so readiness drops as soon as that task ends for any
//! reason.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Component flags behind the probes.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    store_loaded: AtomicBool,
    serializer_running: AtomicBool,
    shutting_down: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Live, with no component ready yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            store_loaded: AtomicBool::new(false),
            serializer_running: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// The mapping store has loaded every committed entry.
    pub fn set_store_loaded(&self) {
        self.store_loaded.store(true, Ordering::SeqCst);
    }

    /// Stop accepting work; readiness stays false from here on.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_serializer_running(&self) -> bool {
        self.serializer_running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.report().ready
    }

    /// Snapshot of every component flag.
    #[must_use]
    pub fn report(&self) -> ReadinessReport {
        let store_loaded = self.store_loaded.load(Ordering::SeqCst);
        let serializer_running = self.is_serializer_running();
        let shutting_down = self.shutting_down.load(Ordering::SeqCst);
        ReadinessReport {
            ready: store_loaded && serializer_running && !shutting_down,
            store_loaded,
            serializer_running,
            shutting_down,
        }
    }
}

/// Body of `GET /ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub store_loaded: bool,
    pub serializer_running: bool,
    pub shutting_down: bool,
}

/// Clears the serializer flag when dropped, including on unwind.
struct SerializerRunning(Arc<HealthState>);

impl Drop for SerializerRunning {
    fn drop(&mut self) {
        self.0.serializer_running.store(false, Ordering::SeqCst);
    }
}

/// Drive the serializer future, holding the serializer flag while it runs.
pub async fn while_serializer_runs<F: Future>(state: Arc<HealthState>, serializer: F) -> F::Output {
    state.serializer_running.store(true, Ordering::SeqCst);
    let _running = SerializerRunning(state);
    serializer.await
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessReport>) {
    let report = state.report();
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
