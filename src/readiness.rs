//! The Readiness Reporter (§2.9): a single boolean, "the pipeline is
//! running", exposed over HTTP (§6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

#[derive(Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// §6: `/readyz` is 200 only once the lease is held and the initial sync
/// has completed; `/healthz` is always 200 while the process is alive.
pub fn router(readiness: Readiness) -> Router {
    Router::new()
        .route("/readyz", get(readyz))
        .route("/healthz", get(healthz))
        .with_state(readiness)
}

async fn readyz(State(readiness): State<Readiness>) -> impl IntoResponse {
    if readiness.is_ready() {
        (StatusCode::OK, "").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for databroker lease").into_response()
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "").into_response()
}
