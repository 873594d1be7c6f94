//! Generic REST request metrics for the small ambient HTTP surface (health,
//! diagnostics snapshot). Kept separate from `diagnostics`, which is the
//! WebSocket-specific AdminDiagnostics component (§4.10).

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub requests_total: Arc<AtomicU64>,
    pub requests_success: Arc<AtomicU64>,
    pub requests_error: Arc<AtomicU64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            requests_success: Arc::new(AtomicU64::new(0)),
            requests_error: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Metrics {
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.requests_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.requests_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_error: self.requests_error.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_error: u64,
}

async fn metrics_json(State(state): State<crate::AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Mounted against the crate's `AppState`, not a bare `Metrics` — the small
/// REST surface (health, diagnostics) shares one router/state type, so this
/// reads its counters out of `AppState::metrics` rather than carrying its
/// own separate state layer.
pub fn router() -> Router<crate::AppState> {
    Router::new().route("/metrics", get(metrics_json))
}

use axum::{extract::Request, middleware::Next, response::Response};

pub async fn metrics_middleware(
    State(state): State<crate::AppState>,
    request: Request,
    next: Next,
) -> Response {
    state.metrics.record_request();
    let response = next.run(request).await;

    if response.status().is_success() {
        state.metrics.record_success();
    } else if response.status().is_client_error() || response.status().is_server_error() {
        state.metrics.record_error();
    }

    response
}
