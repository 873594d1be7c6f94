//! Realtime messaging core — library exports for integration tests.
//! The actual process entry point lives in `main.rs`.

#![allow(dead_code)]

pub mod auth;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod errors;
pub mod hub;
pub mod middleware;
pub mod models;
pub mod monitoring;
pub mod notifications;
pub mod protocol;
pub mod rate_limit;
pub mod rooms;
pub mod routes;
pub mod settings;
pub mod topics;
pub mod transport;
pub mod utils;

use std::sync::Arc;

use auth::AuthGate;
use bridge::ServiceBridgeHandle;
use config::Config;
use db::Database;
use diagnostics::Diagnostics;
use hub::Hub;
use monitoring::Metrics;

/// Shared across every route and Connection actor. Cheap to clone — every
/// field is itself an `Arc` or already `Clone` (§5: no component holds a
/// lock broader than the one resource it owns).
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub auth: Arc<AuthGate>,
    pub hub: Hub,
    pub diagnostics: Arc<Diagnostics>,
    /// Publish handle for the internal services this core receives events
    /// from (§4.9). Nothing in this crate calls it today; it is the seam a
    /// separate service integration plugs into.
    pub bridge_handle: ServiceBridgeHandle,
    /// Generic REST request counters for the small ambient HTTP surface
    /// (health, diagnostics) — distinct from the WebSocket-specific
    /// `Diagnostics` (§4.10).
    pub metrics: Metrics,
}
