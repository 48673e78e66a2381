//! xtal-ingest library interface
//!
//! Discovers crystal plate image directories, reconciles their barcodes with
//! the plate registry and promotes finished plates into the visit archive.
//! Exposed as a library for the binary and the integration tests.

pub mod api;
pub mod collector;
pub mod context;
pub mod error;
pub mod logging;
pub mod registry;
pub mod services;

pub use crate::context::{ContextHealth, ExecutionContext};
pub use crate::error::{ApiError, ApiResult, IngestError, IngestResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// The running collector
    pub context: Arc<RwLock<ExecutionContext>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Cancelled to stop the HTTP server (and then the collector)
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            context: Arc::new(RwLock::new(context)),
            startup_time: Utc::now(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::scan_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
