//! Scan, plate lookup and shutdown endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use xtal_common::PlateDescriptor;

use crate::error::{ApiError, ApiResult};
use crate::services::TickReport;
use crate::AppState;

/// POST /scan
///
/// Runs one tick through the collector's loop and returns its report.
pub async fn scan(State(state): State<AppState>) -> ApiResult<Json<TickReport>> {
    let report = state.context.read().await.request_tick().await?;
    Ok(Json(report))
}

/// GET /plates/:barcode
///
/// Stored descriptor for the barcode, injected from the registry if new.
pub async fn get_plate(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> ApiResult<Json<PlateDescriptor>> {
    let barcode = barcode.trim();
    if barcode.is_empty() || !barcode.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::BadRequest(format!("Invalid barcode: {:?}", barcode)));
    }

    let plate = state.context.read().await.resolve_barcode(barcode).await?;
    Ok(Json(plate))
}

/// POST /shutdown
///
/// Signals the server to stop; the collector finishes its current tick first.
pub async fn shutdown(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    tracing::info!("Shutdown requested over HTTP");
    state.shutdown.cancel();
    (StatusCode::ACCEPTED, Json(json!({ "status": "shutting_down" })))
}

pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/scan", post(scan))
        .route("/plates/:barcode", get(get_plate))
        .route("/shutdown", post(shutdown))
}
