//! WebAPI - HTTP Endpoints
//!
//! ## Responsibilities
//!
//! - Frame snapshots and MJPEG streams per channel
//! - Detection toggles, motion sensitivity and cross-line configuration
//! - Info records as JSON
//!
//! Handlers only read the StateStore and write PipelineControls; they never
//! touch the acquisition thread's state directly.

mod routes;

pub use routes::{create_router, mjpeg_part, STREAM_PERIOD};

use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
