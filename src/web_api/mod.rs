//! WebAPI - REST + WebSocket endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes (sessions, photos, capture)
//! - Kiosk/phone WebSocket channels
//! - Live preview streaming
//! - Captive portal responses

mod captive_routes;
mod preview_routes;
mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let camera_ok = state.camera.is_connected().await;
    let db_ok = sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .is_ok();

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        camera_connected: camera_ok,
        db_connected: db_ok,
    };

    Json(response)
}
