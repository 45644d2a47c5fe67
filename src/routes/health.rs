//! Health check endpoint.
//!
//! GET /health - service liveness plus a round trip to the database

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::{json, Value};
use tracing::error;

use super::AppState;

pub fn router() -> Router {
    Router::new().route("/health", get(health_check))
}

async fn health_check(Extension(state): Extension<AppState>) -> (StatusCode, Json<Value>) {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "ok",
        Err(e) => {
            error!("Health check failed to reach the database: {}", e);
            "unavailable"
        }
    };
    let status = if database == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status.is_success() { "ok" } else { "degraded" },
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "database": database,
        })),
    )
}
