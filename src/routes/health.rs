use axum::{extract::State, http::StatusCode, response::Json};
use diesel::prelude::*;
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

/// Liveness plus a database round trip.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match state.db() {
        Ok(mut conn) => diesel::sql_query("SELECT 1").execute(&mut conn).is_ok(),
        Err(_) => false,
    };
    if !database {
        warn!("health check could not reach the database");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": "unreachable" })),
        );
    }
    (StatusCode::OK, Json(json!({ "status": "ok", "database": "ok" })))
}
