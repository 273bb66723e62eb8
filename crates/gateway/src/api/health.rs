//! `GET /health`: liveness probe with store counters.  Public.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Response {
    match state.sessions.stats() {
        Ok(stats) => Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": stats,
            "live_agents": state.agents.len(),
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check could not read the session store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "error": "session store unavailable" })),
            )
                .into_response()
        }
    }
}
