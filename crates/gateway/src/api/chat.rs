//! `POST /v1/chat`: relay one turn to the session's live agent.

use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiResult;
use super::guard::ClientContext;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ChatBody {
    pub session_id: String,
    pub message: String,
}

/// Errors follow the shared mapping: an unknown session is 404, a session
/// without a live agent is 410 with `reconnect_required`, a rejected turn
/// is 429 with `Retry-After`.
pub async fn chat(
    State(state): State<AppState>,
    client: ClientContext,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<Value>> {
    let response = state
        .service
        .send(&body.session_id, &body.message, &client.addr)
        .await?;
    Ok(Json(json!({
        "session_id": body.session_id,
        "response": response,
    })))
}
