//! CRM session lifecycle endpoints.
//!
//! - `POST /v1/sessions/init`         : restore or create, build the live agent
//! - `GET  /v1/sessions/:id/history`  : paired user/assistant turns
//! - `POST /v1/sessions/clear`        : drop the live agent, keep history
//! - `GET  /v1/sessions/:id/status`   : activity and live-handle flags

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use ad_domain::error::Error;

use super::error::ApiResult;
use super::guard::{ClientContext, MaybeAccount};
use crate::runtime::session_service::InitRequest;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/init
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Missing fields deserialize as empty so the service can name them all in
/// one validation error.
#[derive(Deserialize)]
pub struct InitBody {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub secondary_secret: String,
    #[serde(default)]
    pub display_endpoint: Option<String>,
    #[serde(default = "d_true")]
    pub restore: bool,
    /// Connect with the CRM credentials stored on the logged-in account.
    #[serde(default)]
    pub use_stored_credentials: bool,
}

fn d_true() -> bool {
    true
}

pub async fn init_session(
    State(state): State<AppState>,
    client: ClientContext,
    MaybeAccount(account): MaybeAccount,
    Json(body): Json<InitBody>,
) -> ApiResult<Json<Value>> {
    let owner_account_id = account.as_ref().map(|a| a.account_id().to_owned());

    let req = if body.use_stored_credentials {
        let account = account
            .as_ref()
            .ok_or_else(|| Error::Auth("login required to use stored credentials".into()))?;
        let creds = state
            .accounts
            .crm_credentials(account.account_id())?
            .ok_or_else(|| Error::NotFound("no stored CRM credentials".into()))?;
        InitRequest {
            endpoint: creds.endpoint,
            username: creds.username,
            secret: creds.secret,
            secondary_secret: creds.secondary_secret,
            display_endpoint: creds.display_endpoint,
            restore: body.restore,
            device: client.device,
            client_addr: client.addr,
            owner_account_id,
        }
    } else {
        InitRequest {
            endpoint: body.endpoint,
            username: body.username,
            secret: body.secret,
            secondary_secret: body.secondary_secret,
            display_endpoint: body.display_endpoint,
            restore: body.restore,
            device: client.device,
            client_addr: client.addr,
            owner_account_id,
        }
    };

    let outcome = state.service.init(req).await?;
    Ok(Json(json!({
        "session_id": outcome.session_id,
        "restored": outcome.restored,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let history = state.service.history(&session_id, query.limit)?;
    Ok(Json(json!({
        "session_id": session_id,
        "count": history.len(),
        "history": history,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/clear
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct ClearBody {
    pub session_id: String,
}

pub async fn clear_session(
    State(state): State<AppState>,
    Json(body): Json<ClearBody>,
) -> Json<Value> {
    let cleared = state.service.clear(&body.session_id);
    Json(json!({
        "session_id": body.session_id,
        "cleared": cleared,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = state.service.status(&session_id)?;
    Ok(Json(json!(status)))
}
