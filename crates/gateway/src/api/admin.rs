//! Admin endpoints.  Everything except login requires an account with the
//! admin role.

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use ad_sessions::AccountRole;

use super::auth::{login_with_role, LoginBody};
use super::error::ApiResult;
use super::guard::{AdminAuth, ClientContext};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/admin/login
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn admin_login(
    State(state): State<AppState>,
    client: ClientContext,
    Json(body): Json<LoginBody>,
) -> ApiResult<Json<Value>> {
    login_with_role(&state, &client, &body, Some(AccountRole::Admin))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/admin/stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stats(State(state): State<AppState>, _admin: AdminAuth) -> ApiResult<Json<Value>> {
    let sessions = state.sessions.stats()?;
    Ok(Json(json!({
        "sessions": sessions,
        "accounts": state.accounts.account_stats(),
        "live_agents": state.agents.len(),
        "admission": state.admission.snapshot(),
        "started_at": state.started_at,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET/POST /v1/admin/accounts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_accounts(State(state): State<AppState>, _admin: AdminAuth) -> Json<Value> {
    let accounts = state.accounts.list_accounts();
    Json(json!({
        "count": accounts.len(),
        "accounts": accounts,
    }))
}

#[derive(Deserialize)]
pub struct CreateAccountBody {
    pub username: String,
    pub email: String,
    #[serde(default = "d_role")]
    pub role: AccountRole,
}

fn d_role() -> AccountRole {
    AccountRole::User
}

/// The generated password is returned exactly once, in this response.
pub async fn create_account(
    State(state): State<AppState>,
    AdminAuth(admin): AdminAuth,
    Json(body): Json<CreateAccountBody>,
) -> ApiResult<Json<Value>> {
    let (account, password) = state
        .accounts
        .create_account(&body.username, &body.email, body.role)?;
    tracing::info!(
        admin_id = %admin.account_id(),
        account_id = %account.account_id,
        "account created by admin"
    );
    Ok(Json(json!({
        "account": account,
        "password": password,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/admin/accounts/:id/activate | deactivate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn activate_account(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(account_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.accounts.set_active(&account_id, true)?;
    Ok(Json(json!({ "account_id": account_id, "is_active": true })))
}

pub async fn deactivate_account(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(account_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.accounts.set_active(&account_id, false)?;
    Ok(Json(json!({ "account_id": account_id, "is_active": false })))
}
