//! Platform account endpoints: login, logout, password, stored CRM
//! credentials.
//!
//! Login returns an opaque session token; later requests carry it as
//! `Authorization: Bearer <token>`.

use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use ad_domain::error::Error;
use ad_sessions::{AccountRole, AccountSummary, CrmCredentials};

use super::error::ApiResult;
use super::guard::{AccountAuth, ClientContext};
use crate::runtime::admission::OperationClass;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

/// Shared by `/v1/auth/login` and `/v1/admin/login`.  Logins count
/// against the connect admission window of the caller.
pub(super) fn login_with_role(
    state: &AppState,
    client: &ClientContext,
    body: &LoginBody,
    required: Option<AccountRole>,
) -> ApiResult<Json<Value>> {
    state.admission.check(OperationClass::Connect, &client.addr)?;

    let account = state.accounts.authenticate(&body.username, &body.password)?;
    if let Some(role) = required {
        if account.role != role {
            // Same answer as a wrong password.
            return Err(Error::Auth("invalid username or password".into()).into());
        }
    }
    let session = state.accounts.create_account_session(&account.account_id)?;
    Ok(Json(login_response(&session.session_id, &account)))
}

fn login_response(token: &str, account: &AccountSummary) -> Value {
    json!({
        "token": token,
        "account": account,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/auth/login
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn login(
    State(state): State<AppState>,
    client: ClientContext,
    Json(body): Json<LoginBody>,
) -> ApiResult<Json<Value>> {
    login_with_role(&state, &client, &body, None)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/auth/session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn current_session(auth: AccountAuth) -> Json<Value> {
    Json(json!({
        "account": auth.account,
        "session": {
            "created_at": auth.session.created_at,
            "last_activity": auth.session.last_activity,
        },
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/auth/logout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn logout(State(state): State<AppState>, auth: AccountAuth) -> ApiResult<Json<Value>> {
    let ended = state
        .accounts
        .invalidate_account_session(&auth.session.session_id)?;
    Ok(Json(json!({ "logged_out": ended })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/auth/password
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct PasswordBody {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AccountAuth,
    Json(body): Json<PasswordBody>,
) -> ApiResult<Json<Value>> {
    state
        .accounts
        .change_password(auth.account_id(), &body.current_password, &body.new_password)?;
    Ok(Json(json!({ "changed": true })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT/GET /v1/auth/crm-credentials
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn put_crm_credentials(
    State(state): State<AppState>,
    auth: AccountAuth,
    Json(creds): Json<CrmCredentials>,
) -> ApiResult<Json<Value>> {
    if creds.endpoint.trim().is_empty() || creds.username.trim().is_empty() {
        return Err(Error::Validation("endpoint and username are required".into()).into());
    }
    state
        .accounts
        .store_crm_credentials(auth.account_id(), &creds)?;
    Ok(Json(json!({ "stored": true })))
}

/// Reports what is stored without returning either secret.
pub async fn get_crm_credentials(
    State(state): State<AppState>,
    auth: AccountAuth,
) -> ApiResult<Json<Value>> {
    let body = match state.accounts.crm_credentials(auth.account_id())? {
        Some(creds) => json!({
            "stored": true,
            "endpoint": creds.endpoint,
            "username": creds.username,
            "display_endpoint": creds.display_endpoint,
        }),
        None => json!({ "stored": false }),
    };
    Ok(Json(body))
}
