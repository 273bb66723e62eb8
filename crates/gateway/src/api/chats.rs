//! Saved chats.
//!
//! A logged-in account sees only its own chats.  Anonymous callers name a
//! session they hold and see the unowned chats of that session's tenant.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use ad_domain::error::{Error, Result};
use ad_sessions::{ChatOwner, SavedMessage};

use super::error::ApiResult;
use super::guard::{AccountAuth, MaybeAccount};
use crate::state::AppState;

enum OwnerKey {
    Account(String),
    Tenant(String),
}

impl OwnerKey {
    fn as_owner(&self) -> ChatOwner<'_> {
        match self {
            Self::Account(id) => ChatOwner::Account(id),
            Self::Tenant(key) => ChatOwner::Tenant(key),
        }
    }
}

fn resolve_owner(
    state: &AppState,
    account: Option<&AccountAuth>,
    session_id: Option<&str>,
) -> Result<OwnerKey> {
    if let Some(account) = account {
        return Ok(OwnerKey::Account(account.account_id().to_owned()));
    }
    let session_id =
        session_id.ok_or_else(|| Error::Validation("session_id or login required".into()))?;
    let record = state
        .sessions
        .get(session_id)
        .ok_or_else(|| Error::NotFound(format!("invalid or expired session {session_id}")))?;
    Ok(OwnerKey::Tenant(record.tenant_key))
}

#[derive(Deserialize)]
pub struct ChatsQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "d_limit")]
    pub limit: usize,
}

fn d_limit() -> usize {
    20
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/chats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_chats(
    State(state): State<AppState>,
    MaybeAccount(account): MaybeAccount,
    Query(query): Query<ChatsQuery>,
) -> ApiResult<Json<Value>> {
    let owner = resolve_owner(&state, account.as_ref(), query.session_id.as_deref())?;
    let limit = query.limit.clamp(1, state.config.sessions.history_max_limit.max(1));
    let chats = state.sessions.chats().recent(owner.as_owner(), limit);

    // The list view carries no message bodies.
    let items: Vec<Value> = chats
        .iter()
        .map(|c| {
            json!({
                "chat_id": c.chat_id,
                "title": c.title,
                "preview": c.preview,
                "message_count": c.messages.len(),
                "created_at": c.created_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "count": items.len(),
        "chats": items,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct SaveChatBody {
    pub session_id: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Explicit transcript; when absent the session's log is saved.
    #[serde(default)]
    pub messages: Option<Vec<SavedMessage>>,
}

pub async fn save_chat(
    State(state): State<AppState>,
    MaybeAccount(account): MaybeAccount,
    Json(body): Json<SaveChatBody>,
) -> ApiResult<Json<Value>> {
    let record = state
        .sessions
        .get(&body.session_id)
        .ok_or_else(|| Error::NotFound(format!("invalid or expired session {}", body.session_id)))?;

    // An owned session can only be saved by its owner.
    if let Some(owner) = record.owner_account_id.as_deref() {
        if account.as_ref().map(AccountAuth::account_id) != Some(owner) {
            return Err(Error::NotFound(format!("session {}", body.session_id)).into());
        }
    }

    let chat = state
        .sessions
        .save_chat(&body.session_id, body.title.as_deref(), body.messages)?;
    Ok(Json(json!({
        "chat_id": chat.chat_id,
        "title": chat.title,
        "preview": chat.preview,
        "created_at": chat.created_at,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/chats/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_chat(
    State(state): State<AppState>,
    MaybeAccount(account): MaybeAccount,
    Path(chat_id): Path<String>,
    Query(query): Query<ChatsQuery>,
) -> ApiResult<Json<Value>> {
    let owner = resolve_owner(&state, account.as_ref(), query.session_id.as_deref())?;
    let chat = state
        .sessions
        .chats()
        .get(&chat_id, Some(owner.as_owner()))
        .ok_or_else(|| Error::NotFound(format!("chat {chat_id}")))?;
    Ok(Json(json!(chat)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/chats/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_chat(
    State(state): State<AppState>,
    MaybeAccount(account): MaybeAccount,
    Path(chat_id): Path<String>,
    Query(query): Query<ChatsQuery>,
) -> ApiResult<Json<Value>> {
    let owner = resolve_owner(&state, account.as_ref(), query.session_id.as_deref())?;
    if !state.sessions.chats().delete(&chat_id, Some(owner.as_owner()))? {
        return Err(Error::NotFound(format!("chat {chat_id}")).into());
    }
    Ok(Json(json!({ "deleted": true, "chat_id": chat_id })))
}
