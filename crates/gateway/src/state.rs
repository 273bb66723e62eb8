use std::sync::Arc;

use chrono::{DateTime, Utc};

use ad_domain::config::Config;
use ad_sessions::{AccountStore, SessionStore, Sweeper};

use crate::runtime::admission::AdmissionController;
use crate::runtime::agent_cache::AgentCache;
use crate::runtime::session_service::SessionService;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core**: config and startup time
/// - **Durable state**: CRM sessions and platform accounts
/// - **Runtime**: session service, live agents, admission windows
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub started_at: DateTime<Utc>,

    // ── Durable state ─────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub accounts: Arc<AccountStore>,
    pub sweeper: Sweeper,

    // ── Runtime ───────────────────────────────────────────────────────
    pub service: Arc<SessionService>,
    /// Live agent handles; in-memory only, empty after every restart.
    pub agents: Arc<AgentCache>,
    pub admission: Arc<AdmissionController>,
}
