//! Session lifecycle orchestration: `init`, `send`, `history`, `clear`,
//! `status`.
//!
//! Ties the durable [`SessionStore`] and [`RestorationMatcher`] to the
//! in-memory [`AgentCache`], gated by the [`AdmissionController`].  Durable
//! state never implies a live handle: a `send` for a session whose handle is
//! gone fails with `ReconnectRequired` instead of rebuilding silently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use ad_domain::config::Config;
use ad_domain::error::{Error, Result};
use ad_sessions::{
    AccountStore, NewSession, RestorationMatcher, RestorationQuery, Role, SessionStore,
    SweepReport, SweepSummary, Sweeper,
};

use super::admission::{AdmissionController, OperationClass};
use super::agent::AgentSpec;
use super::agent_cache::AgentCache;
use super::turn_lock::TurnLocks;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection request for `init`.  Carries plaintext secrets; they are
/// hashed into the store and handed once to the agent builder.
#[derive(Clone)]
pub struct InitRequest {
    pub endpoint: String,
    pub username: String,
    pub secret: String,
    pub secondary_secret: String,
    pub display_endpoint: Option<String>,
    pub restore: bool,
    pub device: String,
    pub client_addr: String,
    pub owner_account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitOutcome {
    pub session_id: String,
    pub restored: bool,
}

/// One user turn and the reply that followed it.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub ai_response: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub active: bool,
    pub tenant_key: String,
    pub live_handle: bool,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceLimits {
    pub max_message_chars: usize,
    pub min_secondary_secret_len: usize,
    pub history_default_limit: usize,
    pub history_max_limit: usize,
}

impl From<&Config> for ServiceLimits {
    fn from(cfg: &Config) -> Self {
        Self {
            max_message_chars: cfg.server.max_message_chars,
            min_secondary_secret_len: cfg.agent.min_secondary_secret_len,
            history_default_limit: cfg.sessions.history_default_limit,
            history_max_limit: cfg.sessions.history_max_limit,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionService
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionService {
    store: Arc<SessionStore>,
    matcher: RestorationMatcher,
    agents: Arc<AgentCache>,
    admission: Arc<AdmissionController>,
    turns: TurnLocks,
    limits: ServiceLimits,
}

impl SessionService {
    pub fn new(
        store: Arc<SessionStore>,
        matcher: RestorationMatcher,
        agents: Arc<AgentCache>,
        admission: Arc<AdmissionController>,
        limits: ServiceLimits,
    ) -> Self {
        Self {
            store,
            matcher,
            agents,
            admission,
            turns: TurnLocks::new(),
            limits,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn agents(&self) -> &Arc<AgentCache> {
        &self.agents
    }

    pub fn limits(&self) -> ServiceLimits {
        self.limits
    }

    // ── init ─────────────────────────────────────────────────────────

    /// Restore a matching session or create a new one, then make sure it
    /// has a live agent.
    ///
    /// A failed agent build surfaces as `Upstream`; the session record is
    /// left as it is.
    pub async fn init(&self, req: InitRequest) -> Result<InitOutcome> {
        self.validate_init(&req)?;
        self.admission
            .check(OperationClass::Connect, &req.client_addr)?;

        let restored = if req.restore {
            let query = RestorationQuery {
                device: &req.device,
                client_addr: &req.client_addr,
                endpoint: &req.endpoint,
                username: &req.username,
                owner_account_id: req.owner_account_id.as_deref(),
            };
            self.matcher
                .restore(&self.store, &query, &req.secret, &req.secondary_secret)
        } else {
            None
        };

        let (session_id, was_restored) = match restored {
            Some(hit) => (hit.session_id, true),
            None => {
                let id = self.store.create(NewSession {
                    endpoint: &req.endpoint,
                    username: &req.username,
                    secret: &req.secret,
                    secondary_secret: &req.secondary_secret,
                    device: &req.device,
                    client_addr: &req.client_addr,
                    display_endpoint: req.display_endpoint.as_deref(),
                    owner_account_id: req.owner_account_id.as_deref(),
                })?;
                (id, false)
            }
        };

        let display_endpoint = req
            .display_endpoint
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| req.endpoint.clone());
        let spec = AgentSpec {
            session_id: session_id.clone(),
            endpoint: req.endpoint,
            username: req.username,
            secret: req.secret,
            secondary_secret: req.secondary_secret,
            display_endpoint,
        };
        self.agents.get_or_build(&spec).await?;

        tracing::info!(session_id = %session_id, restored = was_restored, "session ready");
        Ok(InitOutcome {
            session_id,
            restored: was_restored,
        })
    }

    fn validate_init(&self, req: &InitRequest) -> Result<()> {
        let required = [
            ("endpoint", &req.endpoint),
            ("username", &req.username),
            ("secret", &req.secret),
            ("secondary_secret", &req.secondary_secret),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let endpoint = req.endpoint.trim();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(Error::Validation(
                "endpoint must be an http(s) URL".into(),
            ));
        }
        if req.secondary_secret.trim().chars().count() < self.limits.min_secondary_secret_len {
            return Err(Error::Validation(format!(
                "secondary_secret must be at least {} characters",
                self.limits.min_secondary_secret_len
            )));
        }
        Ok(())
    }

    // ── send ─────────────────────────────────────────────────────────

    /// Relay one chat turn to the session's live agent and record both
    /// sides.  Turns on the same session are serialized.
    pub async fn send(&self, session_id: &str, text: &str, client_addr: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::Validation("message must not be empty".into()));
        }
        let chars = text.chars().count();
        if chars > self.limits.max_message_chars {
            return Err(Error::Validation(format!(
                "message is {chars} characters; the limit is {}",
                self.limits.max_message_chars
            )));
        }

        self.admission.check(OperationClass::Chat, client_addr)?;

        let record = self
            .store
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("invalid or expired session {session_id}")))?;
        let agent = self
            .agents
            .get(session_id)
            .ok_or_else(|| Error::ReconnectRequired(session_id.to_owned()))?;

        let _turn = self.turns.acquire(session_id).await;
        self.store.touch(session_id);

        let asked_at = Utc::now();
        let reply = agent.respond(text).await.map_err(|e| {
            tracing::warn!(
                session_id = %session_id,
                endpoint = %record.external_endpoint,
                error = %e,
                "agent turn failed"
            );
            Error::Upstream {
                endpoint: record.external_endpoint.clone(),
                message: e.to_string(),
            }
        })?;

        self.store
            .append_message_at(session_id, Role::User, text, None, asked_at)?;
        self.store
            .append_message(session_id, Role::Assistant, &reply, None)?;
        Ok(reply)
    }

    // ── history / clear / status ─────────────────────────────────────

    /// The last `limit` turns, oldest first.  `None` uses the configured
    /// default; larger requests are clamped.
    pub fn history(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        let limit = limit
            .unwrap_or(self.limits.history_default_limit)
            .clamp(1, self.limits.history_max_limit.max(1));
        // Each turn is at most two messages.
        let messages = self.store.history(session_id, limit.saturating_mul(2))?;

        let mut entries: Vec<HistoryEntry> = Vec::new();
        for message in messages {
            match message.role {
                Role::User => entries.push(HistoryEntry {
                    timestamp: message.timestamp,
                    user_message: message.content,
                    ai_response: None,
                }),
                Role::Assistant => {
                    if let Some(last) = entries.last_mut().filter(|e| e.ai_response.is_none()) {
                        last.ai_response = Some(message.content);
                    }
                }
            }
        }
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
        Ok(entries)
    }

    /// Drop the session's live agent.  Durable history stays.
    pub fn clear(&self, session_id: &str) -> bool {
        self.agents.remove(session_id)
    }

    pub fn status(&self, session_id: &str) -> Result<SessionStatus> {
        let record = self
            .store
            .find(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        if record.is_active {
            self.store.touch(session_id);
        }
        let record = self.store.find(session_id).unwrap_or(record);
        Ok(SessionStatus {
            live_handle: self.agents.get(session_id).is_some(),
            session_id: record.session_id,
            active: record.is_active,
            tenant_key: record.tenant_key,
            last_accessed_at: record.last_accessed_at,
        })
    }

    // ── maintenance ──────────────────────────────────────────────────

    /// Sweep stale sessions and drop the live agents of swept sessions.
    pub fn sweep(&self, sweeper: &Sweeper, accounts: &AccountStore) -> Result<SweepSummary> {
        let summary = sweeper.run(&self.store, accounts)?;
        self.evict(&summary.sessions);
        Ok(summary)
    }

    /// Wipe every session, message and saved chat, and every live agent.
    pub fn clear_all(&self) -> Result<SweepReport> {
        let report = self.store.clear_all()?;
        self.evict(&report);
        Ok(report)
    }

    /// Prune idle turn locks.
    pub fn prune_turn_locks(&self) -> usize {
        self.turns.prune()
    }

    fn evict(&self, report: &SweepReport) {
        let evicted = self.agents.remove_many(&report.session_ids);
        if evicted > 0 {
            tracing::debug!(evicted, "evicted live agents of removed sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::agent::{AgentBuilder, AgentHandle};
    use crate::runtime::agent_cache::BuildPolicy;
    use ad_domain::config::{AdmissionConfig, WindowLimit};
    use ad_sessions::CredentialHasher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl AgentHandle for Echo {
        async fn respond(&self, text: &str) -> Result<String> {
            Ok(format!("echo: {text}"))
        }
    }

    #[derive(Default)]
    struct CountingBuilder {
        builds: AtomicU32,
    }

    #[async_trait]
    impl AgentBuilder for CountingBuilder {
        async fn build(&self, _spec: &AgentSpec) -> Result<Arc<dyn AgentHandle>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Echo))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        builder: Arc<CountingBuilder>,
        service: SessionService,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let hasher = CredentialHasher::hmac(b"test-pepper").unwrap();
        let store = Arc::new(SessionStore::open(dir.path(), hasher).unwrap());
        let builder = Arc::new(CountingBuilder::default());
        let agents = Arc::new(AgentCache::new(
            builder.clone(),
            BuildPolicy {
                attempt_timeout: Duration::from_secs(5),
                max_retries: 0,
                initial_backoff: Duration::from_millis(10),
            },
        ));
        let admission = Arc::new(AdmissionController::new(AdmissionConfig {
            chat: WindowLimit {
                limit: 10,
                window_secs: 60,
            },
            connect: WindowLimit {
                limit: 5,
                window_secs: 300,
            },
        }));
        let service = SessionService::new(
            store,
            RestorationMatcher::new(30),
            agents,
            admission,
            ServiceLimits {
                max_message_chars: 2000,
                min_secondary_secret_len: 20,
                history_default_limit: 20,
                history_max_limit: 200,
            },
        );
        Fixture {
            _dir: dir,
            builder,
            service,
        }
    }

    fn alice(secret: &str) -> InitRequest {
        InitRequest {
            endpoint: "https://crm.example.com".into(),
            username: "alice".into(),
            secret: secret.into(),
            secondary_secret: "key123456789012345678".into(),
            display_endpoint: None,
            restore: true,
            device: "UA-A".into(),
            client_addr: "10.0.0.1".into(),
            owner_account_id: None,
        }
    }

    #[tokio::test]
    async fn second_init_restores_and_reuses_agent() {
        let f = fixture();
        let first = f.service.init(alice("pw1")).await.unwrap();
        assert!(!first.restored);

        let second = f.service.init(alice("pw1")).await.unwrap();
        assert!(second.restored);
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(f.builder.builds.load(Ordering::SeqCst), 1);

        let reply = f
            .service
            .send(&first.session_id, "hello", "10.0.0.1")
            .await
            .unwrap();
        assert_eq!(reply, "echo: hello");
    }

    #[tokio::test]
    async fn changed_secret_starts_new_session() {
        let f = fixture();
        let first = f.service.init(alice("pw1")).await.unwrap();
        f.service
            .send(&first.session_id, "hello", "10.0.0.1")
            .await
            .unwrap();

        let second = f.service.init(alice("pw2")).await.unwrap();
        assert!(!second.restored);
        assert_ne!(second.session_id, first.session_id);

        let old = f.service.history(&first.session_id, None).unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].user_message, "hello");
        assert_eq!(old[0].ai_response.as_deref(), Some("echo: hello"));
    }

    #[tokio::test]
    async fn init_rejects_bad_input_before_storing() {
        let f = fixture();
        let mut req = alice("pw1");
        req.secondary_secret = "short".into();
        assert!(matches!(
            f.service.init(req).await,
            Err(Error::Validation(_))
        ));

        let mut req = alice("");
        req.username = " ".into();
        let err = f.service.init(req).await.err().unwrap();
        assert!(err.to_string().contains("username"));
        assert!(err.to_string().contains("secret"));

        let mut req = alice("pw1");
        req.endpoint = "crm.example.com".into();
        assert!(matches!(
            f.service.init(req).await,
            Err(Error::Validation(_))
        ));

        assert_eq!(f.service.store().stats().unwrap().active_sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_send_is_rate_limited_until_window_passes() {
        let f = fixture();
        let s1 = f.service.init(alice("pw1")).await.unwrap().session_id;

        for _ in 0..10 {
            f.service.send(&s1, "hello", "10.0.0.1").await.unwrap();
        }
        let err = f.service.send(&s1, "hello", "10.0.0.1").await.err().unwrap();
        assert!(matches!(err, Error::RateLimited { .. }));

        // Another client is unaffected.
        f.service.send(&s1, "hello", "10.0.0.2").await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        f.service.send(&s1, "hello", "10.0.0.1").await.unwrap();
    }

    #[tokio::test]
    async fn missing_handle_requires_reconnect() {
        let f = fixture();
        let s1 = f.service.init(alice("pw1")).await.unwrap().session_id;
        assert!(f.service.clear(&s1));

        let err = f.service.send(&s1, "hello", "10.0.0.1").await.err().unwrap();
        assert!(matches!(err, Error::ReconnectRequired(_)));

        // History survives the eviction, and init brings the agent back.
        assert!(f.service.history(&s1, None).is_ok());
        let again = f.service.init(alice("pw1")).await.unwrap();
        assert_eq!(again.session_id, s1);
        assert!(f.service.send(&s1, "hello", "10.0.0.1").await.is_ok());
    }

    #[tokio::test]
    async fn clear_all_makes_sessions_unknown() {
        let f = fixture();
        let s1 = f.service.init(alice("pw1")).await.unwrap().session_id;
        f.service.clear_all().unwrap();

        let err = f.service.send(&s1, "hello", "10.0.0.1").await.err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(f.service.agents().is_empty());
    }

    #[tokio::test]
    async fn overlong_message_is_rejected_not_truncated() {
        let f = fixture();
        let s1 = f.service.init(alice("pw1")).await.unwrap().session_id;
        let text = "x".repeat(2001);
        let err = f.service.send(&s1, &text, "10.0.0.1").await.err().unwrap();
        assert!(matches!(err, Error::Validation(_)));
        assert!(f.service.history(&s1, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_is_stored_as_sent_and_length_counts_whitespace() {
        let f = fixture();
        let s1 = f.service.init(alice("pw1")).await.unwrap().session_id;

        let blank = f.service.send(&s1, "  \n\t ", "10.0.0.1").await.err().unwrap();
        assert!(matches!(blank, Error::Validation(_)));

        let padded = format!("{}  ", "x".repeat(1999));
        let err = f.service.send(&s1, &padded, "10.0.0.1").await.err().unwrap();
        assert!(matches!(err, Error::Validation(_)));

        let reply = f.service.send(&s1, "  hi there ", "10.0.0.1").await.unwrap();
        assert_eq!(reply, "echo:   hi there ");
        let history = f.service.history(&s1, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_message, "  hi there ");
    }

    #[tokio::test]
    async fn history_limit_keeps_latest_turns() {
        let f = fixture();
        let s1 = f.service.init(alice("pw1")).await.unwrap().session_id;
        for i in 0..3 {
            f.service
                .send(&s1, &format!("m{i}"), &format!("10.0.1.{i}"))
                .await
                .unwrap();
        }
        let last_two = f.service.history(&s1, Some(2)).unwrap();
        let asked: Vec<&str> = last_two.iter().map(|e| e.user_message.as_str()).collect();
        assert_eq!(asked, ["m1", "m2"]);
    }

    #[tokio::test]
    async fn status_reports_live_handle() {
        let f = fixture();
        let s1 = f.service.init(alice("pw1")).await.unwrap().session_id;
        let status = f.service.status(&s1).unwrap();
        assert!(status.active);
        assert!(status.live_handle);

        f.service.clear(&s1);
        assert!(!f.service.status(&s1).unwrap().live_handle);
        assert!(matches!(
            f.service.status("nope"),
            Err(Error::NotFound(_))
        ));
    }
}
