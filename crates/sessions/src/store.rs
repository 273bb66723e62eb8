//! Durable CRM-tenant session store.
//!
//! Session records live in `sessions/sessions.json` under the configured
//! state path; their chat messages live in per-session JSONL logs under
//! `sessions/messages/`; saved chats in `sessions/chats.json`.  Structural
//! changes (create, deactivate, sweep, clear) are flushed immediately.
//! Access-time touches only mark the store dirty and are flushed by the
//! periodic flush loop.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use ad_domain::error::{Error, Result};
use ad_domain::trace::TraceEvent;

use crate::chats::{ChatArchive, SavedChat, SavedMessage};
use crate::hasher::CredentialHasher;
use crate::transcript::{ChatMessage, MessageLog, Role};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A durable CRM-tenant session.  Only digests of the credentials are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub tenant_key: String,
    pub device_fingerprint: String,
    pub credential_hash: String,
    pub secondary_secret_hash: String,
    pub external_endpoint: String,
    pub display_endpoint: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub owner_account_id: Option<String>,
    pub is_active: bool,
}

/// Inputs for [`SessionStore::create`].  Plaintext secrets are hashed and
/// dropped; they never reach disk.
#[derive(Debug, Clone, Copy)]
pub struct NewSession<'a> {
    pub endpoint: &'a str,
    pub username: &'a str,
    pub secret: &'a str,
    pub secondary_secret: &'a str,
    pub device: &'a str,
    pub client_addr: &'a str,
    /// Base URL for user-facing links.  Defaults to `endpoint`.
    pub display_endpoint: Option<&'a str>,
    pub owner_account_id: Option<&'a str>,
}

/// Outcome of a sweep or clear.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub sessions: usize,
    pub messages: usize,
    pub chats: usize,
    /// Ids of the deleted sessions, so callers can drop dependent state.
    #[serde(skip)]
    pub session_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub active_sessions: usize,
    pub inactive_sessions: usize,
    pub total_messages: usize,
    pub tenants: usize,
    pub saved_chats: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionStore {
    sessions_path: PathBuf,
    sessions: RwLock<HashMap<String, SessionRecord>>,
    messages: MessageLog,
    chats: ChatArchive,
    hasher: CredentialHasher,
    dirty: AtomicBool,
}

impl SessionStore {
    /// Load or create the store under `state_path/sessions/`.
    pub fn open(state_path: &Path, hasher: CredentialHasher) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir)?;

        let sessions_path = dir.join("sessions.json");
        let sessions: HashMap<String, SessionRecord> = load_json(&sessions_path)?;
        let messages = MessageLog::open(&dir.join("messages"))?;
        let chats = ChatArchive::open(&dir)?;

        tracing::info!(
            sessions = sessions.len(),
            saved_chats = chats.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            sessions: RwLock::new(sessions),
            messages,
            chats,
            hasher,
            dirty: AtomicBool::new(false),
        })
    }

    pub fn hasher(&self) -> &CredentialHasher {
        &self.hasher
    }

    pub fn chats(&self) -> &ChatArchive {
        &self.chats
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Create a new active session and return its id.
    pub fn create(&self, req: NewSession<'_>) -> Result<String> {
        self.create_at(req, Utc::now())
    }

    pub fn create_at(&self, req: NewSession<'_>, now: DateTime<Utc>) -> Result<String> {
        let tenant_key = self.hasher.tenant_key(req.username, req.endpoint);
        let endpoint = req.endpoint.trim().to_owned();
        let record = SessionRecord {
            session_id: String::new(),
            tenant_key: tenant_key.clone(),
            device_fingerprint: self.hasher.device_fingerprint(req.device, req.client_addr),
            credential_hash: self.hasher.hash(req.secret),
            secondary_secret_hash: self.hasher.hash(req.secondary_secret),
            display_endpoint: req
                .display_endpoint
                .map(|d| d.trim().to_owned())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| endpoint.clone()),
            external_endpoint: endpoint,
            created_at: now,
            last_accessed_at: now,
            owner_account_id: req.owner_account_id.map(str::to_owned),
            is_active: true,
        };

        let mut sessions = self.sessions.write();
        let session_id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(
            session_id.clone(),
            SessionRecord {
                session_id: session_id.clone(),
                ..record
            },
        );
        if let Err(e) = persist_json(&self.sessions_path, &*sessions) {
            sessions.remove(&session_id);
            return Err(e);
        }
        drop(sessions);

        TraceEvent::SessionCreated {
            session_id: session_id.clone(),
            tenant_key,
            owner_account_id: req.owner_account_id.map(str::to_owned),
        }
        .emit();

        Ok(session_id)
    }

    /// Look up an active session.
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions
            .read()
            .get(session_id)
            .filter(|s| s.is_active)
            .cloned()
    }

    /// Look up a session whether or not it is still active.
    pub fn find(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Bump `last_accessed_at`.  Best-effort: persisted by the next flush.
    pub fn touch(&self, session_id: &str) {
        self.touch_at(session_id, Utc::now());
    }

    pub fn touch_at(&self, session_id: &str, now: DateTime<Utc>) {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(session_id) {
            Some(s) if s.is_active => {
                if now > s.last_accessed_at {
                    s.last_accessed_at = now;
                    self.dirty.store(true, Ordering::Release);
                }
            }
            _ => tracing::debug!(session_id, "touch on missing or inactive session"),
        }
    }

    /// Recompute both credential digests and compare them with the stored
    /// ones.  `false` when the session is missing or inactive.
    pub fn verify(&self, session_id: &str, secret: &str, secondary_secret: &str) -> bool {
        let Some(record) = self.get(session_id) else {
            return false;
        };
        // Evaluate both so timing does not reveal which one differed.
        let primary = self.hasher.matches(secret, &record.credential_hash);
        let secondary = self
            .hasher
            .matches(secondary_secret, &record.secondary_secret_hash);
        primary & secondary
    }

    /// Mark a session inactive.  Its messages stay until the next sweep.
    pub fn deactivate(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(session_id) {
            Some(s) if s.is_active => s.is_active = false,
            _ => return Ok(false),
        }
        persist_json(&self.sessions_path, &*sessions)?;
        drop(sessions);

        TraceEvent::SessionDeactivated {
            session_id: session_id.to_owned(),
        }
        .emit();
        Ok(true)
    }

    /// Active sessions accessed at or after `cutoff`.
    pub fn active_since(&self, cutoff: DateTime<Utc>) -> Vec<SessionRecord> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_active && s.last_accessed_at >= cutoff)
            .cloned()
            .collect()
    }

    // ── Messages ─────────────────────────────────────────────────────

    /// Append a message to an active session's log and return its id.
    pub fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        self.append_message_at(session_id, role, content, metadata, Utc::now())
    }

    pub fn append_message_at(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        // Held across the append so a concurrent sweep cannot orphan the line.
        let sessions = self.sessions.read();
        if !sessions.get(session_id).is_some_and(|s| s.is_active) {
            return Err(Error::NotFound(format!("session {session_id}")));
        }
        let message = ChatMessage::new(session_id, role, content, metadata, now);
        self.messages.append(&message)?;
        Ok(message.message_id)
    }

    /// The last `limit` messages of a session, oldest first.  Works for
    /// inactive sessions until they are swept.
    pub fn history(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        if !self.sessions.read().contains_key(session_id) {
            return Err(Error::NotFound(format!("session {session_id}")));
        }
        let mut messages = self.messages.read(session_id)?;
        let skip = messages.len().saturating_sub(limit);
        messages.drain(..skip);
        Ok(messages)
    }

    /// Newest-first messages across every session of a tenant.
    pub fn tenant_history(&self, tenant_key: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let ids: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.tenant_key == tenant_key)
            .map(|s| s.session_id.clone())
            .collect();

        let mut all = Vec::new();
        for id in ids {
            all.extend(self.messages.read(&id)?);
        }
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit);
        Ok(all)
    }

    // ── Saved chats ──────────────────────────────────────────────────

    /// Save a chat for an active session.  Without explicit `messages` the
    /// session's current log is snapshotted.
    pub fn save_chat(
        &self,
        session_id: &str,
        title: Option<&str>,
        messages: Option<Vec<SavedMessage>>,
    ) -> Result<SavedChat> {
        let record = self
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

        let messages = match messages {
            Some(m) => m,
            None => self
                .messages
                .read(session_id)?
                .into_iter()
                .map(|m| SavedMessage {
                    role: m.role,
                    content: m.content,
                    timestamp: Some(m.timestamp),
                })
                .collect(),
        };
        if messages.is_empty() {
            return Err(Error::Validation("cannot save an empty chat".into()));
        }

        let preview = messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| truncate_chars(&m.content, 120))
            .unwrap_or_default();
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => truncate_chars(t, 200),
            None if !preview.is_empty() => truncate_chars(&preview, 60),
            None => "Untitled chat".to_owned(),
        };

        let chat = SavedChat {
            chat_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            tenant_key: record.tenant_key,
            owner_account_id: record.owner_account_id,
            title,
            preview,
            messages,
            created_at: Utc::now(),
        };
        self.chats.insert(chat.clone())?;
        Ok(chat)
    }

    // ── Expiry ───────────────────────────────────────────────────────

    /// Delete sessions idle for more than `max_age_days` or inactive, and
    /// their messages.  Saved chats are kept.
    pub fn sweep(&self, max_age_days: u32) -> Result<SweepReport> {
        self.sweep_at(Utc::now(), max_age_days)
    }

    pub fn sweep_at(&self, now: DateTime<Utc>, max_age_days: u32) -> Result<SweepReport> {
        let cutoff = now - Duration::days(i64::from(max_age_days));
        let mut sessions = self.sessions.write();
        let doomed: Vec<String> = sessions
            .values()
            .filter(|s| !s.is_active || s.last_accessed_at < cutoff)
            .map(|s| s.session_id.clone())
            .collect();

        // Records go first: a log that fails to delete below is an orphan
        // picked up by the next sweep, never a live session without history.
        if !doomed.is_empty() {
            for id in &doomed {
                sessions.remove(id);
            }
            persist_json(&self.sessions_path, &*sessions)?;
        }

        let mut report = SweepReport::default();
        for id in self.messages.session_ids()? {
            if sessions.contains_key(&id) {
                continue;
            }
            match self.messages.remove(&id) {
                Ok(n) => report.messages += n,
                Err(e) => {
                    tracing::warn!(
                        session_id = %id,
                        error = %e,
                        "failed to delete message log, will retry next sweep"
                    );
                }
            }
        }
        drop(sessions);

        if doomed.is_empty() && report.messages == 0 {
            return Ok(report);
        }
        report.sessions = doomed.len();
        report.session_ids = doomed;

        TraceEvent::SessionsSwept {
            sessions: report.sessions,
            messages: report.messages,
            max_age_days,
        }
        .emit();
        Ok(report)
    }

    /// Delete every session, message and saved chat.
    pub fn clear_all(&self) -> Result<SweepReport> {
        let mut sessions = self.sessions.write();
        let mut report = SweepReport {
            sessions: sessions.len(),
            session_ids: sessions.keys().cloned().collect(),
            ..Default::default()
        };
        sessions.clear();
        persist_json(&self.sessions_path, &*sessions)?;
        report.messages = self.messages.clear()?;
        drop(sessions);
        report.chats = self.chats.clear()?;
        self.dirty.store(false, Ordering::Release);

        TraceEvent::SessionsCleared {
            sessions: report.sessions,
            messages: report.messages,
        }
        .emit();
        Ok(report)
    }

    // ── Stats & persistence ──────────────────────────────────────────

    pub fn stats(&self) -> Result<StoreStats> {
        let (active, inactive, tenants, ids) = {
            let sessions = self.sessions.read();
            let active = sessions.values().filter(|s| s.is_active).count();
            let tenants: HashSet<&str> = sessions
                .values()
                .filter(|s| s.is_active)
                .map(|s| s.tenant_key.as_str())
                .collect();
            let ids: Vec<String> = sessions.keys().cloned().collect();
            (active, sessions.len() - active, tenants.len(), ids)
        };

        let mut total_messages = 0;
        for id in &ids {
            total_messages += self.messages.count(id)?;
        }

        Ok(StoreStats {
            active_sessions: active,
            inactive_sessions: inactive,
            total_messages,
            tenants,
            saved_chats: self.chats.len(),
        })
    }

    /// Persist the session records to disk.
    pub fn flush(&self) -> Result<()> {
        let sessions = self.sessions.read();
        self.dirty.store(false, Ordering::Release);
        persist_json(&self.sessions_path, &*sessions).inspect_err(|_| {
            self.dirty.store(true, Ordering::Release);
        })
    }

    /// Flush only when touches are pending.  Returns whether a write happened.
    pub fn flush_if_dirty(&self) -> Result<bool> {
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_owned(),
    }
}

// ── JSON file helpers ───────────────────────────────────────────────

/// Read a JSON document, or the type's default when the file is absent.
pub(crate) fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write a JSON document atomically (temp file in the same directory, then
/// rename).
pub(crate) fn persist_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> SessionStore {
        SessionStore::open(dir, CredentialHasher::hmac(b"test-pepper").unwrap()).unwrap()
    }

    fn alice<'a>() -> NewSession<'a> {
        NewSession {
            endpoint: "https://crm.example.com",
            username: "alice",
            secret: "pw1",
            secondary_secret: "key123456789012345678",
            device: "UA-A",
            client_addr: "10.0.0.1",
            display_endpoint: None,
            owner_account_id: None,
        }
    }

    #[test]
    fn create_stores_digests_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create(alice()).unwrap();

        let rec = store.get(&id).unwrap();
        assert!(rec.is_active);
        assert_eq!(rec.display_endpoint, "https://crm.example.com");
        assert_ne!(rec.credential_hash, "pw1");

        let raw = std::fs::read_to_string(dir.path().join("sessions/sessions.json")).unwrap();
        assert!(!raw.contains("pw1"));
        assert!(!raw.contains("key123456789012345678"));
    }

    #[test]
    fn verify_requires_both_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create(alice()).unwrap();

        assert!(store.verify(&id, "pw1", "key123456789012345678"));
        assert!(!store.verify(&id, "pw2", "key123456789012345678"));
        assert!(!store.verify(&id, "pw1", "other-key-000000000000"));
        assert!(!store.verify("missing", "pw1", "key123456789012345678"));
    }

    #[test]
    fn deactivated_session_hides_but_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create(alice()).unwrap();
        store.append_message(&id, Role::User, "hello", None).unwrap();

        assert!(store.deactivate(&id).unwrap());
        assert!(!store.deactivate(&id).unwrap());
        assert!(store.get(&id).is_none());
        assert!(!store.verify(&id, "pw1", "key123456789012345678"));
        assert_eq!(store.history(&id, 20).unwrap().len(), 1);

        let err = store.append_message(&id, Role::User, "again", None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn history_is_bounded_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create(alice()).unwrap();
        let t0 = Utc::now();
        for i in 0..5 {
            store
                .append_message_at(&id, Role::User, &format!("m{i}"), None, t0 + Duration::seconds(i))
                .unwrap();
        }
        let hist = store.history(&id, 3).unwrap();
        let contents: Vec<_> = hist.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3", "m4"]);
        assert!(matches!(store.history("nope", 3), Err(Error::NotFound(_))));
    }

    #[test]
    fn touch_only_moves_forward() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let now = Utc::now();
        let id = store.create_at(alice(), now).unwrap();

        store.touch_at(&id, now - Duration::hours(1));
        assert_eq!(store.get(&id).unwrap().last_accessed_at, now);
        assert!(!store.flush_if_dirty().unwrap());

        store.touch_at(&id, now + Duration::hours(1));
        assert_eq!(store.get(&id).unwrap().last_accessed_at, now + Duration::hours(1));
        assert!(store.flush_if_dirty().unwrap());
        assert!(!store.flush_if_dirty().unwrap());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = store(dir.path());
            let id = store.create(alice()).unwrap();
            store.touch(&id);
            store.flush().unwrap();
            id
        };
        let reopened = store(dir.path());
        assert!(reopened.verify(&id, "pw1", "key123456789012345678"));
    }

    #[test]
    fn tenant_history_spans_sessions_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let t0 = Utc::now();
        let s1 = store.create(alice()).unwrap();
        let s2 = store
            .create(NewSession {
                device: "UA-B",
                ..alice()
            })
            .unwrap();
        store.append_message_at(&s1, Role::User, "first", None, t0).unwrap();
        store
            .append_message_at(&s2, Role::User, "second", None, t0 + Duration::seconds(1))
            .unwrap();

        let tenant = store.get(&s1).unwrap().tenant_key;
        let hist = store.tenant_history(&tenant, 10).unwrap();
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].content, "second");
    }

    #[test]
    fn save_chat_snapshots_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create(alice()).unwrap();
        assert!(matches!(
            store.save_chat(&id, None, None),
            Err(Error::Validation(_))
        ));

        store.append_message(&id, Role::User, "list my leads", None).unwrap();
        store.append_message(&id, Role::Assistant, "here they are", None).unwrap();
        let chat = store.save_chat(&id, None, None).unwrap();
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.title, "list my leads");
        assert_eq!(store.stats().unwrap().saved_chats, 1);
    }

    #[test]
    fn clear_all_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create(alice()).unwrap();
        store.append_message(&id, Role::User, "hi", None).unwrap();
        store.save_chat(&id, Some("keep"), None).unwrap();

        let report = store.clear_all().unwrap();
        assert_eq!(report.sessions, 1);
        assert_eq!(report.messages, 1);
        assert_eq!(report.chats, 1);
        assert!(store.find(&id).is_none());

        let stats = store.stats().unwrap();
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.saved_chats, 0);
    }

    #[test]
    fn sweep_persists_removals_when_a_log_cannot_be_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let t0 = Utc::now() - Duration::days(40);
        let stuck = store.create_at(alice(), t0).unwrap();
        let clean = store.create_at(alice(), t0).unwrap();
        store
            .append_message_at(&clean, Role::User, "bye", None, t0)
            .unwrap();

        // A directory where the log file should be cannot be removed as a file.
        let stuck_log = dir.path().join(format!("sessions/messages/{stuck}.jsonl"));
        std::fs::create_dir_all(&stuck_log).unwrap();

        let report = store.sweep(30).unwrap();
        assert_eq!(report.sessions, 2);
        assert_eq!(report.messages, 1);
        assert!(store.find(&stuck).is_none());
        assert!(store.find(&clean).is_none());

        let reopened = self::store(dir.path());
        assert!(reopened.find(&stuck).is_none());
        assert!(reopened.find(&clean).is_none());

        // The leftover log is an orphan and goes on the next sweep.
        std::fs::remove_dir(&stuck_log).unwrap();
        std::fs::write(&stuck_log, "").unwrap();
        reopened.sweep(30).unwrap();
        assert!(!stuck_log.exists());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé…");
        assert_eq!(truncate_chars("hi", 5), "hi");
    }
}
