//! Restoration matcher: decides whether an `init` may reuse a prior session.
//!
//! Candidates are active sessions accessed within the freshness window.  A
//! platform account match on the same CRM endpoint is preferred; otherwise
//! the tenant key plus device fingerprint must match.  The best candidate is
//! then re-verified against the supplied credentials; a mismatch is treated
//! as "no match" so the caller falls through to creating a new session.

use chrono::{DateTime, Duration, Utc};

use ad_domain::trace::TraceEvent;

use crate::hasher::normalize_endpoint;
use crate::store::{SessionRecord, SessionStore};

/// Connection context used to look for a reusable session.
#[derive(Debug, Clone, Copy)]
pub struct RestorationQuery<'a> {
    pub device: &'a str,
    pub client_addr: &'a str,
    pub endpoint: &'a str,
    pub username: &'a str,
    pub owner_account_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    OwnerAccount,
    TenantDevice,
}

impl MatchedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OwnerAccount => "owner_account",
            Self::TenantDevice => "tenant_device",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorationMatch {
    pub session_id: String,
    pub matched_by: MatchedBy,
}

#[derive(Debug, Clone)]
pub struct RestorationMatcher {
    freshness: Duration,
}

impl RestorationMatcher {
    pub fn new(freshness_days: u32) -> Self {
        Self {
            freshness: Duration::days(i64::from(freshness_days)),
        }
    }

    pub fn find(&self, store: &SessionStore, query: &RestorationQuery<'_>) -> Option<RestorationMatch> {
        self.find_at(store, query, Utc::now())
    }

    /// Best candidate for `query` without checking credentials.
    pub fn find_at(
        &self,
        store: &SessionStore,
        query: &RestorationQuery<'_>,
        now: DateTime<Utc>,
    ) -> Option<RestorationMatch> {
        let mut candidates = store.active_since(now - self.freshness);
        // Most recently accessed first.
        candidates.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));

        if let Some(owner) = query.owner_account_id {
            let endpoint = normalize_endpoint(query.endpoint);
            if let Some(hit) = candidates.iter().find(|s| by_owner(s, owner, &endpoint)) {
                return Some(RestorationMatch {
                    session_id: hit.session_id.clone(),
                    matched_by: MatchedBy::OwnerAccount,
                });
            }
        }

        let hasher = store.hasher();
        let tenant_key = hasher.tenant_key(query.username, query.endpoint);
        let fingerprint = hasher.device_fingerprint(query.device, query.client_addr);
        candidates
            .iter()
            .find(|s| s.tenant_key == tenant_key && s.device_fingerprint == fingerprint)
            .map(|hit| RestorationMatch {
                session_id: hit.session_id.clone(),
                matched_by: MatchedBy::TenantDevice,
            })
    }

    pub fn restore(
        &self,
        store: &SessionStore,
        query: &RestorationQuery<'_>,
        secret: &str,
        secondary_secret: &str,
    ) -> Option<RestorationMatch> {
        self.restore_at(store, query, secret, secondary_secret, Utc::now())
    }

    /// Find the best candidate and re-verify the credentials against it.
    /// On success the session is touched.
    pub fn restore_at(
        &self,
        store: &SessionStore,
        query: &RestorationQuery<'_>,
        secret: &str,
        secondary_secret: &str,
        now: DateTime<Utc>,
    ) -> Option<RestorationMatch> {
        let hit = self.find_at(store, query, now)?;
        if !store.verify(&hit.session_id, secret, secondary_secret) {
            tracing::info!(
                session_id = %hit.session_id,
                matched_by = hit.matched_by.as_str(),
                "restoration candidate failed credential check; starting a new session"
            );
            return None;
        }

        store.touch_at(&hit.session_id, now);
        if let Some(record) = store.get(&hit.session_id) {
            TraceEvent::SessionRestored {
                session_id: hit.session_id.clone(),
                tenant_key: record.tenant_key,
                matched_by: hit.matched_by.as_str().to_owned(),
            }
            .emit();
        }
        Some(hit)
    }
}

fn by_owner(s: &SessionRecord, owner: &str, endpoint: &str) -> bool {
    s.owner_account_id.as_deref() == Some(owner) && normalize_endpoint(&s.external_endpoint) == endpoint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::CredentialHasher;
    use crate::store::NewSession;

    const KEY: &str = "key123456789012345678";

    fn new_session<'a>(device: &'a str, owner: Option<&'a str>) -> NewSession<'a> {
        NewSession {
            endpoint: "https://crm.example.com",
            username: "alice",
            secret: "pw1",
            secondary_secret: KEY,
            device,
            client_addr: "10.0.0.1",
            display_endpoint: None,
            owner_account_id: owner,
        }
    }

    fn query<'a>(device: &'a str, owner: Option<&'a str>) -> RestorationQuery<'a> {
        RestorationQuery {
            device,
            client_addr: "10.0.0.1",
            endpoint: "https://crm.example.com/",
            username: "Alice",
            owner_account_id: owner,
        }
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), CredentialHasher::sha256()).unwrap();
        let matcher = RestorationMatcher::new(30);
        let now = Utc::now();

        let stale = store
            .create_at(new_session("UA-A", None), now - Duration::days(30) - Duration::seconds(1))
            .unwrap();
        assert!(matcher.find_at(&store, &query("UA-A", None), now).is_none());
        store.deactivate(&stale).unwrap();

        let fresh = store
            .create_at(new_session("UA-A", None), now - Duration::days(30) + Duration::seconds(1))
            .unwrap();
        let hit = matcher.find_at(&store, &query("UA-A", None), now).unwrap();
        assert_eq!(hit.session_id, fresh);
        assert_eq!(hit.matched_by, MatchedBy::TenantDevice);
    }

    #[test]
    fn owner_account_beats_device_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), CredentialHasher::sha256()).unwrap();
        let matcher = RestorationMatcher::new(30);
        let now = Utc::now();

        let owned = store
            .create_at(new_session("UA-OTHER", Some("acct-1")), now - Duration::hours(2))
            .unwrap();
        let _device = store
            .create_at(new_session("UA-A", None), now - Duration::hours(1))
            .unwrap();

        let hit = matcher
            .find_at(&store, &query("UA-A", Some("acct-1")), now)
            .unwrap();
        assert_eq!(hit.session_id, owned);
        assert_eq!(hit.matched_by, MatchedBy::OwnerAccount);
    }

    #[test]
    fn most_recent_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), CredentialHasher::sha256()).unwrap();
        let matcher = RestorationMatcher::new(30);
        let now = Utc::now();

        let _older = store
            .create_at(new_session("UA-A", None), now - Duration::days(2))
            .unwrap();
        let newer = store
            .create_at(new_session("UA-A", None), now - Duration::days(1))
            .unwrap();
        let hit = matcher.find_at(&store, &query("UA-A", None), now).unwrap();
        assert_eq!(hit.session_id, newer);
    }

    #[test]
    fn credential_mismatch_is_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), CredentialHasher::sha256()).unwrap();
        let matcher = RestorationMatcher::new(30);
        store.create(new_session("UA-A", None)).unwrap();

        assert!(matcher
            .restore(&store, &query("UA-A", None), "pw-changed", KEY)
            .is_none());
        assert!(matcher.restore(&store, &query("UA-A", None), "pw1", KEY).is_some());
    }

    #[test]
    fn other_device_does_not_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), CredentialHasher::sha256()).unwrap();
        let matcher = RestorationMatcher::new(30);
        store.create(new_session("UA-A", None)).unwrap();
        assert!(matcher.find(&store, &query("UA-B", None)).is_none());
    }
}
