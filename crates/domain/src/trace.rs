use serde::Serialize;

/// Structured trace events emitted across all agentdesk crates.
///
/// Fields carry identifiers and counts only; secrets and message content
/// never appear here.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
        tenant_key: String,
        owner_account_id: Option<String>,
    },
    SessionRestored {
        session_id: String,
        tenant_key: String,
        matched_by: String,
    },
    SessionDeactivated {
        session_id: String,
    },
    SessionsSwept {
        sessions: usize,
        messages: usize,
        max_age_days: u32,
    },
    SessionsCleared {
        sessions: usize,
        messages: usize,
    },
    AgentBuilt {
        session_id: String,
        endpoint: String,
        attempts: u32,
        duration_ms: u64,
    },
    AgentEvicted {
        session_id: String,
    },
    AdmissionRejected {
        class: String,
        client: String,
        retry_after_secs: u64,
    },
    AccountLogin {
        account_id: String,
        role: String,
    },
    AdminReconciled {
        account_id: String,
        action: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ad_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let ev = TraceEvent::SessionDeactivated {
            session_id: "s1".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "SessionDeactivated");
        assert_eq!(json["session_id"], "s1");
    }
}
