use serde::{Deserialize, Serialize};

/// Connection to the external agent service that owns the LLM and CRM
/// tool-calling logic.  The gateway only builds handles and relays turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the agent service.
    #[serde(default = "d_service_url")]
    pub service_url: String,
    /// Timeout for one handle construction attempt.
    #[serde(default = "d_10000")]
    pub connect_timeout_ms: u64,
    /// Timeout for one chat turn.
    #[serde(default = "d_60000")]
    pub request_timeout_ms: u64,
    /// Retries after the first failed construction attempt.
    #[serde(default = "d_3")]
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    #[serde(default = "d_1000")]
    pub initial_backoff_ms: u64,
    /// Minimum accepted length of the LLM provider key.
    #[serde(default = "d_20")]
    pub min_secondary_secret_len: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            service_url: d_service_url(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 60_000,
            max_retries: 3,
            initial_backoff_ms: 1_000,
            min_secondary_secret_len: 20,
        }
    }
}

fn d_service_url() -> String {
    "http://127.0.0.1:8700".into()
}
fn d_10000() -> u64 {
    10_000
}
fn d_60000() -> u64 {
    60_000
}
fn d_3() -> u32 {
    3
}
fn d_1000() -> u64 {
    1_000
}
fn d_20() -> usize {
    20
}
