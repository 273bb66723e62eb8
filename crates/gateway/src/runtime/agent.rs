//! Boundary to the agent subsystem (LLM prompting and CRM tool calls).
//!
//! The gateway never looks inside an agent: it hands a builder the CRM
//! connection details once and afterwards only relays chat turns.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use ad_domain::error::Result;

/// Everything needed to construct a live agent for one session.  Carries
/// plaintext secrets, so it is never persisted or logged.
#[derive(Clone)]
pub struct AgentSpec {
    pub session_id: String,
    pub endpoint: String,
    pub username: String,
    pub secret: String,
    pub secondary_secret: String,
    pub display_endpoint: String,
}

impl fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSpec")
            .field("session_id", &self.session_id)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("display_endpoint", &self.display_endpoint)
            .finish_non_exhaustive()
    }
}

/// A constructed, session-bound agent.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    async fn respond(&self, text: &str) -> Result<String>;
}

/// Builds agents.  One attempt per call; retry policy lives in the cache.
#[async_trait]
pub trait AgentBuilder: Send + Sync {
    async fn build(&self, spec: &AgentSpec) -> Result<Arc<dyn AgentHandle>>;
}
