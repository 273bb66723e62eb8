//! HTTP client for the external agent service.
//!
//! The agent service owns LLM prompting and CRM tool calls.  Building a
//! handle posts the CRM connection details once; the service answers with
//! an agent id that later turns are addressed to.  Plaintext secrets leave
//! this process only in that single request body.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ad_domain::config::AgentConfig;
use ad_domain::error::{Error, Result};

use super::agent::{AgentBuilder, AgentHandle, AgentSpec};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize)]
struct CreateAgentRequest<'a> {
    session_id: &'a str,
    endpoint: &'a str,
    username: &'a str,
    secret: &'a str,
    secondary_secret: &'a str,
    display_endpoint: &'a str,
}

#[derive(Deserialize)]
struct CreateAgentResponse {
    agent_id: String,
}

#[derive(Serialize)]
struct RespondRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct RespondResponse {
    response: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds [`RemoteAgent`]s against the configured agent service.
///
/// One `reqwest::Client` (and its connection pool) is shared by the builder
/// and every agent it creates.
#[derive(Debug, Clone)]
pub struct RemoteAgentBuilder {
    http: Client,
    base_url: String,
    connect_timeout: Duration,
}

impl RemoteAgentBuilder {
    pub fn new(cfg: &AgentConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.service_url.trim_end_matches('/').to_owned(),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl AgentBuilder for RemoteAgentBuilder {
    async fn build(&self, spec: &AgentSpec) -> Result<Arc<dyn AgentHandle>> {
        let body = CreateAgentRequest {
            session_id: &spec.session_id,
            endpoint: &spec.endpoint,
            username: &spec.username,
            secret: &spec.secret,
            secondary_secret: &spec.secondary_secret,
            display_endpoint: &spec.display_endpoint,
        };
        let rb = self
            .http
            .post(self.url("/v1/agents"))
            .timeout(self.connect_timeout)
            .json(&body);
        let resp = send("POST /v1/agents", rb).await?;
        let created: CreateAgentResponse = parse("POST /v1/agents", resp).await?;

        tracing::debug!(
            session_id = %spec.session_id,
            agent_id = %created.agent_id,
            "remote agent created"
        );

        Ok(Arc::new(RemoteAgent {
            http: self.http.clone(),
            respond_url: self.url(&format!("/v1/agents/{}/respond", created.agent_id)),
            agent_id: created.agent_id,
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A session-bound agent living in the agent service.
#[derive(Debug)]
pub struct RemoteAgent {
    http: Client,
    agent_id: String,
    respond_url: String,
}

impl RemoteAgent {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

#[async_trait]
impl AgentHandle for RemoteAgent {
    async fn respond(&self, text: &str) -> Result<String> {
        let rb = self.http.post(&self.respond_url).json(&RespondRequest { text });
        let resp = send("POST /v1/agents/:id/respond", rb).await?;
        let body: RespondResponse = parse("POST /v1/agents/:id/respond", resp).await?;
        Ok(body.response)
    }
}

// ── request helpers ──────────────────────────────────────────────────

/// Send with a fresh trace id and map non-success statuses.
///
/// 401/403 become `Auth` (never retried by the cache), other 4xx become
/// `Validation`, 5xx and transport failures become `Http`.
async fn send(endpoint: &str, rb: RequestBuilder) -> Result<Response> {
    let trace_id = Uuid::new_v4().to_string();
    let resp = rb
        .header("X-Client-Type", "agentdesk")
        .header("X-Trace-Id", &trace_id)
        .send()
        .await
        .map_err(|e| from_reqwest(endpoint, e))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(status_error(endpoint, status, &body))
}

async fn parse<T: for<'de> Deserialize<'de>>(endpoint: &str, resp: Response) -> Result<T> {
    let body = resp.text().await.map_err(|e| from_reqwest(endpoint, e))?;
    serde_json::from_str(&body)
        .map_err(|e| Error::Http(format!("{endpoint}: unexpected response body: {e}")))
}

fn status_error(endpoint: &str, status: StatusCode, body: &str) -> Error {
    let code = status.as_u16();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::Auth(format!("{endpoint} rejected credentials ({code}): {body}"))
    } else if status.is_client_error() {
        Error::Validation(format!("{endpoint} returned {code}: {body}"))
    } else {
        Error::Http(format!("{endpoint} returned {code}: {body}"))
    }
}

fn from_reqwest(endpoint: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{endpoint}: {e}"))
    } else {
        Error::Http(format!("{endpoint}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error("x", StatusCode::UNAUTHORIZED, ""),
            Error::Auth(_)
        ));
        assert!(matches!(
            status_error("x", StatusCode::FORBIDDEN, ""),
            Error::Auth(_)
        ));
        assert!(matches!(
            status_error("x", StatusCode::UNPROCESSABLE_ENTITY, ""),
            Error::Validation(_)
        ));
        assert!(matches!(
            status_error("x", StatusCode::BAD_GATEWAY, ""),
            Error::Http(_)
        ));
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let cfg = AgentConfig {
            service_url: "http://agents.local:8700/".into(),
            ..AgentConfig::default()
        };
        let builder = RemoteAgentBuilder::new(&cfg).unwrap();
        assert_eq!(builder.url("/v1/agents"), "http://agents.local:8700/v1/agents");
    }
}
