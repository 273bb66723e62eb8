use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ad_domain::config::{Config, SecretSource};
use ad_domain::error::{Error, Result};
use ad_gateway::api;
use ad_gateway::bootstrap::build_app_state_with;
use ad_gateway::runtime::agent::{AgentBuilder, AgentHandle, AgentSpec};
use ad_gateway::state::AppState;

const KEY: &str = "key123456789012345678";
const ADMIN_PASSWORD: &str = "admin-password-1";

struct Echo;

#[async_trait]
impl AgentHandle for Echo {
    async fn respond(&self, text: &str) -> Result<String> {
        Ok(format!("echo: {text}"))
    }
}

/// Builds echo agents, except for endpoints on `down.example.com`.
struct FakeBuilder;

#[async_trait]
impl AgentBuilder for FakeBuilder {
    async fn build(&self, spec: &AgentSpec) -> Result<Arc<dyn AgentHandle>> {
        if spec.endpoint.contains("down.example.com") {
            return Err(Error::Http("connection refused".into()));
        }
        Ok(Arc::new(Echo))
    }
}

fn secret(value: &str) -> SecretSource {
    SecretSource {
        key: Some(value.into()),
        ..Default::default()
    }
}

struct TestApp {
    _dir: tempfile::TempDir,
    state: AppState,
    app: Router,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.state_path = dir.path().to_path_buf();
    config.server.trust_forwarded_for = true;
    config.hashing.pepper = secret("integration-pepper");
    config.accounts.admin_password = secret(ADMIN_PASSWORD);
    config.accounts.credentials_key = secret(&"ab".repeat(32));
    config.agent.max_retries = 0;
    config.agent.initial_backoff_ms = 1;

    let state = build_app_state_with(Arc::new(config), Arc::new(FakeBuilder)).unwrap();
    let app = api::router().with_state(state.clone());
    TestApp {
        _dir: dir,
        state,
        app,
    }
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        client: &str,
        token: Option<&str>,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", client)
            .header(header::USER_AGENT, "UA-A");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, value)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let (status, _, value) = self
            .call(Method::POST, uri, Some(body), "10.0.0.1", None)
            .await;
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let (status, _, value) = self.call(Method::GET, uri, None, "10.0.0.1", None).await;
        (status, value)
    }

    async fn login(&self, uri: &str, username: &str, password: &str) -> String {
        let (status, body) = self
            .post(uri, json!({ "username": username, "password": password }))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_owned()
    }
}

fn alice_init() -> Value {
    json!({
        "endpoint": "https://crm.example.com",
        "username": "alice",
        "secret": "pw1",
        "secondary_secret": KEY,
    })
}

#[tokio::test]
async fn init_chat_history_clear_reconnect() {
    let t = test_app();

    let (status, first) = t.post("/v1/sessions/init", alice_init()).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["restored"], false);
    let s1 = first["session_id"].as_str().unwrap().to_owned();

    let (_, second) = t.post("/v1/sessions/init", alice_init()).await;
    assert_eq!(second["session_id"], s1.as_str());
    assert_eq!(second["restored"], true);

    let (status, reply) = t
        .post("/v1/chat", json!({ "session_id": s1, "message": "hello" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response"], "echo: hello");

    let (status, history) = t.get(&format!("/v1/sessions/{s1}/history?limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["history"][0]["user_message"], "hello");
    assert_eq!(history["history"][0]["ai_response"], "echo: hello");

    let (_, cleared) = t
        .post("/v1/sessions/clear", json!({ "session_id": s1 }))
        .await;
    assert_eq!(cleared["cleared"], true);

    let (status, body) = t
        .post("/v1/chat", json!({ "session_id": s1, "message": "again" }))
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["reconnect_required"], true);

    let (status, body) = t.get(&format!("/v1/sessions/{s1}/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
    assert_eq!(body["live_handle"], false);
}

#[tokio::test]
async fn unknown_session_and_bad_input() {
    let t = test_app();

    let (status, _) = t
        .post("/v1/chat", json!({ "session_id": "nope", "message": "hello" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = t
        .post("/v1/sessions/init", json!({ "endpoint": "https://crm.example.com" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("username"));
}

#[tokio::test]
async fn upstream_failure_is_502_and_keeps_session() {
    let t = test_app();
    let mut req = alice_init();
    req["endpoint"] = json!("https://down.example.com");

    let (status, body) = t.post("/v1/sessions/init", req).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("could not connect"));
    assert!(!body.to_string().contains("pw1"));
    assert_eq!(t.state.sessions.stats().unwrap().active_sessions, 1);
    assert!(t.state.agents.is_empty());
}

#[tokio::test]
async fn eleventh_chat_from_one_client_is_429() {
    let t = test_app();
    let (_, init) = t.post("/v1/sessions/init", alice_init()).await;
    let s1 = init["session_id"].as_str().unwrap().to_owned();

    for _ in 0..10 {
        let (status, _) = t
            .post("/v1/chat", json!({ "session_id": s1, "message": "hi" }))
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, body) = t
        .call(
            Method::POST,
            "/v1/chat",
            Some(json!({ "session_id": s1, "message": "hi" })),
            "10.0.0.1",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(headers.contains_key(header::RETRY_AFTER));
    assert!(body["retry_after_secs"].as_u64().unwrap() >= 1);

    // A different client address has its own window.
    let (status, _, _) = t
        .call(
            Method::POST,
            "/v1/chat",
            Some(json!({ "session_id": s1, "message": "hi" })),
            "10.0.0.2",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn accounts_stored_credentials_and_chats() {
    let t = test_app();

    // Admin creates a user.
    let admin = t.login("/v1/admin/login", "admin", ADMIN_PASSWORD).await;
    let (status, _, created) = t
        .call(
            Method::POST,
            "/v1/admin/accounts",
            Some(json!({ "username": "bob", "email": "bob@example.com" })),
            "10.0.0.1",
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{created}");
    let password = created["password"].as_str().unwrap().to_owned();

    // The user cannot use admin routes.
    let bob = t.login("/v1/auth/login", "bob", &password).await;
    let (status, _, _) = t
        .call(Method::GET, "/v1/admin/stats", None, "10.0.0.1", Some(&bob))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Store CRM credentials, then connect with them.
    let (status, _, _) = t
        .call(
            Method::PUT,
            "/v1/auth/crm-credentials",
            Some(alice_init()),
            "10.0.0.1",
            Some(&bob),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, stored) = t
        .call(Method::GET, "/v1/auth/crm-credentials", None, "10.0.0.1", Some(&bob))
        .await;
    assert_eq!(stored["stored"], true);
    assert!(stored.get("secret").is_none());

    let (status, _, init) = t
        .call(
            Method::POST,
            "/v1/sessions/init",
            Some(json!({ "use_stored_credentials": true })),
            "10.0.0.1",
            Some(&bob),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{init}");
    let s1 = init["session_id"].as_str().unwrap().to_owned();

    t.post("/v1/chat", json!({ "session_id": s1, "message": "hello" }))
        .await;

    // Save the chat as bob; an anonymous caller holding the session id
    // cannot save or see it.
    let (status, _, saved) = t
        .call(
            Method::POST,
            "/v1/chats",
            Some(json!({ "session_id": s1 })),
            "10.0.0.1",
            Some(&bob),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{saved}");
    let chat_id = saved["chat_id"].as_str().unwrap().to_owned();

    let (status, _) = t.post("/v1/chats", json!({ "session_id": s1 })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, anon) = t.get(&format!("/v1/chats?session_id={s1}")).await;
    assert_eq!(anon["count"], 0);

    let (_, _, mine) = t
        .call(Method::GET, "/v1/chats", None, "10.0.0.1", Some(&bob))
        .await;
    assert_eq!(mine["count"], 1);
    assert_eq!(mine["chats"][0]["title"], "hello");

    let (status, _, _) = t
        .call(
            Method::DELETE,
            &format!("/v1/chats/{chat_id}"),
            None,
            "10.0.0.1",
            Some(&bob),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Logout ends the token.
    t.call(Method::POST, "/v1/auth/logout", None, "10.0.0.1", Some(&bob))
        .await;
    let (status, _, _) = t
        .call(Method::GET, "/v1/auth/session", None, "10.0.0.1", Some(&bob))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_reports_counters() {
    let t = test_app();
    let (status, body) = t.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["live_agents"], 0);
}
