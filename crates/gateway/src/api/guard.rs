//! Request extractors: caller context and account authentication.
//!
//! Handlers opt in by naming the extractor in their parameter list.
//! `AccountAuth` requires `Authorization: Bearer <account session token>`;
//! `MaybeAccount` accepts anonymous callers; `AdminAuth` additionally
//! requires the admin role.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use ad_domain::error::Error;
use ad_sessions::{AccountRole, AccountSession, AccountSummary};

use super::error::{api_error, ApiError};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a request came from: the address admission windows are keyed by,
/// and the device string that feeds the device fingerprint.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub addr: String,
    pub device: String,
}

#[async_trait]
impl FromRequestParts<AppState> for ClientContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());
        let forwarded = state
            .config
            .server
            .trust_forwarded_for
            .then(|| forwarded_for(&parts.headers))
            .flatten();

        let device = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        Ok(Self {
            addr: forwarded.or(peer).unwrap_or_else(|| "unknown".into()),
            device,
        })
    }
}

/// First hop of `X-Forwarded-For`.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Account authentication
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A logged-in platform account.
#[derive(Debug, Clone)]
pub struct AccountAuth {
    pub session: AccountSession,
    pub account: AccountSummary,
}

impl AccountAuth {
    fn resolve(parts: &Parts, state: &AppState) -> Option<Self> {
        let token = bearer(&parts.headers)?;
        let (session, account) = state.accounts.get_account_session(token)?;
        state.accounts.touch_account_session(token);
        Some(Self { session, account })
    }

    pub fn account_id(&self) -> &str {
        &self.account.account_id
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AccountAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Self::resolve(parts, state).ok_or_else(|| {
            ApiError(Error::Auth("login required".into())).into_response()
        })
    }
}

/// An account if the request carries a valid session token, otherwise
/// anonymous.  An invalid token is treated as anonymous.
#[derive(Debug, Clone)]
pub struct MaybeAccount(pub Option<AccountAuth>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAccount {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(AccountAuth::resolve(parts, state)))
    }
}

/// A logged-in account holding the admin role.
#[derive(Debug, Clone)]
pub struct AdminAuth(pub AccountAuth);

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = AccountAuth::from_request_parts(parts, state).await?;
        if auth.account.role != AccountRole::Admin {
            return Err(api_error(StatusCode::FORBIDDEN, "admin role required"));
        }
        Ok(Self(auth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(forwarded_for(&headers).as_deref(), Some("203.0.113.7"));
        assert_eq!(forwarded_for(&HeaderMap::new()), None);
    }

    #[test]
    fn bearer_requires_scheme_and_value() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer(&headers), Some("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer(&headers), None);
    }
}
