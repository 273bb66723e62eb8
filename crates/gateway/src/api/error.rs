//! Mapping from the shared [`Error`] to HTTP responses.
//!
//! Every handler returns `ApiResult<T>`; the status mapping lives here only.
//! Client errors are answered without logging them as failures.  Upstream
//! failures are logged with endpoint context and answered with a generic
//! message.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use ad_domain::error::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_client_error() {
            tracing::debug!(error = %self.0, "request rejected");
        }
        match self.0 {
            Error::Validation(msg) => api_error(StatusCode::BAD_REQUEST, msg),
            Error::Auth(msg) => api_error(StatusCode::UNAUTHORIZED, msg),
            Error::NotFound(msg) => api_error(StatusCode::NOT_FOUND, msg),
            Error::Conflict(msg) => api_error(StatusCode::CONFLICT, msg),
            Error::ReconnectRequired(session_id) => (
                StatusCode::GONE,
                Json(json!({
                    "error": "the session has no live connection; reconnect with your credentials",
                    "session_id": session_id,
                    "reconnect_required": true,
                })),
            )
                .into_response(),
            Error::RateLimited {
                class,
                retry_after_secs,
            } => {
                let mut resp = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "error": format!("too many {class} requests; retry in {retry_after_secs}s"),
                        "retry_after_secs": retry_after_secs,
                    })),
                )
                    .into_response();
                resp.headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                resp
            }
            Error::Upstream { endpoint, message } => {
                tracing::warn!(endpoint = %endpoint, error = %message, "upstream failure");
                api_error(
                    StatusCode::BAD_GATEWAY,
                    "could not connect to the CRM or agent service; check the connection details and try again",
                )
            }
            other => {
                tracing::error!(error = %other, "request failed");
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: Error) -> StatusCode {
        ApiError(e).into_response().status()
    }

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(status_of(Error::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(Error::Auth("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(Error::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_of(Error::ReconnectRequired("s".into())), StatusCode::GONE);
        assert_eq!(
            status_of(Error::Upstream {
                endpoint: "https://crm".into(),
                message: "refused".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(Error::Other("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let resp = ApiError(Error::RateLimited {
            class: "chat".into(),
            retry_after_secs: 42,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "42");
    }
}
