/// Shared error type used across all agentdesk crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("crypto: {0}")]
    Crypto(String),

    /// Malformed or missing input; rejected before touching any store.
    #[error("{0}")]
    Validation(String),

    /// The referenced session or account does not exist or is inactive.
    #[error("not found: {0}")]
    NotFound(String),

    /// The durable session is valid but its live agent handle is gone.
    /// Callers must resupply credentials through `init`.
    #[error("session {0} has no live agent; reconnect required")]
    ReconnectRequired(String),

    /// Building the live agent failed after all retries.
    #[error("upstream {endpoint}: {message}")]
    Upstream { endpoint: String, message: String },

    #[error("rate limited ({class}); retry in {retry_after_secs}s")]
    RateLimited {
        class: String,
        retry_after_secs: u64,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// `true` for errors caused by the caller's input rather than the system.
    /// These are handled at the boundary and never logged as failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NotFound(_)
                | Self::Auth(_)
                | Self::Conflict(_)
                | Self::RateLimited { .. }
                | Self::ReconnectRequired(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
