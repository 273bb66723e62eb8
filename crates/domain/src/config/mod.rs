mod accounts;
mod admission;
mod agent;
mod observability;
mod secret;
mod server;
mod sessions;

pub use accounts::*;
pub use admission::*;
pub use agent::*;
pub use observability::*;
pub use secret::*;
pub use server::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub hashing: HashingConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.  Secret sources are
    /// only checked for presence here; resolution happens at bootstrap.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut error = |field: &str, message: &str| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            });
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty");
        }
        if self.server.max_message_chars == 0 {
            error("server.max_message_chars", "must be greater than 0");
        }
        if self.sessions.freshness_days == 0 {
            error("sessions.freshness_days", "must be greater than 0");
        }
        if self.sessions.sweep_max_age_days == 0 {
            error("sessions.sweep_max_age_days", "must be greater than 0");
        }
        if self.sessions.history_default_limit > self.sessions.history_max_limit {
            error(
                "sessions.history_default_limit",
                "must not exceed sessions.history_max_limit",
            );
        }
        for (field, window) in [
            ("admission.chat", self.admission.chat),
            ("admission.connect", self.admission.connect),
        ] {
            if window.limit == 0 || window.window_secs == 0 {
                error(field, "limit and window_secs must be greater than 0");
            }
        }
        if self.agent.service_url.is_empty() {
            error("agent.service_url", "service_url must not be empty");
        }
        if self.accounts.admin_username.trim().is_empty() {
            error("accounts.admin_username", "admin username must not be empty");
        }
        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            error(
                "observability.sample_rate",
                "sample_rate must be between 0.0 and 1.0",
            );
        }
        if self.hashing.strategy == HashStrategy::HmacSha256 && self.hashing.pepper.is_unset() {
            error(
                "hashing.pepper",
                "hmac_sha256 requires a pepper source (env, key or keychain)",
            );
        }

        if self.hashing.strategy == HashStrategy::Sha256 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "hashing.strategy".into(),
                message: "sha256 stores unsalted credential digests".into(),
            });
        }
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        errors
    }
}
