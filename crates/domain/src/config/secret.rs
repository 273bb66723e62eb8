use serde::{Deserialize, Serialize};

/// Where a secret value (pepper, encryption key, admin password) comes from.
///
/// Resolution order is `key` (plaintext, warns), then the OS keychain via
/// `service` + `account`, then `env`, then the `{SERVICE}_{ACCOUNT}`
/// headless fallback variable.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SecretSource {
    /// Env var containing the secret.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct value (for throwaway setups; prefer `env` or the keychain).
    #[serde(default)]
    pub key: Option<String>,
    /// Keychain service name (e.g. `"agentdesk"`).
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name (e.g. `"hash-pepper"`).
    #[serde(default)]
    pub account: Option<String>,
}

impl SecretSource {
    /// Secret read from the given environment variable.
    pub fn from_env(var: &str) -> Self {
        Self {
            env: Some(var.to_owned()),
            ..Default::default()
        }
    }

    /// `true` when no source at all is configured.
    pub fn is_unset(&self) -> bool {
        self.env.is_none()
            && self.key.is_none()
            && (self.service.is_none() || self.account.is_none())
    }
}
