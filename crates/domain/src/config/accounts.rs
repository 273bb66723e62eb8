use serde::{Deserialize, Serialize};

use super::SecretSource;

/// Platform accounts (login, admin) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Canonical admin username enforced at every startup.
    #[serde(default = "d_admin_username")]
    pub admin_username: String,
    #[serde(default = "d_admin_email")]
    pub admin_email: String,
    /// Admin password.  When unset an existing admin keeps its password and
    /// a freshly created admin gets a generated one written to the state
    /// directory.
    #[serde(default = "d_admin_password")]
    pub admin_password: SecretSource,
    /// Account sessions idle longer than this are swept.
    #[serde(default = "d_7")]
    pub account_session_ttl_days: u32,
    /// 32-byte key (hex or base64) encrypting stored CRM credentials.
    #[serde(default = "d_credentials_key")]
    pub credentials_key: SecretSource,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            admin_username: d_admin_username(),
            admin_email: d_admin_email(),
            admin_password: d_admin_password(),
            account_session_ttl_days: 7,
            credentials_key: d_credentials_key(),
        }
    }
}

fn d_admin_username() -> String {
    "admin".into()
}
fn d_admin_email() -> String {
    "admin@localhost".into()
}
fn d_admin_password() -> SecretSource {
    SecretSource::from_env("AD_ADMIN_PASSWORD")
}
fn d_7() -> u32 {
    7
}
fn d_credentials_key() -> SecretSource {
    SecretSource::from_env("AD_CREDENTIALS_KEY")
}
