//! Secret resolution for peppers, encryption keys and passwords.

use ad_domain::config::SecretSource;
use ad_domain::error::{Error, Result};

/// Resolve a secret from its configured source.
///
/// Order: plaintext `key` (warns), OS keychain via `service` + `account`,
/// `env`, then the `{SERVICE}_{ACCOUNT}` headless fallback variable.
/// `what` names the secret in log lines and errors.
pub fn resolve_secret(source: &SecretSource, what: &str) -> Result<String> {
    if let Some(ref key) = source.key {
        tracing::warn!(
            secret = what,
            "secret loaded from plaintext config field 'key'; prefer 'env' or the keychain"
        );
        return Ok(key.clone());
    }

    if let (Some(ref service), Some(ref account)) = (&source.service, &source.account) {
        match resolve_from_keychain(service, account) {
            Ok(secret) => return Ok(secret),
            Err(e) => {
                tracing::warn!(
                    secret = what,
                    service = %service,
                    account = %account,
                    error = %e,
                    "keychain lookup failed, falling through to env"
                );
            }
        }
    }

    if let Some(ref env_var) = source.env {
        match std::env::var(env_var) {
            Ok(v) if !v.is_empty() => return Ok(v),
            _ => {
                if source.service.is_none() {
                    return Err(Error::Config(format!(
                        "{what}: environment variable '{env_var}' not set"
                    )));
                }
            }
        }
    }

    if let (Some(ref service), Some(ref account)) = (&source.service, &source.account) {
        let fallback_var = keychain_fallback_env_name(service, account);
        if let Ok(val) = std::env::var(&fallback_var) {
            tracing::info!(
                secret = what,
                env_var = %fallback_var,
                "secret resolved from keychain headless fallback env var"
            );
            return Ok(val);
        }
    }

    Err(Error::Config(format!(
        "{what}: no source configured or none resolved (set 'key', 'env', or keychain 'service'+'account')"
    )))
}

/// Like [`resolve_secret`], but an unresolvable source yields `None`.
pub fn resolve_optional(source: &SecretSource, what: &str) -> Option<String> {
    if source.is_unset() {
        return None;
    }
    match resolve_secret(source, what) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(secret = what, error = %e, "optional secret not available");
            None
        }
    }
}

/// Read a secret from the OS keychain.
pub fn resolve_from_keychain(service: &str, account: &str) -> Result<String> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| Error::Auth(format!("keyring entry creation failed: {e}")))?;
    entry
        .get_password()
        .map_err(|e| Error::Auth(format!("keyring get_password failed: {e}")))
}

/// `("agentdesk", "hash-pepper")` → `"AGENTDESK_HASH_PEPPER"`.
pub fn keychain_fallback_env_name(service: &str, account: &str) -> String {
    format!(
        "{}_{}",
        service.to_uppercase().replace('-', "_"),
        account.to_uppercase().replace('-', "_"),
    )
}
