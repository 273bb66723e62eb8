use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::SecretSource;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `sessions/`, `accounts/` and the message logs.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// How often dirty store state (e.g. access timestamps) is flushed.
    #[serde(default = "d_30")]
    pub flush_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            flush_interval_secs: 30,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session restoration and expiry rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Maximum age of `last_accessed_at` for a session to be restorable.
    #[serde(default = "d_30u32")]
    pub freshness_days: u32,
    /// Sessions idle longer than this are deleted by the sweeper.
    #[serde(default = "d_30u32")]
    pub sweep_max_age_days: u32,
    /// Interval of the background sweep.  `0` disables the loop; the
    /// startup sweep still runs.
    #[serde(default = "d_3600")]
    pub sweep_interval_secs: u64,
    /// Wipe every session and message at startup.  The live agent cache is
    /// always empty after a restart, so keeping sessions only produces
    /// "reconnect required" answers.
    #[serde(default = "d_true")]
    pub clear_on_start: bool,
    #[serde(default = "d_20")]
    pub history_default_limit: usize,
    #[serde(default = "d_200")]
    pub history_max_limit: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            freshness_days: 30,
            sweep_max_age_days: 30,
            sweep_interval_secs: 3600,
            clear_on_start: true,
            history_default_limit: 20,
            history_max_limit: 200,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential hashing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashStrategy {
    /// Plain SHA-256.  Kept for compatibility with unsalted digests.
    Sha256,
    /// HMAC-SHA256 keyed by the configured pepper.
    #[default]
    HmacSha256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    #[serde(default)]
    pub strategy: HashStrategy,
    /// Pepper for `hmac_sha256`.  Required when that strategy is selected.
    #[serde(default = "d_pepper")]
    pub pepper: SecretSource,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            strategy: HashStrategy::HmacSha256,
            pepper: d_pepper(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}
fn d_30() -> u64 {
    30
}
fn d_30u32() -> u32 {
    30
}
fn d_3600() -> u64 {
    3600
}
fn d_true() -> bool {
    true
}
fn d_20() -> usize {
    20
}
fn d_200() -> usize {
    200
}
fn d_pepper() -> SecretSource {
    SecretSource::from_env("AD_HASH_PEPPER")
}
