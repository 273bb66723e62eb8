//! One-way hashing of CRM credentials and derivation of tenant and device
//! identifiers.
//!
//! Digests are lowercase hex.  With [`HashStrategy::HmacSha256`] every digest
//! is keyed by a server-side pepper, so a leaked store cannot be brute-forced
//! without the pepper as well.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use ad_domain::config::HashStrategy;
use ad_domain::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
enum Keying {
    Plain,
    Keyed(HmacSha256),
}

/// Deterministic credential hasher shared by the session store and the
/// restoration matcher.
#[derive(Clone)]
pub struct CredentialHasher {
    keying: Keying,
}

impl fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHasher")
            .field("strategy", &self.strategy())
            .finish()
    }
}

impl CredentialHasher {
    /// Build a hasher for the configured strategy.
    ///
    /// `HmacSha256` requires a non-empty pepper.
    pub fn new(strategy: HashStrategy, pepper: Option<&str>) -> Result<Self> {
        match strategy {
            HashStrategy::Sha256 => Ok(Self::sha256()),
            HashStrategy::HmacSha256 => {
                let pepper = pepper
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| Error::Config("hmac_sha256 hashing requires a pepper".into()))?;
                Self::hmac(pepper.as_bytes())
            }
        }
    }

    /// Unkeyed SHA-256.
    pub fn sha256() -> Self {
        Self {
            keying: Keying::Plain,
        }
    }

    /// HMAC-SHA256 keyed by `pepper`.
    pub fn hmac(pepper: &[u8]) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(pepper)
            .map_err(|e| Error::Crypto(format!("hmac key: {e}")))?;
        Ok(Self {
            keying: Keying::Keyed(mac),
        })
    }

    pub fn strategy(&self) -> HashStrategy {
        match self.keying {
            Keying::Plain => HashStrategy::Sha256,
            Keying::Keyed(_) => HashStrategy::HmacSha256,
        }
    }

    /// Hash a secret.
    pub fn hash(&self, secret: &str) -> String {
        match &self.keying {
            Keying::Plain => hex::encode(Sha256::digest(secret.as_bytes())),
            Keying::Keyed(mac) => {
                let mut mac = mac.clone();
                mac.update(secret.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
        }
    }

    /// Constant-time check of `secret` against a stored digest.
    pub fn matches(&self, secret: &str, digest: &str) -> bool {
        let computed = self.hash(secret);
        computed.as_bytes().ct_eq(digest.as_bytes()).into()
    }

    /// Groups every session of one CRM user on one CRM instance, whatever
    /// device they connect from.
    pub fn tenant_key(&self, username: &str, endpoint: &str) -> String {
        let material = format!(
            "{}@{}",
            username.trim().to_lowercase(),
            normalize_endpoint(endpoint)
        );
        self.hash(&material)
    }

    /// Advisory device identifier.  Collisions are acceptable; this is never
    /// an authentication factor.
    pub fn device_fingerprint(&self, device: &str, client_addr: &str) -> String {
        self.hash(&format!("{device}:{client_addr}"))
    }
}

/// Normalize a CRM base URL: trims whitespace and trailing slashes and
/// lowercases the scheme and host.  The path keeps its case.
pub fn normalize_endpoint(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let authority_start = trimmed.find("://").map(|i| i + 3).unwrap_or(0);
    let authority_end = trimmed[authority_start..]
        .find('/')
        .map(|i| authority_start + i)
        .unwrap_or(trimmed.len());
    let (head, path) = trimmed.split_at(authority_end);
    format!("{}{}", head.to_lowercase(), path)
}
