//! Live agent cache: `session_id -> agent handle`, in memory only.
//!
//! Construction is single-flight per session: concurrent callers for the
//! same missing session share one build through a per-session `OnceCell`.
//! A failed build leaves no entry behind.  The cache starts empty on every
//! process start and is never consulted across processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use ad_domain::config::AgentConfig;
use ad_domain::error::{Error, Result};
use ad_domain::trace::TraceEvent;

use super::agent::{AgentBuilder, AgentHandle, AgentSpec};

type Slot = Arc<OnceCell<Arc<dyn AgentHandle>>>;

/// Timeout and retry policy for one construction.
#[derive(Debug, Clone, Copy)]
pub struct BuildPolicy {
    pub attempt_timeout: Duration,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles after every retry.
    pub initial_backoff: Duration,
}

impl From<&AgentConfig> for BuildPolicy {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            max_retries: cfg.max_retries,
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
        }
    }
}

pub struct AgentCache {
    builder: Arc<dyn AgentBuilder>,
    policy: BuildPolicy,
    slots: Mutex<HashMap<String, Slot>>,
}

impl AgentCache {
    pub fn new(builder: Arc<dyn AgentBuilder>, policy: BuildPolicy) -> Self {
        Self {
            builder,
            policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The built handle for a session, if any.  A build still in flight
    /// counts as absent.
    pub fn get(&self, session_id: &str) -> Option<Arc<dyn AgentHandle>> {
        self.slots
            .lock()
            .get(session_id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Return the cached handle or build one from `spec`.
    pub async fn get_or_build(&self, spec: &AgentSpec) -> Result<Arc<dyn AgentHandle>> {
        let slot = {
            let mut slots = self.slots.lock();
            slots
                .entry(spec.session_id.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = slot
            .get_or_try_init(|| self.build_with_retry(spec))
            .await
            .cloned();

        if result.is_err() {
            // Only drop our own, still-empty slot; a concurrent caller may
            // have replaced it or filled it in the meantime.
            let mut slots = self.slots.lock();
            if let Some(current) = slots.get(&spec.session_id) {
                if Arc::ptr_eq(current, &slot) && current.get().is_none() {
                    slots.remove(&spec.session_id);
                }
            }
        }
        result
    }

    /// Evict a session's handle.  Durable session data is not touched.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.slots.lock().remove(session_id).is_some();
        if removed {
            TraceEvent::AgentEvicted {
                session_id: session_id.to_owned(),
            }
            .emit();
        }
        removed
    }

    /// Evict several sessions at once (after a sweep).
    pub fn remove_many<'a>(&self, session_ids: impl IntoIterator<Item = &'a String>) -> usize {
        session_ids
            .into_iter()
            .filter(|id| self.remove(id))
            .count()
    }

    /// Number of built handles.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn build_with_retry(&self, spec: &AgentSpec) -> Result<Arc<dyn AgentHandle>> {
        let start = Instant::now();
        let mut backoff = self.policy.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(self.policy.attempt_timeout, self.builder.build(spec))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Timeout(format!(
                        "agent construction exceeded {}ms",
                        self.policy.attempt_timeout.as_millis()
                    )))
                });

            let err = match outcome {
                Ok(handle) => {
                    TraceEvent::AgentBuilt {
                        session_id: spec.session_id.clone(),
                        endpoint: spec.endpoint.clone(),
                        attempts: attempt,
                        duration_ms: start.elapsed().as_millis() as u64,
                    }
                    .emit();
                    return Ok(handle);
                }
                Err(e) => e,
            };

            // Rejected credentials will not improve on retry.
            let permanent = matches!(err, Error::Auth(_) | Error::Validation(_));
            if permanent || attempt > self.policy.max_retries {
                tracing::warn!(
                    session_id = %spec.session_id,
                    endpoint = %spec.endpoint,
                    attempts = attempt,
                    error = %err,
                    "agent construction failed"
                );
                return Err(Error::Upstream {
                    endpoint: spec.endpoint.clone(),
                    message: err.to_string(),
                });
            }

            tracing::debug!(
                session_id = %spec.session_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "agent construction attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }
}
