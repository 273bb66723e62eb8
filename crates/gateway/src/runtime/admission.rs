//! Per-client sliding-window admission control.
//!
//! [`AdmissionController`] keeps, per (operation class, client address), the
//! instants of recently admitted requests.  A request is admitted when fewer
//! than `limit` admissions fall inside the trailing window.  State is
//! in-memory only and resets on restart.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use ad_domain::config::{AdmissionConfig, WindowLimit};
use ad_domain::error::{Error, Result};
use ad_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Chat turns: frequent and cheap.
    Chat,
    /// Session init: rare and expensive (may build a live agent).
    Connect,
}

impl OperationClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Connect => "connect",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStatus {
    pub class: OperationClass,
    pub tracked_clients: usize,
    pub limit: u32,
    pub window_secs: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AdmissionController
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AdmissionController {
    config: AdmissionConfig,
    windows: Mutex<HashMap<(OperationClass, String), VecDeque<Instant>>>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn limit_for(&self, class: OperationClass) -> WindowLimit {
        match class {
            OperationClass::Chat => self.config.chat,
            OperationClass::Connect => self.config.connect,
        }
    }

    /// Admit or reject one request from `client`.
    pub fn check(&self, class: OperationClass, client: &str) -> Result<()> {
        self.check_at(class, client, Instant::now())
    }

    pub fn check_at(&self, class: OperationClass, client: &str, now: Instant) -> Result<()> {
        let limit = self.limit_for(class);
        let window = Duration::from_secs(limit.window_secs);

        let mut windows = self.windows.lock();
        let stamps = windows.entry((class, client.to_owned())).or_default();
        while stamps
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            stamps.pop_front();
        }

        if stamps.len() < limit.limit as usize {
            stamps.push_back(now);
            return Ok(());
        }

        // The oldest admission leaves the window first.
        let retry_after = stamps
            .front()
            .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(window);
        let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        let retry_after_secs = retry_after_secs.max(1);
        drop(windows);

        TraceEvent::AdmissionRejected {
            class: class.as_str().to_owned(),
            client: client.to_owned(),
            retry_after_secs,
        }
        .emit();

        Err(Error::RateLimited {
            class: class.as_str().to_owned(),
            retry_after_secs,
        })
    }

    /// Drop windows whose admissions have all expired.  Returns how many
    /// were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    pub fn prune_at(&self, now: Instant) -> usize {
        let chat = Duration::from_secs(self.config.chat.window_secs);
        let connect = Duration::from_secs(self.config.connect.window_secs);
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|(class, _), stamps| {
            let window = match class {
                OperationClass::Chat => chat,
                OperationClass::Connect => connect,
            };
            stamps
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < window)
        });
        before - windows.len()
    }

    pub fn snapshot(&self) -> Vec<AdmissionStatus> {
        let windows = self.windows.lock();
        [OperationClass::Chat, OperationClass::Connect]
            .into_iter()
            .map(|class| {
                let limit = self.limit_for(class);
                AdmissionStatus {
                    class,
                    tracked_clients: windows.keys().filter(|(c, _)| *c == class).count(),
                    limit: limit.limit,
                    window_secs: limit.window_secs,
                }
            })
            .collect()
    }
}
