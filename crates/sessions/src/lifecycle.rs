//! Lifecycle sweeper: expiry of stale CRM sessions and account sessions.
//!
//! Runs once when the stores are opened and then on the background
//! interval.  Idempotent, and safe alongside live traffic because it only
//! targets sessions that are already inactive or past their window.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ad_domain::error::Result;

use crate::accounts::AccountStore;
use crate::store::{SessionStore, SweepReport};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub sessions: SweepReport,
    pub account_sessions: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Sweeper {
    max_age_days: u32,
    account_session_ttl_days: u32,
}

impl Sweeper {
    pub fn new(max_age_days: u32, account_session_ttl_days: u32) -> Self {
        Self {
            max_age_days,
            account_session_ttl_days,
        }
    }

    pub fn max_age_days(&self) -> u32 {
        self.max_age_days
    }

    pub fn run(&self, sessions: &SessionStore, accounts: &AccountStore) -> Result<SweepSummary> {
        self.run_at(sessions, accounts, Utc::now())
    }

    pub fn run_at(
        &self,
        sessions: &SessionStore,
        accounts: &AccountStore,
        now: DateTime<Utc>,
    ) -> Result<SweepSummary> {
        let report = sessions.sweep_at(now, self.max_age_days)?;
        let account_sessions =
            accounts.sweep_account_sessions_at(now, self.account_session_ttl_days)?;

        if report.sessions > 0 || account_sessions > 0 {
            tracing::info!(
                sessions = report.sessions,
                messages = report.messages,
                account_sessions,
                "sweep completed"
            );
        } else {
            tracing::debug!("sweep found nothing to expire");
        }

        Ok(SweepSummary {
            sessions: report,
            account_sessions,
        })
    }
}
