//! `agentdesk sweep`: offline expiry of stale sessions.

use ad_domain::config::Config;
use ad_sessions::Sweeper;

use crate::bootstrap::open_stores;

pub fn run(config: &Config, max_age_days: Option<u32>) -> anyhow::Result<()> {
    let max_age_days = max_age_days.unwrap_or(config.sessions.sweep_max_age_days);
    if max_age_days == 0 {
        anyhow::bail!("--max-age-days must be at least 1");
    }

    let (sessions, accounts) = open_stores(config)?;
    let sweeper = Sweeper::new(max_age_days, config.accounts.account_session_ttl_days);
    let summary = sweeper.run(&sessions, &accounts)?;

    println!(
        "Swept {} session(s), {} message(s) and {} account session(s) older than {} day(s)",
        summary.sessions.sessions,
        summary.sessions.messages,
        summary.account_sessions,
        max_age_days,
    );
    Ok(())
}
