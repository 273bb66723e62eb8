//! `agentdesk admin ...`: account administration without the server.

use anyhow::Context;

use ad_domain::config::Config;

use crate::bootstrap::open_stores;

/// Prompt twice for a new password and store it for `username`.
pub fn reset_password(config: &Config, username: Option<&str>) -> anyhow::Result<()> {
    let username = username.unwrap_or(&config.accounts.admin_username);
    let (_, accounts) = open_stores(config)?;
    let account = accounts
        .find_by_username(username)
        .with_context(|| format!("no account named {username}"))?;

    let first = rpassword::prompt_password_stderr(&format!("New password for {username}: "))
        .context("reading password")?;
    let second =
        rpassword::prompt_password_stderr("Repeat password: ").context("reading password")?;
    if first != second {
        anyhow::bail!("passwords do not match");
    }

    accounts.set_password(&account.account_id, &first)?;
    println!("Password updated for {username}");
    Ok(())
}
