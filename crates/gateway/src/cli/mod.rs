pub mod admin;
pub mod config;
pub mod sweep;

use clap::{Parser, Subcommand};

/// agentdesk: chat gateway with cached per-tenant CRM agents.
#[derive(Debug, Parser)]
#[command(name = "agentdesk", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Delete stale sessions and account sessions without starting the
    /// server.
    Sweep {
        /// Override `sessions.sweep_max_age_days`.
        #[arg(long)]
        max_age_days: Option<u32>,
    },
    /// Account administration.
    #[command(subcommand)]
    Admin(AdminCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum AdminCommand {
    /// Set a new password for an account (prompted, never echoed).
    ResetPassword {
        /// Account to reset; defaults to `accounts.admin_username`.
        #[arg(long)]
        username: Option<String>,
    },
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `AD_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the
/// path that was used.  A missing file yields the defaults.
///
/// [`Config`]: ad_domain::config::Config
pub fn load_config() -> anyhow::Result<(ad_domain::config::Config, String)> {
    let config_path = std::env::var("AD_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        ad_domain::config::Config::default()
    };

    Ok((config, config_path))
}
