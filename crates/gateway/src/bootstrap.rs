//! AppState construction and background-task spawning extracted from
//! `main.rs`.
//!
//! `serve` uses both; the one-shot CLI commands (`sweep`, `admin`) only open
//! the stores through [`open_stores`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;

use ad_domain::config::{Config, ConfigSeverity, HashStrategy};
use ad_sessions::{
    AccountStore, AdminSpec, CredentialCipher, CredentialHasher, RestorationMatcher,
    SessionStore, Sweeper,
};

use crate::runtime::admission::AdmissionController;
use crate::runtime::agent::AgentBuilder;
use crate::runtime::agent_cache::{AgentCache, BuildPolicy};
use crate::runtime::remote_agent::RemoteAgentBuilder;
use crate::runtime::session_service::{ServiceLimits, SessionService};
use crate::secrets::{resolve_optional, resolve_secret};
use crate::state::AppState;

/// Log every config issue and fail on any error-severity one.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

/// Open the session and account stores, resolving the hashing pepper and
/// the credentials key from their secret sources.
pub fn open_stores(config: &Config) -> anyhow::Result<(SessionStore, AccountStore)> {
    let pepper = match config.hashing.strategy {
        HashStrategy::HmacSha256 => Some(
            resolve_secret(&config.hashing.pepper, "hashing.pepper")
                .context("resolving the credential hashing pepper")?,
        ),
        HashStrategy::Sha256 => None,
    };
    let hasher = CredentialHasher::new(config.hashing.strategy, pepper.as_deref())
        .context("initializing credential hasher")?;

    let cipher = match resolve_optional(&config.accounts.credentials_key, "accounts.credentials_key")
    {
        Some(key) => Some(
            CredentialCipher::from_encoded(&key).context("decoding accounts.credentials_key")?,
        ),
        None => {
            tracing::warn!(
                "no credentials key configured; storing CRM credentials on accounts is disabled"
            );
            None
        }
    };

    let state_path = &config.storage.state_path;
    let sessions =
        SessionStore::open(state_path, hasher).context("opening the session store")?;
    let accounts = AccountStore::open(
        state_path,
        cipher,
        config.accounts.account_session_ttl_days,
    )
    .context("opening the account store")?;
    Ok((sessions, accounts))
}

/// Validate config, open the stores, run the startup maintenance steps and
/// return a fully-wired [`AppState`] talking to the configured agent
/// service.
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let builder =
        RemoteAgentBuilder::new(&config.agent).context("building the agent service client")?;
    tracing::info!(url = %config.agent.service_url, "agent service client ready");
    build_app_state_with(config, Arc::new(builder))
}

/// Same as [`build_app_state`] with an explicit agent builder.
pub fn build_app_state_with(
    config: Arc<Config>,
    builder: Arc<dyn AgentBuilder>,
) -> anyhow::Result<AppState> {
    check_config(&config)?;

    // ── Durable stores ───────────────────────────────────────────────
    let (sessions, accounts) = open_stores(&config)?;
    let sessions = Arc::new(sessions);
    let accounts = Arc::new(accounts);

    // ── Startup maintenance ──────────────────────────────────────────
    // The live agent cache is empty on every start; without a clear, active
    // sessions would only answer "reconnect required".
    if config.sessions.clear_on_start {
        let report = sessions.clear_all().context("clearing sessions at startup")?;
        tracing::info!(
            sessions = report.sessions,
            messages = report.messages,
            chats = report.chats,
            "session store cleared at startup"
        );
    }
    let sweeper = Sweeper::new(
        config.sessions.sweep_max_age_days,
        config.accounts.account_session_ttl_days,
    );
    sweeper
        .run(&sessions, &accounts)
        .context("startup sweep")?;

    reconcile_admin(&config, &accounts)?;

    // ── Runtime ──────────────────────────────────────────────────────
    let agents = Arc::new(AgentCache::new(builder, BuildPolicy::from(&config.agent)));
    let admission = Arc::new(AdmissionController::new(config.admission.clone()));
    let service = Arc::new(SessionService::new(
        sessions.clone(),
        RestorationMatcher::new(config.sessions.freshness_days),
        agents.clone(),
        admission.clone(),
        ServiceLimits::from(&*config),
    ));
    tracing::info!(
        freshness_days = config.sessions.freshness_days,
        chat_limit = config.admission.chat.limit,
        connect_limit = config.admission.connect.limit,
        "session service ready"
    );

    Ok(AppState {
        config,
        started_at: Utc::now(),
        sessions,
        accounts,
        sweeper,
        service,
        agents,
        admission,
    })
}

/// Enforce the canonical admin account.
pub fn reconcile_admin(config: &Config, accounts: &AccountStore) -> anyhow::Result<()> {
    let spec = AdminSpec {
        username: config.accounts.admin_username.clone(),
        email: config.accounts.admin_email.clone(),
        password: resolve_optional(&config.accounts.admin_password, "accounts.admin_password"),
    };
    let report = accounts
        .reconcile_admin(&spec)
        .context("reconciling the admin account")?;

    if report.actions.is_empty() {
        tracing::debug!(admin_id = %report.admin_id, "admin account already reconciled");
    } else {
        tracing::info!(
            admin_id = %report.admin_id,
            actions = ?report.actions,
            "admin account reconciled"
        );
    }
    if let Some(path) = &report.generated_password_path {
        tracing::warn!(
            path = %path.display(),
            "generated an initial admin password; read it from this file and change it"
        );
    }
    Ok(())
}

/// Spawn the long-running background tokio tasks (sweep, flush, admission
/// and turn-lock pruning).
///
/// Call this **after** [`build_app_state`] when running the HTTP server.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Periodic sweep ───────────────────────────────────────────────
    let sweep_secs = state.config.sessions.sweep_interval_secs;
    if sweep_secs > 0 {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(sweep_secs));
            // The startup sweep already ran.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = state.service.sweep(&state.sweeper, &state.accounts) {
                    tracing::warn!(error = %e, "periodic sweep failed");
                }
            }
        });
    } else {
        tracing::info!("periodic sweep disabled");
    }

    // ── Periodic flush of touched timestamps ─────────────────────────
    {
        let sessions = state.sessions.clone();
        let accounts = state.accounts.clone();
        let secs = state.config.storage.flush_interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            loop {
                interval.tick().await;
                if let Err(e) = sessions.flush_if_dirty() {
                    tracing::warn!(error = %e, "session store flush failed");
                }
                if let Err(e) = accounts.flush_if_dirty() {
                    tracing::warn!(error = %e, "account store flush failed");
                }
            }
        });
    }

    // ── Periodic admission window + turn lock pruning ────────────────
    {
        let admission = state.admission.clone();
        let service = state.service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let windows = admission.prune();
                let locks = service.prune_turn_locks();
                if windows > 0 || locks > 0 {
                    tracing::debug!(windows, locks, "pruned idle admission windows and turn locks");
                }
            }
        });
    }
    tracing::info!("background tasks spawned");
}

/// Flush both stores; used on shutdown.
pub fn flush_all(state: &AppState) {
    if let Err(e) = state.sessions.flush() {
        tracing::warn!(error = %e, "final session store flush failed");
    }
    if let Err(e) = state.accounts.flush() {
        tracing::warn!(error = %e, "final account store flush failed");
    }
}
