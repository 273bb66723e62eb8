//! Platform accounts: login, account sessions, admin reconciliation and
//! encrypted CRM credentials.
//!
//! Independent of CRM-tenant sessions.  Persisted in
//! `accounts/accounts.json` under the state path.  Passwords are Argon2id
//! PHC strings; stored CRM credentials are AES-256-GCM sealed and cannot be
//! written at all without a configured key.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ad_domain::error::{Error, Result};
use ad_domain::trace::TraceEvent;

use crate::crypto::{generate_password, random_token, CredentialCipher};
use crate::store::{load_json, persist_json};

const MIN_PASSWORD_LEN: usize = 8;
const GENERATED_PASSWORD_LEN: usize = 20;
const INITIAL_ADMIN_PASSWORD_FILE: &str = "initial_admin_password";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    User,
    Admin,
}

impl AccountRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    account_id: String,
    username: String,
    email: String,
    password_hash: String,
    role: AccountRole,
    is_active: bool,
    created_at: DateTime<Utc>,
    #[serde(default)]
    last_login: Option<DateTime<Utc>>,
    /// `base64(nonce || ciphertext)` of a JSON [`CrmCredentials`].
    #[serde(default)]
    crm_credentials: Option<String>,
}

impl AccountRecord {
    fn summary(&self) -> AccountSummary {
        AccountSummary {
            account_id: self.account_id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            is_active: self.is_active,
            created_at: self.created_at,
            last_login: self.last_login,
            has_crm_credentials: self.crm_credentials.is_some(),
        }
    }
}

/// Public view of an account.  Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub username: String,
    pub email: String,
    pub role: AccountRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub has_crm_credentials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSession {
    pub session_id: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
}

/// CRM connection details an account keeps for auto-connect.
#[derive(Clone, Serialize, Deserialize)]
pub struct CrmCredentials {
    pub endpoint: String,
    pub username: String,
    pub secret: String,
    pub secondary_secret: String,
    #[serde(default)]
    pub display_endpoint: Option<String>,
}

impl fmt::Debug for CrmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrmCredentials")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("display_endpoint", &self.display_endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountStats {
    pub total: usize,
    pub active: usize,
    pub admins: usize,
    pub active_sessions: usize,
}

/// The canonical admin identity enforced at startup.
#[derive(Clone)]
pub struct AdminSpec {
    pub username: String,
    pub email: String,
    /// When `None`, an existing admin keeps its password and a newly
    /// created one gets a generated password written to the state dir.
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub admin_id: String,
    pub actions: Vec<String>,
    pub generated_password_path: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsState {
    #[serde(default)]
    accounts: HashMap<String, AccountRecord>,
    #[serde(default)]
    sessions: HashMap<String, AccountSession>,
}

impl AccountsState {
    fn id_by_username(&self, username: &str) -> Option<String> {
        self.accounts
            .values()
            .find(|a| a.username.eq_ignore_ascii_case(username))
            .map(|a| a.account_id.clone())
    }

    fn email_taken(&self, email: &str, except: Option<&str>) -> bool {
        self.accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(email) && Some(a.account_id.as_str()) != except)
    }

    fn end_sessions_of(&mut self, account_id: &str) -> usize {
        let mut ended = 0;
        for s in self.sessions.values_mut() {
            if s.account_id == account_id && s.is_active {
                s.is_active = false;
                ended += 1;
            }
        }
        ended
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Account store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AccountStore {
    state_dir: PathBuf,
    path: PathBuf,
    state: RwLock<AccountsState>,
    cipher: Option<CredentialCipher>,
    session_ttl: Duration,
    dirty: AtomicBool,
}

impl AccountStore {
    /// Load or create the store under `state_path/accounts/`.
    pub fn open(
        state_path: &Path,
        cipher: Option<CredentialCipher>,
        session_ttl_days: u32,
    ) -> Result<Self> {
        let dir = state_path.join("accounts");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("accounts.json");
        let state: AccountsState = load_json(&path)?;

        tracing::info!(
            accounts = state.accounts.len(),
            account_sessions = state.sessions.len(),
            credentials_encryption = cipher.is_some(),
            "account store loaded"
        );

        Ok(Self {
            state_dir: state_path.to_path_buf(),
            path,
            state: RwLock::new(state),
            cipher,
            session_ttl: Duration::days(i64::from(session_ttl_days)),
            dirty: AtomicBool::new(false),
        })
    }

    // ── Accounts ─────────────────────────────────────────────────────

    pub fn authenticate(&self, username: &str, password: &str) -> Result<AccountSummary> {
        self.authenticate_at(username, password, Utc::now())
    }

    /// Check a username/password pair.  Unknown users and wrong passwords
    /// produce the same error.  Records `last_login` on success.
    pub fn authenticate_at(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<AccountSummary> {
        let invalid = || Error::Auth("invalid username or password".into());

        let (account_id, hash, active) = {
            let state = self.state.read();
            let id = state.id_by_username(username.trim()).ok_or_else(invalid)?;
            let acct = &state.accounts[&id];
            (id, acct.password_hash.clone(), acct.is_active)
        };

        if !verify_password(password, &hash)? {
            return Err(invalid());
        }
        if !active {
            return Err(Error::Auth("account is disabled".into()));
        }

        let summary = {
            let mut state = self.state.write();
            let acct = state
                .accounts
                .get_mut(&account_id)
                .ok_or_else(invalid)?;
            acct.last_login = Some(now);
            let summary = acct.summary();
            persist_json(&self.path, &*state)?;
            summary
        };

        TraceEvent::AccountLogin {
            account_id: summary.account_id.clone(),
            role: summary.role.as_str().to_owned(),
        }
        .emit();
        Ok(summary)
    }

    /// Create an account with a generated password, returned once.
    pub fn create_account(
        &self,
        username: &str,
        email: &str,
        role: AccountRole,
    ) -> Result<(AccountSummary, String)> {
        let username = username.trim();
        let email = email.trim();
        validate_username(username)?;
        if !email.contains('@') || email.len() > 254 {
            return Err(Error::Validation("invalid email address".into()));
        }

        let password = generate_password(GENERATED_PASSWORD_LEN);
        let password_hash = hash_password(&password)?;

        let mut state = self.state.write();
        if state.id_by_username(username).is_some() {
            return Err(Error::Conflict(format!("username {username} is taken")));
        }
        if state.email_taken(email, None) {
            return Err(Error::Conflict(format!("email {email} is taken")));
        }

        let record = AccountRecord {
            account_id: uuid::Uuid::new_v4().to_string(),
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash,
            role,
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
            crm_credentials: None,
        };
        let summary = record.summary();
        state.accounts.insert(record.account_id.clone(), record);
        persist_json(&self.path, &*state)?;

        tracing::info!(account_id = %summary.account_id, role = role.as_str(), "account created");
        Ok((summary, password))
    }

    pub fn get_account(&self, account_id: &str) -> Option<AccountSummary> {
        self.state.read().accounts.get(account_id).map(AccountRecord::summary)
    }

    pub fn find_by_username(&self, username: &str) -> Option<AccountSummary> {
        let state = self.state.read();
        let id = state.id_by_username(username.trim())?;
        state.accounts.get(&id).map(AccountRecord::summary)
    }

    /// All accounts, oldest first.
    pub fn list_accounts(&self) -> Vec<AccountSummary> {
        let mut out: Vec<_> = self
            .state
            .read()
            .accounts
            .values()
            .map(AccountRecord::summary)
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn account_stats(&self) -> AccountStats {
        let now = Utc::now();
        let state = self.state.read();
        AccountStats {
            total: state.accounts.len(),
            active: state.accounts.values().filter(|a| a.is_active).count(),
            admins: state
                .accounts
                .values()
                .filter(|a| a.role == AccountRole::Admin)
                .count(),
            active_sessions: state
                .sessions
                .values()
                .filter(|s| s.is_active && now - s.last_activity <= self.session_ttl)
                .count(),
        }
    }

    /// Change a password after checking the current one.
    pub fn change_password(&self, account_id: &str, current: &str, new: &str) -> Result<()> {
        let hash = self
            .state
            .read()
            .accounts
            .get(account_id)
            .map(|a| a.password_hash.clone())
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
        if !verify_password(current, &hash)? {
            return Err(Error::Auth("current password is incorrect".into()));
        }
        self.set_password(account_id, new)
    }

    /// Replace a password without checking the old one.
    pub fn set_password(&self, account_id: &str, new: &str) -> Result<()> {
        if new.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let password_hash = hash_password(new)?;

        let mut state = self.state.write();
        let acct = state
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
        acct.password_hash = password_hash;
        persist_json(&self.path, &*state)
    }

    /// Enable or disable an account.  Disabling ends its account sessions.
    /// The admin account cannot be disabled.
    pub fn set_active(&self, account_id: &str, active: bool) -> Result<()> {
        let mut state = self.state.write();
        let acct = state
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
        if !active && acct.role == AccountRole::Admin {
            return Err(Error::Validation("the admin account cannot be deactivated".into()));
        }
        if acct.is_active == active {
            return Ok(());
        }
        acct.is_active = active;
        let ended = if active { 0 } else { state.end_sessions_of(account_id) };
        persist_json(&self.path, &*state)?;

        tracing::info!(account_id, active, ended_sessions = ended, "account status changed");
        Ok(())
    }

    // ── CRM credentials ──────────────────────────────────────────────

    fn cipher(&self) -> Result<&CredentialCipher> {
        self.cipher.as_ref().ok_or_else(|| {
            Error::Config("no credentials key configured; stored CRM credentials are disabled".into())
        })
    }

    pub fn store_crm_credentials(&self, account_id: &str, creds: &CrmCredentials) -> Result<()> {
        let sealed = self.cipher()?.encrypt(&serde_json::to_vec(creds)?)?;

        let mut state = self.state.write();
        let acct = state
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
        acct.crm_credentials = Some(sealed);
        persist_json(&self.path, &*state)
    }

    pub fn crm_credentials(&self, account_id: &str) -> Result<Option<CrmCredentials>> {
        let sealed = {
            let state = self.state.read();
            let acct = state
                .accounts
                .get(account_id)
                .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
            match &acct.crm_credentials {
                Some(s) => s.clone(),
                None => return Ok(None),
            }
        };
        let plain = self.cipher()?.decrypt(&sealed)?;
        Ok(Some(serde_json::from_slice(&plain)?))
    }

    // ── Account sessions ─────────────────────────────────────────────

    pub fn create_account_session(&self, account_id: &str) -> Result<AccountSession> {
        let now = Utc::now();
        let mut state = self.state.write();
        match state.accounts.get(account_id) {
            Some(a) if a.is_active => {}
            _ => return Err(Error::Auth("account is missing or disabled".into())),
        }
        let session = AccountSession {
            session_id: random_token(32),
            account_id: account_id.to_owned(),
            created_at: now,
            last_activity: now,
            is_active: true,
        };
        state
            .sessions
            .insert(session.session_id.clone(), session.clone());
        persist_json(&self.path, &*state)?;
        Ok(session)
    }

    pub fn get_account_session(&self, session_id: &str) -> Option<(AccountSession, AccountSummary)> {
        self.get_account_session_at(session_id, Utc::now())
    }

    /// A live account session and its account.  Expired sessions and
    /// sessions of disabled accounts are reported as absent.
    pub fn get_account_session_at(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Option<(AccountSession, AccountSummary)> {
        let state = self.state.read();
        let session = state.sessions.get(session_id)?;
        if !session.is_active || now - session.last_activity > self.session_ttl {
            return None;
        }
        let acct = state.accounts.get(&session.account_id)?;
        if !acct.is_active {
            return None;
        }
        Some((session.clone(), acct.summary()))
    }

    pub fn touch_account_session(&self, session_id: &str) {
        self.touch_account_session_at(session_id, Utc::now());
    }

    pub fn touch_account_session_at(&self, session_id: &str, now: DateTime<Utc>) {
        let mut state = self.state.write();
        if let Some(s) = state.sessions.get_mut(session_id) {
            if s.is_active && now > s.last_activity {
                s.last_activity = now;
                self.dirty.store(true, Ordering::Release);
            }
        }
    }

    /// Log out.  Returns `false` when the session was unknown or already
    /// ended.
    pub fn invalidate_account_session(&self, session_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        match state.sessions.get_mut(session_id) {
            Some(s) if s.is_active => s.is_active = false,
            _ => return Ok(false),
        }
        persist_json(&self.path, &*state)?;
        Ok(true)
    }

    pub fn sweep_account_sessions(&self, ttl_days: u32) -> Result<usize> {
        self.sweep_account_sessions_at(Utc::now(), ttl_days)
    }

    /// Delete ended sessions and sessions idle for longer than `ttl_days`.
    pub fn sweep_account_sessions_at(&self, now: DateTime<Utc>, ttl_days: u32) -> Result<usize> {
        let ttl = Duration::days(i64::from(ttl_days));
        let mut state = self.state.write();
        let before = state.sessions.len();
        state
            .sessions
            .retain(|_, s| s.is_active && now - s.last_activity <= ttl);
        let removed = before - state.sessions.len();
        if removed > 0 {
            persist_json(&self.path, &*state)?;
        }
        Ok(removed)
    }

    // ── Admin reconciliation ─────────────────────────────────────────

    /// Startup migration enforcing the canonical admin.
    ///
    /// Afterwards exactly one admin exists; it carries `spec.username`, is
    /// active and, when `spec.password` is set, verifies against it.  A
    /// non-admin holding the canonical name is renamed out of the way and
    /// surplus admins are demoted.  Running it twice changes nothing.
    pub fn reconcile_admin(&self, spec: &AdminSpec) -> Result<ReconcileReport> {
        let canonical = spec.username.trim();
        validate_username(canonical)?;

        let mut state = self.state.write();
        let mut actions: Vec<(String, String)> = Vec::new();
        let mut generated_password_path = None;

        // A non-admin squatting on the canonical name moves aside.
        if let Some(id) = state.id_by_username(canonical) {
            if let Some(acct) = state.accounts.get_mut(&id) {
                if acct.role != AccountRole::Admin {
                    let short: String = id.chars().take(8).collect();
                    acct.username = format!("{canonical}-displaced-{short}");
                    actions.push((id.clone(), "displaced".into()));
                }
            }
        }

        // Pick the primary admin: the canonically named one, else the
        // oldest active admin, else the oldest admin.
        let mut admins: Vec<&AccountRecord> = state
            .accounts
            .values()
            .filter(|a| a.role == AccountRole::Admin)
            .collect();
        admins.sort_by(|a, b| {
            let a_key = (!a.username.eq_ignore_ascii_case(canonical), !a.is_active, a.created_at);
            let b_key = (!b.username.eq_ignore_ascii_case(canonical), !b.is_active, b.created_at);
            a_key.cmp(&b_key)
        });
        let primary = admins.first().map(|a| a.account_id.clone());

        let admin_id = match primary {
            Some(id) => {
                let email_free = !state.email_taken(&spec.email, Some(&id));
                let mut password_hash = None;
                if let Some(pw) = &spec.password {
                    if !verify_password(pw, &state.accounts[&id].password_hash)? {
                        password_hash = Some(hash_password(pw)?);
                    }
                }
                if let Some(acct) = state.accounts.get_mut(&id) {
                    if acct.username != canonical {
                        acct.username = canonical.to_owned();
                        actions.push((id.clone(), "renamed".into()));
                    }
                    if email_free && !acct.email.eq_ignore_ascii_case(&spec.email) {
                        acct.email = spec.email.clone();
                        actions.push((id.clone(), "email_updated".into()));
                    }
                    if !acct.is_active {
                        acct.is_active = true;
                        actions.push((id.clone(), "activated".into()));
                    }
                    if let Some(hash) = password_hash {
                        acct.password_hash = hash;
                        actions.push((id.clone(), "password_reset".into()));
                    }
                }
                id
            }
            None => {
                let (password, generated) = match &spec.password {
                    Some(pw) => (pw.clone(), false),
                    None => (generate_password(GENERATED_PASSWORD_LEN), true),
                };
                let account_id = uuid::Uuid::new_v4().to_string();
                let email = if state.email_taken(&spec.email, None) {
                    let short: String = account_id.chars().take(8).collect();
                    format!("{canonical}+{short}@localhost")
                } else {
                    spec.email.clone()
                };
                let record = AccountRecord {
                    account_id: account_id.clone(),
                    username: canonical.to_owned(),
                    email,
                    password_hash: hash_password(&password)?,
                    role: AccountRole::Admin,
                    is_active: true,
                    created_at: Utc::now(),
                    last_login: None,
                    crm_credentials: None,
                };
                state.accounts.insert(account_id.clone(), record);
                actions.push((account_id.clone(), "created".into()));
                if generated {
                    let path = self.state_dir.join(INITIAL_ADMIN_PASSWORD_FILE);
                    write_private_file(&path, &password)?;
                    generated_password_path = Some(path);
                }
                account_id
            }
        };

        for acct in state.accounts.values_mut() {
            if acct.role == AccountRole::Admin && acct.account_id != admin_id {
                acct.role = AccountRole::User;
                actions.push((acct.account_id.clone(), "demoted".into()));
            }
        }

        if !actions.is_empty() {
            persist_json(&self.path, &*state)?;
        }
        drop(state);

        for (account_id, action) in &actions {
            TraceEvent::AdminReconciled {
                account_id: account_id.clone(),
                action: action.clone(),
            }
            .emit();
        }
        if let Some(path) = &generated_password_path {
            tracing::warn!(
                path = %path.display(),
                "admin account created with a generated password; read it from the file and change it"
            );
        }

        Ok(ReconcileReport {
            admin_id,
            actions: actions.into_iter().map(|(_, a)| a).collect(),
            generated_password_path,
        })
    }

    // ── Persistence ──────────────────────────────────────────────────

    pub fn flush(&self) -> Result<()> {
        let state = self.state.read();
        self.dirty.store(false, Ordering::Release);
        persist_json(&self.path, &*state).inspect_err(|_| {
            self.dirty.store(true, Ordering::Release);
        })
    }

    pub fn flush_if_dirty(&self) -> Result<bool> {
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > 64 {
        return Err(Error::Validation("username must be 1-64 characters".into()));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(Error::Validation("username must not contain whitespace".into()));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Crypto(format!("password hash: {e}")))
}

/// `Ok(false)` on mismatch, `Err` only for a malformed stored hash.
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = argon2::PasswordHash::new(hash)
        .map_err(|e| Error::Crypto(format!("invalid hash format: {e}")))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(Error::Crypto(format!("verify error: {e}"))),
    }
}

fn write_private_file(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    writeln!(file, "{contents}")?;
    Ok(())
}
