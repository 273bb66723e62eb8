use ad_sessions::{AccountRole, AccountStore, AdminSpec};

fn spec(password: Option<&str>) -> AdminSpec {
    AdminSpec {
        username: "admin".into(),
        email: "admin@localhost".into(),
        password: password.map(str::to_owned),
    }
}

#[test]
fn creates_admin_with_configured_password() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path(), None, 7).unwrap();

    let report = store.reconcile_admin(&spec(Some("admin-password"))).unwrap();
    assert_eq!(report.actions, ["created"]);
    assert!(report.generated_password_path.is_none());

    let admin = store.authenticate("admin", "admin-password").unwrap();
    assert_eq!(admin.role, AccountRole::Admin);
    assert_eq!(admin.account_id, report.admin_id);
}

#[test]
fn reconcile_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path(), None, 7).unwrap();
    store.reconcile_admin(&spec(Some("admin-password"))).unwrap();
    let second = store.reconcile_admin(&spec(Some("admin-password"))).unwrap();
    assert!(second.actions.is_empty());
}

#[test]
fn generated_password_goes_to_private_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path(), None, 7).unwrap();
    let report = store.reconcile_admin(&spec(None)).unwrap();

    let path = report.generated_password_path.unwrap();
    let password = std::fs::read_to_string(&path).unwrap();
    assert!(store.authenticate("admin", password.trim()).is_ok());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    // An existing admin keeps its password when none is configured.
    let again = store.reconcile_admin(&spec(None)).unwrap();
    assert!(again.actions.is_empty());
    assert!(store.authenticate("admin", password.trim()).is_ok());
}

#[test]
fn squatter_is_displaced_and_surplus_admins_demoted() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path(), None, 7).unwrap();
    let (squatter, _) = store
        .create_account("admin", "someone@example.com", AccountRole::User)
        .unwrap();
    let (old_admin, _) = store
        .create_account("root", "root@example.com", AccountRole::Admin)
        .unwrap();
    let (extra_admin, _) = store
        .create_account("ops", "ops@example.com", AccountRole::Admin)
        .unwrap();

    let report = store.reconcile_admin(&spec(Some("admin-password"))).unwrap();
    assert_eq!(report.admin_id, old_admin.account_id);

    let squatter = store.get_account(&squatter.account_id).unwrap();
    assert!(squatter.username.starts_with("admin-displaced-"));
    assert_eq!(squatter.role, AccountRole::User);

    let admin = store.get_account(&old_admin.account_id).unwrap();
    assert_eq!(admin.username, "admin");
    assert_eq!(admin.email, "admin@localhost");

    assert_eq!(
        store.get_account(&extra_admin.account_id).unwrap().role,
        AccountRole::User
    );
    let admins = store
        .list_accounts()
        .into_iter()
        .filter(|a| a.role == AccountRole::Admin)
        .count();
    assert_eq!(admins, 1);
    assert!(store.authenticate("admin", "admin-password").is_ok());
}

#[test]
fn disabled_admin_is_reactivated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    {
        let store = AccountStore::open(&path, None, 7).unwrap();
        store.reconcile_admin(&spec(Some("admin-password"))).unwrap();
    }
    // Flip the flag on disk, as a manual edit would.
    let file = path.join("accounts/accounts.json");
    let raw = std::fs::read_to_string(&file).unwrap();
    std::fs::write(&file, raw.replace("\"is_active\": true", "\"is_active\": false")).unwrap();

    let store = AccountStore::open(&path, None, 7).unwrap();
    let report = store.reconcile_admin(&spec(Some("admin-password"))).unwrap();
    assert_eq!(report.actions, ["activated"]);
    assert!(store.authenticate("admin", "admin-password").is_ok());
}
