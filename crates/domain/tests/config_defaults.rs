use ad_domain::config::{Config, ConfigSeverity, HashStrategy, SecretSource};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3210);
}

#[test]
fn empty_file_is_valid_config() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.sessions.freshness_days, 30);
    assert_eq!(config.admission.chat.limit, 10);
    assert_eq!(config.admission.chat.window_secs, 60);
    assert_eq!(config.admission.connect.limit, 5);
    assert_eq!(config.admission.connect.window_secs, 300);
    assert_eq!(config.server.max_message_chars, 2000);
    assert_eq!(config.agent.max_retries, 3);
    assert_eq!(config.agent.min_secondary_secret_len, 20);
    assert_eq!(config.accounts.account_session_ttl_days, 7);
    assert!(config.validate().iter().all(|e| e.severity != ConfigSeverity::Error));
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://localhost:*".to_string()));
}

#[test]
fn admission_windows_parse() {
    let toml_str = r#"
[admission.chat]
limit = 3
window_secs = 10
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.admission.chat.limit, 3);
    assert_eq!(config.admission.connect.limit, 5);
}

#[test]
fn hmac_without_pepper_is_an_error() {
    let mut config = Config::default();
    config.hashing.strategy = HashStrategy::HmacSha256;
    config.hashing.pepper = SecretSource::default();
    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.field == "hashing.pepper" && e.severity == ConfigSeverity::Error));
}

#[test]
fn sha256_strategy_only_warns() {
    let toml_str = r#"
[hashing]
strategy = "sha256"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let errors = config.validate();
    assert!(errors
        .iter()
        .all(|e| e.severity == ConfigSeverity::Warning));
    assert!(errors.iter().any(|e| e.field == "hashing.strategy"));
}

#[test]
fn zero_admission_limit_is_rejected() {
    let mut config = Config::default();
    config.admission.connect.limit = 0;
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.field == "admission.connect"));
}

#[test]
fn out_of_range_sample_rate_is_rejected() {
    let toml_str = r#"
[observability]
otlp_endpoint = "http://localhost:4317"
sample_rate = 2.0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.field == "observability.sample_rate"
        && e.severity == ConfigSeverity::Error));
}

#[test]
fn cors_wildcard_warns() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["*"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.field == "server.cors.allowed_origins"
        && e.severity == ConfigSeverity::Warning));
}

#[test]
fn keychain_secret_source_parses() {
    let toml_str = r#"
[accounts.credentials_key]
service = "agentdesk"
account = "credentials-key"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.accounts.credentials_key.service.as_deref(), Some("agentdesk"));
    assert!(!config.accounts.credentials_key.is_unset());
}
