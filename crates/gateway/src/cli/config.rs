use ad_domain::config::{Config, ConfigSeverity, SecretSource};

/// Parse and validate the config, printing any issues.
///
/// Returns `false` when any error-severity issue was found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Render the resolved config (with all defaults filled in) as TOML.
/// Plaintext secret values are masked.
pub fn render(config: &Config) -> anyhow::Result<String> {
    let mut redacted = config.clone();
    for source in [
        &mut redacted.hashing.pepper,
        &mut redacted.accounts.admin_password,
        &mut redacted.accounts.credentials_key,
    ] {
        mask(source);
    }
    Ok(toml::to_string_pretty(&redacted)?)
}

pub fn show(config: &Config) -> anyhow::Result<()> {
    print!("{}", render(config)?);
    Ok(())
}

fn mask(source: &mut SecretSource) {
    if source.key.is_some() {
        source.key = Some("***".into());
    }
}
