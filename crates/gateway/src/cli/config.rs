use sa_domain::config::{Config, ConfigSeverity};

/// OS-keychain service name under which all provider secrets are stored.
/// Accounts are the provider ID, matching [`sa_providers::util::resolve_from_keychain`]'s
/// `service` + `account` lookup convention.
const KEYCHAIN_SERVICE: &str = "serialagent";

/// Parse and validate the config, printing any issues.
///
/// Exits with code 0 when valid, code 1 when errors are found.
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

    println!(
        "\n{} error(s), {} warning(s) in {config_path}",
        error_count, warning_count,
    );

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}

/// Prompt for a secret and store it in the OS keychain under
/// `service = "serialagent"`, `account = provider_id`.
///
/// Fails loudly rather than falling back to a plaintext file — config.toml
/// must then set `auth.mode = "keychain"` with matching `service`/`account`
/// for [`sa_providers::util::resolve_api_key`] to find it.
pub fn set_secret(config: &Config, provider_id: &str) -> anyhow::Result<()> {
    if !config.llm.providers.iter().any(|p| p.id == provider_id) {
        anyhow::bail!(
            "provider '{provider_id}' not found in config (available: {})",
            config
                .llm
                .providers
                .iter()
                .map(|p| p.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let secret = rpassword::prompt_password(format!("API key for '{provider_id}': "))
        .map_err(|e| anyhow::anyhow!("reading secret: {e}"))?;
    if secret.is_empty() {
        anyhow::bail!("no secret entered, aborting");
    }

    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, provider_id)
        .map_err(|e| anyhow::anyhow!("keyring entry creation failed: {e}"))?;
    entry
        .set_password(&secret)
        .map_err(|e| anyhow::anyhow!("storing secret in keychain: {e}"))?;

    println!(
        "Stored. Set `auth.mode = \"keychain\"`, `auth.service = \"{KEYCHAIN_SERVICE}\"`, \
         `auth.account = \"{provider_id}\"` on the provider in config.toml."
    );
    Ok(())
}

/// Read a secret from the OS keychain and print it masked (last 4 chars only).
pub fn get_secret(_config: &Config, provider_id: &str) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, provider_id)
        .map_err(|e| anyhow::anyhow!("keyring entry creation failed: {e}"))?;
    let secret = entry
        .get_password()
        .map_err(|e| anyhow::anyhow!("no secret found for '{provider_id}': {e}"))?;

    let masked = if secret.len() > 4 {
        format!("{}{}", "*".repeat(secret.len() - 4), &secret[secret.len() - 4..])
    } else {
        "*".repeat(secret.len())
    };
    println!("{provider_id}: {masked}");
    Ok(())
}
