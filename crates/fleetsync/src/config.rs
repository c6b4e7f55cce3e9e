//! CLI-side configuration: profile lookup plus flag overrides.
//!
//! Core never sees these types -- it receives a pre-built `SyncConfig`.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use fleetsync_config::{self as cfgfile, Config, derive_feed_url};
use fleetsync_core::SyncConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The profile name in effect: `--profile`, then the config file's
/// `default_profile`, then "default".
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build a `SyncConfig` from the config file, profile, and CLI overrides.
pub fn build_sync_config(global: &GlobalOpts) -> Result<SyncConfig, CliError> {
    let cfg = cfgfile::load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut config = if let Some(profile) = cfg.profiles.get(&profile_name) {
        cfgfile::profile_to_sync_config(profile, &profile_name, &cfg.defaults)?
    } else {
        from_flags_only(global, &profile_name)?
    };

    apply_overrides(&mut config, global)?;
    Ok(config)
}

/// No profile found -- build from CLI flags / env vars alone.
fn from_flags_only(global: &GlobalOpts, profile_name: &str) -> Result<SyncConfig, CliError> {
    let raw = global.console.as_deref().ok_or_else(|| CliError::NoConfig {
        path: cfgfile::config_path().display().to_string(),
    })?;
    let console_url: Url = raw.parse().map_err(|_| CliError::Validation {
        field: "console".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    let feed_url = derive_feed_url(&console_url)?;

    let token = global
        .token
        .clone()
        .map(SecretString::from)
        .ok_or_else(|| CliError::NoToken {
            profile: profile_name.into(),
        })?;

    Ok(SyncConfig::new(console_url, feed_url, token))
}

/// Flags beat both profile values and file defaults.
fn apply_overrides(config: &mut SyncConfig, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(ref raw) = global.console {
        let console_url: Url = raw.parse().map_err(|_| CliError::Validation {
            field: "console".into(),
            reason: format!("invalid URL: {raw}"),
        })?;
        config.feed_url = derive_feed_url(&console_url)?;
        config.console_url = console_url;
    }
    if let Some(ref token) = global.token {
        config.token = SecretString::from(token.clone());
    }
    if global.insecure {
        config.danger_accept_invalid_certs = true;
    }
    if let Some(timeout) = global.timeout {
        config.timeout = Duration::from_secs(timeout);
    }
    Ok(())
}
