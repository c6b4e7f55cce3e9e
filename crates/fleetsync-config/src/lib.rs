//! Shared configuration for fleetsync consumers.
//!
//! TOML profiles, token resolution (env + plaintext), and translation
//! to `fleetsync_core::SyncConfig`. The CLI layers flag overrides on
//! top; core only ever receives a pre-built `SyncConfig`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use fleetsync_api::ReconnectPolicy;
use fleetsync_core::SyncConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no session token configured for profile '{profile}'")]
    NoToken { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name (used when --profile is not specified).
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named console profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Feed reconnection attempts before the synchronizer gives up.
    /// Absent means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout: default_timeout(),
            max_retries: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// A named console profile.
#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    /// Console base URL (e.g., "https://console.lab:8000").
    pub console: String,

    /// Change-feed WebSocket URL. Derived from `console` when absent
    /// (scheme swapped to ws/wss, path set to `/ws`).
    pub feed: Option<String>,

    /// Session token (plaintext -- prefer token_env).
    pub token: Option<String>,

    /// Environment variable name containing the session token.
    pub token_env: Option<String>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    /// Override the reconnection budget.
    pub max_retries: Option<u32>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "fleetsync", "fleetsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fleetsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_path();

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("FLEETSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

/// Resolve the session token from the credential chain.
///
/// Order: the profile's `token_env` variable, then `FLEETSYNC_TOKEN`,
/// then plaintext in the config file.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Ok(val) = std::env::var("FLEETSYNC_TOKEN") {
        return Ok(SecretString::from(val));
    }

    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoToken {
        profile: profile_name.into(),
    })
}

// ── Feed URL derivation ─────────────────────────────────────────────

/// Derive the change-feed URL from the console URL: same host and
/// port, scheme swapped to the WebSocket equivalent, path `/ws`.
pub fn derive_feed_url(console: &Url) -> Result<Url, ConfigError> {
    let mut feed = console.clone();
    let scheme = match console.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(ConfigError::Validation {
                field: "console".into(),
                reason: format!("expected http or https URL, got '{other}'"),
            });
        }
    };
    feed.set_scheme(scheme)
        .map_err(|()| ConfigError::Validation {
            field: "console".into(),
            reason: format!("cannot derive feed URL from {console}"),
        })?;
    feed.set_path("/ws");
    feed.set_query(None);
    Ok(feed)
}

// ── SyncConfig resolution ───────────────────────────────────────────

/// Build a `SyncConfig` from a profile, with workspace defaults for
/// anything the profile leaves unset.
pub fn profile_to_sync_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<SyncConfig, ConfigError> {
    let console_url: Url = profile.console.parse().map_err(|_| ConfigError::Validation {
        field: "console".into(),
        reason: format!("invalid URL: {}", profile.console),
    })?;

    let feed_url = match profile.feed {
        Some(ref raw) => raw.parse().map_err(|_| ConfigError::Validation {
            field: "feed".into(),
            reason: format!("invalid URL: {raw}"),
        })?,
        None => derive_feed_url(&console_url)?,
    };

    let token = resolve_token(profile, profile_name)?;

    let mut config = SyncConfig::new(console_url, feed_url, token);
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.danger_accept_invalid_certs = profile.insecure.unwrap_or(defaults.insecure);
    config.reconnect = ReconnectPolicy {
        max_retries: profile.max_retries.or(defaults.max_retries),
        ..ReconnectPolicy::default()
    };
    Ok(config)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn profile(console: &str) -> Profile {
        Profile {
            console: console.into(),
            feed: None,
            token: Some("token-123".into()),
            token_env: None,
            insecure: None,
            timeout: None,
            max_retries: None,
        }
    }

    #[test]
    fn feed_url_derivation_swaps_scheme_and_path() {
        let console = Url::parse("https://console.lab:8000/api/v1").expect("static url");
        let feed = derive_feed_url(&console).expect("derivable");
        assert_eq!(feed.as_str(), "wss://console.lab:8000/ws");

        let console = Url::parse("http://10.0.0.5").expect("static url");
        let feed = derive_feed_url(&console).expect("derivable");
        assert_eq!(feed.as_str(), "ws://10.0.0.5/ws");
    }

    #[test]
    fn feed_url_derivation_rejects_non_http_schemes() {
        let console = Url::parse("ftp://console.lab").expect("static url");
        let err = derive_feed_url(&console).expect_err("ftp is not a console scheme");
        assert!(matches!(err, ConfigError::Validation { field, .. } if field == "console"));
    }

    #[test]
    fn profile_resolution_applies_defaults() {
        let defaults = Defaults {
            insecure: true,
            timeout: 12,
            max_retries: Some(5),
        };
        let config = profile_to_sync_config(&profile("https://console.lab"), "lab", &defaults)
            .expect("resolvable");

        assert_eq!(config.console_url.as_str(), "https://console.lab/");
        assert_eq!(config.feed_url.as_str(), "wss://console.lab/ws");
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert!(config.danger_accept_invalid_certs);
        assert_eq!(config.reconnect.max_retries, Some(5));
    }

    #[test]
    fn profile_overrides_beat_defaults() {
        let mut p = profile("https://console.lab");
        p.feed = Some("wss://feed.lab/stream".into());
        p.timeout = Some(3);
        p.max_retries = Some(1);

        let config =
            profile_to_sync_config(&p, "lab", &Defaults::default()).expect("resolvable");
        assert_eq!(config.feed_url.as_str(), "wss://feed.lab/stream");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.reconnect.max_retries, Some(1));
    }

    #[test]
    fn invalid_console_url_is_a_validation_error() {
        let err = profile_to_sync_config(&profile("not a url"), "lab", &Defaults::default())
            .expect_err("garbage URL");
        assert!(matches!(err, ConfigError::Validation { field, .. } if field == "console"));
    }

    #[test]
    fn missing_token_is_reported_with_the_profile_name() {
        let mut p = profile("https://console.lab");
        p.token = None;
        let err = resolve_token(&p, "lab").expect_err("no token anywhere");
        assert!(matches!(err, ConfigError::NoToken { profile } if profile == "lab"));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let raw = r#"
            default_profile = "lab"

            [defaults]
            timeout = 10

            [profiles.lab]
            console = "https://console.lab:8000"
            token_env = "LAB_TOKEN"
            max_retries = 4
        "#;
        let config: Config = toml::from_str(raw).expect("well-formed config");
        assert_eq!(config.default_profile.as_deref(), Some("lab"));
        assert_eq!(config.defaults.timeout, 10);

        let lab = config.profiles.get("lab").expect("profile present");
        assert_eq!(lab.console, "https://console.lab:8000");
        assert_eq!(lab.token_env.as_deref(), Some("LAB_TOKEN"));
        assert_eq!(lab.max_retries, Some(4));

        let rendered = toml::to_string_pretty(&config).expect("serializable");
        assert!(rendered.contains("console.lab:8000"));
    }
}
