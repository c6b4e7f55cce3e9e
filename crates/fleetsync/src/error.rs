//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use fleetsync_config::ConfigError;
use fleetsync_core::CoreError;

/// Stable exit codes for scripting.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the console")]
    #[diagnostic(
        code(fleetsync::connection_failed),
        help(
            "Check that the console is running and accessible.\n\
             Reason: {reason}\n\
             For self-signed certificates, try --insecure (-k)."
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Change feed unavailable")]
    #[diagnostic(
        code(fleetsync::feed_unavailable),
        help("The console is up but its WebSocket feed is not.\nReason: {reason}")
    )]
    FeedUnavailable { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed")]
    #[diagnostic(
        code(fleetsync::auth_failed),
        help(
            "The session token was rejected.\n\
             Set FLEETSYNC_TOKEN or configure token_env in your profile."
        )
    )]
    AuthFailed { message: String },

    #[error("No session token configured for profile '{profile}'")]
    #[diagnostic(
        code(fleetsync::no_token),
        help("Set the FLEETSYNC_TOKEN environment variable, or add\ntoken_env to the profile in your config file.")
    )]
    NoToken { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Device '{udid}' not found")]
    #[diagnostic(
        code(fleetsync::device_not_found),
        help("Run `fleetsync devices` to see the current fleet.")
    )]
    DeviceNotFound { udid: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration: {field}")]
    #[diagnostic(code(fleetsync::invalid_config), help("{reason}"))]
    Validation { field: String, reason: String },

    #[error("No console configured")]
    #[diagnostic(
        code(fleetsync::no_config),
        help(
            "Pass --console <URL>, set FLEETSYNC_CONSOLE, or create a profile in {path}."
        )
    )]
    NoConfig { path: String },

    // ── Everything else ──────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(fleetsync::console_error))]
    Console(String),

    #[error(transparent)]
    #[diagnostic(code(fleetsync::config_error))]
    Config(ConfigError),

    #[error("{0}")]
    #[diagnostic(code(fleetsync::internal))]
    Internal(String),
}

impl CliError {
    /// Exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::FeedUnavailable { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoToken { .. } => exit_code::AUTH,
            Self::DeviceNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NoConfig { .. } | Self::Config(_) => exit_code::USAGE,
            Self::Console(_) | Self::Internal(_) => exit_code::GENERAL,
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed { reason },
            CoreError::FeedUnavailable { reason } => Self::FeedUnavailable { reason },
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::InvalidSelection { udid } => Self::DeviceNotFound { udid },
            CoreError::Api { message, status } => match status {
                Some(404) => Self::Console(format!("not found: {message}")),
                _ => Self::Console(message),
            },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Disconnected => Self::Internal("synchronizer stopped unexpectedly".into()),
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoToken { profile } => Self::NoToken { profile },
            other => Self::Config(other),
        }
    }
}
