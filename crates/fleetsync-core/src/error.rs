// ── Core error types ──
//
// User-facing errors from fleetsync-core. These are NOT transport
// specific -- consumers never see raw HTTP or WebSocket failures.
// The `From<fleetsync_api::Error>` impl translates transport-layer
// errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ───────────────────────────────────────────
    #[error("Cannot reach the console: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Change feed unavailable: {reason}")]
    FeedUnavailable { reason: String },

    #[error("Synchronizer stopped")]
    Disconnected,

    // ── Selection errors ────────────────────────────────────────────
    /// Attempt to select a udid absent from the replica. Always
    /// surfaced -- it indicates a caller-side invariant violation.
    #[error("Cannot select device {udid}: not present in the replica")]
    InvalidSelection { udid: String },

    // ── Console API errors (wrapped, not exposed raw) ───────────────
    #[error("Console error: {message}")]
    Api {
        message: String,
        /// HTTP status code, if applicable.
        status: Option<u16>,
    },

    // ── Configuration errors ────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ─────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ──────────────────────────

impl From<fleetsync_api::Error> for CoreError {
    fn from(err: fleetsync_api::Error) -> Self {
        match err {
            fleetsync_api::Error::SessionExpired => CoreError::AuthenticationFailed {
                message: "session expired -- log in again".into(),
            },
            fleetsync_api::Error::Fetch { status, body } => CoreError::Api {
                message: body,
                status: Some(status),
            },
            fleetsync_api::Error::Transport(ref e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            fleetsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            fleetsync_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("deserialization error: {message}"))
            }
            fleetsync_api::Error::FeedConnect(reason)
            | fleetsync_api::Error::FeedClosed { reason } => {
                CoreError::FeedUnavailable { reason }
            }
            // Malformed events are dropped at the feed boundary and the
            // manager refuses double-connects; neither should surface here.
            fleetsync_api::Error::MalformedEvent { reason } => {
                CoreError::Internal(format!("malformed event escaped the feed: {reason}"))
            }
            fleetsync_api::Error::AlreadyConnected => {
                CoreError::Internal("feed connect while already connected".into())
            }
        }
    }
}
