use thiserror::Error;

/// Top-level error type for the `fleetsync-api` crate.
///
/// Covers every failure mode across both transport surfaces: the
/// snapshot/registration REST client and the change-feed WebSocket.
/// `fleetsync-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── REST client ─────────────────────────────────────────────────
    /// The console returned a non-success status. The raw body is kept
    /// so callers can surface the server's own message to the operator.
    #[error("Console request failed (HTTP {status}): {body}")]
    Fetch { status: u16, body: String },

    /// Session token rejected by the console (HTTP 401).
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Change feed ─────────────────────────────────────────────────
    /// A feed frame failed codec validation. The frame is dropped; the
    /// connection stays open.
    #[error("Malformed feed event: {reason}")]
    MalformedEvent { reason: String },

    /// Feed WebSocket connection failed.
    #[error("Feed connection failed: {0}")]
    FeedConnect(String),

    /// Feed WebSocket closed unexpectedly.
    #[error("Feed closed: {reason}")]
    FeedClosed { reason: String },

    /// A `connect()` was issued while a connection is already live.
    /// The manager holds at most one connection; the existing one is
    /// left untouched.
    #[error("Feed connection already active")]
    AlreadyConnected,
}

impl Error {
    /// Returns `true` if this error indicates the session token has
    /// expired and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::FeedConnect(_) | Self::FeedClosed { .. } => true,
            _ => false,
        }
    }
}
