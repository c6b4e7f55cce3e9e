// ── Synchronizer configuration ──

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use fleetsync_api::ReconnectPolicy;

/// Everything a [`Synchronizer`](crate::Synchronizer) needs to run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Console base URL (e.g. `https://console.lab:8000`).
    pub console_url: Url,

    /// Change-feed WebSocket URL (e.g. `wss://console.lab:8000/ws`).
    pub feed_url: Url,

    /// Session token, attached as a bearer credential to every request.
    pub token: SecretString,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Feed reconnection policy, applied by the synchronizer loop.
    pub reconnect: ReconnectPolicy,

    /// Accept self-signed TLS certificates.
    pub danger_accept_invalid_certs: bool,
}

impl SyncConfig {
    pub fn new(console_url: Url, feed_url: Url, token: SecretString) -> Self {
        Self {
            console_url,
            feed_url,
            token,
            timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            danger_accept_invalid_certs: false,
        }
    }
}
