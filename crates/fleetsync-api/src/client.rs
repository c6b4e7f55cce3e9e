// Console REST client
//
// Wraps `reqwest::Client` with console-specific URL construction, the
// paging envelope used by the fleet-listing endpoint, and status-code
// mapping. All methods return unwrapped payloads -- the envelope is
// stripped before the caller sees it.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Security id handed out by the registration endpoint. Doubles as the
/// session-scoped stream handle for the registered device.
pub type SecurityId = u32;

/// Page size for the fleet-listing endpoint.
const SNAPSHOT_PAGE_LIMIT: usize = 100;

// ── Wire types ──────────────────────────────────────────────────────

/// Device payload as the console serves it.
///
/// Everything past `udid` is nullable until the host agent populates it,
/// and snapshot-sourced records may omit `id` entirely -- the domain
/// layer treats `udid` as the primary key for exactly that reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    pub udid: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub sdk_version: Option<String>,
    #[serde(default)]
    pub security_id: Option<SecurityId>,
    #[serde(default)]
    pub registered_to: Option<String>,
    #[serde(default)]
    pub host_ip: Option<String>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

/// Paging envelope around the fleet listing:
/// `{ "total": 42, "skip": 0, "limit": 100, "devices": [...] }`
#[derive(Debug, Deserialize)]
struct DevicePage {
    total: usize,
    #[allow(dead_code)]
    skip: usize,
    #[allow(dead_code)]
    limit: usize,
    devices: Vec<DeviceRecord>,
}

// ── ConsoleClient ───────────────────────────────────────────────────

/// HTTP client for the operator console's REST API.
///
/// Owns the session token and attaches it as a bearer credential on
/// every request. The console rejects invalid sessions with HTTP 401,
/// surfaced here as [`Error::SessionExpired`] -- token issuance and
/// verification live upstream, not in this crate.
pub struct ConsoleClient {
    http: reqwest::Client,
    base_url: Url,
    token: SecretString,
}

impl ConsoleClient {
    /// Create a new client from a [`TransportConfig`].
    ///
    /// `base_url` is the console root (e.g. `https://console.lab:8000`).
    pub fn new(
        base_url: Url,
        token: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url, token })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, token: SecretString) -> Self {
        Self { http, base_url, token }
    }

    /// The console base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ─────────────────────────────────────────────────

    /// Build a full URL for a versioned API path: `{base}/api/v1/{path}`.
    fn api_url(&self, path: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/api/v1/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path
        );
        Ok(Url::parse(&full)?)
    }

    // ── Snapshot ────────────────────────────────────────────────────

    /// Fetch the full fleet listing.
    ///
    /// `GET /api/v1/devices/list?skip=N&limit=M`, paging until `total`
    /// records have been collected. On any failure the partial result is
    /// discarded -- the caller never merges a half-fetched snapshot.
    pub async fn load_snapshot(&self) -> Result<Vec<DeviceRecord>, Error> {
        let mut devices: Vec<DeviceRecord> = Vec::new();

        loop {
            let mut url = self.api_url("devices/list")?;
            url.query_pairs_mut()
                .append_pair("skip", &devices.len().to_string())
                .append_pair("limit", &SNAPSHOT_PAGE_LIMIT.to_string());

            debug!(%url, fetched = devices.len(), "fetching snapshot page");

            let resp = self
                .http
                .get(url)
                .bearer_auth(self.token.expose_secret())
                .send()
                .await?;
            let page: DevicePage = Self::parse_body(resp).await?;

            let page_len = page.devices.len();
            devices.extend(page.devices);

            // An empty page before `total` means the fleet shrank
            // mid-fetch; stop rather than loop forever.
            if devices.len() >= page.total || page_len == 0 {
                break;
            }
        }

        debug!(count = devices.len(), "snapshot loaded");
        Ok(devices)
    }

    // ── Registration ────────────────────────────────────────────────

    /// Register a device to the current session.
    ///
    /// `POST /api/v1/registerdevice/{udid}`. Returns the security id the
    /// console minted (or the existing one if the device was already
    /// registered) -- the caller uses it as the device's stream handle.
    pub async fn register_device(&self, udid: &str) -> Result<SecurityId, Error> {
        let url = self.api_url(&format!("registerdevice/{udid}"))?;
        debug!(udid, "registering device");

        let resp = self
            .http
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;
        Self::parse_body(resp).await
    }

    /// Release a device registration.
    ///
    /// `PUT /api/v1/deregisterdevice/{udid}`.
    pub async fn deregister_device(&self, udid: &str) -> Result<(), Error> {
        let url = self.api_url(&format!("deregisterdevice/{udid}"))?;
        debug!(udid, "deregistering device");

        let resp = self
            .http
            .put(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;
        let _: serde_json::Value = Self::parse_body(resp).await?;
        Ok(())
    }

    // ── Session ─────────────────────────────────────────────────────

    /// Check whether the session token is still accepted upstream.
    ///
    /// `GET /api/v1/health` with the bearer token attached; a 401 means
    /// the session is gone. Transport failures still propagate as errors
    /// since they say nothing about the token.
    pub async fn verify_session(&self) -> Result<bool, Error> {
        let url = self.api_url("health")?;

        let resp = self
            .http
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(false);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Fetch { status, body });
        }
        Ok(true)
    }

    // ── Response handling ───────────────────────────────────────────

    /// Map the status code, then deserialize the body.
    ///
    /// 401 → [`Error::SessionExpired`]; other non-success → [`Error::Fetch`]
    /// with the raw body preserved; parse failure → [`Error::Deserialization`].
    async fn parse_body<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::SessionExpired);
        }

        let body = resp.text().await?;

        if !status.is_success() {
            return Err(Error::Fetch {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
