//! Change-feed WebSocket connection manager.
//!
//! [`FeedManager`] owns at most one live connection to the console's
//! feed endpoint and delivers parsed [`ChangeEvent`]s to a single
//! consumer through an `mpsc` channel -- fan-out to multiple subscribers
//! is deliberately not provided, matching the one-replica-per-process
//! design of the synchronizer that owns this manager.
//!
//! Reconnection is *not* handled here. On transport failure the read
//! task emits [`FeedMessage::Closed`] and the manager transitions to
//! disconnected; the owner re-invokes [`connect`](FeedManager::connect)
//! after a delay of its choosing. [`ReconnectPolicy`] provides the
//! capped-exponential-with-jitter default the synchronizer uses, kept
//! separate from transport mechanics so it is testable on its own.
//!
//! # Example
//!
//! ```rust,ignore
//! use fleetsync_api::feed::{FeedManager, FeedMessage};
//! use url::Url;
//!
//! let mut feed = FeedManager::new();
//! let mut rx = feed.connect(&Url::parse("wss://console.lab/ws")?).await?;
//!
//! while let Some(msg) = rx.recv().await {
//!     match msg {
//!         FeedMessage::Event(event) => apply(event),
//!         FeedMessage::Malformed { reason } => tracing::warn!(reason),
//!         FeedMessage::Closed { reason } => break,
//!     }
//! }
//! feed.close();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::event::{ChangeEvent, decode_event};

const FEED_CHANNEL_CAPACITY: usize = 256;

// ── FeedMessage ─────────────────────────────────────────────────────

/// What the read task hands to the single registered consumer.
#[derive(Debug)]
pub enum FeedMessage {
    /// A parsed, validated feed event, in delivery order.
    Event(ChangeEvent),

    /// A frame that failed codec validation. The frame is dropped; the
    /// connection stays open.
    Malformed { reason: String },

    /// The connection is gone (close frame, stream end, or transport
    /// error). Always the final message for a given connection; after an
    /// explicit [`FeedManager::close`] not even this is delivered.
    Closed { reason: String },
}

// ── ReconnectPolicy ─────────────────────────────────────────────────

/// Capped exponential backoff for feed reconnection.
///
/// Owned by the caller of [`FeedManager::connect`], never applied
/// inside the manager itself.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt number `attempt` (0-based).
    ///
    /// `delay = min(initial * 2^attempt, max) + jitter`
    ///
    /// Jitter is +-25%, deterministically seeded from the attempt number.
    /// Not cryptographically random, but enough to spread reconnection
    /// storms from multiple operator sessions.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(63) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        Duration::from_secs_f64((capped * jitter_factor).max(0.0))
    }

    /// Whether attempt number `attempt` exceeds the retry budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries.is_some_and(|max| attempt >= max)
    }
}

// ── FeedManager ─────────────────────────────────────────────────────

struct ActiveFeed {
    cancel: CancellationToken,
    live: Arc<AtomicBool>,
}

/// Owns the single change-feed connection.
///
/// `&mut self` throughout: the manager is owned by one synchronizer and
/// driven from its event loop, so there is no shared mutable state to
/// guard.
pub struct FeedManager {
    active: Option<ActiveFeed>,
}

impl FeedManager {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Open the feed connection and spawn the read task.
    ///
    /// Returns the consumer end of the event channel. While a connection
    /// is live a second call fails with [`Error::AlreadyConnected`] and
    /// leaves the existing connection untouched -- the manager never
    /// holds two connections, which is what keeps event delivery
    /// duplicate-free on the transport side.
    pub async fn connect(&mut self, url: &Url) -> Result<mpsc::Receiver<FeedMessage>, Error> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        tracing::info!(url = %url, "connecting to change feed");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::FeedConnect(e.to_string()))?;

        tracing::info!("change feed connected");

        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let live = Arc::new(AtomicBool::new(true));

        let task_cancel = cancel.clone();
        let task_live = Arc::clone(&live);
        tokio::spawn(async move {
            read_loop(ws_stream, tx, task_cancel).await;
            task_live.store(false, Ordering::Release);
        });

        self.active = Some(ActiveFeed { cancel, live });
        Ok(rx)
    }

    /// Tear down the connection.
    ///
    /// Idempotent and safe when already closed. After this returns no
    /// further messages are produced; frames already buffered in the
    /// consumer channel remain drainable.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.live.store(false, Ordering::Release);
            tracing::debug!("change feed closed");
        }
    }

    /// Whether a connection is currently live. Flips to `false` on its
    /// own when the read task observes a transport failure.
    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.live.load(Ordering::Acquire) && !a.cancel.is_cancelled())
    }
}

impl Default for FeedManager {
    fn default() -> Self {
        Self::new()
    }
}

// ── Read task ───────────────────────────────────────────────────────

/// Read frames until the connection drops or the manager cancels.
///
/// Every text frame goes through the codec before it reaches the
/// consumer; malformed frames are reported but never fatal. The
/// cancellation check is `biased` so a `close()` racing an inbound
/// frame wins -- no message is delivered after cancellation.
async fn read_loop(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    tx: mpsc::Sender<FeedMessage>,
    cancel: CancellationToken,
) {
    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            frame = read.next() => {
                let outcome = match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match decode_event(&text) {
                            Ok(event) => FeedMessage::Event(event),
                            Err(e) => {
                                tracing::warn!(error = %e, "dropping malformed feed frame");
                                FeedMessage::Malformed { reason: e.to_string() }
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pings automatically
                        tracing::trace!("feed ping");
                        continue;
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "close frame (no payload)".to_owned(),
                            |cf| format!("close frame (code {}): {}", cf.code, cf.reason),
                        );
                        tracing::info!(reason, "feed close frame received");
                        deliver(&tx, &cancel, FeedMessage::Closed { reason }).await;
                        return;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "feed transport error");
                        deliver(&tx, &cancel, FeedMessage::Closed { reason: e.to_string() }).await;
                        return;
                    }
                    None => {
                        tracing::info!("feed stream ended");
                        deliver(&tx, &cancel, FeedMessage::Closed {
                            reason: "stream ended".to_owned(),
                        }).await;
                        return;
                    }
                    _ => continue, // Binary, Pong, Frame
                };

                if !deliver(&tx, &cancel, outcome).await {
                    return;
                }
            }
        }
    }
}

/// Send unless the manager has been closed or the consumer is gone.
/// Returns `false` when delivery is no longer possible.
async fn deliver(
    tx: &mpsc::Sender<FeedMessage>,
    cancel: &CancellationToken,
    msg: FeedMessage,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tx.send(msg).await.is_ok()
}

// ── Tests ───────────────────────────────────────────────────────────
