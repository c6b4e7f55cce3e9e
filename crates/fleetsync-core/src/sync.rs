// ── Synchronizer facade ──
//
// Full lifecycle management for one operator session's fleet replica.
// Bootstraps a snapshot, attaches to the change feed, reconciles both
// into the ReplicaStore, and keeps the selection consistent -- all on a
// single event-loop task, so no two mutations ever interleave.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fleetsync_api::transport::TransportConfig;
use fleetsync_api::{
    ConsoleClient, DeviceRecord, Error as ApiError, FeedManager, FeedMessage, SecurityId,
};

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::model::Device;
use crate::replica::{FleetSnapshot, ReplicaStore};
use crate::selection::{SelectionCoordinator, SelectionState};
use crate::stream::StateStream;

const COMMAND_CHANNEL_SIZE: usize = 64;
const SNAPSHOT_CHANNEL_SIZE: usize = 4;

// ── ConnectionState ─────────────────────────────────────────────────

/// Feed connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnection budget exhausted; the replica is frozen at its last
    /// consistent state until an explicit refresh.
    Failed,
}

// ── Commands ────────────────────────────────────────────────────────

enum Command {
    Select {
        udid: String,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    ClearSelection {
        reply: oneshot::Sender<()>,
    },
    Refresh {
        reply: oneshot::Sender<Result<usize, CoreError>>,
    },
    Register {
        udid: String,
        reply: oneshot::Sender<Result<SecurityId, CoreError>>,
    },
    /// Internal follow-up: the registration call succeeded off-loop;
    /// adopt the device as the explicit selection on-loop.
    AdoptRegistered {
        udid: String,
        security_id: SecurityId,
        reply: oneshot::Sender<Result<SecurityId, CoreError>>,
    },
}

/// Result of a snapshot fetch, delivered back into the event loop so
/// the merge happens on the same task as every other mutation.
struct SnapshotOutcome {
    result: Result<Vec<DeviceRecord>, ApiError>,
    reply: Option<oneshot::Sender<Result<usize, CoreError>>>,
}

// ── Synchronizer ────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc`. One instance per operator session; two
/// sessions never share a replica.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<SynchronizerInner>,
}

struct SynchronizerInner {
    client: Arc<ConsoleClient>,
    command_tx: mpsc::Sender<Command>,
    connection_state: watch::Receiver<ConnectionState>,
    fleet: watch::Receiver<FleetSnapshot>,
    selection: watch::Receiver<SelectionState>,
    last_feed_event: watch::Receiver<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
}

impl Synchronizer {
    /// Build the replica machinery and spawn the event loop.
    ///
    /// The initial snapshot fetch and the first feed connection happen
    /// asynchronously after this returns; observe progress through
    /// [`connection_state`](Self::connection_state) and
    /// [`fleet`](Self::fleet).
    pub fn start(config: SyncConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            danger_accept_invalid_certs: config.danger_accept_invalid_certs,
            timeout: config.timeout,
        };
        let client = Arc::new(ConsoleClient::new(
            config.console_url.clone(),
            config.token.clone(),
            &transport,
        )?);

        let store = ReplicaStore::new();
        let coordinator = SelectionCoordinator::new();

        let fleet = store.watch_receiver();
        let selection = coordinator.watch_receiver();
        let (state_tx, connection_state) = watch::channel(ConnectionState::Connecting);
        let (last_event_tx, last_feed_event) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (snapshot_tx, snapshot_rx) = mpsc::channel(SNAPSHOT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        // Initial bootstrap snapshot, fetched off-loop, merged on-loop.
        spawn_snapshot_fetch(Arc::clone(&client), snapshot_tx.clone(), None);

        let event_loop = SyncLoop {
            config,
            client: Arc::clone(&client),
            store,
            coordinator,
            feed: FeedManager::new(),
            state: state_tx,
            last_feed_event: last_event_tx,
            command_tx: command_tx.clone(),
            command_rx,
            snapshot_tx,
            snapshot_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(event_loop.run());

        Ok(Self {
            inner: Arc::new(SynchronizerInner {
                client,
                command_tx,
                connection_state,
                fleet,
                selection,
                last_feed_event,
                cancel,
            }),
        })
    }

    // ── State observation ───────────────────────────────────────────

    /// Subscribe to replica snapshots.
    pub fn fleet(&self) -> StateStream<FleetSnapshot> {
        StateStream::new(self.inner.fleet.clone())
    }

    /// Subscribe to selection changes.
    pub fn selection(&self) -> StateStream<SelectionState> {
        StateStream::new(self.inner.selection.clone())
    }

    /// Subscribe to feed connection state changes.
    pub fn connection_state(&self) -> StateStream<ConnectionState> {
        StateStream::new(self.inner.connection_state.clone())
    }

    /// When the last feed event was applied, if any.
    pub fn last_feed_event(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_feed_event.borrow()
    }

    // ── Operator actions ────────────────────────────────────────────

    /// Explicitly select a device by udid.
    pub async fn select(&self, udid: impl Into<String>) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Select {
            udid: udid.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| CoreError::Disconnected)?
    }

    /// Explicitly deselect. Auto-selection will not override this until
    /// the fleet drains and refills.
    pub async fn clear_selection(&self) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ClearSelection { reply }).await?;
        rx.await.map_err(|_| CoreError::Disconnected)
    }

    /// Fetch a fresh snapshot and merge it (feed data still wins on
    /// conflict). Returns the replica size after the merge.
    pub async fn refresh(&self) -> Result<usize, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Refresh { reply }).await?;
        rx.await.map_err(|_| CoreError::Disconnected)?
    }

    /// Register a device to this session and adopt it as the explicit
    /// selection. Returns the security id minted by the console, which
    /// doubles as the device's session-scoped stream handle.
    pub async fn register_device(&self, udid: impl Into<String>) -> Result<SecurityId, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Register {
            udid: udid.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| CoreError::Disconnected)?
    }

    /// Release a device registration. Pure request/response; the replica
    /// picks up the resulting state change through the feed.
    pub async fn deregister_device(&self, udid: &str) -> Result<(), CoreError> {
        Ok(self.inner.client.deregister_device(udid).await?)
    }

    /// Ask the console whether the session token is still valid.
    pub async fn session_valid(&self) -> Result<bool, CoreError> {
        Ok(self.inner.client.verify_session().await?)
    }

    /// Stop the event loop and close the feed. Idempotent.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    async fn send(&self, cmd: Command) -> Result<(), CoreError> {
        self.inner
            .command_tx
            .send(cmd)
            .await
            .map_err(|_| CoreError::Disconnected)
    }
}

// ── Event loop ──────────────────────────────────────────────────────

struct SyncLoop {
    config: SyncConfig,
    client: Arc<ConsoleClient>,
    store: ReplicaStore,
    coordinator: SelectionCoordinator,
    feed: FeedManager,
    state: watch::Sender<ConnectionState>,
    last_feed_event: watch::Sender<Option<DateTime<Utc>>>,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    snapshot_tx: mpsc::Sender<SnapshotOutcome>,
    snapshot_rx: mpsc::Receiver<SnapshotOutcome>,
    cancel: CancellationToken,
}

impl SyncLoop {
    /// Main loop: connect feed → apply events → on drop, backoff →
    /// reconnect. All store and selection mutations happen here, one at
    /// a time.
    async fn run(mut self) {
        let mut feed_rx: Option<mpsc::Receiver<FeedMessage>> = None;
        let mut attempt: u32 = 0;
        // Fires immediately for the first connection attempt. Kept as a
        // select! arm so commands and snapshot merges keep flowing while
        // a backoff delay runs down.
        let mut reconnect_sleep = Box::pin(tokio::time::sleep(Duration::ZERO));
        let mut reconnect_armed = true;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,

                () = &mut reconnect_sleep, if reconnect_armed && feed_rx.is_none() => {
                    reconnect_armed = false;
                    match self.try_connect().await {
                        Ok(rx) => {
                            feed_rx = Some(rx);
                            attempt = 0;
                            let _ = self.state.send(ConnectionState::Connected);
                        }
                        Err(e) => {
                            warn!(error = %e, attempt, "feed connection failed");
                            if let Some(delay) = self.schedule_retry(&mut attempt) {
                                reconnect_sleep = Box::pin(tokio::time::sleep(delay));
                                reconnect_armed = true;
                            }
                        }
                    }
                }

                Some(outcome) = self.snapshot_rx.recv() => {
                    self.handle_snapshot(outcome);
                }

                msg = recv_feed(&mut feed_rx), if feed_rx.is_some() => {
                    match msg {
                        Some(FeedMessage::Event(event)) => {
                            let result = self.store.apply(&event);
                            self.coordinator.on_mutation(&result, &self.store);
                            let _ = self.last_feed_event.send(Some(Utc::now()));
                        }
                        Some(FeedMessage::Malformed { reason }) => {
                            warn!(reason, "malformed feed frame dropped");
                        }
                        Some(FeedMessage::Closed { reason }) => {
                            warn!(reason, "feed connection lost");
                            self.feed.close();
                            feed_rx = None;
                            if let Some(delay) = self.schedule_retry(&mut attempt) {
                                reconnect_sleep = Box::pin(tokio::time::sleep(delay));
                                reconnect_armed = true;
                            }
                        }
                        None => {
                            // Read task dropped the channel without a
                            // close message (cancelled mid-frame).
                            self.feed.close();
                            feed_rx = None;
                            if let Some(delay) = self.schedule_retry(&mut attempt) {
                                reconnect_sleep = Box::pin(tokio::time::sleep(delay));
                                reconnect_armed = true;
                            }
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle_command(cmd);
                }
            }
        }

        self.feed.close();
        let _ = self.state.send(ConnectionState::Disconnected);
        debug!("synchronizer loop exiting");
    }

    /// One feed connection attempt, bounded by the configured timeout so
    /// a stalled handshake cannot block the loop.
    async fn try_connect(&mut self) -> Result<mpsc::Receiver<FeedMessage>, ApiError> {
        let url = self.config.feed_url.clone();
        match tokio::time::timeout(self.config.timeout, self.feed.connect(&url)).await {
            Ok(result) => result,
            Err(_) => {
                self.feed.close();
                Err(ApiError::FeedConnect("handshake timed out".into()))
            }
        }
    }

    /// Compute the next reconnect delay, or give up when the budget is
    /// exhausted.
    fn schedule_retry(&self, attempt: &mut u32) -> Option<Duration> {
        if self.config.reconnect.exhausted(*attempt) {
            warn!(attempt, "feed reconnection budget exhausted, giving up");
            let _ = self.state.send(ConnectionState::Failed);
            return None;
        }
        let delay = self.config.reconnect.delay_for(*attempt);
        *attempt += 1;
        let _ = self
            .state
            .send(ConnectionState::Reconnecting { attempt: *attempt });
        info!(delay_ms = delay.as_millis() as u64, attempt = *attempt, "feed reconnect scheduled");
        Some(delay)
    }

    /// Merge a snapshot fetch outcome. A failed fetch leaves the store
    /// untouched -- no partial merge.
    fn handle_snapshot(&mut self, outcome: SnapshotOutcome) {
        match outcome.result {
            Ok(records) => {
                let devices: Vec<Device> = records.into_iter().map(Device::from).collect();
                info!(count = devices.len(), "merging fleet snapshot");
                let result = self.store.merge_snapshot(devices);
                self.coordinator.on_mutation(&result, &self.store);
                if let Some(reply) = outcome.reply {
                    let _ = reply.send(Ok(self.store.len()));
                }
            }
            Err(e) => {
                warn!(error = %e, "snapshot fetch failed, replica unchanged");
                if let Some(reply) = outcome.reply {
                    let _ = reply.send(Err(e.into()));
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Select { udid, reply } => {
                let _ = reply.send(self.coordinator.select(&udid, &self.store));
            }
            Command::ClearSelection { reply } => {
                self.coordinator.clear();
                let _ = reply.send(());
            }
            Command::Refresh { reply } => {
                spawn_snapshot_fetch(
                    Arc::clone(&self.client),
                    self.snapshot_tx.clone(),
                    Some(reply),
                );
            }
            Command::Register { udid, reply } => {
                // The HTTP call runs off-loop; the follow-up selection
                // comes back through the command channel.
                let client = Arc::clone(&self.client);
                let command_tx = self.command_tx.clone();
                tokio::spawn(async move {
                    match client.register_device(&udid).await {
                        Ok(security_id) => {
                            let _ = command_tx
                                .send(Command::AdoptRegistered { udid, security_id, reply })
                                .await;
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e.into()));
                        }
                    }
                });
            }
            Command::AdoptRegistered { udid, security_id, reply } => {
                debug!(udid, security_id, "device registered, adopting selection");
                // The feed may not have delivered the registered device
                // yet; the selection is best-effort, the registration
                // itself stands either way.
                if let Err(e) = self.coordinator.select(&udid, &self.store) {
                    debug!(error = %e, "registered device not yet in replica");
                }
                let _ = reply.send(Ok(security_id));
            }
        }
    }
}

/// Receive from an optional feed channel. Pending when detached so the
/// guarded `select!` arm never fires spuriously.
async fn recv_feed(rx: &mut Option<mpsc::Receiver<FeedMessage>>) -> Option<FeedMessage> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Fetch a snapshot off-loop and deliver the outcome back to the loop.
fn spawn_snapshot_fetch(
    client: Arc<ConsoleClient>,
    tx: mpsc::Sender<SnapshotOutcome>,
    reply: Option<oneshot::Sender<Result<usize, CoreError>>>,
) {
    tokio::spawn(async move {
        let result = client.load_snapshot().await;
        let _ = tx.send(SnapshotOutcome { result, reply }).await;
    });
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsync_api::ReconnectPolicy;
    use futures_util::SinkExt;
    use secrecy::SecretString;
    use serde_json::json;
    use tokio_tungstenite::tungstenite::Message;
    use url::Url;

    /// Unreachable console and feed, with a reconnect budget small
    /// enough that the loop gives up within the test.
    fn offline_config() -> SyncConfig {
        let mut config = SyncConfig::new(
            Url::parse("http://127.0.0.1:9/api/v1").expect("static url"),
            Url::parse("ws://127.0.0.1:9/ws").expect("static url"),
            SecretString::from("test-token"),
        );
        config.timeout = Duration::from_millis(250);
        config.reconnect = ReconnectPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            max_retries: Some(2),
        };
        config
    }

    /// One-shot WebSocket feed: accepts a single connection and pushes
    /// the given frames. Returns the bound address.
    async fn spawn_feed_server(frames: Vec<String>) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("handshake");
            for frame in frames {
                ws.send(Message::text(frame)).await.expect("send frame");
            }
            // Hold the connection open; dropping it here would race the
            // assertions with a reconnect cycle.
            std::future::pending::<()>().await;
        });

        addr
    }

    #[tokio::test]
    async fn feed_event_flows_into_replica_and_selection() {
        let frame = json!({
            "operationType": "insert",
            "documentKey": { "id": "65f0aa11" },
            "fullDocument": { "id": "65f0aa11", "udid": "u-feed", "model": "Galaxy S7" }
        });
        let addr = spawn_feed_server(vec![frame.to_string()]).await;

        let mut config = offline_config();
        config.feed_url = Url::parse(&format!("ws://{addr}/ws")).expect("feed url");
        let sync = Synchronizer::start(config).expect("start");

        // The loop applies the event, derives the selection, and stamps
        // the event time, in that order; poll until all three landed.
        let deadline = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let fleet = sync.fleet().latest();
                if fleet.iter().any(|d| d.udid == "u-feed")
                    && sync.selection().latest().selected_key.as_deref() == Some("u-feed")
                    && sync.last_feed_event().is_some()
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(deadline.is_ok(), "feed event never reached the replica");

        let fleet = sync.fleet().latest();
        assert_eq!(fleet.len(), 1);
        assert_eq!(fleet[0].model.as_deref(), Some("Galaxy S7"));
        let selected = sync.selection().latest().selected_body.expect("body");
        assert_eq!(selected.udid, "u-feed");

        sync.shutdown();
    }

    #[tokio::test]
    async fn feed_delete_drains_replica_and_clears_selection() {
        let insert = json!({
            "operationType": "insert",
            "documentKey": { "id": "65f0aa11" },
            "fullDocument": { "id": "65f0aa11", "udid": "u-feed", "model": "Galaxy S7" }
        });
        let delete = json!({
            "operationType": "delete",
            "documentKey": { "id": "65f0aa11" }
        });
        let addr = spawn_feed_server(vec![insert.to_string(), delete.to_string()]).await;

        let mut config = offline_config();
        config.feed_url = Url::parse(&format!("ws://{addr}/ws")).expect("feed url");
        let sync = Synchronizer::start(config).expect("start");

        let deadline = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if sync.last_feed_event().is_some() && sync.fleet().latest().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(deadline.is_ok(), "delete never reached the replica");
        assert!(sync.selection().latest().is_empty());

        sync.shutdown();
    }

    #[tokio::test]
    async fn select_on_empty_replica_is_invalid() {
        let sync = Synchronizer::start(offline_config()).expect("start");

        let err = sync.select("no-such-udid").await.expect_err("empty store");
        assert!(matches!(err, CoreError::InvalidSelection { udid } if udid == "no-such-udid"));

        sync.shutdown();
    }

    #[tokio::test]
    async fn refresh_against_unreachable_console_fails() {
        let sync = Synchronizer::start(offline_config()).expect("start");

        let err = sync.refresh().await.expect_err("console unreachable");
        assert!(matches!(err, CoreError::ConnectionFailed { .. }));

        sync.shutdown();
    }

    #[tokio::test]
    async fn reconnect_budget_exhaustion_reaches_failed() {
        let sync = Synchronizer::start(offline_config()).expect("start");

        let mut states = sync.connection_state();
        let deadline = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match states.changed().await {
                    Some(ConnectionState::Failed) | None => break,
                    Some(_) => {}
                }
            }
        })
        .await;
        assert!(deadline.is_ok(), "loop never gave up reconnecting");

        sync.shutdown();
    }

    #[tokio::test]
    async fn shutdown_publishes_disconnected() {
        let sync = Synchronizer::start(offline_config()).expect("start");
        let mut states = sync.connection_state();

        sync.shutdown();

        let deadline = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match states.changed().await {
                    Some(ConnectionState::Disconnected) | None => break,
                    Some(_) => {}
                }
            }
        })
        .await;
        assert!(deadline.is_ok(), "loop never published disconnect");
    }

    #[tokio::test]
    async fn clear_selection_is_accepted_when_idle() {
        let sync = Synchronizer::start(offline_config()).expect("start");

        sync.clear_selection().await.expect("clear");
        assert!(sync.selection().latest().is_empty());

        sync.shutdown();
    }
}
