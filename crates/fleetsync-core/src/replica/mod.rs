// ── Fleet replica store ──
//
// Insertion-ordered, udid-keyed storage for the local fleet replica.
// Owned exclusively by the synchronizer event loop: every mutation
// happens on that one task, so the store needs no interior locking.
// Consumers observe it through `watch`-channel snapshots.

use std::sync::Arc;

use tokio::sync::watch;

use fleetsync_api::{ChangeEvent, OperationType};

use crate::model::Device;
use crate::stream::StateStream;

/// Read-only snapshot type handed to consumers.
pub type FleetSnapshot = Arc<Vec<Arc<Device>>>;

// ── MutationResult ──────────────────────────────────────────────────

/// What a single mutation did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Inserted,
    Updated,
    Removed,
    /// Duplicate insert, unmatched delete -- nothing changed.
    Unchanged,
    SnapshotMerged,
}

/// Returned by every mutation so the selection coordinator can react
/// without re-scanning the whole store.
#[derive(Debug, Clone)]
pub struct MutationResult {
    pub kind: MutationKind,
    pub affected_udid: Option<String>,
}

impl MutationResult {
    fn new(kind: MutationKind, affected_udid: Option<String>) -> Self {
        Self { kind, affected_udid }
    }

    pub fn changed_store(&self) -> bool {
        self.kind != MutationKind::Unchanged
    }
}

// ── ReplicaStore ────────────────────────────────────────────────────

/// The ordered, duplicate-free local copy of the fleet.
///
/// Ordering is meaningful: snapshot entries keep server order, feed
/// inserts append at the tail, updates replace in place. Among live
/// entries `udid` is unique; `id` is unique when present.
pub struct ReplicaStore {
    entries: Vec<Arc<Device>>,
    snapshot: watch::Sender<FleetSnapshot>,
}

impl ReplicaStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            entries: Vec::new(),
            snapshot,
        }
    }

    // ── Snapshot merge ──────────────────────────────────────────────

    /// Merge a freshly fetched fleet listing.
    ///
    /// An empty store takes the listing wholesale, in server order.
    /// Otherwise the feed has already been mutating the replica and is
    /// strictly newer than a concurrently-run snapshot fetch, so the
    /// merge is append-only by `udid`: unknown entries are added at the
    /// tail, known entries keep the feed's version. This is what makes
    /// the snapshot-vs-feed race order-independent -- a late snapshot
    /// response can never regress the store to stale field values.
    pub fn merge_snapshot(&mut self, devices: Vec<Device>) -> MutationResult {
        if self.entries.is_empty() {
            self.entries = devices.into_iter().map(Arc::new).collect();
        } else {
            for device in devices {
                if self.position_by_udid(&device.udid).is_none() {
                    self.entries.push(Arc::new(device));
                }
            }
        }

        self.publish();
        MutationResult::new(MutationKind::SnapshotMerged, None)
    }

    // ── Feed event application ──────────────────────────────────────

    /// Apply one feed event, in delivery order.
    pub fn apply(&mut self, event: &ChangeEvent) -> MutationResult {
        match event.operation_type {
            OperationType::Insert => self.apply_insert(event),
            OperationType::Update => self.apply_update(event),
            OperationType::Delete => self.apply_delete(&event.document_key.id),
        }
    }

    /// Insert correlates by store id. Re-delivery of an insert the
    /// replica already holds (feed redelivers on reconnect) is a no-op.
    fn apply_insert(&mut self, event: &ChangeEvent) -> MutationResult {
        let Some(mut device) = document_device(event) else {
            return MutationResult::new(MutationKind::Unchanged, None);
        };
        if device.id.is_none() {
            device.id = Some(event.document_key.id.clone());
        }

        if self.position_by_id(&event.document_key.id).is_some() {
            tracing::debug!(id = %event.document_key.id, "duplicate insert ignored");
            return MutationResult::new(MutationKind::Unchanged, None);
        }

        // Same udid under a new id: replace in place rather than append,
        // keeping udid unique among live entries.
        let udid = device.udid.clone();
        if let Some(pos) = self.position_by_udid(&udid) {
            self.entries[pos] = Arc::new(device);
            self.publish();
            return MutationResult::new(MutationKind::Updated, Some(udid));
        }

        self.entries.push(Arc::new(device));
        self.publish();
        MutationResult::new(MutationKind::Inserted, Some(udid))
    }

    /// Update correlates by udid and replaces in place, preserving the
    /// entry's position. An update for a udid the replica has not seen
    /// (feed won the race against the snapshot) is treated as an insert.
    fn apply_update(&mut self, event: &ChangeEvent) -> MutationResult {
        let Some(mut device) = document_device(event) else {
            return MutationResult::new(MutationKind::Unchanged, None);
        };

        let udid = device.udid.clone();
        match self.position_by_udid(&udid) {
            Some(pos) => {
                // Keep the known store id if the payload omitted it,
                // falling back to the documentKey.
                if device.id.is_none() {
                    device.id = self.entries[pos]
                        .id
                        .clone()
                        .or_else(|| Some(event.document_key.id.clone()));
                }
                self.entries[pos] = Arc::new(device);
                self.publish();
                MutationResult::new(MutationKind::Updated, Some(udid))
            }
            None => {
                if device.id.is_none() {
                    device.id = Some(event.document_key.id.clone());
                }

                // Same id under a new udid: the entry's udid changed
                // upstream. Replace in place rather than append, keeping
                // id unique among live entries.
                if let Some(pos) = self.position_by_id(&event.document_key.id) {
                    tracing::debug!(udid, id = %event.document_key.id, "update renamed an entry's udid");
                    self.entries[pos] = Arc::new(device);
                    self.publish();
                    return MutationResult::new(MutationKind::Updated, Some(udid));
                }

                tracing::debug!(udid, "update for unknown udid, treating as insert");
                self.entries.push(Arc::new(device));
                self.publish();
                MutationResult::new(MutationKind::Inserted, Some(udid))
            }
        }
    }

    /// Delete correlates by store id. A miss means the entry was already
    /// removed or never materialized -- not an error.
    fn apply_delete(&mut self, id: &str) -> MutationResult {
        match self.position_by_id(id) {
            Some(pos) => {
                let removed = self.entries.remove(pos);
                self.publish();
                MutationResult::new(MutationKind::Removed, Some(removed.udid.clone()))
            }
            None => {
                tracing::debug!(id, "delete for unknown id, ignoring");
                MutationResult::new(MutationKind::Unchanged, None)
            }
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// All live entries, in replica order.
    pub fn list(&self) -> Vec<Arc<Device>> {
        self.entries.clone()
    }

    pub fn get(&self, udid: &str) -> Option<Arc<Device>> {
        self.position_by_udid(udid).map(|pos| Arc::clone(&self.entries[pos]))
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<Device>> {
        self.position_by_id(id).map(|pos| Arc::clone(&self.entries[pos]))
    }

    pub fn first(&self) -> Option<Arc<Device>> {
        self.entries.first().map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribe to replica snapshots.
    pub fn subscribe(&self) -> StateStream<FleetSnapshot> {
        StateStream::new(self.snapshot.subscribe())
    }

    pub(crate) fn watch_receiver(&self) -> watch::Receiver<FleetSnapshot> {
        self.snapshot.subscribe()
    }

    // ── Private helpers ─────────────────────────────────────────────

    fn position_by_udid(&self, udid: &str) -> Option<usize> {
        self.entries.iter().position(|d| d.udid == udid)
    }

    fn position_by_id(&self, id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|d| d.id.as_deref() == Some(id))
    }

    /// Broadcast the current contents to subscribers.
    /// `send_modify` updates unconditionally, even with zero receivers.
    fn publish(&self) {
        let snap: Vec<Arc<Device>> = self.entries.clone();
        self.snapshot.send_modify(|s| *s = Arc::new(snap));
    }
}

impl Default for ReplicaStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert an event payload into the domain device, if one is present.
fn document_device(event: &ChangeEvent) -> Option<Device> {
    event.full_document.clone().map(Device::from)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fleetsync_api::decode_event;
    use serde_json::json;

    fn snapshot_device(udid: &str, model: &str) -> Device {
        let mut d = Device::with_udid(udid);
        d.model = Some(model.into());
        d
    }

    fn event(op: &str, id: &str, udid: Option<(&str, &str)>) -> ChangeEvent {
        let mut frame = json!({
            "operationType": op,
            "documentKey": { "id": id },
        });
        if let Some((udid, model)) = udid {
            frame["fullDocument"] = json!({ "id": id, "udid": udid, "model": model });
        }
        decode_event(&frame.to_string()).unwrap()
    }

    fn insert(id: &str, udid: &str, model: &str) -> ChangeEvent {
        event("insert", id, Some((udid, model)))
    }

    fn update(id: &str, udid: &str, model: &str) -> ChangeEvent {
        event("update", id, Some((udid, model)))
    }

    fn delete(id: &str) -> ChangeEvent {
        event("delete", id, None)
    }

    fn udids(store: &ReplicaStore) -> Vec<String> {
        store.list().iter().map(|d| d.udid.clone()).collect()
    }

    // ── Basic application ───────────────────────────────────────────

    #[test]
    fn insert_appends_at_tail() {
        let mut store = ReplicaStore::new();
        store.merge_snapshot(vec![snapshot_device("u1", "X")]);

        let result = store.apply(&insert("1", "u2", "Y"));
        assert_eq!(result.kind, MutationKind::Inserted);
        assert_eq!(result.affected_udid.as_deref(), Some("u2"));
        assert_eq!(udids(&store), vec!["u1", "u2"]);
    }

    #[test]
    fn update_replaces_in_place() {
        let mut store = ReplicaStore::new();
        store.apply(&insert("1", "u1", "X"));
        store.apply(&insert("2", "u2", "Y"));

        let result = store.apply(&update("1", "u1", "X2"));
        assert_eq!(result.kind, MutationKind::Updated);
        // Position preserved
        assert_eq!(udids(&store), vec!["u1", "u2"]);
        assert_eq!(store.get("u1").unwrap().model.as_deref(), Some("X2"));
    }

    #[test]
    fn unmatched_update_becomes_insert() {
        let mut store = ReplicaStore::new();
        let result = store.apply(&update("1", "u1", "X"));
        assert_eq!(result.kind, MutationKind::Inserted);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_with_live_id_under_new_udid_replaces_the_entry() {
        let mut store = ReplicaStore::new();
        store.apply(&insert("1", "u1", "X"));

        // Unknown udid, but documentKey.id matches the live entry.
        let result = store.apply(&update("1", "u2", "Y"));
        assert_eq!(result.kind, MutationKind::Updated);
        assert_eq!(result.affected_udid.as_deref(), Some("u2"));

        // One entry, id stays unique, old udid is gone.
        assert_eq!(store.len(), 1);
        assert!(store.get("u1").is_none());
        let device = store.get_by_id("1").unwrap();
        assert_eq!(device.udid, "u2");
        assert_eq!(device.model.as_deref(), Some("Y"));
    }

    #[test]
    fn delete_removes_by_id() {
        let mut store = ReplicaStore::new();
        store.apply(&insert("1", "u1", "X"));

        let result = store.apply(&delete("1"));
        assert_eq!(result.kind, MutationKind::Removed);
        assert_eq!(result.affected_udid.as_deref(), Some("u1"));
        assert!(store.is_empty());
    }

    #[test]
    fn unmatched_delete_is_noop() {
        let mut store = ReplicaStore::new();
        store.apply(&insert("1", "u1", "X"));

        let result = store.apply(&delete("2"));
        assert_eq!(result.kind, MutationKind::Unchanged);
        assert_eq!(store.len(), 1);
    }

    // ── P1: udid uniqueness ─────────────────────────────────────────

    #[test]
    fn udid_stays_unique_across_event_sequences() {
        let mut store = ReplicaStore::new();
        store.merge_snapshot(vec![snapshot_device("u1", "X")]);
        store.apply(&insert("1", "u1", "Y")); // same udid, new id
        store.apply(&update("1", "u1", "Z"));
        store.apply(&insert("2", "u2", "W"));
        store.merge_snapshot(vec![snapshot_device("u1", "old"), snapshot_device("u2", "old")]);

        assert_eq!(udids(&store), vec!["u1", "u2"]);
    }

    // ── P4: idempotent duplicate insert ─────────────────────────────

    #[test]
    fn duplicate_insert_is_idempotent() {
        let mut store = ReplicaStore::new();
        let ev = insert("1", "u1", "X");

        store.apply(&ev);
        let once = store.list();

        let result = store.apply(&ev);
        assert_eq!(result.kind, MutationKind::Unchanged);
        assert_eq!(store.list(), once);
    }

    // ── P5: snapshot race invariance ────────────────────────────────

    #[test]
    fn late_snapshot_never_reverts_feed_data() {
        let mut store = ReplicaStore::new();
        store.apply(&insert("1", "u1", "feed-version"));
        store.apply(&insert("2", "u2", "feed-only"));

        store.merge_snapshot(vec![
            snapshot_device("u1", "stale-snapshot"),
            snapshot_device("u3", "snapshot-only"),
        ]);

        // Feed's u1 wins; snapshot's unseen u3 appends; u2 untouched.
        assert_eq!(store.get("u1").unwrap().model.as_deref(), Some("feed-version"));
        assert_eq!(udids(&store), vec!["u1", "u2", "u3"]);
    }

    // ── P6: ordering across a delete ────────────────────────────────

    #[test]
    fn reinsert_after_delete_keeps_second_fields() {
        let mut store = ReplicaStore::new();
        store.apply(&insert("1", "uA", "first"));
        store.apply(&delete("1"));
        store.apply(&insert("2", "uA", "second"));

        let device = store.get("uA").unwrap();
        assert_eq!(device.model.as_deref(), Some("second"));
        assert_eq!(store.len(), 1);
    }

    // ── Mixed-source sequences ──────────────────────────────────────

    #[test]
    fn snapshot_then_feed_update() {
        let mut store = ReplicaStore::new();
        store.merge_snapshot(vec![snapshot_device("u1", "X")]);

        store.apply(&update("1", "u1", "Y"));

        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].udid, "u1");
        assert_eq!(listed[0].model.as_deref(), Some("Y"));
    }

    #[test]
    fn empty_snapshot_then_insert_and_delete() {
        let mut store = ReplicaStore::new();
        store.merge_snapshot(Vec::new());

        store.apply(&insert("1", "u2", "X"));
        assert_eq!(udids(&store), vec!["u2"]);

        store.apply(&delete("1"));
        assert!(store.is_empty());
    }

    // ── Snapshot ordering / subscription ────────────────────────────

    #[test]
    fn empty_store_takes_snapshot_in_server_order() {
        let mut store = ReplicaStore::new();
        store.merge_snapshot(vec![
            snapshot_device("u3", "C"),
            snapshot_device("u1", "A"),
            snapshot_device("u2", "B"),
        ]);
        assert_eq!(udids(&store), vec!["u3", "u1", "u2"]);
    }

    #[test]
    fn subscribers_see_mutations() {
        let mut store = ReplicaStore::new();
        let stream = store.subscribe();
        assert!(stream.current().is_empty());

        store.apply(&insert("1", "u1", "X"));
        let latest = stream.latest();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].udid, "u1");
    }

    #[test]
    fn update_without_payload_id_keeps_store_id() {
        let mut store = ReplicaStore::new();
        store.apply(&insert("1", "u1", "X"));

        // Payload omits `id`; documentKey carries it but the udid match
        // must not lose the already-known store id either way.
        let frame = json!({
            "operationType": "update",
            "documentKey": { "id": "1" },
            "fullDocument": { "udid": "u1", "model": "Y" }
        });
        store.apply(&decode_event(&frame.to_string()).unwrap());

        let device = store.get("u1").unwrap();
        assert_eq!(device.id.as_deref(), Some("1"));
        assert_eq!(device.model.as_deref(), Some("Y"));
    }
}
