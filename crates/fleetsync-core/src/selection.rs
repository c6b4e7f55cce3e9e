// ── Selection coordination ──
//
// Keeps "currently selected device" consistent while the replica
// mutates underneath it. Driven synchronously from the synchronizer
// event loop, right after each store mutation.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::CoreError;
use crate::model::Device;
use crate::replica::{MutationKind, MutationResult, ReplicaStore};
use crate::stream::StateStream;

/// The device an operator session is focused on.
///
/// Invariant: `selected_key` is `None` or a udid currently present in
/// the replica -- never a dangling reference. `selected_body` always
/// matches the store's version of that device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
    pub selected_key: Option<String>,
    pub selected_body: Option<Arc<Device>>,
}

impl SelectionState {
    pub fn is_empty(&self) -> bool {
        self.selected_key.is_none()
    }
}

/// Derives and maintains the selection as the replica mutates.
///
/// Auto-selection is edge-triggered: it fires once when the store goes
/// from empty to non-empty, then stays disarmed until the store drains
/// again. Re-evaluating on every mutation would override an operator's
/// explicit deselection.
pub struct SelectionCoordinator {
    state: watch::Sender<SelectionState>,
    auto_select_armed: bool,
}

impl SelectionCoordinator {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SelectionState::default());
        Self {
            state,
            auto_select_armed: true,
        }
    }

    /// React to a store mutation.
    ///
    /// Called synchronously after every `merge_snapshot`/`apply`, with
    /// the store already reflecting the mutation.
    pub fn on_mutation(&mut self, result: &MutationResult, store: &ReplicaStore) {
        let current = self.state.borrow().clone();

        match result.kind {
            MutationKind::Removed => {
                if current.selected_key.is_some()
                    && current.selected_key == result.affected_udid
                {
                    tracing::debug!(
                        udid = result.affected_udid.as_deref(),
                        "selected device removed, clearing selection"
                    );
                    self.publish(SelectionState::default());
                }
            }
            MutationKind::Updated => {
                // Keep the selected body in lockstep with the store.
                if let Some(key) = &current.selected_key {
                    match store.get(key) {
                        Some(_) if result.affected_udid.as_deref() == Some(key.as_str()) => {
                            let body = store.get(key);
                            self.publish(SelectionState {
                                selected_key: current.selected_key.clone(),
                                selected_body: body,
                            });
                        }
                        Some(_) => {}
                        None => {
                            // The selected entry's udid changed upstream;
                            // the old key no longer resolves.
                            tracing::debug!(udid = %key, "selected device renamed, clearing selection");
                            self.publish(SelectionState::default());
                        }
                    }
                }
            }
            MutationKind::Inserted | MutationKind::SnapshotMerged | MutationKind::Unchanged => {}
        }

        if self.auto_select_armed && !store.is_empty() {
            self.auto_select_armed = false;
            if self.state.borrow().is_empty() {
                if let Some(first) = store.first() {
                    tracing::debug!(udid = %first.udid, "auto-selecting first device");
                    self.publish(SelectionState {
                        selected_key: Some(first.udid.clone()),
                        selected_body: Some(first),
                    });
                }
            }
        }

        // Re-arm once the fleet drains so the next arrival is selected.
        if store.is_empty() {
            self.auto_select_armed = true;
        }
    }

    /// Explicit operator selection. Overrides auto-selection, but never
    /// accepts a udid the replica does not hold.
    pub fn select(&mut self, udid: &str, store: &ReplicaStore) -> Result<(), CoreError> {
        let device = store.get(udid).ok_or_else(|| CoreError::InvalidSelection {
            udid: udid.to_owned(),
        })?;

        self.auto_select_armed = false;
        self.publish(SelectionState {
            selected_key: Some(device.udid.clone()),
            selected_body: Some(device),
        });
        Ok(())
    }

    /// Explicit deselection. Auto-select does not re-fire until the
    /// store drains and refills.
    pub fn clear(&mut self) {
        self.publish(SelectionState::default());
    }

    pub fn current(&self) -> SelectionState {
        self.state.borrow().clone()
    }

    /// Subscribe to selection changes.
    pub fn subscribe(&self) -> StateStream<SelectionState> {
        StateStream::new(self.state.subscribe())
    }

    pub(crate) fn watch_receiver(&self) -> watch::Receiver<SelectionState> {
        self.state.subscribe()
    }

    fn publish(&self, next: SelectionState) {
        self.state.send_modify(|s| *s = next);
    }
}

impl Default for SelectionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fleetsync_api::decode_event;
    use serde_json::json;

    fn apply(
        store: &mut ReplicaStore,
        coordinator: &mut SelectionCoordinator,
        frame: serde_json::Value,
    ) {
        let event = decode_event(&frame.to_string()).unwrap();
        let result = store.apply(&event);
        coordinator.on_mutation(&result, store);
    }

    fn insert(store: &mut ReplicaStore, c: &mut SelectionCoordinator, id: &str, udid: &str) {
        apply(
            store,
            c,
            json!({
                "operationType": "insert",
                "documentKey": { "id": id },
                "fullDocument": { "id": id, "udid": udid, "model": "M" }
            }),
        );
    }

    fn delete(store: &mut ReplicaStore, c: &mut SelectionCoordinator, id: &str) {
        apply(
            store,
            c,
            json!({
                "operationType": "delete",
                "documentKey": { "id": id }
            }),
        );
    }

    // ── Auto-selection ──────────────────────────────────────────────

    #[test]
    fn auto_selects_first_device_on_empty_to_nonempty() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        insert(&mut store, &mut coordinator, "1", "u2");

        let state = coordinator.current();
        assert_eq!(state.selected_key.as_deref(), Some("u2"));
        assert_eq!(state.selected_body.unwrap().udid, "u2");
    }

    #[test]
    fn auto_select_fires_on_snapshot_merge() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        let mut d1 = crate::model::Device::with_udid("u1");
        d1.model = Some("X".into());
        let result = store.merge_snapshot(vec![d1]);
        coordinator.on_mutation(&result, &store);

        assert_eq!(coordinator.current().selected_key.as_deref(), Some("u1"));
    }

    #[test]
    fn auto_select_does_not_override_deselection() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        insert(&mut store, &mut coordinator, "1", "u1");
        coordinator.clear();

        // Unrelated mutation while deselected: selection must stay empty.
        insert(&mut store, &mut coordinator, "2", "u2");
        assert!(coordinator.current().is_empty());
    }

    #[test]
    fn auto_select_rearms_after_store_drains() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        insert(&mut store, &mut coordinator, "1", "u1");
        delete(&mut store, &mut coordinator, "1");
        assert!(coordinator.current().is_empty());

        insert(&mut store, &mut coordinator, "2", "u2");
        assert_eq!(coordinator.current().selected_key.as_deref(), Some("u2"));
    }

    // ── P3: delete clears selection ─────────────────────────────────

    #[test]
    fn deleting_selected_device_clears_selection() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        insert(&mut store, &mut coordinator, "1", "u2");
        assert_eq!(coordinator.current().selected_key.as_deref(), Some("u2"));

        delete(&mut store, &mut coordinator, "1");
        let state = coordinator.current();
        assert!(state.selected_key.is_none());
        assert!(state.selected_body.is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn deleting_unselected_device_keeps_selection() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        insert(&mut store, &mut coordinator, "1", "u1");
        insert(&mut store, &mut coordinator, "2", "u2");

        delete(&mut store, &mut coordinator, "2");
        assert_eq!(coordinator.current().selected_key.as_deref(), Some("u1"));
    }

    // ── P2: selection validity ──────────────────────────────────────

    #[test]
    fn selection_always_references_live_device() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        insert(&mut store, &mut coordinator, "1", "u1");
        insert(&mut store, &mut coordinator, "2", "u2");
        coordinator.select("u2", &store).unwrap();
        delete(&mut store, &mut coordinator, "1");
        delete(&mut store, &mut coordinator, "2");
        insert(&mut store, &mut coordinator, "3", "u3");

        let state = coordinator.current();
        if let Some(key) = &state.selected_key {
            assert!(store.get(key).is_some(), "dangling selection {key}");
        }
    }

    #[test]
    fn renaming_selected_device_clears_selection() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        insert(&mut store, &mut coordinator, "1", "u1");
        assert_eq!(coordinator.current().selected_key.as_deref(), Some("u1"));

        // Update matching the live id but carrying a new udid: the
        // selected key no longer resolves and must not dangle.
        apply(
            &mut store,
            &mut coordinator,
            json!({
                "operationType": "update",
                "documentKey": { "id": "1" },
                "fullDocument": { "id": "1", "udid": "u1-renamed", "model": "M" }
            }),
        );

        assert!(coordinator.current().is_empty());
        assert_eq!(store.len(), 1);
    }

    // ── Explicit selection ──────────────────────────────────────────

    #[test]
    fn explicit_select_overrides_auto_selection() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        insert(&mut store, &mut coordinator, "1", "u1");
        insert(&mut store, &mut coordinator, "2", "u2");
        assert_eq!(coordinator.current().selected_key.as_deref(), Some("u1"));

        coordinator.select("u2", &store).unwrap();
        assert_eq!(coordinator.current().selected_key.as_deref(), Some("u2"));
    }

    #[test]
    fn selecting_absent_udid_fails() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        insert(&mut store, &mut coordinator, "1", "u1");

        let err = coordinator.select("ghost", &store).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSelection { .. }));
        // Prior selection untouched
        assert_eq!(coordinator.current().selected_key.as_deref(), Some("u1"));
    }

    // ── Body consistency ────────────────────────────────────────────

    #[test]
    fn update_refreshes_selected_body() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();

        insert(&mut store, &mut coordinator, "1", "u1");
        apply(
            &mut store,
            &mut coordinator,
            json!({
                "operationType": "update",
                "documentKey": { "id": "1" },
                "fullDocument": { "id": "1", "udid": "u1", "model": "updated" }
            }),
        );

        let body = coordinator.current().selected_body.unwrap();
        assert_eq!(body.model.as_deref(), Some("updated"));
    }

    #[test]
    fn subscription_observes_selection_changes() {
        let mut store = ReplicaStore::new();
        let mut coordinator = SelectionCoordinator::new();
        let stream = coordinator.subscribe();

        insert(&mut store, &mut coordinator, "1", "u1");
        assert_eq!(stream.latest().selected_key.as_deref(), Some("u1"));
    }
}
