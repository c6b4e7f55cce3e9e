//! Reactive replica layer between `fleetsync-api` and UI consumers.
//!
//! This crate owns the business logic of the fleet synchronizer:
//!
//! - **[`Synchronizer`]** — Central facade managing the full lifecycle:
//!   [`start()`](Synchronizer::start) fetches the bootstrap snapshot,
//!   attaches to the change feed, and runs the single-consumer event
//!   loop that keeps the replica and selection consistent. Reconnects
//!   with capped exponential backoff when the feed drops.
//!
//! - **[`ReplicaStore`]** — Insertion-ordered, udid-keyed collection of
//!   [`Device`] records. Applies snapshot merges and feed events with
//!   conflict rules that make the snapshot-vs-feed race order-independent
//!   (feed wins on conflict). Mutated only by the synchronizer loop;
//!   consumers observe it through `watch`-channel snapshots.
//!
//! - **[`SelectionCoordinator`]** — Derives "currently selected device"
//!   from replica mutations: clears a selection whose device is deleted,
//!   refreshes the selected body on update, and auto-selects the first
//!   device on the store's empty-to-non-empty transition.
//!
//! - **Domain model** ([`model`]) — The canonical [`Device`] type keyed
//!   by `udid` (business key) with an optional store-assigned `id` used
//!   for delete correlation.

pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod replica;
pub mod selection;
pub mod stream;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::SyncConfig;
pub use error::CoreError;
pub use model::{Device, DeviceState};
pub use replica::{MutationKind, MutationResult, ReplicaStore};
pub use selection::{SelectionCoordinator, SelectionState};
pub use stream::StateStream;
pub use sync::{ConnectionState, Synchronizer};
