// fleetsync-api: async transport for the operator console
//
// Two surfaces: the REST client for snapshot / registration calls
// (`client`), and the change-feed WebSocket connection manager (`feed`).

pub mod client;
pub mod error;
pub mod event;
pub mod feed;
pub mod transport;

pub use client::{ConsoleClient, DeviceRecord, SecurityId};
pub use error::Error;
pub use event::{ChangeEvent, DocumentKey, OperationType, decode_event};
pub use feed::{FeedManager, FeedMessage, ReconnectPolicy};
