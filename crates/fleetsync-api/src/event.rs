//! Change-feed event codec.
//!
//! The feed delivers one JSON object per text frame, shaped like a
//! change-stream notification:
//!
//! ```json
//! { "operationType": "insert",
//!   "documentKey": { "id": "65f0..." },
//!   "fullDocument": { "id": "65f0...", "udid": "R58M...", ... } }
//! ```
//!
//! [`decode_event`] parses and shape-validates a frame. Validation goes
//! beyond serde: inserts and updates must carry a `fullDocument`,
//! deletes must carry a `documentKey.id`. Frames that fail either step
//! yield [`Error::MalformedEvent`] and are dropped by the connection
//! manager -- a bad frame never tears down the feed.

use serde::{Deserialize, Serialize};

use crate::client::DeviceRecord;
use crate::error::Error;

// ── Wire types ──────────────────────────────────────────────────────

/// The kind of mutation a feed event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

/// Identifies the affected record. Deletes correlate by this `id`;
/// inserts and updates carry the full payload as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Store-assigned identifier. Some feed producers emit the raw
    /// `_id` field name, so both are accepted.
    #[serde(alias = "_id")]
    pub id: String,
}

/// One parsed, validated feed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub operation_type: OperationType,
    pub document_key: DocumentKey,
    /// Complete device payload. Present on insert/update, absent on delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_document: Option<DeviceRecord>,
}

// ── Codec ───────────────────────────────────────────────────────────

/// Parse and validate one feed text frame.
pub fn decode_event(text: &str) -> Result<ChangeEvent, Error> {
    let event: ChangeEvent =
        serde_json::from_str(text).map_err(|e| Error::MalformedEvent {
            reason: e.to_string(),
        })?;

    match event.operation_type {
        OperationType::Insert | OperationType::Update => {
            if event.full_document.is_none() {
                return Err(Error::MalformedEvent {
                    reason: format!(
                        "{:?} event without fullDocument (id {})",
                        event.operation_type, event.document_key.id
                    ),
                });
            }
        }
        OperationType::Delete => {
            // documentKey.id is all a delete needs; a stale fullDocument,
            // if the producer includes one, is ignored downstream.
        }
    }

    Ok(event)
}

// ── Tests ───────────────────────────────────────────────────────────
