//! Wire types for the gateway stream.
//!
//! Frames arrive as JSON text tagged by `type`. Event records inside an
//! `events` frame are decoded one by one so that a single malformed record is
//! rejected on its own instead of poisoning the whole delivery batch.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Metadata carried by a `file.upsert` event. Every field is optional on the
/// wire; `path` is validated by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FileData {
    pub path: Option<String>,
    pub dir: Option<String>,
    pub name: Option<String>,
    pub ext: Option<String>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub size: Option<i64>,
    pub fsize_du: Option<i64>,
    pub mtime: Option<f64>,
    pub atime: Option<f64>,
    pub ctime: Option<f64>,
    pub nlinks: Option<i64>,
    pub dev: Option<u64>,
    pub inode: Option<u64>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub uid: Option<i64>,
    pub gid: Option<i64>,
    pub mode: Option<i64>,
    pub algo: Option<String>,
    pub hash: Option<String>,
    pub is_deleted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum EventRecord {
    #[serde(rename = "file.upsert")]
    FileUpsert {
        #[serde(default)]
        data: Option<FileData>,
    },
    /// Any other event kind. Applying it is a no-op.
    #[serde(other)]
    Ignored,
}

impl EventRecord {
    pub fn upsert(data: FileData) -> Self {
        Self::FileUpsert { data: Some(data) }
    }

    /// Path of the event, if it carries one. Used to identify events in logs
    /// and failure reports.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::FileUpsert { data: Some(data) } => data.path.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageData {
    #[serde(default)]
    pub events: Option<Vec<Value>>,
}

/// One upstream message as wrapped by the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WrappedMessage {
    #[serde(default)]
    pub data: Option<MessageData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Events {
        /// Opaque batch id, echoed back verbatim in the ack.
        batch: Value,
        #[serde(default)]
        messages: Vec<WrappedMessage>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

pub fn decode_frame(text: &str) -> Result<Frame, Error> {
    serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))
}

/// Flatten every message's nested event list into one ordered sequence.
/// Records that fail to decode are dropped with a warning.
pub fn flatten_events(messages: Vec<WrappedMessage>) -> Vec<EventRecord> {
    let mut events = Vec::new();
    for raw in messages
        .into_iter()
        .filter_map(|m| m.data)
        .filter_map(|d| d.events)
        .flatten()
    {
        match serde_json::from_value::<EventRecord>(raw) {
            Ok(event) => events.push(event),
            Err(e) => {
                let err = Error::InvalidEvent(e.to_string());
                warn!(error = %err, "dropping undecodable event record");
            }
        }
    }
    events
}

#[derive(Debug, Serialize)]
struct Ack<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    batch: &'a Value,
}

pub fn encode_ack(batch: &Value) -> Result<String, Error> {
    Ok(serde_json::to_string(&Ack { kind: "ack", batch })?)
}
