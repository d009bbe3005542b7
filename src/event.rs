//! Event representation shared by the stream writer, the index, and the
//! dispatch engine.
//!
//! Typed domain events are adjacently tagged serde enums
//! (`#[serde(tag = "type", content = "data")]`). Before they reach storage
//! they are flattened into a [`StoredEvent`]: the `"type"` tag becomes the
//! event kind and the `"data"` object becomes the payload written to disk.

use std::path::PathBuf;

use serde::Serialize;
use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value;

use crate::error::StoreError;

/// Highest sequence number that still fits the six-digit entry prefix.
pub const MAX_SEQUENCE: u64 = 999_999;

/// A domain event that belongs to exactly one aggregate stream.
///
/// Implementors must serialize with adjacent tagging so that
/// [`StoredEvent::encode`] can split the kind tag from the payload.
pub trait DomainEvent: Serialize {
    /// Identifier of the aggregate whose stream receives this event.
    fn aggregate_id(&self) -> &str;
}

/// An event in its storage form: kind tag, owning stream, and JSON payload.
///
/// The kind set is open. Any kind can be appended and dispatched; kinds with
/// no registered projection are simply not projected.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Kind tag, e.g. `"TodoListCreated"`. Used in the entry file name.
    pub kind: String,
    /// Identifier of the owning aggregate stream.
    pub aggregate_id: String,
    /// Field-named payload; the sole content of the entry file.
    pub payload: Value,
}

impl StoredEvent {
    /// Build a stored event from its parts.
    pub fn new(kind: impl Into<String>, aggregate_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            aggregate_id: aggregate_id.into(),
            payload,
        }
    }

    /// Flatten an adjacently tagged domain event into its storage form.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the event cannot be serialized or does
    /// not serialize to an object with a string `"type"` field.
    pub fn encode<E: DomainEvent>(event: &E) -> serde_json::Result<Self> {
        let value = serde_json::to_value(event)?;
        let Value::Object(mut obj) = value else {
            return Err(serde_json::Error::custom(
                "domain event must serialize to a JSON object",
            ));
        };

        let kind = match obj.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => {
                return Err(serde_json::Error::custom(
                    "domain event must carry a string 'type' tag",
                ));
            }
        };

        // Fieldless variants have no "data" entry.
        let payload = obj.remove("data").unwrap_or(Value::Null);

        Ok(Self::new(kind, event.aggregate_id(), payload))
    }

    /// Decode the payload into a concrete event body.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialize`] if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.payload.clone()).map_err(StoreError::Serialize)
    }
}

/// Reference to one written stream entry.
///
/// The entry file name is the zero-padded sequence number followed by the
/// kind tag, so lexical order of a stream directory equals write order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamEntry {
    /// Owning aggregate identifier.
    pub aggregate_id: String,
    /// Position within the stream, starting at 1.
    pub sequence: u64,
    /// Kind tag of the stored event.
    pub kind: String,
}

impl StreamEntry {
    /// Entry file name, e.g. `000001_TodoListCreated`.
    pub fn file_name(&self) -> String {
        format!("{:06}_{}", self.sequence, self.kind)
    }

    /// Path of the entry relative to the storage root,
    /// e.g. `events/<id>/000001_TodoListCreated`.
    ///
    /// This is the reference recorded in the stream index.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from("events")
            .join(&self.aggregate_id)
            .join(self.file_name())
    }

    /// Forward-slash form of [`relative_path`](StreamEntry::relative_path),
    /// independent of the host path separator.
    pub fn reference(&self) -> String {
        format!("events/{}/{}", self.aggregate_id, self.file_name())
    }
}

/// True if `segment` cannot appear in a path component or an index line.
fn breaks_path_segment(segment: &str) -> bool {
    segment.is_empty() || segment.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

/// Check that an aggregate identifier is usable as a stream directory name.
///
/// `index` is reserved because the stream index lives next to the stream
/// directories. `.git` is reserved because git never tracks a directory
/// with that name, compared case-insensitively for case-folding filesystems.
pub(crate) fn validate_aggregate_id(id: &str) -> Result<(), StoreError> {
    let reserved =
        matches!(id, "." | ".." | "index" | ".gitignore") || id.eq_ignore_ascii_case(".git");
    if reserved || breaks_path_segment(id) {
        return Err(StoreError::InvalidAggregateId(id.to_owned()));
    }
    Ok(())
}

/// Check that a kind tag is usable inside an entry file name.
pub(crate) fn validate_kind(kind: &str) -> Result<(), StoreError> {
    if breaks_path_segment(kind) {
        return Err(StoreError::InvalidEventKind(kind.to_owned()));
    }
    Ok(())
}
