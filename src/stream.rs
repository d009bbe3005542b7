//! Event stream writer and the global stream index.
//!
//! Every aggregate owns a directory under `events/`; each event is one file
//! named `<NNNNNN>_<Kind>`. Next to the stream directories sits `index`, a
//! ledger with one line per written entry in global write order.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};

use crate::error::StoreError;
use crate::event::{MAX_SEQUENCE, StoredEvent, StreamEntry, validate_aggregate_id, validate_kind};
use crate::storage::StreamLayout;

/// Lists the entry file names of one aggregate's stream in write order.
///
/// # Returns
///
/// A sorted `Vec<String>` of entry names. Returns an empty vector if the
/// stream directory does not exist yet.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if reading the directory fails for a reason
/// other than the directory not existing.
pub fn stream_entries(layout: &StreamLayout, aggregate_id: &str) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(layout.stream_dir(aggregate_id)) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Lists every aggregate identifier that has a stream directory.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the events directory cannot be read.
pub fn list_streams(layout: &StreamLayout) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(layout.events_dir()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ids: Vec<String> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            entry
                .file_type()
                .ok()?
                .is_dir()
                .then(|| entry.file_name().to_string_lossy().into_owned())
        })
        .collect();
    ids.sort();
    Ok(ids)
}

/// Returns the number of entries already written to a stream (0 if the
/// stream does not exist).
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the stream directory cannot be listed.
pub fn current_sequence(layout: &StreamLayout, aggregate_id: &str) -> Result<u64, StoreError> {
    Ok(stream_entries(layout, aggregate_id)?.len() as u64)
}

/// Append one event to its aggregate's stream.
///
/// The sequence number is derived from the stream directory: current entry
/// count plus one. Callers that track sequences themselves use
/// [`append_at`].
///
/// # Errors
///
/// See [`append_at`].
pub fn append(layout: &StreamLayout, event: &StoredEvent) -> Result<StreamEntry, StoreError> {
    validate_aggregate_id(&event.aggregate_id)?;
    let sequence = current_sequence(layout, &event.aggregate_id)? + 1;
    append_at(layout, event, sequence)
}

/// Write `event` as entry number `sequence` of its aggregate's stream.
///
/// Creates the stream directory if needed, then writes the JSON payload as
/// the sole content of a new file. The file is opened with create-new
/// semantics, so an entry that already exists is never overwritten.
///
/// # Arguments
///
/// * `layout` - Storage layout to write into.
/// * `event` - The event to persist.
/// * `sequence` - Position of the new entry, starting at 1.
///
/// # Returns
///
/// The [`StreamEntry`] referencing the new file.
///
/// # Errors
///
/// * [`StoreError::InvalidAggregateId`] / [`StoreError::InvalidEventKind`] --
///   the identifier or kind cannot be used in a path.
/// * [`StoreError::StreamFull`] -- `sequence` does not fit six digits.
/// * [`StoreError::EntryExists`] -- the computed entry is already on disk.
/// * [`StoreError::Serialize`] / [`StoreError::Io`] -- writing failed.
pub fn append_at(
    layout: &StreamLayout,
    event: &StoredEvent,
    sequence: u64,
) -> Result<StreamEntry, StoreError> {
    validate_aggregate_id(&event.aggregate_id)?;
    validate_kind(&event.kind)?;
    if sequence > MAX_SEQUENCE {
        return Err(StoreError::StreamFull(event.aggregate_id.clone()));
    }

    let entry = StreamEntry {
        aggregate_id: event.aggregate_id.clone(),
        sequence,
        kind: event.kind.clone(),
    };

    let dir = layout.stream_dir(&event.aggregate_id);
    fs::create_dir_all(&dir)?;

    let bytes = serde_json::to_vec(&event.payload).map_err(StoreError::Serialize)?;
    let path = dir.join(entry.file_name());
    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StoreError::EntryExists(entry.reference()));
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(&bytes)?;

    tracing::debug!(
        aggregate_id = %entry.aggregate_id,
        sequence,
        kind = %entry.kind,
        "event appended"
    );
    Ok(entry)
}

/// Record a written entry in the global stream index.
///
/// Opens `events/index` in append mode (creating it if absent) and writes
/// the entry's root-relative path followed by a newline.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the index cannot be opened or written.
pub fn record_index_entry(layout: &StreamLayout, entry: &StreamEntry) -> Result<(), StoreError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(layout.index_path())?;
    writeln!(file, "{}", entry.reference())?;
    Ok(())
}

/// Read the stream index back, one reference per element, in write order.
///
/// The index is an audit trail; nothing in the write path reads it.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the index exists but cannot be read.
pub fn read_index(layout: &StreamLayout) -> Result<Vec<String>, StoreError> {
    let file = match fs::File::open(layout.index_path()) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}
