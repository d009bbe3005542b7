//! Projection store: named read models persisted as whole JSON files.
//!
//! Each projection lives at `<root>/projections/<NAME>` and is replaced in
//! full on every update. Writes go to a temporary file that is then renamed
//! over the old one, so a concurrent reader sees either the previous or the
//! next value, never a torn file.

use std::io;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::event::StoredEvent;
use crate::storage::StreamLayout;

/// A read model derived synchronously from the event log.
///
/// # Contract
///
/// - [`Default`] is the seed value written when storage is initialized.
/// - [`apply`](Projection::apply) is called only for events whose kind is
///   listed in [`KINDS`](Projection::KINDS), exactly once per stored event.
/// - `apply` must be deterministic. It may reject an event whose payload
///   does not have the expected shape; the update is then abandoned.
pub trait Projection: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// File name under `projections/`.
    const NAME: &'static str;

    /// Event kinds this projection reacts to.
    const KINDS: &'static [&'static str];

    /// Fold one event into the current value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the event payload cannot be interpreted.
    fn apply(&mut self, event: &StoredEvent) -> Result<(), StoreError>;
}

/// Initial content of one projection file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionSeed {
    /// Projection name (file name under `projections/`).
    pub name: &'static str,
    /// Serialized default value.
    pub contents: Vec<u8>,
}

impl ProjectionSeed {
    /// Build the seed for projection `P` from its [`Default`] value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialize`] if the default cannot be serialized.
    pub fn of<P: Projection>() -> Result<Self, StoreError> {
        Ok(Self {
            name: P::NAME,
            contents: encode(&P::default())?,
        })
    }
}

/// Read and decode the current value of projection `P`.
///
/// # Errors
///
/// * [`StoreError::Io`] -- the projection file is missing or unreadable.
/// * [`StoreError::Deserialize`] -- the stored content does not parse as `P`.
pub fn read_projection<P: Projection>(layout: &StreamLayout) -> Result<P, StoreError> {
    let path = layout.projection_path(P::NAME);
    let bytes = std::fs::read(&path)?;
    serde_json::from_slice(&bytes).map_err(|source| {
        tracing::warn!(
            path = %path.display(),
            error = %source,
            "corrupt projection"
        );
        StoreError::Deserialize {
            name: P::NAME.to_owned(),
            source,
        }
    })
}

/// Replace the stored value of projection `P`.
///
/// # Errors
///
/// Returns [`StoreError::Serialize`] if `value` cannot be serialized, or
/// [`StoreError::Io`] if the file cannot be written.
pub fn write_projection<P: Projection>(layout: &StreamLayout, value: &P) -> Result<(), StoreError> {
    let bytes = encode(value)?;
    replace_file(&layout.projection_path(P::NAME), &bytes)?;
    Ok(())
}

pub(crate) fn encode<P: Serialize>(value: &P) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(StoreError::Serialize)
}

/// Atomically replace `path` with `bytes` via a sibling temp file.
pub(crate) fn replace_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path).inspect_err(|_| {
        // Leftovers would be picked up by the next checkpoint.
        let _ = std::fs::remove_file(&tmp_path);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::todo::{TodoListSummary, TodoLists, TodoListsCount};
    use tempfile::TempDir;

    fn layout_with_dirs(tmp: &TempDir) -> StreamLayout {
        let layout = StreamLayout::new(tmp.path().join("storage"));
        std::fs::create_dir_all(layout.projections_dir()).expect("create projections dir");
        layout
    }

    #[test]
    fn list_projection_roundtrip() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let layout = layout_with_dirs(&tmp);
        let value = TodoLists(vec![
            TodoListSummary {
                name: "Groceries".into(),
            },
            TodoListSummary {
                name: "Chores".into(),
            },
        ]);

        write_projection(&layout, &value).expect("write should succeed");
        let read: TodoLists = read_projection(&layout).expect("read should succeed");
        assert_eq!(read, value);
    }

    #[test]
    fn count_projection_roundtrip() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let layout = layout_with_dirs(&tmp);

        write_projection(&layout, &TodoListsCount(17)).expect("write should succeed");
        let read: TodoListsCount = read_projection(&layout).expect("read should succeed");
        assert_eq!(read, TodoListsCount(17));

        let raw = std::fs::read_to_string(layout.projection_path(TodoListsCount::NAME))
            .expect("read raw");
        assert_eq!(raw, "17");
    }

    #[test]
    fn write_replaces_whole_file_and_leaves_no_temp() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let layout = layout_with_dirs(&tmp);

        write_projection(&layout, &TodoListsCount(12345)).expect("first write");
        write_projection(&layout, &TodoListsCount(2)).expect("second write");

        let raw = std::fs::read_to_string(layout.projection_path(TodoListsCount::NAME))
            .expect("read raw");
        assert_eq!(raw, "2");

        let leftovers: Vec<_> = std::fs::read_dir(layout.projections_dir())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn failed_rename_removes_temp_file() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let layout = layout_with_dirs(&tmp);
        let target = layout.projection_path(TodoListsCount::NAME);
        // A non-empty directory in the way makes the rename fail.
        std::fs::create_dir_all(target.join("occupied")).expect("create blocking dir");

        let result = write_projection(&layout, &TodoListsCount(3));
        assert!(matches!(result, Err(StoreError::Io(_))), "got: {result:?}");

        let leftovers: Vec<_> = std::fs::read_dir(layout.projections_dir())
            .expect("read projections dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp file left behind: {leftovers:?}");
    }

    #[test]
    fn missing_projection_is_io_not_found() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let layout = layout_with_dirs(&tmp);

        let result = read_projection::<TodoLists>(&layout);
        assert!(
            matches!(result, Err(StoreError::Io(ref e)) if e.kind() == io::ErrorKind::NotFound),
            "expected NotFound, got: {result:?}"
        );
    }

    #[test]
    fn corrupt_projection_is_deserialize_error() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let layout = layout_with_dirs(&tmp);
        std::fs::write(layout.projection_path(TodoListsCount::NAME), "seven")
            .expect("write corrupt");

        let result = read_projection::<TodoListsCount>(&layout);
        assert!(
            matches!(result, Err(StoreError::Deserialize { ref name, .. }) if name == "TodoListsCount"),
            "expected Deserialize, got: {result:?}"
        );
    }

    #[test]
    fn seeds_serialize_defaults() {
        let list = ProjectionSeed::of::<TodoLists>().expect("seed list");
        let count = ProjectionSeed::of::<TodoListsCount>().expect("seed count");
        assert_eq!(list.name, "todoLists");
        assert_eq!(list.contents, b"[]");
        assert_eq!(count.name, "TodoListsCount");
        assert_eq!(count.contents, b"0");
    }
}
