//! On-disk layout of the storage tree and its one-time initialization.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::checkpoint::{Checkpointer, INITIAL_COMMIT_MESSAGE};
use crate::error::StoreError;
use crate::projection::ProjectionSeed;

/// Name of the empty marker file placed in each sub-area so that version
/// control tracks the directory even while it holds no entries.
pub const IGNORE_MARKER: &str = ".gitignore";

/// Manages the on-disk directory layout of the event store.
///
/// The layout follows this structure:
/// ```text
/// <root>/
///     events/
///         .gitignore
///         index                       -- append-only ledger of entry paths
///         <aggregate_id>/
///             000001_<Kind>           -- one JSON event per file
///             000002_<Kind>
///     projections/
///         .gitignore
///         <projection_name>           -- whole-file JSON value
/// ```
///
/// `StreamLayout` is cheap to clone (it wraps a single `PathBuf`) and only
/// computes paths; it performs no I/O itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLayout {
    root: PathBuf,
}

impl StreamLayout {
    /// Create a new `StreamLayout` rooted at the given directory.
    ///
    /// # Arguments
    ///
    /// * `root` - Root directory of the storage tree. It does not need to
    ///   exist yet; [`ensure_storage`] creates it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory of this layout.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns `<root>/events`.
    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    /// Returns `<root>/projections`.
    pub fn projections_dir(&self) -> PathBuf {
        self.root.join("projections")
    }

    /// Returns the directory holding one aggregate's stream.
    ///
    /// # Returns
    ///
    /// `<root>/events/<aggregate_id>`
    pub fn stream_dir(&self, aggregate_id: &str) -> PathBuf {
        self.events_dir().join(aggregate_id)
    }

    /// Returns `<root>/events/index`.
    pub fn index_path(&self) -> PathBuf {
        self.events_dir().join("index")
    }

    /// Returns `<root>/projections/<name>`.
    pub fn projection_path(&self, name: &str) -> PathBuf {
        self.projections_dir().join(name)
    }
}

/// Create the storage tree if it does not exist yet.
///
/// When `layout.root()` is absent this creates the root, lets the
/// checkpointer prepare it, creates `events/` and `projections/` with an
/// empty [`IGNORE_MARKER`] each, writes every seed projection, and commits
/// the result as `"Initial commit"`.
///
/// This function is **idempotent**: if the root already exists nothing is
/// touched and no checkpoint is taken.
///
/// # Arguments
///
/// * `layout` - Layout of the storage tree to initialize.
/// * `seeds` - Initial projection values to write.
/// * `checkpointer` - Snapshot committer for the initial checkpoint.
///
/// # Returns
///
/// `true` if the tree was created by this call, `false` if it already
/// existed.
///
/// # Errors
///
/// Returns [`StoreError`] on the first failing step. Steps already taken
/// are not undone.
pub fn ensure_storage(
    layout: &StreamLayout,
    seeds: &[ProjectionSeed],
    checkpointer: &dyn Checkpointer,
) -> Result<bool, StoreError> {
    let root = layout.root();
    if root.exists() {
        tracing::debug!(root = %root.display(), "storage already initialized");
        return Ok(false);
    }

    fs::create_dir_all(root)?;
    checkpointer.init(root)?;

    for dir in [layout.events_dir(), layout.projections_dir()] {
        fs::create_dir(&dir)?;
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(IGNORE_MARKER))?;
    }

    for seed in seeds {
        fs::write(layout.projection_path(seed.name), &seed.contents)?;
    }

    checkpointer.commit(root, INITIAL_COMMIT_MESSAGE)?;

    tracing::info!(
        root = %root.display(),
        projections = seeds.len(),
        "storage initialized"
    );
    Ok(true)
}
