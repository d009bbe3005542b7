//! Crate-level error types for the write pipeline and command execution.

use std::process::ExitStatus;

/// Error returned by any step of the storage engine.
///
/// Every component surfaces failures to its caller unchanged; nothing in the
/// crate retries. Steps that completed before the failure are not rolled
/// back, but the checkpoint step is skipped.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Disk I/O failure.
    ///
    /// A storage location is missing or unwritable, or a directory listing
    /// could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored projection could not be parsed.
    #[error("projection '{name}' could not be decoded: {source}")]
    Deserialize {
        /// Name of the projection whose file failed to parse.
        name: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An event or projection value could not be serialized, or an event
    /// payload did not have the shape its kind requires.
    #[error("serialization error: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The computed stream entry already exists on disk.
    ///
    /// Raised instead of overwriting an event written by another writer.
    #[error("stream entry '{0}' already exists")]
    EntryExists(String),

    /// The stream has used every six-digit sequence number.
    #[error("stream '{0}' has reached the maximum sequence number")]
    StreamFull(String),

    /// The aggregate identifier cannot be used as a stream directory name.
    #[error("invalid aggregate identifier: {0:?}")]
    InvalidAggregateId(String),

    /// The event kind tag cannot be used in a stream entry name.
    #[error("invalid event kind: {0:?}")]
    InvalidEventKind(String),

    /// The snapshot committer rejected the checkpoint.
    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Writer thread exited unexpectedly.
    #[error("event writer is no longer running")]
    WriterGone,
}

/// Error returned by a [`Checkpointer`](crate::Checkpointer).
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The version-control tool could not be started.
    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    /// The version-control tool ran but exited unsuccessfully.
    #[error("`git {command}` exited with {status}: {stderr}")]
    Failed {
        /// The git subcommand that failed (e.g. `"commit"`).
        command: String,
        /// Exit status reported by the process.
        status: ExitStatus,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// A non-git checkpointer refused the checkpoint.
    #[error("{0}")]
    Rejected(String),
}

/// Error returned when executing a command through the
/// [`EventStore`](crate::EventStore).
///
/// # Type Parameters
///
/// * `E` - The command's validation error type.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E: std::error::Error + Send + Sync + 'static> {
    /// The command failed validation; nothing was written.
    #[error(transparent)]
    Validation(E),

    /// The storage engine failed while recording the event.
    #[error(transparent)]
    Store(#[from] StoreError),
}
