//! Single-writer actor that owns the write pipeline.
//!
//! The actor runs on a dedicated thread and processes write requests one at
//! a time from an `mpsc` channel. Because every event of every aggregate
//! goes through it, sequence assignment, the stream index, and the shared
//! projections never see interleaved writers from this process.
//!
//! The pipeline for one event is strictly sequential:
//! append to stream → record in index → apply projections → checkpoint.
//! The first failing step aborts the cycle and the checkpoint is skipped.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::checkpoint::Checkpointer;
use crate::dispatch::Dispatcher;
use crate::error::StoreError;
use crate::event::{StoredEvent, StreamEntry, validate_aggregate_id};
use crate::storage::StreamLayout;
use crate::stream::{append_at, current_sequence, record_index_entry};

/// The synchronous write pipeline plus the per-stream sequence cache.
pub(crate) struct Pipeline {
    layout: StreamLayout,
    dispatcher: Dispatcher,
    checkpointer: Arc<dyn Checkpointer>,
    /// Last sequence number written per aggregate. A stream missing from
    /// the map is scanned from disk on its next write.
    sequences: HashMap<String, u64>,
}

impl Pipeline {
    pub(crate) fn new(
        layout: StreamLayout,
        dispatcher: Dispatcher,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        Self {
            layout,
            dispatcher,
            checkpointer,
            sequences: HashMap::new(),
        }
    }

    fn next_sequence(&mut self, aggregate_id: &str) -> Result<u64, StoreError> {
        let last = match self.sequences.get(aggregate_id) {
            Some(&last) => last,
            None => current_sequence(&self.layout, aggregate_id)?,
        };
        Ok(last + 1)
    }

    /// Run one full write cycle for `event`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's [`StoreError`]. Earlier steps are
    /// not rolled back and no checkpoint is taken.
    pub(crate) fn store_event(&mut self, event: &StoredEvent) -> Result<StreamEntry, StoreError> {
        let _span = tracing::info_span!(
            "store_event",
            aggregate_id = %event.aggregate_id,
            kind = %event.kind,
        )
        .entered();

        self.run_cycle(event).inspect_err(|e| {
            tracing::error!(error = %e, "write cycle aborted before checkpoint");
        })
    }

    fn run_cycle(&mut self, event: &StoredEvent) -> Result<StreamEntry, StoreError> {
        validate_aggregate_id(&event.aggregate_id)?;

        let sequence = self.next_sequence(&event.aggregate_id)?;
        let entry = match append_at(&self.layout, event, sequence) {
            Ok(entry) => entry,
            Err(e) => {
                // Someone else wrote this stream; rescan next time.
                if matches!(e, StoreError::EntryExists(_)) {
                    self.sequences.remove(&event.aggregate_id);
                }
                return Err(e);
            }
        };
        self.sequences
            .insert(event.aggregate_id.clone(), entry.sequence);

        record_index_entry(&self.layout, &entry)?;
        let updated = self.dispatcher.apply(&self.layout, event)?;
        self.checkpointer
            .commit(self.layout.root(), &event.aggregate_id)?;

        tracing::info!(
            sequence = entry.sequence,
            projections = updated,
            "event stored"
        );
        Ok(entry)
    }
}

/// Messages sent from [`WriterHandle`] to the actor loop.
pub(crate) enum WriterMessage {
    /// Run the write pipeline for one event.
    Store {
        event: StoredEvent,
        reply: oneshot::Sender<Result<StreamEntry, StoreError>>,
    },

    /// Stop the actor after the requests queued before this one.
    Shutdown,
}

/// Runs the writer loop until the channel closes or `Shutdown` arrives.
pub(crate) fn run_writer(mut pipeline: Pipeline, mut rx: mpsc::Receiver<WriterMessage>) {
    while let Some(msg) = rx.blocking_recv() {
        match msg {
            WriterMessage::Store { event, reply } => {
                let result = pipeline.store_event(&event);
                // The caller may have stopped waiting; that is not an error.
                let _ = reply.send(result);
            }
            WriterMessage::Shutdown => break,
        }
    }
    tracing::debug!(root = %pipeline.layout.root().display(), "writer stopped");
}

/// Async handle to the running writer actor.
///
/// Cheap to clone; every clone feeds the same actor.
#[derive(Debug, Clone)]
pub(crate) struct WriterHandle {
    sender: mpsc::Sender<WriterMessage>,
}

impl WriterHandle {
    /// Send an event through the pipeline and wait for the outcome.
    ///
    /// # Errors
    ///
    /// * [`StoreError::WriterGone`] -- the actor has exited.
    /// * any [`StoreError`] produced by the pipeline itself.
    pub(crate) async fn store(&self, event: StoredEvent) -> Result<StreamEntry, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WriterMessage::Store { event, reply: tx })
            .await
            .map_err(|_| StoreError::WriterGone)?;
        rx.await.map_err(|_| StoreError::WriterGone)?
    }

    /// Ask the actor to stop once earlier requests are done.
    pub(crate) async fn shutdown(&self) {
        // A closed channel means the actor is already gone.
        let _ = self.sender.send(WriterMessage::Shutdown).await;
    }

    /// Whether the actor is still accepting requests.
    pub(crate) fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Start the writer actor on its own thread.
///
/// # Arguments
///
/// * `pipeline` - The pipeline the actor will own.
/// * `capacity` - Bound of the request channel.
///
/// # Errors
///
/// Returns [`io::Error`] if the thread cannot be spawned.
pub(crate) fn spawn_writer(pipeline: Pipeline, capacity: usize) -> io::Result<WriterHandle> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    std::thread::Builder::new()
        .name("eventgit-writer".into())
        .spawn(move || run_writer(pipeline, rx))?;
    Ok(WriterHandle { sender: tx })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::error::CheckpointError;
    use crate::projection::read_projection;
    use crate::storage::ensure_storage;
    use crate::stream::read_index;
    use crate::todo::{TodoLists, TodoListsCount};

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<String>>,
        fail_commits: bool,
    }

    impl Checkpointer for Recorder {
        fn commit(&self, _root: &Path, message: &str) -> Result<(), CheckpointError> {
            if self.fail_commits && message != "Initial commit" {
                return Err(CheckpointError::Rejected("git unavailable".into()));
            }
            self.messages.lock().expect("lock").push(message.to_owned());
            Ok(())
        }
    }

    fn pipeline(tmp: &TempDir, recorder: Arc<Recorder>) -> Pipeline {
        let layout = StreamLayout::new(tmp.path().join("storage"));
        let dispatcher = Dispatcher::new()
            .register::<TodoLists>()
            .register::<TodoListsCount>();
        ensure_storage(&layout, &dispatcher.seeds().expect("seeds"), recorder.as_ref())
            .expect("init");
        Pipeline::new(layout, dispatcher, recorder)
    }

    fn created(id: &str, name: &str) -> StoredEvent {
        StoredEvent::new("TodoListCreated", id, json!({"ID": id, "Name": name}))
    }

    #[test]
    fn full_cycle_writes_indexes_projects_and_commits() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let recorder = Arc::new(Recorder::default());
        let mut pipeline = pipeline(&tmp, recorder.clone());

        let entry = pipeline
            .store_event(&created("list-1", "Groceries"))
            .expect("store should succeed");

        assert_eq!(entry.reference(), "events/list-1/000001_TodoListCreated");
        assert_eq!(
            read_index(&pipeline.layout).expect("index"),
            vec!["events/list-1/000001_TodoListCreated"]
        );
        let count: TodoListsCount = read_projection(&pipeline.layout).expect("count");
        assert_eq!(count, TodoListsCount(1));
        assert_eq!(
            *recorder.messages.lock().expect("lock"),
            vec!["Initial commit".to_owned(), "list-1".to_owned()]
        );
    }

    #[test]
    fn cached_sequences_continue_without_rescan() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let recorder = Arc::new(Recorder::default());
        let mut pipeline = pipeline(&tmp, recorder);

        for i in 1..=3 {
            let entry = pipeline
                .store_event(&created("list-1", &format!("n{i}")))
                .expect("store");
            assert_eq!(entry.sequence, i);
        }
        assert_eq!(pipeline.sequences.get("list-1"), Some(&3));
    }

    #[test]
    fn foreign_entry_causes_conflict_then_rescan() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let recorder = Arc::new(Recorder::default());
        let mut pipeline = pipeline(&tmp, recorder.clone());

        pipeline
            .store_event(&created("list-1", "a"))
            .expect("first store");

        // An out-of-process writer takes sequence 2 behind the cache's back.
        fs::write(
            pipeline.layout.stream_dir("list-1").join("000002_TodoListCreated"),
            r#"{"ID":"list-1","Name":"foreign"}"#,
        )
        .expect("foreign write");

        let result = pipeline.store_event(&created("list-1", "b"));
        assert!(
            matches!(result, Err(StoreError::EntryExists(_))),
            "expected EntryExists, got: {result:?}"
        );
        assert_eq!(recorder.messages.lock().expect("lock").len(), 2);

        let entry = pipeline
            .store_event(&created("list-1", "b"))
            .expect("retry after rescan");
        assert_eq!(entry.sequence, 3);
    }

    #[test]
    fn checkpoint_failure_skips_commit_but_keeps_files() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let recorder = Arc::new(Recorder {
            fail_commits: true,
            ..Recorder::default()
        });
        let mut pipeline = pipeline(&tmp, recorder.clone());

        let result = pipeline.store_event(&created("list-1", "Groceries"));
        assert!(
            matches!(result, Err(StoreError::Checkpoint(_))),
            "expected Checkpoint, got: {result:?}"
        );

        // Completed steps are not rolled back.
        assert!(
            pipeline
                .layout
                .stream_dir("list-1")
                .join("000001_TodoListCreated")
                .is_file()
        );
        let lists: TodoLists = read_projection(&pipeline.layout).expect("list");
        assert_eq!(lists.0.len(), 1);
        assert_eq!(
            *recorder.messages.lock().expect("lock"),
            vec!["Initial commit".to_owned()]
        );
    }

    #[test]
    fn projection_failure_skips_checkpoint() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let recorder = Arc::new(Recorder::default());
        let mut pipeline = pipeline(&tmp, recorder.clone());
        fs::write(pipeline.layout.projection_path("todoLists"), "{").expect("corrupt");

        let result = pipeline.store_event(&created("list-1", "Groceries"));
        assert!(matches!(result, Err(StoreError::Deserialize { .. })));
        assert_eq!(recorder.messages.lock().expect("lock").len(), 1);
        // The event and its index line were already written.
        assert_eq!(read_index(&pipeline.layout).expect("index").len(), 1);
    }

    #[test]
    fn invalid_aggregate_id_touches_nothing() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let recorder = Arc::new(Recorder::default());
        let mut pipeline = pipeline(&tmp, recorder.clone());

        let result = pipeline.store_event(&created("index", "x"));
        assert!(matches!(result, Err(StoreError::InvalidAggregateId(_))));
        assert!(read_index(&pipeline.layout).expect("index").is_empty());
        assert_eq!(recorder.messages.lock().expect("lock").len(), 1);
    }

    #[test]
    fn untrackable_or_multiline_ids_are_rejected_before_writing() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let recorder = Arc::new(Recorder::default());
        let mut pipeline = pipeline(&tmp, recorder.clone());

        for id in [".git", ".Git", "evil\nforged"] {
            let result = pipeline.store_event(&created(id, "x"));
            assert!(
                matches!(result, Err(StoreError::InvalidAggregateId(_))),
                "{id:?} should be rejected, got: {result:?}"
            );
        }
        assert!(!pipeline.layout.events_dir().join(".git").exists());
        assert!(read_index(&pipeline.layout).expect("index").is_empty());
        let count: TodoListsCount = read_projection(&pipeline.layout).expect("count");
        assert_eq!(count, TodoListsCount(0));
        assert_eq!(recorder.messages.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn actor_serializes_concurrent_requests() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let recorder = Arc::new(Recorder::default());
        let pipeline = pipeline(&tmp, recorder.clone());
        let layout = pipeline.layout.clone();
        let handle = spawn_writer(pipeline, 4).expect("spawn");

        let mut tasks = Vec::new();
        for i in 0..16 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.store(created("shared", &format!("n{i}"))).await
            }));
        }
        let mut sequences = Vec::new();
        for task in tasks {
            sequences.push(task.await.expect("join").expect("store").sequence);
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=16).collect::<Vec<u64>>());

        let count: TodoListsCount = read_projection(&layout).expect("count");
        assert_eq!(count, TodoListsCount(16));
        assert_eq!(recorder.messages.lock().expect("lock").len(), 17);
    }

    #[tokio::test]
    async fn shutdown_stops_the_actor() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let pipeline = pipeline(&tmp, Arc::new(Recorder::default()));
        let handle = spawn_writer(pipeline, 4).expect("spawn");

        handle.shutdown().await;
        // Give the writer thread a moment to drop its receiver.
        for _ in 0..50 {
            if !handle.is_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!handle.is_alive());

        let result = handle.store(created("list-1", "late")).await;
        assert!(matches!(result, Err(StoreError::WriterGone)));
    }
}
