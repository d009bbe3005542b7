//! Top-level entry point that composes storage initialization, the writer
//! actor, and projection reads into a single [`EventStore`] type.
//!
//! The store is opened via [`EventStoreBuilder`], which registers the
//! projections to maintain and the checkpointer to use.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::actor::{Pipeline, WriterHandle, spawn_writer};
use crate::checkpoint::{Checkpointer, GitCheckpointer};
use crate::command::Command;
use crate::dispatch::Dispatcher;
use crate::error::{ExecuteError, StoreError};
use crate::event::{StoredEvent, StreamEntry};
use crate::projection::{Projection, read_projection};
use crate::storage::{StreamLayout, ensure_storage};
use crate::stream::read_index;

/// Default bound of the writer's request channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Event store handle shared by everything that serves requests.
///
/// Writes go through a single writer actor; reads go straight to the
/// projection files. `Clone` is cheap and every clone talks to the same
/// writer.
#[derive(Clone)]
pub struct EventStore {
    layout: StreamLayout,
    writer: WriterHandle,
}

impl fmt::Debug for EventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStore")
            .field("root", &self.layout.root())
            .finish()
    }
}

impl EventStore {
    /// Start configuring a store rooted at `root`.
    pub fn builder(root: impl AsRef<Path>) -> EventStoreBuilder {
        EventStoreBuilder::new(root)
    }

    /// Returns the layout of the underlying storage tree.
    pub fn layout(&self) -> &StreamLayout {
        &self.layout
    }

    /// Validate a command and record the event it produces.
    ///
    /// # Returns
    ///
    /// The [`StreamEntry`] of the recorded event.
    ///
    /// # Errors
    ///
    /// * [`ExecuteError::Validation`] -- the command was rejected; nothing
    ///   was written.
    /// * [`ExecuteError::Store`] -- a pipeline step failed.
    pub async fn execute<C: Command>(&self, cmd: C) -> Result<StreamEntry, ExecuteError<C::Error>> {
        let event = cmd.handle().map_err(ExecuteError::Validation)?;
        let stored = StoredEvent::encode(&event).map_err(StoreError::Serialize)?;
        Ok(self.writer.store(stored).await?)
    }

    /// Record a pre-built event, bypassing command validation.
    ///
    /// Useful for kinds that no command produces yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any pipeline step fails.
    pub async fn append(&self, event: StoredEvent) -> Result<StreamEntry, StoreError> {
        self.writer.store(event).await
    }

    /// Read the current value of projection `P`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the projection file is missing or
    /// unreadable and [`StoreError::Deserialize`] if it does not parse.
    pub async fn projection<P: Projection>(&self) -> Result<P, StoreError> {
        let layout = self.layout.clone();
        blocking(move || read_projection::<P>(&layout)).await
    }

    /// Read the stream index: every entry reference in write order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the index cannot be read.
    pub async fn stream_index(&self) -> Result<Vec<String>, StoreError> {
        let layout = self.layout.clone();
        blocking(move || read_index(&layout)).await
    }

    /// Whether the writer still accepts events.
    pub fn is_running(&self) -> bool {
        self.writer.is_alive()
    }

    /// Stop the writer after requests already queued have finished.
    ///
    /// Later writes fail with [`StoreError::WriterGone`].
    pub async fn shutdown(&self) {
        self.writer.shutdown().await;
    }
}

/// Run blocking file I/O off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
}

/// Builder for [`EventStore`].
///
/// # Examples
///
/// ```no_run
/// use eventgit::{CreateTodoList, EventStore, GitCheckpointer, TodoLists, TodoListsCount};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let store = EventStore::builder("storage")
///     .projection::<TodoLists>()
///     .projection::<TodoListsCount>()
///     .checkpointer(GitCheckpointer::new())
///     .open()
///     .await?;
///
/// store.execute(CreateTodoList::new("Groceries")).await?;
/// # Ok(())
/// # }
/// ```
pub struct EventStoreBuilder {
    root: PathBuf,
    dispatcher: Dispatcher,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    channel_capacity: usize,
}

impl fmt::Debug for EventStoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStoreBuilder")
            .field("root", &self.root)
            .field("dispatcher", &self.dispatcher)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl EventStoreBuilder {
    /// Create a builder for a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_owned(),
            dispatcher: Dispatcher::new(),
            checkpointer: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Maintain projection `P`: seed it on initialization and update it for
    /// every event whose kind it lists.
    pub fn projection<P: Projection>(mut self) -> Self {
        self.dispatcher = self.dispatcher.register::<P>();
        self
    }

    /// Use `checkpointer` instead of the default [`GitCheckpointer`].
    pub fn checkpointer(mut self, checkpointer: impl Checkpointer + 'static) -> Self {
        self.checkpointer = Some(Arc::new(checkpointer));
        self
    }

    /// Use an already shared checkpointer.
    pub fn shared_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Bound of the writer's request channel (default 32).
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Initialize storage if needed and start the writer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if initialization fails or the writer thread
    /// cannot be started.
    pub async fn open(self) -> Result<EventStore, StoreError> {
        let layout = StreamLayout::new(self.root);
        let checkpointer = self
            .checkpointer
            .unwrap_or_else(|| Arc::new(GitCheckpointer::new()));
        let dispatcher = self.dispatcher;

        let seeds = dispatcher.seeds()?;
        {
            let layout = layout.clone();
            let checkpointer = Arc::clone(&checkpointer);
            blocking(move || ensure_storage(&layout, &seeds, checkpointer.as_ref())).await?;
        }

        tracing::debug!(root = %layout.root().display(), ?dispatcher, "starting writer");
        let pipeline = Pipeline::new(layout.clone(), dispatcher, checkpointer);
        let writer = spawn_writer(pipeline, self.channel_capacity)?;

        Ok(EventStore { layout, writer })
    }
}
