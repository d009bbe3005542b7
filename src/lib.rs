//! File-backed event sourcing with synchronously maintained projections and
//! a version-control checkpoint after every write.

mod actor;
mod checkpoint;
pub use checkpoint::{Checkpointer, GitCheckpointer, INITIAL_COMMIT_MESSAGE};
mod command;
pub use command::Command;
mod dispatch;
pub use dispatch::Dispatcher;
mod error;
pub use error::{CheckpointError, ExecuteError, StoreError};
mod event;
pub use event::{DomainEvent, MAX_SEQUENCE, StoredEvent, StreamEntry};
mod projection;
pub use projection::{Projection, ProjectionSeed, read_projection, write_projection};
mod storage;
pub use storage::{IGNORE_MARKER, StreamLayout, ensure_storage};
mod store;
pub use store::{EventStore, EventStoreBuilder};
mod stream;
pub use stream::{
    append, append_at, current_sequence, list_streams, read_index, record_index_entry,
    stream_entries,
};
mod todo;
pub use todo::{
    CreateTodoList, TODO_LIST_CREATED, TodoEvent, TodoListCreated, TodoListError, TodoListSummary,
    TodoLists, TodoListsCount,
};
