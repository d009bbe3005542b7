//! Todo-list domain: the create command, its event, and the two read models
//! the dashboard queries.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::Command;
use crate::error::StoreError;
use crate::event::{DomainEvent, StoredEvent};
use crate::projection::Projection;

/// Kind tag of [`TodoEvent::TodoListCreated`].
pub const TODO_LIST_CREATED: &str = "TodoListCreated";

/// Command creating a new todo list.
///
/// Serializes as `{"ID": ..., "Name": ...}` so the request layer can echo
/// the accepted command back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTodoList {
    /// System-generated aggregate identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Display name; must not be empty.
    #[serde(rename = "Name")]
    pub name: String,
}

impl CreateTodoList {
    /// Build the command for a new list with a freshly generated identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
        }
    }

    /// Check the command's preconditions.
    ///
    /// # Errors
    ///
    /// Returns [`TodoListError::EmptyName`] if `name` is empty.
    pub fn validate(&self) -> Result<(), TodoListError> {
        if self.name.is_empty() {
            return Err(TodoListError::EmptyName);
        }
        Ok(())
    }
}

/// Validation failures for todo-list commands.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TodoListError {
    #[error("command validation failed: name must not be empty")]
    EmptyName,
}

/// Payload of the `TodoListCreated` event, stored as `{"ID": ..., "Name": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoListCreated {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

/// Domain events of the todo-list aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TodoEvent {
    TodoListCreated(TodoListCreated),
}

impl DomainEvent for TodoEvent {
    fn aggregate_id(&self) -> &str {
        match self {
            TodoEvent::TodoListCreated(created) => &created.id,
        }
    }
}

impl Command for CreateTodoList {
    type Event = TodoEvent;
    type Error = TodoListError;

    fn handle(self) -> Result<TodoEvent, TodoListError> {
        self.validate()?;
        Ok(TodoEvent::TodoListCreated(TodoListCreated {
            id: self.id,
            name: self.name,
        }))
    }
}

/// One row of the [`TodoLists`] projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoListSummary {
    #[serde(rename = "Name")]
    pub name: String,
}

/// All created lists in creation order, stored as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoLists(pub Vec<TodoListSummary>);

impl Projection for TodoLists {
    const NAME: &'static str = "todoLists";
    const KINDS: &'static [&'static str] = &[TODO_LIST_CREATED];

    fn apply(&mut self, event: &StoredEvent) -> Result<(), StoreError> {
        if event.kind == TODO_LIST_CREATED {
            let created: TodoListCreated = event.decode()?;
            self.0.push(TodoListSummary { name: created.name });
        }
        Ok(())
    }
}

/// Number of created lists, stored as a bare integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoListsCount(pub u64);

impl Projection for TodoListsCount {
    const NAME: &'static str = "TodoListsCount";
    const KINDS: &'static [&'static str] = &[TODO_LIST_CREATED];

    fn apply(&mut self, event: &StoredEvent) -> Result<(), StoreError> {
        if event.kind == TODO_LIST_CREATED {
            self.0 += 1;
        }
        Ok(())
    }
}
