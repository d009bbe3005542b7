//! Dispatch/apply engine: routes a stored event to the projections that
//! react to its kind and rewrites each of them.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::StoreError;
use crate::event::StoredEvent;
use crate::projection::{self, Projection, ProjectionSeed, read_projection};
use crate::storage::StreamLayout;

/// Type-erased read-apply-serialize step for one projection.
trait ProjectionHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn seed(&self) -> Result<ProjectionSeed, StoreError>;

    /// Read the current value, fold the event in, and return the new
    /// serialized value without writing it.
    fn stage(&self, layout: &StreamLayout, event: &StoredEvent) -> Result<Vec<u8>, StoreError>;
}

struct TypedHandler<P: Projection> {
    _marker: PhantomData<fn() -> P>,
}

impl<P: Projection> ProjectionHandler for TypedHandler<P> {
    fn name(&self) -> &'static str {
        P::NAME
    }

    fn seed(&self) -> Result<ProjectionSeed, StoreError> {
        ProjectionSeed::of::<P>()
    }

    fn stage(&self, layout: &StreamLayout, event: &StoredEvent) -> Result<Vec<u8>, StoreError> {
        let mut value: P = read_projection(layout)?;
        value.apply(event)?;
        projection::encode(&value)
    }
}

/// Lookup table from event kind to the projections that must be updated.
///
/// Handlers for a kind run in registration order. Kinds without handlers
/// are accepted and ignored, so new event kinds can be written before any
/// projection understands them.
///
/// # Examples
///
/// ```
/// use eventgit::{Dispatcher, TodoLists, TodoListsCount};
///
/// let dispatcher = Dispatcher::new()
///     .register::<TodoLists>()
///     .register::<TodoListsCount>();
/// assert_eq!(dispatcher.handlers_for("TodoListCreated"), ["todoLists", "TodoListsCount"]);
/// assert!(dispatcher.handlers_for("TodoListRenamed").is_empty());
/// ```
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Vec<Arc<dyn ProjectionHandler>>,
    table: HashMap<&'static str, Vec<usize>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("Dispatcher")
            .field("projections", &names)
            .finish()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register projection `P` for every kind in `P::KINDS`.
    ///
    /// Registering the same projection twice has no effect.
    pub fn register<P: Projection>(mut self) -> Self {
        if self.handlers.iter().any(|h| h.name() == P::NAME) {
            return self;
        }
        let slot = self.handlers.len();
        self.handlers.push(Arc::new(TypedHandler::<P> {
            _marker: PhantomData,
        }));
        for &kind in P::KINDS {
            self.table.entry(kind).or_default().push(slot);
        }
        self
    }

    /// Names of the projections updated by events of `kind`, in order.
    pub fn handlers_for(&self, kind: &str) -> Vec<&'static str> {
        self.table
            .get(kind)
            .map(|slots| slots.iter().map(|&i| self.handlers[i].name()).collect())
            .unwrap_or_default()
    }

    /// Seed values of every registered projection, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialize`] if a default value cannot be
    /// serialized.
    pub fn seeds(&self) -> Result<Vec<ProjectionSeed>, StoreError> {
        self.handlers.iter().map(|h| h.seed()).collect()
    }

    /// Apply `event` to every projection registered for its kind.
    ///
    /// Runs in two phases. First every affected projection is read, the
    /// event is folded in, and the result is serialized; a failure here
    /// leaves all projection files untouched. Then the staged values are
    /// written in registration order. An I/O failure during the second
    /// phase aborts the remaining writes, leaving earlier projections
    /// updated and later ones not.
    ///
    /// # Returns
    ///
    /// The number of projections rewritten (0 for unknown kinds).
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`] encountered.
    pub fn apply(&self, layout: &StreamLayout, event: &StoredEvent) -> Result<usize, StoreError> {
        let Some(slots) = self.table.get(event.kind.as_str()) else {
            tracing::debug!(kind = %event.kind, "no projections for event kind");
            return Ok(0);
        };

        let mut staged = Vec::with_capacity(slots.len());
        for &slot in slots {
            let handler = &self.handlers[slot];
            let bytes = handler.stage(layout, event)?;
            staged.push((handler.name(), bytes));
        }

        for (name, bytes) in &staged {
            projection::replace_file(&layout.projection_path(name), bytes).inspect_err(|e| {
                tracing::error!(
                    projection = %name,
                    error = %e,
                    "projection write failed; projections may disagree until repaired"
                );
            })?;
            tracing::debug!(projection = %name, kind = %event.kind, "projection updated");
        }

        Ok(staged.len())
    }
}
