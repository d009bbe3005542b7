//! Command contract: validate input, then produce exactly one domain event.

use crate::event::DomainEvent;

/// A request to change state, checked before the storage engine runs.
///
/// [`handle`](Command::handle) must be a pure decision function: no I/O,
/// no side effects. It either rejects the command with its validation error
/// or yields the single event that will be recorded.
pub trait Command: Send + 'static {
    /// Event produced when the command is accepted.
    type Event: DomainEvent + Send + 'static;

    /// Validation failure type, reported to callers with its cause.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate the command and produce its event.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when a field fails its precondition.
    fn handle(self) -> Result<Self::Event, Self::Error>;
}
