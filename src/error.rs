//! Crate-level error types for command execution and state retrieval.

use crate::log::LogError;

/// Error returned when executing a command against an aggregate fails.
///
/// Generic over `E`, the domain-specific rejection type produced by the
/// aggregate's command handler (e.g. "insufficient shares").
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E: std::error::Error + Send + Sync + 'static> {
    /// Command rejected by aggregate logic.
    ///
    /// Wraps the domain-specific error returned from the aggregate's
    /// command handler, forwarding its `Display` and `Error` impls.
    /// No events were appended and no state changed.
    #[error(transparent)]
    Domain(E),

    /// The event log refused or failed the append.
    ///
    /// Includes version conflicts, storage I/O failures, and codec
    /// failures. The batch was not applied: `append` is all-or-nothing.
    #[error("event log error: {0}")]
    Log(#[from] LogError),

    /// The aggregate's actor task has shut down, so no further commands
    /// can be processed through this handle.
    #[error("aggregate actor is no longer running")]
    ActorGone,
}

/// Error returned when reading the current state of an aggregate fails.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The event log could not be read while rehydrating state.
    #[error("event log error: {0}")]
    Log(#[from] LogError),

    /// The aggregate's actor task has shut down, so its state can no
    /// longer be queried through this handle.
    #[error("aggregate actor is no longer running")]
    ActorGone,
}
