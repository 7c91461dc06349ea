//! Event-sourced trading portfolios with per-instance actor isolation.
//!
//! State is never mutated directly: commands are validated against the
//! current state and turned into events, and state is always the fold of
//! those events. Each portfolio instance is owned by a single actor task,
//! which serializes writes; idle actors snapshot and shut down, and are
//! rehydrated from snapshot + event-log catch-up on the next access.

mod actor;
pub use actor::{AggregateHandle, spawn_actor};
mod aggregate;
pub use aggregate::{Aggregate, fold_stored, replay};
mod command;
mod error;
mod event;
mod log;
pub mod portfolio;
mod snapshot;
mod storage;
mod store;

pub use command::CommandContext;
pub use error::{ExecuteError, StateError};
pub use event::{EventMetadata, StoredEvent};
pub use log::{EventLog, JsonlEventLog, LogError, MemoryEventLog};
pub use snapshot::{Snapshot, load_snapshot, save_snapshot};
pub use storage::StreamLayout;
pub use store::{AggregateStore, AggregateStoreBuilder};
