//! Aggregate trait and replay helpers.

use serde::{Serialize, de::DeserializeOwned};

use crate::event::{StoredEvent, decode_domain_event};

/// A domain aggregate whose state is derived from its event history.
///
/// The implementing type itself serves as the aggregate's state.
/// State is built by folding domain events through the [`apply`](Aggregate::apply) method.
///
/// # Associated Types
///
/// - `Command`: the set of commands this aggregate can handle.
/// - `DomainEvent`: the set of events this aggregate can produce and apply.
/// - `Error`: command rejection / validation error.
///
/// # Contract
///
/// - [`handle`](Aggregate::handle) must be a pure decision function: no I/O, no side effects.
///   It validates a command against the current state and returns zero or more events.
///   Rejection never produces an event.
/// - [`apply`](Aggregate::apply) must be a pure, total function. It takes ownership of
///   the current state and a reference to a domain event, returning the next state.
///   Events that do not apply to the current state should be ignored.
pub trait Aggregate:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identifies this aggregate type (e.g. "portfolio"). Used as a directory name.
    const AGGREGATE_TYPE: &'static str;

    /// The set of commands this aggregate can handle.
    type Command: Send + 'static;

    /// The set of events this aggregate can produce and apply.
    type DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + 'static;

    /// Command rejection / validation error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate a command against the current state and produce events.
    ///
    /// Returns `Ok(vec![])` if the command is a no-op.
    /// Returns `Err` to reject the command.
    fn handle(&self, cmd: Self::Command) -> Result<Vec<Self::DomainEvent>, Self::Error>;

    /// Apply a single event to produce the next state.
    ///
    /// Unknown or non-applicable event variants should be ignored (return
    /// `self` unchanged) to maintain forward compatibility.
    fn apply(self, event: &Self::DomainEvent) -> Self;
}

/// Fold one stored event onto an aggregate state.
///
/// Attempts to decode the envelope into `A::DomainEvent` and delegates to
/// [`Aggregate::apply`]. Unknown or malformed events leave the state
/// unchanged, so a log written by a newer version of the domain can still
/// be replayed by an older one.
pub fn fold_stored<A: Aggregate>(state: A, event: &StoredEvent) -> A {
    match decode_domain_event::<A>(event) {
        Some(domain_event) => state.apply(&domain_event),
        None => state,
    }
}

/// Rebuild an aggregate state by folding a full ordered event history from
/// the default (empty) state.
///
/// This is the replay-determinism anchor: for any event sequence, the
/// result is identical to folding the same events incrementally as they
/// were appended.
pub fn replay<'a, A, I>(events: I) -> A
where
    A: Aggregate,
    I: IntoIterator<Item = &'a StoredEvent>,
{
    events.into_iter().fold(A::default(), fold_stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandContext;
    use crate::event::encode_domain_event;
    use crate::portfolio::{PortfolioCommand, PortfolioState};

    /// Encode a command's events as stored events, starting at `version`.
    fn stored_events(
        state: &PortfolioState,
        cmd: PortfolioCommand,
        version: u64,
    ) -> Vec<StoredEvent> {
        let events = state.handle(cmd).expect("command should succeed");
        events
            .iter()
            .enumerate()
            .map(|(i, e)| {
                encode_domain_event::<PortfolioState>(
                    e,
                    &CommandContext::default(),
                    "p-1",
                    version + i as u64,
                )
                .expect("encode should succeed")
            })
            .collect()
    }

    #[test]
    fn replay_from_stored_events_matches_live_fold() {
        let mut live = PortfolioState::default();
        let mut log: Vec<StoredEvent> = Vec::new();

        for cmd in [
            PortfolioCommand::Open {
                name: "alice".into(),
            },
            PortfolioCommand::Liquidate,
        ] {
            let stored = stored_events(&live, cmd, log.len() as u64);
            for event in &stored {
                live = fold_stored(live, event);
            }
            log.extend(stored);
        }

        let replayed: PortfolioState = replay(&log);
        assert_eq!(replayed, live);
    }

    #[test]
    fn unknown_event_type_is_skipped() {
        let event = StoredEvent {
            event_id: uuid::Uuid::new_v4(),
            aggregate_type: "portfolio".into(),
            instance_id: "p-1".into(),
            stream_version: 0,
            event_type: "SplitAnnounced".into(),
            payload: serde_json::json!({"symbol": "ACME", "ratio": 2}),
            metadata: crate::event::EventMetadata {
                aggregate_type: "portfolio".into(),
                instance_id: "p-1".into(),
                actor: None,
                correlation_id: None,
            },
            recorded_at: 0,
        };
        let state = fold_stored(PortfolioState::default(), &event);
        assert_eq!(state, PortfolioState::default());
    }

    #[test]
    fn replay_of_empty_history_is_default() {
        let replayed: PortfolioState = replay(std::iter::empty());
        assert_eq!(replayed, PortfolioState::Uninitialized);
    }
}
