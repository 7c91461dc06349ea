//! Actor loop that owns an aggregate and processes commands.
//!
//! Exactly one actor task exists per aggregate instance; it exclusively
//! owns the in-memory state and the stream version, and drains its `mpsc`
//! channel strictly in arrival order. This per-identifier single-writer
//! discipline is the load-bearing ordering guarantee: a command's events
//! become visible to the next command only after the whole batch has been
//! durably appended and folded.
//!
//! Public API: [`AggregateHandle`] (cloneable async handle) and
//! [`spawn_actor`] (factory that rehydrates state and starts the task).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::aggregate::{Aggregate, fold_stored};
use crate::command::CommandContext;
use crate::error::{ExecuteError, StateError};
use crate::event::encode_domain_event;
use crate::log::{EventLog, LogError};
use crate::snapshot::{Snapshot, load_snapshot, save_snapshot};
use crate::storage::StreamLayout;

/// Configuration for the actor loop.
///
/// Internal to the crate -- callers configure idle timeout through
/// [`AggregateStoreBuilder::idle_timeout`](crate::AggregateStoreBuilder::idle_timeout).
pub(crate) struct ActorConfig {
    /// How long the actor waits for a message before shutting down.
    /// An effectively infinite value means the actor never idles out.
    pub idle_timeout: Duration,
}

/// Result type sent back through the `Execute` reply channel.
type ExecuteResult<A> =
    Result<Vec<<A as Aggregate>::DomainEvent>, ExecuteError<<A as Aggregate>::Error>>;

/// Messages sent from `AggregateHandle` to the actor loop.
///
/// Each variant carries a `oneshot::Sender` for the actor to reply on
/// once the operation completes.
pub(crate) enum ActorMessage<A: Aggregate> {
    /// Execute a command against the aggregate.
    Execute {
        /// The domain command to execute.
        cmd: A::Command,
        /// Cross-cutting metadata (actor identity, correlation ID).
        ctx: CommandContext,
        /// Channel to send back the produced domain events or an error.
        reply: oneshot::Sender<ExecuteResult<A>>,
    },

    /// Retrieve the current aggregate state.
    GetState {
        /// Channel to send back a clone of the current state.
        reply: oneshot::Sender<Result<A, StateError>>,
    },

    /// Gracefully shut down the actor loop.
    #[allow(dead_code)] // Constructed only in tests.
    Shutdown,
}

/// The actor's exclusively-owned working set: aggregate state, the stream
/// version it reflects, and the log it appends to.
struct Actor<A: Aggregate> {
    instance_id: String,
    log: Arc<dyn EventLog>,
    layout: StreamLayout,
    state: A,
    version: u64,
}

impl<A: Aggregate> Actor<A> {
    /// Execute a single command: decide, persist the batch, fold.
    ///
    /// State and version advance only after `append` acknowledges the whole
    /// batch; a rejected or failed command leaves both untouched.
    async fn execute(&mut self, cmd: A::Command, ctx: &CommandContext) -> ExecuteResult<A> {
        // 1. Decide: run the pure command handler against current state.
        let domain_events = match self.state.handle(cmd) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "command rejected");
                return Err(ExecuteError::Domain(e));
            }
        };

        // 2. No-op commands produce no events.
        if domain_events.is_empty() {
            return Ok(domain_events);
        }

        // 3. Encode the batch with consecutive stream versions.
        let mut stored = Vec::with_capacity(domain_events.len());
        for (i, de) in domain_events.iter().enumerate() {
            let event =
                encode_domain_event::<A>(de, ctx, &self.instance_id, self.version + i as u64)
                    .map_err(|e| ExecuteError::Log(LogError::Codec(e)))?;
            stored.push(event);
        }

        // 4. Append all-or-nothing, suspending until acknowledged. Further
        //    commands for this instance queue in the channel meanwhile.
        let new_version = self
            .log
            .append(A::AGGREGATE_TYPE, &self.instance_id, self.version, stored.clone())
            .await?;

        // 5. Fold through the same stored-event path replay uses, so live
        //    state and replayed state cannot diverge.
        let mut state = std::mem::take(&mut self.state);
        for event in &stored {
            state = fold_stored(state, event);
        }
        self.state = state;
        self.version = new_version;

        tracing::info!(count = domain_events.len(), "events appended");

        Ok(domain_events)
    }

    /// Save an advisory snapshot of the current state. Failures are logged
    /// and swallowed: the snapshot only bounds replay cost.
    fn persist_snapshot(&self) {
        if self.version == 0 {
            return;
        }
        let snap = Snapshot {
            state: self.state.clone(),
            stream_version: self.version,
        };
        if let Err(e) = save_snapshot::<A>(&self.layout, &self.instance_id, &snap) {
            tracing::warn!(
                instance_id = %self.instance_id,
                error = %e,
                "failed to save snapshot on shutdown"
            );
        }
    }
}

/// Runs the aggregate actor loop.
///
/// Receives messages from `AggregateHandle` via the mpsc channel and
/// processes them one at a time. The loop exits when the channel closes
/// (all senders dropped), a `Shutdown` message is received, or the idle
/// timeout elapses. On exit a snapshot is saved.
async fn run_actor<A: Aggregate>(
    mut actor: Actor<A>,
    mut rx: mpsc::Receiver<ActorMessage<A>>,
    config: ActorConfig,
) {
    loop {
        let msg = tokio::time::timeout(config.idle_timeout, rx.recv()).await;

        match msg {
            // Received a message before the timeout elapsed.
            Ok(Some(msg)) => match msg {
                ActorMessage::Execute { cmd, ctx, reply } => {
                    let span = tracing::info_span!(
                        "execute",
                        aggregate_type = A::AGGREGATE_TYPE,
                        instance_id = %actor.instance_id,
                    );
                    let result = actor.execute(cmd, &ctx).instrument(span).await;
                    // If the receiver was dropped, the caller no longer cares
                    // about the result. Silently discard it.
                    let _ = reply.send(result);
                }

                ActorMessage::GetState { reply } => {
                    let _ = reply.send(Ok(actor.state.clone()));
                }

                ActorMessage::Shutdown => break,
            },
            // Channel closed: all senders dropped.
            Ok(None) => break,
            // Idle timeout elapsed with no messages.
            Err(_elapsed) => {
                tracing::info!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    instance_id = %actor.instance_id,
                    "actor idle, shutting down"
                );
                break;
            }
        }
    }
    // Loop exited: Shutdown received, channel closed, or idle timeout.
    actor.persist_snapshot();
}

/// Async handle to a running aggregate actor.
///
/// Lightweight, cloneable, and `Send + Sync`. Communicates with the
/// actor task over a bounded channel; all clones feed the same queue, so
/// ordering across a single handle's callers is arrival order.
#[derive(Debug)]
pub struct AggregateHandle<A: Aggregate> {
    sender: mpsc::Sender<ActorMessage<A>>,
}

// Manual `Clone`: only the `Sender` is cloned, so no bound on `A` beyond
// `Aggregate` is needed.
impl<A: Aggregate> Clone for AggregateHandle<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<A: Aggregate> AggregateHandle<A> {
    /// Send a command to the aggregate and wait for the result.
    ///
    /// # Returns
    ///
    /// The domain events produced by the command on success.
    ///
    /// # Errors
    ///
    /// * [`ExecuteError::Domain`] -- the aggregate rejected the command.
    /// * [`ExecuteError::Log`] -- the event log refused or failed the append.
    /// * [`ExecuteError::ActorGone`] -- the actor task has exited.
    pub async fn execute(
        &self,
        cmd: A::Command,
        ctx: CommandContext,
    ) -> Result<Vec<A::DomainEvent>, ExecuteError<A::Error>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::Execute {
                cmd,
                ctx,
                reply: tx,
            })
            .await
            .map_err(|_| ExecuteError::ActorGone)?;
        rx.await.map_err(|_| ExecuteError::ActorGone)?
    }

    /// Read the current aggregate state.
    ///
    /// Returns a clone of the state as of the last fully-applied command.
    ///
    /// # Errors
    ///
    /// * [`StateError::ActorGone`] -- the actor task has exited.
    pub async fn state(&self) -> Result<A, StateError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::GetState { reply: tx })
            .await
            .map_err(|_| StateError::ActorGone)?;
        rx.await.map_err(|_| StateError::ActorGone)?
    }

    /// Check whether the actor backing this handle is still running.
    ///
    /// Returns `false` if the actor task has exited (e.g. due to idle
    /// timeout or shutdown). The store uses this to evict stale handles
    /// from its cache and re-spawn the actor on the next `get` call.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Build a handle around a raw sender. Used by store cache tests.
    #[cfg(test)]
    pub(crate) fn from_sender(sender: mpsc::Sender<ActorMessage<A>>) -> Self {
        Self { sender }
    }
}

/// Spawn a new aggregate actor with explicit configuration.
///
/// Rehydrates state before the task starts: the advisory snapshot seeds
/// the fold when present, then the log tail from the snapshot's version is
/// folded on top. Driven by snapshot or by full replay, the resulting
/// state is identical.
///
/// # Errors
///
/// Returns [`StateError`] if the snapshot or event log cannot be read.
pub(crate) async fn spawn_actor_with_config<A: Aggregate>(
    instance_id: &str,
    log: Arc<dyn EventLog>,
    layout: StreamLayout,
    config: ActorConfig,
) -> Result<AggregateHandle<A>, StateError> {
    let snapshot = load_snapshot::<A>(&layout, instance_id).map_err(LogError::Io)?;
    let (mut state, mut version) = match snapshot {
        Some(snap) => (snap.state, snap.stream_version),
        None => (A::default(), 0),
    };

    let tail = log.read(A::AGGREGATE_TYPE, instance_id, version).await?;
    for event in &tail {
        state = fold_stored(state, event);
    }
    version += tail.len() as u64;

    let actor = Actor {
        instance_id: instance_id.to_owned(),
        log,
        layout,
        state,
        version,
    };

    let (tx, rx) = mpsc::channel::<ActorMessage<A>>(32);
    tokio::spawn(run_actor(actor, rx, config));

    Ok(AggregateHandle { sender: tx })
}

/// Spawn a new aggregate actor for `instance_id` on the given log.
///
/// The actor created by this function uses an effectively infinite idle
/// timeout. For configurable timeouts, use
/// [`AggregateStoreBuilder::idle_timeout`](crate::AggregateStoreBuilder::idle_timeout).
///
/// # Errors
///
/// Returns [`StateError`] if the snapshot or event log cannot be read.
pub async fn spawn_actor<A: Aggregate>(
    instance_id: &str,
    log: Arc<dyn EventLog>,
    layout: StreamLayout,
) -> Result<AggregateHandle<A>, StateError> {
    // Use an effectively infinite timeout so the actor never idles out.
    // `u64::MAX / 2` avoids overflow when tokio adds the timeout duration
    // to the current `Instant`.
    let config = ActorConfig {
        idle_timeout: Duration::from_secs(u64::MAX / 2),
    };
    spawn_actor_with_config(instance_id, log, layout, config).await
}
