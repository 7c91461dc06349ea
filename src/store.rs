//! Top-level entry point that composes actor spawning and handle caching
//! into a single [`AggregateStore`] type.
//!
//! The store is opened via [`AggregateStoreBuilder`], which configures the
//! event log backend, the local directory for streams and snapshots, and
//! the actor idle timeout.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::actor::{ActorConfig, AggregateHandle, spawn_actor_with_config};
use crate::aggregate::Aggregate;
use crate::error::StateError;
use crate::log::{EventLog, JsonlEventLog};
use crate::storage::StreamLayout;

/// Type-erased handle cache keyed by `(TypeId, instance_id)`.
///
/// `TypeId` identifies the aggregate type at runtime; the `String` is the
/// instance ID. `Box<dyn Any + Send + Sync>` lets a single map hold
/// `AggregateHandle<A>` for any concrete `A`. Downcasting recovers the
/// typed handle.
type HandleCache = HashMap<(TypeId, String), Box<dyn Any + Send + Sync>>;

/// Default idle timeout for actors: 5 minutes.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Look up a live cached handle for `key`, downcasting to the concrete
/// aggregate type. Dead handles (actor exited) are treated as a miss.
fn cached_alive<A: Aggregate>(
    cache: &HandleCache,
    key: &(TypeId, String),
) -> Option<AggregateHandle<A>> {
    cache
        .get(key)
        .and_then(|boxed| boxed.downcast_ref::<AggregateHandle<A>>())
        .filter(|handle| handle.is_alive())
        .cloned()
}

/// Central registry that manages aggregate instance lifecycles.
///
/// The cache guarantees at most one live actor per `(aggregate type,
/// instance)` within this store -- the per-identifier single-writer
/// discipline. Idle actors shut down after saving a snapshot; the next
/// [`get`](AggregateStore::get) transparently re-spawns them from
/// snapshot + log catch-up.
///
/// `Clone` is cheap -- all internal state is `Arc`-wrapped.
#[derive(Clone)]
pub struct AggregateStore {
    log: Arc<dyn EventLog>,
    layout: StreamLayout,
    cache: Arc<RwLock<HandleCache>>,
    idle_timeout: Duration,
}

// Manual `Debug` because `dyn Any` is not `Debug` and we don't want to
// expose cache internals.
impl std::fmt::Debug for AggregateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateStore")
            .field("base_dir", &self.layout.base_dir())
            .finish()
    }
}

impl AggregateStore {
    /// Start building a store rooted at `base_dir`.
    pub fn builder(base_dir: impl AsRef<Path>) -> AggregateStoreBuilder {
        AggregateStoreBuilder {
            layout: StreamLayout::new(base_dir.as_ref()),
            log: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Get a handle to an aggregate instance, spawning its actor if needed.
    ///
    /// If the actor is already running (cached and alive), returns a clone
    /// of the existing handle. Otherwise, rehydrates state from snapshot
    /// and log and spawns a new actor.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if rehydration from the event log fails.
    pub async fn get<A: Aggregate>(&self, id: &str) -> Result<AggregateHandle<A>, StateError> {
        let key = (TypeId::of::<A>(), id.to_owned());

        // Fast path: check cache with read lock.
        {
            let cache = self.cache.read().await;
            if let Some(handle) = cached_alive::<A>(&cache, &key) {
                return Ok(handle);
            }
        }

        // Slow path: hold the write lock across re-check, spawn, and
        // insert. A racing `get` that also missed the fast path blocks
        // here and finds the winner's handle on its re-check, so at most
        // one live actor exists per `(TypeId, instance_id)` -- the
        // single-writer guarantee depends on this.
        let mut cache = self.cache.write().await;
        if let Some(handle) = cached_alive::<A>(&cache, &key) {
            return Ok(handle);
        }
        cache.remove(&key);

        tracing::debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            instance_id = %id,
            "spawning actor"
        );

        let config = ActorConfig {
            idle_timeout: self.idle_timeout,
        };
        let handle = spawn_actor_with_config::<A>(
            id,
            Arc::clone(&self.log),
            self.layout.clone(),
            config,
        )
        .await?;

        cache.insert(key, Box::new(handle.clone()));
        Ok(handle)
    }

    /// The on-disk layout this store uses for streams and snapshots.
    pub fn layout(&self) -> &StreamLayout {
        &self.layout
    }
}

/// Builder for configuring and opening an [`AggregateStore`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use portfolio_es::AggregateStore;
///
/// let dir = std::env::temp_dir().join("portfolio-es-doc");
/// let store = AggregateStore::builder(&dir)
///     .idle_timeout(Duration::from_secs(60))
///     .open();
/// ```
pub struct AggregateStoreBuilder {
    layout: StreamLayout,
    log: Option<Arc<dyn EventLog>>,
    idle_timeout: Duration,
}

impl AggregateStoreBuilder {
    /// Use a specific event log backend.
    ///
    /// If not called, the store uses a [`JsonlEventLog`] rooted at the
    /// builder's base directory.
    pub fn event_log(mut self, log: impl EventLog + 'static) -> Self {
        self.log = Some(Arc::new(log));
        self
    }

    /// Set the idle timeout for actor eviction.
    ///
    /// Actors that receive no messages for this duration shut down and
    /// save a snapshot. The next [`get`](AggregateStore::get) call
    /// transparently re-spawns the actor from snapshot + catch-up.
    ///
    /// Defaults to 5 minutes.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Build the [`AggregateStore`].
    pub fn open(self) -> AggregateStore {
        let log = self
            .log
            .unwrap_or_else(|| Arc::new(JsonlEventLog::new(self.layout.clone())));

        AggregateStore {
            log,
            layout: self.layout,
            cache: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout: self.idle_timeout,
        }
    }
}
