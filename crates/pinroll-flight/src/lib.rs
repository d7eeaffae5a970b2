//! pinroll-flight — single-flight memoization for async computations.
//!
//! [`SingleFlight`] keeps at most one computation per key. The first caller
//! for a key stores the computation *before* awaiting it, so callers that
//! arrive while it is pending join the same future instead of starting
//! their own. A successful result is kept for the lifetime of the cache.
//!
//! # Eviction
//!
//! - A result whose error reports [`Cancellable::is_cancelled`] is always
//!   evicted, so the next caller starts fresh instead of replaying the
//!   cancellation.
//! - With [`EvictionPolicy::OnAnyError`] every error is evicted.
//! - If every caller of a pending entry is dropped before it completes,
//!   the entry is evicted with it.
//!
//! ```text
//! get_or_compute(k)
//!   ├── entry for k?  ── yes ──> join (await shared future)
//!   └── no ──> store compute(k).shared() ──> await
//!                     └── Err(cancelled) ──> evict k
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Errors that can tell a cancellation apart from other failures.
pub trait Cancellable {
    fn is_cancelled(&self) -> bool;
}

/// Which failed results are dropped from the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evict cancellations only; other errors stay cached.
    #[default]
    OnCancellation,
    /// Evict every error.
    OnAnyError,
}

type Flight<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;
type Entries<K, V, E> = Arc<Mutex<HashMap<K, Flight<V, E>>>>;

/// Memoizing cache with one in-flight or completed computation per key.
pub struct SingleFlight<K, V, E> {
    entries: Entries<K, V, E>,
    policy: EvictionPolicy,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Cancellable + Clone + Send + Sync + 'static,
{
    /// Create a cache that evicts cancellations only.
    pub fn new() -> Self {
        Self::with_policy(EvictionPolicy::OnCancellation)
    }

    pub fn with_policy(policy: EvictionPolicy) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            policy,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Return the result for `key`, invoking `compute` only if no entry
    /// exists yet.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let flight = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(existing) => {
                    trace!("joining existing computation");
                    existing.clone()
                }
                None => {
                    let flight = compute(key.clone()).boxed().shared();
                    entries.insert(key.clone(), flight.clone());
                    trace!("started new computation");
                    flight
                }
            }
        };

        let mut waiter = Waiter {
            entries: &self.entries,
            key: Some(key),
            flight,
        };
        let result = (&mut waiter.flight).await;
        let key = waiter.key.take();

        if let (Some(key), Err(err)) = (key, &result) {
            let cancelled = err.is_cancelled();
            if (cancelled || self.policy == EvictionPolicy::OnAnyError)
                && evict(&self.entries, &key, &waiter.flight)
            {
                debug!(cancelled, "evicted failed computation");
            }
        }
        result
    }

    /// Completed result for `key`, if any. Pending entries return `None`.
    pub fn peek(&self, key: &K) -> Option<Result<V, E>> {
        self.entries.lock().get(key).and_then(|f| f.peek().cloned())
    }

    /// Whether an entry (pending or completed) exists for `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Cancellable + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `key` if it still maps to `flight`. A newer entry started after an
/// earlier eviction is left alone.
fn evict<K, V, E>(entries: &Entries<K, V, E>, key: &K, flight: &Flight<V, E>) -> bool
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    let mut entries = entries.lock();
    let current = entries.get(key).is_some_and(|f| f.ptr_eq(flight));
    if current {
        entries.remove(key);
    }
    current
}

/// One caller's handle on a flight. Dropping it mid-await (the caller was
/// cancelled) evicts the entry when no other caller is left to drive it.
struct Waiter<'a, K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    entries: &'a Entries<K, V, E>,
    key: Option<K>,
    flight: Flight<V, E>,
}

impl<K, V, E> Drop for Waiter<'_, K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if self.flight.peek().is_some() {
            return;
        }
        // One handle lives in the map, one here.
        if self.flight.strong_count() == Some(2) && evict(self.entries, &key, &self.flight) {
            debug!("evicted abandoned computation");
        }
    }
}
