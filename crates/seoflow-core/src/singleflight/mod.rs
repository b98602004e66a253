//! Singleflight Coordinator
//!
//! At most one computation per key runs at a time. The first caller for a key
//! (the leader) spawns the computation; later callers (followers) subscribe to
//! the same `watch` channel and receive the leader's result, success or
//! failure. The computation runs on its own task, so a caller that gives up
//! (deadline, dropped future) never cancels work others are waiting on.
//!
//! Publishing the result and clearing the in-flight marker happen under one
//! lock: a caller arriving afterwards starts a new generation.

use crate::error::Failure;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

type Slot<T> = Option<Result<T, Failure>>;
type InFlight<T> = HashMap<String, (u64, watch::Receiver<Slot<T>>)>;

fn lock<T>(map: &Mutex<InFlight<T>>) -> MutexGuard<'_, InFlight<T>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Singleflight coordinator for results of type `T`
pub struct Singleflight<T> {
    inflight: Arc<Mutex<InFlight<T>>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl<T> Default for Singleflight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl<T> Singleflight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a coordinator. Cancelling `shutdown` cancels every running
    /// computation through the token it was handed.
    #[must_use]
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Run `computation` for `key` unless one is already in flight, then
    /// return the shared result.
    ///
    /// `computation` receives a cancellation token to pass down to the
    /// Resilient Invoker. It is only called when this caller leads.
    pub async fn execute<F, Fut>(&self, key: &str, computation: F) -> Result<T, Failure>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    {
        let mut rx = {
            let mut inflight = lock(&self.inflight);
            match inflight.get(key) {
                Some((generation, rx)) => {
                    debug!(key = %key, generation = *generation, "Joining in-flight computation");
                    rx.clone()
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.to_string(), (generation, rx.clone()));
                    debug!(key = %key, generation = generation, "Leading new computation");

                    let work = computation(self.shutdown.child_token());
                    self.spawn_leader(key.to_string(), generation, tx, work);
                    rx
                }
            }
        };

        let result = rx
            .wait_for(Option::is_some)
            .await
            .map(|slot| (*slot).clone());

        match result {
            Ok(Some(result)) => result,
            _ => Err(Failure::canceled(format!(
                "computation for {} was abandoned",
                key
            ))),
        }
    }

    fn spawn_leader<Fut>(
        &self,
        key: String,
        generation: u64,
        tx: watch::Sender<Slot<T>>,
        work: Fut,
    ) where
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    {
        let inflight = Arc::clone(&self.inflight);
        tokio::spawn(async move {
            let result = match tokio::spawn(work).await {
                Ok(result) => result,
                Err(e) => {
                    error!(key = %key, error = %e, "Singleflight computation aborted");
                    Err(Failure::internal(format!("computation for {} aborted", key)))
                }
            };

            let mut inflight = lock(&inflight);
            if inflight.get(&key).is_some_and(|(g, _)| *g == generation) {
                inflight.remove(&key);
            }
            tx.send_replace(Some(result));
            debug!(key = %key, generation = generation, "Computation finished, marker cleared");
        });
    }

    /// Whether a computation for `key` is running
    #[must_use]
    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.inflight).contains_key(key)
    }

    /// Number of running computations
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        lock(&self.inflight).len()
    }

    /// Cancel every running and future computation
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
