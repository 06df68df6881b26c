//! Deduplication of concurrent identical dispatches
//!
//! The first caller for a key becomes the leader: its work is spawned onto
//! the runtime and published as a shared future. Callers arriving while that
//! future is pending join it instead of starting their own. The spawned task
//! removes its own entry when it finishes, so later callers start fresh.
//!
//! Each flight owns a cancellation token handed to its work. Every caller
//! that starts or joins a flight attaches its own token; the flight token is
//! cancelled only once all attached callers have been cancelled, so one
//! caller's deadline never cuts short work another caller still waits for.
//!
//! A cancelled flight is never joined. A caller arriving after cancellation
//! starts a new flight under the same key, even though the cancelled flight
//! may still have a request on the wire; the old task's result is discarded
//! and it does not evict the new entry when it finishes.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub type SharedFlight<V> = Shared<BoxFuture<'static, Option<V>>>;

struct Flight<V: Clone> {
    id: u64,
    cancel: CancellationToken,
    /// Attached callers whose own token has not fired yet
    live_callers: Arc<AtomicUsize>,
    future: SharedFlight<V>,
}

impl<V: Clone> Flight<V> {
    /// Cancels the flight once `caller` and every other attached caller are cancelled
    fn attach(&self, caller: &CancellationToken) {
        self.live_callers.fetch_add(1, Ordering::SeqCst);
        let caller = caller.clone();
        let flight = self.cancel.clone();
        let live_callers = Arc::clone(&self.live_callers);
        let id = self.id;
        tokio::spawn(async move {
            tokio::select! {
                _ = flight.cancelled() => {}
                _ = caller.cancelled() => {
                    if live_callers.fetch_sub(1, Ordering::SeqCst) == 1 {
                        debug!(flight = id, "Every caller gave up, cancelling flight");
                        flight.cancel();
                    }
                }
            }
        });
    }
}

/// Handle to a flight, either started or joined by the caller
pub struct FlightHandle<V: Clone> {
    pub future: SharedFlight<V>,
    /// True when this caller started the work
    pub leader: bool,
}

pub struct SingleFlight<K, V: Clone> {
    flights: Mutex<HashMap<K, Flight<V>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the pending flight for `key`, or spawns `work` as a new one
    ///
    /// `cancel` is the caller's own token. `work` receives the flight token,
    /// which fires only when every attached caller's token has fired. The
    /// shared future resolves to `None` only if the spawned task panicked.
    pub fn join_or_start<F, Fut>(
        self: &Arc<Self>,
        key: K,
        cancel: &CancellationToken,
        work: F,
    ) -> FlightHandle<V>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut flights = self.lock();
        if let Some(flight) = flights.get(&key) {
            if !flight.cancel.is_cancelled() {
                flight.attach(cancel);
                return FlightHandle {
                    future: flight.future.clone(),
                    leader: false,
                };
            }
            debug!(flight = flight.id, "Replacing cancelled flight");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let flight_token = CancellationToken::new();
        let registry = Arc::clone(self);
        let task_key = key.clone();
        let done = flight_token.clone();
        let fut = work(flight_token.clone());
        let handle = tokio::spawn(async move {
            let value = fut.await;
            registry.finish(&task_key, id);
            // Releases the caller watchers
            done.cancel();
            value
        });

        let future = async move {
            match handle.await {
                Ok(value) => Some(value),
                Err(e) => {
                    error!("Dispatch task failed: {}", e);
                    None
                }
            }
        }
        .boxed()
        .shared();

        let flight = Flight {
            id,
            cancel: flight_token,
            live_callers: Arc::new(AtomicUsize::new(0)),
            future: future.clone(),
        };
        flight.attach(cancel);
        flights.insert(key, flight);

        FlightHandle {
            future,
            leader: true,
        }
    }

    /// Whether the pending flight for `key` has been cancelled
    pub fn is_cancelled(&self, key: &K) -> Option<bool> {
        self.lock().get(key).map(|flight| flight.cancel.is_cancelled())
    }

    /// Number of flights still pending
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn finish(&self, key: &K, id: u64) {
        let mut flights = self.lock();
        if flights.get(key).is_some_and(|flight| flight.id == id) {
            flights.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Flight<V>>> {
        self.flights.lock().unwrap_or_else(|e| e.into_inner())
    }
}
