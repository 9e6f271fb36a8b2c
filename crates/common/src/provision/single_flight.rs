use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinError;

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Collapses concurrent work for the same key into one spawned task
///
/// The first caller for a key spawns the work; everyone arriving while it
/// is in flight awaits the same shared result. The work runs on its own
/// task, so a caller dropping its future never tears it down halfway.
pub(crate) struct SingleFlight<K, T, E>
where
    K: Eq + Hash,
{
    flights: Arc<Mutex<HashMap<K, Flight<T, E>>>>,
}

impl<K, T, E> Clone for SingleFlight<K, T, E>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            flights: self.flights.clone(),
        }
    }
}

impl<K, T, E> std::fmt::Debug for SingleFlight<K, T, E>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash,
{
    /// Number of keys with work in flight
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

impl<K, T, E> Default for SingleFlight<K, T, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Removes the flight entry once the task is done, even if it panicked
struct FlightGuard<K, T, E>
where
    K: Eq + Hash,
{
    key: Option<K>,
    flights: Arc<Mutex<HashMap<K, Flight<T, E>>>>,
}

impl<K, T, E> Drop for FlightGuard<K, T, E>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.flights.lock().remove(&key);
        }
    }
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, starting it with `work` if none exists
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut flights = self.flights.lock();
            match flights.get(&key) {
                Some(flight) => flight.clone(),
                None => {
                    let guard = FlightGuard {
                        key: Some(key.clone()),
                        flights: self.flights.clone(),
                    };
                    let fut = work();
                    // the entry is inserted before the lock is released, so
                    // the guard cannot remove it before it exists
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        fut.await
                    });
                    let flight = async move { handle.await.map_err(E::from)? }
                        .boxed()
                        .shared();
                    flights.insert(key, flight.clone());
                    flight
                }
            }
        };
        flight.await
    }
}
