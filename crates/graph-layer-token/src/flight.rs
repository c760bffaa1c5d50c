//! Keyed single-flight coordinator.
//!
//! The first caller for a key spawns the operation; callers arriving while it
//! is in flight share its eventual result. The entry is torn down once the
//! last waiter departs. The operation runs on its own task, so a waiter that
//! gives up never aborts the upstream call for the others.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

/// Kinds of gated token operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlightKey {
    /// Password-grant acquisition of an application's anonymous token.
    Acquire(String),
    /// Refresh of an application's anonymous token.
    Refresh(String),
    /// Refresh of one delegated user token, keyed by token id.
    RefreshUser(String),
}

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Flight<T, E> {
    result: SharedResult<T, E>,
    waiters: usize,
}

type FlightMap<K, T, E> = Arc<Mutex<HashMap<K, Flight<T, E>>>>;

/// One in-flight operation per key.
pub struct SingleFlight<K, T, E> {
    flights: FlightMap<K, T, E>,
}

impl<K, T, E> Default for SingleFlight<K, T, E> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<tokio::task::JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` for `key`, or join the flight already running for it.
    ///
    /// `operation` is only invoked by the caller that starts the flight.
    pub async fn run<F, Fut>(&self, key: K, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let result = {
            let mut flights = self.flights.lock();
            let flight = flights.entry(key.clone()).or_insert_with(|| {
                let handle = tokio::spawn(operation());
                let result = async move { handle.await.map_err(E::from).and_then(|r| r) };
                Flight {
                    result: result.boxed().shared(),
                    waiters: 0,
                }
            });
            flight.waiters += 1;
            flight.result.clone()
        };

        let _departure = Departure {
            flights: Arc::clone(&self.flights),
            key: Some(key),
        };
        result.await
    }

    /// Number of keys with an operation in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

/// Decrements the waiter count on drop, removing the entry at zero.
struct Departure<K: Eq + Hash, T, E> {
    flights: FlightMap<K, T, E>,
    key: Option<K>,
}

impl<K: Eq + Hash, T, E> Drop for Departure<K, T, E> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get_mut(&key) {
            flight.waiters -= 1;
            if flight.waiters == 0 {
                flights.remove(&key);
            }
        }
    }
}

impl<K, T, E> std::fmt::Debug for SingleFlight<K, T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.flights.lock().len())
            .finish()
    }
}
