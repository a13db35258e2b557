//! Keyed singleflight for cache population.
//!
//! On a cache miss, exactly one producer runs per key; everyone else who
//! misses on the same key while it is in flight subscribes to the same
//! outcome. The outcome (success or failure) is published to all
//! subscribers at once over a watch channel, then the flight entry retires
//! so later requests start fresh.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::PipelineError;

type Table<T> = Arc<Mutex<HashMap<String, watch::Receiver<Option<T>>>>>;

/// Role handed to a joiner: leaders run the production, waiters subscribe.
pub enum Flight<T> {
    Leader(FlightSlot<T>, watch::Receiver<Option<T>>),
    Waiter(watch::Receiver<Option<T>>),
}

/// The leader's obligation to publish an outcome.
///
/// Dropping the slot without completing (a panicked producer) retires the
/// flight; subscribers observe the closed channel instead of hanging.
pub struct FlightSlot<T> {
    key: String,
    tx: Option<watch::Sender<Option<T>>>,
    table: Table<T>,
}

impl<T> FlightSlot<T> {
    /// Publish the shared outcome and retire the flight.
    pub fn complete(mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(value));
        }
        self.table
            .lock()
            .expect("flight table lock poisoned")
            .remove(&self.key);
    }
}

impl<T> Drop for FlightSlot<T> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.table
                .lock()
                .expect("flight table lock poisoned")
                .remove(&self.key);
        }
    }
}

/// The in-flight production table.
pub struct FlightTable<T: Clone> {
    table: Table<T>,
}

impl<T: Clone> FlightTable<T> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the flight for `key`: the first joiner becomes the leader, the
    /// rest become waiters on the leader's outcome.
    pub fn join(&self, key: &str) -> Flight<T> {
        let mut table = self.table.lock().expect("flight table lock poisoned");
        if let Some(rx) = table.get(key) {
            return Flight::Waiter(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        table.insert(key.to_string(), rx.clone());
        Flight::Leader(
            FlightSlot {
                key: key.to_string(),
                tx: Some(tx),
                table: self.table.clone(),
            },
            rx,
        )
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.table.lock().unwrap().len()
    }
}

impl<T: Clone> Default for FlightTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until the flight publishes its outcome.
pub async fn await_outcome<T: Clone>(
    mut rx: watch::Receiver<Option<T>>,
) -> Result<T, PipelineError> {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(value) = current {
            return Ok(value);
        }
        if rx.changed().await.is_err() {
            // Producer died without publishing.
            let last = rx.borrow().clone();
            return last.ok_or_else(|| {
                PipelineError::Internal("production abandoned before completion".to_string())
            });
        }
    }
}
