//! Persisted non-negative counters.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{GeofencingError, OrNotFound, Result};
use crate::storage::{Document, Store};
use crate::types::CounterId;

const SEQUENCE: &str = "counter";

/// How a counter event changes its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum CounterMode {
    /// Add one.
    Increment,
    /// Subtract one, stopping at zero.
    Decrement,
    /// Set to zero.
    Reset,
}

/// A named non-negative integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Counter {
    /// Counter identifier.
    pub counter_id: CounterId,
    /// Current value.
    pub value: u32,
}

impl Counter {
    /// Creates a counter at zero.
    #[must_use]
    pub const fn new(counter_id: CounterId) -> Self {
        Self {
            counter_id,
            value: 0,
        }
    }

    /// Adds one and returns the new value.
    pub fn increment(&mut self) -> u32 {
        self.value = self.value.saturating_add(1);
        self.value
    }

    /// Subtracts one unless already zero and returns the new value.
    pub fn decrement(&mut self) -> u32 {
        self.value = self.value.saturating_sub(1);
        self.value
    }

    /// Sets the value to zero.
    pub fn reset(&mut self) -> u32 {
        self.value = 0;
        self.value
    }

    /// Applies `mode` and returns the new value.
    pub fn apply(&mut self, mode: CounterMode) -> u32 {
        match mode {
            CounterMode::Increment => self.increment(),
            CounterMode::Decrement => self.decrement(),
            CounterMode::Reset => self.reset(),
        }
    }
}

impl Document for Counter {
    type Key = CounterId;
    const COLLECTION: &'static str = "counters";

    fn key(&self) -> CounterId {
        self.counter_id
    }
}

/// Counter operations over the document store.
#[derive(Debug, Clone)]
pub struct CounterStore {
    store: Arc<Store>,
}

impl CounterStore {
    /// Creates a counter store backed by `store`.
    #[must_use]
    pub const fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Creates a counter at zero and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn create(&self) -> Result<CounterId> {
        let scan_max = self
            .store
            .counters()
            .find_all()?
            .iter()
            .map(|c| c.counter_id)
            .max()
            .unwrap_or(0);
        let counter_id = self.store.next_id(SEQUENCE, scan_max)?;
        if counter_id == CounterId::MAX {
            return Err(GeofencingError::IdentifierSpaceExhausted("counters"));
        }

        self.store.counters().insert(Counter::new(counter_id))?;
        tracing::debug!(counter_id, "Counter created");
        Ok(counter_id)
    }

    /// Returns the counter with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::CounterNotFound`] if it does not exist.
    pub fn find(&self, counter_id: CounterId) -> Result<Counter> {
        self.store
            .counters()
            .find(&counter_id)
            .or_not_found(|| GeofencingError::CounterNotFound(counter_id))
    }

    /// Returns `true` if the counter exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn exists(&self, counter_id: CounterId) -> Result<bool> {
        Ok(self.store.counters().contains(&counter_id)?)
    }

    /// Returns the current value of the counter.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::CounterNotFound`] if it does not exist.
    pub fn value(&self, counter_id: CounterId) -> Result<u32> {
        Ok(self.find(counter_id)?.value)
    }

    /// Returns every counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn list(&self) -> Result<Vec<Counter>> {
        Ok(self.store.counters().find_all()?)
    }

    /// Applies `mode` to the counter and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::CounterNotFound`] if it does not exist.
    pub fn apply(&self, counter_id: CounterId, mode: CounterMode) -> Result<u32> {
        let value = self
            .store
            .counters()
            .update(&counter_id, |counter| counter.apply(mode))
            .or_not_found(|| GeofencingError::CounterNotFound(counter_id))?;
        tracing::debug!(counter_id, ?mode, value, "Counter updated");
        Ok(value)
    }

    /// Adds one to the counter.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::CounterNotFound`] if it does not exist.
    pub fn increment(&self, counter_id: CounterId) -> Result<u32> {
        self.apply(counter_id, CounterMode::Increment)
    }

    /// Subtracts one from the counter, stopping at zero.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::CounterNotFound`] if it does not exist.
    pub fn decrement(&self, counter_id: CounterId) -> Result<u32> {
        self.apply(counter_id, CounterMode::Decrement)
    }

    /// Sets the counter to zero.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::CounterNotFound`] if it does not exist.
    pub fn reset(&self, counter_id: CounterId) -> Result<u32> {
        self.apply(counter_id, CounterMode::Reset)
    }

    /// Deletes the counter.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::CounterNotFound`] if it does not exist.
    pub fn remove(&self, counter_id: CounterId) -> Result<()> {
        self.store
            .counters()
            .delete(&counter_id)
            .or_not_found(|| GeofencingError::CounterNotFound(counter_id))?;
        tracing::debug!(counter_id, "Counter removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters() -> CounterStore {
        CounterStore::new(Arc::new(Store::in_memory()))
    }

    #[test]
    fn test_decrement_floors_at_zero() {
        let mut counter = Counter::new(1);
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.decrement(), 0);
    }

    #[test]
    fn test_reset() {
        let mut counter = Counter::new(1);
        counter.increment();
        counter.increment();
        assert_eq!(counter.apply(CounterMode::Reset), 0);
    }

    #[test]
    fn test_create_assigns_sequential_ids() {
        let counters = counters();
        assert_eq!(counters.create().unwrap(), 1);
        assert_eq!(counters.create().unwrap(), 2);

        counters.remove(2).unwrap();
        assert_eq!(counters.create().unwrap(), 3);
    }

    #[test]
    fn test_store_operations() {
        let counters = counters();
        let id = counters.create().unwrap();

        assert_eq!(counters.increment(id).unwrap(), 1);
        assert_eq!(counters.increment(id).unwrap(), 2);
        assert_eq!(counters.decrement(id).unwrap(), 1);
        assert_eq!(counters.value(id).unwrap(), 1);
        assert_eq!(counters.reset(id).unwrap(), 0);
        assert_eq!(counters.decrement(id).unwrap(), 0);
        assert!(counters.exists(id).unwrap());
        assert_eq!(counters.list().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_counter_is_not_found() {
        let counters = counters();
        assert!(matches!(
            counters.increment(42),
            Err(GeofencingError::CounterNotFound(42))
        ));
        assert!(matches!(
            counters.remove(42),
            Err(GeofencingError::CounterNotFound(42))
        ));
        assert!(!counters.exists(42).unwrap());
    }
}
