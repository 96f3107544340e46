//! Value database contract and an in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::{DhtValue, Kuid};

/// Values held by this node, keyed by `(primary_key, secondary_key)`.
pub trait Database: Send + Debug {
    /// All values stored under `primary_key`.
    fn get(&self, primary_key: &Kuid) -> Vec<DhtValue>;

    /// Returns `true` if the value was accepted.
    fn store(&mut self, value: DhtValue) -> bool;

    /// Returns the removed value, if any.
    fn remove(&mut self, primary_key: &Kuid, secondary_key: &Kuid) -> Option<DhtValue>;

    fn key_set(&self) -> Vec<Kuid>;

    /// Number of stored values.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [Database] shared between the engine and whoever embeds it.
pub type SharedDatabase = Arc<Mutex<dyn Database>>;

/// Locks a [SharedDatabase], recovering the guard if a holder panicked.
pub fn lock_database(database: &SharedDatabase) -> MutexGuard<'_, dyn Database + 'static> {
    database
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Maximum values stored under a single primary key.
pub const DEFAULT_MAX_VALUES_PER_KEY: usize = 5;

#[derive(Debug)]
pub struct InMemoryDatabase {
    values: HashMap<Kuid, BTreeMap<Kuid, DhtValue>>,
    max_values_per_key: usize,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            max_values_per_key: DEFAULT_MAX_VALUES_PER_KEY,
        }
    }

    pub fn with_max_values_per_key(mut self, max_values_per_key: usize) -> Self {
        self.max_values_per_key = max_values_per_key;
        self
    }

    /// Wraps this database to share it with an [crate::rpc::Rpc].
    pub fn shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl Database for InMemoryDatabase {
    fn get(&self, primary_key: &Kuid) -> Vec<DhtValue> {
        self.values
            .get(primary_key)
            .map(|values| values.values().cloned().collect())
            .unwrap_or_default()
    }

    fn store(&mut self, value: DhtValue) -> bool {
        if value.value().is_empty() {
            return false;
        }

        let values = self.values.entry(*value.primary_key()).or_default();

        if !values.contains_key(value.secondary_key()) && values.len() >= self.max_values_per_key {
            return false;
        }

        values.insert(*value.secondary_key(), value);
        true
    }

    fn remove(&mut self, primary_key: &Kuid, secondary_key: &Kuid) -> Option<DhtValue> {
        let values = self.values.get_mut(primary_key)?;
        let removed = values.remove(secondary_key);

        if values.is_empty() {
            self.values.remove(primary_key);
        }

        removed
    }

    fn key_set(&self) -> Vec<Kuid> {
        self.values.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn store_get_remove() {
        let mut database = InMemoryDatabase::new();
        let key = Kuid::random();
        let creator = Kuid::random();

        assert!(database.store(DhtValue::new(key, creator, Bytes::from_static(b"v1"))));
        assert!(database.store(DhtValue::new(key, creator, Bytes::from_static(b"v2"))));

        let values = database.get(&key);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value(), &Bytes::from_static(b"v2"));
        assert_eq!(database.key_set(), vec![key]);

        assert!(database.remove(&key, &creator).is_some());
        assert!(database.is_empty());
        assert!(database.key_set().is_empty());
    }

    #[test]
    fn rejects_empty_and_excess_values() {
        let mut database = InMemoryDatabase::new().with_max_values_per_key(2);
        let key = Kuid::random();

        assert!(!database.store(DhtValue::new(key, Kuid::random(), Bytes::new())));
        assert!(database.store(DhtValue::new(key, Kuid::random(), Bytes::from_static(b"a"))));
        assert!(database.store(DhtValue::new(key, Kuid::random(), Bytes::from_static(b"b"))));
        assert!(!database.store(DhtValue::new(key, Kuid::random(), Bytes::from_static(b"c"))));
        assert_eq!(database.len(), 2);
    }

    #[test]
    fn shared_lock() {
        let database = InMemoryDatabase::new().shared();
        let key = Kuid::random();

        lock_database(&database).store(DhtValue::new(key, Kuid::random(), Bytes::from_static(b"a")));

        assert_eq!(lock_database(&database).get(&key).len(), 1);
    }
}
