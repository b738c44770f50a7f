//! Document store.
//!
//! Each entity type lives in its own [`Collection`], keyed by the entity's
//! identity. Collections are held in memory and, for a store opened on a
//! directory, written back as one pretty-printed JSON file per collection
//! after every mutation.
//!
//! Updates are per document: [`Collection::update`] runs a closure on the
//! stored value under the collection lock. Read-modify-write sequences that
//! span two calls are not atomic.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::beacon::Beacon;
use crate::counter::Counter;
use crate::device::Device;
use crate::event::Event;
use crate::geofence::GeofenceRecord;
use crate::mail::{AddressOnHold, ConfirmedAddress};

/// Errors raised by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No document with the given key exists.
    #[error("No document '{key}' in collection '{collection}'")]
    NotFound {
        /// Collection name.
        collection: &'static str,
        /// Rendered key.
        key: String,
    },

    /// A document with the given key already exists.
    #[error("Document '{key}' already exists in collection '{collection}'")]
    AlreadyExists {
        /// Collection name.
        collection: &'static str,
        /// Rendered key.
        key: String,
    },

    /// Reading or writing a collection file failed.
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        /// Collection file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A collection file could not be encoded or decoded.
    #[error("Invalid collection file {}: {source}", .path.display())]
    Serialization {
        /// Collection file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A writer panicked while holding the collection lock.
    #[error("Collection '{0}' is unavailable after a panic")]
    Poisoned(&'static str),

    /// No platform data directory could be determined.
    #[error("Cannot determine data directory")]
    NoDataDir,
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A value stored in a [`Collection`].
pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Identity key.
    type Key: Ord + Clone + Debug + Send + Sync;

    /// Collection (and file) name.
    const COLLECTION: &'static str;

    /// Returns the identity key of this document.
    fn key(&self) -> Self::Key;
}

/// A keyed set of documents of one type.
#[derive(Debug)]
pub struct Collection<T: Document> {
    documents: RwLock<BTreeMap<T::Key, T>>,
    path: Option<PathBuf>,
}

impl<T: Document> Collection<T> {
    fn in_memory() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            path: None,
        }
    }

    fn open(dir: &Path) -> StoreResult<Self> {
        let path = dir.join(format!("{}.json", T::COLLECTION));
        let documents = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let list: Vec<T> =
                    serde_json::from_str(&content).map_err(|source| StoreError::Serialization {
                        path: path.clone(),
                        source,
                    })?;
                list.into_iter().map(|doc| (doc.key(), doc)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::debug!(
            collection = T::COLLECTION,
            documents = documents.len(),
            "Collection loaded"
        );

        Ok(Self {
            documents: RwLock::new(documents),
            path: Some(path),
        })
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<T::Key, T>>> {
        self.documents
            .read()
            .map_err(|_| StoreError::Poisoned(T::COLLECTION))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<T::Key, T>>> {
        self.documents
            .write()
            .map_err(|_| StoreError::Poisoned(T::COLLECTION))
    }

    fn persist(&self, documents: &BTreeMap<T::Key, T>) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let list: Vec<&T> = documents.values().collect();
        let content =
            serde_json::to_string_pretty(&list).map_err(|source| StoreError::Serialization {
                path: path.clone(),
                source,
            })?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .and_then(|()| std::fs::rename(&tmp, path))
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })
    }

    fn not_found(key: &T::Key) -> StoreError {
        StoreError::NotFound {
            collection: T::COLLECTION,
            key: format!("{key:?}"),
        }
    }

    /// Returns the document with the given key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such document exists.
    pub fn find(&self, key: &T::Key) -> StoreResult<T> {
        self.read()?
            .get(key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))
    }

    /// Returns `true` if a document with the given key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection lock is poisoned.
    pub fn contains(&self, key: &T::Key) -> StoreResult<bool> {
        Ok(self.read()?.contains_key(key))
    }

    /// Returns every document in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection lock is poisoned.
    pub fn find_all(&self) -> StoreResult<Vec<T>> {
        Ok(self.read()?.values().cloned().collect())
    }

    /// Returns the documents matching `predicate` in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection lock is poisoned.
    pub fn find_where(&self, predicate: impl Fn(&T) -> bool) -> StoreResult<Vec<T>> {
        Ok(self
            .read()?
            .values()
            .filter(|doc| predicate(doc))
            .cloned()
            .collect())
    }

    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] on a key conflict.
    pub fn insert(&self, document: T) -> StoreResult<()> {
        let mut documents = self.write()?;
        let key = document.key();
        if documents.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                collection: T::COLLECTION,
                key: format!("{key:?}"),
            });
        }
        documents.insert(key, document);
        self.persist(&documents)
    }

    /// Inserts or replaces a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be persisted.
    pub fn upsert(&self, document: T) -> StoreResult<()> {
        let mut documents = self.write()?;
        documents.insert(document.key(), document);
        self.persist(&documents)
    }

    /// Applies `change` to the document with the given key and persists it.
    ///
    /// The closure must not alter the identity key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such document exists.
    pub fn update<R>(&self, key: &T::Key, change: impl FnOnce(&mut T) -> R) -> StoreResult<R> {
        let mut documents = self.write()?;
        let document = documents.get_mut(key).ok_or_else(|| Self::not_found(key))?;
        let result = change(document);
        self.persist(&documents)?;
        Ok(result)
    }

    /// Like [`Self::update`], but only persists when `change` returns `Some`.
    /// A closure returning `None` must leave the document unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such document exists.
    pub fn update_if<R>(
        &self,
        key: &T::Key,
        change: impl FnOnce(&mut T) -> Option<R>,
    ) -> StoreResult<Option<R>> {
        let mut documents = self.write()?;
        let document = documents.get_mut(key).ok_or_else(|| Self::not_found(key))?;
        let result = change(document);
        if result.is_some() {
            self.persist(&documents)?;
        }
        Ok(result)
    }

    /// Removes and returns the document with the given key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such document exists.
    pub fn delete(&self, key: &T::Key) -> StoreResult<T> {
        let mut documents = self.write()?;
        let removed = documents.remove(key).ok_or_else(|| Self::not_found(key))?;
        self.persist(&documents)?;
        Ok(removed)
    }

    /// Removes every document matching `predicate` and returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be persisted.
    pub fn delete_where(&self, predicate: impl Fn(&T) -> bool) -> StoreResult<usize> {
        let mut documents = self.write()?;
        let before = documents.len();
        documents.retain(|_, doc| !predicate(doc));
        let removed = before - documents.len();
        if removed > 0 {
            self.persist(&documents)?;
        }
        Ok(removed)
    }
}

/// High-water mark of an identifier sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    /// Sequence name, e.g. `minor` or `event:3`.
    pub name: String,
    /// Highest value handed out so far.
    pub value: u32,
}

impl Document for Sequence {
    type Key = String;
    const COLLECTION: &'static str = "sequences";

    fn key(&self) -> String {
        self.name.clone()
    }
}

/// All collections of one installation.
#[derive(Debug)]
pub struct Store {
    devices: Collection<Device>,
    geofences: Collection<GeofenceRecord>,
    beacons: Collection<Beacon>,
    events: Collection<Event>,
    counters: Collection<Counter>,
    addresses_on_hold: Collection<AddressOnHold>,
    confirmed_addresses: Collection<ConfirmedAddress>,
    sequences: Collection<Sequence>,
}

impl Store {
    /// Creates a store that never touches the disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            devices: Collection::in_memory(),
            geofences: Collection::in_memory(),
            beacons: Collection::in_memory(),
            events: Collection::in_memory(),
            counters: Collection::in_memory(),
            addresses_on_hold: Collection::in_memory(),
            confirmed_addresses: Collection::in_memory(),
            sequences: Collection::in_memory(),
        }
    }

    /// Opens (creating if needed) a store persisted under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or a collection
    /// file is unreadable.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        tracing::info!(path = %dir.display(), "Opening document store");

        Ok(Self {
            devices: Collection::open(dir)?,
            geofences: Collection::open(dir)?,
            beacons: Collection::open(dir)?,
            events: Collection::open(dir)?,
            counters: Collection::open(dir)?,
            addresses_on_hold: Collection::open(dir)?,
            confirmed_addresses: Collection::open(dir)?,
            sequences: Collection::open(dir)?,
        })
    }

    /// Registered devices.
    #[must_use]
    pub const fn devices(&self) -> &Collection<Device> {
        &self.devices
    }

    /// Geofence records.
    #[must_use]
    pub const fn geofences(&self) -> &Collection<GeofenceRecord> {
        &self.geofences
    }

    /// Registered beacons.
    #[must_use]
    pub const fn beacons(&self) -> &Collection<Beacon> {
        &self.beacons
    }

    /// Events of every geofence.
    #[must_use]
    pub const fn events(&self) -> &Collection<Event> {
        &self.events
    }

    /// Counters.
    #[must_use]
    pub const fn counters(&self) -> &Collection<Counter> {
        &self.counters
    }

    /// Pending mail verifications.
    #[must_use]
    pub const fn addresses_on_hold(&self) -> &Collection<AddressOnHold> {
        &self.addresses_on_hold
    }

    /// Verified mail addresses.
    #[must_use]
    pub const fn confirmed_addresses(&self) -> &Collection<ConfirmedAddress> {
        &self.confirmed_addresses
    }

    /// Returns the next identifier of sequence `name`.
    ///
    /// The result is one above both `scan_max` (the largest identifier
    /// currently in use) and every identifier previously returned for the
    /// sequence, so freed identifiers are never handed out again.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence cannot be persisted.
    pub fn next_id(&self, name: &str, scan_max: u32) -> StoreResult<u32> {
        let mut sequences = self.sequences.write()?;
        let high_water = sequences.get(name).map_or(0, |seq| seq.value);
        let next = scan_max.max(high_water).saturating_add(1);
        sequences.insert(
            name.to_string(),
            Sequence {
                name: name.to_string(),
                value: next,
            },
        );
        self.sequences.persist(&sequences)?;
        Ok(next)
    }

    /// Raises the high-water mark of sequence `name` to at least `value`,
    /// for identifiers chosen outside [`Self::next_id`].
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence cannot be persisted.
    pub fn record_id(&self, name: &str, value: u32) -> StoreResult<()> {
        let mut sequences = self.sequences.write()?;
        let high_water = sequences.get(name).map_or(0, |seq| seq.value);
        if value <= high_water {
            return Ok(());
        }
        sequences.insert(
            name.to_string(),
            Sequence {
                name: name.to_string(),
                value,
            },
        );
        self.sequences.persist(&sequences)
    }
}

/// Returns the default data directory.
///
/// `/var/lib/geofencing` on Linux, the platform data directory elsewhere.
///
/// # Errors
///
/// Returns [`StoreError::NoDataDir`] if no platform directory exists.
pub fn default_data_dir() -> StoreResult<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/geofencing"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs =
            directories::ProjectDirs::from("", "", "geofencing").ok_or(StoreError::NoDataDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::Counter;
    use tempfile::TempDir;

    #[test]
    fn test_insert_find_and_conflict() {
        let store = Store::in_memory();
        store.counters().insert(Counter::new(1)).unwrap();

        assert_eq!(store.counters().find(&1).unwrap().value, 0);
        assert!(matches!(
            store.counters().insert(Counter::new(1)),
            Err(StoreError::AlreadyExists { .. })
        ));
        assert!(matches!(
            store.counters().find(&2),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let store = Store::in_memory();
        let result = store.counters().update(&7, Counter::increment);
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_delete_and_delete_where() {
        let store = Store::in_memory();
        for id in 1..=4 {
            store.counters().insert(Counter::new(id)).unwrap();
        }

        assert_eq!(store.counters().delete(&1).unwrap().counter_id, 1);
        assert!(store.counters().delete(&1).is_err());
        assert_eq!(store.counters().delete_where(|c| c.counter_id > 2).unwrap(), 2);
        assert_eq!(store.counters().delete_where(|_| false).unwrap(), 0);
        assert_eq!(store.counters().find_all().unwrap().len(), 1);
    }

    #[test]
    fn test_next_id_never_reuses() {
        let store = Store::in_memory();
        assert_eq!(store.next_id("minor", 0).unwrap(), 1);
        assert_eq!(store.next_id("minor", 1).unwrap(), 2);
        // Everything was deleted, the sequence still moves forward.
        assert_eq!(store.next_id("minor", 0).unwrap(), 3);
        // Independent sequences.
        assert_eq!(store.next_id("event:1", 0).unwrap(), 1);
        // A larger scan value wins.
        assert_eq!(store.next_id("minor", 10).unwrap(), 11);

        store.record_id("minor", 20).unwrap();
        store.record_id("minor", 5).unwrap();
        assert_eq!(store.next_id("minor", 0).unwrap(), 21);
    }

    #[test]
    fn test_update_if_skips_unchanged() {
        let store = Store::in_memory();
        store.counters().insert(Counter::new(1)).unwrap();

        let unchanged = store.counters().update_if(&1, |_| None::<()>).unwrap();
        assert!(unchanged.is_none());

        let value = store
            .counters()
            .update_if(&1, |c| Some(c.increment()))
            .unwrap();
        assert_eq!(value, Some(1));
    }

    #[test]
    fn test_open_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store.counters().insert(Counter::new(5)).unwrap();
            store.counters().update(&5, Counter::increment).unwrap();
            store.next_id("counter", 5).unwrap();
        }

        assert!(dir.path().join("counters.json").exists());

        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.counters().find(&5).unwrap().value, 1);
        assert_eq!(store.next_id("counter", 0).unwrap(), 7);
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("counters.json"), "{not json").unwrap();
        assert!(matches!(
            Store::open(dir.path()),
            Err(StoreError::Serialization { .. })
        ));
    }
}
