//! Beacon observations, beacon sets and presence differencing.
//!
//! A [`Beacon`] is identified by its [`BeaconKey`] (uuid, major, minor). The
//! optional location label travels with the beacon but never takes part in
//! equality, hashing or set membership.
//!
//! [`diff`] computes which beacons a device entered and left between two
//! reports. It returns `None` when nothing changed so callers can skip
//! persistence and trigger evaluation entirely.

use std::collections::btree_map::{self, BTreeMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::storage::Document;
use crate::types::{Major, Minor};

/// Identity key of a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BeaconKey {
    /// Installation UUID.
    pub uuid: Uuid,
    /// Beacon number within its geofence.
    pub major: Major,
    /// Geofence the beacon belongs to.
    pub minor: Minor,
}

/// A beacon observation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
    "major": 1,
    "minor": 3,
    "location": "Front door"
}))]
pub struct Beacon {
    /// Installation UUID.
    pub uuid: Uuid,

    /// Beacon number within its geofence.
    #[schema(example = 1)]
    pub major: Major,

    /// Geofence the beacon belongs to.
    #[schema(example = 3)]
    pub minor: Minor,

    /// Free-form placement label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "Front door")]
    pub location: Option<String>,
}

impl Beacon {
    /// Creates a beacon without a location label.
    #[must_use]
    pub const fn new(uuid: Uuid, major: Major, minor: Minor) -> Self {
        Self {
            uuid,
            major,
            minor,
            location: None,
        }
    }

    /// Attaches a location label.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Returns the identity key of this beacon.
    #[must_use]
    pub const fn key(&self) -> BeaconKey {
        BeaconKey {
            uuid: self.uuid,
            major: self.major,
            minor: self.minor,
        }
    }
}

impl PartialEq for Beacon {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Beacon {}

impl Hash for Beacon {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Document for Beacon {
    type Key = BeaconKey;
    const COLLECTION: &'static str = "beacons";

    fn key(&self) -> BeaconKey {
        Self::key(self)
    }
}

/// A set of beacons, unique by identity key.
///
/// Serialized as a plain list. Deserializing a list with duplicate keys keeps
/// the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Beacon>", into = "Vec<Beacon>")]
pub struct BeaconSet {
    beacons: BTreeMap<BeaconKey, Beacon>,
}

impl BeaconSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a beacon. Returns `false` if a beacon with the same key is
    /// already present; the existing entry is kept.
    pub fn insert(&mut self, beacon: Beacon) -> bool {
        match self.beacons.entry(beacon.key()) {
            btree_map::Entry::Occupied(_) => false,
            btree_map::Entry::Vacant(slot) => {
                slot.insert(beacon);
                true
            }
        }
    }

    /// Removes the beacon with the given key.
    pub fn remove(&mut self, key: &BeaconKey) -> Option<Beacon> {
        self.beacons.remove(key)
    }

    /// Returns the beacon with the given key.
    #[must_use]
    pub fn get(&self, key: &BeaconKey) -> Option<&Beacon> {
        self.beacons.get(key)
    }

    /// Returns `true` if a beacon with the given key is present.
    #[must_use]
    pub fn contains(&self, key: &BeaconKey) -> bool {
        self.beacons.contains_key(key)
    }

    /// Returns `true` if any beacon of the given geofence is present.
    #[must_use]
    pub fn contains_minor(&self, minor: Minor) -> bool {
        self.beacons.keys().any(|key| key.minor == minor)
    }

    /// Number of beacons in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    /// Returns `true` if the set holds no beacons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Iterates the beacons in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Beacon> {
        self.beacons.values()
    }

    /// Beacons of `self` whose key is not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        self.iter()
            .filter(|beacon| !other.contains(&beacon.key()))
            .cloned()
            .collect()
    }

    /// Consumes the set into a list in key order.
    #[must_use]
    pub fn into_vec(self) -> Vec<Beacon> {
        self.beacons.into_values().collect()
    }
}

impl FromIterator<Beacon> for BeaconSet {
    fn from_iter<I: IntoIterator<Item = Beacon>>(iter: I) -> Self {
        let mut set = Self::new();
        for beacon in iter {
            set.insert(beacon);
        }
        set
    }
}

impl From<Vec<Beacon>> for BeaconSet {
    fn from(beacons: Vec<Beacon>) -> Self {
        beacons.into_iter().collect()
    }
}

impl From<BeaconSet> for Vec<Beacon> {
    fn from(set: BeaconSet) -> Self {
        set.into_vec()
    }
}

impl IntoIterator for BeaconSet {
    type Item = Beacon;
    type IntoIter = btree_map::IntoValues<BeaconKey, Beacon>;

    fn into_iter(self) -> Self::IntoIter {
        self.beacons.into_values()
    }
}

impl<'a> IntoIterator for &'a BeaconSet {
    type Item = &'a Beacon;
    type IntoIter = btree_map::Values<'a, BeaconKey, Beacon>;

    fn into_iter(self) -> Self::IntoIter {
        self.beacons.values()
    }
}

/// Beacons entered and left between two reports. Both sets are disjoint and
/// at least one of them is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconChange {
    entered: BeaconSet,
    left: BeaconSet,
}

impl BeaconChange {
    /// Beacons present in the new report but not the previous one.
    #[must_use]
    pub const fn entered(&self) -> &BeaconSet {
        &self.entered
    }

    /// Beacons present in the previous report but not the new one.
    #[must_use]
    pub const fn left(&self) -> &BeaconSet {
        &self.left
    }

    /// Splits the change into `(entered, left)`.
    #[must_use]
    pub fn into_parts(self) -> (BeaconSet, BeaconSet) {
        (self.entered, self.left)
    }
}

/// Computes the presence change from `previous` to `next`.
///
/// Returns `None` if both reports contain the same keys.
#[must_use]
pub fn diff(previous: &BeaconSet, next: &BeaconSet) -> Option<BeaconChange> {
    let entered = next.difference(previous);
    let left = previous.difference(next);

    if entered.is_empty() && left.is_empty() {
        None
    } else {
        Some(BeaconChange { entered, left })
    }
}
