//! Dependency Store
//!
//! The store maps every observed `(object, key)` slot to the set of
//! computations that read it during their most recent run:
//!
//! ```text
//! ObjectId ──► Key ──► SubscriberSet { SubscriberId, ... }
//! ```
//!
//! The store only holds ids. It never keeps an observed object alive;
//! containers remove their entry through [`DependencyStore::remove_object`]
//! when they are dropped.
//!
//! Subscriber sets are insertion ordered. `trigger` snapshots a set before
//! notifying anyone, and the snapshot order is the notification order.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;

use super::subscriber::{ObjectId, SubscriberId};

/// Identifier for one property slot within an observed object.
///
/// Cheap to clone; compares and hashes by its string content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    /// Create a key from any string-like value.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// The key's name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single tracked slot, as recorded on a computation for cleanup.
pub(crate) type DepKey = (ObjectId, Key);

/// Computations currently depending on one slot.
pub(crate) type SubscriberSet = IndexSet<SubscriberId>;

/// Bidirectional bookkeeping lives half here and half on each computation:
/// the store answers "who reads this slot", the computation remembers "which
/// slots do I read" so it can remove itself before every run.
#[derive(Debug, Default)]
pub(crate) struct DependencyStore {
    objects: HashMap<ObjectId, HashMap<Key, SubscriberSet>>,
}

impl DependencyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add `subscriber` to the slot's set.
    ///
    /// Returns `true` only when the subscriber was not already present, so
    /// the caller records each slot at most once per run.
    pub(crate) fn subscribe(
        &mut self,
        object: ObjectId,
        key: &Key,
        subscriber: SubscriberId,
    ) -> bool {
        self.objects
            .entry(object)
            .or_default()
            .entry(key.clone())
            .or_default()
            .insert(subscriber)
    }

    /// Remove `subscriber` from the slot's set.
    ///
    /// Empty sets and empty per-object maps are dropped. Missing entries are
    /// ignored: the object may have been unregistered in the meantime.
    pub(crate) fn unsubscribe(&mut self, object: ObjectId, key: &Key, subscriber: SubscriberId) {
        let Some(keys) = self.objects.get_mut(&object) else {
            return;
        };
        if let Some(set) = keys.get_mut(key) {
            set.shift_remove(&subscriber);
            if set.is_empty() {
                keys.remove(key);
            }
        }
        if keys.is_empty() {
            self.objects.remove(&object);
        }
    }

    /// Copy of the slot's subscribers, in insertion order.
    ///
    /// Running a subscriber rebuilds its subscriptions, so callers iterate
    /// this copy rather than the live set.
    pub(crate) fn snapshot(&self, object: ObjectId, key: &Key) -> Vec<SubscriberId> {
        self.objects
            .get(&object)
            .and_then(|keys| keys.get(key))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget everything recorded for `object`.
    ///
    /// Returns the number of slots that were still being observed.
    pub(crate) fn remove_object(&mut self, object: ObjectId) -> usize {
        self.objects.remove(&object).map_or(0, |keys| keys.len())
    }

    pub(crate) fn subscriber_count(&self, object: ObjectId, key: &Key) -> usize {
        self.objects
            .get(&object)
            .and_then(|keys| keys.get(key))
            .map_or(0, |set| set.len())
    }

    pub(crate) fn object_count(&self) -> usize {
        self.objects.len()
    }
}
