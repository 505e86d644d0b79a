//! Identity types for the reactive system.
//!
//! Computations and observed objects are identity-based: two objects holding
//! the same data are still distinct subjects. Every computation gets a
//! [`SubscriberId`] and every observed container gets an [`ObjectId`] when it
//! is created.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a computation (effect, computed value or watcher).
///
/// The dependency store records these ids, never the computations
/// themselves, so a subscriber set cannot keep a computation alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads and
    /// across runtime instances.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Unique identifier for an observed object.
///
/// Assigned when a container is wrapped; the container unregisters it from
/// the runtime when its last handle is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Generate a new unique object ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}
