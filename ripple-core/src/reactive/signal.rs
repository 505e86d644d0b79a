//! Signal Implementation
//!
//! A Signal is a typed observed object with a single slot. It is the
//! smallest container that implements the interception contract:
//!
//! - `get` calls `track` before returning the value
//! - `set` stores the value, then calls `trigger`
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A unique object ID (8 bytes)
//! - The value, as an `Arc` behind an `RwLock`
//! - A weak reference to its runtime

use std::fmt::{self, Debug};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::{Error, Result};

use super::runtime::{Runtime, RuntimeInner};
use super::store::Key;
use super::subscriber::ObjectId;

struct SignalInner<T> {
    id: ObjectId,
    key: Key,
    value: RwLock<Arc<T>>,
    runtime: Weak<RuntimeInner>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister_object(self.id);
        }
    }
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = rt.signal(0);
///
/// // Read the value (tracked inside a computation)
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Send + Sync + 'static,
{
    /// The signal's object ID.
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called while a computation runs, this also registers that
    /// computation as a subscriber.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, tracking the read.
    ///
    /// `f` sees the value as of the call and runs without holding the lock,
    /// so it may write to this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        let value = self.snapshot();
        f(&value)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        T::clone(&self.snapshot())
    }

    /// Set a new value and notify subscribers.
    ///
    /// Every write triggers, even when the new value equals the old one.
    pub fn set(&self, value: T) {
        let previous = std::mem::replace(&mut *self.inner.value.write(), Arc::new(value));
        drop(previous);
        self.trigger();
    }

    /// Update the value using a function of the current value.
    ///
    /// The current value is read untracked.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = f(&self.snapshot());
        self.set(new_value);
    }

    /// Like [`Signal::set`], but reports a dropped runtime instead of
    /// silently skipping notification.
    pub fn try_set(&self, value: T) -> Result<()> {
        if self.inner.runtime.strong_count() == 0 {
            return Err(Error::RuntimeDropped);
        }
        self.set(value);
        Ok(())
    }

    fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.inner.value.read())
    }

    fn track(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id, &self.inner.key);
        }
    }

    fn trigger(&self) {
        match self.inner.runtime.upgrade() {
            Some(runtime) => runtime.trigger(self.inner.id, &self.inner.key),
            None => tracing::warn!(object = %self.inner.id, "signal written after its runtime was dropped"),
        }
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Debug> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &**self.inner.value.read())
            .finish()
    }
}

impl Runtime {
    /// Create a signal observed by this runtime.
    pub fn signal<T>(&self, value: T) -> Signal<T>
    where
        T: Send + Sync + 'static,
    {
        Signal {
            inner: Arc::new(SignalInner {
                id: ObjectId::new(),
                key: Key::from("value"),
                value: RwLock::new(Arc::new(value)),
                runtime: Arc::downgrade(&self.inner),
            }),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
