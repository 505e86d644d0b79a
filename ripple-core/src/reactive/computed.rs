//! Computed Values
//!
//! A computed value is a lazy effect with a cache in front of it.
//!
//! # How Computed Values Work
//!
//! 1. Creation does not run the getter. The cache starts dirty.
//!
//! 2. [`Computed::get`] recomputes only if the cache is dirty, then clears the
//!    flag. Reads between two changes return the cached value.
//!
//! 3. When a dependency changes, the effect's scheduler marks the cache
//!    dirty. It never recomputes eagerly.
//!
//! # Composability
//!
//! A computed value is itself an observed object with a single `value` slot.
//! Reading it tracks that slot for the outer computation, and the clean to
//! dirty transition triggers it. An effect that reads a computed value
//! therefore re-runs when the computed value's own dependencies change.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::effect::{Effect, EffectOptions};
use super::runtime::{Runtime, RuntimeInner};
use super::store::Key;
use super::subscriber::ObjectId;

struct ComputedState<T> {
    dirty: bool,
    value: Option<T>,
}

struct ComputedInner<T> {
    id: ObjectId,
    key: Key,
    effect: Effect<T>,
    state: Mutex<ComputedState<T>>,
    runtime: Weak<RuntimeInner>,
}

impl<T> ComputedInner<T> {
    /// Scheduler body: mark dirty, and let readers know on the first change.
    fn invalidate(&self) {
        let was_clean = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.dirty, true)
        };
        if was_clean {
            if let Some(runtime) = self.runtime.upgrade() {
                runtime.trigger(self.id, &self.key);
            }
        }
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.effect.computation().dispose();
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister_object(self.id);
        }
    }
}

/// A lazily evaluated, cached value derived from reactive state.
///
/// Cloning a `Computed` creates a new handle to the same cache. The
/// underlying computation is disposed when the last handle is dropped.
///
/// # Example
///
/// ```rust,ignore
/// let sum = rt.computed({
///     let (a, b) = (a.clone(), b.clone());
///     move || a.get() + b.get()
/// });
///
/// assert_eq!(sum.get(), 3);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Get the current value, recomputing if necessary.
    ///
    /// Also records a dependency on this computed value for the computation
    /// that is currently running, if any.
    pub fn get(&self) -> T {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id, &self.inner.key);
        }

        {
            let state = self.inner.state.lock();
            if !state.dirty {
                if let Some(value) = &state.value {
                    return value.clone();
                }
            }
        }

        // The lock is released while the getter runs; it may read other
        // computed values or trigger writes.
        let value = self.inner.effect.run();

        let mut state = self.inner.state.lock();
        state.value = Some(value.clone());
        state.dirty = false;
        value
    }

    /// Check whether the next [`get`](Self::get) will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }

    /// Force recomputation on the next read.
    pub fn mark_dirty(&self) {
        self.inner.invalidate();
    }

    /// The observed-object id readers subscribe to.
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Number of times the getter has actually run.
    pub fn compute_count(&self) -> usize {
        self.inner.effect.run_count()
    }

    /// Stop tracking the getter's dependencies. The cache is kept, but it
    /// will never become dirty again on its own.
    pub fn dispose(&self) {
        self.inner.effect.dispose();
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("cached", &state.value)
            .field("dirty", &state.dirty)
            .finish()
    }
}

impl Runtime {
    /// Create a computed value from `getter`.
    ///
    /// The getter runs at most once between two changes of its dependencies,
    /// and only when the value is read.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let weak = weak.clone();
            let options = EffectOptions::lazy().with_scheduler(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.invalidate();
                }
            });

            ComputedInner {
                id: ObjectId::new(),
                key: Key::from("value"),
                effect: self.effect(getter, options),
                state: Mutex::new(ComputedState {
                    dirty: true,
                    value: None,
                }),
                runtime: Arc::downgrade(&self.inner),
            }
        });
        tracing::debug!(object = %inner.id, "computed value created");

        Computed { inner }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
