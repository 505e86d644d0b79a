//! Watchers
//!
//! A watcher separates *what* is observed (a getter) from *what happens*
//! when it changes (a callback). It is built on a lazy effect whose
//! scheduler runs the watcher's job:
//!
//! 1. Re-run the getter to get the new value.
//! 2. If it differs from the old value, run the cleanup registered by the
//!    previous callback, then call `callback(new, old, on_invalidate)`.
//! 3. Remember the new value as the old one.
//!
//! # Flush timing
//!
//! With [`FlushMode::Sync`] the job runs inside `trigger`. With
//! [`FlushMode::Post`] it is handed to the runtime's deferred executor; every
//! trigger queues its own job.
//!
//! # Stale results
//!
//! Callbacks that start asynchronous work must not commit a result once a
//! newer job has fired. Two equivalent tools are passed to every callback
//! through [`OnInvalidate`]:
//!
//! - [`OnInvalidate::register`] stores a cleanup that runs right before the
//!   next callback (typically flipping an `expired` flag).
//! - [`OnInvalidate::token`] captures the job generation; the async work
//!   checks [`InvalidationToken::is_current`] before committing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::Result;

use super::effect::{Computation, Effect, EffectOptions};
use super::object::ReactiveObject;
use super::runtime::{Runtime, RuntimeInner};
use super::subscriber::SubscriberId;

/// When a watcher's job runs relative to the trigger that scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Run the job inside `trigger`.
    Sync,
    /// Queue the job on the runtime's deferred executor.
    #[default]
    Post,
}

/// Configuration for [`Runtime::watch`].
///
/// Absent fields default to `immediate: false`, `flush: "post"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Run the callback once at registration, with no old value.
    pub immediate: bool,
    pub flush: FlushMode,
}

impl WatchOptions {
    /// Options with synchronous flushing.
    pub fn sync() -> Self {
        Self {
            immediate: false,
            flush: FlushMode::Sync,
        }
    }

    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn with_flush(mut self, flush: FlushMode) -> Self {
        self.flush = flush;
        self
    }

    /// Parse options from JSON, e.g. `{"immediate": true, "flush": "sync"}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

type Cleanup = Box<dyn FnOnce() + Send + 'static>;
type Callback<T> = Box<dyn Fn(T, Option<T>, &OnInvalidate) + Send + Sync>;

/// Passed to every watch callback; see the module docs.
pub struct OnInvalidate {
    cleanup: Arc<Mutex<Option<Cleanup>>>,
    generation: u64,
    counter: Arc<AtomicU64>,
}

impl OnInvalidate {
    /// Register `f` to run before the next callback invocation.
    ///
    /// Only one cleanup is kept; registering again replaces it.
    pub fn register<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.cleanup.lock() = Some(Box::new(f));
    }

    /// A token that stays current until the watcher's next job runs.
    pub fn token(&self) -> InvalidationToken {
        InvalidationToken {
            generation: self.generation,
            counter: Arc::clone(&self.counter),
        }
    }

    /// Generation of the job that invoked this callback.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for OnInvalidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnInvalidate")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Generation captured when a callback started.
#[derive(Clone)]
pub struct InvalidationToken {
    generation: u64,
    counter: Arc<AtomicU64>,
}

impl InvalidationToken {
    /// `true` while no newer job has run and the watcher is not disposed.
    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.generation
    }

    pub fn is_stale(&self) -> bool {
        !self.is_current()
    }
}

impl fmt::Debug for InvalidationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationToken")
            .field("generation", &self.generation)
            .field("current", &self.is_current())
            .finish()
    }
}

struct WatcherInner<T> {
    effect: Effect<T>,
    callback: Callback<T>,
    flush: FlushMode,
    old: Mutex<Option<T>>,
    generation: Arc<AtomicU64>,
    cleanup: Arc<Mutex<Option<Cleanup>>>,
    runtime: Weak<RuntimeInner>,
}

impl<T> WatcherInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn job(&self) {
        if !self.effect.is_active() {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let new_value = self.effect.run();
        let old_value = self.old.lock().clone();
        if old_value.as_ref() == Some(&new_value) {
            trace!(watcher = %self.effect.id(), generation, "watched value unchanged");
            return;
        }

        let pending = self.cleanup.lock().take();
        if let Some(cleanup) = pending {
            cleanup();
        }

        let on_invalidate = OnInvalidate {
            cleanup: Arc::clone(&self.cleanup),
            generation,
            counter: Arc::clone(&self.generation),
        };
        trace!(watcher = %self.effect.id(), generation, "invoking watch callback");
        (self.callback)(new_value.clone(), old_value, &on_invalidate);

        *self.old.lock() = Some(new_value);
    }

    fn schedule(self: &Arc<Self>) {
        match self.flush {
            FlushMode::Sync => self.job(),
            FlushMode::Post => {
                let Some(runtime) = self.runtime.upgrade() else {
                    return;
                };
                let this = Arc::clone(self);
                runtime.schedule(Box::new(move || this.job()));
            }
        }
    }

    fn dispose(&self) {
        if !self.effect.is_active() {
            return;
        }
        self.effect.dispose();
        // Outstanding async work from the last callback is now stale.
        self.generation.fetch_add(1, Ordering::SeqCst);
        let pending = self.cleanup.lock().take();
        if let Some(cleanup) = pending {
            cleanup();
        }
        debug!(watcher = %self.effect.id(), "watcher disposed");
    }
}

/// Handle to a registered watcher.
///
/// The watcher keeps running when every handle is dropped; call
/// [`Watcher::dispose`] to stop it.
pub struct Watcher<T> {
    inner: Arc<WatcherInner<T>>,
}

impl<T> Watcher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn id(&self) -> SubscriberId {
        self.inner.effect.id()
    }

    /// Number of jobs that have run (including one for `immediate`).
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// The value passed as `new` to the most recent callback, or the
    /// initial value.
    pub fn last_value(&self) -> Option<T> {
        self.inner.old.lock().clone()
    }

    /// Stop watching. Runs the pending invalidation cleanup, and tokens
    /// handed out so far become stale.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_active(&self) -> bool {
        self.inner.effect.is_active()
    }
}

impl<T> Clone for Watcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Watcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.effect.id())
            .field("flush", &self.inner.flush)
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .field("active", &self.inner.effect.is_active())
            .finish()
    }
}

impl Runtime {
    /// Watch the value returned by `getter`.
    ///
    /// `callback` receives `(new, old, on_invalidate)`. Values are compared
    /// with `PartialEq`; the callback only runs when they differ.
    pub fn watch<T, G, C>(&self, getter: G, callback: C, options: WatchOptions) -> Watcher<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        G: Fn() -> T + Send + Sync + 'static,
        C: Fn(T, Option<T>, &OnInvalidate) + Send + Sync + 'static,
    {
        let effect = self.effect(getter, EffectOptions::lazy());
        let inner = Arc::new(WatcherInner {
            effect,
            callback: Box::new(callback),
            flush: options.flush,
            old: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            cleanup: Arc::new(Mutex::new(None)),
            runtime: Arc::downgrade(&self.inner),
        });

        // The registry owns the effect, the effect's scheduler owns the
        // watcher; disposal clears the scheduler and ends the cycle.
        let scheduled = Arc::clone(&inner);
        inner
            .effect
            .computation()
            .set_scheduler(Arc::new(move |_: &Computation| scheduled.schedule()));
        debug!(watcher = %inner.effect.id(), ?options, "watcher created");

        if options.immediate {
            inner.job();
        } else {
            let initial = inner.effect.run();
            *inner.old.lock() = Some(initial);
        }

        Watcher { inner }
    }

    /// Watch every key reachable from `object`.
    ///
    /// The watched value is a JSON snapshot of the object graph (see
    /// [`ReactiveObject::snapshot`]); the callback receives the new and old
    /// snapshots. Keys added after a run are picked up by the next run.
    pub fn watch_object<C>(
        &self,
        object: &ReactiveObject,
        callback: C,
        options: WatchOptions,
    ) -> Watcher<serde_json::Value>
    where
        C: Fn(serde_json::Value, Option<serde_json::Value>, &OnInvalidate) + Send + Sync + 'static,
    {
        let object = object.clone();
        self.watch(move || object.snapshot(), callback, options)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
