//! Effect Implementation
//!
//! An Effect is a computation whose dependencies are discovered while it
//! runs, and which re-runs whenever any of them change.
//!
//! # How Effects Work
//!
//! Every run goes through the same procedure:
//!
//! 1. Remove the effect from every slot it read during its previous run.
//!    This is what makes branch switching work: a slot that is no longer
//!    read is no longer a dependency.
//!
//! 2. Push the effect onto the runtime's execution context.
//!
//! 3. Run the body. Every tracked read records a dependency.
//!
//! 4. Pop the context (also when the body panics) and return the body's value.
//!
//! # Schedulers
//!
//! By default a triggered effect re-runs immediately. An effect created with
//! a [`Scheduler`] hands control to it instead; the scheduler receives the
//! [`Computation`] and decides if and when to call [`Computation::run`].
//! Computed values use this to flip a dirty flag, watchers to defer work.
//!
//! # Lifetime
//!
//! Effects stay registered with the runtime until [`Effect::dispose`] is
//! called, even if every handle is dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{Error, Result};

use super::runtime::{Runtime, RuntimeInner};
use super::store::{DepKey, Key};
use super::subscriber::{ObjectId, SubscriberId};

/// Policy invoked instead of an immediate re-run when a dependency changes.
pub type Scheduler = Arc<dyn Fn(&Computation) + Send + Sync>;

/// Configuration for [`Runtime::effect`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run on creation; wait for an explicit [`Effect::run`].
    pub lazy: bool,

    /// Called instead of re-running when a dependency changes.
    pub scheduler: Option<Scheduler>,
}

impl EffectOptions {
    /// Options for an effect that does not run on creation.
    pub fn lazy() -> Self {
        Self {
            lazy: true,
            scheduler: None,
        }
    }

    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn with_scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn(&Computation) + Send + Sync + 'static,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

/// Type-erased state of one computation.
pub(crate) struct ComputationNode {
    id: SubscriberId,

    /// The body with its return value discarded, for runs started by `trigger`.
    runner: Box<dyn Fn() + Send + Sync>,

    /// Slots read during the most recent run.
    dependencies: Mutex<SmallVec<[DepKey; 4]>>,

    /// Cleared on disposal, which also breaks cycles through captured handles.
    scheduler: Mutex<Option<Scheduler>>,

    active: AtomicBool,

    run_count: AtomicUsize,

    runtime: Weak<RuntimeInner>,
}

impl ComputationNode {
    fn new(
        runner: Box<dyn Fn() + Send + Sync>,
        scheduler: Option<Scheduler>,
        runtime: Weak<RuntimeInner>,
    ) -> Self {
        Self {
            id: SubscriberId::new(),
            runner,
            dependencies: Mutex::new(SmallVec::new()),
            scheduler: Mutex::new(scheduler),
            active: AtomicBool::new(true),
            run_count: AtomicUsize::new(0),
            runtime,
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn record_dependency(&self, object: ObjectId, key: Key) {
        self.dependencies.lock().push((object, key));
    }

    pub(crate) fn take_dependencies(&self) -> SmallVec<[DepKey; 4]> {
        std::mem::take(&mut *self.dependencies.lock())
    }

    /// The run procedure: cleanup, enter, body, exit.
    ///
    /// Disposed computations (or ones whose runtime is gone) run the body
    /// untracked.
    fn run_with<R>(&self, body: impl FnOnce() -> R) -> R {
        let runtime = match self.runtime.upgrade() {
            Some(runtime) if self.is_active() => runtime,
            _ => return body(),
        };

        runtime.cleanup(self);
        let _guard = runtime.context.enter(self.id);
        trace!(subscriber = %self.id, "running computation");

        let value = body();
        self.run_count.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Deactivate without touching the runtime, which is being dropped.
    pub(crate) fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.take_dependencies();
        let scheduler = self.scheduler.lock().take();
        drop(scheduler);
    }

    fn dispose(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.runtime.upgrade() {
            Some(runtime) => runtime.unregister(self),
            None => {
                self.take_dependencies();
            }
        }
        let scheduler = self.scheduler.lock().take();
        drop(scheduler);
    }
}

/// Type-erased handle to a computation, as seen by schedulers.
#[derive(Clone)]
pub struct Computation {
    node: Arc<ComputationNode>,
}

impl Computation {
    pub(crate) fn from_node(node: Arc<ComputationNode>) -> Self {
        Self { node }
    }

    pub fn id(&self) -> SubscriberId {
        self.node.id
    }

    /// Re-run the computation, discarding the body's value.
    pub fn run(&self) {
        self.node.run_with(|| (self.node.runner)());
    }

    /// Stop tracking and remove every subscription.
    pub fn dispose(&self) {
        self.node.dispose();
    }

    pub fn is_active(&self) -> bool {
        self.node.is_active()
    }

    /// Number of slots read during the most recent run.
    pub fn dependency_count(&self) -> usize {
        self.node.dependencies.lock().len()
    }

    /// Number of tracked runs that completed.
    pub fn run_count(&self) -> usize {
        self.node.run_count.load(Ordering::Relaxed)
    }

    pub(crate) fn scheduler(&self) -> Option<Scheduler> {
        self.node.scheduler.lock().clone()
    }

    pub(crate) fn set_scheduler(&self, scheduler: Scheduler) {
        if self.is_active() {
            *self.node.scheduler.lock() = Some(scheduler);
        }
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// A computation that re-runs when the state it read changes.
///
/// # Example
///
/// ```rust,ignore
/// let count = rt.signal(0);
///
/// let effect = rt.effect({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// }, EffectOptions::default());
///
/// count.set(5);  // Prints: "Count is: 5"
/// ```
pub struct Effect<T> {
    computation: Computation,
    body: Arc<dyn Fn() -> T + Send + Sync>,
}

impl<T> Effect<T> {
    /// Force a tracked run and return the body's value.
    ///
    /// Panics from the body propagate; the dependencies of the failed run
    /// stay cleared until the next successful run.
    pub fn run(&self) -> T {
        let body = &self.body;
        self.computation.node.run_with(|| body())
    }

    /// Like [`Effect::run`], but refuses to run a disposed effect.
    pub fn try_run(&self) -> Result<T> {
        let node = &self.computation.node;
        if node.runtime.strong_count() == 0 {
            return Err(Error::RuntimeDropped);
        }
        if !node.is_active() {
            return Err(Error::Disposed(node.id));
        }
        Ok(self.run())
    }

    pub fn id(&self) -> SubscriberId {
        self.computation.id()
    }

    /// Remove the effect from every slot it reads; it will not run again
    /// on its own.
    pub fn dispose(&self) {
        self.computation.dispose();
    }

    pub fn is_active(&self) -> bool {
        self.computation.is_active()
    }

    pub fn run_count(&self) -> usize {
        self.computation.run_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.computation.dependency_count()
    }

    /// The type-erased handle passed to schedulers.
    pub fn computation(&self) -> &Computation {
        &self.computation
    }
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            computation: self.computation.clone(),
            body: Arc::clone(&self.body),
        }
    }
}

impl<T> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.computation.id())
            .field("run_count", &self.computation.run_count())
            .field("dependency_count", &self.computation.dependency_count())
            .field("active", &self.computation.is_active())
            .finish()
    }
}

impl Runtime {
    /// Create an effect around `body`.
    ///
    /// Unless `options.lazy` is set, the body runs once immediately to
    /// collect its first dependencies.
    pub fn effect<T, F>(&self, body: F, options: EffectOptions) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let body: Arc<dyn Fn() -> T + Send + Sync> = Arc::new(body);
        let runner = {
            let body = Arc::clone(&body);
            Box::new(move || {
                body();
            })
        };

        let node = Arc::new(ComputationNode::new(
            runner,
            options.scheduler,
            Arc::downgrade(&self.inner),
        ));
        self.inner.register(Arc::clone(&node));

        let effect = Effect {
            computation: Computation::from_node(node),
            body,
        };
        if !options.lazy {
            effect.run();
        }
        effect
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
