//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects observed containers,
//! effects, computed values and watchers. It owns the dependency store, the
//! execution context and the registry of live computations.
//!
//! # How It Works
//!
//! 1. When a container is read, it calls [`Runtime::track`]. If a computation
//!    is running, the runtime records the `(object, key)` slot both in the
//!    store and on the computation.
//!
//! 2. When a container is written, it calls [`Runtime::trigger`]. The runtime:
//!    a. Snapshots the slot's subscribers
//!    b. Skips the computation that is currently running (self-trigger guard)
//!    c. Hands each remaining computation to its scheduler, or re-runs it
//!
//! 3. Every run first removes the computation from all slots it read last
//!    time, so dependencies always reflect the most recent run.
//!
//! # Ownership
//!
//! Handles to containers and computations hold a weak reference to the
//! runtime; the [`Runtime`] value itself keeps everything alive. Computations
//! live in the registry until they are disposed or the runtime is dropped.
//! Dropping the runtime releases every registered computation, including the
//! schedulers that tie watchers to their effects.
//!
//! # Thread Safety
//!
//! All state sits behind coarse `parking_lot` locks and no lock is held while
//! user code runs. Handles are `Send + Sync`. The execution context keeps one
//! stack per thread, so reads are only attributed to a computation running on
//! the same thread. A computation runs to completion on the thread that
//! started it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::executor::{DeferredExecutor, Job, ManualExecutor};

use super::context::ExecutionContext;
use super::effect::{Computation, ComputationNode};
use super::store::{DependencyStore, Key};
use super::subscriber::{ObjectId, SubscriberId};

/// Shared state behind every [`Runtime`] handle.
pub(crate) struct RuntimeInner {
    store: Mutex<DependencyStore>,
    pub(crate) context: ExecutionContext,
    registry: RwLock<HashMap<SubscriberId, Arc<ComputationNode>>>,
    executor: Arc<dyn DeferredExecutor>,
}

impl RuntimeInner {
    pub(crate) fn track(&self, object: ObjectId, key: &Key) {
        let Some(current) = self.context.current() else {
            return;
        };
        // Disposed computations are no longer registered and stay inert.
        let Some(node) = self.node(current) else {
            return;
        };

        let inserted = self.store.lock().subscribe(object, key, current);
        if inserted {
            node.record_dependency(object, key.clone());
            trace!(subscriber = %current, object = %object, key = %key, "tracked");
        }
    }

    pub(crate) fn trigger(&self, object: ObjectId, key: &Key) {
        let subscribers = self.store.lock().snapshot(object, key);
        if subscribers.is_empty() {
            return;
        }

        let current = self.context.current();
        let nodes: Vec<Arc<ComputationNode>> = {
            let registry = self.registry.read();
            subscribers
                .iter()
                .filter(|id| Some(**id) != current)
                .filter_map(|id| registry.get(id).cloned())
                .collect()
        };
        trace!(object = %object, key = %key, notified = nodes.len(), "triggered");

        for node in nodes {
            // An earlier subscriber in this pass may have disposed it.
            if !node.is_active() {
                continue;
            }
            let computation = Computation::from_node(node);
            match computation.scheduler() {
                Some(scheduler) => scheduler(&computation),
                None => computation.run(),
            }
        }
    }

    pub(crate) fn node(&self, id: SubscriberId) -> Option<Arc<ComputationNode>> {
        self.registry.read().get(&id).cloned()
    }

    pub(crate) fn register(&self, node: Arc<ComputationNode>) {
        debug!(subscriber = %node.id(), "computation registered");
        self.registry.write().insert(node.id(), node);
    }

    /// Remove a computation from the registry and from every slot it reads.
    pub(crate) fn unregister(&self, node: &ComputationNode) {
        self.cleanup(node);
        // Drop the registry entry after releasing the lock: the node's closures
        // may own containers whose drop calls back into the runtime.
        let removed = self.registry.write().remove(&node.id());
        if removed.is_some() {
            debug!(subscriber = %node.id(), "computation disposed");
        }
        drop(removed);
    }

    /// Remove `node` from all slots it read during its previous run.
    pub(crate) fn cleanup(&self, node: &ComputationNode) {
        let deps = node.take_dependencies();
        if deps.is_empty() {
            return;
        }
        let mut store = self.store.lock();
        for (object, key) in &deps {
            store.unsubscribe(*object, key, node.id());
        }
    }

    pub(crate) fn unregister_object(&self, object: ObjectId) {
        let slots = self.store.lock().remove_object(object);
        debug!(object = %object, slots, "observed object unregistered");
    }

    pub(crate) fn schedule(&self, job: Job) {
        self.executor.schedule(job);
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        let nodes: Vec<Arc<ComputationNode>> = self
            .registry
            .get_mut()
            .drain()
            .map(|(_, node)| node)
            .collect();
        if nodes.is_empty() {
            return;
        }
        debug!(computations = nodes.len(), "runtime dropped, releasing computations");
        // Schedulers may own the handles that own their node (watchers);
        // clearing them breaks the cycle.
        for node in &nodes {
            node.release();
        }
    }
}

/// A reactive runtime instance.
///
/// Cloning produces another handle to the same runtime. Independent
/// runtimes never share dependencies or execution contexts.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.signal(1);
///
/// let doubled = rt.computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// rt.effect({
///     let doubled = doubled.clone();
///     move || println!("doubled: {}", doubled.get())
/// }, EffectOptions::default());
///
/// count.set(5);
/// // Effect re-runs, prints: "doubled: 10"
/// ```
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime whose deferred jobs wait for [`Runtime::flush_pending`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    /// A handle that does not keep the runtime alive.
    ///
    /// Capture this instead of a `Runtime` inside effect bodies to avoid a
    /// reference cycle through the registry.
    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Record that the running computation reads `(object, key)`.
    ///
    /// No-op outside a computation. Containers call this before returning
    /// the value they read.
    pub fn track(&self, object: ObjectId, key: &Key) {
        self.inner.track(object, key);
    }

    /// Notify every computation that read `(object, key)`.
    ///
    /// Containers call this after the write has taken effect. Unknown slots
    /// are a no-op.
    pub fn trigger(&self, object: ObjectId, key: &Key) {
        self.inner.trigger(object, key);
    }

    /// Run deferred jobs queued by `post`-flush watchers.
    ///
    /// Returns the number of jobs run. Executors without a queue return 0.
    pub fn flush_pending(&self) -> usize {
        self.inner.executor.flush()
    }

    /// Number of deferred jobs waiting for a flush.
    pub fn pending_jobs(&self) -> usize {
        self.inner.executor.pending()
    }

    /// Number of computations currently subscribed to `(object, key)`.
    pub fn subscriber_count(&self, object: ObjectId, key: &Key) -> usize {
        self.inner.store.lock().subscriber_count(object, key)
    }

    /// Number of objects with at least one observed slot.
    pub fn observed_object_count(&self) -> usize {
        self.inner.store.lock().object_count()
    }

    /// Number of live (not disposed) computations.
    pub fn computation_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// The computation currently running on this thread, if any.
    pub fn current(&self) -> Option<SubscriberId> {
        self.inner.context.current()
    }

    /// Check if a computation is currently running on this thread.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.is_active()
    }

    /// Depth of this thread's execution context stack.
    pub fn depth(&self) -> usize {
        self.inner.context.depth()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("computations", &self.computation_count())
            .field("observed_objects", &self.observed_object_count())
            .field("depth", &self.depth())
            .finish()
    }
}

/// Weak counterpart of [`Runtime`].
#[derive(Clone, Default)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(Runtime::from_inner)
    }
}

impl fmt::Debug for WeakRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRuntime")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Configures a [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    executor: Option<Arc<dyn DeferredExecutor>>,
}

impl RuntimeBuilder {
    /// Use `executor` for `post`-flush watcher jobs.
    pub fn executor<E: DeferredExecutor + 'static>(mut self, executor: Arc<E>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Runtime {
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(ManualExecutor::new()));
        Runtime {
            inner: Arc::new(RuntimeInner {
                store: Mutex::new(DependencyStore::new()),
                context: ExecutionContext::new(),
                registry: RwLock::new(HashMap::new()),
                executor,
            }),
        }
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("custom_executor", &self.executor.is_some())
            .finish()
    }
}
