//! Ripple Core
//!
//! A dependency-tracking reactive runtime. It observes which pieces of
//! mutable state a computation reads and re-invokes that computation (or a
//! derived value, or a watcher) whenever any of them change.
//!
//! It implements:
//!
//! - Dependency recording and invalidation per `(object, key)` slot
//! - A per-runtime execution-context stack for nested computations
//! - A self-trigger guard
//! - Pluggable schedulers
//! - Lazily cached computed values
//! - Watchers with flush timing and stale-result invalidation
//!
//! # Architecture
//!
//! - `reactive`: the runtime, observed containers and reactive primitives
//! - `executor`: deferred executors for `post`-flush watchers
//! - `error`: error type for the fallible APIs
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::{EffectOptions, Runtime, WatchOptions};
//!
//! let rt = Runtime::new();
//! let count = rt.signal(0);
//!
//! // Create a derived value
//! let doubled = rt.computed({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect
//! rt.effect({
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     move || println!("Count: {}, Doubled: {}", count.get(), doubled.get())
//! }, EffectOptions::default());
//!
//! // Watch it
//! rt.watch({
//!     let count = count.clone();
//!     move || count.get()
//! }, |new, old, _| println!("{old:?} -> {new}"), WatchOptions::sync());
//!
//! // Update the signal
//! count.set(5);
//! // Effect runs, prints: "Count: 5, Doubled: 10"
//! // Watcher prints: "Some(0) -> 5"
//! ```

pub mod error;
pub mod executor;
pub mod reactive;

pub use error::{Error, Result};
pub use executor::{DeferredExecutor, ImmediateExecutor, ManualExecutor, TokioExecutor};
pub use reactive::{
    Computation, Computed, Effect, EffectOptions, FlushMode, InvalidationToken, Key, ObjectId,
    OnInvalidate, ReactiveObject, Runtime, RuntimeBuilder, Signal, SubscriberId, Value,
    WatchOptions, Watcher, WeakRuntime,
};
