//! Reactive Primitives
//!
//! This module implements the dependency-tracking core: observed containers,
//! effects, computed values and watchers, coordinated by a [`Runtime`].
//!
//! # Concepts
//!
//! ## Observed objects
//!
//! A [`ReactiveObject`] or [`Signal`] holds mutable state. Reading a slot
//! calls [`Runtime::track`]; writing it calls [`Runtime::trigger`]. Any other
//! container can take part by calling the same two hooks.
//!
//! ## Effects
//!
//! An [`Effect`] runs a body, records every slot the body reads, and re-runs
//! when one of them changes. Each run starts by dropping the previous
//! dependencies, so conditional reads are tracked correctly.
//!
//! ## Computed values
//!
//! A [`Computed`] caches the result of a lazy effect and recomputes only when
//! read after a dependency changed.
//!
//! ## Watchers
//!
//! A [`Watcher`] calls a callback with the new and old value of a getter,
//! either synchronously or through a deferred executor, and hands the
//! callback an [`OnInvalidate`] to discard superseded async results.
//!
//! # Implementation Notes
//!
//! Each runtime owns an execution-context stack. The computation on top of
//! the stack is the one that reads are attributed to; nested computations
//! push on top of their parent. A triggered computation is never re-run by
//! its own write while it is on top of the stack.

mod computed;
mod context;
mod effect;
mod object;
mod runtime;
mod signal;
mod store;
mod subscriber;
mod watch;

pub use computed::Computed;
pub use effect::{Computation, Effect, EffectOptions, Scheduler};
pub use object::{ReactiveObject, Value};
pub use runtime::{Runtime, RuntimeBuilder, WeakRuntime};
pub use signal::Signal;
pub use store::Key;
pub use subscriber::{ObjectId, SubscriberId};
pub use watch::{FlushMode, InvalidationToken, OnInvalidate, WatchOptions, Watcher};
