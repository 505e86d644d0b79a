//! Execution Context
//!
//! The execution context tracks which computation is currently running.
//! This enables automatic dependency tracking: when an observed slot is read,
//! the runtime registers the computation on top of the stack as a dependent.
//!
//! # Implementation
//!
//! Each [`Runtime`](super::Runtime) owns one stack per thread, keyed by
//! [`ThreadId`]. Runtime handles are `Send + Sync`, so a read made on one
//! thread must never be attributed to a computation running on another.
//! Entering a computation pushes its subscriber ID onto the calling thread's
//! stack and returns a guard; dropping the guard pops it.
//! The guard also runs during unwinding, so a panicking body can never leave
//! a stale entry behind for unrelated work.
//!
//! Nested computations (an effect created or a computed value read inside
//! another effect) simply push on top of their parent.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::subscriber::SubscriberId;

/// Per-thread stacks of currently running computations, top = current reader.
#[derive(Debug, Default)]
pub(crate) struct ExecutionContext {
    stacks: Mutex<HashMap<ThreadId, Vec<SubscriberId>>>,
}

impl ExecutionContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Push `subscriber_id` on the calling thread's stack and return a guard
    /// that pops it when dropped.
    pub(crate) fn enter(&self, subscriber_id: SubscriberId) -> ContextGuard<'_> {
        let thread = thread::current().id();
        self.stacks.lock().entry(thread).or_default().push(subscriber_id);
        ContextGuard {
            context: self,
            thread,
            subscriber_id,
        }
    }

    /// The computation on top of the calling thread's stack, if any.
    pub(crate) fn current(&self) -> Option<SubscriberId> {
        self.with_stack(|stack| stack.last().copied())
    }

    /// Check if any computation is running on the calling thread.
    pub(crate) fn is_active(&self) -> bool {
        self.with_stack(|stack| !stack.is_empty())
    }

    /// Number of nested computations running on the calling thread.
    pub(crate) fn depth(&self) -> usize {
        self.with_stack(<[SubscriberId]>::len)
    }

    fn with_stack<R>(&self, f: impl FnOnce(&[SubscriberId]) -> R) -> R {
        let stacks = self.stacks.lock();
        let stack = stacks
            .get(&thread::current().id())
            .map(Vec::as_slice)
            .unwrap_or_default();
        f(stack)
    }
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub(crate) struct ContextGuard<'a> {
    context: &'a ExecutionContext,
    thread: ThreadId,
    subscriber_id: SubscriberId,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let popped = {
            let mut stacks = self.context.stacks.lock();
            let popped = stacks.get_mut(&self.thread).and_then(Vec::pop);
            if stacks.get(&self.thread).is_some_and(Vec::is_empty) {
                stacks.remove(&self.thread);
            }
            popped
        };

        // Guards are strictly nested; a mismatch means a guard escaped its scope.
        debug_assert_eq!(
            popped,
            Some(self.subscriber_id),
            "ExecutionContext mismatch: expected {:?}, got {:?}",
            self.subscriber_id,
            popped
        );
    }
}
