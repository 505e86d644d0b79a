//! Integration Tests for the Reactive System
//!
//! These tests verify that containers, effects, computed values and watchers
//! work together through the runtime.

mod common;

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;
use serde_json::json;

use ripple_core::{
    DeferredExecutor, EffectOptions, ImmediateExecutor, Key, ManualExecutor, ReactiveObject,
    Runtime, Value, WatchOptions,
};

fn counter() -> Arc<AtomicI32> {
    Arc::new(AtomicI32::new(0))
}

/// Reading `k1` subscribes to `k1` only.
#[test]
fn effect_reruns_once_per_mutation_of_read_key() {
    common::init_tracing();
    let rt = Runtime::new();
    let state = rt.object_from([("k1", 1), ("k2", 2)]);
    let runs = counter();

    let _effect = {
        let state = state.clone();
        let runs = runs.clone();
        rt.effect(
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                state.get("k1")
            },
            EffectOptions::default(),
        )
    };
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    state.set("k1", 10);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    state.set("k1", 11);
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    // Untouched key
    state.set("k2", 20);
    state.set("unrelated", true);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

/// `ok ? text : "fallback"` drops the dependency on `text` once `ok` is false.
#[test]
fn branch_switch_removes_stale_dependency() {
    common::init_tracing();
    let rt = Runtime::new();
    let state = rt.object_from([("ok", Value::from(true)), ("text", Value::from("hello"))]);
    let rendered = Arc::new(Mutex::new(String::new()));

    let effect = {
        let state = state.clone();
        let rendered = rendered.clone();
        rt.effect(
            move || {
                let text = if state.get("ok").as_bool().unwrap_or(false) {
                    state.get("text").as_str().unwrap_or_default().to_owned()
                } else {
                    String::from("fallback")
                };
                *rendered.lock() = text;
            },
            EffectOptions::default(),
        )
    };
    assert_eq!(*rendered.lock(), "hello");
    assert_eq!(effect.dependency_count(), 2);

    state.set("ok", false);
    assert_eq!(*rendered.lock(), "fallback");
    assert_eq!(effect.run_count(), 2);
    assert_eq!(effect.dependency_count(), 1);
    assert_eq!(rt.subscriber_count(state.id(), &Key::from("text")), 0);

    state.set("text", "changed");
    assert_eq!(effect.run_count(), 2);
}

/// `count = count + 1` inside its own effect terminates.
#[test]
fn self_trigger_guard_prevents_recursion() {
    common::init_tracing();
    let rt = Runtime::new();
    let state = rt.object_from([("count", 1)]);

    let effect = {
        let state = state.clone();
        rt.effect(
            move || {
                let count = state.get("count").as_i64().unwrap_or(0);
                state.set("count", count + 1);
            },
            EffectOptions::default(),
        )
    };

    assert_eq!(state.get("count").as_i64(), Some(2));
    assert_eq!(effect.run_count(), 1);

    state.set("count", 10);
    assert_eq!(state.get("count").as_i64(), Some(11));
    assert_eq!(effect.run_count(), 2);

    // Still subscribed after its own write.
    assert_eq!(rt.subscriber_count(state.id(), &Key::from("count")), 1);
}

/// Inner reads `bar`, outer reads `foo`.
#[test]
fn nested_effects_track_their_own_reads() {
    common::init_tracing();
    let rt = Runtime::new();
    let state = rt.object_from([("foo", true), ("bar", true)]);
    let outer_runs = counter();
    let inner_runs = counter();

    let _outer = {
        let weak = rt.downgrade();
        let state = state.clone();
        let outer_runs = outer_runs.clone();
        let inner_runs = inner_runs.clone();
        rt.effect(
            move || {
                outer_runs.fetch_add(1, Ordering::SeqCst);
                if let Some(rt) = weak.upgrade() {
                    let state = state.clone();
                    let inner_runs = inner_runs.clone();
                    rt.effect(
                        move || {
                            inner_runs.fetch_add(1, Ordering::SeqCst);
                            state.get("bar");
                        },
                        EffectOptions::default(),
                    );
                }
                state.get("foo");
            },
            EffectOptions::default(),
        )
    };
    assert_eq!(outer_runs.load(Ordering::SeqCst), 1);
    assert_eq!(inner_runs.load(Ordering::SeqCst), 1);

    state.set("bar", false);
    assert_eq!(outer_runs.load(Ordering::SeqCst), 1);
    assert_eq!(inner_runs.load(Ordering::SeqCst), 2);

    state.set("foo", false);
    assert_eq!(outer_runs.load(Ordering::SeqCst), 2);
    assert_eq!(inner_runs.load(Ordering::SeqCst), 3);
    assert_eq!(rt.depth(), 0);
}

/// `a + b` is computed once per change, however often it is read.
#[test]
fn computed_runs_getter_once_between_changes() {
    common::init_tracing();
    let rt = Runtime::new();
    let a = rt.signal(1);
    let b = rt.signal(2);
    let computes = counter();

    let sum = {
        let (a, b) = (a.clone(), b.clone());
        let computes = computes.clone();
        rt.computed(move || {
            computes.fetch_add(1, Ordering::SeqCst);
            a.get() + b.get()
        })
    };

    assert_eq!(sum.get(), 3);
    assert_eq!(sum.get(), 3);
    assert_eq!(sum.get(), 3);
    assert_eq!(computes.load(Ordering::SeqCst), 1);

    a.set(10);
    assert!(sum.is_dirty());
    // Not recomputed eagerly
    assert_eq!(computes.load(Ordering::SeqCst), 1);

    assert_eq!(sum.get(), 12);
    assert_eq!(sum.get(), 12);
    assert_eq!(computes.load(Ordering::SeqCst), 2);
}

/// An effect reading a computed value reacts to the computed value's inputs.
#[test]
fn effect_reacts_through_computed_chain() {
    common::init_tracing();
    let rt = Runtime::new();
    let base = rt.signal(5);

    let doubled = {
        let base = base.clone();
        rt.computed(move || base.get() * 2)
    };
    let plus_ten = {
        let doubled = doubled.clone();
        rt.computed(move || doubled.get() + 10)
    };

    let seen = Arc::new(Mutex::new(Vec::new()));
    let effect = {
        let plus_ten = plus_ten.clone();
        let seen = seen.clone();
        rt.effect(move || seen.lock().push(plus_ten.get()), EffectOptions::default())
    };
    assert_eq!(*seen.lock(), vec![20]);

    base.set(10);
    assert_eq!(*seen.lock(), vec![20, 30]);
    assert_eq!(effect.run_count(), 2);

    // Reading again without a change does not recompute.
    assert_eq!(plus_ten.get(), 30);
    assert_eq!(doubled.compute_count(), 2);
    assert_eq!(plus_ten.compute_count(), 2);
}

/// Two sync mutations, two callbacks, in order.
#[test]
fn sync_watcher_sees_each_mutation_in_order() {
    common::init_tracing();
    let rt = Runtime::new();
    let state = rt.object_from([("foo", 1)]);
    let calls = Arc::new(Mutex::new(Vec::new()));

    let _watcher = {
        let state = state.clone();
        let calls = calls.clone();
        rt.watch(
            move || state.get("foo").as_i64(),
            move |new, old, _| calls.lock().push((new, old.flatten())),
            WatchOptions::sync(),
        )
    };

    state.set("foo", 2);
    assert_eq!(*calls.lock(), vec![(Some(2), Some(1))]);

    state.set("foo", 3);
    assert_eq!(*calls.lock(), vec![(Some(2), Some(1)), (Some(3), Some(2))]);
}

/// Deferred jobs are queued once per trigger and not coalesced.
#[test]
fn post_watcher_queues_one_job_per_trigger() {
    common::init_tracing();
    let executor = Arc::new(ManualExecutor::new());
    let rt = Runtime::builder().executor(executor.clone()).build();
    let source = rt.signal(1);
    let calls = Arc::new(Mutex::new(Vec::new()));

    let watcher = {
        let source = source.clone();
        let calls = calls.clone();
        rt.watch(
            move || source.get(),
            move |new, old, _| calls.lock().push((new, old)),
            WatchOptions::default(),
        )
    };

    source.set(2);
    source.set(3);
    assert_eq!(executor.pending(), 2);
    assert!(calls.lock().is_empty());

    assert_eq!(executor.flush(), 2);
    // The second job finds nothing new.
    assert_eq!(*calls.lock(), vec![(3, Some(1))]);
    assert_eq!(watcher.generation(), 2);
}

#[test]
fn immediate_executor_flushes_post_watchers_inline() {
    let rt = Runtime::builder()
        .executor(Arc::new(ImmediateExecutor))
        .build();
    let source = rt.signal("a");
    let calls = Arc::new(Mutex::new(Vec::new()));

    let _watcher = {
        let source = source.clone();
        let calls = calls.clone();
        rt.watch(
            move || source.get(),
            move |new, old, _| calls.lock().push((new, old)),
            WatchOptions::default().with_immediate(true),
        )
    };

    source.set("b");
    assert_eq!(*calls.lock(), vec![("a", None), ("b", Some("a"))]);
}

/// A deep watcher sees writes anywhere in the reachable graph.
#[test]
fn object_watcher_traverses_nested_objects() {
    common::init_tracing();
    let rt = Runtime::new();
    let state = ReactiveObject::from_json(&rt, &json!({ "a": 1, "nested": { "b": 2 }, "me": null }))
        .expect("valid state");
    let calls = Arc::new(Mutex::new(Vec::new()));

    let _watcher = {
        let calls = calls.clone();
        rt.watch_object(
            &state,
            move |new, old, _| calls.lock().push((new, old)),
            WatchOptions::sync(),
        )
    };

    let nested = state.get("nested");
    let nested = nested.as_object().expect("nested object");
    nested.set("b", 3);

    assert_eq!(
        *calls.lock(),
        vec![(
            json!({ "a": 1, "nested": { "b": 3 }, "me": null }),
            Some(json!({ "a": 1, "nested": { "b": 2 }, "me": null }))
        )]
    );

    // Keys are tracked once read; self references terminate.
    let child = rt.object_from([("parent", state.clone())]);
    state.set("me", child);
    assert_eq!(calls.lock().len(), 2);
    assert_eq!(calls.lock()[1].0["me"], json!({ "parent": null }));

    state.set("me", Value::Null);
    assert_eq!(calls.lock().len(), 3);
}

/// A scheduler replaces the immediate re-run.
#[test]
fn scheduler_receives_triggered_computation() {
    common::init_tracing();
    let rt = Runtime::new();
    let source = rt.signal(0);
    let runs = counter();
    let queue = Arc::new(Mutex::new(Vec::new()));

    let effect = {
        let source = source.clone();
        let runs = runs.clone();
        let queue = queue.clone();
        rt.effect(
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                source.get()
            },
            EffectOptions::default().with_scheduler(move |computation| {
                queue.lock().push(computation.clone());
            }),
        )
    };

    source.set(1);
    source.set(2);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(queue.lock().len(), 2);
    assert_eq!(queue.lock()[0].id(), effect.id());

    let pending: Vec<_> = queue.lock().drain(..).collect();
    for computation in pending {
        computation.run();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

/// Subscribers are notified in the order they subscribed.
#[test]
fn trigger_notifies_in_subscription_order() {
    let rt = Runtime::new();
    let source = rt.signal(0);
    let order = Arc::new(Mutex::new(Vec::new()));

    let _effects: Vec<_> = (0..3)
        .map(|i| {
            let source = source.clone();
            let order = order.clone();
            rt.effect(
                move || {
                    source.get();
                    order.lock().push(i);
                },
                EffectOptions::default(),
            )
        })
        .collect();

    order.lock().clear();
    source.set(1);
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

/// A failing run leaves the context intact and the effect without dependencies.
#[test]
fn panicking_effect_restores_context() {
    common::init_tracing();
    let rt = Runtime::new();
    let source = rt.signal(0);
    let fail = Arc::new(AtomicBool::new(false));

    let effect = {
        let source = source.clone();
        let fail = fail.clone();
        rt.effect(
            move || {
                let value = source.get();
                if fail.load(Ordering::SeqCst) {
                    panic!("effect failed at {value}");
                }
                value
            },
            EffectOptions::default(),
        )
    };
    assert_eq!(effect.dependency_count(), 1);

    fail.store(true, Ordering::SeqCst);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| source.set(1)));
    assert!(result.is_err());
    assert_eq!(rt.depth(), 0);
    assert_eq!(effect.run_count(), 1);

    // The failed run read `source` before panicking, so it is subscribed again.
    assert_eq!(effect.dependency_count(), 1);

    fail.store(false, Ordering::SeqCst);
    source.set(2);
    assert_eq!(effect.run_count(), 2);
}

/// A body that panics before reading anything ends up with no dependencies.
#[test]
fn failed_run_before_reads_has_no_dependencies() {
    let rt = Runtime::new();
    let source = rt.signal(0);
    let fail = Arc::new(AtomicBool::new(false));

    let effect = {
        let source = source.clone();
        let fail = fail.clone();
        rt.effect(
            move || {
                if fail.load(Ordering::SeqCst) {
                    panic!("effect failed");
                }
                source.get()
            },
            EffectOptions::default(),
        )
    };

    fail.store(true, Ordering::SeqCst);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| effect.run()));
    assert!(result.is_err());
    assert_eq!(effect.dependency_count(), 0);

    // No longer reacts
    source.set(5);
    assert_eq!(effect.run_count(), 1);

    fail.store(false, Ordering::SeqCst);
    assert_eq!(effect.run(), 5);
    source.set(6);
    assert_eq!(effect.run_count(), 3);
}

#[test]
fn independent_runtimes_do_not_interfere() {
    let rt1 = Runtime::new();
    let rt2 = Runtime::new();
    let source = rt1.signal(0);
    let depth_seen = Arc::new(AtomicI32::new(-1));

    let _effect = {
        let source = source.clone();
        let depth_seen = depth_seen.clone();
        let rt2 = rt2.downgrade();
        rt1.effect(
            move || {
                source.get();
                let depth = rt2.upgrade().map_or(-1, |rt| rt.depth() as i32);
                depth_seen.store(depth, Ordering::SeqCst);
            },
            EffectOptions::default(),
        )
    };

    assert_eq!(depth_seen.load(Ordering::SeqCst), 0);
    assert_eq!(rt1.computation_count(), 1);
    assert_eq!(rt2.computation_count(), 0);
    assert_eq!(rt2.observed_object_count(), 0);
}

#[test]
fn disposed_effect_leaves_no_subscriptions() {
    let rt = Runtime::new();
    let state = rt.object_from([("a", 1), ("b", 2)]);

    let effect = {
        let state = state.clone();
        rt.effect(
            move || {
                state.get("a");
                state.get("b");
            },
            EffectOptions::default(),
        )
    };
    assert_eq!(rt.observed_object_count(), 1);

    effect.dispose();
    assert_eq!(rt.observed_object_count(), 0);

    state.set("a", 3);
    assert_eq!(effect.run_count(), 1);
}

/// A read on another thread, outside any computation, is not recorded on
/// the computation running concurrently.
#[test]
fn reads_on_other_threads_are_not_attributed() {
    common::init_tracing();
    let rt = Runtime::new();
    let owned = rt.signal(0);
    let foreign = rt.signal(0);
    let barrier = Arc::new(Barrier::new(2));
    let first_run = Arc::new(AtomicBool::new(true));

    let effect = {
        let owned = owned.clone();
        let barrier = barrier.clone();
        rt.effect(
            move || {
                owned.get();
                if first_run.swap(false, Ordering::SeqCst) {
                    // Hold the run open while the other thread reads.
                    barrier.wait();
                    barrier.wait();
                }
            },
            EffectOptions::lazy(),
        )
    };

    std::thread::scope(|scope| {
        scope.spawn(|| effect.run());
        scope.spawn(|| {
            barrier.wait();
            assert!(rt.current().is_none());
            assert_eq!(rt.depth(), 0);
            foreign.get();
            barrier.wait();
        });
    });

    assert_eq!(effect.dependency_count(), 1);
    assert_eq!(rt.subscriber_count(foreign.id(), &Key::from("value")), 0);

    foreign.set(1);
    assert_eq!(effect.run_count(), 1);
    owned.set(1);
    assert_eq!(effect.run_count(), 2);
}

/// Dropping the runtime frees undisposed effects, computed values and
/// watchers, along with everything their closures captured.
#[test]
fn dropping_runtime_releases_live_computations() {
    common::init_tracing();
    let rt = Runtime::new();
    let source = rt.signal(1);
    let marker = Arc::new(());

    let total = {
        let source = source.clone();
        let marker = marker.clone();
        rt.computed(move || {
            let _held = &marker;
            source.get() * 2
        })
    };
    let effect = {
        let total = total.clone();
        let marker = marker.clone();
        rt.effect(
            move || {
                let _held = &marker;
                total.get()
            },
            EffectOptions::default(),
        )
    };
    let watcher = {
        let source = source.clone();
        let marker = marker.clone();
        rt.watch(
            move || source.get(),
            move |_, _, _| {
                let _held = &marker;
            },
            WatchOptions::sync(),
        )
    };
    drop((total, effect, watcher));

    // Still registered and reacting.
    source.set(2);
    assert_eq!(rt.computation_count(), 3);
    assert_eq!(Arc::strong_count(&marker), 4);

    drop(rt);
    assert_eq!(Arc::strong_count(&marker), 1);
}
