//! Acquire semantics tests.
//!
//! Covers the guarantees of the execution entry point:
//! - guaranteed release on failure and panic
//! - mutual exclusion of entry windows per context
//! - error propagation to the caller, sync and async

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lingo_engine::{
    ContextHook, ContextManager, DispatchMode, EngineError, GuestError, ManagerOptions,
    PoolOptions, VmProperty, WaitStrategy,
};

fn confined_manager() -> ContextManager {
    ContextManager::with_options(ManagerOptions {
        dispatch: DispatchMode::ThreadConfined,
        ..Default::default()
    })
}

fn pooled_manager(pool_size: usize) -> ContextManager {
    ContextManager::with_options(ManagerOptions {
        dispatch: DispatchMode::Pooled(PoolOptions {
            pool_size,
            ring_capacity: 256,
            wait: WaitStrategy::Sleeping,
        }),
        ..Default::default()
    })
}

#[test]
fn test_failing_operation_releases_context_exactly_once() {
    let manager = confined_manager();
    manager.activate(true).unwrap();

    let err = manager
        .acquire(None, |_ctx| Err::<(), _>(GuestError::msg("guest raised")))
        .unwrap_err();
    assert_eq!(err.to_string(), "guest raised");

    // If the failing acquire leaked its entry, this depth would be 2
    let depth = manager
        .acquire(None, |ctx| Ok::<_, GuestError>(ctx.entry_depth()))
        .unwrap();
    assert_eq!(depth, 1);
}

#[test]
fn test_panicking_operation_releases_and_reports() {
    let manager = confined_manager();
    manager.activate(true).unwrap();

    let err = manager
        .acquire(None, |_ctx| -> Result<(), GuestError> {
            panic!("guest stack overflow");
        })
        .unwrap_err();
    assert!(err.to_string().contains("guest stack overflow"));

    let depth = manager
        .acquire(None, |ctx| Ok::<_, GuestError>(ctx.entry_depth()))
        .unwrap();
    assert_eq!(depth, 1);
}

#[test]
fn test_entry_windows_never_overlap_per_context() {
    let manager = Arc::new(pooled_manager(2));
    manager.activate(true).unwrap();

    // One in-flight counter per worker ordinal; the operation asserts its
    // own context is never concurrently entered.
    let in_flight: Arc<Vec<AtomicUsize>> =
        Arc::new((0..2).map(|_| AtomicUsize::new(0)).collect());
    let overlaps = Arc::new(AtomicUsize::new(0));

    let mut producers = Vec::new();
    for _ in 0..4 {
        let manager = manager.clone();
        let in_flight = in_flight.clone();
        let overlaps = overlaps.clone();
        producers.push(thread::spawn(move || {
            for _ in 0..50 {
                let in_flight = in_flight.clone();
                let overlaps = overlaps.clone();
                manager
                    .acquire(None, move |ctx| {
                        let ordinal: usize = ctx
                            .binding("worker.ordinal")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        let current = in_flight[ordinal].fetch_add(1, Ordering::SeqCst);
                        if current != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_micros(200));
                        in_flight[ordinal].fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, GuestError>(())
                    })
                    .unwrap();
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    manager.shutdown();
}

#[test]
fn test_reentrant_entry_depth_visible_to_operation() {
    let manager = confined_manager();
    manager.activate(true).unwrap();

    let depth = manager
        .acquire(None, |ctx| {
            // Nested scoped entry on the owning thread
            let _inner = ctx.enter_scoped().map_err(|e| GuestError::wrap("enter", e))?;
            Ok::<_, GuestError>(ctx.entry_depth())
        })
        .unwrap();
    assert_eq!(depth, 2);

    let depth = manager
        .acquire(None, |ctx| Ok::<_, GuestError>(ctx.entry_depth()))
        .unwrap();
    assert_eq!(depth, 1);
}

#[test]
fn test_hook_error_skips_operation() {
    let manager = confined_manager();
    manager.activate(true).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = ran.clone();

    let hook: ContextHook = Box::new(|_ctx| Err(GuestError::msg("hook rejected")));
    let err = manager
        .acquire(Some(hook), move |_ctx| {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok::<_, GuestError>(())
        })
        .unwrap_err();

    assert_eq!(err.to_string(), "hook rejected");
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_async_handle_resolves_result() {
    let manager = pooled_manager(2);
    manager.activate(true).unwrap();

    let handle = manager
        .acquire_async(None, |_ctx| Ok::<_, GuestError>("done".to_string()))
        .unwrap();
    assert_eq!(handle.wait().unwrap(), "done");

    manager.shutdown();
}

#[test]
fn test_async_handle_surfaces_failure() {
    let manager = pooled_manager(2);
    manager.activate(true).unwrap();

    let handle = manager
        .acquire_async(None, |_ctx| Err::<(), _>(GuestError::msg("async guest error")))
        .unwrap();
    let err = handle.wait().unwrap_err();
    assert!(matches!(err, EngineError::Guest(_)));
    assert_eq!(err.to_string(), "async guest error");

    manager.shutdown();
}

#[test]
fn test_async_handle_timeout_then_result() {
    let manager = pooled_manager(1);
    manager.activate(true).unwrap();

    let handle = manager
        .acquire_async(None, |_ctx| {
            thread::sleep(Duration::from_millis(50));
            Ok::<_, GuestError>(7)
        })
        .unwrap();

    // Too short to finish, then a proper wait
    assert!(handle.wait_timeout(Duration::from_millis(1)).is_none());
    assert_eq!(handle.wait().unwrap(), 7);

    manager.shutdown();
}

#[test]
fn test_concurrent_acquires_from_many_threads() {
    let manager = Arc::new(pooled_manager(4));
    manager
        .configure_vm([VmProperty::of("guest.mode", "batch")])
        .unwrap();
    manager.activate(true).unwrap();

    let total = Arc::new(AtomicUsize::new(0));
    let mut callers = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let total = total.clone();
        callers.push(thread::spawn(move || {
            for _ in 0..25 {
                let total = total.clone();
                let mode = manager
                    .acquire(None, move |ctx| {
                        total.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, GuestError>(ctx.property("guest.mode"))
                    })
                    .unwrap();
                assert_eq!(mode, Some("batch".to_string()));
            }
        }));
    }
    for caller in callers {
        caller.join().unwrap();
    }

    assert_eq!(total.load(Ordering::SeqCst), 200);
    manager.shutdown();
}
