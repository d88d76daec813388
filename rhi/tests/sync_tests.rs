//! Integration tests for queries, fences and the command stream.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rstest::rstest;

use common::{Backend, TestContext};
use redlilium_rhi::{
    DummyBackend, QueryKind, QueryState, QueryTarget, RhiConfig, RhiContext, RhiError,
};

fn dummy_context(backend: DummyBackend) -> RhiContext {
    let _ = env_logger::builder().is_test(true).try_init();
    RhiContext::new(Box::new(backend), RhiConfig::default()).unwrap()
}

// ============================================================================
// Query Tests
// ============================================================================

/// A query resolves within a bounded number of end-of-frame polls.
#[test]
fn test_query_resolves_within_bounded_polls() {
    const LATENCY: u32 = 3;
    let mut ctx = dummy_context(
        DummyBackend::new()
            .with_query_latency(LATENCY)
            .with_occlusion_samples(640),
    );
    let query = ctx.create_query(QueryKind::Occlusion).unwrap();
    ctx.begin_query(query).unwrap();
    ctx.end_query(query, None).unwrap();

    let mut frames = 0;
    while ctx.queries().get(query).unwrap().state() != QueryState::Resolved {
        ctx.end_frame();
        frames += 1;
        assert!(frames <= LATENCY + 1, "query still pending after {frames} frames");
    }

    assert_eq!(frames, LATENCY + 1);
    assert_eq!(ctx.query_result(query, false), Some(640));
    assert_eq!(ctx.queries().active_count(), 0);
}

/// Timestamps written through a shared target increase monotonically.
#[test]
fn test_timestamp_targets() {
    let mut ctx = dummy_context(DummyBackend::new().with_query_latency(1));
    let target = QueryTarget::new();
    let queries: Vec<_> = (0..3)
        .map(|_| ctx.create_query(QueryKind::Timestamp).unwrap())
        .collect();

    let mut seen = Vec::new();
    for &query in &queries {
        ctx.end_query(query, Some(target.clone())).unwrap();
        assert_eq!(ctx.poll_query_results(Some(query)), 0);
        assert_eq!(ctx.poll_query_results(Some(query)), 1);
        seen.push(target.get());
    }

    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(ctx.stats().queries_resolved, 3);
}

/// Abandoned queries never report a result.
#[test]
fn test_abandoned_query() {
    let mut ctx = dummy_context(DummyBackend::new().with_query_latency(2));
    let query = ctx.create_query(QueryKind::Timestamp).unwrap();
    ctx.end_query(query, None).unwrap();

    assert!(ctx.abandon_query(query));
    assert_eq!(ctx.end_frame().queries_resolved, 0);
    assert_eq!(ctx.query_result(query, true), None);
    assert!(ctx.destroy_query(query));
}

/// Backends without query support report it at creation.
#[rstest]
#[case::webgpu(Backend::WebGpu)]
fn test_unsupported_queries(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let result = test.ctx.create_query(QueryKind::Occlusion);
    assert!(matches!(result, Err(RhiError::FeatureNotSupported(_))));
}

// ============================================================================
// Fence Tests
// ============================================================================

/// Fence callbacks run during the end-of-frame sweep.
#[test]
fn test_fence_callbacks_run_at_frame_end() {
    let mut ctx = dummy_context(DummyBackend::new().with_fence_latency(2));
    let fence = ctx.insert_fence().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    ctx.on_fence_signaled(
        fence,
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    assert_eq!(ctx.end_frame().fences_signaled, 0);
    assert_eq!(ctx.end_frame().fences_signaled, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.end_frame().fences_signaled, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(ctx.fence_signaled(fence, false));
}

/// Other threads can block on a fence signal while the context polls.
#[test]
fn test_fence_signal_wakes_other_thread() {
    let mut ctx = dummy_context(DummyBackend::new().with_fence_latency(1));
    let fence = ctx.insert_fence().unwrap();
    let signal = ctx.fence_signal(fence).unwrap();

    let waiter = std::thread::spawn(move || signal.wait_timeout(Duration::from_secs(10)));
    ctx.poll_fences();
    ctx.poll_fences();

    assert!(waiter.join().unwrap());
}

/// Blocking fence waits work on every backend.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_fence_blocking_wait(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let fence = test.ctx.insert_fence().unwrap();
    assert!(test.ctx.fence_signaled(fence, true));
    assert!(test.ctx.fence_signal(fence).unwrap().is_signaled());
    assert!(test.ctx.destroy_fence(fence));
}

// ============================================================================
// Command Stream Tests
// ============================================================================

/// Commands from each producer thread run in the order that thread sent them.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_commands_preserve_producer_order(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    const PRODUCERS: usize = 4;
    const COMMANDS: usize = 25;
    let log = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let sender = test.ctx.command_sender();
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for index in 0..COMMANDS {
                    let log = Arc::clone(&log);
                    sender
                        .enqueue(move |_ctx| log.lock().unwrap().push((producer, index)))
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(test.ctx.execute_pending(), PRODUCERS * COMMANDS);
    let log = log.lock().unwrap();
    for producer in 0..PRODUCERS {
        let order: Vec<usize> = log
            .iter()
            .filter(|(from, _)| *from == producer)
            .map(|(_, index)| *index)
            .collect();
        assert_eq!(order, (0..COMMANDS).collect::<Vec<_>>());
    }
}

/// Commands can create and touch GPU objects on the context thread.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_commands_upload_textures(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let sender = test.ctx.command_sender();
    let created = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&created);
    std::thread::spawn(move || {
        sender
            .enqueue(move |ctx: &mut RhiContext| {
                let desc = common::streamed_texture(4, 1);
                let key = ctx.create_texture(&desc, &[&[7u8; 64]]).unwrap();
                *slot.lock().unwrap() = Some(key);
            })
            .unwrap();
    })
    .join()
    .unwrap();

    test.ctx.execute_pending();
    let key = created.lock().unwrap().take().unwrap();
    assert_eq!(test.ctx.read_texture_mip(key, 0).unwrap(), vec![7u8; 64]);
}
