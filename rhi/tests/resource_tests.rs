//! Integration tests for buffers, ring buffers and texture residency.
//!
//! Tests are parameterized using `rstest` to run against every backend that
//! is compiled in.
//!
//! ```bash
//! cargo test --test resource_tests
//! cargo test --test resource_tests --features wgpu-backend
//! ```

mod common;

use rstest::rstest;

use common::{Backend, TestContext, generate_test_pattern, streamed_texture};
use redlilium_rhi::{BufferUsage, LockMode, LockPath, ResidencyState, RhiConfig, ViewKind};

// ============================================================================
// Buffer Tests
// ============================================================================

/// Lock with discard, write, unlock, then lock for reading and compare.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_buffer_lock_roundtrip(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    const BUFFER_SIZE: u64 = 1024;
    let pattern = generate_test_pattern(BUFFER_SIZE as usize);
    let mut buffer = test.create_buffer(BUFFER_SIZE, BufferUsage::VERTEX);

    let bytes = buffer.lock(test.ctx.device_mut(), 0, BUFFER_SIZE, LockMode::WriteOnly, true);
    bytes.copy_from_slice(&pattern);
    assert_eq!(buffer.lock_path(), Some(LockPath::ShadowCopy));
    buffer.unlock(test.ctx.device_mut());

    let bytes = buffer.lock(test.ctx.device_mut(), 0, BUFFER_SIZE, LockMode::ReadOnly, false);
    assert_eq!(bytes, pattern.as_slice());
    buffer.unlock(test.ctx.device_mut());
}

/// Partial updates land at their offsets and leave the rest intact.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_buffer_partial_update(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut buffer = test.create_buffer(64, BufferUsage::UNIFORM);
    buffer.update(test.ctx.device_mut(), &[1u8; 64], 0, true);
    buffer.update(test.ctx.device_mut(), &[9u8; 5], 10, false);

    let bytes = buffer.lock(test.ctx.device_mut(), 8, 8, LockMode::ReadOnly, false);
    assert_eq!(bytes, &[1, 1, 9, 9, 9, 9, 9, 1]);
    buffer.unlock(test.ctx.device_mut());
}

/// Direct-map locks write back on unlock.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_buffer_direct_map(#[case] backend: Backend) {
    let config = RhiConfig::default().with_prefer_buffer_map(true);
    let Some(mut test) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut buffer = test.create_buffer(256, BufferUsage::STORAGE);
    let bytes = buffer.lock(test.ctx.device_mut(), 0, 256, LockMode::WriteOnly, true);
    bytes.fill(0xAB);
    assert_eq!(buffer.lock_path(), Some(LockPath::DirectMap));
    buffer.unlock(test.ctx.device_mut());

    let bytes = buffer.lock(test.ctx.device_mut(), 128, 4, LockMode::ReadOnly, false);
    assert_eq!(bytes, &[0xAB; 4]);
    buffer.unlock(test.ctx.device_mut());
    assert_eq!(test.ctx.stats().direct_map_locks, 2);
}

/// Dropped buffers are released at the end of the frame.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_dropped_buffer_released_at_frame_end(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let buffers: Vec<_> = (0..3)
        .map(|_| test.create_buffer(128, BufferUsage::INDEX))
        .collect();
    std::thread::spawn(move || drop(buffers)).join().unwrap();

    assert_eq!(test.ctx.end_frame().released, 3);
    assert_eq!(test.ctx.end_frame().released, 0);
}

// ============================================================================
// Ring Buffer Tests
// ============================================================================

/// Two 1 MiB buffers: twenty 50 KiB locks fit, the 21st rotates with discard.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_ring_rotation_after_twenty_locks(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    const LOCK_SIZE: u64 = 50 * 1024;
    let mut ring = test
        .ctx
        .create_ring_buffer(2, 1 << 20, BufferUsage::VERTEX, "particles")
        .unwrap();

    for index in 0..20 {
        let (range, bytes) = ring.lock(test.ctx.device_mut(), LOCK_SIZE);
        bytes.fill(index as u8);
        ring.unlock(test.ctx.device_mut());

        assert_eq!(range.buffer_index, 0);
        assert_eq!(range.offset, index * LOCK_SIZE);
        assert!(!ring.last_lock_discarded());
    }

    let (range, _) = ring.lock(test.ctx.device_mut(), LOCK_SIZE);
    ring.unlock(test.ctx.device_mut());

    assert_eq!(range.buffer_index, 1);
    assert_eq!(range.offset, 0);
    assert!(ring.last_lock_discarded());
    assert_eq!(ring.rotations(), 1);
    assert_eq!(ring.buffer(1).unwrap().size(), 1 << 20);
}

/// Consecutive ring ranges are aligned and never overlap.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_ring_ranges_are_disjoint(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut ring = test
        .ctx
        .create_ring_buffer(3, 4096, BufferUsage::UNIFORM, "uniforms")
        .unwrap();
    let alignment = ring.alignment();

    let mut ranges = Vec::new();
    for size in [16, 300, 1, 700, 255] {
        let (range, bytes) = ring.lock(test.ctx.device_mut(), size);
        assert_eq!(bytes.len() as u64, size);
        ring.unlock(test.ctx.device_mut());
        ranges.push(range);
    }

    for pair in ranges.windows(2) {
        assert_eq!(pair[0].buffer_index, pair[1].buffer_index);
        assert_eq!(pair[1].offset % alignment, 0);
        assert!(pair[1].offset >= pair[0].end());
    }
    assert_eq!(ranges[1].offset, 256);
    assert_eq!(ranges[4].offset, 256 * 7);
}

// ============================================================================
// Texture Residency Tests
// ============================================================================

/// 64x64 RGBA8 texture with 4 mips: upload mip 0, evict, access, compare.
/// With a live view the texture cannot be evicted.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_texture_eviction_roundtrip(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let desc = streamed_texture(64, 4);
    let pattern = generate_test_pattern(desc.mip_byte_size(0) as usize);
    let texture = test.ctx.create_texture(&desc, &[]).unwrap();
    test.ctx.write_texture_mip(texture, 0, &pattern).unwrap();

    assert!(test.ctx.try_evict(texture));
    assert_eq!(test.ctx.texture(texture).unwrap().state(), ResidencyState::Evicted);
    assert!(test.ctx.texture(texture).unwrap().handle().is_none());

    test.ctx.resource(texture).unwrap();
    assert_eq!(test.ctx.texture(texture).unwrap().state(), ResidencyState::Live);
    assert_eq!(test.ctx.read_texture_mip(texture, 0).unwrap(), pattern);
    assert_eq!(test.ctx.stats().texture_restores, 1);

    let view = test
        .ctx
        .create_view(texture, ViewKind::ShaderResource, 0, 4)
        .unwrap();
    assert!(!test.ctx.try_evict(texture));
    assert_eq!(test.ctx.texture(texture).unwrap().state(), ResidencyState::Live);

    assert!(test.ctx.destroy_view(view));
    assert!(test.ctx.try_evict(texture));
}

/// Every mip survives eviction, not just the ones written explicitly.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_all_mips_survive_eviction(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let desc = streamed_texture(16, 3);
    let mips: Vec<Vec<u8>> = (0..3)
        .map(|mip| vec![mip as u8 + 10; desc.mip_byte_size(mip) as usize])
        .collect();
    let slices: Vec<&[u8]> = mips.iter().map(Vec::as_slice).collect();
    let texture = test.ctx.create_texture(&desc, &slices).unwrap();

    for _ in 0..2 {
        assert!(test.ctx.try_evict(texture));
        test.ctx.restore_evicted(texture, false).unwrap();
    }
    for (mip, expected) in mips.iter().enumerate() {
        assert_eq!(&test.ctx.read_texture_mip(texture, mip as u32).unwrap(), expected);
    }
}

/// Writes to an evicted texture are applied when it is restored.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_write_to_evicted_texture(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let desc = streamed_texture(8, 1);
    let texture = test.ctx.create_texture(&desc, &[&[1u8; 256]]).unwrap();
    assert!(test.ctx.try_evict(texture));

    test.ctx.write_texture_mip(texture, 0, &[5u8; 256]).unwrap();
    assert_eq!(test.ctx.texture(texture).unwrap().state(), ResidencyState::Evicted);
    assert_eq!(test.ctx.read_texture_mip(texture, 0).unwrap(), vec![5u8; 256]);
}

/// Deferred creation only touches the driver on first access.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_deferred_texture_creation(#[case] backend: Backend) {
    let config = RhiConfig::default().with_defer_texture_creation(true);
    let Some(mut test) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let desc = streamed_texture(8, 1);
    let texture = test.ctx.create_texture(&desc, &[&[3u8; 256]]).unwrap();
    assert_eq!(test.ctx.texture(texture).unwrap().state(), ResidencyState::Uncreated);
    assert!(!test.ctx.try_evict(texture));
    assert_eq!(test.ctx.stats().textures_created, 0);

    let handle = test.ctx.resource(texture).unwrap();
    assert_eq!(test.ctx.texture(texture).unwrap().handle(), Some(handle));
    assert_eq!(test.ctx.stats().textures_created, 1);
    assert_eq!(test.ctx.read_texture_mip(texture, 0).unwrap(), vec![3u8; 256]);
}

/// Aliases share the origin's driver object and pin it resident.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_aliased_textures(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let desc = streamed_texture(8, 1);
    let first = test.ctx.create_texture(&desc, &[&[1u8; 256]]).unwrap();
    let second = test.ctx.create_texture(&desc, &[&[2u8; 256]]).unwrap();
    assert!(test.ctx.try_evict(first));

    let alias = test.ctx.create_aliased_texture(first).unwrap();
    let origin = test.ctx.texture(first).unwrap();
    assert_eq!(origin.state(), ResidencyState::Live);
    assert!(!origin.is_evictable());
    assert_eq!(origin.alias_count(), 1);
    assert_eq!(
        test.ctx.texture(alias).unwrap().handle(),
        test.ctx.texture(first).unwrap().handle()
    );
    assert!(!test.ctx.try_evict(alias));

    let view = test
        .ctx
        .create_view(alias, ViewKind::ShaderResource, 0, 1)
        .unwrap();
    assert_eq!(test.ctx.realias_texture(alias, second).unwrap(), 1);
    let second_handle = test.ctx.texture(second).unwrap().handle();
    assert_eq!(
        test.ctx.textures().views().get(view).unwrap().handle(),
        second_handle
    );
    assert_eq!(test.ctx.texture(first).unwrap().alias_count(), 0);
    assert_eq!(test.ctx.read_texture_mip(alias, 0).unwrap(), vec![2u8; 256]);

    assert!(test.ctx.destroy_view(view));
    test.ctx.destroy_texture(alias).unwrap();
    test.ctx.destroy_texture(first).unwrap();
    test.ctx.destroy_texture(second).unwrap();
    assert!(test.ctx.textures().is_empty());
}

/// Invalidated views stay valid keys but no longer pin their texture.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_invalidate_views(#[case] backend: Backend) {
    let Some(mut test) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let texture = test.ctx.create_texture(&streamed_texture(16, 2), &[]).unwrap();
    let views: Vec<_> = (0..3)
        .map(|_| {
            test.ctx
                .create_view(texture, ViewKind::ShaderResource, 1, 1)
                .unwrap()
        })
        .collect();
    assert_eq!(test.ctx.texture(texture).unwrap().view_count(), 3);

    assert_eq!(test.ctx.invalidate_views(texture), 3);
    for &view in &views {
        let view = test.ctx.textures().views().get(view).unwrap();
        assert!(!view.is_attached());
        assert!(view.handle().is_none());
    }
    assert!(test.ctx.try_evict(texture));
}

/// Textures idle for the configured number of frames are evicted.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_tick_evicts_idle_textures(#[case] backend: Backend) {
    let config = RhiConfig::default().with_eviction_frames_to_live(3);
    let Some(mut test) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let desc = streamed_texture(8, 1);
    let idle = test.ctx.create_texture(&desc, &[]).unwrap();
    let busy = test.ctx.create_texture(&desc, &[]).unwrap();

    for _ in 0..5 {
        test.ctx.resource(busy).unwrap();
        test.ctx.end_frame();
    }

    assert_eq!(test.ctx.texture(idle).unwrap().state(), ResidencyState::Evicted);
    assert_eq!(test.ctx.texture(busy).unwrap().state(), ResidencyState::Live);
}

/// A resident budget evicts from the least-recently-used end, down to the
/// minimum resident count.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_tick_enforces_budget(#[case] backend: Backend) {
    let desc = streamed_texture(8, 1);
    let config = RhiConfig::default()
        .with_eviction_budget_bytes(Some(desc.memory_size() * 2))
        .with_eviction_min_resident(1);
    let Some(mut test) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let textures: Vec<_> = (0..5)
        .map(|_| test.ctx.create_texture(&desc, &[]).unwrap())
        .collect();
    test.ctx.resource(textures[0]).unwrap();

    let view = test
        .ctx
        .create_view(textures[1], ViewKind::ShaderResource, 0, 1)
        .unwrap();
    assert_eq!(test.ctx.tick_eviction(), 3);

    let states: Vec<_> = textures
        .iter()
        .map(|&key| test.ctx.texture(key).unwrap().state())
        .collect();
    assert_eq!(
        states,
        vec![
            ResidencyState::Live,
            ResidencyState::Live,
            ResidencyState::Evicted,
            ResidencyState::Evicted,
            ResidencyState::Evicted,
        ]
    );
    test.ctx.destroy_view(view);
}

/// With eviction disabled nothing is ever put on the LRU.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_eviction_disabled(#[case] backend: Backend) {
    let config = RhiConfig::default()
        .with_texture_eviction(false)
        .with_eviction_frames_to_live(0);
    let Some(mut test) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let texture = test.ctx.create_texture(&streamed_texture(8, 1), &[]).unwrap();
    assert!(!test.ctx.texture(texture).unwrap().is_evictable());
    assert!(!test.ctx.try_evict(texture));
    assert_eq!(test.ctx.end_frame().evicted, 0);
}
