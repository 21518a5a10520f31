//! Resource Cache Tests
//!
//! Tests for:
//! - Age-based release honoring pins and the strict age comparison
//! - LRU eviction and the ceiling invariant
//! - Budget refusal when pinned memory leaves no room
//! - Idle reuse of compatible resources, gated on the fence of in-flight work
//! - Fence-deferred destruction and tracker cleanup

use std::sync::Arc;
use std::time::Duration;

use glaze::GlazeError;
use glaze::hal::{
    BufferDesc, CommandList, GpuDevice, HeadlessDevice, HeapKind, PlacedFootprint, ResourceClass,
    ResourceState, TextureDesc,
};
use glaze::renderer::resource_cache::ResourceCache;
use glaze::renderer::state_tracker::ResourceStateTracker;
use glaze::time::ManualClock;

const MIB: u64 = 1024 * 1024;

struct Fixture {
    device: Arc<HeadlessDevice>,
    tracker: Arc<ResourceStateTracker>,
    clock: Arc<ManualClock>,
    cache: ResourceCache,
}

fn fixture(ceiling: u64) -> Fixture {
    let device = Arc::new(HeadlessDevice::default());
    let tracker = Arc::new(ResourceStateTracker::new());
    let clock = Arc::new(ManualClock::new());
    let cache = ResourceCache::with_clock(device.clone(), tracker.clone(), clock.clone(), ceiling);
    Fixture {
        device,
        tracker,
        clock,
        cache,
    }
}

/// `side * side * 4` bytes.
fn texture(side: u32) -> TextureDesc {
    TextureDesc {
        label: "Cache Texture",
        width: side,
        height: side,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        heap: HeapKind::DeviceLocal,
    }
}

fn upload(size: u64) -> BufferDesc {
    BufferDesc {
        label: "Cache Upload",
        size,
        usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
        heap: HeapKind::Upload,
    }
}

// ============================================================================
// Age-Based Release
// ============================================================================

#[test]
fn release_unused_skips_pinned_and_recent() {
    let f = fixture(64 * MIB);
    let old = f.cache.create_texture(&texture(64), ResourceState::Common).unwrap();
    let pinned = f.cache.create_texture(&texture(64), ResourceState::Common).unwrap();
    let recent = f.cache.create_texture(&texture(64), ResourceState::Common).unwrap();
    f.cache.pin(pinned.raw, true);

    f.clock.advance(Duration::from_secs(10));
    f.cache.mark_used(recent.raw);

    let report = f.cache.release_unused(Duration::from_secs(5));
    assert_eq!(report.resources, 1);
    assert_eq!(report.bytes, 64 * 64 * 4);
    assert!(!f.cache.contains(old.raw));
    assert!(f.cache.contains(pinned.raw));
    assert!(f.cache.contains(recent.raw));
}

#[test]
fn release_unused_requires_strictly_older() {
    let f = fixture(64 * MIB);
    let tex = f.cache.create_texture(&texture(16), ResourceState::Common).unwrap();

    f.clock.advance(Duration::from_secs(5));
    assert_eq!(f.cache.release_unused(Duration::from_secs(5)).resources, 0);

    f.clock.advance(Duration::from_millis(1));
    assert_eq!(f.cache.release_unused(Duration::from_secs(5)).resources, 1);
    assert!(!f.cache.contains(tex.raw));
}

// ============================================================================
// Eviction
// ============================================================================

#[test]
fn total_stays_under_ceiling_while_creating() {
    let f = fixture(MIB);
    let mut created = Vec::new();
    for _ in 0..64 {
        f.clock.advance(Duration::from_millis(1));
        created.push(f.cache.create_texture(&texture(128), ResourceState::Common).unwrap());
        assert!(f.cache.total_memory_usage() <= MIB);
    }

    assert!(!f.cache.contains(created[0].raw));
    assert!(f.cache.contains(created[63].raw));
    assert!(f.cache.stats().counters.evicted > 0);
}

#[test]
fn eviction_takes_least_recently_used_first() {
    let f = fixture(MIB);
    // 16 x 64 KiB fills the ceiling exactly.
    let textures: Vec<_> = (0..16)
        .map(|_| {
            f.clock.advance(Duration::from_millis(1));
            f.cache.create_texture(&texture(128), ResourceState::Common).unwrap()
        })
        .collect();
    assert_eq!(f.cache.total_memory_usage(), MIB);

    f.clock.advance(Duration::from_millis(1));
    f.cache.mark_used(textures[0].raw);
    f.clock.advance(Duration::from_millis(1));
    let newest = f.cache.create_texture(&texture(128), ResourceState::Common).unwrap();

    // Need 64 KiB over plus a tenth of the ceiling: three entries.
    assert!(f.cache.contains(textures[0].raw));
    for t in &textures[1..4] {
        assert!(!f.cache.contains(t.raw));
    }
    assert!(f.cache.contains(textures[4].raw));
    assert!(f.cache.contains(newest.raw));
    assert_eq!(f.cache.total_memory_usage(), 14 * 64 * 1024);
}

#[test]
fn lowering_the_ceiling_evicts() {
    let f = fixture(4 * MIB);
    for _ in 0..8 {
        f.cache.create_texture(&texture(256), ResourceState::Common).unwrap();
    }
    assert_eq!(f.cache.total_memory_usage(), 2 * MIB);

    let report = f.cache.set_ceiling(MIB);
    assert!(report.resources > 0);
    assert!(f.cache.total_memory_usage() <= MIB);
}

// ============================================================================
// Pins / Budget
// ============================================================================

#[test]
fn pinned_memory_can_exhaust_the_budget() {
    let f = fixture(MIB);
    let pinned: Vec<_> = (0..16)
        .map(|_| {
            let t = f.cache.create_texture(&texture(128), ResourceState::Common).unwrap();
            f.cache.pin(t.raw, true);
            t
        })
        .collect();

    // Still within ceiling * 1.1.
    f.cache.create_texture(&texture(128), ResourceState::Common).unwrap();
    assert!(f.cache.total_memory_usage() <= MIB + MIB / 10);

    let err = f.cache.create_texture(&texture(256), ResourceState::Common).unwrap_err();
    assert!(matches!(err, GlazeError::BudgetExceeded { .. }));
    assert!(!err.is_fatal());
    assert!(pinned.iter().all(|t| f.cache.contains(t.raw)));
    assert!(f.cache.total_memory_usage() <= MIB + MIB / 10);
}

// ============================================================================
// Reuse
// ============================================================================

#[test]
fn recycled_texture_is_reused_for_identical_desc() {
    let f = fixture(64 * MIB);
    let first = f.cache.create_texture(&texture(32), ResourceState::Common).unwrap();
    f.cache.recycle(first.raw);
    let created = f.device.stats().resources_created;

    let again = f.cache.create_texture(&texture(32), ResourceState::Common).unwrap();
    assert_eq!(again.raw, first.raw);
    assert_eq!(f.device.stats().resources_created, created);
    assert_eq!(f.cache.stats().counters.reuse_hits, 1);

    // Different size never matches.
    f.cache.recycle(again.raw);
    let other = f.cache.create_texture(&texture(64), ResourceState::Common).unwrap();
    assert_ne!(other.raw, first.raw);
}

#[test]
fn recycled_buffer_serves_smaller_requests() {
    let f = fixture(64 * MIB);
    let big = f.cache.create_buffer(&upload(4096), ResourceState::GenericRead).unwrap();
    f.cache.recycle(big.raw);

    let small = f.cache.create_buffer(&upload(1024), ResourceState::GenericRead).unwrap();
    assert_eq!(small.raw, big.raw);
    assert_eq!(small.size(), 4096);

    f.cache.recycle(small.raw);
    let bigger = f.cache.create_buffer(&upload(8192), ResourceState::GenericRead).unwrap();
    assert_ne!(bigger.raw, big.raw);
    assert_eq!(f.cache.total_memory_usage(), 4096 + 8192);
}

#[test]
fn recycled_buffer_is_not_reused_while_gpu_reads_it() {
    let device = Arc::new(HeadlessDevice::manual());
    let tracker = Arc::new(ResourceStateTracker::new());
    let clock = Arc::new(ManualClock::new());
    let cache = ResourceCache::with_clock(device.clone(), tracker, clock, 64 * MIB);

    let footprint = PlacedFootprint::for_texture(64, 1, wgpu::TextureFormat::Rgba8Unorm);
    let size = footprint.total_bytes();
    let staging = cache.create_buffer(&upload(size), ResourceState::GenericRead).unwrap();
    let target = cache
        .create_texture(
            &TextureDesc {
                width: 64,
                height: 1,
                ..texture(64)
            },
            ResourceState::CopyDest,
        )
        .unwrap();
    device.write_buffer(staging.raw, 0, &vec![1u8; size as usize]).unwrap();

    let mut list = CommandList::new(device.create_command_allocator().unwrap());
    list.copy_buffer_to_texture(staging.raw, footprint, target.raw);
    list.close();
    device.submit(list).unwrap();
    device.signal(1).unwrap();
    cache.set_retire_fence(1);

    // The copy is still queued: the recycled buffer must not come back.
    assert!(cache.recycle(staging.raw));
    let next = cache.create_buffer(&upload(size), ResourceState::GenericRead).unwrap();
    assert_ne!(next.raw, staging.raw);
    device.write_buffer(next.raw, 0, &vec![2u8; size as usize]).unwrap();

    device.advance_to(1);
    let contents = device.texture_contents(target.raw).unwrap();
    assert!(contents.iter().all(|&b| b == 1));

    let again = cache.create_buffer(&upload(size), ResourceState::GenericRead).unwrap();
    assert_eq!(again.raw, staging.raw);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn usage_is_accounted_per_class() {
    let f = fixture(64 * MIB);
    f.cache.create_texture(&texture(16), ResourceState::Common).unwrap();
    f.cache.create_buffer(&upload(512), ResourceState::GenericRead).unwrap();

    assert_eq!(f.cache.memory_usage(ResourceClass::Texture), 16 * 16 * 4);
    assert_eq!(f.cache.memory_usage(ResourceClass::UploadBuffer), 512);
    assert_eq!(f.cache.memory_usage(ResourceClass::RenderTarget), 0);
    assert_eq!(f.cache.total_memory_usage(), 16 * 16 * 4 + 512);
}

// ============================================================================
// Deferred Destruction
// ============================================================================

#[test]
fn released_resources_wait_for_their_fence() {
    let f = fixture(64 * MIB);
    let tex = f.cache.create_texture(&texture(16), ResourceState::Common).unwrap();
    assert!(f.tracker.is_tracked(tex.raw));

    f.cache.set_retire_fence(5);
    assert!(f.cache.release(tex.raw));
    assert_eq!(f.cache.total_memory_usage(), 0);
    assert_eq!(f.cache.pending_destruction(), 1);

    assert_eq!(f.cache.collect_garbage(4), 0);
    assert!(f.device.resource_exists(tex.raw));

    assert_eq!(f.cache.collect_garbage(5), 1);
    assert!(!f.device.resource_exists(tex.raw));
    assert!(!f.tracker.is_tracked(tex.raw));
    assert_eq!(f.cache.pending_destruction(), 0);
}

#[test]
fn releasing_an_unknown_resource_is_a_no_op() {
    let f = fixture(64 * MIB);
    let tex = f.cache.create_texture(&texture(16), ResourceState::Common).unwrap();
    assert!(f.cache.release(tex.raw));
    assert!(!f.cache.release(tex.raw));
    assert_eq!(f.cache.pending_destruction(), 1);
}

#[test]
fn dropping_the_cache_destroys_everything() {
    let f = fixture(64 * MIB);
    let baseline = f.device.live_resource_count();
    for _ in 0..3 {
        f.cache.create_texture(&texture(16), ResourceState::Common).unwrap();
    }
    let released = f.cache.create_texture(&texture(16), ResourceState::Common).unwrap();
    f.cache.set_retire_fence(100);
    f.cache.release(released.raw);
    assert_eq!(f.device.live_resource_count(), baseline + 4);

    let device = f.device.clone();
    drop(f);
    assert_eq!(device.live_resource_count(), baseline);
}
