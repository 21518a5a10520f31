//! Frame Lifecycle Tests
//!
//! Tests for:
//! - Slot reuse blocking on the slot's fence, bounded by the fence timeout
//! - Device loss propagation
//! - Present parameters: vsync and tearing
//! - Render scale applied through the viewport only
//! - Resize draining the GPU and recreating back buffers
//! - Shutdown releasing per-slot and pooled command allocators
//! - Activity adaptation

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glaze::hal::{
    DescriptorCategory, GpuDevice, HeapKind, PresentParams, ResourceState, TextureDesc, Timeline,
};
use glaze::renderer::frame::SlotState;
use glaze::{
    ActivityState, GlazeError, HeadlessDevice, HeadlessOptions, ManualClock, OverlaySettings,
    Renderer, ResourceUsageLevel,
};

fn immediate(
    settings: OverlaySettings,
    width: u32,
    height: u32,
) -> (Arc<HeadlessDevice>, Renderer) {
    let device = Arc::new(HeadlessDevice::default());
    let renderer = Renderer::new(device.clone(), settings, width, height).unwrap();
    (device, renderer)
}

fn manual(settings: OverlaySettings) -> (Arc<HeadlessDevice>, Renderer) {
    let device = Arc::new(HeadlessDevice::manual());
    let renderer = Renderer::new(device.clone(), settings, 64, 64).unwrap();
    (device, renderer)
}

// ============================================================================
// Slot Synchronization
// ============================================================================

#[test]
fn begin_frame_blocks_until_the_slot_fence_completes() {
    let (device, mut renderer) = manual(OverlaySettings::default());
    for _ in 0..3 {
        renderer.render_frame().unwrap();
    }
    assert_eq!(device.completed_fence_value(), 0);
    assert_eq!(renderer.frames().current_slot(), 0);
    assert_eq!(renderer.frames().slot_fence(0), 1);

    let advancer = {
        let device = device.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            device.advance_to(1);
        })
    };

    let start = Instant::now();
    renderer.begin_frame().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(80));
    assert!(device.completed_fence_value() >= 1);
    advancer.join().unwrap();

    renderer.end_frame().unwrap();
    device.set_timeline(Timeline::Immediate);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn stalled_gpu_times_out_and_recovers() {
    let settings = OverlaySettings {
        fence_timeout: Duration::from_millis(50),
        ..OverlaySettings::default()
    };
    let (device, mut renderer) = manual(settings);
    for _ in 0..3 {
        renderer.render_frame().unwrap();
    }

    let err = renderer.begin_frame().unwrap_err();
    assert!(matches!(err, GlazeError::FenceTimeout { value: 1, .. }));
    assert!(err.is_fatal());
    assert!(!renderer.frames().is_recording());

    device.set_timeline(Timeline::Immediate);
    renderer.render_frame().unwrap();
    assert!(device.validation_errors().is_empty());
}

#[test]
fn steady_state_never_waits_with_an_immediate_gpu() {
    let (device, mut renderer) = immediate(OverlaySettings::default(), 64, 64);
    for _ in 0..30 {
        let fence = renderer.render_frame().unwrap();
        assert_eq!(device.completed_fence_value(), fence);
    }
    assert_eq!(renderer.frames().frames_presented(), 30);
    assert_eq!(device.stats().presents, 30);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn slot_records_its_fence_after_present() {
    let (_device, mut renderer) = immediate(OverlaySettings::default(), 64, 64);
    let slot = renderer.frames().current_slot();
    let fence = renderer.render_frame().unwrap();

    assert_eq!(renderer.frames().slot_state(slot), SlotState::Presented);
    assert_eq!(renderer.frames().slot_fence(slot), fence);
    assert_eq!(renderer.frames().last_signaled_fence(), fence);
    assert_ne!(renderer.frames().current_slot(), slot);
}

#[test]
fn frame_calls_out_of_order_are_rejected() {
    let (_device, mut renderer) = immediate(OverlaySettings::default(), 64, 64);
    assert!(matches!(
        renderer.end_frame(),
        Err(GlazeError::InvalidFrameState(_))
    ));

    renderer.begin_frame().unwrap();
    let err = renderer.begin_frame().unwrap_err();
    assert!(matches!(err, GlazeError::InvalidFrameState(_)));
    assert!(!err.is_fatal());
    renderer.end_frame().unwrap();
}

#[test]
fn two_buffer_swap_chain_alternates_slots() {
    let settings = OverlaySettings {
        frame_count: 2,
        ..OverlaySettings::default()
    };
    let (device, mut renderer) = immediate(settings, 64, 64);
    assert_eq!(renderer.frames().frame_count(), 2);

    let slots: Vec<usize> = (0..4)
        .map(|_| {
            let slot = renderer.frames().current_slot();
            renderer.render_frame().unwrap();
            slot
        })
        .collect();
    assert_eq!(slots, vec![0, 1, 0, 1]);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn shutdown_destroys_every_command_allocator() {
    let (device, mut renderer) = immediate(OverlaySettings::default(), 64, 64);
    renderer
        .frame_sink()
        .submit_frame(&[0x40u8; 8 * 8 * 4], 8, 8, wgpu::TextureFormat::Bgra8Unorm)
        .unwrap();
    for _ in 0..4 {
        renderer.render_frame().unwrap();
    }
    renderer.read_back_overlay().unwrap();
    assert!(device.stats().allocators_created >= 6);

    drop(renderer);
    let stats = device.stats();
    assert_eq!(stats.allocators_destroyed, stats.allocators_created);
    assert!(device.validation_errors().is_empty());
}

// ============================================================================
// Device Loss
// ============================================================================

#[test]
fn device_loss_surfaces_as_fatal_error() {
    let (device, mut renderer) = immediate(OverlaySettings::default(), 64, 64);
    renderer.render_frame().unwrap();

    device.lose_device("driver reset");
    let err = renderer.render_frame().unwrap_err();
    assert!(matches!(err, GlazeError::DeviceLost(_)));
    assert!(err.is_fatal());
}

#[test]
fn device_loss_wakes_a_blocked_wait() {
    let (device, mut renderer) = manual(OverlaySettings::default());
    for _ in 0..3 {
        renderer.render_frame().unwrap();
    }

    let loser = {
        let device = device.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            device.lose_device("hung");
        })
    };
    let err = renderer.begin_frame().unwrap_err();
    assert!(matches!(err, GlazeError::DeviceLost(_)));
    loser.join().unwrap();
}

// ============================================================================
// Presentation
// ============================================================================

#[test]
fn vsync_presents_with_interval_one() {
    let (device, mut renderer) = immediate(OverlaySettings::default(), 64, 64);
    renderer.render_frame().unwrap();
    assert_eq!(
        device.last_present(),
        Some(PresentParams {
            sync_interval: 1,
            allow_tearing: false,
        })
    );
}

#[test]
fn tearing_requires_vsync_off_and_device_support() {
    let no_vsync = OverlaySettings {
        vsync: false,
        ..OverlaySettings::default()
    };

    let (device, mut renderer) = immediate(no_vsync.clone(), 64, 64);
    assert!(renderer.frames().tearing_active());
    renderer.render_frame().unwrap();
    assert_eq!(
        device.last_present(),
        Some(PresentParams {
            sync_interval: 0,
            allow_tearing: true,
        })
    );
    assert_eq!(device.stats().tearing_presents, 1);

    let device = Arc::new(HeadlessDevice::new(HeadlessOptions {
        supports_tearing: false,
        ..HeadlessOptions::default()
    }));
    let mut renderer = Renderer::new(device.clone(), no_vsync, 64, 64).unwrap();
    assert!(!renderer.frames().tearing_active());
    renderer.render_frame().unwrap();
    assert_eq!(
        device.last_present(),
        Some(PresentParams {
            sync_interval: 0,
            allow_tearing: false,
        })
    );
}

// ============================================================================
// Render Scale
// ============================================================================

#[test]
fn render_scale_shrinks_viewport_not_back_buffers() {
    let (device, mut renderer) = immediate(OverlaySettings::default(), 640, 360);
    assert_eq!(renderer.set_render_scale(0.5), 0.5);
    renderer.render_frame().unwrap();

    let viewport = device.last_viewport().unwrap();
    assert_eq!((viewport.width, viewport.height), (320.0, 180.0));
    assert_eq!(renderer.frames().size(), (640, 360));
    let scissor = renderer.frames().scissor();
    assert_eq!((scissor.right, scissor.bottom), (320, 180));
}

#[test]
fn render_scale_is_clamped() {
    let (_device, mut renderer) = immediate(OverlaySettings::default(), 5, 5);
    assert_eq!(renderer.set_render_scale(3.0), 1.0);
    assert_eq!(renderer.set_render_scale(0.0), 0.1);
    assert_eq!(renderer.frames().scaled_extent(), (1, 1));
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn resize_recreates_back_buffers() {
    let (device, mut renderer) = immediate(OverlaySettings::default(), 640, 360);
    renderer.render_frame().unwrap();
    let old = device.back_buffers();

    assert!(renderer.resize(800, 600).unwrap());
    let new = device.back_buffers();
    assert_eq!(new.len(), 3);
    assert!(new.iter().all(|b| !old.contains(b)));
    assert!(old.iter().all(|b| !renderer.tracker().is_tracked(*b)));
    assert_eq!(renderer.frames().size(), (800, 600));
    assert_eq!(
        renderer.descriptors().allocated_count(DescriptorCategory::RenderTarget),
        3
    );

    renderer.render_frame().unwrap();
    assert_eq!(device.last_viewport().unwrap().width, 800.0);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn zero_or_unchanged_size_is_ignored() {
    let (device, mut renderer) = immediate(OverlaySettings::default(), 640, 360);
    let buffers = device.back_buffers();

    assert!(!renderer.resize(0, 0).unwrap());
    assert!(!renderer.resize(640, 0).unwrap());
    assert!(!renderer.resize(640, 360).unwrap());
    assert_eq!(device.back_buffers(), buffers);
}

#[test]
fn resize_while_recording_is_rejected() {
    let (_device, mut renderer) = immediate(OverlaySettings::default(), 640, 360);
    renderer.begin_frame().unwrap();
    let err = renderer.resize(800, 600).unwrap_err();
    assert!(matches!(err, GlazeError::InvalidFrameState(_)));
    renderer.end_frame().unwrap();
    assert!(renderer.resize(800, 600).unwrap());
}

// ============================================================================
// Activity Adaptation
// ============================================================================

#[test]
fn background_low_usage_reduces_scale() {
    let (_device, mut renderer) = immediate(OverlaySettings::default(), 640, 360);
    let adaptation =
        renderer.adapt_to_activity(ActivityState::Background, ResourceUsageLevel::Low);

    assert!((adaptation.render_scale - 0.375).abs() < 1e-6);
    assert!((renderer.frames().render_scale() - 0.375).abs() < 1e-6);
    assert!(renderer.frames().vsync());
}

#[test]
fn active_high_usage_presents_without_vsync() {
    let (device, mut renderer) = immediate(OverlaySettings::default(), 640, 360);
    renderer.adapt_to_activity(ActivityState::Active, ResourceUsageLevel::High);
    renderer.render_frame().unwrap();

    assert_eq!(renderer.frames().render_scale(), 1.0);
    assert_eq!(device.last_present().unwrap().sync_interval, 0);
}

#[test]
fn low_activity_releases_idle_resources_but_not_pinned_ones() {
    let device = Arc::new(HeadlessDevice::default());
    let clock = Arc::new(ManualClock::new());
    let mut renderer =
        Renderer::with_clock(device.clone(), OverlaySettings::default(), clock.clone(), 64, 64)
            .unwrap();

    let pixels = vec![0x80u8; 16 * 16 * 4];
    renderer
        .frame_sink()
        .submit_frame(&pixels, 16, 16, wgpu::TextureFormat::Bgra8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();
    let pinned = renderer.cache().len();
    assert!(pinned >= 2);

    let scratch = renderer
        .cache()
        .create_texture(
            &TextureDesc {
                label: "Scratch",
                width: 32,
                height: 32,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                heap: HeapKind::DeviceLocal,
            },
            ResourceState::PixelShaderResource,
        )
        .unwrap();

    clock.advance(Duration::from_secs(30));
    renderer.adapt_to_activity(ActivityState::LowPower, ResourceUsageLevel::Balanced);

    assert!(!renderer.cache().contains(scratch.raw));
    assert_eq!(renderer.cache().len(), pinned);
    assert!(renderer.sampleable_handle().is_valid());

    renderer.wait_for_gpu().unwrap();
    assert!(!device.resource_exists(scratch.raw));
}
