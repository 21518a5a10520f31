//! Overlay Surface Tests
//!
//! Tests for:
//! - Pixel upload and readback through the row-pitched copy path
//! - Sampleable handle validity across first frame and resize
//! - Frame submission validation
//! - Newest-frame-wins handoff between threads
//! - Texture recreation when frame dimensions change

use std::sync::Arc;
use std::thread;

use glaze::hal::DescriptorCategory;
use glaze::renderer::pipeline::{BlendMode, PipelineStateKey};
use glaze::{GlazeError, GpuDescriptorHandle, HeadlessDevice, OverlaySettings, Renderer};
use wgpu::TextureFormat;

fn setup(width: u32, height: u32) -> (Arc<HeadlessDevice>, Renderer) {
    let device = Arc::new(HeadlessDevice::default());
    let renderer =
        Renderer::new(device.clone(), OverlaySettings::default(), width, height).unwrap();
    (device, renderer)
}

/// Deterministic BGRA pattern; every pixel differs from its neighbors.
fn pattern(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[
                (x as u8).wrapping_add(seed),
                (y as u8).wrapping_mul(3),
                ((x ^ y) as u8).wrapping_add(seed),
                0xFF,
            ]);
        }
    }
    pixels
}

// ============================================================================
// Upload Path
// ============================================================================

#[test]
fn uploaded_pixels_read_back_unchanged() {
    let (device, mut renderer) = setup(512, 512);
    let pixels = pattern(512, 512, 7);

    renderer
        .frame_sink()
        .submit_frame(&pixels, 512, 512, TextureFormat::Bgra8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();

    let texture = renderer.overlay().texture().unwrap();
    assert_eq!(device.texture_contents(texture.raw).unwrap(), pixels);
    assert_eq!(renderer.read_back_overlay().unwrap(), pixels);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn unaligned_row_width_survives_pitching() {
    // 300 * 4 = 1200 bytes per row, padded to 1280 in the upload buffer.
    let (device, mut renderer) = setup(640, 480);
    let pixels = pattern(300, 17, 99);

    renderer
        .frame_sink()
        .submit_frame(&pixels, 300, 17, TextureFormat::Rgba8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();

    assert_eq!(renderer.read_back_overlay().unwrap(), pixels);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn readback_is_rejected_mid_frame() {
    let (_device, mut renderer) = setup(64, 64);
    renderer
        .frame_sink()
        .submit_frame(&pattern(8, 8, 0), 8, 8, TextureFormat::Bgra8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();

    renderer.begin_frame().unwrap();
    assert!(matches!(
        renderer.read_back_overlay(),
        Err(GlazeError::InvalidFrameState(_))
    ));
    renderer.end_frame().unwrap();
}

#[test]
fn readback_without_content_fails() {
    let (_device, mut renderer) = setup(64, 64);
    assert!(matches!(
        renderer.read_back_overlay(),
        Err(GlazeError::InvalidResource(_))
    ));
}

#[test]
fn readback_buffer_is_reused() {
    let (device, mut renderer) = setup(64, 64);
    renderer
        .frame_sink()
        .submit_frame(&pattern(32, 32, 1), 32, 32, TextureFormat::Bgra8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();

    renderer.read_back_overlay().unwrap();
    let created = device.stats().resources_created;
    renderer.read_back_overlay().unwrap();
    assert_eq!(device.stats().resources_created, created);
}

// ============================================================================
// Sampleable Handle
// ============================================================================

#[test]
fn handle_is_invalid_until_first_upload() {
    let (_device, mut renderer) = setup(64, 64);
    assert_eq!(renderer.sampleable_handle(), GpuDescriptorHandle::INVALID);

    renderer.render_frame().unwrap();
    assert!(!renderer.sampleable_handle().is_valid());

    renderer
        .frame_sink()
        .submit_frame(&pattern(16, 16, 0), 16, 16, TextureFormat::Bgra8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();
    assert!(renderer.sampleable_handle().is_valid());
}

#[test]
fn resize_invalidates_handle_until_next_frame() {
    let (device, mut renderer) = setup(64, 64);
    let sink = renderer.frame_sink();
    sink.submit_frame(&pattern(64, 64, 0), 64, 64, TextureFormat::Bgra8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();
    assert!(renderer.sampleable_handle().is_valid());

    assert!(renderer.resize(128, 96).unwrap());
    assert!(!renderer.sampleable_handle().is_valid());
    assert!(renderer.overlay().texture().is_none());

    renderer.render_frame().unwrap();
    assert!(!renderer.sampleable_handle().is_valid());

    let pixels = pattern(128, 96, 5);
    sink.submit_frame(&pixels, 128, 96, TextureFormat::Bgra8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();
    assert!(renderer.sampleable_handle().is_valid());
    assert_eq!(renderer.read_back_overlay().unwrap(), pixels);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn draws_are_recorded_only_with_content() {
    let (device, mut renderer) = setup(64, 64);
    renderer.render_frame().unwrap();
    assert_eq!(device.stats().draws, 0);

    renderer
        .frame_sink()
        .submit_frame(&pattern(16, 16, 0), 16, 16, TextureFormat::Bgra8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();
    renderer.render_frame().unwrap();
    assert_eq!(device.stats().draws, 2);
}

#[test]
fn untextured_key_draws_without_content() {
    let (device, mut renderer) = setup(64, 64);
    let solid = PipelineStateKey {
        blend: BlendMode::NoBlend,
        ..renderer.overlay_key()
    };

    let textured = renderer.overlay_key();

    renderer.begin_frame().unwrap();
    assert!(renderer.draw_overlay(&solid));
    assert!(!renderer.draw_overlay(&textured));
    renderer.end_frame().unwrap();
    assert_eq!(device.stats().draws, 1);
}

#[test]
fn draw_outside_a_frame_is_ignored() {
    let (_device, mut renderer) = setup(64, 64);
    let key = renderer.overlay_key();
    assert!(!renderer.draw_overlay(&key));
}

// ============================================================================
// Submission Validation
// ============================================================================

#[test]
fn malformed_frames_are_rejected() {
    let (_device, renderer) = setup(64, 64);
    let sink = renderer.frame_sink();

    let short = vec![0u8; 16 * 16 * 4 - 1];
    assert!(matches!(
        sink.submit_frame(&short, 16, 16, TextureFormat::Bgra8Unorm),
        Err(GlazeError::InvalidPixelBuffer(_))
    ));
    assert!(matches!(
        sink.submit_frame(&[], 0, 16, TextureFormat::Bgra8Unorm),
        Err(GlazeError::InvalidPixelBuffer(_))
    ));
    assert!(matches!(
        sink.submit_frame(&[0u8; 64], 8, 8, TextureFormat::R8Unorm),
        Err(GlazeError::InvalidPixelBuffer(_))
    ));

    let err = sink
        .submit_frame(&short, 16, 16, TextureFormat::Bgra8Unorm)
        .unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(renderer.overlay().handoff_stats().submitted, 0);
}

// ============================================================================
// Handoff
// ============================================================================

#[test]
fn newest_submitted_frame_wins() {
    let (_device, mut renderer) = setup(64, 64);
    let sink = renderer.frame_sink();
    let frames: Vec<Vec<u8>> = (0..3).map(|i| pattern(16, 16, i * 40)).collect();
    for pixels in &frames {
        sink.submit_frame(pixels, 16, 16, TextureFormat::Bgra8Unorm)
            .unwrap();
    }

    let stats = renderer.overlay().handoff_stats();
    assert_eq!((stats.submitted, stats.superseded), (3, 2));

    renderer.render_frame().unwrap();
    assert_eq!(renderer.overlay().uploaded_sequence(), 3);
    assert_eq!(renderer.read_back_overlay().unwrap(), frames[2]);
}

#[test]
fn frames_submitted_from_another_thread_are_uploaded() {
    let (device, mut renderer) = setup(64, 64);
    let sink = renderer.frame_sink();
    let last = pattern(32, 32, 200);

    let producer = {
        let last = last.clone();
        thread::spawn(move || {
            for seed in 0..10 {
                sink.submit_frame(&pattern(32, 32, seed), 32, 32, TextureFormat::Bgra8Unorm)
                    .unwrap();
            }
            sink.submit_frame(&last, 32, 32, TextureFormat::Bgra8Unorm)
                .unwrap();
        })
    };
    producer.join().unwrap();

    renderer.render_frame().unwrap();
    assert_eq!(renderer.overlay().uploaded_sequence(), 11);
    assert_eq!(renderer.read_back_overlay().unwrap(), last);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn dimension_change_recreates_texture_and_frees_old_view() {
    let (device, mut renderer) = setup(256, 256);
    let sink = renderer.frame_sink();

    sink.submit_frame(&pattern(64, 64, 0), 64, 64, TextureFormat::Bgra8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();
    let first = renderer.overlay().texture().unwrap();

    let pixels = pattern(128, 32, 3);
    sink.submit_frame(&pixels, 128, 32, TextureFormat::Bgra8Unorm)
        .unwrap();
    renderer.render_frame().unwrap();
    let second = renderer.overlay().texture().unwrap();
    assert_ne!(first.raw, second.raw);
    assert!(renderer.sampleable_handle().is_valid());

    renderer.render_frame().unwrap();
    assert_eq!(
        renderer
            .descriptors()
            .allocated_count(DescriptorCategory::ShaderResource),
        1
    );
    assert_eq!(renderer.read_back_overlay().unwrap(), pixels);
    assert!(device.validation_errors().is_empty());
}
