//! Settings Tests
//!
//! Tests for:
//! - Loading partial JSON configuration over defaults
//! - Clamping out-of-range values
//! - Activity adaptation table

use std::time::Duration;

use glaze::settings::{
    BackBufferFormat, MIN_SHADER_RESOURCE_DESCRIPTORS, adaptation_for, clamp_render_scale,
};
use glaze::{ActivityState, OverlaySettings, ResourceUsageLevel};

// ============================================================================
// Loading
// ============================================================================

#[test]
fn partial_json_falls_back_to_defaults() -> anyhow::Result<()> {
    let settings: OverlaySettings = serde_json::from_str(
        r#"{
            "vsync": false,
            "target_frame_rate": 144,
            "back_buffer_format": "Bgra8Unorm"
        }"#,
    )?;

    assert!(!settings.vsync);
    assert_eq!(settings.target_frame_rate, 144);
    assert_eq!(settings.back_buffer_format, BackBufferFormat::Bgra8Unorm);
    assert_eq!(settings.render_scale, 1.0);
    assert_eq!(settings.frame_count, 3);
    assert_eq!(settings.cache_budget_bytes, 256 * 1024 * 1024);
    Ok(())
}

#[test]
fn settings_survive_serialization() -> anyhow::Result<()> {
    let settings = OverlaySettings {
        render_scale: 0.5,
        fence_timeout: Duration::from_millis(250),
        ..OverlaySettings::default()
    };
    let json = serde_json::to_string(&settings)?;
    let restored: OverlaySettings = serde_json::from_str(&json)?;
    assert_eq!(restored, settings);
    Ok(())
}

// ============================================================================
// Sanitizing
// ============================================================================

#[test]
fn sanitize_clamps_every_field() {
    let mut raw = OverlaySettings {
        render_scale: 4.0,
        target_frame_rate: 0,
        cache_budget_bytes: 16,
        frame_count: 9,
        fence_timeout: Duration::ZERO,
        unused_resource_max_age: Duration::ZERO,
        ..OverlaySettings::default()
    };
    raw.descriptor_capacities.render_target = 1;
    raw.descriptor_capacities.shader_resource = 4;
    raw.descriptor_capacities.sampler = 0;

    let s = raw.sanitized();
    assert_eq!(s.render_scale, 1.0);
    assert_eq!(s.target_frame_rate, 1);
    assert_eq!(s.cache_budget_bytes, 1024 * 1024);
    assert_eq!(s.frame_count, 3);
    assert!(s.fence_timeout > Duration::ZERO);
    assert_eq!(s.unused_resource_max_age, Duration::from_secs(1));
    assert_eq!(s.descriptor_capacities.render_target, 3);
    assert_eq!(
        s.descriptor_capacities.shader_resource,
        MIN_SHADER_RESOURCE_DESCRIPTORS
    );
    assert_eq!(s.descriptor_capacities.sampler, 1);
}

#[test]
fn sanitize_keeps_valid_settings() {
    let settings = OverlaySettings::default();
    assert_eq!(settings.sanitized(), settings);
}

#[test]
fn render_scale_clamp_bounds() {
    assert_eq!(clamp_render_scale(0.0), 0.1);
    assert_eq!(clamp_render_scale(-1.0), 0.1);
    assert_eq!(clamp_render_scale(0.6), 0.6);
    assert_eq!(clamp_render_scale(1.5), 1.0);
    assert_eq!(clamp_render_scale(f32::NAN), 1.0);
}

// ============================================================================
// Adaptation
// ============================================================================

#[test]
fn adaptation_table() {
    let age = Duration::from_secs(10);

    let a = adaptation_for(ActivityState::Active, ResourceUsageLevel::Balanced, age);
    assert_eq!((a.render_scale, a.vsync), (1.0, true));
    assert_eq!(a.release_unused_older_than, None);

    let a = adaptation_for(ActivityState::Inactive, ResourceUsageLevel::Balanced, age);
    assert_eq!(a.render_scale, 0.75);

    let a = adaptation_for(ActivityState::Background, ResourceUsageLevel::Balanced, age);
    assert_eq!(a.render_scale, 0.5);
    assert_eq!(a.release_unused_older_than, Some(age));

    let a = adaptation_for(ActivityState::LowPower, ResourceUsageLevel::Minimum, age);
    assert_eq!(a.render_scale, 0.25);
    assert!(a.vsync);

    let a = adaptation_for(ActivityState::Active, ResourceUsageLevel::Maximum, age);
    assert!(!a.vsync);

    // High usage only lifts the cap while the overlay is in front.
    let a = adaptation_for(ActivityState::Background, ResourceUsageLevel::High, age);
    assert_eq!(a.render_scale, 0.5);
    assert!(a.vsync);
}
