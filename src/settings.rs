//! Overlay Settings & Activity Adaptation
//!
//! [`OverlaySettings`] is consumed once when the renderer is created. A few
//! fields (render scale, vsync, target frame rate, cache ceiling) can be
//! changed at runtime through the renderer, either directly or by reporting
//! an [`ActivityState`] / [`ResourceUsageLevel`] pair to
//! [`Renderer::adapt_to_activity`](crate::Renderer::adapt_to_activity).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use glaze::settings::OverlaySettings;
//!
//! let settings = OverlaySettings {
//!     vsync: false,
//!     target_frame_rate: 144,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hal::DescriptorCategory;

/// Lower bound applied to the render scale.
pub const MIN_RENDER_SCALE: f32 = 0.1;
/// Upper bound applied to the render scale.
pub const MAX_RENDER_SCALE: f32 = 1.0;

/// Swap chain buffer count bounds.
pub const MIN_FRAME_COUNT: u32 = 2;
pub const MAX_FRAME_COUNT: u32 = 3;

/// The shader-visible resource heap is never smaller than this.
pub const MIN_SHADER_RESOURCE_DESCRIPTORS: u32 = 1024;

const MIN_CACHE_BUDGET: u64 = 1024 * 1024;
const MIN_FENCE_TIMEOUT: Duration = Duration::from_millis(1);
const MIN_RESOURCE_AGE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// BackBufferFormat
// ---------------------------------------------------------------------------

/// Color format of the swap chain back buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackBufferFormat {
    #[default]
    Rgba8Unorm,
    Bgra8Unorm,
}

impl BackBufferFormat {
    #[inline]
    #[must_use]
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            Self::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            Self::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        }
    }
}

// ---------------------------------------------------------------------------
// DescriptorCapacities
// ---------------------------------------------------------------------------

/// Fixed slot counts for each descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorCapacities {
    pub render_target: u32,
    pub depth_stencil: u32,
    pub shader_resource: u32,
    pub sampler: u32,
}

impl DescriptorCapacities {
    #[inline]
    #[must_use]
    pub fn get(&self, category: DescriptorCategory) -> u32 {
        match category {
            DescriptorCategory::RenderTarget => self.render_target,
            DescriptorCategory::DepthStencil => self.depth_stencil,
            DescriptorCategory::ShaderResource => self.shader_resource,
            DescriptorCategory::Sampler => self.sampler,
        }
    }
}

impl Default for DescriptorCapacities {
    fn default() -> Self {
        Self {
            render_target: 16,
            depth_stencil: 8,
            shader_resource: MIN_SHADER_RESOURCE_DESCRIPTORS,
            sampler: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// OverlaySettings
// ---------------------------------------------------------------------------

/// Configuration for renderer creation.
///
/// # Fields
///
/// | Field                     | Description                                 | Default            |
/// |---------------------------|---------------------------------------------|--------------------|
/// | `render_scale`            | Fraction of the target drawn into           | `1.0`              |
/// | `vsync`                   | Present synchronized to vertical blank      | `true`             |
/// | `allow_tearing`           | Use tearing presents when vsync is off      | `true`             |
/// | `target_frame_rate`       | Pacing target in frames per second          | `60`               |
/// | `cache_budget_bytes`      | Resource cache memory ceiling               | 256 MiB            |
/// | `unused_resource_max_age` | Age after which idle resources are released | 60 s               |
/// | `low_activity_max_age`    | Same, while the overlay is backgrounded     | 10 s               |
/// | `frame_count`             | Swap chain buffers and in-flight frames     | `3`                |
/// | `fence_timeout`           | Upper bound on any single fence wait        | 5 s                |
/// | `descriptor_capacities`   | Slots per descriptor heap                   | 16 / 8 / 1024 / 32 |
/// | `back_buffer_format`      | Swap chain color format                     | `Rgba8Unorm`       |
/// | `clear_color`             | Back buffer clear value                     | transparent black  |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub render_scale: f32,
    pub vsync: bool,
    pub allow_tearing: bool,
    pub target_frame_rate: u32,
    pub cache_budget_bytes: u64,
    pub unused_resource_max_age: Duration,
    pub low_activity_max_age: Duration,
    pub frame_count: u32,
    pub fence_timeout: Duration,
    pub descriptor_capacities: DescriptorCapacities,
    pub back_buffer_format: BackBufferFormat,
    pub clear_color: [f32; 4],
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            render_scale: 1.0,
            vsync: true,
            allow_tearing: true,
            target_frame_rate: 60,
            cache_budget_bytes: 256 * 1024 * 1024,
            unused_resource_max_age: Duration::from_secs(60),
            low_activity_max_age: Duration::from_secs(10),
            frame_count: 3,
            fence_timeout: Duration::from_secs(5),
            descriptor_capacities: DescriptorCapacities::default(),
            back_buffer_format: BackBufferFormat::Rgba8Unorm,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

impl OverlaySettings {
    /// Returns a copy with every field clamped into its valid range.
    ///
    /// Each adjustment is logged at `warn` level.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut s = self.clone();

        let scale = clamp_render_scale(s.render_scale);
        if (scale - s.render_scale).abs() > f32::EPSILON || s.render_scale.is_nan() {
            log::warn!("render_scale {} clamped to {}", s.render_scale, scale);
            s.render_scale = scale;
        }

        let rate = s.target_frame_rate.clamp(1, 240);
        if rate != s.target_frame_rate {
            log::warn!("target_frame_rate {} clamped to {}", s.target_frame_rate, rate);
            s.target_frame_rate = rate;
        }

        if s.cache_budget_bytes < MIN_CACHE_BUDGET {
            log::warn!(
                "cache_budget_bytes {} raised to {}",
                s.cache_budget_bytes,
                MIN_CACHE_BUDGET
            );
            s.cache_budget_bytes = MIN_CACHE_BUDGET;
        }

        let frames = s.frame_count.clamp(MIN_FRAME_COUNT, MAX_FRAME_COUNT);
        if frames != s.frame_count {
            log::warn!("frame_count {} clamped to {}", s.frame_count, frames);
            s.frame_count = frames;
        }

        if s.fence_timeout < MIN_FENCE_TIMEOUT {
            log::warn!("fence_timeout {:?} raised to {MIN_FENCE_TIMEOUT:?}", s.fence_timeout);
            s.fence_timeout = MIN_FENCE_TIMEOUT;
        }

        for (name, age) in [
            ("unused_resource_max_age", &mut s.unused_resource_max_age),
            ("low_activity_max_age", &mut s.low_activity_max_age),
        ] {
            if *age < MIN_RESOURCE_AGE {
                log::warn!("{name} {age:?} raised to {MIN_RESOURCE_AGE:?}");
                *age = MIN_RESOURCE_AGE;
            }
        }

        let caps = &mut s.descriptor_capacities;
        if caps.shader_resource < MIN_SHADER_RESOURCE_DESCRIPTORS {
            log::warn!(
                "shader_resource descriptor capacity {} raised to {}",
                caps.shader_resource,
                MIN_SHADER_RESOURCE_DESCRIPTORS
            );
            caps.shader_resource = MIN_SHADER_RESOURCE_DESCRIPTORS;
        }
        // Every swap chain buffer needs a render target view.
        if caps.render_target < s.frame_count {
            log::warn!(
                "render_target descriptor capacity {} raised to {}",
                caps.render_target,
                s.frame_count
            );
            caps.render_target = s.frame_count;
        }
        for (name, capacity) in [
            ("depth_stencil", &mut caps.depth_stencil),
            ("sampler", &mut caps.sampler),
        ] {
            if *capacity == 0 {
                log::warn!("{name} descriptor capacity raised to 1");
                *capacity = 1;
            }
        }

        s
    }
}

/// Clamps a requested render scale into `[MIN_RENDER_SCALE, MAX_RENDER_SCALE]`.
///
/// NaN maps to full scale.
#[inline]
#[must_use]
pub fn clamp_render_scale(scale: f32) -> f32 {
    if scale.is_nan() {
        return MAX_RENDER_SCALE;
    }
    scale.clamp(MIN_RENDER_SCALE, MAX_RENDER_SCALE)
}

// ---------------------------------------------------------------------------
// Activity adaptation
// ---------------------------------------------------------------------------

/// How visible / interactive the overlay currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityState {
    Active,
    Inactive,
    Background,
    LowPower,
}

/// How much GPU time the host allows the overlay to spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceUsageLevel {
    Minimum,
    Low,
    Balanced,
    High,
    Maximum,
}

/// Runtime parameters derived from an activity report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderAdaptation {
    pub render_scale: f32,
    pub vsync: bool,
    /// When set, idle cache entries older than this are released.
    pub release_unused_older_than: Option<Duration>,
}

/// Maps an activity report onto render parameters.
///
/// | State        | Base scale | Release idle resources |
/// |--------------|------------|------------------------|
/// | `Active`     | 1.0        | no                     |
/// | `Inactive`   | 0.75       | no                     |
/// | `Background` | 0.5        | yes                    |
/// | `LowPower`   | 0.25       | yes                    |
///
/// The usage level then adjusts the base: `Minimum` forces 0.25, `Low`
/// multiplies by 0.75, and `High`/`Maximum` while `Active` restore full
/// scale with vsync off. Vsync is on in every other combination.
#[must_use]
pub fn adaptation_for(
    state: ActivityState,
    level: ResourceUsageLevel,
    low_activity_max_age: Duration,
) -> RenderAdaptation {
    let (mut render_scale, release_unused_older_than) = match state {
        ActivityState::Active => (1.0, None),
        ActivityState::Inactive => (0.75, None),
        ActivityState::Background => (0.5, Some(low_activity_max_age)),
        ActivityState::LowPower => (0.25, Some(low_activity_max_age)),
    };
    let mut vsync = true;

    match level {
        ResourceUsageLevel::Minimum => render_scale = 0.25,
        ResourceUsageLevel::Low => render_scale *= 0.75,
        ResourceUsageLevel::Balanced => {}
        ResourceUsageLevel::High | ResourceUsageLevel::Maximum => {
            if state == ActivityState::Active {
                render_scale = 1.0;
                vsync = false;
            }
        }
    }

    RenderAdaptation {
        render_scale: clamp_render_scale(render_scale),
        vsync,
        release_unused_older_than,
    }
}
