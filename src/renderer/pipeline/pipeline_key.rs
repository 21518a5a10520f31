//! Pipeline state keys.
//!
//! A [`PipelineStateKey`] names one compiled pipeline. It is a plain `Copy`
//! value with structural equality and hashing, so it can index the cache
//! directly.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::hal::{RootLayout, ShaderProfile};

// ─── Mode Enums ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    /// Opaque, untextured.
    NoBlend,
    /// Premultiplied-style alpha over.
    #[default]
    AlphaBlend,
    AddBlend,
    SubtractBlend,
}

impl BlendMode {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [
        Self::NoBlend,
        Self::AlphaBlend,
        Self::AddBlend,
        Self::SubtractBlend,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Every blending mode samples the overlay texture; `NoBlend` draws a
    /// flat color.
    #[inline]
    #[must_use]
    pub const fn is_textured(self) -> bool {
        !matches!(self, Self::NoBlend)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RasterMode {
    #[default]
    Solid,
    Wireframe,
}

impl RasterMode {
    pub const COUNT: usize = 2;
    pub const ALL: [Self; Self::COUNT] = [Self::Solid, Self::Wireframe];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DepthMode {
    #[default]
    NoDepth,
    ReadOnly,
    ReadWrite,
}

impl DepthMode {
    pub const COUNT: usize = 3;
    pub const ALL: [Self; Self::COUNT] = [Self::NoDepth, Self::ReadOnly, Self::ReadWrite];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

// ─── Key ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineStateKey {
    pub blend: BlendMode,
    pub raster: RasterMode,
    pub depth: DepthMode,
    pub color_format: wgpu::TextureFormat,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub profile: ShaderProfile,
}

impl Default for PipelineStateKey {
    fn default() -> Self {
        Self {
            blend: BlendMode::AlphaBlend,
            raster: RasterMode::Solid,
            depth: DepthMode::NoDepth,
            color_format: wgpu::TextureFormat::Rgba8Unorm,
            depth_format: None,
            profile: ShaderProfile::Model5_1,
        }
    }
}

impl PipelineStateKey {
    /// Default overlay key drawing into `color_format`.
    #[must_use]
    pub fn overlay(color_format: wgpu::TextureFormat) -> Self {
        Self {
            color_format,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn root_layout(&self) -> RootLayout {
        if self.blend.is_textured() {
            RootLayout::TextureSampler
        } else {
            RootLayout::Empty
        }
    }
}

/// Short stable id for log lines.
#[inline]
#[must_use]
pub fn fx_hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}
