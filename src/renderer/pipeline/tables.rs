//! Fixed-function lookup tables.
//!
//! Each table is an array sized by its mode enum's `COUNT` and indexed by
//! `mode.index()`. Adding a variant without a row is a compile error.

use crate::hal::{DepthStencilDesc, RasterDesc};

use super::pipeline_key::{BlendMode, DepthMode, RasterMode};

const ALPHA: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

const SUBTRACTIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::ReverseSubtract,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

pub static BLEND_TABLE: [Option<wgpu::BlendState>; BlendMode::COUNT] =
    [None, Some(ALPHA), Some(ADDITIVE), Some(SUBTRACTIVE)];

pub static RASTER_TABLE: [RasterDesc; RasterMode::COUNT] = [
    // Solid
    RasterDesc {
        polygon_mode: wgpu::PolygonMode::Fill,
        cull_mode: Some(wgpu::Face::Back),
        front_face: wgpu::FrontFace::Cw,
        depth_clip: true,
    },
    // Wireframe
    RasterDesc {
        polygon_mode: wgpu::PolygonMode::Line,
        cull_mode: None,
        front_face: wgpu::FrontFace::Cw,
        depth_clip: true,
    },
];

pub static DEPTH_TABLE: [DepthStencilDesc; DepthMode::COUNT] = [
    // NoDepth
    DepthStencilDesc {
        depth_test: false,
        depth_write: false,
        compare: wgpu::CompareFunction::LessEqual,
    },
    // ReadOnly
    DepthStencilDesc {
        depth_test: true,
        depth_write: false,
        compare: wgpu::CompareFunction::LessEqual,
    },
    // ReadWrite
    DepthStencilDesc {
        depth_test: true,
        depth_write: true,
        compare: wgpu::CompareFunction::LessEqual,
    },
];

#[inline]
#[must_use]
pub fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    BLEND_TABLE[mode.index()]
}

#[inline]
#[must_use]
pub fn raster_desc(mode: RasterMode) -> RasterDesc {
    RASTER_TABLE[mode.index()]
}

#[inline]
#[must_use]
pub fn depth_stencil_desc(mode: DepthMode) -> DepthStencilDesc {
    DEPTH_TABLE[mode.index()]
}
