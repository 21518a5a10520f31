//! Pipeline state management.
//!
//! - [`PipelineCache`]: compiled pipelines keyed by [`PipelineStateKey`]
//! - `tables`: blend / raster / depth lookup tables
//! - `shader_manager`: WGSL templates and compiled bytecode cache

pub mod cache;
pub mod pipeline_key;
pub mod shader_manager;
pub mod tables;

pub use cache::{PipelineCache, PipelineState};
pub use pipeline_key::{BlendMode, DepthMode, PipelineStateKey, RasterMode};
