#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! GPU resource and frame-lifecycle core for a web-rendered overlay.
//!
//! A browser engine paints the UI into CPU pixel buffers on its own thread.
//! This crate uploads them into a sampleable texture, manages the swap chain
//! and per-frame synchronization, and keeps GPU memory under a budget.
//!
//! - [`hal`]: the device seam and a headless software device
//! - [`renderer`]: descriptors, state tracking, resource cache, pipelines,
//!   frame orchestration, and the [`Renderer`] facade
//! - [`overlay`]: producer-thread frame handoff and the overlay texture
//! - [`settings`]: runtime configuration and activity adaptation

pub mod errors;
pub mod hal;
pub mod overlay;
pub mod renderer;
pub mod settings;
pub mod time;
pub mod utils;

pub use errors::{GlazeError, Result};
pub use hal::{GpuDescriptorHandle, GpuDevice, HeadlessDevice, HeadlessOptions, Timeline};
pub use overlay::FrameSink;
pub use renderer::{PipelineStateKey, Renderer};
pub use settings::{ActivityState, OverlaySettings, RenderAdaptation, ResourceUsageLevel};
pub use time::{Clock, ManualClock, SystemClock};
