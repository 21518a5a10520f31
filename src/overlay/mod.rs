//! Overlay content: the producer-side frame handoff and the GPU surface the
//! UI samples from.

pub mod handoff;
pub mod surface;

pub use handoff::{FrameHandoff, FrameSink, HandoffStats, PendingFrame};
pub use surface::{OverlaySurface, SurfaceContext};
