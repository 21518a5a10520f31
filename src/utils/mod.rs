//! Small frame-loop helpers.
//!
//! - [`FpsCounter`]: presented-frame rate
//! - [`FramePacer`]: target-rate pacing when vsync is off

pub mod fps_counter;
pub mod pacer;

pub use fps_counter::FpsCounter;
pub use pacer::FramePacer;
