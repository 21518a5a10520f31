use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::time::{Clock, SystemClock};

/// Presented-frame rate, averaged over one-second windows.
pub struct FpsCounter {
    clock: Arc<dyn Clock>,
    last_update: Instant,
    frame_count: u32,
    accumulated_time: Duration,
    pub current_fps: f32,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            last_update: clock.now(),
            clock,
            frame_count: 0,
            accumulated_time: Duration::ZERO,
            current_fps: 0.0,
        }
    }

    /// Counts one frame. Returns the new rate when a window closes.
    pub fn update(&mut self) -> Option<f32> {
        self.frame_count += 1;
        let now = self.clock.now();
        self.accumulated_time += now.saturating_duration_since(self.last_update);
        self.last_update = now;

        if self.accumulated_time < Duration::from_secs(1) {
            return None;
        }
        self.current_fps = self.frame_count as f32 / self.accumulated_time.as_secs_f32();
        self.accumulated_time = Duration::ZERO;
        self.frame_count = 0;
        Some(self.current_fps)
    }
}
