//! Frame pacing for the submission thread.
//!
//! With vsync on, `present` already paces the loop. With vsync off the
//! pacer keeps the loop near the target rate instead of spinning.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::time::{Clock, SystemClock};

pub struct FramePacer {
    clock: Arc<dyn Clock>,
    /// `None` means unlimited.
    interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl FramePacer {
    /// `target_fps == 0` disables pacing.
    #[must_use]
    pub fn new(target_fps: u32) -> Self {
        Self::with_clock(Arc::new(SystemClock), target_fps)
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>, target_fps: u32) -> Self {
        Self {
            clock,
            interval: interval_for(target_fps),
            last_frame: None,
        }
    }

    pub fn set_target_frame_rate(&mut self, target_fps: u32) {
        self.interval = interval_for(target_fps);
    }

    #[must_use]
    pub fn target_interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Time left before the next frame should start.
    #[must_use]
    pub fn delay_until_next(&self) -> Duration {
        match (self.interval, self.last_frame) {
            (Some(interval), Some(last)) => {
                let elapsed = self.clock.now().saturating_duration_since(last);
                interval.saturating_sub(elapsed)
            }
            _ => Duration::ZERO,
        }
    }

    /// Records the start of a frame.
    pub fn mark_frame(&mut self) {
        self.last_frame = Some(self.clock.now());
    }

    /// Sleeps out the remaining interval, then marks the frame.
    pub fn throttle(&mut self) {
        let delay = self.delay_until_next();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.mark_frame();
    }
}

fn interval_for(target_fps: u32) -> Option<Duration> {
    (target_fps > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(target_fps)))
}
