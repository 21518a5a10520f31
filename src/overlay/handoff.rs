//! Producer-thread pixel handoff.
//!
//! The browser paints on its own thread and hands the core a pixel buffer
//! that is only valid for the duration of the call. [`FrameSink::submit_frame`]
//! copies it into an owned buffer under a short lock. The submission thread
//! takes the newest pending frame at the start of its next frame. A frame
//! submitted before the previous one was taken replaces it.
//!
//! Buffers cycle between the two threads, so steady-state submission does
//! not allocate.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{GlazeError, Result};

/// An owned copy of one submitted frame.
#[derive(Debug)]
pub struct PendingFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffStats {
    pub submitted: u64,
    /// Frames replaced before the submission thread took them.
    pub superseded: u64,
}

#[derive(Default)]
struct HandoffSlot {
    pending: Option<PendingFrame>,
    spare: Vec<u8>,
    stats: HandoffStats,
}

#[derive(Default)]
pub struct FrameHandoff {
    slot: Mutex<HandoffSlot>,
}

impl FrameHandoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the newest pending frame, if any.
    pub fn take(&self) -> Option<PendingFrame> {
        self.slot.lock().pending.take()
    }

    /// Returns a consumed frame's buffer for the producer to reuse.
    pub fn recycle(&self, buffer: Vec<u8>) {
        let mut slot = self.slot.lock();
        if buffer.capacity() > slot.spare.capacity() {
            slot.spare = buffer;
        }
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }

    #[must_use]
    pub fn stats(&self) -> HandoffStats {
        self.slot.lock().stats
    }
}

/// Producer-side handle. Cheap to clone and `Send`.
#[derive(Clone)]
pub struct FrameSink {
    handoff: Arc<FrameHandoff>,
}

impl FrameSink {
    #[must_use]
    pub fn new(handoff: Arc<FrameHandoff>) -> Self {
        Self { handoff }
    }

    /// Copies a tightly packed, top-down pixel buffer for the next frame.
    ///
    /// `pixels` is not retained past the call.
    pub fn submit_frame(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Result<()> {
        if !matches!(
            format,
            wgpu::TextureFormat::Bgra8Unorm
                | wgpu::TextureFormat::Bgra8UnormSrgb
                | wgpu::TextureFormat::Rgba8Unorm
                | wgpu::TextureFormat::Rgba8UnormSrgb
        ) {
            return Err(GlazeError::InvalidPixelBuffer(format!(
                "unsupported pixel format {format:?}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(GlazeError::InvalidPixelBuffer(format!(
                "empty frame {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(GlazeError::InvalidPixelBuffer(format!(
                "{width}x{height} frame needs {expected} bytes, got {}",
                pixels.len()
            )));
        }

        let mut slot = self.handoff.slot.lock();
        let mut buffer = match slot.pending.take() {
            Some(previous) => {
                slot.stats.superseded += 1;
                previous.pixels
            }
            None => std::mem::take(&mut slot.spare),
        };
        buffer.clear();
        buffer.extend_from_slice(pixels);
        slot.stats.submitted += 1;
        let sequence = slot.stats.submitted;
        slot.pending = Some(PendingFrame {
            pixels: buffer,
            width,
            height,
            format,
            sequence,
        });
        Ok(())
    }
}
