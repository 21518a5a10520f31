//! Frame Orchestrator
//!
//! Owns the swap chain back buffers and one [`FrameContext`] per buffer
//! slot. Each slot moves through
//! `Idle -> Recording -> Submitted -> Presented -> Idle`.
//!
//! # Slot reuse
//!
//! Every `end_frame` signals a fresh fence value and stores it in the slot
//! it just presented. When `begin_frame` lands on that slot again it blocks
//! until the GPU has passed the stored value, and only then resets the
//! slot's command allocator. In steady state with three buffers the wait is
//! already satisfied. The wait is bounded by the configured fence timeout.
//!
//! # Render scale
//!
//! Sub-native rendering only shrinks the viewport and scissor. The back
//! buffers always keep the full swap chain size.

use std::sync::Arc;
use std::time::Duration;

use crate::errors::{GlazeError, Result};
use crate::hal::{
    CommandList, CpuDescriptorHandle, DescriptorCategory, DescriptorView, FenceValue, GpuDevice,
    PresentParams, RawAllocator, RawResource, ResourceState, ScissorRect, SwapChainDesc, Viewport,
};
use crate::renderer::descriptor::{DescriptorAllocator, DescriptorSlot};
use crate::renderer::state_tracker::ResourceStateTracker;
use crate::settings::{OverlaySettings, clamp_render_scale};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
    Presented,
}

#[derive(Debug)]
pub struct FrameContext {
    allocator: RawAllocator,
    /// Last fence value signaled after this slot's work.
    fence_value: FenceValue,
    state: SlotState,
}

struct BackBuffer {
    raw: RawResource,
    rtv: DescriptorSlot,
    rtv_handle: CpuDescriptorHandle,
}

pub struct FrameOrchestrator {
    device: Arc<dyn GpuDevice>,
    back_buffers: Vec<BackBuffer>,
    frames: Vec<FrameContext>,
    current: usize,
    last_signaled: FenceValue,
    recording: Option<CommandList>,
    width: u32,
    height: u32,
    render_scale: f32,
    vsync: bool,
    /// Requested in settings and supported by the device.
    tearing_available: bool,
    fence_timeout: Duration,
    clear_color: [f32; 4],
    frames_presented: u64,
}

impl FrameOrchestrator {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        descriptors: &mut DescriptorAllocator,
        tracker: &ResourceStateTracker,
        settings: &OverlaySettings,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let tearing_available = settings.allow_tearing && device.supports_tearing();
        let desc = SwapChainDesc {
            width,
            height,
            format: settings.back_buffer_format.to_wgpu(),
            buffer_count: settings.frame_count,
            allow_tearing: tearing_available,
        };
        let buffers = device.create_swap_chain(&desc)?;

        let frames = (0..buffers.len())
            .map(|_| -> Result<FrameContext> {
                Ok(FrameContext {
                    allocator: device.create_command_allocator()?,
                    fence_value: 0,
                    state: SlotState::Idle,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut orchestrator = Self {
            current: device.current_back_buffer_index(),
            device,
            back_buffers: Vec::with_capacity(frames.len()),
            frames,
            last_signaled: 0,
            recording: None,
            width,
            height,
            render_scale: clamp_render_scale(settings.render_scale),
            vsync: settings.vsync,
            tearing_available,
            fence_timeout: settings.fence_timeout,
            clear_color: settings.clear_color,
            frames_presented: 0,
        };
        orchestrator.install_back_buffers(buffers, descriptors, tracker)?;

        log::info!(
            "Swap chain created: {width}x{height}, {} buffers, tearing {}",
            orchestrator.frames.len(),
            if tearing_available { "available" } else { "unavailable" }
        );
        Ok(orchestrator)
    }

    fn install_back_buffers(
        &mut self,
        buffers: Vec<RawResource>,
        descriptors: &mut DescriptorAllocator,
        tracker: &ResourceStateTracker,
    ) -> Result<()> {
        for raw in buffers {
            tracker.register(raw, ResourceState::Present);
            let rtv = descriptors.allocate(DescriptorCategory::RenderTarget)?;
            let rtv_handle = descriptors.cpu_handle(rtv);
            self.device
                .write_descriptor(rtv_handle, DescriptorView::RenderTarget(raw));
            self.back_buffers.push(BackBuffer {
                raw,
                rtv,
                rtv_handle,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Frame Lifecycle
    // ========================================================================

    /// Opens the current slot for recording.
    ///
    /// Blocks if the GPU has not finished the slot's previous frame.
    pub fn begin_frame(&mut self, tracker: &ResourceStateTracker) -> Result<()> {
        if self.recording.is_some() {
            return Err(GlazeError::InvalidFrameState(
                "begin_frame called while a frame is recording",
            ));
        }
        if self.frames.is_empty() {
            return Err(GlazeError::InvalidFrameState(
                "begin_frame called after the frame contexts were destroyed",
            ));
        }

        let slot = self.device.current_back_buffer_index();
        self.current = slot;
        self.wait_for_slot(slot)?;

        let frame = &mut self.frames[slot];
        self.device.reset_command_allocator(frame.allocator)?;
        frame.state = SlotState::Recording;

        let mut list = CommandList::new(frame.allocator);
        let back = &self.back_buffers[slot];
        tracker.transition(&mut list, back.raw, ResourceState::RenderTarget);
        list.set_render_target(back.rtv_handle);
        list.clear_render_target(back.rtv_handle, self.clear_color);
        list.set_viewport(self.viewport());
        list.set_scissor(self.scissor());

        self.recording = Some(list);
        Ok(())
    }

    /// Closes, submits and presents the recorded frame, then signals a new
    /// fence value for the slot. Returns that value.
    pub fn end_frame(&mut self, tracker: &ResourceStateTracker) -> Result<FenceValue> {
        let Some(mut list) = self.recording.take() else {
            return Err(GlazeError::InvalidFrameState(
                "end_frame called without begin_frame",
            ));
        };
        let slot = self.current;

        tracker.transition(&mut list, self.back_buffers[slot].raw, ResourceState::Present);
        list.close();
        self.device.submit(list)?;
        self.frames[slot].state = SlotState::Submitted;

        let params = PresentParams {
            sync_interval: u32::from(self.vsync),
            allow_tearing: !self.vsync && self.tearing_available,
        };
        self.device.present(params)?;
        self.frames[slot].state = SlotState::Presented;

        let fence = self.signal_next()?;
        self.frames[slot].fence_value = fence;
        self.frames_presented += 1;
        self.current = self.device.current_back_buffer_index();

        log::trace!("Frame {} presented from slot {slot}, fence {fence}", self.frames_presented);
        Ok(fence)
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.frames[slot].fence_value;
        if self.device.completed_fence_value() < fence {
            log::debug!("Slot {slot} still in flight, waiting for fence {fence}");
            self.wait_for_fence(fence)?;
        }
        self.frames[slot].state = SlotState::Idle;
        Ok(())
    }

    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Signals the next fence value on the queue.
    pub fn signal_next(&mut self) -> Result<FenceValue> {
        let value = self.last_signaled + 1;
        self.device.signal(value)?;
        self.last_signaled = value;
        Ok(value)
    }

    /// Blocks until the fence reaches `value`, bounded by the fence timeout.
    pub fn wait_for_fence(&self, value: FenceValue) -> Result<()> {
        self.device.wait_for_fence(value, self.fence_timeout)
    }

    /// Signals and waits for a fresh fence value, draining the queue.
    pub fn wait_for_gpu(&mut self) -> Result<()> {
        let value = self.signal_next()?;
        self.wait_for_fence(value)?;
        for frame in &mut self.frames {
            if frame.state != SlotState::Recording {
                frame.state = SlotState::Idle;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Resize
    // ========================================================================

    /// Drains the GPU and recreates the back buffers at the new size.
    ///
    /// A zero dimension (minimized window) is ignored. Returns whether the
    /// swap chain was recreated.
    pub fn resize(
        &mut self,
        width: u32,
        height: u32,
        descriptors: &mut DescriptorAllocator,
        tracker: &ResourceStateTracker,
    ) -> Result<bool> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {width}x{height}");
            return Ok(false);
        }
        if self.recording.is_some() {
            return Err(GlazeError::InvalidFrameState("resize during a recorded frame"));
        }
        if (width, height) == (self.width, self.height) {
            return Ok(false);
        }

        self.wait_for_gpu()?;
        for back in self.back_buffers.drain(..) {
            tracker.unregister(back.raw);
            descriptors.free(back.rtv);
        }
        let buffers = self
            .device
            .resize_swap_chain(width, height)
            .map_err(|e| match e {
                GlazeError::DeviceLost(_) => e,
                other => GlazeError::SwapChainCreation(other.to_string()),
            })?;
        self.install_back_buffers(buffers, descriptors, tracker)?;

        self.width = width;
        self.height = height;
        self.current = self.device.current_back_buffer_index();
        log::info!("Swap chain resized to {width}x{height}");
        Ok(true)
    }

    // ========================================================================
    // Render Parameters
    // ========================================================================

    /// Sets the render scale, clamped into range. Takes effect next frame.
    pub fn set_render_scale(&mut self, scale: f32) -> f32 {
        self.render_scale = clamp_render_scale(scale);
        self.render_scale
    }

    #[must_use]
    pub fn render_scale(&self) -> f32 {
        self.render_scale
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }

    #[must_use]
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Whether the next present will allow tearing.
    #[must_use]
    pub fn tearing_active(&self) -> bool {
        !self.vsync && self.tearing_available
    }

    /// Extent actually rendered into: the back buffer size times the render
    /// scale, never below one pixel.
    #[must_use]
    pub fn scaled_extent(&self) -> (u32, u32) {
        let scale = |v: u32| ((v as f32 * self.render_scale) as u32).max(1);
        (scale(self.width), scale(self.height))
    }

    #[must_use]
    pub fn viewport(&self) -> Viewport {
        let (w, h) = self.scaled_extent();
        Viewport {
            x: 0.0,
            y: 0.0,
            width: w as f32,
            height: h as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    #[must_use]
    pub fn scissor(&self) -> ScissorRect {
        let (w, h) = self.scaled_extent();
        ScissorRect {
            left: 0,
            top: 0,
            right: w,
            bottom: h,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// The list being recorded between `begin_frame` and `end_frame`.
    pub fn command_list_mut(&mut self) -> Option<&mut CommandList> {
        self.recording.as_mut()
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    #[must_use]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.frames[slot].state
    }

    #[must_use]
    pub fn slot_fence(&self, slot: usize) -> FenceValue {
        self.frames[slot].fence_value
    }

    #[must_use]
    pub fn last_signaled_fence(&self) -> FenceValue {
        self.last_signaled
    }

    /// The fence value the next signal will use.
    #[must_use]
    pub fn next_fence_value(&self) -> FenceValue {
        self.last_signaled + 1
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn back_buffer(&self, slot: usize) -> RawResource {
        self.back_buffers[slot].raw
    }

    #[must_use]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Destroys every slot's command allocator. Call after
    /// [`wait_for_gpu`](Self::wait_for_gpu); the orchestrator cannot record
    /// frames afterwards.
    pub fn destroy_frame_contexts(&mut self) -> usize {
        self.recording = None;
        let count = self.frames.len();
        for frame in self.frames.drain(..) {
            self.device.destroy_command_allocator(frame.allocator);
        }
        count
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        self.destroy_frame_contexts();
    }
}
