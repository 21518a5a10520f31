//! Renderer
//!
//! [`Renderer`] ties the GPU core together for one overlay window:
//!
//! - [`descriptor`]: bitmap descriptor heaps
//! - [`state_tracker`]: resource state tracking and barrier elision
//! - [`resource_cache`]: budgeted, pinned, fence-deferred resource pool
//! - [`allocator_pool`]: command allocators for one-off submissions
//! - [`pipeline`]: pipeline state objects keyed by [`PipelineStateKey`]
//! - [`frame`]: swap chain and per-slot frame lifecycle
//!
//! The renderer is driven from a single submission thread. Browser frames
//! arrive from any thread through the [`FrameSink`] returned by
//! [`Renderer::frame_sink`].
//!
//! ```rust,ignore
//! let device = Arc::new(HeadlessDevice::new(HeadlessOptions::default()));
//! let mut renderer = Renderer::new(device, OverlaySettings::default(), 1280, 720)?;
//! let sink = renderer.frame_sink();
//! sink.submit_frame(&pixels, 1280, 720, wgpu::TextureFormat::Bgra8Unorm)?;
//! renderer.render_frame()?;
//! ```

pub mod allocator_pool;
pub mod descriptor;
pub mod frame;
pub mod pipeline;
pub mod resource_cache;
pub mod state_tracker;

use std::sync::Arc;

use crate::errors::{GlazeError, Result};
use crate::hal::{
    BufferDesc, CommandList, DescriptorCategory, DescriptorView, FenceValue, GpuDescriptorHandle,
    GpuDevice, HeapKind, PlacedFootprint, ResourceState, RootLayout, SamplerDesc,
};
use crate::overlay::{FrameSink, OverlaySurface, SurfaceContext};
use crate::settings::{
    ActivityState, OverlaySettings, RenderAdaptation, ResourceUsageLevel, adaptation_for,
};
use crate::time::{Clock, SystemClock};
use crate::utils::{FpsCounter, FramePacer};

use self::allocator_pool::CommandAllocatorPool;
use self::descriptor::{DescriptorAllocator, DescriptorSlot};
use self::frame::FrameOrchestrator;
use self::resource_cache::{ResourceCache, SweepReport};
use self::state_tracker::ResourceStateTracker;

pub use self::pipeline::{PipelineCache, PipelineState, PipelineStateKey};

pub struct Renderer {
    device: Arc<dyn GpuDevice>,
    settings: OverlaySettings,

    // Subsystems
    tracker: Arc<ResourceStateTracker>,
    cache: Arc<ResourceCache>,
    descriptors: DescriptorAllocator,
    allocators: CommandAllocatorPool,
    pipelines: PipelineCache,
    frames: FrameOrchestrator,
    overlay: OverlaySurface,

    // Shared sampler for the textured overlay path
    sampler: DescriptorSlot,
    sampler_handle: GpuDescriptorHandle,
    overlay_key: PipelineStateKey,

    fps: FpsCounter,
    pacer: FramePacer,
}

impl Renderer {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        settings: OverlaySettings,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        Self::with_clock(device, settings, Arc::new(SystemClock), width, height)
    }

    /// Like [`Renderer::new`], aging cache entries and pacing frames
    /// against `clock`.
    pub fn with_clock(
        device: Arc<dyn GpuDevice>,
        settings: OverlaySettings,
        clock: Arc<dyn Clock>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let settings = settings.sanitized();

        let tracker = Arc::new(ResourceStateTracker::new());
        let cache = Arc::new(ResourceCache::with_clock(
            device.clone(),
            tracker.clone(),
            clock.clone(),
            settings.cache_budget_bytes,
        ));
        let mut descriptors =
            DescriptorAllocator::new(device.as_ref(), &settings.descriptor_capacities)?;
        let allocators = CommandAllocatorPool::new(device.clone())?;
        let frames = FrameOrchestrator::new(
            device.clone(),
            &mut descriptors,
            &tracker,
            &settings,
            width,
            height,
        )?;

        let sampler = descriptors.allocate(DescriptorCategory::Sampler)?;
        device.write_descriptor(
            descriptors.cpu_handle(sampler),
            DescriptorView::Sampler(SamplerDesc::default()),
        );
        let sampler_handle = descriptors
            .gpu_handle(sampler)
            .unwrap_or(GpuDescriptorHandle::INVALID);

        let overlay_key = PipelineStateKey::overlay(settings.back_buffer_format.to_wgpu());
        let mut pipelines = PipelineCache::new(device.clone());
        pipelines.initialize(&overlay_key)?;

        let overlay = OverlaySurface::new(frames.frame_count());

        log::info!(
            "Overlay renderer ready: {width}x{height}, scale {:.2}, vsync {}, budget {} MiB",
            frames.render_scale(),
            frames.vsync(),
            settings.cache_budget_bytes / (1024 * 1024)
        );

        Ok(Self {
            pacer: FramePacer::with_clock(clock.clone(), settings.target_frame_rate),
            fps: FpsCounter::with_clock(clock),
            device,
            settings,
            tracker,
            cache,
            descriptors,
            allocators,
            pipelines,
            frames,
            overlay,
            sampler,
            sampler_handle,
            overlay_key,
        })
    }

    /// Producer-side handle for submitting browser frames from any thread.
    #[must_use]
    pub fn frame_sink(&self) -> FrameSink {
        self.overlay.sink()
    }

    // ========================================================================
    // Frame Lifecycle
    // ========================================================================

    /// Opens a frame and records the upload of the newest submitted pixels.
    ///
    /// A rejected upload (bad size, descriptor exhaustion) is logged and the
    /// frame continues with the previous overlay content.
    pub fn begin_frame(&mut self) -> Result<()> {
        self.frames.begin_frame(&self.tracker)?;

        let completed = self.device.completed_fence_value();
        let retire_fence = self.frames.next_fence_value();
        self.cache.set_retire_fence(retire_fence);
        self.cache.collect_garbage(completed);
        if self.cache.total_memory_usage() > self.cache.ceiling() {
            self.cache
                .release_unused(self.settings.unused_resource_max_age);
            self.cache.trim();
        }

        let slot = self.frames.current_slot();
        let Some(list) = self.frames.command_list_mut() else {
            return Err(GlazeError::InvalidFrameState("no command list after begin_frame"));
        };
        let mut ctx = SurfaceContext {
            device: self.device.as_ref(),
            cache: &self.cache,
            tracker: &self.tracker,
            descriptors: &mut self.descriptors,
            completed,
            retire_fence,
        };
        match self.overlay.prepare(slot, &mut ctx, list) {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::warn!("Overlay upload skipped: {e}");
                Ok(())
            }
        }
    }

    /// Records a full-screen overlay draw with `key`.
    ///
    /// Returns `false` without recording anything if the pipeline is
    /// unavailable or a textured key has no content to sample yet.
    pub fn draw_overlay(&mut self, key: &PipelineStateKey) -> bool {
        if !self.frames.is_recording() {
            log::warn!("draw_overlay called outside begin_frame/end_frame");
            return false;
        }

        let textured = match key.root_layout() {
            RootLayout::TextureSampler => {
                let srv = self.overlay.sampleable_handle();
                match self.overlay.texture() {
                    Some(texture) if srv.is_valid() => Some((srv, texture)),
                    _ => return false,
                }
            }
            RootLayout::Empty => None,
        };

        let Some(pipeline) = self.pipelines.get(key) else {
            return false;
        };
        let Some(list) = self.frames.command_list_mut() else {
            return false;
        };

        list.set_root_signature(pipeline.root_signature);
        list.set_pipeline(pipeline.raw);
        if let Some((srv, texture)) = textured {
            self.tracker
                .transition(list, texture.raw, ResourceState::PixelShaderResource);
            list.set_descriptor_table(0, srv);
            list.set_descriptor_table(1, self.sampler_handle);
            self.cache.mark_used(texture.raw);
        }
        list.draw(4, 1);
        true
    }

    /// Submits and presents the open frame. Returns its fence value.
    pub fn end_frame(&mut self) -> Result<FenceValue> {
        let fence = self.frames.end_frame(&self.tracker)?;
        if let Some(fps) = self.fps.update() {
            log::debug!("Overlay: {fps:.1} fps");
        }
        Ok(fence)
    }

    /// One complete frame: begin, draw the overlay if there is content,
    /// end.
    pub fn render_frame(&mut self) -> Result<FenceValue> {
        self.begin_frame()?;
        let key = self.overlay_key;
        self.draw_overlay(&key);
        self.end_frame()
    }

    /// Sleeps out the rest of the target frame interval when vsync is off.
    pub fn throttle(&mut self) {
        if self.frames.vsync() {
            self.pacer.mark_frame();
        } else {
            self.pacer.throttle();
        }
    }

    // ========================================================================
    // Window Events
    // ========================================================================

    /// Drains the GPU and recreates the back buffers.
    ///
    /// The overlay texture is dropped as well, so the sampleable handle is
    /// invalid until the next submitted frame arrives.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        let resized = self
            .frames
            .resize(width, height, &mut self.descriptors, &self.tracker)?;
        if resized {
            let completed = self.device.completed_fence_value();
            self.cache
                .set_retire_fence(self.frames.last_signaled_fence());
            let mut ctx = SurfaceContext {
                device: self.device.as_ref(),
                cache: &self.cache,
                tracker: &self.tracker,
                descriptors: &mut self.descriptors,
                completed,
                retire_fence: self.frames.last_signaled_fence(),
            };
            self.overlay.invalidate(&mut ctx);
            self.cache.collect_garbage(completed);
        }
        Ok(resized)
    }

    /// Blocks until all submitted work has completed, then destroys
    /// everything awaiting deferred destruction.
    pub fn wait_for_gpu(&mut self) -> Result<()> {
        self.frames.wait_for_gpu()?;
        self.cache
            .collect_garbage(self.device.completed_fence_value());
        Ok(())
    }

    // ========================================================================
    // Runtime Parameters
    // ========================================================================

    pub fn set_render_scale(&mut self, scale: f32) -> f32 {
        self.frames.set_render_scale(scale)
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.frames.set_vsync(vsync);
    }

    pub fn set_target_frame_rate(&mut self, fps: u32) {
        self.settings.target_frame_rate = fps;
        self.pacer.set_target_frame_rate(fps);
    }

    /// Changes the memory ceiling, evicting down to it if needed.
    pub fn set_cache_budget(&mut self, bytes: u64) -> SweepReport {
        self.settings.cache_budget_bytes = bytes;
        self.cache.set_ceiling(bytes)
    }

    /// Applies the render parameters for an activity report.
    pub fn adapt_to_activity(
        &mut self,
        state: ActivityState,
        level: ResourceUsageLevel,
    ) -> RenderAdaptation {
        let adaptation = adaptation_for(state, level, self.settings.low_activity_max_age);
        self.frames.set_render_scale(adaptation.render_scale);
        self.frames.set_vsync(adaptation.vsync);

        if let Some(max_age) = adaptation.release_unused_older_than {
            let report = self.cache.release_unused(max_age);
            if report.resources > 0 {
                log::info!(
                    "Released {} idle resources ({} bytes) for {state:?}",
                    report.resources,
                    report.bytes
                );
            }
        }
        log::info!(
            "Activity {state:?}/{level:?}: scale {:.2}, vsync {}",
            adaptation.render_scale,
            adaptation.vsync
        );
        adaptation
    }

    /// Periodic maintenance: releases cache entries idle for longer than
    /// the configured maximum age.
    pub fn release_unused_resources(&self) -> SweepReport {
        self.cache
            .release_unused(self.settings.unused_resource_max_age)
    }

    /// Drains the GPU and destroys every cached pipeline.
    pub fn clear_pipeline_cache(&mut self) -> Result<()> {
        self.wait_for_gpu()?;
        self.pipelines.clear();
        Ok(())
    }

    // ========================================================================
    // Readback
    // ========================================================================

    /// Copies the overlay texture back to the CPU as tightly packed rows.
    ///
    /// Uses a pooled command allocator and blocks until the copy completes.
    /// Not allowed while a frame is recording.
    pub fn read_back_overlay(&mut self) -> Result<Vec<u8>> {
        if self.frames.is_recording() {
            return Err(GlazeError::InvalidFrameState(
                "read_back_overlay during a recorded frame",
            ));
        }
        let texture = self
            .overlay
            .texture()
            .ok_or_else(|| GlazeError::InvalidResource("overlay texture not created".into()))?;
        let Some(desc) = texture.texture_desc() else {
            return Err(GlazeError::InvalidResource("overlay is not a texture".into()));
        };

        let footprint = PlacedFootprint::for_texture(desc.width, desc.height, desc.format);
        let readback = self.cache.create_buffer(
            &BufferDesc {
                label: "Overlay Readback",
                size: footprint.total_bytes(),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                heap: HeapKind::Readback,
            },
            ResourceState::CopyDest,
        )?;

        let allocator = self
            .allocators
            .acquire(self.device.completed_fence_value())?;
        let mut list = CommandList::new(allocator);
        self.tracker
            .transition(&mut list, texture.raw, ResourceState::CopySource);
        self.tracker
            .transition(&mut list, readback.raw, ResourceState::CopyDest);
        list.copy_texture_to_buffer(texture.raw, readback.raw, footprint);
        self.tracker
            .transition(&mut list, texture.raw, ResourceState::PixelShaderResource);
        list.close();

        self.device.submit(list)?;
        let fence = self.frames.signal_next()?;
        self.allocators.release(fence, allocator);
        self.frames.wait_for_fence(fence)?;

        let bytes = self
            .device
            .read_buffer(readback.raw, 0, footprint.total_bytes() as usize)?;
        self.cache.recycle(readback.raw);
        Ok(footprint.unpitch_rows(&bytes))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Descriptor the UI layer binds to sample the overlay, or
    /// [`GpuDescriptorHandle::INVALID`] when there is nothing to show.
    #[must_use]
    pub fn sampleable_handle(&self) -> GpuDescriptorHandle {
        self.overlay.sampleable_handle()
    }

    #[must_use]
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    #[must_use]
    pub fn settings(&self) -> &OverlaySettings {
        &self.settings
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<ResourceStateTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn descriptors(&self) -> &DescriptorAllocator {
        &self.descriptors
    }

    #[must_use]
    pub fn allocators(&self) -> &CommandAllocatorPool {
        &self.allocators
    }

    #[must_use]
    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn pipelines_mut(&mut self) -> &mut PipelineCache {
        &mut self.pipelines
    }

    #[must_use]
    pub fn frames(&self) -> &FrameOrchestrator {
        &self.frames
    }

    #[must_use]
    pub fn overlay(&self) -> &OverlaySurface {
        &self.overlay
    }

    #[must_use]
    pub fn overlay_key(&self) -> PipelineStateKey {
        self.overlay_key
    }

    #[must_use]
    pub fn sampler_handle(&self) -> GpuDescriptorHandle {
        self.sampler_handle
    }

    #[must_use]
    pub fn current_fps(&self) -> f32 {
        self.fps.current_fps
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.frames.wait_for_gpu() {
            log::error!("GPU drain failed during shutdown: {e}");
        }
        let completed = self.device.completed_fence_value();
        let mut ctx = SurfaceContext {
            device: self.device.as_ref(),
            cache: &self.cache,
            tracker: &self.tracker,
            descriptors: &mut self.descriptors,
            completed,
            retire_fence: self.frames.last_signaled_fence(),
        };
        self.overlay.release_all(&mut ctx);
        self.allocators.clear();
        self.frames.destroy_frame_contexts();
        self.descriptors.free(self.sampler);
        self.pipelines.clear();
        self.cache.clear();
        self.cache.collect_garbage(FenceValue::MAX);
        log::info!("Overlay renderer shut down");
    }
}
