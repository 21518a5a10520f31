//! Overlay Surface
//!
//! The sampleable texture the UI layer draws from, plus one upload buffer
//! per frame slot. Each frame, the newest submitted pixels are pitched into
//! the current slot's upload buffer and copied into the texture:
//!
//! ```text
//! PixelShaderResource -> CopyDest -> (copy) -> PixelShaderResource
//! ```
//!
//! The slot's fence has already been waited on by `begin_frame`, so its
//! upload buffer is never rewritten while a previous copy reads it.
//!
//! [`OverlaySurface::sampleable_handle`] returns
//! [`GpuDescriptorHandle::INVALID`] until content has been uploaded into
//! the current texture, including right after the texture is recreated.

use std::sync::Arc;

use crate::errors::Result;
use crate::hal::{
    BufferDesc, CommandList, DescriptorCategory, DescriptorView, FenceValue, GpuDescriptorHandle,
    GpuDevice, GpuResource, HeapKind, PlacedFootprint, ResourceState, TextureDesc,
};
use crate::renderer::descriptor::{DescriptorAllocator, DescriptorSlot};
use crate::renderer::resource_cache::ResourceCache;
use crate::renderer::state_tracker::ResourceStateTracker;

use super::handoff::{FrameHandoff, FrameSink, HandoffStats, PendingFrame};

/// Borrowed renderer state the surface needs to create and upload.
pub struct SurfaceContext<'a> {
    pub device: &'a dyn GpuDevice,
    pub cache: &'a ResourceCache,
    pub tracker: &'a ResourceStateTracker,
    pub descriptors: &'a mut DescriptorAllocator,
    /// Fence value the GPU has completed.
    pub completed: FenceValue,
    /// Fence value covering all work recorded so far.
    pub retire_fence: FenceValue,
}

struct OverlayTexture {
    resource: GpuResource,
    srv: DescriptorSlot,
    srv_handle: GpuDescriptorHandle,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

pub struct OverlaySurface {
    handoff: Arc<FrameHandoff>,
    texture: Option<OverlayTexture>,
    uploads: Vec<Option<GpuResource>>,
    /// Descriptor slots of replaced textures, freed once their fence passes.
    retired_srvs: Vec<(DescriptorSlot, FenceValue)>,
    staging: Vec<u8>,
    has_content: bool,
    uploaded_sequence: u64,
}

impl OverlaySurface {
    #[must_use]
    pub fn new(frame_count: usize) -> Self {
        Self {
            handoff: Arc::new(FrameHandoff::new()),
            texture: None,
            uploads: vec![None; frame_count],
            retired_srvs: Vec::new(),
            staging: Vec::new(),
            has_content: false,
            uploaded_sequence: 0,
        }
    }

    /// Producer-side handle for submitting frames.
    #[must_use]
    pub fn sink(&self) -> FrameSink {
        FrameSink::new(self.handoff.clone())
    }

    /// Records the upload of the newest pending frame into `list`.
    ///
    /// Returns `false` when nothing was pending.
    pub fn prepare(
        &mut self,
        slot: usize,
        ctx: &mut SurfaceContext<'_>,
        list: &mut CommandList,
    ) -> Result<bool> {
        self.free_retired_descriptors(ctx);

        let Some(frame) = self.handoff.take() else {
            return Ok(false);
        };
        let result = self.upload(slot, ctx, list, &frame);
        self.handoff.recycle(frame.pixels);
        result.map(|()| true)
    }

    fn upload(
        &mut self,
        slot: usize,
        ctx: &mut SurfaceContext<'_>,
        list: &mut CommandList,
        frame: &PendingFrame,
    ) -> Result<()> {
        let texture = self.ensure_texture(ctx, frame.width, frame.height, frame.format)?;
        let footprint = PlacedFootprint::for_texture(frame.width, frame.height, frame.format);
        let upload = self.ensure_upload_buffer(ctx, slot, footprint.total_bytes())?;

        footprint.pitch_rows(&frame.pixels, &mut self.staging);
        ctx.device.write_buffer(upload.raw, 0, &self.staging)?;

        ctx.tracker
            .transition(list, texture.raw, ResourceState::CopyDest);
        list.copy_buffer_to_texture(upload.raw, footprint, texture.raw);
        ctx.tracker
            .transition(list, texture.raw, ResourceState::PixelShaderResource);

        ctx.cache.mark_used(texture.raw);
        ctx.cache.mark_used(upload.raw);
        self.has_content = true;
        self.uploaded_sequence = frame.sequence;
        Ok(())
    }

    fn ensure_texture(
        &mut self,
        ctx: &mut SurfaceContext<'_>,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Result<GpuResource> {
        if let Some(t) = &self.texture {
            if (t.width, t.height, t.format) == (width, height, format) {
                return Ok(t.resource);
            }
        }
        self.release_texture(ctx);

        let desc = TextureDesc {
            label: "Overlay Texture",
            width,
            height,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            heap: HeapKind::DeviceLocal,
        };
        let resource = ctx
            .cache
            .create_texture(&desc, ResourceState::PixelShaderResource)?;
        ctx.cache.pin(resource.raw, true);

        let srv = match ctx.descriptors.allocate(DescriptorCategory::ShaderResource) {
            Ok(srv) => srv,
            Err(e) => {
                ctx.cache.release(resource.raw);
                return Err(e);
            }
        };
        ctx.device.write_descriptor(
            ctx.descriptors.cpu_handle(srv),
            DescriptorView::ShaderResource(resource.raw),
        );
        let srv_handle = ctx
            .descriptors
            .gpu_handle(srv)
            .unwrap_or(GpuDescriptorHandle::INVALID);

        log::info!("Overlay texture created: {width}x{height} {format:?}");
        self.texture = Some(OverlayTexture {
            resource,
            srv,
            srv_handle,
            width,
            height,
            format,
        });
        self.has_content = false;
        Ok(resource)
    }

    fn ensure_upload_buffer(
        &mut self,
        ctx: &mut SurfaceContext<'_>,
        slot: usize,
        size: u64,
    ) -> Result<GpuResource> {
        if let Some(buffer) = self.uploads[slot] {
            if buffer.size() >= size {
                return Ok(buffer);
            }
            ctx.cache.release(buffer.raw);
            self.uploads[slot] = None;
        }

        let desc = BufferDesc {
            label: "Overlay Upload",
            size,
            usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            heap: HeapKind::Upload,
        };
        let buffer = ctx.cache.create_buffer(&desc, ResourceState::GenericRead)?;
        ctx.cache.pin(buffer.raw, true);
        self.uploads[slot] = Some(buffer);
        Ok(buffer)
    }

    fn release_texture(&mut self, ctx: &mut SurfaceContext<'_>) {
        if let Some(t) = self.texture.take() {
            ctx.cache.release(t.resource.raw);
            self.retired_srvs.push((t.srv, ctx.retire_fence));
        }
        self.has_content = false;
    }

    fn free_retired_descriptors(&mut self, ctx: &mut SurfaceContext<'_>) {
        let completed = ctx.completed;
        self.retired_srvs.retain(|&(srv, fence)| {
            if fence <= completed {
                ctx.descriptors.free(srv);
                false
            } else {
                true
            }
        });
    }

    /// Drops the texture after a resize. The handle stays invalid until the
    /// next submitted frame is uploaded.
    pub fn invalidate(&mut self, ctx: &mut SurfaceContext<'_>) {
        self.release_texture(ctx);
        self.free_retired_descriptors(ctx);
    }

    /// Releases the texture and every upload buffer.
    pub fn release_all(&mut self, ctx: &mut SurfaceContext<'_>) {
        self.release_texture(ctx);
        for buffer in self.uploads.iter_mut().filter_map(Option::take) {
            ctx.cache.release(buffer.raw);
        }
        self.free_retired_descriptors(ctx);
    }

    /// Descriptor the UI layer binds to draw the overlay, or
    /// [`GpuDescriptorHandle::INVALID`] if there is nothing to draw yet.
    #[must_use]
    pub fn sampleable_handle(&self) -> GpuDescriptorHandle {
        match &self.texture {
            Some(t) if self.has_content => t.srv_handle,
            _ => GpuDescriptorHandle::INVALID,
        }
    }

    #[must_use]
    pub fn texture(&self) -> Option<GpuResource> {
        self.texture.as_ref().map(|t| t.resource)
    }

    #[must_use]
    pub fn has_content(&self) -> bool {
        self.has_content
    }

    /// Sequence number of the last uploaded frame, 0 before the first.
    #[must_use]
    pub fn uploaded_sequence(&self) -> u64 {
        self.uploaded_sequence
    }

    #[must_use]
    pub fn handoff_stats(&self) -> HandoffStats {
        self.handoff.stats()
    }
}
