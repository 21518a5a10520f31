//! Recorded command streams.
//!
//! A [`CommandList`] is a plain vector of [`Command`]s tied to the allocator
//! it was opened on. It is recorded on the submission thread and handed to
//! [`GpuDevice::submit`](super::GpuDevice::submit) once closed.

use smallvec::SmallVec;

use super::types::{
    CpuDescriptorHandle, GpuDescriptorHandle, PlacedFootprint, RawAllocator, RawPipeline,
    RawResource, RawRootSignature, ResourceState,
};

/// A single state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: RawResource,
    pub before: ResourceState,
    pub after: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ResourceBarrier(SmallVec<[Barrier; 4]>),
    SetRenderTarget(CpuDescriptorHandle),
    ClearRenderTarget {
        target: CpuDescriptorHandle,
        color: [f32; 4],
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    CopyBufferToTexture {
        src: RawResource,
        footprint: PlacedFootprint,
        dst: RawResource,
    },
    CopyTextureToBuffer {
        src: RawResource,
        dst: RawResource,
        footprint: PlacedFootprint,
    },
    SetRootSignature(RawRootSignature),
    SetPipeline(RawPipeline),
    SetDescriptorTable {
        parameter: u32,
        handle: GpuDescriptorHandle,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
}

#[derive(Debug)]
pub struct CommandList {
    allocator: RawAllocator,
    commands: Vec<Command>,
    closed: bool,
}

impl CommandList {
    #[must_use]
    pub fn new(allocator: RawAllocator) -> Self {
        Self {
            allocator,
            commands: Vec::with_capacity(32),
            closed: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn allocator(&self) -> RawAllocator {
        self.allocator
    }

    #[inline]
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Appends a command. Recording into a closed list is ignored.
    pub fn push(&mut self, command: Command) {
        if self.closed {
            log::error!("Command recorded into a closed list: {command:?}");
            return;
        }
        self.commands.push(command);
    }

    pub fn barriers(&mut self, barriers: SmallVec<[Barrier; 4]>) {
        if !barriers.is_empty() {
            self.push(Command::ResourceBarrier(barriers));
        }
    }

    pub fn set_render_target(&mut self, target: CpuDescriptorHandle) {
        self.push(Command::SetRenderTarget(target));
    }

    pub fn clear_render_target(&mut self, target: CpuDescriptorHandle, color: [f32; 4]) {
        self.push(Command::ClearRenderTarget { target, color });
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.push(Command::SetViewport(viewport));
    }

    pub fn set_scissor(&mut self, rect: ScissorRect) {
        self.push(Command::SetScissor(rect));
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        src: RawResource,
        footprint: PlacedFootprint,
        dst: RawResource,
    ) {
        self.push(Command::CopyBufferToTexture {
            src,
            footprint,
            dst,
        });
    }

    pub fn copy_texture_to_buffer(
        &mut self,
        src: RawResource,
        dst: RawResource,
        footprint: PlacedFootprint,
    ) {
        self.push(Command::CopyTextureToBuffer {
            src,
            dst,
            footprint,
        });
    }

    pub fn set_root_signature(&mut self, root: RawRootSignature) {
        self.push(Command::SetRootSignature(root));
    }

    pub fn set_pipeline(&mut self, pipeline: RawPipeline) {
        self.push(Command::SetPipeline(pipeline));
    }

    pub fn set_descriptor_table(&mut self, parameter: u32, handle: GpuDescriptorHandle) {
        self.push(Command::SetDescriptorTable { parameter, handle });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.push(Command::Draw {
            vertex_count,
            instance_count,
        });
    }

    /// Number of individual barriers recorded so far.
    #[must_use]
    pub fn barrier_count(&self) -> usize {
        self.commands
            .iter()
            .map(|c| match c {
                Command::ResourceBarrier(b) => b.len(),
                _ => 0,
            })
            .sum()
    }
}
