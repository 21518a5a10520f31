//! Hardware Abstraction Layer
//!
//! The overlay core never talks to a graphics API directly. Everything it
//! needs from the GPU goes through [`GpuDevice`]: resource creation,
//! descriptor heaps, command allocators, queue submission, the fence and
//! the swap chain.
//!
//! [`HeadlessDevice`] implements the trait in software. It executes
//! recorded command lists against CPU memory, validates the state protocol
//! the core is expected to follow, and can hold its timeline back so that
//! fence behavior is observable.

mod command;
pub mod headless;
mod types;

use std::time::Duration;

pub use command::{Barrier, Command, CommandList, ScissorRect, Viewport};
pub use headless::{HeadlessDevice, HeadlessOptions, HeadlessStats, Timeline};
pub use types::*;

use crate::errors::Result;

/// The device surface the overlay core is written against.
///
/// All methods take `&self`; implementations synchronize internally so the
/// device can be shared between the submission thread and the resource
/// cache.
pub trait GpuDevice: Send + Sync {
    // ─── Resources ─────────────────────────────────────────────────────────

    fn create_resource(&self, desc: &ResourceDesc, initial_state: ResourceState)
    -> Result<RawResource>;

    fn destroy_resource(&self, resource: RawResource);

    /// Writes CPU bytes into an upload-heap buffer.
    fn write_buffer(&self, resource: RawResource, offset: u64, data: &[u8]) -> Result<()>;

    /// Reads bytes back from a readback-heap buffer.
    fn read_buffer(&self, resource: RawResource, offset: u64, len: usize) -> Result<Vec<u8>>;

    // ─── Descriptors ───────────────────────────────────────────────────────

    fn create_descriptor_heap(
        &self,
        category: DescriptorCategory,
        capacity: u32,
    ) -> Result<DescriptorHeapInfo>;

    fn write_descriptor(&self, handle: CpuDescriptorHandle, view: DescriptorView);

    // ─── Commands ──────────────────────────────────────────────────────────

    fn create_command_allocator(&self) -> Result<RawAllocator>;

    /// Resets an allocator. Only valid once all work recorded from it has
    /// completed on the GPU.
    fn reset_command_allocator(&self, allocator: RawAllocator) -> Result<()>;

    /// Frees an allocator. Only valid once all work recorded from it has
    /// completed on the GPU.
    fn destroy_command_allocator(&self, allocator: RawAllocator);

    fn submit(&self, list: CommandList) -> Result<()>;

    // ─── Synchronization ───────────────────────────────────────────────────

    /// Enqueues a fence signal after all previously submitted work.
    fn signal(&self, value: FenceValue) -> Result<()>;

    fn completed_fence_value(&self) -> FenceValue;

    /// Blocks until the fence reaches `value` or `timeout` elapses.
    fn wait_for_fence(&self, value: FenceValue, timeout: Duration) -> Result<()>;

    // ─── Pipelines ─────────────────────────────────────────────────────────

    fn create_root_signature(&self, layout: RootLayout) -> Result<RawRootSignature>;

    fn compile_shader(
        &self,
        stage: ShaderStage,
        source: &str,
        entry_point: &str,
        profile: ShaderProfile,
    ) -> Result<ShaderBytecode>;

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<RawPipeline>;

    fn destroy_pipeline(&self, pipeline: RawPipeline);

    // ─── Swap Chain ────────────────────────────────────────────────────────

    fn supports_tearing(&self) -> bool;

    /// Creates the swap chain and returns its back buffers in `Present` state.
    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<Vec<RawResource>>;

    /// Recreates the back buffers at a new size. All GPU work referencing the
    /// old buffers must have completed.
    fn resize_swap_chain(&self, width: u32, height: u32) -> Result<Vec<RawResource>>;

    fn current_back_buffer_index(&self) -> usize;

    fn present(&self, params: PresentParams) -> Result<()>;
}
