//! Software [`GpuDevice`].
//!
//! `HeadlessDevice` keeps every resource in CPU memory and executes command
//! lists by interpreting them. It enforces the parts of the explicit-API
//! contract the overlay core is responsible for:
//!
//! - barrier `before` states must match the resource's actual state,
//! - copies, clears, draws and presents require the right states,
//! - an allocator must not be reset while work recorded from it is pending,
//! - a resource must not be destroyed while queued work references it.
//!
//! Violations are logged and collected (see
//! [`HeadlessDevice::validation_errors`]) the way a debug layer reports them.
//!
//! With [`Timeline::Manual`] queued work only executes when the test calls
//! [`HeadlessDevice::advance`] or [`HeadlessDevice::advance_to`], which makes
//! fence waits observable from another thread.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::command::{Command, CommandList, Viewport};
use super::types::{
    CpuDescriptorHandle, DescriptorCategory, DescriptorHeapInfo, DescriptorView, FenceValue,
    GpuDescriptorHandle, HeapKind, PipelineDesc, PlacedFootprint, PresentParams, RawAllocator,
    RawPipeline, RawResource, RawRootSignature, ResourceDesc, ResourceState, RootLayout,
    ROW_PITCH_ALIGNMENT, ShaderBytecode, ShaderProfile, ShaderStage, SwapChainDesc, TextureDesc,
    bytes_per_pixel,
};
use super::GpuDevice;
use crate::errors::{GlazeError, Result};

const DESCRIPTOR_STRIDE: u64 = 32;
const MAX_TEXTURE_DIMENSION: u32 = 16384;

/// When queued work executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeline {
    /// Work completes as soon as it is submitted.
    #[default]
    Immediate,
    /// Work completes only when advanced explicitly.
    Manual,
}

#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    pub timeline: Timeline,
    pub supports_tearing: bool,
    pub supported_profiles: SmallVec<[ShaderProfile; 2]>,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            timeline: Timeline::Immediate,
            supports_tearing: true,
            supported_profiles: SmallVec::from_slice(&[
                ShaderProfile::Model5_1,
                ShaderProfile::Model6_0,
            ]),
        }
    }
}

/// Counters for observable device activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub submissions: u64,
    pub executed_lists: u64,
    pub presents: u64,
    pub tearing_presents: u64,
    pub barriers: u64,
    pub copies: u64,
    pub clears: u64,
    pub draws: u64,
    pub allocators_created: u64,
    pub allocators_destroyed: u64,
    pub allocator_resets: u64,
    pub resources_created: u64,
    pub resources_destroyed: u64,
    pub shaders_compiled: u64,
    pub pipelines_created: u64,
}

// ─── Internal State ────────────────────────────────────────────────────────

struct HeadlessResource {
    desc: ResourceDesc,
    state: ResourceState,
    /// Lazily sized to the resource footprint on first write.
    data: Vec<u8>,
}

impl HeadlessResource {
    fn storage_mut(&mut self) -> &mut Vec<u8> {
        let size = self.desc.byte_size() as usize;
        if self.data.len() != size {
            self.data.resize(size, 0);
        }
        &mut self.data
    }

    fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        if offset < self.data.len() {
            let end = (offset + len).min(self.data.len());
            out[..end - offset].copy_from_slice(&self.data[offset..end]);
        }
        out
    }
}

#[derive(Default)]
struct AllocatorRecord {
    pending_lists: u32,
}

struct SwapChain {
    desc: SwapChainDesc,
    buffers: Vec<RawResource>,
    index: usize,
}

enum QueueOp {
    Execute(CommandList),
    Signal(FenceValue),
    Present(RawResource),
}

#[derive(Default)]
struct DeviceState {
    resources: SlotMap<RawResource, HeadlessResource>,
    allocators: SlotMap<RawAllocator, AllocatorRecord>,
    root_signatures: SlotMap<RawRootSignature, RootLayout>,
    pipelines: SlotMap<RawPipeline, RawRootSignature>,
    heaps: [Option<(DescriptorHeapInfo, u32)>; DescriptorCategory::COUNT],
    descriptors: FxHashMap<u64, DescriptorView>,
    queue: VecDeque<QueueOp>,
    completed: FenceValue,
    swap_chain: Option<SwapChain>,
    last_viewport: Option<Viewport>,
    last_present: Option<PresentParams>,
    validation_errors: Vec<String>,
    stats: HeadlessStats,
    lost: Option<String>,
    timeline: Timeline,
}

impl DeviceState {
    fn report(&mut self, message: String) {
        log::error!("[headless validation] {message}");
        self.validation_errors.push(message);
    }

    fn check_lost(&self) -> Result<()> {
        match &self.lost {
            Some(reason) => Err(GlazeError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }

    fn resolve_cpu(&self, handle: CpuDescriptorHandle) -> Option<DescriptorView> {
        self.descriptors.get(&handle.0).copied()
    }

    fn resolve_gpu(&self, handle: GpuDescriptorHandle) -> Option<DescriptorView> {
        self.heaps.iter().flatten().find_map(|(info, capacity)| {
            let base = info.gpu_base?;
            let end = base + u64::from(*capacity) * info.stride;
            (handle.0 >= base && handle.0 < end)
                .then(|| self.descriptors.get(&(info.cpu_base + handle.0 - base)).copied())
                .flatten()
        })
    }

    fn in_any_heap(&self, handle: CpuDescriptorHandle) -> bool {
        self.heaps.iter().flatten().any(|(info, capacity)| {
            let end = info.cpu_base + u64::from(*capacity) * info.stride;
            handle.0 >= info.cpu_base
                && handle.0 < end
                && (handle.0 - info.cpu_base) % info.stride == 0
        })
    }

    fn view_resource(view: DescriptorView) -> Option<RawResource> {
        match view {
            DescriptorView::RenderTarget(r)
            | DescriptorView::DepthStencil(r)
            | DescriptorView::ShaderResource(r) => Some(r),
            DescriptorView::Sampler(_) => None,
        }
    }

    fn command_references(&self, command: &Command, raw: RawResource) -> bool {
        match command {
            Command::ResourceBarrier(barriers) => barriers.iter().any(|b| b.resource == raw),
            Command::CopyBufferToTexture { src, dst, .. }
            | Command::CopyTextureToBuffer { src, dst, .. } => *src == raw || *dst == raw,
            Command::SetRenderTarget(h) | Command::ClearRenderTarget { target: h, .. } => {
                self.resolve_cpu(*h).and_then(Self::view_resource) == Some(raw)
            }
            Command::SetDescriptorTable { handle, .. } => {
                self.resolve_gpu(*handle).and_then(Self::view_resource) == Some(raw)
            }
            _ => false,
        }
    }

    fn is_referenced_by_queue(&self, raw: RawResource) -> bool {
        self.queue.iter().any(|op| match op {
            QueueOp::Execute(list) => {
                list.commands().iter().any(|c| self.command_references(c, raw))
            }
            QueueOp::Present(buffer) => *buffer == raw,
            QueueOp::Signal(_) => false,
        })
    }

    fn expect_state(&mut self, raw: RawResource, allowed: &[ResourceState], what: &str) -> bool {
        match self.resources.get(raw).map(|r| r.state) {
            Some(state) if allowed.contains(&state) => true,
            Some(state) => {
                self.report(format!(
                    "{what}: resource {raw:?} is in {state:?}, expected one of {allowed:?}"
                ));
                false
            }
            None => {
                self.report(format!("{what}: resource {raw:?} does not exist"));
                false
            }
        }
    }

    // ─── Queue Execution ───────────────────────────────────────────────────

    /// Executes one queued operation. Returns `false` when the queue is empty.
    fn step(&mut self) -> bool {
        let Some(op) = self.queue.pop_front() else {
            return false;
        };
        match op {
            QueueOp::Execute(list) => self.execute(&list),
            QueueOp::Signal(value) => self.completed = self.completed.max(value),
            QueueOp::Present(buffer) => {
                self.expect_state(buffer, &[ResourceState::Present], "present");
            }
        }
        true
    }

    fn execute(&mut self, list: &CommandList) {
        let mut root: Option<RootLayout> = None;
        let mut root_raw: Option<RawRootSignature> = None;
        let mut pipeline: Option<RawPipeline> = None;
        let mut render_target: Option<RawResource> = None;
        let mut tables: [Option<GpuDescriptorHandle>; 2] = [None; 2];

        for command in list.commands() {
            match command {
                Command::ResourceBarrier(barriers) => {
                    for b in barriers {
                        self.stats.barriers += 1;
                        match self.resources.get_mut(b.resource) {
                            Some(res) => {
                                let actual = res.state;
                                res.state = b.after;
                                if actual != b.before {
                                    self.report(format!(
                                        "barrier on {:?}: before-state {:?} does not match \
                                         actual {:?}",
                                        b.resource, b.before, actual
                                    ));
                                }
                            }
                            None => self.report(format!(
                                "barrier on destroyed resource {:?}",
                                b.resource
                            )),
                        }
                    }
                }
                Command::SetRenderTarget(handle) => match self.resolve_cpu(*handle) {
                    Some(DescriptorView::RenderTarget(raw)) => {
                        self.expect_state(raw, &[ResourceState::RenderTarget], "set render target");
                        render_target = Some(raw);
                    }
                    other => {
                        self.report(format!("set render target: handle resolves to {other:?}"))
                    }
                },
                Command::ClearRenderTarget { target, color } => match self.resolve_cpu(*target) {
                    Some(DescriptorView::RenderTarget(raw)) => {
                        if self.expect_state(raw, &[ResourceState::RenderTarget], "clear") {
                            self.stats.clears += 1;
                            self.fill(raw, *color);
                        }
                    }
                    other => self.report(format!("clear: handle resolves to {other:?}")),
                },
                Command::SetViewport(v) => self.last_viewport = Some(*v),
                Command::SetScissor(_) => {}
                Command::CopyBufferToTexture { src, footprint, dst } => {
                    let ok_src = self.expect_state(
                        *src,
                        &[ResourceState::GenericRead, ResourceState::CopySource],
                        "copy source buffer",
                    );
                    let ok_dst = self.expect_state(
                        *dst,
                        &[ResourceState::CopyDest],
                        "copy destination texture",
                    );
                    if ok_src && ok_dst {
                        self.copy_buffer_to_texture(*src, footprint, *dst);
                    }
                }
                Command::CopyTextureToBuffer { src, dst, footprint } => {
                    let ok_src = self.expect_state(
                        *src,
                        &[ResourceState::CopySource],
                        "copy source texture",
                    );
                    let ok_dst = self.expect_state(
                        *dst,
                        &[ResourceState::CopyDest],
                        "copy destination buffer",
                    );
                    if ok_src && ok_dst {
                        self.copy_texture_to_buffer(*src, *dst, footprint);
                    }
                }
                Command::SetRootSignature(raw) => match self.root_signatures.get(*raw) {
                    Some(layout) => {
                        root = Some(*layout);
                        root_raw = Some(*raw);
                        tables = [None; 2];
                    }
                    None => self.report(format!("unknown root signature {raw:?}")),
                },
                Command::SetPipeline(raw) => match self.pipelines.get(*raw).copied() {
                    Some(expected_root) => {
                        if root_raw != Some(expected_root) {
                            self.report(format!(
                                "pipeline {raw:?} bound with an incompatible root signature"
                            ));
                        }
                        pipeline = Some(*raw);
                    }
                    None => self.report(format!("unknown pipeline {raw:?}")),
                },
                Command::SetDescriptorTable { parameter, handle } => {
                    let table_count = root.map_or(0, RootLayout::table_count);
                    if *parameter >= table_count {
                        self.report(format!(
                            "descriptor table {parameter} out of range for {root:?}"
                        ));
                    } else {
                        tables[*parameter as usize] = Some(*handle);
                    }
                }
                Command::Draw { .. } => {
                    self.validate_draw(root, pipeline, render_target, &tables);
                    self.stats.draws += 1;
                }
            }
        }

        if let Some(record) = self.allocators.get_mut(list.allocator()) {
            record.pending_lists = record.pending_lists.saturating_sub(1);
        }
        self.stats.executed_lists += 1;
    }

    fn validate_draw(
        &mut self,
        root: Option<RootLayout>,
        pipeline: Option<RawPipeline>,
        render_target: Option<RawResource>,
        tables: &[Option<GpuDescriptorHandle>; 2],
    ) {
        if pipeline.is_none() {
            self.report("draw without a pipeline".to_string());
        }
        if render_target.is_none() {
            self.report("draw without a render target".to_string());
        }
        if root == Some(RootLayout::TextureSampler) {
            match tables[0].and_then(|h| self.resolve_gpu(h)) {
                Some(DescriptorView::ShaderResource(raw)) => {
                    self.expect_state(
                        raw,
                        &[ResourceState::PixelShaderResource],
                        "sampled texture",
                    );
                }
                other => self.report(format!("draw: texture table resolves to {other:?}")),
            }
            let sampler = tables[1].and_then(|h| self.resolve_gpu(h));
            if !matches!(sampler, Some(DescriptorView::Sampler(_))) {
                self.report("draw: sampler table is not bound to a sampler".to_string());
            }
        }
    }

    fn fill(&mut self, raw: RawResource, color: [f32; 4]) {
        let Some(res) = self.resources.get_mut(raw) else {
            return;
        };
        let ResourceDesc::Texture(desc) = res.desc else {
            return;
        };
        let to_u8 = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        let [r, g, b, a] = color.map(to_u8);
        let texel: Option<[u8; 4]> = match desc.format {
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
                Some([r, g, b, a])
            }
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
                Some([b, g, r, a])
            }
            _ => None,
        };
        let storage = res.storage_mut();
        match texel {
            Some(texel) => {
                for chunk in storage.chunks_exact_mut(4) {
                    chunk.copy_from_slice(&texel);
                }
            }
            None => storage.fill(0),
        }
    }

    fn texture_desc(&self, raw: RawResource) -> Option<TextureDesc> {
        match self.resources.get(raw)?.desc {
            ResourceDesc::Texture(t) => Some(t),
            ResourceDesc::Buffer(_) => None,
        }
    }

    fn validate_footprint(
        &mut self,
        buffer: RawResource,
        texture: RawResource,
        fp: &PlacedFootprint,
    ) -> bool {
        let Some(tex) = self.texture_desc(texture) else {
            self.report(format!("copy: {texture:?} is not a texture"));
            return false;
        };
        let buffer_size = self.resources.get(buffer).map_or(0, |r| r.desc.byte_size());
        let mut problems = Vec::new();
        if fp.format != tex.format {
            problems.push(format!(
                "format {:?} does not match texture {:?}",
                fp.format, tex.format
            ));
        }
        if fp.width > tex.width || fp.height > tex.height {
            problems.push(format!(
                "footprint {}x{} exceeds texture {}x{}",
                fp.width, fp.height, tex.width, tex.height
            ));
        }
        if fp.row_pitch % ROW_PITCH_ALIGNMENT != 0 || fp.row_pitch < fp.tight_row_bytes() {
            problems.push(format!("row pitch {} is invalid", fp.row_pitch));
        }
        if fp.total_bytes() > buffer_size {
            problems.push(format!(
                "footprint needs {} bytes, buffer has {buffer_size}",
                fp.total_bytes()
            ));
        }
        let ok = problems.is_empty();
        for p in problems {
            self.report(format!("copy: {p}"));
        }
        ok
    }

    fn copy_buffer_to_texture(&mut self, src: RawResource, fp: &PlacedFootprint, dst: RawResource) {
        if !self.validate_footprint(src, dst, fp) {
            return;
        }
        let Some(tex) = self.texture_desc(dst) else { return };
        let pitched = match self.resources.get(src) {
            Some(res) => res.read(fp.offset as usize, (fp.total_bytes() - fp.offset) as usize),
            None => return,
        };
        let bpp = bytes_per_pixel(tex.format) as usize;
        let tight = fp.tight_row_bytes() as usize;
        let tex_row = tex.width as usize * bpp;
        if let Some(res) = self.resources.get_mut(dst) {
            let storage = res.storage_mut();
            for row in 0..fp.height as usize {
                let from = row * fp.row_pitch as usize;
                let to = row * tex_row;
                storage[to..to + tight].copy_from_slice(&pitched[from..from + tight]);
            }
        }
        self.stats.copies += 1;
    }

    fn copy_texture_to_buffer(&mut self, src: RawResource, dst: RawResource, fp: &PlacedFootprint) {
        if !self.validate_footprint(dst, src, fp) {
            return;
        }
        let Some(tex) = self.texture_desc(src) else { return };
        let bpp = bytes_per_pixel(tex.format) as usize;
        let tex_row = tex.width as usize * bpp;
        let tight = fp.tight_row_bytes() as usize;
        let rows: Vec<Vec<u8>> = match self.resources.get(src) {
            Some(res) => (0..fp.height as usize)
                .map(|row| res.read(row * tex_row, tight))
                .collect(),
            None => return,
        };
        if let Some(res) = self.resources.get_mut(dst) {
            let storage = res.storage_mut();
            for (row, bytes) in rows.iter().enumerate() {
                let to = fp.offset as usize + row * fp.row_pitch as usize;
                storage[to..to + tight].copy_from_slice(bytes);
            }
        }
        self.stats.copies += 1;
    }
}

// ─── Device ────────────────────────────────────────────────────────────────

pub struct HeadlessDevice {
    options: HeadlessOptions,
    state: Mutex<DeviceState>,
    fence_changed: Condvar,
}

impl HeadlessDevice {
    #[must_use]
    pub fn new(options: HeadlessOptions) -> Self {
        let timeline = options.timeline;
        Self {
            options,
            state: Mutex::new(DeviceState {
                timeline,
                ..DeviceState::default()
            }),
            fence_changed: Condvar::new(),
        }
    }

    /// A device whose work completes only when advanced.
    #[must_use]
    pub fn manual() -> Self {
        Self::new(HeadlessOptions {
            timeline: Timeline::Manual,
            ..HeadlessOptions::default()
        })
    }

    #[must_use]
    pub fn timeline(&self) -> Timeline {
        self.state.lock().timeline
    }

    /// Switches the timeline. Switching to `Immediate` drains queued work.
    pub fn set_timeline(&self, timeline: Timeline) {
        let mut state = self.state.lock();
        state.timeline = timeline;
        self.drain_if_immediate(&mut state);
    }

    fn drain_if_immediate(&self, state: &mut DeviceState) {
        if state.timeline == Timeline::Immediate {
            while state.step() {}
            self.fence_changed.notify_all();
        }
    }

    /// Executes all queued work.
    pub fn advance(&self) {
        let mut state = self.state.lock();
        while state.step() {}
        self.fence_changed.notify_all();
    }

    /// Executes queued work until the fence reaches `value` or the queue runs dry.
    pub fn advance_to(&self, value: FenceValue) {
        let mut state = self.state.lock();
        while state.completed < value && state.step() {}
        self.fence_changed.notify_all();
    }

    /// Marks the device removed. Every subsequent submission or wait fails.
    pub fn lose_device(&self, reason: &str) {
        let mut state = self.state.lock();
        log::error!("Headless device lost: {reason}");
        state.lost = Some(reason.to_string());
        self.fence_changed.notify_all();
    }

    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.state.lock().queue.len()
    }

    #[must_use]
    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats
    }

    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        self.state.lock().validation_errors.clone()
    }

    /// State the GPU timeline has actually reached for `resource`.
    #[must_use]
    pub fn resource_state(&self, resource: RawResource) -> Option<ResourceState> {
        self.state.lock().resources.get(resource).map(|r| r.state)
    }

    #[must_use]
    pub fn resource_exists(&self, resource: RawResource) -> bool {
        self.state.lock().resources.contains_key(resource)
    }

    #[must_use]
    pub fn live_resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// Tightly packed contents of a texture.
    #[must_use]
    pub fn texture_contents(&self, resource: RawResource) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let res = state.resources.get(resource)?;
        Some(res.read(0, res.desc.byte_size() as usize))
    }

    #[must_use]
    pub fn last_viewport(&self) -> Option<Viewport> {
        self.state.lock().last_viewport
    }

    #[must_use]
    pub fn last_present(&self) -> Option<PresentParams> {
        self.state.lock().last_present
    }

    #[must_use]
    pub fn back_buffers(&self) -> Vec<RawResource> {
        self.state
            .lock()
            .swap_chain
            .as_ref()
            .map(|sc| sc.buffers.clone())
            .unwrap_or_default()
    }

    fn create_back_buffers(state: &mut DeviceState, desc: &SwapChainDesc) -> Vec<RawResource> {
        (0..desc.buffer_count)
            .map(|_| {
                state.stats.resources_created += 1;
                state.resources.insert(HeadlessResource {
                    desc: ResourceDesc::Texture(TextureDesc {
                        label: "Back Buffer",
                        width: desc.width,
                        height: desc.height,
                        format: desc.format,
                        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                            | wgpu::TextureUsages::COPY_SRC,
                        heap: HeapKind::DeviceLocal,
                    }),
                    state: ResourceState::Present,
                    data: Vec::new(),
                })
            })
            .collect()
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(HeadlessOptions::default())
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_resource(
        &self,
        desc: &ResourceDesc,
        initial_state: ResourceState,
    ) -> Result<RawResource> {
        let mut state = self.state.lock();
        state.check_lost()?;

        let fail = |reason: String| GlazeError::ResourceCreation {
            label: desc.label().to_string(),
            reason,
        };
        match desc {
            ResourceDesc::Texture(t) => {
                if t.width == 0
                    || t.height == 0
                    || t.width > MAX_TEXTURE_DIMENSION
                    || t.height > MAX_TEXTURE_DIMENSION
                {
                    return Err(fail(format!(
                        "unsupported texture size {}x{}",
                        t.width, t.height
                    )));
                }
                if t.heap != HeapKind::DeviceLocal {
                    return Err(fail("textures must live in the device-local heap".into()));
                }
            }
            ResourceDesc::Buffer(b) => {
                if b.size == 0 {
                    return Err(fail("zero-sized buffer".into()));
                }
            }
        }
        match (desc.heap(), initial_state) {
            (HeapKind::Upload, ResourceState::GenericRead)
            | (HeapKind::Readback, ResourceState::CopyDest)
            | (HeapKind::DeviceLocal, _) => {}
            (heap, s) => return Err(fail(format!("{heap:?} resources cannot start in {s:?}"))),
        }

        state.stats.resources_created += 1;
        Ok(state.resources.insert(HeadlessResource {
            desc: *desc,
            state: initial_state,
            data: Vec::new(),
        }))
    }

    fn destroy_resource(&self, resource: RawResource) {
        let mut state = self.state.lock();
        if state.is_referenced_by_queue(resource) {
            state.report(format!(
                "resource {resource:?} destroyed while queued work references it"
            ));
        }
        let is_back_buffer = state
            .swap_chain
            .as_ref()
            .is_some_and(|sc| sc.buffers.contains(&resource));
        if is_back_buffer {
            state.report(format!("back buffer {resource:?} destroyed outside the swap chain"));
            return;
        }
        if state.resources.remove(resource).is_some() {
            state.stats.resources_destroyed += 1;
        } else {
            log::warn!("destroy_resource: {resource:?} does not exist");
        }
    }

    fn write_buffer(&self, resource: RawResource, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let res = state
            .resources
            .get_mut(resource)
            .ok_or_else(|| GlazeError::InvalidResource(format!("{resource:?} does not exist")))?;
        if res.desc.heap() != HeapKind::Upload {
            return Err(GlazeError::InvalidResource(format!("{resource:?} is not CPU-writable")));
        }
        let end = offset as usize + data.len();
        if end as u64 > res.desc.byte_size() {
            return Err(GlazeError::InvalidResource(format!(
                "write of {} bytes at {offset} overflows {resource:?}",
                data.len()
            )));
        }
        res.storage_mut()[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, resource: RawResource, offset: u64, len: usize) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let res = state
            .resources
            .get(resource)
            .ok_or_else(|| GlazeError::InvalidResource(format!("{resource:?} does not exist")))?;
        if res.desc.heap() != HeapKind::Readback {
            return Err(GlazeError::InvalidResource(format!("{resource:?} is not CPU-readable")));
        }
        if offset + len as u64 > res.desc.byte_size() {
            return Err(GlazeError::InvalidResource(format!("read past the end of {resource:?}")));
        }
        Ok(res.read(offset as usize, len))
    }

    fn create_descriptor_heap(
        &self,
        category: DescriptorCategory,
        capacity: u32,
    ) -> Result<DescriptorHeapInfo> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if capacity == 0 {
            return Err(GlazeError::HeapCreation {
                category,
                reason: "capacity must be non-zero".into(),
            });
        }
        let region = (category.index() as u64 + 1) << 32;
        let info = DescriptorHeapInfo {
            cpu_base: region,
            gpu_base: category.is_shader_visible().then_some(region << 8),
            stride: DESCRIPTOR_STRIDE,
        };
        state.heaps[category.index()] = Some((info, capacity));
        Ok(info)
    }

    fn write_descriptor(&self, handle: CpuDescriptorHandle, view: DescriptorView) {
        let mut state = self.state.lock();
        if !state.in_any_heap(handle) {
            state.report(format!("descriptor write to {handle:?} outside every heap"));
            return;
        }
        state.descriptors.insert(handle.0, view);
    }

    fn create_command_allocator(&self) -> Result<RawAllocator> {
        let mut state = self.state.lock();
        state.check_lost()?;
        state.stats.allocators_created += 1;
        Ok(state.allocators.insert(AllocatorRecord::default()))
    }

    fn reset_command_allocator(&self, allocator: RawAllocator) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lost()?;
        let pending = match state.allocators.get(allocator) {
            Some(record) => record.pending_lists,
            None => {
                return Err(GlazeError::SubmissionFailed(format!(
                    "unknown allocator {allocator:?}"
                )))
            }
        };
        if pending > 0 {
            state.report(format!(
                "allocator {allocator:?} reset while {pending} submitted list(s) are still \
                 executing"
            ));
        }
        state.stats.allocator_resets += 1;
        Ok(())
    }

    fn destroy_command_allocator(&self, allocator: RawAllocator) {
        let mut state = self.state.lock();
        let Some(record) = state.allocators.remove(allocator) else {
            state.report(format!("destroy of unknown allocator {allocator:?}"));
            return;
        };
        // After device loss the queue never drains; nothing is left to protect.
        if record.pending_lists > 0 && state.lost.is_none() {
            state.report(format!(
                "allocator {allocator:?} destroyed while {} submitted list(s) are still executing",
                record.pending_lists
            ));
        }
        state.stats.allocators_destroyed += 1;
    }

    fn submit(&self, list: CommandList) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if !list.is_closed() {
            return Err(GlazeError::SubmissionFailed("command list was not closed".into()));
        }
        match state.allocators.get_mut(list.allocator()) {
            Some(record) => record.pending_lists += 1,
            None => {
                return Err(GlazeError::SubmissionFailed(format!(
                    "command list recorded on unknown allocator {:?}",
                    list.allocator()
                )));
            }
        }
        state.stats.submissions += 1;
        state.queue.push_back(QueueOp::Execute(list));
        self.drain_if_immediate(&mut state);
        Ok(())
    }

    fn signal(&self, value: FenceValue) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lost()?;
        state.queue.push_back(QueueOp::Signal(value));
        self.drain_if_immediate(&mut state);
        Ok(())
    }

    fn completed_fence_value(&self) -> FenceValue {
        self.state.lock().completed
    }

    fn wait_for_fence(&self, value: FenceValue, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            state.check_lost()?;
            if state.completed >= value {
                return Ok(());
            }
            if self.fence_changed.wait_until(&mut state, deadline).timed_out() {
                state.check_lost()?;
                if state.completed >= value {
                    return Ok(());
                }
                return Err(GlazeError::FenceTimeout { value, waited: timeout });
            }
        }
    }

    fn create_root_signature(&self, layout: RootLayout) -> Result<RawRootSignature> {
        let mut state = self.state.lock();
        state.check_lost()?;
        Ok(state.root_signatures.insert(layout))
    }

    fn compile_shader(
        &self,
        stage: ShaderStage,
        source: &str,
        entry_point: &str,
        profile: ShaderProfile,
    ) -> Result<ShaderBytecode> {
        let fail = |reason: String| GlazeError::ShaderCompilation {
            entry_point: entry_point.to_string(),
            profile: profile.as_str(),
            reason,
        };
        if !self.options.supported_profiles.contains(&profile) {
            return Err(fail(format!("shader model {} is not supported", profile.as_str())));
        }

        let module =
            naga::front::wgsl::parse_str(source).map_err(|e| fail(e.emit_to_string(source)))?;
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| fail(e.to_string()))?;

        let naga_stage = match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        };
        if !module
            .entry_points
            .iter()
            .any(|ep| ep.name == entry_point && ep.stage == naga_stage)
        {
            return Err(fail(format!("no {stage:?} entry point named '{entry_point}'")));
        }

        self.state.lock().stats.shaders_compiled += 1;
        Ok(ShaderBytecode {
            stage,
            profile,
            entry_point: entry_point.to_string(),
            bytes: source.as_bytes().into(),
        })
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<RawPipeline> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if !state.root_signatures.contains_key(desc.root_signature) {
            return Err(GlazeError::PipelineCreation(format!(
                "{}: unknown root signature",
                desc.label
            )));
        }
        if desc.vertex.stage != ShaderStage::Vertex
            || desc.fragment.stage != ShaderStage::Fragment
        {
            return Err(GlazeError::PipelineCreation(format!(
                "{}: shader stages swapped",
                desc.label
            )));
        }
        let ds = desc.depth_stencil;
        if (ds.depth_test || ds.depth_write) && desc.depth_format.is_none() {
            return Err(GlazeError::PipelineCreation(format!(
                "{}: depth testing requires a depth-stencil format",
                desc.label
            )));
        }
        if desc.color_format.is_depth_stencil_format() {
            return Err(GlazeError::PipelineCreation(format!(
                "{}: {:?} is not a color format",
                desc.label, desc.color_format
            )));
        }
        if desc.depth_format.is_some_and(|f| !f.is_depth_stencil_format()) {
            return Err(GlazeError::PipelineCreation(format!(
                "{}: {:?} is not a depth format",
                desc.label, desc.depth_format
            )));
        }
        state.stats.pipelines_created += 1;
        Ok(state.pipelines.insert(desc.root_signature))
    }

    fn destroy_pipeline(&self, pipeline: RawPipeline) {
        self.state.lock().pipelines.remove(pipeline);
    }

    fn supports_tearing(&self) -> bool {
        self.options.supports_tearing
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<Vec<RawResource>> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if desc.width == 0 || desc.height == 0 {
            return Err(GlazeError::SwapChainCreation(format!(
                "invalid size {}x{}",
                desc.width, desc.height
            )));
        }
        if !(2..=16).contains(&desc.buffer_count) {
            return Err(GlazeError::SwapChainCreation(format!(
                "invalid buffer count {}",
                desc.buffer_count
            )));
        }
        if state.swap_chain.is_some() {
            return Err(GlazeError::SwapChainCreation("a swap chain already exists".into()));
        }
        let buffers = Self::create_back_buffers(&mut state, desc);
        state.swap_chain = Some(SwapChain {
            desc: *desc,
            buffers: buffers.clone(),
            index: 0,
        });
        Ok(buffers)
    }

    fn resize_swap_chain(&self, width: u32, height: u32) -> Result<Vec<RawResource>> {
        let mut state = self.state.lock();
        state.check_lost()?;
        let Some(old) = state.swap_chain.take() else {
            return Err(GlazeError::SwapChainCreation("no swap chain to resize".into()));
        };
        for &buffer in &old.buffers {
            if state.is_referenced_by_queue(buffer) {
                state.report(format!(
                    "swap chain resized while back buffer {buffer:?} is in flight"
                ));
            }
            state.resources.remove(buffer);
            state.stats.resources_destroyed += 1;
        }
        let desc = SwapChainDesc { width, height, ..old.desc };
        let buffers = Self::create_back_buffers(&mut state, &desc);
        state.swap_chain = Some(SwapChain {
            desc,
            buffers: buffers.clone(),
            index: 0,
        });
        Ok(buffers)
    }

    fn current_back_buffer_index(&self) -> usize {
        self.state.lock().swap_chain.as_ref().map_or(0, |sc| sc.index)
    }

    fn present(&self, params: PresentParams) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if params.allow_tearing && (!self.options.supports_tearing || params.sync_interval != 0) {
            return Err(GlazeError::PresentFailed(
                "tearing requires device support and a sync interval of 0".into(),
            ));
        }
        let Some(sc) = state.swap_chain.as_mut() else {
            return Err(GlazeError::PresentFailed("no swap chain".into()));
        };
        let buffer = sc.buffers[sc.index];
        sc.index = (sc.index + 1) % sc.buffers.len();

        state.stats.presents += 1;
        if params.allow_tearing {
            state.stats.tearing_presents += 1;
        }
        state.last_present = Some(params);
        state.queue.push_back(QueueOp::Present(buffer));
        self.drain_if_immediate(&mut state);
        Ok(())
    }
}
