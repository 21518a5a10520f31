//! Plain data types shared between the core and a [`GpuDevice`](super::GpuDevice).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

slotmap::new_key_type! {
    /// Device-side handle to a buffer or texture.
    pub struct RawResource;
    /// Device-side handle to a command allocator.
    pub struct RawAllocator;
    /// Device-side handle to a compiled pipeline.
    pub struct RawPipeline;
    /// Device-side handle to a root signature.
    pub struct RawRootSignature;
}

/// Monotonic value signaled on the queue fence.
pub type FenceValue = u64;

/// Row pitch alignment required for buffer/texture copies.
pub const ROW_PITCH_ALIGNMENT: u32 = 256;

// ─── Resource States ───────────────────────────────────────────────────────

/// The usage a resource is currently prepared for.
///
/// Moving between states requires a barrier on the command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    CopyDest,
    CopySource,
    PixelShaderResource,
    /// Permanent state of upload-heap buffers.
    GenericRead,
}

// ─── Heaps & Classes ───────────────────────────────────────────────────────

/// Memory heap a resource is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeapKind {
    DeviceLocal,
    /// CPU-writable, GPU-readable.
    Upload,
    /// GPU-writable, CPU-readable.
    Readback,
}

/// Accounting bucket for cached resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceClass {
    Texture,
    Buffer,
    UploadBuffer,
    ReadbackBuffer,
    RenderTarget,
    DepthStencil,
}

impl ResourceClass {
    pub const COUNT: usize = 6;
    pub const ALL: [Self; Self::COUNT] = [
        Self::Texture,
        Self::Buffer,
        Self::UploadBuffer,
        Self::ReadbackBuffer,
        Self::RenderTarget,
        Self::DepthStencil,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

// ─── Resource Descriptions ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
    pub heap: HeapKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
    pub heap: HeapKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDesc {
    Texture(TextureDesc),
    Buffer(BufferDesc),
}

/// Bytes per texel for a color or depth format, as stored in copies.
#[inline]
#[must_use]
pub fn bytes_per_pixel(format: wgpu::TextureFormat) -> u32 {
    format.block_copy_size(None).unwrap_or(4)
}

impl ResourceDesc {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Texture(t) => t.label,
            Self::Buffer(b) => b.label,
        }
    }

    #[must_use]
    pub fn heap(&self) -> HeapKind {
        match self {
            Self::Texture(t) => t.heap,
            Self::Buffer(b) => b.heap,
        }
    }

    /// Memory footprint in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        match self {
            Self::Texture(t) => {
                u64::from(t.width) * u64::from(t.height) * u64::from(bytes_per_pixel(t.format))
            }
            Self::Buffer(b) => b.size,
        }
    }

    #[must_use]
    pub fn class(&self) -> ResourceClass {
        match self {
            Self::Buffer(b) => match b.heap {
                HeapKind::Upload => ResourceClass::UploadBuffer,
                HeapKind::Readback => ResourceClass::ReadbackBuffer,
                HeapKind::DeviceLocal => ResourceClass::Buffer,
            },
            Self::Texture(t) => {
                if t.usage.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
                    if t.format.is_depth_stencil_format() {
                        ResourceClass::DepthStencil
                    } else {
                        ResourceClass::RenderTarget
                    }
                } else {
                    ResourceClass::Texture
                }
            }
        }
    }
}

/// A live device resource and the description it was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuResource {
    pub raw: RawResource,
    pub desc: ResourceDesc,
}

impl GpuResource {
    #[must_use]
    pub fn texture_desc(&self) -> Option<&TextureDesc> {
        match &self.desc {
            ResourceDesc::Texture(t) => Some(t),
            ResourceDesc::Buffer(_) => None,
        }
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.desc.byte_size()
    }
}

// ─── Copy Layout ───────────────────────────────────────────────────────────

/// Layout of a texture image inside a linear buffer.
///
/// Rows are `row_pitch` bytes apart, which is the tight row size rounded up
/// to [`ROW_PITCH_ALIGNMENT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlacedFootprint {
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub row_pitch: u32,
}

impl PlacedFootprint {
    #[must_use]
    pub fn for_texture(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        let tight = width * bytes_per_pixel(format);
        Self {
            offset: 0,
            width,
            height,
            format,
            row_pitch: tight.next_multiple_of(ROW_PITCH_ALIGNMENT),
        }
    }

    /// Unpadded bytes in one row.
    #[inline]
    #[must_use]
    pub fn tight_row_bytes(&self) -> u32 {
        self.width * bytes_per_pixel(self.format)
    }

    /// Buffer bytes needed to hold the footprint, starting at `offset`.
    #[inline]
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.offset + u64::from(self.row_pitch) * u64::from(self.height)
    }

    /// Writes tightly packed rows from `src` into `dst` at the pitched layout.
    pub fn pitch_rows(&self, src: &[u8], dst: &mut Vec<u8>) {
        let tight = self.tight_row_bytes() as usize;
        let pitch = self.row_pitch as usize;
        dst.clear();
        dst.resize(pitch * self.height as usize, 0);
        for (row, chunk) in src.chunks_exact(tight).take(self.height as usize).enumerate() {
            dst[row * pitch..row * pitch + tight].copy_from_slice(chunk);
        }
    }

    /// Inverse of [`pitch_rows`](Self::pitch_rows).
    #[must_use]
    pub fn unpitch_rows(&self, src: &[u8]) -> Vec<u8> {
        let tight = self.tight_row_bytes() as usize;
        let pitch = self.row_pitch as usize;
        let mut out = Vec::with_capacity(tight * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * pitch;
            out.extend_from_slice(&src[start..start + tight]);
        }
        out
    }
}

// ─── Descriptors ───────────────────────────────────────────────────────────

/// One descriptor heap per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DescriptorCategory {
    RenderTarget,
    DepthStencil,
    ShaderResource,
    Sampler,
}

impl DescriptorCategory {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [
        Self::RenderTarget,
        Self::DepthStencil,
        Self::ShaderResource,
        Self::Sampler,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Shader-visible heaps also expose GPU handles.
    #[inline]
    #[must_use]
    pub const fn is_shader_visible(self) -> bool {
        matches!(self, Self::ShaderResource | Self::Sampler)
    }
}

/// CPU address of a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle(pub u64);

/// GPU address of a shader-visible descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    /// Sentinel meaning "nothing to bind".
    pub const INVALID: Self = Self(0);

    #[inline]
    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Base addresses and increment of a created heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    pub cpu_base: u64,
    /// Present only for shader-visible heaps.
    pub gpu_base: Option<u64>,
    pub stride: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDesc {
    pub filter: wgpu::FilterMode,
    pub address_mode: wgpu::AddressMode,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: wgpu::FilterMode::Linear,
            address_mode: wgpu::AddressMode::ClampToEdge,
        }
    }
}

/// What a descriptor slot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorView {
    RenderTarget(RawResource),
    DepthStencil(RawResource),
    ShaderResource(RawResource),
    Sampler(SamplerDesc),
}

// ─── Pipelines ─────────────────────────────────────────────────────────────

/// Shader bytecode target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShaderProfile {
    #[default]
    Model5_1,
    Model6_0,
}

impl ShaderProfile {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Model5_1 => "5_1",
            Self::Model6_0 => "6_0",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Compiled output of [`GpuDevice::compile_shader`](super::GpuDevice::compile_shader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBytecode {
    pub stage: ShaderStage,
    pub profile: ShaderProfile,
    pub entry_point: String,
    pub bytes: Arc<[u8]>,
}

/// The two root parameter layouts used by overlay pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootLayout {
    /// No bound resources.
    Empty,
    /// Table 0: one texture. Table 1: one sampler.
    TextureSampler,
}

impl RootLayout {
    pub const COUNT: usize = 2;
    pub const ALL: [Self; Self::COUNT] = [Self::Empty, Self::TextureSampler];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Number of descriptor tables the layout expects.
    #[inline]
    #[must_use]
    pub const fn table_count(self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::TextureSampler => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterDesc {
    pub polygon_mode: wgpu::PolygonMode,
    pub cull_mode: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub depth_clip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare: wgpu::CompareFunction,
}

/// Everything the device needs to build a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDesc<'a> {
    pub label: &'static str,
    pub root_signature: RawRootSignature,
    pub vertex: &'a ShaderBytecode,
    pub fragment: &'a ShaderBytecode,
    pub blend: Option<wgpu::BlendState>,
    pub raster: RasterDesc,
    pub depth_stencil: DepthStencilDesc,
    pub topology: wgpu::PrimitiveTopology,
    pub color_format: wgpu::TextureFormat,
    pub depth_format: Option<wgpu::TextureFormat>,
}

// ─── Swap Chain ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub buffer_count: u32,
    /// Request tearing support, honored only if the device has it.
    pub allow_tearing: bool,
}

/// Presentation parameters for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentParams {
    /// 0 presents immediately, 1 waits for vertical blank.
    pub sync_interval: u32,
    pub allow_tearing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_pitch_is_aligned() {
        let fp = PlacedFootprint::for_texture(300, 2, wgpu::TextureFormat::Bgra8Unorm);
        assert_eq!(fp.tight_row_bytes(), 1200);
        assert_eq!(fp.row_pitch, 1280);
        assert_eq!(fp.total_bytes(), 2560);
    }

    #[test]
    fn pitching_preserves_rows() {
        let fp = PlacedFootprint::for_texture(3, 2, wgpu::TextureFormat::Rgba8Unorm);
        let src: Vec<u8> = (0..24).collect();
        let mut pitched = Vec::new();
        fp.pitch_rows(&src, &mut pitched);
        assert_eq!(pitched.len(), 512);
        assert_eq!(&pitched[256..268], &src[12..24]);
        assert_eq!(fp.unpitch_rows(&pitched), src);
    }

    #[test]
    fn render_attachments_are_classified_by_format() {
        let mut desc = TextureDesc {
            label: "t",
            width: 4,
            height: 4,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            heap: HeapKind::DeviceLocal,
        };
        assert_eq!(ResourceDesc::Texture(desc).class(), ResourceClass::DepthStencil);
        desc.format = wgpu::TextureFormat::Rgba8Unorm;
        assert_eq!(ResourceDesc::Texture(desc).class(), ResourceClass::RenderTarget);
        desc.usage = wgpu::TextureUsages::TEXTURE_BINDING;
        assert_eq!(ResourceDesc::Texture(desc).class(), ResourceClass::Texture);
        assert_eq!(ResourceDesc::Texture(desc).byte_size(), 64);
    }
}
