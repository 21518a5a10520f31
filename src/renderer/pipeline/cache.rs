//! Pipeline State Cache
//!
//! Memoizes compiled pipelines by [`PipelineStateKey`]. On a miss the
//! shader variant is picked from the blend mode, fixed-function state comes
//! from the lookup tables in [`tables`](super::tables), and the pipeline is
//! bound to one of the two precomputed root signatures.
//!
//! A failed build returns `None`. It is logged at `error` level the first
//! time a key fails and at `debug` afterwards; every request retries.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::Result;
use crate::hal::{
    GpuDevice, PipelineDesc, RawPipeline, RawRootSignature, RootLayout, ShaderStage,
};

use super::pipeline_key::{PipelineStateKey, fx_hash_key};
use super::shader_manager::{ShaderManager, ShaderVariant};
use super::tables::{blend_state, depth_stencil_desc, raster_desc};

/// A ready-to-bind pipeline.
#[derive(Debug, PartialEq, Eq)]
pub struct PipelineState {
    pub raw: RawPipeline,
    pub root_signature: RawRootSignature,
    pub root_layout: RootLayout,
    pub key: PipelineStateKey,
}

pub struct PipelineCache {
    device: Arc<dyn GpuDevice>,
    shaders: ShaderManager,
    root_signatures: [Option<RawRootSignature>; RootLayout::COUNT],
    pipelines: FxHashMap<PipelineStateKey, Arc<PipelineState>>,
    failed: FxHashSet<PipelineStateKey>,
    builds: u64,
}

impl PipelineCache {
    #[must_use]
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self {
            device,
            shaders: ShaderManager::new(),
            root_signatures: [None; RootLayout::COUNT],
            pipelines: FxHashMap::default(),
            failed: FxHashSet::default(),
            builds: 0,
        }
    }

    /// Creates both root signatures and warms `default_key`.
    ///
    /// Root signature failure is fatal; a warm-up failure is only logged.
    pub fn initialize(&mut self, default_key: &PipelineStateKey) -> Result<()> {
        for layout in RootLayout::ALL {
            self.root_signature(layout)?;
        }
        if self.get(default_key).is_none() {
            log::warn!("Default overlay pipeline unavailable after warm-up");
        }
        Ok(())
    }

    pub fn root_signature(&mut self, layout: RootLayout) -> Result<RawRootSignature> {
        if let Some(raw) = self.root_signatures[layout.index()] {
            return Ok(raw);
        }
        let raw = self.device.create_root_signature(layout)?;
        self.root_signatures[layout.index()] = Some(raw);
        Ok(raw)
    }

    /// Cached pipeline for `key`, building it on first request.
    pub fn get(&mut self, key: &PipelineStateKey) -> Option<Arc<PipelineState>> {
        if let Some(pipeline) = self.pipelines.get(key) {
            return Some(pipeline.clone());
        }

        match self.build(key) {
            Ok(pipeline) => {
                let pipeline = Arc::new(pipeline);
                self.failed.remove(key);
                self.pipelines.insert(*key, pipeline.clone());
                Some(pipeline)
            }
            Err(e) => {
                if self.failed.insert(*key) {
                    log::error!("Pipeline {:016x} ({key:?}) failed: {e}", fx_hash_key(key));
                } else {
                    log::debug!("Pipeline {:016x} still failing: {e}", fx_hash_key(key));
                }
                None
            }
        }
    }

    fn build(&mut self, key: &PipelineStateKey) -> Result<PipelineState> {
        let layout = key.root_layout();
        let root_signature = self.root_signature(layout)?;

        let variant = if key.blend.is_textured() {
            ShaderVariant::Textured
        } else {
            ShaderVariant::Flat
        };
        let device = self.device.as_ref();
        let vertex = self
            .shaders
            .get_or_compile(device, variant, ShaderStage::Vertex, key.profile)?;
        let fragment = self
            .shaders
            .get_or_compile(device, variant, ShaderStage::Fragment, key.profile)?;

        let desc = PipelineDesc {
            label: "Overlay Pipeline",
            root_signature,
            vertex: &vertex,
            fragment: &fragment,
            blend: blend_state(key.blend),
            raster: raster_desc(key.raster),
            depth_stencil: depth_stencil_desc(key.depth),
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            color_format: key.color_format,
            depth_format: key.depth_format,
        };
        let raw = self.device.create_pipeline(&desc)?;
        self.builds += 1;
        log::debug!("Built pipeline {:016x}: {key:?}", fx_hash_key(key));

        Ok(PipelineState {
            raw,
            root_signature,
            root_layout: layout,
            key: *key,
        })
    }

    /// Destroys every cached pipeline. The GPU must be idle.
    pub fn clear(&mut self) {
        for (_, pipeline) in self.pipelines.drain() {
            self.device.destroy_pipeline(pipeline.raw);
        }
        self.failed.clear();
        self.shaders.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Pipelines built since creation.
    #[must_use]
    pub fn build_count(&self) -> u64 {
        self.builds
    }

    #[must_use]
    pub fn shader_module_count(&self) -> usize {
        self.shaders.module_count()
    }
}
