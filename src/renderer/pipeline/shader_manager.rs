//! Shader Template Manager
//!
//! Overlay shaders are WGSL templates rendered with minijinja and embedded
//! with rust-embed. The rendered source is hashed with xxh3 and compiled
//! bytecode is cached per (source hash, stage, profile), so two keys that
//! share a variant compile each stage once.

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use minijinja::{Environment, Error, ErrorKind, context, syntax::SyntaxConfig};
use rust_embed::RustEmbed;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_128;

use crate::errors::Result;
use crate::hal::{GpuDevice, ShaderBytecode, ShaderProfile, ShaderStage};

pub const OVERLAY_TEMPLATE: &str = "overlay";
pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

static SHADER_ENV: OnceLock<Environment<'static>> = OnceLock::new();

#[derive(RustEmbed)]
#[folder = "src/renderer/pipeline/shaders"]
struct ShaderAssets;

fn get_env() -> &'static Environment<'static> {
    SHADER_ENV.get_or_init(|| {
        let mut env = Environment::new();

        let syntax = SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .build()
            .expect("Failed to configure shader template syntax");

        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        env.set_loader(shader_loader);
        env
    })
}

fn shader_loader(name: &str) -> std::result::Result<Option<String>, Error> {
    let filename = if std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wgsl"))
    {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.wgsl"))
    };

    match ShaderAssets::get(&filename) {
        Some(file) => std::str::from_utf8(file.data.as_ref())
            .map(|s| Some(s.to_string()))
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("{filename}: {e}"))),
        None => Ok(None),
    }
}

/// Which fragment path a template is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    /// Samples the overlay texture.
    Textured,
    /// Outputs a constant color.
    Flat,
}

/// Renders the overlay template for `variant`.
pub fn render_overlay_source(variant: ShaderVariant) -> Result<String> {
    let template = get_env().get_template(OVERLAY_TEMPLATE)?;
    let source = template.render(context! {
        textured => variant == ShaderVariant::Textured,
        flat_color => "vec4<f32>(1.0, 1.0, 1.0, 1.0)",
    })?;
    Ok(source)
}

type ModuleKey = (u128, ShaderStage, ShaderProfile);

#[derive(Default)]
pub struct ShaderManager {
    sources: FxHashMap<ShaderVariant, Arc<str>>,
    modules: FxHashMap<ModuleKey, Arc<ShaderBytecode>>,
}

impl ShaderManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn source(&mut self, variant: ShaderVariant) -> Result<Arc<str>> {
        if let Some(src) = self.sources.get(&variant) {
            return Ok(src.clone());
        }
        let src: Arc<str> = render_overlay_source(variant)?.into();
        self.sources.insert(variant, src.clone());
        Ok(src)
    }

    /// Compiled bytecode for one stage of `variant`, compiling on first use.
    pub fn get_or_compile(
        &mut self,
        device: &dyn GpuDevice,
        variant: ShaderVariant,
        stage: ShaderStage,
        profile: ShaderProfile,
    ) -> Result<Arc<ShaderBytecode>> {
        let source = self.source(variant)?;
        let key = (xxh3_128(source.as_bytes()), stage, profile);
        if let Some(module) = self.modules.get(&key) {
            return Ok(module.clone());
        }

        let entry = match stage {
            ShaderStage::Vertex => VERTEX_ENTRY,
            ShaderStage::Fragment => FRAGMENT_ENTRY,
        };
        let module = Arc::new(device.compile_shader(stage, &source, entry, profile)?);
        log::debug!(
            "Compiled {variant:?} {stage:?} shader for profile {}",
            profile.as_str()
        );
        self.modules.insert(key, module.clone());
        Ok(module)
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn clear(&mut self) {
        self.modules.clear();
    }
}
