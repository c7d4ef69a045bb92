// SPDX-License-Identifier: CEPL-1.0
//! GLSL -> SPIR-V at pipeline build time.
//!
//! Sources are looked up through `ResourcePaths`; the shipped shaders are
//! compiled in as a fallback so a bare binary still runs.

use std::path::Path;

use prism_core::{ResourceKind, ResourcePaths};
use tracing::{debug, info};

use crate::error::{VkError, VkResult};

pub const DEFAULT_VERTEX: &str = "mesh.vert";
pub const DEFAULT_FRAGMENT: &str = "mesh.frag";

const EMBEDDED: &[(&str, &str)] = &[
    (DEFAULT_VERTEX, include_str!("../shaders/mesh.vert")),
    (DEFAULT_FRAGMENT, include_str!("../shaders/mesh.frag")),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

pub trait ShaderCompiler {
    fn compile(&self, source: &str, name: &str, stage: ShaderStage) -> VkResult<Vec<u32>>;
}

pub struct GlslCompiler {
    compiler: shaderc::Compiler,
}

impl GlslCompiler {
    pub fn new() -> VkResult<Self> {
        let compiler = shaderc::Compiler::new()
            .into_iter()
            .next()
            .ok_or_else(|| VkError::ShaderCompile {
                name: "<init>".into(),
                message: "shaderc compiler unavailable".into(),
            })?;
        Ok(Self { compiler })
    }
}

impl ShaderCompiler for GlslCompiler {
    fn compile(&self, source: &str, name: &str, stage: ShaderStage) -> VkResult<Vec<u32>> {
        let err = |message: String| VkError::ShaderCompile {
            name: name.to_string(),
            message,
        };
        let mut opts = shaderc::CompileOptions::new()
            .into_iter()
            .next()
            .ok_or_else(|| err("compile options unavailable".into()))?;
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let kind = match stage {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        };
        let artifact = self
            .compiler
            .compile_into_spirv(source, kind, name, "main", Some(&opts))
            .map_err(|e| err(e.to_string()))?;
        if artifact.get_num_warnings() > 0 {
            debug!("shader {}: {}", name, artifact.get_warning_messages());
        }
        Ok(artifact.as_binary().to_vec())
    }
}

pub fn embedded_source(name: &str) -> Option<&'static str> {
    EMBEDDED
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, src)| *src)
}

/// Source text for `name`: a file found through `paths`, else the embedded
/// copy of the same name.
pub fn load_source(paths: &ResourcePaths, name: &str) -> VkResult<String> {
    if let Some(path) = paths.resolve(ResourceKind::Shader, name) {
        info!("shader {} from {}", name, path.display());
        return std::fs::read_to_string(&path).map_err(|e| VkError::ShaderCompile {
            name: name.to_string(),
            message: format!("read {}: {e}", path.display()),
        });
    }
    let base = Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    embedded_source(base)
        .map(|src| {
            info!("shader {} (embedded)", name);
            src.to_string()
        })
        .ok_or_else(|| VkError::ShaderCompile {
            name: name.to_string(),
            message: "not found in any resource root".into(),
        })
}

pub fn compile_stage(
    compiler: &dyn ShaderCompiler,
    paths: &ResourcePaths,
    name: &str,
    stage: ShaderStage,
) -> VkResult<Vec<u32>> {
    let source = load_source(paths, name)?;
    compiler.compile(&source, name, stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records what it was asked to compile; emits one word per source line.
    #[derive(Default)]
    struct Recording(RefCell<Vec<(String, ShaderStage)>>);

    impl ShaderCompiler for Recording {
        fn compile(&self, source: &str, name: &str, stage: ShaderStage) -> VkResult<Vec<u32>> {
            self.0.borrow_mut().push((name.to_string(), stage));
            Ok(vec![0x0723_0203; source.lines().count()])
        }
    }

    #[test]
    fn embedded_shaders_are_the_fallback() {
        let paths = ResourcePaths::new(["/no/such/root"]);
        let src = load_source(&paths, DEFAULT_VERTEX).unwrap();
        assert!(src.contains("#version 450"));
        assert!(src.contains("ubo.proj"));
        assert!(load_source(&paths, "shaders/mesh.frag").unwrap().contains("texSampler"));
    }

    #[test]
    fn unknown_shader_is_an_error() {
        let paths = ResourcePaths::new(["/no/such/root"]);
        let err = load_source(&paths, "missing.vert").unwrap_err();
        assert!(matches!(err, VkError::ShaderCompile { .. }));
    }

    #[test]
    fn file_on_disk_wins_over_embedded() {
        let dir = std::env::temp_dir().join(format!("prism-shader-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("shaders")).unwrap();
        std::fs::write(dir.join("shaders").join(DEFAULT_FRAGMENT), "a\nb\nc\n").unwrap();

        let paths = ResourcePaths::new([dir]);
        let rec = Recording::default();
        let words = compile_stage(&rec, &paths, DEFAULT_FRAGMENT, ShaderStage::Fragment).unwrap();
        assert_eq!(words.len(), 3);
        assert_eq!(
            rec.0.borrow().as_slice(),
            &[(DEFAULT_FRAGMENT.to_string(), ShaderStage::Fragment)]
        );
    }
}
