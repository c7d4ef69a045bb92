// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use prism_core::ResourcePaths;
use prism_render::DevicePolicy;
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_CONFIG: &str = "prism.toml";

#[derive(Debug, Deserialize, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
    #[serde(default)]
    pub assets: AssetsCfg,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "prism".into(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DevicePolicyCfg {
    #[default]
    FirstGpu,
    PreferDiscrete,
}

impl From<DevicePolicyCfg> for DevicePolicy {
    fn from(p: DevicePolicyCfg) -> Self {
        match p {
            DevicePolicyCfg::FirstGpu => DevicePolicy::FirstGpu,
            DevicePolicyCfg::PreferDiscrete => DevicePolicy::PreferDiscrete,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    /// FIFO instead of mailbox/immediate.
    pub vsync: bool,
    /// Upper bound on MSAA samples.
    pub msaa: u32,
    pub validation: bool,
    pub device_policy: DevicePolicyCfg,
    pub mipmaps: bool,
    pub fov: f32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vsync: false,
            msaa: 64,
            validation: cfg!(debug_assertions),
            device_policy: DevicePolicyCfg::FirstGpu,
            mipmaps: true,
            fov: 90.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssetsCfg {
    pub model: String,
    pub texture: String,
    pub vertex_shader: String,
    pub fragment_shader: String,
    /// Searched after `./` and `$PRISM_HOME/data/`.
    pub roots: Vec<PathBuf>,
}

impl Default for AssetsCfg {
    fn default() -> Self {
        AssetsCfg {
            model: "scene.obj".into(),
            texture: "scene.png".into(),
            vertex_shader: prism_render_vk::shader::DEFAULT_VERTEX.into(),
            fragment_shader: prism_render_vk::shader::DEFAULT_FRAGMENT.into(),
            roots: Vec::new(),
        }
    }
}

impl AssetsCfg {
    pub fn resource_paths(&self) -> ResourcePaths {
        let mut paths = ResourcePaths::from_env();
        for root in &self.roots {
            paths.push_root(root);
        }
        paths
    }
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Missing file means defaults; a broken one is reported and ignored.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => match Self::parse(&s) {
                Ok(cfg) => {
                    info!("config {}", path.display());
                    cfg
                }
                Err(e) => {
                    warn!("config {} ignored: {e}", path.display());
                    AppCfg::default()
                }
            },
            Err(_) => AppCfg::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppCfg::parse("").unwrap();
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.render.msaa, 64);
        assert_eq!(cfg.render.device_policy, DevicePolicyCfg::FirstGpu);
        assert_eq!(cfg.assets.vertex_shader, "mesh.vert");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [render]
            vsync = true
            device_policy = "prefer_discrete"

            [assets]
            model = "viking_room.obj"
            roots = ["/opt/prism"]
            "#,
        )
        .unwrap();
        assert!(cfg.render.vsync);
        assert_eq!(
            DevicePolicy::from(cfg.render.device_policy),
            DevicePolicy::PreferDiscrete
        );
        assert!(cfg.render.mipmaps);
        assert_eq!(cfg.assets.model, "viking_room.obj");
        assert_eq!(cfg.assets.texture, "scene.png");
        assert!(cfg
            .assets
            .resource_paths()
            .roots()
            .contains(&PathBuf::from("/opt/prism")));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(AppCfg::parse("[render]\ndevice_policy = \"fastest\"").is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let cfg = AppCfg::load(Path::new("/no/such/prism.toml"));
        assert_eq!(cfg.window.title, "prism");
    }
}
