// SPDX-License-Identifier: CEPL-1.0
//! Resource lookup for shaders, textures and models.
//!
//! A `ResourcePaths` is built once at startup and handed to whoever needs to
//! find files on disk. There is no process-wide instance.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Environment variable naming an extra data root (`$PRISM_HOME/data/`).
pub const HOME_VAR: &str = "PRISM_HOME";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Shader,
    Texture,
    Model,
}

impl ResourceKind {
    pub fn subdir(self) -> &'static str {
        match self {
            ResourceKind::Shader => "shaders",
            ResourceKind::Texture => "textures",
            ResourceKind::Model => "models",
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind:?} resource `{name}` not found (searched {searched} directories)")]
pub struct ResourceNotFound {
    pub kind: ResourceKind,
    pub name: String,
    pub searched: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ResourcePaths {
    roots: Vec<PathBuf>,
}

impl ResourcePaths {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    /// `./` plus `$PRISM_HOME/data/` when the variable is set.
    pub fn from_env() -> Self {
        let mut roots = vec![PathBuf::from(".")];
        if let Some(home) = std::env::var_os(HOME_VAR) {
            roots.push(PathBuf::from(home).join("data"));
        }
        Self { roots }
    }

    pub fn push_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Directories searched for `kind`, in priority order. Only existing
    /// directories are returned.
    pub fn search_dirs(&self, kind: ResourceKind) -> Vec<PathBuf> {
        let mut dirs = Vec::with_capacity(self.roots.len() * 2);
        for root in &self.roots {
            if root.is_dir() {
                dirs.push(root.clone());
            }
            let sub = root.join(kind.subdir());
            if sub.is_dir() {
                dirs.push(sub);
            }
        }
        dirs
    }

    pub fn resolve(&self, kind: ResourceKind, name: impl AsRef<Path>) -> Option<PathBuf> {
        let name = name.as_ref();
        if name.is_absolute() {
            return name.is_file().then(|| name.to_path_buf());
        }
        let found = self
            .search_dirs(kind)
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|p| p.is_file());
        debug!("resolve {:?} {} -> {:?}", kind, name.display(), found);
        found
    }

    pub fn require(
        &self,
        kind: ResourceKind,
        name: impl AsRef<Path>,
    ) -> Result<PathBuf, ResourceNotFound> {
        let name = name.as_ref();
        self.resolve(kind, name).ok_or_else(|| ResourceNotFound {
            kind,
            name: name.display().to_string(),
            searched: self.search_dirs(kind).len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scratch_dir() -> PathBuf {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "prism-paths-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn kind_subdir_is_searched_after_root() {
        let root = scratch_dir();
        fs::create_dir_all(root.join("shaders")).unwrap();
        fs::write(root.join("shaders").join("mesh.vert"), "x").unwrap();

        let paths = ResourcePaths::new([root.clone()]);
        assert_eq!(
            paths.resolve(ResourceKind::Shader, "mesh.vert"),
            Some(root.join("shaders").join("mesh.vert"))
        );
        assert_eq!(paths.resolve(ResourceKind::Texture, "mesh.vert"), None);
    }

    #[test]
    fn earlier_root_wins() {
        let a = scratch_dir();
        let b = scratch_dir();
        fs::write(a.join("tex.png"), "a").unwrap();
        fs::create_dir_all(b.join("textures")).unwrap();
        fs::write(b.join("textures").join("tex.png"), "b").unwrap();

        let paths = ResourcePaths::new([a.clone(), b]);
        assert_eq!(
            paths.resolve(ResourceKind::Texture, "tex.png"),
            Some(a.join("tex.png"))
        );
    }

    #[test]
    fn missing_roots_are_skipped() {
        let paths = ResourcePaths::new(["/definitely/not/here"]);
        assert!(paths.search_dirs(ResourceKind::Model).is_empty());
        let err = paths.require(ResourceKind::Model, "cube.obj").unwrap_err();
        assert_eq!(err.searched, 0);
        assert_eq!(err.name, "cube.obj");
    }
}
