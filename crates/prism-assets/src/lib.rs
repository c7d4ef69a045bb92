// SPDX-License-Identifier: CEPL-1.0
//! Asset collaborators: image decode and OBJ meshes, plus a built-in scene
//! used when nothing is found on disk.
use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use prism_render::{ImageData, MeshData, Vertex};
use tracing::info;

/// Decode any supported image into RGBA8.
pub fn load_image(path: &Path) -> Result<ImageData> {
    let img = image::open(path)
        .with_context(|| format!("decode image {}", path.display()))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    info!("texture {} ({}x{})", path.display(), width, height);
    Ok(ImageData {
        pixels: img.into_raw(),
        width,
        height,
    })
}

/// Load a triangulated OBJ. Vertices are deduplicated on full equality.
/// A file without faces is an error so callers fall back to a built-in mesh.
pub fn load_mesh(path: &Path) -> Result<MeshData> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("parse mesh {}", path.display()))?;

    let mut corners = Vec::new();
    for model in &models {
        let mesh = &model.mesh;
        for &index in &mesh.indices {
            let i = index as usize;
            let tex_coord = if mesh.texcoords.len() >= 2 * i + 2 {
                // OBJ puts v=0 at the bottom, Vulkan samples top-down.
                [mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1]]
            } else {
                [0.0, 0.0]
            };
            corners.push(Vertex {
                pos: [
                    mesh.positions[3 * i],
                    mesh.positions[3 * i + 1],
                    mesh.positions[3 * i + 2],
                ],
                color: [1.0, 1.0, 1.0],
                tex_coord,
            });
        }
    }

    let data = dedup_vertices(corners);
    if data.indices.is_empty() {
        bail!("mesh {} has no faces", path.display());
    }
    info!(
        "mesh {} ({} vertices, {} indices)",
        path.display(),
        data.vertices.len(),
        data.indices.len()
    );
    Ok(data)
}

/// Collapse a triangle-corner stream into unique vertices + indices.
pub fn dedup_vertices<I>(corners: I) -> MeshData
where
    I: IntoIterator<Item = Vertex>,
{
    let mut unique: HashMap<Vertex, u32> = HashMap::new();
    let mut out = MeshData::default();
    for v in corners {
        let idx = *unique.entry(v).or_insert_with(|| {
            out.vertices.push(v);
            (out.vertices.len() - 1) as u32
        });
        out.indices.push(idx);
    }
    out
}

/// Two stacked textured quads.
pub fn fallback_mesh() -> MeshData {
    let quad = |z: f32| {
        [
            ([-0.5, -0.5, z], [1.0, 0.0, 0.0], [1.0, 0.0]),
            ([0.5, -0.5, z], [0.0, 1.0, 0.0], [0.0, 0.0]),
            ([0.5, 0.5, z], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ([-0.5, 0.5, z], [1.0, 1.0, 1.0], [1.0, 1.0]),
        ]
    };
    let vertices = quad(0.0)
        .into_iter()
        .chain(quad(-0.5))
        .map(|(pos, color, tex_coord)| Vertex {
            pos,
            color,
            tex_coord,
        })
        .collect();
    MeshData {
        vertices,
        indices: vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4],
    }
}

/// `size`x`size` checkerboard with `cells` squares per side.
pub fn checkerboard(size: u32, cells: u32) -> ImageData {
    let size = size.max(1);
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * ImageData::CHANNELS) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let c = if light { 230 } else { 40 };
            pixels.extend_from_slice(&[c, c, c, 255]);
        }
    }
    ImageData {
        pixels,
        width: size,
        height: size,
    }
}
