// SPDX-License-Identifier: CEPL-1.0
//! Vertex layout and OBJ loading.

use crate::AssetError;
use bytemuck::{Pod, Zeroable};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

/// Interleaved vertex: position (location 0), color (1), texture coordinate (2).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const POS_OFFSET: u32 = 0;
    pub const COLOR_OFFSET: u32 = 12;
    pub const TEX_COORD_OFFSET: u32 = 24;
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    fn key(&self) -> [u32; 8] {
        let [px, py, pz] = self.pos;
        let [r, g, b] = self.color;
        let [u, v] = self.tex_coord;
        [px, py, pz, r, g, b, u, v].map(f32::to_bits)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Collapses bit-identical vertices and rewrites the index list to match.
///
/// Float bits are compared, so `-0.0` and `0.0` stay distinct.
pub fn deduplicate(vertices: &[Vertex], indices: &[u32]) -> Result<MeshData, AssetError> {
    if indices.is_empty() {
        return Err(AssetError::EmptyMesh);
    }

    let mut unique: HashMap<[u32; 8], u32> = HashMap::with_capacity(vertices.len());
    let mut out = MeshData {
        vertices: Vec::with_capacity(vertices.len()),
        indices: Vec::with_capacity(indices.len()),
    };

    for &index in indices {
        let vertex = vertices
            .get(index as usize)
            .ok_or(AssetError::IndexOutOfRange {
                index,
                len: vertices.len(),
            })?;
        let slot = *unique.entry(vertex.key()).or_insert_with(|| {
            out.vertices.push(*vertex);
            (out.vertices.len() - 1) as u32
        });
        out.indices.push(slot);
    }

    Ok(out)
}

pub fn load_obj(path: &Path) -> Result<MeshData, AssetError> {
    let obj_err = |source| AssetError::Obj {
        path: path.display().to_string(),
        source,
    };
    let file = File::open(path).map_err(|source| AssetError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let mesh = load_obj_buf(&mut BufReader::new(file)).map_err(|e| match e {
        AssetError::Obj { source, .. } => obj_err(source),
        other => other,
    })?;
    tracing::info!(
        "model {}: {} vertices, {} indices",
        path.display(),
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(mesh)
}

/// Parses OBJ text, ignoring materials. Every shape is merged into one mesh.
pub fn load_obj_buf<R: BufRead>(reader: &mut R) -> Result<MeshData, AssetError> {
    let (models, _) = tobj::load_obj_buf(
        reader,
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        },
        |_| Ok(Default::default()),
    )
    .map_err(|source| AssetError::Obj {
        path: "<buffer>".to_owned(),
        source,
    })?;

    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for model in &models {
        let mesh = &model.mesh;
        let base = vertices.len() as u32;
        let count = mesh.positions.len() / 3;
        for i in 0..count {
            let tex_coord = match mesh.texcoords.get(2 * i..2 * i + 2) {
                Some(&[u, v]) => [u, 1.0 - v],
                _ => [0.0, 0.0],
            };
            vertices.push(Vertex {
                pos: [
                    mesh.positions[3 * i],
                    mesh.positions[3 * i + 1],
                    mesh.positions[3 * i + 2],
                ],
                color: [1.0, 1.0, 1.0],
                tex_coord,
            });
        }
        indices.extend(mesh.indices.iter().map(|i| base + i));
    }

    deduplicate(&vertices, &indices)
}
