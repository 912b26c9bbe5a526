//! Conversion between [`TexturedMesh`] and flat rendering buffers.
//!
//! Rendering engines hand geometry around as parallel flat arrays: three
//! floats per vertex position, two per vertex UV and three `u32` indices per
//! triangle, with one UV per buffer vertex. A UV seam is therefore encoded
//! by duplicating the vertex. [`TexturedMesh`] instead indexes positions and
//! texcoords separately, so the conversions here either keep the buffer's
//! 1:1 layout or weld coincident positions back into shared vertices.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::mesh::TexturedMesh;
use crate::point::*;
use crate::Result;

/// Flat, engine-facing geometry buffers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferGeometry {
    /// `3 * N` position components
    pub positions: Vec<f32>,
    /// `3 * F` vertex indices
    pub indices: Vec<u32>,
    /// `2 * N` UV components
    pub uvs: Vec<f32>,
}

impl BufferGeometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

fn chunks<'a, T: bytemuck::Pod, U: bytemuck::Pod>(data: &'a [T], what: &str) -> Result<&'a [U]> {
    bytemuck::try_cast_slice(data).map_err(|_| {
        Error::MalformedBuffer(format!(
            "{what} length {} is not a multiple of {}",
            data.len(),
            std::mem::size_of::<U>() / std::mem::size_of::<T>()
        ))
    })
}

impl TexturedMesh {
    /// Build a mesh with one position and one texcoord per buffer vertex
    pub fn from_buffer_geometry(geometry: &BufferGeometry) -> Result<Self> {
        let (positions, uvs, triangles) = split_buffers(geometry)?;
        let faces: Vec<[usize; 3]> = triangles
            .iter()
            .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize])
            .collect();
        Self::new(
            positions.iter().map(|p| Point3f::new(p[0], p[1], p[2])).collect(),
            faces.clone(),
            uvs.iter().map(|t| Point2f::new(t[0], t[1])).collect(),
            faces,
        )
    }

    /// Build a mesh, merging buffer vertices whose positions lie within
    /// `tolerance` of each other (per axis) into one vertex.
    ///
    /// Texcoords stay one per buffer vertex, so duplicated seam vertices
    /// turn into multi-bundle vertices instead of open boundaries.
    pub fn from_buffer_geometry_welded(geometry: &BufferGeometry, tolerance: f32) -> Result<Self> {
        if !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(Error::InvalidOptions(format!(
                "weld tolerance must be finite and non-negative, got {tolerance}"
            )));
        }
        let (positions, uvs, triangles) = split_buffers(geometry)?;

        let cell = if tolerance > 0.0 { tolerance } else { 1.0 };
        let key = |p: &[f32; 3]| -> [i64; 3] {
            if tolerance > 0.0 {
                [
                    (p[0] / cell).floor() as i64,
                    (p[1] / cell).floor() as i64,
                    (p[2] / cell).floor() as i64,
                ]
            } else {
                [p[0].to_bits() as i64, p[1].to_bits() as i64, p[2].to_bits() as i64]
            }
        };

        let mut grid: HashMap<[i64; 3], Vec<usize>> = HashMap::new();
        let mut welded: Vec<Point3f> = Vec::new();
        let mut remap = Vec::with_capacity(positions.len());
        for p in positions {
            let k = key(p);
            let mut found = None;
            if tolerance > 0.0 {
                'search: for dx in -1..=1 {
                    for dy in -1..=1 {
                        for dz in -1..=1 {
                            let Some(candidates) = grid.get(&[k[0] + dx, k[1] + dy, k[2] + dz]) else {
                                continue;
                            };
                            for &c in candidates {
                                let q = welded[c];
                                if (q.x - p[0]).abs() <= tolerance
                                    && (q.y - p[1]).abs() <= tolerance
                                    && (q.z - p[2]).abs() <= tolerance
                                {
                                    found = Some(c);
                                    break 'search;
                                }
                            }
                        }
                    }
                }
            } else if let Some(candidates) = grid.get(&k) {
                found = candidates.first().copied();
            }

            let index = match found {
                Some(i) => i,
                None => {
                    welded.push(Point3f::new(p[0], p[1], p[2]));
                    grid.entry(k).or_default().push(welded.len() - 1);
                    welded.len() - 1
                }
            };
            remap.push(index);
        }

        let face_tex_coords: Vec<[usize; 3]> = triangles
            .iter()
            .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize])
            .collect();
        // Checked here because `remap` is indexed before `new` can validate
        if let Some(bad) = face_tex_coords.iter().flatten().find(|&&i| i >= remap.len()) {
            return Err(Error::MalformedBuffer(format!(
                "index {bad} exceeds vertex count {}",
                remap.len()
            )));
        }
        let faces = face_tex_coords
            .iter()
            .map(|t| [remap[t[0]], remap[t[1]], remap[t[2]]])
            .collect();

        Self::new(
            welded,
            faces,
            uvs.iter().map(|t| Point2f::new(t[0], t[1])).collect(),
            face_tex_coords,
        )
    }

    /// Flatten into engine buffers.
    ///
    /// A mesh in 1:1 layout (one texcoord per position, shared indices) is
    /// written out unchanged, unused vertices included. Otherwise one buffer
    /// vertex is emitted per distinct (position, texcoord) bundle in order of
    /// first use, followed by every position no face references, with a zero
    /// UV.
    pub fn to_buffer_geometry(&self) -> BufferGeometry {
        if self.vertex_count() == self.tex_coord_count() && self.faces == self.face_tex_coords {
            return BufferGeometry {
                positions: self.positions.iter().flat_map(|p| [p.x, p.y, p.z]).collect(),
                indices: self.faces.iter().flatten().map(|&i| i as u32).collect(),
                uvs: self.tex_coords.iter().flat_map(|t| [t.x, t.y]).collect(),
            };
        }

        let mut bundle_index: HashMap<VertexBundle, u32> = HashMap::new();
        let mut referenced = vec![false; self.vertex_count()];
        let mut positions = Vec::new();
        let mut uvs = Vec::new();
        let mut indices = Vec::with_capacity(self.face_count() * 3);

        for (face, tcs) in self.faces().iter().zip(self.face_tex_coords()) {
            for c in 0..3 {
                let bundle = VertexBundle::new(face[c], tcs[c]);
                referenced[bundle.vertex] = true;
                let index = *bundle_index.entry(bundle).or_insert_with(|| {
                    let p = self.positions()[bundle.vertex];
                    let t = self.tex_coords()[bundle.tex_coord];
                    positions.extend_from_slice(&[p.x, p.y, p.z]);
                    uvs.extend_from_slice(&[t.x, t.y]);
                    (positions.len() / 3 - 1) as u32
                });
                indices.push(index);
            }
        }

        for (p, _) in self.positions().iter().zip(&referenced).filter(|(_, &used)| !used) {
            positions.extend_from_slice(&[p.x, p.y, p.z]);
            uvs.extend_from_slice(&[0.0, 0.0]);
        }

        BufferGeometry {
            positions,
            indices,
            uvs,
        }
    }
}

type SplitBuffers<'a> = (&'a [[f32; 3]], &'a [[f32; 2]], &'a [[u32; 3]]);

fn split_buffers(geometry: &BufferGeometry) -> Result<SplitBuffers<'_>> {
    let positions = chunks::<f32, [f32; 3]>(&geometry.positions, "positions")?;
    let uvs = chunks::<f32, [f32; 2]>(&geometry.uvs, "uvs")?;
    let triangles = chunks::<u32, [u32; 3]>(&geometry.indices, "indices")?;
    if positions.len() != uvs.len() {
        return Err(Error::MalformedBuffer(format!(
            "{} positions but {} uvs",
            positions.len(),
            uvs.len()
        )));
    }
    Ok((positions, uvs, triangles))
}
