//! Position + UV quadric error metrics
//!
//! Each face contributes a generalized quadric measuring the squared distance
//! of a 5D point `(x, y, z, u, v)` from the plane the triangle spans in 5D.
//! The quadric is stored as a symmetric 6x6 homogeneous matrix `Q` so that the
//! error of a placement is `vᵀQv` with `v = (x, y, z, u, v, 1)`.

use std::collections::BTreeMap;

use meshlod_core::TexturedMesh;
use nalgebra::{Matrix6, SMatrix, SVector, Vector2, Vector3, Vector4, Vector6};

type Vector5 = SVector<f64, 5>;
type Matrix5 = SMatrix<f64, 5, 5>;

const DEGENERATE_LENGTH: f64 = 1e-12;

/// The 6-vector a quadric is evaluated at
#[inline]
pub fn homogeneous(position: &Vector3<f64>, uv: &Vector2<f64>) -> Vector6<f64> {
    Vector6::new(position.x, position.y, position.z, uv.x, uv.y, 1.0)
}

/// Quadric of one triangle in position + UV space.
///
/// UV coordinates are scaled by `uv_weight` before the 5D plane is fitted, so
/// a larger weight makes texture-space deviation more expensive. The returned
/// matrix acts on unscaled coordinates. Degenerate triangles (zero area in
/// 5D) yield the zero matrix.
pub fn face_quadric(positions: [Vector3<f64>; 3], uvs: [Vector2<f64>; 3], uv_weight: f64) -> Matrix6<f64> {
    let lift = |p: &Vector3<f64>, t: &Vector2<f64>| {
        Vector5::new(p.x, p.y, p.z, uv_weight * t.x, uv_weight * t.y)
    };
    let p = lift(&positions[0], &uvs[0]);
    let q = lift(&positions[1], &uvs[1]);
    let r = lift(&positions[2], &uvs[2]);

    let e1 = q - p;
    let len1 = e1.norm();
    if len1 < DEGENERATE_LENGTH {
        return Matrix6::zeros();
    }
    let e1 = e1 / len1;

    let d = r - p;
    let e2 = d - e1 * e1.dot(&d);
    let len2 = e2.norm();
    if len2 < DEGENERATE_LENGTH {
        return Matrix6::zeros();
    }
    let e2 = e2 / len2;

    let pe1 = p.dot(&e1);
    let pe2 = p.dot(&e2);
    let a: Matrix5 = Matrix5::identity() - e1 * e1.transpose() - e2 * e2.transpose();
    let b: Vector5 = e1 * pe1 + e2 * pe2 - p;
    let c = p.dot(&p) - pe1 * pe1 - pe2 * pe2;

    let scale = [1.0, 1.0, 1.0, uv_weight, uv_weight, 1.0];
    Matrix6::from_fn(|i, j| {
        let value = match (i, j) {
            (5, 5) => c,
            (5, k) | (k, 5) => b[k],
            (i, j) => a[(i, j)],
        };
        value * scale[i] * scale[j]
    })
}

/// Embed a position-only plane quadric `(n, d)(n, d)ᵀ` into the 6x6 form.
/// The UV rows and columns are zero.
pub fn plane_quadric(plane: &Vector4<f64>) -> Matrix6<f64> {
    let map = [Some(0), Some(1), Some(2), None, None, Some(3)];
    Matrix6::from_fn(|i, j| match (map[i], map[j]) {
        (Some(a), Some(b)) => plane[a] * plane[b],
        _ => 0.0,
    })
}

/// Quadric of the plane through a boundary edge, perpendicular to its face.
///
/// Keeps open borders from shrinking inward. Returns zero for degenerate
/// edges or faces.
pub fn boundary_quadric(
    start: &Vector3<f64>,
    end: &Vector3<f64>,
    face_normal: &Vector3<f64>,
    weight: f64,
) -> Matrix6<f64> {
    let edge = end - start;
    let normal = edge.cross(face_normal);
    let len = normal.norm();
    if len < DEGENERATE_LENGTH {
        return Matrix6::zeros();
    }
    let n = normal / len;
    let plane = Vector4::new(n.x, n.y, n.z, -n.dot(start));
    plane_quadric(&plane) * weight
}

/// Unit normal of a triangle, or `None` when it has no area
pub fn triangle_normal(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> Option<Vector3<f64>> {
    (b - a).cross(&(c - a)).try_normalize(DEGENERATE_LENGTH * DEGENERATE_LENGTH)
}

/// Per-vertex map from texcoord index to the accumulated quadric of the
/// faces using that (vertex, texcoord) bundle.
#[derive(Debug, Clone, Default)]
pub struct MetricMap {
    entries: Vec<BTreeMap<usize, Matrix6<f64>>>,
}

impl MetricMap {
    /// Accumulate face quadrics of `mesh` into its vertex bundles.
    /// Faces with repeated vertex indices are skipped.
    pub fn build(mesh: &TexturedMesh, uv_weight: f64) -> Self {
        let mut entries = vec![BTreeMap::new(); mesh.vertex_count()];
        for (face, tcs) in mesh.faces().iter().zip(mesh.face_tex_coords()) {
            if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
                continue;
            }
            let positions = face.map(|v| mesh.positions()[v].coords.cast::<f64>());
            let uvs = tcs.map(|t| mesh.tex_coords()[t].coords.cast::<f64>());
            let q = face_quadric(positions, uvs, uv_weight);
            for c in 0..3 {
                *entries[face[c]].entry(tcs[c]).or_insert_with(Matrix6::zeros) += q;
            }
        }
        Self { entries }
    }

    pub fn vertex_count(&self) -> usize {
        self.entries.len()
    }

    /// Quadric of one bundle
    pub fn get(&self, vertex: usize, tex_coord: usize) -> Option<&Matrix6<f64>> {
        self.entries.get(vertex)?.get(&tex_coord)
    }

    /// Bundles of a vertex in texcoord order
    pub fn bundles(&self, vertex: usize) -> impl Iterator<Item = (usize, &Matrix6<f64>)> {
        self.entries
            .get(vertex)
            .into_iter()
            .flat_map(|map| map.iter().map(|(&tc, q)| (tc, q)))
    }

    /// Whether the vertex carries two or more distinct texcoords
    pub fn is_seam_vertex(&self, vertex: usize) -> bool {
        self.entries.get(vertex).map_or(false, |map| map.len() > 1)
    }

    pub fn seam_vertex_count(&self) -> usize {
        self.entries.iter().filter(|map| map.len() > 1).count()
    }

    /// Sum of all bundle quadrics of a vertex
    pub fn vertex_total(&self, vertex: usize) -> Matrix6<f64> {
        self.bundles(vertex).fold(Matrix6::zeros(), |acc, (_, q)| acc + q)
    }
}

/// Scale factor applied to UV coordinates so that texture distances are
/// comparable with position distances: `weight` times the ratio of the
/// position bounding-box diagonal to the UV bounding-box diagonal.
pub fn normalized_uv_weight(mesh: &TexturedMesh, weight: f64) -> f64 {
    let Some(bbox) = mesh.bounding_box() else {
        return weight;
    };
    let position_diagonal = bbox.diagonal() as f64;

    let mut lo = Vector2::repeat(f64::INFINITY);
    let mut hi = Vector2::repeat(f64::NEG_INFINITY);
    for t in mesh.tex_coords() {
        let t = t.coords.cast::<f64>();
        lo = lo.inf(&t);
        hi = hi.sup(&t);
    }
    let uv_diagonal = (hi - lo).norm();

    if uv_diagonal.is_finite() && uv_diagonal > DEGENERATE_LENGTH && position_diagonal > DEGENERATE_LENGTH {
        weight * position_diagonal / uv_diagonal
    } else {
        weight
    }
}
