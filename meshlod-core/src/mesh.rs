//! Textured mesh data structure and functionality

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IndexKind};
use crate::point::*;
use crate::Result;

/// A triangle mesh with per-corner texture coordinates.
///
/// Positions and texture coordinates are indexed independently: `faces[i]`
/// names three positions and `face_tex_coords[i]` names the three texcoords
/// of the same corners. A position shared by faces that disagree on its
/// texcoord lies on a UV seam.
///
/// The fields are not public, so every value of this type satisfies the
/// construction invariants: equal face/face-texcoord counts, in-bounds
/// indices and finite coordinates. `Clone` deep-copies all four arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTexturedMesh")]
pub struct TexturedMesh {
    pub(crate) positions: Vec<Point3f>,
    pub(crate) faces: Vec<[usize; 3]>,
    pub(crate) tex_coords: Vec<Point2f>,
    pub(crate) face_tex_coords: Vec<[usize; 3]>,
}

#[derive(Deserialize)]
struct RawTexturedMesh {
    positions: Vec<Point3f>,
    faces: Vec<[usize; 3]>,
    tex_coords: Vec<Point2f>,
    face_tex_coords: Vec<[usize; 3]>,
}

impl TryFrom<RawTexturedMesh> for TexturedMesh {
    type Error = Error;

    fn try_from(raw: RawTexturedMesh) -> Result<Self> {
        Self::new(raw.positions, raw.faces, raw.tex_coords, raw.face_tex_coords)
    }
}

impl TexturedMesh {
    /// Create a mesh, validating every index and coordinate
    pub fn new(
        positions: Vec<Point3f>,
        faces: Vec<[usize; 3]>,
        tex_coords: Vec<Point2f>,
        face_tex_coords: Vec<[usize; 3]>,
    ) -> Result<Self> {
        validate_parts(&positions, &faces, &tex_coords, &face_tex_coords)?;
        Ok(Self {
            positions,
            faces,
            tex_coords,
            face_tex_coords,
        })
    }

    /// Create a mesh whose faces use the same indices for positions and
    /// texcoords (one texcoord per vertex, no seams)
    pub fn from_shared_indices(
        positions: Vec<Point3f>,
        tex_coords: Vec<Point2f>,
        faces: Vec<[usize; 3]>,
    ) -> Result<Self> {
        let face_tex_coords = faces.clone();
        Self::new(positions, faces, tex_coords, face_tex_coords)
    }

    /// Create a new empty mesh
    pub fn empty() -> Self {
        Self {
            positions: Vec::new(),
            faces: Vec::new(),
            tex_coords: Vec::new(),
            face_tex_coords: Vec::new(),
        }
    }

    pub fn positions(&self) -> &[Point3f] {
        &self.positions
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    pub fn tex_coords(&self) -> &[Point2f] {
        &self.tex_coords
    }

    pub fn face_tex_coords(&self) -> &[[usize; 3]] {
        &self.face_tex_coords
    }

    /// Consume the mesh and return `(positions, faces, tex_coords, face_tex_coords)`
    pub fn into_parts(self) -> (Vec<Point3f>, Vec<[usize; 3]>, Vec<Point2f>, Vec<[usize; 3]>) {
        (self.positions, self.faces, self.tex_coords, self.face_tex_coords)
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Get the number of faces
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Get the number of texture coordinates
    pub fn tex_coord_count(&self) -> usize {
        self.tex_coords.len()
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.faces.is_empty()
    }

    /// Re-run the construction checks
    pub fn validate(&self) -> Result<()> {
        validate_parts(
            &self.positions,
            &self.faces,
            &self.tex_coords,
            &self.face_tex_coords,
        )
    }

    /// Calculate face normals; degenerate faces get a zero vector
    pub fn face_normals(&self) -> Vec<Vector3f> {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.positions[face[0]];
                let v1 = self.positions[face[1]];
                let v2 = self.positions[face[2]];
                let n = (v1 - v0).cross(&(v2 - v0));
                n.try_normalize(f32::EPSILON).unwrap_or_else(Vector3f::zeros)
            })
            .collect()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.positions)
    }

    /// All distinct (vertex, texcoord) pairs used by face corners, sorted
    pub fn vertex_bundles(&self) -> Vec<VertexBundle> {
        let set: BTreeSet<VertexBundle> = self
            .faces
            .iter()
            .zip(&self.face_tex_coords)
            .flat_map(|(face, tcs)| (0..3).map(move |c| VertexBundle::new(face[c], tcs[c])))
            .collect();
        set.into_iter().collect()
    }

    /// Number of vertices referenced with two or more distinct texcoords
    pub fn seam_vertex_count(&self) -> usize {
        let bundles = self.vertex_bundles();
        let mut count = 0;
        let mut i = 0;
        while i < bundles.len() {
            let v = bundles[i].vertex;
            let mut j = i;
            while j < bundles.len() && bundles[j].vertex == v {
                j += 1;
            }
            if j - i >= 2 {
                count += 1;
            }
            i = j;
        }
        count
    }

    /// Number of vertices referenced by at least one face
    pub fn referenced_vertex_count(&self) -> usize {
        let mut used = vec![false; self.positions.len()];
        for face in &self.faces {
            for &v in face {
                used[v] = true;
            }
        }
        used.into_iter().filter(|&u| u).count()
    }

    /// Merge, per vertex, texcoords whose values lie within `tolerance` of
    /// each other (max-norm), so near-duplicate UVs stop counting as seams.
    ///
    /// Each corner is redirected to the lowest texcoord index of its group;
    /// the texcoord array itself is left as is.
    pub fn weld_tex_coords(&self, tolerance: f32) -> TexturedMesh {
        let bundles = self.vertex_bundles();
        let mut representative: HashMap<VertexBundle, usize> = HashMap::with_capacity(bundles.len());

        for group in bundles.chunk_by(|a, b| a.vertex == b.vertex) {
            let mut kept: Vec<usize> = Vec::new();
            for bundle in group {
                let t = self.tex_coords[bundle.tex_coord];
                let found = kept.iter().copied().find(|&k| {
                    let s = self.tex_coords[k];
                    (s.x - t.x).abs() <= tolerance && (s.y - t.y).abs() <= tolerance
                });
                let target = match found {
                    Some(k) => k,
                    None => {
                        kept.push(bundle.tex_coord);
                        bundle.tex_coord
                    }
                };
                representative.insert(*bundle, target);
            }
        }

        let face_tex_coords = self
            .faces
            .iter()
            .zip(&self.face_tex_coords)
            .map(|(face, tcs)| {
                [0, 1, 2].map(|c| {
                    let bundle = VertexBundle::new(face[c], tcs[c]);
                    representative.get(&bundle).copied().unwrap_or(tcs[c])
                })
            })
            .collect();

        TexturedMesh {
            positions: self.positions.clone(),
            faces: self.faces.clone(),
            tex_coords: self.tex_coords.clone(),
            face_tex_coords,
        }
    }
}

impl Default for TexturedMesh {
    fn default() -> Self {
        Self::empty()
    }
}

fn validate_parts(
    positions: &[Point3f],
    faces: &[[usize; 3]],
    tex_coords: &[Point2f],
    face_tex_coords: &[[usize; 3]],
) -> Result<()> {
    if faces.len() != face_tex_coords.len() {
        return Err(Error::LengthMismatch {
            faces: faces.len(),
            face_tex_coords: face_tex_coords.len(),
        });
    }
    if let Some(index) = positions.iter().position(|p| !p.iter().all(|c| c.is_finite())) {
        return Err(Error::NonFiniteCoordinate {
            kind: IndexKind::Position,
            index,
        });
    }
    if let Some(index) = tex_coords.iter().position(|t| !t.iter().all(|c| c.is_finite())) {
        return Err(Error::NonFiniteCoordinate {
            kind: IndexKind::TexCoord,
            index,
        });
    }
    check_indices(faces, positions.len(), IndexKind::Position)?;
    check_indices(face_tex_coords, tex_coords.len(), IndexKind::TexCoord)
}

fn check_indices(table: &[[usize; 3]], len: usize, kind: IndexKind) -> Result<()> {
    for (face, corners) in table.iter().enumerate() {
        if let Some(&index) = corners.iter().find(|&&i| i >= len) {
            return Err(Error::IndexOutOfRange {
                kind,
                face,
                index,
                len,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> TexturedMesh {
        TexturedMesh::from_shared_indices(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![
                Point2f::new(0.0, 0.0),
                Point2f::new(1.0, 0.0),
                Point2f::new(1.0, 1.0),
                Point2f::new(0.0, 1.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn test_construction() {
        let mesh = quad();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.face_count(), 2);
        assert_eq!(mesh.tex_coord_count(), 4);
        assert!(!mesh.is_empty());
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_length_mismatch() {
        let err = TexturedMesh::new(
            vec![Point3f::origin(); 3],
            vec![[0, 1, 2]],
            vec![Point2f::origin(); 3],
            vec![],
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::LengthMismatch {
                faces: 1,
                face_tex_coords: 0
            }
        );
    }

    #[test]
    fn test_index_out_of_range() {
        let err = TexturedMesh::new(
            vec![Point3f::origin(); 3],
            vec![[0, 1, 3]],
            vec![Point2f::origin(); 3],
            vec![[0, 1, 2]],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::IndexOutOfRange {
                kind: IndexKind::Position,
                index: 3,
                ..
            }
        ));

        let err = TexturedMesh::new(
            vec![Point3f::origin(); 3],
            vec![[0, 1, 2]],
            vec![Point2f::origin(); 1],
            vec![[0, 0, 1]],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::IndexOutOfRange {
                kind: IndexKind::TexCoord,
                ..
            }
        ));
    }

    #[test]
    fn test_non_finite() {
        let err = TexturedMesh::new(
            vec![Point3f::new(0.0, f32::NAN, 0.0)],
            vec![],
            vec![],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, Error::NonFiniteCoordinate { index: 0, .. }));

        let err = TexturedMesh::new(
            vec![],
            vec![],
            vec![Point2f::new(f32::INFINITY, 0.0)],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::NonFiniteCoordinate {
                kind: IndexKind::TexCoord,
                ..
            }
        ));
    }

    #[test]
    fn test_clone_is_independent() {
        let original = quad();
        let clone = original.clone();
        assert_eq!(original, clone);

        let (mut positions, faces, tex_coords, face_tex_coords) = clone.into_parts();
        positions[0] = Point3f::new(5.0, 5.0, 5.0);
        let modified = TexturedMesh::new(positions, faces, tex_coords, face_tex_coords).unwrap();
        assert_ne!(original, modified);
        assert_eq!(original.positions()[0], Point3f::origin());
    }

    #[test]
    fn test_seam_detection() {
        // Vertex 0 and 2 carry two texcoords each
        let mesh = TexturedMesh::new(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
            vec![Point2f::origin(); 6],
            vec![[0, 1, 2], [3, 4, 5]],
        )
        .unwrap();
        assert_eq!(mesh.vertex_bundles().len(), 6);
        assert_eq!(mesh.seam_vertex_count(), 2);
        assert_eq!(quad().seam_vertex_count(), 0);
    }

    #[test]
    fn test_weld_tex_coords() {
        let tex_coords = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 0.0),
            Point2f::new(1.0, 1.0),
            Point2f::new(0.0, 1e-4),
            Point2f::new(1.0, 1.0),
            Point2f::new(0.0, 1.0),
        ];
        let mesh = TexturedMesh::new(
            quad().positions().to_vec(),
            vec![[0, 1, 2], [0, 2, 3]],
            tex_coords,
            vec![[0, 1, 2], [3, 4, 5]],
        )
        .unwrap();
        assert_eq!(mesh.seam_vertex_count(), 2);

        // Vertex 2 has identical values, vertex 0 differs by 1e-4
        let exact = mesh.weld_tex_coords(0.0);
        assert_eq!(exact.seam_vertex_count(), 1);
        assert_eq!(exact.face_tex_coords()[1], [3, 2, 5]);

        let loose = mesh.weld_tex_coords(1e-3);
        assert_eq!(loose.seam_vertex_count(), 0);
        assert_eq!(loose.face_tex_coords()[1], [0, 2, 5]);
        assert!(loose.validate().is_ok());
    }

    #[test]
    fn test_face_normals() {
        let normals = quad().face_normals();
        for n in normals {
            assert!((n.z - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_deserialize_validates() {
        let ok = r#"{"positions":[[0,0,0],[1,0,0],[0,1,0]],"faces":[[0,1,2]],
            "tex_coords":[[0,0],[1,0],[0,1]],"face_tex_coords":[[0,1,2]]}"#;
        let mesh: TexturedMesh = serde_json::from_str(ok).unwrap();
        assert_eq!(mesh.face_count(), 1);

        let bad = r#"{"positions":[[0,0,0]],"faces":[[0,1,2]],
            "tex_coords":[[0,0]],"face_tex_coords":[[0,0,0]]}"#;
        assert!(serde_json::from_str::<TexturedMesh>(bad).is_err());
    }
}
