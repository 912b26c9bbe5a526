//! Edge connectivity ("edge flaps")
//!
//! Indexes the unique undirected edges of a face list. For every edge it
//! records the endpoints and the faces on either side together with the
//! corner of each face opposite the edge. Edges are keyed on position
//! indices only, so the two sides of a UV seam still share one edge.

use std::collections::HashMap;

use meshlod_core::{TexturedMesh, VertexBundle};

/// Marks a face corner that has no edge (the face repeats a vertex)
pub const INVALID: usize = usize::MAX;

/// One face adjacent to an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flap {
    pub face: usize,
    /// Local corner (0..3) of `face` opposite the edge
    pub corner: usize,
}

impl Flap {
    /// The directed edge this flap's face walks: `(start, end)` corners
    #[inline]
    pub fn corners(&self) -> (usize, usize) {
        ((self.corner + 1) % 3, (self.corner + 2) % 3)
    }
}

/// Undirected edge table with face adjacency
#[derive(Debug, Clone, Default)]
pub struct EdgeFlaps {
    endpoints: Vec<[usize; 2]>,
    flaps: Vec<Vec<Flap>>,
    inconsistent: Vec<bool>,
    corner_to_edge: Vec<[usize; 3]>,
    lookup: HashMap<(usize, usize), usize>,
}

impl EdgeFlaps {
    /// Build the edge table in one pass over the faces.
    ///
    /// Edge ids follow the order in which edges are first met. Faces that
    /// repeat a vertex index contribute no edges.
    pub fn build(faces: &[[usize; 3]]) -> Self {
        let mut flaps = Self {
            endpoints: Vec::with_capacity(faces.len() * 3 / 2),
            flaps: Vec::with_capacity(faces.len() * 3 / 2),
            inconsistent: Vec::with_capacity(faces.len() * 3 / 2),
            corner_to_edge: vec![[INVALID; 3]; faces.len()],
            lookup: HashMap::with_capacity(faces.len() * 3 / 2),
        };

        for (fi, face) in faces.iter().enumerate() {
            if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
                continue;
            }
            for corner in 0..3 {
                let flap = Flap { face: fi, corner };
                let (s, e) = flap.corners();
                let (start, end) = (face[s], face[e]);
                let key = (start.min(end), start.max(end));

                let edge = match flaps.lookup.get(&key) {
                    Some(&edge) => edge,
                    None => {
                        let edge = flaps.endpoints.len();
                        flaps.endpoints.push([key.0, key.1]);
                        flaps.flaps.push(Vec::with_capacity(2));
                        flaps.inconsistent.push(false);
                        flaps.lookup.insert(key, edge);
                        edge
                    }
                };

                // A consistently wound neighbour walks the edge the other way
                if let Some(other) = flaps.flaps[edge].first() {
                    let (os, _) = other.corners();
                    if faces[other.face][os] == start {
                        flaps.inconsistent[edge] = true;
                    }
                }
                flaps.flaps[edge].push(flap);
                flaps.corner_to_edge[fi][corner] = edge;
            }
        }
        flaps
    }

    pub fn edge_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Endpoints of an edge, smaller index first
    pub fn endpoints(&self, edge: usize) -> [usize; 2] {
        self.endpoints[edge]
    }

    /// Faces adjacent to an edge, in face order
    pub fn flaps(&self, edge: usize) -> &[Flap] {
        &self.flaps[edge]
    }

    pub fn is_boundary(&self, edge: usize) -> bool {
        self.flaps[edge].len() == 1
    }

    pub fn is_non_manifold(&self, edge: usize) -> bool {
        self.flaps[edge].len() > 2
    }

    /// Two adjacent faces traverse the edge in the same direction
    pub fn is_inconsistent(&self, edge: usize) -> bool {
        self.inconsistent[edge]
    }

    /// Edge opposite `corner` of `face`, if the face is not degenerate
    pub fn corner_edge(&self, face: usize, corner: usize) -> Option<usize> {
        self.corner_to_edge
            .get(face)
            .map(|edges| edges[corner])
            .filter(|&edge| edge != INVALID)
    }

    /// Edge joining two vertices
    pub fn find(&self, a: usize, b: usize) -> Option<usize> {
        self.lookup.get(&(a.min(b), a.max(b))).copied()
    }

    /// The directed half-edges of a manifold or boundary edge, each carrying
    /// the (vertex, texcoord) bundles at its ends. Non-manifold edges only
    /// report their first two faces.
    pub fn half_edge_bundle(&self, edge: usize, mesh: &TexturedMesh) -> HalfEdgeBundle {
        let mut sides = [None, None];
        for (side, flap) in sides.iter_mut().zip(&self.flaps[edge]) {
            let (s, e) = flap.corners();
            let face = mesh.faces()[flap.face];
            let tcs = mesh.face_tex_coords()[flap.face];
            *side = Some(HalfEdge {
                face: flap.face,
                start: VertexBundle::new(face[s], tcs[s]),
                end: VertexBundle::new(face[e], tcs[e]),
            });
        }
        HalfEdgeBundle { sides }
    }
}

/// A directed edge of one face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfEdge {
    pub face: usize,
    pub start: VertexBundle,
    pub end: VertexBundle,
}

impl HalfEdge {
    /// Bundle of this half-edge at `vertex`, if it is one of its ends
    pub fn bundle_at(&self, vertex: usize) -> Option<VertexBundle> {
        if self.start.vertex == vertex {
            Some(self.start)
        } else if self.end.vertex == vertex {
            Some(self.end)
        } else {
            None
        }
    }
}

/// The two half-edges of an undirected edge; the second side is `None` on
/// an open boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfEdgeBundle {
    pub sides: [Option<HalfEdge>; 2],
}

impl HalfEdgeBundle {
    pub fn is_boundary(&self) -> bool {
        self.sides[1].is_none()
    }

    /// Whether the two sides disagree on the texcoord at either endpoint
    pub fn is_seam(&self) -> bool {
        let [Some(first), Some(second)] = self.sides else {
            return false;
        };
        [first.start.vertex, first.end.vertex]
            .iter()
            .any(|&v| first.bundle_at(v) != second.bundle_at(v))
    }
}

/// Counts of boundary and defective edges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeCounts {
    pub boundary: usize,
    pub non_manifold: usize,
    pub inconsistent: usize,
}

impl EdgeFlaps {
    pub fn counts(&self) -> EdgeCounts {
        let mut counts = EdgeCounts::default();
        for edge in 0..self.edge_count() {
            if self.is_boundary(edge) {
                counts.boundary += 1;
            }
            if self.is_non_manifold(edge) {
                counts.non_manifold += 1;
            }
            if self.is_inconsistent(edge) {
                counts.inconsistent += 1;
            }
        }
        counts
    }
}
