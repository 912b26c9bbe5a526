//! Seam-aware edge collapse decimation
//!
//! Vertices, bundles, faces and edges live in flat arrays indexed by their
//! input ids. A collapse tombstones the removed vertex and the faces on the
//! collapsed edge and rewires the rest in place, so ids stay stable until the
//! final compaction.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Instant;

use meshlod_core::{Point2f, Point3f, Result, TexturedMesh, VertexBundle};
use nalgebra::{Matrix6, Vector2, Vector3};
use tracing::{debug, info, trace, warn};

use crate::edge_flaps::{EdgeFlaps, INVALID};
use crate::options::{DecimationOptions, Strictness};
use crate::placement::{solve_placement, CollapseProblem, FixedTerm, Layout, Placement, PlacementMethod, UvGroup};
use crate::quadric::{boundary_quadric, homogeneous, normalized_uv_weight, triangle_normal, MetricMap};
use crate::queue::CandidateQueue;
use crate::result::{DecimationResult, DecimationStats, TopologyReport};
use crate::simd::{QuadricKernel, MATRIX_LEN, VECTOR_LEN};

/// Cost multiplier for collapses whose placement fell back to the anchor
const DEGENERATE_PENALTY: f64 = 1e3;
const DEGENERATE_FLOOR: f64 = 1e-12;

/// Decimate `mesh` to the target given by `options`.
///
/// The input is never modified. The returned mesh is compacted: vertices and
/// texcoords are renumbered in order of first use by the surviving faces.
pub fn decimate(mesh: &TexturedMesh, options: &DecimationOptions) -> Result<DecimationResult> {
    decimate_with_kernel(mesh, options, QuadricKernel::default())
}

/// [`decimate`] with an explicit cost kernel
pub fn decimate_with_kernel(
    mesh: &TexturedMesh,
    options: &DecimationOptions,
    kernel: QuadricKernel,
) -> Result<DecimationResult> {
    options.validate()?;
    let start = Instant::now();

    let original_vertices = mesh.vertex_count();
    let original_faces = mesh.face_count();
    let target = options.target_vertex_count(original_vertices);

    info!(
        original = original_vertices,
        target,
        strictness = %options.strictness,
        "Starting mesh decimation"
    );

    let source: Cow<'_, TexturedMesh> = match options.uv_weld_tolerance {
        Some(tolerance) => Cow::Owned(mesh.weld_tex_coords(tolerance)),
        None => Cow::Borrowed(mesh),
    };

    let mut decimator = Decimator::new(&source, options, kernel);
    decimator.run(target);

    let mut stats = decimator.stats;
    stats.stale_entries_skipped = decimator.queue.stale_skipped();
    let output = decimator.mesh.compact()?;

    let result = DecimationResult::new(
        output,
        original_vertices,
        original_faces,
        start.elapsed().as_secs_f64() * 1000.0,
        stats,
    );

    info!(
        original = result.original_vertices,
        final_vertices = result.final_vertices,
        final_faces = result.final_faces,
        collapses = result.stats.collapses_performed,
        elapsed_ms = result.processing_time_ms,
        "Mesh decimation complete"
    );

    Ok(result)
}

// ============================================================
// Working mesh
// ============================================================

/// Mutable arena the collapse loop works on.
///
/// Faces reference bundles; the vertex of a corner is always
/// `bundle_vertex[bundle]`, so handing a bundle to another vertex moves every
/// corner that uses it.
struct CollapseMesh {
    positions: Vec<Vector3<f64>>,
    vertex_locked: Vec<bool>,
    vertex_boundary: Vec<bool>,
    /// Alive faces around each vertex; empty once the vertex is merged away
    vertex_faces: Vec<Vec<usize>>,
    /// Boundary plane quadrics; UV rows are zero
    vertex_quadric: Vec<Matrix6<f64>>,
    bundle_vertex: Vec<usize>,
    bundle_uv: Vec<Vector2<f64>>,
    bundle_quadric: Vec<Matrix6<f64>>,
    faces: Vec<[usize; 3]>,
    face_alive: Vec<bool>,
    alive_vertices: usize,
}

impl CollapseMesh {
    fn face_vertices(&self, face: usize) -> [usize; 3] {
        self.faces[face].map(|b| self.bundle_vertex[b])
    }

    /// Bundle used by `face` at `vertex`
    fn bundle_at(&self, face: usize, vertex: usize) -> Option<usize> {
        self.faces[face]
            .iter()
            .copied()
            .find(|&b| self.bundle_vertex[b] == vertex)
    }

    /// Distinct bundles in use at a vertex, sorted
    fn bundles(&self, vertex: usize) -> Vec<usize> {
        let mut bundles: Vec<usize> = self.vertex_faces[vertex]
            .iter()
            .filter_map(|&f| self.bundle_at(f, vertex))
            .collect();
        bundles.sort_unstable();
        bundles.dedup();
        bundles
    }

    /// Vertices sharing a face with `vertex`, sorted
    fn neighbors(&self, vertex: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self.vertex_faces[vertex]
            .iter()
            .flat_map(|&f| self.face_vertices(f))
            .filter(|&v| v != vertex)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    fn shared_faces(&self, a: usize, b: usize) -> Vec<usize> {
        self.vertex_faces[a]
            .iter()
            .copied()
            .filter(|&f| self.face_vertices(f).contains(&b))
            .collect()
    }

    fn face_normal(&self, face: usize) -> Option<Vector3<f64>> {
        let [a, b, c] = self.face_vertices(face);
        triangle_normal(&self.positions[a], &self.positions[b], &self.positions[c])
    }

    /// Faces outside `skip` that would become identical once `b` is merged
    /// into `a`
    fn merge_duplicates_face(&self, a: usize, b: usize, skip: &[usize]) -> bool {
        let sorted = |mut face: [usize; 3]| {
            face.sort_unstable();
            face
        };
        let around_a: Vec<[usize; 3]> = self.vertex_faces[a]
            .iter()
            .filter(|f| !skip.contains(f))
            .map(|&f| sorted(self.face_vertices(f)))
            .collect();
        self.vertex_faces[b]
            .iter()
            .filter(|f| !skip.contains(f))
            .map(|&f| sorted(self.face_vertices(f).map(|v| if v == b { a } else { v })))
            .any(|face| around_a.contains(&face))
    }

    /// Renumber surviving vertices and bundles in order of first use
    fn compact(&self) -> Result<TexturedMesh> {
        let mut vertex_map = vec![INVALID; self.positions.len()];
        let mut bundle_map = vec![INVALID; self.bundle_vertex.len()];
        let mut positions = Vec::with_capacity(self.alive_vertices);
        let mut tex_coords = Vec::with_capacity(self.alive_vertices);
        let mut faces = Vec::new();
        let mut face_tex_coords = Vec::new();

        for (f, corners) in self.faces.iter().enumerate() {
            if !self.face_alive[f] {
                continue;
            }
            let mut face = [0; 3];
            let mut tcs = [0; 3];
            for (c, &b) in corners.iter().enumerate() {
                let v = self.bundle_vertex[b];
                if vertex_map[v] == INVALID {
                    vertex_map[v] = positions.len();
                    positions.push(Point3f::from(self.positions[v].cast::<f32>()));
                }
                if bundle_map[b] == INVALID {
                    bundle_map[b] = tex_coords.len();
                    tex_coords.push(Point2f::from(self.bundle_uv[b].cast::<f32>()));
                }
                face[c] = vertex_map[v];
                tcs[c] = bundle_map[b];
            }
            faces.push(face);
            face_tex_coords.push(tcs);
        }

        TexturedMesh::new(positions, faces, tex_coords, face_tex_coords)
    }
}

// ============================================================
// Edge table
// ============================================================

/// Undirected edges keyed on position indices. Ids never change; an edge
/// whose endpoint is merged away is re-keyed to the survivor or retired.
struct EdgeTable {
    endpoints: Vec<[usize; 2]>,
    alive: Vec<bool>,
    lookup: HashMap<(usize, usize), usize>,
    vertex_edges: Vec<Vec<usize>>,
}

#[inline]
fn edge_key(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

impl EdgeTable {
    fn from_flaps(flaps: &EdgeFlaps, vertex_count: usize) -> Self {
        let mut vertex_edges = vec![Vec::new(); vertex_count];
        let mut lookup = HashMap::with_capacity(flaps.edge_count());
        let endpoints: Vec<[usize; 2]> = (0..flaps.edge_count()).map(|e| flaps.endpoints(e)).collect();
        for (e, &[a, b]) in endpoints.iter().enumerate() {
            lookup.insert((a, b), e);
            vertex_edges[a].push(e);
            vertex_edges[b].push(e);
        }
        Self {
            alive: vec![true; endpoints.len()],
            endpoints,
            lookup,
            vertex_edges,
        }
    }

    fn len(&self) -> usize {
        self.endpoints.len()
    }

    fn edges_of(&self, vertex: usize) -> impl Iterator<Item = usize> + '_ {
        self.vertex_edges[vertex]
            .iter()
            .copied()
            .filter(|&e| self.alive[e])
    }

    /// Move the edges of `removed` onto `survivor`, retiring the collapsed
    /// edge and any edge that would duplicate one the survivor already has
    fn merge_vertex(&mut self, survivor: usize, removed: usize, queue: &mut CandidateQueue) {
        let moved = std::mem::take(&mut self.vertex_edges[removed]);
        for e in moved {
            if !self.alive[e] {
                continue;
            }
            let [x, y] = self.endpoints[e];
            let other = if x == removed { y } else { x };
            self.lookup.remove(&(x, y));

            let key = edge_key(survivor, other);
            if other == survivor || self.lookup.contains_key(&key) {
                self.alive[e] = false;
                queue.invalidate(e);
                continue;
            }
            self.endpoints[e] = [key.0, key.1];
            self.lookup.insert(key, e);
            self.vertex_edges[survivor].push(e);
        }
        let alive = &self.alive;
        self.vertex_edges[survivor].retain(|&e| alive[e]);
    }
}

// ============================================================
// Collapse planning
// ============================================================

/// Why an edge cannot be collapsed in the current mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Locked,
    NonManifold,
    /// Interior edge joining two boundary vertices
    BoundaryBridge,
    /// Link condition, ear or duplicate face
    LinkCondition,
    SeamTear,
}

#[derive(Debug)]
struct CollapsePlan {
    survivor: usize,
    removed: usize,
    faces: Vec<usize>,
    /// `[survivor bundle, removed bundle]` merged into one UV each
    groups: Vec<[usize; 2]>,
    /// Unpaired bundles of the removed vertex handed to the survivor
    moved: Vec<usize>,
    placement: Placement,
    cost: f64,
}

struct Decimator {
    mesh: CollapseMesh,
    edges: EdgeTable,
    queue: CandidateQueue,
    strictness: Strictness,
    kernel: QuadricKernel,
    min_normal_dot: f64,
    stats: DecimationStats,
    matrices: Vec<f64>,
    vectors: Vec<f64>,
    values: Vec<f64>,
}

impl Decimator {
    fn new(source: &TexturedMesh, options: &DecimationOptions, kernel: QuadricKernel) -> Self {
        let vertex_count = source.vertex_count();
        let uv_weight = match options.strictness {
            Strictness::Free => normalized_uv_weight(source, 1.0),
            Strictness::PreserveUvShape | Strictness::SeamAware => {
                normalized_uv_weight(source, options.uv_weight)
            }
        };
        let metrics = MetricMap::build(source, uv_weight);
        let flaps = EdgeFlaps::build(source.faces());
        let counts = flaps.counts();

        let positions: Vec<Vector3<f64>> = source
            .positions()
            .iter()
            .map(|p| p.coords.cast::<f64>())
            .collect();

        // Split texcoords into one bundle per (vertex, texcoord) pair
        let mut bundle_ids: HashMap<VertexBundle, usize> = HashMap::new();
        let mut bundle_vertex = Vec::new();
        let mut bundle_uv = Vec::new();
        let mut bundle_quadric = Vec::new();
        let mut vertex_faces = vec![Vec::new(); vertex_count];
        let mut faces = vec![[INVALID; 3]; source.face_count()];
        let mut face_alive = vec![false; source.face_count()];
        let mut degenerate_faces = 0;

        for (fi, (face, tcs)) in source.faces().iter().zip(source.face_tex_coords()).enumerate() {
            if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
                degenerate_faces += 1;
                continue;
            }
            for c in 0..3 {
                let bundle = VertexBundle::new(face[c], tcs[c]);
                let id = *bundle_ids.entry(bundle).or_insert_with(|| {
                    bundle_vertex.push(bundle.vertex);
                    bundle_uv.push(source.tex_coords()[bundle.tex_coord].coords.cast::<f64>());
                    bundle_quadric.push(
                        metrics
                            .get(bundle.vertex, bundle.tex_coord)
                            .copied()
                            .unwrap_or_else(Matrix6::zeros),
                    );
                    bundle_vertex.len() - 1
                });
                faces[fi][c] = id;
                vertex_faces[face[c]].push(fi);
            }
            face_alive[fi] = true;
        }

        let mut vertex_locked = vec![false; vertex_count];
        let mut vertex_boundary = vec![false; vertex_count];
        let mut vertex_quadric = vec![Matrix6::zeros(); vertex_count];
        let mut seam_edges = 0;
        for e in 0..flaps.edge_count() {
            let [a, b] = flaps.endpoints(e);
            if flaps.is_non_manifold(e) || flaps.is_inconsistent(e) {
                vertex_locked[a] = true;
                vertex_locked[b] = true;
            }
            if flaps.half_edge_bundle(e, source).is_seam() {
                seam_edges += 1;
            }
            if !flaps.is_boundary(e) {
                continue;
            }
            vertex_boundary[a] = true;
            vertex_boundary[b] = true;
            let flap = flaps.flaps(e)[0];
            let face = source.faces()[flap.face];
            let (s, t) = flap.corners();
            let normal = triangle_normal(&positions[face[0]], &positions[face[1]], &positions[face[2]]);
            if let Some(normal) = normal {
                let q = boundary_quadric(&positions[face[s]], &positions[face[t]], &normal, options.boundary_weight);
                vertex_quadric[a] += q;
                vertex_quadric[b] += q;
            }
        }

        if counts.non_manifold > 0 || counts.inconsistent > 0 {
            warn!(
                non_manifold = counts.non_manifold,
                inconsistent = counts.inconsistent,
                locked = vertex_locked.iter().filter(|&&l| l).count(),
                "Locking vertices on defective topology"
            );
        }

        let alive_vertices = vertex_faces.iter().filter(|f| !f.is_empty()).count();

        let stats = DecimationStats {
            topology: TopologyReport {
                non_manifold_edges: counts.non_manifold,
                inconsistent_winding_edges: counts.inconsistent,
                degenerate_faces,
                seam_vertices: metrics.seam_vertex_count(),
                seam_edges,
                boundary_edges: counts.boundary,
            },
            ..Default::default()
        };

        let edges = EdgeTable::from_flaps(&flaps, vertex_count);
        let mut decimator = Self {
            mesh: CollapseMesh {
                positions,
                vertex_locked,
                vertex_boundary,
                vertex_faces,
                vertex_quadric,
                bundle_vertex,
                bundle_uv,
                bundle_quadric,
                faces,
                face_alive,
                alive_vertices,
            },
            queue: CandidateQueue::new(edges.len()),
            edges,
            strictness: options.strictness,
            kernel,
            min_normal_dot: options.max_normal_deviation.cos(),
            stats,
            matrices: Vec::new(),
            vectors: Vec::new(),
            values: Vec::new(),
        };

        let mut queued = 0;
        for e in 0..decimator.edges.len() {
            if let Ok(plan) = decimator.plan_collapse(e) {
                decimator.queue.push(e, plan.cost);
                queued += 1;
            }
        }
        debug!(
            edges = decimator.edges.len(),
            bundles = decimator.mesh.bundle_vertex.len(),
            queued,
            "Collapse queue built"
        );

        decimator
    }

    fn plan_collapse(&mut self, edge: usize) -> std::result::Result<CollapsePlan, Rejection> {
        let m = &self.mesh;
        let [a, b] = self.edges.endpoints[edge];
        if m.vertex_locked[a] || m.vertex_locked[b] {
            return Err(Rejection::Locked);
        }

        let faces = m.shared_faces(a, b);
        if faces.is_empty() || faces.len() > 2 {
            return Err(Rejection::NonManifold);
        }
        if faces.len() == 2 && m.vertex_boundary[a] && m.vertex_boundary[b] {
            return Err(Rejection::BoundaryBridge);
        }

        let mut apexes: Vec<usize> = faces
            .iter()
            .filter_map(|&f| m.face_vertices(f).into_iter().find(|&v| v != a && v != b))
            .collect();
        apexes.sort_unstable();
        let around_b = m.neighbors(b);
        let common: Vec<usize> = m
            .neighbors(a)
            .into_iter()
            .filter(|v| around_b.binary_search(v).is_ok())
            .collect();
        if common != apexes {
            return Err(Rejection::LinkCondition);
        }
        // An apex whose two edges are both open would be left dangling
        if apexes
            .iter()
            .any(|&c| m.shared_faces(a, c).len() < 2 && m.shared_faces(b, c).len() < 2)
        {
            return Err(Rejection::LinkCondition);
        }
        if m.merge_duplicates_face(a, b, &faces) {
            return Err(Rejection::LinkCondition);
        }

        // Pair the bundles on either side of the edge
        let mut pairs: Vec<[usize; 2]> = faces
            .iter()
            .filter_map(|&f| Some([m.bundle_at(f, a)?, m.bundle_at(f, b)?]))
            .collect();
        pairs.dedup();
        if pairs.len() == 2 && (pairs[0][0] == pairs[1][0] || pairs[0][1] == pairs[1][1]) {
            // The sides agree at one end only: a seam ends on this edge
            return Err(Rejection::SeamTear);
        }

        let bundles_a = m.bundles(a);
        let bundles_b = m.bundles(b);
        let unpaired_a: Vec<usize> = bundles_a
            .iter()
            .copied()
            .filter(|x| !pairs.iter().any(|p| p[0] == *x))
            .collect();
        let unpaired_b: Vec<usize> = bundles_b
            .iter()
            .copied()
            .filter(|x| !pairs.iter().any(|p| p[1] == *x))
            .collect();

        let (keep_a, layout) = match self.strictness {
            Strictness::Free | Strictness::PreserveUvShape => (true, Layout::Free),
            Strictness::SeamAware if pairs.len() == 2 => {
                if !unpaired_a.is_empty() || !unpaired_b.is_empty() {
                    return Err(Rejection::SeamTear);
                }
                (true, Layout::SeamLine)
            }
            Strictness::SeamAware => match (bundles_a.len() > 1, bundles_b.len() > 1) {
                (true, true) => return Err(Rejection::SeamTear),
                (true, false) => (true, Layout::Anchored { endpoint: 0 }),
                (false, true) => (false, Layout::Anchored { endpoint: 0 }),
                (false, false) => (true, Layout::Free),
            },
        };

        let (survivor, removed, groups, kept, moved) = if keep_a {
            (a, b, pairs, unpaired_a, unpaired_b)
        } else {
            let swapped: Vec<[usize; 2]> = pairs.into_iter().map(|[x, y]| [y, x]).collect();
            (b, a, swapped, unpaired_b, unpaired_a)
        };

        let uv_groups = groups
            .iter()
            .map(|&[bs, br]| {
                let mut quadric = m.bundle_quadric[bs];
                self.kernel
                    .add_matrices(quadric.as_mut_slice(), m.bundle_quadric[br].as_slice());
                UvGroup {
                    quadric,
                    uv_a: m.bundle_uv[bs],
                    uv_b: m.bundle_uv[br],
                }
            })
            .collect();
        let mut fixed: Vec<FixedTerm> = kept
            .iter()
            .chain(&moved)
            .map(|&x| FixedTerm {
                quadric: m.bundle_quadric[x],
                uv: m.bundle_uv[x],
            })
            .collect();
        fixed.push(FixedTerm {
            quadric: m.vertex_quadric[survivor] + m.vertex_quadric[removed],
            uv: Vector2::zeros(),
        });

        let problem = CollapseProblem {
            endpoints: [m.positions[survivor], m.positions[removed]],
            groups: uv_groups,
            fixed,
            layout,
        };
        let placement = solve_placement(&problem, self.strictness);
        let cost = self.evaluate(&problem, &placement);

        Ok(CollapsePlan {
            survivor,
            removed,
            faces,
            groups,
            moved,
            placement,
            cost,
        })
    }

    /// Sum of every term of `problem` at the placement, through the kernel
    fn evaluate(&mut self, problem: &CollapseProblem, placement: &Placement) -> f64 {
        let terms = problem.groups.len() + problem.fixed.len();
        self.matrices.clear();
        self.vectors.clear();
        self.matrices.reserve(terms * MATRIX_LEN);
        self.vectors.reserve(terms * VECTOR_LEN);

        for (group, uv) in problem.groups.iter().zip(&placement.uvs) {
            self.matrices.extend_from_slice(group.quadric.as_slice());
            self.vectors
                .extend_from_slice(homogeneous(&placement.position, uv).as_slice());
        }
        for term in &problem.fixed {
            self.matrices.extend_from_slice(term.quadric.as_slice());
            self.vectors
                .extend_from_slice(homogeneous(&placement.position, &term.uv).as_slice());
        }

        self.values.clear();
        self.values.resize(terms, 0.0);
        self.kernel
            .quadratic_forms(&self.matrices, &self.vectors, &mut self.values);

        let total: f64 = self.values.iter().sum();
        if total.is_nan() {
            return f64::INFINITY;
        }
        let cost = total.max(0.0);
        match placement.method {
            PlacementMethod::Degenerate => DEGENERATE_PENALTY * cost.max(DEGENERATE_FLOOR),
            PlacementMethod::ClosedForm | PlacementMethod::Constrained => cost,
        }
    }

    /// Whether every face that survives the collapse keeps its orientation
    /// within the allowed deviation
    fn preserves_normals(&self, plan: &CollapsePlan) -> bool {
        let m = &self.mesh;
        let moved = |v: usize| v == plan.survivor || v == plan.removed;
        [plan.survivor, plan.removed]
            .iter()
            .flat_map(|&v| m.vertex_faces[v].iter().copied())
            .filter(|f| !plan.faces.contains(f))
            .all(|f| {
                let Some(before) = m.face_normal(f) else {
                    return true;
                };
                let [p, q, r] = m
                    .face_vertices(f)
                    .map(|v| if moved(v) { plan.placement.position } else { m.positions[v] });
                triangle_normal(&p, &q, &r).is_some_and(|after| after.dot(&before) >= self.min_normal_dot)
            })
    }

    fn apply(&mut self, plan: CollapsePlan) {
        let m = &mut self.mesh;
        let (s, r) = (plan.survivor, plan.removed);

        for &f in &plan.faces {
            m.face_alive[f] = false;
            for v in m.face_vertices(f) {
                m.vertex_faces[v].retain(|&g| g != f);
            }
        }

        for ((&[bs, br], uv), quadric) in plan
            .groups
            .iter()
            .zip(&plan.placement.uvs)
            .zip(&plan.placement.merged_quadrics)
        {
            m.bundle_uv[bs] = *uv;
            m.bundle_quadric[bs] = *quadric;
            for &f in &m.vertex_faces[r] {
                for corner in m.faces[f].iter_mut() {
                    if *corner == br {
                        *corner = bs;
                    }
                }
            }
        }
        for &b in &plan.moved {
            m.bundle_vertex[b] = s;
        }

        m.positions[s] = plan.placement.position;
        let removed_quadric = m.vertex_quadric[r];
        self.kernel
            .add_matrices(m.vertex_quadric[s].as_mut_slice(), removed_quadric.as_slice());
        m.vertex_boundary[s] |= m.vertex_boundary[r];
        let faces_r = std::mem::take(&mut m.vertex_faces[r]);
        m.vertex_faces[s].extend(faces_r);
        m.alive_vertices -= 1;

        self.edges.merge_vertex(s, r, &mut self.queue);

        self.stats.collapses_performed += 1;
        if plan.placement.method == PlacementMethod::Degenerate {
            self.stats.degenerate_placements += 1;
        }

        self.rescore_around(s);
    }

    /// Re-plan every edge of `vertex` and of its neighbours
    fn rescore_around(&mut self, vertex: usize) {
        let mut touched: Vec<usize> = self.edges.edges_of(vertex).collect();
        for v in self.mesh.neighbors(vertex) {
            touched.extend(self.edges.edges_of(v));
        }
        touched.sort_unstable();
        touched.dedup();

        for e in touched {
            match self.plan_collapse(e) {
                Ok(plan) => self.queue.update(e, plan.cost),
                Err(_) => self.queue.invalidate(e),
            }
        }
    }

    fn run(&mut self, target: usize) {
        while self.mesh.alive_vertices > target {
            let Some((edge, cost)) = self.queue.pop() else {
                break;
            };
            if !cost.is_finite() {
                break;
            }
            if !self.edges.alive[edge] {
                continue;
            }

            let plan = match self.plan_collapse(edge) {
                Ok(plan) => plan,
                Err(reason) => {
                    self.stats.collapses_rejected_topology += 1;
                    trace!(edge, ?reason, "Collapse rejected");
                    continue;
                }
            };
            if !self.preserves_normals(&plan) {
                self.stats.collapses_rejected_flip += 1;
                trace!(edge, cost, "Collapse would flip a face");
                self.queue.push(edge, f64::INFINITY);
                continue;
            }
            self.apply(plan);
        }
    }
}
