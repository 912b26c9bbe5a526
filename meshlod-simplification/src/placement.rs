//! Optimal placement of a collapsed vertex
//!
//! A collapse merges the bundles of its two endpoints into one or more UV
//! groups. The unknowns are the new position, one UV per group and, for seam
//! edges, the shared parameter along the seam. The summed quadrics give a
//! quadratic objective `f(x) = xᵀHx + 2hᵀx + c`; each strictness level maps
//! to a constraint builder, and the solve goes closed form (Cholesky) when no
//! constraints apply, constrained QP otherwise, and falls back to the
//! anchor point when both fail.

use nalgebra::{DMatrix, DVector, Matrix6, Vector2, Vector3};

use crate::options::Strictness;
use crate::quadprog::{no_constraints, solve_quadprog, QpOptions};

/// Relative size of the regularization pulling towards the anchor point
const REGULARIZATION: f64 = 1e-6;
/// Slack allowed before a UV is considered outside its source span
const BOX_SLACK: f64 = 1e-9;

/// Bundles merged into one UV by a collapse
#[derive(Debug, Clone, PartialEq)]
pub struct UvGroup {
    /// Sum of the merged bundle quadrics
    pub quadric: Matrix6<f64>,
    /// UV of the group's bundle at the first endpoint
    pub uv_a: Vector2<f64>,
    /// UV of the group's bundle at the second endpoint
    pub uv_b: Vector2<f64>,
}

/// A quadric evaluated at a UV that the collapse does not move
#[derive(Debug, Clone, PartialEq)]
pub struct FixedTerm {
    pub quadric: Matrix6<f64>,
    pub uv: Vector2<f64>,
}

/// Shape of the unknowns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Position and every group UV are free
    Free,
    /// Group UVs slide along their seam segments with one shared parameter
    SeamLine,
    /// Position and UV are pinned to one endpoint (0 or 1)
    Anchored { endpoint: usize },
}

/// Everything needed to place one collapse
#[derive(Debug, Clone)]
pub struct CollapseProblem {
    pub endpoints: [Vector3<f64>; 2],
    pub groups: Vec<UvGroup>,
    pub fixed: Vec<FixedTerm>,
    pub layout: Layout,
}

/// How a placement was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementMethod {
    ClosedForm,
    Constrained,
    /// Neither solve succeeded; the anchor point was used
    Degenerate,
}

/// Solved collapse target
#[derive(Debug, Clone)]
pub struct Placement {
    pub position: Vector3<f64>,
    /// One UV per group, in group order
    pub uvs: Vec<Vector2<f64>>,
    /// Quadric of each merged group, in group order
    pub merged_quadrics: Vec<Matrix6<f64>>,
    /// Unregularized objective at the placement
    pub objective: f64,
    pub method: PlacementMethod,
}

/// Linear constraints in the `CEᵀx + ce0 = 0`, `CIᵀx + ci0 >= 0` form
#[derive(Debug, Clone)]
pub struct Constraints {
    pub ce: DMatrix<f64>,
    pub ce0: DVector<f64>,
    pub ci: DMatrix<f64>,
    pub ci0: DVector<f64>,
}

impl Constraints {
    fn none(n: usize) -> Self {
        let (ce, ce0) = no_constraints(n);
        let (ci, ci0) = no_constraints(n);
        Self { ce, ce0, ci, ci0 }
    }

    fn from_rows(n: usize, equalities: Vec<(Vec<(usize, f64)>, f64)>, inequalities: Vec<(Vec<(usize, f64)>, f64)>) -> Self {
        let columns = |rows: &[(Vec<(usize, f64)>, f64)]| {
            let mut matrix = DMatrix::<f64>::zeros(n, rows.len());
            let mut offsets = DVector::<f64>::zeros(rows.len());
            for (k, (coefficients, offset)) in rows.iter().enumerate() {
                for &(i, value) in coefficients {
                    matrix[(i, k)] = value;
                }
                offsets[k] = *offset;
            }
            (matrix, offsets)
        };
        let (ce, ce0) = columns(&equalities);
        let (ci, ci0) = columns(&inequalities);
        Self { ce, ce0, ci, ci0 }
    }

    pub fn is_empty(&self) -> bool {
        self.ce.ncols() == 0 && self.ci.ncols() == 0
    }
}

impl CollapseProblem {
    /// Number of unknowns
    pub fn dimension(&self) -> usize {
        3 + 2 * self.groups.len() + usize::from(self.layout == Layout::SeamLine)
    }

    fn uv_index(&self, group: usize) -> usize {
        3 + 2 * group
    }

    fn seam_parameter_index(&self) -> usize {
        3 + 2 * self.groups.len()
    }

    /// Point the regularization pulls towards and the degenerate fallback
    pub fn anchor(&self) -> DVector<f64> {
        let mut x = DVector::zeros(self.dimension());
        // Weight of the second endpoint
        let s = match self.layout {
            Layout::Anchored { endpoint } => if endpoint == 1 { 1.0 } else { 0.0 },
            Layout::Free | Layout::SeamLine => 0.5,
        };
        let position = self.endpoints[0] * (1.0 - s) + self.endpoints[1] * s;
        x.fixed_rows_mut::<3>(0).copy_from(&position);
        for (k, group) in self.groups.iter().enumerate() {
            let i = self.uv_index(k);
            x.fixed_rows_mut::<2>(i).copy_from(&(group.uv_a * (1.0 - s) + group.uv_b * s));
        }
        if self.layout == Layout::SeamLine {
            let t = self.seam_parameter_index();
            x[t] = 0.5;
        }
        x
    }
}

/// Quadratic objective `xᵀHx + 2hᵀx + c`
#[derive(Debug, Clone)]
struct Objective {
    h: DMatrix<f64>,
    g: DVector<f64>,
    c: f64,
}

#[derive(Clone, Copy)]
enum Slot {
    Var(usize),
    Fixed(f64),
}

impl Objective {
    fn zeros(n: usize) -> Self {
        Self {
            h: DMatrix::zeros(n, n),
            g: DVector::zeros(n),
            c: 0.0,
        }
    }

    /// Add `vᵀQv` where each entry of `v` is either an unknown or a constant
    fn accumulate(&mut self, q: &Matrix6<f64>, slots: [Slot; 6]) {
        for i in 0..6 {
            for j in 0..6 {
                let value = q[(i, j)];
                match (slots[i], slots[j]) {
                    (Slot::Var(a), Slot::Var(b)) => self.h[(a, b)] += value,
                    (Slot::Var(a), Slot::Fixed(k)) => self.g[a] += value * k,
                    (Slot::Fixed(_), Slot::Var(_)) => {}
                    (Slot::Fixed(k), Slot::Fixed(l)) => self.c += k * value * l,
                }
            }
        }
    }

    fn assemble(problem: &CollapseProblem) -> Self {
        let mut objective = Self::zeros(problem.dimension());
        for (k, group) in problem.groups.iter().enumerate() {
            let u = problem.uv_index(k);
            objective.accumulate(
                &group.quadric,
                [
                    Slot::Var(0),
                    Slot::Var(1),
                    Slot::Var(2),
                    Slot::Var(u),
                    Slot::Var(u + 1),
                    Slot::Fixed(1.0),
                ],
            );
        }
        for term in &problem.fixed {
            objective.accumulate(
                &term.quadric,
                [
                    Slot::Var(0),
                    Slot::Var(1),
                    Slot::Var(2),
                    Slot::Fixed(term.uv.x),
                    Slot::Fixed(term.uv.y),
                    Slot::Fixed(1.0),
                ],
            );
        }
        objective
    }

    fn value(&self, x: &DVector<f64>) -> f64 {
        (&self.h * x).dot(x) + 2.0 * self.g.dot(x) + self.c
    }

    /// Add `ε‖x - anchor‖²` with `ε` relative to the mean curvature
    fn regularized(&self, anchor: &DVector<f64>) -> Self {
        let n = self.h.nrows();
        let mean = self.h.diagonal().mean();
        let epsilon = if mean.is_finite() && mean > 0.0 {
            REGULARIZATION * mean
        } else {
            1e-12
        };
        let mut out = self.clone();
        for i in 0..n {
            out.h[(i, i)] += epsilon;
        }
        out.g -= anchor * epsilon;
        out.c += epsilon * anchor.dot(anchor);
        out
    }

    fn minimize(&self) -> Option<DVector<f64>> {
        let chol = self.h.clone().cholesky()?;
        let x = chol.solve(&(-&self.g));
        x.iter().all(|v| v.is_finite()).then_some(x)
    }
}

/// Builds the constraint set of one strictness level from the problem and
/// the unconstrained optimum, when there is one
type ConstraintBuilder = fn(&CollapseProblem, Option<&DVector<f64>>) -> Constraints;

fn constraint_builder(strictness: Strictness) -> ConstraintBuilder {
    match strictness {
        Strictness::Free => free_constraints,
        Strictness::PreserveUvShape => uv_shape_constraints,
        Strictness::SeamAware => seam_constraints,
    }
}

fn free_constraints(problem: &CollapseProblem, _: Option<&DVector<f64>>) -> Constraints {
    Constraints::none(problem.dimension())
}

/// Keep each merged UV inside the box spanned by its two source UVs, but
/// only when the unconstrained optimum leaves it
fn uv_shape_constraints(problem: &CollapseProblem, closed_form: Option<&DVector<f64>>) -> Constraints {
    let n = problem.dimension();
    let Some(x) = closed_form else {
        return Constraints::none(n);
    };

    let bounds: Vec<(usize, f64, f64)> = problem
        .groups
        .iter()
        .enumerate()
        .flat_map(|(k, group)| {
            let u = problem.uv_index(k);
            (0..2).map(move |axis| {
                let lo = group.uv_a[axis].min(group.uv_b[axis]);
                let hi = group.uv_a[axis].max(group.uv_b[axis]);
                (u + axis, lo, hi)
            })
        })
        .collect();

    let outside = bounds
        .iter()
        .any(|&(i, lo, hi)| x[i] < lo - BOX_SLACK || x[i] > hi + BOX_SLACK);
    if !outside {
        return Constraints::none(n);
    }

    let mut inequalities = Vec::with_capacity(bounds.len() * 2);
    for (i, lo, hi) in bounds {
        inequalities.push((vec![(i, 1.0)], -lo));
        inequalities.push((vec![(i, -1.0)], hi));
    }
    Constraints::from_rows(n, Vec::new(), inequalities)
}

/// Seam line: `uv_k = uv_a + t (uv_b - uv_a)` for every group, `0 <= t <= 1`.
/// Anchored: position and UV equal the anchor endpoint.
fn seam_constraints(problem: &CollapseProblem, _: Option<&DVector<f64>>) -> Constraints {
    let n = problem.dimension();
    match problem.layout {
        Layout::Free => Constraints::none(n),
        Layout::SeamLine => {
            let t = problem.seam_parameter_index();
            let mut equalities = Vec::with_capacity(problem.groups.len() * 2);
            for (k, group) in problem.groups.iter().enumerate() {
                let u = problem.uv_index(k);
                for axis in 0..2 {
                    let span = group.uv_b[axis] - group.uv_a[axis];
                    equalities.push((vec![(u + axis, 1.0), (t, -span)], -group.uv_a[axis]));
                }
            }
            let inequalities = vec![(vec![(t, 1.0)], 0.0), (vec![(t, -1.0)], 1.0)];
            Constraints::from_rows(n, equalities, inequalities)
        }
        Layout::Anchored { endpoint } => {
            let position = problem.endpoints[endpoint.min(1)];
            let mut equalities = Vec::with_capacity(3 + problem.groups.len() * 2);
            for axis in 0..3 {
                equalities.push((vec![(axis, 1.0)], -position[axis]));
            }
            for (k, group) in problem.groups.iter().enumerate() {
                let uv = if endpoint == 1 { group.uv_b } else { group.uv_a };
                let u = problem.uv_index(k);
                for axis in 0..2 {
                    equalities.push((vec![(u + axis, 1.0)], -uv[axis]));
                }
            }
            Constraints::from_rows(n, equalities, Vec::new())
        }
    }
}

/// Solve for the collapse target under `strictness`
pub fn solve_placement(problem: &CollapseProblem, strictness: Strictness) -> Placement {
    let objective = Objective::assemble(problem);
    let anchor = problem.anchor();
    let regularized = objective.regularized(&anchor);

    let closed_form = regularized.minimize();
    let constraints = constraint_builder(strictness)(problem, closed_form.as_ref());

    let (x, method) = match closed_form {
        Some(x) if constraints.is_empty() => (x, PlacementMethod::ClosedForm),
        _ => {
            let g = &regularized.h * 2.0;
            let g0 = &regularized.g * 2.0;
            let solved = solve_quadprog(
                &g,
                &g0,
                &constraints.ce,
                &constraints.ce0,
                &constraints.ci,
                &constraints.ci0,
                &QpOptions::default(),
            );
            match solved {
                Ok(solution) if solution.x.iter().all(|v| v.is_finite()) => {
                    (solution.x, PlacementMethod::Constrained)
                }
                _ => (anchor, PlacementMethod::Degenerate),
            }
        }
    };

    let position = Vector3::new(x[0], x[1], x[2]);
    let uvs = (0..problem.groups.len())
        .map(|k| {
            let u = problem.uv_index(k);
            Vector2::new(x[u], x[u + 1])
        })
        .collect();

    Placement {
        position,
        uvs,
        merged_quadrics: problem.groups.iter().map(|g| g.quadric).collect(),
        objective: objective.value(&x),
        method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quadric::{face_quadric, plane_quadric};
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    /// Quadric of the z = 0 plane with UV = (x, y)
    fn planar_quadric() -> Matrix6<f64> {
        face_quadric(
            [
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            [Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0)],
            1.0,
        )
    }

    fn corner_quadric() -> Matrix6<f64> {
        // Planes x = 1, y = 2 and z = 3 meet in one point
        plane_quadric(&Vector4::new(1.0, 0.0, 0.0, -1.0))
            + plane_quadric(&Vector4::new(0.0, 1.0, 0.0, -2.0))
            + plane_quadric(&Vector4::new(0.0, 0.0, 1.0, -3.0))
    }

    fn problem(groups: Vec<UvGroup>, fixed: Vec<FixedTerm>, layout: Layout) -> CollapseProblem {
        CollapseProblem {
            endpoints: [Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)],
            groups,
            fixed,
            layout,
        }
    }

    #[test]
    fn test_closed_form_finds_plane_intersection() {
        let p = problem(
            vec![UvGroup {
                quadric: corner_quadric() + planar_quadric() * 1e-3,
                uv_a: Vector2::new(0.0, 0.0),
                uv_b: Vector2::new(1.0, 0.0),
            }],
            Vec::new(),
            Layout::Free,
        );
        let placement = solve_placement(&p, Strictness::Free);
        assert_eq!(placement.method, PlacementMethod::ClosedForm);
        assert_relative_eq!(placement.position, Vector3::new(1.0, 2.0, 3.0), epsilon = 1e-2);
        assert_eq!(placement.uvs.len(), 1);
        assert!(placement.objective >= 0.0);
    }

    #[test]
    fn test_fixed_terms_only_constrain_position() {
        let p = problem(
            Vec::new(),
            vec![FixedTerm {
                quadric: corner_quadric(),
                uv: Vector2::new(0.3, 0.3),
            }],
            Layout::Free,
        );
        let placement = solve_placement(&p, Strictness::Free);
        assert!(placement.uvs.is_empty());
        assert_relative_eq!(placement.position, Vector3::new(1.0, 2.0, 3.0), epsilon = 1e-4);
        assert_relative_eq!(placement.objective, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_uv_box_applied_when_needed() {
        // The plane quadric wants uv = (x, y); the position is pulled to
        // x = 1, y = 2 so the UV optimum (1, 2) leaves the box [0, 1] x [0, 0]
        let group = UvGroup {
            quadric: planar_quadric() * 10.0 + corner_quadric(),
            uv_a: Vector2::new(0.0, 0.0),
            uv_b: Vector2::new(1.0, 0.0),
        };
        let free = solve_placement(&problem(vec![group.clone()], Vec::new(), Layout::Free), Strictness::Free);
        assert_eq!(free.method, PlacementMethod::ClosedForm);
        assert!(free.uvs[0].y > 0.5);

        let boxed = solve_placement(
            &problem(vec![group], Vec::new(), Layout::Free),
            Strictness::PreserveUvShape,
        );
        assert_eq!(boxed.method, PlacementMethod::Constrained);
        let uv = boxed.uvs[0];
        assert!(uv.x >= -1e-9 && uv.x <= 1.0 + 1e-9);
        assert!(uv.y.abs() < 1e-6);
        assert!(boxed.objective >= free.objective - 1e-9);
    }

    #[test]
    fn test_uv_box_not_applied_inside() {
        let group = UvGroup {
            quadric: planar_quadric(),
            uv_a: Vector2::new(0.0, 0.0),
            uv_b: Vector2::new(1.0, 0.0),
        };
        let placement = solve_placement(
            &problem(vec![group], Vec::new(), Layout::Free),
            Strictness::PreserveUvShape,
        );
        assert_eq!(placement.method, PlacementMethod::ClosedForm);
        // Regularization pulls the flat solution to the midpoint
        assert_relative_eq!(placement.position, Vector3::new(0.5, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(placement.uvs[0], Vector2::new(0.5, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_seam_line_keeps_uvs_on_segments() {
        let groups = vec![
            UvGroup {
                quadric: planar_quadric(),
                uv_a: Vector2::new(0.0, 0.0),
                uv_b: Vector2::new(1.0, 0.0),
            },
            UvGroup {
                quadric: planar_quadric(),
                uv_a: Vector2::new(0.5, 0.5),
                uv_b: Vector2::new(0.5, 1.5),
            },
        ];
        let p = problem(groups, Vec::new(), Layout::SeamLine);
        assert_eq!(p.dimension(), 8);
        let placement = solve_placement(&p, Strictness::SeamAware);
        assert_eq!(placement.method, PlacementMethod::Constrained);

        let t = placement.uvs[0].x;
        assert!((-1e-9..=1.0 + 1e-9).contains(&t));
        assert_relative_eq!(placement.uvs[0], Vector2::new(t, 0.0), epsilon = 1e-9);
        assert_relative_eq!(placement.uvs[1], Vector2::new(0.5, 0.5 + t), epsilon = 1e-9);
    }

    #[test]
    fn test_anchored_layout_pins_endpoint() {
        let group = UvGroup {
            quadric: corner_quadric(),
            uv_a: Vector2::new(0.25, 0.75),
            uv_b: Vector2::new(0.5, 0.5),
        };
        let p = problem(vec![group], Vec::new(), Layout::Anchored { endpoint: 1 });
        let placement = solve_placement(&p, Strictness::SeamAware);
        assert_eq!(placement.method, PlacementMethod::Constrained);
        assert_relative_eq!(placement.position, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(placement.uvs[0], Vector2::new(0.5, 0.5), epsilon = 1e-9);
        // The corner quadric at (1, 0, 0) measures 2² + 3²
        assert_relative_eq!(placement.objective, 13.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_quadrics_fall_back_to_anchor() {
        let group = UvGroup {
            quadric: Matrix6::zeros(),
            uv_a: Vector2::new(0.0, 0.0),
            uv_b: Vector2::new(1.0, 1.0),
        };
        let placement = solve_placement(&problem(vec![group], Vec::new(), Layout::Free), Strictness::Free);
        // Regularization alone still gives a well-posed solve at the midpoint
        assert_ne!(placement.method, PlacementMethod::Degenerate);
        assert_relative_eq!(placement.position, Vector3::new(0.5, 0.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(placement.uvs[0], Vector2::new(0.5, 0.5), epsilon = 1e-9);
    }

    #[test]
    fn test_non_finite_quadric_is_degenerate() {
        let group = UvGroup {
            quadric: Matrix6::from_element(f64::NAN),
            uv_a: Vector2::new(0.0, 0.0),
            uv_b: Vector2::new(1.0, 1.0),
        };
        let placement = solve_placement(&problem(vec![group], Vec::new(), Layout::Free), Strictness::Free);
        assert_eq!(placement.method, PlacementMethod::Degenerate);
        assert_relative_eq!(placement.position, Vector3::new(0.5, 0.0, 0.0));
    }
}
