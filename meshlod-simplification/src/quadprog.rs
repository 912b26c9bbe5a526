//! Dense strictly convex quadratic programming
//!
//! Goldfarb–Idnani dual active-set method. Solves
//!
//! ```text
//! min  0.5 * xᵀ G x + g0ᵀ x
//! s.t. CEᵀ x + ce0  = 0
//!      CIᵀ x + ci0 >= 0
//! ```
//!
//! where `G` is symmetric positive definite and constraints are stored one per
//! column of `CE` / `CI`. The method starts from the unconstrained minimum,
//! adds the most violated inequality at each outer step and drops constraints
//! whose multipliers would turn negative. Placement problems here have at most
//! a dozen variables, so the dense `nalgebra` representation is used throughout.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Failure modes of [`solve_quadprog`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QpError {
    #[error("objective matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("equality constraints are linearly dependent")]
    DependentEqualities,

    #[error("constraints are infeasible")]
    Infeasible,

    #[error("no convergence after {0} iterations")]
    IterationLimit(usize),
}

/// Options for [`solve_quadprog`]
#[derive(Debug, Clone)]
pub struct QpOptions {
    /// Maximum number of active-set changes
    pub max_iter: usize,
}

impl Default for QpOptions {
    fn default() -> Self {
        Self { max_iter: 500 }
    }
}

/// Solution of a quadratic program
#[derive(Debug, Clone)]
pub struct QpSolution {
    /// Minimizer
    pub x: DVector<f64>,
    /// Objective value `0.5 xᵀGx + g0ᵀx` at `x`
    pub objective: f64,
    /// Inequality constraints active at the solution (column indices into `CI`)
    pub active: Vec<usize>,
    /// Number of active-set changes performed
    pub iterations: usize,
}

/// Constraint reference stored in the active set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    Equality,
    Inequality(usize),
}

/// Working state of the dual method: `J = L⁻ᵀQ` and the upper-triangular `R`
/// of the active constraint normals, updated by Givens rotations.
struct Factorization {
    j: DMatrix<f64>,
    r: DMatrix<f64>,
    r_norm: f64,
    iq: usize,
}

impl Factorization {
    /// `d = Jᵀ np`
    fn compute_d(&self, np: &DVector<f64>) -> DVector<f64> {
        self.j.tr_mul(np)
    }

    /// Primal step direction `z = J₂ d₂`
    fn update_z(&self, d: &DVector<f64>) -> DVector<f64> {
        let n = d.len();
        let mut z = DVector::zeros(n);
        for i in 0..n {
            let mut sum = 0.0;
            for k in self.iq..n {
                sum += self.j[(i, k)] * d[k];
            }
            z[i] = sum;
        }
        z
    }

    /// Dual step direction `r = R⁻¹ d₁`, written into the first `iq` entries
    fn update_r(&self, d: &DVector<f64>, r: &mut DVector<f64>) {
        for i in (0..self.iq).rev() {
            let mut sum = 0.0;
            for k in i + 1..self.iq {
                sum += self.r[(i, k)] * r[k];
            }
            r[i] = (d[i] - sum) / self.r[(i, i)];
        }
    }

    /// Append the constraint whose transformed normal is `d`.
    ///
    /// Returns `false` when the new normal is linearly dependent on the
    /// active ones. `iq` is incremented either way, unless `n` constraints
    /// are already active, in which case nothing changes.
    fn add_constraint(&mut self, d: &mut DVector<f64>) -> bool {
        let n = d.len();
        if self.iq >= n {
            return false;
        }
        let mut j = n;
        while j > self.iq + 1 {
            j -= 1;
            // Givens rotation zeroing d[j] into d[j - 1]
            let mut cc = d[j - 1];
            let mut ss = d[j];
            let h = cc.hypot(ss);
            if h.abs() < f64::EPSILON {
                continue;
            }
            d[j] = 0.0;
            ss /= h;
            cc /= h;
            if cc < 0.0 {
                cc = -cc;
                ss = -ss;
                d[j - 1] = -h;
            } else {
                d[j - 1] = h;
            }
            let xny = ss / (1.0 + cc);
            for k in 0..n {
                let t1 = self.j[(k, j - 1)];
                let t2 = self.j[(k, j)];
                self.j[(k, j - 1)] = t1 * cc + t2 * ss;
                self.j[(k, j)] = xny * (t1 + self.j[(k, j - 1)]) - t2;
            }
        }

        self.iq += 1;
        for i in 0..self.iq {
            self.r[(i, self.iq - 1)] = d[i];
        }

        let pivot = d[self.iq - 1].abs();
        if pivot <= f64::EPSILON * self.r_norm {
            return false;
        }
        self.r_norm = self.r_norm.max(pivot);
        true
    }

    /// Remove `target` from the active set and restore the triangular
    /// structure of `R`.
    fn delete_constraint(&mut self, active: &mut [Active], u: &mut DVector<f64>, p: usize, target: Active) {
        let n = self.j.nrows();
        let Some(qq) = (p..self.iq).find(|&i| active[i] == target) else {
            return;
        };

        for i in qq..self.iq - 1 {
            active[i] = active[i + 1];
            u[i] = u[i + 1];
            for k in 0..n {
                self.r[(k, i)] = self.r[(k, i + 1)];
            }
        }
        active[self.iq - 1] = active[self.iq];
        u[self.iq - 1] = u[self.iq];
        active[self.iq] = Active::Equality;
        u[self.iq] = 0.0;
        for k in 0..self.iq {
            self.r[(k, self.iq - 1)] = 0.0;
        }

        self.iq -= 1;
        if self.iq == 0 {
            return;
        }

        for j in qq..self.iq {
            let mut cc = self.r[(j, j)];
            let mut ss = self.r[(j + 1, j)];
            let h = cc.hypot(ss);
            if h.abs() < f64::EPSILON {
                continue;
            }
            cc /= h;
            ss /= h;
            self.r[(j + 1, j)] = 0.0;
            if cc < 0.0 {
                self.r[(j, j)] = -h;
                cc = -cc;
                ss = -ss;
            } else {
                self.r[(j, j)] = h;
            }
            let xny = ss / (1.0 + cc);
            for k in j + 1..self.iq {
                let t1 = self.r[(j, k)];
                let t2 = self.r[(j + 1, k)];
                self.r[(j, k)] = t1 * cc + t2 * ss;
                self.r[(j + 1, k)] = xny * (t1 + self.r[(j, k)]) - t2;
            }
            for k in 0..n {
                let t1 = self.j[(k, j)];
                let t2 = self.j[(k, j + 1)];
                self.j[(k, j)] = t1 * cc + t2 * ss;
                self.j[(k, j + 1)] = xny * (self.j[(k, j)] + t1) - t2;
            }
        }
    }
}

fn check_dimensions(
    g: &DMatrix<f64>,
    g0: &DVector<f64>,
    ce: &DMatrix<f64>,
    ce0: &DVector<f64>,
    ci: &DMatrix<f64>,
    ci0: &DVector<f64>,
) -> Result<(), QpError> {
    let n = g.nrows();
    if g.ncols() != n {
        return Err(QpError::DimensionMismatch(format!("G is {}x{}", n, g.ncols())));
    }
    if g0.len() != n {
        return Err(QpError::DimensionMismatch(format!("g0 has {} entries, expected {n}", g0.len())));
    }
    if ce.nrows() != n || ce.ncols() != ce0.len() {
        return Err(QpError::DimensionMismatch(format!(
            "CE is {}x{} with {} offsets",
            ce.nrows(),
            ce.ncols(),
            ce0.len()
        )));
    }
    if ci.nrows() != n || ci.ncols() != ci0.len() {
        return Err(QpError::DimensionMismatch(format!(
            "CI is {}x{} with {} offsets",
            ci.nrows(),
            ci.ncols(),
            ci0.len()
        )));
    }
    Ok(())
}

/// Solve a strictly convex quadratic program.
///
/// Empty constraint sets are passed as `n x 0` matrices with empty offset
/// vectors; see [`no_constraints`].
pub fn solve_quadprog(
    g: &DMatrix<f64>,
    g0: &DVector<f64>,
    ce: &DMatrix<f64>,
    ce0: &DVector<f64>,
    ci: &DMatrix<f64>,
    ci0: &DVector<f64>,
    options: &QpOptions,
) -> Result<QpSolution, QpError> {
    check_dimensions(g, g0, ce, ce0, ci, ci0)?;
    let n = g.nrows();
    let p = ce.ncols();
    let m = ci.ncols();

    let c1 = g.trace();
    let chol = g.clone().cholesky().ok_or(QpError::NotPositiveDefinite)?;
    // J = L⁻ᵀ
    let j = chol
        .l()
        .transpose()
        .solve_upper_triangular(&DMatrix::identity(n, n))
        .ok_or(QpError::NotPositiveDefinite)?;
    let c2 = j.trace();

    let mut fact = Factorization {
        j,
        r: DMatrix::zeros(n, n),
        r_norm: 1.0,
        iq: 0,
    };

    // Unconstrained minimum
    let mut x = -chol.solve(g0);

    // One spare slot for the constraint being added
    let slots = m + p + 1;
    let mut u = DVector::zeros(slots);
    let mut r = DVector::zeros(slots);
    let mut active = vec![Active::Equality; slots];

    for i in 0..p {
        let np = ce.column(i).into_owned();
        let mut d = fact.compute_d(&np);
        let z = fact.update_z(&d);
        fact.update_r(&d, &mut r);

        let zz = z.dot(&z);
        let t2 = if zz.abs() > f64::EPSILON {
            (-np.dot(&x) - ce0[i]) / z.dot(&np)
        } else {
            0.0
        };
        x += &z * t2;
        u[fact.iq] = t2;
        for k in 0..fact.iq {
            u[k] -= t2 * r[k];
        }
        active[i] = Active::Equality;

        if !fact.add_constraint(&mut d) {
            return Err(QpError::DependentEqualities);
        }
    }

    let mut s = DVector::zeros(m);
    // inactive[i]: inequality i may still be picked
    let mut inactive = vec![true; m];
    let mut iterations = 0;

    'outer: loop {
        iterations += 1;
        if iterations > options.max_iter {
            return Err(QpError::IterationLimit(options.max_iter));
        }

        for k in p..fact.iq {
            if let Active::Inequality(ip) = active[k] {
                inactive[ip] = false;
            }
        }

        let mut psi = 0.0;
        for i in 0..m {
            let sum = ci.column(i).dot(&x) + ci0[i];
            s[i] = sum;
            psi += sum.min(0.0);
        }
        if psi.abs() <= m as f64 * f64::EPSILON * c1 * c2 * 100.0 {
            break 'outer;
        }

        let u_old = u.clone();
        let active_old = active.clone();
        let x_old = x.clone();
        let mut excluded = vec![false; m];

        'select: loop {
            // Most violated inequality
            let mut ss = 0.0;
            let mut ip = 0;
            for i in 0..m {
                if s[i] < ss && inactive[i] && !excluded[i] {
                    ss = s[i];
                    ip = i;
                }
            }
            if ss >= 0.0 {
                break 'outer;
            }

            let np = ci.column(ip).into_owned();
            u[fact.iq] = 0.0;
            active[fact.iq] = Active::Inequality(ip);

            'step: loop {
                iterations += 1;
                if iterations > options.max_iter {
                    return Err(QpError::IterationLimit(options.max_iter));
                }

                let mut d = fact.compute_d(&np);
                let z = fact.update_z(&d);
                fact.update_r(&d, &mut r);

                // Partial step length: largest dual step keeping multipliers >= 0
                let mut t1 = f64::INFINITY;
                let mut blocking = None;
                for k in p..fact.iq {
                    if r[k] > 0.0 && u[k] / r[k] < t1 {
                        t1 = u[k] / r[k];
                        blocking = Some(active[k]);
                    }
                }

                // Full step length: step making constraint ip active
                let zz = z.dot(&z);
                let t2 = if zz.abs() > f64::EPSILON {
                    let t = -s[ip] / z.dot(&np);
                    if t < 0.0 {
                        f64::INFINITY
                    } else {
                        t
                    }
                } else {
                    f64::INFINITY
                };

                let t = t1.min(t2);
                if !t.is_finite() {
                    return Err(QpError::Infeasible);
                }

                if !t2.is_finite() {
                    // Dual step only
                    for k in 0..fact.iq {
                        u[k] -= t * r[k];
                    }
                    u[fact.iq] += t;
                    if let Some(l) = blocking {
                        if let Active::Inequality(li) = l {
                            inactive[li] = true;
                        }
                        fact.delete_constraint(&mut active, &mut u, p, l);
                    }
                    continue 'step;
                }

                // Primal and dual step
                x += &z * t;
                for k in 0..fact.iq {
                    u[k] -= t * r[k];
                }
                u[fact.iq] += t;

                if t == t2 {
                    if !fact.add_constraint(&mut d) {
                        // Degenerate: roll back and exclude ip from this pass
                        excluded[ip] = true;
                        fact.delete_constraint(&mut active, &mut u, p, Active::Inequality(ip));
                        inactive.iter_mut().for_each(|flag| *flag = true);
                        for k in p..fact.iq {
                            active[k] = active_old[k];
                            u[k] = u_old[k];
                            if let Active::Inequality(ai) = active[k] {
                                inactive[ai] = false;
                            }
                        }
                        x.copy_from(&x_old);
                        continue 'select;
                    }
                    inactive[ip] = false;
                    continue 'outer;
                }

                // Partial step: drop the blocking constraint and retry ip
                if let Some(l) = blocking {
                    if let Active::Inequality(li) = l {
                        inactive[li] = true;
                    }
                    fact.delete_constraint(&mut active, &mut u, p, l);
                }
                s[ip] = ci.column(ip).dot(&x) + ci0[ip];
            }
        }
    }

    let objective = 0.5 * (g * &x).dot(&x) + g0.dot(&x);
    let active_set = (p..fact.iq)
        .filter_map(|k| match active[k] {
            Active::Inequality(i) => Some(i),
            Active::Equality => None,
        })
        .collect();

    Ok(QpSolution {
        x,
        objective,
        active: active_set,
        iterations,
    })
}

/// An empty constraint block for an `n`-variable problem
pub fn no_constraints(n: usize) -> (DMatrix<f64>, DVector<f64>) {
    (DMatrix::zeros(n, 0), DVector::zeros(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unconstrained() {
        let g = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]);
        let g0 = DVector::from_vec(vec![-2.0, -8.0]);
        let (ce, ce0) = no_constraints(2);
        let (ci, ci0) = no_constraints(2);
        let sol = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default()).unwrap();
        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(sol.x[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(sol.objective, -9.0, epsilon = 1e-12);
        assert!(sol.active.is_empty());
    }

    #[test]
    fn test_reference_problem() {
        // min 2x² - 2xy + 2y² + 6x  s.t.  x + y = 3, x >= 0, y >= 0, x + y >= 2
        let g = DMatrix::from_row_slice(2, 2, &[4.0, -2.0, -2.0, 4.0]);
        let g0 = DVector::from_vec(vec![6.0, 0.0]);
        let ce = DMatrix::from_column_slice(2, 1, &[1.0, 1.0]);
        let ce0 = DVector::from_vec(vec![-3.0]);
        let ci = DMatrix::from_column_slice(2, 3, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let ci0 = DVector::from_vec(vec![0.0, 0.0, -2.0]);
        let sol = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default()).unwrap();
        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(sol.x[1], 2.0, epsilon = 1e-9);
        assert_relative_eq!(sol.objective, 12.0, epsilon = 1e-9);
        assert!(sol.active.is_empty());
    }

    #[test]
    fn test_homogeneous_coordinate_fixed() {
        // Sum of plane-like outer products: a positive semi-definite quadric
        let planes = [
            [1.0, 0.0, 0.0, 0.2, 0.0, -0.5],
            [0.0, 1.0, 0.0, 0.0, 0.3, -0.25],
            [0.0, 0.0, 1.0, 0.1, 0.1, 0.75],
            [0.3, 0.4, 0.0, 1.0, 0.0, -1.0],
            [0.0, 0.2, 0.5, 0.0, 1.0, 0.5],
            [0.5, 0.5, 0.5, 0.0, 0.0, 1.0],
        ];
        let mut q = DMatrix::<f64>::identity(6, 6) * 1e-6;
        for plane in &planes {
            let a = DVector::from_column_slice(plane);
            q += &a * a.transpose();
        }
        let g = &q * 2.0;
        let g0 = DVector::zeros(6);
        let mut ce = DMatrix::zeros(6, 1);
        ce[(5, 0)] = 1.0;
        let ce0 = DVector::from_vec(vec![-1.0]);
        let (ci, ci0) = no_constraints(6);

        let sol = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default()).unwrap();
        assert!((sol.x[5] - 1.0).abs() < 1e-6);
        assert!(sol.objective.is_finite());
        assert!(sol.objective >= 0.0);
        assert_relative_eq!(sol.objective, (q * &sol.x).dot(&sol.x), epsilon = 1e-9);
    }

    #[test]
    fn test_box_constrained_corner() {
        // Minimum of (x - 5)² + (y + 3)² over 0 <= x, y <= 2 is the corner (2, 0)
        let g = DMatrix::<f64>::identity(2, 2) * 2.0;
        let g0 = DVector::from_vec(vec![-10.0, 6.0]);
        let (ce, ce0) = no_constraints(2);
        #[rustfmt::skip]
        let ci = DMatrix::from_row_slice(2, 4, &[
            1.0, -1.0, 0.0,  0.0,
            0.0,  0.0, 1.0, -1.0,
        ]);
        let ci0 = DVector::from_vec(vec![0.0, 2.0, 0.0, 2.0]);
        let sol = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default()).unwrap();
        assert!((sol.x[0] - 2.0).abs() < 1e-3);
        assert!(sol.x[1].abs() < 1e-3);
        let mut active = sol.active.clone();
        active.sort_unstable();
        assert_eq!(active, vec![1, 2]);
    }

    #[test]
    fn test_infeasible() {
        let g = DMatrix::<f64>::identity(1, 1);
        let g0 = DVector::from_vec(vec![0.0]);
        let (ce, ce0) = no_constraints(1);
        // x >= 1 and x <= 0
        let ci = DMatrix::from_row_slice(1, 2, &[1.0, -1.0]);
        let ci0 = DVector::from_vec(vec![-1.0, 0.0]);
        let result = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default());
        assert_eq!(result.unwrap_err(), QpError::Infeasible);
    }

    #[test]
    fn test_not_positive_definite() {
        let g = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        let g0 = DVector::zeros(2);
        let (ce, ce0) = no_constraints(2);
        let (ci, ci0) = no_constraints(2);
        let result = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default());
        assert_eq!(result.unwrap_err(), QpError::NotPositiveDefinite);
    }

    #[test]
    fn test_dependent_equalities() {
        let g = DMatrix::<f64>::identity(2, 2);
        let g0 = DVector::zeros(2);
        let ce = DMatrix::from_column_slice(2, 2, &[1.0, 0.0, 2.0, 0.0]);
        let ce0 = DVector::from_vec(vec![-1.0, -2.0]);
        let (ci, ci0) = no_constraints(2);
        let result = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default());
        assert_eq!(result.unwrap_err(), QpError::DependentEqualities);
    }

    #[test]
    fn test_more_equalities_than_variables() {
        // x = 1 stated twice
        let g = DMatrix::<f64>::identity(1, 1);
        let g0 = DVector::zeros(1);
        let ce = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let ce0 = DVector::from_vec(vec![-1.0, -1.0]);
        let (ci, ci0) = no_constraints(1);
        let result = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default());
        assert_eq!(result.unwrap_err(), QpError::DependentEqualities);

        // Three independent-looking rows in two variables
        let g = DMatrix::<f64>::identity(2, 2);
        let g0 = DVector::zeros(2);
        let ce = DMatrix::from_column_slice(2, 3, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let ce0 = DVector::from_vec(vec![-1.0, -1.0, -3.0]);
        let (ci, ci0) = no_constraints(2);
        let result = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default());
        assert_eq!(result.unwrap_err(), QpError::DependentEqualities);
    }

    #[test]
    fn test_equalities_pin_every_variable() {
        let g = DMatrix::<f64>::identity(2, 2);
        let g0 = DVector::zeros(2);
        let ce = DMatrix::<f64>::identity(2, 2);
        let ce0 = DVector::from_vec(vec![-3.0, 4.0]);
        let (ci, ci0) = no_constraints(2);
        let sol = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default()).unwrap();
        assert_relative_eq!(sol.x[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(sol.x[1], -4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dimension_mismatch() {
        let g = DMatrix::<f64>::identity(2, 2);
        let g0 = DVector::zeros(3);
        let (ce, ce0) = no_constraints(2);
        let (ci, ci0) = no_constraints(2);
        let result = solve_quadprog(&g, &g0, &ce, &ce0, &ci, &ci0, &QpOptions::default());
        assert!(matches!(result, Err(QpError::DimensionMismatch(_))));
    }
}
