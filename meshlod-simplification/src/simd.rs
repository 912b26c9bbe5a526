//! Batched 6x6 quadratic-form kernels.
//!
//! Re-scoring the candidate edges around a collapse evaluates `vᵀMv` for a
//! few dozen (quadric, placement) pairs at a time. The lane kernel packs
//! four pairs into structure-of-arrays registers so the compiler can emit
//! packed arithmetic; it performs the same operations in the same order as
//! the scalar kernel, so both paths return identical values. The scalar
//! kernel is the reference.
//!
//! Matrices are flattened as 36 contiguous values and vectors as 6, in
//! nalgebra's column-major `as_slice` order. The kernels only compute
//! `vᵀMv` and elementwise sums, whose values do not depend on whether `M`
//! is read by rows or columns. Quadrics are symmetric in any case.

/// Values per flattened 6x6 matrix
pub const MATRIX_LEN: usize = 36;
/// Values per 6-vector
pub const VECTOR_LEN: usize = 6;

const LANES: usize = 4;

/// Compute `vᵀMv` for the matrix starting at `matrix[matrix_offset]` and the
/// vector starting at `vector[vector_offset]`.
///
/// # Panics
///
/// Panics if either slice is too short for the requested offset.
#[inline]
pub fn quadratic_form6(matrix: &[f64], matrix_offset: usize, vector: &[f64], vector_offset: usize) -> f64 {
    let m = &matrix[matrix_offset..matrix_offset + MATRIX_LEN];
    let v = &vector[vector_offset..vector_offset + VECTOR_LEN];
    let mut acc = 0.0;
    for i in 0..6 {
        let mut row = 0.0;
        for j in 0..6 {
            row += m[i * 6 + j] * v[j];
        }
        acc += v[i] * row;
    }
    acc
}

/// Add the matrix at `source[source_offset]` into `target[target_offset]`
///
/// # Panics
///
/// Panics if either slice is too short for the requested offset.
#[inline]
pub fn add6_in_place(target: &mut [f64], target_offset: usize, source: &[f64], source_offset: usize) {
    let t = &mut target[target_offset..target_offset + MATRIX_LEN];
    let s = &source[source_offset..source_offset + MATRIX_LEN];
    for (a, b) in t.iter_mut().zip(s) {
        *a += *b;
    }
}

/// Kernel implementation used for batched evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadricKernel {
    /// One pair at a time, the reference path
    Scalar,
    /// Four pairs per step in structure-of-arrays lanes
    Lanes,
}

impl Default for QuadricKernel {
    fn default() -> Self {
        Self::detect()
    }
}

impl QuadricKernel {
    /// Pick the lane kernel when the target has packed f64 arithmetic
    pub fn detect() -> Self {
        if cfg!(any(
            target_feature = "sse2",
            target_feature = "neon",
            target_feature = "simd128"
        )) {
            Self::Lanes
        } else {
            Self::Scalar
        }
    }

    /// Evaluate `vᵀMv` for every (matrix, vector) pair.
    ///
    /// `matrices` holds `n` flattened matrices, `vectors` holds `n` vectors
    /// and `out` receives `n` values.
    ///
    /// # Panics
    ///
    /// Panics if the three slices disagree on `n`.
    pub fn quadratic_forms(self, matrices: &[f64], vectors: &[f64], out: &mut [f64]) {
        let n = out.len();
        assert_eq!(matrices.len(), n * MATRIX_LEN, "matrix buffer length");
        assert_eq!(vectors.len(), n * VECTOR_LEN, "vector buffer length");

        match self {
            Self::Scalar => {
                for (k, value) in out.iter_mut().enumerate() {
                    *value = quadratic_form6(matrices, k * MATRIX_LEN, vectors, k * VECTOR_LEN);
                }
            }
            Self::Lanes => {
                let chunks = n / LANES;
                for c in 0..chunks {
                    let base = c * LANES;
                    let values = quadratic_form6_x4(matrices, vectors, base);
                    out[base..base + LANES].copy_from_slice(&values);
                }
                for k in chunks * LANES..n {
                    out[k] = quadratic_form6(matrices, k * MATRIX_LEN, vectors, k * VECTOR_LEN);
                }
            }
        }
    }

    /// Element-wise `target += source` over `n` flattened matrices
    ///
    /// # Panics
    ///
    /// Panics if the slices differ in length or are not whole matrices.
    pub fn add_matrices(self, target: &mut [f64], source: &[f64]) {
        assert_eq!(target.len(), source.len(), "matrix buffer length");
        assert_eq!(target.len() % MATRIX_LEN, 0, "partial matrix");

        match self {
            Self::Scalar => {
                for k in 0..target.len() / MATRIX_LEN {
                    add6_in_place(target, k * MATRIX_LEN, source, k * MATRIX_LEN);
                }
            }
            Self::Lanes => {
                let mut t_chunks = target.chunks_exact_mut(LANES);
                let mut s_chunks = source.chunks_exact(LANES);
                for (t, s) in (&mut t_chunks).zip(&mut s_chunks) {
                    let mut lane = [0.0; LANES];
                    for l in 0..LANES {
                        lane[l] = t[l] + s[l];
                    }
                    t.copy_from_slice(&lane);
                }
                for (a, b) in t_chunks.into_remainder().iter_mut().zip(s_chunks.remainder()) {
                    *a += *b;
                }
            }
        }
    }
}

/// Evaluate four consecutive pairs starting at pair index `base`
#[inline]
fn quadratic_form6_x4(matrices: &[f64], vectors: &[f64], base: usize) -> [f64; LANES] {
    // Transpose the four vectors into lanes: vs[j][l] = v_l[j]
    let mut vs = [[0.0; LANES]; 6];
    for l in 0..LANES {
        let v = &vectors[(base + l) * VECTOR_LEN..(base + l + 1) * VECTOR_LEN];
        for j in 0..6 {
            vs[j][l] = v[j];
        }
    }

    let mut acc = [0.0; LANES];
    for i in 0..6 {
        let mut row = [0.0; LANES];
        for j in 0..6 {
            let mut ms = [0.0; LANES];
            for l in 0..LANES {
                ms[l] = matrices[(base + l) * MATRIX_LEN + i * 6 + j];
            }
            for l in 0..LANES {
                row[l] += ms[l] * vs[j][l];
            }
        }
        for l in 0..LANES {
            acc[l] += vs[i][l] * row[l];
        }
    }
    acc
}

/// Convenience wrapper allocating the output with the detected kernel
pub fn quadratic_form6_batch(matrices: &[f64], vectors: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; vectors.len() / VECTOR_LEN];
    QuadricKernel::detect().quadratic_forms(matrices, vectors, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix6, Vector6};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_symmetric(rng: &mut StdRng, scale: f64) -> Matrix6<f64> {
        let a = Matrix6::from_fn(|_, _| rng.gen_range(-scale..scale));
        (a + a.transpose()) * 0.5
    }

    fn random_vector(rng: &mut StdRng, scale: f64) -> Vector6<f64> {
        Vector6::from_fn(|_, _| rng.gen_range(-scale..scale))
    }

    #[test]
    fn test_quadratic_form_matches_reference() {
        let mut rng = StdRng::seed_from_u64(7);
        for scale in [1e-3, 1.0, 1e3] {
            for _ in 0..200 {
                let m = random_symmetric(&mut rng, scale);
                let v = random_vector(&mut rng, scale);
                let expected = (v.transpose() * m * v)[0];
                let actual = quadratic_form6(m.as_slice(), 0, v.as_slice(), 0);
                // Bound the rounding error by the magnitude of the summed terms
                let magnitude: f64 = (0..6)
                    .flat_map(|i| (0..6).map(move |j| (i, j)))
                    .map(|(i, j)| (m[(i, j)] * v[i] * v[j]).abs())
                    .sum();
                assert!(
                    (actual - expected).abs() <= 1e-10 * magnitude.max(f64::MIN_POSITIVE),
                    "{actual} vs {expected}"
                );
            }
        }
    }

    #[test]
    fn test_offsets() {
        let m = Matrix6::<f64>::identity();
        let v = Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        let mut matrices = vec![9.0; 10];
        matrices.extend_from_slice(m.as_slice());
        let mut vectors = vec![0.0; 3];
        vectors.extend_from_slice(v.as_slice());
        assert_eq!(quadratic_form6(&matrices, 10, &vectors, 3), 91.0);
    }

    #[test]
    fn test_batch_equals_sequential() {
        let mut rng = StdRng::seed_from_u64(11);
        // Odd count exercises the lane remainder
        let n = 23;
        let mut matrices = Vec::with_capacity(n * MATRIX_LEN);
        let mut vectors = Vec::with_capacity(n * VECTOR_LEN);
        for _ in 0..n {
            matrices.extend_from_slice(random_symmetric(&mut rng, 10.0).as_slice());
            vectors.extend_from_slice(random_vector(&mut rng, 10.0).as_slice());
        }

        let mut scalar = vec![0.0; n];
        let mut lanes = vec![0.0; n];
        QuadricKernel::Scalar.quadratic_forms(&matrices, &vectors, &mut scalar);
        QuadricKernel::Lanes.quadratic_forms(&matrices, &vectors, &mut lanes);

        for k in 0..n {
            let single = quadratic_form6(&matrices, k * MATRIX_LEN, &vectors, k * VECTOR_LEN);
            assert_eq!(scalar[k], single);
            assert_eq!(lanes[k], single);
        }
        assert_eq!(quadratic_form6_batch(&matrices, &vectors), scalar);
    }

    #[test]
    fn test_matrix_addition() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = random_symmetric(&mut rng, 1.0);
        let b = random_symmetric(&mut rng, 1.0);

        let mut single = a.as_slice().to_vec();
        add6_in_place(&mut single, 0, b.as_slice(), 0);
        let expected = a + b;
        assert_eq!(single.as_slice(), expected.as_slice());

        let mut target: Vec<f64> = [a.as_slice(), a.as_slice()].concat();
        let source: Vec<f64> = [b.as_slice(), b.as_slice()].concat();
        let mut lane_target = target.clone();
        QuadricKernel::Scalar.add_matrices(&mut target, &source);
        QuadricKernel::Lanes.add_matrices(&mut lane_target, &source);
        assert_eq!(target, lane_target);
        assert_eq!(&target[36..], expected.as_slice());
    }

    #[test]
    fn test_layout_independent_of_transpose() {
        let mut rng = StdRng::seed_from_u64(5);
        let m = Matrix6::from_fn(|_, _| rng.gen_range(-1.0..1.0));
        let v = random_vector(&mut rng, 1.0);
        let expected = (v.transpose() * m * v)[0];
        let column_major = quadratic_form6(m.as_slice(), 0, v.as_slice(), 0);
        let row_major = quadratic_form6(m.transpose().as_slice(), 0, v.as_slice(), 0);
        assert!((column_major - expected).abs() < 1e-12);
        assert!((row_major - expected).abs() < 1e-12);

        let q = crate::quadric::face_quadric(
            [
                nalgebra::Vector3::new(0.0, 0.0, 0.0),
                nalgebra::Vector3::new(1.0, 0.2, 0.0),
                nalgebra::Vector3::new(0.1, 1.0, 0.3),
            ],
            [
                nalgebra::Vector2::new(0.0, 0.0),
                nalgebra::Vector2::new(1.0, 0.0),
                nalgebra::Vector2::new(0.0, 1.0),
            ],
            1.0,
        );
        assert_eq!(q.as_slice(), q.transpose().as_slice());
    }

    #[test]
    fn test_empty_batch() {
        let mut out: Vec<f64> = Vec::new();
        QuadricKernel::Lanes.quadratic_forms(&[], &[], &mut out);
        assert!(quadratic_form6_batch(&[], &[]).is_empty());
    }
}
