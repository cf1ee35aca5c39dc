//! `ndarray` front-end for the `faer` decompositions applied to Hessians and
//! covariance matrices. These matrices have one row per free beta, so they
//! are copied into `faer` storage rather than viewed in place.

use faer::linalg::solvers::{EvdError, LltError};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("Symmetric eigendecomposition failed: {0:?}")]
    Eigen(EvdError),
    #[error("Matrix is not positive definite: {0:?}")]
    NotPositiveDefinite(LltError),
}

fn to_faer<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> Mat<f64> {
    let (rows, cols) = matrix.dim();
    Mat::from_fn(rows, cols, |i, j| matrix[(i, j)])
}

fn to_ndarray(matrix: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((matrix.nrows(), matrix.ncols()), |(i, j)| matrix[(i, j)])
}

/// Decompositions of symmetric matrices; only the lower triangle is read.
pub trait SymmetricDecomposition {
    /// Eigenvalues (ascending) and the matching eigenvectors as columns.
    fn symmetric_eigen(&self) -> Result<(Array1<f64>, Array2<f64>), LinalgError>;

    /// The factor `L` of `A = L Lᵀ`.
    fn cholesky_lower(&self) -> Result<Array2<f64>, LinalgError>;
}

impl<S: Data<Elem = f64>> SymmetricDecomposition for ArrayBase<S, Ix2> {
    fn symmetric_eigen(&self) -> Result<(Array1<f64>, Array2<f64>), LinalgError> {
        let matrix = to_faer(self);
        let eigen = matrix
            .as_ref()
            .self_adjoint_eigen(Side::Lower)
            .map_err(LinalgError::Eigen)?;
        let diagonal = eigen.S().column_vector().as_mat();
        let values = Array1::from_shape_fn(diagonal.nrows(), |i| diagonal[(i, 0)]);
        Ok((values, to_ndarray(eigen.U())))
    }

    fn cholesky_lower(&self) -> Result<Array2<f64>, LinalgError> {
        let matrix = to_faer(self);
        let llt = matrix
            .as_ref()
            .llt(Side::Lower)
            .map_err(LinalgError::NotPositiveDefinite)?;
        let lower = llt.L();
        Ok(Array2::from_shape_fn((lower.nrows(), lower.ncols()), |(i, j)| {
            if j <= i { lower[(i, j)] } else { 0.0 }
        }))
    }
}

/// Moore-Penrose inverse `V diag(1/λ) Vᵀ` of a symmetric matrix, where
/// eigenvalues below `tolerance * max|λ|` in magnitude count as zero.
/// Also returns the eigenvalues in ascending order.
pub fn symmetric_pseudo_inverse(
    matrix: &Array2<f64>,
    tolerance: f64,
) -> Result<(Array2<f64>, Array1<f64>), LinalgError> {
    let (values, vectors) = matrix.symmetric_eigen()?;
    let max_abs = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let cutoff = tolerance * max_abs.max(f64::MIN_POSITIVE);
    let inverted = values.mapv(|lambda| if lambda.abs() <= cutoff { 0.0 } else { 1.0 / lambda });
    let inverse = (&vectors * &inverted).dot(&vectors.t());

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Ok((inverse, Array1::from(sorted)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn eigenvectors_rebuild_the_matrix() {
        let a = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let (values, vectors) = a.symmetric_eigen().unwrap();
        let rebuilt = vectors.dot(&Array2::from_diag(&values)).dot(&vectors.t());
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn pseudo_inverse_inverts_regular_matrices() {
        let a = array![[2.0, 0.5], [0.5, 1.0]];
        let (inv, eigenvalues) = symmetric_pseudo_inverse(&a, 1e-12).unwrap();
        let identity = a.dot(&inv);
        assert_abs_diff_eq!(identity[(0, 0)], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(identity[(0, 1)], 0.0, epsilon = 1e-10);
        assert!(eigenvalues[0] <= eigenvalues[1]);
    }

    #[test]
    fn pseudo_inverse_ignores_the_null_space() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let (inv, eigenvalues) = symmetric_pseudo_inverse(&a, 1e-10).unwrap();
        assert_abs_diff_eq!(eigenvalues[0], 0.0, epsilon = 1e-10);
        // pinv of [[1,1],[1,1]] is [[.25,.25],[.25,.25]]
        for x in inv.iter() {
            assert_abs_diff_eq!(*x, 0.25, epsilon = 1e-10);
        }
    }

    #[test]
    fn cholesky_factor_rebuilds_the_matrix() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = a.cholesky_lower().unwrap();
        assert_eq!(l[(0, 1)], 0.0);
        let rebuilt = l.dot(&l.t());
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
        assert!(array![[1.0, 2.0], [2.0, 1.0]].cholesky_lower().is_err());
    }
}
