use linfa::Float;
use linfa_linalg::cholesky::*;
use ndarray::{Array2, ArrayBase, Data, Ix2};

use crate::gaussian_mixture::errors::{GmmError, Result};
use crate::gaussian_mixture::hyperparams::CovarianceType;

/// Fallback diagonal bump when no noise level is configured
const DEFAULT_EPSILON: f64 = 1e-6;

/// Policy applied to every covariance matrix after an M-step update.
///
/// The [`Full`](CovarianceType::Full) variant symmetrizes the estimate, the
/// [`Diagonal`](CovarianceType::Diagonal) variant zeroes all off-diagonal
/// entries. Both then enforce positive-definiteness: a matrix that cannot be
/// Cholesky-factorized gets `noise` (or a small fallback epsilon when the
/// noise level is zero) added to its diagonal and is checked once more.
#[derive(Clone, Copy, Debug)]
pub struct CovarianceConstraint<F: Float> {
    covariance_type: CovarianceType,
    noise: F,
}

impl<F: Float> CovarianceConstraint<F> {
    pub fn new(covariance_type: CovarianceType, noise: F) -> Self {
        CovarianceConstraint {
            covariance_type,
            noise,
        }
    }

    pub fn covariance_type(&self) -> CovarianceType {
        self.covariance_type
    }

    /// Constrain and regularize a single covariance estimate.
    pub fn apply<D: Data<Elem = F>>(&self, covariance: &ArrayBase<D, Ix2>) -> Result<Array2<F>> {
        let mut constrained = match self.covariance_type {
            CovarianceType::Full => {
                // M-step scatter estimates are symmetric up to rounding only
                (&covariance.t() + covariance).mapv(|v| v / F::cast(2.))
            }
            CovarianceType::Diagonal => Array2::from_diag(&covariance.diag()),
        };

        if is_positive_definite(&constrained) {
            return Ok(constrained);
        }

        let bump = if self.noise > F::zero() {
            self.noise
        } else {
            F::cast(DEFAULT_EPSILON)
        };
        constrained.diag_mut().mapv_inplace(|v| v + bump);

        if is_positive_definite(&constrained) {
            Ok(constrained)
        } else {
            Err(GmmError::DegenerateCovariance(format!(
                "covariance not positive-definite after adding {} to its diagonal",
                bump
            )))
        }
    }
}

/// A covariance is positive-definite exactly when its Cholesky factorization
/// succeeds.
fn is_positive_definite<F: Float, D: Data<Elem = F>>(matrix: &ArrayBase<D, Ix2>) -> bool {
    matrix.cholesky().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn full_keeps_off_diagonals() {
        let constraint = CovarianceConstraint::new(CovarianceType::Full, 1e-6);
        let cov = array![[2.0, 0.5], [0.5, 1.0]];
        let out = constraint.apply(&cov).unwrap();
        assert_abs_diff_eq!(out, cov, epsilon = 1e-12);
    }

    #[test]
    fn full_symmetrizes() {
        let constraint = CovarianceConstraint::new(CovarianceType::Full, 1e-6);
        let cov = array![[2.0, 0.4], [0.6, 1.0]];
        let out = constraint.apply(&cov).unwrap();
        assert_abs_diff_eq!(out, array![[2.0, 0.5], [0.5, 1.0]], epsilon = 1e-12);
    }

    #[test]
    fn diagonal_zeroes_off_diagonals() {
        let constraint = CovarianceConstraint::new(CovarianceType::Diagonal, 1e-6);
        let cov = array![[2.0, 0.5], [0.5, 1.0]];
        let out = constraint.apply(&cov).unwrap();
        assert_abs_diff_eq!(out, array![[2.0, 0.0], [0.0, 1.0]], epsilon = 1e-12);
    }

    #[test]
    fn singular_covariance_gets_regularized() {
        let constraint = CovarianceConstraint::new(CovarianceType::Full, 0.5);
        // rank-one matrix, not invertible as-is
        let cov = array![[1.0, 1.0], [1.0, 1.0]];
        let out = constraint.apply(&cov).unwrap();
        assert!(is_positive_definite(&out));
        assert_abs_diff_eq!(out, array![[1.5, 1.0], [1.0, 1.5]], epsilon = 1e-12);
    }

    #[test]
    fn zero_noise_falls_back_to_epsilon() {
        let constraint = CovarianceConstraint::new(CovarianceType::Diagonal, 0.0);
        let cov = array![[0.0, 0.0], [0.0, 0.0]];
        let out = constraint.apply(&cov).unwrap();
        assert!(is_positive_definite(&out));
    }

    #[test]
    fn unrecoverable_matrix_is_degenerate() {
        let constraint = CovarianceConstraint::new(CovarianceType::Full, 1e-12);
        // strongly negative-definite, a tiny bump cannot repair it
        let cov = array![[-1.0, 0.0], [0.0, -1.0]];
        let res = constraint.apply(&cov);
        assert!(matches!(res, Err(GmmError::DegenerateCovariance(_))));
    }
}
