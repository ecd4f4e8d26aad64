use linfa::Float;
use linfa_linalg::cholesky::*;
use linfa_linalg::triangular::*;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;

use crate::gaussian_mixture::errors::{GmmError, Result};

/// A single multivariate normal distribution, the building block of a
/// [mixture model](crate::GaussianMixtureModel).
///
/// The lower Cholesky factor of the covariance is computed once at
/// construction and reused for density evaluation and sampling.
#[derive(Clone, Debug)]
pub struct MultivariateNormal<F: Float> {
    mean: Array1<F>,
    covariance: Array2<F>,
    /// Lower triangular Cholesky factor of the covariance
    lower: Array2<F>,
}

impl<F: Float> MultivariateNormal<F> {
    /// Build a Gaussian from its mean and covariance. Fails with
    /// [`GmmError::SingularCovariance`] when the covariance cannot be
    /// factorized.
    pub fn new(mean: Array1<F>, covariance: Array2<F>) -> Result<Self> {
        if covariance.nrows() != mean.len() || covariance.ncols() != mean.len() {
            return Err(GmmError::DimensionMismatch(format!(
                "mean has length {} but covariance is {}x{}",
                mean.len(),
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        let lower = covariance.cholesky().map_err(|err| {
            GmmError::SingularCovariance(format!(
                "covariance cannot be Cholesky-factorized: {}",
                err
            ))
        })?;
        Ok(MultivariateNormal {
            mean,
            covariance,
            lower,
        })
    }

    pub fn dimensionality(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<F> {
        &self.mean
    }

    pub fn covariance(&self) -> &Array2<F> {
        &self.covariance
    }

    /// Log of the probability density at `x`
    pub fn log_pdf<D: Data<Elem = F>>(&self, x: &ArrayBase<D, Ix1>) -> Result<F> {
        if x.len() != self.dimensionality() {
            return Err(GmmError::DimensionMismatch(format!(
                "point has dimension {} but the Gaussian has dimension {}",
                x.len(),
                self.dimensionality()
            )));
        }
        let diff = (&x.to_owned() - &self.mean).insert_axis(Axis(1));
        // Solving L y = (x - mu) gives the whitened residual, whose squared
        // norm is the Mahalanobis term.
        let whitened = self.lower.solve_triangular(&diff, UPLO::Lower)?;
        let mahalanobis = whitened.mapv(|v| v * v).sum();
        let log_det = self
            .lower
            .diag()
            .fold(F::zero(), |acc, &v| acc + v.ln())
            * F::cast(2.);
        let d = F::cast(self.dimensionality() as f64);
        let log_two_pi = F::cast(f64::ln(2. * std::f64::consts::PI));
        Ok(F::cast(-0.5) * (d * log_two_pi + log_det + mahalanobis))
    }

    /// Probability density at `x`
    pub fn pdf<D: Data<Elem = F>>(&self, x: &ArrayBase<D, Ix1>) -> Result<F> {
        self.log_pdf(x).map(|v| v.exp())
    }

    /// Draw one point, transforming a standard normal draw through the
    /// Cholesky factor.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<F> {
        let standard: Array1<f64> =
            Array1::random_using(self.dimensionality(), StandardNormal, rng);
        &self.mean + &self.lower.dot(&standard.mapv(F::cast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use rand_isaac::Isaac64Rng;

    #[test]
    fn standard_normal_density() {
        let mvn = MultivariateNormal::new(array![0., 0.], array![[1., 0.], [0., 1.]]).unwrap();
        // reference values from the closed-form bivariate standard normal
        assert_abs_diff_eq!(
            mvn.pdf(&array![1., 1.]).unwrap(),
            0.05854983152431917,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            mvn.pdf(&array![1., 2.]).unwrap(),
            0.013064233284684921,
            epsilon = 1e-12
        );
    }

    #[test]
    fn correlated_density() {
        let mvn =
            MultivariateNormal::new(array![0.5, -0.2], array![[2.0, 0.3], [0.3, 0.5]]).unwrap();
        assert_abs_diff_eq!(
            mvn.pdf(&array![-1., 2.]).unwrap(),
            0.00014842259203296995,
            epsilon = 1e-12
        );
    }

    #[test]
    fn singular_covariance_is_rejected() {
        let res = MultivariateNormal::new(array![0., 0.], array![[1., 1.], [1., 1.]]);
        assert!(matches!(res, Err(GmmError::SingularCovariance(_))));
    }

    #[test]
    fn sample_moments_match() {
        let mean = array![1.0, -2.0];
        let covariance = array![[1.0, 0.8], [0.8, 1.0]];
        let mvn = MultivariateNormal::new(mean.clone(), covariance.clone()).unwrap();
        let mut rng = Isaac64Rng::seed_from_u64(42);

        let n = 20_000;
        let mut sum = Array1::<f64>::zeros(2);
        let mut cross = 0.;
        for _ in 0..n {
            let x = mvn.sample(&mut rng);
            cross += (x[0] - mean[0]) * (x[1] - mean[1]);
            sum = sum + x;
        }
        let empirical_mean = sum / n as f64;
        assert_abs_diff_eq!(empirical_mean, mean, epsilon = 5e-2);
        assert_abs_diff_eq!(cross / n as f64, covariance[[0, 1]], epsilon = 5e-2);
    }
}
