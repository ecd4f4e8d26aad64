use crate::gaussian_mixture::algorithm::GaussianMixtureModel;
use crate::gaussian_mixture::errors::{GmmError, Result};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use linfa::{Float, ParamGuard};

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Constraint applied to every component covariance matrix after each M-step
/// update.
pub enum CovarianceType {
    /// Each component keeps its own general (dense) covariance matrix
    Full,
    /// Off-diagonal covariance entries are zeroed after every update
    Diagonal,
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
/// A specifier for the method used to seed the Gaussians before EM starts
pub enum GmmInitMethod<F: Float> {
    /// Every observation is assigned to a uniformly random cluster; the
    /// initial Gaussians are the per-cluster empirical moments.
    Random,
    /// Refined start: k-means is run to convergence on `samplings` random
    /// subsamples of the data, each holding a `percentage` fraction of the
    /// observations. The candidate centroid set with the lowest distortion
    /// over the full dataset seeds the means.
    Refined {
        /// Fraction of the dataset drawn per sampling, must lie in (0, 1]
        percentage: F,
        /// Number of subsamples scored, must be at least 1
        samplings: usize,
    },
}

impl<F: Float> GmmInitMethod<F> {
    /// Refined start with the usual defaults: 100 samplings of 2% of the data
    /// each.
    pub fn refined() -> Self {
        GmmInitMethod::Refined {
            percentage: F::cast(0.02),
            samplings: 100,
        }
    }
}

#[derive(Clone, Debug)]
/// The validated set of hyperparameters for
/// [Gaussian mixture fitting](GaussianMixtureModel).
pub struct GmmValidParams<F: Float, R: Rng> {
    n_clusters: usize,
    covariance_type: CovarianceType,
    tolerance: F,
    noise: F,
    trials: usize,
    max_n_iterations: u64,
    init_method: GmmInitMethod<F>,
    warm_start: Option<GaussianMixtureModel<F>>,
    rng: R,
}

impl<F: Float, R: Rng + Clone> GmmValidParams<F, R> {
    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn covariance_type(&self) -> CovarianceType {
        self.covariance_type
    }

    pub fn tolerance(&self) -> F {
        self.tolerance
    }

    /// Non-negative value added to the covariance diagonals for conditioning
    pub fn noise(&self) -> F {
        self.noise
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    /// Iteration cap per trial; 0 means iterate on tolerance alone
    pub fn max_n_iterations(&self) -> u64 {
        self.max_n_iterations
    }

    pub fn init_method(&self) -> &GmmInitMethod<F> {
        &self.init_method
    }

    pub fn warm_start(&self) -> Option<&GaussianMixtureModel<F>> {
        self.warm_start.as_ref()
    }

    pub fn rng(&self) -> R {
        self.rng.clone()
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for
/// [Gaussian mixture fitting](GaussianMixtureModel) (using the builder
/// pattern).
///
/// Defaults are provided if optional parameters are not specified:
/// * `covariance_type = Full`
/// * `tolerance = 1e-3`
/// * `noise = 1e-6`
/// * `trials = 1`
/// * `max_n_iterations = 100`
/// * `init_method = Random`
pub struct GmmParams<F: Float, R: Rng>(GmmValidParams<F, R>);

impl<F: Float> GmmParams<F, Isaac64Rng> {
    pub fn new(n_clusters: usize) -> GmmParams<F, Isaac64Rng> {
        Self::new_with_rng(n_clusters, Isaac64Rng::seed_from_u64(42))
    }
}

impl<F: Float, R: Rng + Clone> GmmParams<F, R> {
    pub fn new_with_rng(n_clusters: usize, rng: R) -> GmmParams<F, R> {
        Self(GmmValidParams {
            n_clusters,
            covariance_type: CovarianceType::Full,
            tolerance: F::cast(1e-3),
            noise: F::cast(1e-6),
            trials: 1,
            max_n_iterations: 100,
            init_method: GmmInitMethod::Random,
            warm_start: None,
            rng,
        })
    }

    /// Set the covariance constraint applied after every M-step.
    pub fn covariance_type(mut self, covariance_type: CovarianceType) -> Self {
        self.0.covariance_type = covariance_type;
        self
    }

    /// Set the convergence threshold. A trial stops when the absolute change
    /// of the dataset log-likelihood falls below this value.
    pub fn tolerance(mut self, tolerance: F) -> Self {
        self.0.tolerance = tolerance;
        self
    }

    /// Non-negative value added to the diagonal of every covariance estimate.
    /// Keeps ill-conditioned covariances invertible.
    pub fn noise(mut self, noise: F) -> Self {
        self.0.noise = noise;
        self
    }

    /// Set the number of independent random restarts to perform. The model
    /// with the highest log-likelihood is kept.
    pub fn trials(mut self, trials: usize) -> Self {
        self.0.trials = trials;
        self
    }

    /// Set the number of EM iterations per trial. With 0 a trial only stops
    /// once the tolerance criterion is met.
    pub fn max_n_iterations(mut self, max_n_iterations: u64) -> Self {
        self.0.max_n_iterations = max_n_iterations;
        self
    }

    /// Set the method used to seed the weights, means and covariances.
    pub fn init_method(mut self, init_method: GmmInitMethod<F>) -> Self {
        self.0.init_method = init_method;
        self
    }

    /// Seed every trial from a previously trained model instead of running
    /// the initializer. The model's component count must equal `n_clusters`
    /// and its dimensionality must match the data.
    pub fn warm_start(mut self, model: GaussianMixtureModel<F>) -> Self {
        self.0.warm_start = Some(model);
        self
    }

    pub fn with_rng<R2: Rng + Clone>(self, rng: R2) -> GmmParams<F, R2> {
        GmmParams(GmmValidParams {
            n_clusters: self.0.n_clusters,
            covariance_type: self.0.covariance_type,
            tolerance: self.0.tolerance,
            noise: self.0.noise,
            trials: self.0.trials,
            max_n_iterations: self.0.max_n_iterations,
            init_method: self.0.init_method,
            warm_start: self.0.warm_start,
            rng,
        })
    }
}

impl<F: Float, R: Rng> ParamGuard for GmmParams<F, R> {
    type Checked = GmmValidParams<F, R>;
    type Error = GmmError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.n_clusters == 0 {
            return Err(GmmError::InvalidConfiguration(
                "`n_clusters` cannot be 0!".to_string(),
            ));
        }
        if self.0.tolerance <= F::zero() {
            return Err(GmmError::InvalidConfiguration(
                "`tolerance` must be greater than 0!".to_string(),
            ));
        }
        if self.0.noise < F::zero() {
            return Err(GmmError::InvalidConfiguration(
                "`noise` must not be negative!".to_string(),
            ));
        }
        if self.0.trials == 0 {
            return Err(GmmError::InvalidConfiguration(
                "`trials` cannot be 0!".to_string(),
            ));
        }
        if let GmmInitMethod::Refined {
            percentage,
            samplings,
        } = self.0.init_method
        {
            if percentage <= F::zero() || percentage > F::one() {
                return Err(GmmError::InvalidConfiguration(format!(
                    "refined start `percentage` must lie in (0, 1], got {}",
                    percentage
                )));
            }
            if samplings == 0 {
                return Err(GmmError::InvalidConfiguration(
                    "refined start `samplings` cannot be 0!".to_string(),
                ));
            }
        }
        if let Some(model) = &self.0.warm_start {
            if model.n_clusters() != self.0.n_clusters {
                return Err(GmmError::DimensionMismatch(format!(
                    "warm-start model has {} components but `n_clusters` is {}",
                    model.n_clusters(),
                    self.0.n_clusters
                )));
            }
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
