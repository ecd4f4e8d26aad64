use crate::gaussian_mixture::covariance::CovarianceConstraint;
use crate::gaussian_mixture::errors::{GmmError, Result};
use crate::gaussian_mixture::gaussian::MultivariateNormal;
use crate::gaussian_mixture::hyperparams::{
    CovarianceType, GmmInitMethod, GmmParams, GmmValidParams,
};
use crate::gaussian_mixture::init;
use linfa::{traits::*, DatasetBase, Float};
use linfa_linalg::cholesky::*;
use linfa_linalg::triangular::*;
use ndarray::{s, Array, Array1, Array2, Array3, ArrayBase, Axis, Data, Ix2, Ix3, Zip};
use ndarray_rand::rand::distributions::{Distribution, WeightedIndex};
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_stats::QuantileExt;
use rand_isaac::Isaac64Rng;
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Terminal state of the EM loop of one trial. Both states yield a usable
/// model together with its achieved log-likelihood.
pub enum FitStatus {
    /// The absolute log-likelihood improvement fell below the tolerance
    Converged {
        /// Number of EM iterations that were run
        n_iterations: u64,
    },
    /// The iteration cap bound before the tolerance criterion was met
    MaxIterationsReached,
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Debug, PartialEq)]
/// Gaussian Mixture Model (GMM): a weighted sum of multivariate normal
/// components approximating a data distribution.
///
/// ## The algorithm
///
/// The model is fitted by Expectation-Maximization, a fixed-point two-step
/// iteration maximizing the likelihood of the dataset under the mixture:
///
/// 1. Expectation step: compute, for every observation, the posterior
///    responsibility of each component (in log-space, normalized with a
///    log-sum-exp so that points under-flowing every component stay finite).
/// 2. Maximization step: re-estimate the weight, mean and covariance of each
///    component from the responsibilities, then apply the configured
///    [covariance constraint](crate::CovarianceConstraint). A component whose
///    responsibility mass collapses is reseeded from a random observation
///    instead of being lost.
///
/// A trial stops when the absolute change of the dataset log-likelihood falls
/// below `tolerance`, or when `max_n_iterations` is reached. As EM is
/// sensitive to its random initialization, `trials` independent restarts are
/// performed (each seeded by [random partition or refined
/// start](crate::GmmInitMethod), each with its own child random generator)
/// and the model with the highest log-likelihood is kept; ties go to the
/// earliest trial.
///
/// ## Tutorial
///
/// ```rust, ignore
/// use linfa::DatasetBase;
/// use linfa::traits::Fit;
/// use mixfit::GaussianMixtureModel;
/// use ndarray_rand::rand::SeedableRng;
/// use rand_isaac::Isaac64Rng;
///
/// let mut rng = Isaac64Rng::seed_from_u64(42);
/// let dataset = DatasetBase::from(observations);
/// let gmm = GaussianMixtureModel::params(3)
///     .trials(5)
///     .tolerance(1e-4)
///     .with_rng(rng.clone())
///     .fit(&dataset)?;
///
/// println!("weights = {:?}", gmm.weights());
/// println!("log-likelihood = {}", gmm.log_likelihood());
///
/// // draw new points from the fitted distribution
/// let generated = gmm.sample(100, &mut rng)?;
/// // evaluate the mixture density of the training points
/// let density = gmm.density(dataset.records())?;
/// ```
pub struct GaussianMixtureModel<F: Float> {
    covariance_type: CovarianceType,
    weights: Array1<F>,
    means: Array2<F>,
    covariances: Array3<F>,
    precisions_chol: Array3<F>,
    log_likelihood: F,
    status: FitStatus,
    best_trial: usize,
}

impl<F: Float> Clone for GaussianMixtureModel<F> {
    fn clone(&self) -> Self {
        Self {
            covariance_type: self.covariance_type,
            weights: self.weights.to_owned(),
            means: self.means.to_owned(),
            covariances: self.covariances.to_owned(),
            precisions_chol: self.precisions_chol.to_owned(),
            log_likelihood: self.log_likelihood,
            status: self.status,
            best_trial: self.best_trial,
        }
    }
}

impl<F: Float> GaussianMixtureModel<F> {
    pub fn params(n_clusters: usize) -> GmmParams<F, Isaac64Rng> {
        GmmParams::new(n_clusters)
    }

    pub fn params_with_rng<R: Rng + Clone>(n_clusters: usize, rng: R) -> GmmParams<F, R> {
        GmmParams::new_with_rng(n_clusters, rng)
    }

    /// Assemble a model directly from its parameters, e.g. one loaded back
    /// from disk by a persistence layer. The weights must be non-negative and
    /// sum to 1 within `1e-6`, every covariance must be positive-definite.
    pub fn from_parameters(
        weights: Array1<F>,
        means: Array2<F>,
        covariances: Array3<F>,
    ) -> Result<GaussianMixtureModel<F>> {
        let n_clusters = weights.len();
        if means.nrows() != n_clusters || covariances.shape()[0] != n_clusters {
            return Err(GmmError::DimensionMismatch(format!(
                "{} weights but {} means and {} covariances",
                n_clusters,
                means.nrows(),
                covariances.shape()[0]
            )));
        }
        if covariances.shape()[1] != means.ncols() || covariances.shape()[2] != means.ncols() {
            return Err(GmmError::DimensionMismatch(format!(
                "means have dimension {} but covariances are {}x{}",
                means.ncols(),
                covariances.shape()[1],
                covariances.shape()[2]
            )));
        }
        if weights.iter().any(|&w| w < F::zero()) {
            return Err(GmmError::InvalidArgument(
                "mixture weights must be non-negative".to_string(),
            ));
        }
        if (weights.sum() - F::one()).abs() > F::cast(1e-6) {
            return Err(GmmError::InvalidArgument(format!(
                "mixture weights must sum to 1, got {}",
                weights.sum()
            )));
        }
        let precisions_chol = Self::compute_precisions_cholesky(&covariances)?;
        Ok(GaussianMixtureModel {
            covariance_type: CovarianceType::Full,
            weights,
            means,
            covariances,
            precisions_chol,
            log_likelihood: F::neg_infinity(),
            status: FitStatus::Converged { n_iterations: 0 },
            best_trial: 0,
        })
    }

    pub fn weights(&self) -> &Array1<F> {
        &self.weights
    }

    pub fn means(&self) -> &Array2<F> {
        &self.means
    }

    pub fn covariances(&self) -> &Array3<F> {
        &self.covariances
    }

    /// Alias of [`means`](Self::means)
    pub fn centroids(&self) -> &Array2<F> {
        self.means()
    }

    pub fn n_clusters(&self) -> usize {
        self.means.nrows()
    }

    pub fn dimensionality(&self) -> usize {
        self.means.ncols()
    }

    pub fn covariance_type(&self) -> CovarianceType {
        self.covariance_type
    }

    /// Total log-likelihood of the training dataset under this model
    pub fn log_likelihood(&self) -> F {
        self.log_likelihood
    }

    /// How the winning trial terminated
    pub fn status(&self) -> FitStatus {
        self.status
    }

    /// Index of the restart that produced this model
    pub fn best_trial(&self) -> usize {
        self.best_trial
    }

    /// The `index`-th mixture component as a standalone Gaussian
    pub fn component(&self, index: usize) -> Result<MultivariateNormal<F>> {
        if index >= self.n_clusters() {
            return Err(GmmError::InvalidArgument(format!(
                "component index {} out of range for a mixture of {}",
                index,
                self.n_clusters()
            )));
        }
        MultivariateNormal::new(
            self.means.row(index).to_owned(),
            self.covariances.slice(s![index, .., ..]).to_owned(),
        )
    }

    /// Draw `n_samples` points from the mixture: a component index is sampled
    /// from the categorical distribution defined by the weights, then the
    /// chosen Gaussian is sampled. Returns an `(n_samples, dimensionality)`
    /// matrix.
    pub fn sample<R: Rng + ?Sized>(&self, n_samples: usize, rng: &mut R) -> Result<Array2<F>> {
        if n_samples == 0 {
            return Err(GmmError::InvalidArgument(
                "cannot generate 0 samples".to_string(),
            ));
        }
        if self.dimensionality() == 0 {
            return Err(GmmError::InvalidArgument(
                "cannot sample from a zero-dimensional model".to_string(),
            ));
        }
        let components = (0..self.n_clusters())
            .map(|k| self.component(k))
            .collect::<Result<Vec<_>>>()?;
        let categorical = WeightedIndex::new(self.weights.iter())
            .map_err(|err| GmmError::InvalidArgument(format!("invalid mixture weights: {}", err)))?;

        let mut samples = Array2::zeros((n_samples, self.dimensionality()));
        for mut row in samples.rows_mut() {
            let k = categorical.sample(rng);
            row.assign(&components[k].sample(rng));
        }
        Ok(samples)
    }

    /// Mixture probability density of every observation
    pub fn density<D: Data<Elem = F>>(&self, observations: &ArrayBase<D, Ix2>) -> Result<Array1<F>> {
        self.check_dimensions(observations)?;
        let (log_prob_norm, _) = self.estimate_log_prob_resp(observations);
        Ok(log_prob_norm.mapv(|v| v.exp()))
    }

    /// Posterior responsibilities: for every observation the probability of
    /// each component being its source. Rows sum to 1.
    pub fn responsibilities<D: Data<Elem = F>>(
        &self,
        observations: &ArrayBase<D, Ix2>,
    ) -> Result<Array2<F>> {
        self.check_dimensions(observations)?;
        let (_, log_resp) = self.estimate_log_prob_resp(observations);
        Ok(log_resp.mapv(|v| v.exp()))
    }

    fn check_dimensions<D: Data<Elem = F>>(&self, observations: &ArrayBase<D, Ix2>) -> Result<()> {
        if observations.ncols() != self.dimensionality() {
            return Err(GmmError::DimensionMismatch(format!(
                "model has dimensionality {} but observations have {} features",
                self.dimensionality(),
                observations.ncols()
            )));
        }
        Ok(())
    }

    fn compute_precisions_cholesky<D: Data<Elem = F>>(
        covariances: &ArrayBase<D, Ix3>,
    ) -> Result<Array3<F>> {
        let n_clusters = covariances.shape()[0];
        let n_features = covariances.shape()[1];
        let mut precisions_chol = Array::zeros((n_clusters, n_features, n_features));
        for (k, covariance) in covariances.outer_iter().enumerate() {
            let cov_chol = covariance.cholesky().map_err(|err| {
                GmmError::SingularCovariance(format!(
                    "covariance of component {} cannot be factorized: {}",
                    k, err
                ))
            })?;
            let sol = cov_chol.solve_triangular(&Array::eye(n_features), UPLO::Lower)?;
            precisions_chol.slice_mut(s![k, .., ..]).assign(&sol.t());
        }
        Ok(precisions_chol)
    }

    fn compute_log_det_cholesky<D: Data<Elem = F>>(
        matrix_chol: &ArrayBase<D, Ix3>,
        n_features: usize,
    ) -> Array1<F> {
        let n_clusters = matrix_chol.shape()[0];
        let log_diags = &matrix_chol
            .to_owned()
            .into_shape((n_clusters, n_features * n_features))
            .unwrap()
            .slice(s![.., ..; n_features+1])
            .to_owned()
            .mapv(|v| v.ln());
        log_diags.sum_axis(Axis(1))
    }

    /// For every trial a fresh mixture is derived from the configured
    /// initialization (or the warm-start model).
    fn initialize<D: Data<Elem = F>, R: Rng + SeedableRng + Clone>(
        params: &GmmValidParams<F, R>,
        observations: &ArrayBase<D, Ix2>,
        rng: &mut R,
    ) -> Result<GaussianMixtureModel<F>> {
        if let Some(seed_model) = params.warm_start() {
            return Ok(seed_model.clone());
        }

        let (weights, means, covariances) = match *params.init_method() {
            GmmInitMethod::Random => init::random_partition(
                observations,
                params.n_clusters(),
                params.noise(),
                rng,
            )?,
            GmmInitMethod::Refined {
                percentage,
                samplings,
            } => init::refined_partition(
                observations,
                params.n_clusters(),
                percentage,
                samplings,
                params.noise(),
                rng,
            )?,
        };

        let constraint = CovarianceConstraint::new(params.covariance_type(), params.noise());
        let mut constrained = Array3::zeros(covariances.dim());
        for (k, covariance) in covariances.outer_iter().enumerate() {
            constrained
                .slice_mut(s![k, .., ..])
                .assign(&constraint.apply(&covariance)?);
        }
        let precisions_chol = Self::compute_precisions_cholesky(&constrained)?;

        Ok(GaussianMixtureModel {
            covariance_type: params.covariance_type(),
            weights,
            means,
            covariances: constrained,
            precisions_chol,
            log_likelihood: F::neg_infinity(),
            status: FitStatus::Converged { n_iterations: 0 },
            best_trial: 0,
        })
    }

    /// Keep the trial outcome with the highest log-likelihood; ties go to
    /// the earliest trial. When every trial fails, the last error is
    /// surfaced together with the trial count.
    fn best_of_trials(
        outcomes: impl IntoIterator<Item = Result<GaussianMixtureModel<F>>>,
        trials: usize,
    ) -> Result<GaussianMixtureModel<F>> {
        let mut best: Option<GaussianMixtureModel<F>> = None;
        let mut last_err = None;
        for outcome in outcomes {
            match outcome {
                Ok(model) => {
                    let improved = match &best {
                        Some(incumbent) => model.log_likelihood > incumbent.log_likelihood,
                        None => true,
                    };
                    if improved {
                        best = Some(model);
                    }
                }
                Err(err) => last_err = Some(err),
            }
        }
        match best {
            Some(model) => Ok(model),
            None => {
                let source = last_err.map(Box::new).unwrap_or_else(|| {
                    Box::new(GmmError::EmptyCluster(
                        "no trial produced a model".to_string(),
                    ))
                });
                Err(GmmError::AllTrialsFailed { trials, source })
            }
        }
    }

    /// Run the EM loop to a terminal state, returning the achieved total
    /// log-likelihood and how the loop stopped. Termination is checked
    /// before each M-step, so the returned log-likelihood is always the one
    /// of the returned parameters.
    fn fit_em<D: Data<Elem = F>, R: Rng>(
        &mut self,
        constraint: &CovarianceConstraint<F>,
        noise: F,
        tolerance: F,
        max_n_iterations: u64,
        observations: &ArrayBase<D, Ix2>,
        rng: &mut R,
    ) -> Result<(F, FitStatus)> {
        let mut log_likelihood = F::neg_infinity();
        let mut n_iter: u64 = 0;
        loop {
            let (current, log_resp) = self.e_step(observations);
            if (current - log_likelihood).abs() < tolerance {
                return Ok((
                    current,
                    FitStatus::Converged {
                        n_iterations: n_iter,
                    },
                ));
            }
            log_likelihood = current;
            if max_n_iterations > 0 && n_iter >= max_n_iterations {
                return Ok((log_likelihood, FitStatus::MaxIterationsReached));
            }
            self.m_step(constraint, noise, observations, &log_resp, rng)?;
            n_iter += 1;
        }
    }

    fn e_step<D: Data<Elem = F>>(&self, observations: &ArrayBase<D, Ix2>) -> (F, Array2<F>) {
        let (log_prob_norm, log_resp) = self.estimate_log_prob_resp(observations);
        (log_prob_norm.sum(), log_resp)
    }

    fn m_step<D: Data<Elem = F>, R: Rng>(
        &mut self,
        constraint: &CovarianceConstraint<F>,
        noise: F,
        observations: &ArrayBase<D, Ix2>,
        log_resp: &Array2<F>,
        rng: &mut R,
    ) -> Result<()> {
        let n_samples = observations.nrows();
        let n_clusters = self.n_clusters();
        let n_features = observations.ncols();
        let resp = log_resp.mapv(|v| v.exp());

        let mut nk = resp.sum_axis(Axis(0));
        let floor = F::cast(10.) * F::epsilon();
        let mut reseeded = vec![false; n_clusters];

        let mut means = resp.t().dot(observations);
        for k in 0..n_clusters {
            if nk[k] <= floor {
                // the component lost all its responsibility mass; reseed it
                // from a random observation instead of leaving it degenerate
                let seed = rng.gen_range(0..n_samples);
                means.row_mut(k).assign(&observations.row(seed));
                nk[k] = F::one();
                reseeded[k] = true;
            } else {
                let denom = nk[k];
                means.row_mut(k).mapv_inplace(|v| v / denom);
            }
        }

        let bump = if noise > F::zero() { noise } else { F::cast(1e-6) };
        let mut covariances = Array3::zeros((n_clusters, n_features, n_features));
        for k in 0..n_clusters {
            let cov_k = if reseeded[k] {
                Array2::from_diag(&(observations.var_axis(Axis(0), F::zero()) + bump))
            } else {
                let diff = observations - &means.row(k);
                let weighted = &diff.t() * &resp.index_axis(Axis(1), k);
                let mut cov_k = weighted.dot(&diff) / nk[k];
                cov_k.diag_mut().mapv_inplace(|v| v + noise);
                cov_k
            };
            covariances
                .slice_mut(s![k, .., ..])
                .assign(&constraint.apply(&cov_k)?);
        }

        let total = nk.sum();
        self.weights = nk.mapv(|v| v / total);
        self.means = means;
        self.covariances = covariances;
        self.precisions_chol = Self::compute_precisions_cholesky(&self.covariances)?;
        Ok(())
    }

    // Compute weighted log probabilities per component (log P(X)) and
    // responsibilities for each sample in X with respect to the current state
    // of the model. The per-sample normalizer is a log-sum-exp, so samples
    // under-flowing every component keep finite (uniform) responsibilities.
    fn estimate_log_prob_resp<D: Data<Elem = F>>(
        &self,
        observations: &ArrayBase<D, Ix2>,
    ) -> (Array1<F>, Array2<F>) {
        let weighted_log_prob = self.estimate_weighted_log_prob(observations);
        let n_clusters = weighted_log_prob.ncols();
        let mut log_prob_norm = Array1::zeros(weighted_log_prob.nrows());
        Zip::from(&mut log_prob_norm)
            .and(weighted_log_prob.rows())
            .for_each(|norm, row| {
                let max = row.fold(F::neg_infinity(), |acc, &v| acc.max(v));
                if max.is_finite() {
                    let sum = row.fold(F::zero(), |acc, &v| acc + (v - max).exp());
                    *norm = max + sum.ln();
                } else {
                    *norm = max;
                }
            });
        let mut log_resp = weighted_log_prob;
        Zip::from(log_resp.rows_mut())
            .and(&log_prob_norm)
            .for_each(|mut row, &norm| {
                if norm.is_finite() {
                    row.mapv_inplace(|v| v - norm);
                } else {
                    row.fill(F::cast(-(n_clusters as f64).ln()));
                }
            });
        (log_prob_norm, log_resp)
    }

    // Estimate weighted log probabilities for each sample wrt the model
    fn estimate_weighted_log_prob<D: Data<Elem = F>>(
        &self,
        observations: &ArrayBase<D, Ix2>,
    ) -> Array2<F> {
        self.estimate_log_gaussian_prob(observations) + self.weights.mapv(|v| v.ln())
    }

    // Compute the log likelihood in case of the gaussian probabilities
    // log(P(X|Mean, Precision)) = -0.5*(d*ln(2*PI)-ln(det(Precision))-(X-Mean)^t.Precision.(X-Mean)
    fn estimate_log_gaussian_prob<D: Data<Elem = F>>(
        &self,
        observations: &ArrayBase<D, Ix2>,
    ) -> Array2<F> {
        let n_samples = observations.nrows();
        let n_features = observations.ncols();
        let means = self.means();
        let n_clusters = means.nrows();
        // det(precision_chol) is half of det(precision)
        let log_det = Self::compute_log_det_cholesky(&self.precisions_chol, n_features);
        let mut log_prob: Array2<F> = Array::zeros((n_samples, n_clusters));
        Zip::indexed(means.rows())
            .and(self.precisions_chol.outer_iter())
            .for_each(|k, mu, prec_chol| {
                let diff = (observations - &mu).dot(&prec_chol);
                log_prob
                    .slice_mut(s![.., k])
                    .assign(&diff.mapv(|v| v * v).sum_axis(Axis(1)))
            });
        log_prob.mapv(|v| {
            F::cast(-0.5) * (v + F::cast(n_features as f64 * f64::ln(2. * std::f64::consts::PI)))
        }) + log_det
    }
}

impl<F: Float, R: Rng + SeedableRng + Clone, D: Data<Elem = F>, T>
    Fit<ArrayBase<D, Ix2>, T, GmmError> for GmmValidParams<F, R>
{
    type Object = GaussianMixtureModel<F>;

    fn fit(&self, dataset: &DatasetBase<ArrayBase<D, Ix2>, T>) -> Result<Self::Object> {
        let observations = dataset.records().view();
        if observations.nrows() == 0 {
            return Err(GmmError::InvalidArgument(
                "dataset holds no observations".to_string(),
            ));
        }
        if observations.ncols() == 0 {
            return Err(GmmError::InvalidArgument(
                "dataset observations have no features".to_string(),
            ));
        }

        // shape conflicts with the warm-start model are reported up front,
        // not wrapped into per-trial failures
        if let Some(seed_model) = self.warm_start() {
            if seed_model.dimensionality() != observations.ncols() {
                return Err(GmmError::DimensionMismatch(format!(
                    "warm-start model has dimensionality {} but the data has {} features",
                    seed_model.dimensionality(),
                    observations.ncols()
                )));
            }
        }

        let constraint = CovarianceConstraint::new(self.covariance_type(), self.noise());
        let mut rng = self.rng();
        let outcomes = (0..self.trials()).map(|trial| {
            // every trial owns its private generator so runs stay independent
            // and replayable
            let mut trial_rng = R::seed_from_u64(rng.gen());
            GaussianMixtureModel::initialize(self, &observations, &mut trial_rng).and_then(
                |mut model| {
                    let (log_likelihood, status) = model.fit_em(
                        &constraint,
                        self.noise(),
                        self.tolerance(),
                        self.max_n_iterations(),
                        &observations,
                        &mut trial_rng,
                    )?;
                    model.log_likelihood = log_likelihood;
                    model.status = status;
                    model.best_trial = trial;
                    model.covariance_type = self.covariance_type();
                    Ok(model)
                },
            )
        });
        GaussianMixtureModel::best_of_trials(outcomes, self.trials())
    }
}

impl<F: Float, D: Data<Elem = F>> PredictInplace<ArrayBase<D, Ix2>, Array1<usize>>
    for GaussianMixtureModel<F>
{
    /// Assign every observation to its most responsible component
    fn predict_inplace(&self, observations: &ArrayBase<D, Ix2>, targets: &mut Array1<usize>) {
        assert_eq!(
            observations.nrows(),
            targets.len(),
            "The number of data points must match the number of output targets."
        );
        let (_, log_resp) = self.estimate_log_prob_resp(observations);
        *targets = log_resp
            .mapv(|v| v.exp())
            .map_axis(Axis(1), |row| row.argmax().unwrap_or(0));
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<usize> {
        Array1::zeros(x.nrows())
    }
}
