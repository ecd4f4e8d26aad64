use crate::k_means::KMeansError;
use linfa_linalg::LinalgError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GmmError>;

/// An error when fitting, evaluating or sampling a Gaussian mixture model
#[derive(Error, Debug)]
pub enum GmmError {
    /// When any of the hyperparameters are set to an invalid value. Raised
    /// before any computation starts.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// When the shapes of the dataset and the model disagree
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// When a covariance matrix cannot be factorized for density evaluation
    #[error("singular covariance: {0}")]
    SingularCovariance(String),
    /// When a covariance matrix stays non-positive-definite after the
    /// regularization retry
    #[error("degenerate covariance: {0}")]
    DegenerateCovariance(String),
    /// When an operation is called with invalid arguments
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// When a cluster has no more data point while fitting GMM
    #[error("fitting failed: {0}")]
    EmptyCluster(String),
    /// When every trial aborted with an unrecoverable numerical breakdown.
    /// Carries the error of the last trial that failed.
    #[error("all {trials} trials failed, last error: {source}")]
    AllTrialsFailed {
        trials: usize,
        #[source]
        source: Box<GmmError>,
    },
    /// Errors encountered during linear algebra operations
    #[error(
        "linalg error: fitting the mixture failed because some components have \
        ill-defined empirical covariance (for instance caused by singleton \
        or collapsed samples). Try to decrease the number of components, \
        or increase noise. Error: {0}"
    )]
    LinalgError(#[from] LinalgError),
    /// When the KMeans run of the refined initialization fails
    #[error("initial KMeans failed: {0}")]
    KMeansError(#[from] KMeansError),
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    #[error(transparent)]
    MinMaxError(#[from] ndarray_stats::errors::MinMaxError),
}
