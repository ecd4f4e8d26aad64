use thiserror::Error;

/// An error when fitting with an invalid hyperparameter
#[derive(Error, Debug)]
pub enum KMeansParamsError {
    #[error("n_clusters cannot be 0")]
    NClusters,
    #[error("n_runs cannot be 0")]
    NRuns,
    #[error("tolerance must be greater than 0")]
    Tolerance,
    #[error("max_n_iterations cannot be 0")]
    MaxIterations,
}

/// An error when modeling a KMeans algorithm
#[derive(Error, Debug)]
pub enum KMeansError {
    /// When any of the hyperparameters are set the wrong value
    #[error("invalid hyperparameter: {0}")]
    InvalidParams(#[from] KMeansParamsError),
    /// When inertia computation fails
    #[error("fitting failed: no inertia improvement (-inf)")]
    InertiaError,
    /// When fitting algorithm does not converge
    #[error("fitting failed: did not converge. Try different init parameters or check for degenerate data.")]
    NotConverged,
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
}
