//! `mixfit` fits and samples [Gaussian mixture models](GaussianMixtureModel)
//! in pure Rust.
//!
//! ## The big picture
//!
//! A Gaussian mixture model represents a data distribution as a weighted sum
//! of multivariate normal components. `mixfit` provides the model-fitting
//! engine: iterative Expectation-Maximization with multiple random restarts,
//! optional k-means-based refined initialization, full or diagonal covariance
//! constraints and numerical-stability safeguards (noise injection on the
//! covariance diagonals, positive-definiteness enforcement).
//!
//! The crate plugs into the `linfa` ecosystem: datasets are
//! [`linfa::DatasetBase`] wrappers around `ndarray` matrices with one
//! observation per row, fitting goes through [`linfa::traits::Fit`] and
//! hyperparameters are validated eagerly through [`linfa::ParamGuard`].
//!
//! ## Current state
//!
//! `mixfit` provides:
//! * [Gaussian mixture fitting](GaussianMixtureModel) — EM with `trials`
//!   independent restarts, keeping the model with the highest log-likelihood;
//! * [sampling](GaussianMixtureModel::sample) and
//!   [density evaluation](GaussianMixtureModel::density) for trained models;
//! * a [K-means](KMeans) implementation, used internally by the refined
//!   initialization and usable on its own.
//!
//! Implementation choices and algorithmic details live on the pages of the
//! individual types.
mod gaussian_mixture;
#[allow(clippy::new_ret_no_self)]
mod k_means;

pub use gaussian_mixture::*;
pub use k_means::*;
