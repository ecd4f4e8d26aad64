mod algorithm;
mod covariance;
mod errors;
mod gaussian;
mod hyperparams;
mod init;

pub use algorithm::*;
pub use covariance::*;
pub use errors::*;
pub use gaussian::*;
pub use hyperparams::*;
