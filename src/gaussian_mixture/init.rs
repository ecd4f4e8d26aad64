use linfa::traits::{Fit, Transformer};
use linfa::{DatasetBase, Float};
use ndarray::{s, Array1, Array2, Array3, ArrayBase, Axis, Data, Ix2, Zip};
use ndarray_rand::rand;
use ndarray_rand::rand::{Rng, SeedableRng};

use crate::gaussian_mixture::errors::{GmmError, Result};
use crate::k_means::{closest_centroid, KMeans};

/// Assign every observation to a uniformly random cluster and derive the
/// initial Gaussians from the partition.
pub(crate) fn random_partition<F: Float, D: Data<Elem = F>, R: Rng>(
    observations: &ArrayBase<D, Ix2>,
    n_clusters: usize,
    noise: F,
    rng: &mut R,
) -> Result<(Array1<F>, Array2<F>, Array3<F>)> {
    let n_samples = observations.nrows();
    let n_features = observations.ncols();

    let memberships =
        Array1::from_iter((0..n_samples).map(|_| rng.gen_range(0..n_clusters)));

    let mut means = Array2::zeros((n_clusters, n_features));
    let mut counts = vec![0usize; n_clusters];
    Zip::from(observations.rows())
        .and(&memberships)
        .for_each(|observation, &c| {
            let mut mean = means.row_mut(c);
            mean += &observation;
            counts[c] += 1;
        });
    for (c, &count) in counts.iter().enumerate() {
        if count > 0 {
            let denom = F::cast(count);
            means.row_mut(c).mapv_inplace(|v| v / denom);
        }
    }

    gaussians_from_memberships(observations, &memberships, means, noise, rng)
}

/// Refined start: run k-means to convergence on `samplings` random subsamples
/// holding a `percentage` fraction of the data each, keep the candidate
/// centroid set with the lowest distortion over the full dataset and derive
/// covariances and weights from the nearest-centroid assignment.
pub(crate) fn refined_partition<F: Float, D: Data<Elem = F>, R: Rng + SeedableRng + Clone>(
    observations: &ArrayBase<D, Ix2>,
    n_clusters: usize,
    percentage: F,
    samplings: usize,
    noise: F,
    rng: &mut R,
) -> Result<(Array1<F>, Array2<F>, Array3<F>)> {
    let n_samples = observations.nrows();
    let fraction = percentage.to_f64().unwrap_or(0.);
    let subsample_size = ((fraction * n_samples as f64).ceil() as usize)
        .max(n_clusters)
        .min(n_samples);

    let mut best: Option<(F, Array2<F>)> = None;
    let mut last_err = None;
    for _ in 0..samplings {
        let indices = rand::seq::index::sample(rng, n_samples, subsample_size).into_vec();
        let subsample = observations.select(Axis(0), &indices);
        let child_rng = R::seed_from_u64(rng.gen());
        let fitted = KMeans::params_with_rng(n_clusters, child_rng)
            .n_runs(1)
            .fit(&DatasetBase::from(subsample));
        let model = match fitted {
            Ok(model) => model,
            Err(err) => {
                last_err = Some(err);
                continue;
            }
        };
        // Candidate sets are compared on the full dataset, not the subsample
        // they were trained on.
        let distortion = model.transform(observations).sum();
        let better = match &best {
            Some((best_distortion, _)) => distortion < *best_distortion,
            None => true,
        };
        if better {
            best = Some((distortion, model.centroids().to_owned()));
        }
    }

    let centroids = match best {
        Some((_, centroids)) => centroids,
        None => {
            return Err(last_err.map(GmmError::KMeansError).unwrap_or_else(|| {
                GmmError::EmptyCluster("refined start produced no candidate centroids".to_string())
            }))
        }
    };

    let memberships = Array1::from_iter(
        observations
            .rows()
            .into_iter()
            .map(|observation| closest_centroid(&centroids, &observation).0),
    );
    gaussians_from_memberships(observations, &memberships, centroids, noise, rng)
}

/// Compute weights and covariances around the given means from a hard
/// assignment. Empty clusters are reseeded to a randomly chosen observation
/// with a dataset-scale diagonal covariance, so no component starts
/// degenerate.
fn gaussians_from_memberships<F: Float, D: Data<Elem = F>, R: Rng>(
    observations: &ArrayBase<D, Ix2>,
    memberships: &Array1<usize>,
    mut means: Array2<F>,
    noise: F,
    rng: &mut R,
) -> Result<(Array1<F>, Array2<F>, Array3<F>)> {
    let n_samples = observations.nrows();
    let n_clusters = means.nrows();
    let n_features = means.ncols();

    let mut counts = Array1::<F>::zeros(n_clusters);
    for &c in memberships.iter() {
        counts[c] += F::one();
    }

    let bump = if noise > F::zero() { noise } else { F::cast(1e-6) };
    let dataset_variance = observations.var_axis(Axis(0), F::zero()) + bump;

    let mut covariances = Array3::zeros((n_clusters, n_features, n_features));
    for c in 0..n_clusters {
        if counts[c] <= F::zero() {
            let seed = rng.gen_range(0..n_samples);
            means.row_mut(c).assign(&observations.row(seed));
            covariances
                .slice_mut(s![c, .., ..])
                .assign(&Array2::from_diag(&dataset_variance));
            counts[c] = F::one();
            continue;
        }
        let mask = Array1::from_iter(
            memberships
                .iter()
                .map(|&m| if m == c { F::one() } else { F::zero() }),
        );
        let diff = observations - &means.row(c);
        let weighted = &diff.t() * &mask;
        let mut cov_c = weighted.dot(&diff) / counts[c];
        cov_c.diag_mut().mapv_inplace(|v| v + noise);
        covariances.slice_mut(s![c, .., ..]).assign(&cov_c);
    }

    let total = counts.sum();
    let weights = counts / total;
    Ok((weights, means, covariances))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_isaac::Isaac64Rng;

    #[test]
    fn random_partition_moments_are_consistent() {
        let mut rng = Isaac64Rng::seed_from_u64(42);
        let observations = Array2::random_using((60, 2), Uniform::new(-5., 5.), &mut rng);
        let (weights, means, covariances) =
            random_partition(&observations, 3, 1e-6, &mut rng).unwrap();

        assert_eq!(means.dim(), (3, 2));
        assert_eq!(covariances.dim(), (3, 2, 2));
        assert_abs_diff_eq!(weights.sum(), 1., epsilon = 1e-9);
        assert!(weights.iter().all(|&w| w >= 0.));
    }

    #[test]
    fn empty_cluster_is_reseeded() {
        let observations = array![[0., 0.], [1., 0.], [0., 1.], [1., 1.]];
        // every point in cluster 0, clusters 1 and 2 start empty
        let memberships = array![0, 0, 0, 0];
        let means = array![[0.5, 0.5], [0., 0.], [0., 0.]];
        let mut rng = Isaac64Rng::seed_from_u64(7);
        let (weights, means, covariances) =
            gaussians_from_memberships(&observations, &memberships, means, 1e-6, &mut rng).unwrap();

        assert_abs_diff_eq!(weights.sum(), 1., epsilon = 1e-9);
        for c in 1..3 {
            // reseeded means coincide with one of the observations
            let mean = means.row(c);
            assert!(observations
                .rows()
                .into_iter()
                .any(|row| row.iter().zip(mean.iter()).all(|(a, b)| a == b)));
            // and the covariance is a non-degenerate diagonal
            let cov = covariances.slice(s![c, .., ..]);
            assert!(cov[[0, 0]] > 0. && cov[[1, 1]] > 0.);
            assert_abs_diff_eq!(cov[[0, 1]], 0., epsilon = 1e-12);
        }
    }

    #[test]
    fn refined_partition_recovers_separated_blobs() {
        let mut rng = Isaac64Rng::seed_from_u64(3);
        let blob_a = Array2::random_using((100, 2), Uniform::new(-0.5, 0.5), &mut rng);
        let blob_b =
            Array2::random_using((100, 2), Uniform::new(-0.5, 0.5), &mut rng) + 10.;
        let observations = ndarray::concatenate(Axis(0), &[blob_a.view(), blob_b.view()]).unwrap();

        let (weights, means, _) =
            refined_partition(&observations, 2, 0.5, 5, 1e-6, &mut rng).unwrap();

        assert_abs_diff_eq!(weights.sum(), 1., epsilon = 1e-9);
        let mut centers: Vec<f64> = means.rows().into_iter().map(|r| r[0]).collect();
        centers.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_abs_diff_eq!(centers[0], 0., epsilon = 0.5);
        assert_abs_diff_eq!(centers[1], 10., epsilon = 0.5);
    }
}
