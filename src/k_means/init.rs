use linfa::Float;
use ndarray::{s, Array1, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_rand::rand;
use ndarray_rand::rand::distributions::{Distribution, WeightedIndex};
use ndarray_rand::rand::Rng;

use crate::k_means::algorithm::update_min_dists;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The initialization strategy used to seed the centroids.
pub enum KMeansInit {
    /// Pick random points as centroids
    Random,
    /// K-means++, spreading the seeds out proportionally to their squared
    /// distance from the already chosen ones
    KMeansPlusPlus,
}

impl KMeansInit {
    pub(crate) fn run<F: Float, D: Data<Elem = F> + Sync>(
        &self,
        n_clusters: usize,
        observations: &ArrayBase<D, Ix2>,
        rng: &mut impl Rng,
    ) -> Array2<F> {
        match self {
            Self::Random => random_init(n_clusters, observations, rng),
            Self::KMeansPlusPlus => k_means_pp(n_clusters, observations, rng),
        }
    }
}

fn random_init<F: Float, D: Data<Elem = F>>(
    n_clusters: usize,
    observations: &ArrayBase<D, Ix2>,
    rng: &mut impl Rng,
) -> Array2<F> {
    let n_samples = observations.nrows();
    let indices = rand::seq::index::sample(rng, n_samples, n_clusters).into_vec();
    observations.select(Axis(0), &indices)
}

fn k_means_pp<F: Float, D: Data<Elem = F> + Sync>(
    n_clusters: usize,
    observations: &ArrayBase<D, Ix2>,
    rng: &mut impl Rng,
) -> Array2<F> {
    let (n_samples, n_features) = observations.dim();
    let mut centroids = Array2::zeros((n_clusters, n_features));
    let first = rng.gen_range(0..n_samples);
    centroids.row_mut(0).assign(&observations.row(first));

    let mut dists = Array1::zeros(n_samples);
    for c_cnt in 1..n_clusters {
        update_min_dists(
            &centroids.slice(s![0..c_cnt, ..]),
            observations,
            &mut dists,
        );
        // all weights can collapse to zero when there are fewer distinct
        // points than clusters; fall back on a uniform pick
        let centroid_idx = WeightedIndex::new(dists.iter())
            .map(|weights| weights.sample(rng))
            .unwrap_or_else(|_| rng.gen_range(0..n_samples));
        centroids
            .row_mut(c_cnt)
            .assign(&observations.row(centroid_idx));
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use rand_isaac::Isaac64Rng;

    #[test]
    fn random_init_picks_distinct_points() {
        let observations = array![[0., 0.], [1., 1.], [2., 2.], [3., 3.]];
        let mut rng = Isaac64Rng::seed_from_u64(42);
        let centroids = random_init(3, &observations, &mut rng);
        assert_eq!(centroids.dim(), (3, 2));
        for c in centroids.rows() {
            assert!(observations
                .rows()
                .into_iter()
                .any(|row| row.iter().zip(c.iter()).all(|(a, b)| a == b)));
        }
    }

    #[test]
    fn k_means_pp_spreads_seeds() {
        // two tight groups far apart; k-means++ should pick one seed in each
        let observations = array![
            [0., 0.],
            [0.1, 0.],
            [0., 0.1],
            [100., 100.],
            [100.1, 100.],
            [100., 100.1]
        ];
        let mut rng = Isaac64Rng::seed_from_u64(42);
        let centroids = k_means_pp(2, &observations, &mut rng);
        let spread = (&centroids.row(0) - &centroids.row(1))
            .mapv(|v: f64| v * v)
            .sum();
        assert!(spread > 1e3);
    }
}
