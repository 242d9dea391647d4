use std::collections::HashSet;

use bundlereg_streamline::{
    clustering::{qbx_and_merge, remove_clusters_by_size},
    distance::{distance_matrix_mdf, min_distance_cost},
    ops::{
        center_streamlines, select_random_set_of_streamlines, set_number_of_points,
        transform_streamlines,
    },
    Bundle,
};
use glam::{DMat4, DVec3};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

use crate::metric::MetricKind;
use crate::registration::{SlrConfig, StreamlineLinearRegistration};
use crate::transform::TransformKind;
use crate::RegistrationError;

/// Disjoint pairs of bundle indices registered together in one groupwise iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingAssignment {
    /// The `n / 2` pairs.
    pub pairs: Vec<(usize, usize)>,
    /// The index left out when `n` is odd.
    pub excluded: Option<usize>,
}

impl PairingAssignment {
    fn shares_pair_with(&self, other: &PairingAssignment) -> bool {
        let previous: HashSet<(usize, usize)> = other
            .pairs
            .iter()
            .flat_map(|&(a, b)| [(a, b), (b, a)])
            .collect();
        self.pairs.iter().any(|p| previous.contains(p))
    }
}

/// Randomly pair `n` bundles.
///
/// Every index appears in exactly one pair, except one excluded index when `n` is odd. With
/// a `previous` assignment, the previously excluded index is not excluded again and, when
/// `n > 3`, no pair of `previous` is repeated (in either order).
///
/// # Errors
///
/// `ConfigurationError` when `n <= 1`.
pub fn get_unique_pairs<R: Rng + ?Sized>(
    n: usize,
    previous: Option<&PairingAssignment>,
    rng: &mut R,
) -> Result<PairingAssignment, RegistrationError> {
    if n <= 1 {
        return Err(RegistrationError::ConfigurationError(format!(
            "the number of bundles must be > 1 but is {}",
            n
        )));
    }

    let mut index: Vec<usize> = (0..n).collect();
    let mut excluded = None;
    if n % 2 == 1 {
        let candidates: Vec<usize> = match previous.and_then(|p| p.excluded) {
            Some(last) => index.iter().copied().filter(|&i| i != last).collect(),
            None => index.clone(),
        };
        let pick = candidates[rng.random_range(0..candidates.len())];
        index.retain(|&i| i != pick);
        excluded = Some(pick);
    }

    let shuffle = |index: &mut Vec<usize>, rng: &mut R| {
        index.shuffle(rng);
        PairingAssignment {
            pairs: index.chunks_exact(2).map(|c| (c[0], c[1])).collect(),
            excluded,
        }
    };

    let mut assignment = shuffle(&mut index, &mut *rng);
    if let Some(previous) = previous {
        if n > 3 {
            while assignment.shares_pair_with(previous) {
                assignment = shuffle(&mut index, &mut *rng);
            }
        }
    }
    Ok(assignment)
}

/// Symmetric minimum distance between every pair `i < j` of bundles, in lexicographic pair
/// order.
pub fn group_distance(bundles: &[Bundle]) -> Result<Vec<f64>, RegistrationError> {
    let mut d = Vec::with_capacity(bundles.len() * bundles.len().saturating_sub(1) / 2);
    for (i, a) in bundles.iter().enumerate() {
        for b in bundles.iter().skip(i + 1) {
            d.push(min_distance_cost(&distance_matrix_mdf(a, b)?));
        }
    }
    Ok(d)
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

/// Configuration of [`groupwise_slr`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupwiseConfig {
    /// Transform family of every pairwise registration.
    pub x0: TransformKind,
    /// Stop once the mean group distance improved by less than this over the last three
    /// iterations.
    pub tol: f64,
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Clustering thresholds (mm); when `None` all streamlines are registered.
    pub qbx_thr: Option<Vec<f64>>,
    /// Number of points every streamline is resampled to.
    pub nb_pts: usize,
    /// Randomly keep at most this many streamlines per bundle.
    pub select_random: Option<usize>,
}

impl Default for GroupwiseConfig {
    fn default() -> Self {
        Self {
            x0: TransformKind::Affine,
            tol: 0.0,
            max_iter: 20,
            qbx_thr: Some(vec![4.0]),
            nb_pts: 20,
            select_random: Some(10000),
        }
    }
}

/// The result of [`groupwise_slr`].
#[derive(Debug, Clone)]
pub struct GroupwiseResult {
    /// The input bundles, at full resolution, moved to the common space.
    pub bundles: Vec<Bundle>,
    /// Affine of every input bundle to the common space.
    pub matrices: Vec<DMat4>,
    /// Group distance before the first iteration and after every iteration.
    pub distances: Vec<Vec<f64>>,
}

/// Unbiased groupwise registration of several bundles.
///
/// No bundle is taken as reference. At every iteration the bundles are randomly paired and
/// each pair is registered in its halfway space, so that both sides move toward each other.
/// Bundles end up in a common space close to the group average.
///
/// # Arguments
///
/// * `bundles` - At least two bundles.
/// * `config` - Preprocessing and stopping parameters.
/// * `rng` - Random source of the subsampling, the clustering and the pairings.
pub fn groupwise_slr<R: Rng + ?Sized>(
    bundles: &[Bundle],
    config: &GroupwiseConfig,
    rng: &mut R,
) -> Result<GroupwiseResult, RegistrationError> {
    let n = bundles.len();
    if n <= 1 {
        return Err(RegistrationError::ConfigurationError(format!(
            "groupwise registration needs at least 2 bundles, got {}",
            n
        )));
    }
    log::info!("Groupwise bundle registration of {} bundles", n);

    let mut centroids = Vec::with_capacity(n);
    let mut matrices = Vec::with_capacity(n);
    for (i, bundle) in bundles.iter().enumerate() {
        log::info!("Preprocessing bundle {}/{}: {} streamlines", i + 1, n, bundle.len());
        let selected = match config.select_random {
            Some(select) => select_random_set_of_streamlines(bundle, select, rng),
            None => bundle.clone(),
        };
        let resampled = set_number_of_points(&selected, config.nb_pts)?;
        let (centered, shift) = center_streamlines(&resampled)?;
        matrices.push(DMat4::from_translation(-DVec3::from(shift)));
        let reduced = match &config.qbx_thr {
            Some(thresholds) => {
                remove_clusters_by_size(&qbx_and_merge(&centered, thresholds, rng)?, 1)
            }
            None => centered,
        };
        centroids.push(reduced);
    }

    let mut distances = vec![group_distance(&centroids)?];
    log::info!("Initial group distance: {}", mean(&distances[0]));

    let slr_config = SlrConfig {
        metric: MetricKind::JointBundleMinDistance,
        x0: config.x0.into(),
        ..Default::default()
    };

    let mut assignment = get_unique_pairs(n, None, rng)?;
    for iteration in 1..=config.max_iter {
        for (k, &(a, b)) in assignment.pairs.iter().enumerate() {
            let mut slr = StreamlineLinearRegistration::new(&slr_config)?;
            let map = slr
                .optimize(&centroids[a], &centroids[b], Some(&DMat4::IDENTITY))?
                .into_joint()?;

            matrices[a] = map.matrix1 * matrices[a];
            matrices[b] = map.matrix2 * matrices[b];
            let (moved_a, moved_b) = map.transform(&centroids[a], &centroids[b]);
            centroids[a] = moved_a;
            centroids[b] = moved_b;
            log::debug!("Iteration {} pair {}/{}", iteration, k + 1, assignment.pairs.len());
        }

        distances.push(group_distance(&centroids)?);

        // compare with the distance three iterations ago
        let reference = iteration.saturating_sub(3);
        let improvement = mean(&distances[reference]) - mean(&distances[iteration]);
        log::info!(
            "Iteration {} group distance: {}, improvement over the previous 3: {}",
            iteration,
            mean(&distances[iteration]),
            improvement
        );
        if improvement < config.tol {
            log::info!("Groupwise registration converged: {} < {}", improvement, config.tol);
            break;
        }

        assignment = get_unique_pairs(n, Some(&assignment), rng)?;
    }

    // the matrices apply to the caller's streamlines, not to their subsampled copies
    let bundles = bundles
        .iter()
        .zip(matrices.iter())
        .map(|(bundle, mat)| transform_streamlines(bundle, mat))
        .collect();

    Ok(GroupwiseResult {
        bundles,
        matrices,
        distances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::compose_matrix44;
    use approx::assert_relative_eq;
    use bundlereg_streamline::Streamline;
    use rand::{rngs::StdRng, SeedableRng};

    fn covered(assignment: &PairingAssignment) -> Vec<usize> {
        let mut all: Vec<usize> = assignment.pairs.iter().flat_map(|&(a, b)| [a, b]).collect();
        all.extend(assignment.excluded);
        all.sort_unstable();
        all
    }

    #[test]
    fn test_pairs_too_few() {
        let mut rng = StdRng::seed_from_u64(0);
        for n in [0, 1] {
            assert!(matches!(
                get_unique_pairs(n, None, &mut rng),
                Err(RegistrationError::ConfigurationError(_))
            ));
        }
    }

    #[test]
    fn test_pairs_partition() -> Result<(), RegistrationError> {
        let mut rng = StdRng::seed_from_u64(1);
        for n in 2..12 {
            let assignment = get_unique_pairs(n, None, &mut rng)?;
            assert_eq!(assignment.pairs.len(), n / 2);
            assert_eq!(assignment.excluded.is_some(), n % 2 == 1);
            assert_eq!(covered(&assignment), (0..n).collect::<Vec<_>>());
        }
        Ok(())
    }

    #[test]
    fn test_pairs_do_not_repeat() -> Result<(), RegistrationError> {
        let mut rng = StdRng::seed_from_u64(2);
        for n in [4, 5, 8, 9] {
            let mut previous = get_unique_pairs(n, None, &mut rng)?;
            for _ in 0..20 {
                let next = get_unique_pairs(n, Some(&previous), &mut rng)?;
                assert!(!next.shares_pair_with(&previous));
                if n % 2 == 1 {
                    assert_ne!(next.excluded, previous.excluded);
                }
                assert_eq!(covered(&next), (0..n).collect::<Vec<_>>());
                previous = next;
            }
        }
        Ok(())
    }

    #[test]
    fn test_pairs_small_groups_may_repeat() -> Result<(), RegistrationError> {
        let mut rng = StdRng::seed_from_u64(3);
        let previous = get_unique_pairs(2, None, &mut rng)?;
        let next = get_unique_pairs(2, Some(&previous), &mut rng)?;
        assert_eq!(next.pairs.len(), 1);
        assert_eq!(covered(&next), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn test_group_distance() -> Result<(), RegistrationError> {
        let a = Bundle::from(vec![vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]]);
        let b = Bundle::from(vec![vec![[0.0, 2.0, 0.0], [1.0, 2.0, 0.0]]]);
        let d = group_distance(&[a.clone(), b, a])?;
        assert_eq!(d.len(), 3);
        // 0.25 * (2 + 2)^2
        assert_relative_eq!(d[0], 4.0);
        assert_relative_eq!(d[1], 0.0);
        assert_relative_eq!(d[2], 4.0);
        Ok(())
    }

    #[test]
    fn test_groupwise_needs_two_bundles() {
        let mut rng = StdRng::seed_from_u64(0);
        let bundle = Bundle::from(vec![vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]]);
        assert!(matches!(
            groupwise_slr(&[bundle], &GroupwiseConfig::default(), &mut rng),
            Err(RegistrationError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_groupwise_reduces_distance() -> Result<(), Box<dyn std::error::Error>> {
        let base: Bundle = (0..8)
            .map(|i| {
                let y = i as f64 * 3.0;
                Streamline::new(
                    (0..30)
                        .map(|k| {
                            let t = k as f64;
                            [t * 2.0, y + (0.2 * t).sin() * 3.0, 0.02 * t * t + 0.5 * y]
                        })
                        .collect(),
                )
            })
            .collect();
        let bundles = vec![
            base.clone(),
            base.transform(&compose_matrix44(&[3.0, 0.0, 0.0, 8.0, 0.0, 0.0])?),
            base.transform(&compose_matrix44(&[-2.0, 5.0, 0.0, 0.0, -6.0, 0.0])?),
            base.transform(&compose_matrix44(&[0.0, -4.0, 2.0, 0.0, 0.0, 7.0])?),
        ];
        let config = GroupwiseConfig {
            x0: TransformKind::Rigid,
            max_iter: 4,
            qbx_thr: None,
            select_random: None,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let res = groupwise_slr(&bundles, &config, &mut rng)?;

        assert_eq!(res.bundles.len(), 4);
        assert_eq!(res.matrices.len(), 4);
        assert!(res.distances.len() >= 2 && res.distances.len() <= 5);
        assert!(res.distances.iter().all(|row| row.len() == 6));

        let initial = mean(&res.distances[0]);
        let last = res.distances.last().map(|row| mean(row)).ok_or("no distances")?;
        assert!(last < initial, "{last} >= {initial}");

        // the returned bundles are the inputs moved by their matrices
        let moved = group_distance(&res.bundles)?;
        assert!(mean(&moved) < mean(&group_distance(&bundles)?));
        Ok(())
    }

    #[test]
    fn test_groupwise_keeps_input_resolution() -> Result<(), Box<dyn std::error::Error>> {
        let base: Bundle = (0..8)
            .map(|i| {
                let y = i as f64 * 2.5;
                Streamline::new(
                    (0..60)
                        .map(|k| {
                            let t = k as f64 * 0.5;
                            [t * 2.0, y + (0.3 * t).cos() * 2.0, 0.01 * t * t + 0.4 * y]
                        })
                        .collect(),
                )
            })
            .collect();
        let bundles = vec![
            base.clone(),
            base.transform(&compose_matrix44(&[2.0, -1.0, 0.5])?),
            base.transform(&compose_matrix44(&[-1.5, 3.0, 1.0])?),
        ];
        let config = GroupwiseConfig {
            x0: TransformKind::Translation,
            max_iter: 2,
            qbx_thr: None,
            nb_pts: 20,
            select_random: Some(5),
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        let res = groupwise_slr(&bundles, &config, &mut rng)?;

        assert_eq!(res.bundles.len(), bundles.len());
        for ((moved, input), mat) in res.bundles.iter().zip(bundles.iter()).zip(&res.matrices) {
            assert_eq!(moved.len(), 8);
            assert_eq!(moved.point_count()?, 60);
            assert_eq!(moved.total_points(), input.total_points());
            let expected = input.transform(mat);
            for (a, b) in moved.iter().zip(expected.iter()) {
                for (p, q) in a.points().iter().zip(b.points()) {
                    assert_relative_eq!(p[0], q[0]);
                    assert_relative_eq!(p[1], q[1]);
                    assert_relative_eq!(p[2], q[2]);
                }
            }
        }
        Ok(())
    }
}
