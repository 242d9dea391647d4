use bundlereg_optim::{LBfgsBOptions, Method};
use bundlereg_streamline::{
    clustering::{qbx_and_merge, remove_clusters_by_size},
    ops::{select_random_set_of_streamlines, set_number_of_points},
    Bundle,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::map::RegistrationMap;
use crate::metric::MetricKind;
use crate::progressive::progressive_slr;
use crate::registration::{SlrConfig, StreamlineLinearRegistration};
use crate::transform::{TransformKind, DEFAULT_BOUNDS};
use crate::RegistrationError;

/// Configuration of [`slr_with_qbx`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QbxConfig {
    /// The final transform family.
    pub x0: TransformKind,
    /// Clusters with fewer streamlines are discarded.
    pub rm_small_clusters: usize,
    /// Iteration budget of the minimizer when not progressive.
    pub maxiter: usize,
    /// Randomly keep at most this many streamlines of each bundle.
    pub select_random: Option<usize>,
    /// Keep streamlines strictly longer than this (mm).
    pub greater_than: f64,
    /// Keep streamlines strictly shorter than this (mm).
    pub less_than: f64,
    /// Clustering thresholds (mm), from coarse to fine.
    pub qbx_thr: Vec<f64>,
    /// Number of points every streamline is resampled to.
    pub nb_pts: usize,
    /// Run [`progressive_slr`] up to `x0` instead of a single registration.
    pub progressive: bool,
    /// Workers of the parallel metric.
    pub num_threads: Option<i32>,
}

impl Default for QbxConfig {
    fn default() -> Self {
        Self {
            x0: TransformKind::Affine,
            rm_small_clusters: 50,
            maxiter: 100,
            select_random: None,
            greater_than: 50.0,
            less_than: 250.0,
            qbx_thr: vec![40.0, 30.0, 20.0, 15.0],
            nb_pts: 20,
            progressive: true,
            num_threads: None,
        }
    }
}

/// The result of [`slr_with_qbx`].
#[derive(Debug, Clone)]
pub struct QbxRegistration {
    /// The registration of the moving centroids onto the static centroids.
    pub map: RegistrationMap,
    /// Centroids of the static bundle that were registered.
    pub static_centroids: Bundle,
    /// Centroids of the moving bundle that were registered.
    pub moving_centroids: Bundle,
}

impl QbxRegistration {
    /// Move the full moving bundle to the static space.
    pub fn transform(&self, moving: &Bundle) -> Bundle {
        self.map.transform(moving)
    }
}

fn cluster_centroids<R: Rng + ?Sized>(
    bundle: &Bundle,
    config: &QbxConfig,
    side: &str,
    rng: &mut R,
) -> Result<Bundle, RegistrationError> {
    let filtered = bundle.filter_by_length(config.greater_than, config.less_than);
    log::info!("{} streamlines after length reduction: {}", side, filtered.len());

    let selected = match config.select_random {
        Some(select) => select_random_set_of_streamlines(&filtered, select, rng),
        None => filtered,
    };
    if selected.is_empty() {
        return Err(RegistrationError::EmptyResult(format!(
            "No {} streamlines left after length reduction. Please widen the length range.",
            side.to_lowercase()
        )));
    }

    let resampled = set_number_of_points(&selected, config.nb_pts)?;
    let cluster_map = qbx_and_merge(&resampled, &config.qbx_thr, rng)?;
    let centroids = remove_clusters_by_size(&cluster_map, config.rm_small_clusters);
    if centroids.is_empty() {
        return Err(RegistrationError::EmptyResult(format!(
            "No cluster centroids found in {} streamlines. \
             Please decrease the value of rm_small_clusters.",
            side.to_lowercase()
        )));
    }
    log::info!("QB {} centroids size: {}", side.to_lowercase(), centroids.len());
    Ok(centroids)
}

/// Relative reduction tolerance of the one-shot centroid registration, `1e7 * f64::EPSILON`.
pub const CENTROID_FTOL: f64 = 2.220446049250313e-9;

// One-shot mode only sets the iteration budget; ftol drops to 1e7 machine epsilons.
fn centroid_registration(
    config: &QbxConfig,
) -> Result<StreamlineLinearRegistration, RegistrationError> {
    let slr_config = SlrConfig {
        x0: config.x0.into(),
        num_threads: config.num_threads,
        ..Default::default()
    };
    let method = Method::LBfgsB(LBfgsBOptions {
        ftol: CENTROID_FTOL,
        maxiter: config.maxiter,
        ..Default::default()
    });
    Ok(StreamlineLinearRegistration::new(&slr_config)?.with_method(method))
}

/// Register two large sets of streamlines, typically whole brain tractograms, through the
/// centroids of their clusters.
///
/// Both sets are filtered by length, optionally subsampled, resampled and clustered. Small
/// clusters are discarded and the remaining centroids are registered, progressively or in
/// one go. The returned map applies to the full moving set.
///
/// # Errors
///
/// `EmptyResult` when a side has no streamline in the length range or no cluster of at least
/// `rm_small_clusters` streamlines.
pub fn slr_with_qbx<R: Rng + ?Sized>(
    static_bundle: &Bundle,
    moving: &Bundle,
    config: &QbxConfig,
    rng: &mut R,
) -> Result<QbxRegistration, RegistrationError> {
    log::info!("Static streamlines size: {}", static_bundle.len());
    log::info!("Moving streamlines size: {}", moving.len());

    let static_centroids = cluster_centroids(static_bundle, config, "Static", rng)?;
    let moving_centroids = cluster_centroids(moving, config, "Moving", rng)?;

    let output = if config.progressive {
        progressive_slr(
            &static_centroids,
            &moving_centroids,
            MetricKind::BundleMinDistance,
            config.x0,
            &DEFAULT_BOUNDS,
            "L-BFGS-B",
            config.num_threads,
        )?
    } else {
        centroid_registration(config)?.optimize(&static_centroids, &moving_centroids, None)?
    };
    let map = output.into_single()?;
    log::info!("SLR iterations: {}", map.iterations);

    Ok(QbxRegistration {
        map,
        static_centroids,
        moving_centroids,
    })
}

/// Whole brain registration is cluster-accelerated registration of tractograms.
pub use slr_with_qbx as whole_brain_slr;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::compose_matrix44;
    use approx::assert_relative_eq;
    use bundlereg_streamline::Streamline;
    use rand::{rngs::StdRng, SeedableRng};

    // well separated long streamlines, each one its own cluster at small thresholds
    fn tractogram() -> Bundle {
        (0..24)
            .map(|i| {
                let (row, col) = ((i / 6) as f64, (i % 6) as f64);
                Streamline::new(
                    (0..40)
                        .map(|k| {
                            let t = k as f64 * 2.5;
                            [
                                t,
                                col * 9.0 + (t * 0.05).sin() * (row + 1.0),
                                row * 9.0 + 0.002 * t * t * col,
                            ]
                        })
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = QbxConfig::default();
        assert_eq!(config.x0, TransformKind::Affine);
        assert_eq!(config.rm_small_clusters, 50);
        assert_eq!(config.qbx_thr, vec![40.0, 30.0, 20.0, 15.0]);
        assert!(config.progressive);
    }

    #[test]
    fn test_no_centroids() -> Result<(), Box<dyn std::error::Error>> {
        let bundle = tractogram();
        let config = QbxConfig {
            rm_small_clusters: 1000,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(42);
        let res = slr_with_qbx(&bundle, &bundle, &config, &mut rng);
        assert!(matches!(
            res,
            Err(RegistrationError::EmptyResult(msg)) if msg.contains("static")
        ));
        Ok(())
    }

    #[test]
    fn test_length_filter_empties() {
        let bundle = tractogram();
        let config = QbxConfig {
            less_than: 10.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            slr_with_qbx(&bundle, &bundle, &config, &mut rng),
            Err(RegistrationError::EmptyResult(_))
        ));
    }

    #[test]
    fn test_rigid_qbx() -> Result<(), Box<dyn std::error::Error>> {
        let static_bundle = tractogram();
        let moving =
            static_bundle.transform(&compose_matrix44(&[4.0, -3.0, 2.0, 0.0, 0.0, 0.0])?);
        let config = QbxConfig {
            x0: TransformKind::Rigid,
            rm_small_clusters: 1,
            qbx_thr: vec![5.0],
            num_threads: Some(2),
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let res = whole_brain_slr(&static_bundle, &moving, &config, &mut rng)?;
        assert_eq!(res.static_centroids.len(), 24);
        assert_eq!(res.moving_centroids.len(), 24);
        assert_relative_eq!(res.map.matrix.w_axis.x, -4.0, epsilon = 0.2);
        assert_relative_eq!(res.map.matrix.w_axis.y, 3.0, epsilon = 0.2);
        assert_relative_eq!(res.map.matrix.w_axis.z, -2.0, epsilon = 0.2);

        let moved = res.transform(&moving);
        assert_eq!(moved.len(), moving.len());
        Ok(())
    }

    #[test]
    fn test_centroid_registration_options() -> Result<(), RegistrationError> {
        let config = QbxConfig {
            maxiter: 7,
            progressive: false,
            ..Default::default()
        };
        let slr = centroid_registration(&config)?;
        let Method::LBfgsB(options) = slr.method() else {
            panic!("expected L-BFGS-B, got {:?}", slr.method());
        };
        assert_eq!(options.ftol, CENTROID_FTOL);
        assert_eq!(options.maxiter, 7);
        assert_eq!(options.maxcor, 10);
        assert_eq!(options.gtol, 1e-5);
        assert_eq!(options.eps, 1e-8);
        assert_eq!(options.maxfun, 15000);
        assert_eq!(slr.x0().len(), 12);
        Ok(())
    }

    #[test]
    fn test_non_progressive() -> Result<(), Box<dyn std::error::Error>> {
        let static_bundle = tractogram();
        let moving = static_bundle.transform(&compose_matrix44(&[1.0, 1.0, 1.0])?);
        let config = QbxConfig {
            x0: TransformKind::Translation,
            rm_small_clusters: 1,
            qbx_thr: vec![5.0],
            progressive: false,
            maxiter: 5,
            select_random: Some(20),
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let res = slr_with_qbx(&static_bundle, &moving, &config, &mut rng)?;
        assert_eq!(res.map.xopt.len(), 3);
        assert!(res.map.iterations <= 5);
        assert_eq!(res.static_centroids.len(), 20);
        Ok(())
    }
}
