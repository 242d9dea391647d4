use bundlereg_streamline::{
    distance::{
        bundle_minimum_distance, bundle_minimum_distance_asymmetric, distance_matrix_mdf,
        min_distance_cost, sum_distance_cost,
    },
    threads::build_thread_pool,
    Bundle, Point3, StreamlineError,
};
use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::transform::{compose_matrix44, halfway_params};
use crate::RegistrationError;

/// A cost function over transform parameters for a fixed pair of bundles.
///
/// `setup` is called once with the static and moving bundles; `distance` is then called
/// repeatedly by the minimizer. It must be minimal when the transformed moving bundle
/// matches the static bundle.
pub trait StreamlineDistanceMetric {
    /// Store the static and moving bundles.
    ///
    /// Every streamline of both bundles must have the same number of points.
    fn setup(&mut self, static_bundle: &Bundle, moving: &Bundle) -> Result<(), RegistrationError>;

    /// The cost of the moving bundle transformed by `compose_matrix44(params)`.
    ///
    /// Returns infinity when the metric was not set up or `params` has an invalid length.
    fn distance(&self, params: &[f64]) -> f64;
}

pub(crate) fn check_point_counts(
    static_bundle: &Bundle,
    moving: &Bundle,
) -> Result<usize, RegistrationError> {
    let count = |bundle: &Bundle, context: &'static str| {
        bundle.point_count().map_err(|e| match e {
            StreamlineError::NonUniformPointCount { expected, actual } => {
                RegistrationError::DimensionMismatch { context, expected, actual }
            }
            e => e.into(),
        })
    };
    let expected = count(static_bundle, "Static")?;
    let actual = count(moving, "Moving")?;
    if expected != actual {
        return Err(RegistrationError::DimensionMismatch {
            context: "Static and moving",
            expected,
            actual,
        });
    }
    Ok(expected)
}

fn transform_points(points: &[Point3], affine: &DMat4) -> Vec<Point3> {
    points
        .iter()
        .map(|p| affine.transform_point3(DVec3::from(*p)).to_array())
        .collect()
}

/// Bundle-based minimum distance (BMD) over flattened points.
///
/// Rows of the distance matrix are evaluated in parallel on a dedicated worker pool.
#[derive(Debug, Default)]
pub struct BundleMinDistanceMetric {
    num_threads: Option<i32>,
    pool: Option<rayon::ThreadPool>,
    static_pts: Vec<Point3>,
    moving_pts: Vec<Point3>,
    block_size: usize,
}

impl BundleMinDistanceMetric {
    /// Create the metric. See [`bundlereg_streamline::threads::determine_num_threads`] for
    /// the meaning of `num_threads`.
    pub fn new(num_threads: Option<i32>) -> Self {
        Self {
            num_threads,
            ..Default::default()
        }
    }

    fn setup_points(
        &mut self,
        static_bundle: &Bundle,
        moving: &Bundle,
    ) -> Result<(), RegistrationError> {
        check_point_counts(static_bundle, moving)?;
        if self.pool.is_none() {
            self.pool = Some(build_thread_pool(self.num_threads)?);
        }
        let (static_pts, block_size) = static_bundle.unlist()?;
        let (moving_pts, _) = moving.unlist()?;
        self.static_pts = static_pts;
        self.moving_pts = moving_pts;
        self.block_size = block_size;
        Ok(())
    }

    fn moved_points(&self, params: &[f64]) -> Option<Vec<Point3>> {
        if self.block_size == 0 {
            return None;
        }
        let affine = compose_matrix44(params).ok()?;
        Some(transform_points(&self.moving_pts, &affine))
    }
}

impl StreamlineDistanceMetric for BundleMinDistanceMetric {
    fn setup(&mut self, static_bundle: &Bundle, moving: &Bundle) -> Result<(), RegistrationError> {
        self.setup_points(static_bundle, moving)
    }

    fn distance(&self, params: &[f64]) -> f64 {
        match self.moved_points(params) {
            Some(moved) => bundle_minimum_distance(
                &self.static_pts,
                &moved,
                self.block_size,
                self.pool.as_ref(),
            ),
            None => f64::INFINITY,
        }
    }
}

/// Asymmetric bundle minimum distance: only the static streamlines look for their closest
/// moving streamline.
#[derive(Debug, Default)]
pub struct BundleMinDistanceAsymmetricMetric(BundleMinDistanceMetric);

impl BundleMinDistanceAsymmetricMetric {
    /// Create the metric.
    pub fn new(num_threads: Option<i32>) -> Self {
        Self(BundleMinDistanceMetric::new(num_threads))
    }
}

impl StreamlineDistanceMetric for BundleMinDistanceAsymmetricMetric {
    fn setup(&mut self, static_bundle: &Bundle, moving: &Bundle) -> Result<(), RegistrationError> {
        self.0.setup_points(static_bundle, moving)
    }

    fn distance(&self, params: &[f64]) -> f64 {
        match self.0.moved_points(params) {
            Some(moved) => bundle_minimum_distance_asymmetric(
                &self.0.static_pts,
                &moved,
                self.0.block_size,
                self.0.pool.as_ref(),
            ),
            None => f64::INFINITY,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct BundlePair {
    static_bundle: Bundle,
    moving: Bundle,
}

impl BundlePair {
    fn set(&mut self, static_bundle: &Bundle, moving: &Bundle) -> Result<(), RegistrationError> {
        check_point_counts(static_bundle, moving)?;
        self.static_bundle = static_bundle.clone();
        self.moving = moving.clone();
        Ok(())
    }

    fn distance_matrix(&self, params: &[f64]) -> Option<faer::Mat<f64>> {
        if self.static_bundle.is_empty() {
            return None;
        }
        let affine = compose_matrix44(params).ok()?;
        distance_matrix_mdf(&self.static_bundle, &self.moving.transform(&affine)).ok()
    }
}

/// Bundle minimum distance computed from the full distance matrix.
///
/// Same cost as [`BundleMinDistanceMetric`] but sequential and holding the whole matrix in
/// memory.
#[derive(Debug, Default, Clone)]
pub struct BundleMinDistanceMatrixMetric(BundlePair);

impl StreamlineDistanceMetric for BundleMinDistanceMatrixMetric {
    fn setup(&mut self, static_bundle: &Bundle, moving: &Bundle) -> Result<(), RegistrationError> {
        self.0.set(static_bundle, moving)
    }

    fn distance(&self, params: &[f64]) -> f64 {
        self.0
            .distance_matrix(params)
            .map_or(f64::INFINITY, |d| min_distance_cost(&d))
    }
}

/// Sum of the whole distance matrix instead of the sum of its minima.
#[derive(Debug, Default, Clone)]
pub struct BundleSumDistanceMatrixMetric(BundlePair);

impl StreamlineDistanceMetric for BundleSumDistanceMatrixMetric {
    fn setup(&mut self, static_bundle: &Bundle, moving: &Bundle) -> Result<(), RegistrationError> {
        self.0.set(static_bundle, moving)
    }

    fn distance(&self, params: &[f64]) -> f64 {
        self.0
            .distance_matrix(params)
            .map_or(f64::INFINITY, |d| sum_distance_cost(&d))
    }
}

/// Bundle minimum distance in the halfway space between both bundles.
///
/// Neither bundle is a fixed reference: the parameters are split with
/// [`halfway_params`] and each bundle is moved by its half of the transform before the
/// distance is measured.
#[derive(Debug, Default, Clone)]
pub struct JointBundleMinDistanceMetric(BundlePair);

impl StreamlineDistanceMetric for JointBundleMinDistanceMetric {
    fn setup(&mut self, static_bundle: &Bundle, moving: &Bundle) -> Result<(), RegistrationError> {
        self.0.set(static_bundle, moving)
    }

    fn distance(&self, params: &[f64]) -> f64 {
        if self.0.static_bundle.is_empty() {
            return f64::INFINITY;
        }
        let Ok((x_static, x_moving)) = halfway_params(params) else {
            return f64::INFINITY;
        };
        let (Ok(aff_static), Ok(aff_moving)) =
            (compose_matrix44(&x_static), compose_matrix44(&x_moving))
        else {
            return f64::INFINITY;
        };
        let static_half = self.0.static_bundle.transform(&aff_static);
        let moving_half = self.0.moving.transform(&aff_moving);
        distance_matrix_mdf(&static_half, &moving_half)
            .map_or(f64::INFINITY, |d| min_distance_cost(&d))
    }
}

/// Descriptor of the metric variants, used to build fresh metrics for every registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricKind {
    /// [`BundleMinDistanceMetric`].
    #[default]
    BundleMinDistance,
    /// [`BundleMinDistanceMatrixMetric`].
    BundleMinDistanceMatrix,
    /// [`BundleMinDistanceAsymmetricMetric`].
    BundleMinDistanceAsymmetric,
    /// [`BundleSumDistanceMatrixMetric`].
    BundleSumDistanceMatrix,
    /// [`JointBundleMinDistanceMetric`].
    JointBundleMinDistance,
}

impl MetricKind {
    /// Build a new, not yet set up, metric of this kind.
    pub fn build(&self, num_threads: Option<i32>) -> Metric {
        match self {
            MetricKind::BundleMinDistance => {
                Metric::BundleMinDistance(BundleMinDistanceMetric::new(num_threads))
            }
            MetricKind::BundleMinDistanceMatrix => {
                Metric::BundleMinDistanceMatrix(Default::default())
            }
            MetricKind::BundleMinDistanceAsymmetric => Metric::BundleMinDistanceAsymmetric(
                BundleMinDistanceAsymmetricMetric::new(num_threads),
            ),
            MetricKind::BundleSumDistanceMatrix => {
                Metric::BundleSumDistanceMatrix(Default::default())
            }
            MetricKind::JointBundleMinDistance => {
                Metric::JointBundleMinDistance(Default::default())
            }
        }
    }
}

/// The closed set of streamline distance metrics.
#[derive(Debug)]
pub enum Metric {
    /// Fast, parallel bundle minimum distance.
    BundleMinDistance(BundleMinDistanceMetric),
    /// Bundle minimum distance through the full distance matrix.
    BundleMinDistanceMatrix(BundleMinDistanceMatrixMetric),
    /// Static-anchored bundle minimum distance.
    BundleMinDistanceAsymmetric(BundleMinDistanceAsymmetricMetric),
    /// Sum of all pairwise distances.
    BundleSumDistanceMatrix(BundleSumDistanceMatrixMetric),
    /// Halfway space bundle minimum distance.
    JointBundleMinDistance(JointBundleMinDistanceMetric),
}

impl Metric {
    /// The descriptor of this metric.
    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::BundleMinDistance(_) => MetricKind::BundleMinDistance,
            Metric::BundleMinDistanceMatrix(_) => MetricKind::BundleMinDistanceMatrix,
            Metric::BundleMinDistanceAsymmetric(_) => MetricKind::BundleMinDistanceAsymmetric,
            Metric::BundleSumDistanceMatrix(_) => MetricKind::BundleSumDistanceMatrix,
            Metric::JointBundleMinDistance(_) => MetricKind::JointBundleMinDistance,
        }
    }

    /// Whether the metric moves both bundles to the halfway space.
    pub fn is_joint(&self) -> bool {
        matches!(self, Metric::JointBundleMinDistance(_))
    }

    fn inner(&self) -> &dyn StreamlineDistanceMetric {
        match self {
            Metric::BundleMinDistance(m) => m,
            Metric::BundleMinDistanceMatrix(m) => m,
            Metric::BundleMinDistanceAsymmetric(m) => m,
            Metric::BundleSumDistanceMatrix(m) => m,
            Metric::JointBundleMinDistance(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn StreamlineDistanceMetric {
        match self {
            Metric::BundleMinDistance(m) => m,
            Metric::BundleMinDistanceMatrix(m) => m,
            Metric::BundleMinDistanceAsymmetric(m) => m,
            Metric::BundleSumDistanceMatrix(m) => m,
            Metric::JointBundleMinDistance(m) => m,
        }
    }
}

impl Default for Metric {
    fn default() -> Self {
        MetricKind::default().build(None)
    }
}

impl StreamlineDistanceMetric for Metric {
    fn setup(&mut self, static_bundle: &Bundle, moving: &Bundle) -> Result<(), RegistrationError> {
        self.inner_mut().setup(static_bundle, moving)
    }

    fn distance(&self, params: &[f64]) -> f64 {
        self.inner().distance(params)
    }
}
