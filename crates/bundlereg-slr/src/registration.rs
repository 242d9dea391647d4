use std::str::FromStr;

use bundlereg_optim::{minimize, Method};
use bundlereg_streamline::{ops::center_streamlines, Bundle};
use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::map::{JointRegistrationMap, RegistrationMap, RegistrationOutput};
use crate::metric::{check_point_counts, Metric, MetricKind, StreamlineDistanceMetric};
use crate::transform::{compose_matrix44, TransformKind, PARAM_SIZES};
use crate::RegistrationError;

/// The starting point of the optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialParams {
    /// The identity parameters of a transform family.
    Kind(TransformKind),
    /// The identity parameters of the family with this many parameters.
    Size(usize),
    /// Explicit parameters.
    Params(Vec<f64>),
}

impl InitialParams {
    /// The initial parameter vector.
    ///
    /// Fails with a `ConfigurationError` when the number of parameters is not supported.
    pub fn resolve(&self) -> Result<Vec<f64>, RegistrationError> {
        let unsupported = |size: usize| {
            RegistrationError::ConfigurationError(format!(
                "Only {:?} parameters are accepted as initial parameters, got {}",
                PARAM_SIZES, size
            ))
        };
        match self {
            InitialParams::Kind(kind) => Ok(kind.identity_params()),
            InitialParams::Size(size) => TransformKind::from_num_params(*size)
                .map(|k| k.identity_params())
                .map_err(|_| unsupported(*size)),
            InitialParams::Params(x) if PARAM_SIZES.contains(&x.len()) => Ok(x.clone()),
            InitialParams::Params(x) => Err(unsupported(x.len())),
        }
    }
}

impl Default for InitialParams {
    fn default() -> Self {
        InitialParams::Kind(TransformKind::Rigid)
    }
}

impl From<TransformKind> for InitialParams {
    fn from(kind: TransformKind) -> Self {
        InitialParams::Kind(kind)
    }
}

impl From<Vec<f64>> for InitialParams {
    fn from(x: Vec<f64>) -> Self {
        InitialParams::Params(x)
    }
}

impl FromStr for InitialParams {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(InitialParams::Kind(s.parse()?))
    }
}

/// Configuration of [`StreamlineLinearRegistration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlrConfig {
    /// The metric to minimize.
    pub metric: MetricKind,
    /// Initial parameters, which also select the transform family.
    pub x0: InitialParams,
    /// Name of the minimizer, `L-BFGS-B` or `Powell`.
    pub method: String,
    /// Box bounds per parameter, only honored by L-BFGS-B.
    pub bounds: Option<Vec<(f64, f64)>>,
    /// Overrides the iteration budget of the minimizer.
    pub maxiter: Option<usize>,
    /// Keep the affine after every iteration in the registration map.
    pub evolution: bool,
    /// Workers of the parallel metrics, see
    /// [`bundlereg_streamline::threads::determine_num_threads`].
    pub num_threads: Option<i32>,
}

impl Default for SlrConfig {
    fn default() -> Self {
        Self {
            metric: MetricKind::BundleMinDistance,
            x0: InitialParams::default(),
            method: String::from("L-BFGS-B"),
            bounds: None,
            maxiter: None,
            evolution: false,
            num_threads: None,
        }
    }
}

/// Linear registration of a moving bundle onto a static bundle.
///
/// Finds the transform parameters minimizing the metric between the static bundle and the
/// transformed moving bundle. Both bundles are centered first so that rotations and scalings
/// act around their centers.
///
/// Example:
///
/// ```
/// use bundlereg_slr::{SlrConfig, StreamlineLinearRegistration, TransformKind};
/// use bundlereg_streamline::Bundle;
///
/// let static_bundle = Bundle::from(vec![
///     vec![[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [20.0, 0.0, 0.0]],
///     vec![[0.0, 5.0, 0.0], [10.0, 8.0, 0.0], [20.0, 5.0, 4.0]],
/// ]);
/// let shift = glam::DMat4::from_translation(glam::DVec3::new(3.0, 0.0, 0.0));
/// let moving = static_bundle.transform(&shift);
///
/// let config = SlrConfig {
///     x0: TransformKind::Translation.into(),
///     ..Default::default()
/// };
/// let mut slr = StreamlineLinearRegistration::new(&config).unwrap();
/// let map = slr.optimize(&static_bundle, &moving, None).unwrap().into_single().unwrap();
/// assert!((map.matrix.w_axis.x + 3.0).abs() < 1e-2);
/// ```
#[derive(Debug)]
pub struct StreamlineLinearRegistration {
    metric: Metric,
    x0: Vec<f64>,
    method: Method,
    bounds: Option<Vec<(f64, f64)>>,
    evolution: bool,
}

impl StreamlineLinearRegistration {
    /// Validate the configuration and build the engine.
    ///
    /// An unknown minimizer name or unsupported initial parameters are a
    /// `ConfigurationError`.
    pub fn new(config: &SlrConfig) -> Result<Self, RegistrationError> {
        let x0 = config.x0.resolve()?;
        let mut method = Method::from_str(&config.method)
            .map_err(|e| RegistrationError::ConfigurationError(e.to_string()))?;
        if let Some(maxiter) = config.maxiter {
            match &mut method {
                Method::LBfgsB(options) => options.maxiter = maxiter,
                Method::Powell(options) => options.maxiter = maxiter,
            }
        }
        Ok(Self {
            metric: config.metric.build(config.num_threads),
            x0,
            method,
            bounds: config.bounds.clone(),
            evolution: config.evolution,
        })
    }

    /// Replace the minimizer and all its options.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Replace the metric.
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// The initial parameters.
    pub fn x0(&self) -> &[f64] {
        &self.x0
    }

    /// The minimizer.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The metric.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// Register `moving` onto `static_bundle`.
    ///
    /// # Arguments
    ///
    /// * `static_bundle` - The reference streamlines.
    /// * `moving` - The streamlines to move. Every streamline of both bundles must have the
    ///   same number of points.
    /// * `mat` - When given, no centering is performed and `moving` is first transformed by
    ///   `mat`. Pass the identity to work in the original frame.
    ///
    /// # Returns
    ///
    /// A [`RegistrationOutput::Joint`] map when the metric is the halfway metric, a
    /// [`RegistrationOutput::Single`] map otherwise.
    pub fn optimize(
        &mut self,
        static_bundle: &Bundle,
        moving: &Bundle,
        mat: Option<&DMat4>,
    ) -> Result<RegistrationOutput, RegistrationError> {
        check_point_counts(static_bundle, moving)?;

        let (static_centered, moving_centered, static_mat, moving_mat) = match mat {
            None => {
                let (static_centered, static_shift) = center_streamlines(static_bundle)?;
                let (moving_centered, moving_shift) = center_streamlines(moving)?;
                (
                    static_centered,
                    moving_centered,
                    DMat4::from_translation(DVec3::from(static_shift)),
                    DMat4::from_translation(-DVec3::from(moving_shift)),
                )
            }
            Some(mat) => (static_bundle.clone(), moving.transform(mat), DMat4::IDENTITY, *mat),
        };

        self.metric.setup(&static_centered, &moving_centered)?;

        let bounds = match (&self.bounds, self.method.supports_bounds()) {
            (Some(bounds), true) => Some(bounds.as_slice()),
            _ => None,
        };
        let metric = &self.metric;
        let res = minimize(
            |x: &[f64]| metric.distance(x),
            &self.x0,
            &self.method,
            bounds,
            self.evolution,
        )?;

        if !res.converged {
            log::warn!(
                "{} did not converge after {} iterations: {}",
                self.method.name(),
                res.nit,
                res.message
            );
        }
        log::debug!(
            "{} registration: fopt={} nfev={} nit={}",
            self.method.name(),
            res.fun,
            res.nfev,
            res.nit
        );

        let full_matrix = |x: &[f64]| -> Result<DMat4, RegistrationError> {
            Ok(static_mat * compose_matrix44(x)? * moving_mat)
        };

        let matrix_history = match &res.history {
            Some(history) => Some(
                history
                    .iter()
                    .map(|x| full_matrix(x))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        if self.metric.is_joint() {
            return Ok(RegistrationOutput::Joint(JointRegistrationMap::from_params(
                res.x,
                res.fun,
                matrix_history,
                res.nfev,
                res.nit,
            )?));
        }

        Ok(RegistrationOutput::Single(RegistrationMap {
            matrix: full_matrix(&res.x)?,
            xopt: res.x,
            fopt: res.fun,
            matrix_history,
            funcs: res.nfev,
            iterations: res.nit,
        }))
    }
}
