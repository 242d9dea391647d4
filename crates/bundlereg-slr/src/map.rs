use bundlereg_streamline::{ops::transform_streamlines, Bundle};
use glam::DMat4;

use crate::transform::{compose_matrix44, halfway_params};
use crate::RegistrationError;

/// The result of a registration moving one bundle onto a static one.
#[derive(Debug, Clone)]
pub struct RegistrationMap {
    /// Affine transforming the moving streamlines to the static streamlines.
    pub matrix: DMat4,
    /// Optimal parameters, expressed in the centered frame.
    pub xopt: Vec<f64>,
    /// Final value of the metric.
    pub fopt: f64,
    /// The full affine after every iteration, if the evolution was tracked.
    pub matrix_history: Option<Vec<DMat4>>,
    /// Number of metric evaluations.
    pub funcs: usize,
    /// Number of optimizer iterations.
    pub iterations: usize,
}

impl RegistrationMap {
    /// Move `moving` to the static space by applying [`RegistrationMap::matrix`].
    pub fn transform(&self, moving: &Bundle) -> Bundle {
        transform_streamlines(moving, &self.matrix)
    }
}

/// The result of a halfway registration, where both bundles move.
///
/// Built from the single optimized vector: `x1` moves the static bundle and `x2` the moving
/// bundle to their halfway space.
#[derive(Debug, Clone)]
pub struct JointRegistrationMap {
    /// Halfway parameters of the static bundle.
    pub x1: Vec<f64>,
    /// Halfway parameters of the moving bundle.
    pub x2: Vec<f64>,
    /// Affine of `x1`.
    pub matrix1: DMat4,
    /// Affine of `x2`.
    pub matrix2: DMat4,
    /// The optimized parameters both halves are derived from.
    pub xopt: Vec<f64>,
    /// Final value of the metric.
    pub fopt: f64,
    /// The affine after every iteration, if the evolution was tracked.
    pub matrix_history: Option<Vec<DMat4>>,
    /// Number of metric evaluations.
    pub funcs: usize,
    /// Number of optimizer iterations.
    pub iterations: usize,
}

impl JointRegistrationMap {
    /// Derive both halfway transforms from the optimized parameters.
    pub fn from_params(
        xopt: Vec<f64>,
        fopt: f64,
        matrix_history: Option<Vec<DMat4>>,
        funcs: usize,
        iterations: usize,
    ) -> Result<Self, RegistrationError> {
        let (x1, x2) = halfway_params(&xopt)?;
        let matrix1 = compose_matrix44(&x1)?;
        let matrix2 = compose_matrix44(&x2)?;
        Ok(Self {
            x1,
            x2,
            matrix1,
            matrix2,
            xopt,
            fopt,
            matrix_history,
            funcs,
            iterations,
        })
    }

    /// Move both bundles to the halfway space, returns `(static, moving)`.
    pub fn transform(&self, static_bundle: &Bundle, moving: &Bundle) -> (Bundle, Bundle) {
        (
            transform_streamlines(static_bundle, &self.matrix1),
            transform_streamlines(moving, &self.matrix2),
        )
    }
}

/// Output of [`crate::StreamlineLinearRegistration::optimize`], depending on the metric.
#[derive(Debug, Clone)]
pub enum RegistrationOutput {
    /// Moving registered onto static.
    Single(RegistrationMap),
    /// Both bundles registered to their halfway space.
    Joint(JointRegistrationMap),
}

impl RegistrationOutput {
    /// Final value of the metric.
    pub fn fopt(&self) -> f64 {
        match self {
            RegistrationOutput::Single(m) => m.fopt,
            RegistrationOutput::Joint(m) => m.fopt,
        }
    }

    /// The optimized parameters.
    pub fn xopt(&self) -> &[f64] {
        match self {
            RegistrationOutput::Single(m) => &m.xopt,
            RegistrationOutput::Joint(m) => &m.xopt,
        }
    }

    /// The single map, or a `ConfigurationError` for a halfway registration.
    pub fn into_single(self) -> Result<RegistrationMap, RegistrationError> {
        match self {
            RegistrationOutput::Single(m) => Ok(m),
            RegistrationOutput::Joint(_) => Err(RegistrationError::ConfigurationError(
                "expected a single registration map, the metric is the joint metric".to_string(),
            )),
        }
    }

    /// The halfway map, or a `ConfigurationError` for a single registration.
    pub fn into_joint(self) -> Result<JointRegistrationMap, RegistrationError> {
        match self {
            RegistrationOutput::Joint(m) => Ok(m),
            RegistrationOutput::Single(_) => Err(RegistrationError::ConfigurationError(
                "expected a joint registration map, the metric is not the joint metric".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DVec3;

    #[test]
    fn test_joint_map_halves() -> Result<(), RegistrationError> {
        let map = JointRegistrationMap::from_params(
            vec![4.0, -2.0, 0.0, 0.0, 0.0, 0.0, 1.5],
            0.1,
            None,
            10,
            2,
        )?;
        assert_eq!(map.x1, vec![2.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.25]);
        assert_relative_eq!(map.x2[6], 0.8);
        assert_relative_eq!(map.x1[6] * map.x2[6], 1.0);

        let static_bundle = Bundle::from(vec![vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]]);
        let (s, m) = map.transform(&static_bundle, &static_bundle);
        let p = map.matrix1.transform_point3(DVec3::ZERO);
        assert_eq!(s[0].points()[0], p.to_array());
        assert_relative_eq!(m[0].points()[0][0], -2.0);
        Ok(())
    }

    #[test]
    fn test_output_accessors() -> Result<(), RegistrationError> {
        let single = RegistrationOutput::Single(RegistrationMap {
            matrix: DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0)),
            xopt: vec![0.0; 3],
            fopt: 0.5,
            matrix_history: None,
            funcs: 4,
            iterations: 1,
        });
        assert_eq!(single.fopt(), 0.5);
        assert!(single.clone().into_joint().is_err());
        let map = single.into_single()?;
        let bundle = Bundle::from(vec![vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]]);
        assert_eq!(map.transform(&bundle)[0].points()[1], [2.0, 3.0, 4.0]);

        let joint = RegistrationOutput::Joint(JointRegistrationMap::from_params(
            vec![0.0; 6],
            0.0,
            None,
            1,
            1,
        )?);
        assert!(matches!(
            joint.into_single(),
            Err(RegistrationError::ConfigurationError(_))
        ));
        Ok(())
    }
}
