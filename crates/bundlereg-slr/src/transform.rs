use glam::{DMat3, DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::RegistrationError;

/// The accepted parameter vector lengths.
pub const PARAM_SIZES: [usize; 5] = [3, 6, 7, 9, 12];

/// Translations are clipped to this magnitude to keep diverging optimizations finite.
const MAX_DIST: f64 = 1e10;

/// Default optimization bounds for the 12 affine parameters.
///
/// Translation in mm, rotation in degrees, scaling and shearing are unitless.
pub const DEFAULT_BOUNDS: [(f64, f64); 12] = [
    (-35.0, 35.0),
    (-35.0, 35.0),
    (-35.0, 35.0),
    (-45.0, 45.0),
    (-45.0, 45.0),
    (-45.0, 45.0),
    (0.6, 1.4),
    (0.6, 1.4),
    (0.6, 1.4),
    (-10.0, 10.0),
    (-10.0, 10.0),
    (-10.0, 10.0),
];

/// The default bounds for the first `size` parameters.
pub fn default_bounds(size: usize) -> Vec<(f64, f64)> {
    DEFAULT_BOUNDS[..size.min(12)].to_vec()
}

/// Families of linear transforms by increasing degrees of freedom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    /// Translation only, 3 parameters.
    Translation,
    /// Translation and rotation, 6 parameters.
    Rigid,
    /// Rigid plus isotropic scaling, 7 parameters.
    Similarity,
    /// Rigid plus anisotropic scaling, 9 parameters.
    Scaling,
    /// Scaling plus shearing, 12 parameters.
    Affine,
}

impl TransformKind {
    /// All the kinds in increasing degrees of freedom.
    pub const ALL: [TransformKind; 5] = [
        TransformKind::Translation,
        TransformKind::Rigid,
        TransformKind::Similarity,
        TransformKind::Scaling,
        TransformKind::Affine,
    ];

    /// Number of parameters of the family.
    pub fn num_params(&self) -> usize {
        match self {
            TransformKind::Translation => 3,
            TransformKind::Rigid => 6,
            TransformKind::Similarity => 7,
            TransformKind::Scaling => 9,
            TransformKind::Affine => 12,
        }
    }

    /// The family having `size` parameters.
    pub fn from_num_params(size: usize) -> Result<Self, RegistrationError> {
        Self::ALL
            .into_iter()
            .find(|k| k.num_params() == size)
            .ok_or(RegistrationError::InvalidParameterSize(size))
    }

    /// The parameters of the identity transform: zero translation, rotation and shear, unit
    /// scaling.
    pub fn identity_params(&self) -> Vec<f64> {
        let mut x = vec![0.0; self.num_params()];
        match self {
            TransformKind::Similarity => x[6] = 1.0,
            TransformKind::Scaling | TransformKind::Affine => x[6..9].fill(1.0),
            _ => {}
        }
        x
    }
}

impl std::fmt::Display for TransformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransformKind::Translation => "translation",
            TransformKind::Rigid => "rigid",
            TransformKind::Similarity => "similarity",
            TransformKind::Scaling => "scaling",
            TransformKind::Affine => "affine",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for TransformKind {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "translation" => Ok(TransformKind::Translation),
            "rigid" => Ok(TransformKind::Rigid),
            "similarity" => Ok(TransformKind::Similarity),
            "scaling" => Ok(TransformKind::Scaling),
            "affine" => Ok(TransformKind::Affine),
            _ => Err(RegistrationError::ConfigurationError(format!(
                "unknown transform '{s}', expected one of \
                 translation, rigid, similarity, scaling, affine"
            ))),
        }
    }
}

fn check_size(size: usize) -> Result<(), RegistrationError> {
    match PARAM_SIZES.contains(&size) {
        true => Ok(()),
        false => Err(RegistrationError::InvalidParameterSize(size)),
    }
}

/// Rotation from static-frame x-y-z Euler angles in radians: `Rz(az) * Ry(ay) * Rx(ax)`.
fn euler_matrix(angles: DVec3) -> DMat3 {
    DMat3::from_rotation_z(angles.z)
        * DMat3::from_rotation_y(angles.y)
        * DMat3::from_rotation_x(angles.x)
}

/// Homogeneous matrix `T * R * Z * S` from its translation, rotation, shear and scale.
fn compose_matrix(scale: DVec3, shear: DVec3, angles: DVec3, translate: DVec3) -> DMat4 {
    let shear_mat = DMat3::from_cols(
        DVec3::X,
        DVec3::new(shear.x, 1.0, 0.0),
        DVec3::new(shear.y, shear.z, 1.0),
    );
    let linear = euler_matrix(angles) * shear_mat * DMat3::from_diagonal(scale);
    DMat4::from_cols(
        linear.x_axis.extend(0.0),
        linear.y_axis.extend(0.0),
        linear.z_axis.extend(0.0),
        translate.extend(1.0),
    )
}

/// Compose a 4x4 homogeneous matrix from a parameter vector.
///
/// # Arguments
///
/// * `params` - 3 (translation), 6 (+ rotation in degrees), 7 (+ isotropic scaling), 9
///   (+ anisotropic scaling instead) or 12 (+ shearing) parameters.
///
/// # Returns
///
/// The matrix `T * R * Z * S`, translation clipped to +-1e10.
///
/// Example:
///
/// ```
/// use bundlereg_slr::transform::compose_matrix44;
///
/// let mat = compose_matrix44(&[1.0, 2.0, 3.0]).unwrap();
/// assert_eq!(mat.w_axis.x, 1.0);
/// assert!(compose_matrix44(&[0.0; 5]).is_err());
/// ```
pub fn compose_matrix44(params: &[f64]) -> Result<DMat4, RegistrationError> {
    let size = params.len();
    check_size(size)?;

    let translate = DVec3::new(params[0], params[1], params[2])
        .clamp(DVec3::splat(-MAX_DIST), DVec3::splat(MAX_DIST));
    let angles = match size {
        3 => DVec3::ZERO,
        _ => DVec3::new(params[3], params[4], params[5]).map(f64::to_radians),
    };
    let scale = match size {
        7 => DVec3::splat(params[6]),
        9 | 12 => DVec3::new(params[6], params[7], params[8]),
        _ => DVec3::ONE,
    };
    let shear = match size {
        12 => DVec3::new(params[9], params[10], params[11]),
        _ => DVec3::ZERO,
    };

    Ok(compose_matrix(scale, shear, angles, translate))
}

/// Recover the parameter vector of a homogeneous matrix.
///
/// # Arguments
///
/// * `mat` - An affine matrix composed as `T * R * Z * S`.
/// * `size` - Number of parameters to return (3, 6, 7, 9 or 12). For 7 the isotropic scale
///   is the mean of the three axis scales.
pub fn decompose_matrix44(mat: &DMat4, size: usize) -> Result<Vec<f64>, RegistrationError> {
    check_size(size)?;

    let w = mat.w_axis.w;
    if w == 0.0 {
        return Err(RegistrationError::SingularMatrix);
    }
    let m = *mat * (1.0 / w);

    let translate = m.w_axis.truncate();

    // rows of the transposed linear block, i.e. its columns
    let mut row = [m.x_axis.truncate(), m.y_axis.truncate(), m.z_axis.truncate()];
    if DMat3::from_cols(row[0], row[1], row[2]).determinant().abs() < 1e-12 {
        return Err(RegistrationError::SingularMatrix);
    }

    let mut scale = DVec3::ZERO;
    let mut shear = DVec3::ZERO;

    scale.x = row[0].length();
    row[0] /= scale.x;

    shear.x = row[0].dot(row[1]);
    row[1] -= row[0] * shear.x;

    scale.y = row[1].length();
    row[1] /= scale.y;
    shear.x /= scale.y;

    shear.y = row[0].dot(row[2]);
    row[2] -= row[0] * shear.y;
    shear.z = row[1].dot(row[2]);
    row[2] -= row[1] * shear.z;

    scale.z = row[2].length();
    row[2] /= scale.z;
    shear.y /= scale.z;
    shear.z /= scale.z;

    if row[0].dot(row[1].cross(row[2])) < 0.0 {
        scale = -scale;
        for r in row.iter_mut() {
            *r = -*r;
        }
    }

    let ay = (-row[0].z).clamp(-1.0, 1.0).asin();
    let (ax, az) = if ay.cos().abs() > f64::EPSILON {
        (row[1].z.atan2(row[2].z), row[0].y.atan2(row[0].x))
    } else {
        ((-row[2].y).atan2(row[1].y), 0.0)
    };

    let mut t = Vec::with_capacity(12);
    t.extend_from_slice(&translate.to_array());
    if size == 3 {
        return Ok(t);
    }
    t.extend([ax.to_degrees(), ay.to_degrees(), az.to_degrees()]);
    match size {
        6 => {}
        7 => t.push((scale.x + scale.y + scale.z) / 3.0),
        9 => t.extend_from_slice(&scale.to_array()),
        _ => {
            t.extend_from_slice(&scale.to_array());
            t.extend_from_slice(&shear.to_array());
        }
    }
    Ok(t)
}

/// Chain transforms so that the first one is applied first.
///
/// Returns `mats[n-1] * ... * mats[1] * mats[0]`, or the identity when empty.
pub fn compose_transformations(mats: &[DMat4]) -> DMat4 {
    mats.iter().fold(DMat4::IDENTITY, |acc, m| *m * acc)
}

/// Split one parameter vector into the two transforms reaching the halfway space.
///
/// Translation, rotation and shear are halved (and negated for the second transform); the
/// scaling `s` becomes `(1 + s) / 2` for the first transform and `2 / (1 + s)` for the
/// second.
pub fn halfway_params(x: &[f64]) -> Result<(Vec<f64>, Vec<f64>), RegistrationError> {
    check_size(x.len())?;
    let (first, second) = x
        .iter()
        .enumerate()
        .map(|(i, &v)| match i {
            6..=8 => ((1.0 + v) / 2.0, 2.0 / (1.0 + v)),
            _ => (v / 2.0, -v / 2.0),
        })
        .unzip();
    Ok((first, second))
}

/// Row-major plain array of a matrix.
pub fn matrix_to_array(mat: &DMat4) -> [[f64; 4]; 4] {
    mat.transpose().to_cols_array_2d()
}

/// Matrix from a row-major plain array.
pub fn matrix_from_array(rows: &[[f64; 4]; 4]) -> DMat4 {
    DMat4::from_cols_array_2d(rows).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_mat_eq(a: &DMat4, b: &DMat4, eps: f64) {
        let (a, b) = (a.to_cols_array(), b.to_cols_array());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x, y, epsilon = eps);
        }
    }

    #[test]
    fn test_compose_translation() -> Result<(), RegistrationError> {
        let mat = compose_matrix44(&[1.0, -2.0, 3.0])?;
        let p = mat.transform_point3(DVec3::new(1.0, 1.0, 1.0));
        assert_eq!(p, DVec3::new(2.0, -1.0, 4.0));
        Ok(())
    }

    #[test]
    fn test_compose_rotation_degrees() -> Result<(), RegistrationError> {
        let mat = compose_matrix44(&[0.0, 0.0, 0.0, 90.0, 0.0, 0.0])?;
        let p = mat.transform_point3(DVec3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.z, 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_compose_isotropic_scale() -> Result<(), RegistrationError> {
        let mat = compose_matrix44(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0])?;
        let p = mat.transform_point3(DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(p, DVec3::new(2.0, 4.0, 6.0));
        Ok(())
    }

    #[test]
    fn test_compose_invalid_size() {
        for size in [0, 1, 2, 4, 5, 8, 10, 11, 13] {
            assert!(matches!(
                compose_matrix44(&vec![0.0; size]),
                Err(RegistrationError::InvalidParameterSize(s)) if s == size
            ));
        }
        assert!(decompose_matrix44(&DMat4::IDENTITY, 8).is_err());
    }

    #[test]
    fn test_compose_clips_translation() -> Result<(), RegistrationError> {
        let mat = compose_matrix44(&[1e12, -1e12, 5.0])?;
        assert_eq!(mat.w_axis.x, 1e10);
        assert_eq!(mat.w_axis.y, -1e10);
        assert_eq!(mat.w_axis.z, 5.0);
        Ok(())
    }

    #[test]
    fn test_roundtrip_exact_sizes() -> Result<(), RegistrationError> {
        let params: [&[f64]; 4] = [
            &[10.0, -5.0, 2.5],
            &[10.0, -5.0, 2.5, 20.0, -15.0, 30.0],
            &[10.0, -5.0, 2.5, 20.0, -15.0, 30.0, 1.2, 0.8, 1.1],
            &[10.0, -5.0, 2.5, 20.0, -15.0, 30.0, 1.2, 0.8, 1.1, 0.1, -0.2, 0.05],
        ];
        for p in params {
            let mat = compose_matrix44(p)?;
            let back = decompose_matrix44(&mat, p.len())?;
            assert_eq!(back.len(), p.len());
            assert_mat_eq(&compose_matrix44(&back)?, &mat, 1e-6);
            for (a, b) in back.iter().zip(p.iter()) {
                assert_relative_eq!(a, b, epsilon = 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn test_decompose_similarity_is_mean_scale() -> Result<(), RegistrationError> {
        let mat = compose_matrix44(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0])?;
        let x = decompose_matrix44(&mat, 7)?;
        assert_eq!(x.len(), 7);
        assert_relative_eq!(x[6], 2.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_decompose_singular() {
        let mat = DMat4::from_diagonal(glam::DVec4::new(1.0, 0.0, 1.0, 1.0));
        assert!(matches!(
            decompose_matrix44(&mat, 12),
            Err(RegistrationError::SingularMatrix)
        ));
    }

    #[test]
    fn test_compose_transformations_order() -> Result<(), RegistrationError> {
        let a = compose_matrix44(&[1.0, 0.0, 0.0])?;
        let b = compose_matrix44(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0])?;
        // translate first, then scale
        let m = compose_transformations(&[a, b]);
        assert_eq!(m.transform_point3(DVec3::ZERO), DVec3::new(2.0, 0.0, 0.0));
        assert_mat_eq(&compose_transformations(&[]), &DMat4::IDENTITY, 0.0);
        Ok(())
    }

    #[test]
    fn test_halfway_params_identity() -> Result<(), RegistrationError> {
        let identity = TransformKind::Affine.identity_params();
        let (x1, x2) = halfway_params(&identity)?;
        for i in 6..9 {
            assert_relative_eq!(x1[i] * x2[i], 1.0);
        }
        assert_mat_eq(&compose_matrix44(&x1)?, &DMat4::IDENTITY, 1e-12);
        assert_mat_eq(&compose_matrix44(&x2)?, &DMat4::IDENTITY, 1e-12);
        Ok(())
    }

    #[test]
    fn test_halfway_params_split() -> Result<(), RegistrationError> {
        let x = [4.0, -2.0, 0.0, 10.0, 0.0, -6.0, 3.0, 1.0, 0.5, 0.2, 0.0, -0.4];
        let (x1, x2) = halfway_params(&x)?;
        assert_eq!(&x1[..6], &[2.0, -1.0, 0.0, 5.0, 0.0, -3.0]);
        assert_eq!(&x2[..6], &[-2.0, 1.0, -0.0, -5.0, -0.0, 3.0]);
        assert_eq!(&x1[6..9], &[2.0, 1.0, 0.75]);
        assert_relative_eq!(x2[6], 0.5);
        assert_relative_eq!(x2[8], 2.0 / 1.5);
        assert_eq!(&x1[9..], &[0.1, 0.0, -0.2]);
        assert_eq!(&x2[9..], &[-0.1, -0.0, 0.2]);
        Ok(())
    }

    #[test]
    fn test_transform_kind() -> Result<(), RegistrationError> {
        assert_eq!("Rigid".parse::<TransformKind>()?, TransformKind::Rigid);
        assert!("projective".parse::<TransformKind>().is_err());
        assert_eq!(TransformKind::from_num_params(9)?, TransformKind::Scaling);
        assert_eq!(
            TransformKind::Similarity.identity_params(),
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]
        );
        assert_eq!(default_bounds(7).len(), 7);
        Ok(())
    }

    #[test]
    fn test_matrix_array_layout() -> Result<(), RegistrationError> {
        let mat = compose_matrix44(&[1.0, 2.0, 3.0])?;
        let rows = matrix_to_array(&mat);
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(matrix_from_array(&rows), mat);
        Ok(())
    }
}
