use glam::{DMat4, DVec3};
use rand::Rng;

use crate::{Bundle, Point3, StreamlineError};

/// Resample every streamline of the bundle to the same number of points.
///
/// # Arguments
///
/// * `bundle` - The streamlines to resample.
/// * `num_points` - The number of points of every output streamline.
///
/// # Returns
///
/// A new bundle whose streamlines all have `num_points` points.
pub fn set_number_of_points(bundle: &Bundle, num_points: usize) -> Result<Bundle, StreamlineError> {
    bundle
        .iter()
        .enumerate()
        .map(|(i, s)| match s.num_points() {
            0 => Err(StreamlineError::EmptyStreamline(i)),
            _ => s.resample(num_points),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Bundle::new)
}

/// Move the bundle so that the mean of all its points lies at the origin.
///
/// # Returns
///
/// The centered bundle and the shift that was removed (the original centroid).
///
/// Example:
///
/// ```
/// use bundlereg_streamline::{ops::center_streamlines, Bundle};
///
/// let bundle = Bundle::from(vec![vec![[1.0, 0.0, 0.0], [3.0, 0.0, 0.0]]]);
/// let (centered, shift) = center_streamlines(&bundle).unwrap();
/// assert_eq!(shift, [2.0, 0.0, 0.0]);
/// assert_eq!(centered[0].points(), &[[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
/// ```
pub fn center_streamlines(bundle: &Bundle) -> Result<(Bundle, Point3), StreamlineError> {
    let shift = bundle.centroid()?;
    let centered = bundle.transform(&DMat4::from_translation(-DVec3::from(shift)));
    Ok((centered, shift))
}

/// Apply an affine transform to every streamline of the bundle.
pub fn transform_streamlines(bundle: &Bundle, affine: &DMat4) -> Bundle {
    bundle.transform(affine)
}

/// Select a random subset of streamlines without replacement.
///
/// If `select` is larger than the bundle, every streamline is returned (in random order).
///
/// # Arguments
///
/// * `bundle` - The streamlines to select from.
/// * `select` - Maximum number of streamlines to keep.
/// * `rng` - The random source used for the selection.
pub fn select_random_set_of_streamlines<R: Rng + ?Sized>(
    bundle: &Bundle,
    select: usize,
    rng: &mut R,
) -> Bundle {
    let amount = select.min(bundle.len());
    rand::seq::index::sample(rng, bundle.len(), amount)
        .into_iter()
        .map(|i| bundle[i].clone())
        .collect()
}
