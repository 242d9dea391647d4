use faer::Mat;
use rayon::prelude::*;

use crate::{Bundle, Point3, StreamlineError};

#[inline]
fn euclidean(a: &Point3, b: &Point3) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Mean direct-flip distance between two streamlines with the same number of points.
///
/// The average pointwise Euclidean distance is computed with `b` in its direct and in its
/// reversed order, and the smaller of the two is returned.
///
/// PRECONDITION: `a` and `b` have the same, non-zero, number of points.
///
/// Example:
///
/// ```
/// use bundlereg_streamline::distance::mdf;
///
/// let a = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
/// let b = [[2.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
/// assert_eq!(mdf(&a, &b), 0.0);
/// ```
pub fn mdf(a: &[Point3], b: &[Point3]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let n = a.len() as f64;
    let mut direct = 0.0;
    let mut flipped = 0.0;
    for (i, p) in a.iter().enumerate() {
        direct += euclidean(p, &b[i]);
        flipped += euclidean(p, &b[b.len() - 1 - i]);
    }
    direct.min(flipped) / n
}

fn check_same_block(static_bundle: &Bundle, moving: &Bundle) -> Result<usize, StreamlineError> {
    let expected = static_bundle.point_count()?;
    let actual = moving.point_count()?;
    if expected != actual {
        return Err(StreamlineError::NonUniformPointCount { expected, actual });
    }
    Ok(expected)
}

/// Full matrix of MDF distances between two bundles.
///
/// Entry `(i, j)` holds the distance between streamline `i` of `static_bundle` and
/// streamline `j` of `moving`. Every streamline of both bundles must share the same number
/// of points.
pub fn distance_matrix_mdf(
    static_bundle: &Bundle,
    moving: &Bundle,
) -> Result<Mat<f64>, StreamlineError> {
    check_same_block(static_bundle, moving)?;
    Ok(Mat::<f64>::from_fn(static_bundle.len(), moving.len(), |i, j| {
        mdf(static_bundle[i].points(), moving[j].points())
    }))
}

/// Symmetric bundle minimum distance of a precomputed distance matrix.
///
/// `0.25 * (mean of row minima + mean of column minima)^2`.
pub fn min_distance_cost(d: &Mat<f64>) -> f64 {
    let (rows, cols) = (d.nrows(), d.ncols());
    if rows == 0 || cols == 0 {
        return f64::INFINITY;
    }
    let mut row_min = vec![f64::INFINITY; rows];
    let mut col_min = vec![f64::INFINITY; cols];
    for j in 0..cols {
        for (i, rmin) in row_min.iter_mut().enumerate() {
            let v = d[(i, j)];
            *rmin = rmin.min(v);
            col_min[j] = col_min[j].min(v);
        }
    }
    let mean_rows = row_min.iter().sum::<f64>() / rows as f64;
    let mean_cols = col_min.iter().sum::<f64>() / cols as f64;
    0.25 * (mean_rows + mean_cols).powi(2)
}

/// Sum of every entry of a distance matrix.
pub fn sum_distance_cost(d: &Mat<f64>) -> f64 {
    let mut sum = 0.0;
    for j in 0..d.ncols() {
        for i in 0..d.nrows() {
            sum += d[(i, j)];
        }
    }
    sum
}

// distances of one static block against every moving block
fn block_row(
    static_pts: &[Point3],
    moving_pts: &[Point3],
    block_size: usize,
    i: usize,
) -> Vec<f64> {
    let s = &static_pts[i * block_size..(i + 1) * block_size];
    moving_pts
        .chunks_exact(block_size)
        .map(|m| mdf(s, m))
        .collect()
}

fn block_rows(
    static_pts: &[Point3],
    moving_pts: &[Point3],
    block_size: usize,
    pool: Option<&rayon::ThreadPool>,
) -> Vec<Vec<f64>> {
    let rows = static_pts.len() / block_size;
    match pool {
        Some(pool) => pool.install(|| {
            (0..rows)
                .into_par_iter()
                .map(|i| block_row(static_pts, moving_pts, block_size, i))
                .collect()
        }),
        None => (0..rows)
            .map(|i| block_row(static_pts, moving_pts, block_size, i))
            .collect(),
    }
}

/// Symmetric bundle minimum distance over flattened streamline points.
///
/// # Arguments
///
/// * `static_pts` - The points of the static streamlines, `block_size` consecutive points per
///   streamline.
/// * `moving_pts` - The points of the moving streamlines, laid out the same way.
/// * `block_size` - Number of points per streamline.
/// * `pool` - Optional worker pool; rows of the distance matrix are evaluated in parallel.
///
/// # Returns
///
/// `0.25 * (mean_i min_j D[i, j] + mean_j min_i D[i, j])^2`, or infinity if either side is
/// empty.
pub fn bundle_minimum_distance(
    static_pts: &[Point3],
    moving_pts: &[Point3],
    block_size: usize,
    pool: Option<&rayon::ThreadPool>,
) -> f64 {
    if block_size == 0 || static_pts.is_empty() || moving_pts.is_empty() {
        return f64::INFINITY;
    }
    let rows = block_rows(static_pts, moving_pts, block_size, pool);
    let cols = moving_pts.len() / block_size;

    let mut col_min = vec![f64::INFINITY; cols];
    let mut sum_rows = 0.0;
    for row in rows.iter() {
        let mut row_min = f64::INFINITY;
        for (j, &v) in row.iter().enumerate() {
            row_min = row_min.min(v);
            col_min[j] = col_min[j].min(v);
        }
        sum_rows += row_min;
    }
    let mean_rows = sum_rows / rows.len() as f64;
    let mean_cols = col_min.iter().sum::<f64>() / cols as f64;
    0.25 * (mean_rows + mean_cols).powi(2)
}

/// Asymmetric bundle minimum distance over flattened streamline points.
///
/// Only the minima anchored on the static streamlines are accumulated: the mean over the
/// static streamlines of the distance to their closest moving streamline. Useful to register
/// a large set of streamlines onto a small one.
pub fn bundle_minimum_distance_asymmetric(
    static_pts: &[Point3],
    moving_pts: &[Point3],
    block_size: usize,
    pool: Option<&rayon::ThreadPool>,
) -> f64 {
    if block_size == 0 || static_pts.is_empty() || moving_pts.is_empty() {
        return f64::INFINITY;
    }
    let rows = block_rows(static_pts, moving_pts, block_size, pool);
    let sum: f64 = rows
        .iter()
        .map(|row| row.iter().copied().fold(f64::INFINITY, f64::min))
        .sum();
    sum / rows.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::build_thread_pool;
    use approx::assert_relative_eq;

    fn make_bundle(offset: f64) -> Bundle {
        Bundle::from(vec![
            vec![[offset, 0.0, 0.0], [offset, 1.0, 0.0], [offset, 2.0, 0.0]],
            vec![[offset, 0.0, 3.0], [offset + 1.0, 1.0, 3.0], [offset + 2.0, 2.0, 3.0]],
        ])
    }

    #[test]
    fn test_mdf_flip() {
        let a = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        let b = [[2.0, 1.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]];
        assert_relative_eq!(mdf(&a, &b), 1.0);
        assert_relative_eq!(mdf(&b, &a), 1.0);
    }

    #[test]
    fn test_distance_matrix_mdf() -> Result<(), StreamlineError> {
        let d = distance_matrix_mdf(&make_bundle(0.0), &make_bundle(1.0))?;
        assert_eq!(d.nrows(), 2);
        assert_eq!(d.ncols(), 2);
        assert_relative_eq!(d[(0, 0)], 1.0);
        assert_relative_eq!(d[(1, 1)], 1.0);

        let short = Bundle::from(vec![vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]]);
        assert!(distance_matrix_mdf(&make_bundle(0.0), &short).is_err());
        Ok(())
    }

    #[test]
    fn test_bundle_minimum_distance_matches_matrix() -> Result<(), StreamlineError> {
        let s = make_bundle(0.0);
        let m = make_bundle(0.5);
        let (sp, bs) = s.unlist()?;
        let (mp, _) = m.unlist()?;

        let expected = min_distance_cost(&distance_matrix_mdf(&s, &m)?);
        let pool = build_thread_pool(Some(2))?;
        assert_relative_eq!(bundle_minimum_distance(&sp, &mp, bs, None), expected);
        assert_relative_eq!(bundle_minimum_distance(&sp, &mp, bs, Some(&pool)), expected);
        assert_relative_eq!(expected, 0.25, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_bundle_minimum_distance_identity() -> Result<(), StreamlineError> {
        let (sp, bs) = make_bundle(2.0).unlist()?;
        assert_eq!(bundle_minimum_distance(&sp, &sp, bs, None), 0.0);
        assert_eq!(bundle_minimum_distance_asymmetric(&sp, &sp, bs, None), 0.0);
        Ok(())
    }

    #[test]
    fn test_asymmetric_only_static_side() -> Result<(), StreamlineError> {
        // one moving streamline coinciding with the first static one
        let s = make_bundle(0.0);
        let m = Bundle::new(vec![s[0].clone()]);
        let (sp, bs) = s.unlist()?;
        let (mp, _) = m.unlist()?;
        let d = distance_matrix_mdf(&s, &m)?;
        let expected = (d[(0, 0)] + d[(1, 0)]) / 2.0;
        assert_relative_eq!(bundle_minimum_distance_asymmetric(&sp, &mp, bs, None), expected);
        // every moving streamline is matched exactly, every static one is not
        assert!(bundle_minimum_distance_asymmetric(&mp, &sp, bs, None) == 0.0);
        Ok(())
    }

    #[test]
    fn test_sum_distance_cost() -> Result<(), StreamlineError> {
        let d = distance_matrix_mdf(&make_bundle(0.0), &make_bundle(0.0))?;
        let total = d[(0, 1)] + d[(1, 0)];
        assert_relative_eq!(sum_distance_cost(&d), total);
        Ok(())
    }
}
