use glam::{DMat4, DVec3};

use crate::StreamlineError;

/// A point in 3D space.
pub type Point3 = [f64; 3];

/// An ordered sequence of 3D points approximating a traced fiber path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Streamline(Vec<Point3>);

impl Streamline {
    /// Create a new streamline from its points.
    pub fn new(points: Vec<Point3>) -> Self {
        Self(points)
    }

    /// Get as reference the points of the streamline.
    pub fn points(&self) -> &[Point3] {
        &self.0
    }

    /// Consume the streamline and return its points.
    pub fn into_points(self) -> Vec<Point3> {
        self.0
    }

    /// Get the number of points in the streamline.
    #[inline]
    pub fn num_points(&self) -> usize {
        self.0.len()
    }

    /// Arclength of the streamline, the sum of its segment lengths.
    pub fn length(&self) -> f64 {
        self.0
            .windows(2)
            .map(|w| DVec3::from(w[0]).distance(DVec3::from(w[1])))
            .sum()
    }

    /// Return a copy of the streamline with the point order reversed.
    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().copied().collect())
    }

    /// Apply an affine transform to every point.
    pub fn transform(&self, affine: &DMat4) -> Self {
        Self(
            self.0
                .iter()
                .map(|p| affine.transform_point3(DVec3::from(*p)).to_array())
                .collect(),
        )
    }

    /// Resample the streamline to `num_points` points equally spaced along its arclength.
    ///
    /// The first and last points are preserved. A streamline with a single point, or with
    /// zero length, is replicated.
    pub fn resample(&self, num_points: usize) -> Result<Self, StreamlineError> {
        if num_points < 2 {
            return Err(StreamlineError::InvalidNumberOfPoints(num_points));
        }
        let first = match self.0.first() {
            Some(p) => *p,
            None => return Err(StreamlineError::EmptyStreamline(0)),
        };

        // cumulative arclength at every input point
        let mut cumlen = Vec::with_capacity(self.0.len());
        cumlen.push(0.0);
        for w in self.0.windows(2) {
            let seg = DVec3::from(w[0]).distance(DVec3::from(w[1]));
            cumlen.push(cumlen[cumlen.len() - 1] + seg);
        }
        let total = cumlen[cumlen.len() - 1];

        if self.0.len() == 1 || total <= 0.0 {
            return Ok(Self(vec![first; num_points]));
        }

        let step = total / (num_points - 1) as f64;
        let mut out = Vec::with_capacity(num_points);
        let mut seg = 0;
        for k in 0..num_points {
            let target = (k as f64 * step).min(total);
            while seg + 2 < cumlen.len() && cumlen[seg + 1] < target {
                seg += 1;
            }
            let seg_len = cumlen[seg + 1] - cumlen[seg];
            let t = if seg_len > 0.0 {
                ((target - cumlen[seg]) / seg_len).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let a = DVec3::from(self.0[seg]);
            let b = DVec3::from(self.0[seg + 1]);
            out.push(a.lerp(b, t).to_array());
        }

        Ok(Self(out))
    }
}

impl std::ops::Deref for Streamline {
    type Target = [Point3];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Point3>> for Streamline {
    fn from(points: Vec<Point3>) -> Self {
        Self(points)
    }
}

/// An ordered collection of streamlines, typically one anatomical tract.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bundle(Vec<Streamline>);

impl Bundle {
    /// Create a new bundle from its streamlines.
    pub fn new(streamlines: Vec<Streamline>) -> Self {
        Self(streamlines)
    }

    /// Get as reference the streamlines of the bundle.
    pub fn streamlines(&self) -> &[Streamline] {
        &self.0
    }

    /// Consume the bundle and return its streamlines.
    pub fn into_streamlines(self) -> Vec<Streamline> {
        self.0
    }

    /// Get the number of streamlines in the bundle.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the bundle is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a streamline to the bundle.
    pub fn push(&mut self, streamline: Streamline) {
        self.0.push(streamline);
    }

    /// Iterate over the streamlines of the bundle.
    pub fn iter(&self) -> std::slice::Iter<'_, Streamline> {
        self.0.iter()
    }

    /// Total number of points over all streamlines.
    pub fn total_points(&self) -> usize {
        self.0.iter().map(Streamline::num_points).sum()
    }

    /// The point count shared by every streamline of the bundle.
    ///
    /// Fails if the bundle is empty or if the streamlines have different point counts.
    pub fn point_count(&self) -> Result<usize, StreamlineError> {
        let expected = match self.0.first() {
            Some(s) => s.num_points(),
            None => return Err(StreamlineError::EmptyBundle),
        };
        for s in self.0.iter() {
            if s.num_points() != expected {
                return Err(StreamlineError::NonUniformPointCount {
                    expected,
                    actual: s.num_points(),
                });
            }
        }
        Ok(expected)
    }

    /// Mean of all the points of all the streamlines.
    pub fn centroid(&self) -> Result<Point3, StreamlineError> {
        let total = self.total_points();
        if total == 0 {
            return Err(StreamlineError::EmptyBundle);
        }
        let sum = self
            .0
            .iter()
            .flat_map(|s| s.points().iter())
            .fold(DVec3::ZERO, |acc, p| acc + DVec3::from(*p));
        Ok((sum / total as f64).to_array())
    }

    /// Flatten all the points in a contiguous buffer.
    ///
    /// Returns the points and the shared number of points per streamline (the block size).
    pub fn unlist(&self) -> Result<(Vec<Point3>, usize), StreamlineError> {
        let block_size = self.point_count()?;
        let points = self
            .0
            .iter()
            .flat_map(|s| s.points().iter().copied())
            .collect();
        Ok((points, block_size))
    }

    /// Apply an affine transform to every streamline.
    pub fn transform(&self, affine: &DMat4) -> Self {
        Self(self.0.iter().map(|s| s.transform(affine)).collect())
    }

    /// Keep only the streamlines whose arclength is strictly within `(greater_than, less_than)`.
    pub fn filter_by_length(&self, greater_than: f64, less_than: f64) -> Self {
        Self(
            self.0
                .iter()
                .filter(|s| {
                    let length = s.length();
                    length > greater_than && length < less_than
                })
                .cloned()
                .collect(),
        )
    }
}

impl std::ops::Index<usize> for Bundle {
    type Output = Streamline;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl From<Vec<Streamline>> for Bundle {
    fn from(streamlines: Vec<Streamline>) -> Self {
        Self(streamlines)
    }
}

impl From<Vec<Vec<Point3>>> for Bundle {
    fn from(streamlines: Vec<Vec<Point3>>) -> Self {
        Self(streamlines.into_iter().map(Streamline::new).collect())
    }
}

impl FromIterator<Streamline> for Bundle {
    fn from_iter<I: IntoIterator<Item = Streamline>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Bundle {
    type Item = Streamline;
    type IntoIter = std::vec::IntoIter<Streamline>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Bundle {
    type Item = &'a Streamline;
    type IntoIter = std::slice::Iter<'a, Streamline>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
