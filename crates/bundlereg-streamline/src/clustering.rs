use rand::{seq::SliceRandom, Rng};

use crate::{distance::mdf, Bundle, Point3, Streamline, StreamlineError};

/// A group of streamlines represented by their mean streamline.
#[derive(Debug, Clone)]
pub struct Cluster {
    indices: Vec<usize>,
    centroid: Vec<Point3>,
}

impl Cluster {
    fn new(index: usize, points: &[Point3]) -> Self {
        Self {
            indices: vec![index],
            centroid: points.to_vec(),
        }
    }

    // running mean update, the new member is flipped to agree with the centroid orientation
    fn add(&mut self, index: usize, points: &[Point3]) {
        let n = self.indices.len() as f64;
        let reversed = mdf_direct(&self.centroid, points) > mdf_flipped(&self.centroid, points);
        let last = points.len() - 1;
        for (k, c) in self.centroid.iter_mut().enumerate() {
            let p = if reversed { points[last - k] } else { points[k] };
            for d in 0..3 {
                c[d] = (c[d] * n + p[d]) / (n + 1.0);
            }
        }
        self.indices.push(index);
    }

    /// Indices of the member streamlines in the clustered bundle.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// The mean streamline of the cluster.
    pub fn centroid(&self) -> Streamline {
        Streamline::new(self.centroid.clone())
    }

    /// Number of member streamlines.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Check if the cluster has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

fn mdf_direct(a: &[Point3], b: &[Point3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| {
            ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2)).sqrt()
        })
        .sum::<f64>()
        / a.len() as f64
}

fn mdf_flipped(a: &[Point3], b: &[Point3]) -> f64 {
    a.iter()
        .zip(b.iter().rev())
        .map(|(p, q)| {
            ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2)).sqrt()
        })
        .sum::<f64>()
        / a.len() as f64
}

/// The result of clustering a bundle.
#[derive(Debug, Clone, Default)]
pub struct ClusterMap {
    clusters: Vec<Cluster>,
}

impl ClusterMap {
    /// Get as reference the clusters.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Number of clusters.
    #[inline]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Check if there are no clusters.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Iterate over the clusters.
    pub fn iter(&self) -> std::slice::Iter<'_, Cluster> {
        self.clusters.iter()
    }

    /// The centroid of every cluster, as a bundle.
    pub fn centroids(&self) -> Bundle {
        self.clusters.iter().map(Cluster::centroid).collect()
    }

    /// Number of members of every cluster.
    pub fn sizes(&self) -> Vec<usize> {
        self.clusters.iter().map(Cluster::len).collect()
    }
}

/// QuickBundles: single pass clustering of streamlines with the MDF distance.
///
/// Every streamline joins the closest cluster if its MDF distance to the cluster centroid is
/// below `threshold`, otherwise it starts a new cluster.
#[derive(Debug, Clone)]
pub struct QuickBundles {
    /// Maximum MDF distance (in mm) between a streamline and the centroid of its cluster.
    pub threshold: f64,
    /// Optional upper bound on the number of clusters. Once reached, streamlines are assigned
    /// to their closest cluster.
    pub max_nb_clusters: Option<usize>,
}

impl QuickBundles {
    /// Create a new clustering with the given distance threshold.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            max_nb_clusters: None,
        }
    }

    /// Cluster a whole bundle in its given order.
    pub fn cluster(&self, bundle: &Bundle) -> Result<ClusterMap, StreamlineError> {
        let ordering: Vec<usize> = (0..bundle.len()).collect();
        self.cluster_subset(bundle, &ordering)
    }

    /// Cluster the streamlines of `bundle` selected by `ordering`, visited in that order.
    ///
    /// Cluster indices refer to positions in `bundle`.
    pub fn cluster_subset(
        &self,
        bundle: &Bundle,
        ordering: &[usize],
    ) -> Result<ClusterMap, StreamlineError> {
        if ordering.is_empty() {
            return Ok(ClusterMap::default());
        }
        bundle.point_count()?;

        let mut clusters: Vec<Cluster> = Vec::new();
        for &idx in ordering {
            let points = bundle[idx].points();

            let mut nearest = None;
            let mut nearest_dist = f64::INFINITY;
            for (k, c) in clusters.iter().enumerate() {
                let d = mdf(&c.centroid, points);
                if d < nearest_dist {
                    nearest_dist = d;
                    nearest = Some(k);
                }
            }

            let is_full = self
                .max_nb_clusters
                .is_some_and(|max| clusters.len() >= max);

            match nearest {
                Some(k) if nearest_dist < self.threshold || is_full => clusters[k].add(idx, points),
                _ => clusters.push(Cluster::new(idx, points)),
            }
        }

        Ok(ClusterMap { clusters })
    }
}

/// Hierarchical QuickBundles over decreasing thresholds followed by a merge pass.
///
/// Streamlines are visited in a random order drawn from `rng`. At every level each cluster
/// of the previous level is split again with the next threshold. The leaf centroids are then
/// merged with QuickBundles at the last threshold so that nearby leaves of different parents
/// are combined.
///
/// # Arguments
///
/// * `bundle` - Streamlines sharing the same number of points.
/// * `thresholds` - Decreasing sequence of MDF thresholds (mm).
/// * `rng` - Random source for the visiting order.
pub fn qbx_and_merge<R: Rng + ?Sized>(
    bundle: &Bundle,
    thresholds: &[f64],
    rng: &mut R,
) -> Result<ClusterMap, StreamlineError> {
    let last_threshold = match thresholds.last() {
        Some(t) => *t,
        None => return Err(StreamlineError::EmptyThresholds),
    };
    if bundle.is_empty() {
        return Ok(ClusterMap::default());
    }
    bundle.point_count()?;

    let mut ordering: Vec<usize> = (0..bundle.len()).collect();
    ordering.shuffle(rng);

    let mut groups = vec![ordering];
    let mut leaves = ClusterMap::default();
    for &threshold in thresholds {
        let qb = QuickBundles::new(threshold);
        let mut next = Vec::new();
        for group in groups.iter() {
            next.extend(qb.cluster_subset(bundle, group)?.clusters);
        }
        log::debug!("QuickBundlesX threshold {}: {} clusters", threshold, next.len());
        groups = next.iter().map(|c| c.indices.clone()).collect();
        leaves = ClusterMap { clusters: next };
    }

    // merge leaves whose centroids are close
    let leaf_centroids = leaves.centroids();
    let merged = QuickBundles::new(last_threshold).cluster(&leaf_centroids)?;
    let clusters = merged
        .clusters
        .into_iter()
        .map(|m| Cluster {
            indices: m
                .indices
                .iter()
                .flat_map(|&leaf| leaves.clusters[leaf].indices.iter().copied())
                .collect(),
            centroid: m.centroid,
        })
        .collect();

    Ok(ClusterMap { clusters })
}

/// Centroids of the clusters having at least `min_size` members.
pub fn remove_clusters_by_size(clusters: &ClusterMap, min_size: usize) -> Bundle {
    clusters
        .iter()
        .filter(|c| c.len() >= min_size)
        .map(Cluster::centroid)
        .collect()
}
