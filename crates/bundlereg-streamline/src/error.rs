/// Errors raised by streamline containers and geometric operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamlineError {
    /// The bundle has no streamlines.
    #[error("Bundle is empty")]
    EmptyBundle,

    /// A streamline has no points.
    #[error("Streamline {0} has no points")]
    EmptyStreamline(usize),

    /// The requested number of points cannot describe a curve.
    #[error("Invalid number of points {0}, at least 2 are required")]
    InvalidNumberOfPoints(usize),

    /// Streamlines do not share the same number of points.
    #[error("Streamlines need to have the same number of points, found {expected} and {actual}")]
    NonUniformPointCount {
        /// Point count of the first streamline.
        expected: usize,
        /// Offending point count.
        actual: usize,
    },

    /// Clustering was requested without any distance threshold.
    #[error("At least one clustering threshold is required")]
    EmptyThresholds,

    /// Zero worker threads were requested.
    #[error("num_threads cannot be 0")]
    InvalidNumThreads,

    /// The worker pool could not be created.
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
