#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Clustering of streamlines into representative centroids.
pub mod clustering;

/// Mean direct-flip (MDF) distances between streamlines and bundles.
pub mod distance;

mod error;
pub use error::StreamlineError;

/// Geometric operations over bundles.
pub mod ops;

/// Streamline and bundle containers.
pub mod streamline;
pub use streamline::{Bundle, Point3, Streamline};

/// Worker count policy for the data-parallel distance kernels.
pub mod threads;
