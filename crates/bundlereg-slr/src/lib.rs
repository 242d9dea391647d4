#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod error;
pub use error::RegistrationError;

/// Unbiased groupwise registration of several bundles in the halfway space.
pub mod groupwise;
pub use groupwise::{
    get_unique_pairs, group_distance, groupwise_slr, GroupwiseConfig, GroupwiseResult,
    PairingAssignment,
};

/// Registration results and how to apply them.
pub mod map;
pub use map::{JointRegistrationMap, RegistrationMap, RegistrationOutput};

/// Streamline distance metrics minimized by the registration.
pub mod metric;
pub use metric::{Metric, MetricKind, StreamlineDistanceMetric};

/// Registration through increasingly flexible transform families.
pub mod progressive;
pub use progressive::{progressive_slr, ProgressiveStage};

/// Registration of large bundles through their cluster centroids.
pub mod qbx;
pub use qbx::{slr_with_qbx, whole_brain_slr, QbxConfig, QbxRegistration};

/// The streamline-based linear registration engine.
pub mod registration;
pub use registration::{InitialParams, SlrConfig, StreamlineLinearRegistration};

/// Conversions between parameter vectors and affine matrices.
pub mod transform;
pub use transform::{compose_matrix44, decompose_matrix44, TransformKind};
