/// Errors raised when configuring or starting a minimization.
#[derive(Debug, thiserror::Error)]
pub enum OptimError {
    /// The minimizer name is not supported.
    #[error("Unknown minimization method '{0}', only 'L-BFGS-B' and 'Powell' are supported")]
    UnknownMethod(String),

    /// The starting point has no parameters.
    #[error("The initial parameter vector is empty")]
    EmptyParameters,

    /// The number of bounds differs from the number of parameters.
    #[error("Expected {expected} bounds but got {actual}")]
    BoundsMismatch {
        /// Number of parameters.
        expected: usize,
        /// Number of bounds given.
        actual: usize,
    },

    /// A bound has its lower value above its upper value.
    #[error("Invalid bound ({lower}, {upper}) for parameter {index}")]
    InvalidBounds {
        /// Parameter index.
        index: usize,
        /// Lower bound.
        lower: f64,
        /// Upper bound.
        upper: f64,
    },
}
