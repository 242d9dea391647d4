use bundlereg_optim::OptimError;
use bundlereg_streamline::StreamlineError;

/// Errors raised by the registration algorithms.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The registration was configured with unsupported values.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Streamlines do not share the same number of points.
    #[error(
        "{context} streamlines need to have the same number of points, \
         found {expected} and {actual}. Resample them with set_number_of_points"
    )]
    DimensionMismatch {
        /// Which bundles were compared.
        context: &'static str,
        /// Expected number of points.
        expected: usize,
        /// Offending number of points.
        actual: usize,
    },

    /// A preprocessing step left nothing to register.
    #[error("Empty result: {0}")]
    EmptyResult(String),

    /// The parameter vector length is not one of 3, 6, 7, 9 or 12.
    #[error("Accepted number of parameters is 3, 6, 7, 9 and 12, got {0}")]
    InvalidParameterSize(usize),

    /// The linear part of the matrix cannot be decomposed.
    #[error("Transformation matrix is singular")]
    SingularMatrix,

    /// Streamline geometry error.
    #[error(transparent)]
    Streamline(#[from] StreamlineError),

    /// Minimizer error.
    #[error(transparent)]
    Optim(#[from] OptimError),
}
