#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod error;
pub use error::OptimError;

/// Bounded limited-memory quasi-Newton minimizer.
pub mod lbfgsb;
pub use lbfgsb::LBfgsBOptions;

mod line_search;

/// Minimizer selection and the common result type.
pub mod minimize;
pub use minimize::{minimize, Method, OptimizeResult};

/// Powell's conjugate direction-set minimizer.
pub mod powell;
pub use powell::PowellOptions;
