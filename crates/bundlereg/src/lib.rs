#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use bundlereg_streamline as streamline;

#[doc(inline)]
pub use bundlereg_optim as optim;

#[doc(inline)]
pub use bundlereg_slr as slr;
