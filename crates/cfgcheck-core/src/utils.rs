//! Utility functions shared by the control-plane components.

pub mod path;

#[doc(inline)]
pub use path::{normalize, normalize_str};
