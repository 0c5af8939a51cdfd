//! Utility types and functions.
//!
//! - [`Error`] / [`Result`] - Error handling and native status mapping
//! - Math type re-exports from glam

mod error;
mod math;

pub use error::*;
pub use math::*;
