//! Device abstraction: handles, function table, allocator and owned resources.
//!
//! The baker never talks to a graphics API directly. An application supplies
//! a [`DeviceFunctions`] table (statically or through a [`FunctionLoader`])
//! and an [`Allocator`]; [`crate::host::HostDevice`] provides both in
//! software.

mod buffer;
mod context;
mod functions;
mod types;

pub use buffer::*;
pub use context::*;
pub use functions::*;
pub use types::*;
