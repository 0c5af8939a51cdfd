//! # heightmap-rtx
//!
//! Bake a heightmap into displacement micromaps for hardware raytracing.
//!
//! Each triangle of a mesh is subdivided up to five times; the heightmap is
//! sampled at every micro-vertex, quantized to 11 bits and packed into
//! 64-byte blocks that a micromap build consumes. The resulting
//! [`DisplacementMap`] describes the micromap to an acceleration structure
//! build.
//!
//! ## Modules
//!
//! - [`util`] - Errors, native status codes, math helpers
//! - [`format`] - Packed layout constants, sizing, triangle records
//! - [`bird`] - Bird-curve vertex order and the block lookup table
//! - [`bake`] - Height samplers and the compress kernel
//! - [`device`] - Device function table, allocator and owned resources
//! - [`pipeline`] / [`map`] - Pipeline creation and map recording
//! - [`host`] - CPU reference device
//!
//! ## Example
//!
//! ```ignore
//! use heightmap_rtx::prelude::*;
//!
//! let device = HostDevice::new();
//! let pipeline = Pipeline::new(device.command_buffer(), PipelineCreate {
//!     linkage: Linkage::Static(Arc::new(device.clone())),
//!     allocator: Arc::new(device.clone()),
//!     pipeline_cache: None,
//!     check_result: None,
//! })?;
//! let map = cmd_create_map(cmd, Some(&pipeline), &create)?;
//! let desc = map.descriptor();
//! ```

pub mod util;
pub mod format;
pub mod bird;
pub mod bake;
pub mod device;
pub mod pipeline;
pub mod map;
pub mod host;

pub use util::{Error, NativeResult, Result};
pub use pipeline::{barrier_flags, BarrierFlags, Pipeline, PipelineCreate};
pub use map::{DisplacementMap, DisplacementMicromapDesc, MapCreate};

use device::CommandBuffer;

/// Build version string: package version plus build date and time.
pub fn version_string() -> String {
    format!(
        "{} ({} {})",
        env!("CARGO_PKG_VERSION"),
        env!("HRTX_BUILD_DATE"),
        env!("HRTX_BUILD_TIME")
    )
}

/// Record a displacement map bake into `cmd`.
///
/// A missing pipeline is an initialization failure; see
/// [`Pipeline::cmd_create_map`] for the rest.
pub fn cmd_create_map(
    cmd: CommandBuffer,
    pipeline: Option<&Pipeline>,
    create: &MapCreate,
) -> Result<DisplacementMap> {
    let pipeline = pipeline.ok_or(Error::NotInitialized)?;
    pipeline.cmd_create_map(cmd, create)
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bake::{ConstantHeight, HeightSampler, Heightmap, SamplerDesc};
    pub use crate::device::{
        Allocator, CommandBuffer, DeviceFunctions, Format, FunctionLoader, ImageDescriptor,
        ImageLayout, IndexType, Linkage,
    };
    pub use crate::host::HostDevice;
    pub use crate::util::{Error, NativeResult, Result};
    pub use crate::{
        barrier_flags, cmd_create_map, DisplacementMap, MapCreate, Pipeline, PipelineCreate,
    };
    pub use std::sync::Arc;
}
