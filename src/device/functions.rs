//! Device entry points the baker calls, and how they are obtained.

use std::sync::Arc;

use super::types::*;
use crate::bake::CompressParams;
use crate::format::MicromapUsage;
use crate::util::{DeviceResult, Error, Result};

/// Kernels the baker can create pipelines for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelId {
    /// Heightmap to packed displacement compression.
    Compress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    pub kernel: KernelId,
    /// Threads per work group along x.
    pub workgroup_size: u32,
    pub cache: Option<PipelineCacheHandle>,
}

/// Everything bound for one compress dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressDispatch {
    pub pipeline: PipelineHandle,
    /// Uniform buffer holding the block-to-barycentric table.
    pub bird_table: BufferHandle,
    pub heightmap: ImageDescriptor,
    pub params: CompressParams,
    pub group_count: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MicromapType {
    #[default]
    DisplacementNv,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MicromapCreateInfo {
    pub buffer: BufferHandle,
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub ty: MicromapType,
}

/// Micromap build request. Addresses are unset while querying sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MicromapBuildInfo<'a> {
    pub ty: MicromapType,
    pub usages: &'a [MicromapUsage],
    pub dst: MicromapHandle,
    pub data: DeviceAddress,
    pub triangle_array: DeviceAddress,
    pub triangle_array_stride: DeviceSize,
    pub scratch: DeviceAddress,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MicromapBuildSizes {
    pub micromap_size: DeviceSize,
    pub build_scratch_size: DeviceSize,
}

/// Device function table used by the baker.
///
/// Command-recording calls (`cmd_*`) only record; their effects are
/// ordered by the barriers recorded alongside them.
pub trait DeviceFunctions: Send + Sync {
    fn buffer_device_address(&self, buffer: BufferHandle) -> DeviceAddress;

    fn cmd_fill_buffer(
        &self,
        cmd: CommandBuffer,
        buffer: BufferHandle,
        offset: DeviceSize,
        size: DeviceSize,
        data: u32,
    );

    fn cmd_update_buffer(
        &self,
        cmd: CommandBuffer,
        buffer: BufferHandle,
        offset: DeviceSize,
        data: &[u8],
    );

    fn cmd_pipeline_barrier(&self, cmd: CommandBuffer, barrier: &MemoryBarrier);

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> DeviceResult<PipelineHandle>;

    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    fn cmd_dispatch_compress(&self, cmd: CommandBuffer, dispatch: &CompressDispatch);

    fn micromap_build_sizes(&self, info: &MicromapBuildInfo<'_>) -> MicromapBuildSizes;

    fn create_micromap(&self, info: &MicromapCreateInfo) -> DeviceResult<MicromapHandle>;

    fn destroy_micromap(&self, micromap: MicromapHandle);

    fn cmd_build_micromap(&self, cmd: CommandBuffer, info: &MicromapBuildInfo<'_>);

    /// Required alignment of micromap build scratch memory.
    fn min_scratch_offset_alignment(&self) -> DeviceSize;
}

/// Runtime lookup of a device function table.
pub trait FunctionLoader: Send + Sync {
    /// `None` when the entry points are unavailable.
    fn load(&self) -> Option<Arc<dyn DeviceFunctions>>;
}

/// Where device entry points come from.
#[derive(Clone)]
pub enum Linkage {
    /// Table supplied directly by the application.
    Static(Arc<dyn DeviceFunctions>),
    /// Loaded at pipeline creation.
    Dynamic(Arc<dyn FunctionLoader>),
}

impl Linkage {
    pub fn resolve(&self) -> Result<Arc<dyn DeviceFunctions>> {
        match self {
            Self::Static(functions) => Ok(Arc::clone(functions)),
            Self::Dynamic(loader) => loader.load().ok_or(Error::NotInitialized),
        }
    }
}

impl std::fmt::Debug for Linkage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Linkage::Static"),
            Self::Dynamic(_) => f.write_str("Linkage::Dynamic"),
        }
    }
}
