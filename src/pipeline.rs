//! Baking pipeline: device context, the compress kernel and its bird table.

use std::sync::Arc;

use crate::bake::CompressParams;
use crate::bird::BlockToBirdUvTable;
use crate::device::{
    Access, Allocator, Buffer, BufferUsage, CheckResultFn, CommandBuffer, CompressDispatch,
    ComputePipeline, ComputePipelineDesc, Context, ImageDescriptor, ImageLayout, KernelId,
    Linkage, PipelineCacheHandle, PipelineStage,
};
use crate::format::COMPRESS_WORKGROUP_SIZE;
use crate::map::{DisplacementMap, MapCreate};
use crate::util::Result;

/// Parameters for [`Pipeline::new`].
#[derive(Clone)]
pub struct PipelineCreate {
    /// Where device entry points come from.
    pub linkage: Linkage,
    pub allocator: Arc<dyn Allocator>,
    pub pipeline_cache: Option<PipelineCacheHandle>,
    /// Receives every native status; failures also surface as `Err`.
    pub check_result: Option<CheckResultFn>,
}

impl std::fmt::Debug for PipelineCreate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCreate")
            .field("linkage", &self.linkage)
            .field("pipeline_cache", &self.pipeline_cache)
            .field("check_result", &self.check_result.is_some())
            .finish_non_exhaustive()
    }
}

/// Synchronization the caller must provide for map inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierFlags {
    /// Texture coordinates are read by the compress kernel.
    pub tex_coords_stage: PipelineStage,
    pub tex_coords_access: Access,
    /// Directions are read by the micromap build.
    pub directions_stage: PipelineStage,
    pub directions_access: Access,
    /// Heightmap must be in this layout when the map is created.
    pub heightmap_layout: ImageLayout,
}

/// Stage, access and layout requirements for [`MapCreate`] inputs.
pub const fn barrier_flags() -> BarrierFlags {
    BarrierFlags {
        tex_coords_stage: PipelineStage::COMPUTE_SHADER,
        tex_coords_access: Access::SHADER_READ,
        directions_stage: PipelineStage::MICROMAP_BUILD,
        directions_access: Access::MICROMAP_READ,
        heightmap_layout: ImageLayout::General,
    }
}

/// Owns the compress pipeline and the uploaded block-to-barycentric table.
///
/// Create once per device and reuse for every map; it must outlive command
/// buffers recorded with it.
#[derive(Debug)]
pub struct Pipeline {
    compress: ComputePipeline,
    bird_table: Buffer,
    ctx: Arc<Context>,
}

impl Pipeline {
    /// Create the pipeline, recording the table upload into `init_commands`.
    ///
    /// `init_commands` must execute before any map commands.
    #[tracing::instrument(skip_all, fields(linkage = ?create.linkage))]
    pub fn new(init_commands: CommandBuffer, create: PipelineCreate) -> Result<Self> {
        let functions = create.linkage.resolve()?;
        let ctx = Arc::new(Context::new(
            functions,
            create.allocator,
            create.check_result,
        ));

        let compress = ComputePipeline::new(
            &ctx,
            &ComputePipelineDesc {
                kernel: KernelId::Compress,
                workgroup_size: COMPRESS_WORKGROUP_SIZE,
                cache: create.pipeline_cache,
            },
        )?;

        let table = BlockToBirdUvTable::global();
        let bird_table = Buffer::new(
            &ctx,
            table.as_bytes().len() as u64,
            BufferUsage::UNIFORM_BUFFER | BufferUsage::TRANSFER_DST,
        )?;
        bird_table.update(init_commands, table.as_bytes())?;
        ctx.memory_barrier(
            init_commands,
            PipelineStage::TRANSFER,
            Access::TRANSFER_WRITE,
            PipelineStage::COMPUTE_SHADER,
            Access::UNIFORM_READ,
        );

        tracing::debug!(table_bytes = bird_table.size(), "pipeline ready");
        Ok(Self {
            compress,
            bird_table,
            ctx,
        })
    }

    #[inline]
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Record a full bake of `create` into `cmd`.
    ///
    /// See [`DisplacementMap`] for what is recorded.
    pub fn cmd_create_map(&self, cmd: CommandBuffer, create: &MapCreate) -> Result<DisplacementMap> {
        DisplacementMap::new(cmd, self, create)
    }

    /// Bind the compress kernel and record one dispatch.
    pub(crate) fn dispatch_compress(
        &self,
        cmd: CommandBuffer,
        heightmap: ImageDescriptor,
        params: CompressParams,
        group_count: u32,
    ) {
        let dispatch = CompressDispatch {
            pipeline: self.compress.handle(),
            bird_table: self.bird_table.handle(),
            heightmap,
            params,
            group_count,
        };
        self.ctx.functions().cmd_dispatch_compress(cmd, &dispatch);
    }
}
