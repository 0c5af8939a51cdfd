//! Displacement map creation: bake, build and describe.
//!
//! [`DisplacementMap::new`] records, in order:
//!
//! 1. zero fills of the packed value and triangle record buffers
//! 2. transfer -> compute barrier
//! 3. the compress dispatch
//! 4. compute -> micromap build barrier
//! 5. the micromap build, then micromap build -> acceleration structure barrier
//! 6. the bias/scale upload, then transfer -> acceleration structure barrier
//!
//! Nothing is recorded when the inputs fail validation.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::bake::CompressParams;
use crate::device::{
    Access, Buffer, BufferUsage, CommandBuffer, Context, DeviceAddress, DeviceSize, Format,
    ImageDescriptor, IndexType, Micromap, MicromapBuildInfo, MicromapHandle, MicromapType,
    PipelineStage,
};
use crate::format::{
    group_count, packed_values_size, triangle_records_size, work_item_count, DisplacementFormat,
    MicromapUsage, MAX_SUBDIVISION_LEVEL, TRIANGLE_RECORD_BYTES,
};
use crate::pipeline::Pipeline;
use crate::util::{align_up, Error, Result};

/// Inputs for one displacement map.
///
/// All buffers are referenced by device address and must stay alive until
/// the recorded commands complete. See [`crate::barrier_flags`] for the
/// synchronization they need.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapCreate {
    /// Number of triangles.
    pub primitive_count: u32,
    /// Micro-triangles per triangle is `4^subdivision_level`.
    pub subdivision_level: u32,
    /// Only [`IndexType::Uint32`] is supported.
    pub index_type: IndexType,
    pub index_data: DeviceAddress,
    /// Only [`Format::R32G32Sfloat`] is supported.
    pub tex_coords_format: Format,
    pub tex_coords_buffer: DeviceAddress,
    /// Bytes between texture coordinates; a multiple of 8.
    pub tex_coords_stride: DeviceSize,
    /// Per-vertex displacement directions, handed through to the descriptor.
    pub directions_format: Format,
    pub directions_buffer: DeviceAddress,
    pub directions_stride: DeviceSize,
    /// Must be in [`ImageLayout::General`](crate::device::ImageLayout::General).
    pub heightmap: ImageDescriptor,
    /// Applied to heights as `bias + height * scale`.
    pub bias: f32,
    pub scale: f32,
}

impl MapCreate {
    /// Reject inputs the baker cannot consume. Performs no device work.
    pub fn validate(&self) -> Result<()> {
        if self.index_type != IndexType::Uint32 {
            return Err(Error::unsupported(format!(
                "index type {:?}, only Uint32 is supported",
                self.index_type
            )));
        }
        if self.tex_coords_format != Format::R32G32Sfloat {
            return Err(Error::unsupported(format!(
                "texture coordinate format {:?}, only R32G32Sfloat is supported",
                self.tex_coords_format
            )));
        }
        if self.tex_coords_stride % 8 != 0 {
            return Err(Error::unsupported(format!(
                "texture coordinate stride {} is not a multiple of 8",
                self.tex_coords_stride
            )));
        }
        if self.tex_coords_stride / 8 > u32::MAX as DeviceSize {
            return Err(Error::unsupported(format!(
                "texture coordinate stride {} is too large",
                self.tex_coords_stride
            )));
        }
        if !self.directions_format.is_direction_format() {
            return Err(Error::unsupported(format!(
                "direction format {:?}",
                self.directions_format
            )));
        }
        if self.subdivision_level > MAX_SUBDIVISION_LEVEL {
            return Err(Error::SubdivisionLevel {
                level: self.subdivision_level,
                max: MAX_SUBDIVISION_LEVEL,
            });
        }
        if self.primitive_count == 0 {
            return Err(Error::EmptyMesh);
        }
        // data offsets in triangle records are 32-bit
        if packed_values_size(self.primitive_count, self.subdivision_level) > u32::MAX as u64 {
            return Err(Error::unsupported(format!(
                "{} triangles at level {} exceed 4 GiB of packed data",
                self.primitive_count, self.subdivision_level
            )));
        }
        Ok(())
    }
}

/// Packed displacement values and triangle records for one bake.
#[derive(Debug)]
pub struct BaryData {
    values: Buffer,
    triangles: Buffer,
    triangle_count: u32,
    subdivision_level: u32,
}

impl BaryData {
    /// Allocate, clear and fill both buffers from the heightmap.
    #[tracing::instrument(skip_all, fields(triangles = create.primitive_count, level = create.subdivision_level))]
    pub fn new(cmd: CommandBuffer, pipeline: &Pipeline, create: &MapCreate) -> Result<Self> {
        let ctx = pipeline.context();
        let count = create.primitive_count;
        let level = create.subdivision_level;

        let work_items = work_item_count(count, level);
        let groups = u32::try_from(group_count(work_items)).map_err(|_| {
            Error::unsupported(format!("{} work items exceed one dispatch", work_items))
        })?;

        let usage = BufferUsage::TRANSFER_DST
            | BufferUsage::SHADER_DEVICE_ADDRESS
            | BufferUsage::MICROMAP_BUILD_INPUT_READ_ONLY;
        let values = Buffer::new(ctx, packed_values_size(count, level), usage)?;
        let triangles = Buffer::new(ctx, triangle_records_size(count), usage)?;

        // the kernel ORs into these
        values.clear(cmd)?;
        triangles.clear(cmd)?;
        ctx.memory_barrier(
            cmd,
            PipelineStage::TRANSFER,
            Access::TRANSFER_WRITE,
            PipelineStage::COMPUTE_SHADER,
            Access::SHADER_READ | Access::SHADER_WRITE,
        );

        let params = CompressParams {
            tex_coords: create.tex_coords_buffer,
            indices: create.index_data,
            values: values.address(),
            triangles: triangles.address(),
            tex_coord_stride: (create.tex_coords_stride / 8) as u32,
            triangle_count: count,
            subdivision_level: level,
            _pad: 0,
        };
        tracing::debug!(
            work_items,
            groups,
            value_bytes = values.size(),
            "dispatching compress"
        );
        pipeline.dispatch_compress(cmd, create.heightmap, params, groups);

        ctx.memory_barrier(
            cmd,
            PipelineStage::COMPUTE_SHADER,
            Access::SHADER_WRITE,
            PipelineStage::MICROMAP_BUILD,
            Access::MICROMAP_READ,
        );

        Ok(Self {
            values,
            triangles,
            triangle_count: count,
            subdivision_level: level,
        })
    }

    pub fn values(&self) -> &Buffer {
        &self.values
    }

    pub fn triangles(&self) -> &Buffer {
        &self.triangles
    }
}

/// Micromap built from a [`BaryData`], with its usage histogram.
#[derive(Debug)]
pub struct BuiltMicromap {
    micromap: Micromap,
    usages: SmallVec<[MicromapUsage; 1]>,
    scratch: Option<Buffer>,
}

impl BuiltMicromap {
    #[tracing::instrument(skip_all)]
    pub fn new(cmd: CommandBuffer, ctx: &Arc<Context>, bary: &BaryData) -> Result<Self> {
        let usages: SmallVec<[MicromapUsage; 1]> = smallvec![MicromapUsage {
            count: bary.triangle_count,
            subdivision_level: bary.subdivision_level,
            format: DisplacementFormat::Triangles64Bytes64 as u32,
        }];

        let mut build = MicromapBuildInfo {
            ty: MicromapType::DisplacementNv,
            usages: &usages,
            dst: MicromapHandle::NULL,
            data: 0,
            triangle_array: 0,
            triangle_array_stride: TRIANGLE_RECORD_BYTES,
            scratch: 0,
        };
        let sizes = ctx.functions().micromap_build_sizes(&build);
        if sizes.micromap_size == 0 {
            return Err(Error::other("device reported a zero micromap size"));
        }

        let micromap = Micromap::new(ctx, sizes.micromap_size)?;

        let alignment = ctx.functions().min_scratch_offset_alignment().max(1);
        let scratch_size = align_up(sizes.build_scratch_size.max(4), alignment);
        let scratch = Buffer::new(
            ctx,
            scratch_size,
            BufferUsage::MICROMAP_BUILD_INPUT_READ_ONLY | BufferUsage::SHADER_DEVICE_ADDRESS,
        )?;
        tracing::debug!(
            micromap_bytes = micromap.storage().size(),
            scratch_bytes = scratch_size,
            "building micromap"
        );

        build.dst = micromap.handle();
        build.data = bary.values.address();
        build.triangle_array = bary.triangles.address();
        build.scratch = scratch.address();
        ctx.functions().cmd_build_micromap(cmd, &build);

        ctx.memory_barrier(
            cmd,
            PipelineStage::MICROMAP_BUILD,
            Access::MICROMAP_WRITE,
            PipelineStage::ACCELERATION_STRUCTURE_BUILD,
            Access::ACCELERATION_STRUCTURE_READ,
        );

        Ok(Self {
            micromap,
            usages,
            scratch: Some(scratch),
        })
    }

    pub fn micromap(&self) -> &Micromap {
        &self.micromap
    }

    pub fn usages(&self) -> &[MicromapUsage] {
        &self.usages
    }
}

/// Displacement data for one triangle geometry in an acceleration structure build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplacementMicromapDesc<'a> {
    pub bias_and_scale_format: Format,
    pub vector_format: Format,
    pub bias_and_scale_buffer: DeviceAddress,
    pub bias_and_scale_stride: DeviceSize,
    pub vector_buffer: DeviceAddress,
    pub vector_stride: DeviceSize,
    /// Micromap triangles map 1:1 onto geometry triangles.
    pub index_type: IndexType,
    pub index_buffer: DeviceAddress,
    pub index_stride: DeviceSize,
    pub base_triangle: u32,
    pub usages: &'a [MicromapUsage],
    pub micromap: MicromapHandle,
}

/// A baked and built displacement micromap, ready to attach to geometry.
///
/// Dropping it releases the micromap and every buffer it owns; the caller
/// must make sure the recorded commands have completed first.
#[derive(Debug)]
pub struct DisplacementMap {
    built: BuiltMicromap,
    bary: BaryData,
    bias_and_scale: Buffer,
    directions_format: Format,
    directions_buffer: DeviceAddress,
    directions_stride: DeviceSize,
}

impl DisplacementMap {
    /// Validate, bake and build. Equivalent to [`Pipeline::cmd_create_map`].
    #[tracing::instrument(skip_all, fields(triangles = create.primitive_count, level = create.subdivision_level))]
    pub fn new(cmd: CommandBuffer, pipeline: &Pipeline, create: &MapCreate) -> Result<Self> {
        create.validate()?;
        let ctx = pipeline.context();

        let bias_and_scale = Buffer::new(
            ctx,
            8,
            BufferUsage::TRANSFER_DST | BufferUsage::SHADER_DEVICE_ADDRESS,
        )?;
        let bary = BaryData::new(cmd, pipeline, create)?;
        let built = BuiltMicromap::new(cmd, ctx, &bary)?;

        bias_and_scale.update(cmd, bytemuck::cast_slice(&[create.bias, create.scale]))?;
        ctx.memory_barrier(
            cmd,
            PipelineStage::TRANSFER,
            Access::TRANSFER_WRITE,
            PipelineStage::ACCELERATION_STRUCTURE_BUILD,
            Access::ACCELERATION_STRUCTURE_READ,
        );

        tracing::info!(
            blocks = bary.values.size() / crate::format::BLOCK_BYTES,
            "displacement map recorded"
        );
        Ok(Self {
            built,
            bary,
            bias_and_scale,
            directions_format: create.directions_format,
            directions_buffer: create.directions_buffer,
            directions_stride: create.directions_stride,
        })
    }

    /// Descriptor to chain into the triangle geometry of an acceleration structure build.
    pub fn descriptor(&self) -> DisplacementMicromapDesc<'_> {
        DisplacementMicromapDesc {
            bias_and_scale_format: Format::R32G32Sfloat,
            vector_format: self.directions_format,
            bias_and_scale_buffer: self.bias_and_scale.address(),
            bias_and_scale_stride: 0,
            vector_buffer: self.directions_buffer,
            vector_stride: self.directions_stride,
            index_type: IndexType::None,
            index_buffer: 0,
            index_stride: 0,
            base_triangle: 0,
            usages: self.built.usages(),
            micromap: self.built.micromap().handle(),
        }
    }

    pub fn micromap(&self) -> MicromapHandle {
        self.built.micromap().handle()
    }

    pub fn usages(&self) -> &[MicromapUsage] {
        self.built.usages()
    }

    /// Packed 11-bit displacement values.
    pub fn values(&self) -> &Buffer {
        self.bary.values()
    }

    /// Per-triangle [`MicromapTriangle`](crate::format::MicromapTriangle) records.
    pub fn triangles(&self) -> &Buffer {
        self.bary.triangles()
    }

    pub fn bias_and_scale(&self) -> &Buffer {
        &self.bias_and_scale
    }

    pub fn triangle_count(&self) -> u32 {
        self.bary.triangle_count
    }

    pub fn subdivision_level(&self) -> u32 {
        self.bary.subdivision_level
    }

    /// Take the build scratch buffer.
    ///
    /// Call only once the build has completed on the device; otherwise keep
    /// it with the map. Returns `None` on later calls.
    pub fn release_scratch(&mut self) -> Option<Buffer> {
        self.built.scratch.take()
    }
}
