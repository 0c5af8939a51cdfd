//! End-to-end bakes on the host device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use heightmap_rtx::bake::{CompressParams, ConstantHeight, HeightSampler, Heightmap, SamplerDesc};
use heightmap_rtx::bird::{resolve_bary, BlockToBirdUvTable};
use heightmap_rtx::device::*;
use heightmap_rtx::format::*;
use heightmap_rtx::host::{HostCommand, HostDevice};
use heightmap_rtx::util::{NativeResult, Vec2, Vec3};
use heightmap_rtx::{barrier_flags, cmd_create_map, Error, MapCreate, Pipeline, PipelineCreate};

const TRIANGLE: [u32; 3] = [0, 1, 2];
const TRIANGLE_UVS: [[f32; 2]; 3] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
const QUAD: [u32; 6] = [0, 1, 2, 1, 3, 2];
const QUAD_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];

/// Counts allocations and can fail the n-th one.
struct CountingAllocator {
    inner: HostDevice,
    creates: AtomicUsize,
    fail_on: Option<usize>,
}

impl Allocator for CountingAllocator {
    fn create_buffer(
        &self,
        info: &BufferCreateInfo,
        memory: MemoryProperties,
    ) -> Result<BufferHandle, NativeResult> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(n) == self.fail_on {
            return Err(NativeResult::ErrorOutOfDeviceMemory);
        }
        self.inner.create_buffer(info, memory)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.inner.destroy_buffer(buffer);
    }
}

struct Fixture {
    device: HostDevice,
    allocator: Arc<CountingAllocator>,
    statuses: Arc<Mutex<Vec<NativeResult>>>,
    pipeline: Pipeline,
    cmd: CommandBuffer,
}

impl Fixture {
    fn new() -> Self {
        Self::with_failure(None)
    }

    fn with_failure(fail_on: Option<usize>) -> Self {
        let device = HostDevice::new();
        let allocator = Arc::new(CountingAllocator {
            inner: device.clone(),
            creates: AtomicUsize::new(0),
            fail_on,
        });
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        let cmd = device.command_buffer();
        let pipeline = Pipeline::new(
            cmd,
            PipelineCreate {
                linkage: Linkage::Static(Arc::new(device.clone())),
                allocator: allocator.clone(),
                pipeline_cache: None,
                check_result: Some(Arc::new(move |r: NativeResult| sink.lock().push(r))),
            },
        )
        .expect("pipeline creation");
        Self {
            device,
            allocator,
            statuses,
            pipeline,
            cmd,
        }
    }

    fn allocations(&self) -> usize {
        self.allocator.creates.load(Ordering::SeqCst)
    }

    /// Upload a mesh and heightmap; returns bake parameters.
    fn mesh(
        &self,
        indices: &[u32],
        uvs: &[[f32; 2]],
        sampler: Arc<dyn HeightSampler>,
        level: u32,
    ) -> MapCreate {
        let usage = BufferUsage::SHADER_DEVICE_ADDRESS | BufferUsage::STORAGE_BUFFER;
        let index_buffer = self
            .device
            .create_buffer_with_data(bytemuck::cast_slice(indices), usage)
            .expect("index upload");
        let uv_buffer = self
            .device
            .create_buffer_with_data(bytemuck::cast_slice(uvs), usage)
            .expect("uv upload");
        let directions = vec![[0.0f32, 0.0, 1.0, 0.0]; uvs.len()];
        let direction_buffer = self
            .device
            .create_buffer_with_data(bytemuck::cast_slice(&directions), usage)
            .expect("direction upload");

        let image = self.device.create_image(sampler);
        self.device
            .transition_image(image, barrier_flags().heightmap_layout);

        MapCreate {
            primitive_count: (indices.len() / 3) as u32,
            subdivision_level: level,
            index_type: IndexType::Uint32,
            index_data: self.device.buffer_device_address(index_buffer),
            tex_coords_format: Format::R32G32Sfloat,
            tex_coords_buffer: self.device.buffer_device_address(uv_buffer),
            tex_coords_stride: 8,
            directions_format: Format::R32G32B32A32Sfloat,
            directions_buffer: self.device.buffer_device_address(direction_buffer),
            directions_stride: 16,
            heightmap: ImageDescriptor {
                image,
                layout: ImageLayout::General,
            },
            bias: 0.0,
            scale: 1.0,
        }
    }

    fn values(&self, map: &heightmap_rtx::DisplacementMap) -> Vec<u8> {
        self.device
            .read_buffer(map.values().handle())
            .expect("values buffer")
    }

    fn records(&self, map: &heightmap_rtx::DisplacementMap) -> Vec<MicromapTriangle> {
        let bytes = self
            .device
            .read_buffer(map.triangles().handle())
            .expect("triangles buffer");
        bytemuck::pod_collect_to_vec(&bytes)
    }
}

/// Every stored value of one triangle, in block order.
fn decode_triangle(bytes: &[u8], triangle: u32, level: u32) -> Vec<u16> {
    let blocks = blocks_per_triangle(level) as u64;
    let mut out = Vec::new();
    for block in 0..blocks {
        for vertex in 0..micro_verts_per_block(level) {
            let global = triangle as u64 * blocks + block;
            out.push(read_packed_value(bytes, global, vertex).expect("value in range"));
        }
    }
    out
}

#[test]
fn test_flat_half_height_level_two() {
    let fx = Fixture::new();
    let create = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(Heightmap::flat(0.5)), 2);
    let map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("bake");
    assert!(fx.device.faults().is_empty(), "{:?}", fx.device.faults());

    let values = fx.values(&map);
    assert_eq!(values.len(), 64);
    assert_eq!(decode_triangle(&values, 0, 2), vec![1024; 15]);

    assert_eq!(
        fx.records(&map),
        vec![MicromapTriangle {
            data_offset: 0,
            subdivision_level: 2,
            format: 1
        }]
    );
}

#[test]
fn test_level_five_uses_sixteen_blocks() {
    let fx = Fixture::new();
    let create = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(1.0)), 5);
    let map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("bake");

    assert_eq!(map.values().size(), 16 * 64);
    assert_eq!(map.triangles().size(), 8);
    assert_eq!(decode_triangle(&fx.values(&map), 0, 5), vec![2047; 16 * 45]);

    let contents = fx
        .device
        .micromap_contents(map.micromap())
        .expect("micromap was built");
    assert_eq!(contents.triangles.len(), 1);
    assert_eq!(contents.values.len(), 1024);
    assert_eq!(
        contents.usages,
        vec![MicromapUsage {
            count: 1,
            subdivision_level: 5,
            format: 1
        }]
    );
}

#[test]
fn test_level_zero_uses_one_block() {
    let fx = Fixture::new();
    let create = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(1.0)), 0);
    let map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("bake");
    assert_eq!(map.values().size(), 64);
    // only 3 values are stored; the rest of the block stays zero
    let values = fx.values(&map);
    for vertex in 0..45 {
        let expected = if vertex < 3 { 2047 } else { 0 };
        assert_eq!(read_packed_value(&values, 0, vertex), Some(expected));
    }
}

#[test]
fn test_work_items_pad_to_whole_groups() {
    let fx = Fixture::new();
    let indices: Vec<u32> = TRIANGLE.iter().copied().cycle().take(16 * 3).collect();
    let create = fx.mesh(&indices, &TRIANGLE_UVS, Arc::new(ConstantHeight(0.25)), 0);
    fx.device.clear_commands();
    let map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("bake");

    // 16 triangles x 3 vertices = 48 work items -> 2 groups of 45
    assert!(fx.device.commands().contains(&HostCommand::DispatchCompress {
        group_count: 2,
        triangle_count: 16,
        subdivision_level: 0,
    }));

    let values = fx.values(&map);
    for t in 0..16 {
        assert_eq!(decode_triangle(&values, t, 0), vec![512; 3]);
    }
    let records = fx.records(&map);
    assert_eq!(records.len(), 16);
    for (t, rec) in records.iter().enumerate() {
        assert_eq!(rec.data_offset, t as u32 * 64);
    }
}

#[test]
fn test_values_match_reference_sampling() {
    let fx = Fixture::new();
    let height = |_: u32, _: Vec3, uv: Vec2| 0.5 * uv.x + 0.25 * uv.y + 0.1;
    let level = 4;
    let create = fx.mesh(&QUAD, &QUAD_UVS, Arc::new(height), level);
    let map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("bake");
    let values = fx.values(&map);

    let table = BlockToBirdUvTable::global();
    for t in 0..2u32 {
        let corners = [0, 1, 2].map(|k| {
            let uv = QUAD_UVS[QUAD[t as usize * 3 + k] as usize];
            Vec2::new(uv[0], uv[1])
        });
        let decoded = decode_triangle(&values, t, level);
        let mut slot = 0;
        for block in 0..blocks_per_triangle(level) {
            for vertex in 0..micro_verts_per_block(level) {
                let bary = table.resolve_bary(block, vertex, level);
                let uv = corners[0] * bary.x + corners[1] * bary.y + corners[2] * bary.z;
                let expected = quantize(height(t, bary, uv)) as u16;
                assert_eq!(decoded[slot], expected, "triangle {t} block {block} vertex {vertex}");
                slot += 1;
            }
        }
    }
}

#[test]
fn test_bakes_are_deterministic() {
    let mut image = image::GrayImage::new(8, 8);
    for (x, y, p) in image.enumerate_pixels_mut() {
        *p = image::Luma([(x * 31 + y * 17) as u8]);
    }
    let heightmap = Arc::new(
        Heightmap::from_image(&image::DynamicImage::ImageLuma8(image), SamplerDesc::default())
            .expect("heightmap"),
    );

    let bake = |fx: &Fixture| {
        let create = fx.mesh(&QUAD, &QUAD_UVS, heightmap.clone(), 3);
        let map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("bake");
        (fx.values(&map), fx.records(&map))
    };

    let fx = Fixture::new();
    let first = bake(&fx);
    let second = bake(&fx);
    let third = bake(&Fixture::new());
    assert_eq!(first, second);
    assert_eq!(first, third);
}

#[test]
fn test_commands_are_recorded_in_order() {
    let fx = Fixture::new();
    let create = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(0.5)), 1);
    fx.device.clear_commands();
    let _map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("bake");

    let commands = fx.device.commands();
    assert_eq!(commands.len(), 9, "{:#?}", commands);
    assert!(matches!(commands[0], HostCommand::FillBuffer { size: 64, data: 0, .. }));
    assert!(matches!(commands[1], HostCommand::FillBuffer { size: 8, data: 0, .. }));
    assert_eq!(
        commands[2],
        HostCommand::Barrier(MemoryBarrier::new(
            PipelineStage::TRANSFER,
            Access::TRANSFER_WRITE,
            PipelineStage::COMPUTE_SHADER,
            Access::SHADER_READ | Access::SHADER_WRITE,
        ))
    );
    assert!(matches!(commands[3], HostCommand::DispatchCompress { group_count: 1, .. }));
    assert_eq!(
        commands[4],
        HostCommand::Barrier(MemoryBarrier::new(
            PipelineStage::COMPUTE_SHADER,
            Access::SHADER_WRITE,
            PipelineStage::MICROMAP_BUILD,
            Access::MICROMAP_READ,
        ))
    );
    assert!(matches!(commands[5], HostCommand::BuildMicromap { .. }));
    assert_eq!(
        commands[6],
        HostCommand::Barrier(MemoryBarrier::new(
            PipelineStage::MICROMAP_BUILD,
            Access::MICROMAP_WRITE,
            PipelineStage::ACCELERATION_STRUCTURE_BUILD,
            Access::ACCELERATION_STRUCTURE_READ,
        ))
    );
    assert!(matches!(commands[7], HostCommand::UpdateBuffer { len: 8, .. }));
    assert_eq!(
        commands[8],
        HostCommand::Barrier(MemoryBarrier::new(
            PipelineStage::TRANSFER,
            Access::TRANSFER_WRITE,
            PipelineStage::ACCELERATION_STRUCTURE_BUILD,
            Access::ACCELERATION_STRUCTURE_READ,
        ))
    );
}

#[test]
fn test_unsupported_input_allocates_nothing() {
    let fx = Fixture::new();
    let valid = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(0.5)), 2);
    fx.device.clear_commands();
    let before = fx.allocations();

    let mut cases = Vec::new();
    cases.push(MapCreate {
        index_type: IndexType::Uint16,
        ..valid
    });
    cases.push(MapCreate {
        tex_coords_format: Format::R32G32B32Sfloat,
        ..valid
    });
    cases.push(MapCreate {
        tex_coords_stride: 12,
        ..valid
    });

    for create in &cases {
        let err = cmd_create_map(fx.cmd, Some(&fx.pipeline), create).unwrap_err();
        assert!(matches!(err, Error::UnsupportedInput(_)), "{err}");
        assert_eq!(err.status(), NativeResult::ErrorFormatNotSupported);
    }
    assert_eq!(fx.allocations(), before);
    assert!(fx.device.commands().is_empty());
}

#[test]
fn test_zero_triangles_is_degenerate() {
    let fx = Fixture::new();
    let create = MapCreate {
        primitive_count: 0,
        ..fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(0.5)), 2)
    };
    let before = fx.allocations();
    let err = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).unwrap_err();
    assert!(matches!(err, Error::EmptyMesh));
    assert!(err.is_degenerate());
    assert_eq!(err.status(), NativeResult::Incomplete);
    assert_eq!(fx.allocations(), before);
}

#[test]
fn test_missing_pipeline_is_initialization_failure() {
    let fx = Fixture::new();
    let create = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(0.5)), 2);
    let err = cmd_create_map(fx.cmd, None, &create).unwrap_err();
    assert!(matches!(err, Error::NotInitialized));
    assert_eq!(err.status(), NativeResult::ErrorInitializationFailed);
}

#[test]
fn test_allocation_failure_leaves_nothing_behind() {
    // allocation 1 is the pipeline's table; 2..=6 belong to the map
    for fail_on in 2..=6 {
        let fx = Fixture::with_failure(Some(fail_on));
        let create = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(0.5)), 4);
        let baseline = fx.device.live_buffers();

        let err = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).unwrap_err();
        assert!(
            matches!(err, Error::Native(NativeResult::ErrorOutOfDeviceMemory)),
            "allocation {fail_on}: {err}"
        );
        assert_eq!(fx.device.live_buffers(), baseline, "allocation {fail_on}");
        assert_eq!(fx.device.live_micromaps(), 0);
        assert!(fx
            .statuses
            .lock()
            .contains(&NativeResult::ErrorOutOfDeviceMemory));
    }
}

#[test]
fn test_result_hook_sees_every_status() {
    let fx = Fixture::new();
    let create = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(0.5)), 2);
    fx.statuses.lock().clear();
    let _map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("bake");
    let statuses = fx.statuses.lock().clone();
    // bias, values, triangles, micromap storage, micromap, scratch
    assert_eq!(statuses.len(), 6);
    assert!(statuses.iter().all(|s| s.is_success()));
}

#[test]
fn test_map_owns_and_releases_resources() {
    let fx = Fixture::new();
    let create = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(0.5)), 3);
    let baseline = fx.device.live_buffers();

    let mut map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("bake");
    // bias/scale, values, triangles, micromap storage, scratch
    assert_eq!(fx.device.live_buffers(), baseline + 5);
    assert_eq!(fx.device.live_micromaps(), 1);

    let scratch = map.release_scratch().expect("scratch buffer");
    assert_eq!(scratch.size(), 128);
    assert!(map.release_scratch().is_none());
    drop(scratch);
    assert_eq!(fx.device.live_buffers(), baseline + 4);

    drop(map);
    assert_eq!(fx.device.live_buffers(), baseline);
    assert_eq!(fx.device.live_micromaps(), 0);
    assert!(fx.device.faults().is_empty());
}

#[test]
fn test_descriptor_describes_the_map() {
    let fx = Fixture::new();
    let create = MapCreate {
        bias: -0.5,
        scale: 2.0,
        ..fx.mesh(&QUAD, &QUAD_UVS, Arc::new(ConstantHeight(0.5)), 3)
    };
    let map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("bake");
    let desc = map.descriptor();

    assert_eq!(desc.bias_and_scale_format, Format::R32G32Sfloat);
    assert_eq!(desc.vector_format, Format::R32G32B32A32Sfloat);
    assert_eq!(desc.vector_buffer, create.directions_buffer);
    assert_eq!(desc.vector_stride, 16);
    assert_eq!(desc.index_type, IndexType::None);
    assert_eq!(desc.micromap, map.micromap());
    assert_eq!(
        desc.usages,
        &[MicromapUsage {
            count: 2,
            subdivision_level: 3,
            format: DisplacementFormat::Triangles64Bytes64 as u32
        }]
    );

    let (bias_scale, offset) = fx
        .device
        .resolve_address(desc.bias_and_scale_buffer)
        .expect("bias/scale buffer is mapped");
    assert_eq!(offset, 0);
    let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&bias_scale.read());
    assert_eq!(floats, vec![-0.5, 2.0]);
}

#[test]
fn test_dynamic_linkage() {
    let device = HostDevice::new();
    let pipeline = Pipeline::new(
        device.command_buffer(),
        PipelineCreate {
            linkage: Linkage::Dynamic(Arc::new(device.clone())),
            allocator: Arc::new(device.clone()),
            pipeline_cache: None,
            check_result: None,
        },
    );
    assert!(pipeline.is_ok());
    assert!(device.load().is_some());

    struct Missing;
    impl FunctionLoader for Missing {
        fn load(&self) -> Option<Arc<dyn DeviceFunctions>> {
            None
        }
    }
    let err = Pipeline::new(
        device.command_buffer(),
        PipelineCreate {
            linkage: Linkage::Dynamic(Arc::new(Missing)),
            allocator: Arc::new(device.clone()),
            pipeline_cache: None,
            check_result: None,
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::NotInitialized));
}

#[test]
fn test_heightmap_outside_general_layout_faults() {
    let fx = Fixture::new();
    let create = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(0.5)), 2);
    fx.device
        .transition_image(create.heightmap.image, ImageLayout::ShaderReadOnlyOptimal);
    let _map = cmd_create_map(fx.cmd, Some(&fx.pipeline), &create).expect("recorded");
    let faults = fx.device.faults();
    assert!(faults.iter().any(|f| f.contains("layout")), "{:?}", faults);
}

/// Host device that reports byte-granular micromap and scratch sizes.
struct UnalignedSizes(HostDevice);

impl DeviceFunctions for UnalignedSizes {
    fn buffer_device_address(&self, buffer: BufferHandle) -> DeviceAddress {
        self.0.buffer_device_address(buffer)
    }

    fn cmd_fill_buffer(
        &self,
        cmd: CommandBuffer,
        buffer: BufferHandle,
        offset: DeviceSize,
        size: DeviceSize,
        data: u32,
    ) {
        self.0.cmd_fill_buffer(cmd, buffer, offset, size, data);
    }

    fn cmd_update_buffer(
        &self,
        cmd: CommandBuffer,
        buffer: BufferHandle,
        offset: DeviceSize,
        data: &[u8],
    ) {
        self.0.cmd_update_buffer(cmd, buffer, offset, data);
    }

    fn cmd_pipeline_barrier(&self, cmd: CommandBuffer, barrier: &MemoryBarrier) {
        self.0.cmd_pipeline_barrier(cmd, barrier);
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
    ) -> Result<PipelineHandle, NativeResult> {
        self.0.create_compute_pipeline(desc)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.0.destroy_pipeline(pipeline);
    }

    fn cmd_dispatch_compress(&self, cmd: CommandBuffer, dispatch: &CompressDispatch) {
        self.0.cmd_dispatch_compress(cmd, dispatch);
    }

    fn micromap_build_sizes(&self, info: &MicromapBuildInfo<'_>) -> MicromapBuildSizes {
        let sizes = self.0.micromap_build_sizes(info);
        MicromapBuildSizes {
            micromap_size: sizes.micromap_size + 2,
            build_scratch_size: 6,
        }
    }

    fn create_micromap(&self, info: &MicromapCreateInfo) -> Result<MicromapHandle, NativeResult> {
        self.0.create_micromap(info)
    }

    fn destroy_micromap(&self, micromap: MicromapHandle) {
        self.0.destroy_micromap(micromap);
    }

    fn cmd_build_micromap(&self, cmd: CommandBuffer, info: &MicromapBuildInfo<'_>) {
        self.0.cmd_build_micromap(cmd, info);
    }

    fn min_scratch_offset_alignment(&self) -> DeviceSize {
        1
    }
}

#[test]
fn test_device_sizes_need_not_be_whole_words() {
    let fx = Fixture::new();
    let create = fx.mesh(&TRIANGLE, &TRIANGLE_UVS, Arc::new(ConstantHeight(0.5)), 2);
    let pipeline = Pipeline::new(
        fx.cmd,
        PipelineCreate {
            linkage: Linkage::Static(Arc::new(UnalignedSizes(fx.device.clone()))),
            allocator: Arc::new(fx.device.clone()),
            pipeline_cache: None,
            check_result: None,
        },
    )
    .expect("pipeline creation");

    // 8 + 64 byte micromap reported as 74, scratch as 6 with byte alignment
    let mut map = cmd_create_map(fx.cmd, Some(&pipeline), &create).expect("bake");
    assert!(fx.device.faults().is_empty(), "{:?}", fx.device.faults());
    assert!(fx.device.micromap_contents(map.micromap()).is_some());
    assert_eq!(map.release_scratch().map(|b| b.size()), Some(6));
    assert_eq!(decode_triangle(&fx.values(&map), 0, 2), vec![1024; 15]);
}

#[test]
fn test_dispatch_requires_zero_fill() {
    let device = HostDevice::new();
    let cmd = device.command_buffer();
    let usage = BufferUsage::SHADER_DEVICE_ADDRESS | BufferUsage::STORAGE_BUFFER;

    let pipeline = device
        .create_compute_pipeline(&ComputePipelineDesc {
            kernel: KernelId::Compress,
            workgroup_size: COMPRESS_WORKGROUP_SIZE,
            cache: None,
        })
        .unwrap();
    let table = device
        .create_buffer_with_data(BlockToBirdUvTable::global().as_bytes(), BufferUsage::UNIFORM_BUFFER)
        .unwrap();
    let indices = device
        .create_buffer_with_data(bytemuck::cast_slice(&TRIANGLE), usage)
        .unwrap();
    let uvs = device
        .create_buffer_with_data(bytemuck::cast_slice(&TRIANGLE_UVS), usage)
        .unwrap();
    let values = device
        .create_buffer(&BufferCreateInfo { size: 64, usage }, MemoryProperties::DEVICE_LOCAL)
        .unwrap();
    let triangles = device
        .create_buffer(&BufferCreateInfo { size: 8, usage }, MemoryProperties::DEVICE_LOCAL)
        .unwrap();
    let image = device.create_image(Arc::new(ConstantHeight(0.0)));
    device.transition_image(image, ImageLayout::General);

    let dispatch = CompressDispatch {
        pipeline,
        bird_table: table,
        heightmap: ImageDescriptor {
            image,
            layout: ImageLayout::General,
        },
        params: CompressParams {
            tex_coords: device.buffer_device_address(uvs),
            indices: device.buffer_device_address(indices),
            values: device.buffer_device_address(values),
            triangles: device.buffer_device_address(triangles),
            tex_coord_stride: 1,
            triangle_count: 1,
            subdivision_level: 1,
            _pad: 0,
        },
        group_count: 1,
    };

    // fresh buffers hold poison, not zeros
    device.cmd_dispatch_compress(cmd, &dispatch);
    assert_eq!(device.faults().len(), 1);
    assert!(device.faults()[0].contains("zero filled"));
    assert!(device.read_buffer(values).unwrap().iter().all(|&b| b == 0xcd));

    // values filled, records not: the rejected dispatch leaves the values fill intact
    device.cmd_fill_buffer(cmd, values, 0, WHOLE_SIZE, 0);
    device.cmd_dispatch_compress(cmd, &dispatch);
    assert_eq!(device.faults().len(), 2);
    assert!(device.faults()[1].contains("triangle record"));
    assert!(device.buffer(values).unwrap().is_zeroed());

    device.cmd_fill_buffer(cmd, triangles, 0, WHOLE_SIZE, 0);
    device.cmd_dispatch_compress(cmd, &dispatch);
    assert_eq!(device.faults().len(), 2);
    assert_eq!(decode_triangle(&device.read_buffer(values).unwrap(), 0, 1), vec![0; 6]);

    // a finished bake is not zero any more
    device.cmd_dispatch_compress(cmd, &dispatch);
    assert_eq!(device.faults().len(), 3);
}

#[test]
fn test_resolve_bary_sums_to_one_for_every_slot() {
    for level in 0..=MAX_SUBDIVISION_LEVEL {
        for block in 0..blocks_per_triangle(level) {
            for vertex in 0..micro_verts_per_block(level) {
                let b = resolve_bary(block, vertex, level);
                assert!(b.x >= 0.0 && b.y >= 0.0 && b.z >= 0.0);
                assert!((b.x + b.y + b.z - 1.0).abs() < 1e-6);
                let scaled = b * (1u32 << level) as f32;
                assert_eq!(scaled, scaled.round(), "level {level} is not on the lattice");
            }
        }
    }
}

#[test]
fn test_packed_size_formula() {
    for level in 0..=MAX_SUBDIVISION_LEVEL {
        for n in [1u32, 7, 100] {
            assert_eq!(
                packed_values_size(n, level),
                n as u64 * blocks_per_triangle(level) as u64 * 64
            );
            let items = work_item_count(n, level);
            assert!(group_count(items) * COMPRESS_WORKGROUP_SIZE as u64 >= items);
            assert!((group_count(items) - 1) * (COMPRESS_WORKGROUP_SIZE as u64) < items);
        }
    }
}
