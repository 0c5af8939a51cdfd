//! Software device that executes commands on the CPU.
//!
//! [`HostDevice`] implements [`DeviceFunctions`], [`Allocator`] and
//! [`FunctionLoader`]. Commands run immediately when recorded and are
//! appended to a log. Misuse that a real device would not report (wrong
//! image layout, missing zero fill, out-of-range addresses) is recorded as a
//! fault instead of executing.
//!
//! It is the reference backend for tests and for the `hrtx` tool.

mod memory;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

pub use memory::{HostBuffer, POISON};

use crate::bake::{dispatch_compress, CompressInputs, CompressOutputs, HeightSampler};
use crate::bird::{BaryUv16, BIRD_TABLE_ENTRIES};
use crate::device::*;
use crate::format::{
    blocks_per_triangle, packed_values_size, triangle_records_size, DisplacementFormat,
    MicromapTriangle, MicromapUsage, BLOCK_BYTES, TRIANGLE_RECORD_BYTES,
};
use crate::util::{align_up, DeviceResult, NativeResult};

/// Default scratch alignment reported by [`HostDevice`].
pub const DEFAULT_SCRATCH_ALIGNMENT: DeviceSize = 128;

/// Address gap between buffers, so off-by-one addressing faults.
const ADDRESS_GUARD: DeviceSize = 256;

/// A command as executed by [`HostDevice`].
#[derive(Clone, Debug, PartialEq)]
pub enum HostCommand {
    FillBuffer {
        buffer: BufferHandle,
        offset: DeviceSize,
        size: DeviceSize,
        data: u32,
    },
    UpdateBuffer {
        buffer: BufferHandle,
        offset: DeviceSize,
        len: usize,
    },
    Barrier(MemoryBarrier),
    DispatchCompress {
        group_count: u32,
        triangle_count: u32,
        subdivision_level: u32,
    },
    BuildMicromap {
        micromap: MicromapHandle,
    },
}

/// What a micromap build consumed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MicromapContents {
    pub usages: Vec<MicromapUsage>,
    pub triangles: Vec<MicromapTriangle>,
    /// Packed displacement bytes referenced by `triangles`.
    pub values: Vec<u8>,
}

struct HostImage {
    sampler: Arc<dyn HeightSampler>,
    layout: ImageLayout,
}

struct HostMicromap {
    storage: BufferHandle,
    contents: Option<MicromapContents>,
}

struct HostState {
    buffers: RwLock<HashMap<BufferHandle, Arc<HostBuffer>>>,
    /// Base address to buffer.
    addresses: RwLock<BTreeMap<DeviceAddress, BufferHandle>>,
    images: RwLock<HashMap<ImageHandle, HostImage>>,
    micromaps: RwLock<HashMap<MicromapHandle, HostMicromap>>,
    pipelines: RwLock<HashMap<PipelineHandle, KernelId>>,
    commands: Mutex<Vec<HostCommand>>,
    faults: Mutex<Vec<String>>,
    next_handle: AtomicU64,
    next_address: AtomicU64,
    allocated: AtomicU64,
    memory_limit: Option<DeviceSize>,
    scratch_alignment: DeviceSize,
}

/// CPU-backed device. Cloning shares the same device.
#[derive(Clone)]
pub struct HostDevice {
    state: Arc<HostState>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDevice")
            .field("buffers", &self.live_buffers())
            .field("micromaps", &self.live_micromaps())
            .field("faults", &self.state.faults.lock().len())
            .finish()
    }
}

impl HostDevice {
    pub fn new() -> Self {
        Self::with_limits(None, DEFAULT_SCRATCH_ALIGNMENT)
    }

    /// Device that fails allocations past `memory_limit` bytes with
    /// [`NativeResult::ErrorOutOfDeviceMemory`].
    pub fn with_limits(memory_limit: Option<DeviceSize>, scratch_alignment: DeviceSize) -> Self {
        Self {
            state: Arc::new(HostState {
                buffers: RwLock::new(HashMap::new()),
                addresses: RwLock::new(BTreeMap::new()),
                images: RwLock::new(HashMap::new()),
                micromaps: RwLock::new(HashMap::new()),
                pipelines: RwLock::new(HashMap::new()),
                commands: Mutex::new(Vec::new()),
                faults: Mutex::new(Vec::new()),
                next_handle: AtomicU64::new(1),
                next_address: AtomicU64::new(0x1_0000),
                allocated: AtomicU64::new(0),
                memory_limit,
                scratch_alignment,
            }),
        }
    }

    fn next_handle(&self) -> u64 {
        self.state.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// A fresh command buffer handle. Commands execute on record, so it
    /// only tags the recording.
    pub fn command_buffer(&self) -> CommandBuffer {
        CommandBuffer(self.next_handle())
    }

    /// Create a buffer holding `bytes` (padded to whole words).
    pub fn create_buffer_with_data(
        &self,
        bytes: &[u8],
        usage: BufferUsage,
    ) -> DeviceResult<BufferHandle> {
        let size = align_up(bytes.len().max(1) as DeviceSize, 4);
        let handle = self.create_buffer(&BufferCreateInfo { size, usage }, MemoryProperties::HOST_VISIBLE)?;
        let buffer = self.buffer(handle).ok_or(NativeResult::ErrorUnknown)?;
        let mut padded = bytes.to_vec();
        padded.resize(size as usize, 0);
        buffer.write(0, &padded).map_err(|_| NativeResult::ErrorUnknown)?;
        Ok(handle)
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<Arc<HostBuffer>> {
        self.state.buffers.read().get(&handle).cloned()
    }

    /// Snapshot of a buffer's bytes.
    pub fn read_buffer(&self, handle: BufferHandle) -> Option<Vec<u8>> {
        self.buffer(handle).map(|b| b.read())
    }

    /// Buffer containing `address` and the offset into it.
    pub fn resolve_address(&self, address: DeviceAddress) -> Option<(Arc<HostBuffer>, DeviceSize)> {
        let (base, handle) = {
            let addresses = self.state.addresses.read();
            let (&base, &handle) = addresses.range(..=address).next_back()?;
            (base, handle)
        };
        let buffer = self.buffer(handle)?;
        let offset = address - base;
        if offset >= buffer.size() {
            return None;
        }
        Some((buffer, offset))
    }

    /// Register a sampled heightmap image in [`ImageLayout::Undefined`].
    pub fn create_image(&self, sampler: Arc<dyn HeightSampler>) -> ImageHandle {
        let handle = ImageHandle(self.next_handle());
        self.state.images.write().insert(
            handle,
            HostImage {
                sampler,
                layout: ImageLayout::Undefined,
            },
        );
        handle
    }

    /// Move an image to `layout`. Returns false for unknown images.
    pub fn transition_image(&self, image: ImageHandle, layout: ImageLayout) -> bool {
        match self.state.images.write().get_mut(&image) {
            Some(img) => {
                img.layout = layout;
                true
            }
            None => false,
        }
    }

    pub fn destroy_image(&self, image: ImageHandle) {
        self.state.images.write().remove(&image);
    }

    /// Commands executed so far, in order.
    pub fn commands(&self) -> Vec<HostCommand> {
        self.state.commands.lock().clone()
    }

    pub fn clear_commands(&self) {
        self.state.commands.lock().clear();
    }

    /// Faults recorded so far.
    pub fn faults(&self) -> Vec<String> {
        self.state.faults.lock().clone()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.buffers.read().len()
    }

    pub fn live_micromaps(&self) -> usize {
        self.state.micromaps.read().len()
    }

    /// Data consumed by the last build of `micromap`.
    pub fn micromap_contents(&self, micromap: MicromapHandle) -> Option<MicromapContents> {
        self.state
            .micromaps
            .read()
            .get(&micromap)
            .and_then(|m| m.contents.clone())
    }

    fn log(&self, command: HostCommand) {
        self.state.commands.lock().push(command);
    }

    fn fault(&self, message: String) {
        tracing::warn!(fault = %message, "host device fault");
        self.state.faults.lock().push(message);
    }

    /// Words from `address` to the end of its buffer.
    fn words_at(&self, address: DeviceAddress, what: &str) -> Result<Vec<u32>, String> {
        let (buffer, offset) = self
            .resolve_address(address)
            .ok_or_else(|| format!("{} address {:#x} is not mapped", what, address))?;
        buffer.words_from(offset)
    }

    /// Whole buffer at `address`, which must be its base.
    fn buffer_at_base(&self, address: DeviceAddress, what: &str) -> Result<Arc<HostBuffer>, String> {
        match self.resolve_address(address) {
            Some((buffer, 0)) => Ok(buffer),
            Some((_, offset)) => Err(format!("{} address is {} bytes into a buffer", what, offset)),
            None => Err(format!("{} address {:#x} is not mapped", what, address)),
        }
    }

    fn run_compress(&self, dispatch: &CompressDispatch) -> Result<(), String> {
        let params = &dispatch.params;

        match self.state.pipelines.read().get(&dispatch.pipeline) {
            Some(KernelId::Compress) => {}
            None => return Err(format!("unknown pipeline {:?}", dispatch.pipeline)),
        }

        let table_bytes = self
            .read_buffer(dispatch.bird_table)
            .ok_or_else(|| format!("bird table buffer {:?} does not exist", dispatch.bird_table))?;
        let bird_table: Vec<BaryUv16> = bytemuck::cast_slice(&table_bytes).to_vec();
        if bird_table.len() < BIRD_TABLE_ENTRIES {
            return Err(format!("bird table holds only {} entries", bird_table.len()));
        }

        let sampler = {
            let images = self.state.images.read();
            let image = images
                .get(&dispatch.heightmap.image)
                .ok_or_else(|| format!("unknown heightmap image {:?}", dispatch.heightmap.image))?;
            if image.layout != ImageLayout::General || dispatch.heightmap.layout != ImageLayout::General {
                return Err(format!(
                    "heightmap sampled in layout {:?} (bound as {:?}), expected General",
                    image.layout, dispatch.heightmap.layout
                ));
            }
            Arc::clone(&image.sampler)
        };

        let count = params.triangle_count;
        let level = params.subdivision_level;
        let values = self.buffer_at_base(params.values, "packed values")?;
        let triangles = self.buffer_at_base(params.triangles, "triangle records")?;
        if values.size() < packed_values_size(count, level) {
            return Err(format!(
                "packed value buffer of {} bytes is too small for {} triangles",
                values.size(),
                count
            ));
        }
        if triangles.size() < triangle_records_size(count) {
            return Err(format!(
                "triangle record buffer of {} bytes is too small for {} triangles",
                triangles.size(),
                count
            ));
        }

        let indices = self.words_at(params.indices, "index")?;
        let needed = count as usize * 3;
        if indices.len() < needed {
            return Err(format!("{} indices for {} triangles", indices.len(), count));
        }
        let tex_coords: Vec<f32> = self
            .words_at(params.tex_coords, "texture coordinate")?
            .into_iter()
            .map(f32::from_bits)
            .collect();
        let stride = params.tex_coord_stride as usize * 2;
        if stride == 0 {
            return Err("zero texture coordinate stride".to_string());
        }
        if let Some(&max_index) = indices[..needed].iter().max() {
            if max_index as usize * stride + 2 > tex_coords.len() {
                return Err(format!("index {} past the texture coordinates", max_index));
            }
        }

        // check both before consuming either
        if !values.is_zeroed() {
            return Err("packed value buffer was not zero filled before dispatch".to_string());
        }
        if !triangles.is_zeroed() {
            return Err("triangle record buffer was not zero filled before dispatch".to_string());
        }
        let values = values
            .take_zeroed()
            .ok_or("packed value buffer was written during dispatch setup")?;
        let triangles = triangles
            .take_zeroed()
            .ok_or("triangle record buffer was written during dispatch setup")?;

        let inputs = CompressInputs {
            bird_table: &bird_table,
            indices: &indices,
            tex_coords: &tex_coords,
            heightmap: sampler.as_ref(),
        };
        let outputs = CompressOutputs { values, triangles };
        dispatch_compress(dispatch.group_count, params, &inputs, outputs);
        Ok(())
    }

    fn run_build(&self, info: &MicromapBuildInfo<'_>) -> Result<(), String> {
        if !self.state.micromaps.read().contains_key(&info.dst) {
            return Err(format!("unknown micromap {:?}", info.dst));
        }
        if info.triangle_array_stride != TRIANGLE_RECORD_BYTES {
            return Err(format!(
                "triangle array stride {}",
                info.triangle_array_stride
            ));
        }
        match self.resolve_address(info.scratch) {
            Some((scratch, offset)) if scratch.size() - offset >= 4 => {}
            _ => return Err(format!("scratch address {:#x} is not usable", info.scratch)),
        }

        let record_count: u32 = info.usages.iter().map(|u| u.count).sum();
        let record_words = self.words_at(info.triangle_array, "triangle array")?;
        if record_words.len() < record_count as usize * 2 {
            return Err(format!("triangle array too small for {} records", record_count));
        }
        let triangles: Vec<MicromapTriangle> = record_words
            .chunks_exact(2)
            .take(record_count as usize)
            .map(|w| MicromapTriangle::from_words([w[0], w[1]]))
            .collect();

        let values = self
            .resolve_address(info.data)
            .ok_or_else(|| format!("data address {:#x} is not mapped", info.data))
            .map(|(buffer, offset)| buffer.read().split_off(offset as usize))?;

        let mut histogram: HashMap<(u32, u32), u32> = HashMap::new();
        for (i, tri) in triangles.iter().enumerate() {
            if DisplacementFormat::from_raw(tri.format).is_none() {
                return Err(format!("triangle {} has format tag {}", i, tri.format));
            }
            let level = tri.subdivision_level as u32;
            let end = tri.data_offset as u64 + blocks_per_triangle(level) as u64 * BLOCK_BYTES;
            if end > values.len() as u64 {
                return Err(format!("triangle {} data ends past the packed values", i));
            }
            *histogram.entry((level, tri.format as u32)).or_default() += 1;
        }
        for usage in info.usages {
            let seen = histogram
                .get(&(usage.subdivision_level, usage.format))
                .copied()
                .unwrap_or(0);
            if seen != usage.count {
                return Err(format!(
                    "usage {:?} declares {} triangles, records hold {}",
                    usage, usage.count, seen
                ));
            }
        }

        let contents = MicromapContents {
            usages: info.usages.to_vec(),
            triangles,
            values,
        };
        if let Some(micromap) = self.state.micromaps.write().get_mut(&info.dst) {
            micromap.contents = Some(contents);
        }
        Ok(())
    }
}

impl Allocator for HostDevice {
    fn create_buffer(
        &self,
        info: &BufferCreateInfo,
        _memory: MemoryProperties,
    ) -> DeviceResult<BufferHandle> {
        if info.size == 0 {
            return Err(NativeResult::ErrorUnknown);
        }
        let allocated = self.state.allocated.fetch_add(info.size, Ordering::Relaxed) + info.size;
        if let Some(limit) = self.state.memory_limit {
            if allocated > limit {
                self.state.allocated.fetch_sub(info.size, Ordering::Relaxed);
                return Err(NativeResult::ErrorOutOfDeviceMemory);
            }
        }

        let handle = BufferHandle(self.next_handle());
        let reserve = align_up(info.size, ADDRESS_GUARD) + ADDRESS_GUARD;
        let address = self.state.next_address.fetch_add(reserve, Ordering::Relaxed);
        let buffer = Arc::new(HostBuffer::new(handle, address, info.size, info.usage));

        self.state.addresses.write().insert(address, handle);
        self.state.buffers.write().insert(handle, buffer);
        tracing::trace!(handle = handle.0, size = info.size, address, "host buffer created");
        Ok(handle)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let removed = self.state.buffers.write().remove(&buffer);
        if let Some(b) = removed {
            self.state.addresses.write().remove(&b.address());
            self.state.allocated.fetch_sub(b.size(), Ordering::Relaxed);
        }
    }
}

impl DeviceFunctions for HostDevice {
    fn buffer_device_address(&self, buffer: BufferHandle) -> DeviceAddress {
        self.buffer(buffer).map(|b| b.address()).unwrap_or(0)
    }

    fn cmd_fill_buffer(
        &self,
        _cmd: CommandBuffer,
        buffer: BufferHandle,
        offset: DeviceSize,
        size: DeviceSize,
        data: u32,
    ) {
        self.log(HostCommand::FillBuffer {
            buffer,
            offset,
            size,
            data,
        });
        let result = match self.buffer(buffer) {
            Some(b) => b.fill(offset, size, data),
            None => Err(format!("fill of unknown buffer {:?}", buffer)),
        };
        if let Err(message) = result {
            self.fault(message);
        }
    }

    fn cmd_update_buffer(
        &self,
        _cmd: CommandBuffer,
        buffer: BufferHandle,
        offset: DeviceSize,
        data: &[u8],
    ) {
        self.log(HostCommand::UpdateBuffer {
            buffer,
            offset,
            len: data.len(),
        });
        let result = match self.buffer(buffer) {
            Some(b) => b.write(offset, data),
            None => Err(format!("update of unknown buffer {:?}", buffer)),
        };
        if let Err(message) = result {
            self.fault(message);
        }
    }

    fn cmd_pipeline_barrier(&self, _cmd: CommandBuffer, barrier: &MemoryBarrier) {
        // commands already complete in order
        self.log(HostCommand::Barrier(*barrier));
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> DeviceResult<PipelineHandle> {
        if desc.workgroup_size == 0 {
            return Err(NativeResult::ErrorInitializationFailed);
        }
        let handle = PipelineHandle(self.next_handle());
        self.state.pipelines.write().insert(handle, desc.kernel);
        Ok(handle)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state.pipelines.write().remove(&pipeline);
    }

    fn cmd_dispatch_compress(&self, _cmd: CommandBuffer, dispatch: &CompressDispatch) {
        self.log(HostCommand::DispatchCompress {
            group_count: dispatch.group_count,
            triangle_count: dispatch.params.triangle_count,
            subdivision_level: dispatch.params.subdivision_level,
        });
        if let Err(message) = self.run_compress(dispatch) {
            self.fault(message);
        }
    }

    fn micromap_build_sizes(&self, info: &MicromapBuildInfo<'_>) -> MicromapBuildSizes {
        let data: DeviceSize = info
            .usages
            .iter()
            .map(|u| {
                u.count as DeviceSize
                    * (TRIANGLE_RECORD_BYTES
                        + blocks_per_triangle(u.subdivision_level) as DeviceSize * BLOCK_BYTES)
            })
            .sum();
        MicromapBuildSizes {
            micromap_size: align_up(data, 4),
            // builds run in place
            build_scratch_size: 0,
        }
    }

    fn create_micromap(&self, info: &MicromapCreateInfo) -> DeviceResult<MicromapHandle> {
        let storage = self.buffer(info.buffer).ok_or(NativeResult::ErrorUnknown)?;
        if !storage.usage().contains(BufferUsage::MICROMAP_STORAGE)
            || info.offset + info.size > storage.size()
        {
            return Err(NativeResult::ErrorUnknown);
        }
        let handle = MicromapHandle(self.next_handle());
        self.state.micromaps.write().insert(
            handle,
            HostMicromap {
                storage: info.buffer,
                contents: None,
            },
        );
        Ok(handle)
    }

    fn destroy_micromap(&self, micromap: MicromapHandle) {
        let removed = self.state.micromaps.write().remove(&micromap);
        if let Some(m) = removed {
            if self.buffer(m.storage).is_none() {
                self.fault(format!("micromap {:?} outlived its storage", micromap));
            }
        }
    }

    fn cmd_build_micromap(&self, _cmd: CommandBuffer, info: &MicromapBuildInfo<'_>) {
        self.log(HostCommand::BuildMicromap { micromap: info.dst });
        if let Err(message) = self.run_build(info) {
            self.fault(message);
        }
    }

    fn min_scratch_offset_alignment(&self) -> DeviceSize {
        self.state.scratch_alignment
    }
}

impl FunctionLoader for HostDevice {
    fn load(&self) -> Option<Arc<dyn DeviceFunctions>> {
        Some(Arc::new(self.clone()))
    }
}
