//! The compress kernel: one work item per stored micro-vertex.
//!
//! Each work item finds its base triangle, block and block-local vertex,
//! interpolates the triangle's texture coordinates at the micro-vertex,
//! samples the height, quantizes it to 11 bits and ORs it into the packed
//! output. The work item owning vertex 0 of block 0 also writes the
//! triangle's [`MicromapTriangle`] record.
//!
//! Packing relies on bitwise OR into words that start out zero, so both
//! outputs are wrapped in [`ZeroedWords`].

use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use super::sampler::HeightSampler;
use crate::bird::table::resolve_bary_in;
use crate::bird::BaryUv16;
use crate::device::DeviceAddress;
use crate::format::{
    blocks_per_triangle, micro_verts_per_block, quantize, value_bit_offset, MicromapTriangle,
    COMPRESS_WORKGROUP_SIZE, VALUE_BITS,
};
use crate::util::Vec2;

/// Push-constant block handed to the compress kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CompressParams {
    /// Texture coordinates (two f32 per vertex).
    pub tex_coords: DeviceAddress,
    /// u32 triangle indices.
    pub indices: DeviceAddress,
    /// Packed displacement output.
    pub values: DeviceAddress,
    /// [`MicromapTriangle`] output.
    pub triangles: DeviceAddress,
    /// Texture coordinate stride in 8-byte units.
    pub tex_coord_stride: u32,
    pub triangle_count: u32,
    pub subdivision_level: u32,
    pub _pad: u32,
}

/// 32-bit words known to be zero before the kernel writes to them.
///
/// The only public constructor clears the words itself. A dispatch consumes
/// the wrapper, so the same clear cannot back two bakes:
///
/// ```compile_fail
/// use std::sync::atomic::AtomicU32;
/// use heightmap_rtx::bake::*;
/// use heightmap_rtx::bird::BlockToBirdUvTable;
///
/// let values: Vec<AtomicU32> = (0..16).map(|_| AtomicU32::new(0)).collect();
/// let tris: Vec<AtomicU32> = (0..2).map(|_| AtomicU32::new(0)).collect();
/// let inputs = CompressInputs {
///     bird_table: BlockToBirdUvTable::global().entries(),
///     indices: &[0, 1, 2],
///     tex_coords: &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
///     heightmap: &ConstantHeight(0.5),
/// };
/// let params = CompressParams { tex_coord_stride: 1, triangle_count: 1, ..Default::default() };
/// let outputs = CompressOutputs {
///     values: ZeroedWords::clear(&values),
///     triangles: ZeroedWords::clear(&tris),
/// };
/// dispatch_compress(1, &params, &inputs, outputs);
/// dispatch_compress(1, &params, &inputs, outputs);
/// ```
#[derive(Debug)]
pub struct ZeroedWords<'a> {
    words: &'a [AtomicU32],
}

impl<'a> ZeroedWords<'a> {
    /// Zero `words` and take them as kernel output.
    pub fn clear(words: &'a [AtomicU32]) -> Self {
        for word in words {
            word.store(0, Ordering::Relaxed);
        }
        Self { words }
    }

    /// Wrap words whose zero state was established elsewhere, e.g. by a
    /// recorded fill command.
    pub(crate) fn assume_cleared(words: &'a [AtomicU32]) -> Self {
        Self { words }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// OR an 11-bit value in at `bit`, spilling into the next word when it straddles.
    #[inline]
    fn or_value(&self, bit: u64, value: u32) {
        let word = (bit / 32) as usize;
        let shift = (bit % 32) as u32;
        self.words[word].fetch_or(value << shift, Ordering::Relaxed);
        if shift + VALUE_BITS > 32 {
            self.words[word + 1].fetch_or(value >> (32 - shift), Ordering::Relaxed);
        }
    }

    #[inline]
    fn store(&self, word: usize, value: u32) {
        self.words[word].store(value, Ordering::Relaxed);
    }
}

/// Read-only kernel inputs.
#[derive(Clone, Copy)]
pub struct CompressInputs<'a> {
    /// Bound block-to-barycentric table entries.
    pub bird_table: &'a [BaryUv16],
    pub indices: &'a [u32],
    /// Texture coordinate data as f32, `tex_coord_stride * 2` floats per vertex.
    pub tex_coords: &'a [f32],
    pub heightmap: &'a dyn HeightSampler,
}

/// Kernel outputs; both must start zeroed.
#[derive(Debug)]
pub struct CompressOutputs<'a> {
    pub values: ZeroedWords<'a>,
    pub triangles: ZeroedWords<'a>,
}

/// Execute a single work item.
///
/// Work items past the end of the job return without writing.
pub fn compress_work_item(
    global_id: u64,
    params: &CompressParams,
    inputs: &CompressInputs<'_>,
    outputs: &CompressOutputs<'_>,
) {
    let level = params.subdivision_level;
    let verts_per_block = micro_verts_per_block(level) as u64;
    let blocks = blocks_per_triangle(level) as u64;
    let verts_per_triangle = blocks * verts_per_block;
    if global_id >= params.triangle_count as u64 * verts_per_triangle {
        return;
    }

    let triangle = global_id / verts_per_triangle;
    let in_triangle = global_id % verts_per_triangle;
    let block = in_triangle / verts_per_block;
    let vertex = (in_triangle % verts_per_block) as u32;

    let bary = resolve_bary_in(inputs.bird_table, block as u32, vertex, level);

    let stride = params.tex_coord_stride as usize * 2;
    let first = triangle as usize * 3;
    let corner_uv = |k: usize| {
        let index = inputs.indices[first + k] as usize;
        Vec2::new(
            inputs.tex_coords[index * stride],
            inputs.tex_coords[index * stride + 1],
        )
    };
    let tex_coord = corner_uv(0) * bary.x + corner_uv(1) * bary.y + corner_uv(2) * bary.z;

    let height = inputs.heightmap.sample(triangle as u32, bary, tex_coord);
    let value = quantize(height);

    let global_block = triangle * blocks + block;
    outputs
        .values
        .or_value(value_bit_offset(global_block, vertex), value);

    if block == 0 && vertex == 0 {
        let record = MicromapTriangle::for_triangle(triangle as u32, level).to_words();
        let word = triangle as usize * 2;
        outputs.triangles.store(word, record[0]);
        outputs.triangles.store(word + 1, record[1]);
    }
}

/// Run `group_count` work groups in parallel, consuming `outputs`.
///
/// Work groups execute in any order and concurrently; values that share a
/// word are combined with atomic OR.
#[tracing::instrument(skip_all, fields(groups = group_count, level = params.subdivision_level))]
pub fn dispatch_compress(
    group_count: u32,
    params: &CompressParams,
    inputs: &CompressInputs<'_>,
    outputs: CompressOutputs<'_>,
) {
    let group_size = COMPRESS_WORKGROUP_SIZE as u64;
    (0..group_count).into_par_iter().for_each(|group| {
        let first = group as u64 * group_size;
        for id in first..first + group_size {
            compress_work_item(id, params, inputs, &outputs);
        }
    });
}
