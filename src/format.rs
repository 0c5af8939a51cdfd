//! Displacement micromap layout constants and sizing rules.
//!
//! Only the 64-micro-triangles-in-64-bytes format is produced: every block
//! holds up to 45 micro-vertex displacements at 11 bits each, packed
//! least-significant bit first in little-endian 32-bit words.

use bytemuck::{Pod, Zeroable};
use byteorder::{ByteOrder, LittleEndian};

/// Highest subdivision level the baker accepts.
pub const MAX_SUBDIVISION_LEVEL: u32 = 5;

/// Subdivision level of a single block (64 micro-triangles).
pub const BLOCK_SUBDIVISION_LEVEL: u32 = 3;

/// Micro-vertices stored in one full block.
pub const MICRO_VERTS_PER_BLOCK: u32 = 45;

/// Size of one packed block in bytes.
pub const BLOCK_BYTES: u64 = 64;

/// Size of one packed block in bits.
pub const BLOCK_BITS: u64 = BLOCK_BYTES * 8;

/// Bits per packed displacement value.
pub const VALUE_BITS: u32 = 11;

/// Largest packed displacement value (unorm 1.0).
pub const VALUE_MAX: u32 = (1 << VALUE_BITS) - 1;

/// Work items per compress work group. One group covers one full block.
pub const COMPRESS_WORKGROUP_SIZE: u32 = 45;

/// Size of one [`MicromapTriangle`] record in bytes.
pub const TRIANGLE_RECORD_BYTES: u64 = 8;

const _: () = assert!(MICRO_VERTS_PER_BLOCK as u64 * VALUE_BITS as u64 <= BLOCK_BITS);

/// Displacement micromap encodings known to the device.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplacementFormat {
    /// 64 micro-triangles in 64 bytes. The only format written here.
    Triangles64Bytes64 = 1,
    Triangles256Bytes128 = 2,
    Triangles1024Bytes128 = 3,
}

impl DisplacementFormat {
    /// Parse a raw format tag.
    pub const fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::Triangles64Bytes64),
            2 => Some(Self::Triangles256Bytes128),
            3 => Some(Self::Triangles1024Bytes128),
            _ => None,
        }
    }
}

/// Micro-vertices on a triangle subdivided `level` times.
#[inline]
pub const fn micro_verts_per_triangle(level: u32) -> u32 {
    let edge = (1 << level) + 1;
    edge * (edge + 1) / 2
}

/// Micro-triangles on a triangle subdivided `level` times.
#[inline]
pub const fn micro_triangles_per_triangle(level: u32) -> u32 {
    1 << (2 * level)
}

/// Packed blocks per base triangle.
#[inline]
pub const fn blocks_per_triangle(level: u32) -> u32 {
    if level <= BLOCK_SUBDIVISION_LEVEL {
        1
    } else {
        1 << (2 * (level - BLOCK_SUBDIVISION_LEVEL))
    }
}

/// Micro-vertices stored per block. Below level 3 a block is only partly used.
#[inline]
pub const fn micro_verts_per_block(level: u32) -> u32 {
    let verts = micro_verts_per_triangle(level);
    if verts < MICRO_VERTS_PER_BLOCK {
        verts
    } else {
        MICRO_VERTS_PER_BLOCK
    }
}

/// Bytes of packed displacement data for `triangle_count` triangles.
#[inline]
pub const fn packed_values_size(triangle_count: u32, level: u32) -> u64 {
    triangle_count as u64 * blocks_per_triangle(level) as u64 * BLOCK_BYTES
}

/// Bytes of triangle records for `triangle_count` triangles.
#[inline]
pub const fn triangle_records_size(triangle_count: u32) -> u64 {
    triangle_count as u64 * TRIANGLE_RECORD_BYTES
}

/// Total compress work items: one per stored micro-vertex.
#[inline]
pub const fn work_item_count(triangle_count: u32, level: u32) -> u64 {
    triangle_count as u64 * blocks_per_triangle(level) as u64 * micro_verts_per_block(level) as u64
}

/// Work groups needed to cover `work_items`.
#[inline]
pub const fn group_count(work_items: u64) -> u64 {
    crate::util::div_ceil(work_items, COMPRESS_WORKGROUP_SIZE as u64)
}

/// Quantize a height in `[0, 1]` to an 11-bit unorm value.
///
/// Out-of-range inputs clamp; NaN maps to zero.
#[inline]
pub fn quantize(height: f32) -> u32 {
    (height * VALUE_MAX as f32).round().clamp(0.0, VALUE_MAX as f32) as u32
}

/// Inverse of [`quantize`].
#[inline]
pub fn dequantize(value: u32) -> f32 {
    value as f32 / VALUE_MAX as f32
}

/// Bit offset of a micro-vertex value within the packed data.
///
/// `global_block` is `triangle * blocks_per_triangle + block`.
#[inline]
pub const fn value_bit_offset(global_block: u64, vertex: u32) -> u64 {
    global_block * BLOCK_BITS + vertex as u64 * VALUE_BITS as u64
}

/// Read one packed 11-bit value back out of little-endian packed bytes.
///
/// Returns `None` when the value lies outside `bytes`.
pub fn read_packed_value(bytes: &[u8], global_block: u64, vertex: u32) -> Option<u16> {
    let bit = value_bit_offset(global_block, vertex);
    let last_bit = bit + VALUE_BITS as u64 - 1;
    if last_bit / 8 >= bytes.len() as u64 {
        return None;
    }

    let byte = (bit / 32 * 4) as usize;
    if byte + 4 > bytes.len() {
        return None;
    }
    let lo = LittleEndian::read_u32(&bytes[byte..byte + 4]) as u64;
    let hi = if byte + 8 <= bytes.len() {
        LittleEndian::read_u32(&bytes[byte + 4..byte + 8]) as u64
    } else {
        0
    };
    let word = lo | (hi << 32);
    Some(((word >> (bit % 32)) & VALUE_MAX as u64) as u16)
}

/// Per-triangle metadata record consumed by the micromap build.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MicromapTriangle {
    /// Byte offset of the triangle's first block in the packed data.
    pub data_offset: u32,
    pub subdivision_level: u16,
    /// Raw [`DisplacementFormat`] tag.
    pub format: u16,
}

impl MicromapTriangle {
    /// Record for base triangle `triangle` at `level`.
    pub const fn for_triangle(triangle: u32, level: u32) -> Self {
        Self {
            data_offset: triangle * blocks_per_triangle(level) * BLOCK_BYTES as u32,
            subdivision_level: level as u16,
            format: DisplacementFormat::Triangles64Bytes64 as u16,
        }
    }

    /// Record as the two little-endian words it occupies on the device.
    pub const fn to_words(self) -> [u32; 2] {
        [
            self.data_offset,
            self.subdivision_level as u32 | (self.format as u32) << 16,
        ]
    }

    pub const fn from_words(words: [u32; 2]) -> Self {
        Self {
            data_offset: words[0],
            subdivision_level: (words[1] & 0xffff) as u16,
            format: (words[1] >> 16) as u16,
        }
    }
}

/// Histogram entry: how many triangles use one (level, format) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MicromapUsage {
    pub count: u32,
    pub subdivision_level: u32,
    pub format: u32,
}
