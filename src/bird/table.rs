//! Block-to-barycentric lookup table.
//!
//! Levels 0-3 fit in a single block and store their hierarchical vertex
//! order directly. Levels 4 and 5 split each triangle into 4 or 16 blocks
//! (the level-1/level-2 micro-triangles in curve order); each block lists
//! its 45 micro-vertices in the level-3 local order, remapped to coordinates
//! on the full triangle.

use std::sync::OnceLock;

use super::curve::{micro_triangle, vertex_order, BaryUv16};
use crate::format::{
    blocks_per_triangle, micro_verts_per_triangle, BLOCK_SUBDIVISION_LEVEL,
    MAX_SUBDIVISION_LEVEL, MICRO_VERTS_PER_BLOCK,
};
use crate::util::{IVec2, Vec3};

/// Start of each level's entries in [`BlockToBirdUvTable`].
pub const BIRD_LEVEL_OFFSETS: [usize; 6] = [0, 3, 9, 24, 69, 249];

/// Meaningful entries in [`BlockToBirdUvTable`].
pub const BIRD_TABLE_ENTRIES: usize = 969;

/// Stored entries, padded to a whole number of 32-bit words.
pub const BIRD_TABLE_LEN: usize = BIRD_TABLE_ENTRIES + 1;

const _: () = assert!(BIRD_LEVEL_OFFSETS[4] + 4 * MICRO_VERTS_PER_BLOCK as usize == BIRD_LEVEL_OFFSETS[5]);
const _: () = assert!(BIRD_LEVEL_OFFSETS[5] + 16 * MICRO_VERTS_PER_BLOCK as usize == BIRD_TABLE_ENTRIES);
const _: () = assert!(BIRD_TABLE_LEN * 2 % 4 == 0);

/// Hierarchical vertex orders for every level plus the block index maps.
#[derive(Clone, Debug)]
pub struct BirdCurveTables {
    /// Vertex orders for levels 0-5, concatenated.
    pub vertex_to_bary: Vec<BaryUv16>,
    /// Start of each level in `vertex_to_bary`.
    pub level_offsets: [usize; 6],
    /// Block-local to level-global vertex indices: 4 level-4 blocks, then 16 level-5 blocks.
    pub block_local_to_global: Vec<[u32; MICRO_VERTS_PER_BLOCK as usize]>,
}

impl BirdCurveTables {
    pub fn generate() -> Self {
        let mut vertex_to_bary = Vec::new();
        let mut level_offsets = [0usize; 6];
        for level in 0..=MAX_SUBDIVISION_LEVEL {
            level_offsets[level as usize] = vertex_to_bary.len();
            vertex_to_bary.extend(vertex_order(level));
        }

        let local = vertex_order(BLOCK_SUBDIVISION_LEVEL);
        let mut block_local_to_global = Vec::new();
        for level in BLOCK_SUBDIVISION_LEVEL + 1..=MAX_SUBDIVISION_LEVEL {
            let start = level_offsets[level as usize];
            let global = &vertex_to_bary[start..start + micro_verts_per_triangle(level) as usize];
            block_local_to_global.extend(block_maps(level, &local, global));
        }

        Self {
            vertex_to_bary,
            level_offsets,
            block_local_to_global,
        }
    }
}

/// Local-to-global maps for every block of a level above 3.
fn block_maps(
    level: u32,
    local: &[BaryUv16],
    global: &[BaryUv16],
) -> Vec<[u32; MICRO_VERTS_PER_BLOCK as usize]> {
    let size = 1usize << level;
    let stride = size + 1;
    let mut inverse = vec![u32::MAX; stride * stride];
    for (i, p) in global.iter().enumerate() {
        inverse[p.v as usize * stride + p.u as usize] = i as u32;
    }

    let block_level = level - BLOCK_SUBDIVISION_LEVEL;
    let block_size = 1i32 << BLOCK_SUBDIVISION_LEVEL;
    (0..blocks_per_triangle(level))
        .map(|block| {
            let [c0, c1, c2] = micro_triangle(block, block_level);
            let mut map = [0u32; MICRO_VERTS_PER_BLOCK as usize];
            for (slot, uv) in map.iter_mut().zip(local) {
                let (lu, lv) = (uv.u as i32, uv.v as i32);
                let lw = block_size - lu - lv;
                let p: IVec2 = c0 * lw + c1 * lu + c2 * lv;
                let index = inverse[p.y as usize * stride + p.x as usize];
                debug_assert_ne!(index, u32::MAX, "block vertex {p:?} missing at level {level}");
                *slot = index;
            }
            map
        })
        .collect()
}

/// Flattened lookup from (level, block, block-local vertex) to barycentrics.
///
/// This is the table the compress kernel consults; its bytes are uploaded
/// verbatim to the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockToBirdUvTable {
    entries: Box<[BaryUv16]>,
}

static GLOBAL_TABLE: OnceLock<BlockToBirdUvTable> = OnceLock::new();

impl BlockToBirdUvTable {
    /// Flatten generated tables into the per-block layout.
    pub fn build(tables: &BirdCurveTables) -> Self {
        let offsets = &tables.level_offsets;
        let mut entries = Vec::with_capacity(BIRD_TABLE_LEN);
        entries.extend_from_slice(&tables.vertex_to_bary[..offsets[BLOCK_SUBDIVISION_LEVEL as usize + 1]]);

        let mut maps = tables.block_local_to_global.iter();
        for level in BLOCK_SUBDIVISION_LEVEL + 1..=MAX_SUBDIVISION_LEVEL {
            let global = &tables.vertex_to_bary[offsets[level as usize]..];
            for map in maps.by_ref().take(blocks_per_triangle(level) as usize) {
                entries.extend(map.iter().map(|&g| global[g as usize]));
            }
        }

        debug_assert_eq!(entries.len(), BIRD_TABLE_ENTRIES);
        entries.resize(BIRD_TABLE_LEN, BaryUv16::default());
        Self {
            entries: entries.into_boxed_slice(),
        }
    }

    /// Process-wide table, generated on first use.
    pub fn global() -> &'static Self {
        GLOBAL_TABLE.get_or_init(|| Self::build(&BirdCurveTables::generate()))
    }

    /// All entries including the trailing padding entry.
    pub fn entries(&self) -> &[BaryUv16] {
        &self.entries
    }

    /// Raw bytes for device upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.entries)
    }

    /// Integer barycentrics of a block-local micro-vertex.
    pub fn lookup(&self, block: u32, vertex: u32, level: u32) -> Option<BaryUv16> {
        lookup_in(&self.entries, block, vertex, level)
    }

    /// Normalized barycentrics `(w, u, v)` of a block-local micro-vertex.
    ///
    /// # Panics
    ///
    /// Panics if `block` or `vertex` is out of range for `level`.
    pub fn resolve_bary(&self, block: u32, vertex: u32, level: u32) -> Vec3 {
        resolve_bary_in(&self.entries, block, vertex, level)
    }
}

pub(crate) fn lookup_in(entries: &[BaryUv16], block: u32, vertex: u32, level: u32) -> Option<BaryUv16> {
    if level > MAX_SUBDIVISION_LEVEL
        || block >= blocks_per_triangle(level)
        || vertex >= crate::format::micro_verts_per_block(level)
    {
        return None;
    }
    let index = BIRD_LEVEL_OFFSETS[level as usize]
        + block as usize * MICRO_VERTS_PER_BLOCK as usize
        + vertex as usize;
    entries.get(index).copied()
}

/// [`BlockToBirdUvTable::resolve_bary`] over a raw entry slice.
pub(crate) fn resolve_bary_in(entries: &[BaryUv16], block: u32, vertex: u32, level: u32) -> Vec3 {
    let level = level.min(MAX_SUBDIVISION_LEVEL);
    let index = BIRD_LEVEL_OFFSETS[level as usize]
        + block as usize * MICRO_VERTS_PER_BLOCK as usize
        + vertex as usize;
    let uv = entries[index];
    let max = (1u32 << level) as f32;
    let (u, v) = (uv.u as f32, uv.v as f32);
    Vec3::new((max - u - v) / max, u / max, v / max)
}

/// Normalized barycentrics from the process-wide table.
pub fn resolve_bary(block: u32, vertex: u32, level: u32) -> Vec3 {
    BlockToBirdUvTable::global().resolve_bary(block, vertex, level)
}
