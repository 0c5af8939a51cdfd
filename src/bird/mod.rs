//! Micro-vertex ordering for displacement blocks.
//!
//! - [`curve`] - Bird-curve micro-triangle traversal and vertex order
//! - [`table`] - The block-to-barycentric table used by the compress kernel

pub mod curve;
pub mod table;

pub use curve::{index_to_dbary, micro_triangle, vertex_order, BaryUv16};
pub use table::{
    resolve_bary, BirdCurveTables, BlockToBirdUvTable, BIRD_LEVEL_OFFSETS, BIRD_TABLE_ENTRIES,
    BIRD_TABLE_LEN,
};
