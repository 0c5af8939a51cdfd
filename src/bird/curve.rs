//! Bird-curve traversal of a subdivided triangle.
//!
//! Micro-triangles are numbered along a space-filling curve; micro-vertices
//! are numbered hierarchically so that the vertices of a coarser level form
//! a prefix of every finer level.

use std::collections::HashSet;

use bytemuck::{Pod, Zeroable};

use crate::format::micro_verts_per_triangle;
use crate::util::IVec2;

/// Integer barycentric coordinate of a micro-vertex.
///
/// Coordinates are scaled by `2^level`; the third coordinate is implied as
/// `2^level - u - v`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct BaryUv16 {
    pub u: u8,
    pub v: u8,
}

impl BaryUv16 {
    #[inline]
    pub const fn new(u: u8, v: u8) -> Self {
        Self { u, v }
    }
}

#[inline]
fn extract_even_bits(mut x: u32) -> u32 {
    x &= 0x5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333;
    x = (x | (x >> 2)) & 0x0f0f_0f0f;
    x = (x | (x >> 4)) & 0x00ff_00ff;
    x = (x | (x >> 8)) & 0x0000_ffff;
    x
}

/// Exclusive-or prefix scan over bits, from high to low.
#[inline]
fn prefix_eor(mut x: u32) -> u32 {
    x ^= (x >> 1) & 0x7fff_7fff;
    x ^= (x >> 2) & 0x3fff_3fff;
    x ^= (x >> 4) & 0x0fff_0fff;
    x ^= (x >> 8) & 0x00ff_00ff;
    x
}

/// Discrete barycentric row coordinates `(u, v, w)` of a curve index.
///
/// Only the low `level` bits of each coordinate are meaningful.
pub fn index_to_dbary(index: u32) -> (u32, u32, u32) {
    let b0 = extract_even_bits(index);
    let b1 = extract_even_bits(index >> 1);

    let fx = prefix_eor(b0);
    let fy = prefix_eor(b0 & !b1);
    let t = fy ^ b1;

    let u = (fx & !t) | (b0 & !t) | (!b0 & !fx & t);
    let v = fy ^ b0;
    let w = (!fx & !t) | (b0 & !t) | (!b0 & fx & t);
    (u, v, w)
}

/// Corners of micro-triangle `index` on a triangle subdivided `level` times.
///
/// Corners are integer `(u, v)` coordinates at scale `2^level`, listed in the
/// orientation of the base triangle for upright micro-triangles and flipped
/// for inverted ones.
pub fn micro_triangle(index: u32, level: u32) -> [IVec2; 3] {
    if level == 0 {
        return [IVec2::new(0, 0), IVec2::new(1, 0), IVec2::new(0, 1)];
    }

    let (u, v, w) = index_to_dbary(index);
    let mask = (1u32 << level) - 1;
    let (u, v, w) = (u & mask, v & mask, w & mask);

    let upright = (u ^ v ^ w) & 1 == 1;
    let (u, v, d) = if upright {
        (u as i32, v as i32, 1)
    } else {
        (u as i32 + 1, v as i32 + 1, -1)
    };

    [IVec2::new(u, v), IVec2::new(u + d, v), IVec2::new(u, v + d)]
}

/// Hierarchical micro-vertex order for a triangle subdivided `level` times.
///
/// Starts with the three base corners, then for each finer level walks the
/// coarser micro-triangles along the curve and appends their unseen edge
/// midpoints.
pub fn vertex_order(level: u32) -> Vec<BaryUv16> {
    let size = 1i32 << level;
    let mut order = Vec::with_capacity(micro_verts_per_triangle(level) as usize);
    let mut seen = HashSet::new();

    for corner in [IVec2::new(0, 0), IVec2::new(size, 0), IVec2::new(0, size)] {
        push_unseen(&mut order, &mut seen, corner);
    }

    for sub in 1..=level {
        let parent = sub - 1;
        let scale = 1i32 << (level - parent);
        for index in 0..(1u32 << (2 * parent)) {
            let [a, b, c] = micro_triangle(index, parent).map(|p| p * scale);
            for (p, q) in [(a, b), (b, c), (c, a)] {
                push_unseen(&mut order, &mut seen, (p + q) / 2);
            }
        }
    }

    order
}

fn push_unseen(order: &mut Vec<BaryUv16>, seen: &mut HashSet<IVec2>, p: IVec2) {
    if seen.insert(p) {
        order.push(BaryUv16::new(p.x as u8, p.y as u8));
    }
}
