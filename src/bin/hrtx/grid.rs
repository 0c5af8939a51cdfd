//! Flat grid mesh over the unit square.

use half::f16;

/// Mesh data in the layouts the baker consumes.
#[derive(Debug, Clone)]
pub struct GridMesh {
    pub indices: Vec<u32>,
    /// One `[u, v]` per vertex.
    pub tex_coords: Vec<[f32; 2]>,
    /// One `+Z` direction per vertex, half precision with padding.
    pub directions: Vec<[f16; 4]>,
}

impl GridMesh {
    /// `quads x quads` grid, two triangles per quad.
    pub fn new(quads: u32) -> Self {
        let side = quads + 1;
        let mut tex_coords = Vec::with_capacity((side * side) as usize);
        for y in 0..side {
            for x in 0..side {
                tex_coords.push([x as f32 / quads as f32, y as f32 / quads as f32]);
            }
        }

        let mut indices = Vec::with_capacity((quads * quads * 6) as usize);
        for y in 0..quads {
            for x in 0..quads {
                let i = y * side + x;
                indices.extend_from_slice(&[i, i + 1, i + side]);
                indices.extend_from_slice(&[i + 1, i + side + 1, i + side]);
            }
        }

        let up = [f16::ZERO, f16::ZERO, f16::ONE, f16::ZERO];
        let directions = vec![up; tex_coords.len()];

        Self {
            indices,
            tex_coords,
            directions,
        }
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }
}
