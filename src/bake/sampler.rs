//! Height sources for the compress kernel.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::util::{Error, Result, Vec2, Vec3};

/// Scalar height lookup at a micro-vertex.
///
/// `triangle` is the base triangle index, `bary` the micro-vertex's
/// barycentrics `(w, u, v)`, and `tex_coord` the interpolated texture
/// coordinate. Heights are expected in `[0, 1]`; the kernel clamps.
pub trait HeightSampler: Send + Sync {
    fn sample(&self, triangle: u32, bary: Vec3, tex_coord: Vec2) -> f32;
}

impl<F> HeightSampler for F
where
    F: Fn(u32, Vec3, Vec2) -> f32 + Send + Sync,
{
    fn sample(&self, triangle: u32, bary: Vec3, tex_coord: Vec2) -> f32 {
        self(triangle, bary, tex_coord)
    }
}

/// Same height everywhere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantHeight(pub f32);

impl HeightSampler for ConstantHeight {
    fn sample(&self, _: u32, _: Vec3, _: Vec2) -> f32 {
        self.0
    }
}

/// Texel filtering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Out-of-range texture coordinate handling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMode {
    #[default]
    Repeat,
    ClampToEdge,
}

/// Sampler state bound alongside a heightmap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub address: AddressMode,
}

/// Single-channel float heightmap sampled by texture coordinate.
#[derive(Clone, Debug)]
pub struct Heightmap {
    width: u32,
    height: u32,
    texels: Vec<f32>,
    sampler: SamplerDesc,
}

impl Heightmap {
    /// Heightmap from row-major texels.
    pub fn new(width: u32, height: u32, texels: Vec<f32>, sampler: SamplerDesc) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidHeightmap(format!(
                "empty heightmap {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize;
        if texels.len() != expected {
            return Err(Error::InvalidHeightmap(format!(
                "expected {} texels for {}x{}, got {}",
                expected,
                width,
                height,
                texels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            texels,
            sampler,
        })
    }

    /// 1x1 heightmap.
    pub fn flat(value: f32) -> Self {
        Self {
            width: 1,
            height: 1,
            texels: vec![value],
            sampler: SamplerDesc::default(),
        }
    }

    /// Luminance of a decoded image, normalized to `[0, 1]`.
    pub fn from_image(image: &image::DynamicImage, sampler: SamplerDesc) -> Result<Self> {
        let luma = image.to_luma32f();
        let (width, height) = luma.dimensions();
        Self::new(width, height, luma.into_raw(), sampler)
    }

    /// Load and decode an image file.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, sampler: SamplerDesc) -> Result<Self> {
        let image = image::open(path.as_ref())?;
        let map = Self::from_image(&image, sampler)?;
        tracing::debug!(width = map.width, height = map.height, "loaded heightmap");
        Ok(map)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sampler(&self) -> SamplerDesc {
        self.sampler
    }

    /// Texel at integer coordinates after address-mode resolution.
    pub fn texel(&self, x: i64, y: i64) -> f32 {
        let x = resolve_coord(x, self.width, self.sampler.address);
        let y = resolve_coord(y, self.height, self.sampler.address);
        self.texels[y * self.width as usize + x]
    }

    /// Filtered lookup at a normalized texture coordinate.
    ///
    /// Coordinates are reduced to `[0, 1]` by the address mode first, so any
    /// finite input stays in texel range; non-finite components sample at 0.
    pub fn sample_uv(&self, uv: Vec2) -> f32 {
        let x = self.reduce(uv.x) * self.width as f32;
        let y = self.reduce(uv.y) * self.height as f32;
        match self.sampler.filter {
            FilterMode::Nearest => self.texel(x.floor() as i64, y.floor() as i64),
            FilterMode::Linear => {
                let (x, y) = (x - 0.5, y - 0.5);
                let (x0, y0) = (x.floor(), y.floor());
                let (fx, fy) = (x - x0, y - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);
                let top = lerp(self.texel(x0, y0), self.texel(x0 + 1, y0), fx);
                let bottom = lerp(self.texel(x0, y0 + 1), self.texel(x0 + 1, y0 + 1), fx);
                lerp(top, bottom, fy)
            }
        }
    }
}

impl Heightmap {
    fn reduce(&self, c: f32) -> f32 {
        if !c.is_finite() {
            return 0.0;
        }
        match self.sampler.address {
            AddressMode::Repeat => c.rem_euclid(1.0),
            AddressMode::ClampToEdge => c.clamp(0.0, 1.0),
        }
    }
}

impl HeightSampler for Heightmap {
    fn sample(&self, _triangle: u32, _bary: Vec3, tex_coord: Vec2) -> f32 {
        self.sample_uv(tex_coord)
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn resolve_coord(c: i64, size: u32, mode: AddressMode) -> usize {
    let size = size as i64;
    match mode {
        AddressMode::Repeat => c.rem_euclid(size) as usize,
        AddressMode::ClampToEdge => c.clamp(0, size - 1) as usize,
    }
}
