//! Texel storage and texture sampling for the CPU backend.

use glam::{Vec2, Vec4};

use crate::image::{Extent, FilterMode, PixelFormat};

/// Round every channel to what `format` can store.
pub fn quantize(color: Vec4, format: PixelFormat) -> Vec4 {
    match format {
        PixelFormat::Rgba8Unorm => {
            (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0
        }
        PixelFormat::Rgba16Float => Vec4::from_array(
            color
                .to_array()
                .map(|c| half::f16::from_f32(c).to_f32()),
        ),
    }
}

/// Read-only view of an image for sampling in normalized coordinates.
///
/// Coordinates outside \[0, 1\] clamp to the edge texels.
#[derive(Clone, Copy)]
pub struct Sampler<'a> {
    texels: &'a [Vec4],
    extent: Extent,
    filter: FilterMode,
}

impl<'a> Sampler<'a> {
    pub fn new(texels: &'a [Vec4], extent: Extent, filter: FilterMode) -> Self {
        debug_assert_eq!(texels.len() as u64, extent.area());
        Self {
            texels,
            extent,
            filter,
        }
    }

    /// Size of one texel in normalized coordinates.
    pub fn texel_size(&self) -> Vec2 {
        Vec2::new(1.0 / self.extent.width as f32, 1.0 / self.extent.height as f32)
    }

    pub fn sample(&self, uv: Vec2) -> Vec4 {
        match self.filter {
            FilterMode::Nearest => self.nearest(uv),
            FilterMode::Bilinear => self.bilinear(uv),
        }
    }

    fn texel(&self, x: i64, y: i64) -> Vec4 {
        let x = x.clamp(0, i64::from(self.extent.width) - 1) as usize;
        let y = y.clamp(0, i64::from(self.extent.height) - 1) as usize;
        self.texels[y * self.extent.width as usize + x]
    }

    fn nearest(&self, uv: Vec2) -> Vec4 {
        let x = (uv.x * self.extent.width as f32).floor() as i64;
        let y = (uv.y * self.extent.height as f32).floor() as i64;
        self.texel(x, y)
    }

    fn bilinear(&self, uv: Vec2) -> Vec4 {
        let p = uv * Vec2::new(self.extent.width as f32, self.extent.height as f32) - 0.5;
        let base = p.floor();
        let f = p - base;
        let (x, y) = (base.x as i64, base.y as i64);

        let top = self.texel(x, y).lerp(self.texel(x + 1, y), f.x);
        let bottom = self.texel(x, y + 1).lerp(self.texel(x + 1, y + 1), f.x);
        top.lerp(bottom, f.y)
    }
}

/// Normalized coordinate of the center of texel (`x`, `y`).
pub fn texel_center(x: u32, y: u32, extent: Extent) -> Vec2 {
    Vec2::new(
        (x as f32 + 0.5) / extent.width as f32,
        (y as f32 + 0.5) / extent.height as f32,
    )
}
