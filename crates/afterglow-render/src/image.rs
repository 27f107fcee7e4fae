//! Image handles and descriptors shared by every backend.
//!
//! An [`Image`] is an opaque handle: the pixels live in whichever backend
//! created it. Handles are deliberately not `Copy` so a temporary can only be
//! released once; passes refer to images by `&Image` and textures bound as
//! parameters by [`ImageId`].

use std::fmt;

/// Pixel storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8 bits per channel, normalized to \[0, 1\].
    Rgba8Unorm,
    /// 16-bit float per channel; holds HDR values.
    Rgba16Float,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            PixelFormat::Rgba8Unorm => 4,
            PixelFormat::Rgba16Float => 8,
        }
    }
}

/// How an image is sampled when read at a different resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    /// Closest texel.
    Nearest,
    /// Weighted average of the four closest texels.
    #[default]
    Bilinear,
}

/// Width and height in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of texels.
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Divide both axes by `factor` (floor), never going below 1×1.
    ///
    /// A factor of 0 is treated as 1.
    pub fn downsampled(self, factor: u32) -> Self {
        let factor = factor.max(1);
        Self {
            width: (self.width / factor).max(1),
            height: (self.height / factor).max(1),
        }
    }

    /// Halve both axes `level` times, never going below 1×1.
    pub fn mip(self, level: u32) -> Self {
        Self {
            width: self.width.checked_shr(level).unwrap_or(0).max(1),
            height: self.height.checked_shr(level).unwrap_or(0).max(1),
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Dimensions of pyramid level `level` for a `source` image blurred at
/// `downsample`: `max(1, floor(source / downsample) >> level)` per axis.
pub fn level_extent(source: Extent, downsample: u32, level: u32) -> Extent {
    let base = Extent {
        width: source.width / downsample.max(1),
        height: source.height / downsample.max(1),
    };
    base.mip(level)
}

/// Size, format, and sampling of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub extent: Extent,
    pub format: PixelFormat,
    pub filter: FilterMode,
}

impl ImageDesc {
    /// Descriptor with bilinear filtering.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            extent: Extent::new(width, height),
            format,
            filter: FilterMode::Bilinear,
        }
    }

    /// Same descriptor with a different filter mode.
    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    /// Same format and filter at another size.
    pub fn with_extent(mut self, extent: Extent) -> Self {
        self.extent = extent;
        self
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    /// Storage size in bytes.
    pub fn byte_size(&self) -> u64 {
        self.extent.area() * self.format.bytes_per_pixel()
    }
}

/// Backend-assigned identity of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u32);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image#{}", self.0)
    }
}

/// Handle to a backend-owned 2D pixel buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Image {
    id: ImageId,
    desc: ImageDesc,
}

impl Image {
    /// Only backends mint handles.
    pub(crate) fn new(id: ImageId, desc: ImageDesc) -> Self {
        Self { id, desc }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn extent(&self) -> Extent {
        self.desc.extent
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    pub fn filter(&self) -> FilterMode {
        self.desc.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsampled_floors_and_clamps() {
        assert_eq!(Extent::new(100, 100).downsampled(3), Extent::new(33, 33));
        assert_eq!(Extent::new(5, 2).downsampled(8), Extent::new(1, 1));
        assert_eq!(Extent::new(64, 32).downsampled(0), Extent::new(64, 32));
    }

    #[test]
    fn test_level_extent_halves_each_level() {
        let source = Extent::new(1920, 1080);
        let expected = [(960, 540), (480, 270), (240, 135), (120, 67), (60, 33)];
        for (level, &(w, h)) in expected.iter().enumerate() {
            assert_eq!(
                level_extent(source, 2, level as u32),
                Extent::new(w, h),
                "level {level} dimensions mismatch"
            );
        }
    }

    #[test]
    fn test_level_extent_never_below_one() {
        for width in [1u32, 2, 3, 7, 15, 33, 100, 255, 1024, 4097] {
            for height in [1u32, 2, 5, 9, 64, 333, 2160] {
                for downsample in 1..=8 {
                    for level in 0..=9 {
                        let e = level_extent(Extent::new(width, height), downsample, level);
                        assert!(
                            e.width >= 1 && e.height >= 1,
                            "{width}x{height} /{downsample} >>{level} = {e}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_level_extent_survives_huge_shift() {
        assert_eq!(
            level_extent(Extent::new(u32::MAX, 7), 1, 40),
            Extent::new(1, 1)
        );
    }

    #[test]
    fn test_byte_size() {
        let desc = ImageDesc::new(16, 8, PixelFormat::Rgba16Float);
        assert_eq!(desc.byte_size(), 16 * 8 * 8);
        assert_eq!(
            ImageDesc::new(16, 8, PixelFormat::Rgba8Unorm).byte_size(),
            16 * 8 * 4
        );
    }

    #[test]
    fn test_new_desc_is_bilinear() {
        let desc = ImageDesc::new(4, 4, PixelFormat::Rgba8Unorm);
        assert_eq!(desc.filter, FilterMode::Bilinear);
        assert_eq!(
            desc.with_filter(FilterMode::Nearest).filter,
            FilterMode::Nearest
        );
    }
}
