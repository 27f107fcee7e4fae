//! Capabilities a backend offers to the pipeline and to the host.

use glam::Vec4;

use crate::image::{Image, ImageDesc};
use crate::pass::{PassError, PassRunner};
use crate::pool::{BufferPool, PoolError};

/// A backend that owns images and runs passes on them.
///
/// Stages take `&B where B: Backend` so the same code drives the CPU
/// reference backend, the wgpu backend, and test doubles.
pub trait Backend: BufferPool + PassRunner {}

impl<T: BufferPool + PassRunner + ?Sized> Backend for T {}

/// Host-facing image management: the frame's source and destination are
/// created and filled through this, outside the temporary pool.
pub trait HostImages {
    /// Create a long-lived image. It is not counted by the pool.
    fn create_image(&self, desc: ImageDesc) -> Result<Image, PoolError>;

    /// Upload linear RGBA texels, row-major from the top-left corner.
    /// Values are quantized to the image's format.
    fn write_pixels(&self, image: &Image, pixels: &[Vec4]) -> Result<(), PassError>;

    /// Download the image's texels, row-major from the top-left corner.
    fn read_pixels(&self, image: &Image) -> Result<Vec<Vec4>, PassError>;

    /// Free an image created with [`create_image`](Self::create_image).
    fn destroy_image(&self, image: Image);
}
