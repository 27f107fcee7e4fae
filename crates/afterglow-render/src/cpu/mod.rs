//! Reference backend that runs every pass on the CPU.
//!
//! Images are `Vec<Vec4>` in linear RGBA, quantized to their pixel format
//! on every write, so 8-bit images behave like 8-bit render targets. Rows
//! are shaded in parallel with rayon.
//!
//! The backend can record a log of the passes it runs, which is how tests
//! check pass order and buffer routing without a GPU.

mod programs;
mod sampler;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use glam::Vec4;
use rayon::prelude::*;

pub use programs::{GAUSSIAN_WEIGHTS, LUMA, aces_tonemap, rotate_hue, soft_threshold};
pub use sampler::{Sampler, quantize, texel_center};

use crate::backend::HostImages;
use crate::image::{Extent, Image, ImageDesc, ImageId};
use crate::pass::{Material, Param, ParamSet, PassError, PassRunner, Program, check_pass};
use crate::pool::{BufferPool, PoolError, PoolStats, StoragePool};
use programs::PassInputs;

/// What a recorded operation was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Pass { program: Program, pass: u32 },
    Blit,
}

/// One entry of the pass log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRecord {
    pub kind: PassKind,
    pub input: ImageId,
    pub output: ImageId,
    /// Image bound to `_BlurTargetTex`, if any.
    pub aux: Option<ImageId>,
    pub input_extent: Extent,
    pub output_extent: Extent,
}

#[derive(Clone)]
struct CpuImage {
    desc: ImageDesc,
    texels: Arc<Vec<Vec4>>,
    /// Created through `acquire`, as opposed to `create_image`.
    temporary: bool,
}

/// CPU implementation of [`BufferPool`], [`PassRunner`] and [`HostImages`].
pub struct CpuBackend {
    images: DashMap<ImageId, CpuImage>,
    storage: StoragePool<Vec<Vec4>>,
    next_id: AtomicU32,
    recording: AtomicBool,
    pass_log: Mutex<Vec<PassRecord>>,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    /// A backend with no memory budget.
    pub fn new() -> Self {
        Self {
            images: DashMap::new(),
            storage: StoragePool::new(None),
            next_id: AtomicU32::new(1),
            recording: AtomicBool::new(false),
            pass_log: Mutex::new(Vec::new()),
        }
    }

    /// A backend whose temporaries may use at most `bytes` of storage,
    /// counted at the images' pixel format size.
    pub fn with_memory_budget(bytes: u64) -> Self {
        Self {
            storage: StoragePool::new(Some(bytes)),
            ..Self::new()
        }
    }

    /// Start or stop recording passes into the pass log.
    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Relaxed);
    }

    /// Return and clear the recorded passes.
    pub fn take_pass_log(&self) -> Vec<PassRecord> {
        std::mem::take(&mut *lock(&self.pass_log))
    }

    /// Number of live images, host and temporary.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn mint(&self, desc: ImageDesc, texels: Vec<Vec4>, temporary: bool) -> Image {
        let id = ImageId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.images.insert(
            id,
            CpuImage {
                desc,
                texels: Arc::new(texels),
                temporary,
            },
        );
        Image::new(id, desc)
    }

    fn snapshot(&self, id: ImageId) -> Result<CpuImage, PassError> {
        self.images
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(PassError::UnknownImage(id))
    }

    /// Shade every texel of `output` with `shade` and store the quantized
    /// result.
    fn render<F>(&self, output: &Image, shade: F) -> Result<(), PassError>
    where
        F: Fn(glam::Vec2) -> Vec4 + Sync,
    {
        let (extent, format, storage) = {
            let mut entry = self
                .images
                .get_mut(&output.id())
                .ok_or(PassError::UnknownImage(output.id()))?;
            let storage = std::mem::take(&mut entry.texels);
            (entry.desc.extent, entry.desc.format, storage)
        };
        // Reuse the output's storage unless a snapshot still reads it.
        let mut texels = Arc::try_unwrap(storage)
            .unwrap_or_else(|_| vec![Vec4::ZERO; extent.area() as usize]);
        texels
            .par_chunks_mut(extent.width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, texel) in row.iter_mut().enumerate() {
                    let uv = texel_center(x as u32, y as u32, extent);
                    *texel = quantize(shade(uv), format);
                }
            });

        let mut entry = self
            .images
            .get_mut(&output.id())
            .ok_or(PassError::UnknownImage(output.id()))?;
        entry.texels = Arc::new(texels);
        Ok(())
    }

    fn record(&self, kind: PassKind, input: &Image, output: &Image, aux: Option<ImageId>) {
        if self.recording.load(Ordering::Relaxed) {
            lock(&self.pass_log).push(PassRecord {
                kind,
                input: input.id(),
                output: output.id(),
                aux,
                input_extent: input.extent(),
                output_extent: output.extent(),
            });
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BufferPool for CpuBackend {
    fn acquire(&self, desc: ImageDesc) -> Result<Image, PoolError> {
        let texels = self
            .storage
            .obtain(&desc, || Ok(vec![Vec4::ZERO; desc.extent.area() as usize]))?;
        Ok(self.mint(desc, texels, true))
    }

    fn release(&self, image: Image) {
        let Some((_, entry)) = self.images.remove(&image.id()) else {
            log::warn!("release of unknown {}", image.id());
            return;
        };
        debug_assert!(entry.temporary, "released host image {}", image.id());
        // Keep the storage only if no snapshot still shares it.
        match Arc::try_unwrap(entry.texels) {
            Ok(texels) => self.storage.recycle(&entry.desc, texels),
            Err(_) => self.storage.forget(&entry.desc),
        }
    }

    fn trim(&self) {
        let count = self.storage.trim();
        if count > 0 {
            log::debug!("trimmed {count} pooled images");
        }
    }

    fn stats(&self) -> PoolStats {
        self.storage.stats()
    }
}

impl PassRunner for CpuBackend {
    fn load_material(&self, program: Program) -> Result<Material, PassError> {
        Ok(Material::new(program))
    }

    fn run_pass(
        &self,
        material: &Material,
        pass: u32,
        input: &Image,
        output: &Image,
        params: &ParamSet,
    ) -> Result<(), PassError> {
        check_pass(material, pass)?;
        let shader = programs::shader(material.program(), pass).ok_or(PassError::UnknownPass {
            program: material.program(),
            pass,
        })?;

        let source = self.snapshot(input.id())?;
        let aux_id = params.texture(Param::BlurTargetTex);
        let aux = aux_id.map(|id| self.snapshot(id)).transpose()?;

        let ctx = PassInputs {
            input: Sampler::new(&source.texels, source.desc.extent, source.desc.filter),
            aux: aux
                .as_ref()
                .map(|aux| Sampler::new(&aux.texels, aux.desc.extent, aux.desc.filter)),
            params,
        };
        self.render(output, |uv| shader(&ctx, uv))?;

        self.record(
            PassKind::Pass {
                program: material.program(),
                pass,
            },
            input,
            output,
            aux_id,
        );
        Ok(())
    }

    fn blit(&self, input: &Image, output: &Image) -> Result<(), PassError> {
        let source = self.snapshot(input.id())?;
        let sampler = Sampler::new(&source.texels, source.desc.extent, source.desc.filter);
        self.render(output, |uv| sampler.sample(uv))?;
        self.record(PassKind::Blit, input, output, None);
        Ok(())
    }
}

impl HostImages for CpuBackend {
    fn create_image(&self, desc: ImageDesc) -> Result<Image, PoolError> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(PoolError::ZeroSized {
                extent: desc.extent,
            });
        }
        Ok(self.mint(desc, vec![Vec4::ZERO; desc.extent.area() as usize], false))
    }

    fn write_pixels(&self, image: &Image, pixels: &[Vec4]) -> Result<(), PassError> {
        let expected = image.extent().area() as usize;
        if pixels.len() != expected {
            return Err(PassError::SizeMismatch {
                actual: pixels.len(),
                expected,
                extent: image.extent(),
            });
        }
        let mut entry = self
            .images
            .get_mut(&image.id())
            .ok_or(PassError::UnknownImage(image.id()))?;
        let format = entry.desc.format;
        entry.texels = Arc::new(pixels.iter().map(|&p| quantize(p, format)).collect());
        Ok(())
    }

    fn read_pixels(&self, image: &Image) -> Result<Vec<Vec4>, PassError> {
        Ok(self.snapshot(image.id())?.texels.to_vec())
    }

    fn destroy_image(&self, image: Image) {
        if self.images.remove(&image.id()).is_none() {
            log::warn!("destroy of unknown {}", image.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{FilterMode, PixelFormat};
    use crate::pass::{blur_pass, bloom_pass};
    use crate::pool::acquire_temporary;

    fn host(backend: &CpuBackend, width: u32, height: u32, format: PixelFormat) -> Image {
        backend
            .create_image(ImageDesc::new(width, height, format))
            .unwrap()
    }

    #[test]
    fn test_write_read_quantizes_to_format() {
        let backend = CpuBackend::new();
        let unorm = host(&backend, 1, 1, PixelFormat::Rgba8Unorm);
        let float = host(&backend, 1, 1, PixelFormat::Rgba16Float);
        let hdr = [Vec4::new(3.0, 0.5, -1.0, 1.0)];

        backend.write_pixels(&unorm, &hdr).unwrap();
        backend.write_pixels(&float, &hdr).unwrap();

        let read = backend.read_pixels(&unorm).unwrap()[0];
        assert_eq!(read.x, 1.0);
        assert_eq!(read.z, 0.0);
        assert_eq!(backend.read_pixels(&float).unwrap()[0].x, 3.0);
    }

    #[test]
    fn test_write_rejects_wrong_length() {
        let backend = CpuBackend::new();
        let image = host(&backend, 4, 4, PixelFormat::Rgba8Unorm);
        let err = backend.write_pixels(&image, &[Vec4::ONE; 3]).unwrap_err();
        assert_eq!(
            err,
            PassError::SizeMismatch {
                actual: 3,
                expected: 16,
                extent: Extent::new(4, 4)
            }
        );
    }

    #[test]
    fn test_destroyed_image_is_unknown() {
        let backend = CpuBackend::new();
        let a = host(&backend, 2, 2, PixelFormat::Rgba8Unorm);
        let b = host(&backend, 2, 2, PixelFormat::Rgba8Unorm);
        let id = a.id();
        backend.destroy_image(a);
        assert_eq!(backend.image_count(), 1);
        let ghost = Image::new(id, ImageDesc::new(2, 2, PixelFormat::Rgba8Unorm));
        assert_eq!(backend.blit(&ghost, &b), Err(PassError::UnknownImage(id)));
    }

    #[test]
    fn test_host_images_not_counted_by_pool() {
        let backend = CpuBackend::with_memory_budget(16);
        let _big = host(&backend, 64, 64, PixelFormat::Rgba16Float);
        assert_eq!(backend.stats(), PoolStats::default());
    }

    #[test]
    fn test_blit_downsample_averages() {
        let backend = CpuBackend::new();
        let src = host(&backend, 2, 2, PixelFormat::Rgba16Float);
        let dst = host(&backend, 1, 1, PixelFormat::Rgba16Float);
        backend
            .write_pixels(
                &src,
                &[Vec4::ZERO, Vec4::ONE, Vec4::ONE, Vec4::ZERO],
            )
            .unwrap();
        backend.blit(&src, &dst).unwrap();
        let out = backend.read_pixels(&dst).unwrap()[0];
        assert!(out.abs_diff_eq(Vec4::splat(0.5), 1e-3), "{out}");
    }

    #[test]
    fn test_nearest_blit_picks_a_texel() {
        let backend = CpuBackend::new();
        let src = backend
            .create_image(
                ImageDesc::new(2, 1, PixelFormat::Rgba16Float).with_filter(FilterMode::Nearest),
            )
            .unwrap();
        let dst = host(&backend, 4, 1, PixelFormat::Rgba16Float);
        backend
            .write_pixels(&src, &[Vec4::ZERO, Vec4::ONE])
            .unwrap();
        backend.blit(&src, &dst).unwrap();
        let xs: Vec<f32> = backend
            .read_pixels(&dst)
            .unwrap()
            .iter()
            .map(|c| c.x)
            .collect();
        assert_eq!(xs, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_run_pass_rejects_unknown_pass() {
        let backend = CpuBackend::new();
        let a = host(&backend, 2, 2, PixelFormat::Rgba8Unorm);
        let b = host(&backend, 2, 2, PixelFormat::Rgba8Unorm);
        let material = backend.load_material(Program::Aces).unwrap();
        assert_eq!(
            backend.run_pass(&material, 3, &a, &b, &ParamSet::new()),
            Err(PassError::UnknownPass {
                program: Program::Aces,
                pass: 3
            })
        );
    }

    #[test]
    fn test_unknown_aux_texture_fails_pass() {
        let backend = CpuBackend::new();
        let a = host(&backend, 2, 2, PixelFormat::Rgba8Unorm);
        let b = host(&backend, 2, 2, PixelFormat::Rgba8Unorm);
        let material = backend.load_material(Program::Bloom).unwrap();
        let mut params = ParamSet::new();
        params.set(
            Param::BlurTargetTex,
            crate::pass::ParamValue::Texture(ImageId(9999)),
        );
        assert_eq!(
            backend.run_pass(&material, bloom_pass::BLEND, &a, &b, &params),
            Err(PassError::UnknownImage(ImageId(9999)))
        );
    }

    #[test]
    fn test_pass_log_records_only_when_enabled() {
        let backend = CpuBackend::new();
        let a = host(&backend, 4, 4, PixelFormat::Rgba8Unorm);
        let b = host(&backend, 4, 4, PixelFormat::Rgba8Unorm);
        let material = backend.load_material(Program::Blur).unwrap();

        backend.blit(&a, &b).unwrap();
        assert!(backend.take_pass_log().is_empty());

        backend.set_recording(true);
        backend
            .run_pass(&material, blur_pass::BOX, &a, &b, &ParamSet::new())
            .unwrap();
        let log = backend.take_pass_log();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log[0].kind,
            PassKind::Pass {
                program: Program::Blur,
                pass: blur_pass::BOX
            }
        );
        assert!(backend.take_pass_log().is_empty());
    }

    #[test]
    fn test_released_temporary_is_forgotten() {
        let backend = CpuBackend::new();
        let temp = acquire_temporary(&backend, ImageDesc::new(4, 4, PixelFormat::Rgba8Unorm))
            .unwrap();
        assert_eq!(backend.image_count(), 1);
        drop(temp);
        assert_eq!(backend.image_count(), 0);
    }
}
