//! Iterative ping-pong blur at reduced resolution.
//!
//! The source is downsampled into one of two equal-sized temporaries, blurred
//! back and forth between them `iterations` times, and upsampled into the
//! destination. Box blur runs one pass per iteration; Gaussian runs a
//! horizontal then a vertical pass.

use afterglow_config::{BlurConfig, ITERATIONS_RANGE};
use glam::Vec2;

use crate::backend::Backend;
use crate::error::{EffectError, expect_program};
use crate::image::{FilterMode, Image, ImageDesc};
use crate::pass::{Material, Param, ParamSet, Program, blur_pass};
use crate::pool::{BufferPool, PoolError, TemporaryImage, acquire_temporary};

/// Kernel used by [`separable_blur`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparableKernel {
    Box,
    Gaussian,
}

/// Most iterations one [`separable_blur`] call runs; larger counts are
/// capped to it.
pub const MAX_ITERATIONS: u32 = *ITERATIONS_RANGE.end() as u32;

/// Settings for one [`separable_blur`] invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeparableSettings {
    pub kernel: SeparableKernel,
    pub iterations: u32,
    pub downsample: u32,
    pub radius: f32,
}

impl SeparableSettings {
    /// Settings for `kernel` from config. Negative counts and radii become
    /// zero, iterations are capped at [`MAX_ITERATIONS`], and a downsample
    /// below one becomes one.
    pub fn from_config(kernel: SeparableKernel, config: &BlurConfig) -> Self {
        Self {
            kernel,
            iterations: config.iterations.clamp(0, *ITERATIONS_RANGE.end()) as u32,
            downsample: config.downsample.max(1) as u32,
            radius: config.radius.max(0) as f32,
        }
    }
}

/// Two same-sized temporaries that trade roles between passes.
///
/// `front` holds the latest result; passes read it and write `back`.
pub struct PingPong<'p, P: BufferPool + ?Sized> {
    slots: [TemporaryImage<'p, P>; 2],
    front: usize,
}

impl<'p, P: BufferPool + ?Sized> PingPong<'p, P> {
    /// Acquire both slots. If the second acquire fails the first is
    /// released before returning.
    pub fn new(pool: &'p P, desc: ImageDesc) -> Result<Self, PoolError> {
        let a = acquire_temporary(pool, desc)?;
        let b = acquire_temporary(pool, desc)?;
        Ok(Self {
            slots: [a, b],
            front: 0,
        })
    }

    pub fn front(&self) -> &Image {
        self.slots[self.front].image()
    }

    pub fn back(&self) -> &Image {
        self.slots[self.front ^ 1].image()
    }

    /// Make the back slot the front one.
    pub fn swap(&mut self) {
        self.front ^= 1;
    }
}

/// Blur `source` into `destination` with `material` (a [`Program::Blur`]
/// material).
///
/// Zero iterations still downsamples and upsamples, which softens the
/// image when `downsample > 1` and is a plain copy otherwise.
pub fn separable_blur<B: Backend + ?Sized>(
    backend: &B,
    material: &Material,
    source: &Image,
    destination: &Image,
    settings: &SeparableSettings,
) -> Result<(), EffectError> {
    expect_program(material.program(), Program::Blur)?;

    let downsample = settings.downsample.max(1);
    let desc = source
        .desc()
        .with_extent(source.extent().downsampled(downsample))
        .with_filter(FilterMode::Bilinear);
    let mut buffers = PingPong::new(backend, desc)?;

    backend.blit(source, buffers.front())?;

    let mut params = ParamSet::new();
    params.set_float(Param::BlurRadius, settings.radius);

    let iterations = settings.iterations.min(MAX_ITERATIONS);
    for _ in 0..iterations {
        match settings.kernel {
            SeparableKernel::Box => {
                backend.run_pass(
                    material,
                    blur_pass::BOX,
                    buffers.front(),
                    buffers.back(),
                    &params,
                )?;
                buffers.swap();
            }
            SeparableKernel::Gaussian => {
                params.set_vec2(Param::BlurOffset, Vec2::X);
                backend.run_pass(
                    material,
                    blur_pass::GAUSSIAN,
                    buffers.front(),
                    buffers.back(),
                    &params,
                )?;
                params.set_vec2(Param::BlurOffset, Vec2::Y);
                backend.run_pass(
                    material,
                    blur_pass::GAUSSIAN,
                    buffers.back(),
                    buffers.front(),
                    &params,
                )?;
            }
        }
    }

    backend.blit(buffers.front(), destination)?;
    log::trace!(
        "{:?} blur: {} iterations at {}",
        settings.kernel,
        iterations,
        desc.extent
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use afterglow_config::BlurMethod;
    use crate::cpu::{CpuBackend, PassKind};
    use crate::image::{Extent, PixelFormat};
    use crate::pass::PassRunner;
    use crate::{HostImages, PoolStats};

    fn settings(kernel: SeparableKernel, iterations: u32, downsample: u32) -> SeparableSettings {
        SeparableSettings {
            kernel,
            iterations,
            downsample,
            radius: 1.0,
        }
    }

    fn frame(backend: &CpuBackend) -> (Image, Image) {
        let desc = ImageDesc::new(64, 32, PixelFormat::Rgba8Unorm);
        (
            backend.create_image(desc).unwrap(),
            backend.create_image(desc).unwrap(),
        )
    }

    #[test]
    fn test_from_config_sanitizes() {
        let config = BlurConfig {
            method: BlurMethod::Gaussian,
            iterations: -3,
            radius: -2,
            downsample: 0,
        };
        let settings = SeparableSettings::from_config(SeparableKernel::Gaussian, &config);
        assert_eq!(settings.kernel, SeparableKernel::Gaussian);
        assert_eq!(settings.iterations, 0);
        assert_eq!(settings.radius, 0.0);
        assert_eq!(settings.downsample, 1);

        let huge = BlurConfig {
            iterations: i32::MAX,
            ..config
        };
        let settings = SeparableSettings::from_config(SeparableKernel::Box, &huge);
        assert_eq!(settings.iterations, MAX_ITERATIONS);
    }

    #[test]
    fn test_iteration_count_is_capped() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend);
        let material = backend.load_material(Program::Blur).unwrap();
        backend.set_recording(true);

        separable_blur(
            &backend,
            &material,
            &src,
            &dst,
            &settings(SeparableKernel::Box, u32::MAX, 4),
        )
        .unwrap();

        assert_eq!(backend.take_pass_log().len(), MAX_ITERATIONS as usize + 2);
        assert_eq!(backend.stats().live(), 0);
    }

    #[test]
    fn test_box_pass_sequence() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend);
        let material = backend.load_material(Program::Blur).unwrap();
        backend.set_recording(true);

        separable_blur(
            &backend,
            &material,
            &src,
            &dst,
            &settings(SeparableKernel::Box, 3, 2),
        )
        .unwrap();

        let log = backend.take_pass_log();
        let kinds: Vec<_> = log.iter().map(|r| r.kind).collect();
        let box_pass = PassKind::Pass {
            program: Program::Blur,
            pass: blur_pass::BOX,
        };
        assert_eq!(
            kinds,
            vec![PassKind::Blit, box_pass, box_pass, box_pass, PassKind::Blit]
        );
        // Every box pass runs at the downsampled size.
        for record in &log[1..4] {
            assert_eq!(record.output_extent, Extent::new(32, 16));
        }
        // Each pass reads what the previous one wrote.
        for pair in log.windows(2) {
            assert_eq!(pair[0].output, pair[1].input);
        }
        assert_eq!(log[4].output, dst.id());
    }

    #[test]
    fn test_gaussian_runs_two_passes_per_iteration() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend);
        let material = backend.load_material(Program::Blur).unwrap();
        backend.set_recording(true);

        separable_blur(
            &backend,
            &material,
            &src,
            &dst,
            &settings(SeparableKernel::Gaussian, 2, 4),
        )
        .unwrap();

        let log = backend.take_pass_log();
        assert_eq!(log.len(), 2 + 2 * 2);
        let gaussian = PassKind::Pass {
            program: Program::Blur,
            pass: blur_pass::GAUSSIAN,
        };
        assert!(log[1..5].iter().all(|r| r.kind == gaussian));
        // The pair returns to the slot it started from.
        assert_eq!(log[0].output, log[2].output);
        assert_eq!(log[4].output, log[5].input);
    }

    #[test]
    fn test_zero_iterations_is_down_up_only() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend);
        let material = backend.load_material(Program::Blur).unwrap();
        backend.set_recording(true);

        separable_blur(
            &backend,
            &material,
            &src,
            &dst,
            &settings(SeparableKernel::Gaussian, 0, 2),
        )
        .unwrap();

        let kinds: Vec<_> = backend.take_pass_log().iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![PassKind::Blit, PassKind::Blit]);
    }

    #[test]
    fn test_releases_both_buffers() {
        for iterations in 0..4 {
            for kernel in [SeparableKernel::Box, SeparableKernel::Gaussian] {
                let backend = CpuBackend::new();
                let (src, dst) = frame(&backend);
                let material = backend.load_material(Program::Blur).unwrap();

                separable_blur(
                    &backend,
                    &material,
                    &src,
                    &dst,
                    &settings(kernel, iterations, 2),
                )
                .unwrap();

                let stats: PoolStats = backend.stats();
                assert_eq!(stats.acquired, 2, "{kernel:?} x{iterations}");
                assert_eq!(stats.released, 2, "{kernel:?} x{iterations}");
            }
        }
    }

    #[test]
    fn test_rejects_foreign_material() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend);
        let material = backend.load_material(Program::Bloom).unwrap();

        let err = separable_blur(
            &backend,
            &material,
            &src,
            &dst,
            &settings(SeparableKernel::Box, 1, 1),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EffectError::ProgramMismatch {
                expected: Program::Blur,
                found: Program::Bloom
            }
        );
        assert_eq!(backend.stats().acquired, 0);
    }
}
