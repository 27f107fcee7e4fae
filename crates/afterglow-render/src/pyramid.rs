//! Dual Kawase downsample/upsample pyramid.
//!
//! Level 0 sits at `source / downsample`; each further level halves both
//! axes, floored and clamped to 1×1. The down sweep fills levels 0..L from
//! the source, the up sweep writes each level from the one below it, and
//! level 0 is finally upsampled into the destination.
//!
//! In the [`Accumulate`](PyramidVariant::Accumulate) variant the up pass also
//! reads the level's own down-sweep contents through `_BlurTargetTex`, so
//! bloom keeps detail from every scale instead of only the coarsest one.

use afterglow_config::{BloomConfig, BlurConfig, ITERATIONS_RANGE};

use crate::backend::Backend;
use crate::error::EffectError;
use crate::image::{FilterMode, Image, level_extent};
use crate::pass::{Material, Param, ParamSet, bloom_pass, blur_pass};
use crate::pool::{TemporaryImage, acquire_temporary};

/// Which passes of the material implement the down and up steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidPasses {
    pub down: u32,
    pub up: u32,
}

impl PyramidPasses {
    /// Dual Kawase passes of the blur program.
    pub const BLUR: Self = Self {
        down: blur_pass::KAWASE_DOWN,
        up: blur_pass::KAWASE_UP,
    };

    /// Dual Kawase passes of the bloom program.
    pub const BLOOM: Self = Self {
        down: bloom_pass::KAWASE_DOWN,
        up: bloom_pass::KAWASE_UP,
    };
}

/// How the up sweep treats the level it writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PyramidVariant {
    /// The up pass overwrites the level.
    #[default]
    Plain,
    /// The up pass combines with the level's down-sweep contents.
    Accumulate,
}

/// Deepest pyramid [`pyramid_blur`] builds. Any `u32` axis has reached one
/// texel by this level, so deeper levels would only repeat 1×1 copies.
pub const MAX_LEVELS: u32 = u32::BITS;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidSettings {
    /// Number of levels; 0 is treated as 1, more than [`MAX_LEVELS`] as
    /// [`MAX_LEVELS`].
    pub levels: u32,
    pub downsample: u32,
    pub radius: f32,
    pub passes: PyramidPasses,
    pub variant: PyramidVariant,
}

impl PyramidSettings {
    /// Plain blur pyramid from the blur config.
    pub fn from_blur_config(config: &BlurConfig) -> Self {
        Self {
            levels: config.iterations.clamp(0, *ITERATIONS_RANGE.end()) as u32,
            downsample: config.downsample.max(1) as u32,
            radius: config.radius.max(0) as f32,
            passes: PyramidPasses::BLUR,
            variant: PyramidVariant::Plain,
        }
    }

    /// Accumulating bloom pyramid from the bloom config.
    pub fn from_bloom_config(config: &BloomConfig) -> Self {
        Self {
            levels: config.iterations.clamp(0, *ITERATIONS_RANGE.end()) as u32,
            downsample: config.downsample.max(1) as u32,
            radius: config.radius.max(0) as f32,
            passes: PyramidPasses::BLOOM,
            variant: PyramidVariant::Accumulate,
        }
    }
}

/// Run a dual Kawase pyramid from `source` into `destination`.
///
/// The caller picks the program through `material` and `settings.passes`;
/// this function does not check the program so the same sweep serves both
/// blur and bloom.
pub fn pyramid_blur<B: Backend + ?Sized>(
    backend: &B,
    material: &Material,
    source: &Image,
    destination: &Image,
    settings: &PyramidSettings,
) -> Result<(), EffectError> {
    let levels = settings.levels.clamp(1, MAX_LEVELS);
    let downsample = settings.downsample.max(1);

    let mut params = ParamSet::new();
    params.set_float(Param::BlurRadius, settings.radius);

    let mut pyramid: Vec<TemporaryImage<'_, B>> = Vec::new();
    for level in 0..levels {
        let desc = source
            .desc()
            .with_extent(level_extent(source.extent(), downsample, level))
            .with_filter(FilterMode::Bilinear);
        let target = acquire_temporary(backend, desc)?;
        let input = pyramid.last().map_or(source, |previous| previous.image());
        backend.run_pass(material, settings.passes.down, input, &target, &params)?;
        pyramid.push(target);
    }

    for level in (0..pyramid.len() - 1).rev() {
        let (larger, smaller) = (&pyramid[level], &pyramid[level + 1]);
        match settings.variant {
            PyramidVariant::Plain => {
                backend.run_pass(material, settings.passes.up, smaller, larger, &params)?;
            }
            PyramidVariant::Accumulate => {
                let down_contents = acquire_temporary(backend, *larger.desc())?;
                backend.blit(larger, &down_contents)?;
                params.set_texture(Param::BlurTargetTex, &down_contents);
                backend.run_pass(material, settings.passes.up, smaller, larger, &params)?;
                params.remove(Param::BlurTargetTex);
            }
        }
    }

    backend.blit(&pyramid[0], destination)?;
    log::trace!(
        "pyramid: {levels} levels from {}, {:?}",
        pyramid[0].extent(),
        settings.variant
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostImages;
    use crate::cpu::{CpuBackend, PassKind};
    use crate::image::{Extent, ImageDesc, PixelFormat};
    use crate::pass::{PassRunner, Program};
    use crate::pool::BufferPool;

    fn settings(levels: u32, variant: PyramidVariant) -> PyramidSettings {
        PyramidSettings {
            levels,
            downsample: 2,
            radius: 1.0,
            passes: PyramidPasses::BLUR,
            variant,
        }
    }

    fn frame(backend: &CpuBackend, width: u32, height: u32) -> (Image, Image) {
        let desc = ImageDesc::new(width, height, PixelFormat::Rgba16Float);
        (
            backend.create_image(desc).unwrap(),
            backend.create_image(desc).unwrap(),
        )
    }

    #[test]
    fn test_plain_pass_sequence() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend, 128, 64);
        let material = backend.load_material(Program::Blur).unwrap();
        backend.set_recording(true);

        pyramid_blur(
            &backend,
            &material,
            &src,
            &dst,
            &settings(3, PyramidVariant::Plain),
        )
        .unwrap();

        let log = backend.take_pass_log();
        let down = PassKind::Pass {
            program: Program::Blur,
            pass: blur_pass::KAWASE_DOWN,
        };
        let up = PassKind::Pass {
            program: Program::Blur,
            pass: blur_pass::KAWASE_UP,
        };
        let kinds: Vec<_> = log.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![down, down, down, up, up, PassKind::Blit]);

        let outputs: Vec<_> = log.iter().map(|r| r.output_extent).collect();
        assert_eq!(
            outputs,
            vec![
                Extent::new(64, 32),
                Extent::new(32, 16),
                Extent::new(16, 8),
                Extent::new(32, 16),
                Extent::new(64, 32),
                Extent::new(128, 64),
            ]
        );
        assert_eq!(log[0].input, src.id());
        assert_eq!(log[5].output, dst.id());

        let stats = backend.stats();
        assert_eq!(stats.acquired, 3);
        assert_eq!(stats.released, 3);
    }

    #[test]
    fn test_single_level_at_odd_downsample() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend, 100, 100);
        let material = backend.load_material(Program::Blur).unwrap();
        backend.set_recording(true);

        let settings = PyramidSettings {
            downsample: 3,
            ..settings(1, PyramidVariant::Plain)
        };
        pyramid_blur(&backend, &material, &src, &dst, &settings).unwrap();

        let log = backend.take_pass_log();
        assert_eq!(log.len(), 2);
        assert_eq!(
            log[0].kind,
            PassKind::Pass {
                program: Program::Blur,
                pass: blur_pass::KAWASE_DOWN
            }
        );
        assert_eq!(log[0].output_extent, Extent::new(33, 33));
        assert_eq!(log[1].kind, PassKind::Blit);
    }

    #[test]
    fn test_single_level_has_no_up_passes() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend, 32, 32);
        let material = backend.load_material(Program::Blur).unwrap();
        backend.set_recording(true);

        pyramid_blur(
            &backend,
            &material,
            &src,
            &dst,
            &settings(1, PyramidVariant::Plain),
        )
        .unwrap();

        assert_eq!(backend.take_pass_log().len(), 2);
    }

    #[test]
    fn test_zero_levels_behaves_as_one() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend, 32, 32);
        let material = backend.load_material(Program::Blur).unwrap();
        backend.set_recording(true);

        pyramid_blur(
            &backend,
            &material,
            &src,
            &dst,
            &settings(0, PyramidVariant::Plain),
        )
        .unwrap();

        let log = backend.take_pass_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].output_extent, Extent::new(16, 16));
        assert_eq!(backend.stats().live(), 0);
    }

    #[test]
    fn test_config_level_count_is_capped() {
        let huge = BlurConfig {
            iterations: i32::MAX,
            ..BlurConfig::default()
        };
        assert_eq!(
            PyramidSettings::from_blur_config(&huge).levels,
            *ITERATIONS_RANGE.end() as u32
        );
        let huge = BloomConfig {
            iterations: i32::MAX,
            ..BloomConfig::default()
        };
        assert_eq!(
            PyramidSettings::from_bloom_config(&huge).levels,
            *ITERATIONS_RANGE.end() as u32
        );
    }

    #[test]
    fn test_level_count_beyond_max_is_capped() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend, 8, 8);
        let material = backend.load_material(Program::Blur).unwrap();

        pyramid_blur(
            &backend,
            &material,
            &src,
            &dst,
            &settings(u32::MAX, PyramidVariant::Plain),
        )
        .unwrap();

        let stats = backend.stats();
        assert_eq!(stats.acquired, u64::from(MAX_LEVELS));
        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn test_single_level_accumulate_has_no_aux() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend, 32, 32);
        let material = backend.load_material(Program::Bloom).unwrap();
        backend.set_recording(true);

        let settings = PyramidSettings {
            passes: PyramidPasses::BLOOM,
            ..settings(1, PyramidVariant::Accumulate)
        };
        pyramid_blur(&backend, &material, &src, &dst, &settings).unwrap();

        let log = backend.take_pass_log();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|r| r.aux.is_none()));
        let stats = backend.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
    }

    #[test]
    fn test_deep_pyramid_bottoms_out_at_one_texel() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend, 8, 4);
        let material = backend.load_material(Program::Blur).unwrap();
        backend.set_recording(true);

        pyramid_blur(
            &backend,
            &material,
            &src,
            &dst,
            &settings(8, PyramidVariant::Plain),
        )
        .unwrap();

        let log = backend.take_pass_log();
        assert_eq!(log[7].output_extent, Extent::new(1, 1));
        assert!(
            log.iter()
                .all(|r| r.output_extent.width >= 1 && r.output_extent.height >= 1)
        );
    }

    #[test]
    fn test_accumulate_binds_down_contents() {
        let backend = CpuBackend::new();
        let (src, dst) = frame(&backend, 64, 64);
        let material = backend.load_material(Program::Bloom).unwrap();
        backend.set_recording(true);

        let settings = PyramidSettings {
            passes: PyramidPasses::BLOOM,
            ..settings(3, PyramidVariant::Accumulate)
        };
        pyramid_blur(&backend, &material, &src, &dst, &settings).unwrap();

        let log = backend.take_pass_log();
        // 3 downs, then (blit + up) twice, then the final blit.
        assert_eq!(log.len(), 3 + 2 * 2 + 1);
        let up_records: Vec<_> = log
            .iter()
            .filter(|r| {
                r.kind
                    == PassKind::Pass {
                        program: Program::Bloom,
                        pass: bloom_pass::KAWASE_UP,
                    }
            })
            .collect();
        assert_eq!(up_records.len(), 2);
        for up in up_records {
            assert!(up.aux.is_some(), "up pass must see the level's contents");
        }

        let stats = backend.stats();
        assert_eq!(stats.acquired, 3 + 2);
        assert_eq!(stats.live(), 0);
    }
}
