//! Bloom: bright-pass, pyramid blur, composite.
//!
//! Pixels above the threshold are extracted at full resolution, spread
//! through an accumulating dual Kawase pyramid, and added back onto the
//! untouched source scaled by the intensity.

use afterglow_config::BloomConfig;

use crate::backend::Backend;
use crate::error::{EffectError, expect_program};
use crate::image::{FilterMode, Image};
use crate::pass::{Material, Param, ParamSet, Program, bloom_pass};
use crate::pool::acquire_temporary;
use crate::pyramid::{PyramidSettings, pyramid_blur};

/// Settings for one [`bloom`] invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomSettings {
    /// Luminance above which pixels contribute to the glow.
    pub threshold: f32,
    /// Width of the soft transition around the threshold.
    pub soft_knee: f32,
    /// Multiplier applied to the glow when compositing.
    pub intensity: f32,
    pub pyramid: PyramidSettings,
}

impl BloomSettings {
    pub fn from_config(config: &BloomConfig) -> Self {
        Self {
            threshold: config.threshold,
            soft_knee: config.soft_knee,
            intensity: config.intensity,
            pyramid: PyramidSettings::from_bloom_config(config),
        }
    }
}

/// Apply bloom from `source` into `destination` with a [`Program::Bloom`]
/// material.
///
/// Needs two full-resolution temporaries on top of the pyramid: the
/// bright-pass result and the blurred glow.
pub fn bloom<B: Backend + ?Sized>(
    backend: &B,
    material: &Material,
    source: &Image,
    destination: &Image,
    settings: &BloomSettings,
) -> Result<(), EffectError> {
    expect_program(material.program(), Program::Bloom)?;

    let full = source.desc().with_filter(FilterMode::Bilinear);

    let mut params = ParamSet::new();
    params
        .set_float(Param::Threshold, settings.threshold)
        .set_float(Param::ThresholdKnee, settings.soft_knee);
    let bright = acquire_temporary(backend, full)?;
    backend.run_pass(material, bloom_pass::PREFILTER, source, &bright, &params)?;

    let glow = acquire_temporary(backend, full)?;
    pyramid_blur(backend, material, &bright, &glow, &settings.pyramid)?;
    drop(bright);

    let mut params = ParamSet::new();
    params
        .set_texture(Param::BlurTargetTex, &glow)
        .set_float(Param::BloomIntensity, settings.intensity);
    backend.run_pass(material, bloom_pass::BLEND, source, destination, &params)?;
    Ok(())
}
