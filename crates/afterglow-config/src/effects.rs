//! Per-effect settings as exposed to the host as sliders.
//!
//! Values are stored exactly as the host supplies them. Integer sliders stay
//! signed so a bad value from the host survives loading and can be clamped or
//! degraded later instead of failing to parse.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Slider range for blur and bloom iteration counts.
pub const ITERATIONS_RANGE: RangeInclusive<i32> = 0..=10;

/// Slider range for blur radii, in texels.
pub const RADIUS_RANGE: RangeInclusive<i32> = 0..=10;

/// Slider range for downsample factors.
pub const DOWNSAMPLE_RANGE: RangeInclusive<i32> = 1..=8;

/// Which post-processing effect runs each frame.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum EffectKind {
    /// Brightness, saturation, contrast, hue shift, and vignette in one pass.
    ColorAdjustment,
    /// Shattered-glass distortion.
    BrokenGlass,
    /// Box, Gaussian, or dual Kawase blur.
    #[default]
    Blur,
    /// Threshold, pyramid blur, and additive composite.
    Bloom,
    /// ACES filmic tonemapping.
    Aces,
}

/// Blur algorithm selection.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum BlurMethod {
    /// Single-pass box filter, iterated with ping-pong buffers.
    Box,
    /// Separable horizontal + vertical Gaussian.
    #[default]
    Gaussian,
    /// Downsample/upsample pyramid.
    DualKawase,
}

/// Color adjustment sliders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColorAdjustmentConfig {
    /// Range \[0, 2\]. Default: 1.0.
    pub brightness: f32,
    /// Range \[0, 2\]. Default: 1.0.
    pub saturation: f32,
    /// Range \[0, 2\]. Default: 1.0.
    pub contrast: f32,
    /// Range \[0, 2\]. Default: 0.7.
    pub vignette_intensity: f32,
    /// Range \[0, 1\]. Default: 0.5.
    pub vignette_roughness: f32,
    /// Range \[0, 2\]. Default: 1.0.
    pub vignette_smoothness: f32,
    /// Hue rotation as a fraction of a full turn. Range \[0, 1\]. Default: 0.0.
    pub hue_shift: f32,
}

/// Blur settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlurConfig {
    /// Blur algorithm.
    pub method: BlurMethod,
    /// Blur iterations; for dual Kawase this is the pyramid level count.
    pub iterations: i32,
    /// Tap offset in texels.
    pub radius: i32,
    /// Working resolution divisor.
    pub downsample: i32,
}

/// Bloom settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BloomConfig {
    /// Luminance threshold for the bright pass. Range \[0, 2\]. Default: 0.5.
    pub threshold: f32,
    /// Width of the soft knee around the threshold. Range \[0, 1\]. Default: 0.5.
    pub soft_knee: f32,
    /// Strength of the composited glow. Default: 1.0.
    pub intensity: f32,
    /// Pyramid level count.
    pub iterations: i32,
    /// Pyramid base resolution divisor.
    pub downsample: i32,
    /// Tap offset in texels.
    pub radius: i32,
}

/// The effect to run and the settings for every effect.
///
/// Settings for inactive effects are kept so switching effects at runtime
/// does not lose them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EffectConfig {
    /// Active effect.
    pub kind: EffectKind,
    /// Color adjustment sliders.
    pub color_adjustment: ColorAdjustmentConfig,
    /// Blur settings.
    pub blur: BlurConfig,
    /// Bloom settings.
    pub bloom: BloomConfig,
}

impl Default for ColorAdjustmentConfig {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            saturation: 1.0,
            contrast: 1.0,
            vignette_intensity: 0.7,
            vignette_roughness: 0.5,
            vignette_smoothness: 1.0,
            hue_shift: 0.0,
        }
    }
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            method: BlurMethod::Gaussian,
            iterations: 4,
            radius: 1,
            downsample: 2,
        }
    }
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            soft_knee: 0.5,
            intensity: 1.0,
            iterations: 4,
            downsample: 2,
            radius: 1,
        }
    }
}

impl EffectConfig {
    /// Clamp every slider into its documented range.
    ///
    /// Returns the number of values that changed. NaN floats are reset to the
    /// bottom of their range.
    pub fn clamp_ranges(&mut self) -> usize {
        let mut changed = 0;

        let color = &mut self.color_adjustment;
        changed += clamp_f32("brightness", &mut color.brightness, 0.0, 2.0);
        changed += clamp_f32("saturation", &mut color.saturation, 0.0, 2.0);
        changed += clamp_f32("contrast", &mut color.contrast, 0.0, 2.0);
        changed += clamp_f32("vignette_intensity", &mut color.vignette_intensity, 0.0, 2.0);
        changed += clamp_f32("vignette_roughness", &mut color.vignette_roughness, 0.0, 1.0);
        changed += clamp_f32(
            "vignette_smoothness",
            &mut color.vignette_smoothness,
            0.0,
            2.0,
        );
        changed += clamp_f32("hue_shift", &mut color.hue_shift, 0.0, 1.0);

        let blur = &mut self.blur;
        changed += clamp_i32("blur.iterations", &mut blur.iterations, ITERATIONS_RANGE);
        changed += clamp_i32("blur.radius", &mut blur.radius, RADIUS_RANGE);
        changed += clamp_i32("blur.downsample", &mut blur.downsample, DOWNSAMPLE_RANGE);

        let bloom = &mut self.bloom;
        changed += clamp_f32("bloom.threshold", &mut bloom.threshold, 0.0, 2.0);
        changed += clamp_f32("bloom.soft_knee", &mut bloom.soft_knee, 0.0, 1.0);
        changed += clamp_f32("bloom.intensity", &mut bloom.intensity, 0.0, f32::MAX);
        changed += clamp_i32("bloom.iterations", &mut bloom.iterations, ITERATIONS_RANGE);
        changed += clamp_i32("bloom.downsample", &mut bloom.downsample, DOWNSAMPLE_RANGE);
        changed += clamp_i32("bloom.radius", &mut bloom.radius, RADIUS_RANGE);

        changed
    }
}

fn clamp_f32(name: &str, value: &mut f32, min: f32, max: f32) -> usize {
    let clamped = if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    };
    if clamped.to_bits() == value.to_bits() {
        return 0;
    }
    log::warn!("{name} = {value} is outside [{min}, {max}], using {clamped}");
    *value = clamped;
    1
}

fn clamp_i32(name: &str, value: &mut i32, range: RangeInclusive<i32>) -> usize {
    let clamped = (*value).clamp(*range.start(), *range.end());
    if clamped == *value {
        return 0;
    }
    log::warn!("{name} = {value} is outside {range:?}, using {clamped}");
    *value = clamped;
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_slider_defaults() {
        let config = EffectConfig::default();
        assert_eq!(config.kind, EffectKind::Blur);
        assert_eq!(config.blur.method, BlurMethod::Gaussian);
        assert_eq!(config.blur.iterations, 4);
        assert_eq!(config.blur.downsample, 2);
        assert_eq!(config.bloom.threshold, 0.5);
        assert_eq!(config.color_adjustment.vignette_intensity, 0.7);
    }

    #[test]
    fn test_defaults_are_within_ranges() {
        let mut config = EffectConfig::default();
        assert_eq!(config.clamp_ranges(), 0);
        assert_eq!(config, EffectConfig::default());
    }

    #[test]
    fn test_clamp_pulls_values_into_range() {
        let mut config = EffectConfig::default();
        config.blur.iterations = -3;
        config.blur.downsample = 0;
        config.bloom.radius = 40;
        config.color_adjustment.brightness = 5.0;

        assert_eq!(config.clamp_ranges(), 4);
        assert_eq!(config.blur.iterations, 0);
        assert_eq!(config.blur.downsample, 1);
        assert_eq!(config.bloom.radius, 10);
        assert_eq!(config.color_adjustment.brightness, 2.0);
    }

    #[test]
    fn test_nan_resets_to_range_minimum() {
        let mut config = EffectConfig::default();
        config.bloom.threshold = f32::NAN;
        assert_eq!(config.clamp_ranges(), 1);
        assert_eq!(config.bloom.threshold, 0.0);
    }

    #[test]
    fn test_unbounded_intensity_only_rejects_negatives() {
        let mut config = EffectConfig::default();
        config.bloom.intensity = 12.5;
        assert_eq!(config.clamp_ranges(), 0);
        config.bloom.intensity = -1.0;
        assert_eq!(config.clamp_ranges(), 1);
        assert_eq!(config.bloom.intensity, 0.0);
    }

    #[test]
    fn test_enum_ron_names() {
        assert_eq!(ron::to_string(&EffectKind::Bloom).unwrap(), "Bloom");
        assert_eq!(ron::to_string(&BlurMethod::DualKawase).unwrap(), "DualKawase");
        let method: BlurMethod = ron::from_str("Box").unwrap();
        assert_eq!(method, BlurMethod::Box);
    }
}
