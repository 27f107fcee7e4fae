use bytemuck::{Pod, Zeroable};

use crate::pass::{Param, ParamSet};

/// Every pass parameter, laid out to match `PassUniforms` in the WGSL.
///
/// Unset parameters take the same defaults as the CPU backend.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct PassUniforms {
    pub blur_offset: [f32; 2],
    pub blur_radius: f32,
    pub threshold: f32,
    pub threshold_knee: f32,
    pub bloom_intensity: f32,
    pub brightness: f32,
    pub saturation: f32,
    pub contrast: f32,
    pub vignette_intensity: f32,
    pub vignette_roughness: f32,
    pub vignette_smoothness: f32,
    pub hue_shift: f32,
    /// 1.0 when `_BlurTargetTex` is bound.
    pub has_aux: f32,
    pub _pad: [f32; 2],
}

impl PassUniforms {
    pub fn from_params(params: &ParamSet, has_aux: bool) -> Self {
        Self {
            blur_offset: params.vec2_or(Param::BlurOffset, glam::Vec2::X).to_array(),
            blur_radius: params.float_or(Param::BlurRadius, 1.0),
            threshold: params.float_or(Param::Threshold, 1.0),
            threshold_knee: params.float_or(Param::ThresholdKnee, 0.5),
            bloom_intensity: params.float_or(Param::BloomIntensity, 1.0),
            brightness: params.float_or(Param::Brightness, 1.0),
            saturation: params.float_or(Param::Saturation, 1.0),
            contrast: params.float_or(Param::Contrast, 1.0),
            vignette_intensity: params.float_or(Param::VignetteIntensity, 0.0),
            vignette_roughness: params.float_or(Param::VignetteRoughness, 0.5),
            vignette_smoothness: params.float_or(Param::VignetteSmoothness, 1.0),
            hue_shift: params.float_or(Param::HueShift, 0.0),
            has_aux: if has_aux { 1.0 } else { 0.0 },
            _pad: [0.0; 2],
        }
    }
}
