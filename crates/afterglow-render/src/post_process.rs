//! Per-frame effect orchestration.
//!
//! [`PostProcessor`] owns the active [`EffectConfig`] and the bound
//! [`Material`], and turns one `process` call into the right stage. A frame
//! always ends with the destination written: by the effect when it
//! succeeds, by a plain copy of the source when no material is bound or the
//! effect fails.

use afterglow_config::{BlurMethod, ColorAdjustmentConfig, EffectConfig, EffectKind};

use crate::backend::Backend;
use crate::bloom::{BloomSettings, bloom};
use crate::error::{EffectError, expect_program};
use crate::image::Image;
use crate::pass::{Material, Param, ParamSet, PassError, PassRunner, Program, SINGLE_PASS};
use crate::pyramid::{PyramidSettings, pyramid_blur};
use crate::separable::{SeparableKernel, SeparableSettings, separable_blur};

/// What happened to a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The effect ran.
    Processed,
    /// No material is bound; the source was copied.
    Passthrough,
    /// The effect failed; the source was copied instead.
    Fallback(EffectError),
}

impl FrameOutcome {
    /// Whether the effect's output reached the destination.
    pub fn is_processed(&self) -> bool {
        matches!(self, FrameOutcome::Processed)
    }
}

/// Program that implements `kind`.
pub fn program_for(kind: EffectKind) -> Program {
    match kind {
        EffectKind::ColorAdjustment => Program::ColorAdjustment,
        EffectKind::BrokenGlass => Program::BrokenGlass,
        EffectKind::Blur => Program::Blur,
        EffectKind::Bloom => Program::Bloom,
        EffectKind::Aces => Program::Aces,
    }
}

/// Applies the configured effect to each frame.
pub struct PostProcessor {
    config: EffectConfig,
    material: Option<Material>,
    frames: u64,
    dropped_frames: u64,
}

impl PostProcessor {
    /// A processor with no material; frames pass through until one is
    /// bound.
    pub fn new(config: EffectConfig) -> Self {
        Self {
            config,
            material: None,
            frames: 0,
            dropped_frames: 0,
        }
    }

    /// A processor with the material for `config.kind` loaded from `runner`.
    pub fn load<R: PassRunner + ?Sized>(runner: &R, config: EffectConfig) -> Result<Self, PassError> {
        let material = runner.load_material(program_for(config.kind))?;
        log::debug!("loaded {} material", material.program());
        let mut processor = Self::new(config);
        processor.bind_material(material);
        Ok(processor)
    }

    pub fn config(&self) -> &EffectConfig {
        &self.config
    }

    /// Replace the settings. Takes effect on the next frame.
    ///
    /// Changing `kind` does not swap the material; a mismatched material
    /// makes frames fall back until a matching one is bound.
    pub fn set_config(&mut self, config: EffectConfig) {
        if config.kind != self.config.kind {
            log::debug!("effect changed: {:?} -> {:?}", self.config.kind, config.kind);
        }
        self.config = config;
    }

    pub fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    pub fn bind_material(&mut self, material: Material) {
        self.material = Some(material);
    }

    /// Unbind the material; later frames pass through.
    pub fn unbind_material(&mut self) -> Option<Material> {
        self.material.take()
    }

    /// Frames processed so far, including passthrough and fallback frames.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames where the effect failed and the source was copied instead.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Write one frame of `source` through the effect into `destination`.
    ///
    /// Effect failures are absorbed: the source is copied and the error is
    /// returned inside [`FrameOutcome::Fallback`]. Only a failure of that
    /// copy itself surfaces as `Err`.
    pub fn process<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        source: &Image,
        destination: &Image,
    ) -> Result<FrameOutcome, PassError> {
        self.frames += 1;

        let Some(material) = self.material else {
            backend.blit(source, destination)?;
            return Ok(FrameOutcome::Passthrough);
        };

        match self.apply(backend, &material, source, destination) {
            Ok(()) => Ok(FrameOutcome::Processed),
            Err(err) => {
                self.dropped_frames += 1;
                log::warn!(
                    "{:?} effect failed on frame {}, copying source: {err}",
                    self.config.kind,
                    self.frames
                );
                backend.blit(source, destination)?;
                Ok(FrameOutcome::Fallback(err))
            }
        }
    }

    fn apply<B: Backend + ?Sized>(
        &self,
        backend: &B,
        material: &Material,
        source: &Image,
        destination: &Image,
    ) -> Result<(), EffectError> {
        expect_program(material.program(), program_for(self.config.kind))?;

        match self.config.kind {
            EffectKind::ColorAdjustment => {
                let params = color_adjustment_params(&self.config.color_adjustment);
                backend.run_pass(material, SINGLE_PASS, source, destination, &params)?;
            }
            EffectKind::BrokenGlass | EffectKind::Aces => {
                backend.run_pass(material, SINGLE_PASS, source, destination, &ParamSet::new())?;
            }
            EffectKind::Blur => {
                let blur = &self.config.blur;
                let separable = |kernel| {
                    let settings = SeparableSettings::from_config(kernel, blur);
                    separable_blur(backend, material, source, destination, &settings)
                };
                match blur.method {
                    BlurMethod::Box => separable(SeparableKernel::Box)?,
                    BlurMethod::Gaussian => separable(SeparableKernel::Gaussian)?,
                    BlurMethod::DualKawase => {
                        let settings = PyramidSettings::from_blur_config(blur);
                        pyramid_blur(backend, material, source, destination, &settings)?;
                    }
                }
            }
            EffectKind::Bloom => {
                let settings = BloomSettings::from_config(&self.config.bloom);
                bloom(backend, material, source, destination, &settings)?;
            }
        }
        Ok(())
    }
}

/// Parameters of the color adjustment pass.
pub fn color_adjustment_params(config: &ColorAdjustmentConfig) -> ParamSet {
    let mut params = ParamSet::new();
    params
        .set_float(Param::Brightness, config.brightness)
        .set_float(Param::Saturation, config.saturation)
        .set_float(Param::Contrast, config.contrast)
        .set_float(Param::VignetteIntensity, config.vignette_intensity)
        .set_float(Param::VignetteRoughness, config.vignette_roughness)
        .set_float(Param::VignetteSmoothness, config.vignette_smoothness)
        .set_float(Param::HueShift, config.hue_shift);
    params
}
