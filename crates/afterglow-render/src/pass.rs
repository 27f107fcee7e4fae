//! The pass interface the pipeline drives.
//!
//! A pass is an opaque full-screen operation: given an input image, an output
//! image, and a [`ParamSet`], it writes the output. Passes are grouped into
//! [`Program`]s (one per effect) and addressed by a small index whose meaning
//! is fixed per program. The pipeline only decides which passes run, in what
//! order, on which buffers; what a pass computes is the backend's business.

use std::fmt;

use glam::Vec2;
use rustc_hash::FxHashMap;

use crate::image::{Extent, Image, ImageId};

/// Effect shader families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    ColorAdjustment,
    BrokenGlass,
    Blur,
    Bloom,
    Aces,
}

impl Program {
    pub const ALL: [Program; 5] = [
        Program::ColorAdjustment,
        Program::BrokenGlass,
        Program::Blur,
        Program::Bloom,
        Program::Aces,
    ];

    /// Number of passes the program defines.
    pub fn pass_count(self) -> u32 {
        match self {
            Program::Blur | Program::Bloom => 4,
            Program::ColorAdjustment | Program::BrokenGlass | Program::Aces => 1,
        }
    }

    /// Stable name, used for labels and logs.
    pub fn name(self) -> &'static str {
        match self {
            Program::ColorAdjustment => "color-adjustment",
            Program::BrokenGlass => "broken-glass",
            Program::Blur => "blur",
            Program::Bloom => "bloom",
            Program::Aces => "aces",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pass indices of [`Program::Blur`].
pub mod blur_pass {
    pub const BOX: u32 = 0;
    pub const GAUSSIAN: u32 = 1;
    pub const KAWASE_DOWN: u32 = 2;
    pub const KAWASE_UP: u32 = 3;
}

/// Pass indices of [`Program::Bloom`].
pub mod bloom_pass {
    pub const PREFILTER: u32 = 0;
    pub const KAWASE_DOWN: u32 = 1;
    pub const KAWASE_UP: u32 = 2;
    pub const BLEND: u32 = 3;
}

/// Index of the only pass of single-pass programs.
pub const SINGLE_PASS: u32 = 0;

/// A program loaded into a backend and ready to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Material {
    program: Program,
}

impl Material {
    /// Only backends mint materials, after preparing the program.
    pub(crate) fn new(program: Program) -> Self {
        Self { program }
    }

    pub fn program(&self) -> Program {
        self.program
    }
}

/// Named pass parameters.
///
/// The string names are the stable identifiers shader programs declare.
/// [`Param::ALL`] is the complete, immutable lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    BlurRadius,
    BlurOffset,
    BlurTargetTex,
    Threshold,
    ThresholdKnee,
    BloomIntensity,
    Brightness,
    Saturation,
    Contrast,
    VignetteIntensity,
    VignetteRoughness,
    VignetteSmoothness,
    HueShift,
}

impl Param {
    pub const ALL: [Param; 13] = [
        Param::BlurRadius,
        Param::BlurOffset,
        Param::BlurTargetTex,
        Param::Threshold,
        Param::ThresholdKnee,
        Param::BloomIntensity,
        Param::Brightness,
        Param::Saturation,
        Param::Contrast,
        Param::VignetteIntensity,
        Param::VignetteRoughness,
        Param::VignetteSmoothness,
        Param::HueShift,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Param::BlurRadius => "_BlurRadius",
            Param::BlurOffset => "_BlurOffset",
            Param::BlurTargetTex => "_BlurTargetTex",
            Param::Threshold => "_Threshold",
            Param::ThresholdKnee => "_ThresholdKnee",
            Param::BloomIntensity => "_BloomIntensity",
            Param::Brightness => "_Brightness",
            Param::Saturation => "_Saturation",
            Param::Contrast => "_Contrast",
            Param::VignetteIntensity => "_VignetteIntensity",
            Param::VignetteRoughness => "_VignetteRoughness",
            Param::VignetteSmoothness => "_VignetteSmoothness",
            Param::HueShift => "_HueShift",
        }
    }

    /// Look a parameter up by its shader name.
    pub fn from_name(name: &str) -> Option<Param> {
        Param::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Vec2(Vec2),
    Texture(ImageId),
}

/// Parameter bindings for a pass. Later `set` calls overwrite earlier ones,
/// which is how the Gaussian stage flips `_BlurOffset` between its two passes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    values: FxHashMap<Param, ParamValue>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, param: Param, value: ParamValue) -> &mut Self {
        self.values.insert(param, value);
        self
    }

    pub fn set_float(&mut self, param: Param, value: f32) -> &mut Self {
        self.set(param, ParamValue::Float(value))
    }

    pub fn set_vec2(&mut self, param: Param, value: Vec2) -> &mut Self {
        self.set(param, ParamValue::Vec2(value))
    }

    pub fn set_texture(&mut self, param: Param, image: &Image) -> &mut Self {
        self.set(param, ParamValue::Texture(image.id()))
    }

    pub fn remove(&mut self, param: Param) -> Option<ParamValue> {
        self.values.remove(&param)
    }

    pub fn get(&self, param: Param) -> Option<ParamValue> {
        self.values.get(&param).copied()
    }

    /// Scalar value of `param`, or `default` when unset or not a scalar.
    pub fn float_or(&self, param: Param, default: f32) -> f32 {
        match self.get(param) {
            Some(ParamValue::Float(v)) => v,
            _ => default,
        }
    }

    /// Vector value of `param`, or `default` when unset or not a vector.
    pub fn vec2_or(&self, param: Param, default: Vec2) -> Vec2 {
        match self.get(param) {
            Some(ParamValue::Vec2(v)) => v,
            _ => default,
        }
    }

    /// Texture bound to `param`, if any.
    pub fn texture(&self, param: Param) -> Option<ImageId> {
        match self.get(param) {
            Some(ParamValue::Texture(id)) => Some(id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Errors from running a pass or touching backend images.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PassError {
    /// The image does not belong to this backend, or was already destroyed.
    #[error("unknown image {0}")]
    UnknownImage(ImageId),

    /// The program has no pass with this index.
    #[error("program {program} has no pass {pass}")]
    UnknownPass { program: Program, pass: u32 },

    /// Host pixel data does not cover the image.
    #[error("pixel data has {actual} texels, expected {expected} for {extent}")]
    SizeMismatch {
        actual: usize,
        expected: usize,
        extent: Extent,
    },

    /// The backend cannot prepare this program.
    #[error("program {0} is not supported by this backend")]
    UnsupportedProgram(Program),

    /// The device reported an error.
    #[error("device error: {0}")]
    Device(String),
}

/// Runs passes on a backend's images.
pub trait PassRunner: Send + Sync {
    /// Prepare `program` so its passes can run.
    fn load_material(&self, program: Program) -> Result<Material, PassError>;

    /// Run pass `pass` of `material`, reading `input` and writing `output`.
    fn run_pass(
        &self,
        material: &Material,
        pass: u32,
        input: &Image,
        output: &Image,
        params: &ParamSet,
    ) -> Result<(), PassError>;

    /// Resample `input` into `output` with no material, using the input's
    /// filter mode.
    fn blit(&self, input: &Image, output: &Image) -> Result<(), PassError>;
}

/// Check that `pass` exists in `material`'s program.
pub(crate) fn check_pass(material: &Material, pass: u32) -> Result<(), PassError> {
    if pass < material.program().pass_count() {
        Ok(())
    } else {
        Err(PassError::UnknownPass {
            program: material.program(),
            pass,
        })
    }
}
