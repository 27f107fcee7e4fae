//! Command-line argument parsing for Afterglow.

use std::path::PathBuf;

use clap::Parser;

use crate::{BackendKind, BlurMethod, Config, EffectKind};

/// Afterglow command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "afterglow", about = "Apply a post-processing effect to an image")]
pub struct CliArgs {
    /// Input image.
    #[arg(long, short)]
    pub input: PathBuf,

    /// Output image.
    #[arg(long, short)]
    pub output: PathBuf,

    /// Effect to apply.
    #[arg(long, value_enum)]
    pub effect: Option<EffectKind>,

    /// Blur algorithm (blur effect only).
    #[arg(long, value_enum)]
    pub blur_method: Option<BlurMethod>,

    /// Iteration or pyramid level count for the active blur/bloom effect.
    #[arg(long, allow_negative_numbers = true)]
    pub iterations: Option<i32>,

    /// Blur radius for the active blur/bloom effect.
    #[arg(long, allow_negative_numbers = true)]
    pub radius: Option<i32>,

    /// Downsample factor for the active blur/bloom effect.
    #[arg(long, allow_negative_numbers = true)]
    pub downsample: Option<i32>,

    /// Bloom threshold.
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Bloom intensity.
    #[arg(long)]
    pub intensity: Option<f32>,

    /// Pass backend.
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    ///
    /// `iterations`, `radius`, and `downsample` go to the blur or bloom
    /// section, whichever effect is active after the `effect` override.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(kind) = args.effect {
            self.effect.kind = kind;
        }
        if let Some(method) = args.blur_method {
            self.effect.blur.method = method;
        }
        match self.effect.kind {
            EffectKind::Bloom => {
                let bloom = &mut self.effect.bloom;
                if let Some(n) = args.iterations {
                    bloom.iterations = n;
                }
                if let Some(r) = args.radius {
                    bloom.radius = r;
                }
                if let Some(d) = args.downsample {
                    bloom.downsample = d;
                }
            }
            _ => {
                let blur = &mut self.effect.blur;
                if let Some(n) = args.iterations {
                    blur.iterations = n;
                }
                if let Some(r) = args.radius {
                    blur.radius = r;
                }
                if let Some(d) = args.downsample {
                    blur.downsample = d;
                }
            }
        }
        if let Some(t) = args.threshold {
            self.effect.bloom.threshold = t;
        }
        if let Some(i) = args.intensity {
            self.effect.bloom.intensity = i;
        }
        if let Some(backend) = args.backend {
            self.pipeline.backend = backend;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
