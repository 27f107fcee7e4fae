//! Configuration system for Afterglow.
//!
//! Effect settings persist to disk as RON files and can be overridden from the
//! command line. Every slider the host exposes has a documented range, and
//! [`Config::clamp_ranges`] pulls loaded values back into it.

mod cli;
mod config;
mod effects;
mod error;

pub use cli::CliArgs;
pub use config::{BackendKind, Config, DebugConfig, PipelineConfig};
pub use effects::{
    BloomConfig, BlurConfig, BlurMethod, ColorAdjustmentConfig, DOWNSAMPLE_RANGE, EffectConfig,
    EffectKind, ITERATIONS_RANGE, RADIUS_RANGE,
};
pub use error::ConfigError;
