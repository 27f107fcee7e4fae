//! Post-processing pipeline: pooled temporaries, multi-pass blur and bloom
//! stages, and a per-frame effect processor over CPU and wgpu backends.

pub mod backend;
pub mod bloom;
pub mod cpu;
pub mod error;
pub mod gpu;
pub mod image;
pub mod pass;
pub mod pool;
pub mod post_process;
pub mod pyramid;
pub mod separable;


pub use backend::{Backend, HostImages};
pub use bloom::{BloomSettings, bloom};
pub use cpu::{CpuBackend, PassKind, PassRecord};
pub use error::EffectError;
pub use gpu::{GpuBackend, GpuContext, GpuContextError, init_gpu_context_blocking};
pub use image::{Extent, FilterMode, Image, ImageDesc, ImageId, PixelFormat, level_extent};
pub use pass::{
    Material, Param, ParamSet, ParamValue, PassError, PassRunner, Program, SINGLE_PASS,
    bloom_pass, blur_pass,
};
pub use pool::{BufferPool, PoolError, PoolStats, TemporaryImage, acquire_temporary};
pub use post_process::{FrameOutcome, PostProcessor, color_adjustment_params, program_for};
pub use pyramid::{PyramidPasses, PyramidSettings, PyramidVariant, pyramid_blur};
pub use separable::{PingPong, SeparableKernel, SeparableSettings, separable_blur};
