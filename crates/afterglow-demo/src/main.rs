//! Command-line host for the Afterglow post-processing pipeline.
//!
//! Reads an image, runs one frame of the configured effect through the CPU
//! or wgpu backend, and writes the result.
//! Run with `cargo run -p afterglow-demo -- -i in.png -o out.png --effect bloom`.

use std::path::Path;

use afterglow_config::{BackendKind, CliArgs, Config};
use afterglow_render::{
    BufferPool, CpuBackend, FrameOutcome, GpuBackend, HostImages, ImageDesc, PixelFormat,
    PassRunner, PostProcessor, init_gpu_context_blocking,
};
use anyhow::Context;
use clap::Parser;
use glam::Vec4;
use tracing::{debug, info, warn};

/// A backend the host can upload to and read back from.
trait FrameBackend: BufferPool + PassRunner + HostImages {}
impl<T: BufferPool + PassRunner + HostImages> FrameBackend for T {}

enum SelectedBackend {
    Cpu(CpuBackend),
    Gpu(GpuBackend),
}

impl SelectedBackend {
    /// The requested backend, or the CPU one when no GPU adapter is usable.
    fn create(config: &Config) -> Self {
        let budget = config.pipeline.memory_budget_bytes();
        if config.pipeline.backend == BackendKind::Gpu {
            match init_gpu_context_blocking() {
                Ok(context) => {
                    info!("GPU backend on {}", context.adapter_info.name);
                    return Self::Gpu(GpuBackend::new(context, budget));
                }
                Err(e) => warn!("GPU backend unavailable ({e}), using CPU"),
            }
        }
        let backend = match budget {
            Some(bytes) => CpuBackend::with_memory_budget(bytes),
            None => CpuBackend::new(),
        };
        backend.set_recording(config.debug.trace_passes);
        Self::Cpu(backend)
    }

    fn backend(&self) -> &dyn FrameBackend {
        match self {
            Self::Cpu(backend) => backend,
            Self::Gpu(backend) => backend,
        }
    }

    fn log_passes(&self) {
        let Self::Cpu(backend) = self else {
            debug!("pass tracing is only recorded by the CPU backend");
            return;
        };
        for record in backend.take_pass_log() {
            debug!(
                "{:?}: {} ({}) -> {} ({})",
                record.kind,
                record.input,
                record.input_extent,
                record.output,
                record.output_extent
            );
        }
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// Decode `path` into linear RGBA texels, row-major from the top-left.
fn load_linear(path: &Path) -> anyhow::Result<(u32, u32, Vec<Vec4>)> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .to_rgba32f();
    let (width, height) = decoded.dimensions();
    let texels = decoded
        .pixels()
        .map(|p| {
            Vec4::new(
                srgb_to_linear(p[0]),
                srgb_to_linear(p[1]),
                srgb_to_linear(p[2]),
                p[3],
            )
        })
        .collect();
    Ok((width, height, texels))
}

/// Encode linear texels as 8-bit sRGB. HDR values are clipped.
fn encode_srgb(width: u32, height: u32, texels: &[Vec4]) -> image::RgbaImage {
    let to_byte = |c: f32| (c * 255.0 + 0.5) as u8;
    image::RgbaImage::from_fn(width, height, |x, y| {
        let t = texels[(y * width + x) as usize];
        image::Rgba([
            to_byte(linear_to_srgb(t.x)),
            to_byte(linear_to_srgb(t.y)),
            to_byte(linear_to_srgb(t.z)),
            to_byte(t.w.clamp(0.0, 1.0)),
        ])
    })
}

fn save(path: &Path, output: image::RgbaImage) -> anyhow::Result<()> {
    let is_jpeg = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
    let result = if is_jpeg {
        image::DynamicImage::ImageRgba8(output).to_rgb8().save(path)
    } else {
        output.save(path)
    };
    result.with_context(|| format!("failed to write {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config_dir = match args.config.clone() {
        Some(dir) => dir,
        None => Config::default_dir()?,
    };
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    let clamped = config.clamp_ranges();

    let log_dir = config_dir.join("logs");
    afterglow_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));
    if clamped > 0 {
        warn!("{clamped} effect settings were outside their range and have been clamped");
    }

    let (width, height, pixels) = load_linear(&args.input)?;
    info!(
        "{}: {width}x{height}, effect {:?}",
        args.input.display(),
        config.effect.kind
    );

    let selected = SelectedBackend::create(&config);
    let backend = selected.backend();

    let desc = ImageDesc::new(width, height, PixelFormat::Rgba16Float);
    let source = backend.create_image(desc)?;
    let destination = backend.create_image(desc)?;
    backend.write_pixels(&source, &pixels)?;

    let mut processor = PostProcessor::load(backend, config.effect.clone())?;
    match processor.process(backend, &source, &destination)? {
        FrameOutcome::Processed => info!("effect applied"),
        FrameOutcome::Passthrough => info!("no material bound, image copied"),
        FrameOutcome::Fallback(e) => warn!("effect failed, image copied: {e}"),
    }
    selected.log_passes();

    let result = backend.read_pixels(&destination)?;
    save(&args.output, encode_srgb(width, height, &result))?;

    let stats = backend.stats();
    debug!(
        "pool: {} acquired, {} allocations, {} bytes",
        stats.acquired, stats.allocations, stats.allocated_bytes
    );
    backend.destroy_image(source);
    backend.destroy_image(destination);
    backend.trim();

    info!("wrote {}", args.output.display());
    Ok(())
}
