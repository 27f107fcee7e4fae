//! wgpu backend: every pass is a fullscreen triangle into a texture.
//!
//! All programs share one shader module and one bind group layout
//! (uniforms, input texture and sampler, auxiliary texture and sampler).
//! Render pipelines are built lazily per entry point and target format.
//! Each pass is submitted on its own so the host can read results back at
//! any point.

mod context;
mod shaders;
mod uniforms;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use glam::Vec4;
use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

pub use context::{GpuContext, GpuContextError, init_gpu_context_blocking};
pub use shaders::POST_PROCESS_SHADER_SOURCE;

use crate::backend::HostImages;
use crate::image::{FilterMode, Image, ImageDesc, ImageId, PixelFormat};
use crate::pass::{Material, Param, ParamSet, PassError, PassRunner, Program, check_pass};
use crate::pool::{BufferPool, PoolError, PoolStats, StoragePool};
use uniforms::PassUniforms;

const TEXTURE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::RENDER_ATTACHMENT)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuImage {
    desc: ImageDesc,
    storage: GpuTexture,
    temporary: bool,
}

type PipelineKey = (&'static str, wgpu::TextureFormat);

/// GPU implementation of [`BufferPool`], [`PassRunner`] and [`HostImages`].
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: Mutex<FxHashMap<PipelineKey, Arc<wgpu::RenderPipeline>>>,
    sampler_linear: wgpu::Sampler,
    sampler_nearest: wgpu::Sampler,
    /// Bound in the auxiliary slot when `_BlurTargetTex` is unset.
    placeholder: GpuTexture,
    images: DashMap<ImageId, GpuImage>,
    storage: StoragePool<GpuTexture>,
    next_id: AtomicU32,
}

impl GpuBackend {
    /// Build the backend on an initialized device. `memory_budget` caps the
    /// bytes held by temporaries.
    pub fn new(context: GpuContext, memory_budget: Option<u64>) -> Self {
        let GpuContext { device, queue, .. } = context;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("post-process-shader"),
            source: wgpu::ShaderSource::Wgsl(POST_PROCESS_SHADER_SOURCE.into()),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("post-process-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: std::num::NonZeroU64::new(
                            std::mem::size_of::<PassUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
                texture_entry(1),
                sampler_entry(2),
                texture_entry(3),
                sampler_entry(4),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("post-process-layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let sampler_linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("post-process-linear"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });
        let sampler_nearest = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("post-process-nearest"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let placeholder = create_texture(
            &device,
            &ImageDesc::new(1, 1, PixelFormat::Rgba16Float),
            "post-process-placeholder",
        );

        Self {
            device,
            queue,
            shader,
            bind_group_layout,
            pipeline_layout,
            pipelines: Mutex::new(FxHashMap::default()),
            sampler_linear,
            sampler_nearest,
            placeholder,
            images: DashMap::new(),
            storage: StoragePool::new(memory_budget),
            next_id: AtomicU32::new(1),
        }
    }

    fn sampler(&self, filter: FilterMode) -> &wgpu::Sampler {
        match filter {
            FilterMode::Nearest => &self.sampler_nearest,
            FilterMode::Bilinear => &self.sampler_linear,
        }
    }

    fn pipeline(&self, entry: &'static str, format: wgpu::TextureFormat) -> Arc<wgpu::RenderPipeline> {
        let mut pipelines = self
            .pipelines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pipelines
            .entry((entry, format))
            .or_insert_with(|| {
                log::debug!("building pipeline {entry} for {format:?}");
                Arc::new(create_fullscreen_pipeline(
                    &self.device,
                    &self.shader,
                    &self.pipeline_layout,
                    entry,
                    format,
                ))
            })
            .clone()
    }

    fn mint(&self, desc: ImageDesc, storage: GpuTexture, temporary: bool) -> Image {
        let id = ImageId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.images.insert(
            id,
            GpuImage {
                desc,
                storage,
                temporary,
            },
        );
        Image::new(id, desc)
    }

    /// Draw `entry` reading `input` (and `aux`) into `output`.
    fn draw(
        &self,
        entry: &'static str,
        input: &Image,
        output: &Image,
        aux: Option<ImageId>,
        uniforms: &PassUniforms,
    ) -> Result<(), PassError> {
        let input_image = self
            .images
            .get(&input.id())
            .ok_or(PassError::UnknownImage(input.id()))?;
        let output_image = self
            .images
            .get(&output.id())
            .ok_or(PassError::UnknownImage(output.id()))?;
        let aux_image = aux
            .map(|id| self.images.get(&id).ok_or(PassError::UnknownImage(id)))
            .transpose()?;
        let (aux_view, aux_filter) = match &aux_image {
            Some(image) => (&image.storage.view, image.desc.filter),
            None => (&self.placeholder.view, FilterMode::Bilinear),
        };

        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("post-process-uniforms"),
                contents: bytemuck::bytes_of(uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(entry),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&input_image.storage.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(
                        self.sampler(input_image.desc.filter),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(aux_view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(self.sampler(aux_filter)),
                },
            ],
        });

        let pipeline = self.pipeline(entry, texture_format(output_image.desc.format));
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(entry) });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(entry),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output_image.storage.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

impl BufferPool for GpuBackend {
    fn acquire(&self, desc: ImageDesc) -> Result<Image, PoolError> {
        let storage = self.storage.obtain(&desc, || {
            let limit = self.device.limits().max_texture_dimension_2d;
            if desc.width() > limit || desc.height() > limit {
                return Err(PoolError::Device(format!(
                    "{} exceeds the device texture limit {limit}",
                    desc.extent
                )));
            }
            Ok(create_texture(&self.device, &desc, "post-process-temporary"))
        })?;
        Ok(self.mint(desc, storage, true))
    }

    fn release(&self, image: Image) {
        let Some((_, entry)) = self.images.remove(&image.id()) else {
            log::warn!("release of unknown {}", image.id());
            return;
        };
        debug_assert!(entry.temporary, "released host image {}", image.id());
        self.storage.recycle(&entry.desc, entry.storage);
    }

    fn trim(&self) {
        let count = self.storage.trim();
        if count > 0 {
            log::debug!("trimmed {count} pooled textures");
        }
    }

    fn stats(&self) -> PoolStats {
        self.storage.stats()
    }
}

impl PassRunner for GpuBackend {
    fn load_material(&self, program: Program) -> Result<Material, PassError> {
        // Build every pipeline up front so the first frame doesn't stall.
        for pass in 0..program.pass_count() {
            let entry =
                shaders::entry_point(program, pass).ok_or(PassError::UnsupportedProgram(program))?;
            for format in [PixelFormat::Rgba8Unorm, PixelFormat::Rgba16Float] {
                self.pipeline(entry, texture_format(format));
            }
        }
        Ok(Material::new(program))
    }

    fn run_pass(
        &self,
        material: &Material,
        pass: u32,
        input: &Image,
        output: &Image,
        params: &ParamSet,
    ) -> Result<(), PassError> {
        check_pass(material, pass)?;
        let entry = shaders::entry_point(material.program(), pass).ok_or(PassError::UnknownPass {
            program: material.program(),
            pass,
        })?;
        let aux = params.texture(Param::BlurTargetTex);
        let uniforms = PassUniforms::from_params(params, aux.is_some());
        self.draw(entry, input, output, aux, &uniforms)
    }

    fn blit(&self, input: &Image, output: &Image) -> Result<(), PassError> {
        let uniforms = PassUniforms::from_params(&ParamSet::new(), false);
        self.draw(shaders::BLIT_ENTRY, input, output, None, &uniforms)
    }
}

impl HostImages for GpuBackend {
    fn create_image(&self, desc: ImageDesc) -> Result<Image, PoolError> {
        if desc.width() == 0 || desc.height() == 0 {
            return Err(PoolError::ZeroSized {
                extent: desc.extent,
            });
        }
        let storage = create_texture(&self.device, &desc, "post-process-host");
        Ok(self.mint(desc, storage, false))
    }

    fn write_pixels(&self, image: &Image, pixels: &[Vec4]) -> Result<(), PassError> {
        let expected = image.extent().area() as usize;
        if pixels.len() != expected {
            return Err(PassError::SizeMismatch {
                actual: pixels.len(),
                expected,
                extent: image.extent(),
            });
        }
        let entry = self
            .images
            .get(&image.id())
            .ok_or(PassError::UnknownImage(image.id()))?;
        let desc = entry.desc;
        let data = encode_texels(pixels, desc.format);

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.storage.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.width() * desc.format.bytes_per_pixel() as u32),
                rows_per_image: None,
            },
            extent_3d(&desc),
        );
        Ok(())
    }

    fn read_pixels(&self, image: &Image) -> Result<Vec<Vec4>, PassError> {
        let entry = self
            .images
            .get(&image.id())
            .ok_or(PassError::UnknownImage(image.id()))?;
        let desc = entry.desc;
        let unpadded = desc.width() * desc.format.bytes_per_pixel() as u32;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("post-process-readback"),
            size: u64::from(padded) * u64::from(desc.height()),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("post-process-readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.storage.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(desc.height()),
                },
            },
            extent_3d(&desc),
        );
        drop(entry);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|err| PassError::Device(err.to_string()))?;
        rx.recv()
            .map_err(|err| PassError::Device(err.to_string()))?
            .map_err(|err| PassError::Device(err.to_string()))?;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity(desc.extent.area() as usize);
        for row in mapped.chunks_exact(padded as usize) {
            pixels.extend(decode_texels(&row[..unpadded as usize], desc.format));
        }
        drop(mapped);
        buffer.unmap();
        Ok(pixels)
    }

    fn destroy_image(&self, image: Image) {
        if self.images.remove(&image.id()).is_none() {
            log::warn!("destroy of unknown {}", image.id());
        }
    }
}

fn extent_3d(desc: &ImageDesc) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: desc.width(),
        height: desc.height(),
        depth_or_array_layers: 1,
    }
}

fn create_texture(device: &wgpu::Device, desc: &ImageDesc, label: &str) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent_3d(desc),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(desc.format),
        usage: TEXTURE_USAGE,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}

/// Create a fullscreen render pipeline with the given fragment entry point.
fn create_fullscreen_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    fragment_entry: &str,
    target_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(fragment_entry),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_fullscreen"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    })
}

/// Texel bytes for upload, row-major.
fn encode_texels(pixels: &[Vec4], format: PixelFormat) -> Vec<u8> {
    match format {
        PixelFormat::Rgba8Unorm => pixels
            .iter()
            .flat_map(|p| {
                p.to_array()
                    .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
            })
            .collect(),
        PixelFormat::Rgba16Float => {
            let halves: Vec<u16> = pixels
                .iter()
                .flat_map(|p| p.to_array().map(|c| half::f16::from_f32(c).to_bits()))
                .collect();
            bytemuck::cast_slice(&halves).to_vec()
        }
    }
}

fn decode_texels(bytes: &[u8], format: PixelFormat) -> impl Iterator<Item = Vec4> + '_ {
    let stride = format.bytes_per_pixel() as usize;
    bytes.chunks_exact(stride).map(move |texel| match format {
        PixelFormat::Rgba8Unorm => {
            Vec4::new(texel[0] as f32, texel[1] as f32, texel[2] as f32, texel[3] as f32) / 255.0
        }
        PixelFormat::Rgba16Float => {
            let channel = |i: usize| {
                half::f16::from_bits(u16::from_le_bytes([texel[2 * i], texel[2 * i + 1]])).to_f32()
            };
            Vec4::new(channel(0), channel(1), channel(2), channel(3))
        }
    })
}
