//! wgpu implementation of [`RenderBackend`].
//!
//! Generated GLSL is translated to WGSL with naga before it reaches wgpu, so
//! compile errors are reported with source positions instead of panicking
//! inside the device.

use super::{Compiled, LineMap, PassDraw, PixelFormat, ProgramSource, RenderBackend, UniformLocation};
use crate::error::BackendError;
use crate::image_io::{ImageFrame, QuadVertex};
use crate::shader::FilterMode;
use anyhow::{anyhow, Result};
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::ShaderStage;
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

/// Shared vertex stage: draws the quad and maps the screen position into the
/// pass's coordinate space.
const VERTEX_SHADER: &str = r#"
struct FsFrame {
    map2tex: vec4<f32>,
    rel2map: vec4<f32>,
    image_size: vec2<f32>,
}

@group(0) @binding(2) var<uniform> frame: FsFrame;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coords: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) pos: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.pos = frame.rel2map.xy + in.tex_coords * frame.rel2map.zw;
    return out;
}
"#;

/// Passthrough copy used to convert any target into RGBA8 for readback.
const BLIT_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}

@vertex
fn vs_blit(@location(0) position: vec2<f32>, @location(1) tex_coords: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(position, 0.0, 1.0);
    out.tex_coords = tex_coords;
    return out;
}

@group(0) @binding(0) var t_texture: texture_2d<f32>;
@group(0) @binding(1) var s_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(t_texture, s_sampler, in.tex_coords);
}
"#;

/// Mirrors the `FsFrame` block of the generated programs (std140).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniforms {
    map2tex: [f32; 4],
    rel2map: [f32; 4],
    image_size: [f32; 2],
    _pad: [f32; 2],
}

pub struct WgpuVertexStage {
    module: wgpu::ShaderModule,
}

/// A compiled pass: one render pipeline per supported target format plus
/// its uniform buffers.
pub struct WgpuProgram {
    pipelines: Vec<(wgpu::TextureFormat, wgpu::RenderPipeline)>,
    frame_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    params_size: usize,
    locations: HashMap<String, UniformLocation>,
}

impl WgpuProgram {
    fn pipeline_for(&self, format: wgpu::TextureFormat) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.iter().find(|(f, _)| *f == format).map(|(_, p)| p)
    }
}

pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

impl WgpuTexture {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

/// Headless wgpu device running filter passes.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    features: wgpu::Features,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    blit_layout: wgpu::BindGroupLayout,
    blit_pipeline: wgpu::RenderPipeline,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    target_formats: Vec<wgpu::TextureFormat>,
    viewport: (u32, u32),
}

impl WgpuBackend {
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| BackendError::Unavailable(format!("no GPU adapter: {e}")))?;
        info!("Using GPU adapter {}", adapter.get_info().name);

        let wanted = wgpu::Features::TEXTURE_FORMAT_16BIT_NORM | wgpu::Features::FLOAT32_FILTERABLE;
        let features = adapter.features() & wanted;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("filterstack device"),
            required_features: features,
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))?;

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
        let buffer_entry = |binding, visibility| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Bind Group Layout"),
            entries: &[
                texture_entry(0),
                sampler_entry(1),
                buffer_entry(2, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
                buffer_entry(3, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Pass Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Bind Group Layout"),
            entries: &[texture_entry(0), sampler_entry(1)],
        });
        let blit_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(BLIT_SHADER)),
        });
        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[&blit_layout],
            immediate_size: 0,
        });
        let blit_pipeline = render_pipeline(
            &device,
            "Blit Pipeline",
            &blit_pipeline_layout,
            (&blit_module, "vs_blit"),
            (&blit_module, "fs_main"),
            wgpu::TextureFormat::Rgba8Unorm,
        );

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vertex Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Index Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let sampler = |filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Pass Sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        };
        let linear_sampler = sampler(wgpu::FilterMode::Linear);
        let nearest_sampler = sampler(wgpu::FilterMode::Nearest);

        let mut backend = Self {
            device,
            queue,
            features,
            bind_group_layout,
            pipeline_layout,
            blit_layout,
            blit_pipeline,
            vertex_buffer,
            index_buffer,
            linear_sampler,
            nearest_sampler,
            target_formats: Vec::new(),
            viewport: (0, 0),
        };
        let mut formats = Vec::new();
        for format in [
            PixelFormat::Rgba8,
            PixelFormat::Rgba16,
            PixelFormat::Rgba16F,
            PixelFormat::Rgba32F,
        ] {
            let tf = backend.texture_format(format);
            if !formats.contains(&tf) {
                formats.push(tf);
            }
        }
        backend.target_formats = formats;
        Ok(backend)
    }

    /// Storage used for a pixel format on this device.
    pub fn texture_format(&self, format: PixelFormat) -> wgpu::TextureFormat {
        match format {
            PixelFormat::DontCare | PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::Rgba16 if self.features.contains(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM) => {
                wgpu::TextureFormat::Rgba16Unorm
            }
            PixelFormat::Rgba32F if self.features.contains(wgpu::Features::FLOAT32_FILTERABLE) => {
                wgpu::TextureFormat::Rgba32Float
            }
            PixelFormat::Rgba16 | PixelFormat::Rgba16F | PixelFormat::Rgba32F => wgpu::TextureFormat::Rgba16Float,
        }
    }

    fn create_texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> WgpuTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        WgpuTexture {
            texture,
            view,
            format,
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Uploads an image as a sampleable RGBA8 texture.
    pub fn upload_image(&self, frame: &ImageFrame) -> WgpuTexture {
        let tex = self.create_texture(
            "Source Texture",
            frame.width,
            frame.height,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
        );
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        tex
    }

    /// Copies a texture back to the CPU, converting it to RGBA8.
    pub fn read_back(&self, source: &WgpuTexture) -> Result<ImageFrame> {
        let (width, height) = (source.width, source.height);
        let staging = self.create_texture(
            "Readback Texture",
            width,
            height,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.nearest_sampler),
                },
            ],
        });

        let padded_row = (width * 4).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: u64::from(padded_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
        {
            let mut pass = begin_pass(&mut encoder, "Blit Pass", &staging.view);
            pass.set_pipeline(&self.blit_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..QuadVertex::INDICES.len() as u32, 0, 0..1);
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &staging.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| anyhow!("GPU poll failed: {:?}", e))?;
        receiver.recv()??;

        let row = (width * 4) as usize;
        let mut data = Vec::with_capacity(row * height as usize);
        {
            let mapped = slice.get_mapped_range();
            for chunk in mapped.chunks(padded_row as usize) {
                data.extend_from_slice(&chunk[..row]);
            }
        }
        buffer.unmap();
        ImageFrame::from_data(width, height, data)
    }
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    })
}

fn render_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    vertex: (&wgpu::ShaderModule, &str),
    fragment: (&wgpu::ShaderModule, &str),
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: vertex.0,
            entry_point: Some(vertex.1),
            buffers: &[QuadVertex::layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: fragment.0,
            entry_point: Some(fragment.1),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

/// Translates a GLSL fragment program to WGSL.
///
/// Errors come back one per line as `0:<line>(<column>): error: <message>`,
/// with lines counted in the shader file rather than the generated program.
fn glsl_to_wgsl(glsl: &str, lines: &LineMap) -> std::result::Result<String, String> {
    let report = |location: Option<naga::SourceLocation>, message: &dyn std::fmt::Display| match location {
        Some(loc) => format!(
            "0:{}({}): error: {}",
            lines.source_line(loc.line_number),
            loc.line_position,
            message
        ),
        None => format!("0:0(0): error: {}", message),
    };

    let mut frontend = Frontend::default();
    let options = Options::from(ShaderStage::Fragment);
    let module = frontend.parse(&options, glsl).map_err(|errors| {
        errors
            .errors
            .iter()
            .map(|e| report(e.meta.is_defined().then(|| e.meta.location(glsl)), &e.kind))
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    let info = validator
        .validate(&module)
        .map_err(|e| report(e.location(glsl), &e))?;
    naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
        .map_err(|e| format!("WGSL generation error: {e}"))
}

impl RenderBackend for WgpuBackend {
    type VertexStage = WgpuVertexStage;
    type Program = WgpuProgram;
    type Texture = WgpuTexture;

    fn create_vertex_stage(&mut self) -> std::result::Result<WgpuVertexStage, BackendError> {
        let module = naga::front::wgsl::parse_str(VERTEX_SHADER)
            .map_err(|e| BackendError::VertexStage(e.emit_to_string(VERTEX_SHADER)))?;
        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| BackendError::VertexStage(e.emit_to_string(VERTEX_SHADER)))?;
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Vertex Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(VERTEX_SHADER)),
        });
        Ok(WgpuVertexStage { module })
    }

    fn compile_program(
        &mut self,
        vertex: &WgpuVertexStage,
        source: &ProgramSource<'_>,
    ) -> std::result::Result<Compiled<WgpuProgram>, String> {
        let wgsl = glsl_to_wgsl(source.code, &source.lines)?;

        // layout mismatches (e.g. extra user bindings) only show up here
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(wgsl)),
        });
        let pipelines = self
            .target_formats
            .iter()
            .map(|&format| {
                let pipeline = render_pipeline(
                    &self.device,
                    source.label,
                    &self.pipeline_layout,
                    (&vertex.module, "vs_main"),
                    (&module, "main"),
                    format,
                );
                (format, pipeline)
            })
            .collect::<Vec<_>>();
        if let Some(err) = pollster::block_on(scope.pop()) {
            return Err(format!("link error: {err}"));
        }

        let frame_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        // binding 3 is always bound, so keep a minimal buffer around
        let params_size = source.uniform_block_size.max(16) as usize;
        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Parameter Uniforms"),
            size: params_size as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let locations = source
            .uniforms
            .iter()
            .map(|slot| (slot.name.clone(), UniformLocation(slot.offset)))
            .collect();
        debug!("compiled {} ({} uniform bytes)", source.label, source.uniform_block_size);

        Ok(Compiled {
            program: WgpuProgram {
                pipelines,
                frame_buffer,
                params_buffer,
                params_size,
                locations,
            },
            log: String::new(),
        })
    }

    fn uniform_location(&self, program: &WgpuProgram, name: &str) -> Option<UniformLocation> {
        program.locations.get(name).copied()
    }

    fn create_target(&mut self, width: u32, height: u32, format: PixelFormat) -> WgpuTexture {
        let tf = self.texture_format(format);
        if format != PixelFormat::DontCare && tf == wgpu::TextureFormat::Rgba16Float && format != PixelFormat::Rgba16F {
            warn!("{:?} is not supported by this device, using Rgba16Float", format);
        }
        self.create_texture(
            "Intermediate Texture",
            width,
            height,
            tf,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
        )
    }

    fn begin_frame(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn draw(&mut self, draw: PassDraw<'_, Self>) {
        let program = draw.program;
        let Some(pipeline) = program.pipeline_for(draw.output.format) else {
            warn!("no render pipeline for target format {:?}", draw.output.format);
            return;
        };

        let frame = FrameUniforms {
            map2tex: draw.map2tex,
            rel2map: draw.rel2map,
            image_size: draw.image_size,
            _pad: [0.0; 2],
        };
        self.queue.write_buffer(&program.frame_buffer, 0, bytemuck::bytes_of(&frame));

        let mut block = vec![0u8; program.params_size];
        for upload in draw.uniforms {
            let bytes: &[u8] = bytemuck::cast_slice(upload.values);
            let offset = upload.location.0 as usize;
            if let Some(dst) = block.get_mut(offset..offset + bytes.len()) {
                dst.copy_from_slice(bytes);
            }
        }
        self.queue.write_buffer(&program.params_buffer, 0, &block);

        let sampler = match draw.filter {
            FilterMode::Linear => &self.linear_sampler,
            FilterMode::Nearest => &self.nearest_sampler,
        };
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&draw.input.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: program.frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: program.params_buffer.as_entire_binding(),
                },
            ],
        });

        let (vw, vh) = self.viewport;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Pass Encoder") });
        {
            let mut pass = begin_pass(&mut encoder, "Filter Pass", &draw.output.view);
            pass.set_viewport(
                0.0,
                0.0,
                vw.clamp(1, draw.output.width) as f32,
                vh.clamp(1, draw.output.height) as f32,
                0.0,
                1.0,
            );
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..QuadVertex::INDICES.len() as u32, 0, 0..1);
        }
        // submitted per pass so each pass sees its own uniform values
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn finish(&mut self) {
        if let Err(e) = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        }) {
            debug!("GPU poll failed: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::shader::{self, codegen, GeneratedPass};

    fn generated(src: &str, pass: usize) -> GeneratedPass {
        let mut diag = Diagnostics::default();
        let parsed = shader::parse(src, &mut diag).unwrap();
        let user_code = shader::strip_uniforms(src, &parsed.uniform_spans);
        shader::generate(&parsed, &user_code, pass).unwrap()
    }

    fn translate(pass: &GeneratedPass) -> std::result::Result<String, String> {
        glsl_to_wgsl(&pass.code, &pass.lines)
    }

    #[test]
    fn test_frame_uniforms_match_std140_block() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 48);
    }

    #[test]
    fn test_vertex_stage_validates() {
        let module = naga::front::wgsl::parse_str(VERTEX_SHADER).unwrap();
        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .unwrap();
    }

    #[test]
    fn test_generated_passes_translate() {
        let coord = generated(
            "uniform float zoom = 2.0; // @min=1 @max=8\nvec3 run(vec2 pos) { return pixel(pos / zoom).rgb; }",
            0,
        );
        let wgsl = translate(&coord).unwrap();
        assert!(wgsl.contains("textureSample"));

        let src = "uniform float gain = 1.5;\n\
                   vec3 run_pass1(vec3 c) { return c * gain; }\n\
                   vec4 run_pass2(vec4 c) { return c.bgra; }\n";
        for pass in 0..2 {
            translate(&generated(src, pass)).unwrap();
        }
    }

    #[test]
    fn test_param_block_offsets_match_layout() {
        let src = "uniform float saturation = 1.0; // @min=0 @max=5\n\
                   uniform vec3 key = vec3(0.299, 0.587, 0.114); // @color\n\
                   uniform float after = 0.5;\n\
                   uniform vec2 shift;\n\
                   uniform vec4 tint = vec4(1.0);\n\
                   vec3 run(vec3 c) { return (c * saturation + key * after + tint.rgb).rgb + vec3(shift, 0.0); }\n";
        let mut diag = Diagnostics::default();
        let parsed = shader::parse(src, &mut diag).unwrap();
        let (slots, block_size) = codegen::uniform_layout(&parsed.params);

        let wgsl = translate(&generated(src, 0)).unwrap();
        let module = naga::front::wgsl::parse_str(&wgsl).unwrap();
        let (members, span) = module
            .types
            .iter()
            .find_map(|(_, ty)| match &ty.inner {
                naga::TypeInner::Struct { members, span } if ty.name.as_deref() == Some("FsParams") => {
                    Some((members.clone(), *span))
                }
                _ => None,
            })
            .unwrap();

        for slot in &slots {
            let member = members
                .iter()
                .find(|m| m.name.as_deref() == Some(slot.name.as_str()))
                .unwrap();
            assert_eq!(member.offset, slot.offset, "offset of {}", slot.name);
        }
        assert!(span <= block_size);
        assert_eq!(
            slots.iter().map(|s| s.offset).collect::<Vec<_>>(),
            vec![0, 16, 28, 32, 48]
        );
    }

    #[test]
    fn test_compile_errors_use_file_lines() {
        let src = "uniform float gain = 1.0;\n\
                   \n\
                   vec3 run(vec3 c) {\n\
                   \x20   return c * undefined_thing;\n\
                   }\n";
        let err = translate(&generated(src, 0)).unwrap_err();
        assert!(err.starts_with("0:4("), "{err}");
        assert!(err.contains("error:"));
    }

    /// Needs a GPU adapter; skipped when none is available.
    #[test]
    fn test_extra_bindings_fail_to_link() {
        let Ok(mut backend) = WgpuBackend::new() else {
            eprintln!("no GPU adapter, skipping");
            return;
        };
        let vertex = backend.create_vertex_stage().unwrap();
        let pass = generated(
            "layout(set = 0, binding = 7) uniform Extra { float extra; };\nvec3 run(vec3 c) { return c * extra; }",
            0,
        );
        let result = backend.compile_program(&vertex, &pass.source("extra pass 1"));
        let err = result.err().unwrap();
        assert!(err.starts_with("link error:"), "{err}");

        let good = generated("vec3 run(vec3 c) { return c.bgr; }", 0);
        assert!(backend.compile_program(&vertex, &good.source("swap pass 1")).is_ok());
    }
}
