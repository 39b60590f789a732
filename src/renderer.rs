//! wgpu renderer drawing onto the composite overlay
//!
//! Draw calls are recorded during the frame and replayed in a single render
//! pass on present. Window pixels arrive as 32 bit BGRA rows straight from
//! the X server.

use std::collections::HashMap;
use std::ffi::c_void;
use std::num::NonZeroU32;
use std::ptr::NonNull;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle, XcbDisplayHandle, XcbWindowHandle};
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::gpu::{
    GpuBackend, PixelFormat, ShadowDraw, ShapeHandle, TextureFormat, TextureHandle, Vertex,
    WindowDraw,
};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const WINDOW_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct WindowUniforms {
    position: [f32; 2],
    size: [f32; 2],
    depth: f32,
    opacity: f32,
    opaque: f32,
    _pad: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ShadowUniforms {
    position: [f32; 2],
    size: [f32; 2],
    spread: [f32; 2],
    depth: f32,
    strength: f32,
    offset: f32,
    _pad: [f32; 3],
}

struct MeshBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    count: u32,
}

struct RendererTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
    opaque: bool,
}

enum Command {
    Window {
        shape: ShapeHandle,
        texture: TextureHandle,
        params: WindowDraw,
    },
    Shadow {
        quad: ShapeHandle,
        params: ShadowDraw,
    },
}

/// Recorded draw with its uniforms already on the GPU
struct Prepared<'a> {
    pipeline: &'a wgpu::RenderPipeline,
    mesh: &'a MeshBuffers,
    texture: Option<&'a wgpu::BindGroup>,
    uniforms: wgpu::BindGroup,
}

pub struct WgpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,

    window_pipeline: wgpu::RenderPipeline,
    shadow_pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    window_uniform_layout: wgpu::BindGroupLayout,
    shadow_uniform_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,

    shapes: HashMap<ShapeHandle, Option<MeshBuffers>>,
    textures: HashMap<TextureHandle, RendererTexture>,
    formats: Vec<(PixelFormat, bool)>,
    next_id: u32,

    bound: Option<TextureHandle>,
    commands: Vec<Command>,
    clear: [f32; 3],
}

impl WgpuRenderer {
    /// Create a renderer presenting to `window` on an existing xcb connection
    ///
    /// # Safety
    ///
    /// `connection` must be a live xcb connection and `window` a window on it.
    /// Both must outlive the renderer.
    pub unsafe fn new(
        connection: *mut c_void,
        screen: usize,
        window: u32,
        size: (u32, u32),
        vsync: bool,
    ) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY | wgpu::Backends::GL,
            ..Default::default()
        });

        let window = NonZeroU32::new(window).ok_or_else(|| anyhow!("output window is None"))?;
        let target = wgpu::SurfaceTargetUnsafe::RawHandle {
            raw_display_handle: RawDisplayHandle::Xcb(XcbDisplayHandle::new(
                NonNull::new(connection),
                screen as i32,
            )),
            raw_window_handle: RawWindowHandle::Xcb(XcbWindowHandle::new(window)),
        };
        let surface = unsafe { instance.create_surface_unsafe(target) }
            .context("failed to create surface on the overlay")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow!("no adapter can present to this display"))?;

        let adapter_info = adapter.get_info();
        info!(
            "using {} ({:?}, {})",
            adapter_info.name, adapter_info.backend, adapter_info.driver
        );

        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default(), None))
                .context("failed to open device")?;

        let caps = surface.get_capabilities(&adapter);
        let surface_format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| anyhow!("surface reports no formats"))?;

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.0.max(1),
            height: size.1.max(1),
            present_mode: present_mode(vsync),
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);
        let depth_view = create_depth_view(&device, &surface_config);

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("window texture layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let window_uniform_layout = uniform_layout(&device, "window uniform layout");
        let shadow_uniform_layout = uniform_layout(&device, "shadow uniform layout");

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let window_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("window shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/window.wgsl").into()),
        });
        let shadow_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shadow shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/shadow.wgsl").into()),
        });

        let window_pipeline = create_pipeline(
            &device,
            "window",
            &window_shader,
            &[&texture_layout, &window_uniform_layout],
            surface_format,
            true,
        );
        let shadow_pipeline = create_pipeline(
            &device,
            "shadow",
            &shadow_shader,
            &[&shadow_uniform_layout],
            surface_format,
            false,
        );

        // 24 bit visuals carry an undefined alpha byte, 32 bit ones a real one
        let sampleable = adapter
            .get_texture_format_features(WINDOW_FORMAT)
            .allowed_usages
            .contains(wgpu::TextureUsages::TEXTURE_BINDING);
        let formats = if sampleable {
            vec![
                (PixelFormat { index: 0, depth: 24 }, false),
                (PixelFormat { index: 1, depth: 32 }, true),
            ]
        } else {
            warn!("adapter cannot sample {WINDOW_FORMAT:?}, windows will not be drawn");
            Vec::new()
        };

        Ok(Self {
            device,
            queue,
            surface,
            surface_config,
            depth_view,
            window_pipeline,
            shadow_pipeline,
            texture_layout,
            window_uniform_layout,
            shadow_uniform_layout,
            sampler,
            shapes: HashMap::new(),
            textures: HashMap::new(),
            formats,
            next_id: 0,
            bound: None,
            commands: Vec::new(),
            clear: [0.0; 3],
        })
    }

    fn next_id(&mut self) -> u32 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.surface_config);
        self.depth_view = create_depth_view(&self.device, &self.surface_config);
    }

    fn write_pixels(&self, texture: &wgpu::Texture, width: u32, height: u32, pixels: &[u8]) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn uniform_group<T: bytemuck::Pod>(&self, layout: &wgpu::BindGroupLayout, uniforms: &T) -> wgpu::BindGroup {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("draw uniforms"),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw uniforms"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }

    fn mesh(&self, shape: ShapeHandle) -> Option<&MeshBuffers> {
        self.shapes.get(&shape).and_then(Option::as_ref)
    }

    /// Turn the recorded commands into draws, dropping any whose resources
    /// were destroyed after recording
    fn prepare(&self) -> Vec<Prepared<'_>> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Window {
                    shape,
                    texture,
                    params,
                } => {
                    let texture = self.textures.get(texture)?;
                    let uniforms = WindowUniforms {
                        position: params.position,
                        size: params.size,
                        depth: params.depth,
                        opacity: params.opacity,
                        opaque: if texture.opaque { 1.0 } else { 0.0 },
                        _pad: 0.0,
                    };
                    Some(Prepared {
                        pipeline: &self.window_pipeline,
                        mesh: self.mesh(*shape)?,
                        texture: Some(&texture.bind_group),
                        uniforms: self.uniform_group(&self.window_uniform_layout, &uniforms),
                    })
                }
                Command::Shadow { quad, params } => {
                    if params.strength <= 0.0 {
                        return None;
                    }
                    let uniforms = ShadowUniforms {
                        position: params.position,
                        size: params.size,
                        spread: params.spread,
                        depth: params.depth,
                        strength: params.strength,
                        offset: params.offset,
                        _pad: [0.0; 3],
                    };
                    Some(Prepared {
                        pipeline: &self.shadow_pipeline,
                        mesh: self.mesh(*quad)?,
                        texture: None,
                        uniforms: self.uniform_group(&self.shadow_uniform_layout, &uniforms),
                    })
                }
            })
            .collect()
    }
}

impl GpuBackend for WgpuRenderer {
    fn create_shape(&mut self) -> Result<ShapeHandle> {
        let shape = ShapeHandle(self.next_id());
        self.shapes.insert(shape, None);
        Ok(shape)
    }

    fn upload_shape(&mut self, shape: ShapeHandle, vertices: &[Vertex], indices: &[u16]) -> Result<()> {
        let entry = self
            .shapes
            .get_mut(&shape)
            .ok_or_else(|| anyhow!("upload to unknown shape {shape:?}"))?;

        if indices.is_empty() {
            *entry = None;
            return Ok(());
        }

        let vertex = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("shape vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("shape indices"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        *entry = Some(MeshBuffers {
            vertex,
            index,
            count: indices.len() as u32,
        });
        Ok(())
    }

    fn destroy_shape(&mut self, shape: ShapeHandle) {
        if self.shapes.remove(&shape).is_none() {
            warn!("destroying unknown shape {shape:?}");
        }
    }

    fn pixel_formats(&self) -> Vec<PixelFormat> {
        self.formats.iter().map(|(format, _)| *format).collect()
    }

    fn format_has_alpha(&self, format: PixelFormat) -> Result<bool> {
        self.formats
            .iter()
            .find(|(candidate, _)| *candidate == format)
            .map(|(_, alpha)| *alpha)
            .ok_or_else(|| anyhow!("unknown pixel format {format:?}"))
    }

    fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn import_texture(
        &mut self,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<TextureHandle> {
        if width == 0 || height == 0 {
            bail!("cannot import an empty {width}x{height} texture");
        }
        if pixels.len() != (width as usize) * (height as usize) * 4 {
            bail!(
                "expected {} bytes for {width}x{height}, got {}",
                width as usize * height as usize * 4,
                pixels.len()
            );
        }

        let handle = TextureHandle(self.next_id());
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("window_{}", handle.0)),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: WINDOW_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.write_pixels(&texture, width, height, pixels);

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("window_bind_group_{}", handle.0)),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        self.textures.insert(
            handle,
            RendererTexture {
                texture,
                bind_group,
                width,
                height,
                opaque: format == TextureFormat::Rgb,
            },
        );
        debug!("imported {width}x{height} texture {}", handle.0);
        Ok(handle)
    }

    fn update_texture(&mut self, texture: TextureHandle, pixels: &[u8]) -> Result<()> {
        let entry = self
            .textures
            .get(&texture)
            .ok_or_else(|| anyhow!("update of unknown texture {texture:?}"))?;
        let expected = entry.width as usize * entry.height as usize * 4;
        if pixels.len() != expected {
            bail!("expected {expected} bytes for texture {}, got {}", texture.0, pixels.len());
        }
        self.write_pixels(&entry.texture, entry.width, entry.height, pixels);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.bound == Some(texture) {
            self.bound = None;
        }
        if self.textures.remove(&texture).is_none() {
            warn!("destroying unknown texture {texture:?}");
        }
    }

    fn bind_texture(&mut self, texture: TextureHandle) {
        self.bound = Some(texture);
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if self.bound == Some(texture) {
            self.bound = None;
        }
    }

    fn begin_frame(&mut self, clear: [f32; 3]) {
        self.commands.clear();
        self.clear = clear;
    }

    fn draw_window(&mut self, shape: ShapeHandle, params: WindowDraw) {
        let Some(texture) = self.bound else {
            warn!("window draw without a bound texture");
            return;
        };
        self.commands.push(Command::Window {
            shape,
            texture,
            params,
        });
    }

    fn draw_shadow(&mut self, quad: ShapeHandle, params: ShadowDraw) {
        self.commands.push(Command::Shadow { quad, params });
    }

    fn set_vsync(&mut self, vsync: bool) {
        self.surface_config.present_mode = present_mode(vsync);
        self.reconfigure();
        debug!("present mode {:?}", self.surface_config.present_mode);
    }

    fn present(&mut self) -> Result<Instant> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                debug!("surface lost, reconfiguring");
                self.reconfigure();
                self.commands.clear();
                return Ok(Instant::now());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("timed out acquiring the next frame");
                self.commands.clear();
                return Ok(Instant::now());
            }
            Err(e) => return Err(e).context("failed to acquire frame"),
        };

        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame encoder"),
        });

        let draws = self.prepare();
        {
            let [r, g, b] = self.clear;
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            for draw in &draws {
                render_pass.set_pipeline(draw.pipeline);
                match draw.texture {
                    Some(texture) => {
                        render_pass.set_bind_group(0, texture, &[]);
                        render_pass.set_bind_group(1, &draw.uniforms, &[]);
                    }
                    None => render_pass.set_bind_group(0, &draw.uniforms, &[]),
                }
                render_pass.set_vertex_buffer(0, draw.mesh.vertex.slice(..));
                render_pass.set_index_buffer(draw.mesh.index.slice(..), wgpu::IndexFormat::Uint16);
                render_pass.draw_indexed(0..draw.mesh.count, 0, 0..1);
            }
        }
        drop(draws);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        self.commands.clear();

        Ok(Instant::now())
    }
}

fn present_mode(vsync: bool) -> wgpu::PresentMode {
    if vsync {
        wgpu::PresentMode::AutoVsync
    } else {
        wgpu::PresentMode::AutoNoVsync
    }
}

fn create_depth_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth"),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn uniform_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

/// Premultiplied blending with a depth test; only windows write depth so a
/// shadow never lands on its own window
fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    shader: &wgpu::ShaderModule,
    layouts: &[&wgpu::BindGroupLayout],
    format: wgpu::TextureFormat,
    depth_write: bool,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: layouts,
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &wgpu::vertex_attr_array![0 => Float32x2],
            }],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
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
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: depth_write,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // must match the WGSL struct layouts
    #[test]
    fn test_uniform_sizes() {
        assert_eq!(std::mem::size_of::<WindowUniforms>(), 32);
        assert_eq!(std::mem::size_of::<ShadowUniforms>(), 48);
        assert_eq!(std::mem::size_of::<Vertex>(), 8);
    }

    #[test]
    fn test_present_mode() {
        assert_eq!(present_mode(true), wgpu::PresentMode::AutoVsync);
        assert_eq!(present_mode(false), wgpu::PresentMode::AutoNoVsync);
    }
}
