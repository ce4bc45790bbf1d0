use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::{mpsc, Arc};

use anyhow::Context;
use cgmath::{Matrix, Matrix4, SquareMatrix, Vector4};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::camera::{Camera, Projection};
use crate::error::PickError;
use crate::mesh::{MeshData, Vertex};
use crate::picking::{reduce_pixels, HitRecord, PickBackend, PickWindow};
use crate::registry::Handle;
use crate::scene::{Drawable, RebuildReport, Scene};

const SHADER_SOURCE: &str = include_str!("shader.wgsl");
const PICK_SHADER_SOURCE: &str = include_str!("pick.wgsl");
const OVERLAY_SHADER_SOURCE: &str = include_str!("overlay.wgsl");

const INITIAL_OVERLAY_VERTEX_CAPACITY: usize = 256;
const INITIAL_OVERLAY_INDEX_CAPACITY: usize = 384;

const PICK_ID_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;
const PICK_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    light_dir: [f32; 4],
}

impl CameraUniform {
    fn from_matrix(matrix: Matrix4<f32>, light_dir: [f32; 3]) -> Self {
        Self {
            view_proj: matrix.into(),
            light_dir: [light_dir[0], light_dir[1], light_dir[2], 0.0],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OverlayVertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
}

struct DepthTexture {
    view: wgpu::TextureView,
}

impl DepthTexture {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    fn create(device: &wgpu::Device, width: u32, height: u32, label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { view }
    }
}

/// Culling planes extracted from a view-projection matrix, depth in `[0, 1]`.
struct Frustum {
    planes: [Vector4<f32>; 6],
}

impl Frustum {
    fn from_matrix(matrix: Matrix4<f32>) -> Self {
        let m = matrix.transpose();
        let planes = [
            m.w + m.x,
            m.w - m.x,
            m.w + m.y,
            m.w - m.y,
            m.z,
            m.w - m.z,
        ];
        Self { planes }
    }

    fn intersects_aabb(&self, min: [f32; 3], max: [f32; 3]) -> bool {
        self.planes.iter().all(|plane| {
            let x = if plane.x >= 0.0 { max[0] } else { min[0] };
            let y = if plane.y >= 0.0 { max[1] } else { min[1] };
            let z = if plane.z >= 0.0 { max[2] } else { min[2] };
            plane.x * x + plane.y * y + plane.z * z + plane.w >= 0.0
        })
    }
}

struct PartGpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    bounds_min: [f32; 3],
    bounds_max: [f32; 3],
}

impl PartGpuMesh {
    fn upload(device: &wgpu::Device, mesh: &MeshData, color: [f32; 3]) -> Option<Self> {
        let (bounds_min, bounds_max) = mesh.bounds()?;
        if mesh.is_empty() {
            return None;
        }
        let (vertices, indices) = mesh.flat_vertices(color);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("part_vertex_buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("part_index_buffer"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Some(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            bounds_min,
            bounds_max,
        })
    }
}

enum PickSource {
    Resident(Handle),
    Transient(PartGpuMesh),
}

/// Draws recorded between `enter_pick_mode` and `exit_pick_mode`.
struct PickPass {
    capacity: usize,
    width: u32,
    height: u32,
    draws: Vec<(u32, PickSource)>,
}

pub struct Renderer<'window> {
    surface: wgpu::Surface<'window>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    depth_texture: DepthTexture,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    pick_camera_buffer: wgpu::Buffer,
    pick_camera_bind_group: wgpu::BindGroup,
    _camera_bind_group_layout: wgpu::BindGroupLayout,
    hull_pipeline: wgpu::RenderPipeline,
    pick_pipeline: wgpu::RenderPipeline,
    overlay_pipeline: wgpu::RenderPipeline,
    part_meshes: HashMap<Handle, PartGpuMesh>,
    selected: HashSet<Handle>,
    last_view_proj: Matrix4<f32>,
    light_dir: [f32; 3],
    overlay_vertex_buffer: wgpu::Buffer,
    overlay_index_buffer: wgpu::Buffer,
    overlay_vertex_capacity: usize,
    overlay_index_capacity: usize,
    overlay_index_count: u32,
    pick_pass: Option<PickPass>,
    clear_color: [f32; 4],
}

impl<'window> Renderer<'window> {
    pub fn new(window: &'window Window, vsync: bool) -> anyhow::Result<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    async fn new_async(window: &'window Window, vsync: bool) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            dx12_shader_compiler: Default::default(),
            gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
        });

        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;
        tracing::info!(adapter = ?adapter.get_info().name, "using GPU adapter");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("renderer_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await?;

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("surface reports no texture formats")?;
        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        let alpha_mode = surface_caps
            .alpha_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::CompositeAlphaMode::Opaque)
            .or_else(|| surface_caps.alpha_modes.first().copied())
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(device.as_ref(), &config);

        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("camera_bind_group_layout"),
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
            });

        let light_dir = [0.35, 0.8, 0.5];
        let identity = CameraUniform::from_matrix(Matrix4::identity(), light_dir);
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("camera_buffer"),
            contents: bytemuck::bytes_of(&identity),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("camera_bind_group"),
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        // The pick pass gets its own matrix so the main view is never touched.
        let pick_camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pick_camera_buffer"),
            contents: bytemuck::bytes_of(&identity),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let pick_camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pick_camera_bind_group"),
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: pick_camera_buffer.as_entire_binding(),
            }],
        });

        let hull_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("hull_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });
        let pick_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("pick_shader"),
            source: wgpu::ShaderSource::Wgsl(PICK_SHADER_SOURCE.into()),
        });
        let overlay_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("overlay_shader"),
            source: wgpu::ShaderSource::Wgsl(OVERLAY_SHADER_SOURCE.into()),
        });

        let scene_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("scene_pipeline_layout"),
                bind_group_layouts: &[&camera_bind_group_layout],
                push_constant_ranges: &[],
            });

        let mesh_primitive = wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        };
        let depth_state = wgpu::DepthStencilState {
            format: DepthTexture::FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        };

        let hull_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("hull_pipeline"),
            layout: Some(&scene_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &hull_shader,
                entry_point: "vs_main",
                buffers: &[mesh_vertex_layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &hull_shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: mesh_primitive,
            depth_stencil: Some(depth_state.clone()),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let pick_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("pick_pipeline"),
            layout: Some(&scene_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &pick_shader,
                entry_point: "vs_main",
                buffers: &[mesh_vertex_layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &pick_shader,
                entry_point: "fs_main",
                targets: &[
                    Some(wgpu::ColorTargetState {
                        format: PICK_ID_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                    Some(wgpu::ColorTargetState {
                        format: PICK_DEPTH_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                ],
            }),
            primitive: mesh_primitive,
            depth_stencil: Some(depth_state),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let overlay_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("overlay_pipeline_layout"),
                bind_group_layouts: &[],
                push_constant_ranges: &[],
            });
        let overlay_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("overlay_pipeline"),
            layout: Some(&overlay_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &overlay_shader,
                entry_point: "vs_main",
                buffers: &[overlay_vertex_layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &overlay_shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: mesh_primitive,
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let overlay_vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("overlay_vertex_buffer"),
            size: (INITIAL_OVERLAY_VERTEX_CAPACITY * mem::size_of::<OverlayVertex>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let overlay_index_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("overlay_index_buffer"),
            size: (INITIAL_OVERLAY_INDEX_CAPACITY * mem::size_of::<u16>()) as u64,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let depth_texture =
            DepthTexture::create(device.as_ref(), config.width, config.height, "depth_texture");

        Ok(Self {
            surface,
            device,
            queue,
            config,
            depth_texture,
            camera_buffer,
            camera_bind_group,
            pick_camera_buffer,
            pick_camera_bind_group,
            _camera_bind_group_layout: camera_bind_group_layout,
            hull_pipeline,
            pick_pipeline,
            overlay_pipeline,
            part_meshes: HashMap::new(),
            selected: HashSet::new(),
            last_view_proj: Matrix4::identity(),
            light_dir,
            overlay_vertex_buffer,
            overlay_index_buffer,
            overlay_vertex_capacity: INITIAL_OVERLAY_VERTEX_CAPACITY,
            overlay_index_capacity: INITIAL_OVERLAY_INDEX_CAPACITY,
            overlay_index_count: 0,
            pick_pass: None,
            clear_color: [0.16, 0.18, 0.21, 1.0],
        })
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>, projection: &mut Projection) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }

        self.config.width = new_size.width;
        self.config.height = new_size.height;
        projection.resize(new_size.width, new_size.height);
        self.reconfigure_surface();
    }

    fn reconfigure_surface(&mut self) {
        self.surface.configure(self.device.as_ref(), &self.config);
        self.depth_texture = DepthTexture::create(
            self.device.as_ref(),
            self.config.width,
            self.config.height,
            "depth_texture",
        );
    }

    pub fn update_camera(&mut self, camera: &Camera, projection: &Projection) {
        let matrix = projection.view_proj(camera);
        let uniform = CameraUniform::from_matrix(matrix, self.light_dir);
        self.queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&uniform));
        self.last_view_proj = matrix;
    }

    pub fn set_clear_color(&mut self, color: [f32; 3]) {
        self.clear_color = [color[0], color[1], color[2], 1.0];
    }

    pub fn set_selection(&mut self, handles: &[Handle]) {
        self.selected = handles.iter().copied().collect();
    }

    /// Uploads every mesh of the scene, replacing whatever was resident.
    pub fn upload_scene(&mut self, scene: &Scene) {
        self.part_meshes.clear();
        for drawable in scene.drawables() {
            self.upload_part(&drawable);
        }
    }

    /// Re-uploads the meshes a rebuild touched.
    pub fn sync_scene(&mut self, scene: &Scene, report: &RebuildReport) {
        for handle in &report.removed {
            self.part_meshes.remove(handle);
        }
        for &handle in &report.rebuilt {
            match scene.mesh(handle) {
                Some(mesh) => {
                    let drawable = Drawable {
                        handle,
                        mesh,
                        color: scene.color_of(handle),
                    };
                    self.upload_part(&drawable);
                }
                None => {
                    self.part_meshes.remove(&handle);
                }
            }
        }
    }

    fn upload_part(&mut self, drawable: &Drawable<'_>) {
        match PartGpuMesh::upload(self.device.as_ref(), drawable.mesh, drawable.color) {
            Some(gpu_mesh) => {
                self.part_meshes.insert(drawable.handle, gpu_mesh);
            }
            None => {
                self.part_meshes.remove(&drawable.handle);
            }
        }
    }

    pub fn update_overlay(&mut self, vertices: &[OverlayVertex], indices: &[u16]) {
        self.ensure_overlay_capacity(vertices.len(), indices.len());
        if !vertices.is_empty() {
            self.queue
                .write_buffer(&self.overlay_vertex_buffer, 0, bytemuck::cast_slice(vertices));
        }
        if !indices.is_empty() {
            self.queue
                .write_buffer(&self.overlay_index_buffer, 0, bytemuck::cast_slice(indices));
        }
        self.overlay_index_count = indices.len() as u32;
    }

    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err) => {
                return match err {
                    wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
                        self.reconfigure_surface();
                        Ok(())
                    }
                    wgpu::SurfaceError::Timeout => Ok(()),
                    wgpu::SurfaceError::OutOfMemory => Err(err),
                };
            }
        };

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("renderer_encoder"),
            });

        let clear_color = wgpu::Color {
            r: self.clear_color[0] as f64,
            g: self.clear_color[1] as f64,
            b: self.clear_color[2] as f64,
            a: self.clear_color[3] as f64,
        };

        let frustum = Frustum::from_matrix(self.last_view_proj);

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scene_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            pass.set_pipeline(&self.hull_pipeline);
            pass.set_bind_group(0, &self.camera_bind_group, &[]);
            for (handle, mesh) in &self.part_meshes {
                if !frustum.intersects_aabb(mesh.bounds_min, mesh.bounds_max) {
                    continue;
                }
                let selected = u32::from(self.selected.contains(handle));
                pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, selected..selected + 1);
            }
        }

        if self.overlay_index_count > 0 {
            let mut overlay_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("overlay_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            overlay_pass.set_pipeline(&self.overlay_pipeline);
            overlay_pass.set_vertex_buffer(0, self.overlay_vertex_buffer.slice(..));
            overlay_pass
                .set_index_buffer(self.overlay_index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            overlay_pass.draw_indexed(0..self.overlay_index_count, 0, 0..1);
        }

        self.queue.submit(Some(encoder.finish()));
        output.present();
        Ok(())
    }

    fn ensure_overlay_capacity(&mut self, vertices: usize, indices: usize) {
        let vertices = vertices.max(1);
        if vertices > self.overlay_vertex_capacity {
            self.overlay_vertex_capacity = vertices.next_power_of_two();
            self.overlay_vertex_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("overlay_vertex_buffer"),
                size: (self.overlay_vertex_capacity * mem::size_of::<OverlayVertex>()) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
        }

        let indices = indices.max(1);
        if indices > self.overlay_index_capacity {
            self.overlay_index_capacity = indices.next_power_of_two();
            self.overlay_index_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("overlay_index_buffer"),
                size: (self.overlay_index_capacity * mem::size_of::<u16>()) as u64,
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
        }
    }

    fn pick_target(&self, format: wgpu::TextureFormat, width: u32, height: u32, label: &str) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    fn readback_buffer(&self, padded_row: u32, height: u32, label: &str) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }
}

impl PickBackend for Renderer<'_> {
    fn enter_pick_mode(
        &mut self,
        capacity: usize,
        window: PickWindow,
        view_proj: Matrix4<f32>,
    ) -> Result<(), PickError> {
        if window.viewport[0] == 0 || window.viewport[1] == 0 {
            return Err(PickError::ResourceUnavailable(
                "viewport has zero size".to_string(),
            ));
        }
        let (width, height) = window.pixel_size();
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(PickError::ResourceUnavailable(format!(
                "pick window {width}x{height} exceeds texture limit {max}"
            )));
        }

        let uniform = CameraUniform::from_matrix(window.matrix() * view_proj, self.light_dir);
        self.queue
            .write_buffer(&self.pick_camera_buffer, 0, bytemuck::bytes_of(&uniform));
        self.pick_pass = Some(PickPass {
            capacity,
            width,
            height,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, name: u32, drawable: &Drawable<'_>) -> Result<(), PickError> {
        let source = if self.part_meshes.contains_key(&drawable.handle) {
            Some(PickSource::Resident(drawable.handle))
        } else {
            PartGpuMesh::upload(self.device.as_ref(), drawable.mesh, drawable.color)
                .map(PickSource::Transient)
        };
        let pass = self.pick_pass.as_mut().ok_or_else(|| {
            PickError::ResourceUnavailable("draw outside of a pick pass".to_string())
        })?;
        if let Some(source) = source {
            pass.draws.push((name, source));
        }
        Ok(())
    }

    fn exit_pick_mode(&mut self) -> Result<Vec<HitRecord>, PickError> {
        let pass = self.pick_pass.take().ok_or_else(|| {
            PickError::ResourceUnavailable("no pick pass in progress".to_string())
        })?;
        let (width, height) = (pass.width, pass.height);

        let id_texture = self.pick_target(PICK_ID_FORMAT, width, height, "pick_id_texture");
        let depth_color = self.pick_target(PICK_DEPTH_FORMAT, width, height, "pick_depth_texture");
        let depth = DepthTexture::create(self.device.as_ref(), width, height, "pick_depth_buffer");
        let id_view = id_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_color_view = depth_color.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pick_encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("pick_pass"),
                color_attachments: &[
                    Some(wgpu::RenderPassColorAttachment {
                        view: &id_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                    Some(wgpu::RenderPassColorAttachment {
                        view: &depth_color_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                ],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pick_pipeline);
            render_pass.set_bind_group(0, &self.pick_camera_bind_group, &[]);
            for (name, source) in &pass.draws {
                let mesh = match source {
                    PickSource::Resident(handle) => match self.part_meshes.get(handle) {
                        Some(mesh) => mesh,
                        None => continue,
                    },
                    PickSource::Transient(mesh) => mesh,
                };
                render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                render_pass
                    .set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..mesh.index_count, 0, *name..*name + 1);
            }
        }

        let padded_row = padded_bytes_per_row(width);
        let id_readback = self.readback_buffer(padded_row, height, "pick_id_readback");
        let depth_readback = self.readback_buffer(padded_row, height, "pick_depth_readback");
        for (texture, buffer) in [(&id_texture, &id_readback), (&depth_color, &depth_readback)] {
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer,
                    layout: wgpu::ImageDataLayout {
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
        }
        self.queue.submit(Some(encoder.finish()));

        let names = self.read_rows(&id_readback, width, height, padded_row, u32::from_ne_bytes)?;
        let depths = self.read_rows(&depth_readback, width, height, padded_row, f32::from_ne_bytes)?;
        reduce_pixels(&names, &depths, pass.capacity)
    }
}

impl Renderer<'_> {
    /// Maps a readback buffer and strips the row padding.
    fn read_rows<T>(
        &self,
        buffer: &wgpu::Buffer,
        width: u32,
        height: u32,
        padded_row: u32,
        decode: fn([u8; 4]) -> T,
    ) -> Result<Vec<T>, PickError> {
        let slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver outlives the poll below; a send failure only
            // means the pick was abandoned.
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| PickError::ResourceUnavailable("pick readback was dropped".to_string()))?
            .map_err(|err| PickError::ResourceUnavailable(format!("pick readback failed: {err}")))?;

        let row_bytes = width as usize * 4;
        let mut values = Vec::with_capacity(width as usize * height as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded_row as usize).take(height as usize) {
                values.extend(
                    row[..row_bytes]
                        .chunks_exact(4)
                        .map(|b| decode([b[0], b[1], b[2], b[3]])),
                );
            }
        }
        buffer.unmap();
        Ok(values)
    }
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn mesh_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: 0,
                shader_location: 0,
            },
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: 12,
                shader_location: 1,
            },
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: 24,
                shader_location: 2,
            },
        ],
    }
}

fn overlay_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: mem::size_of::<OverlayVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 0,
                shader_location: 0,
            },
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x4,
                offset: 8,
                shader_location: 1,
            },
        ],
    }
}
