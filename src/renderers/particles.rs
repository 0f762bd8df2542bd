//! Billboard particle renderer (spec.md §4.J `Particles` variant): draws the
//! SPH solver's particle buffer directly as view-facing quads, with no
//! compute pass of its own. Grounded on the teacher's `ParticleSystem`
//! render half (bind-group layout, alpha-blended `RenderPipeline`,
//! depth-tested/no-depth-write quad-per-instance draw) with its own
//! particle-simulation compute pipeline dropped — that simulation now lives
//! in `physics::SphSolver`, which this renderer only reads.

use bytemuck::{Pod, Zeroable};
use wgpu::*;

use super::{Renderer, RendererKind, SharedRenderConfig};
use crate::camera::OrbitCamera;
use crate::foam::FoamSystem;
use crate::physics::SphSolver;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct RenderParams {
    view_proj: [[f32; 4]; 4],
    camera_right: [f32; 3],
    particle_radius: f32,
    camera_up: [f32; 3],
    _pad0: f32,
    particle_color: [f32; 4],
}

pub struct ParticleRenderer {
    render_pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    bind_group: Option<BindGroup>,
    render_params_buffer: Buffer,
    max_particles: u32,
    active_count: u32,
    particle_radius: f32,
    particle_color: [f32; 4],
}

impl ParticleRenderer {
    pub fn new(device: &Device, color_format: TextureFormat, depth_format: TextureFormat, max_particles: u32) -> Self {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Particle Renderer Shader"),
            source: ShaderSource::Wgsl(include_str!("../../shaders/particles_render.wgsl").into()),
        });

        let render_params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Particle Render Params"),
            size: std::mem::size_of::<RenderParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Particle Render Bind Group Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::VERTEX,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Particle Render Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let render_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Particle Render Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_particle"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_particle"),
                targets: &[Some(ColorTargetState {
                    format: color_format,
                    blend: Some(BlendState::ALPHA_BLENDING),
                    write_mask: ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(DepthStencilState {
                format: depth_format,
                depth_write_enabled: false,
                depth_compare: CompareFunction::Less,
                stencil: StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            render_pipeline,
            bind_group_layout,
            bind_group: None,
            render_params_buffer,
            max_particles,
            active_count: 0,
            particle_radius: 0.1,
            particle_color: [0.2, 0.5, 0.9, 0.85],
        }
    }

    /// Rebuilds the bind group against the solver's current particle
    /// buffer, the epoch-keyed bind step spec.md §9 describes: the solver's
    /// double-buffered ping-pong means which physical buffer is "current"
    /// changes every substep, so this is called once per frame from `step`.
    fn rebind(&mut self, device: &Device, particles: &Buffer) {
        self.bind_group = Some(device.create_bind_group(&BindGroupDescriptor {
            label: Some("Particle Render Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry { binding: 0, resource: self.render_params_buffer.as_entire_binding() },
                BindGroupEntry { binding: 1, resource: particles.as_entire_binding() },
            ],
        }));
    }
}

impl Renderer for ParticleRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::Particles
    }

    fn bind_shared_config(&mut self, shared: &SharedRenderConfig) {
        self.particle_radius = shared.particle_radius;
    }

    fn reset(&mut self) {}

    fn step(&mut self, device: &Device, _encoder: &mut CommandEncoder, solver: &SphSolver, _foam: &FoamSystem, _density: &crate::density_volume::DensitySplatter) {
        self.rebind(device, solver.current_particle_buffer());
        self.active_count = solver.active_count();
    }

    fn render(&mut self, encoder: &mut CommandEncoder, queue: &Queue, target: &TextureView, depth: &TextureView, camera: &OrbitCamera) {
        let view = camera.view_matrix();
        let params = RenderParams {
            view_proj: camera.view_projection_matrix().to_cols_array_2d(),
            camera_right: view.row(0).truncate().to_array(),
            particle_radius: self.particle_radius,
            camera_up: view.row(1).truncate().to_array(),
            _pad0: 0.0,
            particle_color: self.particle_color,
        };
        queue.write_buffer(&self.render_params_buffer, 0, bytemuck::bytes_of(&params));

        let Some(bind_group) = &self.bind_group else {
            return;
        };

        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("Particle Render Pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.render_pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..6, 0..self.active_count.min(self.max_particles));
    }

    fn resize(&mut self, _device: &Device, _width: u32, _height: u32) {}
}
