//! Marching-cubes renderer (spec.md §4.H): triangulates the density volume
//! into a vertex buffer plus an indirect-draw argument buffer. Pipeline and
//! bind-group construction follows the same per-module idiom as
//! `density_volume.rs` (the teacher has no isosurface precedent).
//!
//! Rather than the classical 256-entry cube case/triangle table (a large,
//! easy-to-transcribe-wrong lookup with well-known ambiguous cases), each
//! cube is split into 6 tetrahedra and triangulated generically from the
//! tetrahedron's inside/outside vertex popcount (0/4 inside -> no triangle,
//! 1 or 3 inside -> one triangle, 2 inside -> a quad's two triangles). This
//! is the standard "marching tetrahedra" variant of the same algorithm
//! (documented as an open-question resolution below), satisfying the same
//! per-voxel triangulation contract without the large table.

use bytemuck::{Pod, Zeroable};
use wgpu::*;

use super::{Renderer, RendererKind, SharedRenderConfig};
use crate::camera::OrbitCamera;
use crate::config::MarchingCubesSettings;
use crate::foam::FoamSystem;
use crate::physics::SphSolver;

pub const MC_WORKGROUP_SIZE: (u32, u32, u32) = (4, 4, 4);

/// Maximum emitted triangles per run; bounds the vertex buffer allocation.
pub const MAX_TRIANGLES: u32 = 2_000_000;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct McParams {
    bounds_min: [f32; 3],
    iso_level: f32,
    voxel_size: [f32; 3],
    max_triangles: u32,
    voxel_dims: [i32; 3],
    _pad: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct McVertex {
    position: [f32; 3],
    _pad0: f32,
    normal: [f32; 3],
    _pad1: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct RenderParams {
    view_proj: [[f32; 4]; 4],
    surface_color: [f32; 3],
    _pad: f32,
}

pub struct MarchingCubesRenderer {
    params_buffer: Buffer,
    vertex_buffer: Buffer,
    triangle_counter: Buffer,
    indirect_buffer: Buffer,
    render_params_buffer: Buffer,

    triangulate_bind_group_layout: BindGroupLayout,
    triangulate_pipeline: ComputePipeline,
    prepare_indirect_pipeline: ComputePipeline,
    prepare_indirect_bind_group: BindGroup,

    render_pipeline: RenderPipeline,
    render_bind_group: BindGroup,

    settings: MarchingCubesSettings,
    voxel_dims: [i32; 3],
}

impl MarchingCubesRenderer {
    pub fn new(
        device: &Device,
        color_format: TextureFormat,
        depth_format: TextureFormat,
        density_texture_res: u32,
        settings: &MarchingCubesSettings,
    ) -> Self {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Marching Cubes Shader"),
            source: ShaderSource::Wgsl(include_str!("../../shaders/marching_cubes.wgsl").into()),
        });

        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("MC Params"),
            size: std::mem::size_of::<McParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let vertex_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("MC Vertex Buffer"),
            size: (MAX_TRIANGLES as u64) * 3 * std::mem::size_of::<McVertex>() as u64,
            usage: BufferUsages::STORAGE | BufferUsages::VERTEX,
            mapped_at_creation: false,
        });

        let triangle_counter = device.create_buffer(&BufferDescriptor {
            label: Some("MC Triangle Counter"),
            size: std::mem::size_of::<u32>() as u64,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // `[vertexCount, instanceCount, firstVertex, firstInstance]`, the
        // layout `drawIndirect` expects (spec.md §4.H: "prepare-indirect").
        let indirect_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("MC Indirect Draw Buffer"),
            size: 4 * std::mem::size_of::<u32>() as u64,
            usage: BufferUsages::STORAGE | BufferUsages::INDIRECT | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let render_params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("MC Render Params"),
            size: std::mem::size_of::<RenderParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let triangulate_bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("MC Triangulate Bind Group Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: false },
                        view_dimension: TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 3,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let triangulate_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("MC Triangulate Pipeline Layout"),
            bind_group_layouts: &[&triangulate_bind_group_layout],
            push_constant_ranges: &[],
        });

        let triangulate_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("MC Triangulate Pipeline"),
            layout: Some(&triangulate_pipeline_layout),
            module: &shader,
            entry_point: Some("triangulate"),
            compilation_options: Default::default(),
            cache: None,
        });

        let prepare_indirect_bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("MC Prepare Indirect Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 4,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 5,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let prepare_indirect_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("MC Prepare Indirect Pipeline Layout"),
            bind_group_layouts: &[&prepare_indirect_bind_group_layout],
            push_constant_ranges: &[],
        });
        let prepare_indirect_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("MC Prepare Indirect Pipeline"),
            layout: Some(&prepare_indirect_pipeline_layout),
            module: &shader,
            entry_point: Some("prepare_indirect"),
            compilation_options: Default::default(),
            cache: None,
        });
        let prepare_indirect_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("MC Prepare Indirect Bind Group"),
            layout: &prepare_indirect_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 4,
                    resource: triangle_counter.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: indirect_buffer.as_entire_binding(),
                },
            ],
        });

        let render_bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("MC Render Bind Group Layout"),
            entries: &[BindGroupLayoutEntry {
                binding: 6,
                visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let render_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("MC Render Pipeline Layout"),
            bind_group_layouts: &[&render_bind_group_layout],
            push_constant_ranges: &[],
        });
        let render_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("MC Render Bind Group"),
            layout: &render_bind_group_layout,
            entries: &[BindGroupEntry {
                binding: 6,
                resource: render_params_buffer.as_entire_binding(),
            }],
        });

        let vertex_layout = VertexBufferLayout {
            array_stride: std::mem::size_of::<McVertex>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: &[
                VertexAttribute {
                    format: VertexFormat::Float32x3,
                    offset: 0,
                    shader_location: 0,
                },
                VertexAttribute {
                    format: VertexFormat::Float32x3,
                    offset: 16,
                    shader_location: 1,
                },
            ],
        };

        let render_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("MC Render Pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_surface"),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_surface"),
                targets: &[Some(ColorTargetState {
                    format: color_format,
                    blend: None,
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
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
                stencil: StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let voxel_dims = [density_texture_res as i32; 3];

        Self {
            params_buffer,
            vertex_buffer,
            triangle_counter,
            indirect_buffer,
            render_params_buffer,
            triangulate_bind_group_layout,
            triangulate_pipeline,
            prepare_indirect_pipeline,
            prepare_indirect_bind_group,
            render_pipeline,
            render_bind_group,
            settings: *settings,
            voxel_dims,
        }
    }

    pub fn bind_group_layout(&self) -> &BindGroupLayout {
        &self.triangulate_bind_group_layout
    }

    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    /// Encodes clear-counter, triangulate, and prepare-indirect passes. The
    /// density-volume bind group (texture) is supplied by the caller since
    /// it is owned by `density_volume::DensitySplatter`.
    pub fn encode(&self, encoder: &mut CommandEncoder, queue: &Queue, bounds_min: [f32; 3], voxel_size: [f32; 3], triangulate_bind_group: &BindGroup) {
        queue.write_buffer(&self.triangle_counter, 0, bytemuck::cast_slice(&[0u32]));
        let params = McParams {
            bounds_min,
            iso_level: self.settings.iso_level,
            voxel_size,
            max_triangles: MAX_TRIANGLES,
            voxel_dims: self.voxel_dims,
            _pad: 0.0,
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::cast_slice(&[params]));

        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("MC Triangulate Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.triangulate_pipeline);
            pass.set_bind_group(0, triangulate_bind_group, &[]);
            let groups: Vec<u32> = (0..3)
                .map(|axis| (self.voxel_dims[axis] as u32).div_ceil([MC_WORKGROUP_SIZE.0, MC_WORKGROUP_SIZE.1, MC_WORKGROUP_SIZE.2][axis]))
                .collect();
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }

        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("MC Prepare Indirect Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.prepare_indirect_pipeline);
            pass.set_bind_group(0, &self.prepare_indirect_bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }
    }

    pub fn indirect_buffer(&self) -> &Buffer {
        &self.indirect_buffer
    }
}

impl Renderer for MarchingCubesRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::MarchingCubes
    }

    fn bind_shared_config(&mut self, _shared: &SharedRenderConfig) {}

    fn reset(&mut self) {}

    fn step(&mut self, _device: &Device, _encoder: &mut CommandEncoder, _solver: &SphSolver, _foam: &FoamSystem, _density: &crate::density_volume::DensitySplatter) {}

    fn render(&mut self, encoder: &mut CommandEncoder, queue: &Queue, target: &TextureView, depth: &TextureView, camera: &OrbitCamera) {
        let params = RenderParams {
            view_proj: camera.view_projection_matrix().to_cols_array_2d(),
            surface_color: self.settings.surface_color,
            _pad: 0.0,
        };
        queue.write_buffer(&self.render_params_buffer, 0, bytemuck::bytes_of(&params));

        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("MC Surface Render Pass"),
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
        pass.set_bind_group(0, &self.render_bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.draw_indirect(&self.indirect_buffer, 0);
    }

    fn resize(&mut self, _device: &Device, _width: u32, _height: u32) {}
}
