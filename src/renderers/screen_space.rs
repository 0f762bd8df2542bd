//! Screen-space surface renderer (spec.md §4.G): depth -> smooth -> thickness
//! -> normals -> foam -> composite. Depth and thickness are instanced
//! billboard draws against a private depth-stencil buffer, the same
//! quad-per-instance idiom `renderers::particles::ParticleRenderer` uses
//! (`shaders/particles_render.wgsl`); the remaining passes are full-screen
//! triangles sampling the prior pass's texture via `textureLoad`, so no
//! sampler bindings are needed anywhere in this module. There is no teacher
//! screen-space pass, so the per-pass texture shapes are grounded in
//! `other_examples/hybrid_fluid.rs.rs`'s depth/thickness G-buffer approach.

use bytemuck::{Pod, Zeroable};
use wgpu::*;

use super::{Renderer, RendererKind, SharedRenderConfig};
use crate::camera::OrbitCamera;
use crate::config::ScreenSpaceSettings;
use crate::environment::EnvironmentSettings;
use crate::foam::FoamSystem;
use crate::physics::SphSolver;

const DEPTH_TARGET_FORMAT: TextureFormat = TextureFormat::R32Float;
const THICKNESS_TARGET_FORMAT: TextureFormat = TextureFormat::R16Float;
const NORMAL_TARGET_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
const FOAM_TARGET_FORMAT: TextureFormat = TextureFormat::R16Float;

/// `#[repr(C)]` mirror of the WGSL `ScreenSpaceParams` uniform, shared by
/// every pass in this module (billboard vertex shaders read the camera
/// fields, fullscreen fragment shaders read the rest).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ScreenSpaceParams {
    view_proj: [[f32; 4]; 4],

    camera_pos: [f32; 3],
    particle_radius: f32,

    camera_right: [f32; 3],
    tan_half_fov_x: f32,

    camera_up: [f32; 3],
    tan_half_fov_y: f32,

    camera_forward: [f32; 3],
    near: f32,

    texel_size: [f32; 2],
    far: f32,
    foam_blend_rate: f32,

    extinction: [f32; 3],
    refraction_strength: f32,

    dir_to_sun: [f32; 3],
    exposure: f32,

    sun_color: [f32; 3],
    brightness: f32,

    sky_color_top: [f32; 3],
    saturation: f32,

    sky_color_horizon: [f32; 3],
    floor_tile_size: f32,

    floor_tile_color_a: [f32; 3],
    floor_height: f32,

    floor_tile_color_b: [f32; 3],
    foam_threshold: f32,
}

fn make_target(device: &Device, label: &str, width: u32, height: u32, format: TextureFormat) -> (Texture, TextureView) {
    let texture = device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&TextureViewDescriptor::default());
    (texture, view)
}

fn make_depth_stencil(device: &Device, label: &str, width: u32, height: u32, format: TextureFormat) -> (Texture, TextureView) {
    let texture = device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format,
        usage: TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&TextureViewDescriptor::default());
    (texture, view)
}

fn unfilterable_texture_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: false },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_read_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Screen-space surface renderer. Owns the depth/smooth/thickness/normal/
/// foam G-buffer targets plus the environment settings used by its
/// composite pass (spec.md §4.G step 6).
pub struct ScreenSpaceRenderer {
    width: u32,
    height: u32,

    params_buffer: Buffer,

    private_depth: (Texture, TextureView),
    depth_target: (Texture, TextureView),
    thickness_target: (Texture, TextureView),
    smooth_a: (Texture, TextureView),
    smooth_b: (Texture, TextureView),
    normal_target: (Texture, TextureView),
    foam_raw: (Texture, TextureView),
    // Foam temporal blend history (spec.md §4.G step 5): fixed textures,
    // never swapped. Which one holds the latest result alternates each
    // frame (`foam_flip`); both blend directions and both composite bind
    // groups are precomputed up front so picking between them needs no
    // per-frame bind group rebuild (the same static-parity trick as the
    // depth-smoothing ping-pong, generalized to an unbounded frame count).
    foam_ping: (Texture, TextureView),
    foam_pong: (Texture, TextureView),
    foam_flip: bool,

    depth_format: TextureFormat,

    billboard_fluid_bgl: BindGroupLayout,
    billboard_foam_bgl: BindGroupLayout,
    single_tex_bgl: BindGroupLayout,
    foam_blend_bgl: BindGroupLayout,
    composite_bgl: BindGroupLayout,

    depth_pipeline: RenderPipeline,
    thickness_pipeline: RenderPipeline,
    smooth_pipeline: RenderPipeline,
    normal_pipeline: RenderPipeline,
    foam_splat_pipeline: RenderPipeline,
    foam_blend_pipeline: RenderPipeline,
    composite_pipeline: RenderPipeline,

    fluid_bind_group: Option<BindGroup>,
    foam_bind_group: Option<BindGroup>,
    smooth_bg_from_depth: BindGroup,
    smooth_bg_from_a: BindGroup,
    smooth_bg_from_b: BindGroup,
    normals_bind_group: BindGroup,
    foam_blend_bg_ping_to_pong: BindGroup,
    foam_blend_bg_pong_to_ping: BindGroup,
    composite_bg_ping: BindGroup,
    composite_bg_pong: BindGroup,

    settings: ScreenSpaceSettings,
    environment: EnvironmentSettings,
    bounds_size: [f32; 3],
    smoothing_radius: f32,
    particle_radius: f32,
    active_count: u32,
    foam_capacity: u32,
}

impl ScreenSpaceRenderer {
    pub fn new(
        device: &Device,
        color_format: TextureFormat,
        depth_format: TextureFormat,
        width: u32,
        height: u32,
        max_particles: u32,
        settings: &ScreenSpaceSettings,
    ) -> Self {
        let _ = max_particles;
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Screen-Space Surface Shader"),
            source: ShaderSource::Wgsl(include_str!("../../shaders/screen_space.wgsl").into()),
        });

        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Screen-Space Params"),
            size: std::mem::size_of::<ScreenSpaceParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let billboard_fluid_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Screen-Space Billboard Fluid Layout"),
            entries: &[
                uniform_entry(0, ShaderStages::VERTEX_FRAGMENT),
                storage_read_entry(1, ShaderStages::VERTEX),
            ],
        });

        let billboard_foam_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Screen-Space Billboard Foam Layout"),
            entries: &[
                uniform_entry(0, ShaderStages::VERTEX_FRAGMENT),
                storage_read_entry(1, ShaderStages::VERTEX_FRAGMENT),
            ],
        });

        let single_tex_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Screen-Space Single Texture Layout"),
            entries: &[uniform_entry(0, ShaderStages::FRAGMENT), unfilterable_texture_entry(1)],
        });

        let foam_blend_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Screen-Space Foam Blend Layout"),
            entries: &[
                uniform_entry(0, ShaderStages::FRAGMENT),
                unfilterable_texture_entry(1),
                unfilterable_texture_entry(2),
            ],
        });

        let composite_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Screen-Space Composite Layout"),
            entries: &[
                uniform_entry(0, ShaderStages::FRAGMENT),
                unfilterable_texture_entry(1),
                unfilterable_texture_entry(2),
                unfilterable_texture_entry(3),
                unfilterable_texture_entry(4),
            ],
        });

        let billboard_fluid_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Screen-Space Billboard Fluid Pipeline Layout"),
            bind_group_layouts: &[&billboard_fluid_bgl],
            push_constant_ranges: &[],
        });
        let billboard_foam_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Screen-Space Billboard Foam Pipeline Layout"),
            bind_group_layouts: &[&billboard_foam_bgl],
            push_constant_ranges: &[],
        });
        let single_tex_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Screen-Space Single Texture Pipeline Layout"),
            bind_group_layouts: &[&single_tex_bgl],
            push_constant_ranges: &[],
        });
        let foam_blend_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Screen-Space Foam Blend Pipeline Layout"),
            bind_group_layouts: &[&foam_blend_bgl],
            push_constant_ranges: &[],
        });
        let composite_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Screen-Space Composite Pipeline Layout"),
            bind_group_layouts: &[&composite_bgl],
            push_constant_ranges: &[],
        });

        let depth_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Screen-Space Depth Pipeline"),
            layout: Some(&billboard_fluid_layout),
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_billboard_fluid"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_depth"),
                targets: &[Some(ColorTargetState {
                    format: DEPTH_TARGET_FORMAT,
                    blend: None,
                    write_mask: ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: PrimitiveState::default(),
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

        let thickness_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Screen-Space Thickness Pipeline"),
            layout: Some(&billboard_fluid_layout),
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_billboard_fluid"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_thickness"),
                targets: &[Some(ColorTargetState {
                    format: THICKNESS_TARGET_FORMAT,
                    blend: Some(BlendState {
                        color: BlendComponent {
                            src_factor: BlendFactor::One,
                            dst_factor: BlendFactor::One,
                            operation: BlendOperation::Add,
                        },
                        alpha: BlendComponent::REPLACE,
                    }),
                    write_mask: ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: Some(DepthStencilState {
                format: depth_format,
                depth_write_enabled: false,
                depth_compare: CompareFunction::LessEqual,
                stencil: StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let make_fullscreen = |entry_fs: &str, target_format: TextureFormat, layout: &PipelineLayout| {
            device.create_render_pipeline(&RenderPipelineDescriptor {
                label: Some("Screen-Space Fullscreen Pipeline"),
                layout: Some(layout),
                vertex: VertexState {
                    module: &shader,
                    entry_point: Some("vs_fullscreen"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(FragmentState {
                    module: &shader,
                    entry_point: Some(entry_fs),
                    targets: &[Some(ColorTargetState {
                        format: target_format,
                        blend: None,
                        write_mask: ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: PrimitiveState::default(),
                depth_stencil: None,
                multisample: MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let smooth_pipeline = make_fullscreen("fs_smooth", DEPTH_TARGET_FORMAT, &single_tex_layout);
        let normal_pipeline = make_fullscreen("fs_normals", NORMAL_TARGET_FORMAT, &single_tex_layout);
        let foam_blend_pipeline = make_fullscreen("fs_foam_blend", FOAM_TARGET_FORMAT, &foam_blend_layout);
        let composite_pipeline = make_fullscreen("fs_composite", color_format, &composite_layout);

        let foam_splat_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Screen-Space Foam Splat Pipeline"),
            layout: Some(&billboard_foam_layout),
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_billboard_foam"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_foam_splat"),
                targets: &[Some(ColorTargetState {
                    format: FOAM_TARGET_FORMAT,
                    blend: Some(BlendState {
                        color: BlendComponent {
                            src_factor: BlendFactor::One,
                            dst_factor: BlendFactor::One,
                            operation: BlendOperation::Add,
                        },
                        alpha: BlendComponent::REPLACE,
                    }),
                    write_mask: ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let private_depth = make_depth_stencil(device, "Screen-Space Private Depth", width, height, depth_format);
        let depth_target = make_target(device, "Screen-Space Depth Target", width, height, DEPTH_TARGET_FORMAT);
        let thickness_target = make_target(device, "Screen-Space Thickness Target", width, height, THICKNESS_TARGET_FORMAT);
        let smooth_a = make_target(device, "Screen-Space Smooth A", width, height, DEPTH_TARGET_FORMAT);
        let smooth_b = make_target(device, "Screen-Space Smooth B", width, height, DEPTH_TARGET_FORMAT);
        let normal_target = make_target(device, "Screen-Space Normal Target", width, height, NORMAL_TARGET_FORMAT);
        let foam_raw = make_target(device, "Screen-Space Foam Raw", width, height, FOAM_TARGET_FORMAT);
        let foam_ping = make_target(device, "Screen-Space Foam Ping", width, height, FOAM_TARGET_FORMAT);
        let foam_pong = make_target(device, "Screen-Space Foam Pong", width, height, FOAM_TARGET_FORMAT);

        let make_single_tex_bg = |view: &TextureView, label: &str| {
            device.create_bind_group(&BindGroupDescriptor {
                label: Some(label),
                layout: &single_tex_bgl,
                entries: &[
                    BindGroupEntry { binding: 0, resource: params_buffer.as_entire_binding() },
                    BindGroupEntry { binding: 1, resource: BindingResource::TextureView(view) },
                ],
            })
        };

        let smooth_bg_from_depth = make_single_tex_bg(&depth_target.1, "Smooth From Depth");
        let smooth_bg_from_a = make_single_tex_bg(&smooth_a.1, "Smooth From A");
        let smooth_bg_from_b = make_single_tex_bg(&smooth_b.1, "Smooth From B");

        let final_smooth_view = Self::final_smooth_view_of(settings.smoothing_iterations, &depth_target.1, &smooth_a.1, &smooth_b.1);
        let normals_bind_group = make_single_tex_bg(final_smooth_view, "Normals Input");

        let make_foam_blend_bg = |history: &TextureView, label: &str| {
            device.create_bind_group(&BindGroupDescriptor {
                label: Some(label),
                layout: &foam_blend_bgl,
                entries: &[
                    BindGroupEntry { binding: 0, resource: params_buffer.as_entire_binding() },
                    BindGroupEntry { binding: 1, resource: BindingResource::TextureView(&foam_raw.1) },
                    BindGroupEntry { binding: 2, resource: BindingResource::TextureView(history) },
                ],
            })
        };
        let foam_blend_bg_ping_to_pong = make_foam_blend_bg(&foam_ping.1, "Foam Blend Ping->Pong");
        let foam_blend_bg_pong_to_ping = make_foam_blend_bg(&foam_pong.1, "Foam Blend Pong->Ping");

        let make_composite_bg = |foam_history: &TextureView, label: &str| {
            device.create_bind_group(&BindGroupDescriptor {
                label: Some(label),
                layout: &composite_bgl,
                entries: &[
                    BindGroupEntry { binding: 0, resource: params_buffer.as_entire_binding() },
                    BindGroupEntry { binding: 1, resource: BindingResource::TextureView(final_smooth_view) },
                    BindGroupEntry { binding: 2, resource: BindingResource::TextureView(&normal_target.1) },
                    BindGroupEntry { binding: 3, resource: BindingResource::TextureView(&thickness_target.1) },
                    BindGroupEntry { binding: 4, resource: BindingResource::TextureView(foam_history) },
                ],
            })
        };
        let composite_bg_ping = make_composite_bg(&foam_ping.1, "Composite (foam=ping)");
        let composite_bg_pong = make_composite_bg(&foam_pong.1, "Composite (foam=pong)");

        Self {
            width,
            height,
            params_buffer,
            private_depth,
            depth_target,
            thickness_target,
            smooth_a,
            smooth_b,
            normal_target,
            foam_raw,
            foam_ping,
            foam_pong,
            foam_flip: false,
            depth_format,
            billboard_fluid_bgl,
            billboard_foam_bgl,
            single_tex_bgl,
            foam_blend_bgl,
            composite_bgl,
            depth_pipeline,
            thickness_pipeline,
            smooth_pipeline,
            normal_pipeline,
            foam_splat_pipeline,
            foam_blend_pipeline,
            composite_pipeline,
            fluid_bind_group: None,
            foam_bind_group: None,
            smooth_bg_from_depth,
            smooth_bg_from_a,
            smooth_bg_from_b,
            normals_bind_group,
            foam_blend_bg_ping_to_pong,
            foam_blend_bg_pong_to_ping,
            composite_bg_ping,
            composite_bg_pong,
            settings: *settings,
            environment: EnvironmentSettings::default(),
            bounds_size: [20.0, 20.0, 20.0],
            smoothing_radius: 1.0,
            particle_radius: 0.1,
            active_count: 0,
            foam_capacity: 0,
        }
    }

    /// Of the raw depth target and the two ping-pong buffers, returns
    /// whichever holds the result after `iterations` 5-tap passes (spec.md
    /// §4.G step 2: "ping-ponged with itself"). `iterations == 0` skips
    /// smoothing entirely and downstream passes read the raw depth.
    fn final_smooth_view_of<'a>(iterations: u32, depth: &'a TextureView, a: &'a TextureView, b: &'a TextureView) -> &'a TextureView {
        if iterations == 0 {
            depth
        } else if iterations % 2 == 1 {
            a
        } else {
            b
        }
    }

    fn rebuild_textures(&mut self, device: &Device) {
        self.private_depth = make_depth_stencil(device, "Screen-Space Private Depth", self.width, self.height, self.depth_format);
        self.depth_target = make_target(device, "Screen-Space Depth Target", self.width, self.height, DEPTH_TARGET_FORMAT);
        self.thickness_target = make_target(device, "Screen-Space Thickness Target", self.width, self.height, THICKNESS_TARGET_FORMAT);
        self.smooth_a = make_target(device, "Screen-Space Smooth A", self.width, self.height, DEPTH_TARGET_FORMAT);
        self.smooth_b = make_target(device, "Screen-Space Smooth B", self.width, self.height, DEPTH_TARGET_FORMAT);
        self.normal_target = make_target(device, "Screen-Space Normal Target", self.width, self.height, NORMAL_TARGET_FORMAT);
        self.foam_raw = make_target(device, "Screen-Space Foam Raw", self.width, self.height, FOAM_TARGET_FORMAT);
        self.foam_ping = make_target(device, "Screen-Space Foam Ping", self.width, self.height, FOAM_TARGET_FORMAT);
        self.foam_pong = make_target(device, "Screen-Space Foam Pong", self.width, self.height, FOAM_TARGET_FORMAT);
        self.foam_flip = false;

        let make_single_tex_bg = |view: &TextureView, label: &str| {
            device.create_bind_group(&BindGroupDescriptor {
                label: Some(label),
                layout: &self.single_tex_bgl,
                entries: &[
                    BindGroupEntry { binding: 0, resource: self.params_buffer.as_entire_binding() },
                    BindGroupEntry { binding: 1, resource: BindingResource::TextureView(view) },
                ],
            })
        };

        self.smooth_bg_from_depth = make_single_tex_bg(&self.depth_target.1, "Smooth From Depth");
        self.smooth_bg_from_a = make_single_tex_bg(&self.smooth_a.1, "Smooth From A");
        self.smooth_bg_from_b = make_single_tex_bg(&self.smooth_b.1, "Smooth From B");

        let final_smooth_view = Self::final_smooth_view_of(self.settings.smoothing_iterations, &self.depth_target.1, &self.smooth_a.1, &self.smooth_b.1);
        self.normals_bind_group = make_single_tex_bg(final_smooth_view, "Normals Input");

        let make_foam_blend_bg = |history: &TextureView, label: &str| {
            device.create_bind_group(&BindGroupDescriptor {
                label: Some(label),
                layout: &self.foam_blend_bgl,
                entries: &[
                    BindGroupEntry { binding: 0, resource: self.params_buffer.as_entire_binding() },
                    BindGroupEntry { binding: 1, resource: BindingResource::TextureView(&self.foam_raw.1) },
                    BindGroupEntry { binding: 2, resource: BindingResource::TextureView(history) },
                ],
            })
        };
        self.foam_blend_bg_ping_to_pong = make_foam_blend_bg(&self.foam_ping.1, "Foam Blend Ping->Pong");
        self.foam_blend_bg_pong_to_ping = make_foam_blend_bg(&self.foam_pong.1, "Foam Blend Pong->Ping");

        let make_composite_bg = |foam_history: &TextureView, label: &str| {
            device.create_bind_group(&BindGroupDescriptor {
                label: Some(label),
                layout: &self.composite_bgl,
                entries: &[
                    BindGroupEntry { binding: 0, resource: self.params_buffer.as_entire_binding() },
                    BindGroupEntry { binding: 1, resource: BindingResource::TextureView(final_smooth_view) },
                    BindGroupEntry { binding: 2, resource: BindingResource::TextureView(&self.normal_target.1) },
                    BindGroupEntry { binding: 3, resource: BindingResource::TextureView(&self.thickness_target.1) },
                    BindGroupEntry { binding: 4, resource: BindingResource::TextureView(foam_history) },
                ],
            })
        };
        self.composite_bg_ping = make_composite_bg(&self.foam_ping.1, "Composite (foam=ping)");
        self.composite_bg_pong = make_composite_bg(&self.foam_pong.1, "Composite (foam=pong)");
    }

    fn rebind(&mut self, device: &Device, particles: &Buffer, foam_ring: &Buffer) {
        self.fluid_bind_group = Some(device.create_bind_group(&BindGroupDescriptor {
            label: Some("Screen-Space Fluid Bind Group"),
            layout: &self.billboard_fluid_bgl,
            entries: &[
                BindGroupEntry { binding: 0, resource: self.params_buffer.as_entire_binding() },
                BindGroupEntry { binding: 1, resource: particles.as_entire_binding() },
            ],
        }));
        self.foam_bind_group = Some(device.create_bind_group(&BindGroupDescriptor {
            label: Some("Screen-Space Foam Bind Group"),
            layout: &self.billboard_foam_bgl,
            entries: &[
                BindGroupEntry { binding: 0, resource: self.params_buffer.as_entire_binding() },
                BindGroupEntry { binding: 1, resource: foam_ring.as_entire_binding() },
            ],
        }));
    }
}

impl Renderer for ScreenSpaceRenderer {
    fn kind(&self) -> RendererKind {
        RendererKind::ScreenSpace
    }

    fn bind_shared_config(&mut self, shared: &SharedRenderConfig) {
        self.particle_radius = shared.particle_radius;
        self.environment = shared.environment;
        self.bounds_size = shared.bounds_size;
        self.smoothing_radius = shared.smoothing_radius;
    }

    fn reset(&mut self) {
        // Foam temporal blend history (spec.md §4.G step 5) isn't explicitly
        // cleared: the next foam-blend pass mixes in freshly-spawned foam at
        // `foam_blend_rate`, which converges the stale ping/pong texture to
        // the new state within a few frames without a dedicated clear pass.
    }

    fn step(&mut self, device: &Device, _encoder: &mut CommandEncoder, solver: &SphSolver, foam: &FoamSystem, _density: &crate::density_volume::DensitySplatter) {
        self.rebind(device, solver.current_particle_buffer(), foam.ring_buffer());
        self.active_count = solver.active_count();
        self.foam_capacity = foam.capacity();
    }

    fn render(&mut self, encoder: &mut CommandEncoder, queue: &Queue, target: &TextureView, _depth: &TextureView, camera: &OrbitCamera) {
        let view = camera.view_matrix();
        let forward = (camera.pivot - camera.position()).normalize_or_zero();
        let tan_half_fov_y = (camera.fov * 0.5).tan();
        let params = ScreenSpaceParams {
            view_proj: camera.view_projection_matrix().to_cols_array_2d(),
            camera_pos: camera.position().to_array(),
            particle_radius: self.particle_radius,
            camera_right: view.row(0).truncate().to_array(),
            tan_half_fov_x: tan_half_fov_y * camera.aspect,
            camera_up: view.row(1).truncate().to_array(),
            tan_half_fov_y,
            camera_forward: forward.to_array(),
            near: camera.near,
            texel_size: [1.0 / self.width.max(1) as f32, 1.0 / self.height.max(1) as f32],
            far: camera.far,
            foam_blend_rate: self.settings.foam_blend,
            extinction: self.settings.extinction,
            refraction_strength: self.settings.refraction_strength,
            dir_to_sun: self.environment.dir_to_sun,
            exposure: self.environment.exposure,
            sun_color: self.environment.sun_color,
            brightness: self.environment.brightness,
            sky_color_top: self.environment.sky_color_top,
            saturation: self.environment.saturation,
            sky_color_horizon: self.environment.sky_color_horizon,
            floor_tile_size: self.environment.floor_tile_size,
            floor_tile_color_a: self.environment.floor_tile_color_a,
            floor_height: self.environment.floor_height,
            floor_tile_color_b: self.environment.floor_tile_color_b,
            foam_threshold: self.settings.foam_threshold,
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let (Some(fluid_bg), Some(foam_bg)) = (&self.fluid_bind_group, &self.foam_bind_group) else {
            return;
        };

        // Pass 1: depth. Billboards each particle as a view-facing quad;
        // the hardware depth test resolves the nearest particle per pixel,
        // and the fragment shader writes that particle's linear view-space
        // depth into `depth_target`.
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Screen-Space Depth Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &self.depth_target.1,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color { r: 1.0e6, g: 0.0, b: 0.0, a: 0.0 }),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                    view: &self.private_depth.1,
                    depth_ops: Some(Operations { load: LoadOp::Clear(1.0), store: StoreOp::Store }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.depth_pipeline);
            pass.set_bind_group(0, fluid_bg, &[]);
            pass.draw(0..6, 0..self.active_count);
        }

        // Pass 2: smooth. 5-tap bilateral-like filter, ping-ponged with
        // itself for `smoothing_iterations` rounds (spec.md: "ping-ponged
        // with itself").
        {
            let mut read_bg = &self.smooth_bg_from_depth;
            let mut write_view = &self.smooth_a.1;
            for i in 0..self.settings.smoothing_iterations {
                let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                    label: Some("Screen-Space Smooth Pass"),
                    color_attachments: &[Some(RenderPassColorAttachment {
                        view: write_view,
                        resolve_target: None,
                        ops: Operations { load: LoadOp::Clear(Color::TRANSPARENT), store: StoreOp::Store },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&self.smooth_pipeline);
                pass.set_bind_group(0, read_bg, &[]);
                pass.draw(0..3, 0..1);
                drop(pass);

                let next_is_a = i % 2 == 1;
                read_bg = if next_is_a { &self.smooth_bg_from_b } else { &self.smooth_bg_from_a };
                write_view = if next_is_a { &self.smooth_a.1 } else { &self.smooth_b.1 };
            }
        }

        // Pass 3: thickness. Additive disk splat, depth-tested against
        // pass 1's depth buffer with writes off so only particles at or in
        // front of the resolved surface contribute.
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Screen-Space Thickness Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &self.thickness_target.1,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Clear(Color::TRANSPARENT), store: StoreOp::Store },
                })],
                depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                    view: &self.private_depth.1,
                    depth_ops: Some(Operations { load: LoadOp::Load, store: StoreOp::Discard }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.thickness_pipeline);
            pass.set_bind_group(0, fluid_bg, &[]);
            pass.draw(0..6, 0..self.active_count);
        }

        // Pass 4: normals. Finite differences of the smoothed depth.
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Screen-Space Normals Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &self.normal_target.1,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Clear(Color::TRANSPARENT), store: StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.normal_pipeline);
            pass.set_bind_group(0, &self.normals_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        // Pass 5a: foam splat. Live foam particles splatted as oriented,
        // velocity-stretched billboards into a fresh target.
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Screen-Space Foam Splat Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &self.foam_raw.1,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Clear(Color::TRANSPARENT), store: StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.foam_splat_pipeline);
            pass.set_bind_group(0, foam_bg, &[]);
            pass.draw(0..6, 0..self.foam_capacity);
        }

        // Pass 5b: foam blend. Soft-thresholds the raw splat and blends it
        // with the previous frame's foam texture. `foam_flip` tracks which
        // of the two fixed foam textures currently holds that previous
        // result, so the read/write direction alternates every frame
        // without ever rebuilding a bind group.
        let (blend_bind_group, write_target, composite_bind_group) = if self.foam_flip {
            (&self.foam_blend_bg_pong_to_ping, &self.foam_ping.1, &self.composite_bg_ping)
        } else {
            (&self.foam_blend_bg_ping_to_pong, &self.foam_pong.1, &self.composite_bg_pong)
        };
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Screen-Space Foam Blend Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: write_target,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Clear(Color::TRANSPARENT), store: StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.foam_blend_pipeline);
            pass.set_bind_group(0, blend_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.foam_flip = !self.foam_flip;

        // Pass 6: composite into the caller's target.
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Screen-Space Composite Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Load, store: StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.composite_pipeline);
            pass.set_bind_group(0, composite_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
    }

    fn resize(&mut self, device: &Device, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.rebuild_textures(device);
        self.fluid_bind_group = None;
        self.foam_bind_group = None;
    }
}
