//! Density Splat (spec.md §4.E): converts the particle cloud into a 3D
//! scalar field via a clear/splat/resolve compute cascade. Splat accumulates
//! into a fixed-point `atomic<u32>` buffer (spec.md: "×1000 scale") and
//! resolve divides back down into an `R16Float` 3D texture.

use glam::{IVec3, Vec3};
use wgpu::*;

/// Fixed-point scale applied before truncating a kernel weight to `u32` in
/// the splat pass (spec.md §4.E: "fixed-point scale (e.g. ×1000)").
pub const FIXED_POINT_SCALE: f32 = 1000.0;

pub const DENSITY_WORKGROUP_SIZE: u32 = 256;
pub const VOXEL_WORKGROUP_SIZE: u32 = 4;

/// Voxel grid dimensions and voxel-per-world ratio for a given bounds size
/// and `densityTextureRes` (longest-axis voxel count). Pure so it is
/// unit-testable without a GPU (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoxelGrid {
    pub dims: IVec3,
    pub voxel_size: Vec3,
}

impl VoxelGrid {
    pub fn voxel_count(&self) -> u32 {
        (self.dims.x * self.dims.y * self.dims.z).max(0) as u32
    }
}

/// Derives the voxel grid from `boundsSize` and `densityTextureRes`: the
/// longest bounds axis gets exactly `density_texture_res` voxels, and the
/// other axes get a voxel count proportional to their length so voxels stay
/// (approximately) cubic (spec.md §3, §6).
pub fn voxel_grid_for_bounds(bounds_size: Vec3, density_texture_res: u32) -> VoxelGrid {
    let longest = bounds_size.x.max(bounds_size.y).max(bounds_size.z).max(1e-6);
    let voxel_size_scalar = longest / density_texture_res.max(1) as f32;
    let dims = (bounds_size / voxel_size_scalar).round().max(Vec3::ONE).as_ivec3();
    VoxelGrid {
        dims,
        voxel_size: bounds_size / dims.as_vec3(),
    }
}

/// `#[repr(C)]` mirror of the WGSL `DensityParams` uniform. Every `vec3<f32>`
/// is followed by a single scalar so the layout satisfies WGSL's 16-byte
/// vec3 alignment rule without an explicit `repr(align)` — the same packing
/// `grid::GridParams`/`physics::SphParams` use.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DensityParams {
    pub bounds_min: [f32; 3],
    pub smoothing_radius: f32,

    pub voxel_size: [f32; 3],
    pub particle_count: u32,

    pub voxel_dims: [i32; 3],
    pub fixed_point_scale: f32,
}

pub struct DensitySplatter {
    params_buffer: Buffer,
    accumulator: Buffer,
    texture: Texture,
    texture_view: TextureView,

    bind_group_layout: BindGroupLayout,
    bind_group: BindGroup,

    clear_pipeline: ComputePipeline,
    splat_pipeline: ComputePipeline,
    resolve_pipeline: ComputePipeline,

    grid: VoxelGrid,
}

impl DensitySplatter {
    pub fn new(
        device: &Device,
        particles: &Buffer,
        max_particles: u32,
        bounds_size: Vec3,
        density_texture_res: u32,
        supports_subgroups: bool,
    ) -> Self {
        let grid = voxel_grid_for_bounds(bounds_size, density_texture_res);

        let shader_source = if supports_subgroups {
            include_str!("../shaders/density_volume_subgroup.wgsl")
        } else {
            include_str!("../shaders/density_volume.wgsl")
        };
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Density Volume Shader"),
            source: ShaderSource::Wgsl(shader_source.into()),
        });

        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Density Params Buffer"),
            size: std::mem::size_of::<DensityParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let accumulator = device.create_buffer(&BufferDescriptor {
            label: Some("Density Accumulator Buffer"),
            size: (grid.voxel_count().max(1) as u64) * std::mem::size_of::<u32>() as u64,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let texture = device.create_texture(&TextureDescriptor {
            label: Some("Density Volume Texture"),
            size: Extent3d {
                width: grid.dims.x.max(1) as u32,
                height: grid.dims.y.max(1) as u32,
                depth_or_array_layers: grid.dims.z.max(1) as u32,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D3,
            format: TextureFormat::R16Float,
            usage: TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let texture_view = texture.create_view(&TextureViewDescriptor::default());

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Density Volume Bind Group Layout"),
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
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
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
                    ty: BindingType::StorageTexture {
                        access: StorageTextureAccess::WriteOnly,
                        format: TextureFormat::R16Float,
                        view_dimension: TextureViewDimension::D3,
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Density Volume Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                BindGroupEntry { binding: 0, resource: params_buffer.as_entire_binding() },
                BindGroupEntry { binding: 1, resource: particles.as_entire_binding() },
                BindGroupEntry { binding: 2, resource: accumulator.as_entire_binding() },
                BindGroupEntry { binding: 3, resource: BindingResource::TextureView(&texture_view) },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Density Volume Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |entry: &str| {
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let _ = max_particles;

        Self {
            params_buffer,
            accumulator,
            texture,
            texture_view,
            bind_group_layout,
            bind_group,
            clear_pipeline: make_pipeline("clear_accumulator"),
            splat_pipeline: make_pipeline("splat_particles"),
            resolve_pipeline: make_pipeline("resolve_density"),
            grid,
        }
    }

    pub fn texture_view(&self) -> &TextureView {
        &self.texture_view
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn grid(&self) -> VoxelGrid {
        self.grid
    }

    /// Rebuilds the bind group against a new particle buffer, the bind
    /// step spec.md §9's "cyclic references between renderer and physics
    /// buffers" design note describes: the splatter doesn't own the
    /// particle buffer, and the solver's double-buffered ping-pong means
    /// the buffer that is logically "current" changes every substep, so
    /// the caller rebinds once per frame against the post-step buffer.
    pub fn rebind(&mut self, device: &Device, particles: &Buffer) {
        self.bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Density Volume Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry { binding: 0, resource: self.params_buffer.as_entire_binding() },
                BindGroupEntry { binding: 1, resource: particles.as_entire_binding() },
                BindGroupEntry { binding: 2, resource: self.accumulator.as_entire_binding() },
                BindGroupEntry { binding: 3, resource: BindingResource::TextureView(&self.texture_view) },
            ],
        });
    }

    /// Runs clear → splat → resolve in order (spec.md §4.E). `bounds_min` is
    /// the world-space minimum corner of the simulation bounds.
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        queue: &Queue,
        bounds_min: Vec3,
        smoothing_radius: f32,
        particle_count: u32,
    ) {
        let params = DensityParams {
            bounds_min: bounds_min.into(),
            smoothing_radius,
            voxel_size: self.grid.voxel_size.into(),
            particle_count,
            voxel_dims: self.grid.dims.into(),
            fixed_point_scale: FIXED_POINT_SCALE,
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let voxel_count = self.grid.voxel_count();
        let voxel_groups = voxel_count.div_ceil(DENSITY_WORKGROUP_SIZE).max(1);
        let particle_groups = particle_count.div_ceil(DENSITY_WORKGROUP_SIZE).max(1);

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Density Clear Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.clear_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(voxel_groups, 1, 1);
        drop(pass);

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Density Splat Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.splat_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(particle_groups, 1, 1);
        drop(pass);

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Density Resolve Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.resolve_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(voxel_groups, 1, 1);
        drop(pass);
    }

    /// Reads the resolved accumulator back to the host for debugging
    /// (spec.md §5: "device readbacks (debug-only)... explicit future
    /// resolved before the next submission"). Maps a staging copy of the
    /// raw fixed-point accumulator, not the resolved texture, since texture
    /// readback requires row-pitch-aligned copies the accumulator avoids.
    /// Blocks on `device.poll(Maintain::Wait)` rather than pulling in an
    /// executor crate, the same `map_async` + channel + blocking-poll shape
    /// used for compute readback elsewhere in the wgpu ecosystem.
    pub fn read_back_debug(&self, device: &Device, queue: &Queue) -> Vec<u32> {
        let size = self.accumulator.size();
        let staging = device.create_buffer(&BufferDescriptor {
            label: Some("Density Debug Staging Buffer"),
            size,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Density Debug Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.accumulator, 0, &staging, 0, size);
        queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(Maintain::Wait);
        rx.recv().expect("map_async channel closed").expect("buffer map failed");

        let data = slice.get_mapped_range();
        let values: Vec<u32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voxel_grid_longest_axis_matches_requested_resolution() {
        let grid = voxel_grid_for_bounds(Vec3::new(20.0, 10.0, 5.0), 64);
        assert_eq!(grid.dims.x, 64);
        assert!(grid.dims.y <= 64 && grid.dims.y >= 1);
        assert!(grid.dims.z <= 64 && grid.dims.z >= 1);
    }

    #[test]
    fn voxel_grid_is_cubic_for_cubic_bounds() {
        let grid = voxel_grid_for_bounds(Vec3::splat(20.0), 32);
        assert_eq!(grid.dims, IVec3::splat(32));
        assert!((grid.voxel_size.x - grid.voxel_size.y).abs() < 1e-5);
        assert!((grid.voxel_size.y - grid.voxel_size.z).abs() < 1e-5);
    }

    #[test]
    fn voxel_grid_never_degenerates_to_zero_voxels() {
        let grid = voxel_grid_for_bounds(Vec3::new(0.01, 0.01, 0.01), 2);
        assert!(grid.voxel_count() >= 1);
    }

    #[test]
    fn fixed_point_scale_round_trips_a_kernel_weight() {
        let weight: f32 = 0.4231;
        let encoded = (weight * FIXED_POINT_SCALE).floor() as u32;
        let decoded = encoded as f32 / FIXED_POINT_SCALE;
        assert!((decoded - weight).abs() < 1.0 / FIXED_POINT_SCALE);
    }
}
