//! Grid Sort (spec.md §4.C): deterministic, contention-free counting sort of
//! particles into spatial-hash cells via the "rank + start" protocol. The
//! GPU dispatch group (`GridSort`) owns its own bind group layout and
//! pipelines, following the same per-component-owns-its-pipeline shape as
//! the teacher's `TerrainRenderer`. A CPU reference implementation
//! (`cpu_reference_sort`) checks the sort-partition and determinism
//! properties (spec.md §8, properties 1–2) without needing a GPU device.

use glam::{IVec3, Vec3};
use wgpu::util::DeviceExt;
use wgpu::*;

/// Workgroup size for the per-particle key/rank/scatter dispatches.
pub const GRID_WORKGROUP_SIZE: u32 = 256;

/// Cell coordinates for a predicted position, given the grid's origin and
/// cell size `h` (spec.md §4.C step 1).
pub fn cell_coord(pred: Vec3, min: Vec3, h: f32) -> IVec3 {
    ((pred - min) / h).floor().as_ivec3()
}

/// Linearizes cell coordinates into a single key given the grid's dimensions
/// (spec.md §4.C step 1): `k = cx + gx*(cy + gy*cz)`.
pub fn cell_key(coord: IVec3, dims: IVec3) -> u32 {
    debug_assert!(coord.x >= 0 && coord.y >= 0 && coord.z >= 0);
    debug_assert!(coord.x < dims.x && coord.y < dims.y && coord.z < dims.z);
    (coord.x + dims.x * (coord.y + dims.y * coord.z)) as u32
}

/// Total cell count for a bounds size and cell size `h`, rounded up so every
/// particle inside bounds maps to an in-range cell (spec.md §4.C: "`C` is
/// chosen as a power of grid dimensions, not modulo-N").
pub fn grid_dims(bounds_size: Vec3, h: f32) -> IVec3 {
    (bounds_size / h).ceil().as_ivec3().max(IVec3::ONE)
}

/// Output of a sort pass: the permutation applied plus the cell offset
/// table (spec.md §3 "Cell offset table").
#[derive(Clone, Debug, PartialEq)]
pub struct SortResult {
    /// `permutation[new_index] = old_index`.
    pub permutation: Vec<u32>,
    /// Length `C + 1`; `cell_offset[C]` is the sentinel `N`.
    pub cell_offset: Vec<u32>,
}

/// CPU reference implementation of the linear-grid counting sort described
/// in spec.md §4.C. Used only by tests; the real-time path runs the
/// equivalent dispatch on the GPU (`GridSort::encode`).
pub fn cpu_reference_sort(predicted: &[Vec3], min: Vec3, h: f32, dims: IVec3) -> SortResult {
    let n = predicted.len();
    let cell_count = (dims.x * dims.y * dims.z).max(1) as usize;

    let keys: Vec<u32> = predicted
        .iter()
        .map(|&p| cell_key(cell_coord(p, min, h), dims))
        .collect();

    // Start-offset scan: exclusive prefix sum of per-cell populations.
    let mut counts = vec![0u32; cell_count];
    for &k in &keys {
        counts[k as usize] += 1;
    }
    let mut cell_offset = vec![0u32; cell_count + 1];
    let mut running = 0u32;
    for (c, count) in counts.iter().enumerate() {
        cell_offset[c] = running;
        running += count;
    }
    cell_offset[cell_count] = n as u32;
    debug_assert_eq!(running, n as u32);

    // Rank pass + contention-free scatter.
    let mut cursor = cell_offset.clone();
    let mut permutation = vec![0u32; n];
    for (i, &k) in keys.iter().enumerate() {
        let dest = cursor[k as usize];
        permutation[dest as usize] = i as u32;
        cursor[k as usize] += 1;
    }

    SortResult {
        permutation,
        cell_offset,
    }
}

/// Applies a sort permutation to parallel arrays (position/velocity/
/// predicted), matching spec.md §4.C step 4 ("Reindex").
pub fn apply_permutation<T: Copy>(values: &[T], permutation: &[u32]) -> Vec<T> {
    permutation.iter().map(|&old| values[old as usize]).collect()
}

/// Parameters uploaded to the GPU key/scatter shaders — must match the WGSL
/// struct layout in `shaders/grid.wgsl` exactly (teacher precedent:
/// `terrain::ComputeParams`).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GridParams {
    pub bounds_min: [f32; 3],
    pub cell_size: f32,
    pub dims: [i32; 3],
    pub particle_count: u32,
}

/// GPU dispatch group implementing the sort. Holds its own bind group
/// layout, pipelines, and scratch buffers (keys, per-cell counters, cell
/// offsets) the way `TerrainRenderer` owns its compute pipeline and chunk
/// buffers.
pub struct GridSort {
    params_buffer: Buffer,
    keys_buffer: Buffer,
    cell_counters_buffer: Buffer,
    cell_offset_buffer: Buffer,
    ranks_buffer: Buffer,
    clear_pipeline: ComputePipeline,
    key_pipeline: ComputePipeline,
    scan_pipeline: ComputePipeline,
    scatter_pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    capacity: u32,
    cell_count: u32,
}

impl GridSort {
    pub fn new(device: &Device, max_particles: u32, max_cells: u32) -> Self {
        let shader_source = include_str!("../shaders/grid.wgsl");
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Grid Sort Shader"),
            source: ShaderSource::Wgsl(shader_source.into()),
        });

        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Grid Params Buffer"),
            size: std::mem::size_of::<GridParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let keys_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Grid Keys Buffer"),
            size: (max_particles as u64) * 4,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let cell_counters_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Grid Cell Counters Buffer"),
            size: (max_cells as u64 + 1) * 4,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let cell_offset_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Grid Cell Offset Buffer"),
            size: (max_cells as u64 + 1) * 4,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let ranks_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Grid Ranks Buffer"),
            size: (max_particles as u64) * 4,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Grid Sort Bind Group Layout"),
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
                        ty: BufferBindingType::Storage { read_only: false },
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
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Source particle buffer (read-only): `assign_keys_and_ranks`
                // reads predicted positions from here.
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
                // Destination particle buffer: `scatter_particles` writes
                // the reordered particle array here (the other half of the
                // caller's ping-pong pair).
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
                // Per-particle rank within its cell, assigned via atomic
                // fetch-add in the key pass and consumed (not re-derived) by
                // the scatter pass.
                BindGroupLayoutEntry {
                    binding: 6,
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

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Grid Sort Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |entry_point: &str| {
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        Self {
            params_buffer,
            keys_buffer,
            cell_counters_buffer,
            cell_offset_buffer,
            ranks_buffer,
            clear_pipeline: make_pipeline("clear_cell_counters"),
            key_pipeline: make_pipeline("assign_keys_and_ranks"),
            scan_pipeline: make_pipeline("scan_cell_offsets"),
            scatter_pipeline: make_pipeline("scatter_particles"),
            bind_group_layout,
            capacity: max_particles,
            cell_count: max_cells,
        }
    }

    /// Bind group layout accessor so `SphSolver` can build a bind group
    /// against the particle buffers it owns (mirrors the teacher's pattern
    /// of sharing a layout across bind groups for ping-pong buffers).
    pub fn bind_group_layout(&self) -> &BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn upload_params(&self, queue: &Queue, params: GridParams) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::cast_slice(&[params]));
    }

    /// Encodes the four-stage dispatch: clear the per-cell counters, key +
    /// rank pass, prefix-sum scan, contention-free scatter (spec.md §4.C).
    /// `bind_group` must match `bind_group_layout()`: bindings 0-3 are this
    /// grid's own params/keys/counters/offsets buffers, binding 4 is the
    /// caller's source particle buffer (read-only), binding 5 is the
    /// destination particle buffer the scatter pass reorders into, and
    /// binding 6 is the per-particle rank buffer — built by the owning
    /// `SphSolver` against its ping-pong particle buffers. Ranks are unique
    /// per cell, so the scatter pass writes `cell_offsets[key] + rank`
    /// directly with no atomics.
    pub fn encode(&self, encoder: &mut CommandEncoder, bind_group: &BindGroup, particle_count: u32) {
        let workgroups = particle_count.div_ceil(GRID_WORKGROUP_SIZE).max(1);

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Grid Sort Pass"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, bind_group, &[]);

        pass.set_pipeline(&self.clear_pipeline);
        pass.dispatch_workgroups(1, 1, 1);

        pass.set_pipeline(&self.key_pipeline);
        pass.dispatch_workgroups(workgroups, 1, 1);

        pass.set_pipeline(&self.scan_pipeline);
        pass.dispatch_workgroups(1, 1, 1);

        pass.set_pipeline(&self.scatter_pipeline);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }

    pub fn params_buffer(&self) -> &Buffer {
        &self.params_buffer
    }
    pub fn keys_buffer(&self) -> &Buffer {
        &self.keys_buffer
    }
    pub fn cell_counters_buffer(&self) -> &Buffer {
        &self.cell_counters_buffer
    }
    pub fn cell_offset_buffer(&self) -> &Buffer {
        &self.cell_offset_buffer
    }
    pub fn ranks_buffer(&self) -> &Buffer {
        &self.ranks_buffer
    }
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
    pub fn cell_count(&self) -> u32 {
        self.cell_count
    }
}

/// Builds a small staging buffer initialised with zero, used when
/// (re)allocating the cell-offset / counters buffers for a new `C` after a
/// bounds or smoothing-radius change.
pub fn zeroed_storage_buffer(device: &Device, label: &str, len: usize) -> Buffer {
    let data = vec![0u32; len];
    device.create_buffer_init(&util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(&data),
        usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_like(seed: u32, n: usize, bounds: f32) -> Vec<Vec3> {
        let mut rng = crate::spawn::Lcg32::new(seed);
        (0..n)
            .map(|_| {
                Vec3::new(
                    rng.next_f32() * bounds,
                    rng.next_f32() * bounds,
                    rng.next_f32() * bounds,
                )
            })
            .collect()
    }

    #[test]
    fn sort_partition_property_holds() {
        // Testable property 1 (spec.md §8): each cell's range in the
        // reindexed array is exactly the particles with that key.
        let h = 1.0;
        let bounds = 8.0;
        let dims = grid_dims(Vec3::splat(bounds), h);
        let positions = random_like(7, 500, bounds);
        let result = cpu_reference_sort(&positions, Vec3::ZERO, h, dims);

        let cell_count = (dims.x * dims.y * dims.z) as usize;
        assert_eq!(result.cell_offset.len(), cell_count + 1);
        assert_eq!(*result.cell_offset.last().unwrap(), positions.len() as u32);

        for c in 0..cell_count {
            let range = result.cell_offset[c] as usize..result.cell_offset[c + 1] as usize;
            for &old_index in &result.permutation[range] {
                let key = cell_key(cell_coord(positions[old_index as usize], Vec3::ZERO, h), dims);
                assert_eq!(key as usize, c);
            }
        }
    }

    #[test]
    fn sort_is_a_bijection_over_0_n() {
        let h = 1.0;
        let bounds = 8.0;
        let dims = grid_dims(Vec3::splat(bounds), h);
        let positions = random_like(11, 300, bounds);
        let result = cpu_reference_sort(&positions, Vec3::ZERO, h, dims);

        let mut seen = vec![false; positions.len()];
        for &old_index in &result.permutation {
            assert!(!seen[old_index as usize], "index appeared twice");
            seen[old_index as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn sort_is_deterministic_across_runs() {
        // Testable property 2.
        let h = 0.5;
        let bounds = 6.0;
        let dims = grid_dims(Vec3::splat(bounds), h);
        let positions = random_like(99, 400, bounds);

        let a = cpu_reference_sort(&positions, Vec3::ZERO, h, dims);
        let b = cpu_reference_sort(&positions, Vec3::ZERO, h, dims);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_cells_yield_equal_consecutive_offsets() {
        let h = 1.0;
        let dims = IVec3::new(4, 4, 4);
        // Only populate one cell.
        let positions = vec![Vec3::new(0.1, 0.1, 0.1); 5];
        let result = cpu_reference_sort(&positions, Vec3::ZERO, h, dims);
        let populated_cell = cell_key(cell_coord(positions[0], Vec3::ZERO, h), dims) as usize;
        for c in 0..(dims.x * dims.y * dims.z) as usize {
            if c != populated_cell {
                assert_eq!(result.cell_offset[c], result.cell_offset[c + 1]);
            }
        }
        assert_eq!(
            result.cell_offset[populated_cell + 1] - result.cell_offset[populated_cell],
            5
        );
    }

    #[test]
    fn apply_permutation_reindexes_values() {
        let values = vec![10, 20, 30, 40];
        let permutation = vec![3, 1, 0, 2];
        let reindexed = apply_permutation(&values, &permutation);
        assert_eq!(reindexed, vec![40, 20, 10, 30]);
    }
}
