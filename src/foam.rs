//! Foam Lifecycle (spec.md §4.F): a secondary fixed-capacity ring-buffer
//! particle system for whitewater (bubbles/foam/spray), spawned from and
//! advected by the sorted SPH state. CPU-testable pure helpers
//! (`remap01`, `classify_thresholds`, `pcg_hash`/`stochastic_round`) are
//! extracted so the spawn-count rounding and classification rules can be
//! checked deterministically without a GPU.

use crate::config::{FoamConfig, ObstacleConfig, ObstacleShape};
use wgpu::*;

pub const FOAM_WORKGROUP_SIZE: u32 = 256;

/// Foam particle state tag (spec.md §3: "8-bit state tag").
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FoamState {
    Unknown = 0,
    Foam = 1,
    Bubble = 2,
    Spray = 3,
}

/// `#[repr(C)]` mirror of the WGSL `FoamParticle` struct.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuFoamParticle {
    pub position: [f32; 3],
    pub lifetime: f32,
    pub velocity: [f32; 3],
    pub scale: f32,
    pub state: u32,
    pub hysteresis: u32,
    pub _pad: [f32; 2],
}

impl GpuFoamParticle {
    pub fn dead() -> Self {
        Self {
            position: [0.0; 3],
            lifetime: 0.0,
            velocity: [0.0; 3],
            scale: 0.0,
            state: FoamState::Unknown as u32,
            hysteresis: 0,
            _pad: [0.0; 2],
        }
    }
}

/// Linear remap of `value` from `[lo, hi]` into `[0, 1]`, clamped at both
/// ends (spec.md §4.F: `remap01(|v|^2, eMin, eMax)`).
pub fn remap01(value: f32, lo: f32, hi: f32) -> f32 {
    if hi <= lo {
        return 0.0;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// A tiny PCG-style hash used to derive a deterministic per-particle,
/// per-frame uniform for stochastic rounding (spec.md §4.F: "round
/// stochastically via a PCG-hash-seeded uniform"). Hand-rolled rather than
/// pulled from `rand`, matching `spawn::Lcg32`'s determinism rationale.
pub fn pcg_hash(seed: u32) -> u32 {
    let state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28).wrapping_add(4))) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Uniform float in `[0, 1)` derived from `pcg_hash`.
pub fn pcg_uniform(seed: u32) -> f32 {
    (pcg_hash(seed) >> 8) as f32 / (1u32 << 24) as f32
}

/// Stochastically rounds a non-negative spawn count `lambda`: the integer
/// part always spawns, the fractional remainder spawns one more with
/// probability equal to the remainder, and the result never exceeds `cap`
/// (spec.md §4.F: "clamp to a per-particle cap").
pub fn stochastic_round(lambda: f32, seed: u32, cap: u32) -> u32 {
    if lambda <= 0.0 {
        return 0;
    }
    let whole = lambda.floor();
    let frac = lambda - whole;
    let extra = if pcg_uniform(seed) < frac { 1 } else { 0 };
    ((whole as u32) + extra).min(cap)
}

/// Hysteresis-gated classification (spec.md §4.F step 4): few neighbours →
/// SPRAY; many neighbours and sufficiently below the local fluid mean plane
/// → BUBBLE; otherwise FOAM. `height_below_mean_plane` is positive when the
/// particle sits below the plane. A change from `previous` to the
/// newly-computed candidate only takes effect once `hysteresis` reaches
/// `threshold_frames`; otherwise the previous state and a bumped counter are
/// returned.
pub fn classify_thresholds(
    neighbour_count: u32,
    height_below_mean_plane: f32,
    previous: FoamState,
    hysteresis: u32,
    config: &FoamConfig,
) -> (FoamState, u32) {
    let candidate = if neighbour_count <= config.classify_sparse_neighbours {
        FoamState::Spray
    } else if neighbour_count >= config.classify_dense_neighbours
        && height_below_mean_plane > config.classify_band_half_width
    {
        FoamState::Bubble
    } else {
        FoamState::Foam
    };

    if candidate == previous || previous == FoamState::Unknown {
        return (candidate, 0);
    }

    let next_hysteresis = hysteresis + 1;
    if next_hysteresis >= config.classify_hysteresis_frames {
        (candidate, 0)
    } else {
        (previous, next_hysteresis)
    }
}

/// `#[repr(C)]` mirror of the WGSL `FoamParams` uniform.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FoamParams {
    pub dt: f32,
    pub smoothing_radius: f32,
    pub gravity: f32,
    pub ring_capacity: u32,

    pub particle_count: u32,
    pub spawn_rate: f32,
    pub max_spawn_per_particle: u32,
    pub energy_min: f32,

    pub energy_max: f32,
    pub lifetime_min: f32,
    pub lifetime_max: f32,
    pub bubble_scale_min: f32,

    pub classify_sparse_neighbours: u32,
    pub classify_dense_neighbours: u32,
    pub classify_band_half_width: f32,
    pub classify_hysteresis_frames: u32,

    pub foam_advection_rate: f32,
    pub bubble_buoyancy: f32,
    pub spray_drag: f32,
    pub restitution: f32,

    pub foam_decay_rate: f32,
    pub bubble_decay_rate: f32,
    pub spray_decay_rate: f32,
    pub density_preserve_min: f32,

    pub density_preserve_max: f32,
    pub density_preserve_rate: f32,
    pub frame_seed: u32,
    pub bounds_half: f32,

    pub obstacle_impact_boost: f32,
    pub obstacle_enabled: u32,
    pub obstacle_shape: u32,
    pub obstacle_radius: f32,

    pub obstacle_centre: [f32; 3],
    pub _pad0: f32,

    pub obstacle_half_size: [f32; 3],
    pub _pad1: f32,
}

impl FoamParams {
    #[allow(clippy::too_many_arguments)]
    pub fn from_config(
        config: &FoamConfig,
        dt: f32,
        smoothing_radius: f32,
        gravity: f32,
        particle_count: u32,
        frame_seed: u32,
        bounds_half: f32,
        obstacle: &ObstacleConfig,
    ) -> Self {
        Self {
            dt,
            smoothing_radius,
            gravity,
            ring_capacity: config.ring_capacity,
            particle_count,
            spawn_rate: config.spawn_rate,
            max_spawn_per_particle: config.max_spawn_per_particle,
            energy_min: config.energy_min,
            energy_max: config.energy_max,
            lifetime_min: config.lifetime_min,
            lifetime_max: config.lifetime_max,
            bubble_scale_min: config.bubble_scale_min,
            classify_sparse_neighbours: config.classify_sparse_neighbours,
            classify_dense_neighbours: config.classify_dense_neighbours,
            classify_band_half_width: config.classify_band_half_width,
            classify_hysteresis_frames: config.classify_hysteresis_frames,
            foam_advection_rate: config.foam_advection_rate,
            bubble_buoyancy: config.bubble_buoyancy,
            spray_drag: config.spray_drag,
            restitution: config.restitution,
            foam_decay_rate: config.foam_decay_rate,
            bubble_decay_rate: config.bubble_decay_rate,
            spray_decay_rate: config.spray_decay_rate,
            density_preserve_min: config.density_preserve_min,
            density_preserve_max: config.density_preserve_max,
            density_preserve_rate: config.density_preserve_rate,
            frame_seed,
            bounds_half,
            obstacle_impact_boost: config.obstacle_impact_boost,
            obstacle_enabled: obstacle.enabled as u32,
            obstacle_shape: match obstacle.shape {
                ObstacleShape::Box => 0,
                ObstacleShape::Sphere => 1,
            },
            obstacle_radius: obstacle.radius,
            obstacle_centre: obstacle.centre,
            _pad0: 0.0,
            obstacle_half_size: obstacle.half_size,
            _pad1: 0.0,
        }
    }
}

/// GPU-resident foam system: owns the ring buffer, its atomic allocation
/// counter, and the spawn/classify-integrate/lifetime compute pipelines.
pub struct FoamSystem {
    ring_buffer: Buffer,
    counter_buffer: Buffer,
    params_buffer: Buffer,

    bind_group_layout: BindGroupLayout,
    bind_group: BindGroup,

    spawn_pipeline: ComputePipeline,
    update_pipeline: ComputePipeline,

    capacity: u32,
    frame_seed: u32,
}

impl FoamSystem {
    pub fn new(device: &Device, fluid_particles: &Buffer, config: &FoamConfig) -> Self {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Foam Shader"),
            source: ShaderSource::Wgsl(include_str!("../shaders/foam.wgsl").into()),
        });

        let ring_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Foam Ring Buffer"),
            size: (config.ring_capacity as u64) * std::mem::size_of::<GpuFoamParticle>() as u64,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let counter_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Foam Counter Buffer"),
            size: std::mem::size_of::<u32>() as u64,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Foam Params Buffer"),
            size: std::mem::size_of::<FoamParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Foam Bind Group Layout"),
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
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Foam Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                BindGroupEntry { binding: 0, resource: params_buffer.as_entire_binding() },
                BindGroupEntry { binding: 1, resource: fluid_particles.as_entire_binding() },
                BindGroupEntry { binding: 2, resource: ring_buffer.as_entire_binding() },
                BindGroupEntry { binding: 3, resource: counter_buffer.as_entire_binding() },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Foam Pipeline Layout"),
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

        Self {
            ring_buffer,
            counter_buffer,
            params_buffer,
            bind_group_layout,
            bind_group,
            spawn_pipeline: make_pipeline("spawn_foam"),
            update_pipeline: make_pipeline("classify_integrate_foam"),
            capacity: config.ring_capacity,
            frame_seed: 0,
        }
    }

    pub fn bind_group_layout(&self) -> &BindGroupLayout {
        &self.bind_group_layout
    }

    /// Rebuilds the bind group against a new fluid-particle buffer. See
    /// `DensitySplatter::rebind` for why this is needed every frame rather
    /// than only on reset (spec.md §9's epoch-keyed bind step).
    pub fn rebind(&mut self, device: &Device, fluid_particles: &Buffer) {
        self.bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Foam Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry { binding: 0, resource: self.params_buffer.as_entire_binding() },
                BindGroupEntry { binding: 1, resource: fluid_particles.as_entire_binding() },
                BindGroupEntry { binding: 2, resource: self.ring_buffer.as_entire_binding() },
                BindGroupEntry { binding: 3, resource: self.counter_buffer.as_entire_binding() },
            ],
        });
    }

    pub fn ring_buffer(&self) -> &Buffer {
        &self.ring_buffer
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Runs spawn then classify/integrate/lifetime, in that order (spec.md
    /// §4.F). `frame_seed` advances every call so `pcg_hash` never repeats
    /// the same stochastic-rounding draw twice in a row.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        encoder: &mut CommandEncoder,
        queue: &Queue,
        config: &FoamConfig,
        dt: f32,
        smoothing_radius: f32,
        gravity: f32,
        particle_count: u32,
        bounds_half: f32,
        obstacle: &ObstacleConfig,
    ) {
        self.frame_seed = self.frame_seed.wrapping_add(0x9E37_79B9);
        let params = FoamParams::from_config(
            config,
            dt,
            smoothing_radius,
            gravity,
            particle_count,
            self.frame_seed,
            bounds_half,
            obstacle,
        );
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let spawn_groups = particle_count.div_ceil(FOAM_WORKGROUP_SIZE).max(1);
        let update_groups = self.capacity.div_ceil(FOAM_WORKGROUP_SIZE).max(1);

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Foam Spawn Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.spawn_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(spawn_groups, 1, 1);
        drop(pass);

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Foam Classify/Integrate Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.update_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(update_groups, 1, 1);
        drop(pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FoamConfig {
        FoamConfig::default()
    }

    #[test]
    fn remap01_clamps_outside_range() {
        assert_eq!(remap01(-5.0, 0.0, 10.0), 0.0);
        assert_eq!(remap01(15.0, 0.0, 10.0), 1.0);
        assert!((remap01(5.0, 0.0, 10.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn remap01_degenerate_range_returns_zero() {
        assert_eq!(remap01(5.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn stochastic_round_never_exceeds_cap() {
        for seed in 0..1000u32 {
            let count = stochastic_round(3.9, seed, 2);
            assert!(count <= 2);
        }
    }

    #[test]
    fn stochastic_round_zero_lambda_never_spawns() {
        for seed in 0..100u32 {
            assert_eq!(stochastic_round(0.0, seed, 10), 0);
        }
    }

    #[test]
    fn stochastic_round_converges_to_lambda_on_average() {
        let lambda = 2.37;
        let trials = 20_000u32;
        let total: u32 = (0..trials).map(|seed| stochastic_round(lambda, seed.wrapping_mul(0x1234_5679), 1000)).sum();
        let mean = total as f32 / trials as f32;
        assert!((mean - lambda).abs() < 0.05, "mean {mean} should be close to {lambda}");
    }

    #[test]
    fn classify_sparse_neighbours_yields_spray() {
        let config = test_config();
        let (state, hyst) = classify_thresholds(2, 0.0, FoamState::Unknown, 0, &config);
        assert_eq!(state, FoamState::Spray);
        assert_eq!(hyst, 0);
    }

    #[test]
    fn classify_dense_and_below_plane_yields_bubble() {
        let config = test_config();
        let (state, _) = classify_thresholds(25, 1.0, FoamState::Unknown, 0, &config);
        assert_eq!(state, FoamState::Bubble);
    }

    #[test]
    fn classify_moderate_neighbours_yields_foam() {
        let config = test_config();
        let (state, _) = classify_thresholds(10, 0.0, FoamState::Unknown, 0, &config);
        assert_eq!(state, FoamState::Foam);
    }

    #[test]
    fn classify_hysteresis_holds_previous_state_until_threshold() {
        let config = test_config();
        let mut state = FoamState::Foam;
        let mut hysteresis = 0;
        for _ in 0..config.classify_hysteresis_frames - 1 {
            let (next_state, next_hyst) = classify_thresholds(2, 0.0, state, hysteresis, &config);
            assert_eq!(next_state, FoamState::Foam, "must not flip before threshold frames");
            hysteresis = next_hyst;
            state = next_state;
        }
        let (final_state, final_hyst) = classify_thresholds(2, 0.0, state, hysteresis, &config);
        assert_eq!(final_state, FoamState::Spray);
        assert_eq!(final_hyst, 0);
    }

    #[test]
    fn pcg_hash_is_deterministic() {
        assert_eq!(pcg_hash(42), pcg_hash(42));
        assert_ne!(pcg_hash(42), pcg_hash(43));
    }
}
