//! Integration scenarios S1-S6 (spec.md §8). Each test drives a real
//! `wgpu` device end to end, so these are `#[ignore]`d by default (no GPU
//! adapter is assumed to be present in a plain `cargo test` run) and meant
//! to be run explicitly with `cargo test -- --ignored` on a machine with a
//! usable adapter, the same opt-in shape the teacher's own GPU-backed
//! tests use.

use glam::Vec3;
use wgpu::{MapMode, Maintain};

use sph_fluid_core::config::{MarchingCubesSettings, ObstacleConfig, ObstacleShape, RaymarchSettings, ScreenSpaceSettings, SimConfig, SpawnRegion};
use sph_fluid_core::context::GpuContext;
use sph_fluid_core::environment::EnvironmentSettings;
use sph_fluid_core::foam::GpuFoamParticle;
use sph_fluid_core::input::FrameInput;
use sph_fluid_core::renderers::{RendererKind, RendererSettings};
use sph_fluid_core::Simulation;

const FRAME_DT: f32 = 1.0 / 60.0;
const MAX_PARTICLES: u32 = 20_000;
const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

fn test_context() -> GpuContext {
    pollster::block_on(GpuContext::new()).expect("no GPU adapter available for scenario test")
}

fn build_simulation(context: &GpuContext, config: SimConfig) -> Simulation {
    let marching_cubes = MarchingCubesSettings::default();
    let raymarch = RaymarchSettings::default();
    let screen_space = ScreenSpaceSettings::default();
    let settings = RendererSettings {
        marching_cubes: &marching_cubes,
        raymarch: &raymarch,
        screen_space: &screen_space,
    };
    Simulation::new(
        context,
        config,
        EnvironmentSettings::default(),
        &settings,
        COLOR_FORMAT,
        DEPTH_FORMAT,
        640,
        480,
        MAX_PARTICLES,
    )
    .expect("scenario config should validate")
}

fn mean_speed(positions_velocities: &[(Vec3, Vec3)]) -> f32 {
    let sum: f32 = positions_velocities.iter().map(|(_, v)| v.length()).sum();
    sum / positions_velocities.len().max(1) as f32
}

/// S1 — resting tank: 10,000 particles in a 6x6x6 region centred in a
/// 20x20x20 bounds, zero velocity, gravity=10. After 2s simulated time the
/// mean speed should have settled well below its initial free-fall value.
#[test]
#[ignore]
fn s1_resting_tank_settles() {
    let context = test_context();
    let config = SimConfig {
        gravity: 10.0,
        bounds_size: [20.0, 20.0, 20.0],
        spawn_density: 46.0,
        spawn_regions: vec![SpawnRegion {
            center: [0.0, 0.0, 0.0],
            size: [6.0, 6.0, 6.0],
        }],
        initial_velocity: [0.0, 0.0, 0.0],
        ..SimConfig::default()
    };
    let mut sim = build_simulation(&context, config);

    let frames = (2.0 / FRAME_DT) as u32;
    for _ in 0..frames {
        sim.step(&context, FRAME_DT, FrameInput::idle());
    }

    let particles = solver_particles(&sim, &context);
    let samples: Vec<(Vec3, Vec3)> = particles
        .iter()
        .map(|p| (Vec3::from(p.position), Vec3::from(p.velocity)))
        .collect();
    assert!(mean_speed(&samples) < 0.2, "mean |v| did not settle below 0.2");
}

/// S2 — dam break: a 4x8x4 column against the -x wall; by 0.5s the cloud's
/// x-extent should exceed 80% of boundsX, and no particle should leave the
/// bounds (collision resolution keeps everything inside the half-extent
/// plus a small slack for interpenetration during a single substep).
#[test]
#[ignore]
fn s2_dam_break_spreads_without_leaving_bounds() {
    let context = test_context();
    let bounds_x = 20.0;
    let config = SimConfig {
        gravity: 10.0,
        bounds_size: [bounds_x, 20.0, 20.0],
        collision_damping: 0.3,
        spawn_density: 50.0,
        spawn_regions: vec![SpawnRegion {
            center: [-8.0, 0.0, 0.0],
            size: [4.0, 8.0, 4.0],
        }],
        ..SimConfig::default()
    };
    let mut sim = build_simulation(&context, config);

    let frames = (0.5 / FRAME_DT) as u32;
    for _ in 0..frames {
        sim.step(&context, FRAME_DT, FrameInput::idle());
    }

    let particles = solver_particles(&sim, &context);
    let half = bounds_x * 0.5;
    let slack = 0.5;
    for p in &particles {
        assert!(p.position[0].abs() <= half + slack, "particle escaped bounds: {:?}", p.position);
    }

    let min_x = particles.iter().map(|p| p.position[0]).fold(f32::INFINITY, f32::min);
    let max_x = particles.iter().map(|p| p.position[0]).fold(f32::NEG_INFINITY, f32::max);
    assert!(max_x - min_x > 0.8 * bounds_x, "cloud did not spread across 80% of boundsX");
}

/// S3 — obstacle sphere: a sphere obstacle of radius 2 at the origin with a
/// 6x4x6 column above; over 2s, at least half the sampled frames should
/// have some particle within 0.1 of the sphere's surface (fluid wraps it).
#[test]
#[ignore]
fn s3_fluid_wraps_obstacle_sphere() {
    let context = test_context();
    let config = SimConfig {
        gravity: 10.0,
        bounds_size: [20.0, 20.0, 20.0],
        obstacle: ObstacleConfig {
            enabled: true,
            shape: ObstacleShape::Sphere,
            centre: [0.0, 0.0, 0.0],
            radius: 2.0,
            ..ObstacleConfig::default()
        },
        spawn_density: 46.0,
        spawn_regions: vec![SpawnRegion {
            center: [0.0, 5.0, 0.0],
            size: [6.0, 4.0, 6.0],
        }],
        ..SimConfig::default()
    };
    let mut sim = build_simulation(&context, config);

    let frames = (2.0 / FRAME_DT) as u32;
    let mut frames_touching = 0u32;
    for _ in 0..frames {
        sim.step(&context, FRAME_DT, FrameInput::idle());
        let particles = solver_particles(&sim, &context);
        let touching = particles.iter().any(|p| {
            let d = Vec3::from(p.position).length();
            (d - 2.0).abs() <= 0.1
        });
        if touching {
            frames_touching += 1;
        }
    }

    assert!(frames_touching as f32 / frames as f32 >= 0.5, "fluid did not wrap the obstacle for at least half the frames");
}

/// S4 — reset determinism: step 120 frames, reset, step 120 frames again.
/// The particle position array at frame 120 must be bit-identical across
/// both runs (spawn uses the same seed both times).
#[test]
#[ignore]
fn s4_reset_is_deterministic() {
    let context = test_context();
    let config = SimConfig {
        spawn_regions: vec![SpawnRegion {
            center: [0.0, 0.0, 0.0],
            size: [4.0, 4.0, 4.0],
        }],
        spawn_seed: 42,
        ..SimConfig::default()
    };
    let mut sim = build_simulation(&context, config);

    for _ in 0..120 {
        sim.step(&context, FRAME_DT, FrameInput::idle());
    }
    let first_run = solver_particles(&sim, &context);

    sim.reset(&context);
    for _ in 0..120 {
        sim.step(&context, FRAME_DT, FrameInput::idle());
    }
    let second_run = solver_particles(&sim, &context);

    assert_eq!(first_run.len(), second_run.len());
    for (a, b) in first_run.iter().zip(second_run.iter()) {
        assert_eq!(a.position, b.position, "positions diverged after reset");
    }
}

/// S5 — renderer switch preserves state: run the particles renderer for 60
/// frames, switch to marching cubes, and confirm the SPH state at frame 60
/// is unchanged (switching only touches renderer-owned buffers).
#[test]
#[ignore]
fn s5_renderer_switch_preserves_physics_state() {
    let context = test_context();
    let config = SimConfig {
        spawn_regions: vec![SpawnRegion {
            center: [0.0, 0.0, 0.0],
            size: [4.0, 4.0, 4.0],
        }],
        ..SimConfig::default()
    };
    let mut sim = build_simulation(&context, config);
    assert_eq!(sim.active_renderer_kind(), RendererKind::Particles);

    for _ in 0..60 {
        sim.step(&context, FRAME_DT, FrameInput::idle());
    }
    let before_switch = solver_particles(&sim, &context);

    let marching_cubes = MarchingCubesSettings::default();
    let raymarch = RaymarchSettings::default();
    let screen_space = ScreenSpaceSettings::default();
    let settings = RendererSettings {
        marching_cubes: &marching_cubes,
        raymarch: &raymarch,
        screen_space: &screen_space,
    };
    sim.switch_renderer(RendererKind::MarchingCubes, &context, MAX_PARTICLES, &settings);
    assert_eq!(sim.active_renderer_kind(), RendererKind::MarchingCubes);

    let after_switch = solver_particles(&sim, &context);
    assert_eq!(before_switch.len(), after_switch.len());
    for (a, b) in before_switch.iter().zip(after_switch.iter()) {
        assert_eq!(a.position, b.position, "switching renderers mutated SPH state");
        assert_eq!(a.velocity, b.velocity, "switching renderers mutated SPH state");
    }
}

/// S6 — foam population bound: with a high spawn rate and ring capacity M,
/// the live-foam count (lifetime > 0) never exceeds M.
#[test]
#[ignore]
fn s6_foam_population_never_exceeds_ring_capacity() {
    let context = test_context();
    let mut config = SimConfig {
        gravity: 14.0,
        collision_damping: 0.5,
        spawn_density: 40.0,
        spawn_regions: vec![SpawnRegion {
            center: [0.0, 4.0, 0.0],
            size: [6.0, 6.0, 6.0],
        }],
        initial_velocity: [4.0, 0.0, 0.0],
        ..SimConfig::default()
    };
    config.foam.spawn_rate = 1000.0;
    config.foam.ring_capacity = 65_536;

    let mut sim = build_simulation(&context, config);
    let capacity = sim.config().foam.ring_capacity;

    for _ in 0..180 {
        sim.step(&context, FRAME_DT, FrameInput::idle());
        let live_count = foam_live_count(&sim, &context);
        assert!(live_count <= capacity, "live foam count {live_count} exceeded capacity {capacity}");
    }
}

/// Reads the staging buffer of a storage buffer back to the host, the same
/// `map_async` + channel + blocking-poll shape used throughout this crate
/// for debug/test readbacks.
fn read_buffer<T: bytemuck::Pod>(device: &wgpu::Device, queue: &wgpu::Queue, buffer: &wgpu::Buffer, count: usize) -> Vec<T> {
    let size = (count * std::mem::size_of::<T>()) as u64;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Scenario Test Readback Staging Buffer"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Scenario Test Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(Maintain::Wait);
    rx.recv().expect("map_async channel closed").expect("buffer map failed");

    let data = slice.get_mapped_range();
    let values: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    values
}

fn solver_particles(sim: &Simulation, context: &GpuContext) -> Vec<sph_fluid_core::physics::GpuParticle> {
    sim.solver().read_back_particles(&context.device, &context.queue)
}

fn foam_live_count(sim: &Simulation, context: &GpuContext) -> u32 {
    let capacity = sim.foam().capacity() as usize;
    let particles: Vec<GpuFoamParticle> = read_buffer(&context.device, &context.queue, sim.foam().ring_buffer(), capacity);
    particles.iter().filter(|p| p.lifetime > 0.0).count() as u32
}
