//! GPU-resident SPH/FLIP fluid simulation (spec.md §1-2): owns the physics
//! core, the density-volume and foam post-processing stages, and a
//! switchable renderer, wired together by `Simulation`. Replaces the
//! teacher's wasm `AppState`/`with_app_state_mut` glue — this crate has no
//! DOM/JS boundary of its own, so embedding, canvas creation, and frame
//! scheduling are the embedding application's concern (spec.md §6's
//! external-interfaces boundary, spec.md's Non-goals: "GUI panels").

pub mod camera;
pub mod config;
pub mod context;
pub mod density_volume;
pub mod environment;
pub mod foam;
pub mod grid;
pub mod input;
pub mod kernels;
pub mod obstacle;
pub mod physics;
pub mod presets;
pub mod renderers;
pub mod spawn;
pub mod utils;

use glam::Vec3;
use wgpu::TextureFormat;
use wgpu::TextureView;

use camera::OrbitCamera;
use config::SimConfig;
use context::GpuContext;
use density_volume::DensitySplatter;
use environment::EnvironmentSettings;
use foam::FoamSystem;
use input::FrameInput;
use physics::{GpuParticle, SphSolver};
use renderers::{RendererKind, RendererRegistry, RendererSettings, SharedRenderConfig};

/// Top-level simulation handle. Owns the physics core and its
/// post-processing stages directly (not behind `dyn Renderer`, since
/// `Simulation` is the one place with a concrete, non-cyclic view of every
/// buffer involved — see `density_volume::DensitySplatter::rebind` and
/// `foam::FoamSystem::rebind` for why that matters).
pub struct Simulation {
    config: SimConfig,
    environment: EnvironmentSettings,

    solver: SphSolver,
    density: DensitySplatter,
    foam: FoamSystem,
    registry: RendererRegistry,

    camera: OrbitCamera,
    particle_count: u32,
    elapsed: f32,
}

impl Simulation {
    /// Builds a fresh simulation from a validated config, spawning the
    /// initial particle cloud (spec.md §4.A) and constructing every GPU
    /// resource a frame will touch.
    pub fn new(
        context: &GpuContext,
        config: SimConfig,
        environment: EnvironmentSettings,
        renderer_settings: &RendererSettings,
        color_format: TextureFormat,
        depth_format: TextureFormat,
        width: u32,
        height: u32,
        max_particles: u32,
    ) -> Result<Self, config::ConfigError> {
        config.validate()?;

        let spawned = spawn::spawn_particles(
            &config.spawn_regions,
            config.spawn_density,
            Vec3::from(config.initial_velocity),
            config.jitter_strength,
            config.spawn_seed,
        );
        let particle_count = (spawned.len() as u32).min(max_particles);

        let mut solver = SphSolver::new(&context.device, &config, max_particles);
        let gpu_particles: Vec<GpuParticle> = spawned
            .iter()
            .take(particle_count as usize)
            .map(|p| GpuParticle {
                position: p.position.to_array(),
                _pad0: 0.0,
                velocity: p.velocity.to_array(),
                _pad1: 0.0,
                predicted: p.position.to_array(),
                _pad2: 0.0,
                density: 0.0,
                near_density: 0.0,
                _pad3: [0.0, 0.0],
            })
            .collect();
        solver.upload_particles(&context.queue, &gpu_particles);
        solver.set_active_count(particle_count);

        let bounds_size = Vec3::from(config.bounds_size);
        let density = DensitySplatter::new(
            &context.device,
            solver.current_particle_buffer(),
            max_particles,
            bounds_size,
            config.density_texture_res,
            context.supports_subgroups(),
        );

        let foam = FoamSystem::new(&context.device, solver.current_particle_buffer(), &config.foam);

        let registry = RendererRegistry::new(
            context,
            color_format,
            depth_format,
            width,
            height,
            max_particles,
            config.density_texture_res,
            renderer_settings,
        );

        let aspect = width as f32 / height.max(1) as f32;
        let camera = OrbitCamera::new(aspect);

        Ok(Self {
            config,
            environment,
            solver,
            density,
            foam,
            registry,
            camera,
            particle_count,
            elapsed: 0.0,
        })
    }

    pub fn camera_mut(&mut self) -> &mut OrbitCamera {
        &mut self.camera
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    pub fn active_renderer_kind(&self) -> RendererKind {
        self.registry.active_kind()
    }

    fn shared_render_config(&self) -> SharedRenderConfig {
        SharedRenderConfig {
            bounds_size: self.config.bounds_size,
            smoothing_radius: self.config.smoothing_radius,
            particle_radius: self.config.particle_radius,
            environment: self.environment,
        }
    }

    /// Switches the active renderer (spec.md §4.J, §9's registry design
    /// note): copy shared config, destroy, create, bind, reset, in order.
    pub fn switch_renderer(
        &mut self,
        kind: RendererKind,
        context: &GpuContext,
        max_particles: u32,
        renderer_settings: &RendererSettings,
    ) {
        let shared = self.shared_render_config();
        self.registry.switch(kind, context, max_particles, self.config.density_texture_res, renderer_settings, &shared);
    }

    /// Advances physics and post-processing by one frame (spec.md §4.D
    /// time-stepping, §4.E, §4.F). Re-binds the density splatter and foam
    /// system against the solver's post-step buffer every frame, since the
    /// solver's internal ping-pong means which physical buffer is "current"
    /// changes as substeps run (spec.md §9's epoch-keyed bind step).
    pub fn step(&mut self, context: &GpuContext, raw_dt: f32, input: FrameInput) {
        self.elapsed += raw_dt;

        let mut encoder = context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Simulation Step Encoder"),
        });

        self.solver.step_frame(&mut encoder, &context.queue, &self.config, raw_dt, input.to_interaction());

        self.density.rebind(&context.device, self.solver.current_particle_buffer());
        self.foam.rebind(&context.device, self.solver.current_particle_buffer());

        let bounds_min = Vec3::from(self.config.bounds_size) * -0.5;
        self.density.encode(&mut encoder, &context.queue, bounds_min, self.config.smoothing_radius, self.particle_count);

        let dt = physics::substep_dt(raw_dt, &self.config) * self.config.iterations_per_frame as f32;
        self.foam.step(
            &mut encoder,
            &context.queue,
            &self.config.foam,
            dt,
            self.config.smoothing_radius,
            self.config.gravity,
            self.particle_count,
            bounds_min.length(),
            &self.config.obstacle,
        );

        self.registry.active_mut().step(&context.device, &mut encoder, &self.solver, &self.foam, &self.density);

        context.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Renders the current frame through whichever renderer is active
    /// (spec.md §4.J). `target`/`depth` are the caller's swap-chain views;
    /// acquiring and presenting the surface is the embedding application's
    /// job (spec.md §6 Outputs).
    pub fn render(&mut self, context: &GpuContext, target: &TextureView, depth: &TextureView) {
        let mut encoder = context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Simulation Render Encoder"),
        });

        self.registry.active_mut().render(&mut encoder, &context.queue, target, depth, &self.camera);

        context.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Resizes every GPU-resident target sized off the viewport (spec.md
    /// §4.J `resize`).
    pub fn resize(&mut self, context: &GpuContext, width: u32, height: u32) {
        self.camera.aspect = width as f32 / height.max(1) as f32;
        self.registry.active_mut().resize(&context.device, width, height);
    }

    /// Re-seeds the particle cloud from the current config without
    /// rebuilding any GPU pipeline (spec.md §4.A, §4.J `reset`).
    pub fn reset(&mut self, context: &GpuContext) {
        let spawned = spawn::spawn_particles(
            &self.config.spawn_regions,
            self.config.spawn_density,
            Vec3::from(self.config.initial_velocity),
            self.config.jitter_strength,
            self.config.spawn_seed,
        );
        self.particle_count = spawned.len() as u32;

        let gpu_particles: Vec<GpuParticle> = spawned
            .iter()
            .map(|p| GpuParticle {
                position: p.position.to_array(),
                _pad0: 0.0,
                velocity: p.velocity.to_array(),
                _pad1: 0.0,
                predicted: p.position.to_array(),
                _pad2: 0.0,
                density: 0.0,
                near_density: 0.0,
                _pad3: [0.0, 0.0],
            })
            .collect();
        self.solver.upload_particles(&context.queue, &gpu_particles);
        self.solver.set_active_count(self.particle_count);

        self.density.rebind(&context.device, self.solver.current_particle_buffer());
        self.foam.rebind(&context.device, self.solver.current_particle_buffer());

        self.registry.active_mut().reset();
        self.elapsed = 0.0;
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn particle_count(&self) -> u32 {
        self.particle_count
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Direct access to the physics core, for host-side readbacks
    /// (debug tooling and the integration scenario tests).
    pub fn solver(&self) -> &SphSolver {
        &self.solver
    }

    /// Direct access to the foam system, for host-side readbacks.
    pub fn foam(&self) -> &FoamSystem {
        &self.foam
    }
}
