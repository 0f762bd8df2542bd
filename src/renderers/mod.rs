//! Renderer registry (spec.md §4.J, §9): a tagged variant over the four
//! interchangeable visualization strategies, not inheritance. Each variant
//! implements the same operation set; the registry copies shared config
//! across a switch and drives destroy/create/reset in order.

pub mod marching_cubes;
pub mod particles;
pub mod raymarch;
pub mod screen_space;

use crate::camera::OrbitCamera;
use crate::config::{MarchingCubesSettings, RaymarchSettings, ScreenSpaceSettings};
use crate::context::GpuContext;
use crate::density_volume::DensitySplatter;
use crate::environment::EnvironmentSettings;
use crate::foam::FoamSystem;
use crate::physics::SphSolver;
use wgpu::{CommandEncoder, Device, Queue, TextureFormat, TextureView};

/// Per-renderer construction settings, threaded through from the active
/// preset (spec.md §6's renderer-specific config subsections).
#[derive(Clone, Debug)]
pub struct RendererSettings<'a> {
    pub marching_cubes: &'a MarchingCubesSettings,
    pub raymarch: &'a RaymarchSettings,
    pub screen_space: &'a ScreenSpaceSettings,
}

/// Shared config fields a renderer switch carries across (spec.md §4.J:
/// "copies all shared configuration fields from the current adapter to the
/// next"). Only fields with matching semantics cross between renderers;
/// renderer-specific fields (iso level, step size, ...) retain their
/// defaults on the freshly constructed renderer.
#[derive(Clone, Copy, Debug)]
pub struct SharedRenderConfig {
    pub bounds_size: [f32; 3],
    pub smoothing_radius: f32,
    pub particle_radius: f32,
    pub environment: EnvironmentSettings,
}

/// Identifies which renderer variant is active, mirroring spec.md §9's
/// `Renderer ∈ {Particles, Raymarch, MarchingCubes, ScreenSpace}` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RendererKind {
    Particles,
    Raymarch,
    MarchingCubes,
    ScreenSpace,
}

impl RendererKind {
    pub const ALL: [RendererKind; 4] = [
        RendererKind::Particles,
        RendererKind::Raymarch,
        RendererKind::MarchingCubes,
        RendererKind::ScreenSpace,
    ];
}

/// Uniform operation set every renderer implements (spec.md §9).
pub trait Renderer {
    fn kind(&self) -> RendererKind;

    /// Applies config fields that cross between renderer switches.
    fn bind_shared_config(&mut self, shared: &SharedRenderConfig);

    /// Clears any renderer-owned transient state (e.g. temporal foam blend
    /// history) without reallocating GPU resources.
    fn reset(&mut self);

    /// Advances renderer-only state that isn't physics (temporal
    /// accumulation buffers, foam blend history). Most renderers are
    /// stateless here since the physics core owns simulation time. `device`
    /// lets a renderer re-bind against the solver's current particle buffer,
    /// which flips every substep (the same epoch-keyed bind step
    /// `density_volume::DensitySplatter::rebind` and `foam::FoamSystem::
    /// rebind` use, generalized here since those two live behind `dyn
    /// Renderer` from the registry's point of view). `density` gives
    /// volume-sampling renderers (raymarch) access to the resolved density
    /// texture; its view is stable across frames (only its bind group
    /// contents change), so most renderers never need to touch it.
    fn step(&mut self, device: &Device, encoder: &mut CommandEncoder, solver: &SphSolver, foam: &FoamSystem, density: &DensitySplatter);

    /// Draws into `target`, reading whatever GPU resources it was bound to.
    /// `queue` lets a renderer upload its own per-frame uniforms (view-proj,
    /// camera basis, colors) immediately before drawing.
    fn render(
        &mut self,
        encoder: &mut CommandEncoder,
        queue: &Queue,
        target: &TextureView,
        depth: &TextureView,
        camera: &OrbitCamera,
    );

    /// Reacts to a surface resize (half-res raymarch buffer, screen-space
    /// G-buffer textures, ...).
    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32);
}

/// Ordered list of renderer factories plus the currently active renderer
/// (spec.md §4.J: "Holds an ordered list of renderer factories").
pub struct RendererRegistry {
    active_kind: RendererKind,
    active: Box<dyn Renderer>,
    color_format: TextureFormat,
    depth_format: TextureFormat,
    width: u32,
    height: u32,
}

impl RendererRegistry {
    pub fn new(
        context: &GpuContext,
        color_format: TextureFormat,
        depth_format: TextureFormat,
        width: u32,
        height: u32,
        max_particles: u32,
        density_texture_res: u32,
        settings: &RendererSettings,
    ) -> Self {
        let active_kind = RendererKind::Particles;
        let active = Self::build(
            active_kind,
            context,
            color_format,
            depth_format,
            width,
            height,
            max_particles,
            density_texture_res,
            settings,
        );
        Self {
            active_kind,
            active,
            color_format,
            depth_format,
            width,
            height,
        }
    }

    fn build(
        kind: RendererKind,
        context: &GpuContext,
        color_format: TextureFormat,
        depth_format: TextureFormat,
        width: u32,
        height: u32,
        max_particles: u32,
        density_texture_res: u32,
        settings: &RendererSettings,
    ) -> Box<dyn Renderer> {
        match kind {
            RendererKind::Particles => Box::new(particles::ParticleRenderer::new(
                &context.device,
                color_format,
                depth_format,
                max_particles,
            )),
            RendererKind::ScreenSpace => Box::new(screen_space::ScreenSpaceRenderer::new(
                &context.device,
                color_format,
                depth_format,
                width,
                height,
                max_particles,
                settings.screen_space,
            )),
            RendererKind::MarchingCubes => Box::new(marching_cubes::MarchingCubesRenderer::new(
                &context.device,
                color_format,
                depth_format,
                density_texture_res,
                settings.marching_cubes,
            )),
            RendererKind::Raymarch => Box::new(raymarch::RaymarchRenderer::new(
                &context.device,
                color_format,
                width,
                height,
                settings.raymarch,
            )),
        }
    }

    pub fn active_kind(&self) -> RendererKind {
        self.active_kind
    }

    pub fn active_mut(&mut self) -> &mut dyn Renderer {
        self.active.as_mut()
    }

    /// Switches the active renderer (spec.md §4.J 5-step protocol): copy
    /// shared config, destroy the current renderer's GPU resources, create
    /// the next, re-bind (the caller re-issues input callbacks), reset.
    pub fn switch(
        &mut self,
        kind: RendererKind,
        context: &GpuContext,
        max_particles: u32,
        density_texture_res: u32,
        settings: &RendererSettings,
        shared: &SharedRenderConfig,
    ) {
        if kind == self.active_kind {
            return;
        }

        // (i) copy shared config fields before the old renderer is dropped.
        self.active.bind_shared_config(shared);

        // (ii) destroy: dropping `self.active` releases its GPU resources.
        let mut next = Self::build(
            kind,
            context,
            self.color_format,
            self.depth_format,
            self.width,
            self.height,
            max_particles,
            density_texture_res,
            settings,
        );

        // (iii)/(iv) create + re-bind shared config on the fresh renderer.
        next.bind_shared_config(shared);

        // (v) reset.
        next.reset();

        self.active = next;
        self.active_kind = kind;
    }
}
