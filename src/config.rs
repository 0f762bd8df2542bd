//! Config value bag (spec.md §6) plus the intake validation spec.md §7
//! requires before any of these values reach a compute dispatch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An axis-aligned spawn region: particles are lattice-packed into it at
/// `SimConfig::spawn_density` particles per unit volume (spec.md §4.A).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnRegion {
    pub center: [f32; 3],
    pub size: [f32; 3],
}

impl SpawnRegion {
    pub fn volume(&self) -> f32 {
        self.size[0] * self.size[1] * self.size[2]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObstacleShape {
    Box,
    Sphere,
}

/// Obstacle placed in the simulation bounds (spec.md §4.D, §9).
/// `rotation` is carried as metadata only — collision resolution in this
/// crate is AABB/sphere-only, per spec.md §9's explicit limitation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleConfig {
    pub enabled: bool,
    pub shape: ObstacleShape,
    pub centre: [f32; 3],
    pub half_size: [f32; 3],
    pub radius: f32,
    pub rotation: [f32; 4],
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            shape: ObstacleShape::Sphere,
            centre: [0.0, 0.0, 0.0],
            half_size: [1.0, 1.0, 1.0],
            radius: 1.0,
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Foam lifecycle tuning (spec.md §4.F, §6): spawn-potential weights,
/// per-state integration rates, and lifetime decay/preservation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FoamConfig {
    pub ring_capacity: u32,
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

    /// Multiplies the spawn potential for fluid particles close to the
    /// obstacle surface (spec.md §4.F step 1's `obstacleFactor` term):
    /// splash impact against an obstacle generates extra foam. 1.0 far from
    /// the obstacle, rising to `1.0 + obstacle_impact_boost` at the surface.
    pub obstacle_impact_boost: f32,
}

impl Default for FoamConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 65_536,
            spawn_rate: 1000.0,
            max_spawn_per_particle: 4,
            energy_min: 2.0,
            energy_max: 16.0,

            lifetime_min: 1.0,
            lifetime_max: 3.0,
            bubble_scale_min: 0.3,

            classify_sparse_neighbours: 6,
            classify_dense_neighbours: 20,
            classify_band_half_width: 0.2,
            classify_hysteresis_frames: 3,

            foam_advection_rate: 4.0,
            bubble_buoyancy: 0.6,
            spray_drag: 0.2,
            restitution: 0.3,

            foam_decay_rate: 1.0,
            bubble_decay_rate: 0.4,
            spray_decay_rate: 1.5,
            density_preserve_min: 8.0,
            density_preserve_max: 20.0,
            density_preserve_rate: 0.5,

            obstacle_impact_boost: 2.0,
        }
    }
}

/// Marching-cubes renderer settings (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarchingCubesSettings {
    pub iso_level: f32,
    pub surface_color: [f32; 3],
}

impl Default for MarchingCubesSettings {
    fn default() -> Self {
        Self {
            iso_level: 0.5,
            surface_color: [0.1, 0.4, 0.9],
        }
    }
}

/// Raymarch renderer settings (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaymarchSettings {
    pub render_scale: f32,
    pub step_size: f32,
    pub max_steps: u32,
    pub extinction: [f32; 3],
    pub index_of_refraction: f32,
    pub num_refractions: u32,
}

impl Default for RaymarchSettings {
    fn default() -> Self {
        Self {
            render_scale: 0.5,
            step_size: 0.1,
            max_steps: 128,
            extinction: [0.45, 0.15, 0.1],
            index_of_refraction: 1.33,
            num_refractions: 2,
        }
    }
}

/// Screen-space surface renderer settings (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenSpaceSettings {
    pub extinction: [f32; 3],
    pub refraction_strength: f32,
    pub smoothing_iterations: u32,
    pub foam_threshold: f32,
    pub foam_blend: f32,
}

impl Default for ScreenSpaceSettings {
    fn default() -> Self {
        Self {
            extinction: [0.45, 0.15, 0.1],
            refraction_strength: 0.6,
            smoothing_iterations: 4,
            foam_threshold: 0.4,
            foam_blend: 0.7,
        }
    }
}

/// The core physics config value bag (spec.md §6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub gravity: f32,
    pub smoothing_radius: f32,
    pub target_density: f32,
    pub pressure_multiplier: f32,
    pub near_pressure_multiplier: f32,
    pub viscosity_strength: f32,

    pub time_scale: f32,
    pub max_timestep_fps: f32,
    pub iterations_per_frame: u32,

    pub bounds_size: [f32; 3],
    pub bounds_padding: f32,
    pub collision_damping: f32,

    pub obstacle: ObstacleConfig,

    pub spawn_density: f32,
    pub spawn_regions: Vec<SpawnRegion>,
    pub initial_velocity: [f32; 3],
    pub jitter_strength: f32,
    pub spawn_seed: u32,

    pub particle_radius: f32,
    pub interaction_radius: f32,
    pub interaction_strength: f32,

    pub density_texture_res: u32,

    pub foam: FoamConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            gravity: 10.0,
            smoothing_radius: 0.5,
            target_density: 630.0,
            pressure_multiplier: 288.0,
            near_pressure_multiplier: 2.25,
            viscosity_strength: 0.1,

            time_scale: 1.0,
            max_timestep_fps: 60.0,
            iterations_per_frame: 3,

            bounds_size: [20.0, 20.0, 20.0],
            bounds_padding: 0.0,
            collision_damping: 0.95,

            obstacle: ObstacleConfig::default(),

            spawn_density: 40.0,
            spawn_regions: Vec::new(),
            initial_velocity: [0.0, 0.0, 0.0],
            jitter_strength: 0.01,
            spawn_seed: 0,

            particle_radius: 0.1,
            interaction_radius: 3.0,
            interaction_strength: 60.0,

            density_texture_res: 64,

            foam: FoamConfig::default(),
        }
    }
}

/// Configuration errors (spec.md §7): rejected at intake, never reach the
/// device. Grounded in `splashsurf_lib`'s `thiserror`-based error enums.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("smoothingRadius must be positive, got {0}")]
    NonPositiveSmoothingRadius(f32),
    #[error("particleRadius must be positive, got {0}")]
    NonPositiveParticleRadius(f32),
    #[error("targetDensity must be positive, got {0}")]
    NonPositiveTargetDensity(f32),
    #[error("spawnDensity must be non-negative, got {0}")]
    NegativeSpawnDensity(f32),
    #[error("spawnRegions must not be empty")]
    EmptySpawnRegions,
    #[error("spawn region {index} has non-positive size component {size:?}")]
    EmptySpawnRegionVolume { index: usize, size: [f32; 3] },
    #[error("boundsSize component must be positive, got {0:?}")]
    NonPositiveBounds([f32; 3]),
    #[error("collisionDamping must be in [0,1], got {0}")]
    CollisionDampingOutOfRange(f32),
    #[error("iterationsPerFrame must be at least 1, got {0}")]
    ZeroIterations(u32),
    #[error("densityTextureRes must be at least 2, got {0}")]
    DensityTextureResTooSmall(u32),
    #[error("foam.ringCapacity must be at least 1, got {0}")]
    ZeroFoamCapacity(u32),
}

impl SimConfig {
    /// Validate the config, following spec.md §7's configuration-error
    /// policy: reject with a clear message before anything reaches compute.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smoothing_radius <= 0.0 {
            return Err(ConfigError::NonPositiveSmoothingRadius(self.smoothing_radius));
        }
        if self.particle_radius <= 0.0 {
            return Err(ConfigError::NonPositiveParticleRadius(self.particle_radius));
        }
        if self.target_density <= 0.0 {
            return Err(ConfigError::NonPositiveTargetDensity(self.target_density));
        }
        if self.spawn_density < 0.0 {
            return Err(ConfigError::NegativeSpawnDensity(self.spawn_density));
        }
        if self.spawn_regions.is_empty() {
            return Err(ConfigError::EmptySpawnRegions);
        }
        for (index, region) in self.spawn_regions.iter().enumerate() {
            if region.size.iter().any(|&s| s <= 0.0) {
                return Err(ConfigError::EmptySpawnRegionVolume {
                    index,
                    size: region.size,
                });
            }
        }
        if self.bounds_size.iter().any(|&s| s <= 0.0) {
            return Err(ConfigError::NonPositiveBounds(self.bounds_size));
        }
        if !(0.0..=1.0).contains(&self.collision_damping) {
            return Err(ConfigError::CollisionDampingOutOfRange(self.collision_damping));
        }
        if self.iterations_per_frame == 0 {
            return Err(ConfigError::ZeroIterations(self.iterations_per_frame));
        }
        if self.density_texture_res < 2 {
            return Err(ConfigError::DensityTextureResTooSmall(self.density_texture_res));
        }
        if self.foam.ring_capacity == 0 {
            return Err(ConfigError::ZeroFoamCapacity(self.foam.ring_capacity));
        }
        Ok(())
    }

    /// Load and validate a config from a JSON document (serde_json,
    /// matching the teacher's settings round-trip pattern).
    pub fn from_json(text: &str) -> Result<Self, ConfigIntakeError> {
        let config: SimConfig =
            serde_json::from_str(text).map_err(ConfigIntakeError::Parse)?;
        config.validate().map_err(ConfigIntakeError::Invalid)?;
        Ok(config)
    }

    /// Applies the parameter-scaling contract of spec.md §4.D: when
    /// `particle_radius` changes at runtime, rescale the derived SPH
    /// parameters so behaviour stays roughly similar.
    /// `h ∝ r`, `ρ₀ ∝ r²`, `k, k_near ∝ 1/r²`, `μ ∝ 1/r`.
    pub fn rescale_for_particle_radius(&mut self, new_radius: f32) {
        debug_assert!(new_radius > 0.0);
        let ratio = new_radius / self.particle_radius;
        self.smoothing_radius *= ratio;
        self.target_density *= ratio * ratio;
        self.pressure_multiplier /= ratio * ratio;
        self.near_pressure_multiplier /= ratio * ratio;
        self.viscosity_strength /= ratio;
        self.particle_radius = new_radius;
    }
}

#[derive(Debug, Error)]
pub enum ConfigIntakeError {
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SimConfig {
        let mut c = SimConfig::default();
        c.spawn_regions.push(SpawnRegion {
            center: [0.0, 0.0, 0.0],
            size: [2.0, 2.0, 2.0],
        });
        c
    }

    #[test]
    fn default_config_with_a_region_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_smoothing_radius() {
        let mut c = valid_config();
        c.smoothing_radius = 0.0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::NonPositiveSmoothingRadius(_))
        ));
    }

    #[test]
    fn rejects_empty_spawn_regions() {
        let mut c = valid_config();
        c.spawn_regions.clear();
        assert!(matches!(c.validate(), Err(ConfigError::EmptySpawnRegions)));
    }

    #[test]
    fn rejects_degenerate_spawn_region() {
        let mut c = valid_config();
        c.spawn_regions.push(SpawnRegion {
            center: [0.0; 3],
            size: [1.0, 0.0, 1.0],
        });
        assert!(matches!(
            c.validate(),
            Err(ConfigError::EmptySpawnRegionVolume { .. })
        ));
    }

    #[test]
    fn rejects_damping_out_of_range() {
        let mut c = valid_config();
        c.collision_damping = 1.5;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::CollisionDampingOutOfRange(_))
        ));
    }

    #[test]
    fn parameter_scaling_contract_holds() {
        let mut c = valid_config();
        let h0 = c.smoothing_radius;
        let rho0 = c.target_density;
        let k0 = c.pressure_multiplier;
        let mu0 = c.viscosity_strength;
        let r0 = c.particle_radius;

        c.rescale_for_particle_radius(r0 * 2.0);

        assert!((c.smoothing_radius - h0 * 2.0).abs() < 1e-4);
        assert!((c.target_density - rho0 * 4.0).abs() < 1e-2);
        assert!((c.pressure_multiplier - k0 / 4.0).abs() < 1e-2);
        assert!((c.viscosity_strength - mu0 / 2.0).abs() < 1e-5);
    }

    #[test]
    fn json_intake_rejects_missing_spawn_regions() {
        let json = r#"{"smoothing_radius": 0.5}"#;
        assert!(matches!(
            SimConfig::from_json(json),
            Err(ConfigIntakeError::Invalid(ConfigError::EmptySpawnRegions))
        ));
    }

    #[test]
    fn json_intake_parses_valid_document() {
        let json = serde_json::to_string(&valid_config()).unwrap();
        assert!(SimConfig::from_json(&json).is_ok());
    }
}
