//! Bundled simulation + render presets (spec.md §6), replacing the teacher's
//! terrain/sky/particle `FullPreset` with a fluid-sim equivalent: physics
//! config plus the renderer-facing settings subsections, selectable by id.

use serde::{Deserialize, Serialize};

use crate::config::{MarchingCubesSettings, RaymarchSettings, ScreenSpaceSettings, SimConfig, SpawnRegion};
use crate::environment::EnvironmentSettings;

pub const DEFAULT_PRESET_ID: &str = "calm";

/// A complete preset bundling physics config and every renderer's settings
/// subsection, mirroring the teacher's `FullPreset` (terrain + sky +
/// particles) shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FullPreset {
    pub name: String,
    pub sim: SimConfig,
    pub environment: EnvironmentSettings,
    pub marching_cubes: MarchingCubesSettings,
    pub raymarch: RaymarchSettings,
    pub screen_space: ScreenSpaceSettings,
}

/// Metadata about a preset (for listing without the full value bag).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PresetInfo {
    pub id: String,
    pub name: String,
}

/// Get list of available preset IDs and names.
pub fn get_preset_list() -> Vec<PresetInfo> {
    vec![
        PresetInfo {
            id: "calm".to_string(),
            name: "Calm Pool".to_string(),
        },
        PresetInfo {
            id: "dam_break".to_string(),
            name: "Dam Break".to_string(),
        },
        PresetInfo {
            id: "whitewater".to_string(),
            name: "Whitewater".to_string(),
        },
    ]
}

/// Get a full preset by id.
pub fn get_preset(id: &str) -> Option<FullPreset> {
    match id {
        "calm" => Some(calm_preset()),
        "dam_break" => Some(dam_break_preset()),
        "whitewater" => Some(whitewater_preset()),
        _ => None,
    }
}

pub fn get_default_preset_id() -> &'static str {
    DEFAULT_PRESET_ID
}

pub fn get_default_preset() -> Option<FullPreset> {
    get_preset(DEFAULT_PRESET_ID)
}

/// Still water settling under gravity: low viscosity, a single centred spawn
/// region, little foam spawning pressure.
fn calm_preset() -> FullPreset {
    let mut sim = SimConfig {
        viscosity_strength: 0.08,
        spawn_density: 0.7,
        spawn_regions: vec![SpawnRegion {
            center: [0.0, 2.0, 0.0],
            size: [6.0, 4.0, 6.0],
        }],
        ..SimConfig::default()
    };
    sim.foam.spawn_rate = 150.0;

    FullPreset {
        name: "Calm Pool".to_string(),
        sim,
        environment: EnvironmentSettings::default(),
        marching_cubes: MarchingCubesSettings::default(),
        raymarch: RaymarchSettings::default(),
        screen_space: ScreenSpaceSettings::default(),
    }
}

/// A dense column of fluid released toward one side of the bounds, meant to
/// exercise splashing and a sudden density wave.
fn dam_break_preset() -> FullPreset {
    let mut sim = SimConfig {
        gravity: 12.0,
        viscosity_strength: 0.03,
        collision_damping: 0.3,
        spawn_density: 1.0,
        spawn_regions: vec![SpawnRegion {
            center: [-4.0, 4.0, 0.0],
            size: [3.0, 6.0, 6.0],
        }],
        initial_velocity: [2.0, 0.0, 0.0],
        ..SimConfig::default()
    };
    sim.foam.spawn_rate = 4000.0;
    sim.foam.max_spawn_per_particle = 6;

    FullPreset {
        name: "Dam Break".to_string(),
        sim,
        environment: EnvironmentSettings::default(),
        marching_cubes: MarchingCubesSettings::default(),
        raymarch: RaymarchSettings::default(),
        screen_space: ScreenSpaceSettings {
            foam_threshold: 0.25,
            ..ScreenSpaceSettings::default()
        },
    }
}

/// High-energy turbulent flow around an obstacle, tuned to push the foam
/// lifecycle (trapped air, wave crests, spray) hard.
fn whitewater_preset() -> FullPreset {
    use crate::config::{ObstacleConfig, ObstacleShape};

    let mut sim = SimConfig {
        gravity: 14.0,
        viscosity_strength: 0.01,
        collision_damping: 0.5,
        obstacle: ObstacleConfig {
            enabled: true,
            shape: ObstacleShape::Sphere,
            centre: [0.0, 1.0, 0.0],
            radius: 1.5,
            ..ObstacleConfig::default()
        },
        spawn_density: 1.2,
        spawn_regions: vec![SpawnRegion {
            center: [-5.0, 5.0, 0.0],
            size: [2.0, 8.0, 8.0],
        }],
        initial_velocity: [6.0, 0.0, 0.0],
        ..SimConfig::default()
    };
    sim.foam.spawn_rate = 12_000.0;
    sim.foam.max_spawn_per_particle = 10;
    sim.foam.ring_capacity = 131_072;

    FullPreset {
        name: "Whitewater".to_string(),
        sim,
        environment: EnvironmentSettings::default(),
        marching_cubes: MarchingCubesSettings::default(),
        raymarch: RaymarchSettings {
            max_steps: 192,
            ..RaymarchSettings::default()
        },
        screen_space: ScreenSpaceSettings {
            foam_threshold: 0.15,
            foam_blend: 0.9,
            ..ScreenSpaceSettings::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_preset_resolves() {
        for info in get_preset_list() {
            assert!(get_preset(&info.id).is_some(), "missing preset body for {}", info.id);
        }
    }

    #[test]
    fn default_preset_id_is_listed() {
        let ids: Vec<_> = get_preset_list().into_iter().map(|p| p.id).collect();
        assert!(ids.contains(&get_default_preset_id().to_string()));
    }

    #[test]
    fn every_preset_validates() {
        for info in get_preset_list() {
            let preset = get_preset(&info.id).unwrap();
            assert!(preset.sim.validate().is_ok(), "{} failed validation", info.id);
        }
    }

    #[test]
    fn unknown_preset_id_returns_none() {
        assert!(get_preset("not_a_real_preset").is_none());
    }
}
