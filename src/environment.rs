//! Shared environment sampler (spec.md §4.G step 6, §6 config): sky,
//! checker floor, and obstacle sampling used identically by the
//! screen-space composite pass and the raymarch renderer. The settings live
//! here once; the sampling math itself is duplicated into each consuming
//! WGSL shader (no cross-file WGSL sharing), the same way `kernels.rs`'s
//! formulas are duplicated into the SPH shaders.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Environment config subsection (spec.md §6: "environment (tile colors,
/// dir-to-sun, sky colors, exposure, brightness, saturation)").
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    pub sky_color_top: [f32; 3],
    pub sky_color_horizon: [f32; 3],
    pub dir_to_sun: [f32; 3],
    pub sun_color: [f32; 3],

    pub floor_tile_color_a: [f32; 3],
    pub floor_tile_color_b: [f32; 3],
    pub floor_tile_size: f32,
    pub floor_height: f32,

    pub exposure: f32,
    pub brightness: f32,
    pub saturation: f32,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            sky_color_top: [0.25, 0.45, 0.85],
            sky_color_horizon: [0.75, 0.82, 0.9],
            dir_to_sun: [0.3, 0.8, 0.2],
            sun_color: [1.0, 0.95, 0.85],

            floor_tile_color_a: [0.85, 0.85, 0.85],
            floor_tile_color_b: [0.55, 0.55, 0.55],
            floor_tile_size: 1.0,
            floor_height: -0.01,

            exposure: 1.0,
            brightness: 0.0,
            saturation: 1.0,
        }
    }
}

/// Sky gradient sample for a world-space ray direction: lerps between the
/// horizon and top colors by the direction's upward component, then adds a
/// small specular-like sun glow. Pure CPU mirror of the WGSL `sample_sky`
/// function the renderers carry.
pub fn sample_sky(dir: Vec3, settings: &EnvironmentSettings) -> Vec3 {
    let up = dir.y.clamp(-1.0, 1.0) * 0.5 + 0.5;
    let base = Vec3::from(settings.sky_color_horizon).lerp(Vec3::from(settings.sky_color_top), up);

    let sun_dir = Vec3::from(settings.dir_to_sun).normalize_or_zero();
    let alignment = dir.normalize_or_zero().dot(sun_dir).max(0.0);
    let glow = alignment.powf(64.0);
    base + Vec3::from(settings.sun_color) * glow
}

/// Checker floor color at a world-space XZ position, tiled by
/// `floor_tile_size`. Pure CPU mirror of the WGSL `sample_floor` function.
pub fn sample_floor(world_xz: (f32, f32), settings: &EnvironmentSettings) -> Vec3 {
    let tile = settings.floor_tile_size.max(1e-6);
    let x = (world_xz.0 / tile).floor() as i64;
    let z = (world_xz.1 / tile).floor() as i64;
    if (x + z).rem_euclid(2) == 0 {
        Vec3::from(settings.floor_tile_color_a)
    } else {
        Vec3::from(settings.floor_tile_color_b)
    }
}

/// Applies exposure, brightness, and saturation in that order, matching the
/// WGSL composite pass's final tonemap step.
pub fn apply_grading(color: Vec3, settings: &EnvironmentSettings) -> Vec3 {
    let exposed = color * settings.exposure + Vec3::splat(settings.brightness);
    let luma = exposed.dot(Vec3::new(0.2126, 0.7152, 0.0722));
    Vec3::splat(luma).lerp(exposed, settings.saturation).max(Vec3::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sky_sample_at_zenith_is_top_color() {
        let settings = EnvironmentSettings::default();
        let color = sample_sky(Vec3::Y, &settings);
        // Zenith contributes the top color plus whatever sun glow aligns
        // with straight-up; with the default sun direction the glow is
        // small, so the result should be close to the top color.
        let top = Vec3::from(settings.sky_color_top);
        assert!((color - top).length() < 0.5);
    }

    #[test]
    fn floor_checker_alternates_between_adjacent_tiles() {
        let settings = EnvironmentSettings::default();
        let a = sample_floor((0.5, 0.5), &settings);
        let b = sample_floor((1.5, 0.5), &settings);
        assert_ne!(a, b);
    }

    #[test]
    fn floor_checker_is_periodic_every_two_tiles() {
        let settings = EnvironmentSettings::default();
        let a = sample_floor((0.5, 0.5), &settings);
        let b = sample_floor((2.5, 0.5), &settings);
        assert_eq!(a, b);
    }

    #[test]
    fn grading_zero_saturation_desaturates_to_luma() {
        let mut settings = EnvironmentSettings::default();
        settings.saturation = 0.0;
        let graded = apply_grading(Vec3::new(1.0, 0.0, 0.0), &settings);
        assert!((graded.x - graded.y).abs() < 1e-5);
        assert!((graded.y - graded.z).abs() < 1e-5);
    }

    #[test]
    fn grading_never_returns_negative_channels() {
        let mut settings = EnvironmentSettings::default();
        settings.brightness = -10.0;
        let graded = apply_grading(Vec3::new(0.1, 0.1, 0.1), &settings);
        assert!(graded.x >= 0.0 && graded.y >= 0.0 && graded.z >= 0.0);
    }
}
