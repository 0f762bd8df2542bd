//! Obstacle collision math shared between the SPH physics integrator
//! (spec.md §4.D step 6) and the environment sampler used by the
//! screen-space and raymarch composite passes.
//!
//! spec.md §9: the 3D code carries an `obstacleRotation` field but several
//! collision paths treat obstacles as AABB; this crate follows that
//! limitation deliberately — `rotation` is retained on `ObstacleConfig` as
//! metadata only, and collision resolution here is AABB/sphere exclusively.

use crate::config::{ObstacleConfig, ObstacleShape};
use glam::Vec3;

/// Result of resolving a single axis (or the sphere normal) penetration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Penetration {
    pub axis: Vec3,
    pub depth: f32,
}

/// Resolves the shallowest-penetration collision between a point particle
/// and the obstacle, mirroring spec.md §4.D step 6 ("If an obstacle... is
/// active, resolve the shallowest axis penetration analogously").
pub fn resolve_obstacle_penetration(obstacle: &ObstacleConfig, position: Vec3) -> Option<Penetration> {
    if !obstacle.enabled {
        return None;
    }
    match obstacle.shape {
        ObstacleShape::Box => resolve_box_penetration(obstacle, position),
        ObstacleShape::Sphere => resolve_sphere_penetration(obstacle, position),
    }
}

fn resolve_box_penetration(obstacle: &ObstacleConfig, position: Vec3) -> Option<Penetration> {
    let centre = Vec3::from(obstacle.centre);
    let half = Vec3::from(obstacle.half_size);
    let local = position - centre;

    if local.x.abs() >= half.x || local.y.abs() >= half.y || local.z.abs() >= half.z {
        return None;
    }

    // Shallowest-penetration axis: the axis whose distance-to-face is
    // smallest is the cheapest way out.
    let dist_to_face = Vec3::new(half.x - local.x.abs(), half.y - local.y.abs(), half.z - local.z.abs());

    let sign = |v: f32| if v >= 0.0 { 1.0 } else { -1.0 };
    let (axis, depth) = if dist_to_face.x <= dist_to_face.y && dist_to_face.x <= dist_to_face.z {
        (Vec3::X * sign(local.x), dist_to_face.x)
    } else if dist_to_face.y <= dist_to_face.z {
        (Vec3::Y * sign(local.y), dist_to_face.y)
    } else {
        (Vec3::Z * sign(local.z), dist_to_face.z)
    };

    Some(Penetration { axis, depth })
}

fn resolve_sphere_penetration(obstacle: &ObstacleConfig, position: Vec3) -> Option<Penetration> {
    let centre = Vec3::from(obstacle.centre);
    let offset = position - centre;
    let dist = offset.length();
    if dist >= obstacle.radius || dist <= f32::EPSILON {
        return None;
    }
    let axis = offset / dist;
    let depth = obstacle.radius - dist;
    Some(Penetration { axis, depth })
}

/// Pushes `position` out of the obstacle along the shallowest penetration
/// axis and reflects the normal velocity component, analogous to the
/// bounds-collision handling in spec.md §4.D step 6.
pub fn apply_obstacle_collision(
    obstacle: &ObstacleConfig,
    position: &mut Vec3,
    velocity: &mut Vec3,
    damping: f32,
) {
    if let Some(pen) = resolve_obstacle_penetration(obstacle, *position) {
        *position += pen.axis * pen.depth;
        let v_along_normal = velocity.dot(pen.axis);
        if v_along_normal < 0.0 {
            *velocity -= pen.axis * v_along_normal * (1.0 + damping);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere() -> ObstacleConfig {
        ObstacleConfig {
            enabled: true,
            shape: ObstacleShape::Sphere,
            centre: [0.0, 0.0, 0.0],
            half_size: [1.0, 1.0, 1.0],
            radius: 2.0,
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }

    fn box_obstacle() -> ObstacleConfig {
        ObstacleConfig {
            enabled: true,
            shape: ObstacleShape::Box,
            centre: [0.0, 0.0, 0.0],
            half_size: [1.0, 2.0, 3.0],
            radius: 1.0,
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn sphere_detects_penetration_inside_radius() {
        let obstacle = sphere();
        let pen = resolve_obstacle_penetration(&obstacle, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        assert!((pen.depth - 1.0).abs() < 1e-5);
        assert_eq!(pen.axis, Vec3::X);
    }

    #[test]
    fn sphere_ignores_points_outside_radius() {
        let obstacle = sphere();
        assert!(resolve_obstacle_penetration(&obstacle, Vec3::new(5.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn box_resolves_shallowest_axis() {
        let obstacle = box_obstacle();
        // Closer to +x face than y/z faces.
        let pen = resolve_obstacle_penetration(&obstacle, Vec3::new(0.9, 0.0, 0.0)).unwrap();
        assert_eq!(pen.axis, Vec3::X);
        assert!((pen.depth - 0.1).abs() < 1e-5);
    }

    #[test]
    fn box_ignores_points_outside_bounds() {
        let obstacle = box_obstacle();
        assert!(resolve_obstacle_penetration(&obstacle, Vec3::new(5.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn disabled_obstacle_never_collides() {
        let mut obstacle = sphere();
        obstacle.enabled = false;
        assert!(resolve_obstacle_penetration(&obstacle, Vec3::new(0.5, 0.0, 0.0)).is_none());
    }

    #[test]
    fn collision_pushes_particle_outside_and_reflects_velocity() {
        let obstacle = sphere();
        let mut pos = Vec3::new(1.0, 0.0, 0.0);
        let mut vel = Vec3::new(-1.0, 0.0, 0.0);
        apply_obstacle_collision(&obstacle, &mut pos, &mut vel, 0.5);
        assert!((pos - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-4);
        assert!(vel.x > 0.0, "velocity should have reflected outward");
    }
}
