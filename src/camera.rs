use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Maximum pitch angle in radians (~86 degrees) to prevent camera flipping,
/// same bound the teacher's fly camera used.
const PITCH_LIMIT: f32 = 1.5;

const MIN_DISTANCE: f32 = 0.5;

/// Orbit camera (spec.md §4.K): rotates and zooms around a fixed pivot
/// rather than flying freely, replacing the teacher's `FlyCamera`. Keeps the
/// same uniform-buffer-producing shape (`CameraUniform`,
/// `view_projection_matrix`).
pub struct OrbitCamera {
    pub pivot: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub distance: f32,

    pub aspect: f32,
    pub fov: f32,
    pub near: f32,
    pub far: f32,

    pub rotation_sensitivity: f32,
    pub zoom_sensitivity: f32,
}

impl OrbitCamera {
    pub fn new(aspect: f32) -> Self {
        Self {
            pivot: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.4,
            distance: 30.0,

            aspect,
            fov: 60.0_f32.to_radians(),
            near: 0.05,
            far: 500.0,

            rotation_sensitivity: 0.005,
            zoom_sensitivity: 1.0,
        }
    }

    /// Direction from the pivot to the camera, derived from yaw/pitch.
    fn orbit_direction(&self) -> Vec3 {
        Vec3::new(
            self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.cos() * self.pitch.cos(),
        )
    }

    pub fn position(&self) -> Vec3 {
        self.pivot + self.orbit_direction() * self.distance
    }

    /// Applies a pointer-drag rotation and a scroll-wheel zoom. The
    /// embedding application supplies pre-extracted deltas rather than raw
    /// DOM events (spec.md §4.K: camera glue is thinned to plain math, with
    /// event plumbing left to the embedding application).
    pub fn orbit(&mut self, delta_x: f32, delta_y: f32) {
        self.yaw -= delta_x * self.rotation_sensitivity;
        self.pitch = (self.pitch + delta_y * self.rotation_sensitivity).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    pub fn zoom(&mut self, scroll_delta: f32) {
        self.distance = (self.distance - scroll_delta * self.zoom_sensitivity).max(MIN_DISTANCE);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.pivot, Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn uniform_data(&self) -> CameraUniform {
        CameraUniform {
            view_proj: self.view_projection_matrix().to_cols_array_2d(),
            camera_pos: self.position().to_array(),
            _padding: 0.0,
        }
    }

    /// Unprojects a normalized device coordinate (`ndc_x`, `ndc_y` each in
    /// `[-1, 1]`) into a world-space ray for pointer-ray picking (spec.md
    /// §4.K: "pointer-ray picking"). Returns `(origin, direction)`.
    pub fn unproject_ray(&self, ndc_x: f32, ndc_y: f32) -> (Vec3, Vec3) {
        let inverse_vp = self.view_projection_matrix().inverse();

        let near_point = inverse_vp * Vec4::new(ndc_x, ndc_y, 0.0, 1.0);
        let far_point = inverse_vp * Vec4::new(ndc_x, ndc_y, 1.0, 1.0);

        let near_world = near_point.truncate() / near_point.w;
        let far_world = far_point.truncate() / far_point.w;

        let origin = self.position();
        let direction = (far_world - near_world).normalize_or_zero();
        (origin, direction)
    }

    /// Intersects a pointer ray with the horizontal plane `y = plane_y`,
    /// used to derive a world-space interaction point from a 2D cursor
    /// position (spec.md §6: "pointer input providing world-space position
    /// via unproject of cursor").
    pub fn ray_plane_intersection(&self, ndc_x: f32, ndc_y: f32, plane_y: f32) -> Option<Vec3> {
        let (origin, direction) = self.unproject_ray(ndc_x, ndc_y);
        if direction.y.abs() < 1e-6 {
            return None;
        }
        let t = (plane_y - origin.y) / direction.y;
        if t < 0.0 {
            return None;
        }
        Some(origin + direction * t)
    }

    /// Extract frustum planes from the view-projection matrix (kept from
    /// the teacher's `FlyCamera`, useful for renderer-side culling). Returns
    /// `[left, right, bottom, top, near, far]`; each plane is `(nx, ny, nz,
    /// d)` where `nx*x + ny*y + nz*z + d >= 0` means inside.
    pub fn extract_frustum_planes(&self) -> [Vec4; 6] {
        let vp = self.view_projection_matrix();
        let cols = vp.to_cols_array_2d();

        let row0 = Vec4::new(cols[0][0], cols[1][0], cols[2][0], cols[3][0]);
        let row1 = Vec4::new(cols[0][1], cols[1][1], cols[2][1], cols[3][1]);
        let row2 = Vec4::new(cols[0][2], cols[1][2], cols[2][2], cols[3][2]);
        let row3 = Vec4::new(cols[0][3], cols[1][3], cols[2][3], cols[3][3]);

        let mut planes = [
            row3 + row0,
            row3 - row0,
            row3 + row1,
            row3 - row1,
            row3 + row2,
            row3 - row2,
        ];

        for plane in &mut planes {
            let len = (plane.x * plane.x + plane.y * plane.y + plane.z * plane.z).sqrt();
            if len > 0.0 {
                *plane /= len;
            }
        }

        planes
    }
}

/// Camera uniform data for GPU, unchanged shape from the teacher.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 3],
    pub _padding: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_never_goes_below_minimum_distance() {
        let mut camera = OrbitCamera::new(16.0 / 9.0);
        for _ in 0..100 {
            camera.zoom(100.0);
        }
        assert!(camera.distance >= MIN_DISTANCE);
    }

    #[test]
    fn orbit_clamps_pitch_within_limit() {
        let mut camera = OrbitCamera::new(16.0 / 9.0);
        for _ in 0..1000 {
            camera.orbit(0.0, 10.0);
        }
        assert!(camera.pitch <= PITCH_LIMIT + 1e-5);
    }

    #[test]
    fn unproject_ray_through_screen_centre_points_at_pivot() {
        let camera = OrbitCamera::new(1.0);
        let (origin, direction) = camera.unproject_ray(0.0, 0.0);
        let to_pivot = (camera.pivot - origin).normalize_or_zero();
        assert!(direction.dot(to_pivot) > 0.99);
    }

    #[test]
    fn ray_plane_intersection_lies_on_the_plane() {
        let camera = OrbitCamera::new(1.0);
        let hit = camera.ray_plane_intersection(0.0, 0.0, 0.0).expect("should hit plane");
        assert!((hit.y - 0.0).abs() < 1e-3);
    }
}
