//! SPH weighting kernels (spec.md §4.B). Pure, stateless functions shared in
//! spirit with the GPU-side WGSL copies in `shaders/kernels.wgsl` — both
//! sides implement the same six formulas so density/pressure/viscosity
//! behave identically whether checked on the CPU (tests) or the GPU
//! (compute dispatch).

use std::f32::consts::PI;

/// Precomputed scale factors for a given smoothing radius `h`, recomputed
/// whenever `h` changes (spec.md §4.B).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelScales {
    pub poly6: f32,
    pub spiky_pow2: f32,
    pub spiky_pow3: f32,
    pub spiky_pow2_derivative: f32,
    pub spiky_pow3_derivative: f32,
}

impl KernelScales {
    pub fn for_radius(h: f32) -> Self {
        debug_assert!(h > 0.0, "smoothing radius must be positive");
        Self {
            poly6: 4.0 / (PI * h.powi(8)),
            spiky_pow2: 10.0 / (PI * h.powi(5)),
            spiky_pow3: 6.0 / (PI * h.powi(4)),
            spiky_pow2_derivative: 30.0 / (PI * h.powi(5)),
            spiky_pow3_derivative: 12.0 / (PI * h.powi(4)),
        }
    }
}

/// `s * (h² − r²)³` for `r < h`, else `0`.
pub fn poly6(r: f32, h: f32, s: f32) -> f32 {
    if r < h {
        let diff = h * h - r * r;
        s * diff * diff * diff
    } else {
        0.0
    }
}

/// `s * (h − r)²` for `r < h`, else `0`.
pub fn spiky_pow2(r: f32, h: f32, s: f32) -> f32 {
    if r < h {
        let d = h - r;
        s * d * d
    } else {
        0.0
    }
}

/// `s * (h − r)³` for `r < h`, else `0`.
pub fn spiky_pow3(r: f32, h: f32, s: f32) -> f32 {
    if r < h {
        let d = h - r;
        s * d * d * d
    } else {
        0.0
    }
}

/// `-s * (h − r)` for `r < h`, else `0`.
pub fn spiky_pow2_derivative(r: f32, h: f32, s: f32) -> f32 {
    if r < h {
        -s * (h - r)
    } else {
        0.0
    }
}

/// `-s * (h − r)²` for `r < h`, else `0`.
pub fn spiky_pow3_derivative(r: f32, h: f32, s: f32) -> f32 {
    if r < h {
        let d = h - r;
        -s * d * d
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const H: f32 = 1.0;

    #[test]
    fn kernels_vanish_at_and_beyond_support_radius() {
        let scales = KernelScales::for_radius(H);
        assert_eq!(poly6(H, H, scales.poly6), 0.0);
        assert_eq!(poly6(H * 2.0, H, scales.poly6), 0.0);
        assert_eq!(spiky_pow2(H, H, scales.spiky_pow2), 0.0);
        assert_eq!(spiky_pow3(H, H, scales.spiky_pow3), 0.0);
        assert_eq!(spiky_pow2_derivative(H, H, scales.spiky_pow2_derivative), 0.0);
        assert_eq!(spiky_pow3_derivative(H, H, scales.spiky_pow3_derivative), 0.0);
    }

    #[test]
    fn kernels_are_positive_inside_support() {
        let scales = KernelScales::for_radius(H);
        assert!(poly6(0.3, H, scales.poly6) > 0.0);
        assert!(spiky_pow2(0.3, H, scales.spiky_pow2) > 0.0);
        assert!(spiky_pow3(0.3, H, scales.spiky_pow3) > 0.0);
    }

    #[test]
    fn density_increases_as_neighbour_approaches() {
        // Testable property 6 (spec.md §8): density must rise monotonically
        // as r moves from h toward 0.
        let scales = KernelScales::for_radius(H);
        let mut prev = 0.0;
        for i in (0..10).rev() {
            let r = H * (i as f32) / 10.0;
            let rho = spiky_pow2(r, H, scales.spiky_pow2);
            assert!(rho >= prev, "density should not decrease as r shrinks");
            prev = rho;
        }
    }

    #[test]
    fn derivatives_are_non_positive_inside_support() {
        // The derivative kernels push particles apart; their sign convention
        // is negative inside the support so that a later multiplication by
        // the outward direction vector yields a repulsive force.
        let scales = KernelScales::for_radius(H);
        for i in 0..10 {
            let r = H * (i as f32) / 10.0;
            assert!(spiky_pow2_derivative(r, H, scales.spiky_pow2_derivative) <= 0.0);
            assert!(spiky_pow3_derivative(r, H, scales.spiky_pow3_derivative) <= 0.0);
        }
    }

    #[test]
    fn scale_factors_match_closed_form() {
        let h = 2.0_f32;
        let scales = KernelScales::for_radius(h);
        assert_relative_eq!(scales.poly6, 4.0 / (PI * h.powi(8)), epsilon = 1e-6);
        assert_relative_eq!(scales.spiky_pow2, 10.0 / (PI * h.powi(5)), epsilon = 1e-6);
        assert_relative_eq!(scales.spiky_pow3, 6.0 / (PI * h.powi(4)), epsilon = 1e-6);
    }
}
