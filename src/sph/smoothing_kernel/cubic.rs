use super::kernel::Kernel;
use crate::units::Real;

/// Cubic spline smoothing kernel.
///
/// Classic cubic spline from "J. Monaghan, Smoothed Particle Hydrodynamics,
/// Annual Review of Astronomy and Astrophysics, 30 (1992), pp. 543-574",
/// normalized so that the support radius equals the smoothing length.
#[derive(Copy, Clone)]
pub struct CubicSpline {
    h: Real,
    h_inv: Real,
    normalizer: Real,
    normalizer_grad: Real,
}

impl CubicSpline {
    pub fn new(smoothing_length: Real) -> CubicSpline {
        let sigma = 8.0 / (std::f64::consts::PI as Real * smoothing_length.powi(3));
        CubicSpline {
            h: smoothing_length,
            h_inv: 1.0 / smoothing_length,
            normalizer: sigma,
            normalizer_grad: sigma / smoothing_length,
        }
    }
}

impl Kernel for CubicSpline {
    #[inline]
    fn support_radius(&self) -> Real {
        self.h
    }

    #[inline]
    fn evaluate(&self, _r_sq: Real, r: Real) -> Real {
        let q = r * self.h_inv;
        if q <= 0.5 {
            let q_sq = q * q;
            self.normalizer * (1.0 + 6.0 * q_sq * (q - 1.0))
        } else if q <= 1.0 {
            let one_minus_q = 1.0 - q;
            self.normalizer * 2.0 * one_minus_q * one_minus_q * one_minus_q
        } else {
            0.0
        }
    }

    #[inline]
    fn derivative(&self, r: Real) -> Real {
        let q = r * self.h_inv;
        if q <= 0.5 {
            self.normalizer_grad * 6.0 * q * (3.0 * q - 2.0)
        } else if q <= 1.0 {
            let one_minus_q = 1.0 - q;
            self.normalizer_grad * -6.0 * one_minus_q * one_minus_q
        } else {
            0.0
        }
    }
}

generate_kernel_tests!(CubicSpline);
