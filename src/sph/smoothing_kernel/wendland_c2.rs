use super::kernel::Kernel;
use crate::units::Real;

// https://github.com/InteractiveComputerGraphics/SPlisHSPlasH/blob/d5172c9/SPlisHSPlasH/SPHKernels.h#L545
#[derive(Copy, Clone)]
pub struct WendlandC2 {
    h: Real,
    h_inv: Real,
    normalizer: Real,
    normalizer_grad: Real,
}

impl WendlandC2 {
    pub fn new(smoothing_length: Real) -> Self {
        let sigma = 21.0 / (2.0 * std::f64::consts::PI as Real * smoothing_length.powi(3));
        WendlandC2 {
            h: smoothing_length,
            h_inv: 1.0 / smoothing_length,
            normalizer: sigma,
            normalizer_grad: sigma / smoothing_length,
        }
    }
}

impl Kernel for WendlandC2 {
    #[inline]
    fn support_radius(&self) -> Real {
        self.h
    }

    #[inline]
    fn evaluate(&self, _r_sq: Real, r: Real) -> Real {
        let q = r * self.h_inv;
        if q >= 1.0 {
            return 0.0;
        }
        let one_minus_q = 1.0 - q;
        let one_minus_q_sq = one_minus_q * one_minus_q;
        self.normalizer * one_minus_q_sq * one_minus_q_sq * (4.0 * q + 1.0)
    }

    #[inline]
    fn derivative(&self, r: Real) -> Real {
        let q = r * self.h_inv;
        if q >= 1.0 {
            return 0.0;
        }
        let one_minus_q = 1.0 - q;
        self.normalizer_grad * -20.0 * q * one_minus_q * one_minus_q * one_minus_q
    }
}

generate_kernel_tests!(WendlandC2);
