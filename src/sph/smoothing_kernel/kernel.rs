use crate::units::Real;

/// SPH smoothing kernel with compact support.
///
/// Only radially symmetric kernels are supported. The support radius is
/// the smoothing length h itself: for r > h both the kernel and its
/// derivative are zero. Implementations precompute their normalization
/// at construction, so a kernel instance is the per-target descriptor
/// used throughout one neighbor iteration.
///
/// The three evaluators must be analytically consistent: the volume
/// integral of `evaluate` over the support ball is 1, `derivative` is
/// the radial derivative of `evaluate`, and `dw_dh` is the partial
/// derivative with respect to the smoothing length at fixed r. The
/// default `dw_dh` implements the identity dW/dh = -(3 W + r W') / h
/// that holds for any kernel of the form W(r,h) = h⁻³ f(r/h).
pub trait Kernel {
    /// Smoothing length h this descriptor was built for.
    fn support_radius(&self) -> Real;

    /// W(r, h).
    /// `r_sq`: squared pair distance, `r`: pair distance.
    fn evaluate(&self, r_sq: Real, r: Real) -> Real;

    /// dW/dr at distance r.
    fn derivative(&self, r: Real) -> Real;

    /// dW/dh at fixed r.
    #[inline]
    fn dw_dh(&self, r_sq: Real, r: Real) -> Real {
        let h = self.support_radius();
        -(3.0 * self.evaluate(r_sq, r) + r * self.derivative(r)) / h
    }

    /// Volume of the support ball, 4π/3 h³. Multiplying kernel sums by
    /// this turns them into effective neighbor counts.
    #[inline]
    fn support_volume(&self) -> Real {
        let h = self.support_radius();
        4.0 / 3.0 * std::f64::consts::PI as Real * h * h * h
    }
}

macro_rules! generate_kernel_tests {
    ($kernel_type:ident) => {
    };
}
