use cgmath::prelude::*;

use crate::units::{Real, Vector};

/// Scales a raw gradient so that a linear reconstruction out to the
/// fraction `alim` of the characteristic length `h` stays inside the
/// locally observed field envelope.
///
/// `val_max` and `val_min` are the largest and smallest field
/// differences seen against any kernel neighbor. With `shoot_tol` > 0 a
/// proportional overshoot beyond the tighter envelope side is
/// tolerated, which is appropriate for fields that are not positivity
/// critical.
pub fn slope_limit(grad: &mut Vector, val_max: Real, val_min: Real, alim: Real, h: Real, shoot_tol: Real) {
    let d_abs = grad.magnitude2();
    if d_abs > 0.0 {
        let mut cfac = 1.0 / (alim * h * d_abs.sqrt());
        let fabs_max = val_max.abs();
        let fabs_min = val_min.abs();
        let abs_min = fabs_max.min(fabs_min);
        if shoot_tol > 0.0 {
            let abs_max = fabs_max.max(fabs_min);
            cfac *= (abs_min + shoot_tol * abs_max).min(abs_max);
        } else {
            cfac *= abs_min;
        }
        if cfac < 1.0 {
            *grad *= cfac;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use more_asserts::assert_lt;

    #[test]
    fn zero_gradient_is_untouched() {
        let mut g = Vector::zero();
        slope_limit(&mut g, 1.0, -1.0, 0.25, 1.0, 0.0);
        assert_eq!(g, Vector::zero());
    }

    #[test]
    fn steep_gradient_lands_exactly_on_the_envelope() {
        let mut g = Vector::new(10.0, 0.0, 0.0);
        let (alim, h) = (0.5, 1.0);
        slope_limit(&mut g, 1.0, -1.0, alim, h, 0.0);
        // after limiting, |g| alim h equals the tighter envelope side
        assert_lt!((g.magnitude() * alim * h - 1.0).abs(), 1e-12);
        assert_eq!(g.y, 0.0);
    }

    #[test]
    fn shallow_gradient_is_untouched() {
        let mut g = Vector::new(0.1, 0.0, 0.0);
        let before = g;
        slope_limit(&mut g, 1.0, -1.0, 0.5, 1.0, 0.0);
        assert_eq!(g, before);
    }

    #[test]
    fn limiting_is_idempotent() {
        let mut g = Vector::new(3.0, -4.0, 12.0);
        slope_limit(&mut g, 0.5, -0.2, 0.25, 2.0, 0.0);
        let once = g;
        slope_limit(&mut g, 0.5, -0.2, 0.25, 2.0, 0.0);
        assert_eq!(g, once);
    }

    #[test]
    fn overshoot_tolerance_relaxes_the_envelope() {
        let mut tight = Vector::new(10.0, 0.0, 0.0);
        let mut relaxed = tight;
        slope_limit(&mut tight, 2.0, -0.5, 0.5, 1.0, 0.0);
        slope_limit(&mut relaxed, 2.0, -0.5, 0.5, 1.0, 0.1);
        assert!(relaxed.magnitude() > tight.magnitude());
        // but never beyond the wider envelope side
        assert!(relaxed.magnitude() * 0.5 * 1.0 <= 2.0 + 1e-12);
    }

    #[test]
    fn direction_is_preserved() {
        let mut g = Vector::new(3.0, 4.0, 0.0);
        slope_limit(&mut g, 0.1, -0.1, 0.25, 1.0, 0.0);
        assert_lt!((g.x / g.y - 3.0 / 4.0).abs(), 1e-12);
    }
}
