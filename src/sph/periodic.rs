use crate::units::{Point, Real, Vector};

/// Cubic periodic simulation box.
///
/// All pair separations in the neighbor loops go through
/// [`PeriodicBox::separation`], which folds the raw difference vector to
/// the nearest periodic image.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicBox {
    side: Real,
    half: Real,
}

impl PeriodicBox {
    pub fn new(side: Real) -> PeriodicBox {
        assert!(side > 0.0 && side.is_finite(), "box side must be positive");
        PeriodicBox { side, half: 0.5 * side }
    }

    #[inline]
    pub fn side(&self) -> Real {
        self.side
    }

    /// Folds a raw difference vector to the nearest image.
    #[inline]
    pub fn min_image(&self, mut d: Vector) -> Vector {
        for k in 0..3 {
            if d[k] > self.half {
                d[k] -= self.side;
            } else if d[k] < -self.half {
                d[k] += self.side;
            }
        }
        d
    }

    /// Nearest-image separation `from - to`.
    #[inline]
    pub fn separation(&self, from: Point, to: Point) -> Vector {
        self.min_image(from - to)
    }

    /// Maps a point into the canonical [0, side) interval on every axis.
    #[inline]
    pub fn wrap(&self, mut p: Point) -> Point {
        for k in 0..3 {
            p[k] = p[k].rem_euclid(self.side);
        }
        p
    }

    /// Periodic distance from a coordinate to a closed interval on one
    /// axis. Zero when the coordinate lies inside the interval or any of
    /// its periodic images does.
    pub fn axis_distance_to_interval(&self, x: Real, lo: Real, hi: Real) -> Real {
        let mut best = Real::MAX;
        for shift in [-self.side, 0.0, self.side] {
            let c = x + shift;
            let d = if c < lo {
                lo - c
            } else if c > hi {
                c - hi
            } else {
                0.0
            };
            best = best.min(d);
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::prelude::*;
    use more_asserts::assert_le;

    #[test]
    fn separation_folds_across_the_boundary() {
        let b = PeriodicBox::new(10.0);
        let d = b.separation(Point::new(9.5, 0.0, 0.0), Point::new(0.5, 0.0, 0.0));
        assert!((d.x - -1.0).abs() < 1e-12);
        assert_eq!(d.y, 0.0);
    }

    #[test]
    fn separation_is_never_longer_than_half_diagonal() {
        let b = PeriodicBox::new(1.0);
        let points = [
            Point::new(0.1, 0.9, 0.5),
            Point::new(0.99, 0.01, 0.2),
            Point::new(0.5, 0.5, 0.5),
        ];
        for &p in &points {
            for &q in &points {
                let d = b.separation(p, q);
                for k in 0..3 {
                    assert_le!(d[k].abs(), 0.5 + 1e-12);
                }
            }
        }
    }

    #[test]
    fn wrap_maps_into_canonical_cell() {
        let b = PeriodicBox::new(2.0);
        let p = b.wrap(Point::new(-0.5, 2.5, 4.0));
        assert!((p.x - 1.5).abs() < 1e-12);
        assert!((p.y - 0.5).abs() < 1e-12);
        assert!(p.z.abs() < 1e-12);
    }

    #[test]
    fn interval_distance_sees_periodic_images() {
        let b = PeriodicBox::new(10.0);
        // interval near the upper edge, coordinate near the lower edge
        let d = b.axis_distance_to_interval(0.5, 9.0, 9.8);
        assert!((d - 0.7).abs() < 1e-12);
        assert_eq!(b.axis_distance_to_interval(9.5, 9.0, 9.8), 0.0);
    }

    #[test]
    fn zero_separation_for_identical_points() {
        let b = PeriodicBox::new(3.0);
        let p = Point::new(1.0, 2.0, 0.5);
        assert_eq!(b.separation(p, p), Vector::zero());
    }
}
