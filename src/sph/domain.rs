use super::periodic::PeriodicBox;
use crate::units::{Point, Real};

/// Axis-aligned bounding box of the particle set owned by one rank,
/// produced by the external domain decomposition.
///
/// The tree-walk driver exports a query to every peer whose bounds
/// intersect the query's search ball. For pairwise-symmetric walks the
/// bounds are expected to be padded by the peer's largest smoothing
/// length (see [`DomainBounds::padded`]), so that a neighbor whose own
/// kernel reaches the target is never missed.
#[derive(Debug, Clone, Copy)]
pub struct DomainBounds {
    pub min: Point,
    pub max: Point,
}

impl DomainBounds {
    /// Tight bounds around a set of positions. Panics on an empty set;
    /// a rank without particles should use [`DomainBounds::empty`].
    pub fn enclosing(positions: &[Point]) -> DomainBounds {
        assert!(!positions.is_empty(), "cannot bound an empty particle set");
        let mut min = positions[0];
        let mut max = positions[0];
        for p in &positions[1..] {
            for k in 0..3 {
                min[k] = min[k].min(p[k]);
                max[k] = max[k].max(p[k]);
            }
        }
        DomainBounds { min, max }
    }

    /// Bounds that intersect nothing.
    pub fn empty() -> DomainBounds {
        DomainBounds {
            min: Point::new(1.0, 1.0, 1.0),
            max: Point::new(-1.0, -1.0, -1.0),
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        (0..3).any(|k| self.max[k] < self.min[k])
    }

    /// Grows the bounds by `margin` on every side.
    pub fn padded(&self, margin: Real) -> DomainBounds {
        if self.is_empty() {
            return *self;
        }
        let mut out = *self;
        for k in 0..3 {
            out.min[k] -= margin;
            out.max[k] += margin;
        }
        out
    }

    /// Whether the ball of `radius` around `center` overlaps these
    /// bounds under the periodic box metric.
    pub fn intersects_ball(&self, boxm: &PeriodicBox, center: Point, radius: Real) -> bool {
        if self.is_empty() {
            return false;
        }
        let mut dist_sq = 0.0;
        for k in 0..3 {
            let d = boxm.axis_distance_to_interval(center[k], self.min[k], self.max[k]);
            dist_sq += d * d;
        }
        dist_sq <= radius * radius
    }
}
