use super::density::DensityQuery;
use super::gradients::GradQuery;
use crate::units::Real;

/// Capability seam for optional physics riding on the neighbor loops.
///
/// Feedback weighting, magnetic field gradients, metal diffusion and
/// similar overlays observe every evaluated pair and accumulate into
/// their own state; the core loops stay oblivious. The default
/// implementation of every method is a no-op, so an overlay only
/// implements the hooks it needs.
pub trait PairObserver: Sync {
    fn density_pair(&self, _query: &DensityQuery, _j: usize, _r: Real, _wk: Real) {}
    fn gradient_pair(&self, _query: &GradQuery, _j: usize, _r: Real, _wk_i: Real) {}
}

/// The default observer: no optional physics.
pub struct NullObserver;

impl PairObserver for NullObserver {}
