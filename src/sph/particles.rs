use cgmath::prelude::*;

use crate::units::{Matrix, Point, Real, Vector};

/// Particle species participating in the hydro loops.
///
/// Gas carries the full hydro state; sinks (accretors) sample the
/// surrounding fluid through the same kernel sums; everything else is
/// inert as far as this crate is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParticleKind {
    Gas = 0,
    Sink = 1,
    Other = 2,
}

impl ParticleKind {
    #[inline]
    pub fn mask_bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Bitmask over [`ParticleKind`] used to filter neighbor candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMask(pub u8);

impl KindMask {
    pub const GAS: KindMask = KindMask(1 << 0);
    pub const SINK: KindMask = KindMask(1 << 1);
    pub const ALL: KindMask = KindMask(0xff);

    #[inline]
    pub fn contains(self, kind: ParticleKind) -> bool {
        self.0 & kind.mask_bit() != 0
    }
}

/// Hydro quantities attached to particles.
///
/// Stored for every slot to keep the arrays aligned with the particle
/// arrays; only gas slots (and, for the smoothed sink quantities, sink
/// slots) carry meaningful values.
#[derive(Debug, Default, Clone)]
pub struct HydroFields {
    pub density: Vec<Real>,
    /// Predicted entropy function A; pressure follows as A ρ^γ.
    pub entropy_pred: Vec<Real>,
    pub pressure: Vec<Real>,
    /// Kernel-weighted effective neighbor count.
    pub num_ngb: Vec<Real>,
    /// The dimensionless dρ/dh correction factor after density
    /// post-processing; holds the raw dρ/dh sum while a pass is running.
    pub dhsml_factor: Vec<Real>,
    pub div_vel: Vec<Real>,
    pub rot_vel: Vec<Vector>,
    pub curl_vel: Vec<Real>,
    /// Inverse of the kernel-weighted second-moment matrix of neighbor
    /// offsets; holds the raw moment sums while the density pass runs.
    pub nv_t: Vec<Matrix>,
    /// Scaled condition number of the moment matrix. Above
    /// [`super::gradients::CONDITION_NUMBER_DANGER`] the gradient pass
    /// falls back to kernel-derivative weights.
    pub condition_number: Vec<Real>,
    pub grad_density: Vec<Vector>,
    pub grad_pressure: Vec<Vector>,
    /// Column k holds the gradient of velocity component k.
    pub grad_velocity: Vec<Matrix>,
    /// Sink-only: kernel-smoothed entropy of the surrounding gas.
    pub smoothed_entropy: Vec<Real>,
    /// Sink-only: kernel-smoothed pressure of the surrounding gas.
    pub smoothed_pressure: Vec<Real>,
    /// Sink-only: mass-weighted mean velocity of the surrounding gas.
    pub surrounding_vel: Vec<Vector>,
}

impl HydroFields {
    fn push_default(&mut self, entropy: Real) {
        self.density.push(0.0);
        self.entropy_pred.push(entropy);
        self.pressure.push(0.0);
        self.num_ngb.push(0.0);
        self.dhsml_factor.push(0.0);
        self.div_vel.push(0.0);
        self.rot_vel.push(Vector::zero());
        self.curl_vel.push(0.0);
        self.nv_t.push(Matrix::zero());
        self.condition_number.push(0.0);
        self.grad_density.push(Vector::zero());
        self.grad_pressure.push(Vector::zero());
        self.grad_velocity.push(Matrix::zero());
        self.smoothed_entropy.push(0.0);
        self.smoothed_pressure.push(0.0);
        self.surrounding_vel.push(Vector::zero());
    }
}

/// The particle set owned by one rank, structure-of-arrays layout.
///
/// Particles are created by the external domain decomposition and only
/// mutated here through the density/gradient passes: `hsml`,
/// `density_done` and the [`HydroFields`] change, everything else is
/// read-only for this crate.
#[derive(Debug, Default, Clone)]
pub struct ParticleStore {
    pub ids: Vec<u64>,
    pub kinds: Vec<ParticleKind>,
    pub positions: Vec<Point>,
    /// Velocity predictor used in all pairwise interactions.
    pub vel_pred: Vec<Vector>,
    pub masses: Vec<Real>,
    pub hsml: Vec<Real>,
    /// Index into the power-of-two timestep hierarchy. Bin 0 means "no
    /// individual timestep assigned yet".
    pub time_bins: Vec<u8>,
    /// Whether the particle is integrated on the current step.
    pub active: Vec<bool>,
    /// Set by the smoothing-length controller once a particle's neighbor
    /// count has converged.
    pub density_done: Vec<bool>,
    pub hydro: HydroFields,
}

impl ParticleStore {
    pub fn new() -> ParticleStore {
        ParticleStore::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Timestep size of particle `i` in integer ticks.
    #[inline]
    pub fn timestep(&self, i: usize) -> u64 {
        let bin = self.time_bins[i];
        if bin == 0 {
            0
        } else {
            1u64 << bin
        }
    }

    pub fn push(
        &mut self,
        kind: ParticleKind,
        id: u64,
        position: Point,
        velocity: Vector,
        mass: Real,
        hsml: Real,
        entropy: Real,
    ) -> usize {
        let idx = self.len();
        self.ids.push(id);
        self.kinds.push(kind);
        self.positions.push(position);
        self.vel_pred.push(velocity);
        self.masses.push(mass);
        self.hsml.push(hsml);
        self.time_bins.push(0);
        self.active.push(true);
        self.density_done.push(false);
        self.hydro.push_default(entropy);
        idx
    }

    pub fn push_gas(&mut self, id: u64, position: Point, velocity: Vector, mass: Real, hsml: Real, entropy: Real) -> usize {
        self.push(ParticleKind::Gas, id, position, velocity, mass, hsml, entropy)
    }

    pub fn push_sink(&mut self, id: u64, position: Point, mass: Real, hsml: Real) -> usize {
        self.push(ParticleKind::Sink, id, position, Vector::zero(), mass, hsml, 0.0)
    }

    /// Largest smoothing length over the local particle set.
    pub fn max_hsml(&self) -> Real {
        self.hsml.iter().cloned().fold(0.0, Real::max)
    }
}
