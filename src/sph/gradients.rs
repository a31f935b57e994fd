use std::sync::Mutex;

use cgmath::prelude::*;

use super::comm::Communicator;
use super::config::SimulationConfig;
use super::domain::DomainBounds;
use super::error::CoreError;
use super::hooks::{NullObserver, PairObserver};
use super::limiter::slope_limit;
use super::neighbor_grid::{NeighborGrid, SearchMode};
use super::particles::{KindMask, ParticleKind, ParticleStore};
use super::periodic::PeriodicBox;
use super::smoothing_kernel::{CubicSpline, Kernel};
use super::treewalk::{run_walk, ReduceMode, TreeWalkVisitor, WalkStats};
use crate::units::{outer_product, Matrix, Point, Real, Vector};

/// Above this condition number of the moment matrix the second-order
/// estimator is distrusted and gradients fall back to kernel-derivative
/// weights.
pub const CONDITION_NUMBER_DANGER: Real = 1.0e3;

/// The fields we take gradients of, and their per-pair difference
/// envelopes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantSet {
    pub density: Real,
    pub pressure: Real,
    pub velocity: Vector,
}

impl QuantSet {
    fn zero() -> QuantSet {
        QuantSet {
            density: 0.0,
            pressure: 0.0,
            velocity: Vector::zero(),
        }
    }
}

/// What the gradient loop ships to a peer for one target particle.
#[derive(Clone)]
pub struct GradQuery {
    pub pos: Point,
    pub mass: Real,
    pub hsml: Real,
    /// Timestep size in integer ticks; pairs are computed from the
    /// endpoint with the smaller timestep.
    pub timestep: u64,
    /// Whether this particle's moment matrix is ill-conditioned and its
    /// side of pair contributions must use kernel-derivative weights.
    pub use_sph: bool,
    pub fields: QuantSet,
}

pub struct GradIter {
    kernel: CubicSpline,
    h: Real,
    h2: Real,
}

/// Per-target gradient sums plus the slope-limiter envelopes.
#[derive(Clone)]
pub struct GradResult {
    grad_density: Vector,
    grad_pressure: Vector,
    grad_velocity: Matrix,
    maxima: QuantSet,
    minima: QuantSet,
    max_distance: Real,
}

impl Default for GradResult {
    fn default() -> Self {
        GradResult {
            grad_density: Vector::zero(),
            grad_pressure: Vector::zero(),
            grad_velocity: Matrix::zero(),
            maxima: QuantSet::zero(),
            minima: QuantSet::zero(),
            max_distance: 0.0,
        }
    }
}

/// Per-worker staging for the symmetric halves of pair contributions,
/// merged into the particle store after each parallel phase.
pub struct GradStage {
    grad_density: Vec<Vector>,
    grad_pressure: Vec<Vector>,
    grad_velocity: Vec<Matrix>,
    maxima: Vec<QuantSet>,
    minima: Vec<QuantSet>,
    max_distance: Vec<Real>,
}

impl GradStage {
    fn zeroed(n: usize) -> GradStage {
        GradStage {
            grad_density: vec![Vector::zero(); n],
            grad_pressure: vec![Vector::zero(); n],
            grad_velocity: vec![Matrix::zero(); n],
            maxima: vec![QuantSet::zero(); n],
            minima: vec![QuantSet::zero(); n],
            max_distance: vec![0.0; n],
        }
    }
}

/// Slope-limiter envelopes and characteristic distances, kept outside
/// the particle store for the duration of one gradient pass.
struct GradPasser {
    maxima: Vec<QuantSet>,
    minima: Vec<QuantSet>,
    max_distance: Vec<Real>,
}

impl GradPasser {
    fn zeroed(n: usize) -> GradPasser {
        GradPasser {
            maxima: vec![QuantSet::zero(); n],
            minima: vec![QuantSet::zero(); n],
            max_distance: vec![0.0; n],
        }
    }
}

#[inline]
fn minmax_check(value: Real, min: &mut Real, max: &mut Real) {
    if value < *min {
        *min = value;
    } else if value > *max {
        *max = value;
    }
}

fn minmax_merge(maxima: &mut QuantSet, minima: &mut QuantSet, other_max: &QuantSet, other_min: &QuantSet) {
    maxima.density = maxima.density.max(other_max.density);
    maxima.pressure = maxima.pressure.max(other_max.pressure);
    minima.density = minima.density.min(other_min.density);
    minima.pressure = minima.pressure.min(other_min.pressure);
    for k in 0..3 {
        maxima.velocity[k] = maxima.velocity[k].max(other_max.velocity[k]);
        minima.velocity[k] = minima.velocity[k].min(other_min.velocity[k]);
    }
}

pub struct GradVisitor<'a> {
    observer: &'a dyn PairObserver,
    passer: Mutex<GradPasser>,
}

impl TreeWalkVisitor for GradVisitor<'_> {
    type Query = GradQuery;
    type Result = GradResult;
    type TargetScratch = GradIter;
    type Stage = GradStage;

    fn is_active(&self, store: &ParticleStore, i: usize) -> bool {
        store.active[i]
            && store.kinds[i] == ParticleKind::Gas
            && store.masses[i] > 0.0
            && store.hsml[i] > 0.0
            && store.hydro.density[i] > 0.0
    }

    fn fill_query(&self, store: &ParticleStore, i: usize) -> GradQuery {
        GradQuery {
            pos: store.positions[i],
            mass: store.masses[i],
            hsml: store.hsml[i],
            timestep: store.timestep(i),
            use_sph: store.hydro.condition_number[i] > CONDITION_NUMBER_DANGER,
            fields: QuantSet {
                density: store.hydro.density[i],
                pressure: store.hydro.pressure[i],
                velocity: store.vel_pred[i],
            },
        }
    }

    fn query_center(query: &GradQuery) -> Point {
        query.pos
    }

    fn begin_target(&self, query: &GradQuery) -> GradIter {
        GradIter {
            kernel: CubicSpline::new(query.hsml),
            h: query.hsml,
            h2: query.hsml * query.hsml,
        }
    }

    fn search_radius(&self, scratch: &GradIter) -> Real {
        scratch.h
    }

    fn search_mode(&self) -> SearchMode {
        SearchMode::Pairs
    }

    fn kind_mask(&self) -> KindMask {
        KindMask::GAS
    }

    fn make_stage(&self, n_local: usize) -> GradStage {
        GradStage::zeroed(n_local)
    }

    fn visit_pair(
        &self,
        query: &GradQuery,
        scratch: &GradIter,
        store: &ParticleStore,
        j: usize,
        dp: Vector,
        r2: Real,
        out: &mut GradResult,
        stage: &mut GradStage,
    ) {
        let mass_j = store.masses[j];
        if mass_j <= 0.0 {
            return;
        }
        let rho_j = store.hydro.density[j];
        if rho_j <= 0.0 {
            return;
        }
        if r2 <= 0.0 {
            return;
        }

        // each pair is computed once, from the endpoint with the smaller
        // timestep; relative positions break the tie
        let timestep_j = store.timestep(j);
        if query.timestep > timestep_j {
            return;
        }
        if query.timestep == timestep_j {
            let pos_j = store.positions[j];
            let mut axis = 0;
            while axis < 2 && query.pos[axis] == pos_j[axis] {
                axis += 1;
            }
            if query.pos[axis] < pos_j[axis] {
                return;
            }
        }
        let swap_to_j = store.active[j];

        let h_j = store.hsml[j];
        if r2 >= scratch.h2 && r2 >= h_j * h_j {
            return;
        }
        let r = r2.sqrt();

        let (wk_i, dwk_i) = if r < scratch.h {
            (scratch.kernel.evaluate(r2, r), scratch.kernel.derivative(r))
        } else {
            (0.0, 0.0)
        };

        let d_rho = rho_j - query.fields.density;
        let d_p = store.hydro.pressure[j] - query.fields.pressure;
        let dv = store.vel_pred[j] - query.fields.velocity;

        // envelope and characteristic-distance bookkeeping for the
        // slope limiter, on both endpoints
        if r > out.max_distance {
            out.max_distance = r;
        }
        minmax_check(d_rho, &mut out.minima.density, &mut out.maxima.density);
        minmax_check(d_p, &mut out.minima.pressure, &mut out.maxima.pressure);
        for k in 0..3 {
            minmax_check(dv[k], &mut out.minima.velocity[k], &mut out.maxima.velocity[k]);
        }
        if swap_to_j {
            if r > stage.max_distance[j] {
                stage.max_distance[j] = r;
            }
            minmax_check(-d_rho, &mut stage.minima[j].density, &mut stage.maxima[j].density);
            minmax_check(-d_p, &mut stage.minima[j].pressure, &mut stage.maxima[j].pressure);
            for k in 0..3 {
                minmax_check(-dv[k], &mut stage.minima[j].velocity[k], &mut stage.maxima[j].velocity[k]);
            }
        }

        // target side of the pair
        if r < scratch.h {
            let w_i = if query.use_sph {
                -dwk_i / r * mass_j
            } else {
                mass_j * wk_i / query.fields.density
            };
            let wk_xyz = dp * -w_i;
            out.grad_density += wk_xyz * d_rho;
            out.grad_pressure += wk_xyz * d_p;
            out.grad_velocity += outer_product(wk_xyz, dv);
        }

        // neighbor side, staged for the serial merge
        if r < h_j && swap_to_j {
            let kernel_j = CubicSpline::new(h_j);
            let (wk_j, dwk_j) = (kernel_j.evaluate(r2, r), kernel_j.derivative(r));
            let w_j = if store.hydro.condition_number[j] > CONDITION_NUMBER_DANGER {
                -dwk_j / r * query.mass
            } else {
                query.mass * wk_j / rho_j
            };
            let wk_xyz_j = dp * -w_j;
            stage.grad_density[j] += wk_xyz_j * d_rho;
            stage.grad_pressure[j] += wk_xyz_j * d_p;
            stage.grad_velocity[j] += outer_product(wk_xyz_j, dv);
        }

        self.observer.gradient_pair(query, j, r, wk_i);
    }

    fn reduce(&self, store: &mut ParticleStore, i: usize, result: &GradResult, _mode: ReduceMode) {
        // gradients are zeroed at pass entry, so both reduce modes add
        store.hydro.grad_density[i] += result.grad_density;
        store.hydro.grad_pressure[i] += result.grad_pressure;
        store.hydro.grad_velocity[i] += result.grad_velocity;

        let mut guard = self.passer.lock().unwrap();
        let passer = &mut *guard;
        if result.max_distance > passer.max_distance[i] {
            passer.max_distance[i] = result.max_distance;
        }
        minmax_merge(&mut passer.maxima[i], &mut passer.minima[i], &result.maxima, &result.minima);
    }

    fn merge_stage(&self, store: &mut ParticleStore, stage: GradStage) {
        let mut guard = self.passer.lock().unwrap();
        let passer = &mut *guard;
        for i in 0..stage.grad_density.len() {
            store.hydro.grad_density[i] += stage.grad_density[i];
            store.hydro.grad_pressure[i] += stage.grad_pressure[i];
            store.hydro.grad_velocity[i] += stage.grad_velocity[i];
            if stage.max_distance[i] > passer.max_distance[i] {
                passer.max_distance[i] = stage.max_distance[i];
            }
            minmax_merge(&mut passer.maxima[i], &mut passer.minima[i], &stage.maxima[i], &stage.minima[i]);
        }
    }
}

/// Applies either the moment-matrix estimator or the kernel-derivative
/// fallback to one raw gradient sum.
fn construct_gradient(grad: &mut Vector, store: &ParticleStore, i: usize) {
    if store.hydro.condition_number[i] > CONDITION_NUMBER_DANGER {
        *grad *= store.hydro.dhsml_factor[i] / store.hydro.density[i];
    } else {
        *grad = store.hydro.nv_t[i] * *grad;
    }
}

/// Computes slope-limited gradients of density, pressure and velocity
/// for every active gas particle from the densities of the preceding
/// [`super::density::density_pass`].
///
/// Collective; `grid` must have been rebuilt after the density pass so
/// its largest smoothing length reflects the converged values, and the
/// entries of `domains` are expected to be padded by the owning rank's
/// largest smoothing length.
pub fn gradients_pass<C: Communicator>(
    cfg: &SimulationConfig,
    store: &mut ParticleStore,
    grid: &NeighborGrid,
    boxm: &PeriodicBox,
    domains: &[DomainBounds],
    comm: &mut C,
) -> Result<WalkStats, CoreError> {
    gradients_pass_observed(cfg, store, grid, boxm, domains, comm, &NullObserver)
}

/// [`gradients_pass`] with a pair observer for optional physics overlays.
pub fn gradients_pass_observed<C: Communicator>(
    cfg: &SimulationConfig,
    store: &mut ParticleStore,
    grid: &NeighborGrid,
    boxm: &PeriodicBox,
    domains: &[DomainBounds],
    comm: &mut C,
    observer: &dyn PairObserver,
) -> Result<WalkStats, CoreError> {
    scope!("Gradients", "gradients_pass");
    cfg.validate()?;

    let n = store.len();
    for i in 0..n {
        if store.active[i] && store.kinds[i] == ParticleKind::Gas {
            store.hydro.grad_density[i] = Vector::zero();
            store.hydro.grad_pressure[i] = Vector::zero();
            store.hydro.grad_velocity[i] = Matrix::zero();
        }
    }

    let visitor = GradVisitor {
        observer,
        passer: Mutex::new(GradPasser::zeroed(n)),
    };
    let stats = run_walk(&visitor, store, grid, boxm, domains, comm, cfg)?;
    let passer = visitor.passer.into_inner().unwrap();

    for i in 0..n {
        if !(store.active[i] && store.kinds[i] == ParticleKind::Gas && store.hydro.density[i] > 0.0) {
            continue;
        }

        let mut grad_density = store.hydro.grad_density[i];
        let mut grad_pressure = store.hydro.grad_pressure[i];
        let mut grad_velocity = store.hydro.grad_velocity[i];
        construct_gradient(&mut grad_density, store, i);
        construct_gradient(&mut grad_pressure, store, i);
        for k in 0..3 {
            let mut column = grad_velocity[k];
            construct_gradient(&mut column, store, i);
            grad_velocity[k] = column;
        }

        let cond = store.hydro.condition_number[i];
        let h_lim = store.hsml[i].max(passer.max_distance[i]);
        // reconstruction fraction: 0.25 of the kernel by default, pushed
        // toward 0.5 when the moment matrix is poorly conditioned
        let mut a_limiter = 0.25;
        if cond > 100.0 {
            a_limiter = (0.25 + 0.25 * (cond - 100.0) / 100.0).min(0.5);
        }
        let stol = cfg.overshoot_tolerance;

        slope_limit(
            &mut grad_density,
            passer.maxima[i].density,
            passer.minima[i].density,
            a_limiter,
            h_lim,
            0.0,
        );
        slope_limit(
            &mut grad_pressure,
            passer.maxima[i].pressure,
            passer.minima[i].pressure,
            a_limiter,
            h_lim,
            stol,
        );
        for k in 0..3 {
            let mut column = grad_velocity[k];
            slope_limit(
                &mut column,
                passer.maxima[i].velocity[k],
                passer.minima[i].velocity[k],
                a_limiter,
                h_lim,
                stol,
            );
            grad_velocity[k] = column;
        }

        store.hydro.grad_density[i] = grad_density;
        store.hydro.grad_pressure[i] = grad_pressure;
        store.hydro.grad_velocity[i] = grad_velocity;
    }

    Ok(stats)
}
