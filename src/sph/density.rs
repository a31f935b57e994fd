use cgmath::prelude::*;

use super::comm::Communicator;
use super::config::SimulationConfig;
use super::domain::DomainBounds;
use super::error::{ConvergenceDiagnostic, CoreError};
use super::hooks::{NullObserver, PairObserver};
use super::hsml::update_smoothing_length;
use super::neighbor_grid::{NeighborGrid, SearchMode};
use super::particles::{KindMask, ParticleKind, ParticleStore};
use super::periodic::PeriodicBox;
use super::smoothing_kernel::{CubicSpline, Kernel};
use super::treewalk::{run_walk, ReduceMode, TreeWalkVisitor, WalkStats};
use crate::units::{frobenius_norm, outer_product, Matrix, Point, Real, Vector, NUM_DIMS};

/// What the density loop ships to a peer for one target particle.
#[derive(Clone)]
pub struct DensityQuery {
    pub pos: Point,
    pub vel: Vector,
    pub hsml: Real,
    pub kind: ParticleKind,
}

/// Per-target state of one density neighbor iteration.
pub struct DensityIter {
    kernel: CubicSpline,
    kernel_volume: Real,
    h2: Real,
    hsearch: Real,
}

/// Kernel sums accumulated for one target.
#[derive(Clone)]
pub struct DensityResult {
    rho: Real,
    dhsml: Real,
    ngb: Real,
    div: Real,
    rot: Vector,
    moment: Matrix,
    smoothed_entropy: Real,
    smoothed_pressure: Real,
    fluid_vel: Vector,
}

impl Default for DensityResult {
    fn default() -> Self {
        DensityResult {
            rho: 0.0,
            dhsml: 0.0,
            ngb: 0.0,
            div: 0.0,
            rot: Vector::zero(),
            moment: Matrix::zero(),
            smoothed_entropy: 0.0,
            smoothed_pressure: 0.0,
            fluid_vel: Vector::zero(),
        }
    }
}

#[inline]
fn fold<T: std::ops::AddAssign + Copy>(mode: ReduceMode, slot: &mut T, value: T) {
    match mode {
        ReduceMode::Primary => *slot = value,
        ReduceMode::Accumulate => *slot += value,
    }
}

pub struct DensityVisitor<'a> {
    cfg: &'a SimulationConfig,
    observer: &'a dyn PairObserver,
}

impl TreeWalkVisitor for DensityVisitor<'_> {
    type Query = DensityQuery;
    type Result = DensityResult;
    type TargetScratch = DensityIter;
    type Stage = ();

    fn is_active(&self, store: &ParticleStore, i: usize) -> bool {
        store.active[i]
            && !store.density_done[i]
            && matches!(store.kinds[i], ParticleKind::Gas | ParticleKind::Sink)
    }

    fn fill_query(&self, store: &ParticleStore, i: usize) -> DensityQuery {
        DensityQuery {
            pos: store.positions[i],
            vel: store.vel_pred[i],
            hsml: store.hsml[i],
            kind: store.kinds[i],
        }
    }

    fn query_center(query: &DensityQuery) -> Point {
        query.pos
    }

    fn begin_target(&self, query: &DensityQuery) -> DensityIter {
        let h = query.hsml;
        let hsearch = match (query.kind, self.cfg.sink_search_radius) {
            (ParticleKind::Sink, Some(radius)) => h.max(radius),
            _ => h,
        };
        let kernel = CubicSpline::new(h);
        DensityIter {
            kernel_volume: kernel.support_volume(),
            h2: h * h,
            kernel,
            hsearch,
        }
    }

    fn search_radius(&self, scratch: &DensityIter) -> Real {
        scratch.hsearch
    }

    fn search_mode(&self) -> SearchMode {
        SearchMode::Ball
    }

    fn kind_mask(&self) -> KindMask {
        KindMask::GAS
    }

    fn make_stage(&self, _n_local: usize) -> Self::Stage {}

    fn visit_pair(
        &self,
        query: &DensityQuery,
        scratch: &DensityIter,
        store: &ParticleStore,
        j: usize,
        dp: Vector,
        r2: Real,
        out: &mut DensityResult,
        _stage: &mut Self::Stage,
    ) {
        let mass_j = store.masses[j];
        if mass_j <= 0.0 {
            return;
        }
        if r2 >= scratch.h2 {
            // candidates between the kernel and an enlarged sink search
            // ball only feed the extension hooks
            if r2 < scratch.hsearch * scratch.hsearch {
                self.observer.density_pair(query, j, r2.sqrt(), 0.0);
            }
            return;
        }
        let r = r2.sqrt();
        let wk = scratch.kernel.evaluate(r2, r);
        let dwk = scratch.kernel.derivative(r);

        out.rho += mass_j * wk;
        out.ngb += wk * scratch.kernel_volume;
        out.dhsml += mass_j * scratch.kernel.dw_dh(r2, r);
        out.moment += outer_product(dp, dp) * (mass_j * wk);

        if query.kind == ParticleKind::Sink {
            out.smoothed_entropy += mass_j * wk * store.hydro.entropy_pred[j];
            out.smoothed_pressure += mass_j * wk * store.hydro.pressure[j];
            out.fluid_vel += store.vel_pred[j] * (mass_j * wk);
        }

        if r > 0.0 {
            let fac = mass_j * dwk / r;
            let dv = query.vel - store.vel_pred[j];
            out.div += -fac * dv.dot(dp);
            out.rot += dv.cross(dp) * fac;
        }

        self.observer.density_pair(query, j, r, wk);
    }

    fn reduce(&self, store: &mut ParticleStore, i: usize, result: &DensityResult, mode: ReduceMode) {
        fold(mode, &mut store.hydro.num_ngb[i], result.ngb);
        match store.kinds[i] {
            ParticleKind::Gas => {
                fold(mode, &mut store.hydro.density[i], result.rho);
                fold(mode, &mut store.hydro.dhsml_factor[i], result.dhsml);
                fold(mode, &mut store.hydro.div_vel[i], result.div);
                fold(mode, &mut store.hydro.rot_vel[i], result.rot);
                fold(mode, &mut store.hydro.nv_t[i], result.moment);
            }
            ParticleKind::Sink => {
                fold(mode, &mut store.hydro.density[i], result.rho);
                fold(mode, &mut store.hydro.smoothed_entropy[i], result.smoothed_entropy);
                fold(mode, &mut store.hydro.smoothed_pressure[i], result.smoothed_pressure);
                fold(mode, &mut store.hydro.surrounding_vel[i], result.fluid_vel);
            }
            ParticleKind::Other => {}
        }
    }

    fn merge_stage(&self, _store: &mut ParticleStore, _stage: Self::Stage) {}
}

/// Turns the raw kernel sums of one particle into the final density
/// products: the dρ/dh correction factor, flow-field quantities, the
/// inverted moment matrix with its condition number, and the pressure.
fn post_process(store: &mut ParticleStore, i: usize, cfg: &SimulationConfig) {
    match store.kinds[i] {
        ParticleKind::Gas => {
            let rho = store.hydro.density[i];
            if rho > 0.0 {
                let dhsml = store.hydro.dhsml_factor[i] * store.hsml[i] / (NUM_DIMS * rho);
                // dhsml would be -1 for a lone particle at zero lag
                store.hydro.dhsml_factor[i] = if dhsml > -0.9 { 1.0 / (1.0 + dhsml) } else { 1.0 };

                store.hydro.curl_vel[i] = store.hydro.rot_vel[i].magnitude() / rho;
                store.hydro.div_vel[i] /= rho;

                let moment = store.hydro.nv_t[i] * (1.0 / rho);
                let norm = frobenius_norm(&moment);
                match moment.invert() {
                    Some(inverse) => {
                        let cond = norm * frobenius_norm(&inverse) / NUM_DIMS;
                        if cond.is_finite() {
                            store.hydro.condition_number[i] = cond;
                            store.hydro.nv_t[i] = inverse;
                        } else {
                            store.hydro.condition_number[i] = Real::INFINITY;
                            store.hydro.nv_t[i] = Matrix::zero();
                        }
                    }
                    None => {
                        store.hydro.condition_number[i] = Real::INFINITY;
                        store.hydro.nv_t[i] = Matrix::zero();
                    }
                }
            }
            store.hydro.pressure[i] = store.hydro.entropy_pred[i] * rho.powf(cfg.gamma);
        }
        ParticleKind::Sink => {
            let rho = store.hydro.density[i];
            if rho > 0.0 {
                store.hydro.smoothed_entropy[i] /= rho;
                store.hydro.smoothed_pressure[i] /= rho;
                store.hydro.surrounding_vel[i] /= rho;
            }
        }
        ParticleKind::Other => {}
    }
}

#[derive(Debug, Default, Clone)]
pub struct DensityStats {
    /// Number of repeat sweeps needed to bring every particle inside the
    /// neighbor tolerance.
    pub iterations: u32,
    pub walk: WalkStats,
}

/// Computes the density, effective neighbor count, velocity divergence
/// and curl, the dρ/dh factor and the gradient moment matrix for every
/// active gas and sink particle, repeating the neighbor sweep with
/// adjusted smoothing lengths until all particles are inside the
/// neighbor-count tolerance.
///
/// Collective: every rank must call this with the same configuration.
/// `grid` indexes this rank's particles; `domains` holds every rank's
/// bounds from the domain decomposition.
pub fn density_pass<C: Communicator>(
    cfg: &SimulationConfig,
    store: &mut ParticleStore,
    grid: &NeighborGrid,
    boxm: &PeriodicBox,
    domains: &[DomainBounds],
    comm: &mut C,
) -> Result<DensityStats, CoreError> {
    density_pass_observed(cfg, store, grid, boxm, domains, comm, &NullObserver)
}

/// [`density_pass`] with a pair observer for optional physics overlays.
pub fn density_pass_observed<C: Communicator>(
    cfg: &SimulationConfig,
    store: &mut ParticleStore,
    grid: &NeighborGrid,
    boxm: &PeriodicBox,
    domains: &[DomainBounds],
    comm: &mut C,
    observer: &dyn PairObserver,
) -> Result<DensityStats, CoreError> {
    scope!("Density", "density_pass");
    cfg.validate()?;

    let n = store.len();
    for i in 0..n {
        if store.active[i] && matches!(store.kinds[i], ParticleKind::Gas | ParticleKind::Sink) {
            store.density_done[i] = false;
        }
    }
    let mut left = vec![0.0 as Real; n];
    let mut right = vec![0.0 as Real; n];

    let mut stats = DensityStats::default();
    let mut iter: u32 = 0;

    // repeat the whole sweep for particles that did not find an
    // acceptable number of neighbours
    loop {
        let visitor = DensityVisitor { cfg, observer };
        let walk = run_walk(&visitor, store, grid, boxm, domains, comm, cfg)?;
        stats.walk.sub_passes += walk.sub_passes;
        stats.walk.exported += walk.exported;
        stats.walk.imported += walk.imported;

        let queue: Vec<usize> = (0..n).filter(|&i| visitor.is_active(store, i)).collect();
        let mut npleft: i64 = 0;
        for &p in &queue {
            post_process(store, p, cfg);
            let done = update_smoothing_length(store, p, &mut left, &mut right, cfg)?;
            if !done {
                npleft += 1;
                if iter + 10 >= cfg.max_iter {
                    log::debug!("slow neighbour convergence: {}", diagnostic(store, p, &left, &right));
                }
            }
        }

        let ntot = comm.allreduce_sum_i64(npleft);
        if ntot == 0 {
            break;
        }
        iter += 1;
        log::info!("ngb iteration {}: need to repeat for {} particles", iter, ntot);
        if iter > cfg.max_iter {
            let stuck: Vec<ConvergenceDiagnostic> = (0..n)
                .filter(|&i| store.active[i] && !store.density_done[i] && matches!(store.kinds[i], ParticleKind::Gas | ParticleKind::Sink))
                .map(|i| diagnostic(store, i, &left, &right))
                .collect();
            return Err(CoreError::Convergence {
                iterations: iter,
                count: stuck.len(),
                stuck,
            });
        }
    }

    stats.iterations = iter;
    Ok(stats)
}

fn diagnostic(store: &ParticleStore, i: usize, left: &[Real], right: &[Real]) -> ConvergenceDiagnostic {
    ConvergenceDiagnostic {
        id: store.ids[i],
        hsml: store.hsml[i],
        left: left[i],
        right: right[i],
        num_ngb: store.hydro.num_ngb[i],
        position: store.positions[i],
    }
}
