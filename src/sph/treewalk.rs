use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use cgmath::prelude::*;

use super::comm::Communicator;
use super::config::SimulationConfig;
use super::domain::DomainBounds;
use super::error::CoreError;
use super::neighbor_grid::{NeighborGrid, NgbCursor, SearchMode, NGB_CHUNK};
use super::particles::{KindMask, ParticleStore};
use super::periodic::PeriodicBox;
use crate::units::{Point, Real, Vector};

/// How a partial result is folded into the target particle's state.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ReduceMode {
    /// The local evaluation of the current walk: overwrite whatever a
    /// previous walk left behind.
    Primary,
    /// A result returned from a peer rank: add on top.
    Accumulate,
}

/// One specific neighbor computation run by [`run_walk`]: the density
/// loop and the gradient loop each implement this.
///
/// The driver owns scheduling, the neighbor iteration, export/import of
/// queries and the reduction of results; the visitor contributes the
/// physics. Writes to the target particle go through the accumulated
/// [`TreeWalkVisitor::Result`]; writes to local *neighbor* particles
/// (pairwise-symmetric updates) go through the per-worker
/// [`TreeWalkVisitor::Stage`], which the driver merges single-threadedly
/// after each parallel phase.
pub trait TreeWalkVisitor: Sync {
    type Query: Clone + Send + Sync + 'static;
    type Result: Clone + Default + Send + 'static;
    /// Per-target state built once per neighbor iteration: kernel
    /// descriptor, squared radii.
    type TargetScratch;
    /// Per-worker staging for symmetric writes.
    type Stage: Send;

    fn is_active(&self, store: &ParticleStore, i: usize) -> bool;
    fn fill_query(&self, store: &ParticleStore, i: usize) -> Self::Query;
    fn query_center(query: &Self::Query) -> Point;
    fn begin_target(&self, query: &Self::Query) -> Self::TargetScratch;
    fn search_radius(&self, scratch: &Self::TargetScratch) -> Real;
    fn search_mode(&self) -> SearchMode;
    fn kind_mask(&self) -> KindMask;
    fn make_stage(&self, n_local: usize) -> Self::Stage;

    #[allow(clippy::too_many_arguments)]
    fn visit_pair(
        &self,
        query: &Self::Query,
        scratch: &Self::TargetScratch,
        store: &ParticleStore,
        j: usize,
        dp: Vector,
        r2: Real,
        out: &mut Self::Result,
        stage: &mut Self::Stage,
    );

    fn reduce(&self, store: &mut ParticleStore, i: usize, result: &Self::Result, mode: ReduceMode);
    fn merge_stage(&self, store: &mut ParticleStore, stage: Self::Stage);
}

/// Query as shipped to a peer rank: the visitor payload plus the cursor
/// into the receiver's spatial index at which the walk starts.
#[derive(Clone)]
struct WireQuery<Q> {
    query: Q,
    cursor: NgbCursor,
}

#[derive(Copy, Clone, Default)]
struct TargetProgress {
    local_done: bool,
    /// Number of candidate peer ranks already exported to.
    next_rank: u32,
    complete: bool,
}

struct ExportItem<Q> {
    target: usize,
    dest: usize,
    query: Q,
}

struct WorkerOutput<Q, R, S> {
    worker: usize,
    primary: Vec<(usize, R)>,
    exports: Vec<ExportItem<Q>>,
    progress: Vec<(usize, TargetProgress)>,
    stage: S,
}

#[derive(Debug, Default, Clone)]
pub struct WalkStats {
    pub sub_passes: u32,
    pub exported: u64,
    pub imported: u64,
}

/// Evaluates one query against the local particle set, chunk by chunk
/// through the grid cursor.
#[allow(clippy::too_many_arguments)]
fn walk_local<V: TreeWalkVisitor>(
    visitor: &V,
    store: &ParticleStore,
    grid: &NeighborGrid,
    boxm: &PeriodicBox,
    query: &V::Query,
    scratch: &V::TargetScratch,
    cursor: &mut NgbCursor,
    out: &mut V::Result,
    stage: &mut V::Stage,
) {
    let center = V::query_center(query);
    let radius = visitor.search_radius(scratch);
    let mode = visitor.search_mode();
    let window = effective_window(radius, mode, grid);
    let mask = visitor.kind_mask();

    let mut candidates = Vec::with_capacity(NGB_CHUNK);
    loop {
        let more = grid.find_neighbors(store, boxm, center, window, mask, cursor, &mut candidates);
        for &j in &candidates {
            let j = j as usize;
            let dp = boxm.separation(center, store.positions[j]);
            let r2 = dp.magnitude2();
            let admit = match mode {
                SearchMode::Ball => r2 <= radius * radius,
                SearchMode::Pairs => {
                    let hj = store.hsml[j];
                    r2 <= radius * radius || r2 <= hj * hj
                }
            };
            if admit {
                visitor.visit_pair(query, scratch, store, j, dp, r2, out, stage);
            }
        }
        candidates.clear();
        if !more {
            break;
        }
    }
}

#[inline]
fn effective_window(radius: Real, mode: SearchMode, grid: &NeighborGrid) -> Real {
    match mode {
        SearchMode::Ball => radius,
        SearchMode::Pairs => radius.max(grid.global_hmax()),
    }
}

/// Runs one collective neighbor walk over all active targets.
///
/// Local targets are evaluated by a worker pool popping indices off a
/// shared cursor. Targets whose search ball reaches a peer's domain are
/// additionally exported; the export staging buffer is bounded by the
/// configured byte budget, and a target that cannot stage all its
/// exports records its progress and finishes in a later sub-pass. Each
/// sub-pass ends with the pairwise query/result exchange and a global
/// count of unfinished targets; the walk returns when that count drops
/// to zero on every rank.
pub fn run_walk<V, C>(
    visitor: &V,
    store: &mut ParticleStore,
    grid: &NeighborGrid,
    boxm: &PeriodicBox,
    domains: &[DomainBounds],
    comm: &mut C,
    cfg: &SimulationConfig,
) -> Result<WalkStats, CoreError>
where
    V: TreeWalkVisitor,
    C: Communicator,
{
    scope!("TreeWalk", "run_walk");

    let n_ranks = comm.n_ranks();
    let my_rank = comm.rank();
    if domains.len() != n_ranks {
        return Err(CoreError::Invariant(format!(
            "domain table has {} entries for {} ranks",
            domains.len(),
            n_ranks
        )));
    }

    let queue: Vec<usize> = (0..store.len()).filter(|&i| visitor.is_active(store, i)).collect();
    let mut progress = vec![TargetProgress::default(); queue.len()];

    let entry_size = mem::size_of::<WireQuery<V::Query>>()
        + mem::size_of::<V::Result>()
        + mem::size_of::<ExportItem<V::Query>>();
    let export_capacity = cfg.buffer_size_mib * 1024 * 1024 / entry_size;
    if n_ranks > 1 && export_capacity == 0 {
        return Err(CoreError::Resource {
            budget_mib: cfg.buffer_size_mib,
        });
    }

    let n_local = store.len();
    let n_workers = rayon::current_num_threads().max(1);
    let mut stats = WalkStats::default();

    loop {
        stats.sub_passes += 1;

        // primary phase: local targets, exports staged per worker
        let staged = AtomicUsize::new(0);
        let target_cursor = AtomicUsize::new(0);
        let buffer_full = AtomicBool::new(false);
        let collected: Mutex<Vec<WorkerOutput<V::Query, V::Result, V::Stage>>> =
            Mutex::new(Vec::with_capacity(n_workers));
        {
            scope!("TreeWalk", "primary");
            let store_ref: &ParticleStore = store;
            let progress_ref: &[TargetProgress] = &progress;
            let queue_ref: &[usize] = &queue;
            let collected_ref = &collected;
            let staged_ref = &staged;
            let cursor_ref = &target_cursor;
            let full_ref = &buffer_full;
            rayon::scope(|s| {
                for worker in 0..n_workers {
                    s.spawn(move |_| {
                        let mut out = WorkerOutput {
                            worker,
                            primary: Vec::new(),
                            exports: Vec::new(),
                            progress: Vec::new(),
                            stage: visitor.make_stage(n_local),
                        };
                        loop {
                            let qi = cursor_ref.fetch_add(1, Ordering::Relaxed);
                            if qi >= queue_ref.len() {
                                break;
                            }
                            let mut prog = progress_ref[qi];
                            if prog.complete {
                                continue;
                            }
                            let i = queue_ref[qi];
                            let query = visitor.fill_query(store_ref, i);
                            let scratch = visitor.begin_target(&query);

                            if !prog.local_done {
                                let mut result = V::Result::default();
                                let mut ncursor = NgbCursor::default();
                                walk_local(
                                    visitor,
                                    store_ref,
                                    grid,
                                    boxm,
                                    &query,
                                    &scratch,
                                    &mut ncursor,
                                    &mut result,
                                    &mut out.stage,
                                );
                                out.primary.push((i, result));
                                prog.local_done = true;
                            }

                            let mut blocked = false;
                            if n_ranks > 1 {
                                let center = V::query_center(&query);
                                let window =
                                    effective_window(visitor.search_radius(&scratch), visitor.search_mode(), grid);
                                let mut rank_idx = 0u32;
                                for (dest, bounds) in domains.iter().enumerate() {
                                    if dest == my_rank || !bounds.intersects_ball(boxm, center, window) {
                                        continue;
                                    }
                                    if rank_idx < prog.next_rank {
                                        // exported in an earlier sub-pass
                                        rank_idx += 1;
                                        continue;
                                    }
                                    if staged_ref.fetch_add(1, Ordering::Relaxed) >= export_capacity {
                                        staged_ref.fetch_sub(1, Ordering::Relaxed);
                                        full_ref.store(true, Ordering::Relaxed);
                                        blocked = true;
                                        break;
                                    }
                                    out.exports.push(ExportItem {
                                        target: i,
                                        dest,
                                        query: query.clone(),
                                    });
                                    rank_idx += 1;
                                    prog.next_rank = rank_idx;
                                }
                            }
                            prog.complete = !blocked;
                            out.progress.push((qi, prog));
                        }
                        collected_ref.lock().unwrap().push(out);
                    });
                }
            });
        }

        let mut outputs = collected.into_inner().unwrap();
        outputs.sort_by_key(|o| o.worker);

        let mut exports: Vec<ExportItem<V::Query>> = Vec::new();
        let mut primaries_this_pass = 0usize;
        for output in outputs {
            for (qi, p) in output.progress {
                progress[qi] = p;
            }
            visitor.merge_stage(store, output.stage);
            primaries_this_pass += output.primary.len();
            for (i, result) in output.primary {
                visitor.reduce(store, i, &result, ReduceMode::Primary);
            }
            exports.extend(output.exports);
        }

        // ship the staged queries out
        let mut send_queries: Vec<Vec<WireQuery<V::Query>>> = (0..n_ranks).map(|_| Vec::new()).collect();
        let mut send_targets: Vec<Vec<usize>> = (0..n_ranks).map(|_| Vec::new()).collect();
        for item in exports {
            send_targets[item.dest].push(item.target);
            send_queries[item.dest].push(WireQuery {
                query: item.query,
                cursor: NgbCursor::default(),
            });
        }
        let send_counts: Vec<u64> = send_queries.iter().map(|v| v.len() as u64).collect();
        let staged_this_pass: u64 = send_counts.iter().sum();
        stats.exported += staged_this_pass;

        let recv_counts = comm.alltoall_counts(&send_counts);
        let received = comm.exchange(send_queries);
        let imports: Vec<WireQuery<V::Query>> = received.into_iter().flatten().collect();
        stats.imported += imports.len() as u64;

        // secondary phase: walk the imported queries over the local set
        let mut import_results: Vec<V::Result> = vec![V::Result::default(); imports.len()];
        {
            scope!("TreeWalk", "secondary");
            let store_ref: &ParticleStore = store;
            let imports_ref: &[WireQuery<V::Query>] = &imports;
            let import_cursor = AtomicUsize::new(0);
            let collected: Mutex<Vec<(usize, Vec<(usize, V::Result)>, V::Stage)>> =
                Mutex::new(Vec::with_capacity(n_workers));
            let collected_ref = &collected;
            let cursor_ref = &import_cursor;
            rayon::scope(|s| {
                for worker in 0..n_workers {
                    s.spawn(move |_| {
                        let mut stage = visitor.make_stage(n_local);
                        let mut results = Vec::new();
                        loop {
                            let k = cursor_ref.fetch_add(1, Ordering::Relaxed);
                            if k >= imports_ref.len() {
                                break;
                            }
                            let wire = &imports_ref[k];
                            let scratch = visitor.begin_target(&wire.query);
                            let mut result = V::Result::default();
                            let mut ncursor = wire.cursor;
                            walk_local(
                                visitor,
                                store_ref,
                                grid,
                                boxm,
                                &wire.query,
                                &scratch,
                                &mut ncursor,
                                &mut result,
                                &mut stage,
                            );
                            results.push((k, result));
                        }
                        collected_ref.lock().unwrap().push((worker, results, stage));
                    });
                }
            });
            let mut outputs = collected.into_inner().unwrap();
            outputs.sort_by_key(|entry| entry.0);
            for (_, results, stage) in outputs {
                visitor.merge_stage(store, stage);
                for (k, result) in results {
                    import_results[k] = result;
                }
            }
        }

        // return the results to the exporting ranks, in arrival order
        let mut reply: Vec<Vec<V::Result>> = (0..n_ranks).map(|_| Vec::new()).collect();
        {
            let mut offset = 0usize;
            for (src, &count) in recv_counts.iter().enumerate() {
                let count = count as usize;
                reply[src] = import_results[offset..offset + count].to_vec();
                offset += count;
            }
        }
        let returned = comm.exchange(reply);

        for dest in 0..n_ranks {
            let targets = &send_targets[dest];
            let results = &returned[dest];
            if targets.len() != results.len() {
                return Err(CoreError::Invariant(format!(
                    "rank {} returned {} results for {} queries",
                    dest,
                    results.len(),
                    targets.len()
                )));
            }
            for (&target, result) in targets.iter().zip(results.iter()) {
                visitor.reduce(store, target, result, ReduceMode::Accumulate);
            }
        }

        let remaining = progress.iter().filter(|p| !p.complete).count();
        let global_remaining = comm.allreduce_sum_i64(remaining as i64);
        if global_remaining == 0 {
            break;
        }
        if remaining > 0 && staged_this_pass == 0 && primaries_this_pass == 0 {
            return Err(CoreError::Resource {
                budget_mib: cfg.buffer_size_mib,
            });
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sph::comm::{SoloComm, ThreadComm};
    use crate::units::Vector;
    use rand::prelude::*;

    /// Toy visitor counting neighbors inside the search ball. The query
    /// carries dead weight so tests can shrink the export capacity to a
    /// handful of entries and force multi-pass staging.
    struct CountingVisitor<const PAD: usize>;

    #[derive(Clone)]
    struct CountQuery<const PAD: usize> {
        pos: Point,
        radius: Real,
        _pad: [u8; PAD],
    }

    impl<const PAD: usize> TreeWalkVisitor for CountingVisitor<PAD> {
        type Query = CountQuery<PAD>;
        type Result = f64;
        type TargetScratch = Real;
        type Stage = ();

        fn is_active(&self, store: &ParticleStore, i: usize) -> bool {
            store.active[i]
        }

        fn fill_query(&self, store: &ParticleStore, i: usize) -> Self::Query {
            CountQuery {
                pos: store.positions[i],
                radius: store.hsml[i],
                _pad: [0; PAD],
            }
        }

        fn query_center(query: &Self::Query) -> Point {
            query.pos
        }

        fn begin_target(&self, query: &Self::Query) -> Real {
            query.radius
        }

        fn search_radius(&self, scratch: &Real) -> Real {
            *scratch
        }

        fn search_mode(&self) -> SearchMode {
            SearchMode::Ball
        }

        fn kind_mask(&self) -> KindMask {
            KindMask::ALL
        }

        fn make_stage(&self, _n_local: usize) -> Self::Stage {}

        fn visit_pair(
            &self,
            _query: &Self::Query,
            _scratch: &Real,
            _store: &ParticleStore,
            _j: usize,
            _dp: Vector,
            _r2: Real,
            out: &mut f64,
            _stage: &mut Self::Stage,
        ) {
            *out += 1.0;
        }

        fn reduce(&self, store: &mut ParticleStore, i: usize, result: &f64, mode: ReduceMode) {
            match mode {
                ReduceMode::Primary => store.hydro.num_ngb[i] = *result,
                ReduceMode::Accumulate => store.hydro.num_ngb[i] += *result,
            }
        }

        fn merge_stage(&self, _store: &mut ParticleStore, _stage: Self::Stage) {}
    }

    fn random_positions(n: usize, side: Real, seed: u64) -> Vec<Point> {
        let mut rng: rand::rngs::SmallRng = rand::SeedableRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                Point::new(
                    rng.gen::<Real>() * side,
                    rng.gen::<Real>() * side,
                    rng.gen::<Real>() * side,
                )
            })
            .collect()
    }

    fn store_from(positions: &[Point], radius: Real, first_id: u64) -> ParticleStore {
        let mut store = ParticleStore::new();
        for (k, &p) in positions.iter().enumerate() {
            store.push_gas(first_id + k as u64, p, Vector::zero(), 1.0, radius, 1.0);
        }
        store
    }

    fn brute_force_count(all: &[Point], center: Point, radius: Real, boxm: &PeriodicBox) -> f64 {
        all.iter()
            .filter(|&&p| boxm.separation(center, p).magnitude2() <= radius * radius)
            .count() as f64
    }

    #[test]
    fn solo_walk_counts_every_neighbor_once() {
        let boxm = PeriodicBox::new(1.0);
        let positions = random_positions(300, 1.0, 11);
        let mut store = store_from(&positions, 0.2, 0);
        let grid = NeighborGrid::build(&store, &boxm, 0.2);
        let cfg = SimulationConfig::default();
        let domains = [DomainBounds::enclosing(&store.positions)];
        let mut comm = SoloComm;

        let stats = run_walk(&CountingVisitor::<0>, &mut store, &grid, &boxm, &domains, &mut comm, &cfg).unwrap();
        assert_eq!(stats.sub_passes, 1);
        assert_eq!(stats.exported, 0);

        for i in 0..store.len() {
            let expected = brute_force_count(&positions, positions[i], 0.2, &boxm);
            assert_eq!(store.hydro.num_ngb[i], expected, "count mismatch at {}", i);
        }
    }

    #[test]
    fn exports_resume_across_sub_passes_when_the_buffer_is_tiny() {
        const PAD: usize = 100_000;
        let boxm = PeriodicBox::new(1.0);
        let radius = 0.4;
        let all = random_positions(80, 1.0, 23);
        let halves: (Vec<Point>, Vec<Point>) = (
            all.iter().cloned().filter(|p| p.x < 0.5).collect(),
            all.iter().cloned().filter(|p| p.x >= 0.5).collect(),
        );
        assert!(!halves.0.is_empty() && !halves.1.is_empty());

        let cfg = SimulationConfig {
            buffer_size_mib: 1,
            ..Default::default()
        };
        let domains = vec![
            DomainBounds::enclosing(&halves.0),
            DomainBounds::enclosing(&halves.1),
        ];

        let comms = ThreadComm::cluster(2);
        let parts = [halves.0.clone(), halves.1.clone()];
        let handles: Vec<_> = comms
            .into_iter()
            .zip(parts.into_iter())
            .map(|(mut comm, positions)| {
                let cfg = cfg.clone();
                let domains = domains.clone();
                std::thread::spawn(move || {
                    let mut store = store_from(&positions, radius, 0);
                    let grid = NeighborGrid::build(&store, &boxm, radius);
                    let stats =
                        run_walk(&CountingVisitor::<PAD>, &mut store, &grid, &boxm, &domains, &mut comm, &cfg)
                            .unwrap();
                    (store, stats)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // a 1 MiB budget holds only a handful of 100 kB queries, so the
        // walk must have taken several passes to drain the export list
        assert!(results.iter().any(|(_, stats)| stats.sub_passes > 1));

        for (store, _) in &results {
            for i in 0..store.len() {
                let expected = brute_force_count(&all, store.positions[i], radius, &boxm);
                assert_eq!(store.hydro.num_ngb[i], expected);
            }
        }
    }

    #[test]
    fn a_buffer_too_small_for_one_query_is_fatal() {
        const PAD: usize = 2 * 1024 * 1024;
        let boxm = PeriodicBox::new(1.0);
        let halves: (Vec<Point>, Vec<Point>) = (
            vec![Point::new(0.3, 0.5, 0.5), Point::new(0.4, 0.5, 0.5)],
            vec![Point::new(0.6, 0.5, 0.5), Point::new(0.7, 0.5, 0.5)],
        );
        let cfg = SimulationConfig {
            buffer_size_mib: 1,
            ..Default::default()
        };
        let domains = vec![
            DomainBounds::enclosing(&halves.0),
            DomainBounds::enclosing(&halves.1),
        ];

        let comms = ThreadComm::cluster(2);
        let parts = [halves.0.clone(), halves.1.clone()];
        let handles: Vec<_> = comms
            .into_iter()
            .zip(parts.into_iter())
            .map(|(mut comm, positions)| {
                let cfg = cfg.clone();
                let domains = domains.clone();
                std::thread::spawn(move || {
                    let mut store = store_from(&positions, 0.4, 0);
                    let grid = NeighborGrid::build(&store, &boxm, 0.4);
                    run_walk(&CountingVisitor::<PAD>, &mut store, &grid, &boxm, &domains, &mut comm, &cfg)
                        .map(|_| ())
                })
            })
            .collect();
        for h in handles {
            let outcome = h.join().unwrap();
            assert!(matches!(outcome, Err(CoreError::Resource { .. })));
        }
    }
}
