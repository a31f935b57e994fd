use super::particles::{KindMask, ParticleStore};
use super::periodic::PeriodicBox;
use crate::units::{Point, Real};

pub type ParticleIndex = u32;
pub type CellIndex = u32;

/// Candidates are handed back in batches of roughly this size; the
/// caller keeps calling [`NeighborGrid::find_neighbors`] with the same
/// cursor until it reports no more work.
pub const NGB_CHUNK: usize = 256;

/// How a ball query interprets the search radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Candidates within the target's own search radius.
    Ball,
    /// Candidates within the target's radius or their own smoothing
    /// length, whichever reaches further. Used by pairwise-symmetric
    /// walks; the effective query window folds in the grid's hmax.
    Pairs,
}

/// Resumable position within a ball query, at cell granularity.
///
/// A walk that is interrupted stores the cursor and continues from the
/// next unvisited cell later; already-delivered candidates are never
/// handed out twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NgbCursor {
    next_cell: u32,
}

#[derive(Copy, Clone)]
struct Cell {
    first_particle: usize,
    cidx: CellIndex,
}

/// Uniform cell grid over the periodic box, the spatial index the
/// neighbor loops walk. Particle indices are sorted by cell id with a
/// compact cell directory on top, so a ball query touches only cells
/// overlapping the ball.
pub struct NeighborGrid {
    n_axis: usize,
    cell_size_inv: Real,
    box_side: Real,
    sorted_indices: Vec<ParticleIndex>,
    cells: Vec<Cell>,
    global_hmax: Real,
}

const MAX_CELLS_PER_AXIS: usize = 64;

impl NeighborGrid {
    /// Builds the grid for the local particle set. `cell_size` is a hint;
    /// the cell count per axis is clamped so the directory stays small,
    /// and queries remain correct for any search radius regardless of
    /// the chosen size.
    pub fn build(store: &ParticleStore, boxm: &PeriodicBox, cell_size: Real) -> NeighborGrid {
        scope!("NeighborGrid", "build");
        assert!(cell_size > 0.0, "cell size must be positive");

        let side = boxm.side();
        let n_axis = ((side / cell_size).floor() as usize).clamp(1, MAX_CELLS_PER_AXIS);
        let cell_size_inv = n_axis as Real / side;

        let mut grid = NeighborGrid {
            n_axis,
            cell_size_inv,
            box_side: side,
            sorted_indices: Vec::with_capacity(store.len()),
            cells: Vec::new(),
            global_hmax: store.max_hsml(),
        };

        let mut keyed: Vec<(CellIndex, ParticleIndex)> = store
            .positions
            .iter()
            .enumerate()
            .map(|(i, &p)| (grid.position_to_cidx(boxm, p), i as ParticleIndex))
            .collect();
        keyed.sort_unstable();

        let mut prev_cidx = CellIndex::MAX;
        for (slot, &(cidx, pidx)) in keyed.iter().enumerate() {
            if cidx != prev_cidx {
                grid.cells.push(Cell {
                    first_particle: slot,
                    cidx,
                });
                prev_cidx = cidx;
            }
            grid.sorted_indices.push(pidx);
        }
        // sentinel cell
        grid.cells.push(Cell {
            first_particle: keyed.len(),
            cidx: CellIndex::MAX,
        });

        grid
    }

    /// Largest smoothing length of any indexed particle.
    #[inline]
    pub fn global_hmax(&self) -> Real {
        self.global_hmax
    }

    #[inline]
    fn axis_cell(&self, boxm: &PeriodicBox, x: Real) -> usize {
        let wrapped = x.rem_euclid(boxm.side());
        ((wrapped * self.cell_size_inv) as usize).min(self.n_axis - 1)
    }

    #[inline]
    fn position_to_cidx(&self, boxm: &PeriodicBox, p: Point) -> CellIndex {
        let ix = self.axis_cell(boxm, p.x);
        let iy = self.axis_cell(boxm, p.y);
        let iz = self.axis_cell(boxm, p.z);
        ((ix * self.n_axis + iy) * self.n_axis + iz) as CellIndex
    }

    // finds the array index of the first cell with an equal or bigger CellIndex
    fn find_next_cell(cells: &[Cell], cidx: CellIndex) -> usize {
        const LINEAR_SEARCH_THRESHHOLD: usize = 16;
        let mut min = 0;
        let mut max = cells.len(); // exclusive
        let mut range = max - min;
        while range > LINEAR_SEARCH_THRESHHOLD {
            range /= 2;
            let mid = min + range;
            match cells[mid].cidx.cmp(&cidx) {
                std::cmp::Ordering::Greater => max = mid,
                std::cmp::Ordering::Less => min = mid,
                std::cmp::Ordering::Equal => return mid,
            }
        }
        for pos in min..max {
            if cells[pos].cidx >= cidx {
                return pos;
            }
        }
        max
    }

    /// Per-axis range of cell coordinates covered by the ball, as a
    /// (start, count) pair. The count saturates at the axis length so a
    /// wrapping range never visits a cell twice.
    fn axis_range(&self, center: Real, radius: Real) -> (i64, usize) {
        let lo = ((center - radius) * self.cell_size_inv).floor() as i64;
        let hi = ((center + radius) * self.cell_size_inv).floor() as i64;
        let count = ((hi - lo + 1) as usize).min(self.n_axis);
        (lo, count)
    }

    /// Appends indices of candidate neighbors around `center` whose cells
    /// intersect the search ball, filtered by `mask`, starting at
    /// `cursor` and pausing once at least [`NGB_CHUNK`] candidates have
    /// been delivered. Returns true while more cells remain; the cursor
    /// is advanced so the next call resumes where this one stopped.
    pub fn find_neighbors(
        &self,
        store: &ParticleStore,
        boxm: &PeriodicBox,
        center: Point,
        radius: Real,
        mask: KindMask,
        cursor: &mut NgbCursor,
        out: &mut Vec<ParticleIndex>,
    ) -> bool {
        if self.sorted_indices.is_empty() {
            return false;
        }

        let (lo_x, n_x) = self.axis_range(center.x, radius);
        let (lo_y, n_y) = self.axis_range(center.y, radius);
        let (lo_z, n_z) = self.axis_range(center.z, radius);
        let total = (n_x * n_y * n_z) as u32;

        let cell_extent = self.box_side / self.n_axis as Real;
        let n = self.n_axis as i64;
        let radius_sq = radius * radius;

        let mut t = cursor.next_cell;
        while t < total {
            let tz = (t as usize) % n_z;
            let ty = ((t as usize) / n_z) % n_y;
            let tx = (t as usize) / (n_z * n_y);

            let cx = (lo_x + tx as i64).rem_euclid(n) as usize;
            let cy = (lo_y + ty as i64).rem_euclid(n) as usize;
            let cz = (lo_z + tz as i64).rem_euclid(n) as usize;
            let cidx = ((cx * self.n_axis + cy) * self.n_axis + cz) as CellIndex;

            let arrayidx = Self::find_next_cell(&self.cells, cidx);
            if arrayidx < self.cells.len() - 1 && self.cells[arrayidx].cidx == cidx {
                let mut dist_sq = 0.0;
                for (k, c) in [cx, cy, cz].into_iter().enumerate() {
                    let lo = c as Real * cell_extent;
                    let d = boxm.axis_distance_to_interval(center[k], lo, lo + cell_extent);
                    dist_sq += d * d;
                }
                if dist_sq <= radius_sq {
                    let first = self.cells[arrayidx].first_particle;
                    let last = self.cells[arrayidx + 1].first_particle;
                    for &pidx in &self.sorted_indices[first..last] {
                        if mask.contains(store.kinds[pidx as usize]) {
                            out.push(pidx);
                        }
                    }
                }
            }

            t += 1;
            if out.len() >= NGB_CHUNK && t < total {
                cursor.next_cell = t;
                return true;
            }
        }
        cursor.next_cell = total;
        false
    }
}
