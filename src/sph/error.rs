use thiserror::Error;

use crate::units::{Point, Real};

/// Per-particle state dumped when the smoothing-length iteration gives up.
#[derive(Debug, Clone)]
pub struct ConvergenceDiagnostic {
    pub id: u64,
    pub hsml: Real,
    pub left: Real,
    pub right: Real,
    pub num_ngb: Real,
    pub position: Point,
}

impl std::fmt::Display for ConvergenceDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "id={} hsml={:.6e} left={:.6e} right={:.6e} ngb={:.3} pos=({:.4}|{:.4}|{:.4})",
            self.id, self.hsml, self.left, self.right, self.num_ngb, self.position.x, self.position.y, self.position.z
        )
    }
}

/// Errors surfaced by the density and gradient passes.
///
/// None of these are recoverable at this layer; the controlling harness
/// is expected to tear the run down after the detecting rank reports.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Parameters violate their preconditions. Detected at pass entry.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The export buffer cannot hold even a single query.
    #[error("export buffer budget of {budget_mib} MiB cannot admit a single particle")]
    Resource { budget_mib: usize },

    /// The neighbour iteration exhausted its iteration ceiling.
    #[error("neighbour iteration failed to converge after {iterations} iterations; {count} particle(s) left")]
    Convergence {
        iterations: u32,
        count: usize,
        stuck: Vec<ConvergenceDiagnostic>,
    },

    /// Internal state that can only arise from memory corruption or a
    /// logic bug.
    #[error("invariant violated: {0}")]
    Invariant(String),
}
