pub use self::comm::{Communicator, SoloComm, ThreadComm};
pub use self::config::SimulationConfig;
pub use self::density::{density_pass, density_pass_observed, DensityStats};
pub use self::domain::DomainBounds;
pub use self::error::{ConvergenceDiagnostic, CoreError};
pub use self::gradients::{gradients_pass, gradients_pass_observed, QuantSet, CONDITION_NUMBER_DANGER};
pub use self::hooks::{NullObserver, PairObserver};
pub use self::limiter::slope_limit;
pub use self::neighbor_grid::{NeighborGrid, NgbCursor, SearchMode};
pub use self::particles::{HydroFields, KindMask, ParticleKind, ParticleStore};
pub use self::periodic::PeriodicBox;
pub use self::treewalk::{run_walk, ReduceMode, TreeWalkVisitor, WalkStats};

mod comm;
mod config;
pub mod density;
mod domain;
mod error;
pub mod gradients;
mod hooks;
mod hsml;
mod limiter;
pub mod neighbor_grid;
mod particles;
mod periodic;
pub mod smoothing_kernel;
pub mod treewalk;
