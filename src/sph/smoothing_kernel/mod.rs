/// Smoothing kernels.
pub use self::cubic::CubicSpline;
pub use self::kernel::Kernel;
pub use self::wendland_c2::WendlandC2;

#[macro_use]
mod kernel;
mod cubic;
mod wendland_c2;
