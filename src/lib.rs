//! SPH density and gradient computation for particle-based cosmological
//! hydro simulations.
//!
//! The crate implements the two tightly coupled "hydro loops" of an SPH
//! engine: the density loop, which sums kernel-weighted neighbor
//! contributions and adapts each particle's smoothing length until its
//! effective neighbor count sits inside a target tolerance, and the
//! gradient loop, which assembles second-order accurate, slope-limited
//! gradients of density, pressure and velocity from the same neighbor
//! topology.
//!
//! Both loops run on top of a generic tree-walk driver
//! ([`sph::treewalk::run_walk`]) that handles local evaluation, export of
//! queries to peer ranks through a bounded staging buffer, and reduction
//! of returned partial results. Single-process runs use
//! [`sph::SoloComm`]; [`sph::ThreadComm`] drives several ranks on
//! threads for testing and in-process clustering.

#[macro_use]
extern crate microprofile;

pub mod sph;
pub mod units;
