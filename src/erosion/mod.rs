//! Surface-lowering processes.
//!
//! - [`stream_power`]: implicit detachment-limited fluvial incision over a routed flow graph.
//! - [`diffusion`]: explicit hillslope diffusion with automatic substepping, linear or
//!   Roering nonlinear.

pub mod diffusion;
pub mod stream_power;

pub use diffusion::{DiffusionLaw, DiffusionReport, LinearDiffuser};
pub use stream_power::{ErosionReport, StreamPowerEroder};
