//! Hillslope diffusion, `dz/dt = div(k grad z)`, on the 5-point stencil.
//!
//! Fluxes are evaluated per link, so a closed neighbour simply contributes no link and the
//! edge is zero-flux. Only core nodes are updated; fixed-value nodes are held and
//! fixed-gradient nodes are re-imposed after every substep.
//!
//! The explicit scheme is stable for `dt <= 1 / (2 k (1/dx^2 + 1/dy^2))`, which reduces to
//! `dx^2 / (4 k)` on square cells. A step longer than that is split into equal substeps.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{optional, require, ModelParams, ParamMap};
use crate::error::{LemError, Result};
use crate::grid::{Connectivity, RasterGrid};

/// Transport law.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum DiffusionLaw {
    /// Flux proportional to slope.
    Linear,
    /// Roering et al. (1999): `q = k S / (1 - (S/Sc)^2)`.
    Nonlinear { critical_slope: f64 },
}

/// Largest `(S/Sc)^2` used in the nonlinear law; keeps the effective diffusivity finite.
const MAX_SLOPE_RATIO_SQ: f64 = 0.99;

/// Summary of one diffusion call.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DiffusionReport {
    pub substeps: usize,
    pub substep_dt: f64,
}

/// Hillslope diffuser.
#[derive(Clone, Debug)]
pub struct LinearDiffuser {
    /// Diffusivity `k` [L^2/T].
    pub kappa: f64,
    pub law: DiffusionLaw,
}

impl LinearDiffuser {
    pub fn new(kappa: f64) -> Result<Self> {
        if !(kappa.is_finite() && kappa >= 0.0) {
            return Err(LemError::invalid("linear_diffusivity", kappa, "must be finite and >= 0"));
        }
        Ok(Self { kappa, law: DiffusionLaw::Linear })
    }

    pub fn nonlinear(kappa: f64, critical_slope: f64) -> Result<Self> {
        if !(critical_slope.is_finite() && critical_slope > 0.0) {
            return Err(LemError::invalid("critical_slope", critical_slope, "must be finite and > 0"));
        }
        Ok(Self { law: DiffusionLaw::Nonlinear { critical_slope }, ..Self::new(kappa)? })
    }

    /// Reads `linear_diffusivity`, plus `critical_slope` when present.
    pub fn from_map(map: &ParamMap) -> Result<Self> {
        let kappa = require(map, "linear_diffusivity")?;
        match optional(map, "critical_slope", f64::INFINITY) {
            sc if sc.is_infinite() => Self::new(kappa),
            sc => Self::nonlinear(kappa, sc),
        }
    }

    pub fn from_params(params: &ModelParams) -> Result<Self> {
        Self::new(params.linear_diffusivity)
    }

    /// Largest stable explicit step for diffusivity `k` on this grid.
    pub fn max_stable_dt(grid: &RasterGrid, k: f64) -> f64 {
        if k <= 0.0 {
            return f64::INFINITY;
        }
        let inv = 1.0 / (grid.dx() * grid.dx()) + 1.0 / (grid.dy() * grid.dy());
        1.0 / (2.0 * k * inv)
    }

    /// Largest effective diffusivity over the current surface.
    fn peak_diffusivity(&self, grid: &RasterGrid) -> f64 {
        match self.law {
            DiffusionLaw::Linear => self.kappa,
            DiffusionLaw::Nonlinear { critical_slope } => {
                let z = grid.elevation();
                let max_slope = grid
                    .core_nodes()
                    .iter()
                    .flat_map(|&i| {
                        grid.neighbor_iter(i, Connectivity::D4)
                            .map(move |nb| ((z[nb.node] - z[i]) / nb.distance).abs())
                    })
                    .fold(0.0f64, f64::max);
                let ratio_sq = (max_slope / critical_slope).powi(2).min(MAX_SLOPE_RATIO_SQ);
                self.kappa / (1.0 - ratio_sq)
            }
        }
    }

    /// Diffuse over `dt`, substepping as needed.
    pub fn run_one_step(&self, grid: &mut RasterGrid, dt: f64) -> Result<DiffusionReport> {
        if !(dt.is_finite() && dt >= 0.0) {
            return Err(LemError::invalid("dt", dt, "must be finite and >= 0"));
        }
        if self.kappa == 0.0 || dt == 0.0 {
            return Ok(DiffusionReport { substeps: 0, substep_dt: 0.0 });
        }

        let dt_max = Self::max_stable_dt(grid, self.peak_diffusivity(grid));
        let substeps = ((dt / dt_max).ceil() as usize).max(1);
        let sub_dt = dt / substeps as f64;

        let mut delta = vec![0.0; grid.len()];
        for _ in 0..substeps {
            self.substep(grid, sub_dt, &mut delta);
            let z = grid.elevation_mut();
            for (zi, d) in z.iter_mut().zip(&delta) {
                *zi += d;
            }
            grid.update_fixed_gradient_nodes();
        }

        if let Some(i) = grid.elevation().iter().position(|v| !v.is_finite()) {
            return Err(LemError::NumericalInstability {
                stage: "diffuse",
                detail: format!("non-finite elevation at node {i} after {substeps} substeps"),
            });
        }

        debug!(substeps, sub_dt, "hillslope diffusion");
        Ok(DiffusionReport { substeps, substep_dt: sub_dt })
    }

    /// Elevation change per node over one stable substep.
    fn substep(&self, grid: &RasterGrid, dt: f64, delta: &mut [f64]) {
        let z = grid.elevation();
        let kappa = self.kappa;
        let law = self.law;

        delta.par_iter_mut().enumerate().for_each(|(i, d)| {
            *d = 0.0;
            if !grid.status(i).is_core() {
                return;
            }
            let mut div = 0.0;
            for nb in grid.neighbor_iter(i, Connectivity::D4) {
                let gradient = (z[nb.node] - z[i]) / nb.distance;
                let k = match law {
                    DiffusionLaw::Linear => kappa,
                    DiffusionLaw::Nonlinear { critical_slope } => {
                        let ratio_sq = (gradient / critical_slope).powi(2).min(MAX_SLOPE_RATIO_SQ);
                        kappa / (1.0 - ratio_sq)
                    }
                };
                // D4 link length is dx along a row and dy along a column.
                div += k * gradient / nb.distance;
            }
            *d = dt * div;
        });
    }
}
