//! Detachment-limited stream-power incision, `E = K A^m S^n`, solved implicitly
//! (Braun & Willett 2013).
//!
//! Nodes are visited receivers-first, so each node sees the already-updated elevation of the
//! node it drains to. For `n = 1` the update is closed-form; otherwise a bracketed Newton
//! iteration solves
//!
//! ```text
//! h - h_old + dt K A^m ((h - h_recv) / L)^n = 0,   h in [h_recv, h_old]
//! ```
//!
//! and a node that fails to converge within the iteration cap is clamped to its receiver.

use tracing::{debug, warn};

use crate::config::{optional, require, ModelParams, ParamMap};
use crate::error::{LemError, Result};
use crate::flow::FlowGraph;
use crate::grid::RasterGrid;

/// Summary of one erosion pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ErosionReport {
    /// Core nodes that were lowered.
    pub eroded_nodes: usize,
    /// Largest single-node lowering.
    pub max_erosion: f64,
    /// Eroded volume (lowering times cell area) over all core nodes.
    pub eroded_volume: f64,
    /// Nodes whose Newton solve hit the iteration cap and were clamped to their receiver.
    pub newton_fallbacks: usize,
}

/// Stream-power eroder.
#[derive(Clone, Debug)]
pub struct StreamPowerEroder {
    /// Erodibility `K`.
    pub k_sp: f64,
    /// Drainage-area exponent `m`.
    pub m_sp: f64,
    /// Slope exponent `n`.
    pub n_sp: f64,
    pub newton_tol: f64,
    pub newton_max_iter: usize,
}

impl StreamPowerEroder {
    pub fn new(k_sp: f64, m_sp: f64, n_sp: f64) -> Result<Self> {
        let eroder = Self {
            k_sp,
            m_sp,
            n_sp,
            newton_tol: 1e-10,
            newton_max_iter: 50,
        };
        eroder.validate()?;
        Ok(eroder)
    }

    /// Reads `K_sp`, `m_sp` and `n_sp`; Newton controls are optional.
    pub fn from_map(map: &ParamMap) -> Result<Self> {
        let eroder = Self {
            k_sp: require(map, "K_sp")?,
            m_sp: require(map, "m_sp")?,
            n_sp: require(map, "n_sp")?,
            newton_tol: optional(map, "newton_tol", 1e-10),
            newton_max_iter: optional(map, "newton_max_iter", 50.0).max(1.0) as usize,
        };
        eroder.validate()?;
        Ok(eroder)
    }

    pub fn from_params(params: &ModelParams) -> Result<Self> {
        let eroder = Self {
            k_sp: params.k_sp,
            m_sp: params.m_sp,
            n_sp: params.n_sp,
            newton_tol: params.newton_tol,
            newton_max_iter: params.newton_max_iter.max(1),
        };
        eroder.validate()?;
        Ok(eroder)
    }

    pub fn with_newton(mut self, tol: f64, max_iter: usize) -> Result<Self> {
        self.newton_tol = tol;
        self.newton_max_iter = max_iter.max(1);
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        let checks = [
            ("K_sp", self.k_sp, self.k_sp >= 0.0),
            ("m_sp", self.m_sp, self.m_sp >= 0.0),
            ("n_sp", self.n_sp, self.n_sp > 0.0),
            ("newton_tol", self.newton_tol, self.newton_tol > 0.0),
        ];
        for (key, v, ok) in checks {
            if !(v.is_finite() && ok) {
                return Err(LemError::invalid(key, v, "out of range"));
            }
        }
        Ok(())
    }

    #[inline]
    fn is_linear(&self) -> bool {
        (self.n_sp - 1.0).abs() < 1e-12
    }

    /// Erode over `dt` using drainage areas and receivers from `graph`.
    pub fn run_one_step(
        &self,
        grid: &mut RasterGrid,
        graph: &FlowGraph,
        dt: f64,
    ) -> Result<ErosionReport> {
        self.run_with_rainfall(grid, graph, dt, 1.0)
    }

    /// As [`run_one_step`](Self::run_one_step), with discharge `rainfall * A` in place of `A`.
    pub fn run_with_rainfall(
        &self,
        grid: &mut RasterGrid,
        graph: &FlowGraph,
        dt: f64,
        rainfall: f64,
    ) -> Result<ErosionReport> {
        if graph.len() != grid.len() {
            return Err(LemError::configuration(format!(
                "flow graph has {} nodes, grid has {}",
                graph.len(),
                grid.len()
            )));
        }
        if !(dt.is_finite() && dt >= 0.0) {
            return Err(LemError::invalid("dt", dt, "must be finite and >= 0"));
        }
        if !(rainfall.is_finite() && rainfall >= 0.0) {
            return Err(LemError::invalid("rainfall_intensity", rainfall, "must be finite and >= 0"));
        }

        let mut report = ErosionReport::default();
        if self.k_sp == 0.0 || dt == 0.0 || rainfall == 0.0 {
            return Ok(report);
        }

        let cell_area = grid.cell_area();
        let status = grid.status_array().to_vec();
        let z = grid.elevation_mut();

        // Reverse accumulation order: receivers before their donors.
        for &node in graph.order.iter().rev() {
            let recv = graph.receiver[node];
            if recv == node || !status[node].is_core() {
                continue;
            }
            let h_old = z[node];
            let h_recv = z[recv];
            if h_old <= h_recv {
                continue;
            }

            let length = graph.receiver_distance[node];
            let coeff = dt * self.k_sp * (rainfall * graph.drainage_area[node]).powf(self.m_sp);
            let h_new = if self.is_linear() {
                let f = coeff / length;
                (h_old + f * h_recv) / (1.0 + f)
            } else {
                match self.newton(h_old, h_recv, coeff, length) {
                    Some(h) => h,
                    None => {
                        report.newton_fallbacks += 1;
                        h_recv
                    }
                }
            };

            let h_new = h_new.clamp(h_recv, h_old);
            if !h_new.is_finite() {
                return Err(LemError::NumericalInstability {
                    stage: "erode",
                    detail: format!("non-finite elevation at node {node}"),
                });
            }
            let dh = h_old - h_new;
            if dh > 0.0 {
                report.eroded_nodes += 1;
                report.max_erosion = report.max_erosion.max(dh);
                report.eroded_volume += dh * cell_area;
            }
            z[node] = h_new;
        }

        if report.newton_fallbacks > 0 {
            warn!(
                fallbacks = report.newton_fallbacks,
                max_iter = self.newton_max_iter,
                "newton did not converge; nodes clamped to receiver"
            );
        }
        debug!(
            eroded = report.eroded_nodes,
            max_erosion = report.max_erosion,
            "stream power erosion"
        );
        Ok(report)
    }

    /// Root of `h - h_old + coeff ((h - h_recv) / length)^n` on `[h_recv, h_old]`.
    ///
    /// Newton steps that leave the current bracket are replaced by bisection.
    fn newton(&self, h_old: f64, h_recv: f64, coeff: f64, length: f64) -> Option<f64> {
        let n = self.n_sp;
        let residual = |h: f64| h - h_old + coeff * ((h - h_recv) / length).max(0.0).powf(n);

        let (mut lo, mut hi) = (h_recv, h_old);
        let mut h = h_old;
        let scale = h_old.abs().max(1.0);
        for _ in 0..self.newton_max_iter {
            let f = residual(h);
            if f > 0.0 {
                hi = h;
            } else {
                lo = h;
            }
            let slope = ((h - h_recv) / length).max(0.0);
            let df = 1.0 + coeff * n * slope.powf(n - 1.0) / length;
            let mut next = h - f / df;
            if !next.is_finite() || next <= lo || next >= hi {
                next = 0.5 * (lo + hi);
            }
            if (next - h).abs() <= self.newton_tol * scale {
                return Some(next);
            }
            h = next;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowRouter;
    use approx::assert_relative_eq;

    /// Single column draining south to a fixed outlet in row 0.
    fn ramp(rows: usize) -> RasterGrid {
        let mut grid = RasterGrid::new(rows, 3, 1.0).unwrap();
        grid.set_closed_boundaries_at_grid_edges(true, true, true, false);
        for i in 0..grid.len() {
            let (r, _) = grid.grid_index(i);
            grid.elevation_mut()[i] = r as f64;
        }
        grid
    }

    #[test]
    fn test_linear_matches_closed_form() {
        let mut grid = ramp(3);
        let graph = FlowRouter::d8().route(&mut grid).unwrap();
        let node = grid.flat_index(1, 1);
        let area = graph.drainage_area[node];
        let eroder = StreamPowerEroder::new(0.1, 0.5, 1.0).unwrap();
        eroder.run_one_step(&mut grid, &graph, 2.0).unwrap();
        let f = 2.0 * 0.1 * area.sqrt();
        assert_relative_eq!(grid.elevation()[node], 1.0 / (1.0 + f), epsilon = 1e-12);
    }

    #[test]
    fn test_never_raises_and_stays_above_receiver() {
        let mut grid = ramp(8);
        let graph = FlowRouter::d8().route(&mut grid).unwrap();
        let before = grid.elevation().to_vec();
        for n in [0.7, 1.0, 1.5, 2.0] {
            let mut g = grid.clone();
            let eroder = StreamPowerEroder::new(5.0, 0.5, n).unwrap();
            eroder.run_one_step(&mut g, &graph, 10.0).unwrap();
            for &i in g.core_nodes() {
                assert!(g.elevation()[i] <= before[i]);
                assert!(g.elevation()[i] >= g.elevation()[graph.receiver[i]]);
            }
        }
    }

    #[test]
    fn test_newton_solves_residual() {
        let mut grid = ramp(3);
        let graph = FlowRouter::d8().route(&mut grid).unwrap();
        let node = grid.flat_index(1, 1);
        let area = graph.drainage_area[node];
        let eroder = StreamPowerEroder::new(0.1, 0.5, 2.0).unwrap();
        let report = eroder.run_one_step(&mut grid, &graph, 1.0).unwrap();
        assert_eq!(report.newton_fallbacks, 0);
        let h = grid.elevation()[node];
        let residual = h - 1.0 + 0.1 * area.sqrt() * h.powi(2);
        assert!(residual.abs() < 1e-8);
    }

    #[test]
    fn test_iteration_cap_falls_back_to_receiver() {
        let mut grid = ramp(4);
        let graph = FlowRouter::d8().route(&mut grid).unwrap();
        let eroder = StreamPowerEroder::new(1.0, 0.5, 2.0)
            .unwrap()
            .with_newton(1e-300, 1)
            .unwrap();
        let report = eroder.run_one_step(&mut grid, &graph, 1.0).unwrap();
        assert!(report.newton_fallbacks > 0);
        for &i in grid.core_nodes() {
            assert_eq!(grid.elevation()[i], grid.elevation()[graph.receiver[i]]);
        }
    }

    #[test]
    fn test_boundary_nodes_untouched() {
        let mut grid = ramp(5);
        let graph = FlowRouter::d8().route(&mut grid).unwrap();
        let before = grid.elevation().to_vec();
        StreamPowerEroder::new(1.0, 0.5, 1.0)
            .unwrap()
            .run_one_step(&mut grid, &graph, 1.0)
            .unwrap();
        for i in 0..grid.len() {
            if !grid.status(i).is_core() {
                assert_eq!(grid.elevation()[i], before[i]);
            }
        }
    }

    #[test]
    fn test_zero_rainfall_is_noop() {
        let mut grid = ramp(5);
        let graph = FlowRouter::d8().route(&mut grid).unwrap();
        let before = grid.elevation().to_vec();
        let report = StreamPowerEroder::new(1.0, 0.5, 1.0)
            .unwrap()
            .run_with_rainfall(&mut grid, &graph, 1.0, 0.0)
            .unwrap();
        assert_eq!(report, ErosionReport::default());
        assert_eq!(grid.elevation(), before.as_slice());
    }

    #[test]
    fn test_from_map_requires_exponents() {
        let map: ParamMap = [("K_sp".to_string(), 0.3), ("m_sp".to_string(), 0.5)]
            .into_iter()
            .collect();
        assert!(matches!(
            StreamPowerEroder::from_map(&map),
            Err(LemError::MissingParameter { .. })
        ));
    }
}
