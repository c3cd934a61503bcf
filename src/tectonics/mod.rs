//! Rock uplift forcing.
//!
//! A base rate (uniform or per node) plus optional Gaussian hotspots, scaled by a
//! piecewise-constant multiplier in time. Only core nodes are raised; boundary nodes keep
//! their elevation, fixed-gradient ones included. The diffuser re-imposes their offsets.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{require, ParamMap};
use crate::error::{LemError, Result};
use crate::grid::RasterGrid;
use crate::synthetic::parabolic_profile;

/// Base uplift rate [L/T].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum UpliftRate {
    Uniform(f64),
    /// One rate per node, node-ordered.
    Spatial(Vec<f64>),
}

/// Localised uplift with Gaussian falloff, zero beyond `radius`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpliftHotspot {
    pub cx: f64,
    pub cy: f64,
    pub radius: f64,
    pub rate: f64,
}

impl UpliftHotspot {
    fn rate_at(&self, x: f64, y: f64) -> f64 {
        let dist = (x - self.cx).hypot(y - self.cy);
        if dist > self.radius {
            return 0.0;
        }
        let t = dist / self.radius;
        self.rate * (-3.0 * t * t).exp()
    }
}

/// Multipliers applied from each start time until the next one; 1.0 before the first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpliftSchedule {
    segments: Vec<(f64, f64)>,
}

impl UpliftSchedule {
    pub fn new(mut segments: Vec<(f64, f64)>) -> Result<Self> {
        for &(start, factor) in &segments {
            if !start.is_finite() || !factor.is_finite() {
                return Err(LemError::configuration(format!(
                    "uplift schedule entry ({start}, {factor}) is not finite"
                )));
            }
        }
        segments.sort_by(|a, b| a.0.total_cmp(&b.0));
        if segments.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(LemError::configuration("uplift schedule has duplicate start times"));
        }
        Ok(Self { segments })
    }

    pub fn factor_at(&self, t: f64) -> f64 {
        self.segments
            .iter()
            .take_while(|&&(start, _)| start <= t)
            .last()
            .map_or(1.0, |&(_, f)| f)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Multiplier integrated over a step of length `dt` starting at `t`.
    pub fn scale_over(&self, t: f64, dt: f64) -> f64 {
        if self.segments.is_empty() {
            dt
        } else {
            self.integrate(t, t + dt)
        }
    }

    /// Integral of the multiplier over `[t0, t1]`.
    pub fn integrate(&self, t0: f64, t1: f64) -> f64 {
        if t1 <= t0 {
            return 0.0;
        }
        let mut total = 0.0;
        let mut t = t0;
        for &(start, _) in &self.segments {
            if start <= t {
                continue;
            }
            if start >= t1 {
                break;
            }
            total += self.factor_at(t) * (start - t);
            t = start;
        }
        total + self.factor_at(t) * (t1 - t)
    }
}

/// Summary of one uplift application.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UpliftReport {
    pub max_uplift: f64,
    pub mean_uplift: f64,
}

/// Uplift forcing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpliftForcing {
    pub base: UpliftRate,
    pub hotspots: Vec<UpliftHotspot>,
    pub schedule: UpliftSchedule,
}

impl UpliftForcing {
    pub fn uniform(rate: f64) -> Result<Self> {
        if !rate.is_finite() {
            return Err(LemError::invalid("uplift_rate", rate, "must be finite"));
        }
        Ok(Self {
            base: UpliftRate::Uniform(rate),
            hotspots: Vec::new(),
            schedule: UpliftSchedule::default(),
        })
    }

    pub fn spatial(rates: Vec<f64>) -> Result<Self> {
        if let Some(i) = rates.iter().position(|r| !r.is_finite()) {
            return Err(LemError::invalid("uplift_rate", rates[i], format!("node {i} is not finite")));
        }
        Ok(Self {
            base: UpliftRate::Spatial(rates),
            hotspots: Vec::new(),
            schedule: UpliftSchedule::default(),
        })
    }

    pub fn from_map(map: &ParamMap) -> Result<Self> {
        Self::uniform(require(map, "uplift_rate")?)
    }

    /// `rate` on the given nodes, zero elsewhere.
    pub fn on_nodes(grid: &RasterGrid, nodes: &[usize], rate: f64) -> Result<Self> {
        let mut rates = vec![0.0; grid.len()];
        for &i in nodes {
            if i >= rates.len() {
                return Err(LemError::configuration(format!("node {i} is outside the grid")));
            }
            rates[i] = rate;
        }
        Self::spatial(rates)
    }

    /// Growing anticline: rate follows the row-wise parabolic profile, peaking at `max_rate`
    /// along the middle row.
    pub fn parabolic_ridge(grid: &RasterGrid, max_rate: f64) -> Result<Self> {
        let profile = parabolic_profile(grid.rows());
        let rates = (0..grid.len()).map(|i| max_rate * profile[i / grid.cols()]).collect();
        Self::spatial(rates)
    }

    pub fn add_hotspot(&mut self, cx: f64, cy: f64, radius: f64, rate: f64) -> Result<()> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(LemError::invalid("radius", radius, "must be finite and > 0"));
        }
        if !(cx.is_finite() && cy.is_finite() && rate.is_finite()) {
            return Err(LemError::configuration("hotspot centre and rate must be finite"));
        }
        self.hotspots.push(UpliftHotspot { cx, cy, radius, rate });
        Ok(())
    }

    pub fn with_schedule(mut self, schedule: UpliftSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Per-node rate before the time multiplier.
    pub fn rate_field(&self, grid: &RasterGrid) -> Result<Vec<f64>> {
        let mut rates = match &self.base {
            UpliftRate::Uniform(u) => vec![*u; grid.len()],
            UpliftRate::Spatial(r) if r.len() == grid.len() => r.clone(),
            UpliftRate::Spatial(r) => {
                return Err(LemError::configuration(format!(
                    "spatial uplift has {} rates, grid has {} nodes",
                    r.len(),
                    grid.len()
                )))
            }
        };
        for hs in &self.hotspots {
            for (i, u) in rates.iter_mut().enumerate() {
                *u += hs.rate_at(grid.node_x(i), grid.node_y(i));
            }
        }
        Ok(rates)
    }

    /// Raise core nodes over `[t, t + dt]`.
    pub fn run_one_step(&self, grid: &mut RasterGrid, t: f64, dt: f64) -> Result<UpliftReport> {
        if !(dt.is_finite() && dt >= 0.0) {
            return Err(LemError::invalid("dt", dt, "must be finite and >= 0"));
        }
        let rates = self.rate_field(grid)?;
        let scale = self.schedule.scale_over(t, dt);
        let core = grid.core_nodes().to_vec();

        let mut report = UpliftReport::default();
        let z = grid.elevation_mut();
        for &i in &core {
            let dz = rates[i] * scale;
            z[i] += dz;
            report.max_uplift = report.max_uplift.max(dz);
            report.mean_uplift += dz;
        }
        if !core.is_empty() {
            report.mean_uplift /= core.len() as f64;
        }

        debug!(t, dt, max_uplift = report.max_uplift, "uplift applied");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn open_grid(n: usize) -> RasterGrid {
        let mut grid = RasterGrid::new(n, n, 1.0).unwrap();
        grid.set_open_boundaries();
        grid
    }

    #[test]
    fn test_uniform_uplift_core_only() {
        let mut grid = open_grid(5);
        let forcing = UpliftForcing::uniform(0.01).unwrap();
        for step in 0..10 {
            forcing.run_one_step(&mut grid, step as f64 * 2.0, 2.0).unwrap();
        }
        for i in 0..grid.len() {
            if grid.status(i).is_core() {
                assert_relative_eq!(grid.elevation()[i], 0.2, epsilon = 1e-12);
            } else {
                assert_eq!(grid.elevation()[i], 0.0);
            }
        }
    }

    #[test]
    fn test_fixed_gradient_edge_not_uplifted() {
        let mut grid = open_grid(5);
        grid.set_boundary(crate::grid::Edge::Top, crate::grid::NodeStatus::FixedGradient);
        for (i, z) in grid.elevation_mut().iter_mut().enumerate() {
            *z = 0.1 * i as f64;
        }
        grid.capture_fixed_gradients();
        let before = grid.elevation().to_vec();
        UpliftForcing::uniform(0.5).unwrap().run_one_step(&mut grid, 0.0, 1.0).unwrap();
        for i in 0..grid.len() {
            if !grid.status(i).is_core() {
                assert_eq!(grid.elevation()[i], before[i], "boundary node {i} moved");
            }
        }
    }

    #[test]
    fn test_from_map_reads_uplift_rate() {
        let map: ParamMap = [("uplift_rate".to_string(), 0.002), ("K_sp".to_string(), 1.0)]
            .into_iter()
            .collect();
        let forcing = UpliftForcing::from_map(&map).unwrap();
        assert_eq!(forcing.base, UpliftRate::Uniform(0.002));
        assert!(matches!(
            UpliftForcing::from_map(&ParamMap::new()),
            Err(LemError::MissingParameter { key }) if key == "uplift_rate"
        ));
    }

    #[test]
    fn test_spatial_rate_length_checked() {
        let mut grid = open_grid(4);
        let forcing = UpliftForcing::spatial(vec![1.0; 3]).unwrap();
        assert!(matches!(
            forcing.run_one_step(&mut grid, 0.0, 1.0),
            Err(LemError::Configuration(_))
        ));
    }

    #[test]
    fn test_hotspot_peaks_at_centre() {
        let grid = open_grid(9);
        let mut forcing = UpliftForcing::uniform(0.0).unwrap();
        forcing.add_hotspot(4.0, 4.0, 3.0, 1.0).unwrap();
        let rates = forcing.rate_field(&grid).unwrap();
        assert_relative_eq!(rates[grid.flat_index(4, 4)], 1.0);
        assert!(rates[grid.flat_index(4, 5)] < 1.0);
        assert_eq!(rates[grid.flat_index(0, 0)], 0.0);
    }

    #[test]
    fn test_schedule_integrates_across_breakpoints() {
        let schedule = UpliftSchedule::new(vec![(10.0, 0.0), (20.0, 2.0)]).unwrap();
        assert_eq!(schedule.factor_at(5.0), 1.0);
        assert_eq!(schedule.factor_at(10.0), 0.0);
        assert_eq!(schedule.factor_at(25.0), 2.0);
        assert_relative_eq!(schedule.integrate(5.0, 25.0), 5.0 + 0.0 + 10.0);
        assert_relative_eq!(schedule.integrate(12.0, 14.0), 0.0);
    }

    #[test]
    fn test_schedule_rejects_duplicates() {
        assert!(UpliftSchedule::new(vec![(1.0, 2.0), (1.0, 3.0)]).is_err());
    }

    #[test]
    fn test_parabolic_ridge_rates() {
        let grid = open_grid(11);
        let forcing = UpliftForcing::parabolic_ridge(&grid, 0.001).unwrap();
        let rates = forcing.rate_field(&grid).unwrap();
        assert_relative_eq!(rates[grid.flat_index(5, 3)], 0.001);
        assert_eq!(rates[grid.flat_index(0, 3)], 0.0);
    }
}
