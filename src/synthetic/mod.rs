//! Synthetic initial surfaces for experiments and tests.
//!
//! All builders add to (or set) the elevation field of an existing grid, except
//! [`gaussian_hill`], which also chooses the grid geometry so the hill spans `[-b, b]^2`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{LemError, Result};
use crate::grid::RasterGrid;

/// Add uniform noise in `[0, amplitude)` to every node. Same seed, same surface.
pub fn random_roughness(grid: &mut RasterGrid, amplitude: f64, seed: u64) -> Result<()> {
    if !(amplitude.is_finite() && amplitude >= 0.0) {
        return Err(LemError::invalid("amplitude", amplitude, "must be finite and >= 0"));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    for z in grid.elevation_mut() {
        *z += rng.gen::<f64>() * amplitude;
    }
    grid.capture_fixed_gradients();
    Ok(())
}

/// Raise every node north of the line `y = intercept + slope * x` by `throw`.
pub fn oblique_fault_scarp(grid: &mut RasterGrid, intercept: f64, slope: f64, throw: f64) -> Vec<usize> {
    let upthrown: Vec<usize> = (0..grid.len())
        .filter(|&i| grid.node_y(i) > intercept + slope * grid.node_x(i))
        .collect();
    let z = grid.elevation_mut();
    for &i in &upthrown {
        z[i] += throw;
    }
    grid.capture_fixed_gradients();
    upthrown
}

/// East-west fault at `fault_y`; returns the upthrown nodes.
pub fn fault_scarp(grid: &mut RasterGrid, fault_y: f64, throw: f64) -> Vec<usize> {
    oblique_fault_scarp(grid, fault_y, 0.0, throw)
}

/// Nodes strictly inside the box `x0 < x < x1`, `y0 < y < y1`.
pub fn nodes_in_box(grid: &RasterGrid, x0: f64, x1: f64, y0: f64, y1: f64) -> Vec<usize> {
    (0..grid.len())
        .filter(|&i| {
            let (x, y) = (grid.node_x(i), grid.node_y(i));
            x > x0 && x < x1 && y > y0 && y < y1
        })
        .collect()
}

/// Raise the nodes inside a box by `height`; returns them so they can be uplifted further.
pub fn raised_block(grid: &mut RasterGrid, x0: f64, x1: f64, y0: f64, y1: f64, height: f64) -> Vec<usize> {
    let block = nodes_in_box(grid, x0, x1, y0, y1);
    let z = grid.elevation_mut();
    for &i in &block {
        z[i] += height;
    }
    grid.capture_fixed_gradients();
    block
}

/// Inverted parabola over `len` samples, normalised to `[0, 1]` and peaking at `len / 2`.
pub fn parabolic_profile(len: usize) -> Vec<f64> {
    let centre = (len / 2) as f64;
    let raw: Vec<f64> = (0..len).map(|i| -(i as f64 - centre).powi(2)).collect();
    let lo = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = hi - lo;
    if span <= 0.0 {
        return vec![1.0; len];
    }
    raw.into_iter().map(|v| (v - lo) / span).collect()
}

/// Ridge running east-west, highest along the middle row: `z += height * profile(row)`.
pub fn parabolic_ridge(grid: &mut RasterGrid, height: f64) {
    let profile = parabolic_profile(grid.rows());
    let cols = grid.cols();
    for (i, z) in grid.elevation_mut().iter_mut().enumerate() {
        *z += height * profile[i / cols];
    }
    grid.capture_fixed_gradients();
}

/// Analytic slope magnitude of `exp(-x^2 - y^2)`.
pub fn gaussian_hill_slope(x: f64, y: f64) -> f64 {
    let r = x.hypot(y);
    2.0 * r * (-r * r).exp()
}

/// Analytic radial curvature of `exp(-x^2 - y^2)`.
pub fn gaussian_hill_curvature(x: f64, y: f64) -> f64 {
    let r2 = x * x + y * y;
    (1.0 - 2.0 * r2) * 2.0 * (-r2).exp()
}

/// `z = exp(-x^2 - y^2)` sampled on an `n x n` grid spanning `[-b, b]` in both directions.
#[derive(Clone, Debug)]
pub struct GaussianHill {
    pub grid: RasterGrid,
    pub half_width: f64,
}

impl GaussianHill {
    /// Hill-centred x coordinate of a node.
    pub fn x(&self, node: usize) -> f64 {
        self.grid.node_x(node) - self.half_width
    }

    pub fn y(&self, node: usize) -> f64 {
        self.grid.node_y(node) - self.half_width
    }

    pub fn radius(&self, node: usize) -> f64 {
        self.x(node).hypot(self.y(node))
    }

    pub fn analytic_slope(&self, node: usize) -> f64 {
        gaussian_hill_slope(self.x(node), self.y(node))
    }

    pub fn analytic_curvature(&self, node: usize) -> f64 {
        gaussian_hill_curvature(self.x(node), self.y(node))
    }

    /// Node at the hill summit (exact only for odd `n`).
    pub fn centre(&self) -> usize {
        self.grid.flat_index(self.grid.rows() / 2, self.grid.cols() / 2)
    }
}

/// Build the Gaussian hill with all four edges as fixed-value outlets.
pub fn gaussian_hill(n: usize, half_width: f64) -> Result<GaussianHill> {
    if n < 3 {
        return Err(LemError::configuration(format!("gaussian hill needs n >= 3, got {n}")));
    }
    if !(half_width.is_finite() && half_width > 0.0) {
        return Err(LemError::invalid("half_width", half_width, "must be finite and > 0"));
    }
    let spacing = 2.0 * half_width / (n - 1) as f64;
    let mut grid = RasterGrid::new(n, n, spacing)?;
    for i in 0..grid.len() {
        let x = grid.node_x(i) - half_width;
        let y = grid.node_y(i) - half_width;
        grid.elevation_mut()[i] = (-x * x - y * y).exp();
    }
    grid.set_open_boundaries();
    Ok(GaussianHill { grid, half_width })
}
