use approx::assert_relative_eq;

use landscape_lem::synthetic::gaussian_hill;
use landscape_lem::{FlowRouter, ModelParams, RasterGrid, SimulationDriver};

fn params(rows: usize, cols: usize, dt: f64, total_time: f64) -> ModelParams {
    ModelParams {
        nrows: rows,
        ncols: cols,
        dx: 1.0,
        dt,
        total_time,
        uplift_rate: 0.0,
        k_sp: 0.0,
        linear_diffusivity: 0.0,
        ..Default::default()
    }
}

fn open_grid(rows: usize, cols: usize) -> RasterGrid {
    let mut grid = RasterGrid::new(rows, cols, 1.0).unwrap();
    grid.set_open_boundaries();
    grid
}

#[test]
fn test_flat_grid_stays_flat() {
    let p = ModelParams { k_sp: 0.1, linear_diffusivity: 0.05, ..params(10, 10, 1.0, 8.0) };
    let mut driver = SimulationDriver::new(open_grid(10, 10), p).unwrap();
    driver.run().unwrap();
    assert!(driver.grid().unwrap().elevation().iter().all(|&z| z == 0.0));
}

#[test]
fn test_spike_diffuses_into_neighbours() {
    let mut grid = open_grid(10, 10);
    let centre = grid.flat_index(5, 5);
    grid.elevation_mut()[centre] = 10.0;
    let sum_before = grid.core_elevation_sum();

    let p = ModelParams { linear_diffusivity: 0.1, ..params(10, 10, 1.0, 1.0) };
    let mut driver = SimulationDriver::new(grid, p).unwrap();
    driver.step(1.0).unwrap();

    let grid = driver.grid().unwrap();
    let z = grid.elevation();
    assert!(z[centre] < 10.0);
    assert_relative_eq!(z[centre], 6.0, epsilon = 1e-12);
    for nb in [centre - 10, centre + 10, centre - 1, centre + 1] {
        assert!(z[nb] > 0.0);
        assert_relative_eq!(z[nb], 1.0, epsilon = 1e-12);
    }
    assert_relative_eq!(grid.core_elevation_sum(), sum_before, epsilon = 1e-9);
}

#[test]
fn test_gaussian_hill_slope_converges() {
    let half_width = 2.5;
    let mut errors = Vec::new();
    for n in [11, 21, 41] {
        let mut hill = gaussian_hill(n, half_width).unwrap();
        let graph = FlowRouter::d8().route(&mut hill.grid).unwrap();

        // Summit is a divide: only its own cell drains through it.
        let summit = hill.centre();
        assert_relative_eq!(graph.drainage_area[summit], hill.grid.cell_area());

        // Unit radius east of the summit along the centre row.
        let offset = (n - 1) / 5;
        let node = summit + offset;
        assert_relative_eq!(hill.radius(node), 1.0, epsilon = 1e-12);
        let exact = hill.analytic_slope(node);
        let err = (graph.steepest_slope[node] - exact).abs() / exact;
        errors.push(err);
    }
    assert!(errors[0] < 0.3, "n=11 error {}", errors[0]);
    assert!(errors[1] < 0.15, "n=21 error {}", errors[1]);
    assert!(errors[2] < 0.075, "n=41 error {}", errors[2]);
    assert!(errors.windows(2).all(|w| w[1] < w[0]));
}

#[test]
fn test_uplift_only_raises_core_exactly() {
    let (u, dt, nt) = (0.002, 0.5, 20);
    let p = ModelParams { uplift_rate: u, ..params(9, 7, dt, dt * nt as f64) };
    let mut grid = open_grid(9, 7);
    grid.elevation_mut().iter_mut().enumerate().for_each(|(i, z)| *z = 0.01 * i as f64);
    let before = grid.elevation().to_vec();

    let mut driver = SimulationDriver::new(grid, p).unwrap();
    let summary = driver.run().unwrap();
    assert_eq!(summary.steps, nt);

    let grid = driver.grid().unwrap();
    for i in 0..grid.len() {
        let dz = grid.elevation()[i] - before[i];
        if grid.status(i).is_core() {
            assert_relative_eq!(dz, u * dt * nt as f64, epsilon = 1e-12);
        } else {
            assert_eq!(dz, 0.0);
        }
    }
}
