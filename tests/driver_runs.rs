use approx::assert_relative_eq;

use landscape_lem::synthetic::random_roughness;
use landscape_lem::{
    Checkpoint, DriverState, FillPolicy, ModelParams, RasterGrid, SimulationDriver, StormCoupling,
    StormGenerator, StormInterval, StormParams,
};

fn params(total_time: f64) -> ModelParams {
    ModelParams {
        nrows: 12,
        ncols: 10,
        dx: 1.0,
        dt: 0.5,
        total_time,
        uplift_rate: 0.01,
        k_sp: 0.05,
        m_sp: 0.5,
        n_sp: 1.0,
        linear_diffusivity: 0.0,
        ..Default::default()
    }
}

/// South-draining slope with small-scale roughness.
fn slope_grid() -> RasterGrid {
    let mut grid = RasterGrid::new(12, 10, 1.0).unwrap();
    grid.set_closed_boundaries_at_grid_edges(true, true, true, false);
    for i in 0..grid.len() {
        grid.elevation_mut()[i] = 0.2 * grid.node_y(i);
    }
    random_roughness(&mut grid, 0.01, 9).unwrap();
    grid
}

#[test]
fn test_dry_interval_only_uplifts() {
    let mut driver = SimulationDriver::new(slope_grid(), params(10.0)).unwrap();
    let before = driver.grid().unwrap().elevation().to_vec();
    let diag = driver
        .step_interval(StormInterval { duration: 2.0, intensity: 0.0 })
        .unwrap();
    assert!(!diag.transport_active);
    assert_eq!(diag.report.eroded_nodes, 0);

    let grid = driver.grid().unwrap();
    for &i in grid.core_nodes() {
        assert_relative_eq!(grid.elevation()[i] - before[i], 0.02, epsilon = 1e-12);
    }
}

#[test]
fn test_gate_coupling_ignores_intensity() {
    let mut light = SimulationDriver::new(slope_grid(), params(10.0)).unwrap();
    let mut heavy = SimulationDriver::new(slope_grid(), params(10.0)).unwrap();
    light.step_interval(StormInterval { duration: 1.0, intensity: 0.5 }).unwrap();
    heavy.step_interval(StormInterval { duration: 1.0, intensity: 5.0 }).unwrap();
    assert_eq!(light.grid().unwrap().elevation(), heavy.grid().unwrap().elevation());
}

#[test]
fn test_scaled_discharge_erodes_more_in_heavy_rain() {
    let build = || {
        SimulationDriver::builder(params(10.0))
            .grid(slope_grid())
            .storm_coupling(StormCoupling::ScaledDischarge)
            .build()
            .unwrap()
    };
    let mut light = build();
    let mut heavy = build();
    light.step_interval(StormInterval { duration: 1.0, intensity: 0.5 }).unwrap();
    heavy.step_interval(StormInterval { duration: 1.0, intensity: 5.0 }).unwrap();
    let light_sum = light.grid().unwrap().core_elevation_sum();
    let heavy_sum = heavy.grid().unwrap().core_elevation_sum();
    assert!(heavy_sum < light_sum);
}

#[test]
fn test_storm_run_covers_total_time() {
    let storms = StormGenerator::new(StormParams::default(), 6.0, 21).unwrap();
    let mut driver = SimulationDriver::new(slope_grid(), params(6.0)).unwrap();
    let summary = driver.run_with_storms(storms).unwrap();
    assert!(!summary.exhausted);
    assert_eq!(driver.state(), DriverState::Done);
    assert_relative_eq!(driver.elapsed(), 6.0, epsilon = 1e-9);
    assert!(summary.diagnostics.iter().any(|d| !d.transport_active));
}

#[test]
fn test_short_storm_sequence_stops_early() {
    let storms = StormGenerator::new(StormParams::default(), 2.0, 21).unwrap();
    let mut driver = SimulationDriver::new(slope_grid(), params(6.0)).unwrap();
    let summary = driver.run_with_storms(storms).unwrap();
    assert!(summary.exhausted);
    assert_eq!(driver.state(), DriverState::Done);
    assert_relative_eq!(driver.elapsed(), 2.0, epsilon = 1e-9);
}

#[test]
fn test_resume_matches_uninterrupted_run() {
    let mut straight = SimulationDriver::builder(params(5.0))
        .grid(slope_grid())
        .fill_policy(FillPolicy::Once)
        .build()
        .unwrap();
    straight.run().unwrap();

    let mut first = SimulationDriver::builder(params(5.0))
        .grid(slope_grid())
        .fill_policy(FillPolicy::Once)
        .build()
        .unwrap();
    for _ in 0..4 {
        first.step(0.5).unwrap();
    }
    let json = first.checkpoint().unwrap().to_json().unwrap();
    let checkpoint = Checkpoint::from_json(&json).unwrap();
    assert_eq!(checkpoint.steps, 4);

    let mut resumed = SimulationDriver::builder(params(5.0))
        .fill_policy(FillPolicy::Once)
        .checkpoint(&checkpoint)
        .unwrap()
        .build()
        .unwrap();
    assert_relative_eq!(resumed.elapsed(), 2.0);
    resumed.run().unwrap();

    assert_eq!(resumed.steps(), straight.steps());
    let a = straight.grid().unwrap().elevation();
    let b = resumed.grid().unwrap().elevation();
    for (za, zb) in a.iter().zip(b) {
        assert_relative_eq!(*za, *zb, epsilon = 1e-9);
    }
}
