use approx::assert_relative_eq;

use landscape_lem::flow::undrained_core_nodes;
use landscape_lem::grid::{Connectivity, Edge};
use landscape_lem::synthetic::random_roughness;
use landscape_lem::{
    FlowRouter, LinearDiffuser, NodeStatus, RasterGrid, SinkFiller, StreamPowerEroder,
};

/// Rough surface over a gentle southward tilt, open on the south edge only.
fn rough_basin(rows: usize, cols: usize, seed: u64) -> RasterGrid {
    let mut grid = RasterGrid::new(rows, cols, 10.0).unwrap();
    grid.set_closed_boundaries_at_grid_edges(true, true, true, false);
    for i in 0..grid.len() {
        grid.elevation_mut()[i] = 0.01 * grid.node_y(i);
    }
    random_roughness(&mut grid, 1.0, seed).unwrap();
    grid
}

#[test]
fn test_d8_area_reaches_outlets() {
    let mut grid = rough_basin(15, 12, 1);
    let graph = FlowRouter::d8().route(&mut grid).unwrap();
    assert_relative_eq!(graph.outlet_area_total(), grid.total_area(), max_relative = 1e-12);
}

#[test]
fn test_mfd_area_reaches_outlets() {
    let mut grid = rough_basin(15, 12, 2);
    SinkFiller::default().fill(&mut grid).unwrap();
    let graph = FlowRouter::mfd(1.1).unwrap().route(&mut grid).unwrap();
    assert_relative_eq!(graph.outlet_area_total(), grid.total_area(), max_relative = 1e-12);
    for i in 0..grid.len() {
        let total: f64 = graph.receivers.weights_of(i).iter().sum();
        if graph.receivers.degree(i) > 0 {
            assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_fill_postcondition_and_idempotence() {
    let mut grid = rough_basin(20, 20, 3);
    let first = SinkFiller::default().fill(&mut grid).unwrap();
    assert!(first.raised_nodes > 0);
    assert!(undrained_core_nodes(&grid).is_empty());

    let once = grid.elevation().to_vec();
    let second = SinkFiller::default().fill(&mut grid).unwrap();
    assert_eq!(second.raised_nodes, 0);
    assert_eq!(grid.elevation(), once.as_slice());

    let graph = FlowRouter::d8().require_filled(true).route(&mut grid).unwrap();
    assert!(graph.pits.is_empty());
}

#[test]
fn test_diffusion_obeys_maximum_principle() {
    let mut grid = RasterGrid::new(16, 16, 1.0).unwrap();
    grid.set_open_boundaries();
    random_roughness(&mut grid, 5.0, 4).unwrap();
    let lo = grid.elevation().iter().copied().fold(f64::INFINITY, f64::min);
    let hi = grid.elevation().iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let diffuser = LinearDiffuser::new(0.5).unwrap();
    let dt = 100.0 * LinearDiffuser::max_stable_dt(&grid, 0.5);
    let report = diffuser.run_one_step(&mut grid, dt).unwrap();
    assert!(report.substeps >= 100);
    for &z in grid.elevation() {
        assert!(z >= lo - 1e-9 && z <= hi + 1e-9);
    }
}

#[test]
fn test_diffusion_step_stays_within_neighbour_mean() {
    let mut grid = RasterGrid::new(12, 12, 1.0).unwrap();
    grid.set_open_boundaries();
    random_roughness(&mut grid, 3.0, 8).unwrap();
    let before = grid.elevation().to_vec();

    let kappa = 0.5;
    let dt = LinearDiffuser::max_stable_dt(&grid, kappa);
    let report = LinearDiffuser::new(kappa).unwrap().run_one_step(&mut grid, dt).unwrap();
    assert_eq!(report.substeps, 1);

    for &i in grid.core_nodes() {
        let nbs: Vec<usize> = grid.neighbor_iter(i, Connectivity::D4).map(|nb| nb.node).collect();
        let mean = nbs.iter().map(|&n| before[n]).sum::<f64>() / nbs.len() as f64;
        let pull = mean - before[i];
        let change = grid.elevation()[i] - before[i];
        assert!(change.abs() <= pull.abs() + 1e-12, "node {i} overshot its neighbour mean");
        assert!(change * pull >= -1e-12, "node {i} moved away from its neighbour mean");
    }
}

#[test]
fn test_diffusion_leaves_boundaries_alone() {
    let mut grid = RasterGrid::new(10, 10, 1.0).unwrap();
    grid.set_boundary(Edge::Bottom, NodeStatus::FixedValue);
    grid.set_boundary(Edge::Top, NodeStatus::FixedValue);
    grid.set_boundary(Edge::Left, NodeStatus::Closed);
    grid.set_boundary(Edge::Right, NodeStatus::Closed);
    random_roughness(&mut grid, 2.0, 5).unwrap();
    let before = grid.elevation().to_vec();

    LinearDiffuser::new(0.2).unwrap().run_one_step(&mut grid, 10.0).unwrap();
    for i in 0..grid.len() {
        if !grid.status(i).is_core() {
            assert_eq!(grid.elevation()[i], before[i], "boundary node {i} moved");
        }
    }
}

#[test]
fn test_erosion_never_raises_or_inverts() {
    for n_sp in [0.8, 1.0, 1.7] {
        let mut grid = rough_basin(18, 14, 6);
        SinkFiller::default().fill(&mut grid).unwrap();
        let graph = FlowRouter::d8().route(&mut grid).unwrap();
        let before = grid.elevation().to_vec();

        let eroder = StreamPowerEroder::new(0.01, 0.5, n_sp).unwrap();
        let report = eroder.run_one_step(&mut grid, &graph, 100.0).unwrap();
        assert!(report.eroded_nodes > 0);

        let z = grid.elevation();
        for &i in grid.core_nodes() {
            assert!(z[i] <= before[i] + 1e-12, "n={n_sp}: node {i} rose");
            let recv = graph.receiver[i];
            if recv != i {
                assert!(z[i] >= z[recv] - 1e-12, "n={n_sp}: node {i} below its receiver");
            }
        }
    }
}
