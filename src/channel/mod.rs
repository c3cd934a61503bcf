//! Channel-network metrics derived from a routed surface.
//!
//! - Normalised steepness `k_sn = S A^θ`.
//! - The χ coordinate, `χ(x) = ∫ (A0 / A)^θ dx` integrated upstream from each outlet along
//!   the dominant receivers (trapezoid rule).
//! - Longitudinal profiles traced upstream from the largest outlets.

use tracing::debug;

use crate::error::{LemError, Result};
use crate::flow::FlowGraph;
use crate::graph::stack_order;
use crate::grid::{Field, RasterGrid};

fn check_inputs(theta: f64, min_area: f64) -> Result<()> {
    if !(theta.is_finite() && theta >= 0.0) {
        return Err(LemError::invalid("reference_concavity", theta, "must be finite and >= 0"));
    }
    if !(min_area.is_finite() && min_area >= 0.0) {
        return Err(LemError::invalid("min_drainage_area", min_area, "must be finite and >= 0"));
    }
    Ok(())
}

fn check_graph(grid: &RasterGrid, graph: &FlowGraph) -> Result<()> {
    if graph.len() != grid.len() {
        return Err(LemError::configuration(format!(
            "flow graph has {} nodes, grid has {}",
            graph.len(),
            grid.len()
        )));
    }
    Ok(())
}

/// Normalised channel steepness index.
#[derive(Clone, Debug)]
pub struct SteepnessFinder {
    pub reference_concavity: f64,
    pub min_drainage_area: f64,
}

impl Default for SteepnessFinder {
    fn default() -> Self {
        Self { reference_concavity: 0.45, min_drainage_area: 0.0 }
    }
}

impl SteepnessFinder {
    pub fn new(reference_concavity: f64, min_drainage_area: f64) -> Result<Self> {
        check_inputs(reference_concavity, min_drainage_area)?;
        Ok(Self { reference_concavity, min_drainage_area })
    }

    /// Compute `k_sn` for channel nodes (zero elsewhere) and write `channel__steepness_index`.
    pub fn calculate(&self, grid: &mut RasterGrid, graph: &FlowGraph) -> Result<Vec<f64>> {
        check_graph(grid, graph)?;
        let mut ksn = vec![0.0; grid.len()];
        for &i in grid.core_nodes() {
            let area = graph.drainage_area[i];
            let slope = graph.steepest_slope[i];
            if area >= self.min_drainage_area && slope > 0.0 {
                ksn[i] = slope * area.powf(self.reference_concavity);
            }
        }
        grid.set_field(Field::SteepnessIndex, &ksn)?;
        Ok(ksn)
    }
}

/// χ-index calculator.
#[derive(Clone, Debug)]
pub struct ChiFinder {
    pub reference_concavity: f64,
    pub min_drainage_area: f64,
    /// `A0`, so that χ has units of length.
    pub reference_area: f64,
}

impl Default for ChiFinder {
    fn default() -> Self {
        Self {
            reference_concavity: 0.45,
            min_drainage_area: 0.0,
            reference_area: 1.0,
        }
    }
}

impl ChiFinder {
    pub fn new(reference_concavity: f64, min_drainage_area: f64, reference_area: f64) -> Result<Self> {
        check_inputs(reference_concavity, min_drainage_area)?;
        if !(reference_area.is_finite() && reference_area > 0.0) {
            return Err(LemError::invalid("reference_area", reference_area, "must be finite and > 0"));
        }
        Ok(Self { reference_concavity, min_drainage_area, reference_area })
    }

    /// Compute χ and write `channel__chi_index`. Outlets and nodes below the area
    /// threshold get 0.
    pub fn calculate(&self, grid: &mut RasterGrid, graph: &FlowGraph) -> Result<Vec<f64>> {
        check_graph(grid, graph)?;
        let n = grid.len();
        let stack = stack_order(&graph.receiver, &graph.donors);
        if stack.len() != n {
            return Err(LemError::NumericalInstability {
                stage: "chi",
                detail: format!("{} nodes are caught in receiver cycles", n - stack.len()),
            });
        }

        let theta = self.reference_concavity;
        let a0 = self.reference_area;
        let area = &graph.drainage_area;
        let mut chi = vec![0.0; n];
        for &node in &stack {
            let recv = graph.receiver[node];
            if recv == node || area[node] < self.min_drainage_area {
                continue;
            }
            let integrand = |a: f64| (a0 / a).powf(theta);
            chi[node] = chi[recv]
                + 0.5 * (integrand(area[node]) + integrand(area[recv])) * graph.receiver_distance[node];
        }

        grid.set_field(Field::ChiIndex, &chi)?;
        debug!(max_chi = chi.iter().copied().fold(0.0, f64::max), "chi index computed");
        Ok(chi)
    }
}

/// One channel traced from its outlet upstream.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelProfile {
    /// Node ids, outlet first.
    pub nodes: Vec<usize>,
    /// Along-channel distance of each node from the outlet.
    pub distances: Vec<f64>,
}

impl ChannelProfile {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Elevations along the profile.
    pub fn elevations(&self, grid: &RasterGrid) -> Vec<f64> {
        let z = grid.elevation();
        self.nodes.iter().map(|&i| z[i]).collect()
    }
}

/// Trace the main stem upstream from each of the `number_of_channels` largest outlets,
/// always stepping to the donor with the largest drainage area while it stays at or above
/// `min_area`.
pub fn channel_profiles(
    grid: &RasterGrid,
    graph: &FlowGraph,
    number_of_channels: usize,
    min_area: f64,
) -> Result<Vec<ChannelProfile>> {
    check_graph(grid, graph)?;
    let mut profiles = Vec::with_capacity(number_of_channels);
    for outlet in graph.outlets_by_area() {
        if profiles.len() == number_of_channels {
            break;
        }
        if graph.donors.degree(outlet) == 0 || graph.drainage_area[outlet] < min_area {
            continue;
        }
        let mut nodes = vec![outlet];
        let mut distances = vec![0.0];
        let mut node = outlet;
        loop {
            let next = graph
                .donors
                .neighbors_of(node)
                .iter()
                .copied()
                .filter(|&d| graph.drainage_area[d] >= min_area)
                .max_by(|&a, &b| {
                    graph.drainage_area[a]
                        .total_cmp(&graph.drainage_area[b])
                        .then(b.cmp(&a))
                });
            let Some(up) = next else { break };
            let along = distances[distances.len() - 1] + graph.receiver_distance[up];
            nodes.push(up);
            distances.push(along);
            node = up;
        }
        profiles.push(ChannelProfile { nodes, distances });
    }
    Ok(profiles)
}
