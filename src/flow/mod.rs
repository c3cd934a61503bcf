//! Flow routing and drainage-area accumulation.
//!
//! Two direction policies share one accumulation pass:
//! - D8 steepest descent: each core node drains wholly to its lowest lower neighbour.
//! - Multi-flow-direction (Freeman 1991): outflow is split across all lower neighbours in
//!   proportion to `slope^p`.
//!
//! Accumulation visits nodes in descending elevation. Every receiver is strictly lower than
//! its donor, so this is a valid upstream-to-downstream order on the routing DAG.

pub mod fill;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LemError, Result};
use crate::graph::CsrFlowGraph;
use crate::grid::{Connectivity, Field, RasterGrid};

pub use fill::{undrained_core_nodes, FillReport, SinkFiller};

/// Direction policy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum FlowDirector {
    /// Single receiver: the lowest neighbour below the node.
    D8,
    /// All lower neighbours, weighted by `slope^exponent`.
    Mfd { exponent: f64 },
}

impl Default for FlowDirector {
    fn default() -> Self {
        FlowDirector::D8
    }
}

/// Routing result for one surface. Recomputed from scratch every step.
#[derive(Clone, Debug)]
pub struct FlowGraph {
    pub director: FlowDirector,
    /// Dominant receiver per node; the node itself for outlets, closed nodes and pits.
    pub receiver: Vec<usize>,
    /// Distance to `receiver` (0 for self-receivers).
    pub receiver_distance: Vec<f64>,
    /// Receiver sets with partition fractions summing to 1 for draining nodes.
    pub receivers: CsrFlowGraph,
    /// Inverse of `receiver`.
    pub donors: CsrFlowGraph,
    /// Nodes in descending elevation, ties by lowest id.
    pub order: Vec<usize>,
    /// Accumulated drainage area.
    pub drainage_area: Vec<f64>,
    /// Maximum downhill gradient to any neighbour.
    pub steepest_slope: Vec<f64>,
    /// Core nodes that had no lower neighbour.
    pub pits: Vec<usize>,
}

impl FlowGraph {
    #[inline]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn is_outlet(&self, node: usize) -> bool {
        self.receiver[node] == node
    }

    /// Total drainage area collected at self-draining nodes.
    pub fn outlet_area_total(&self) -> f64 {
        (0..self.len())
            .filter(|&i| self.is_outlet(i))
            .map(|i| self.drainage_area[i])
            .sum()
    }

    /// Outlets sorted by decreasing drainage area.
    pub fn outlets_by_area(&self) -> Vec<usize> {
        let mut outlets: Vec<usize> = (0..self.len()).filter(|&i| self.is_outlet(i)).collect();
        outlets.sort_by(|&a, &b| {
            self.drainage_area[b]
                .total_cmp(&self.drainage_area[a])
                .then(a.cmp(&b))
        });
        outlets
    }
}

/// Flow router.
#[derive(Clone, Debug, Default)]
pub struct FlowRouter {
    pub director: FlowDirector,
    /// Fail instead of leaving pits as internal sinks.
    pub require_filled: bool,
}

impl FlowRouter {
    pub fn new(director: FlowDirector) -> Result<Self> {
        if let FlowDirector::Mfd { exponent } = director {
            if !(exponent.is_finite() && exponent > 0.0) {
                return Err(LemError::invalid("mfd_exponent", exponent, "must be finite and > 0"));
            }
        }
        Ok(Self { director, require_filled: false })
    }

    pub fn d8() -> Self {
        Self { director: FlowDirector::D8, require_filled: false }
    }

    pub fn mfd(exponent: f64) -> Result<Self> {
        Self::new(FlowDirector::Mfd { exponent })
    }

    pub fn require_filled(mut self, yes: bool) -> Self {
        self.require_filled = yes;
        self
    }

    /// Route flow over the current elevation and write `drainage_area` and
    /// `topographic__steepest_slope` into the grid.
    pub fn route(&self, grid: &mut RasterGrid) -> Result<FlowGraph> {
        self.route_surface(grid, None)
    }

    /// Route over `surface` (typically a sink-filled copy of the elevation) when given,
    /// otherwise over the grid's elevation.
    pub fn route_surface(&self, grid: &mut RasterGrid, surface: Option<&[f64]>) -> Result<FlowGraph> {
        let n = grid.len();
        if let Some(s) = surface {
            if s.len() != n {
                return Err(LemError::configuration(format!(
                    "routing surface has {} values, grid has {n} nodes",
                    s.len()
                )));
            }
        }
        let z = match surface {
            Some(s) => s,
            None => grid.elevation(),
        };
        if let Some(i) = z.iter().position(|v| !v.is_finite()) {
            return Err(LemError::NumericalInstability {
                stage: "route",
                detail: format!("non-finite elevation {} at node {i}", z[i]),
            });
        }

        let mut receiver: Vec<usize> = (0..n).collect();
        let mut receiver_distance = vec![0.0; n];
        let mut steepest_slope = vec![0.0; n];
        let mut sets: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        let mut pits = Vec::new();

        for &i in grid.core_nodes() {
            let zi = z[i];
            let mut lowest: Option<(usize, f64, f64)> = None;
            let mut max_slope = 0.0f64;
            let mut steepest: Option<(usize, f64)> = None;
            let mut lower: Vec<(usize, f64)> = Vec::new();

            for nb in grid.neighbor_iter(i, Connectivity::D8) {
                let zn = z[nb.node];
                if zn >= zi {
                    continue;
                }
                let slope = (zi - zn) / nb.distance;
                // Strict comparisons keep the first neighbour in priority order on ties.
                if lowest.map_or(true, |(_, zl, _)| zn < zl) {
                    lowest = Some((nb.node, zn, nb.distance));
                }
                if slope > max_slope {
                    max_slope = slope;
                    steepest = Some((nb.node, nb.distance));
                }
                lower.push((nb.node, slope));
            }

            steepest_slope[i] = max_slope;
            match self.director {
                FlowDirector::D8 => {
                    if let Some((recv, _, dist)) = lowest {
                        receiver[i] = recv;
                        receiver_distance[i] = dist;
                        sets[i].push((recv, 1.0));
                    }
                }
                FlowDirector::Mfd { exponent } => {
                    if let Some((recv, dist)) = steepest {
                        receiver[i] = recv;
                        receiver_distance[i] = dist;
                        let total: f64 = lower.iter().map(|&(_, s)| s.powf(exponent)).sum();
                        sets[i] = lower
                            .iter()
                            .map(|&(node, s)| (node, s.powf(exponent) / total))
                            .collect();
                    }
                }
            }
            if receiver[i] == i {
                pits.push(i);
            }
        }

        if self.require_filled && !pits.is_empty() {
            return Err(LemError::configuration(format!(
                "{} core nodes have no downslope neighbour; fill sinks before routing",
                pits.len()
            )));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| z[b].total_cmp(&z[a]).then(a.cmp(&b)));

        let receivers = CsrFlowGraph::from_adjacency(&sets);
        let donors = CsrFlowGraph::from_receivers(&receiver);
        let drainage_area = accumulate(grid, &order, &receivers);

        grid.set_field(Field::DrainageArea, &drainage_area)?;
        grid.set_field(Field::SteepestSlope, &steepest_slope)?;

        debug!(
            director = ?self.director,
            pits = pits.len(),
            edges = receivers.num_edges(),
            "flow routed"
        );

        Ok(FlowGraph {
            director: self.director,
            receiver,
            receiver_distance,
            receivers,
            donors,
            order,
            drainage_area,
            steepest_slope,
            pits,
        })
    }
}

/// Each node starts with its own cell area and passes its running total to its receivers.
fn accumulate(grid: &RasterGrid, order: &[usize], receivers: &CsrFlowGraph) -> Vec<f64> {
    let mut area = vec![grid.cell_area(); grid.len()];
    for &node in order {
        let a = area[node];
        for (recv, frac) in receivers.edges_of(node) {
            area[recv] += a * frac;
        }
    }
    area
}
