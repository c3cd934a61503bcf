//! Priority-Flood+ε depression filling.
//!
//! Seeds a min-heap with every open boundary node and floods inwards in increasing elevation
//! order. A node reached from a neighbour that is not strictly lower is raised just above it,
//! so every core node ends up with a strictly descending path to an outlet.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::debug;

use crate::error::{LemError, Result};
use crate::grid::{Connectivity, RasterGrid};

#[derive(Clone, Copy, Debug, PartialEq)]
struct FloodEntry {
    elevation: f64,
    index: usize,
}

impl Eq for FloodEntry {}

impl PartialOrd for FloodEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloodEntry {
    // Reversed so BinaryHeap pops the lowest elevation, then the lowest id.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .elevation
            .total_cmp(&self.elevation)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Smallest representable value strictly greater than `x`.
fn next_above(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// Summary of one fill pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FillReport {
    pub raised_nodes: usize,
    pub max_raise: f64,
}

/// Depression filler.
#[derive(Clone, Debug)]
pub struct SinkFiller {
    /// Increment placed between a raised node and the neighbour it drains to.
    pub epsilon: f64,
}

impl Default for SinkFiller {
    fn default() -> Self {
        Self { epsilon: 1e-6 }
    }
}

impl SinkFiller {
    pub fn new(epsilon: f64) -> Result<Self> {
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(LemError::invalid("fill_epsilon", epsilon, "must be finite and > 0"));
        }
        Ok(Self { epsilon })
    }

    /// Fill every depression in place.
    pub fn fill(&self, grid: &mut RasterGrid) -> Result<FillReport> {
        let (filled, report) = self.filled_surface(grid)?;
        grid.elevation_mut().copy_from_slice(&filled);
        Ok(report)
    }

    /// Depression-free copy of the elevation field; the grid is left untouched.
    pub fn filled_surface(&self, grid: &RasterGrid) -> Result<(Vec<f64>, FillReport)> {
        let n = grid.len();
        let mut visited = vec![false; n];
        let mut heap = BinaryHeap::new();

        for i in 0..n {
            let status = grid.status(i);
            if status.is_open_boundary() {
                visited[i] = true;
                heap.push(FloodEntry { elevation: grid.elevation()[i], index: i });
            } else if status.is_closed() {
                visited[i] = true;
            }
        }
        if heap.is_empty() {
            return Err(LemError::configuration(
                "no open boundary node: the surface has no outlet to drain to",
            ));
        }

        let mut filled = grid.elevation().to_vec();
        let mut report = FillReport::default();

        while let Some(entry) = heap.pop() {
            let floor = entry.elevation;
            for nb in grid.neighbor_iter(entry.index, Connectivity::D8) {
                let ni = nb.node;
                if visited[ni] {
                    continue;
                }
                visited[ni] = true;
                if filled[ni] <= floor {
                    let raised = (floor + self.epsilon).max(next_above(floor));
                    report.raised_nodes += 1;
                    report.max_raise = report.max_raise.max(raised - filled[ni]);
                    filled[ni] = raised;
                }
                heap.push(FloodEntry { elevation: filled[ni], index: ni });
            }
        }

        let stranded = visited.iter().filter(|&&v| !v).count();
        if stranded > 0 {
            return Err(LemError::configuration(format!(
                "{stranded} core nodes are enclosed by closed nodes and cannot drain"
            )));
        }

        debug!(
            raised = report.raised_nodes,
            max_raise = report.max_raise,
            "sink fill complete"
        );
        Ok((filled, report))
    }
}

/// Core nodes with no strictly lower D8 neighbour.
pub fn undrained_core_nodes(grid: &RasterGrid) -> Vec<usize> {
    let z = grid.elevation();
    grid.core_nodes()
        .iter()
        .copied()
        .filter(|&i| {
            !grid
                .neighbor_iter(i, Connectivity::D8)
                .any(|nb| z[nb.node] < z[i])
        })
        .collect()
}
