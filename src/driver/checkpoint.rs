//! Serializable snapshot of the evolving state.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{LemError, Result};
use crate::grid::{NodeStatus, RasterGrid};

/// Everything needed to continue a run: geometry, boundary status, elevation and clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub rows: usize,
    pub cols: usize,
    pub dx: f64,
    pub dy: f64,
    pub status: Vec<NodeStatus>,
    pub elevation: Vec<f64>,
    pub elapsed: f64,
    #[serde(default)]
    pub steps: u64,
}

impl Checkpoint {
    pub fn capture(grid: &RasterGrid, elapsed: f64, steps: u64) -> Self {
        Self {
            rows: grid.rows(),
            cols: grid.cols(),
            dx: grid.dx(),
            dy: grid.dy(),
            status: grid.status_array().to_vec(),
            elevation: grid.elevation().to_vec(),
            elapsed,
            steps,
        }
    }

    /// Rebuild the grid, checking that the arrays match the geometry.
    pub fn to_grid(&self) -> Result<RasterGrid> {
        let n = self.rows * self.cols;
        if self.elevation.len() != n {
            return Err(LemError::configuration(format!(
                "checkpoint elevation has {} values for a {}x{} grid",
                self.elevation.len(),
                self.rows,
                self.cols
            )));
        }
        let mut grid = RasterGrid::with_spacing(self.rows, self.cols, self.dx, self.dy)?;
        grid.elevation_mut().copy_from_slice(&self.elevation);
        grid.set_status_array(self.status.clone())?;
        Ok(grid)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        Ok(serde_json::to_writer(writer, self)?)
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Edge;

    #[test]
    fn test_checkpoint_restores_grid() {
        let mut grid = RasterGrid::with_spacing(3, 4, 2.0, 3.0).unwrap();
        grid.set_boundary(Edge::Left, NodeStatus::Closed);
        for (i, z) in grid.elevation_mut().iter_mut().enumerate() {
            *z = 0.1 * i as f64;
        }
        let cp = Checkpoint::capture(&grid, 12.5, 25);
        let back = Checkpoint::from_json(&cp.to_json().unwrap()).unwrap();
        assert_eq!(back, cp);
        let restored = back.to_grid().unwrap();
        assert_eq!(restored.elevation(), grid.elevation());
        assert_eq!(restored.status_array(), grid.status_array());
        assert_eq!(restored.core_nodes(), grid.core_nodes());
        assert_eq!(restored.dy(), 3.0);
    }

    #[test]
    fn test_checkpoint_shape_mismatch() {
        let grid = RasterGrid::new(2, 2, 1.0).unwrap();
        let mut cp = Checkpoint::capture(&grid, 0.0, 0);
        cp.elevation.pop();
        assert!(matches!(cp.to_grid(), Err(LemError::Configuration(_))));
    }

    #[test]
    fn test_writer_round_trip() {
        let grid = RasterGrid::new(2, 3, 1.0).unwrap();
        let cp = Checkpoint::capture(&grid, 1.0, 1);
        let mut buf = Vec::new();
        cp.write_to(&mut buf).unwrap();
        assert_eq!(Checkpoint::read_from(buf.as_slice()).unwrap(), cp);
    }
}
