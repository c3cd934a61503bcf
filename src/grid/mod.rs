//! Struct-of-Arrays raster grid: node geometry, boundary status and per-node fields.
//!
//! Nodes are numbered row-major, `id = row * cols + col`. Row 0 is the bottom edge, so
//! `y = row * dy` grows northwards and `x = col * dx` grows eastwards.
//!
//! Each scalar field is a contiguous `Vec<f64>` in a fixed, enum-keyed slot. Components name
//! the slots they touch through [`Field`] rather than looking fields up by string at runtime.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{LemError, Result};

/// Boundary condition tag carried by every node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Interior node: routed, eroded, diffused and uplifted.
    Core,
    /// Open outlet held at a fixed elevation.
    FixedValue,
    /// Open outlet whose elevation tracks its inward neighbour at a fixed offset.
    FixedGradient,
    /// Inactive: never donates or receives flow and carries no diffusive flux.
    Closed,
}

impl NodeStatus {
    #[inline]
    pub fn is_core(self) -> bool {
        self == NodeStatus::Core
    }

    /// Open boundary nodes act as outlets for flow and as base level for erosion.
    #[inline]
    pub fn is_open_boundary(self) -> bool {
        matches!(self, NodeStatus::FixedValue | NodeStatus::FixedGradient)
    }

    #[inline]
    pub fn is_closed(self) -> bool {
        self == NodeStatus::Closed
    }
}

/// One of the four grid edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Row `rows - 1`.
    Top,
    /// Row 0.
    Bottom,
    /// Column 0.
    Left,
    /// Column `cols - 1`.
    Right,
}

impl Edge {
    pub const ALL: [Edge; 4] = [Edge::Top, Edge::Bottom, Edge::Left, Edge::Right];
}

/// Named scalar node fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Elevation,
    DrainageArea,
    SteepestSlope,
    SteepnessIndex,
    ChiIndex,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Elevation,
        Field::DrainageArea,
        Field::SteepestSlope,
        Field::SteepnessIndex,
        Field::ChiIndex,
    ];

    /// Canonical name used by export and plotting collaborators.
    pub fn name(self) -> &'static str {
        match self {
            Field::Elevation => "topographic__elevation",
            Field::DrainageArea => "drainage_area",
            Field::SteepestSlope => "topographic__steepest_slope",
            Field::SteepnessIndex => "channel__steepness_index",
            Field::ChiIndex => "channel__chi_index",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.name() == name)
    }

    #[inline]
    fn slot(self) -> usize {
        self as usize
    }
}

/// Neighbour connectivity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Four cardinal neighbours.
    D4,
    /// Cardinal plus diagonal neighbours.
    D8,
}

/// Neighbour offsets `(d_row, d_col)` in routing priority order: cardinal neighbours
/// clockwise from north, then diagonals clockwise from north-east.
pub const NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (1, 0),
    (0, 1),
    (-1, 0),
    (0, -1),
    (1, 1),
    (-1, 1),
    (-1, -1),
    (1, -1),
];

/// A neighbour of some node, with the centre-to-centre distance to it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    pub node: usize,
    pub distance: f64,
    pub diagonal: bool,
}

/// Regular raster of nodes.
#[derive(Clone, Debug)]
pub struct RasterGrid {
    rows: usize,
    cols: usize,
    dx: f64,
    dy: f64,
    status: Vec<NodeStatus>,
    core_nodes: Vec<usize>,
    /// `(node, anchor, offset)` for fixed-gradient nodes: `z[node] = z[anchor] + offset`.
    gradient_anchors: Vec<(usize, usize, f64)>,
    fields: [Vec<f64>; 5],
}

impl RasterGrid {
    /// Square-cell grid with every node `Core` and zero elevation.
    pub fn new(rows: usize, cols: usize, spacing: f64) -> Result<Self> {
        Self::with_spacing(rows, cols, spacing, spacing)
    }

    pub fn with_spacing(rows: usize, cols: usize, dx: f64, dy: f64) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(LemError::configuration(format!(
                "grid dimensions must be positive, got {rows}x{cols}"
            )));
        }
        for (key, v) in [("dx", dx), ("dy", dy)] {
            if !(v.is_finite() && v > 0.0) {
                return Err(LemError::invalid(key, v, "grid spacing must be finite and > 0"));
            }
        }
        let n = rows * cols;
        Ok(Self {
            rows,
            cols,
            dx,
            dy,
            status: vec![NodeStatus::Core; n],
            core_nodes: (0..n).collect(),
            gradient_anchors: Vec::new(),
            fields: std::array::from_fn(|_| vec![0.0; n]),
        })
    }

    /// Build from a DEM raster whose first axis is the row (row 0 = bottom edge).
    ///
    /// No-data cells must already have been resolved by the loader.
    pub fn from_elevation(elevation: &Array2<f64>, dx: f64, dy: f64) -> Result<Self> {
        let (rows, cols) = elevation.dim();
        let mut grid = Self::with_spacing(rows, cols, dx, dy)?;
        for (i, &z) in elevation.iter().enumerate() {
            if !z.is_finite() {
                let (r, c) = grid.grid_index(i);
                return Err(LemError::configuration(format!(
                    "non-finite elevation {z} at row {r}, col {c}; resolve no-data before loading"
                )));
            }
            grid.fields[Field::Elevation.slot()][i] = z;
        }
        Ok(grid)
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn dx(&self) -> f64 {
        self.dx
    }

    #[inline]
    pub fn dy(&self) -> f64 {
        self.dy
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn cell_area(&self) -> f64 {
        self.dx * self.dy
    }

    #[inline]
    pub fn total_area(&self) -> f64 {
        self.len() as f64 * self.cell_area()
    }

    #[inline]
    pub fn diagonal(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    #[inline]
    pub fn flat_index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn grid_index(&self, idx: usize) -> (usize, usize) {
        (idx / self.cols, idx % self.cols)
    }

    #[inline]
    pub fn node_x(&self, node: usize) -> f64 {
        (node % self.cols) as f64 * self.dx
    }

    #[inline]
    pub fn node_y(&self, node: usize) -> f64 {
        (node / self.cols) as f64 * self.dy
    }

    #[inline]
    pub fn is_perimeter(&self, row: usize, col: usize) -> bool {
        row == 0 || col == 0 || row == self.rows - 1 || col == self.cols - 1
    }

    /// Node ids along one edge, in increasing id order.
    pub fn nodes_at_edge(&self, edge: Edge) -> Vec<usize> {
        match edge {
            Edge::Bottom => (0..self.cols).collect(),
            Edge::Top => (0..self.cols).map(|c| self.flat_index(self.rows - 1, c)).collect(),
            Edge::Left => (0..self.rows).map(|r| self.flat_index(r, 0)).collect(),
            Edge::Right => (0..self.rows).map(|r| self.flat_index(r, self.cols - 1)).collect(),
        }
    }

    // ------------------------------------------------------------------
    // Boundary status
    // ------------------------------------------------------------------

    #[inline]
    pub fn status(&self, node: usize) -> NodeStatus {
        self.status[node]
    }

    pub fn status_array(&self) -> &[NodeStatus] {
        &self.status
    }

    #[inline]
    pub fn core_nodes(&self) -> &[usize] {
        &self.core_nodes
    }

    pub fn open_boundary_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(move |&i| self.status[i].is_open_boundary())
    }

    /// Tag every node on `edge` with `status`. Corners take the status of the last edge set.
    pub fn set_boundary(&mut self, edge: Edge, status: NodeStatus) {
        for node in self.nodes_at_edge(edge) {
            self.status[node] = status;
        }
        self.status_changed();
    }

    pub fn set_status(&mut self, node: usize, status: NodeStatus) {
        self.status[node] = status;
        self.status_changed();
    }

    /// Replace the whole status array (checkpoint restore).
    pub fn set_status_array(&mut self, status: Vec<NodeStatus>) -> Result<()> {
        if status.len() != self.len() {
            return Err(LemError::configuration(format!(
                "status array has {} entries, grid has {} nodes",
                status.len(),
                self.len()
            )));
        }
        self.status = status;
        self.status_changed();
        Ok(())
    }

    /// Close the selected edges and make the others fixed-value outlets.
    pub fn set_closed_boundaries_at_grid_edges(
        &mut self,
        right_is_closed: bool,
        top_is_closed: bool,
        left_is_closed: bool,
        bottom_is_closed: bool,
    ) {
        let tag = |closed: bool| if closed { NodeStatus::Closed } else { NodeStatus::FixedValue };
        // Open edges are applied last so corners shared with a closed edge stay open.
        let mut edges = [
            (Edge::Right, right_is_closed),
            (Edge::Top, top_is_closed),
            (Edge::Left, left_is_closed),
            (Edge::Bottom, bottom_is_closed),
        ];
        edges.sort_by_key(|&(_, closed)| !closed);
        for (edge, closed) in edges {
            for node in self.nodes_at_edge(edge) {
                self.status[node] = tag(closed);
            }
        }
        self.status_changed();
    }

    /// All four edges as fixed-value outlets.
    pub fn set_open_boundaries(&mut self) {
        self.set_closed_boundaries_at_grid_edges(false, false, false, false);
    }

    fn status_changed(&mut self) {
        self.core_nodes = (0..self.len()).filter(|&i| self.status[i].is_core()).collect();
        self.capture_fixed_gradients();
    }

    /// Record the current offset between each fixed-gradient node and its inward anchor.
    ///
    /// Called automatically whenever statuses change; call again after replacing the
    /// elevation field if the gradients should follow the new surface.
    pub fn capture_fixed_gradients(&mut self) {
        self.gradient_anchors.clear();
        if self.rows < 3 || self.cols < 3 {
            return;
        }
        let z = &self.fields[Field::Elevation.slot()];
        for node in 0..self.len() {
            if self.status[node] != NodeStatus::FixedGradient {
                continue;
            }
            let (r, c) = (node / self.cols, node % self.cols);
            let anchor = r.clamp(1, self.rows - 2) * self.cols + c.clamp(1, self.cols - 2);
            if anchor != node {
                self.gradient_anchors.push((node, anchor, z[node] - z[anchor]));
            }
        }
    }

    /// Re-impose the captured offsets on fixed-gradient nodes.
    pub fn update_fixed_gradient_nodes(&mut self) {
        let z = &mut self.fields[Field::Elevation.slot()];
        for &(node, anchor, offset) in &self.gradient_anchors {
            z[node] = z[anchor] + offset;
        }
    }

    // ------------------------------------------------------------------
    // Adjacency
    // ------------------------------------------------------------------

    /// Neighbours of `node` in priority order, skipping off-grid and closed nodes.
    pub fn neighbor_iter(&self, node: usize, connectivity: Connectivity) -> Neighbors<'_> {
        let (row, col) = self.grid_index(node);
        Neighbors {
            grid: self,
            row,
            col,
            k: 0,
            end: match connectivity {
                Connectivity::D4 => 4,
                Connectivity::D8 => 8,
            },
        }
    }

    /// Ids of up to eight D8 neighbours of `node`, cardinal first.
    pub fn neighbors(&self, node: usize) -> Vec<usize> {
        self.neighbor_iter(node, Connectivity::D8).map(|n| n.node).collect()
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    #[inline]
    pub fn field(&self, field: Field) -> &[f64] {
        &self.fields[field.slot()]
    }

    #[inline]
    pub fn field_mut(&mut self, field: Field) -> &mut [f64] {
        &mut self.fields[field.slot()]
    }

    #[inline]
    pub fn elevation(&self) -> &[f64] {
        self.field(Field::Elevation)
    }

    #[inline]
    pub fn elevation_mut(&mut self) -> &mut [f64] {
        self.field_mut(Field::Elevation)
    }

    /// Overwrite a field from a flat node-ordered slice.
    pub fn set_field(&mut self, field: Field, values: &[f64]) -> Result<()> {
        if values.len() != self.len() {
            return Err(LemError::configuration(format!(
                "field '{}' needs {} values, got {}",
                field.name(),
                self.len(),
                values.len()
            )));
        }
        self.fields[field.slot()].copy_from_slice(values);
        Ok(())
    }

    /// Row-major `rows x cols` view of a field for plotting/export.
    pub fn field_view(&self, field: Field) -> Result<ArrayView2<'_, f64>> {
        ArrayView2::from_shape((self.rows, self.cols), self.field(field))
            .map_err(|e| LemError::configuration(format!("field '{}': {e}", field.name())))
    }

    /// Owned 2D copy of a field.
    pub fn field_array(&self, field: Field) -> Result<Array2<f64>> {
        Ok(self.field_view(field)?.to_owned())
    }

    /// Sum of elevation over core nodes.
    pub fn core_elevation_sum(&self) -> f64 {
        let z = self.elevation();
        self.core_nodes.iter().map(|&i| z[i]).sum()
    }
}

/// Iterator over the in-grid, non-closed neighbours of a node.
pub struct Neighbors<'a> {
    grid: &'a RasterGrid,
    row: usize,
    col: usize,
    k: usize,
    end: usize,
}

impl Iterator for Neighbors<'_> {
    type Item = Neighbor;

    fn next(&mut self) -> Option<Neighbor> {
        let g = self.grid;
        while self.k < self.end {
            let (dr, dc) = NEIGHBOR_OFFSETS[self.k];
            let diagonal = self.k >= 4;
            self.k += 1;

            let r = self.row as isize + dr;
            let c = self.col as isize + dc;
            if r < 0 || c < 0 || r >= g.rows as isize || c >= g.cols as isize {
                continue;
            }
            let node = g.flat_index(r as usize, c as usize);
            if g.status[node].is_closed() {
                continue;
            }
            let distance = if diagonal {
                g.diagonal()
            } else if dr != 0 {
                g.dy
            } else {
                g.dx
            };
            return Some(Neighbor { node, distance, diagonal });
        }
        None
    }
}
