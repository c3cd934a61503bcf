//! Compressed Sparse Row (CSR) graph for flow-routing topology.
//!
//! Used both for receiver sets (node -> downslope receivers with partition fractions) and
//! for the inverse donor graph (node -> upslope donors).

/// CSR representation of a weighted directed graph over grid nodes.
#[derive(Clone, Debug, Default)]
pub struct CsrFlowGraph {
    pub offsets: Vec<usize>,
    pub neighbors: Vec<usize>,
    pub weights: Vec<f64>,
    pub num_nodes: usize,
}

impl CsrFlowGraph {
    pub fn from_adjacency(adj: &[Vec<(usize, f64)>]) -> Self {
        let num_nodes = adj.len();
        let total_edges: usize = adj.iter().map(|v| v.len()).sum();
        let mut offsets = Vec::with_capacity(num_nodes + 1);
        let mut neighbors = Vec::with_capacity(total_edges);
        let mut weights = Vec::with_capacity(total_edges);
        let mut offset = 0;
        for node_edges in adj.iter() {
            offsets.push(offset);
            for &(n, w) in node_edges {
                neighbors.push(n);
                weights.push(w);
            }
            offset += node_edges.len();
        }
        offsets.push(offset);
        Self { offsets, neighbors, weights, num_nodes }
    }

    /// Donor graph: for each node, the nodes whose receiver it is. Self-receivers are skipped.
    pub fn from_receivers(receivers: &[usize]) -> Self {
        let num_nodes = receivers.len();
        let mut counts = vec![0usize; num_nodes];
        for (donor, &recv) in receivers.iter().enumerate() {
            if recv < num_nodes && recv != donor {
                counts[recv] += 1;
            }
        }
        let mut offsets = Vec::with_capacity(num_nodes + 1);
        let mut running = 0;
        offsets.push(0);
        for &c in counts.iter() {
            running += c;
            offsets.push(running);
        }
        let mut neighbors = vec![0usize; running];
        let mut write_pos = offsets.clone();
        for (donor, &recv) in receivers.iter().enumerate() {
            if recv < num_nodes && recv != donor {
                neighbors[write_pos[recv]] = donor;
                write_pos[recv] += 1;
            }
        }
        Self { offsets, neighbors, weights: vec![1.0; running], num_nodes }
    }

    #[inline]
    pub fn neighbors_of(&self, node: usize) -> &[usize] {
        &self.neighbors[self.offsets[node]..self.offsets[node + 1]]
    }

    #[inline]
    pub fn weights_of(&self, node: usize) -> &[f64] {
        &self.weights[self.offsets[node]..self.offsets[node + 1]]
    }

    /// `(neighbor, weight)` pairs of a node.
    pub fn edges_of(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.neighbors_of(node)
            .iter()
            .copied()
            .zip(self.weights_of(node).iter().copied())
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.neighbors.len()
    }

    #[inline]
    pub fn degree(&self, node: usize) -> usize {
        self.offsets[node + 1] - self.offsets[node]
    }

    /// All nodes reachable from `root` by following edges, `root` first (BFS order).
    pub fn reachable_from(&self, root: usize) -> Vec<usize> {
        let mut out = vec![root];
        let mut head = 0;
        while head < out.len() {
            let node = out[head];
            head += 1;
            out.extend_from_slice(self.neighbors_of(node));
        }
        out
    }
}

/// Outlet-first ordering over a single-receiver forest: every node appears after its
/// receiver. Nodes that are their own receiver are the roots.
///
/// Nodes caught in a receiver cycle never reach a root and are left out, so a result shorter
/// than `receivers.len()` signals a malformed graph.
pub fn stack_order(receivers: &[usize], donors: &CsrFlowGraph) -> Vec<usize> {
    let n = receivers.len();
    let mut stack: Vec<usize> = (0..n).filter(|&i| receivers[i] == i).collect();
    let mut visited = vec![false; n];
    for &node in &stack {
        visited[node] = true;
    }
    let mut head = 0;
    while head < stack.len() {
        let node = stack[head];
        head += 1;
        for &donor in donors.neighbors_of(node) {
            if !visited[donor] {
                visited[donor] = true;
                stack.push(donor);
            }
        }
    }
    stack
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0 <- 1 <- 2, 0 <- 3, 4 is its own outlet
    fn chain() -> Vec<usize> {
        vec![0, 0, 1, 0, 4]
    }

    #[test]
    fn test_donor_graph_inverts_receivers() {
        let donors = CsrFlowGraph::from_receivers(&chain());
        assert_eq!(donors.neighbors_of(0), &[1, 3]);
        assert_eq!(donors.neighbors_of(1), &[2]);
        assert_eq!(donors.degree(4), 0);
        assert_eq!(donors.num_edges(), 3);
    }

    #[test]
    fn test_stack_puts_receivers_first() {
        let receivers = chain();
        let donors = CsrFlowGraph::from_receivers(&receivers);
        let stack = stack_order(&receivers, &donors);
        assert_eq!(stack.len(), receivers.len());
        let pos: Vec<usize> = (0..receivers.len())
            .map(|i| stack.iter().position(|&s| s == i).unwrap())
            .collect();
        for (i, &r) in receivers.iter().enumerate() {
            assert!(pos[r] <= pos[i]);
        }
    }

    #[test]
    fn test_stack_drops_cycles() {
        let receivers = vec![0, 2, 1];
        let donors = CsrFlowGraph::from_receivers(&receivers);
        assert_eq!(stack_order(&receivers, &donors), vec![0]);
    }

    #[test]
    fn test_weighted_adjacency() {
        let g = CsrFlowGraph::from_adjacency(&[vec![(1, 0.25), (2, 0.75)], vec![], vec![]]);
        let edges: Vec<(usize, f64)> = g.edges_of(0).collect();
        assert_eq!(edges, vec![(1, 0.25), (2, 0.75)]);
        assert_eq!(g.degree(1), 0);
    }

    #[test]
    fn test_reachable_from_collects_upstream() {
        let donors = CsrFlowGraph::from_receivers(&chain());
        let mut up = donors.reachable_from(0);
        up.sort_unstable();
        assert_eq!(up, vec![0, 1, 2, 3]);
    }
}
