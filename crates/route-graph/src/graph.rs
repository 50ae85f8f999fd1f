//! Per-cluster weighted multigraph
//!
//! Built fresh for every tree computation from a cluster snapshot and the
//! current link cost table. Parallel links stay separate edges so the
//! port pair of the traversed link can be recovered from a path.

use crate::{Cluster, GraphError, Link, LinkCosts, Result, SwitchId};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use std::collections::HashMap;

/// Weight used for links that have no entry in the cost table
pub const DEFAULT_LINK_WEIGHT: u64 = 1;

/// An edge in the cluster graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEdge {
    /// The physical link this edge stands for
    pub link: Link,
    pub weight: u64,
}

/// Directed weighted graph of one cluster
#[derive(Debug, Clone)]
pub struct WeightedGraph {
    graph: DiGraph<SwitchId, LinkEdge>,
    node_index: HashMap<SwitchId, NodeIndex>,
}

impl WeightedGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index: HashMap::new(),
        }
    }

    /// Build the graph of a cluster, weighting each link by its cost
    /// (or [`DEFAULT_LINK_WEIGHT`] when the table has none)
    pub fn from_cluster(cluster: &Cluster, costs: &LinkCosts) -> Self {
        let mut graph = Self::new();
        for node in cluster.nodes() {
            graph.add_node(*node);
        }
        for link in cluster.links() {
            let weight = costs
                .get(link)
                .map(|c| u64::from(*c))
                .unwrap_or(DEFAULT_LINK_WEIGHT);
            // Cluster guarantees both endpoints are present
            let _ = graph.add_link(*link, weight);
        }
        graph
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, id: SwitchId) -> NodeIndex {
        if let Some(idx) = self.node_index.get(&id) {
            return *idx;
        }
        let idx = self.graph.add_node(id);
        self.node_index.insert(id, idx);
        idx
    }

    /// Add a directed edge for a link
    pub fn add_link(&mut self, link: Link, weight: u64) -> Result<EdgeIndex> {
        let from = self.index_of(link.src).ok_or(GraphError::NodeNotFound(link.src))?;
        let to = self.index_of(link.dst).ok_or(GraphError::NodeNotFound(link.dst))?;
        Ok(self.graph.add_edge(from, to, LinkEdge { link, weight }))
    }

    pub fn index_of(&self, id: SwitchId) -> Option<NodeIndex> {
        self.node_index.get(&id).copied()
    }

    pub fn switch_at(&self, idx: NodeIndex) -> SwitchId {
        self.graph[idx]
    }

    pub fn edge(&self, idx: EdgeIndex) -> &LinkEdge {
        &self.graph[idx]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All edges from `from` to `to` (parallel links included)
    pub fn edges_between(&self, from: SwitchId, to: SwitchId) -> Vec<&LinkEdge> {
        match (self.index_of(from), self.index_of(to)) {
            (Some(a), Some(b)) => self
                .graph
                .edges_connecting(a, b)
                .map(|e| e.weight())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn inner(&self) -> &DiGraph<SwitchId, LinkEdge> {
        &self.graph
    }
}

impl Default for WeightedGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PortId;

    fn link(src: u64, src_port: PortId, dst: u64, dst_port: PortId) -> Link {
        Link::new(SwitchId(src), src_port, SwitchId(dst), dst_port)
    }

    #[test]
    fn test_weights_from_cost_table() {
        let cluster = Cluster::new(
            [SwitchId(1), SwitchId(2), SwitchId(3)],
            [link(1, 1, 2, 1), link(2, 2, 3, 1), link(3, 2, 1, 2)],
        )
        .unwrap();
        let mut costs = LinkCosts::new();
        costs.insert(link(1, 1, 2, 1), 40);

        let graph = WeightedGraph::from_cluster(&cluster, &costs);

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.edges_between(SwitchId(1), SwitchId(2))[0].weight, 40);
        // No cost known: neutral weight
        assert_eq!(
            graph.edges_between(SwitchId(2), SwitchId(3))[0].weight,
            DEFAULT_LINK_WEIGHT
        );
    }

    #[test]
    fn test_parallel_links_stay_distinct() {
        let cluster = Cluster::new(
            [SwitchId(1), SwitchId(2)],
            [link(1, 1, 2, 1), link(1, 2, 2, 2)],
        )
        .unwrap();
        let mut costs = LinkCosts::new();
        costs.insert(link(1, 2, 2, 2), 7);

        let graph = WeightedGraph::from_cluster(&cluster, &costs);
        let mut edges = graph.edges_between(SwitchId(1), SwitchId(2));
        edges.sort_by_key(|e| e.link);

        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].link, link(1, 1, 2, 1));
        assert_eq!(edges[0].weight, 1);
        assert_eq!(edges[1].link, link(1, 2, 2, 2));
        assert_eq!(edges[1].weight, 7);
    }

    #[test]
    fn test_add_link_unknown_node() {
        let mut graph = WeightedGraph::new();
        graph.add_node(SwitchId(1));

        let err = graph.add_link(link(1, 1, 9, 1), 1).unwrap_err();
        assert_eq!(err, GraphError::NodeNotFound(SwitchId(9)));
    }
}
