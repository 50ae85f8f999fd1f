//! K shortest loopless paths (Yen)
//!
//! The single-path primitive is petgraph's A* with a zero heuristic,
//! which is Dijkstra, run over an edge-filtered view of the graph so
//! that spur searches can exclude root-path vertices and deviation edges
//! without copying the graph.
//!
//! Paths are identified by their vertex sequence. Where parallel links
//! join two consecutive vertices the cheapest one is used (lowest edge
//! index on ties), and a deviation bans every parallel edge between the
//! pair, so no two returned paths differ only in port choice.

use crate::graph::{LinkEdge, WeightedGraph};
use crate::{Link, SwitchId};
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::trace;

/// A loopless path through a cluster graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedPath {
    vertices: Vec<SwitchId>,
    links: Vec<Link>,
    weight: u64,
}

impl WeightedPath {
    /// Build a path from its traversed links; `None` if the links do not
    /// chain or the sequence is empty
    pub fn from_links(links: Vec<Link>, weight: u64) -> Option<Self> {
        let first = links.first()?;
        let mut vertices = Vec::with_capacity(links.len() + 1);
        vertices.push(first.src);
        for link in &links {
            if vertices.last() != Some(&link.src) {
                return None;
            }
            vertices.push(link.dst);
        }
        Some(Self {
            vertices,
            links,
            weight,
        })
    }

    pub fn vertices(&self) -> &[SwitchId] {
        &self.vertices
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Sum of traversed edge weights
    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn hop_count(&self) -> usize {
        self.links.len()
    }

    pub fn source(&self) -> SwitchId {
        self.vertices[0]
    }

    pub fn destination(&self) -> SwitchId {
        self.vertices[self.vertices.len() - 1]
    }

    /// The link entering the destination
    pub fn last_link(&self) -> Option<&Link> {
        self.links.last()
    }
}

/// Path over graph indices, used while searching
#[derive(Debug, Clone)]
struct IndexPath {
    nodes: Vec<NodeIndex>,
    edges: Vec<EdgeIndex>,
    cost: u64,
}

impl IndexPath {
    fn into_path(self, graph: &WeightedGraph) -> WeightedPath {
        WeightedPath {
            vertices: self.nodes.iter().map(|n| graph.switch_at(*n)).collect(),
            links: self.edges.iter().map(|e| graph.edge(*e).link).collect(),
            weight: self.cost,
        }
    }
}

/// Single shortest path from `source` to `destination`
pub fn shortest_path(
    graph: &WeightedGraph,
    source: SwitchId,
    destination: SwitchId,
) -> Option<WeightedPath> {
    let from = graph.index_of(source)?;
    let to = graph.index_of(destination)?;
    if from == to {
        return None;
    }
    search(graph.inner(), from, to, &HashSet::new(), &HashSet::new())
        .map(|p| p.into_path(graph))
}

/// Up to `k` loopless paths from `source` to `destination`, in
/// non-decreasing weight order
///
/// Returns an empty list when the destination is unreachable, either
/// endpoint is unknown, or `source == destination`.
pub fn k_shortest_paths(
    graph: &WeightedGraph,
    source: SwitchId,
    destination: SwitchId,
    k: usize,
) -> Vec<WeightedPath> {
    let (Some(from), Some(to)) = (graph.index_of(source), graph.index_of(destination)) else {
        return Vec::new();
    };
    if k == 0 || from == to {
        return Vec::new();
    }

    let g = graph.inner();
    let Some(first) = search(g, from, to, &HashSet::new(), &HashSet::new()) else {
        return Vec::new();
    };

    let mut accepted = vec![first];
    let mut candidates: Vec<IndexPath> = Vec::new();

    while accepted.len() < k {
        let previous = accepted[accepted.len() - 1].clone();

        for i in 0..previous.nodes.len() - 1 {
            let spur = previous.nodes[i];
            let root_nodes = &previous.nodes[..=i];
            let root_edges = &previous.edges[..i];

            // Ban the next hop of every accepted path sharing this root
            let mut banned_edges = HashSet::new();
            for path in &accepted {
                if path.nodes.len() > i + 1 && path.nodes[..=i] == *root_nodes {
                    banned_edges.extend(
                        g.edges_connecting(path.nodes[i], path.nodes[i + 1])
                            .map(|e| e.id()),
                    );
                }
            }
            let banned_nodes: HashSet<NodeIndex> = root_nodes[..i].iter().copied().collect();

            let Some(spur_path) = search(g, spur, to, &banned_nodes, &banned_edges) else {
                continue;
            };

            let root_cost: u64 = root_edges.iter().map(|e| g[*e].weight).sum();
            let mut nodes = root_nodes.to_vec();
            nodes.extend_from_slice(&spur_path.nodes[1..]);
            let mut edges = root_edges.to_vec();
            edges.extend_from_slice(&spur_path.edges);
            let candidate = IndexPath {
                nodes,
                edges,
                cost: root_cost + spur_path.cost,
            };

            let known = accepted
                .iter()
                .chain(candidates.iter())
                .any(|p| p.nodes == candidate.nodes);
            if !known {
                candidates.push(candidate);
            }
        }

        // Cheapest candidate, fewer hops first, earliest found on ties
        let best = candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (p.cost, p.nodes.len()))
            .map(|(i, _)| i);
        match best {
            Some(i) => accepted.push(candidates.remove(i)),
            None => break,
        }
    }

    trace!(
        source = %source,
        destination = %destination,
        found = accepted.len(),
        "k-shortest search done"
    );

    accepted.into_iter().map(|p| p.into_path(graph)).collect()
}

/// Dijkstra from `from` to `to` avoiding banned nodes and edges
fn search(
    g: &DiGraph<SwitchId, LinkEdge>,
    from: NodeIndex,
    to: NodeIndex,
    banned_nodes: &HashSet<NodeIndex>,
    banned_edges: &HashSet<EdgeIndex>,
) -> Option<IndexPath> {
    let allowed = |e: petgraph::graph::EdgeReference<'_, LinkEdge>| {
        !banned_edges.contains(&e.id())
            && !banned_nodes.contains(&e.source())
            && !banned_nodes.contains(&e.target())
    };
    let filtered = EdgeFiltered::from_fn(g, allowed);

    let (cost, nodes) = astar(
        &filtered,
        from,
        |n| n == to,
        |e| e.weight().weight,
        |_| 0,
    )?;

    // astar yields vertices only; recover the cheapest allowed edge per hop
    let mut edges = Vec::with_capacity(nodes.len().saturating_sub(1));
    for pair in nodes.windows(2) {
        let edge = g
            .edges_connecting(pair[0], pair[1])
            .filter(|e| allowed(*e))
            .min_by_key(|e| (e.weight().weight, e.id()))?;
        edges.push(edge.id());
    }

    Some(IndexPath { nodes, edges, cost })
}
