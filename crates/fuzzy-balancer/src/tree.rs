//! Destination-rooted broadcast trees
//!
//! For a root `r` and every other node `n` of its cluster, a path
//! `r -> .. -> p -> n` is chosen by the configured [`PathStrategy`].
//! The tree records, for `n`, the link `n -> p` (its next hop towards
//! the root) and the chosen path's weight. Where several links join
//! `n` to `p`, the mirror of the path's last link is preferred.
//!
//! Trees are always built from scratch over a fresh graph; a forest
//! covering every switch is assembled in parallel and published whole.

use crate::{BalancerError, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use route_graph::{
    k_shortest_paths, shortest_path, Cluster, FuzzySelector, GraphError, Link, LinkCosts,
    SwitchId, WeightedGraph, WeightedPath,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Next hops and distances of one cluster towards a single root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastTree {
    root: SwitchId,
    next_hop: BTreeMap<SwitchId, Link>,
    cost: BTreeMap<SwitchId, u64>,
}

impl BroadcastTree {
    /// A tree holding only its root
    pub fn new(root: SwitchId) -> Self {
        Self {
            root,
            next_hop: BTreeMap::new(),
            cost: BTreeMap::from([(root, 0)]),
        }
    }

    pub fn root(&self) -> SwitchId {
        self.root
    }

    /// Link leaving `node` towards the root; `None` for the root itself
    /// and for nodes the root could not reach
    pub fn next_hop(&self, node: SwitchId) -> Option<&Link> {
        self.next_hop.get(&node)
    }

    /// Weight of the path chosen between the root and `node`
    pub fn cost(&self, node: SwitchId) -> Option<u64> {
        self.cost.get(&node).copied()
    }

    pub fn next_hops(&self) -> &BTreeMap<SwitchId, Link> {
        &self.next_hop
    }

    pub fn costs(&self) -> &BTreeMap<SwitchId, u64> {
        &self.cost
    }

    /// Nodes covered by the tree, root included
    pub fn len(&self) -> usize {
        self.cost.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cost.is_empty()
    }

    /// Links followed from `node` to the root
    pub fn route_to_root(&self, node: SwitchId) -> Result<Vec<Link>> {
        let mut route = Vec::new();
        let mut seen = BTreeSet::from([node]);
        let mut current = node;

        while current != self.root {
            let link = self
                .next_hop
                .get(&current)
                .ok_or(GraphError::NoPath(node, self.root))?;
            route.push(*link);
            current = link.dst;
            if !seen.insert(current) {
                return Err(BalancerError::TreeCycle {
                    root: self.root,
                    node,
                });
            }
        }
        Ok(route)
    }

    fn insert(&mut self, node: SwitchId, hop: Link, cost: u64) {
        self.next_hop.insert(node, hop);
        self.cost.insert(node, cost);
    }
}

/// Picks the path a tree uses between its root and one node
pub trait PathStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn best_path(&self, graph: &WeightedGraph, root: SwitchId, node: SwitchId)
        -> Option<WeightedPath>;
}

/// K shortest paths ranked by the fuzzy hop-count/weight criterion
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyKShortest {
    pub k: usize,
    pub selector: FuzzySelector,
}

impl FuzzyKShortest {
    pub fn new(k: usize, selector: FuzzySelector) -> Self {
        Self { k, selector }
    }
}

impl Default for FuzzyKShortest {
    fn default() -> Self {
        Self::new(crate::K_PATHS, FuzzySelector::default())
    }
}

impl PathStrategy for FuzzyKShortest {
    fn name(&self) -> &'static str {
        "fuzzy-k-shortest"
    }

    fn best_path(
        &self,
        graph: &WeightedGraph,
        root: SwitchId,
        node: SwitchId,
    ) -> Option<WeightedPath> {
        let candidates = k_shortest_paths(graph, root, node, self.k);
        self.selector.select(&candidates).cloned()
    }
}

/// Plain lowest-weight path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShortestPath;

impl PathStrategy for ShortestPath {
    fn name(&self) -> &'static str {
        "shortest-path"
    }

    fn best_path(
        &self,
        graph: &WeightedGraph,
        root: SwitchId,
        node: SwitchId,
    ) -> Option<WeightedPath> {
        shortest_path(graph, root, node)
    }
}

/// Every switch's tree, built in one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    pub generation: u64,
    pub generated_at: DateTime<Utc>,
    pub trees: BTreeMap<SwitchId, BroadcastTree>,
}

impl Forest {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            generated_at: Utc::now(),
            trees: BTreeMap::new(),
        }
    }

    pub fn tree(&self, root: SwitchId) -> Option<&BroadcastTree> {
        self.trees.get(&root)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

impl Default for Forest {
    fn default() -> Self {
        Self::empty()
    }
}

/// Builds broadcast trees with a pluggable path strategy
#[derive(Debug)]
pub struct TreeBuilder {
    strategy: Box<dyn PathStrategy>,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new(FuzzyKShortest::default())
    }
}

impl TreeBuilder {
    pub fn new(strategy: impl PathStrategy + 'static) -> Self {
        Self {
            strategy: Box::new(strategy),
        }
    }

    pub fn strategy(&self) -> &dyn PathStrategy {
        self.strategy.as_ref()
    }

    /// Tree of `cluster` rooted at `root`
    ///
    /// Nodes the root cannot reach are logged and left out.
    pub fn build_tree(
        &self,
        cluster: &Cluster,
        root: SwitchId,
        costs: &LinkCosts,
    ) -> BroadcastTree {
        let graph = WeightedGraph::from_cluster(cluster, costs);
        let mut tree = BroadcastTree::new(root);

        for &node in cluster.nodes().iter().filter(|n| **n != root) {
            let Some(path) = self.strategy.best_path(&graph, root, node) else {
                warn!(root = %root, node = %node, cluster = %cluster.id(), "no path to node");
                continue;
            };
            let Some(last) = path.last_link() else {
                continue;
            };
            match hop_towards_root(cluster, last) {
                Some(hop) => tree.insert(node, hop, path.weight()),
                None => warn!(
                    root = %root,
                    node = %node,
                    previous = %last.src,
                    "no link back towards root"
                ),
            }
        }

        debug!(
            root = %root,
            nodes = tree.len(),
            strategy = self.strategy.name(),
            "broadcast tree built"
        );
        tree
    }

    /// One tree per switch of every cluster, computed in parallel
    pub fn build_forest(&self, clusters: &[Cluster], costs: &LinkCosts, generation: u64) -> Forest {
        let roots: Vec<(&Cluster, SwitchId)> = clusters
            .iter()
            .flat_map(|c| c.nodes().iter().map(move |n| (c, *n)))
            .collect();

        let trees: BTreeMap<SwitchId, BroadcastTree> = roots
            .par_iter()
            .map(|(cluster, root)| (*root, self.build_tree(cluster, *root, costs)))
            .collect();

        info!(
            generation,
            clusters = clusters.len(),
            trees = trees.len(),
            "forest rebuilt"
        );
        Forest {
            generation,
            generated_at: Utc::now(),
            trees,
        }
    }
}

/// The link from `last.dst` back to `last.src`
fn hop_towards_root(cluster: &Cluster, last: &Link) -> Option<Link> {
    let mirror = last.reversed();
    let mut back = cluster.links_from(last.dst).filter(|l| l.dst == last.src);
    let first = back.next().copied()?;
    if first == mirror || back.any(|l| *l == mirror) {
        Some(mirror)
    } else {
        Some(first)
    }
}
