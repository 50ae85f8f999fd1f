//! Route Graph - cluster routing primitives
//!
//! Provides the path-computation core used by the fuzzy load balancer:
//!
//! - Switch/link/cluster data model
//! - Weighted multigraph built per cluster from a link cost table
//! - Yen's k-shortest loopless paths
//! - Fuzzy multi-criteria path selection (hop count + path weight, OWA)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod graph;
pub mod ksp;
pub mod membership;
pub mod selector;

pub use graph::{LinkEdge, WeightedGraph};
pub use ksp::{k_shortest_paths, shortest_path, WeightedPath};
pub use membership::{Owa, PiecewiseLinear};
pub use selector::{select_best_path, FuzzySelector, PathScore};

/// Route graph errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(SwitchId),
    #[error("Link {link} references switch {missing} outside its cluster")]
    MalformedCluster { link: Link, missing: SwitchId },
    #[error("Duplicate node in cluster: {0}")]
    DuplicateNode(SwitchId),
    #[error("Cluster has no nodes")]
    EmptyCluster,
    #[error("No path found between {0} and {1}")]
    NoPath(SwitchId, SwitchId),
    #[error("Invalid switch id: {0:?}")]
    InvalidSwitchId(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// Switch port number
pub type PortId = u16;

/// Link cost table: integer routing cost per directed link
pub type LinkCosts = HashMap<Link, u32>;

/// Opaque 64-bit switch identity (datapath id)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SwitchId(pub u64);

impl fmt::Display for SwitchId {
    /// Colon-separated hex, the usual datapath id notation
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for SwitchId {
    type Err = GraphError;

    /// Accepts a decimal number or colon-separated hex bytes
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || GraphError::InvalidSwitchId(s.to_string());
        if !s.contains(':') {
            return s.parse().map(SwitchId).map_err(|_| invalid());
        }
        let mut id: u64 = 0;
        let mut count = 0;
        for byte in s.split(':') {
            if byte.is_empty() || byte.len() > 2 || count == 8 {
                return Err(invalid());
            }
            let value = u8::from_str_radix(byte, 16).map_err(|_| invalid())?;
            id = (id << 8) | u64::from(value);
            count += 1;
        }
        Ok(SwitchId(id))
    }
}

impl From<u64> for SwitchId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A directed link between two switch ports
///
/// Identity is the full (src, src_port, dst, dst_port) tuple, so parallel
/// links between the same pair of switches stay distinct.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Link {
    pub src: SwitchId,
    pub src_port: PortId,
    pub dst: SwitchId,
    pub dst_port: PortId,
}

impl Link {
    pub fn new(src: SwitchId, src_port: PortId, dst: SwitchId, dst_port: PortId) -> Self {
        Self {
            src,
            src_port,
            dst,
            dst_port,
        }
    }

    /// The same physical link traversed in the opposite direction
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            src_port: self.dst_port,
            dst: self.src,
            dst_port: self.src_port,
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} -> {}/{}",
            self.src, self.src_port, self.dst, self.dst_port
        )
    }
}

/// Serialized form of a cluster, validated into [`Cluster`] on load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub nodes: Vec<SwitchId>,
    #[serde(default)]
    pub links: Vec<Link>,
}

/// A connected partition of the topology
///
/// Read-only snapshot: every link held by a cluster has both endpoints
/// inside it. Construction rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClusterSpec", into = "ClusterSpec")]
pub struct Cluster {
    nodes: BTreeSet<SwitchId>,
    links: BTreeMap<SwitchId, BTreeSet<Link>>,
}

impl Cluster {
    pub fn new(
        nodes: impl IntoIterator<Item = SwitchId>,
        links: impl IntoIterator<Item = Link>,
    ) -> Result<Self> {
        let mut node_set = BTreeSet::new();
        for node in nodes {
            if !node_set.insert(node) {
                return Err(GraphError::DuplicateNode(node));
            }
        }
        if node_set.is_empty() {
            return Err(GraphError::EmptyCluster);
        }

        let mut link_map: BTreeMap<SwitchId, BTreeSet<Link>> =
            node_set.iter().map(|n| (*n, BTreeSet::new())).collect();
        for link in links {
            for endpoint in [link.src, link.dst] {
                if !node_set.contains(&endpoint) {
                    return Err(GraphError::MalformedCluster {
                        link,
                        missing: endpoint,
                    });
                }
            }
            link_map.entry(link.src).or_default().insert(link);
        }

        Ok(Self {
            nodes: node_set,
            links: link_map,
        })
    }

    /// Cluster id: the lowest switch id it contains
    pub fn id(&self) -> SwitchId {
        // new() rejects empty clusters
        self.nodes.iter().next().copied().unwrap_or(SwitchId(0))
    }

    pub fn nodes(&self) -> &BTreeSet<SwitchId> {
        &self.nodes
    }

    pub fn contains(&self, node: SwitchId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Outgoing links of a node, ordered by (dst, ports)
    pub fn links_from(&self, node: SwitchId) -> impl Iterator<Item = &Link> {
        self.links.get(&node).into_iter().flatten()
    }

    /// All links of the cluster in deterministic order
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values().flatten()
    }

    pub fn link_count(&self) -> usize {
        self.links.values().map(|l| l.len()).sum()
    }
}

impl TryFrom<ClusterSpec> for Cluster {
    type Error = GraphError;

    fn try_from(raw: ClusterSpec) -> Result<Self> {
        Cluster::new(raw.nodes, raw.links)
    }
}

impl From<Cluster> for ClusterSpec {
    fn from(cluster: Cluster) -> Self {
        let links = cluster.links().copied().collect();
        ClusterSpec {
            nodes: cluster.nodes.into_iter().collect(),
            links,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(src: u64, src_port: PortId, dst: u64, dst_port: PortId) -> Link {
        Link::new(SwitchId(src), src_port, SwitchId(dst), dst_port)
    }

    #[test]
    fn test_switch_id_display() {
        assert_eq!(SwitchId(1).to_string(), "00:00:00:00:00:00:00:01");
        assert_eq!(SwitchId(0xabcd).to_string(), "00:00:00:00:00:00:ab:cd");
    }

    #[test]
    fn test_switch_id_parse() {
        assert_eq!("42".parse::<SwitchId>(), Ok(SwitchId(42)));
        assert_eq!("00:00:00:00:00:00:ab:cd".parse::<SwitchId>(), Ok(SwitchId(0xabcd)));
        assert_eq!("01:ff".parse::<SwitchId>(), Ok(SwitchId(0x01ff)));
        assert_eq!(
            SwitchId(77).to_string().parse::<SwitchId>(),
            Ok(SwitchId(77))
        );

        for bad in ["", "s1", "00::01", "1:2:3:4:5:6:7:8:9", "100:00"] {
            assert_eq!(
                bad.parse::<SwitchId>(),
                Err(GraphError::InvalidSwitchId(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_cluster_rejects_foreign_endpoint() {
        let err = Cluster::new(
            [SwitchId(1), SwitchId(2)],
            [link(1, 1, 2, 1), link(2, 2, 3, 1)],
        )
        .unwrap_err();

        assert_eq!(
            err,
            GraphError::MalformedCluster {
                link: link(2, 2, 3, 1),
                missing: SwitchId(3),
            }
        );
    }

    #[test]
    fn test_cluster_rejects_empty_and_duplicates() {
        assert_eq!(
            Cluster::new(Vec::new(), Vec::new()).unwrap_err(),
            GraphError::EmptyCluster
        );
        assert_eq!(
            Cluster::new([SwitchId(4), SwitchId(4)], Vec::new()).unwrap_err(),
            GraphError::DuplicateNode(SwitchId(4))
        );
    }

    #[test]
    fn test_cluster_keeps_parallel_links() {
        let cluster = Cluster::new(
            [SwitchId(1), SwitchId(2)],
            [link(1, 1, 2, 1), link(1, 2, 2, 2)],
        )
        .unwrap();

        assert_eq!(cluster.id(), SwitchId(1));
        assert_eq!(cluster.links_from(SwitchId(1)).count(), 2);
        assert_eq!(cluster.links_from(SwitchId(2)).count(), 0);
        assert_eq!(cluster.link_count(), 2);
    }

    #[test]
    fn test_cluster_json_validates() {
        let ok: Cluster = serde_json::from_str(
            r#"{"nodes":[1,2],"links":[{"src":1,"src_port":3,"dst":2,"dst_port":4}]}"#,
        )
        .unwrap();
        assert_eq!(ok.link_count(), 1);

        let bad = serde_json::from_str::<Cluster>(
            r#"{"nodes":[1],"links":[{"src":1,"src_port":3,"dst":2,"dst_port":4}]}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_link_reversed() {
        let l = link(1, 5, 2, 7);
        assert_eq!(l.reversed(), link(2, 7, 1, 5));
        assert_eq!(l.reversed().reversed(), l);
    }
}
