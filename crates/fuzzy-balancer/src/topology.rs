//! Topology snapshots handed in by the discovery layer

use parking_lot::RwLock;
use route_graph::{Cluster, Link, PortId, SwitchId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A consistent view of all clusters at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub clusters: Vec<Cluster>,
}

impl Topology {
    pub fn new(clusters: Vec<Cluster>) -> Self {
        Self { clusters }
    }

    /// Every switch in every cluster
    pub fn switches(&self) -> BTreeSet<SwitchId> {
        self.clusters
            .iter()
            .flat_map(|c| c.nodes().iter().copied())
            .collect()
    }

    /// Every intra-cluster link
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.clusters.iter().flat_map(|c| c.links())
    }

    /// Links leaving `switch` through `port`
    pub fn links_from_port(&self, switch: SwitchId, port: PortId) -> impl Iterator<Item = &Link> {
        self.cluster_of(switch)
            .into_iter()
            .flat_map(move |c| c.links_from(switch))
            .filter(move |l| l.src_port == port)
    }

    pub fn cluster_of(&self, switch: SwitchId) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.contains(switch))
    }
}

/// Provider of topology snapshots
pub trait TopologySource: Send + Sync {
    fn snapshot(&self) -> Topology;
}

impl TopologySource for Topology {
    fn snapshot(&self) -> Topology {
        self.clone()
    }
}

/// Live topology updated in place by the discovery layer
impl TopologySource for RwLock<Topology> {
    fn snapshot(&self) -> Topology {
        self.read().clone()
    }
}

impl<T: TopologySource + ?Sized> TopologySource for Arc<T> {
    fn snapshot(&self) -> Topology {
        (**self).snapshot()
    }
}
