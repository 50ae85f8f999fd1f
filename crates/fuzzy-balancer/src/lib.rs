//! Fuzzy Balancer
//!
//! Traffic-engineering core for an SDN controller's routing layer. Every
//! estimation cycle turns raw per-port transmit counters into bounded
//! integer link costs, and whenever a cost moves it rebuilds one
//! destination-rooted broadcast tree per switch, choosing each branch
//! among the k shortest paths with a fuzzy hop-count/weight criterion.
//!
//! # Cycle
//!
//! ```text
//! Idle -> Sampling (port stats) -> Evaluating (link costs)
//!      -> [costs changed] Rebuilding (forest) -> notify listeners -> Idle
//! ```
//!
//! | Constant | Value | Description |
//! |----------|-------|-------------|
//! | `MAX_LINK_COST` | 100 | Upper bound of a link cost (lower bound is 1) |
//! | `K_PATHS` | 3 | Candidate paths per (root, node) pair |
//! | `UPDATE_PERIOD_SECS` | 10 | Seconds between estimation cycles |
//! | `STATS_TIMEOUT_SECS` | 10 | Per-switch statistics timeout |

use route_graph::{GraphError, SwitchId};
use thiserror::Error;

pub mod config;
pub mod estimator;
pub mod loader;
pub mod service;
pub mod stats;
pub mod topology;
pub mod tree;

pub use config::BalancerConfig;
pub use estimator::{LinkCostEstimator, LinkCostInfo, LinkUpdate};
pub use service::{BalancerService, CostListener, CycleReport};
pub use stats::{PortStats, PortStatsSource, ReplayStats};
pub use topology::{Topology, TopologySource};
pub use tree::{BroadcastTree, Forest, FuzzyKShortest, PathStrategy, ShortestPath, TreeBuilder};

/// Highest cost a link can be assigned
pub const MAX_LINK_COST: u32 = 100;

/// Cost of a link nothing is known about yet
pub const NEUTRAL_LINK_COST: u32 = 1;

/// Candidate paths searched per (root, node) pair
pub const K_PATHS: usize = 3;

/// Seconds between estimation cycles
pub const UPDATE_PERIOD_SECS: u64 = 10;

/// Seconds to wait for one switch's port statistics
pub const STATS_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Statistics request to switch {switch} timed out")]
    StatsTimeout { switch: SwitchId },
    #[error("Statistics unavailable from switch {switch}: {reason}")]
    StatsUnavailable { switch: SwitchId, reason: String },
    #[error("Next-hop walk from {node} towards {root} loops")]
    TreeCycle { root: SwitchId, node: SwitchId },
}

pub type Result<T> = std::result::Result<T, BalancerError>;
