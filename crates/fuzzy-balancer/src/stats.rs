//! Port statistics collection
//!
//! Each switch is asked for its port counters with a bounded timeout.
//! A port's transmitted bytes are credited to the link whose source is
//! that (switch, port). Switches that fail or time out are skipped for
//! the cycle; their links keep the cost they already have.

use crate::topology::Topology;
use crate::{BalancerError, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use route_graph::{Link, PortId, SwitchId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Counters reported for one switch port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    pub port: PortId,
    pub tx_bytes: u64,
}

/// Source of per-switch port statistics
pub trait PortStatsSource: Send + Sync {
    fn port_stats(&self, switch: SwitchId)
        -> impl Future<Output = Result<Vec<PortStats>>> + Send;
}

/// Result of one collection round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedCounters {
    /// Cumulative transmitted bytes per link
    pub samples: Vec<(Link, u64)>,
    /// Switches that did not answer this round
    pub skipped: Vec<SwitchId>,
}

/// Query every switch of the topology concurrently
pub async fn collect_link_counters<S: PortStatsSource>(
    source: &S,
    topology: &Topology,
    timeout: Duration,
) -> CollectedCounters {
    let switches: Vec<SwitchId> = topology.switches().into_iter().collect();
    let replies = join_all(switches.iter().map(|sw| query_switch(source, *sw, timeout))).await;

    let mut collected = CollectedCounters::default();
    for (switch, reply) in switches.into_iter().zip(replies) {
        match reply {
            Ok(ports) => {
                for stat in ports {
                    for link in topology.links_from_port(switch, stat.port) {
                        collected.samples.push((*link, stat.tx_bytes));
                    }
                }
            }
            Err(e) => {
                warn!(switch = %switch, error = %e, "statistics retrieval failed");
                collected.skipped.push(switch);
            }
        }
    }

    debug!(
        samples = collected.samples.len(),
        skipped = collected.skipped.len(),
        "port statistics collected"
    );
    collected
}

async fn query_switch<S: PortStatsSource>(
    source: &S,
    switch: SwitchId,
    timeout: Duration,
) -> Result<Vec<PortStats>> {
    match tokio::time::timeout(timeout, source.port_stats(switch)).await {
        Ok(reply) => reply,
        Err(_) => Err(BalancerError::StatsTimeout { switch }),
    }
}

/// One recorded round: port counters per switch
pub type StatsRound = BTreeMap<SwitchId, Vec<PortStats>>;

/// Replays a recorded statistics trace, one round per cycle
///
/// A switch missing from the current round answers with
/// [`BalancerError::StatsUnavailable`], the same as a dead switch.
#[derive(Debug, Default)]
pub struct ReplayStats {
    rounds: Vec<StatsRound>,
    cursor: Mutex<usize>,
}

impl ReplayStats {
    pub fn new(rounds: Vec<StatsRound>) -> Self {
        Self {
            rounds,
            cursor: Mutex::new(0),
        }
    }

    /// Move to the next round; returns `false` once the trace is exhausted
    pub fn advance(&self) -> bool {
        let mut cursor = self.cursor.lock();
        if *cursor + 1 < self.rounds.len() {
            *cursor += 1;
            true
        } else {
            false
        }
    }

    pub fn round(&self) -> usize {
        *self.cursor.lock()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

impl PortStatsSource for ReplayStats {
    async fn port_stats(&self, switch: SwitchId) -> Result<Vec<PortStats>> {
        let round = *self.cursor.lock();
        self.rounds
            .get(round)
            .and_then(|r| r.get(&switch))
            .cloned()
            .ok_or_else(|| BalancerError::StatsUnavailable {
                switch,
                reason: format!("no reply in round {}", round),
            })
    }
}
