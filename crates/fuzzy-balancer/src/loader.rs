//! Topology and statistics trace loading from JSON files

use crate::stats::{PortStats, StatsRound};
use crate::topology::Topology;
use crate::Result;
use route_graph::SwitchId;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{error, info};

/// Recorded statistics trace: one entry per estimation cycle, keyed by
/// switch id (decimal or colon-separated hex)
#[derive(Debug, Deserialize)]
struct RawTrace {
    cycles: Vec<BTreeMap<String, Vec<PortStats>>>,
}

/// Load a topology snapshot
///
/// Every cluster is validated; a link leaving its cluster rejects the
/// whole file.
pub fn load_topology(path: impl AsRef<Path>) -> Result<Topology> {
    let path = path.as_ref();
    info!("Loading topology from {:?}", path);

    let reader = BufReader::new(File::open(path)?);
    let topology: Topology = serde_json::from_reader(reader).map_err(|e| {
        error!("Rejected topology {:?}: {}", path, e);
        e
    })?;

    info!(
        "Loaded {} clusters, {} switches, {} links",
        topology.clusters.len(),
        topology.switches().len(),
        topology.links().count()
    );
    Ok(topology)
}

/// Load a port statistics trace
pub fn load_trace(path: impl AsRef<Path>) -> Result<Vec<StatsRound>> {
    let path = path.as_ref();
    info!("Loading statistics trace from {:?}", path);

    let reader = BufReader::new(File::open(path)?);
    let raw: RawTrace = serde_json::from_reader(reader)?;

    let rounds = raw
        .cycles
        .into_iter()
        .map(|cycle| {
            cycle
                .into_iter()
                .map(|(switch, ports)| Ok((switch.parse::<SwitchId>()?, ports)))
                .collect::<Result<StatsRound>>()
        })
        .collect::<Result<Vec<_>>>()?;

    info!("Loaded {} statistics cycles", rounds.len());
    Ok(rounds)
}
