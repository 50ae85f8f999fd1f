//! Balancer replay CLI
//!
//! Replays a recorded port statistics trace through the full estimation
//! pipeline, one cycle per trace entry, and writes the final link costs
//! and broadcast forest.
//!
//! Usage:
//!   balancer-sim --topology topology.json --trace trace.json \
//!                --output balancer-out.json

use anyhow::Result;
use clap::{Parser, ValueEnum};
use fuzzy_balancer::{
    loader, BalancerConfig, BalancerService, CycleReport, Forest, ReplayStats, ShortestPath,
};
use route_graph::{Link, LinkCosts};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    /// K shortest paths ranked by hop count and weight
    Fuzzy,
    /// Single lowest-weight path
    Shortest,
}

#[derive(Parser, Debug)]
#[command(
    name = "balancer-sim",
    about = "Replay port statistics through the fuzzy link balancer"
)]
struct Args {
    /// Topology JSON file
    #[arg(short, long)]
    topology: PathBuf,

    /// Port statistics trace JSON file
    #[arg(short = 'r', long)]
    trace: PathBuf,

    /// Balancer config JSON file (falls back to $FUZZY_BALANCER_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON file
    #[arg(short, long, default_value = "balancer-out.json")]
    output: PathBuf,

    /// Path selection strategy
    #[arg(short, long, value_enum, default_value_t = Strategy::Fuzzy)]
    strategy: Strategy,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct CostEntry {
    link: Link,
    cost: u32,
}

#[derive(Serialize)]
struct SimOutput<'a> {
    cycles: &'a [CycleReport],
    costs: Vec<CostEntry>,
    forest: &'a Forest,
}

fn sorted_costs(costs: LinkCosts) -> Vec<CostEntry> {
    let mut entries: Vec<CostEntry> = costs
        .into_iter()
        .map(|(link, cost)| CostEntry { link, cost })
        .collect();
    entries.sort_by_key(|e| e.link);
    entries
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "fuzzy_balancer=debug,route_graph=debug,balancer_sim=debug,info"
    } else {
        "fuzzy_balancer=info,balancer_sim=info,warn"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BalancerConfig::load(args.config.as_deref())?;
    let topology = loader::load_topology(&args.topology)?;
    let rounds = loader::load_trace(&args.trace)?;
    let cycle_count = rounds.len();

    let service = BalancerService::new(config, topology, ReplayStats::new(rounds))?;
    let service = match args.strategy {
        Strategy::Fuzzy => service,
        Strategy::Shortest => service.with_strategy(ShortestPath),
    };

    service.add_listener(|costs: &LinkCosts| {
        let congested = costs.values().filter(|c| **c > 1).count();
        info!("Link costs changed: {} of {} links above neutral", congested, costs.len());
    });

    let mut reports = Vec::with_capacity(cycle_count);
    for i in 0..cycle_count {
        let report = service.run_cycle().await;
        if !report.skipped.is_empty() {
            warn!("Cycle {} skipped switches: {:?}", report.cycle, report.skipped);
        }
        reports.push(report);
        if i + 1 < cycle_count {
            service.stats_source().advance();
        }
    }

    let forest = service.forest();
    let output = SimOutput {
        cycles: &reports,
        costs: sorted_costs(service.link_costs()),
        forest: &forest,
    };

    info!("Writing output to {:?}", args.output);
    let writer = BufWriter::new(File::create(&args.output)?);
    serde_json::to_writer_pretty(writer, &output)?;

    info!(
        "Replayed {} cycles, {} cost changes, forest generation {} with {} trees",
        reports.len(),
        reports.iter().filter(|r| r.costs_changed).count(),
        forest.generation,
        forest.len()
    );

    Ok(())
}
