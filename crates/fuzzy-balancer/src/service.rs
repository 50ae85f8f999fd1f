//! Balancer service
//!
//! Owns the link cost table, the published forest and the listeners.
//! The estimation cycle and topology events both go through here, so
//! the cost table is only ever touched under its mutex. Readers get the
//! current forest as an `Arc` and never see a half-built one.
//!
//! Generations are handed out in the order cost snapshots are taken, and
//! a forest is only published over an older one, so a slow rebuild can
//! never replace the result of a later one.

use crate::config::BalancerConfig;
use crate::estimator::{LinkCostEstimator, LinkUpdate};
use crate::stats::{collect_link_counters, PortStatsSource};
use crate::topology::{Topology, TopologySource};
use crate::tree::{BroadcastTree, Forest, FuzzyKShortest, PathStrategy, TreeBuilder};
use crate::Result;
use parking_lot::{Mutex, RwLock};
use route_graph::{LinkCosts, SwitchId};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Notified after a cycle commits changed link costs
pub trait CostListener: Send + Sync {
    fn link_costs_updated(&self, costs: &LinkCosts);
}

impl<F> CostListener for F
where
    F: Fn(&LinkCosts) + Send + Sync,
{
    fn link_costs_updated(&self, costs: &LinkCosts) {
        self(costs)
    }
}

/// Outcome of one estimation cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    /// Link counters recorded
    pub samples: usize,
    /// Switches whose statistics were missing
    pub skipped: Vec<SwitchId>,
    pub costs_changed: bool,
    /// Generation of the forest published by this cycle, if any
    pub forest_generation: Option<u64>,
}

pub struct BalancerService<T, S> {
    config: BalancerConfig,
    topology: T,
    stats: S,
    estimator: Mutex<LinkCostEstimator>,
    listeners: RwLock<Vec<Arc<dyn CostListener>>>,
    forest: RwLock<Arc<Forest>>,
    /// Last generation handed out
    generation: Mutex<u64>,
    builder: Arc<TreeBuilder>,
    cycles: AtomicU64,
}

impl<T: TopologySource, S: PortStatsSource> BalancerService<T, S> {
    /// Validate `config`, seed the cost table with every known link and
    /// publish the first forest
    pub fn new(config: BalancerConfig, topology: T, stats: S) -> Result<Self> {
        config.validate()?;

        let mut estimator = LinkCostEstimator::new(&config);
        for link in topology.snapshot().links() {
            estimator.apply(LinkUpdate::Added(*link));
        }
        let builder = Arc::new(TreeBuilder::new(FuzzyKShortest::new(
            config.k_paths,
            config.selector(),
        )));

        let service = Self {
            config,
            topology,
            stats,
            estimator: Mutex::new(estimator),
            listeners: RwLock::new(Vec::new()),
            forest: RwLock::new(Arc::new(Forest::empty())),
            generation: Mutex::new(0),
            builder,
            cycles: AtomicU64::new(0),
        };
        service.rebuild();
        Ok(service)
    }

    /// Swap the path strategy and republish the forest with it
    pub fn with_strategy(mut self, strategy: impl PathStrategy + 'static) -> Self {
        self.builder = Arc::new(TreeBuilder::new(strategy));
        self.rebuild();
        self
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn stats_source(&self) -> &S {
        &self.stats
    }

    /// Snapshot of the committed cost table
    pub fn link_costs(&self) -> LinkCosts {
        self.estimator.lock().link_costs()
    }

    pub fn add_listener(&self, listener: impl CostListener + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Tree rooted at `node` from the current forest
    pub fn destination_rooted_tree(&self, node: SwitchId) -> Option<BroadcastTree> {
        self.forest.read().tree(node).cloned()
    }

    pub fn forest(&self) -> Arc<Forest> {
        Arc::clone(&self.forest.read())
    }

    /// Completed estimation cycles
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Apply discovery events, then rebuild the forest
    pub fn topology_changed(&self, updates: &[LinkUpdate]) -> u64 {
        {
            let mut estimator = self.estimator.lock();
            for update in updates {
                estimator.apply(*update);
            }
        }
        info!(updates = updates.len(), "link updates applied");
        self.rebuild()
    }

    /// Rebuild every tree from the current topology and costs on the
    /// calling thread and publish the result; returns its generation
    pub fn rebuild(&self) -> u64 {
        let (generation, topology, costs) = self.next_generation();
        let forest = self
            .builder
            .build_forest(&topology.clusters, &costs, generation);
        self.publish(forest)
    }

    /// Same as [`rebuild`](Self::rebuild), with the tree computation
    /// moved to the blocking pool
    pub async fn rebuild_async(&self) -> Option<u64> {
        let (generation, topology, costs) = self.next_generation();
        let builder = Arc::clone(&self.builder);
        let built = tokio::task::spawn_blocking(move || {
            builder.build_forest(&topology.clusters, &costs, generation)
        })
        .await;

        match built {
            Ok(forest) => Some(self.publish(forest)),
            Err(e) => {
                error!(generation, error = %e, "forest rebuild failed");
                None
            }
        }
    }

    /// Take a generation number together with the inputs it is built from
    fn next_generation(&self) -> (u64, Topology, LinkCosts) {
        let mut generation = self.generation.lock();
        *generation += 1;
        (*generation, self.topology.snapshot(), self.link_costs())
    }

    /// Swap in `forest` unless a newer one is already published
    fn publish(&self, forest: Forest) -> u64 {
        let generation = forest.generation;
        let mut current = self.forest.write();
        if generation > current.generation {
            *current = Arc::new(forest);
        } else {
            debug!(
                generation,
                published = current.generation,
                "stale forest dropped"
            );
        }
        generation
    }

    /// Sample counters, re-cost links, and rebuild plus notify when a
    /// cost moved
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let topology = self.topology.snapshot();

        let collected =
            collect_link_counters(&self.stats, &topology, self.config.stats_timeout()).await;

        let (samples, costs_changed) = {
            let mut estimator = self.estimator.lock();
            let samples = estimator.update_statistics(collected.samples);
            (samples, estimator.update_costs())
        };

        let forest_generation = if costs_changed {
            let generation = self.rebuild_async().await;
            self.notify(&self.link_costs());
            generation
        } else {
            None
        };

        if !collected.skipped.is_empty() {
            warn!(
                cycle,
                skipped = collected.skipped.len(),
                "no statistics from some switches"
            );
        }
        info!(cycle, samples, costs_changed, "estimation cycle done");

        CycleReport {
            cycle,
            samples,
            skipped: collected.skipped,
            costs_changed,
            forest_generation,
        }
    }

    fn notify(&self, costs: &LinkCosts) {
        let listeners: Vec<Arc<dyn CostListener>> = self.listeners.read().clone();
        debug!(listeners = listeners.len(), "notifying cost listeners");
        for listener in listeners {
            listener.link_costs_updated(costs);
        }
    }
}

impl<T, S> BalancerService<T, S>
where
    T: TopologySource + 'static,
    S: PortStatsSource + 'static,
{
    /// Run estimation cycles every update period until `shutdown` turns
    /// true or its sender goes away
    ///
    /// The next period starts only once the previous cycle is complete.
    /// Notifications that leave `shutdown` false do not move the deadline.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.update_period();
        info!(period_secs = period.as_secs(), "balancer running");

        'cycles: while !*shutdown.borrow_and_update() {
            let sleep = tokio::time::sleep(period);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break 'cycles;
                        }
                    }
                }
            }
            self.run_cycle().await;
        }

        info!(cycles = self.cycles(), "balancer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{PortStats, ReplayStats, StatsRound};
    use crate::tree::ShortestPath;
    use crate::BalancerError;
    use route_graph::{Cluster, Link, PortId, WeightedGraph, WeightedPath};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::{Duration, Instant};

    const A: SwitchId = SwitchId(1);
    const B: SwitchId = SwitchId(2);
    const C: SwitchId = SwitchId(3);

    fn link(src: SwitchId, src_port: PortId, dst: SwitchId, dst_port: PortId) -> Link {
        Link::new(src, src_port, dst, dst_port)
    }

    /// Triangle A-B-C, both directions, one port per neighbour
    fn triangle() -> Topology {
        let forward = [link(A, 1, B, 1), link(B, 2, C, 1), link(A, 2, C, 2)];
        let links = forward.iter().flat_map(|l| [*l, l.reversed()]);
        Topology::new(vec![Cluster::new([A, B, C], links).unwrap()])
    }

    fn round(counters: &[(SwitchId, PortId, u64)]) -> StatsRound {
        let mut round = StatsRound::new();
        for (switch, port, tx_bytes) in counters {
            round.entry(*switch).or_default().push(PortStats {
                port: *port,
                tx_bytes: *tx_bytes,
            });
        }
        round
    }

    fn idle_round() -> StatsRound {
        round(&[(A, 1, 0), (A, 2, 0), (B, 1, 0), (B, 2, 0), (C, 1, 0), (C, 2, 0)])
    }

    fn service(rounds: Vec<StatsRound>) -> BalancerService<Topology, ReplayStats> {
        BalancerService::new(BalancerConfig::default(), triangle(), ReplayStats::new(rounds))
            .unwrap()
    }

    fn busy_round() -> StatsRound {
        let mut busy = idle_round();
        busy.extend(round(&[(A, 1, 50_000), (A, 2, 0)]));
        busy
    }

    /// Shortest path, but each search waits (up to 5 s) for `open`
    #[derive(Debug, Clone, Default)]
    struct GatedPath {
        open: Arc<AtomicBool>,
        saw_open: Arc<AtomicBool>,
    }

    impl PathStrategy for GatedPath {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn best_path(
            &self,
            graph: &WeightedGraph,
            root: SwitchId,
            node: SwitchId,
        ) -> Option<WeightedPath> {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !self.open.load(Ordering::SeqCst) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            if self.open.load(Ordering::SeqCst) {
                self.saw_open.store(true, Ordering::SeqCst);
            }
            ShortestPath.best_path(graph, root, node)
        }
    }

    #[test]
    fn test_new_seeds_costs_and_forest() {
        let svc = service(vec![]);

        let costs = svc.link_costs();
        assert_eq!(costs.len(), 6);
        assert!(costs.values().all(|c| *c == 1));

        let forest = svc.forest();
        assert_eq!(forest.generation, 1);
        assert_eq!(forest.len(), 3);
        let tree = svc.destination_rooted_tree(A).unwrap();
        assert_eq!(tree.next_hop(B), Some(&link(B, 1, A, 1)));
        assert!(svc.destination_rooted_tree(SwitchId(42)).is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = BalancerService::new(
            BalancerConfig::default().k_paths(0),
            triangle(),
            ReplayStats::default(),
        );
        assert!(matches!(result, Err(BalancerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_cycle_rebuilds_and_notifies_on_change() {
        // A->B gets busy; everything else stays idle
        let svc = service(vec![idle_round(), busy_round()]);

        let notified = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&notified);
        svc.add_listener(move |costs: &LinkCosts| {
            assert_eq!(costs.get(&link(A, 1, B, 1)), Some(&100));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let first = svc.run_cycle().await;
        assert_eq!(first.samples, 6);
        assert!(!first.costs_changed);
        assert_eq!(first.forest_generation, None);
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        assert!(svc.stats_source().advance());
        let second = svc.run_cycle().await;
        assert!(second.costs_changed);
        assert_eq!(second.forest_generation, Some(2));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(svc.link_costs()[&link(A, 1, B, 1)], 100);

        // B is now reached through C: A->C->B costs 2, A->B costs 100
        let tree = svc.destination_rooted_tree(A).unwrap();
        assert_eq!(tree.cost(B), Some(2));
        assert_eq!(tree.next_hop(B), Some(&link(B, 2, C, 1)));
    }

    #[tokio::test]
    async fn test_skipped_switch_reported() {
        let mut partial = idle_round();
        partial.remove(&C);
        let svc = service(vec![partial]);

        let report = svc.run_cycle().await;
        assert_eq!(report.skipped, vec![C]);
        assert_eq!(report.samples, 4);
    }

    #[test]
    fn test_topology_change_rebuilds() {
        let svc = service(vec![]);
        let extra = link(A, 9, B, 9);

        let generation = svc.topology_changed(&[LinkUpdate::Added(extra)]);
        assert_eq!(generation, 2);
        assert_eq!(svc.link_costs().get(&extra), Some(&1));
        assert_eq!(svc.forest().generation, 2);

        svc.topology_changed(&[LinkUpdate::Removed(extra)]);
        assert!(!svc.link_costs().contains_key(&extra));
        assert_eq!(svc.forest().generation, 3);
    }

    #[test]
    fn test_with_strategy_republishes() {
        let svc = service(vec![]).with_strategy(ShortestPath);

        assert_eq!(svc.forest().generation, 2);
        assert_eq!(svc.destination_rooted_tree(C).unwrap().cost(A), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let svc = Arc::new(service(vec![idle_round()]));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&svc).run(rx));
        tokio::time::sleep(Duration::from_secs(25)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(svc.cycles(), 2);
    }

    #[tokio::test]
    async fn test_cycle_rebuild_leaves_runtime_free() {
        let gate = GatedPath::default();
        gate.open.store(true, Ordering::SeqCst);
        let svc = service(vec![idle_round(), busy_round()]).with_strategy(gate.clone());
        svc.run_cycle().await;
        assert!(svc.stats_source().advance());

        // Only a task on this (single) runtime thread can open the gate
        gate.open.store(false, Ordering::SeqCst);
        gate.saw_open.store(false, Ordering::SeqCst);
        let open = Arc::clone(&gate.open);
        tokio::spawn(async move { open.store(true, Ordering::SeqCst) });

        let report = svc.run_cycle().await;
        assert!(report.costs_changed);
        assert_eq!(report.forest_generation, Some(3));
        assert!(gate.saw_open.load(Ordering::SeqCst));
        assert_eq!(svc.forest().generation, 3);
    }

    #[test]
    fn test_stale_forest_not_published() {
        let svc = service(vec![]);
        let (older, topology, costs) = svc.next_generation();
        let (newer, _, _) = svc.next_generation();

        let build = |generation| svc.builder.build_forest(&topology.clusters, &costs, generation);
        assert_eq!(svc.publish(build(newer)), 3);
        assert_eq!(svc.publish(build(older)), 2);

        assert_eq!(svc.forest().generation, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_when_already_shut_down() {
        let svc = Arc::new(service(vec![idle_round()]));
        let (_tx, rx) = watch::channel(true);

        let run = Arc::clone(&svc).run(rx);
        assert!(tokio::time::timeout(Duration::from_secs(60), run).await.is_ok());
        assert_eq!(svc.cycles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_notification_keeps_deadline() {
        let svc = Arc::new(service(vec![idle_round()]));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&svc).run(rx));
        tokio::time::sleep(Duration::from_secs(6)).await;
        tx.send(false).unwrap();

        // First cycle still lands at 10 s, not 6 + 10 s
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(svc.cycles(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(svc.cycles(), 1);
    }
}
