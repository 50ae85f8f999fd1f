//! Link cost estimation from transmit counters
//!
//! Each cycle the estimator takes cumulative transmitted-byte counters,
//! derives per-link byte deltas, and maps them through a piecewise-linear
//! membership function spanning the observed delta range:
//!
//! ```text
//! minDelta -> 0.01, maxDelta -> 1.0
//! cost = clamp(round(membership(delta) * MAX_LINK_COST), 1, MAX_LINK_COST)
//! ```
//!
//! Only links sampled in the current cycle are re-costed; a link whose
//! switch did not answer keeps its previous cost.

use crate::config::BalancerConfig;
use crate::NEUTRAL_LINK_COST;
use route_graph::{Link, LinkCosts, PiecewiseLinear};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Topology change affecting the cost table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkUpdate {
    Added(Link),
    Removed(Link),
}

/// Per-link counter and cost state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCostInfo {
    /// Last cumulative transmitted-byte counter
    pub tx_bytes: Option<u64>,
    /// Change since the previous sample; negative after a counter reset
    pub bytes_delta: i64,
    pub cost: u32,
    /// Sampled since the last cost update
    #[serde(skip)]
    sampled: bool,
}

impl Default for LinkCostInfo {
    fn default() -> Self {
        Self {
            tx_bytes: None,
            bytes_delta: 0,
            cost: NEUTRAL_LINK_COST,
            sampled: false,
        }
    }
}

impl LinkCostInfo {
    /// Record a new counter sample. The first sample only sets the baseline.
    pub fn record(&mut self, tx_bytes: u64) {
        if let Some(previous) = self.tx_bytes {
            self.bytes_delta = tx_bytes.wrapping_sub(previous) as i64;
        }
        self.tx_bytes = Some(tx_bytes);
        self.sampled = true;
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }
}

/// Owner of all per-link cost state
#[derive(Debug, Clone)]
pub struct LinkCostEstimator {
    links: HashMap<Link, LinkCostInfo>,
    max_link_cost: u32,
    min_membership: f64,
    max_membership: f64,
}

impl LinkCostEstimator {
    pub fn new(config: &BalancerConfig) -> Self {
        Self {
            links: HashMap::new(),
            max_link_cost: config.max_link_cost.max(1),
            min_membership: config.min_membership,
            max_membership: config.max_membership,
        }
    }

    /// Record counters for this cycle; unknown links start being tracked
    pub fn update_statistics(&mut self, samples: impl IntoIterator<Item = (Link, u64)>) -> usize {
        let mut count = 0;
        for (link, tx_bytes) in samples {
            self.links.entry(link).or_default().record(tx_bytes);
            count += 1;
        }
        count
    }

    /// Recompute costs of links sampled this cycle
    ///
    /// Returns `true` when at least one cost differs from the previous round.
    pub fn update_costs(&mut self) -> bool {
        let (min_delta, max_delta) = self
            .links
            .values()
            .filter(|info| info.sampled)
            .fold((0i64, 0i64), |(lo, hi), info| {
                (lo.min(info.bytes_delta), hi.max(info.bytes_delta))
            });

        let bandwidth = PiecewiseLinear::new(
            (min_delta as f64, self.min_membership),
            (max_delta as f64, self.max_membership),
        );

        let max_cost = self.max_link_cost;
        let mut changed = 0usize;
        for (link, info) in self.links.iter_mut().filter(|(_, info)| info.sampled) {
            let cost = scale_cost(bandwidth.membership(info.bytes_delta as f64), max_cost);
            debug!(link = %link, delta = info.bytes_delta, cost, "link cost");
            if cost != info.cost {
                info.cost = cost;
                changed += 1;
            }
            info.sampled = false;
        }

        info!(
            min_delta,
            max_delta,
            changed,
            tracked = self.links.len(),
            "link costs updated"
        );
        changed > 0
    }

    /// Apply a discovery event. A re-added link starts over at the
    /// neutral cost.
    pub fn apply(&mut self, update: LinkUpdate) {
        match update {
            LinkUpdate::Added(link) => {
                if !self.links.contains_key(&link) {
                    debug!(link = %link, "link added");
                    self.links.insert(link, LinkCostInfo::default());
                }
            }
            LinkUpdate::Removed(link) => {
                if self.links.remove(&link).is_some() {
                    debug!(link = %link, "link removed");
                }
            }
        }
    }

    /// Snapshot of the current cost table
    pub fn link_costs(&self) -> LinkCosts {
        self.links.iter().map(|(l, info)| (*l, info.cost)).collect()
    }

    pub fn cost(&self, link: &Link) -> Option<u32> {
        self.links.get(link).map(|info| info.cost)
    }

    pub fn info(&self, link: &Link) -> Option<&LinkCostInfo> {
        self.links.get(link)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Membership scaled to an integer cost in `[1, max_cost]`
fn scale_cost(membership: f64, max_cost: u32) -> u32 {
    let scaled = (membership * f64::from(max_cost)).round();
    if scaled.is_nan() || scaled < 1.0 {
        1
    } else {
        (scaled as u32).min(max_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use route_graph::{PortId, SwitchId};

    fn link(src: u64, src_port: PortId, dst: u64, dst_port: PortId) -> Link {
        Link::new(SwitchId(src), src_port, SwitchId(dst), dst_port)
    }

    fn estimator() -> LinkCostEstimator {
        LinkCostEstimator::new(&BalancerConfig::default())
    }

    #[test]
    fn test_first_sample_sets_baseline() {
        let mut info = LinkCostInfo::default();
        info.record(5_000);
        assert_eq!(info.bytes_delta, 0);
        assert_eq!(info.tx_bytes, Some(5_000));

        info.record(7_500);
        assert_eq!(info.bytes_delta, 2_500);

        // Counter reset shows up as a negative delta
        info.record(100);
        assert_eq!(info.bytes_delta, -7_400);
    }

    #[test]
    fn test_stagnant_and_active_links() {
        let idle = link(1, 1, 2, 1);
        let busy = link(2, 2, 3, 1);
        let mut est = estimator();

        let mut busy_bytes = 0u64;
        for cycle in 0..6u64 {
            busy_bytes += 1_000 * (cycle + 1);
            est.update_statistics([(idle, 42), (busy, busy_bytes)]);
            est.update_costs();
        }

        assert_eq!(est.cost(&idle), Some(1));
        assert_eq!(est.cost(&busy), Some(crate::MAX_LINK_COST));
    }

    #[test]
    fn test_interpolated_cost() {
        let a = link(1, 1, 2, 1);
        let b = link(1, 2, 3, 1);
        let c = link(1, 3, 4, 1);
        let mut est = estimator();

        est.update_statistics([(a, 0), (b, 0), (c, 0)]);
        est.update_costs();
        est.update_statistics([(a, 0), (b, 250), (c, 1_000)]);
        let changed = est.update_costs();

        assert!(changed);
        assert_eq!(est.cost(&a), Some(1));
        // 0.01 + 0.25 * 0.99 = 0.2575 -> 25.75 -> 26
        assert_eq!(est.cost(&b), Some(26));
        assert_eq!(est.cost(&c), Some(100));
    }

    #[test]
    fn test_unchanged_cycle_reports_false() {
        let a = link(1, 1, 2, 1);
        let b = link(2, 1, 1, 1);
        let mut est = estimator();

        est.update_statistics([(a, 0), (b, 0)]);
        // All deltas zero: degenerate range, everything at the floor
        assert!(!est.update_costs());
        assert_eq!(est.cost(&a), Some(1));

        est.update_statistics([(a, 100), (b, 0)]);
        assert!(est.update_costs());
        est.update_statistics([(a, 200), (b, 0)]);
        assert!(!est.update_costs());
    }

    #[test]
    fn test_unsampled_link_keeps_cost() {
        let a = link(1, 1, 2, 1);
        let b = link(2, 1, 3, 1);
        let c = link(3, 1, 1, 1);
        let mut est = estimator();

        est.update_statistics([(a, 0), (b, 0), (c, 0)]);
        est.update_costs();
        est.update_statistics([(a, 1_000), (b, 0), (c, 500)]);
        est.update_costs();
        assert_eq!(est.cost(&a), Some(100));

        // Switch 1 timed out: link a is not sampled this cycle
        est.update_statistics([(b, 0), (c, 600)]);
        est.update_costs();
        assert_eq!(est.cost(&a), Some(100));
        assert_eq!(est.cost(&c), Some(100));
    }

    #[test]
    fn test_add_remove_resets_to_neutral() {
        let a = link(1, 1, 2, 1);
        let b = link(2, 1, 1, 1);
        let mut est = estimator();

        est.apply(LinkUpdate::Added(a));
        assert_eq!(est.cost(&a), Some(1));

        est.update_statistics([(a, 0), (b, 0)]);
        est.update_costs();
        est.update_statistics([(a, 9_000), (b, 0)]);
        est.update_costs();
        assert_eq!(est.cost(&a), Some(100));

        // Adding an already known link does not touch it
        est.apply(LinkUpdate::Added(a));
        assert_eq!(est.cost(&a), Some(100));

        est.apply(LinkUpdate::Removed(a));
        assert_eq!(est.cost(&a), None);
        assert!(!est.link_costs().contains_key(&a));

        est.apply(LinkUpdate::Added(a));
        assert_eq!(est.cost(&a), Some(1));
        assert_eq!(est.info(&a).unwrap().tx_bytes, None);
    }

    #[test]
    fn test_negative_delta_lowers_range() {
        let a = link(1, 1, 2, 1);
        let b = link(2, 1, 1, 1);
        let mut est = estimator();

        est.update_statistics([(a, 10_000), (b, 0)]);
        est.update_costs();
        // a's counter reset: delta -10000; b moved +10000
        est.update_statistics([(a, 0), (b, 10_000)]);
        est.update_costs();

        assert_eq!(est.cost(&a), Some(1));
        assert_eq!(est.cost(&b), Some(100));
    }

    proptest! {
        #[test]
        fn prop_costs_in_range(
            rounds in proptest::collection::vec(
                proptest::collection::vec(any::<u64>(), 1..8),
                1..6,
            ),
        ) {
            let mut est = estimator();
            for counters in rounds {
                let samples = counters
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| (link(1, i as PortId, 2, i as PortId), c));
                est.update_statistics(samples);
                est.update_costs();
                for cost in est.link_costs().values() {
                    prop_assert!((1..=crate::MAX_LINK_COST).contains(cost));
                }
            }
        }
    }
}
