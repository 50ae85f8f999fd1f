//! Balancer configuration

use crate::{
    BalancerError, Result, K_PATHS, MAX_LINK_COST, STATS_TIMEOUT_SECS, UPDATE_PERIOD_SECS,
};
use route_graph::membership::DEFAULT_OWA_BETA;
use route_graph::selector::{LENGTH_MEMBERSHIP_MAX, LENGTH_MEMBERSHIP_MIN};
use route_graph::FuzzySelector;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "FUZZY_BALANCER_CONFIG";

/// Bandwidth membership at the smallest observed byte delta
pub const MIN_MEMBERSHIP_BW: f64 = 0.01;
/// Bandwidth membership at the largest observed byte delta
pub const MAX_MEMBERSHIP_BW: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Seconds between estimation cycles
    pub update_period_secs: u64,
    /// Per-switch statistics timeout in seconds
    pub stats_timeout_secs: u64,
    /// Upper bound of a link cost
    pub max_link_cost: u32,
    /// Bandwidth membership at the minimum delta
    pub min_membership: f64,
    /// Bandwidth membership at the maximum delta
    pub max_membership: f64,
    /// Candidate paths per (root, node) pair
    pub k_paths: usize,
    /// OWA weight on the minimum term
    pub owa_beta: f64,
    /// Length membership at (shortest, longest) candidate
    pub length_membership: [f64; 2],
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            update_period_secs: UPDATE_PERIOD_SECS,
            stats_timeout_secs: STATS_TIMEOUT_SECS,
            max_link_cost: MAX_LINK_COST,
            min_membership: MIN_MEMBERSHIP_BW,
            max_membership: MAX_MEMBERSHIP_BW,
            k_paths: K_PATHS,
            owa_beta: DEFAULT_OWA_BETA,
            length_membership: [LENGTH_MEMBERSHIP_MIN, LENGTH_MEMBERSHIP_MAX],
        }
    }
}

impl BalancerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_period_secs(mut self, secs: u64) -> Self {
        self.update_period_secs = secs;
        self
    }

    pub fn stats_timeout_secs(mut self, secs: u64) -> Self {
        self.stats_timeout_secs = secs;
        self
    }

    pub fn k_paths(mut self, k: usize) -> Self {
        self.k_paths = k;
        self
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading balancer config from {:?}", path);

        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, else from `$FUZZY_BALANCER_CONFIG`, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if self.update_period_secs == 0 {
            return Err(invalid("update_period_secs must be positive"));
        }
        if self.stats_timeout_secs == 0 {
            return Err(invalid("stats_timeout_secs must be positive"));
        }
        if self.max_link_cost == 0 {
            return Err(invalid("max_link_cost must be at least 1"));
        }
        if self.k_paths == 0 {
            return Err(invalid("k_paths must be at least 1"));
        }
        if !unit.contains(&self.owa_beta) {
            return Err(invalid("owa_beta must lie in [0, 1]"));
        }
        if !unit.contains(&self.min_membership)
            || !unit.contains(&self.max_membership)
            || self.min_membership > self.max_membership
        {
            return Err(invalid(
                "bandwidth membership must satisfy 0 <= min_membership <= max_membership <= 1",
            ));
        }
        let [low, high] = self.length_membership;
        if !unit.contains(&low) || !unit.contains(&high) || low > high {
            return Err(invalid("length_membership must be an ordered pair in [0, 1]"));
        }
        Ok(())
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_secs(self.update_period_secs)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_secs(self.stats_timeout_secs)
    }

    pub fn selector(&self) -> FuzzySelector {
        FuzzySelector::new(
            (self.length_membership[0], self.length_membership[1]),
            self.owa_beta,
        )
    }
}

fn invalid(msg: &str) -> BalancerError {
    BalancerError::InvalidConfig(msg.to_string())
}
