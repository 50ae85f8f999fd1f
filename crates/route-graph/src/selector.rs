//! Fuzzy multi-criteria path selection
//!
//! Each candidate gets two criterion costs:
//!
//! - length: vertex count mapped onto `[0.75, 1.0]` between the shortest
//!   and longest candidate
//! - weight: total weight divided by the heaviest candidate's weight
//!
//! The two are combined with an OWA operator (beta = 0.8) and the
//! candidate with the lowest combined cost wins. Ties keep the earlier
//! candidate.

use crate::ksp::WeightedPath;
use crate::membership::{Owa, PiecewiseLinear};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Length membership at the shortest candidate
pub const LENGTH_MEMBERSHIP_MIN: f64 = 0.75;
/// Length membership at the longest candidate
pub const LENGTH_MEMBERSHIP_MAX: f64 = 1.0;

/// Criterion breakdown for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathScore {
    pub length_cost: f64,
    pub weight_cost: f64,
    pub combined: f64,
}

/// Selector configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuzzySelector {
    /// Length membership at (shortest, longest) candidate
    pub length_membership: (f64, f64),
    pub owa: Owa,
}

impl Default for FuzzySelector {
    fn default() -> Self {
        Self {
            length_membership: (LENGTH_MEMBERSHIP_MIN, LENGTH_MEMBERSHIP_MAX),
            owa: Owa::default(),
        }
    }
}

impl FuzzySelector {
    pub fn new(length_membership: (f64, f64), owa_beta: f64) -> Self {
        Self {
            length_membership,
            owa: Owa::new(owa_beta),
        }
    }

    /// Score every candidate, in input order
    pub fn score(&self, candidates: &[WeightedPath]) -> Vec<PathScore> {
        let Some(first) = candidates.first() else {
            return Vec::new();
        };

        let mut min_len = first.vertices().len();
        let mut max_len = min_len;
        let mut max_weight = 0u64;
        for path in candidates {
            let len = path.vertices().len();
            min_len = min_len.min(len);
            max_len = max_len.max(len);
            max_weight = max_weight.max(path.weight());
        }

        let length = PiecewiseLinear::new(
            (min_len as f64, self.length_membership.0),
            (max_len as f64, self.length_membership.1),
        );

        candidates
            .iter()
            .map(|path| {
                let length_cost = length.membership(path.vertices().len() as f64);
                let weight_cost = if max_weight == 0 {
                    0.0
                } else {
                    path.weight() as f64 / max_weight as f64
                };
                PathScore {
                    length_cost,
                    weight_cost,
                    combined: self.owa.aggregate(length_cost, weight_cost),
                }
            })
            .collect()
    }

    /// Pick the candidate with the lowest combined cost
    ///
    /// The baseline is 1.0, the highest cost a candidate can have; if no
    /// candidate beats it the first one is returned.
    pub fn select<'a>(&self, candidates: &'a [WeightedPath]) -> Option<&'a WeightedPath> {
        let first = candidates.first()?;
        let mut best = first;
        let mut best_cost = 1.0;

        for (path, score) in candidates.iter().zip(self.score(candidates)) {
            if score.combined < best_cost {
                best = path;
                best_cost = score.combined;
            }
        }

        debug!(
            candidates = candidates.len(),
            hops = best.hop_count(),
            weight = best.weight(),
            cost = best_cost,
            "selected path"
        );
        Some(best)
    }
}

/// Select with the default selector
pub fn select_best_path(candidates: &[WeightedPath]) -> Option<&WeightedPath> {
    FuzzySelector::default().select(candidates)
}
