//! Fuzzy building blocks: two-point piecewise-linear membership and the
//! OWA aggregation operator

use serde::{Deserialize, Serialize};

/// Membership function through two calibration points
///
/// Inputs at or below the first point map to its value, inputs at or
/// above the second to its value, and anything in between is linearly
/// interpolated. When both points share an x the first value wins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseLinear {
    low: (f64, f64),
    high: (f64, f64),
}

impl PiecewiseLinear {
    /// `low` and `high` are `(x, membership)` pairs; they are ordered by x
    pub fn new(low: (f64, f64), high: (f64, f64)) -> Self {
        if high.0 < low.0 {
            Self { low: high, high: low }
        } else {
            Self { low, high }
        }
    }

    pub fn membership(&self, x: f64) -> f64 {
        let (x0, y0) = self.low;
        let (x1, y1) = self.high;
        if x <= x0 {
            y0
        } else if x >= x1 {
            y1
        } else {
            y0 + (x - x0) * (y1 - y0) / (x1 - x0)
        }
    }
}

/// Default OWA weight on the minimum term
pub const DEFAULT_OWA_BETA: f64 = 0.8;

/// Ordered weighted averaging of two criteria
///
/// `beta * min(a, b) + (1 - beta) * mean(a, b)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Owa {
    pub beta: f64,
}

impl Owa {
    pub fn new(beta: f64) -> Self {
        Self { beta }
    }

    pub fn aggregate(&self, a: f64, b: f64) -> f64 {
        self.beta * a.min(b) + (1.0 - self.beta) * 0.5 * (a + b)
    }
}

impl Default for Owa {
    fn default() -> Self {
        Self::new(DEFAULT_OWA_BETA)
    }
}
