//! Three-level profit ladder.
//!
//! Each level maps a band of unrealized profit (percent move from entry, no
//! leverage) to a protective-stop policy. The JSON shape is
//!
//! ```json
//! {
//!   "level_1": { "profit_min": 1.8, "profit_max": 2.5, "lock_profit": 0.1 },
//!   "level_2": { "profit_min": 2.5, "profit_max": 4.0, "lock_profit": 1.9 },
//!   "level_3": { "profit_min": 4.0, "profit_max": null, "lock_profit": 1.9,
//!                "trailing_enabled": true, "trailing_percent": 1.5,
//!                "partial_close_percent": 50.0 }
//! }
//! ```
//!
//! The bands are validated once at load time ([`LadderConfig::validate`]);
//! the evaluator relies on them being contiguous and ordered.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One rung of the profit ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderLevel {
    /// Lower bound (inclusive) of the profit band, in percent.
    pub profit_min: f64,
    /// Upper bound (exclusive); `None` means open-ended.
    #[serde(default)]
    pub profit_max: Option<f64>,
    /// Profit (percent of entry) locked in as the stop floor. `0` is breakeven.
    #[serde(default)]
    pub lock_profit: f64,
    /// Trail the stop behind the best excursion (level 3 only).
    #[serde(default)]
    pub trailing_enabled: bool,
    /// Retracement from the best excursion allowed before the stop fires.
    #[serde(default)]
    pub trailing_percent: f64,
    /// Share of the position to close on reaching this level. Carried for the
    /// execution side; the guard does not act on it.
    #[serde(default)]
    pub partial_close_percent: Option<f64>,
}

impl LadderLevel {
    /// `true` if `profit_percent` falls inside `[profit_min, profit_max)`.
    pub fn contains(&self, profit_percent: f64) -> bool {
        profit_percent >= self.profit_min && self.profit_max.is_none_or(|max| profit_percent < max)
    }
}

/// The full three-level ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderConfig {
    pub level_1: LadderLevel,
    pub level_2: LadderLevel,
    pub level_3: LadderLevel,
}

impl LadderConfig {
    /// Level by number (1..=3).
    pub fn level(&self, n: u8) -> Option<&LadderLevel> {
        match n {
            1 => Some(&self.level_1),
            2 => Some(&self.level_2),
            3 => Some(&self.level_3),
            _ => None,
        }
    }

    /// Highest level whose band contains `profit_percent`; `0` below level 1.
    pub fn level_for(&self, profit_percent: f64) -> u8 {
        if profit_percent >= self.level_3.profit_min {
            3
        } else if self.level_2.contains(profit_percent) {
            2
        } else if self.level_1.contains(profit_percent) {
            1
        } else {
            0
        }
    }

    /// Check ordering, contiguity and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let levels = [&self.level_1, &self.level_2, &self.level_3];

        for (i, lvl) in levels.iter().enumerate() {
            let n = i + 1;
            if !lvl.profit_min.is_finite() || lvl.profit_min < 0.0 {
                return Err(invalid(format!("level_{n}.profit_min must be a non-negative number")));
            }
            if !lvl.lock_profit.is_finite() || lvl.lock_profit < 0.0 {
                return Err(invalid(format!("level_{n}.lock_profit must be a non-negative number")));
            }
            let trail_ok = lvl.trailing_percent > 0.0 && lvl.trailing_percent <= 50.0;
            if lvl.trailing_enabled && !trail_ok {
                return Err(invalid(format!("level_{n}.trailing_percent must be in (0, 50]")));
            }
            if lvl.partial_close_percent.is_some_and(|pc| !(pc > 0.0 && pc <= 100.0)) {
                return Err(invalid(format!("level_{n}.partial_close_percent must be in (0, 100]")));
            }
        }

        for (i, pair) in levels.windows(2).enumerate() {
            let (lo, hi) = (pair[0], pair[1]);
            let n = i + 1;
            if lo.profit_min >= hi.profit_min {
                return Err(invalid(format!(
                    "level_{n}.profit_min must be below level_{}.profit_min",
                    n + 1
                )));
            }
            match lo.profit_max {
                Some(max) if (max - hi.profit_min).abs() < 1e-9 => {}
                Some(max) => {
                    return Err(invalid(format!(
                        "level_{n}.profit_max ({max}) must equal level_{}.profit_min ({})",
                        n + 1,
                        hi.profit_min
                    )));
                }
                None => return Err(invalid(format!("level_{n}.profit_max is required"))),
            }
        }

        if self.level_3.profit_max.is_some() {
            return Err(invalid("level_3.profit_max must be null (open-ended)".into()));
        }
        Ok(())
    }

    /// Parse and validate a ladder from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let ladder: Self = serde_json::from_str(text)?;
        ladder.validate()?;
        Ok(ladder)
    }
}

impl Default for LadderConfig {
    /// Breakeven-plus at 1.8 %, lock 1.9 % at 2.5 %, trail 1.5 % from 4 %.
    fn default() -> Self {
        Self {
            level_1: LadderLevel {
                profit_min: 1.8,
                profit_max: Some(2.5),
                lock_profit: 0.1,
                trailing_enabled: false,
                trailing_percent: 0.0,
                partial_close_percent: None,
            },
            level_2: LadderLevel {
                profit_min: 2.5,
                profit_max: Some(4.0),
                lock_profit: 1.9,
                trailing_enabled: false,
                trailing_percent: 0.0,
                partial_close_percent: None,
            },
            level_3: LadderLevel {
                profit_min: 4.0,
                profit_max: None,
                lock_profit: 1.9,
                trailing_enabled: true,
                trailing_percent: 1.5,
                partial_close_percent: Some(50.0),
            },
        }
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(msg)
}
