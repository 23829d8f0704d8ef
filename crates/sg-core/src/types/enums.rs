//! Enumerations used throughout the stop-loss guard.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Position side
// ---------------------------------------------------------------------------

/// Direction of an open futures position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order direction that reduces (closes) a position of this side.
    pub fn close_direction(self) -> Direction {
        match self {
            Self::Long => Direction::Sell,
            Self::Short => Direction::Buy,
        }
    }

    /// `true` if `candidate` protects more than `current` for this side
    /// (higher for LONG, lower for SHORT).
    pub fn is_more_protective(self, candidate: f64, current: f64) -> bool {
        match self {
            Self::Long => candidate > current,
            Self::Short => candidate < current,
        }
    }

    /// The more protective of two stop prices.
    pub fn most_protective(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Long => a.max(b),
            Self::Short => a.min(b),
        }
    }

    /// `+1.0` for LONG, `-1.0` for SHORT. Multiplies a favorable move.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => f.write_str("LONG"),
            Self::Short => f.write_str("SHORT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order direction
// ---------------------------------------------------------------------------

/// Buy or sell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Exchange wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Position lifecycle
// ---------------------------------------------------------------------------

/// Open/closed status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    #[default]
    Open,
    Closed,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    Signal,
    StopLoss,
    TrailingStop,
    Manual,
}

// ---------------------------------------------------------------------------
// Order types
// ---------------------------------------------------------------------------

/// Order type as reported by the exchange, reduced to what the guard cares
/// about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    StopMarket,
    Stop,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
    Limit,
    Market,
    Other(String),
}

impl OrderKind {
    /// Parse an exchange order-type label (`type` or `orderType`).
    pub fn parse(label: &str) -> Self {
        match label {
            "STOP_MARKET" => Self::StopMarket,
            "STOP" => Self::Stop,
            "STOP_LOSS" => Self::StopLoss,
            "STOP_LOSS_LIMIT" => Self::StopLossLimit,
            "TAKE_PROFIT" => Self::TakeProfit,
            "TAKE_PROFIT_MARKET" => Self::TakeProfitMarket,
            "TRAILING_STOP_MARKET" => Self::TrailingStopMarket,
            "LIMIT" => Self::Limit,
            "MARKET" => Self::Market,
            other => Self::Other(other.to_string()),
        }
    }

    /// `true` for the order types the guard owns as protective stops.
    pub fn is_protective_stop(&self) -> bool {
        matches!(self, Self::StopMarket | Self::Stop | Self::StopLoss | Self::StopLossLimit)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation outcome
// ---------------------------------------------------------------------------

/// Outcome class of one symbol's reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReconcileStatus {
    Ok,
    Fixed,
    Error,
}

/// Corrective action taken (or attempted) for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReconcileAction {
    None,
    Create,
    Replace,
    Cleanup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_direction_opposes_side() {
        assert_eq!(Side::Long.close_direction(), Direction::Sell);
        assert_eq!(Side::Short.close_direction(), Direction::Buy);
    }

    #[test]
    fn protective_ordering_per_side() {
        assert!(Side::Long.is_more_protective(101.0, 100.0));
        assert!(!Side::Long.is_more_protective(100.0, 100.0));
        assert!(Side::Short.is_more_protective(99.0, 100.0));
        assert_eq!(Side::Long.most_protective(103.425, 101.9), 103.425);
        assert_eq!(Side::Short.most_protective(96.425, 98.1), 96.425);
    }

    #[test]
    fn order_kind_classification() {
        assert!(OrderKind::parse("STOP_MARKET").is_protective_stop());
        assert!(OrderKind::parse("STOP_LOSS_LIMIT").is_protective_stop());
        assert!(!OrderKind::parse("TAKE_PROFIT_MARKET").is_protective_stop());
        assert!(!OrderKind::parse("LIMIT").is_protective_stop());
        assert_eq!(OrderKind::parse("WEIRD"), OrderKind::Other("WEIRD".into()));
    }
}
