//! Trading-related data structures: positions, protective orders, and
//! reconciliation results.
//!
//! Positions and orders are read from the exchange on every cycle; the guard
//! never treats its own copies as authoritative.

use serde::{Deserialize, Serialize};

use super::enums::{
    CloseReason, Direction, OrderKind, PositionStatus, ReconcileAction, ReconcileStatus, Side,
};

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A futures position as seen by the guard.
///
/// Exchange-sourced fields (`symbol` .. `mark_price`) are inputs. The guard
/// fills `stop_order`, `stop_price`, `ladder_level` and `trailing_active`
/// from its own per-symbol state before evaluating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Exchange symbol (e.g. `"BTCUSDT"`). Unique key.
    pub symbol: String,
    /// Long or short.
    pub side: Side,
    /// Average entry price.
    pub entry_price: f64,
    /// Absolute position size.
    pub quantity: f64,
    /// Current mark price.
    pub mark_price: f64,
    /// Leverage reported by the exchange (informational).
    pub leverage: u32,
    /// Unrealized PnL reported by the exchange (informational).
    pub unrealized_pnl: f64,
    /// Reference of the protective stop currently associated with the position.
    pub stop_order: Option<OrderRef>,
    /// Trigger price of that stop, if any.
    pub stop_price: Option<f64>,
    /// Highest ladder level committed for this position (0..=3).
    pub ladder_level: u8,
    /// Whether the level-3 trailing stop has engaged.
    pub trailing_active: bool,
    /// Open or closed.
    pub status: PositionStatus,
    /// Why the position closed, when known.
    pub close_reason: Option<CloseReason>,
}

impl Position {
    /// Build an open position with no guard-side state yet.
    pub fn open(
        symbol: impl Into<String>,
        side: Side,
        entry_price: f64,
        quantity: f64,
        mark_price: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            entry_price,
            quantity,
            mark_price,
            leverage: 1,
            unrealized_pnl: 0.0,
            stop_order: None,
            stop_price: None,
            ladder_level: 0,
            trailing_active: false,
            status: PositionStatus::Open,
            close_reason: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open && self.quantity > 0.0
    }

    /// Signed percentage move of `price` from entry, positive when favorable.
    pub fn profit_percent(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.side.sign() * (price - self.entry_price) / self.entry_price * 100.0
    }

    /// Price at `percent` of entry on the favorable side
    /// (`entry · (1 ± percent/100)`); negative percent lands on the losing side.
    pub fn price_at_profit(&self, percent: f64) -> f64 {
        self.entry_price * (1.0 + self.side.sign() * percent / 100.0)
    }
}

// ---------------------------------------------------------------------------
// Order reference
// ---------------------------------------------------------------------------

/// Identifier of a protective order on the exchange.
///
/// Binance keeps conditional orders either in the regular order book
/// (`orderId`) or in the algo service (`algoId`); each kind has its own
/// cancel endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum OrderRef {
    Simple(u64),
    Algo(u64),
}

impl OrderRef {
    pub fn id(self) -> u64 {
        match self {
            Self::Simple(id) | Self::Algo(id) => id,
        }
    }
}

impl std::fmt::Display for OrderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple(id) => write!(f, "order:{id}"),
            Self::Algo(id) => write!(f, "algo:{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Live order view
// ---------------------------------------------------------------------------

/// An open order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOrderView {
    pub symbol: String,
    pub side: Direction,
    pub kind: OrderKind,
    /// Trigger (stop) price; `0.0` for orders without one.
    pub trigger_price: f64,
    /// Original quantity; `0.0` for `closePosition` orders.
    pub quantity: f64,
    /// Order closes the whole position regardless of quantity.
    pub close_position: bool,
    pub order_ref: OrderRef,
}

impl StopOrderView {
    pub fn is_protective_stop(&self) -> bool {
        self.kind.is_protective_stop()
    }
}

// ---------------------------------------------------------------------------
// Reconciliation result
// ---------------------------------------------------------------------------

/// Per-symbol outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub status: ReconcileStatus,
    pub action: ReconcileAction,
    pub message: String,
    /// Set when the position is known to have no protective order right now.
    #[serde(default)]
    pub unprotected: bool,
}

impl ReconciliationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: ReconcileStatus::Ok,
            action: ReconcileAction::None,
            message: message.into(),
            unprotected: false,
        }
    }

    pub fn fixed(action: ReconcileAction, message: impl Into<String>) -> Self {
        Self { status: ReconcileStatus::Fixed, action, message: message.into(), unprotected: false }
    }

    pub fn error(action: ReconcileAction, message: impl Into<String>) -> Self {
        Self { status: ReconcileStatus::Error, action, message: message.into(), unprotected: false }
    }

    /// Mark the position as currently unprotected.
    pub fn unprotected(mut self) -> Self {
        self.unprotected = true;
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ReconcileStatus::Error
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{:?}: {}", self.status, self.action, self.message)?;
        if self.unprotected {
            f.write_str(" [UNPROTECTED]")?;
        }
        Ok(())
    }
}
