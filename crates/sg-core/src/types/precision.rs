//! Exchange tick/lot precision and price/quantity formatting.
//!
//! Stop prices are compared and submitted at exchange precision: two prices
//! that format to the same string are the same stop.

use serde::{Deserialize, Serialize};

/// Guards `floor` against values like `2.9999999999` that are meant to be `3`.
const FLOOR_EPSILON: f64 = 1e-9;

/// Price and quantity increments for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolPrecision {
    /// Minimum price increment (`PRICE_FILTER.tickSize`).
    pub tick_size: f64,
    /// Minimum quantity increment (`LOT_SIZE.stepSize`).
    pub step_size: f64,
    /// Decimal places implied by `tick_size`.
    pub price_decimals: usize,
    /// Decimal places implied by `step_size`.
    pub quantity_decimals: usize,
}

impl SymbolPrecision {
    /// Build from tick and step sizes. Non-positive increments disable rounding
    /// and fall back to 8 decimals.
    pub fn new(tick_size: f64, step_size: f64) -> Self {
        Self {
            tick_size,
            step_size,
            price_decimals: decimals_of(tick_size),
            quantity_decimals: decimals_of(step_size),
        }
    }

    /// Round `price` to the nearest tick and render it.
    pub fn format_price(&self, price: f64) -> String {
        let rounded = if self.tick_size > 0.0 {
            (price / self.tick_size).round() * self.tick_size
        } else {
            price
        };
        format!("{:.*}", self.price_decimals, rounded)
    }

    /// Floor `quantity` to the lot step and render it. Never rounds up, so a
    /// reduce-only stop never exceeds the position.
    pub fn format_quantity(&self, quantity: f64) -> String {
        let floored = if self.step_size > 0.0 {
            (quantity / self.step_size + FLOOR_EPSILON).floor() * self.step_size
        } else {
            quantity
        };
        format!("{:.*}", self.quantity_decimals, floored)
    }

    /// `price` as it would be submitted, back as a number.
    pub fn round_price(&self, price: f64) -> f64 {
        self.format_price(price).parse().unwrap_or(price)
    }

    /// `quantity` as it would be submitted, back as a number.
    pub fn round_quantity(&self, quantity: f64) -> f64 {
        self.format_quantity(quantity).parse().unwrap_or(quantity)
    }
}

impl Default for SymbolPrecision {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Number of decimal places in an increment such as `0.0010` (→ 3).
fn decimals_of(increment: f64) -> usize {
    if increment <= 0.0 {
        return 8;
    }
    // f64 Display never uses exponent notation and prints the shortest
    // round-trip representation, so trailing zeros are already stripped.
    let repr = increment.to_string();
    match repr.split_once('.') {
        Some((_, frac)) => frac.len(),
        None => 0,
    }
}
