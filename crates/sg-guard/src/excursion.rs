//! Per-symbol record of the most favorable price seen since entry.
//!
//! The extreme is the trailing-stop anchor: highest price for LONG, lowest for
//! SHORT. Each record remembers the side it was opened with; a side flip
//! starts the record over. A change of entry price on the same side is a
//! scale-in (the exchange averages the entry) and keeps the anchor. A symbol
//! that goes flat is dropped by [`ExcursionTracker::retain_open`].

use std::collections::HashSet;

use ahash::AHashMap;
use sg_core::{Position, Side};

/// Advance an extreme with a new observation.
#[inline]
pub fn advance(side: Side, prior: Option<f64>, price: f64) -> f64 {
    match prior {
        Some(best) => match side {
            Side::Long => best.max(price),
            Side::Short => best.min(price),
        },
        None => price,
    }
}

/// `true` if a record opened on `recorded` still belongs to a position on
/// `live`. Entry price is not compared; adding to a position moves the
/// averaged entry without opening a new one.
pub(crate) fn same_position(recorded: Side, live: Side) -> bool {
    recorded == live
}

/// Best price seen for one open position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExcursionExtreme {
    pub side: Side,
    pub entry_price: f64,
    pub price: f64,
}

/// Symbol-keyed arena of [`ExcursionExtreme`]s.
#[derive(Debug, Default)]
pub struct ExcursionTracker {
    extremes: AHashMap<String, ExcursionExtreme>,
}

impl ExcursionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extreme for `position`, or `None` if none is recorded or the record
    /// belongs to a previous position on the other side.
    pub fn current(&self, position: &Position) -> Option<f64> {
        self.extremes
            .get(&position.symbol)
            .filter(|e| same_position(e.side, position.side))
            .map(|e| e.price)
    }

    /// Store the extreme computed for `position`, replacing any stale record.
    pub fn update(&mut self, position: &Position, price: f64) {
        self.extremes.insert(
            position.symbol.clone(),
            ExcursionExtreme { side: position.side, entry_price: position.entry_price, price },
        );
    }

    /// Advance the extreme for `position` with `price` and return the result.
    pub fn observe(&mut self, position: &Position, price: f64) -> f64 {
        let next = advance(position.side, self.current(position), price);
        self.update(position, next);
        next
    }

    pub fn get(&self, symbol: &str) -> Option<&ExcursionExtreme> {
        self.extremes.get(symbol)
    }

    pub fn remove(&mut self, symbol: &str) -> bool {
        self.extremes.remove(symbol).is_some()
    }

    /// Drop every record whose symbol is not in `open`. Returns the dropped
    /// symbols.
    pub fn retain_open(&mut self, open: &HashSet<String>) -> Vec<String> {
        let stale: Vec<String> =
            self.extremes.keys().filter(|s| !open.contains(*s)).cloned().collect();
        for s in &stale {
            self.extremes.remove(s);
        }
        stale
    }

    pub fn clear(&mut self) {
        self.extremes.clear();
    }

    pub fn len(&self) -> usize {
        self.extremes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extremes.is_empty()
    }
}
