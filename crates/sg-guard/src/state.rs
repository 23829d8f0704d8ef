//! Per-guard mutable state: excursion extremes, committed ladder levels,
//! known stop orders and the last result per symbol.
//!
//! Owned by one [`crate::GuardLoop`] and only touched while its cycle lock is
//! held. Symbols drop out as soon as their position is gone; with no open
//! positions the ladder book is emptied entirely.

use std::collections::{BTreeMap, HashSet};

use ahash::AHashMap;
use serde::Serialize;
use sg_core::{OrderRef, Position, ReconciliationResult, Side};
use tracing::info;

use crate::excursion::{ExcursionTracker, same_position};

/// What the guard remembers about one open position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolState {
    pub side: Side,
    pub entry_price: f64,
    /// Highest ladder level committed; never lowered for this position.
    pub ladder_level: u8,
    pub trailing_active: bool,
    pub stop_order: Option<OrderRef>,
    pub stop_price: Option<f64>,
}

impl SymbolState {
    fn new(position: &Position) -> Self {
        Self {
            side: position.side,
            entry_price: position.entry_price,
            ladder_level: 0,
            trailing_active: false,
            stop_order: None,
            stop_price: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct GuardState {
    pub excursions: ExcursionTracker,
    symbols: AHashMap<String, SymbolState>,
    last_results: AHashMap<String, ReconciliationResult>,
    pub cycles: u64,
}

impl GuardState {
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolState> {
        self.symbols.get(symbol)
    }

    /// State for `position`. Starts over if the side flipped; a moved entry
    /// on the same side is a scale-in and keeps the committed level.
    pub fn track(&mut self, position: &Position) -> &mut SymbolState {
        let state = self
            .symbols
            .entry(position.symbol.clone())
            .or_insert_with(|| SymbolState::new(position));
        if !same_position(state.side, position.side) {
            info!(
                "[guard] {}: new position {} @ {} (was {} @ {}), ladder reset",
                position.symbol, position.side, position.entry_price, state.side, state.entry_price
            );
            *state = SymbolState::new(position);
        } else if state.entry_price != position.entry_price {
            info!(
                "[guard] {}: entry moved {} -> {}, keeping level {}",
                position.symbol, state.entry_price, position.entry_price, state.ladder_level
            );
            state.entry_price = position.entry_price;
        }
        state
    }

    /// Forget every symbol not in `open`. Returns the symbols dropped.
    pub fn retain_open(&mut self, open: &HashSet<String>) -> Vec<String> {
        let mut dropped: Vec<String> =
            self.symbols.keys().filter(|s| !open.contains(*s)).cloned().collect();
        self.symbols.retain(|s, _| open.contains(s));
        for s in self.excursions.retain_open(open) {
            if !dropped.contains(&s) {
                dropped.push(s);
            }
        }
        dropped.sort();
        dropped
    }

    /// Forget every position.
    pub fn clear(&mut self) {
        self.symbols.clear();
        self.excursions.clear();
    }

    /// Record `result` for `symbol` and return the previous one.
    pub fn record_result(
        &mut self,
        symbol: &str,
        result: ReconciliationResult,
    ) -> Option<ReconciliationResult> {
        self.last_results.insert(symbol.to_string(), result)
    }

    pub fn last_result(&self, symbol: &str) -> Option<&ReconciliationResult> {
        self.last_results.get(symbol)
    }

    /// Drop remembered results for symbols outside `keep`.
    pub fn retain_results(&mut self, keep: impl Fn(&str) -> bool) {
        self.last_results.retain(|s, _| keep(s));
    }

    pub fn snapshot(&self) -> BTreeMap<String, SymbolSnapshot> {
        let mut out = BTreeMap::new();
        for (symbol, s) in &self.symbols {
            out.insert(
                symbol.clone(),
                SymbolSnapshot {
                    state: s.clone(),
                    excursion: self.excursions.get(symbol).map(|e| e.price),
                    last_result: self.last_results.get(symbol).cloned(),
                },
            );
        }
        out
    }
}

/// Operator view of one tracked symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolSnapshot {
    #[serde(flatten)]
    pub state: SymbolState,
    pub excursion: Option<f64>,
    pub last_result: Option<ReconciliationResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_resets_on_new_position() {
        let mut st = GuardState::default();
        let first = Position::open("BTCUSDT", Side::Long, 100.0, 1.0, 100.0);
        st.track(&first).ladder_level = 2;
        assert_eq!(st.track(&first).ladder_level, 2);

        let flipped = Position::open("BTCUSDT", Side::Short, 100.0, 1.0, 100.0);
        let s = st.track(&flipped);
        assert_eq!(s.ladder_level, 0);
        assert_eq!(s.side, Side::Short);
    }

    #[test]
    fn track_keeps_level_on_scale_in() {
        let mut st = GuardState::default();
        let first = Position::open("BTCUSDT", Side::Long, 100.0, 1.0, 105.0);
        st.track(&first).ladder_level = 3;

        let averaged = Position::open("BTCUSDT", Side::Long, 101.0, 2.0, 104.0);
        let s = st.track(&averaged);
        assert_eq!(s.ladder_level, 3);
        assert_eq!(s.entry_price, 101.0);
    }

    #[test]
    fn retain_open_drops_ladder_and_excursion() {
        let mut st = GuardState::default();
        let a = Position::open("A", Side::Long, 1.0, 1.0, 1.0);
        let b = Position::open("B", Side::Long, 1.0, 1.0, 1.0);
        st.track(&a);
        st.track(&b);
        st.excursions.observe(&b, 1.2);
        let open: HashSet<String> = ["A".to_string()].into_iter().collect();
        assert_eq!(st.retain_open(&open), vec!["B".to_string()]);
        assert!(st.symbol("B").is_none());
        assert!(st.excursions.get("B").is_none());
        assert!(st.symbol("A").is_some());
    }

    #[test]
    fn snapshot_serializes_flat() {
        let mut st = GuardState::default();
        let p = Position::open("BTCUSDT", Side::Long, 100.0, 1.0, 100.0);
        st.track(&p).stop_order = Some(OrderRef::Algo(3));
        st.excursions.observe(&p, 104.0);
        st.record_result("BTCUSDT", ReconciliationResult::ok("in place"));
        let v = serde_json::to_value(st.snapshot()).unwrap();
        assert_eq!(v["BTCUSDT"]["side"], "LONG");
        assert_eq!(v["BTCUSDT"]["excursion"], 104.0);
        assert_eq!(v["BTCUSDT"]["stop_order"]["kind"], "algo");
        assert_eq!(v["BTCUSDT"]["last_result"]["status"], "OK");
    }
}
