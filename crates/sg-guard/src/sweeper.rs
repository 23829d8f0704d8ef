//! Orphan stop cleanup.
//!
//! A protective stop whose symbol has no open position is left over from a
//! position that closed (stop hit, manual close, liquidation). It must go:
//! if a new position opens on that symbol, a stale reduce-only stop would
//! close it at the old price.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use sg_core::{ReconcileAction, ReconciliationResult, StopOrderView};
use sg_td::FuturesExchange;
use tracing::{info, warn};

pub struct OrphanSweeper {
    exchange: Arc<dyn FuturesExchange>,
}

impl OrphanSweeper {
    pub fn new(exchange: Arc<dyn FuturesExchange>) -> Self {
        Self { exchange }
    }

    /// Cancel every protective stop whose symbol is not in `open_symbols`.
    ///
    /// Returns one CLEANUP result per orphaned symbol. A failed cancel is
    /// reported and retried on the next sweep; it does not stop the sweep.
    pub async fn sweep(
        &self,
        open_symbols: &HashSet<String>,
        live_orders: &[StopOrderView],
    ) -> BTreeMap<String, ReconciliationResult> {
        let mut orphans: BTreeMap<&str, Vec<&StopOrderView>> = BTreeMap::new();
        let orphaned = live_orders
            .iter()
            .filter(|o| o.is_protective_stop() && !open_symbols.contains(&o.symbol));
        for order in orphaned {
            orphans.entry(order.symbol.as_str()).or_default().push(order);
        }

        let mut results = BTreeMap::new();
        for (symbol, orders) in orphans {
            let mut cancelled = 0usize;
            let mut failures = Vec::new();
            for order in &orders {
                match self.exchange.cancel(symbol, order.order_ref).await {
                    Ok(()) => {
                        info!(
                            "[sweep] {symbol}: cancelled orphan stop {} @ {}",
                            order.order_ref, order.trigger_price
                        );
                        cancelled += 1;
                    }
                    Err(e) if e.is_unknown_order() => {
                        info!("[sweep] {symbol}: orphan {} already gone", order.order_ref);
                        cancelled += 1;
                    }
                    Err(e) => {
                        warn!("[sweep] {symbol}: cancel orphan {} failed: {e}", order.order_ref);
                        failures.push(format!("{}: {e}", order.order_ref));
                    }
                }
            }

            let result = if failures.is_empty() {
                ReconciliationResult::fixed(
                    ReconcileAction::Cleanup,
                    format!("cancelled {cancelled} orphan stop order(s)"),
                )
            } else {
                ReconciliationResult::error(
                    ReconcileAction::Cleanup,
                    format!(
                        "cancelled {cancelled} of {} orphan stop order(s); {}",
                        orders.len(),
                        failures.join("; ")
                    ),
                )
            };
            results.insert(symbol.to_string(), result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use sg_core::{Direction, OrderKind, OrderRef, ReconcileStatus};

    use super::*;
    use crate::testing::{Command, MockExchange};

    fn open(symbols: &[&str]) -> HashSet<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn cancels_exactly_the_orphans() {
        let exchange = Arc::new(MockExchange::new());
        let keep = exchange.add_stop("BTCUSDT", Direction::Sell, 98.0, 1.0);
        let gone_a = exchange.add_stop("ETHUSDT", Direction::Sell, 1900.0, 1.0);
        let gone_b = exchange.add_stop("ETHUSDT", Direction::Buy, 2100.0, 1.0);
        let gone_c = exchange.add_stop("SOLUSDT", Direction::Sell, 90.0, 3.0);
        // not a protective stop, left alone
        exchange.add_order(StopOrderView {
            symbol: "XRPUSDT".into(),
            side: Direction::Sell,
            kind: OrderKind::Limit,
            trigger_price: 0.0,
            quantity: 10.0,
            close_position: false,
            order_ref: OrderRef::Simple(1),
        });

        let sweeper = OrphanSweeper::new(exchange.clone());
        let results = sweeper.sweep(&open(&["BTCUSDT"]), &exchange.orders()).await;

        assert_eq!(results.keys().cloned().collect::<Vec<_>>(), vec!["ETHUSDT", "SOLUSDT"]);
        assert!(
            results
                .values()
                .all(|r| r.status == ReconcileStatus::Fixed && r.action == ReconcileAction::Cleanup)
        );

        let cancelled: Vec<OrderRef> = exchange
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::Cancel { order_ref, .. } => Some(order_ref),
                Command::Place { .. } => None,
            })
            .collect();
        assert_eq!(cancelled, vec![gone_a, gone_b, gone_c]);
        assert!(!cancelled.contains(&keep));
        assert_eq!(exchange.orders().len(), 2);
    }

    #[tokio::test]
    async fn failure_does_not_block_other_symbols() {
        let exchange = Arc::new(MockExchange::new());
        let stuck = exchange.add_stop("ADAUSDT", Direction::Sell, 0.3, 100.0);
        exchange.add_stop("ETHUSDT", Direction::Sell, 1900.0, 1.0);
        exchange.fail_cancel(stuck);

        let sweeper = OrphanSweeper::new(exchange.clone());
        let results = sweeper.sweep(&open(&[]), &exchange.orders()).await;
        assert!(results["ADAUSDT"].is_error());
        assert_eq!(results["ETHUSDT"].status, ReconcileStatus::Fixed);
        assert_eq!(exchange.orders().len(), 1);

        // retried on the next sweep
        let sweeper = OrphanSweeper::new(exchange.clone());
        let results = sweeper.sweep(&open(&[]), &exchange.orders()).await;
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("ADAUSDT"));
    }

    #[tokio::test]
    async fn nothing_to_do_when_every_symbol_is_open() {
        let exchange = Arc::new(MockExchange::new());
        exchange.add_stop("BTCUSDT", Direction::Sell, 98.0, 1.0);
        let sweeper = OrphanSweeper::new(exchange.clone());
        let results = sweeper.sweep(&open(&["BTCUSDT"]), &exchange.orders()).await;
        assert!(results.is_empty());
        assert!(exchange.commands().is_empty());
    }
}
