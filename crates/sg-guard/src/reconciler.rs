//! Converge one symbol's protective stop onto a target price.
//!
//! Compares the desired stop with the live protective orders for the symbol
//! and issues the smallest set of exchange commands that leaves exactly one
//! correct stop on the book:
//!
//! | Live protective stops | Condition                          | Action  |
//! |-----------------------|------------------------------------|---------|
//! | 0                     | target available                   | CREATE  |
//! | 1                     | price, side, quantity all match    | none    |
//! | 1                     | any mismatch                       | REPLACE |
//! | 2+                    | always                             | REPLACE |
//!
//! A REPLACE cancels first and places second. If any cancel fails nothing is
//! placed, so a retry can never stack a duplicate stop. If the place fails
//! after the cancels went through, the position has no stop until the next
//! pass; the result carries the unprotected marker.

use std::sync::Arc;

use sg_core::{
    Direction, OrderRef, ReconcileAction, ReconciliationResult, Side, StopOrderView,
    SymbolPrecision,
};
use sg_td::FuturesExchange;
use tracing::{debug, error, info, warn};

use crate::notify::{Notifier, notify_best_effort};

/// What the position's stop should look like.
#[derive(Debug, Clone)]
pub struct ReconcileRequest<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub quantity: f64,
    /// Desired stop price; `None` keeps a single live stop's price.
    pub target: Option<f64>,
    /// Free-text reason carried into the log and notification.
    pub reason: &'a str,
}

/// Result plus the protective order left on the book.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub result: ReconciliationResult,
    /// Stop order covering the position afterwards, if one is known.
    pub order_ref: Option<OrderRef>,
    /// Its trigger price.
    pub stop_price: Option<f64>,
}

impl ReconcileOutcome {
    fn failed(result: ReconciliationResult) -> Self {
        Self { result, order_ref: None, stop_price: None }
    }
}

/// Stateless per-symbol reconciler.
pub struct OrderReconciler {
    exchange: Arc<dyn FuturesExchange>,
    notifier: Arc<dyn Notifier>,
    /// Relative quantity difference tolerated before a stop is replaced.
    quantity_tolerance: f64,
}

impl OrderReconciler {
    pub fn new(
        exchange: Arc<dyn FuturesExchange>,
        notifier: Arc<dyn Notifier>,
        quantity_tolerance: f64,
    ) -> Self {
        Self { exchange, notifier, quantity_tolerance }
    }

    /// Reconcile `req.symbol` against `live_orders`.
    ///
    /// `live_orders` may contain other symbols and non-stop orders; only this
    /// symbol's protective stops are considered.
    pub async fn reconcile(
        &self,
        req: &ReconcileRequest<'_>,
        live_orders: &[StopOrderView],
        precision: &SymbolPrecision,
    ) -> ReconcileOutcome {
        let stops: Vec<&StopOrderView> = live_orders
            .iter()
            .filter(|o| o.symbol == req.symbol && o.is_protective_stop())
            .collect();

        let quantity = precision.format_quantity(req.quantity);
        if precision.round_quantity(req.quantity) <= 0.0 {
            let action =
                if stops.is_empty() { ReconcileAction::Create } else { ReconcileAction::Replace };
            return ReconcileOutcome::failed(ReconciliationResult::error(
                action,
                format!("position size {} is below the lot step", req.quantity),
            ));
        }

        match stops.as_slice() {
            [] => match req.target {
                Some(target) => {
                    self.place(req, ReconcileAction::Create, &quantity, target, precision, 0).await
                }
                None => ReconcileOutcome::failed(
                    ReconciliationResult::error(
                        ReconcileAction::Create,
                        "no protective stop and no target price",
                    )
                    .unprotected(),
                ),
            },
            [order] => {
                let desired = req.target.unwrap_or(order.trigger_price);
                let mismatches = self.mismatches(order, req, desired, precision);
                if mismatches.is_empty() {
                    debug!(
                        "[reconcile] {}: stop {} @ {} in place",
                        req.symbol, order.order_ref, order.trigger_price
                    );
                    return ReconcileOutcome {
                        result: ReconciliationResult::ok(format!(
                            "stop {} @ {} in place",
                            order.order_ref,
                            precision.format_price(order.trigger_price)
                        )),
                        order_ref: Some(order.order_ref),
                        stop_price: Some(order.trigger_price),
                    };
                }
                info!(
                    "[reconcile] {}: replacing {} ({})",
                    req.symbol,
                    order.order_ref,
                    mismatches.join(", ")
                );
                self.replace(req, &stops, &quantity, desired, precision).await
            }
            many => {
                let close_side = req.side.close_direction();
                let desired = req.target.or_else(|| {
                    many.iter()
                        .filter(|o| o.side == close_side)
                        .map(|o| o.trigger_price)
                        .reduce(|a, b| req.side.most_protective(a, b))
                });
                let Some(desired) = desired else {
                    return ReconcileOutcome::failed(
                        ReconciliationResult::error(
                            ReconcileAction::Replace,
                            format!(
                                "{} stop orders, none closing the position, and no target price",
                                many.len()
                            ),
                        )
                        .unprotected(),
                    );
                };
                info!(
                    "[reconcile] {}: {} protective stops on the book, collapsing to one",
                    req.symbol,
                    many.len()
                );
                self.replace(req, &stops, &quantity, desired, precision).await
            }
        }
    }

    /// Reasons `order` does not match the desired stop; empty when it does.
    fn mismatches(
        &self,
        order: &StopOrderView,
        req: &ReconcileRequest<'_>,
        desired: f64,
        precision: &SymbolPrecision,
    ) -> Vec<String> {
        let mut out = Vec::new();
        let close_side = req.side.close_direction();
        if order.side != close_side {
            out.push(format!("side {}, expected {close_side}", order.side));
        }
        let quantity_ok = within_tolerance(order.quantity, req.quantity, self.quantity_tolerance);
        if !order.close_position && !quantity_ok {
            out.push(format!("quantity {}, expected {}", order.quantity, req.quantity));
        }
        let live = precision.format_price(order.trigger_price);
        let want = precision.format_price(desired);
        if live != want {
            out.push(format!("stop {live}, target {want}"));
        }
        out
    }

    /// Cancel every order in `stops`, then place one stop at `price`.
    async fn replace(
        &self,
        req: &ReconcileRequest<'_>,
        stops: &[&StopOrderView],
        quantity: &str,
        price: f64,
        precision: &SymbolPrecision,
    ) -> ReconcileOutcome {
        let mut cancelled = 0usize;
        for order in stops {
            match self.exchange.cancel(req.symbol, order.order_ref).await {
                Ok(()) => cancelled += 1,
                Err(e) if e.is_unknown_order() => {
                    warn!("[reconcile] {}: {} already gone", req.symbol, order.order_ref);
                    cancelled += 1;
                }
                Err(e) => {
                    warn!(
                        "[reconcile] {}: cancel {} failed: {e}; not placing a replacement",
                        req.symbol, order.order_ref
                    );
                    return ReconcileOutcome::failed(ReconciliationResult::error(
                        ReconcileAction::Replace,
                        format!(
                            "cancel {} failed after {cancelled} of {} cancelled: {e}; replacement deferred",
                            order.order_ref,
                            stops.len()
                        ),
                    ));
                }
            }
        }
        self.place(req, ReconcileAction::Replace, quantity, price, precision, cancelled).await
    }

    async fn place(
        &self,
        req: &ReconcileRequest<'_>,
        action: ReconcileAction,
        quantity: &str,
        price: f64,
        precision: &SymbolPrecision,
        cancelled: usize,
    ) -> ReconcileOutcome {
        let close_side = req.side.close_direction();
        let price_str = precision.format_price(price);

        match self.exchange.place_stop_order(req.symbol, close_side, quantity, &price_str).await {
            Ok(order_ref) => {
                let label = action_label(action);
                info!(
                    "[reconcile] {}: {label} {close_side} stop {quantity} @ {price_str} ({order_ref}), reason: {}",
                    req.symbol, req.reason
                );
                notify_best_effort(
                    &*self.notifier,
                    &stop_message(label, req, close_side, quantity, &price_str),
                )
                .await;
                ReconcileOutcome {
                    result: ReconciliationResult::fixed(
                        action,
                        format!("{label} {close_side} stop {quantity} @ {price_str} ({order_ref})"),
                    ),
                    order_ref: Some(order_ref),
                    stop_price: Some(precision.round_price(price)),
                }
            }
            Err(e) => {
                let failed = if cancelled > 0 {
                    format!(
                        "cancelled {cancelled} stop order(s) but placing @ {price_str} failed: {e}"
                    )
                } else {
                    format!("placing stop @ {price_str} failed: {e}")
                };
                let message = format!("{failed}; position currently unprotected");
                error!("[reconcile] {}: {message}", req.symbol);
                ReconcileOutcome::failed(ReconciliationResult::error(action, message).unprotected())
            }
        }
    }
}

/// `|live - want| / want <= tolerance`.
fn within_tolerance(live: f64, want: f64, tolerance: f64) -> bool {
    if want <= 0.0 {
        return live <= 0.0;
    }
    (live - want).abs() / want <= tolerance
}

fn action_label(action: ReconcileAction) -> &'static str {
    match action {
        ReconcileAction::Create => "CREATE",
        ReconcileAction::Replace => "REPLACE",
        ReconcileAction::Cleanup => "CLEANUP",
        ReconcileAction::None => "NONE",
    }
}

fn stop_message(
    label: &str,
    req: &ReconcileRequest<'_>,
    close_side: Direction,
    quantity: &str,
    price: &str,
) -> String {
    format!(
        "Stop {label}\nSymbol: {}\nPosition: {} {}\nOrder: {close_side} STOP_MARKET @ {price}\nReason: {}",
        req.symbol, req.side, quantity, req.reason
    )
}
