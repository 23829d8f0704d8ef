//! In-memory exchange and notifier doubles for tests.

use std::collections::HashSet;
use std::sync::Mutex;

use ahash::AHashMap;
use anyhow::{Result, bail};
use async_trait::async_trait;
use sg_core::error::ExchangeError;
use sg_core::{Direction, OrderKind, OrderRef, Position, Side, StopOrderView, SymbolPrecision};
use sg_td::FuturesExchange;

use crate::notify::Notifier;

/// A mutating call the guard made against the exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Cancel { symbol: String, order_ref: OrderRef },
    Place { symbol: String, side: Direction, quantity: String, stop_price: String },
}

impl Command {
    pub fn is_place(&self) -> bool {
        matches!(self, Self::Place { .. })
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel { .. })
    }
}

#[derive(Default)]
struct Book {
    positions: Vec<Position>,
    orders: Vec<StopOrderView>,
    precision: AHashMap<String, SymbolPrecision>,
    commands: Vec<Command>,
    fail_cancel: HashSet<OrderRef>,
    fail_place: bool,
    fail_positions: bool,
    fail_orders: HashSet<String>,
    next_id: u64,
}

/// Scripted order book. Cancels remove orders, placements add algo stops.
#[derive(Default)]
pub struct MockExchange {
    book: Mutex<Book>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        self.book.lock().unwrap().positions = positions;
    }

    pub fn set_precision(&self, symbol: &str, precision: SymbolPrecision) {
        self.book.lock().unwrap().precision.insert(symbol.to_string(), precision);
    }

    /// Add a `STOP_MARKET` algo order and return its reference.
    pub fn add_stop(
        &self,
        symbol: &str,
        side: Direction,
        trigger_price: f64,
        quantity: f64,
    ) -> OrderRef {
        let mut book = self.book.lock().unwrap();
        book.next_id += 1;
        let order_ref = OrderRef::Algo(book.next_id);
        book.orders.push(StopOrderView {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::StopMarket,
            trigger_price,
            quantity,
            close_position: false,
            order_ref,
        });
        order_ref
    }

    pub fn add_order(&self, order: StopOrderView) {
        self.book.lock().unwrap().orders.push(order);
    }

    /// Drop every order, as if they were cancelled outside the guard.
    pub fn clear_orders(&self) {
        self.book.lock().unwrap().orders.clear();
    }

    pub fn orders(&self) -> Vec<StopOrderView> {
        self.book.lock().unwrap().orders.clone()
    }

    pub fn orders_for(&self, symbol: &str) -> Vec<StopOrderView> {
        self.orders().into_iter().filter(|o| o.symbol == symbol).collect()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.book.lock().unwrap().commands.clone()
    }

    pub fn take_commands(&self) -> Vec<Command> {
        std::mem::take(&mut self.book.lock().unwrap().commands)
    }

    pub fn fail_cancel(&self, order_ref: OrderRef) {
        self.book.lock().unwrap().fail_cancel.insert(order_ref);
    }

    pub fn fail_place(&self, fail: bool) {
        self.book.lock().unwrap().fail_place = fail;
    }

    pub fn fail_positions(&self, fail: bool) {
        self.book.lock().unwrap().fail_positions = fail;
    }

    /// Fail `get_open_orders` for `symbol`, or for the account-wide query with `"*"`.
    pub fn fail_orders(&self, symbol: &str) {
        self.book.lock().unwrap().fail_orders.insert(symbol.to_string());
    }

    fn cancel_ref(&self, symbol: &str, order_ref: OrderRef) -> Result<(), ExchangeError> {
        let mut book = self.book.lock().unwrap();
        book.commands.push(Command::Cancel { symbol: symbol.to_string(), order_ref });
        if book.fail_cancel.contains(&order_ref) {
            return Err(ExchangeError::Transient("cancel timed out".into()));
        }
        let before = book.orders.len();
        book.orders.retain(|o| o.order_ref != order_ref);
        if book.orders.len() == before {
            return Err(ExchangeError::Rejected { code: -2011, msg: "Unknown order sent.".into() });
        }
        Ok(())
    }
}

#[async_trait]
impl FuturesExchange for MockExchange {
    async fn get_open_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let book = self.book.lock().unwrap();
        if book.fail_positions {
            return Err(ExchangeError::Transient("positionRisk unavailable".into()));
        }
        Ok(book.positions.clone())
    }

    async fn get_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<StopOrderView>, ExchangeError> {
        let book = self.book.lock().unwrap();
        if book.fail_orders.contains(symbol.unwrap_or("*")) {
            return Err(ExchangeError::Transient("openOrders unavailable".into()));
        }
        Ok(book.orders.iter().filter(|o| symbol.is_none_or(|s| o.symbol == s)).cloned().collect())
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), ExchangeError> {
        self.cancel_ref(symbol, OrderRef::Simple(order_id))
    }

    async fn cancel_algo_order(&self, symbol: &str, algo_id: u64) -> Result<(), ExchangeError> {
        self.cancel_ref(symbol, OrderRef::Algo(algo_id))
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: Direction,
        quantity: &str,
        stop_price: &str,
    ) -> Result<OrderRef, ExchangeError> {
        let mut book = self.book.lock().unwrap();
        book.commands.push(Command::Place {
            symbol: symbol.to_string(),
            side,
            quantity: quantity.to_string(),
            stop_price: stop_price.to_string(),
        });
        if book.fail_place {
            return Err(ExchangeError::Rejected {
                code: -2021,
                msg: "Order would immediately trigger.".into(),
            });
        }
        book.next_id += 1;
        let order_ref = OrderRef::Algo(book.next_id);
        book.orders.push(StopOrderView {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::StopMarket,
            trigger_price: stop_price.parse().unwrap(),
            quantity: quantity.parse().unwrap(),
            close_position: false,
            order_ref,
        });
        Ok(order_ref)
    }

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, ExchangeError> {
        let book = self.book.lock().unwrap();
        let default = SymbolPrecision::new(0.001, 0.001);
        Ok(book.precision.get(symbol).copied().unwrap_or(default))
    }
}

/// Collects every message; optionally fails delivery after recording it.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { messages: Mutex::default(), fail: true }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        self.messages.lock().unwrap().push(text.to_string());
        if self.fail {
            bail!("chat unreachable");
        }
        Ok(())
    }
}

/// Open LONG/SHORT position marked at `mark`.
pub fn position(symbol: &str, side: Side, entry: f64, quantity: f64, mark: f64) -> Position {
    Position::open(symbol, side, entry, quantity, mark)
}
