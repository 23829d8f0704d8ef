//! # sg-td
//!
//! Exchange access for the stop-loss guard.
//!
//! The guard talks to the exchange only through [`FuturesExchange`], which
//! covers the handful of calls a protective-stop reconciler needs: read
//! positions and open orders, cancel, place a stop, and look up tick/lot
//! precision. The exchange is polled; it is the source of truth.
//!
//! ## Implementations
//!
//! | Exchange | Module    | Account              | Stop placement            |
//! |----------|-----------|----------------------|---------------------------|
//! | Binance  | `binance` | USDT-margined futures| algo service or order book|

pub mod binance;

use async_trait::async_trait;
use sg_core::error::ExchangeError;
use sg_core::{Direction, OrderRef, Position, StopOrderView, SymbolPrecision};

/// Exchange collaborator consumed by the guard.
///
/// Every call may fail transiently; callers treat each one as fallible and
/// never retry inside a cycle. All methods take `&self` so one client can be
/// shared behind an `Arc`.
#[async_trait]
pub trait FuturesExchange: Send + Sync {
    /// All positions with a non-zero size.
    async fn get_open_positions(&self) -> Result<Vec<Position>, ExchangeError>;

    /// Open orders (regular and algo), for one symbol or the whole account.
    async fn get_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<StopOrderView>, ExchangeError>;

    /// Cancel a regular order.
    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), ExchangeError>;

    /// Cancel an algo (conditional) order.
    async fn cancel_algo_order(&self, symbol: &str, algo_id: u64) -> Result<(), ExchangeError>;

    /// Place a reduce-only stop-market order. `quantity` and `stop_price` are
    /// already formatted at exchange precision.
    async fn place_stop_order(
        &self,
        symbol: &str,
        side: Direction,
        quantity: &str,
        stop_price: &str,
    ) -> Result<OrderRef, ExchangeError>;

    /// Tick and lot precision for `symbol`.
    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, ExchangeError>;

    /// Cancel an order of either kind, dispatching on the reference variant.
    async fn cancel(&self, symbol: &str, order_ref: OrderRef) -> Result<(), ExchangeError> {
        match order_ref {
            OrderRef::Simple(id) => self.cancel_order(symbol, id).await,
            OrderRef::Algo(id) => self.cancel_algo_order(symbol, id).await,
        }
    }
}
