//! Binance USDT-margined futures implementation of [`FuturesExchange`].
//!
//! # Architecture
//!
//! ```text
//! BinanceFutures
//! ├── FuturesClient        (signed REST, HMAC or Ed25519)
//! └── precision cache      (exchangeInfo filters, loaded once, tokio Mutex)
//! ```
//!
//! Protective stops may live in two places on Binance: the regular order book
//! (`orderId`, `type`, `stopPrice`) and the algo order service (`algoId`,
//! `orderType`, `triggerPrice`). Open-order queries merge both into one list
//! of [`StopOrderView`]s tagged with the matching [`OrderRef`] variant.

pub mod auth;
pub mod futures;

use ahash::AHashMap;
use anyhow::Context;
use async_trait::async_trait;
use sg_core::config::BinanceConfig;
use sg_core::error::ExchangeError;
use sg_core::{Direction, OrderKind, OrderRef, Position, Side, StopOrderView, SymbolPrecision};
use tokio::sync::Mutex;
use tracing::{info, warn};

use self::auth::RequestSigner;
use self::futures::{FuturesClient, StopOrderParams};
use crate::FuturesExchange;

/// Binance futures exchange collaborator.
pub struct BinanceFutures {
    client: FuturesClient,
    /// Place stops through the algo service instead of the regular book.
    use_algo_orders: bool,
    /// `workingType` for stop triggers.
    working_type: String,
    /// Per-symbol tick/lot precision from `exchangeInfo`.
    precision: Mutex<AHashMap<String, SymbolPrecision>>,
}

impl BinanceFutures {
    /// Build from config. Reads the Ed25519 key file when one is configured.
    pub fn new(config: &BinanceConfig) -> anyhow::Result<Self> {
        let signer = match config.ed25519_key_path {
            Some(ref path) => {
                let pem = std::fs::read_to_string(path)
                    .with_context(|| format!("read Ed25519 key {path}"))?;
                RequestSigner::ed25519_from_pem(&pem)?
            }
            None => RequestSigner::hmac(config.secret_key.clone()),
        };
        let client = FuturesClient::new(
            config.api_key.clone(),
            signer,
            config.rest_url.clone(),
            config.recv_window,
        );
        info!(
            "[binance-td] futures client ready, url={}, signing={}, algo_orders={}",
            config.rest_url,
            client.signing_method(),
            config.use_algo_orders,
        );
        Ok(Self {
            client,
            use_algo_orders: config.use_algo_orders,
            working_type: config.working_type.clone(),
            precision: Mutex::new(AHashMap::new()),
        })
    }

    /// Refresh the precision cache from `exchangeInfo`.
    async fn load_precision(&self) -> Result<(), ExchangeError> {
        let info = self.client.get_exchange_info().await.map_err(to_exchange_error)?;
        let parsed = parse_exchange_info(&info);
        if parsed.is_empty() {
            return Err(ExchangeError::Parse("exchangeInfo contained no symbols".into()));
        }
        info!("[binance-td] loaded precision for {} symbol(s)", parsed.len());
        *self.precision.lock().await = parsed;
        Ok(())
    }
}

#[async_trait]
impl FuturesExchange for BinanceFutures {
    async fn get_open_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let val = self.client.get_positions().await.map_err(to_exchange_error)?;
        let arr = val
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("positionRisk is not an array".into()))?;
        Ok(arr.iter().filter_map(parse_position).collect())
    }

    async fn get_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<StopOrderView>, ExchangeError> {
        let mut result = Vec::new();

        let regular = self.client.get_open_orders(symbol).await.map_err(to_exchange_error)?;
        collect(&regular, parse_regular_order, &mut result);

        // Algo orders are authoritative for stops placed through the algo
        // service; a failed query must not read as "no stop exists".
        let algo = self.client.get_open_algo_orders(symbol).await.map_err(to_exchange_error)?;
        let algo_rows = algo.get("orders").unwrap_or(&algo);
        collect(algo_rows, parse_algo_order, &mut result);

        Ok(result)
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), ExchangeError> {
        self.client.cancel_order(symbol, order_id).await.map_err(to_exchange_error)?;
        info!("[binance-td] order cancelled: {symbol} orderId={order_id}");
        Ok(())
    }

    async fn cancel_algo_order(&self, symbol: &str, algo_id: u64) -> Result<(), ExchangeError> {
        self.client.cancel_algo_order(algo_id).await.map_err(to_exchange_error)?;
        info!("[binance-td] algo order cancelled: {symbol} algoId={algo_id}");
        Ok(())
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: Direction,
        quantity: &str,
        stop_price: &str,
    ) -> Result<OrderRef, ExchangeError> {
        let client_id = format!("sg-{}", uuid::Uuid::new_v4().simple());
        let params = StopOrderParams {
            symbol,
            side: side.as_str(),
            quantity,
            stop_price,
            working_type: &self.working_type,
            client_id: &client_id,
        };

        let order_ref = if self.use_algo_orders {
            let resp = self.client.place_algo_stop_order(&params).await.map_err(to_exchange_error)?;
            let id = parse_u64(resp.get("algoId"))
                .ok_or_else(|| ExchangeError::Parse("algoId missing".into()))?;
            OrderRef::Algo(id)
        } else {
            let resp = self.client.place_stop_order(&params).await.map_err(to_exchange_error)?;
            let id = parse_u64(resp.get("orderId"))
                .ok_or_else(|| ExchangeError::Parse("orderId missing".into()))?;
            OrderRef::Simple(id)
        };

        info!(
            "[binance-td] stop placed: {symbol} {side} qty={quantity} stop={stop_price} → {order_ref}"
        );
        Ok(order_ref)
    }

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, ExchangeError> {
        if let Some(p) = self.precision.lock().await.get(symbol) {
            return Ok(*p);
        }
        // Unknown symbol (first call or newly listed): refresh once.
        self.load_precision().await?;
        self.precision
            .lock()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::NotConfigured(format!("no precision for {symbol}")))
    }
}

/// Recover the [`ExchangeError`] carried by a client error, or classify the
/// remainder as a parse failure.
fn to_exchange_error(e: anyhow::Error) -> ExchangeError {
    match e.downcast_ref::<ExchangeError>() {
        Some(inner) => {
            if inner.is_transient() {
                warn!("[binance-td] {e:#}");
            }
            inner.clone()
        }
        None => ExchangeError::Parse(format!("{e:#}")),
    }
}

// ---------------------------------------------------------------------------
// JSON → typed helpers
// ---------------------------------------------------------------------------

/// Parse a JSON value (string or number) as `f64`.
#[inline]
fn parse_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() { fast_float2::parse(s).ok() } else { v.as_f64() }
}

/// Parse a JSON value (string or number) as `u64`.
#[inline]
fn parse_u64(v: Option<&serde_json::Value>) -> Option<u64> {
    let v = v?;
    if let Some(s) = v.as_str() { s.parse().ok() } else { v.as_u64() }
}

fn collect(
    val: &serde_json::Value,
    parse: fn(&serde_json::Value) -> Option<StopOrderView>,
    result: &mut Vec<StopOrderView>,
) {
    if let Some(arr) = val.as_array() {
        result.extend(arr.iter().filter_map(parse));
    }
}

fn parse_direction(v: &serde_json::Value) -> Option<Direction> {
    match v.get("side")?.as_str()? {
        "BUY" => Some(Direction::Buy),
        "SELL" => Some(Direction::Sell),
        _ => None,
    }
}

/// Parse a `positionRisk` row. Zero-amount rows are skipped.
fn parse_position(v: &serde_json::Value) -> Option<Position> {
    let amt = parse_f64(v.get("positionAmt")).unwrap_or(0.0);
    if amt.abs() < 1e-12 {
        return None;
    }
    let side = if amt > 0.0 { Side::Long } else { Side::Short };
    let mut pos = Position::open(
        v.get("symbol")?.as_str()?,
        side,
        parse_f64(v.get("entryPrice"))?,
        amt.abs(),
        parse_f64(v.get("markPrice")).unwrap_or(0.0),
    );
    pos.leverage = parse_f64(v.get("leverage")).map_or(1, |l| l as u32);
    pos.unrealized_pnl = parse_f64(v.get("unRealizedProfit")).unwrap_or(0.0);
    Some(pos)
}

/// Parse a regular open order (`/fapi/v1/openOrders`).
fn parse_regular_order(v: &serde_json::Value) -> Option<StopOrderView> {
    Some(StopOrderView {
        symbol: v.get("symbol")?.as_str()?.to_string(),
        side: parse_direction(v)?,
        kind: OrderKind::parse(v.get("type")?.as_str()?),
        trigger_price: parse_f64(v.get("stopPrice")).unwrap_or(0.0),
        quantity: parse_f64(v.get("origQty")).unwrap_or(0.0),
        close_position: v.get("closePosition").and_then(|c| c.as_bool()).unwrap_or(false),
        order_ref: OrderRef::Simple(parse_u64(v.get("orderId"))?),
    })
}

/// Parse an open algo order (`/fapi/v1/openAlgoOrders`).
fn parse_algo_order(v: &serde_json::Value) -> Option<StopOrderView> {
    Some(StopOrderView {
        symbol: v.get("symbol")?.as_str()?.to_string(),
        side: parse_direction(v)?,
        kind: OrderKind::parse(v.get("orderType").or_else(|| v.get("type"))?.as_str()?),
        trigger_price: parse_f64(v.get("triggerPrice")).unwrap_or(0.0),
        quantity: parse_f64(v.get("quantity")).unwrap_or(0.0),
        close_position: v.get("closePosition").and_then(|c| c.as_bool()).unwrap_or(false),
        order_ref: OrderRef::Algo(parse_u64(v.get("algoId"))?),
    })
}

/// Extract `PRICE_FILTER.tickSize` / `LOT_SIZE.stepSize` per symbol.
fn parse_exchange_info(info: &serde_json::Value) -> AHashMap<String, SymbolPrecision> {
    let mut out = AHashMap::new();
    let Some(symbols) = info.get("symbols").and_then(|s| s.as_array()) else {
        return out;
    };

    for sym in symbols {
        let Some(name) = sym.get("symbol").and_then(|s| s.as_str()) else {
            continue;
        };
        let filters = sym.get("filters").and_then(|f| f.as_array());
        let filter = |kind: &str, field: &str| -> Option<f64> {
            filters?
                .iter()
                .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(kind))
                .and_then(|f| parse_f64(f.get(field)))
        };
        let from_decimals = |key: &str| parse_u64(sym.get(key)).map(|d| 1.0 / 10f64.powi(d as i32));
        let tick = filter("PRICE_FILTER", "tickSize").or_else(|| from_decimals("pricePrecision"));
        let step = filter("LOT_SIZE", "stepSize").or_else(|| from_decimals("quantityPrecision"));
        if let (Some(tick), Some(step)) = (tick, step) {
            out.insert(name.to_string(), SymbolPrecision::new(tick, step));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_long_and_short_positions() {
        let rows = json!([
            {"symbol": "BTCUSDT", "positionAmt": "0.010", "entryPrice": "60000.0",
             "markPrice": "61200.5", "unRealizedProfit": "12.0", "leverage": "10"},
            {"symbol": "ETHUSDT", "positionAmt": "-2", "entryPrice": "3000", "markPrice": "2900"},
            {"symbol": "XRPUSDT", "positionAmt": "0.000", "entryPrice": "0.0", "markPrice": "0.5"}
        ]);
        let positions: Vec<Position> =
            rows.as_array().unwrap().iter().filter_map(parse_position).collect();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].side, Side::Long);
        assert_eq!(positions[0].quantity, 0.01);
        assert_eq!(positions[0].mark_price, 61200.5);
        assert_eq!(positions[0].leverage, 10);
        assert_eq!(positions[1].side, Side::Short);
        assert_eq!(positions[1].quantity, 2.0);
        assert!(positions[1].is_open());
    }

    #[test]
    fn parses_regular_stop_order() {
        let v = json!({"symbol": "BTCUSDT", "orderId": 283194212, "side": "SELL", "type": "STOP_MARKET",
                       "stopPrice": "59000", "origQty": "0.010", "closePosition": false});
        let o = parse_regular_order(&v).unwrap();
        assert_eq!(o.order_ref, OrderRef::Simple(283194212));
        assert_eq!(o.kind, OrderKind::StopMarket);
        assert_eq!(o.trigger_price, 59000.0);
        assert_eq!(o.side, Direction::Sell);
        assert!(o.is_protective_stop());
    }

    #[test]
    fn parses_algo_stop_order() {
        let v = json!({"algoId": 2146760, "symbol": "ETHUSDT", "side": "BUY", "orderType": "STOP_MARKET",
                       "triggerPrice": "3060.00", "quantity": "2", "closePosition": false});
        let o = parse_algo_order(&v).unwrap();
        assert_eq!(o.order_ref, OrderRef::Algo(2146760));
        assert_eq!(o.trigger_price, 3060.0);
        assert_eq!(o.quantity, 2.0);
    }

    #[test]
    fn limit_orders_are_not_protective() {
        let v = json!({"symbol": "BTCUSDT", "orderId": 1, "side": "SELL", "type": "LIMIT",
                       "stopPrice": "0", "origQty": "1"});
        assert!(!parse_regular_order(&v).unwrap().is_protective_stop());
    }

    #[test]
    fn collects_algo_rows_from_array() {
        let mut out = Vec::new();
        let rows = json!([
            {"algoId": 1, "symbol": "A", "side": "SELL", "orderType": "STOP_MARKET", "triggerPrice": "1"},
            {"symbol": "broken"}
        ]);
        collect(&rows, parse_algo_order, &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn exchange_info_filters() {
        let info = json!({"symbols": [
            {"symbol": "BTCUSDT", "pricePrecision": 2, "quantityPrecision": 3, "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.10", "minPrice": "556.80"},
                {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001"}
            ]},
            {"symbol": "NOFILTER", "pricePrecision": 4, "quantityPrecision": 0}
        ]});
        let map = parse_exchange_info(&info);
        let btc = map.get("BTCUSDT").unwrap();
        assert_eq!(btc.tick_size, 0.1);
        assert_eq!(btc.price_decimals, 1);
        assert_eq!(btc.quantity_decimals, 3);
        let nf = map.get("NOFILTER").unwrap();
        assert_eq!(nf.price_decimals, 4);
        assert_eq!(nf.quantity_decimals, 0);
    }

    #[test]
    fn client_errors_map_back_to_taxonomy() {
        let unknown = ExchangeError::Rejected { code: -2011, msg: "Unknown order sent.".into() };
        let e = anyhow::Error::from(unknown.clone()).context("cancel order");
        assert_eq!(to_exchange_error(e), unknown);
        assert!(matches!(to_exchange_error(anyhow::anyhow!("boom")), ExchangeError::Parse(_)));
    }
}
