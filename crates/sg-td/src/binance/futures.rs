//! Binance USDT-margined futures REST client.
//!
//! Thin signed-request layer: every method returns the raw JSON body and
//! leaves interpretation to [`super::BinanceFutures`]. Failures are
//! [`ExchangeError`]s wrapped in `anyhow::Error`, so callers can either add
//! context or downcast to the taxonomy.
//!
//! # REST endpoints
//!
//! | Operation          | Method | Path                      |
//! |--------------------|--------|---------------------------|
//! | Positions          | GET    | `/fapi/v3/positionRisk`   |
//! | Open orders        | GET    | `/fapi/v1/openOrders`     |
//! | Open algo orders   | GET    | `/fapi/v1/openAlgoOrders` |
//! | Place order        | POST   | `/fapi/v1/order`          |
//! | Place algo order   | POST   | `/fapi/v1/algoOrder`      |
//! | Cancel order       | DELETE | `/fapi/v1/order`          |
//! | Cancel algo order  | DELETE | `/fapi/v1/algoOrder`      |
//! | Exchange info      | GET    | `/fapi/v1/exchangeInfo`   |

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use sg_core::error::ExchangeError;
use tracing::debug;

use super::auth::{self, RequestSigner};

// ---------------------------------------------------------------------------
// Stop order request
// ---------------------------------------------------------------------------

/// Parameters of a reduce-only `STOP_MARKET` order, already formatted at
/// exchange precision.
#[derive(Debug, Clone)]
pub struct StopOrderParams<'a> {
    pub symbol: &'a str,
    pub side: &'a str,
    pub quantity: &'a str,
    pub stop_price: &'a str,
    pub working_type: &'a str,
    pub client_id: &'a str,
}

// ---------------------------------------------------------------------------
// FuturesClient
// ---------------------------------------------------------------------------

/// Binance USDT-margined futures REST client.
pub struct FuturesClient {
    /// Shared HTTP client.
    http: reqwest::Client,
    /// API key.
    api_key: String,
    /// Request signer (HMAC or Ed25519).
    signer: RequestSigner,
    /// REST base URL (e.g. `https://fapi.binance.com`).
    base_url: String,
    /// `recvWindow` for signed requests.
    recv_window: u64,
}

impl FuturesClient {
    /// Create a new futures client (no connections opened yet).
    pub fn new(api_key: String, signer: RequestSigner, base_url: String, recv_window: u64) -> Self {
        Self { http: reqwest::Client::new(), api_key, signer, base_url, recv_window }
    }

    /// Signing method in use.
    pub fn signing_method(&self) -> &'static str {
        self.signer.method()
    }

    // -----------------------------------------------------------------------
    // REST queries
    // -----------------------------------------------------------------------

    /// Query current positions (all symbols, including zero rows).
    pub async fn get_positions(&self) -> Result<serde_json::Value> {
        self.signed(Method::GET, "/fapi/v3/positionRisk", &[]).await.context("query positions")
    }

    /// Query open regular orders, optionally for one symbol.
    pub async fn get_open_orders(&self, symbol: Option<&str>) -> Result<serde_json::Value> {
        let params: Vec<(&str, &str)> = symbol.map(|s| vec![("symbol", s)]).unwrap_or_default();
        self.signed(Method::GET, "/fapi/v1/openOrders", &params).await.context("query open orders")
    }

    /// Query open algo (conditional) orders, optionally for one symbol.
    pub async fn get_open_algo_orders(&self, symbol: Option<&str>) -> Result<serde_json::Value> {
        let params: Vec<(&str, &str)> = symbol.map(|s| vec![("symbol", s)]).unwrap_or_default();
        self.signed(Method::GET, "/fapi/v1/openAlgoOrders", &params)
            .await
            .context("query open algo orders")
    }

    /// Fetch exchange info (symbol list, filters, etc.). Unsigned.
    pub async fn get_exchange_info(&self) -> Result<serde_json::Value> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let resp = self.http.get(&url).send().await.map_err(transport_error)?;
        read_body(resp).await.context("query exchange info")
    }

    // -----------------------------------------------------------------------
    // Order operations
    // -----------------------------------------------------------------------

    /// Place a reduce-only `STOP_MARKET` order in the regular order book.
    pub async fn place_stop_order(&self, p: &StopOrderParams<'_>) -> Result<serde_json::Value> {
        let params = [
            ("symbol", p.symbol),
            ("side", p.side),
            ("type", "STOP_MARKET"),
            ("quantity", p.quantity),
            ("stopPrice", p.stop_price),
            ("reduceOnly", "true"),
            ("workingType", p.working_type),
            ("newClientOrderId", p.client_id),
        ];
        self.signed(Method::POST, "/fapi/v1/order", &params).await.context("place stop order")
    }

    /// Place a reduce-only `STOP_MARKET` conditional order via the algo service.
    pub async fn place_algo_stop_order(
        &self,
        p: &StopOrderParams<'_>,
    ) -> Result<serde_json::Value> {
        let params = [
            ("algoType", "CONDITIONAL"),
            ("symbol", p.symbol),
            ("side", p.side),
            ("type", "STOP_MARKET"),
            ("quantity", p.quantity),
            ("triggerPrice", p.stop_price),
            ("reduceOnly", "true"),
            ("workingType", p.working_type),
            ("clientAlgoId", p.client_id),
        ];
        self.signed(Method::POST, "/fapi/v1/algoOrder", &params)
            .await
            .context("place algo stop order")
    }

    /// Cancel a regular order by exchange order id.
    pub async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<serde_json::Value> {
        let oid = order_id.to_string();
        self.signed(Method::DELETE, "/fapi/v1/order", &[("symbol", symbol), ("orderId", &oid)])
            .await
            .context("cancel order")
    }

    /// Cancel an algo order by algo id.
    pub async fn cancel_algo_order(&self, algo_id: u64) -> Result<serde_json::Value> {
        let aid = algo_id.to_string();
        self.signed(Method::DELETE, "/fapi/v1/algoOrder", &[("algoId", &aid)])
            .await
            .context("cancel algo order")
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    /// Send a signed request; parameters go in the query string.
    async fn signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        let timestamp = current_timestamp_ms();
        let recv_str = self.recv_window.to_string();
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("recvWindow", &recv_str));
        all.push(("timestamp", &timestamp));

        let query = auth::build_signed_query(&all, &self.signer);
        let url = format!("{}{path}?{query}", self.base_url);
        debug!("[binance-td] {method} {path}");

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        read_body(resp).await
    }
}

/// Map a reqwest send failure (DNS, connect, timeout, TLS) to a transient error.
fn transport_error(e: reqwest::Error) -> anyhow::Error {
    ExchangeError::Transient(format!("request failed: {e}")).into()
}

/// Read a response, classifying non-2xx statuses into the error taxonomy.
async fn read_body(resp: reqwest::Response) -> Result<serde_json::Value> {
    let status = resp.status();
    let text = resp.text().await.map_err(transport_error)?;

    if status.is_success() {
        return serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Parse(format!("invalid JSON body: {e}")).into());
    }
    Err(classify_failure(status, &text).into())
}

/// Turn an HTTP failure status and Binance error body into an [`ExchangeError`].
///
/// 429 (rate limit), 418 (IP ban) and 5xx are transient; other 4xx carry the
/// Binance `{"code": .., "msg": ..}` body and are rejections.
pub(crate) fn classify_failure(status: StatusCode, body: &str) -> ExchangeError {
    let throttled = status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418;
    if throttled || status.is_server_error() {
        return ExchangeError::Transient(format!("HTTP {status}: {body}"));
    }
    let parsed: Option<(i64, String)> =
        serde_json::from_str::<serde_json::Value>(body).ok().and_then(|v| {
            let code = v.get("code")?.as_i64()?;
            let msg = v.get("msg")?.as_str()?.to_string();
            Some((code, msg))
        });
    match parsed {
        Some((code, msg)) => ExchangeError::Rejected { code, msg },
        None => ExchangeError::Rejected { code: i64::from(status.as_u16()), msg: body.to_string() },
    }
}

/// Returns the current Unix timestamp in milliseconds.
fn current_timestamp_ms() -> String {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_transient() {
        let body = r#"{"code":-1003,"msg":"Too many requests"}"#;
        let e = classify_failure(StatusCode::TOO_MANY_REQUESTS, body);
        assert!(e.is_transient());
        assert!(classify_failure(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_failure(StatusCode::from_u16(418).unwrap(), "").is_transient());
    }

    #[test]
    fn business_error_is_rejection() {
        let body = r#"{"code":-2021,"msg":"Order would immediately trigger."}"#;
        let e = classify_failure(StatusCode::BAD_REQUEST, body);
        assert_eq!(
            e,
            ExchangeError::Rejected { code: -2021, msg: "Order would immediately trigger.".into() }
        );
    }

    #[test]
    fn unparseable_body_keeps_status() {
        let e = classify_failure(StatusCode::FORBIDDEN, "<html>WAF</html>");
        assert_eq!(e, ExchangeError::Rejected { code: 403, msg: "<html>WAF</html>".into() });
    }

    #[test]
    fn downcast_survives_context() {
        let err: anyhow::Error =
            anyhow::Error::from(ExchangeError::Transient("x".into())).context("cancel order");
        assert!(err.downcast_ref::<ExchangeError>().is_some_and(|e| e.is_transient()));
    }
}
