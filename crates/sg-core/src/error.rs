//! Typed error definitions for the stop-loss guard.
//!
//! [`ExchangeError`] carries the failure taxonomy the guard reacts to: a
//! transient failure is retried on the next cycle, a rejection is logged and
//! not retried with the same value. [`ConfigError`] covers ladder and app
//! configuration validation. Both integrate with `anyhow::Result` through
//! `thiserror`.

use thiserror::Error;

/// Binance "Unknown order sent." (`-2011`): the order no longer exists.
pub const UNKNOWN_ORDER_CODE: i64 = -2011;

/// Errors surfaced by the exchange collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    /// Network failure, rate limit (HTTP 429/418) or exchange-side 5xx.
    #[error("transient exchange error: {0}")]
    Transient(String),

    /// The exchange understood the request and refused it (bad price, bad
    /// quantity, unknown order, ...).
    #[error("exchange rejected request (code {code}): {msg}")]
    Rejected { code: i64, msg: String },

    /// Response body did not have the expected shape.
    #[error("exchange response parse error: {0}")]
    Parse(String),

    /// Client has no credentials or no symbol metadata for the request.
    #[error("exchange client not configured: {0}")]
    NotConfigured(String),
}

impl ExchangeError {
    /// `true` for failures worth retrying unchanged on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// `true` when a cancel was refused because the order is already gone
    /// (filled, triggered or cancelled elsewhere).
    pub fn is_unknown_order(&self) -> bool {
        matches!(self, Self::Rejected { code: UNKNOWN_ORDER_CODE, .. })
    }
}

/// Configuration parsing or validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid JSON for the expected schema.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Values parsed but violate an invariant.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ExchangeError::Transient("timeout".into()).is_transient());
        assert!(
            !ExchangeError::Rejected {
                code: -2021,
                msg: "Order would immediately trigger.".into()
            }
            .is_transient()
        );
        assert!(!ExchangeError::Parse("missing algoId".into()).is_transient());
    }

    #[test]
    fn unknown_order_is_recognised() {
        let unknown = ExchangeError::Rejected { code: -2011, msg: "Unknown order sent.".into() };
        assert!(unknown.is_unknown_order());
        assert!(!ExchangeError::Rejected { code: -2021, msg: String::new() }.is_unknown_order());
        assert!(!ExchangeError::Transient("x".into()).is_unknown_order());
    }

    #[test]
    fn rejected_message_carries_code() {
        let e =
            ExchangeError::Rejected { code: -1111, msg: "Precision is over the maximum".into() };
        assert_eq!(
            e.to_string(),
            "exchange rejected request (code -1111): Precision is over the maximum"
        );
    }
}
