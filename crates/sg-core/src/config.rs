//! Configuration parsing for the stop-loss guard.
//!
//! The runner reads a single JSON config file. Only the Binance credentials
//! are required; every other field has a default.
//!
//! # Example config
//!
//! ```json
//! {
//!   "module": { "module_name": "stop_guard", "log_path": "/tmp/log" },
//!   "guard": { "check_interval_secs": 30, "ladder_path": "ladder.json" },
//!   "binance": { "api_key": "...", "secret_key": "..." },
//!   "telegram": { "bot_token": "...", "chat_id": "..." }
//! }
//! ```

use serde::Deserialize;

use crate::error::ConfigError;

/// Lower bound of the guard check interval in seconds.
pub const MIN_CHECK_INTERVAL_SECS: u64 = 10;
/// Upper bound of the guard check interval in seconds.
pub const MAX_CHECK_INTERVAL_SECS: u64 = 300;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    #[serde(default)]
    pub module: Option<ModuleMeta>,

    /// Guard loop tuning.
    #[serde(default)]
    pub guard: GuardConfig,

    /// Exchange credentials and endpoints.
    pub binance: BinanceConfig,

    /// Optional Telegram notification channel.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

impl AppConfig {
    /// Returns the module name, defaulting to `"stop_guard"`.
    pub fn module_name(&self) -> String {
        self.module
            .as_ref()
            .and_then(|m| m.module_name.clone())
            .unwrap_or_else(|| "stop_guard".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.module.as_ref().and_then(|m| m.log_path.clone())
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

/// Guard loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Seconds between cycles, clamped to `[10, 300]`.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Pause between symbols within a cycle (rate-limit pacing).
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Distance of the bootstrap stop from entry, in percent.
    #[serde(default = "default_initial_stop_percent")]
    pub initial_stop_percent: f64,

    /// Relative quantity mismatch tolerated before a stop is replaced.
    #[serde(default = "default_quantity_tolerance")]
    pub quantity_tolerance: f64,

    /// Path of the JSON ladder file; the built-in ladder is used when unset.
    #[serde(default)]
    pub ladder_path: Option<String>,
}

/// Upper bound of the pause between symbols.
pub const MAX_PACING_MS: u64 = 10_000;

impl GuardConfig {
    /// Interval after clamping to the allowed range.
    pub fn effective_interval_secs(&self) -> u64 {
        clamp_interval(self.check_interval_secs)
    }

    /// Check the bootstrap distance, quantity tolerance and pacing.
    ///
    /// The bootstrap stop sits `initial_stop_percent` on the losing side of
    /// entry, so it must be positive and below 100.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pct = self.initial_stop_percent;
        if !(pct.is_finite() && pct > 0.0 && pct < 100.0) {
            return Err(ConfigError::Invalid(format!(
                "guard.initial_stop_percent must be in (0, 100), got {pct}"
            )));
        }
        let tol = self.quantity_tolerance;
        if !(tol.is_finite() && (0.0..1.0).contains(&tol)) {
            return Err(ConfigError::Invalid(format!(
                "guard.quantity_tolerance must be in [0, 1), got {tol}"
            )));
        }
        if self.pacing_ms > MAX_PACING_MS {
            return Err(ConfigError::Invalid(format!(
                "guard.pacing_ms must be at most {MAX_PACING_MS}, got {}",
                self.pacing_ms
            )));
        }
        Ok(())
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            pacing_ms: default_pacing_ms(),
            initial_stop_percent: default_initial_stop_percent(),
            quantity_tolerance: default_quantity_tolerance(),
            ladder_path: None,
        }
    }
}

/// Clamp a check interval to `[MIN_CHECK_INTERVAL_SECS, MAX_CHECK_INTERVAL_SECS]`.
pub fn clamp_interval(secs: u64) -> u64 {
    secs.clamp(MIN_CHECK_INTERVAL_SECS, MAX_CHECK_INTERVAL_SECS)
}

/// Binance USDT-margined futures client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    /// Binance API key.
    pub api_key: String,

    /// Binance API secret (HMAC-SHA256 signing).
    #[serde(default)]
    pub secret_key: String,

    /// Optional path to a PEM-encoded Ed25519 private key. When set, requests
    /// are signed with Ed25519 instead of HMAC.
    #[serde(default)]
    pub ed25519_key_path: Option<String>,

    /// REST base URL.
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    /// `recvWindow` for signed requests (milliseconds).
    #[serde(default = "default_recv_window")]
    pub recv_window: u64,

    /// Place stops through the algo order service (`/fapi/v1/algoOrder`).
    #[serde(default = "default_true")]
    pub use_algo_orders: bool,

    /// Price that triggers the stop: `MARK_PRICE` or `CONTRACT_PRICE`.
    #[serde(default = "default_working_type")]
    pub working_type: String,
}

impl BinanceConfig {
    /// Check that a signing method is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::Invalid("binance.api_key is empty".into()));
        }
        if self.secret_key.is_empty() && self.ed25519_key_path.is_none() {
            return Err(ConfigError::Invalid(
                "binance.secret_key or binance.ed25519_key_path is required".into(),
            ));
        }
        Ok(())
    }
}

/// Telegram bot credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_url")]
    pub api_url: String,
}

// ---------------------------------------------------------------------------
// Default helpers (used by serde)
// ---------------------------------------------------------------------------

fn default_check_interval() -> u64 {
    30
}

fn default_pacing_ms() -> u64 {
    1000
}

fn default_initial_stop_percent() -> f64 {
    2.0
}

fn default_quantity_tolerance() -> f64 {
    0.01
}

fn default_rest_url() -> String {
    "https://fapi.binance.com".into()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_working_type() -> String {
    "MARK_PRICE".into()
}

fn default_telegram_url() -> String {
    "https://api.telegram.org".into()
}

/// Load, parse and validate a JSON config file.
pub fn load_config(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.binance.validate()?;
    config.guard.validate()?;
    Ok(config)
}
