//! Where the guard gets its ladder from.

use std::path::PathBuf;

use async_trait::async_trait;
use sg_core::LadderConfig;
use sg_core::error::ConfigError;
use tracing::{info, warn};

/// Configuration collaborator: yields a validated ladder.
#[async_trait]
pub trait LadderSource: Send + Sync {
    async fn load_ladder_config(&self) -> Result<LadderConfig, ConfigError>;
}

/// Ladder read from a JSON file on every load, so edits are picked up by a
/// reload without restarting.
pub struct JsonLadderSource {
    path: PathBuf,
}

impl JsonLadderSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LadderSource for JsonLadderSource {
    async fn load_ladder_config(&self) -> Result<LadderConfig, ConfigError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        LadderConfig::from_json(&text)
    }
}

/// A fixed ladder.
#[derive(Default)]
pub struct StaticLadderSource(pub LadderConfig);

#[async_trait]
impl LadderSource for StaticLadderSource {
    async fn load_ladder_config(&self) -> Result<LadderConfig, ConfigError> {
        self.0.validate()?;
        Ok(self.0.clone())
    }
}

/// Load from `source`, falling back to the built-in ladder on any error.
pub async fn load_or_default(source: &dyn LadderSource) -> LadderConfig {
    match source.load_ladder_config().await {
        Ok(ladder) => {
            info!(
                "[guard] ladder loaded: L1 ≥{}% lock {}%, L2 ≥{}% lock {}%, L3 ≥{}% lock {}% trail {}%",
                ladder.level_1.profit_min,
                ladder.level_1.lock_profit,
                ladder.level_2.profit_min,
                ladder.level_2.lock_profit,
                ladder.level_3.profit_min,
                ladder.level_3.lock_profit,
                ladder.level_3.trailing_percent,
            );
            ladder
        }
        Err(e) => {
            warn!("[guard] ladder load failed ({e}), using built-in default ladder");
            LadderConfig::default()
        }
    }
}
