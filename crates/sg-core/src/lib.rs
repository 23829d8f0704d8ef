//! # sg-core
//!
//! Core crate for the stop-loss guard, providing:
//!
//! - **Types** (`types`): sides, positions, stop-order views, order references,
//!   symbol precision, reconciliation results
//! - **Ladder** (`ladder`): the three-level profit ladder and its validation
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): exchange and config error taxonomy via thiserror
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod ladder;
pub mod logging;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
pub use ladder::{LadderConfig, LadderLevel};
