//! # sg-guard
//!
//! Protective stop-loss guard for leveraged futures positions.
//!
//! On a fixed interval the guard reads every open position, works out where
//! its stop should sit from a three-level profit ladder, and converges the
//! exchange's stop orders onto that price. Stops only ever tighten.
//!
//! | Module          | Role                                                     |
//! |-----------------|----------------------------------------------------------|
//! | `evaluator`     | ladder + excursion → target stop (pure)                  |
//! | `excursion`     | best price seen per position                             |
//! | `reconciler`    | target vs live orders → CREATE / REPLACE / no-op         |
//! | `sweeper`       | cancel stops left behind by closed positions             |
//! | `guard`         | scheduler, per-symbol isolation, operator controls       |
//! | `ladder_source` | where the ladder comes from                              |
//! | `notify`        | operator notifications                                   |

pub mod evaluator;
pub mod excursion;
pub mod guard;
pub mod ladder_source;
pub mod notify;
pub mod reconciler;
pub mod state;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use evaluator::{Evaluation, TargetStop, evaluate};
pub use excursion::ExcursionTracker;
pub use guard::{GuardLoop, GuardSettings, GuardSnapshot, GuardStatus};
pub use ladder_source::{JsonLadderSource, LadderSource, StaticLadderSource};
pub use notify::{LogNotifier, Notifier, TelegramNotifier};
pub use reconciler::{OrderReconciler, ReconcileOutcome, ReconcileRequest};
pub use sweeper::OrphanSweeper;
