//! The guard loop: scheduler and per-cycle orchestration.
//!
//! ```text
//!   start() ──► STOPPED ──────────────► RUNNING ──► stop() ──► STOPPED
//!                                          │
//!                   every check interval   ▼
//!   positions ─► sweep orphans ─► for each open symbol (paced):
//!                                   orders ─► excursion ─► ladder ─► reconcile
//! ```
//!
//! Cycles are serialized by the state mutex: a manual `reconcile_now` that
//! lands while a scheduled cycle runs waits for it, and vice versa, so two
//! passes never issue commands for the same symbol at once.
//!
//! Shutdown is cooperative. The loop observes the stop signal after each
//! symbol, during the pacing delay and during the interval sleep; an
//! in-flight exchange call is allowed to finish so a cancel/place pair is
//! never cut in half.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use sg_core::config::{GuardConfig, clamp_interval};
use sg_core::error::ExchangeError;
use sg_core::{LadderConfig, Position, ReconcileAction, ReconcileStatus, ReconciliationResult, Side};
use sg_td::FuturesExchange;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::evaluator::{evaluate, initial_stop};
use crate::ladder_source::{LadderSource, load_or_default};
use crate::notify::{Notifier, notify_best_effort};
use crate::reconciler::{OrderReconciler, ReconcileRequest};
use crate::state::{GuardState, SymbolSnapshot};
use crate::sweeper::OrphanSweeper;

/// "No open positions" is logged once per this many cycles.
const IDLE_LOG_EVERY: u64 = 10;

// ---------------------------------------------------------------------------
// Settings and status
// ---------------------------------------------------------------------------

/// Tuning knobs of a [`GuardLoop`].
#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub check_interval_secs: u64,
    /// Delay between two symbols within a cycle.
    pub pacing: Duration,
    /// Distance of the bootstrap stop from entry, in percent.
    pub initial_stop_percent: f64,
    pub quantity_tolerance: f64,
}

impl From<&GuardConfig> for GuardSettings {
    fn from(cfg: &GuardConfig) -> Self {
        Self {
            check_interval_secs: cfg.effective_interval_secs(),
            pacing: Duration::from_millis(cfg.pacing_ms),
            initial_stop_percent: cfg.initial_stop_percent,
            quantity_tolerance: cfg.quantity_tolerance,
        }
    }
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self::from(&GuardConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GuardStatus {
    Stopped,
    Running,
}

/// Operator view of the whole guard.
#[derive(Debug, Clone, Serialize)]
pub struct GuardSnapshot {
    pub status: GuardStatus,
    pub check_interval_secs: u64,
    pub cycles: u64,
    pub ladder: LadderConfig,
    pub symbols: BTreeMap<String, SymbolSnapshot>,
}

/// One applied stop change, logged at INFO as a JSON line.
#[derive(Debug, Clone, Serialize)]
pub struct StopAdjustment<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub entry_price: f64,
    pub mark_price: f64,
    pub profit_percent: f64,
    pub old_stop: Option<f64>,
    pub new_stop: Option<f64>,
    pub locked_profit_percent: Option<f64>,
    pub old_level: u8,
    pub new_level: u8,
    pub trailing: bool,
    pub action: ReconcileAction,
    pub reason: &'a str,
}

impl StopAdjustment<'_> {
    fn log(&self) {
        match serde_json::to_string(self) {
            Ok(json) => info!("[guard] stop adjustment {json}"),
            Err(e) => warn!("[guard] {}: stop adjustment not serializable: {e}", self.symbol),
        }
    }
}

// ---------------------------------------------------------------------------
// GuardLoop
// ---------------------------------------------------------------------------

struct Shared {
    exchange: Arc<dyn FuturesExchange>,
    notifier: Arc<dyn Notifier>,
    ladder_source: Arc<dyn LadderSource>,
    reconciler: OrderReconciler,
    sweeper: OrphanSweeper,
    pacing: Duration,
    initial_stop_percent: f64,
    interval_secs: AtomicU64,
    ladder: RwLock<LadderConfig>,
    /// Held for a whole cycle; doubles as the manual/scheduled run token.
    state: Mutex<GuardState>,
}

/// Periodic stop-loss guard over every open position on the account.
pub struct GuardLoop {
    shared: Arc<Shared>,
    /// Shutdown signal sender.
    shutdown_tx: Option<watch::Sender<bool>>,
    /// Scheduling task join handle.
    task: Option<JoinHandle<()>>,
}

impl GuardLoop {
    /// Create a stopped guard. The ladder is loaded on [`start`](Self::start).
    pub fn new(
        exchange: Arc<dyn FuturesExchange>,
        notifier: Arc<dyn Notifier>,
        ladder_source: Arc<dyn LadderSource>,
        settings: GuardSettings,
    ) -> Self {
        let shared = Shared {
            reconciler: OrderReconciler::new(
                exchange.clone(),
                notifier.clone(),
                settings.quantity_tolerance,
            ),
            sweeper: OrphanSweeper::new(exchange.clone()),
            exchange,
            notifier,
            ladder_source,
            pacing: settings.pacing,
            initial_stop_percent: settings.initial_stop_percent,
            interval_secs: AtomicU64::new(clamp_interval(settings.check_interval_secs)),
            ladder: RwLock::new(LadderConfig::default()),
            state: Mutex::new(GuardState::default()),
        };
        Self { shared: Arc::new(shared), shutdown_tx: None, task: None }
    }

    pub fn status(&self) -> GuardStatus {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            GuardStatus::Running
        } else {
            GuardStatus::Stopped
        }
    }

    /// Load the ladder and spawn the scheduling task. Returns `false` if
    /// already running.
    pub async fn start(&mut self) -> bool {
        if self.status() == GuardStatus::Running {
            warn!("[guard] start ignored, already running");
            return false;
        }
        self.reload_ladder().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            guard_loop(shared, shutdown_rx).await;
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
        info!(
            "[guard] started, check interval {}s",
            self.shared.interval_secs.load(Ordering::Relaxed)
        );
        true
    }

    /// Signal the loop and wait for it to exit. Returns `false` if it was not
    /// started.
    pub async fn stop(&mut self) -> bool {
        let Some(tx) = self.shutdown_tx.take() else {
            return false;
        };
        let _ = tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("[guard] loop task ended abnormally: {e}");
            }
        }
        info!("[guard] stopped");
        true
    }

    /// Set the check interval, clamped to the allowed range. Returns the
    /// interval in effect; it applies from the next sleep.
    pub fn set_check_interval(&self, secs: u64) -> u64 {
        let effective = clamp_interval(secs);
        if effective != secs {
            warn!("[guard] check interval {secs}s out of range, using {effective}s");
        }
        self.shared.interval_secs.store(effective, Ordering::Relaxed);
        info!("[guard] check interval set to {effective}s");
        effective
    }

    pub fn check_interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Run one full pass now, outside the timer, and return per-symbol
    /// results (orphan cleanups included). Waits for a scheduled cycle in
    /// progress to finish first.
    pub async fn reconcile_now(
        &self,
    ) -> Result<BTreeMap<String, ReconciliationResult>, ExchangeError> {
        info!("[guard] manual reconcile requested");
        self.shared.run_cycle(None).await
    }

    /// Re-read the ladder from the configured source.
    pub async fn reload_ladder(&self) -> LadderConfig {
        let ladder = load_or_default(self.shared.ladder_source.as_ref()).await;
        *self.shared.ladder.write().await = ladder.clone();
        ladder
    }

    pub async fn ladder(&self) -> LadderConfig {
        self.shared.ladder.read().await.clone()
    }

    pub async fn snapshot(&self) -> GuardSnapshot {
        let ladder = self.ladder().await;
        let state = self.shared.state.lock().await;
        GuardSnapshot {
            status: self.status(),
            check_interval_secs: self.shared.interval_secs.load(Ordering::Relaxed),
            cycles: state.cycles,
            ladder,
            symbols: state.snapshot(),
        }
    }
}

/// Scheduling task body.
async fn guard_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    info!("[guard] loop running");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        if let Err(e) = shared.run_cycle(Some(&mut shutdown_rx)).await {
            error!("[guard] cycle aborted: {e}");
        }
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(shared.interval()) => {}
            _ = shutdown_rx.changed() => break,
        }
    }
    info!("[guard] loop exited");
}

fn stop_requested(shutdown: &Option<&mut watch::Receiver<bool>>) -> bool {
    shutdown.as_ref().is_some_and(|rx| *rx.borrow())
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

impl Shared {
    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.load(Ordering::Relaxed))
    }

    /// One pass over the account. Fails only when positions cannot be read;
    /// everything after that is reported per symbol.
    async fn run_cycle(
        &self,
        mut shutdown: Option<&mut watch::Receiver<bool>>,
    ) -> Result<BTreeMap<String, ReconciliationResult>, ExchangeError> {
        let mut state = self.state.lock().await;
        state.cycles += 1;
        let cycle = state.cycles;

        let positions = self.exchange.get_open_positions().await?;
        let open: Vec<Position> = positions.into_iter().filter(Position::is_open).collect();
        let open_symbols: HashSet<String> = open.iter().map(|p| p.symbol.clone()).collect();
        let ladder = self.ladder.read().await.clone();

        if open.is_empty() {
            if cycle % IDLE_LOG_EVERY == 1 {
                info!("[guard] cycle #{cycle}: no open positions");
            }
            state.clear();
        } else {
            info!("[guard] cycle #{cycle}: {} open position(s)", open.len());
            for symbol in state.retain_open(&open_symbols) {
                info!("[guard] {symbol}: position gone, excursion and ladder state cleared");
            }
        }

        let mut results = BTreeMap::new();
        match self.exchange.get_open_orders(None).await {
            Ok(orders) => {
                for (symbol, result) in self.sweeper.sweep(&open_symbols, &orders).await {
                    self.report(&mut state, &symbol, &result).await;
                    results.insert(symbol, result);
                }
            }
            Err(e) => warn!("[guard] orphan sweep skipped: {e}"),
        }
        state.retain_results(|s| open_symbols.contains(s) || results.contains_key(s));

        for (i, position) in open.iter().enumerate() {
            if i > 0 && self.pace(shutdown.as_deref_mut()).await {
                info!(
                    "[guard] shutdown requested, {} symbol(s) left for next start",
                    open.len() - i
                );
                break;
            }
            let result = match self.process_symbol(&mut state, &ladder, position).await {
                Ok(result) => result,
                Err(e) => {
                    error!("[guard] {}: {e}", position.symbol);
                    ReconciliationResult::error(ReconcileAction::None, e.to_string())
                }
            };
            self.report(&mut state, &position.symbol, &result).await;
            results.insert(position.symbol.clone(), result);

            if stop_requested(&shutdown) {
                info!("[guard] shutdown requested, stopping after {}", position.symbol);
                break;
            }
        }
        Ok(results)
    }

    /// Sleep the pacing delay. Returns `true` if shutdown was signalled.
    async fn pace(&self, shutdown: Option<&mut watch::Receiver<bool>>) -> bool {
        match shutdown {
            Some(rx) => {
                if *rx.borrow() {
                    return true;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.pacing) => false,
                    _ = rx.changed() => true,
                }
            }
            None => {
                tokio::time::sleep(self.pacing).await;
                false
            }
        }
    }

    /// Orders, excursion, ladder and reconcile for one open position.
    async fn process_symbol(
        &self,
        state: &mut GuardState,
        ladder: &LadderConfig,
        position: &Position,
    ) -> Result<ReconciliationResult, ExchangeError> {
        let symbol = position.symbol.as_str();
        if position.mark_price <= 0.0 {
            return Err(ExchangeError::Parse(format!("no mark price for {symbol}")));
        }
        let precision = self.exchange.get_symbol_precision(symbol).await?;
        let live = self.exchange.get_open_orders(Some(symbol)).await?;

        let side = position.side;
        let close_side = side.close_direction();
        let current_stop = live
            .iter()
            .filter(|o| o.symbol == symbol && o.is_protective_stop() && o.side == close_side)
            .map(|o| o.trigger_price)
            .reduce(|a, b| side.most_protective(a, b));

        let tracked = state.track(position).clone();
        let mut view = position.clone();
        view.stop_price = current_stop;
        view.stop_order = tracked.stop_order;
        view.ladder_level = tracked.ladder_level;
        view.trailing_active = tracked.trailing_active;

        let prior = state.excursions.current(position);
        let eval = evaluate(&view, position.mark_price, ladder, prior, &precision);
        state.excursions.update(position, eval.excursion);
        debug!(
            "[guard] {symbol}: {side} entry {} mark {} profit {:.2}% level {} excursion {}",
            position.entry_price,
            position.mark_price,
            eval.profit_percent,
            eval.level,
            eval.excursion
        );
        if let Some(crossed) = eval.crossed {
            warn!(
                "[guard] {symbol}: mark {} already beyond target {crossed}, keeping current stop",
                position.mark_price
            );
        }

        let (target, reason) = match (eval.target, current_stop) {
            (Some(t), _) => {
                let leg = if t.trailing { "trailing" } else { "floor" };
                (t.price, format!("level {} {leg}, locks {:.2}%", t.level, t.locked_profit_percent))
            }
            (None, Some(stop)) => (stop, "current stop kept".to_string()),
            (None, None) => {
                let stop = initial_stop(position, self.initial_stop_percent);
                let rounded = precision.round_price(stop);
                if !side.is_more_protective(position.mark_price, rounded) {
                    let crossed = format!(
                        "mark {} already beyond initial stop {rounded}",
                        position.mark_price
                    );
                    warn!("[guard] {symbol}: {crossed}, not placing");
                    let message = format!("{crossed}, position currently unprotected");
                    return Ok(
                        ReconciliationResult::error(ReconcileAction::Create, message).unprotected()
                    );
                }
                info!(
                    "[guard] {symbol}: no stop on the book, initial stop {stop} ({}% from entry {})",
                    self.initial_stop_percent,
                    position.entry_price
                );
                (stop, format!("initial stop {}% from entry", self.initial_stop_percent))
            }
        };

        let req = ReconcileRequest {
            symbol,
            side,
            quantity: position.quantity,
            target: Some(target),
            reason: &reason,
        };
        let outcome = self.reconciler.reconcile(&req, &live, &precision).await;

        let entry = state.track(position);
        if outcome.result.is_error() {
            if outcome.result.unprotected {
                entry.stop_order = None;
                entry.stop_price = None;
            }
            return Ok(outcome.result);
        }

        let old_level = entry.ladder_level;
        if eval.crossed.is_none() {
            entry.ladder_level = entry.ladder_level.max(eval.level);
        }
        if let Some(t) = eval.target {
            entry.ladder_level = entry.ladder_level.max(t.level);
            entry.trailing_active |= t.trailing;
        }
        entry.stop_order = outcome.order_ref;
        entry.stop_price = outcome.stop_price;

        if outcome.result.status == ReconcileStatus::Fixed {
            StopAdjustment {
                symbol,
                side,
                entry_price: position.entry_price,
                mark_price: position.mark_price,
                profit_percent: eval.profit_percent,
                old_stop: current_stop,
                new_stop: outcome.stop_price,
                locked_profit_percent: outcome.stop_price.map(|p| position.profit_percent(p)),
                old_level,
                new_level: entry.ladder_level,
                trailing: entry.trailing_active,
                action: outcome.result.action,
                reason: &reason,
            }
            .log();
        }
        Ok(outcome.result)
    }

    /// Remember `result` and alert the operator on cleanups and on errors.
    /// An error that repeats the previous one for the symbol is not
    /// re-alerted.
    async fn report(&self, state: &mut GuardState, symbol: &str, result: &ReconciliationResult) {
        let previous = state.record_result(symbol, result.clone());

        if result.is_error() {
            let repeat = previous.as_ref().is_some_and(|p| {
                p.is_error() && p.action == result.action && p.unprotected == result.unprotected
            });
            if repeat {
                debug!("[guard] {symbol}: error persists, alert already sent");
                return;
            }
            let headline = if result.unprotected {
                "Stop guard ERROR, position UNPROTECTED"
            } else {
                "Stop guard ERROR"
            };
            let text = format!("{headline}\nSymbol: {symbol}\n{}", result.message);
            notify_best_effort(self.notifier.as_ref(), &text).await;
        } else if result.action == ReconcileAction::Cleanup {
            notify_best_effort(
                self.notifier.as_ref(),
                &format!("Orphan stop cleanup\nSymbol: {symbol}\n{}", result.message),
            )
            .await;
        }
    }
}
