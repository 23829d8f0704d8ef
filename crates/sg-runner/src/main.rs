//! # sg-runner
//!
//! Main entry point for the stop-loss guard.
//!
//! Loads a JSON configuration file, wires the Binance futures client, the
//! notifier and the ladder source into a [`GuardLoop`], and either runs it
//! until shutdown or performs a single reconciliation pass.
//!
//! # Usage
//!
//! ```bash
//! sg-runner config.json --log-level info            # run the loop
//! sg-runner config.json run --interval 60           # run with a 60 s interval
//! sg-runner config.json check                       # one pass, JSON results
//! ```
//!
//! While running, stdin accepts `check`, `interval <secs>`, `reload`,
//! `status` and `stop`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sg_guard::{GuardLoop, GuardSettings, JsonLadderSource, LadderSource, StaticLadderSource};
use sg_td::FuturesExchange;
use sg_td::binance::BinanceFutures;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Stop-loss guard for Binance USDT-margined futures.
#[derive(Parser)]
#[command(name = "sg-runner", about = "Stop-loss guard for Binance USDT-margined futures")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output (overrides `module.log_path`).
    #[arg(long)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the guard loop until Ctrl+C or `stop` (default).
    Run {
        /// Check interval in seconds (clamped to 10-300).
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run one reconciliation pass and print per-symbol results as JSON.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = sg_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    sg_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &config.module_name())?;
    info!("sg-runner starting, config={}, log_level={}", cli.config.display(), cli.log_level);

    // 3. Wire collaborators
    let exchange: Arc<dyn FuturesExchange> = Arc::new(BinanceFutures::new(&config.binance)?);
    let notifier = sg_guard::notify::from_config(config.telegram.as_ref());
    let ladder_source: Arc<dyn LadderSource> = match &config.guard.ladder_path {
        Some(path) => Arc::new(JsonLadderSource::new(path)),
        None => Arc::new(StaticLadderSource::default()),
    };
    let settings = GuardSettings::from(&config.guard);
    let mut guard = GuardLoop::new(exchange, notifier, ladder_source, settings);

    // 4. Run
    match cli.command.unwrap_or(Command::Run { interval: None }) {
        Command::Check => {
            guard.reload_ladder().await;
            let results = guard.reconcile_now().await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            let unprotected: Vec<&String> =
                results.iter().filter(|(_, r)| r.unprotected).map(|(s, _)| s).collect();
            if !unprotected.is_empty() {
                warn!("unprotected position(s): {unprotected:?}");
            }
        }
        Command::Run { interval } => run(&mut guard, interval).await?,
    }
    Ok(())
}

/// Start the loop and serve operator commands until stopped.
async fn run(guard: &mut GuardLoop, interval: Option<u64>) -> Result<()> {
    if let Some(secs) = interval {
        guard.set_check_interval(secs);
    }
    guard.start().await;
    info!("guard running, stdin commands: check | interval <secs> | reload | status | stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_command(guard, line.trim()).await? {
                        break;
                    }
                }
                Ok(None) => {
                    info!("stdin closed, Ctrl+C to stop");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    stdin_open = false;
                }
            },
        }
    }

    guard.stop().await;
    info!("guard stopped, goodbye");
    Ok(())
}

/// Execute one operator command. Returns `false` when the guard should stop.
async fn handle_command(guard: &GuardLoop, line: &str) -> Result<bool> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) => {}
        (Some("check"), _) => match guard.reconcile_now().await {
            Ok(results) => println!("{}", serde_json::to_string_pretty(&results)?),
            Err(e) => warn!("reconcile failed: {e}"),
        },
        (Some("interval"), Some(secs)) => match secs.parse::<u64>() {
            Ok(secs) => println!("check interval {}s", guard.set_check_interval(secs)),
            Err(_) => warn!("interval expects whole seconds, got '{secs}'"),
        },
        (Some("interval"), None) => warn!("usage: interval <secs>"),
        (Some("reload"), _) => {
            let ladder = guard.reload_ladder().await;
            println!("{}", serde_json::to_string_pretty(&ladder)?);
        }
        (Some("status"), _) => {
            println!("{}", serde_json::to_string_pretty(&guard.snapshot().await)?)
        }
        (Some("stop" | "quit"), _) => return Ok(false),
        (Some(other), _) => warn!("unknown command '{other}'"),
    }
    Ok(true)
}
