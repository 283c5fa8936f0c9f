//! The tracking pipeline: periodic loops and on-demand entry points
//!
//! Each loop runs in its own task on a fixed interval and stops on the
//! shared shutdown notify. Loops never abort on a failed cycle; the error
//! is logged and the next tick tries again.

pub mod classifier;
pub mod failures;
pub mod fetcher;
pub mod processor;
pub mod recovery;
pub mod selector;
pub mod stats;

pub use classifier::run_classifier_pass;
pub use fetcher::{process_token_batch, run_fetch_cycle};
pub use processor::run_process_cycle;
pub use recovery::{run_reactivation_sweep, run_recovery_sweep};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::global::get_settings;
use crate::logger::{self, LogTag};

/// Watchdog poll interval for stalled-cycle detection
const WATCHDOG_TICK_SECS: u64 = 15;

// Loops that are mid-cycle when the notify fires have no registered
// waiter; they check this flag after every cycle instead.
static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

pub fn request_shutdown() {
    SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
}

pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_FLAG.load(Ordering::SeqCst)
}

/// Register a token for tracking; idempotent per (contract, blockchain)
pub async fn register_token(
    blockchain: &str,
    contract_address: &str,
    first_seen_liquidity: Option<f64>,
) -> Result<i64, String> {
    let pool = crate::database::get_pool()?;
    let conn = pool.checkout()?;
    let token_id =
        crate::database::tokens::insert_token(&conn, blockchain, contract_address, first_seen_liquidity)?;

    logger::info(
        LogTag::System,
        &format!(
            "Registered token {} ({} on {})",
            token_id, contract_address, blockchain
        ),
    );
    Ok(token_id)
}

/// Spawn all pipeline loops; returns their join handles
pub fn start_pipeline(shutdown: Arc<Notify>) -> Vec<JoinHandle<()>> {
    let settings = get_settings();

    vec![
        spawn_loop(
            "fetch",
            settings.fetch_interval_secs,
            shutdown.clone(),
            || async {
                run_fetch_cycle().await.map(|_| ())
            },
        ),
        spawn_loop(
            "process",
            settings.process_interval_secs,
            shutdown.clone(),
            || async {
                run_process_cycle().await.map(|_| ())
            },
        ),
        spawn_loop(
            "classifier",
            settings.classifier_interval_secs,
            shutdown.clone(),
            || async {
                run_classifier_pass().await.map(|_| ())
            },
        ),
        spawn_loop(
            "recovery",
            settings.recovery_interval_secs,
            shutdown.clone(),
            || async {
                run_recovery_sweep().await.map(|_| ())
            },
        ),
        spawn_loop(
            "reactivation",
            settings.reactivation_interval_secs,
            shutdown.clone(),
            || async {
                run_reactivation_sweep().await.map(|_| ())
            },
        ),
        spawn_loop(
            "stats",
            settings.stats_interval_secs,
            shutdown.clone(),
            || async {
                stats::print_interval_summary().await;
                Ok(())
            },
        ),
        spawn_loop("watchdog", WATCHDOG_TICK_SECS, shutdown, || async {
            stats::force_finalize_stale().await;
            Ok(())
        }),
    ]
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval_secs: u64,
    shutdown: Arc<Notify>,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), String>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        logger::info(
            LogTag::System,
            &format!("{} loop started ({}s interval)", name, interval_secs),
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = cycle().await {
                        logger::error(LogTag::System, &format!("{} cycle failed: {}", name, e));
                    }
                    if is_shutdown_requested() {
                        logger::info(LogTag::System, &format!("{} loop stopping", name));
                        break;
                    }
                }
                _ = shutdown.notified() => {
                    logger::info(LogTag::System, &format!("{} loop stopping", name));
                    break;
                }
            }
        }
    })
}
