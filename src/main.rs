use std::sync::Arc;
use tokio::sync::Notify;

use pricetracker::logger::{self, LogTag};
use pricetracker::{api, database, global, paths, pipeline};

#[tokio::main]
async fn main() {
    logger::init();

    if let Err(e) = run().await {
        logger::error(LogTag::System, &format!("Fatal: {}", e));
        logger::flush();
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    paths::ensure_all_directories()?;
    global::load_settings();
    let settings = global::get_settings();

    // Storage and API client must come up before any loop starts; a
    // failure here halts the process.
    database::init(&paths::get_database_path())?;
    api::init_global_api(&settings.api_base_url)?;

    // Warm the failure cache from persisted counters
    {
        let pool = database::get_pool()?;
        let conn = pool.checkout()?;
        let warmed = pipeline::stats::sync_failure_cache(&conn)?;
        if warmed > 0 {
            logger::info(
                LogTag::System,
                &format!("Failure cache warmed with {} tokens", warmed),
            );
        }
    }

    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            pipeline::request_shutdown();
            shutdown.notify_waiters();
        })
        .map_err(|e| format!("Failed to install signal handler: {}", e))?;
    }

    logger::info(LogTag::System, "PriceTracker starting");
    let handles = pipeline::start_pipeline(shutdown.clone());

    // The notify can fire before this task registers as a waiter, so the
    // flag is polled alongside it.
    while !pipeline::is_shutdown_requested() {
        tokio::select! {
            _ = shutdown.notified() => {}
            _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
        }
    }
    logger::info(LogTag::System, "Shutdown requested, stopping loops");

    for handle in handles {
        let _ = handle.await;
    }

    logger::flush();
    Ok(())
}
