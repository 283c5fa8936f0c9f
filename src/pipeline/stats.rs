// ===== CYCLE AND API STATISTICS =====
//
// Tracks the current fetch cycle, a rolling history of completed cycles and
// per-chain API call counters. A watchdog finalizes cycles that run past
// the stall threshold so a hung batch cannot wedge the bookkeeping.
//
// The failure cache mirrors per-token failure state for diagnostics; the
// authoritative counters live on the token rows.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rusqlite::Connection;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::RwLock;

use crate::global::STARTUP_TIME;
use crate::logger::{self, LogTag};
use crate::types::FailureRecord;

/// Completed cycles kept in history
pub const CYCLE_HISTORY_LIMIT: usize = 10;

/// A cycle older than this is considered stalled and force-finalized
pub const CYCLE_STALL_SECS: i64 = 45;

#[derive(Debug, Clone, Default)]
pub struct CycleSnapshot {
    pub started_at: Option<DateTime<Utc>>,
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: i64,
    /// True when the watchdog finalized this cycle instead of the fetcher
    pub forced: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ApiCounters {
    pub calls: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub current: Option<CycleSnapshot>,
    pub history: VecDeque<CycleSnapshot>,
    pub cycles_completed: u64,
    pub api_calls_by_chain: HashMap<String, ApiCounters>,
}

impl PipelineStats {
    /// Start tracking a new cycle, force-finalizing any leftover one
    pub fn begin_cycle(&mut self, selected: usize, now: DateTime<Utc>) {
        if self.current.is_some() {
            self.finalize(now, true);
        }
        self.current = Some(CycleSnapshot {
            started_at: Some(now),
            selected,
            ..Default::default()
        });
    }

    pub fn track_success(&mut self) {
        if let Some(cycle) = self.current.as_mut() {
            cycle.succeeded += 1;
        }
    }

    pub fn track_failure(&mut self) {
        if let Some(cycle) = self.current.as_mut() {
            cycle.failed += 1;
        }
    }

    pub fn track_api_call(&mut self, blockchain: &str, ok: bool) {
        let counters = self
            .api_calls_by_chain
            .entry(blockchain.to_string())
            .or_default();
        counters.calls += 1;
        if !ok {
            counters.failures += 1;
        }
    }

    pub fn finish_cycle(&mut self, now: DateTime<Utc>) {
        self.finalize(now, false);
    }

    /// Finalize the current cycle if it has been running longer than the
    /// stall threshold; returns true when a stalled cycle was closed
    pub fn force_finalize_stale(&mut self, now: DateTime<Utc>) -> bool {
        let stalled = match &self.current {
            Some(cycle) => match cycle.started_at {
                Some(started) => (now - started).num_seconds() >= CYCLE_STALL_SECS,
                None => true,
            },
            None => false,
        };

        if stalled {
            self.finalize(now, true);
        }
        stalled
    }

    fn finalize(&mut self, now: DateTime<Utc>, forced: bool) {
        if let Some(mut cycle) = self.current.take() {
            cycle.duration_ms = cycle
                .started_at
                .map(|s| (now - s).num_milliseconds())
                .unwrap_or(0);
            cycle.forced = forced;
            self.cycles_completed += 1;
            self.history.push_back(cycle);
            while self.history.len() > CYCLE_HISTORY_LIMIT {
                self.history.pop_front();
            }
        }
    }
}

// ===== GLOBAL HANDLE =====

static PIPELINE_STATS: OnceLock<Arc<RwLock<PipelineStats>>> = OnceLock::new();

fn stats_handle() -> Arc<RwLock<PipelineStats>> {
    PIPELINE_STATS
        .get_or_init(|| Arc::new(RwLock::new(PipelineStats::default())))
        .clone()
}

pub async fn begin_cycle(selected: usize) {
    stats_handle().write().await.begin_cycle(selected, Utc::now());
}

pub async fn track_success() {
    stats_handle().write().await.track_success();
}

pub async fn track_failure() {
    stats_handle().write().await.track_failure();
}

pub async fn track_api_call(blockchain: &str, ok: bool) {
    stats_handle().write().await.track_api_call(blockchain, ok);
}

pub async fn finish_cycle() {
    stats_handle().write().await.finish_cycle(Utc::now());
}

/// Watchdog entry point; logs when it has to step in
pub async fn force_finalize_stale() -> bool {
    let forced = stats_handle().write().await.force_finalize_stale(Utc::now());
    if forced {
        logger::warning(
            LogTag::Stats,
            &format!("Cycle exceeded {}s, force-finalized", CYCLE_STALL_SECS),
        );
    }
    forced
}

// ===== FAILURE CACHE =====

static FAILURE_CACHE: Lazy<Mutex<HashMap<i64, FailureRecord>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn note_failure(
    token_id: i64,
    blockchain: &str,
    contract_address: &str,
    count: i64,
    error: &str,
) {
    if let Ok(mut cache) = FAILURE_CACHE.lock() {
        cache.insert(
            token_id,
            FailureRecord {
                token_id,
                blockchain: blockchain.to_string(),
                contract_address: contract_address.to_string(),
                count,
                last_error: error.to_string(),
                last_seen: Utc::now(),
            },
        );
    }
}

pub fn clear_failure(token_id: i64) {
    if let Ok(mut cache) = FAILURE_CACHE.lock() {
        cache.remove(&token_id);
    }
}

pub fn failure_cache_snapshot() -> Vec<FailureRecord> {
    FAILURE_CACHE
        .lock()
        .map(|cache| cache.values().cloned().collect())
        .unwrap_or_default()
}

/// Rebuild the cache from the token rows (startup warm-up)
pub fn sync_failure_cache(conn: &Connection) -> Result<usize, String> {
    let failing = crate::database::tokens::get_failing_tokens(conn, 1, None, true, 10_000)?;
    let count = failing.len();

    if let Ok(mut cache) = FAILURE_CACHE.lock() {
        cache.clear();
        for token in failing {
            cache.insert(
                token.token_id,
                FailureRecord {
                    token_id: token.token_id,
                    blockchain: token.blockchain,
                    contract_address: token.contract_address,
                    count: token.failed_updates_count,
                    last_error: String::new(),
                    last_seen: token.last_updated_at.unwrap_or_else(Utc::now),
                },
            );
        }
    }
    Ok(count)
}

// ===== INTERVAL SUMMARY =====

/// Boxed interval summary printed by the stats loop
pub async fn print_interval_summary() {
    let stats = stats_handle();
    let guard = stats.read().await;

    let uptime_secs = (Utc::now() - *STARTUP_TIME).num_seconds();
    let last = guard.history.back();

    let mut lines = Vec::new();
    lines.push("┌─────────────────── PIPELINE SUMMARY ───────────────────".to_string());
    lines.push(format!(
        "│ Uptime: {}m {}s | Cycles completed: {}",
        uptime_secs / 60,
        uptime_secs % 60,
        guard.cycles_completed
    ));

    if let Some(cycle) = last {
        lines.push(format!(
            "│ Last cycle: {} selected, {} ok, {} failed in {}ms{}",
            cycle.selected,
            cycle.succeeded,
            cycle.failed,
            cycle.duration_ms,
            if cycle.forced { " (forced)" } else { "" }
        ));
    } else {
        lines.push("│ Last cycle: none yet".to_string());
    }

    let mut chains: Vec<(&String, &ApiCounters)> = guard.api_calls_by_chain.iter().collect();
    chains.sort_by(|a, b| b.1.calls.cmp(&a.1.calls));
    for (chain, counters) in chains {
        lines.push(format!(
            "│ API {}: {} calls, {} failed",
            chain, counters.calls, counters.failures
        ));
    }

    let failing = failure_cache_snapshot().len();
    if failing > 0 {
        lines.push(format!("│ Tokens with recent failures: {}", failing));
    }
    lines.push("└────────────────────────────────────────────────────────".to_string());

    for line in lines {
        logger::log(LogTag::Summary, "STATS", &line);
    }
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cycle_lifecycle() {
        let mut stats = PipelineStats::default();
        let t0 = Utc::now();

        stats.begin_cycle(10, t0);
        stats.track_success();
        stats.track_success();
        stats.track_failure();
        stats.finish_cycle(t0 + Duration::milliseconds(500));

        assert!(stats.current.is_none());
        assert_eq!(stats.cycles_completed, 1);
        let cycle = stats.history.back().unwrap();
        assert_eq!(cycle.selected, 10);
        assert_eq!(cycle.succeeded, 2);
        assert_eq!(cycle.failed, 1);
        assert_eq!(cycle.duration_ms, 500);
        assert!(!cycle.forced);
    }

    #[test]
    fn test_history_keeps_last_ten() {
        let mut stats = PipelineStats::default();
        let t0 = Utc::now();

        for i in 0..15 {
            stats.begin_cycle(i, t0);
            stats.finish_cycle(t0);
        }

        assert_eq!(stats.history.len(), CYCLE_HISTORY_LIMIT);
        // Oldest entries were dropped
        assert_eq!(stats.history.front().unwrap().selected, 5);
        assert_eq!(stats.history.back().unwrap().selected, 14);
    }

    #[test]
    fn test_watchdog_only_fires_past_threshold() {
        let mut stats = PipelineStats::default();
        let t0 = Utc::now();

        stats.begin_cycle(5, t0);
        assert!(!stats.force_finalize_stale(t0 + Duration::seconds(CYCLE_STALL_SECS - 1)));
        assert!(stats.current.is_some());

        assert!(stats.force_finalize_stale(t0 + Duration::seconds(CYCLE_STALL_SECS)));
        assert!(stats.current.is_none());
        assert!(stats.history.back().unwrap().forced);
    }

    #[test]
    fn test_begin_cycle_forces_out_leftover() {
        let mut stats = PipelineStats::default();
        let t0 = Utc::now();

        stats.begin_cycle(1, t0);
        stats.begin_cycle(2, t0 + Duration::seconds(60));

        assert_eq!(stats.history.len(), 1);
        assert!(stats.history.back().unwrap().forced);
        assert_eq!(stats.current.as_ref().unwrap().selected, 2);
    }

    #[test]
    fn test_api_counters_accumulate_per_chain() {
        let mut stats = PipelineStats::default();
        stats.track_api_call("ethereum", true);
        stats.track_api_call("ethereum", false);
        stats.track_api_call("bsc", true);

        let eth = &stats.api_calls_by_chain["ethereum"];
        assert_eq!(eth.calls, 2);
        assert_eq!(eth.failures, 1);
        assert_eq!(stats.api_calls_by_chain["bsc"].failures, 0);
    }

    #[test]
    fn test_failure_cache_roundtrip() {
        note_failure(9001, "ethereum", "0xCACHE", 3, "timeout");
        let snapshot = failure_cache_snapshot();
        let record = snapshot.iter().find(|r| r.token_id == 9001).unwrap();
        assert_eq!(record.count, 3);
        assert_eq!(record.last_error, "timeout");

        clear_failure(9001);
        assert!(!failure_cache_snapshot().iter().any(|r| r.token_id == 9001));
    }
}
