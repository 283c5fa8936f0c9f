// ===== RECOVERY AND REACTIVATION SWEEPS =====
//
// Two periodic second chances for tokens the steady-state pipeline gave up
// on. The recovery sweep retries the threshold recovery for tokens stuck at
// the failure threshold, worst-affected chain first. The reactivation sweep
// probes inactive tokens against the live API and wakes those whose market
// has grown back past the reactivation bar.

use chrono::Utc;
use std::sync::Arc;

use crate::api::PairSource;
use crate::database::{tokens, tokens::TokenPatch, ConnectionPool};
use crate::logger::{self, LogTag};

use super::classifier::classify;
use super::failures::{self, RecoveryOutcome, FAILURE_THRESHOLD};
use super::stats;

/// Tokens retried per chain in one recovery sweep
pub const RECOVERY_PER_CHAIN_LIMIT: usize = 10;

/// Inactive tokens probed per reactivation sweep
pub const REACTIVATION_BATCH_LIMIT: usize = 50;

/// Reactivation bar: the market must be meaningfully alive again, not just
/// nonzero like the inline recovery rule
pub const REACTIVATION_MIN_LIQUIDITY_USD: f64 = 1_000.0;
pub const REACTIVATION_MIN_MARKET_CAP_USD: f64 = 5_000.0;

#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub examined: usize,
    pub recovered: usize,
    pub still_dead: usize,
    pub skipped: usize,
}

/// Retry recovery for tokens stuck at the failure threshold
pub async fn recovery_sweep(
    pool: &Arc<ConnectionPool>,
    source: &dyn PairSource,
) -> Result<SweepOutcome, String> {
    let mut outcome = SweepOutcome::default();

    let chains = {
        let conn = pool.checkout()?;
        tokens::failure_counts_by_blockchain(&conn)?
    };

    for (chain, failing_count) in chains {
        logger::debug(
            LogTag::Recovery,
            &format!("Sweeping {} ({} tokens with failures)", chain, failing_count),
        );

        let candidates = {
            let conn = pool.checkout()?;
            tokens::get_failing_tokens(
                &conn,
                FAILURE_THRESHOLD,
                Some(&chain),
                true,
                RECOVERY_PER_CHAIN_LIMIT,
            )?
        };

        for token in candidates {
            outcome.examined += 1;

            let claimed = {
                let conn = pool.checkout()?;
                tokens::try_claim(&conn, token.token_id, Utc::now())?
            };
            if !claimed {
                outcome.skipped += 1;
                continue;
            }

            let result = failures::attempt_recovery(pool, source, &token).await;

            {
                let conn = pool.checkout()?;
                tokens::release_claim(&conn, token.token_id)?;
            }

            match result? {
                RecoveryOutcome::Recovered { .. } => outcome.recovered += 1,
                RecoveryOutcome::StillDead => outcome.still_dead += 1,
            }
        }
    }

    Ok(outcome)
}

/// Probe inactive tokens and wake those whose market recovered
pub async fn reactivation_sweep(
    pool: &Arc<ConnectionPool>,
    source: &dyn PairSource,
) -> Result<SweepOutcome, String> {
    let mut outcome = SweepOutcome::default();

    let inactive = {
        let conn = pool.checkout()?;
        tokens::get_inactive_tokens(&conn, REACTIVATION_BATCH_LIMIT)?
    };

    for token in inactive {
        outcome.examined += 1;

        let pairs = match source
            .pairs_for_token(&token.blockchain, &token.contract_address)
            .await
        {
            Ok(pairs) => pairs,
            Err(e) => {
                logger::debug(
                    LogTag::Recovery,
                    &format!(
                        "Reactivation probe failed for token {}: {}",
                        token.token_id, e
                    ),
                );
                outcome.still_dead += 1;
                continue;
            }
        };

        let best = pairs.iter().max_by(|a, b| {
            a.liquidity_usd()
                .partial_cmp(&b.liquidity_usd())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let pair = match best {
            Some(p)
                if p.liquidity_usd() > REACTIVATION_MIN_LIQUIDITY_USD
                    || p.market_cap_f64() > REACTIVATION_MIN_MARKET_CAP_USD =>
            {
                p
            }
            _ => {
                outcome.still_dead += 1;
                continue;
            }
        };

        let (interval, _) = classify(pair.liquidity_usd(), pair.market_cap_f64());

        {
            let conn = pool.checkout()?;
            TokenPatch::new()
                .best_pair(&pair.pair_address)
                .active(true)
                .failures(0)
                .interval(interval)
                .touched(Utc::now())
                .apply(&conn, token.token_id)?;
        }
        stats::clear_failure(token.token_id);
        outcome.recovered += 1;

        logger::info(
            LogTag::Recovery,
            &format!(
                "Token {} reactivated on pair {} (liq ${:.0}, mcap ${:.0})",
                token.token_id,
                pair.pair_address,
                pair.liquidity_usd(),
                pair.market_cap_f64()
            ),
        );
    }

    Ok(outcome)
}

/// Recovery sweep against the global database
pub async fn run_recovery_sweep() -> Result<SweepOutcome, String> {
    let pool = crate::database::get_pool()?;
    let api = crate::api::get_global_api()?;
    let outcome = recovery_sweep(&pool, api.as_ref()).await?;

    if outcome.examined > 0 {
        logger::info(
            LogTag::Recovery,
            &format!(
                "Recovery sweep: {} examined, {} recovered, {} still dead, {} skipped",
                outcome.examined, outcome.recovered, outcome.still_dead, outcome.skipped
            ),
        );
    }
    Ok(outcome)
}

/// Reactivation sweep against the global database
pub async fn run_reactivation_sweep() -> Result<SweepOutcome, String> {
    let pool = crate::database::get_pool()?;
    let api = crate::api::get_global_api()?;
    let outcome = reactivation_sweep(&pool, api.as_ref()).await?;

    if outcome.examined > 0 {
        logger::info(
            LogTag::Recovery,
            &format!(
                "Reactivation sweep: {} examined, {} reactivated",
                outcome.examined, outcome.recovered
            ),
        );
    }
    Ok(outcome)
}

// ===== TESTS =====
