// ===== FAILURE STATE MACHINE =====
//
// Every token carries a consecutive-failure counter. A failure event bumps
// it under a row claim; at the threshold the token gets one inline recovery
// attempt against the live API. A live market resets the token (new best
// pair, counter cleared, re-tiered); a dead one deactivates it. Successful
// processing resets the counter through `record_success`.
//
// Connections are checked out per step and never held across an API await.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::sync::Arc;

use crate::api::PairSource;
use crate::database::tokens::{self, TokenPatch};
use crate::database::ConnectionPool;
use crate::errors::TrackerError;
use crate::logger::{self, LogTag};
use crate::types::TrackedToken;

use super::classifier::classify;
use super::stats;

/// Consecutive failures before a recovery attempt is forced
pub const FAILURE_THRESHOLD: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Counter bumped, token still below the threshold
    Degraded(i64),
    /// Threshold recovery found a live market and reset the token
    Recovered { pair_address: String },
    /// Threshold recovery found nothing, token deactivated
    Deactivated,
    /// Another worker holds the row claim, event skipped
    Contended,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    Recovered {
        pair_address: String,
        liquidity_usd: f64,
    },
    StillDead,
}

/// Record one failure event for a token
pub async fn record_failure(
    pool: &Arc<ConnectionPool>,
    source: &dyn PairSource,
    token_id: i64,
    error: &str,
) -> Result<FailureOutcome, String> {
    let (token, new_count) = {
        let conn = pool.checkout()?;
        if !tokens::try_claim(&conn, token_id, Utc::now())? {
            logger::debug(
                LogTag::Failures,
                &format!("Token {} claim contended, skipping failure event", token_id),
            );
            return Ok(FailureOutcome::Contended);
        }

        let token = match tokens::get_token(&conn, token_id)? {
            Some(t) => t,
            None => {
                tokens::release_claim(&conn, token_id)?;
                return Err(format!("Token {} not found", token_id));
            }
        };
        let new_count = tokens::increment_failures(&conn, token_id)?;
        (token, new_count)
    };

    stats::note_failure(
        token_id,
        &token.blockchain,
        &token.contract_address,
        new_count,
        error,
    );

    let outcome = if new_count < FAILURE_THRESHOLD {
        logger::debug(
            LogTag::Failures,
            &format!(
                "Token {} failure {}/{}: {}",
                token_id, new_count, FAILURE_THRESHOLD, error
            ),
        );
        Ok(FailureOutcome::Degraded(new_count))
    } else {
        let persistent = TrackerError::PersistentFailure {
            token_id,
            blockchain: token.blockchain.clone(),
            contract_address: token.contract_address.clone(),
            failures: new_count,
        };
        logger::warning(LogTag::Failures, &persistent.to_string());

        match attempt_recovery(pool, source, &token).await {
            Ok(RecoveryOutcome::Recovered { pair_address, .. }) => {
                Ok(FailureOutcome::Recovered { pair_address })
            }
            Ok(RecoveryOutcome::StillDead) => pool
                .checkout()
                .and_then(|conn| TokenPatch::new().active(false).apply(&conn, token_id))
                .map(|_| {
                    logger::warning(
                        LogTag::Failures,
                        &format!(
                            "Token {} ({}) deactivated after {} failures",
                            token_id, token.contract_address, new_count
                        ),
                    );
                    FailureOutcome::Deactivated
                }),
            Err(e) => Err(e),
        }
    };

    // The claim is released on success and error paths alike
    {
        let conn = pool.checkout()?;
        tokens::release_claim(&conn, token_id)?;
    }
    outcome
}

/// Record a successful observation: reset the counter and stamp the token
///
/// Skips silently when the row claim is contended; the counter will reset
/// on the next successful pass instead.
pub fn record_success(
    conn: &Connection,
    token_id: i64,
    observed_at: DateTime<Utc>,
) -> Result<(), String> {
    if !tokens::try_claim(conn, token_id, Utc::now())? {
        logger::debug(
            LogTag::Failures,
            &format!("Token {} claim contended, success reset deferred", token_id),
        );
        return Ok(());
    }

    let result = TokenPatch::new()
        .failures(0)
        .touched(observed_at)
        .apply(conn, token_id);
    tokens::release_claim(conn, token_id)?;
    result?;

    stats::clear_failure(token_id);
    Ok(())
}

/// Probe the live API for a token and revive it when a market exists
///
/// Adoption rule: any pair with positive liquidity; the most liquid pair
/// wins and overrides the stored best pair. API errors during the probe
/// count as a dead market rather than aborting the state transition.
pub async fn attempt_recovery(
    pool: &Arc<ConnectionPool>,
    source: &dyn PairSource,
    token: &TrackedToken,
) -> Result<RecoveryOutcome, String> {
    let pairs = match source
        .pairs_for_token(&token.blockchain, &token.contract_address)
        .await
    {
        Ok(pairs) => pairs,
        Err(e) => {
            logger::warning(
                LogTag::Recovery,
                &format!("Recovery probe failed for token {}: {}", token.token_id, e),
            );
            return Ok(RecoveryOutcome::StillDead);
        }
    };

    let best = pairs
        .iter()
        .filter(|p| p.liquidity_usd() > 0.0)
        .max_by(|a, b| {
            a.liquidity_usd()
                .partial_cmp(&b.liquidity_usd())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

    let pair = match best {
        Some(p) => p,
        None => return Ok(RecoveryOutcome::StillDead),
    };

    let liquidity = pair.liquidity_usd();
    let (interval, active) = classify(liquidity, pair.market_cap_f64());

    {
        let conn = pool.checkout()?;
        TokenPatch::new()
            .best_pair(&pair.pair_address)
            .failures(0)
            .active(active)
            .interval(interval)
            .touched(Utc::now())
            .apply(&conn, token.token_id)?;
    }

    stats::clear_failure(token.token_id);
    logger::info(
        LogTag::Recovery,
        &format!(
            "Token {} recovered on pair {} (liq ${:.0}, interval {}s)",
            token.token_id, pair.pair_address, liquidity, interval
        ),
    );

    Ok(RecoveryOutcome::Recovered {
        pair_address: pair.pair_address.clone(),
        liquidity_usd: liquidity,
    })
}

// ===== TESTS =====
