// ===== TOKEN CLASSIFIER =====
//
// Assigns each token a polling tier from its most recent observation.
// Tokens with no metric rows yet fall back to the liquidity recorded when
// they were first registered. The classifier only ever deactivates; waking
// inactive tokens back up is the reactivation sweep's job, which checks the
// live API instead of possibly stale stored metrics.

use rusqlite::Connection;

use crate::database::{metrics, tokens, tokens::TokenPatch};
use crate::logger::{self, LogTag};

/// Polling tiers in seconds
pub const FAST_INTERVAL_SECS: i64 = 30;
pub const MEDIUM_INTERVAL_SECS: i64 = 300;
pub const SLOW_INTERVAL_SECS: i64 = 3600;
pub const DORMANT_INTERVAL_SECS: i64 = 86400;

/// Tier thresholds
const FAST_MIN_LIQUIDITY_USD: f64 = 10_000.0;
const FAST_MIN_MARKET_CAP_USD: f64 = 50_000.0;
const MEDIUM_MIN_LIQUIDITY_USD: f64 = 1_000.0;
const MEDIUM_MIN_MARKET_CAP_USD: f64 = 5_000.0;

/// Compute (update_interval, is_active) from liquidity and market cap
pub fn classify(liquidity_usd: f64, market_cap: f64) -> (i64, bool) {
    if liquidity_usd > FAST_MIN_LIQUIDITY_USD || market_cap > FAST_MIN_MARKET_CAP_USD {
        (FAST_INTERVAL_SECS, true)
    } else if liquidity_usd > MEDIUM_MIN_LIQUIDITY_USD || market_cap > MEDIUM_MIN_MARKET_CAP_USD {
        (MEDIUM_INTERVAL_SECS, true)
    } else if liquidity_usd > 0.0 {
        (SLOW_INTERVAL_SECS, true)
    } else {
        (DORMANT_INTERVAL_SECS, false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassifierOutcome {
    pub examined: usize,
    pub retiered: usize,
    pub deactivated: usize,
}

/// Re-tier every token from its latest stored metric
pub fn classify_all(conn: &Connection) -> Result<ClassifierOutcome, String> {
    let all_tokens = tokens::get_all_tokens(conn)?;
    let mut outcome = ClassifierOutcome {
        examined: all_tokens.len(),
        ..Default::default()
    };

    for token in all_tokens {
        let (liquidity, market_cap) = match metrics::latest_metric(conn, token.token_id)? {
            Some(m) => (
                m.liquidity_usd.unwrap_or(0.0),
                m.market_cap.unwrap_or(0.0),
            ),
            // No observations yet: classify from registration liquidity
            None => (token.first_seen_liquidity.unwrap_or(0.0), 0.0),
        };

        let (interval, active) = classify(liquidity, market_cap);

        let mut patch = TokenPatch::new();
        if interval != token.update_interval {
            patch = patch.interval(interval);
        }
        if !active && token.is_active {
            patch = patch.active(false);
            outcome.deactivated += 1;
        }

        if !patch.is_empty() {
            patch.apply(conn, token.token_id)?;
            outcome.retiered += 1;
            logger::debug(
                LogTag::Classifier,
                &format!(
                    "Token {} retiered: interval {} -> {} (liq ${:.0}, mcap ${:.0})",
                    token.token_id, token.update_interval, interval, liquidity, market_cap
                ),
            );
        }
    }

    Ok(outcome)
}

/// Full classifier pass over the global database
pub async fn run_classifier_pass() -> Result<ClassifierOutcome, String> {
    let pool = crate::database::get_pool()?;
    let conn = pool.checkout()?;
    let outcome = classify_all(&conn)?;

    logger::info(
        LogTag::Classifier,
        &format!(
            "Classifier pass: {} examined, {} retiered, {} deactivated",
            outcome.examined, outcome.retiered, outcome.deactivated
        ),
    );
    Ok(outcome)
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema;
    use crate::types::PriceMetric;
    use chrono::Utc;

    #[test]
    fn test_classify_tiers() {
        assert_eq!(classify(15_000.0, 0.0), (FAST_INTERVAL_SECS, true));
        assert_eq!(classify(0.0, 60_000.0), (FAST_INTERVAL_SECS, true));
        assert_eq!(classify(5_000.0, 0.0), (MEDIUM_INTERVAL_SECS, true));
        assert_eq!(classify(0.0, 10_000.0), (MEDIUM_INTERVAL_SECS, true));
        assert_eq!(classify(500.0, 0.0), (SLOW_INTERVAL_SECS, true));
        assert_eq!(classify(0.0, 0.0), (DORMANT_INTERVAL_SECS, false));
    }

    #[test]
    fn test_classify_interval_monotonic_in_liquidity() {
        // More liquidity never polls slower
        let samples = [0.0, 1.0, 999.0, 1_001.0, 9_999.0, 10_001.0, 1_000_000.0];
        let mut previous = i64::MAX;
        for liq in samples {
            let (interval, _) = classify(liq, 0.0);
            assert!(interval <= previous, "interval regressed at liq {}", liq);
            previous = interval;
        }
    }

    #[test]
    fn test_classify_boundaries_are_exclusive() {
        // Thresholds are strict: exactly at the bound stays in the lower tier
        assert_eq!(classify(10_000.0, 0.0).0, MEDIUM_INTERVAL_SECS);
        assert_eq!(classify(1_000.0, 0.0).0, SLOW_INTERVAL_SECS);
        assert_eq!(classify(0.0, 0.0).0, DORMANT_INTERVAL_SECS);
    }

    fn metric(token_id: i64, liquidity: f64, market_cap: f64) -> PriceMetric {
        PriceMetric {
            token_id,
            pair_address: "0xP".to_string(),
            timestamp: Utc::now(),
            price_native: None,
            price_usd: Some(1.0),
            txns_buys: None,
            txns_sells: None,
            volume: None,
            liquidity_base: None,
            liquidity_quote: None,
            liquidity_usd: Some(liquidity),
            fdv: None,
            market_cap: Some(market_cap),
            staging_ref: None,
        }
    }

    #[test]
    fn test_classify_all_retiers_from_latest_metric() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        schema::initialize_schema(&conn).unwrap();

        let hot = tokens::insert_token(&conn, "ethereum", "0xHOT", None).unwrap();
        let dead = tokens::insert_token(&conn, "ethereum", "0xDEAD", None).unwrap();
        metrics::upsert_metric(&conn, &metric(hot, 20_000.0, 0.0)).unwrap();
        metrics::upsert_metric(&conn, &metric(dead, 0.0, 0.0)).unwrap();

        let outcome = classify_all(&conn).unwrap();
        assert_eq!(outcome.examined, 2);
        assert_eq!(outcome.deactivated, 1);

        let hot_token = tokens::get_token(&conn, hot).unwrap().unwrap();
        assert_eq!(hot_token.update_interval, FAST_INTERVAL_SECS);
        assert!(hot_token.is_active);

        let dead_token = tokens::get_token(&conn, dead).unwrap().unwrap();
        assert_eq!(dead_token.update_interval, DORMANT_INTERVAL_SECS);
        assert!(!dead_token.is_active);
    }

    #[test]
    fn test_classify_all_falls_back_to_first_seen_liquidity() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        schema::initialize_schema(&conn).unwrap();

        let id = tokens::insert_token(&conn, "bsc", "0xNEW", Some(12_000.0)).unwrap();
        classify_all(&conn).unwrap();

        let token = tokens::get_token(&conn, id).unwrap().unwrap();
        assert_eq!(token.update_interval, FAST_INTERVAL_SECS);
        assert!(token.is_active);
    }

    #[test]
    fn test_classifier_never_reactivates() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        schema::initialize_schema(&conn).unwrap();

        let id = tokens::insert_token(&conn, "bsc", "0xOFF", None).unwrap();
        TokenPatch::new().active(false).apply(&conn, id).unwrap();
        // A stale metric still shows healthy liquidity
        metrics::upsert_metric(&conn, &metric(id, 50_000.0, 0.0)).unwrap();

        classify_all(&conn).unwrap();

        let token = tokens::get_token(&conn, id).unwrap().unwrap();
        assert!(!token.is_active);
        assert_eq!(token.update_interval, FAST_INTERVAL_SECS);
    }
}
