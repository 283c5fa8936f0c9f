// ===== STAGING PROCESSOR =====
//
// Consumes staged API payloads and turns them into price metric rows. Each
// staged token is handled independently: a bad pair, a missing market or a
// malformed payload only affects that token. Metric timestamps come from
// the staging document's creation time, so reprocessing a document lands on
// the same (token_id, timestamp) key and stays idempotent.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{extract_pairs, Pair, PairSource};
use crate::database::{metrics, staging, tokens, ConnectionPool};
use crate::logger::{self, LogTag};
use crate::types::{PriceMetric, StagingDocument};

use super::failures;
use super::stats;

/// Staging documents consumed per processing pass
pub const PROCESS_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub documents: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub remaining: i64,
}

/// Pick the pair to read metrics from
///
/// The stored best pair wins when it is present in the response (sticky,
/// case-insensitive). Otherwise the deepest pool by USD liquidity is used.
pub fn select_best_pair<'a>(pairs: &[&'a Pair], stored: Option<&str>) -> Option<&'a Pair> {
    if let Some(stored_address) = stored {
        let lowered = stored_address.to_lowercase();
        if let Some(found) = pairs
            .iter()
            .find(|p| p.pair_address.to_lowercase() == lowered)
        {
            return Some(found);
        }
    }

    pairs
        .iter()
        .max_by(|a, b| {
            a.liquidity_usd()
                .partial_cmp(&b.liquidity_usd())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .copied()
}

fn build_metric(token_id: i64, pair: &Pair, doc: &StagingDocument) -> PriceMetric {
    let txns_h24 = pair.txns.as_ref().and_then(|t| t.h24.as_ref());

    PriceMetric {
        token_id,
        pair_address: pair.pair_address.clone(),
        timestamp: doc.created_at,
        price_native: pair.price_native_f64(),
        price_usd: pair.price_usd_f64(),
        txns_buys: txns_h24.and_then(|t| t.buys),
        txns_sells: txns_h24.and_then(|t| t.sells),
        volume: pair.volume.as_ref().and_then(|v| v.h24),
        liquidity_base: pair.liquidity.as_ref().and_then(|l| l.base),
        liquidity_quote: pair.liquidity.as_ref().and_then(|l| l.quote),
        liquidity_usd: pair.liquidity.as_ref().and_then(|l| l.usd),
        fdv: pair.fdv,
        market_cap: pair.market_cap,
        staging_ref: Some(doc.doc_id),
    }
}

/// Process one staging document; returns (succeeded, failed) token counts
pub async fn process_document(
    pool: &Arc<ConnectionPool>,
    source: &dyn PairSource,
    doc: &StagingDocument,
) -> Result<(usize, usize), String> {
    let pairs = extract_pairs(&doc.raw_data);

    // Group response pairs by base token address
    let mut by_base: HashMap<String, Vec<&Pair>> = HashMap::new();
    for pair in &pairs {
        if let Some(base) = pair.base_address() {
            by_base.entry(base.to_lowercase()).or_default().push(pair);
        }
    }

    let mut succeeded = 0;
    let mut failed = 0;

    for token_ref in &doc.tokens {
        let candidates = by_base
            .get(&token_ref.contract_address.to_lowercase())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);

        match select_best_pair(candidates, token_ref.pair_address.as_deref()) {
            Some(pair) => {
                let result = {
                    let conn = pool.checkout()?;
                    metrics::upsert_metric(&conn, &build_metric(token_ref.token_id, pair, doc))
                        .and_then(|_| {
                            // Sticky adoption: only fill an empty best pair
                            if token_ref.pair_address.is_none() {
                                tokens::TokenPatch::new()
                                    .best_pair(&pair.pair_address)
                                    .apply(&conn, token_ref.token_id)
                                    .map(|_| ())
                            } else {
                                Ok(())
                            }
                        })
                        .and_then(|_| {
                            failures::record_success(&conn, token_ref.token_id, doc.created_at)
                        })
                };

                match result {
                    Ok(()) => {
                        stats::track_success().await;
                        succeeded += 1;
                    }
                    Err(e) => {
                        logger::error(
                            LogTag::Processor,
                            &format!("Failed to store metric for token {}: {}", token_ref.token_id, e),
                        );
                        failed += 1;
                    }
                }
            }
            None => {
                if let Err(e) = failures::record_failure(
                    pool,
                    source,
                    token_ref.token_id,
                    "no usable pair in response",
                )
                .await
                {
                    logger::error(
                        LogTag::Processor,
                        &format!(
                            "Failure event error for token {}: {}",
                            token_ref.token_id, e
                        ),
                    );
                }
                stats::track_failure().await;
                failed += 1;
            }
        }
    }

    Ok((succeeded, failed))
}

/// Process up to `batch` staged documents
pub async fn process_pending(
    pool: &Arc<ConnectionPool>,
    source: &dyn PairSource,
    batch: usize,
) -> Result<ProcessOutcome, String> {
    let docs = {
        let conn = pool.checkout()?;
        staging::fetch_unprocessed(&conn, batch)?
    };

    let mut outcome = ProcessOutcome {
        documents: docs.len(),
        ..Default::default()
    };

    for doc in &docs {
        let (succeeded, failed) = process_document(pool, source, doc).await?;
        outcome.succeeded += succeeded;
        outcome.failed += failed;

        let conn = pool.checkout()?;
        staging::mark_processed(&conn, doc.doc_id)?;
    }

    outcome.remaining = {
        let conn = pool.checkout()?;
        staging::count_unprocessed(&conn)?
    };

    Ok(outcome)
}

/// One processing cycle against the global database
///
/// When work remains after a full batch, a follow-up pass is scheduled as a
/// separate task instead of draining the backlog inline; a deep backlog
/// therefore cannot block the ticker.
pub fn run_process_cycle() -> BoxFuture<'static, Result<ProcessOutcome, String>> {
    async move {
        let pool = crate::database::get_pool()?;
        let api = crate::api::get_global_api()?;

        let outcome = process_pending(&pool, api.as_ref(), PROCESS_BATCH_SIZE).await?;

        if outcome.documents > 0 {
            logger::info(
                LogTag::Processor,
                &format!(
                    "Processed {} docs: {} ok, {} failed, {} pending",
                    outcome.documents, outcome.succeeded, outcome.failed, outcome.remaining
                ),
            );
        }

        if outcome.remaining > 0 {
            logger::debug(
                LogTag::Processor,
                &format!("{} documents pending, scheduling follow-up pass", outcome.remaining),
            );
            tokio::spawn(async {
                if let Err(e) = run_process_cycle().await {
                    logger::error(
                        LogTag::Processor,
                        &format!("Follow-up processing pass failed: {}", e),
                    );
                }
            });
        }

        Ok(outcome)
    }
    .boxed()
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema;
    use crate::types::StagedTokenRef;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct StubSource;

    #[async_trait]
    impl PairSource for StubSource {
        async fn fetch_token_batch(
            &self,
            _blockchain: &str,
            _addresses: &[String],
        ) -> Result<serde_json::Value, String> {
            Ok(json!({ "pairs": [] }))
        }

        async fn pairs_for_token(
            &self,
            _blockchain: &str,
            _contract_address: &str,
        ) -> Result<Vec<Pair>, String> {
            Ok(vec![])
        }
    }

    fn pair_json(address: &str, base: &str, liquidity: f64) -> serde_json::Value {
        json!({
            "pairAddress": address,
            "chainId": "ethereum",
            "baseToken": { "address": base, "symbol": "TKN" },
            "priceNative": "0.001",
            "priceUsd": "2.5",
            "txns": { "h24": { "buys": 12, "sells": 7 } },
            "volume": { "h24": 123456.0 },
            "liquidity": { "usd": liquidity, "base": 10.0, "quote": 20.0 },
            "fdv": 900000.0,
            "marketCap": 700000.0
        })
    }

    fn temp_pool() -> (TempDir, Arc<ConnectionPool>) {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::with_limits(&dir.path().join("processor.db"), 1, 4).unwrap();
        {
            let conn = pool.checkout().unwrap();
            schema::initialize_schema(&conn).unwrap();
        }
        (dir, pool)
    }

    fn stage(
        pool: &Arc<ConnectionPool>,
        refs: &[StagedTokenRef],
        raw: &serde_json::Value,
    ) -> i64 {
        let conn = pool.checkout().unwrap();
        staging::insert_document(&conn, "ethereum", refs, raw, false).unwrap()
    }

    #[test]
    fn test_select_best_pair_prefers_stored() {
        let a: Pair = serde_json::from_value(pair_json("0xAAA", "0xT", 9_000.0)).unwrap();
        let b: Pair = serde_json::from_value(pair_json("0xBBB", "0xT", 100.0)).unwrap();
        let pairs = vec![&a, &b];

        // Stored pair wins even with lower liquidity, case-insensitively
        let best = select_best_pair(&pairs, Some("0xbbb")).unwrap();
        assert_eq!(best.pair_address, "0xBBB");

        // Without a stored pair, deepest liquidity wins
        let best = select_best_pair(&pairs, None).unwrap();
        assert_eq!(best.pair_address, "0xAAA");

        // Stored pair missing from the response falls back to liquidity
        let best = select_best_pair(&pairs, Some("0xGONE")).unwrap();
        assert_eq!(best.pair_address, "0xAAA");

        assert!(select_best_pair(&[], None).is_none());
    }

    #[tokio::test]
    async fn test_processing_writes_metric_and_resets_failures() {
        let (_dir, pool) = temp_pool();
        let id = {
            let conn = pool.checkout().unwrap();
            let id = tokens::insert_token(&conn, "ethereum", "0xTOK", None).unwrap();
            tokens::increment_failures(&conn, id).unwrap();
            id
        };

        let refs = vec![StagedTokenRef {
            token_id: id,
            contract_address: "0xTOK".to_string(),
            pair_address: None,
        }];
        stage(&pool, &refs, &json!({ "pairs": [pair_json("0xP1", "0xTOK", 5_000.0)] }));

        let outcome = process_pending(&pool, &StubSource, 10).await.unwrap();
        assert_eq!(outcome.documents, 1);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.remaining, 0);

        let conn = pool.checkout().unwrap();
        let metric = metrics::latest_metric(&conn, id).unwrap().unwrap();
        assert_eq!(metric.price_usd, Some(2.5));
        assert_eq!(metric.txns_buys, Some(12));
        assert_eq!(metric.liquidity_usd, Some(5_000.0));

        let token = tokens::get_token(&conn, id).unwrap().unwrap();
        assert_eq!(token.failed_updates_count, 0);
        // Empty best pair was adopted from the response
        assert_eq!(token.best_pair_address.as_deref(), Some("0xP1"));
    }

    #[tokio::test]
    async fn test_reprocessing_same_document_is_idempotent() {
        let (_dir, pool) = temp_pool();
        let id = {
            let conn = pool.checkout().unwrap();
            tokens::insert_token(&conn, "ethereum", "0xTOK", None).unwrap()
        };

        let refs = vec![StagedTokenRef {
            token_id: id,
            contract_address: "0xTOK".to_string(),
            pair_address: None,
        }];
        let doc_id = stage(&pool, &refs, &json!({ "pairs": [pair_json("0xP1", "0xTOK", 100.0)] }));

        process_pending(&pool, &StubSource, 10).await.unwrap();

        // Reset the processed flag and run again
        {
            let conn = pool.checkout().unwrap();
            conn.execute(
                "UPDATE staging_documents SET processed = 0 WHERE doc_id = ?1",
                rusqlite::params![doc_id],
            )
            .unwrap();
        }
        process_pending(&pool, &StubSource, 10).await.unwrap();

        let conn = pool.checkout().unwrap();
        assert_eq!(metrics::metric_count(&conn, id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partial_batch_isolation() {
        let (_dir, pool) = temp_pool();
        let (good, missing) = {
            let conn = pool.checkout().unwrap();
            (
                tokens::insert_token(&conn, "ethereum", "0xGOOD", None).unwrap(),
                tokens::insert_token(&conn, "ethereum", "0xMISS", None).unwrap(),
            )
        };

        let refs = vec![
            StagedTokenRef {
                token_id: good,
                contract_address: "0xGOOD".to_string(),
                pair_address: None,
            },
            StagedTokenRef {
                token_id: missing,
                contract_address: "0xMISS".to_string(),
                pair_address: None,
            },
        ];
        // Response only covers the first token
        stage(&pool, &refs, &json!({ "pairs": [pair_json("0xP1", "0xGOOD", 500.0)] }));

        let outcome = process_pending(&pool, &StubSource, 10).await.unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 1);

        let conn = pool.checkout().unwrap();
        assert_eq!(metrics::metric_count(&conn, good).unwrap(), 1);
        assert_eq!(metrics::metric_count(&conn, missing).unwrap(), 0);

        let missed = tokens::get_token(&conn, missing).unwrap().unwrap();
        assert_eq!(missed.failed_updates_count, 1);
        assert!(missed.is_active);
    }

    #[tokio::test]
    async fn test_sticky_pair_survives_deeper_competitor() {
        let (_dir, pool) = temp_pool();
        let id = {
            let conn = pool.checkout().unwrap();
            let id = tokens::insert_token(&conn, "ethereum", "0xTOK", None).unwrap();
            tokens::TokenPatch::new()
                .best_pair("0xSTORED")
                .apply(&conn, id)
                .unwrap();
            id
        };

        let refs = vec![StagedTokenRef {
            token_id: id,
            contract_address: "0xTOK".to_string(),
            pair_address: Some("0xSTORED".to_string()),
        }];
        stage(
            &pool,
            &refs,
            &json!({ "pairs": [
                pair_json("0xSTORED", "0xTOK", 100.0),
                pair_json("0xDEEPER", "0xTOK", 99_999.0),
            ] }),
        );

        process_pending(&pool, &StubSource, 10).await.unwrap();

        let conn = pool.checkout().unwrap();
        let metric = metrics::latest_metric(&conn, id).unwrap().unwrap();
        assert_eq!(metric.pair_address, "0xSTORED");

        let token = tokens::get_token(&conn, id).unwrap().unwrap();
        assert_eq!(token.best_pair_address.as_deref(), Some("0xSTORED"));
    }

    #[tokio::test]
    async fn test_corrupt_staging_row_surfaces_error() {
        let (_dir, pool) = temp_pool();
        {
            let conn = pool.checkout().unwrap();
            conn.execute(
                "INSERT INTO staging_documents (created_at, blockchain, tokens, processed, raw_data)
                 VALUES ('2026-08-30T00:00:00+00:00', 'ethereum', 'not json', 0, '{}')",
                [],
            )
            .unwrap();
        }

        let err = process_pending(&pool, &StubSource, 10).await.unwrap_err();
        assert!(err.contains("Corrupt token refs"));
    }

    #[tokio::test]
    async fn test_malformed_payload_counts_failures_but_completes() {
        let (_dir, pool) = temp_pool();
        let id = {
            let conn = pool.checkout().unwrap();
            tokens::insert_token(&conn, "ethereum", "0xTOK", None).unwrap()
        };

        let refs = vec![StagedTokenRef {
            token_id: id,
            contract_address: "0xTOK".to_string(),
            pair_address: None,
        }];
        stage(&pool, &refs, &json!({ "unexpected": "shape" }));

        let outcome = process_pending(&pool, &StubSource, 10).await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.remaining, 0);

        let conn = pool.checkout().unwrap();
        let token = tokens::get_token(&conn, id).unwrap().unwrap();
        assert_eq!(token.failed_updates_count, 1);
    }
}
