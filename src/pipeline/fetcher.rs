// ===== BATCH FETCHER =====
//
// Groups due tokens by blockchain, pulls pair data in API-sized batches and
// stages each raw payload for the processor. A failed batch is recorded as
// a ledger-only staging document and every token in it is credited one
// failure event immediately; other batches in the cycle continue.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::{PairSource, MAX_TOKENS_PER_BATCH};
use crate::database::{staging, tokens, ConnectionPool};
use crate::logger::{self, LogTag};
use crate::types::{StagedTokenRef, TrackedToken};

use super::selector::{self, SELECTION_LIMIT};
use super::{failures, stats};

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub selected: usize,
    pub batches: usize,
    pub staged: usize,
    pub failed_batches: usize,
}

/// Fetch pair data for the given tokens and stage the payloads
pub async fn fetch_and_stage(
    pool: &Arc<ConnectionPool>,
    source: &dyn PairSource,
    token_list: &[TrackedToken],
) -> Result<FetchOutcome, String> {
    let mut outcome = FetchOutcome {
        selected: token_list.len(),
        ..Default::default()
    };

    // Group by chain; BTreeMap keeps chain order stable across cycles
    let mut by_chain: BTreeMap<&str, Vec<&TrackedToken>> = BTreeMap::new();
    for token in token_list {
        by_chain
            .entry(token.blockchain.as_str())
            .or_default()
            .push(token);
    }

    for (chain, chain_tokens) in by_chain {
        for batch in chain_tokens.chunks(MAX_TOKENS_PER_BATCH) {
            outcome.batches += 1;

            let addresses: Vec<String> =
                batch.iter().map(|t| t.contract_address.clone()).collect();
            let token_refs: Vec<StagedTokenRef> = batch
                .iter()
                .map(|t| StagedTokenRef {
                    token_id: t.token_id,
                    contract_address: t.contract_address.clone(),
                    pair_address: t.best_pair_address.clone(),
                })
                .collect();

            match source.fetch_token_batch(chain, &addresses).await {
                Ok(raw) => {
                    stats::track_api_call(chain, true).await;
                    let conn = pool.checkout()?;
                    let doc_id = staging::insert_document(&conn, chain, &token_refs, &raw, false)?;
                    outcome.staged += 1;
                    logger::debug(
                        LogTag::Fetcher,
                        &format!(
                            "Staged doc {} for {} tokens on {}",
                            doc_id,
                            token_refs.len(),
                            chain
                        ),
                    );
                }
                Err(e) => {
                    stats::track_api_call(chain, false).await;
                    outcome.failed_batches += 1;
                    logger::warning(
                        LogTag::Fetcher,
                        &format!(
                            "Batch of {} on {} failed: {}",
                            token_refs.len(),
                            chain,
                            e
                        ),
                    );

                    // Ledger-only record; failures are credited inline so the
                    // processor must not count this document again
                    {
                        let conn = pool.checkout()?;
                        staging::insert_document(&conn, chain, &token_refs, &Value::Null, true)?;
                    }

                    for token in batch {
                        if let Err(err) =
                            failures::record_failure(pool, source, token.token_id, &e).await
                        {
                            logger::error(
                                LogTag::Fetcher,
                                &format!(
                                    "Failure event error for token {}: {}",
                                    token.token_id, err
                                ),
                            );
                        }
                        stats::track_failure().await;
                    }
                }
            }
        }
    }

    Ok(outcome)
}

/// One fetch cycle against the global database
///
/// A selector error aborts the cycle before any API call is made.
pub async fn run_fetch_cycle() -> Result<FetchOutcome, String> {
    let pool = crate::database::get_pool()?;
    let api = crate::api::get_global_api()?;

    let due = {
        let conn = pool.checkout()?;
        selector::select_due_tokens(&conn, Utc::now(), SELECTION_LIMIT)?
    };

    stats::begin_cycle(due.len()).await;

    if due.is_empty() {
        stats::finish_cycle().await;
        logger::debug(LogTag::Fetcher, "No tokens due this cycle");
        return Ok(FetchOutcome::default());
    }

    let outcome = fetch_and_stage(&pool, api.as_ref(), &due).await;
    stats::finish_cycle().await;

    let outcome = outcome?;
    logger::info(
        LogTag::Fetcher,
        &format!(
            "Fetch cycle: {} due, {} batches, {} staged, {} failed",
            outcome.selected, outcome.batches, outcome.staged, outcome.failed_batches
        ),
    );
    Ok(outcome)
}

/// Fetch, stage and immediately process a specific set of tokens
///
/// On-demand path for callers that cannot wait for the next scheduled
/// cycle (e.g. right after registering new tokens).
pub async fn process_token_batch(token_ids: &[i64]) -> Result<FetchOutcome, String> {
    let pool = crate::database::get_pool()?;
    let api = crate::api::get_global_api()?;

    let token_list = {
        let conn = pool.checkout()?;
        tokens::get_tokens_by_ids(&conn, token_ids)?
    };
    if token_list.is_empty() {
        return Ok(FetchOutcome::default());
    }

    let outcome = fetch_and_stage(&pool, api.as_ref(), &token_list).await?;
    super::processor::process_pending(&pool, api.as_ref(), super::processor::PROCESS_BATCH_SIZE)
        .await?;
    Ok(outcome)
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Pair;
    use crate::database::schema;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Stub that fails batches for one chain and records request sizes
    struct StubSource {
        failing_chain: Option<String>,
        batch_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl PairSource for StubSource {
        async fn fetch_token_batch(
            &self,
            blockchain: &str,
            addresses: &[String],
        ) -> Result<serde_json::Value, String> {
            self.batch_sizes.lock().unwrap().push(addresses.len());
            if self.failing_chain.as_deref() == Some(blockchain) {
                return Err("connection refused".to_string());
            }
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

    fn temp_pool() -> (TempDir, Arc<ConnectionPool>) {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::with_limits(&dir.path().join("fetcher.db"), 1, 4).unwrap();
        {
            let conn = pool.checkout().unwrap();
            schema::initialize_schema(&conn).unwrap();
        }
        (dir, pool)
    }

    fn insert_tokens(pool: &Arc<ConnectionPool>, chain: &str, count: usize) -> Vec<TrackedToken> {
        let conn = pool.checkout().unwrap();
        let mut out = Vec::new();
        for i in 0..count {
            let id =
                tokens::insert_token(&conn, chain, &format!("0x{}{}", chain, i), None).unwrap();
            out.push(tokens::get_token(&conn, id).unwrap().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_batches_respect_api_limit() {
        let (_dir, pool) = temp_pool();
        let token_list = insert_tokens(&pool, "ethereum", 35);
        let source = StubSource {
            failing_chain: None,
            batch_sizes: Mutex::new(Vec::new()),
        };

        let outcome = fetch_and_stage(&pool, &source, &token_list).await.unwrap();
        assert_eq!(outcome.batches, 2);
        assert_eq!(outcome.staged, 2);
        assert_eq!(outcome.failed_batches, 0);

        let sizes = source.batch_sizes.lock().unwrap().clone();
        assert_eq!(sizes, vec![30, 5]);
    }

    #[tokio::test]
    async fn test_failed_batch_credits_failures_and_stages_ledger() {
        let (_dir, pool) = temp_pool();
        let mut token_list = insert_tokens(&pool, "bsc", 2);
        token_list.extend(insert_tokens(&pool, "ethereum", 2));
        let source = StubSource {
            failing_chain: Some("bsc".to_string()),
            batch_sizes: Mutex::new(Vec::new()),
        };

        let outcome = fetch_and_stage(&pool, &source, &token_list).await.unwrap();
        assert_eq!(outcome.batches, 2);
        assert_eq!(outcome.staged, 1);
        assert_eq!(outcome.failed_batches, 1);

        let conn = pool.checkout().unwrap();
        // The failed batch's document is ledger-only and not queued
        assert_eq!(staging::count_unprocessed(&conn).unwrap(), 1);

        for token in &token_list {
            let row = tokens::get_token(&conn, token.token_id).unwrap().unwrap();
            if row.blockchain == "bsc" {
                assert_eq!(row.failed_updates_count, 1);
            } else {
                assert_eq!(row.failed_updates_count, 0);
            }
        }
    }

    #[tokio::test]
    async fn test_chains_are_fetched_separately() {
        let (_dir, pool) = temp_pool();
        let mut token_list = insert_tokens(&pool, "base", 3);
        token_list.extend(insert_tokens(&pool, "ethereum", 3));
        let source = StubSource {
            failing_chain: None,
            batch_sizes: Mutex::new(Vec::new()),
        };

        let outcome = fetch_and_stage(&pool, &source, &token_list).await.unwrap();
        // One batch per chain even though both fit in a single API call
        assert_eq!(outcome.batches, 2);
    }
}
