pub mod dexscreener;

pub use dexscreener::{
    extract_pairs, get_global_api, init_global_api, normalize_chain, parse_float, DexScreenerApi,
    Pair, API_TIMEOUT_SECS, MAX_TOKENS_PER_BATCH,
};

use async_trait::async_trait;

/// Source of pair data for the pipeline
///
/// The fetcher and the recovery paths talk to the price API through this
/// trait so tests can substitute canned responses.
#[async_trait]
pub trait PairSource: Send + Sync {
    /// Fetch the raw payload for a batch of token addresses on one chain
    ///
    /// Returns the response body as-is; the payload is staged verbatim and
    /// interpreted later by the processor.
    async fn fetch_token_batch(
        &self,
        blockchain: &str,
        addresses: &[String],
    ) -> Result<serde_json::Value, String>;

    /// Fetch and decode the pairs currently listed for a single token
    ///
    /// Used by recovery and reactivation to probe whether a token still has
    /// a live market.
    async fn pairs_for_token(
        &self,
        blockchain: &str,
        contract_address: &str,
    ) -> Result<Vec<Pair>, String>;
}
