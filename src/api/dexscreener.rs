// ===== DEXSCREENER API CLIENT =====
//
// Thin client over the DexScreener REST API. Two endpoints are used:
//   GET {base}/tokens/{addr1,addr2,...}   batched token lookup (max 30)
//   GET {base}/pairs/{chain}/{pair}       single pair lookup
//
// Concurrent requests are bounded by a semaphore so bursts of recovery
// probes cannot trip the upstream rate limit.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::PairSource;
use crate::errors::TrackerError;
use crate::logger::{self, LogTag};

/// Maximum addresses per batched token request (API limit)
pub const MAX_TOKENS_PER_BATCH: usize = 30;

/// HTTP request timeout
pub const API_TIMEOUT_SECS: u64 = 30;

/// Maximum concurrent in-flight requests
const MAX_CONCURRENT_REQUESTS: usize = 2;

// ===== RESPONSE TYPES =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnPeriod {
    pub buys: Option<i64>,
    pub sells: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnStats {
    pub m5: Option<TxnPeriod>,
    pub h1: Option<TxnPeriod>,
    pub h6: Option<TxnPeriod>,
    pub h24: Option<TxnPeriod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
    pub h6: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityInfo {
    pub usd: Option<f64>,
    pub base: Option<f64>,
    pub quote: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseToken {
    pub address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

/// One trading pair as reported by DexScreener
///
/// Price fields arrive as strings with currency formatting, so they are kept
/// as raw JSON values and parsed through `parse_float` on access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    pub pair_address: String,
    #[serde(default)]
    pub chain_id: Option<String>,
    #[serde(default)]
    pub dex_id: Option<String>,
    #[serde(default)]
    pub base_token: Option<BaseToken>,
    #[serde(default)]
    pub price_native: Option<Value>,
    #[serde(default)]
    pub price_usd: Option<Value>,
    #[serde(default)]
    pub txns: Option<TxnStats>,
    #[serde(default)]
    pub volume: Option<VolumeStats>,
    #[serde(default)]
    pub liquidity: Option<LiquidityInfo>,
    #[serde(default)]
    pub fdv: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
}

impl Pair {
    pub fn base_address(&self) -> Option<&str> {
        self.base_token.as_ref()?.address.as_deref()
    }

    pub fn price_native_f64(&self) -> Option<f64> {
        self.price_native.as_ref().and_then(parse_float)
    }

    pub fn price_usd_f64(&self) -> Option<f64> {
        self.price_usd.as_ref().and_then(parse_float)
    }

    pub fn liquidity_usd(&self) -> f64 {
        self.liquidity
            .as_ref()
            .and_then(|l| l.usd)
            .unwrap_or(0.0)
    }

    pub fn market_cap_f64(&self) -> f64 {
        self.market_cap.unwrap_or(0.0)
    }
}

/// Safely parse a float from a JSON value that may be a number or a
/// currency-formatted string ("$1,234.56")
pub fn parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = s.replace(',', "").replace('$', "");
            let cleaned = cleaned.trim();
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Decode the pairs array from a raw API payload, skipping malformed entries
pub fn extract_pairs(raw: &Value) -> Vec<Pair> {
    let elements = match raw.get("pairs").and_then(|p| p.as_array()) {
        Some(arr) => arr,
        None => return Vec::new(),
    };

    let mut pairs = Vec::with_capacity(elements.len());
    for element in elements {
        match serde_json::from_value::<Pair>(element.clone()) {
            Ok(pair) => pairs.push(pair),
            Err(e) => {
                logger::debug(LogTag::Api, &format!("Skipping malformed pair entry: {}", e));
            }
        }
    }
    pairs
}

/// Normalize chain identifiers to DexScreener's naming
pub fn normalize_chain(chain: &str) -> String {
    let lower = chain.to_lowercase();
    match lower.as_str() {
        "eth" => "ethereum".to_string(),
        _ => lower,
    }
}

// ===== CLIENT =====

pub struct DexScreenerApi {
    client: reqwest::Client,
    rate_limiter: Arc<Semaphore>,
    base_url: String,
}

impl DexScreenerApi {
    pub fn new(base_url: &str) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .user_agent("pricetracker/0.1")
            .build()
            .map_err(|e| TrackerError::transport("client_build", e))?;

        Ok(DexScreenerApi {
            client,
            rate_limiter: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, TrackerError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| TrackerError::transport("rate_limiter", e))?;

        logger::debug(LogTag::Api, &format!("GET {}", url));

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TrackerError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::transport(
                url,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TrackerError::data_shape(url, e))
    }

    /// Raw batched token lookup; addresses are joined with commas
    pub async fn fetch_tokens_raw(&self, addresses: &[String]) -> Result<Value, TrackerError> {
        if addresses.is_empty() {
            return Ok(serde_json::json!({ "pairs": [] }));
        }
        if addresses.len() > MAX_TOKENS_PER_BATCH {
            return Err(TrackerError::data_shape(
                "fetch_tokens_raw",
                format!("batch of {} exceeds limit {}", addresses.len(), MAX_TOKENS_PER_BATCH),
            ));
        }

        let url = format!("{}/tokens/{}", self.base_url, addresses.join(","));
        self.get_json(&url).await
    }

    /// Decoded batched token lookup
    pub async fn get_token_pairs(&self, addresses: &[String]) -> Result<Vec<Pair>, TrackerError> {
        let raw = self.fetch_tokens_raw(addresses).await?;
        Ok(extract_pairs(&raw))
    }

    /// Lookup one specific pair on a chain
    pub async fn get_pairs_by_address(
        &self,
        blockchain: &str,
        pair_address: &str,
    ) -> Result<Vec<Pair>, TrackerError> {
        let chain = normalize_chain(blockchain);
        let url = format!("{}/pairs/{}/{}", self.base_url, chain, pair_address);
        let raw = self.get_json(&url).await?;
        Ok(extract_pairs(&raw))
    }
}

#[async_trait]
impl PairSource for DexScreenerApi {
    async fn fetch_token_batch(
        &self,
        _blockchain: &str,
        addresses: &[String],
    ) -> Result<Value, String> {
        self.fetch_tokens_raw(addresses)
            .await
            .map_err(|e| e.to_string())
    }

    async fn pairs_for_token(
        &self,
        blockchain: &str,
        contract_address: &str,
    ) -> Result<Vec<Pair>, String> {
        let addresses = vec![contract_address.to_string()];
        let pairs = self
            .get_token_pairs(&addresses)
            .await
            .map_err(|e| e.to_string())?;

        // The tokens endpoint can return pairs from any chain for the same
        // address; keep only the requested chain when chainId is present.
        let chain = normalize_chain(blockchain);
        Ok(pairs
            .into_iter()
            .filter(|p| match &p.chain_id {
                Some(c) => c.to_lowercase() == chain,
                None => true,
            })
            .collect())
    }
}

// ===== GLOBAL INSTANCE =====

static GLOBAL_API: OnceCell<Arc<DexScreenerApi>> = OnceCell::new();

/// Create the shared API client; must be called once at startup
pub fn init_global_api(base_url: &str) -> Result<(), String> {
    let api = DexScreenerApi::new(base_url).map_err(|e| e.to_string())?;
    GLOBAL_API
        .set(Arc::new(api))
        .map_err(|_| "API client already initialized".to_string())
}

/// Get the shared API client
pub fn get_global_api() -> Result<Arc<DexScreenerApi>, String> {
    GLOBAL_API
        .get()
        .cloned()
        .ok_or_else(|| "API client not initialized".to_string())
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_float_number() {
        assert_eq!(parse_float(&json!(1.5)), Some(1.5));
        assert_eq!(parse_float(&json!(42)), Some(42.0));
    }

    #[test]
    fn test_parse_float_formatted_string() {
        assert_eq!(parse_float(&json!("$1,234.56")), Some(1234.56));
        assert_eq!(parse_float(&json!("  0.00042 ")), Some(0.00042));
    }

    #[test]
    fn test_parse_float_garbage() {
        assert_eq!(parse_float(&json!("")), None);
        assert_eq!(parse_float(&json!("n/a")), None);
        assert_eq!(parse_float(&json!(null)), None);
        assert_eq!(parse_float(&json!([1.0])), None);
    }

    #[test]
    fn test_normalize_chain() {
        assert_eq!(normalize_chain("ETH"), "ethereum");
        assert_eq!(normalize_chain("Base"), "base");
        assert_eq!(normalize_chain("bsc"), "bsc");
    }

    #[test]
    fn test_extract_pairs_skips_malformed() {
        let raw = json!({
            "pairs": [
                {
                    "pairAddress": "0xPAIR",
                    "chainId": "ethereum",
                    "baseToken": { "address": "0xTOKEN", "symbol": "TKN" },
                    "priceUsd": "1.25",
                    "liquidity": { "usd": 5000.0 }
                },
                { "noPairAddress": true }
            ]
        });

        let pairs = extract_pairs(&raw);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].pair_address, "0xPAIR");
        assert_eq!(pairs[0].base_address(), Some("0xTOKEN"));
        assert_eq!(pairs[0].price_usd_f64(), Some(1.25));
        assert_eq!(pairs[0].liquidity_usd(), 5000.0);
    }

    #[test]
    fn test_extract_pairs_null_payload() {
        assert!(extract_pairs(&json!({ "pairs": null })).is_empty());
        assert!(extract_pairs(&json!(null)).is_empty());
        assert!(extract_pairs(&json!({})).is_empty());
    }

    #[test]
    fn test_batch_limit_enforced() {
        let api = DexScreenerApi::new("https://example.invalid/latest/dex").unwrap();
        let addresses: Vec<String> = (0..31).map(|i| format!("0x{}", i)).collect();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let result = rt.block_on(api.fetch_tokens_raw(&addresses));
        assert!(result.is_err());
    }
}
