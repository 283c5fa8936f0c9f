use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A token under price tracking
///
/// `update_interval` is the polling tier in seconds (30/300/3600/86400).
/// `best_pair_address` is sticky: once adopted it only changes through the
/// recovery path, never during routine processing.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedToken {
    pub token_id: i64,
    pub blockchain: String,
    pub contract_address: String,
    pub best_pair_address: Option<String>,
    pub is_active: bool,
    pub failed_updates_count: i64,
    pub update_interval: i64,
    pub first_seen_liquidity: Option<f64>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One price observation for a token, keyed by (token_id, timestamp)
#[derive(Debug, Clone, PartialEq)]
pub struct PriceMetric {
    pub token_id: i64,
    pub pair_address: String,
    pub timestamp: DateTime<Utc>,
    pub price_native: Option<f64>,
    pub price_usd: Option<f64>,
    pub txns_buys: Option<i64>,
    pub txns_sells: Option<i64>,
    pub volume: Option<f64>,
    pub liquidity_base: Option<f64>,
    pub liquidity_quote: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub fdv: Option<f64>,
    pub market_cap: Option<f64>,
    /// Staging document this metric was derived from
    pub staging_ref: Option<i64>,
}

/// Identity snapshot of a token captured at fetch time
///
/// Stored inside a staging document so processing does not depend on the
/// token row still looking the way it did when the batch was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedTokenRef {
    pub token_id: i64,
    pub contract_address: String,
    pub pair_address: Option<String>,
}

/// A raw API payload staged for asynchronous processing
#[derive(Debug, Clone)]
pub struct StagingDocument {
    pub doc_id: i64,
    pub created_at: DateTime<Utc>,
    pub blockchain: String,
    pub tokens: Vec<StagedTokenRef>,
    pub processed: bool,
    pub raw_data: serde_json::Value,
}

/// In-memory record of a token's recent failures (diagnostics only,
/// the authoritative counter lives on the token row)
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub token_id: i64,
    pub blockchain: String,
    pub contract_address: String,
    pub count: i64,
    pub last_error: String,
    pub last_seen: DateTime<Utc>,
}

/// Parse an RFC3339 timestamp as stored in the database
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&now.to_rfc3339()).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn test_bad_timestamp_is_none() {
        assert!(parse_timestamp("not-a-date").is_none());
        assert!(parse_timestamp("").is_none());
    }
}
