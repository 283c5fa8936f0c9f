// ===== PRICE METRIC STORE =====

use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{parse_timestamp, PriceMetric};

/// Insert a metric row, replacing an existing observation at the same
/// (token_id, timestamp). Reprocessing a staging document is therefore
/// idempotent.
pub fn upsert_metric(conn: &Connection, metric: &PriceMetric) -> Result<(), String> {
    conn.execute(
        "INSERT INTO price_metrics (
            token_id, pair_address, timestamp, price_native, price_usd,
            txns_buys, txns_sells, volume, liquidity_base, liquidity_quote,
            liquidity_usd, fdv, market_cap, staging_ref
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(token_id, timestamp) DO UPDATE SET
            pair_address = excluded.pair_address,
            price_native = excluded.price_native,
            price_usd = excluded.price_usd,
            txns_buys = excluded.txns_buys,
            txns_sells = excluded.txns_sells,
            volume = excluded.volume,
            liquidity_base = excluded.liquidity_base,
            liquidity_quote = excluded.liquidity_quote,
            liquidity_usd = excluded.liquidity_usd,
            fdv = excluded.fdv,
            market_cap = excluded.market_cap,
            staging_ref = excluded.staging_ref",
        params![
            metric.token_id,
            metric.pair_address,
            metric.timestamp.to_rfc3339(),
            metric.price_native,
            metric.price_usd,
            metric.txns_buys,
            metric.txns_sells,
            metric.volume,
            metric.liquidity_base,
            metric.liquidity_quote,
            metric.liquidity_usd,
            metric.fdv,
            metric.market_cap,
            metric.staging_ref,
        ],
    )
    .map_err(|e| format!("Failed to upsert metric for token {}: {}", metric.token_id, e))?;
    Ok(())
}

fn row_to_metric(row: &rusqlite::Row) -> rusqlite::Result<PriceMetric> {
    let ts: String = row.get(2)?;
    Ok(PriceMetric {
        token_id: row.get(0)?,
        pair_address: row.get(1)?,
        timestamp: parse_timestamp(&ts).unwrap_or_else(chrono::Utc::now),
        price_native: row.get(3)?,
        price_usd: row.get(4)?,
        txns_buys: row.get(5)?,
        txns_sells: row.get(6)?,
        volume: row.get(7)?,
        liquidity_base: row.get(8)?,
        liquidity_quote: row.get(9)?,
        liquidity_usd: row.get(10)?,
        fdv: row.get(11)?,
        market_cap: row.get(12)?,
        staging_ref: row.get(13)?,
    })
}

/// Most recent observation for a token, if any
pub fn latest_metric(conn: &Connection, token_id: i64) -> Result<Option<PriceMetric>, String> {
    conn.query_row(
        "SELECT token_id, pair_address, timestamp, price_native, price_usd,
                txns_buys, txns_sells, volume, liquidity_base, liquidity_quote,
                liquidity_usd, fdv, market_cap, staging_ref
         FROM price_metrics WHERE token_id = ?1
         ORDER BY timestamp DESC LIMIT 1",
        params![token_id],
        row_to_metric,
    )
    .optional()
    .map_err(|e| format!("Failed to get latest metric for token {}: {}", token_id, e))
}

pub fn metric_count(conn: &Connection, token_id: i64) -> Result<i64, String> {
    conn.query_row(
        "SELECT COUNT(*) FROM price_metrics WHERE token_id = ?1",
        params![token_id],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to count metrics for token {}: {}", token_id, e))
}

// ===== TESTS =====
