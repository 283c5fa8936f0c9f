// ===== TOKEN STORE =====
//
// Row-level access to the tokens table. All failure-state mutation goes
// through the claim/release pair so concurrent workers never interleave a
// read-modify-write on the same token.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};

use crate::types::{parse_timestamp, TrackedToken};

/// Seconds after which an unreleased claim is considered abandoned
///
/// Must stay well above the HTTP request timeout: a recovery probe that runs
/// to the transport deadline still holds its claim.
pub const CLAIM_TIMEOUT_SECS: i64 = 90;

const TOKEN_COLUMNS: &str = "token_id, blockchain, contract_address, best_pair_address, \
     is_active, failed_updates_count, update_interval, first_seen_liquidity, \
     last_updated_at, created_at";

fn row_to_token(row: &rusqlite::Row) -> rusqlite::Result<TrackedToken> {
    let last_updated: Option<String> = row.get(8)?;
    let created: String = row.get(9)?;

    Ok(TrackedToken {
        token_id: row.get(0)?,
        blockchain: row.get(1)?,
        contract_address: row.get(2)?,
        best_pair_address: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        failed_updates_count: row.get(5)?,
        update_interval: row.get(6)?,
        first_seen_liquidity: row.get(7)?,
        last_updated_at: last_updated.as_deref().and_then(parse_timestamp),
        created_at: parse_timestamp(&created).unwrap_or_else(Utc::now),
    })
}

/// Register a token for tracking; returns the existing row id when the
/// (contract, blockchain) pair is already known
pub fn insert_token(
    conn: &Connection,
    blockchain: &str,
    contract_address: &str,
    first_seen_liquidity: Option<f64>,
) -> Result<i64, String> {
    conn.execute(
        "INSERT INTO tokens (blockchain, contract_address, first_seen_liquidity, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(contract_address, blockchain) DO NOTHING",
        params![
            blockchain,
            contract_address,
            first_seen_liquidity,
            Utc::now().to_rfc3339()
        ],
    )
    .map_err(|e| format!("Failed to insert token {}: {}", contract_address, e))?;

    conn.query_row(
        "SELECT token_id FROM tokens WHERE contract_address = ?1 AND blockchain = ?2",
        params![contract_address, blockchain],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to look up token {}: {}", contract_address, e))
}

pub fn get_token(conn: &Connection, token_id: i64) -> Result<Option<TrackedToken>, String> {
    conn.query_row(
        &format!("SELECT {} FROM tokens WHERE token_id = ?1", TOKEN_COLUMNS),
        params![token_id],
        row_to_token,
    )
    .optional()
    .map_err(|e| format!("Failed to get token {}: {}", token_id, e))
}

pub fn get_all_tokens(conn: &Connection) -> Result<Vec<TrackedToken>, String> {
    query_tokens(conn, &format!("SELECT {} FROM tokens", TOKEN_COLUMNS), &[])
}

pub fn get_active_tokens(conn: &Connection) -> Result<Vec<TrackedToken>, String> {
    query_tokens(
        conn,
        &format!("SELECT {} FROM tokens WHERE is_active = 1", TOKEN_COLUMNS),
        &[],
    )
}

pub fn get_tokens_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<TrackedToken>, String> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let id_list: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    query_tokens(
        conn,
        &format!(
            "SELECT {} FROM tokens WHERE token_id IN ({})",
            TOKEN_COLUMNS,
            id_list.join(",")
        ),
        &[],
    )
}

/// Tokens that crossed the failure threshold, optionally scoped to a chain
pub fn get_failing_tokens(
    conn: &Connection,
    min_failures: i64,
    blockchain: Option<&str>,
    include_inactive: bool,
    limit: usize,
) -> Result<Vec<TrackedToken>, String> {
    let mut sql = format!(
        "SELECT {} FROM tokens WHERE failed_updates_count >= ?1",
        TOKEN_COLUMNS
    );
    let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(min_failures)];

    if let Some(chain) = blockchain {
        sql.push_str(" AND blockchain = ?2");
        values.push(Box::new(chain.to_string()));
    }
    if !include_inactive {
        sql.push_str(" AND is_active = 1");
    }
    sql.push_str(&format!(
        " ORDER BY failed_updates_count DESC LIMIT {}",
        limit
    ));

    let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
    query_tokens(conn, &sql, refs.as_slice())
}

pub fn get_inactive_tokens(conn: &Connection, limit: usize) -> Result<Vec<TrackedToken>, String> {
    query_tokens(
        conn,
        &format!(
            "SELECT {} FROM tokens WHERE is_active = 0 ORDER BY last_updated_at ASC LIMIT {}",
            TOKEN_COLUMNS, limit
        ),
        &[],
    )
}

/// Per-chain count of tokens with at least one recorded failure, most
/// affected chain first
pub fn failure_counts_by_blockchain(conn: &Connection) -> Result<Vec<(String, i64)>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT blockchain, COUNT(*) FROM tokens
             WHERE failed_updates_count > 0
             GROUP BY blockchain ORDER BY COUNT(*) DESC",
        )
        .map_err(|e| format!("Failed to prepare failure counts: {}", e))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| format!("Failed to query failure counts: {}", e))?;

    let mut counts = Vec::new();
    for row in rows {
        counts.push(row.map_err(|e| format!("Failed to read failure count row: {}", e))?);
    }
    Ok(counts)
}

fn query_tokens(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<TrackedToken>, String> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| format!("Failed to prepare token query: {}", e))?;

    let rows = stmt
        .query_map(params, row_to_token)
        .map_err(|e| format!("Failed to query tokens: {}", e))?;

    let mut tokens = Vec::new();
    for row in rows {
        tokens.push(row.map_err(|e| format!("Failed to read token row: {}", e))?);
    }
    Ok(tokens)
}

// ===== ROW CLAIMS =====

/// Try to claim a token row for exclusive mutation
///
/// The claim succeeds when the row is unclaimed or the existing claim is
/// older than `CLAIM_TIMEOUT_SECS` (abandoned by a crashed worker). Returns
/// false when another worker holds a live claim.
pub fn try_claim(conn: &Connection, token_id: i64, now: DateTime<Utc>) -> Result<bool, String> {
    let stale_cutoff = now - Duration::seconds(CLAIM_TIMEOUT_SECS);
    let updated = conn
        .execute(
            "UPDATE tokens SET locked_at = ?1
             WHERE token_id = ?2 AND (locked_at IS NULL OR locked_at < ?3)",
            params![now.to_rfc3339(), token_id, stale_cutoff.to_rfc3339()],
        )
        .map_err(|e| format!("Failed to claim token {}: {}", token_id, e))?;
    Ok(updated > 0)
}

pub fn release_claim(conn: &Connection, token_id: i64) -> Result<(), String> {
    conn.execute(
        "UPDATE tokens SET locked_at = NULL WHERE token_id = ?1",
        params![token_id],
    )
    .map_err(|e| format!("Failed to release claim on token {}: {}", token_id, e))?;
    Ok(())
}

/// Bump the consecutive failure counter and return the new value
pub fn increment_failures(conn: &Connection, token_id: i64) -> Result<i64, String> {
    conn.execute(
        "UPDATE tokens SET failed_updates_count = failed_updates_count + 1 WHERE token_id = ?1",
        params![token_id],
    )
    .map_err(|e| format!("Failed to increment failures for token {}: {}", token_id, e))?;

    conn.query_row(
        "SELECT failed_updates_count FROM tokens WHERE token_id = ?1",
        params![token_id],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read failure count for token {}: {}", token_id, e))
}

// ===== CONDITIONAL UPDATES =====

/// Builder for partial token updates
///
/// Only the fields that were explicitly set appear in the generated SQL, so
/// concurrent writers never clobber columns they did not touch.
#[derive(Debug, Clone, Default)]
pub struct TokenPatch {
    best_pair_address: Option<String>,
    is_active: Option<bool>,
    failed_updates_count: Option<i64>,
    update_interval: Option<i64>,
    last_updated_at: Option<DateTime<Utc>>,
    first_seen_liquidity: Option<f64>,
}

impl TokenPatch {
    pub fn new() -> Self {
        TokenPatch::default()
    }

    pub fn best_pair(mut self, address: &str) -> Self {
        self.best_pair_address = Some(address.to_string());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.is_active = Some(active);
        self
    }

    pub fn failures(mut self, count: i64) -> Self {
        self.failed_updates_count = Some(count);
        self
    }

    pub fn interval(mut self, seconds: i64) -> Self {
        self.update_interval = Some(seconds);
        self
    }

    pub fn touched(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated_at = Some(at);
        self
    }

    pub fn first_seen_liquidity(mut self, liquidity: f64) -> Self {
        self.first_seen_liquidity = Some(liquidity);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.best_pair_address.is_none()
            && self.is_active.is_none()
            && self.failed_updates_count.is_none()
            && self.update_interval.is_none()
            && self.last_updated_at.is_none()
            && self.first_seen_liquidity.is_none()
    }

    fn to_sql(&self) -> (Vec<&'static str>, Vec<Box<dyn ToSql>>) {
        let mut sets: Vec<&'static str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(v) = &self.best_pair_address {
            sets.push("best_pair_address = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = self.is_active {
            sets.push("is_active = ?");
            values.push(Box::new(v as i64));
        }
        if let Some(v) = self.failed_updates_count {
            sets.push("failed_updates_count = ?");
            values.push(Box::new(v));
        }
        if let Some(v) = self.update_interval {
            sets.push("update_interval = ?");
            values.push(Box::new(v));
        }
        if let Some(v) = self.last_updated_at {
            sets.push("last_updated_at = ?");
            values.push(Box::new(v.to_rfc3339()));
        }
        if let Some(v) = self.first_seen_liquidity {
            sets.push("first_seen_liquidity = ?");
            values.push(Box::new(v));
        }

        (sets, values)
    }

    /// Apply the patch; returns false when the patch was empty or the token
    /// does not exist
    pub fn apply(&self, conn: &Connection, token_id: i64) -> Result<bool, String> {
        if self.is_empty() {
            return Ok(false);
        }

        let (sets, mut values) = self.to_sql();
        values.push(Box::new(token_id));

        let sql = format!(
            "UPDATE tokens SET {} WHERE token_id = ?",
            sets.join(", ")
        );
        let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();

        let updated = conn
            .execute(&sql, refs.as_slice())
            .map_err(|e| format!("Failed to patch token {}: {}", token_id, e))?;
        Ok(updated > 0)
    }
}

// ===== TESTS =====
