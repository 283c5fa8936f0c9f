// ===== SCHEMA AND CONNECTION SETUP =====

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Open a connection with the standard pragma configuration applied
pub fn create_configured_connection(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path)
        .map_err(|e| format!("Failed to open database {}: {}", path.display(), e))?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Apply WAL mode and performance pragmas to a connection
pub fn configure_connection(conn: &Connection) -> Result<(), String> {
    // journal_mode returns a row, so it cannot go through pragma_update
    conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))
        .map_err(|e| format!("Failed to enable WAL mode: {}", e))?;

    conn.busy_timeout(Duration::from_millis(5000))
        .map_err(|e| format!("Failed to set busy timeout: {}", e))?;

    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| format!("Failed to set synchronous: {}", e))?;

    conn.pragma_update(None, "cache_size", "-64000")
        .map_err(|e| format!("Failed to set cache size: {}", e))?;

    conn.pragma_update(None, "temp_store", "MEMORY")
        .map_err(|e| format!("Failed to set temp store: {}", e))?;

    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| format!("Failed to enable foreign keys: {}", e))?;

    Ok(())
}

/// Create all tables and indexes if they do not exist yet
pub fn initialize_schema(conn: &Connection) -> Result<(), String> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tokens (
            token_id INTEGER PRIMARY KEY AUTOINCREMENT,
            blockchain TEXT NOT NULL,
            contract_address TEXT NOT NULL,
            best_pair_address TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            failed_updates_count INTEGER NOT NULL DEFAULT 0,
            update_interval INTEGER NOT NULL DEFAULT 300,
            first_seen_liquidity REAL,
            last_updated_at TEXT,
            locked_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(contract_address, blockchain)
        )",
        [],
    )
    .map_err(|e| format!("Failed to create tokens table: {}", e))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS price_metrics (
            token_id INTEGER NOT NULL,
            pair_address TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            price_native REAL,
            price_usd REAL,
            txns_buys INTEGER,
            txns_sells INTEGER,
            volume REAL,
            liquidity_base REAL,
            liquidity_quote REAL,
            liquidity_usd REAL,
            fdv REAL,
            market_cap REAL,
            staging_ref INTEGER,
            PRIMARY KEY (token_id, timestamp),
            FOREIGN KEY (token_id) REFERENCES tokens(token_id)
        )",
        [],
    )
    .map_err(|e| format!("Failed to create price_metrics table: {}", e))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staging_documents (
            doc_id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            blockchain TEXT NOT NULL,
            tokens TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            raw_data TEXT NOT NULL
        )",
        [],
    )
    .map_err(|e| format!("Failed to create staging_documents table: {}", e))?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_tokens_active ON tokens(is_active, update_interval)",
        "CREATE INDEX IF NOT EXISTS idx_tokens_failed ON tokens(failed_updates_count)",
        "CREATE INDEX IF NOT EXISTS idx_staging_processed ON staging_documents(processed, doc_id)",
        "CREATE INDEX IF NOT EXISTS idx_metrics_token_time ON price_metrics(token_id, timestamp DESC)",
    ];

    for sql in indexes {
        conn.execute(sql, [])
            .map_err(|e| format!("Failed to create index: {}", e))?;
    }

    Ok(())
}
