//! SQLite storage for the tracker
//!
//! Three tables: `tokens` (tracking state), `price_metrics` (observations,
//! keyed by token and timestamp) and `staging_documents` (raw fetched
//! payloads awaiting processing). Access goes through a shared connection
//! pool, see `pool`.

pub mod metrics;
pub mod pool;
pub mod schema;
pub mod staging;
pub mod tokens;

use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;

use crate::logger::{self, LogTag};
pub use pool::{ConnectionPool, PooledConnection};

static POOL: OnceCell<Arc<ConnectionPool>> = OnceCell::new();

/// Open the database, run schema setup and install the global pool
///
/// A failure here is fatal for the process; callers should halt startup.
pub fn init(db_path: &Path) -> Result<(), String> {
    let pool = ConnectionPool::open(db_path)?;

    {
        let conn = pool.checkout()?;
        schema::initialize_schema(&conn)?;
    }

    POOL.set(pool)
        .map_err(|_| "Database already initialized".to_string())?;

    logger::info(
        LogTag::Database,
        &format!("Database ready at {}", db_path.display()),
    );
    Ok(())
}

/// Get the global connection pool
pub fn get_pool() -> Result<Arc<ConnectionPool>, String> {
    POOL.get()
        .cloned()
        .ok_or_else(|| "Database not initialized".to_string())
}
