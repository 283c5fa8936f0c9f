// ===== CONNECTION POOL =====
//
// Small hand-rolled pool over rusqlite connections. Checkout probes each
// idle connection with `SELECT 1` and drops dead ones. When the pool is
// exhausted it replaces itself wholesale (debounced to once per window);
// if even that fails to yield a connection, a direct unpooled connection
// is handed out so a single busy burst never stalls the pipeline.

use rusqlite::Connection;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::schema;
use crate::logger::{self, LogTag};

/// Connections kept open when idle
pub const MIN_POOL_CONNECTIONS: usize = 2;

/// Hard cap on simultaneously checked-out pooled connections
pub const MAX_POOL_CONNECTIONS: usize = 10;

/// Minimum gap between two full pool replacements
const RESET_DEBOUNCE: Duration = Duration::from_secs(10);

pub struct ConnectionPool {
    db_path: PathBuf,
    min_connections: usize,
    max_connections: usize,
    idle: Mutex<VecDeque<Connection>>,
    checked_out: AtomicUsize,
    /// Bumped on every reset; stale guards are not returned to the pool
    generation: AtomicU64,
    last_reset: Mutex<Option<Instant>>,
    resets: AtomicU64,
}

impl ConnectionPool {
    /// Open a pool with the default limits
    pub fn open(db_path: &Path) -> Result<Arc<Self>, String> {
        Self::with_limits(db_path, MIN_POOL_CONNECTIONS, MAX_POOL_CONNECTIONS)
    }

    /// Open a pool with explicit limits; `min` must be at least 1 and no
    /// larger than `max`
    pub fn with_limits(db_path: &Path, min: usize, max: usize) -> Result<Arc<Self>, String> {
        if min == 0 || max < min {
            return Err(format!(
                "Invalid pool limits: min={} max={}",
                min, max
            ));
        }

        let pool = Arc::new(ConnectionPool {
            db_path: db_path.to_path_buf(),
            min_connections: min,
            max_connections: max,
            idle: Mutex::new(VecDeque::new()),
            checked_out: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            last_reset: Mutex::new(None),
            resets: AtomicU64::new(0),
        });

        {
            let mut idle = pool
                .idle
                .lock()
                .map_err(|_| "Pool idle lock poisoned".to_string())?;
            for _ in 0..min {
                idle.push_back(schema::create_configured_connection(db_path)?);
            }
        }

        Ok(pool)
    }

    /// Check out a connection, replacing the pool or falling back to a
    /// direct connection when exhausted
    pub fn checkout(self: &Arc<Self>) -> Result<PooledConnection, String> {
        let mut reset_attempted = false;

        loop {
            // Drain idle connections, probing each for liveness
            loop {
                let candidate = {
                    let mut idle = self
                        .idle
                        .lock()
                        .map_err(|_| "Pool idle lock poisoned".to_string())?;
                    idle.pop_front()
                };

                match candidate {
                    Some(conn) => {
                        if is_healthy(&conn) {
                            self.checked_out.fetch_add(1, Ordering::SeqCst);
                            return Ok(PooledConnection::pooled(
                                conn,
                                Arc::clone(self),
                                self.generation.load(Ordering::SeqCst),
                            ));
                        }
                        logger::warning(LogTag::Pool, "Dropping dead idle connection");
                    }
                    None => break,
                }
            }

            // Grow up to the cap
            if self.checked_out.load(Ordering::SeqCst) < self.max_connections {
                let conn = schema::create_configured_connection(&self.db_path)?;
                self.checked_out.fetch_add(1, Ordering::SeqCst);
                return Ok(PooledConnection::pooled(
                    conn,
                    Arc::clone(self),
                    self.generation.load(Ordering::SeqCst),
                ));
            }

            // Exhausted: one debounced full replacement, then retry once
            if !reset_attempted && self.request_reset() {
                reset_attempted = true;
                continue;
            }

            logger::warning(
                LogTag::Pool,
                "Pool exhausted, handing out direct connection",
            );
            let conn = schema::create_configured_connection(&self.db_path)?;
            return Ok(PooledConnection::direct(conn));
        }
    }

    /// Replace every pooled connection, debounced
    ///
    /// Returns false when a reset happened within the debounce window.
    pub fn request_reset(&self) -> bool {
        self.request_reset_at(Instant::now())
    }

    fn request_reset_at(&self, now: Instant) -> bool {
        {
            let mut last = match self.last_reset.lock() {
                Ok(guard) => guard,
                Err(_) => return false,
            };
            if let Some(prev) = *last {
                if now.duration_since(prev) < RESET_DEBOUNCE {
                    return false;
                }
            }
            *last = Some(now);
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.checked_out.store(0, Ordering::SeqCst);

        if let Ok(mut idle) = self.idle.lock() {
            idle.clear();
            for _ in 0..self.min_connections {
                match schema::create_configured_connection(&self.db_path) {
                    Ok(conn) => idle.push_back(conn),
                    Err(e) => {
                        logger::error(
                            LogTag::Pool,
                            &format!("Failed to refill pool after reset: {}", e),
                        );
                        break;
                    }
                }
            }
        }

        self.resets.fetch_add(1, Ordering::SeqCst);
        logger::warning(LogTag::Pool, "Pool fully replaced");
        true
    }

    /// Number of full replacements performed so far
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    /// Idle connections currently available
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|i| i.len()).unwrap_or(0)
    }
}

fn is_healthy(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .is_ok()
}

/// A checked-out connection; returns itself to the pool on drop
///
/// Direct (fallback) connections are simply closed on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Option<Arc<ConnectionPool>>,
    generation: u64,
}

impl PooledConnection {
    fn pooled(conn: Connection, pool: Arc<ConnectionPool>, generation: u64) -> Self {
        PooledConnection {
            conn: Some(conn),
            pool: Some(pool),
            generation,
        }
    }

    fn direct(conn: Connection) -> Self {
        PooledConnection {
            conn: Some(conn),
            pool: None,
            generation: 0,
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Invariant: conn is only taken in drop
        self.conn.as_ref().expect("connection already released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let (Some(conn), Some(pool)) = (self.conn.take(), self.pool.take()) {
            if self.generation != pool.generation.load(Ordering::SeqCst) {
                // Pool was replaced while this guard was out; just close
                return;
            }
            let _ = pool
                .checked_out
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                    Some(v.saturating_sub(1))
                });
            if let Ok(mut idle) = pool.idle.lock() {
                if idle.len() < pool.max_connections {
                    idle.push_back(conn);
                }
            }
        }
    }
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_pool(min: usize, max: usize) -> (TempDir, Arc<ConnectionPool>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pool_test.db");
        let pool = ConnectionPool::with_limits(&path, min, max).unwrap();
        (dir, pool)
    }

    #[test]
    fn test_checkout_and_return() {
        let (_dir, pool) = temp_pool(1, 2);
        assert_eq!(pool.idle_count(), 1);

        {
            let conn = pool.checkout().unwrap();
            assert!(conn.is_pooled());
            assert_eq!(pool.idle_count(), 0);
            conn.execute("CREATE TABLE t (x INTEGER)", []).unwrap();
        }

        // Returned on drop
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.db");
        assert!(ConnectionPool::with_limits(&path, 0, 5).is_err());
        assert!(ConnectionPool::with_limits(&path, 5, 2).is_err());
    }

    #[test]
    fn test_reset_is_debounced() {
        let (_dir, pool) = temp_pool(1, 1);
        let t0 = Instant::now();

        assert!(pool.request_reset_at(t0));
        assert!(!pool.request_reset_at(t0 + Duration::from_secs(3)));
        assert!(pool.request_reset_at(t0 + Duration::from_secs(11)));
        assert_eq!(pool.reset_count(), 2);
    }

    #[test]
    fn test_exhaustion_falls_back_to_direct() {
        let (_dir, pool) = temp_pool(1, 1);

        let c1 = pool.checkout().unwrap();
        assert!(c1.is_pooled());

        // Cap reached; the first exhausted checkout replaces the pool and
        // succeeds against the fresh generation.
        let c2 = pool.checkout().unwrap();
        assert!(c2.is_pooled());
        assert_eq!(pool.reset_count(), 1);

        // Still exhausted and inside the debounce window: direct fallback.
        let c3 = pool.checkout().unwrap();
        assert!(!c3.is_pooled());

        // Direct connections still reach the same database file.
        c3.execute("CREATE TABLE fallback_check (x INTEGER)", [])
            .unwrap();
        let count: i64 = c2
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'fallback_check'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_stale_guard_not_returned_after_reset() {
        let (_dir, pool) = temp_pool(1, 1);
        let c1 = pool.checkout().unwrap();

        assert!(pool.request_reset());
        let idle_after_reset = pool.idle_count();
        drop(c1);

        // The pre-reset guard must not rejoin the replaced pool
        assert_eq!(pool.idle_count(), idle_after_reset);
    }
}
