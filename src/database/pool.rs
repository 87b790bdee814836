//! Bounded connection pool
//!
//! A [`Pool`] lends out connections for one logical database target. Connections
//! are opened lazily, handed out exclusively through a [`PooledConnection`] guard,
//! and checked back in when the guard is dropped.
//!
//! With the default capacity of one connection the pool behaves like a lazily
//! created shared connection, except that a second caller waits (up to the acquire
//! timeout) instead of sharing in-flight transaction state.
//!
//! Check-in rules:
//! - a closed connection is discarded and its slot freed
//! - a connection with an open transaction is rolled back first; if that fails
//!   it is closed and discarded
//! - after [`Pool::close`] returned connections are closed

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::core::{ConnectArgs, Connection, DbError, DbResult};
use super::engine::Engine;

/// Default number of connections a pool may hold
pub const DEFAULT_MAX_CONNECTIONS: usize = 1;

/// Default time to wait for a free connection
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Logical engine name, e.g. `sqlite3` or `postgresql`
    pub engine: String,
    /// Arguments passed to every new connection
    pub args: ConnectArgs,
    /// Maximum number of open connections
    pub max_connections: usize,
    /// How long `connect` waits for a free connection; `None` waits forever
    pub acquire_timeout: Option<Duration>,
}

impl PoolConfig {
    pub fn new(engine: impl Into<String>, args: ConnectArgs) -> Self {
        Self {
            engine: engine.into(),
            args,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Some(DEFAULT_ACQUIRE_TIMEOUT),
        }
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the acquire timeout
    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    fn validate(&self) -> DbResult<()> {
        if self.max_connections == 0 {
            return Err(DbError::PoolConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_connections: usize,
    pub idle_connections: usize,
    pub in_use_connections: usize,
    pub max_connections: usize,
}

struct PoolState {
    /// Idle connections; the most recently returned one is reused first
    idle: Vec<Connection>,
    /// Open connections, idle or checked out
    total: usize,
    closed: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
    max_connections: usize,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_in(&self, conn: Connection) {
        let mut keep = !conn.is_closed();

        if keep && conn.in_transaction() {
            debug!("rolling back open transaction on connection #{}", conn.id());
            if let Err(e) = conn.rollback() {
                warn!("discarding connection #{}: {}", conn.id(), e);
                keep = false;
            }
        }

        let mut state = self.lock();
        if keep && state.closed {
            keep = false;
        }

        if keep {
            debug!("connection #{} checked in", conn.id());
            state.idle.push(conn);
        } else {
            state.total = state.total.saturating_sub(1);
            drop(state);
            if !conn.is_closed() {
                if let Err(e) = conn.close() {
                    warn!("failed to close discarded connection #{}: {}", conn.id(), e);
                }
            } else {
                debug!("closed connection #{} released from pool", conn.id());
            }
        }
        self.available.notify_one();
    }
}

/// Reusable set of connections for one engine and argument set
///
/// The engine is resolved once, when the pool is built, so a misconfigured engine
/// name fails at startup rather than on first use. The pool is `Send + Sync` and
/// is meant to be shared (e.g. behind an `Arc`).
pub struct Pool {
    engine: Engine,
    args: ConnectArgs,
    acquire_timeout: Option<Duration>,
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Create a pool with default capacity and timeout
    pub fn new(engine: &str, args: ConnectArgs) -> DbResult<Self> {
        Self::with_config(PoolConfig::new(engine, args))
    }

    /// Create a pool from a full configuration
    pub fn with_config(config: PoolConfig) -> DbResult<Self> {
        config.validate()?;
        let engine = Engine::resolve(&config.engine)?;

        info!(
            "created {} pool (max {} connections)",
            engine, config.max_connections
        );

        Ok(Pool {
            engine,
            args: config.args,
            acquire_timeout: config.acquire_timeout,
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    total: 0,
                    closed: false,
                }),
                available: Condvar::new(),
                max_connections: config.max_connections,
            }),
        })
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn max_connections(&self) -> usize {
        self.shared.max_connections
    }

    /// Check out a connection, waiting up to the acquire timeout
    pub fn connect(&self) -> DbResult<PooledConnection> {
        self.acquire(true)
    }

    /// Check out a connection without waiting
    pub fn try_connect(&self) -> DbResult<PooledConnection> {
        self.acquire(false)
    }

    fn acquire(&self, wait: bool) -> DbResult<PooledConnection> {
        let deadline = self.acquire_timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.lock();

        loop {
            if state.closed {
                return Err(DbError::PoolClosed);
            }

            if let Some(conn) = state.idle.pop() {
                debug!("reusing pooled connection #{}", conn.id());
                return Ok(self.guard(conn));
            }

            if state.total < self.shared.max_connections {
                state.total += 1;
                drop(state);
                return match Connection::connect(self.engine, &self.args) {
                    Ok(conn) => {
                        debug!("added connection #{} to pool", conn.id());
                        Ok(self.guard(conn))
                    }
                    Err(e) => {
                        let mut state = self.shared.lock();
                        state.total = state.total.saturating_sub(1);
                        drop(state);
                        self.shared.available.notify_one();
                        Err(e)
                    }
                };
            }

            let exhausted = DbError::PoolExhausted {
                max_connections: self.shared.max_connections,
            };
            if !wait {
                return Err(exhausted);
            }

            state = match deadline {
                None => self
                    .shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(exhausted);
                    }
                    self.shared
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn guard(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            total_connections: state.total,
            idle_connections: state.idle.len(),
            in_use_connections: state.total.saturating_sub(state.idle.len()),
            max_connections: self.shared.max_connections,
        }
    }

    /// Close idle connections and refuse further checkouts
    ///
    /// Connections still checked out are closed when they come back.
    pub fn close(&self) {
        let idle = {
            let mut state = self.shared.lock();
            state.closed = true;
            let idle: Vec<Connection> = state.idle.drain(..).collect();
            state.total = state.total.saturating_sub(idle.len());
            idle
        };
        info!("closing {} pool ({} idle connections)", self.engine, idle.len());
        for conn in idle {
            if let Err(e) = conn.close() {
                warn!("failed to close connection #{}: {}", conn.id(), e);
            }
        }
        self.shared.available.notify_all();
    }
}

/// A connection checked out of a [`Pool`]; returned to the pool on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    shared: Arc<PoolShared>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // only None while being dropped
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.check_in(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DbErrorKind, Row, Value};
    use std::thread;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn file_args(dir: &TempDir) -> ConnectArgs {
        ConnectArgs::new().with("database", dir.path().join("pool.sqlite3").display())
    }

    #[test]
    fn test_construct_fails_fast() {
        let err = Pool::new("oracle", ConnectArgs::new()).err().unwrap();
        assert_eq!(err.kind(), DbErrorKind::UnsupportedEngine);

        let config = PoolConfig::new("sqlite3", ConnectArgs::new()).max_connections(0);
        let err = Pool::with_config(config).err().unwrap();
        assert_eq!(err.kind(), DbErrorKind::PoolConfig);
    }

    #[test]
    fn test_construct_is_lazy() {
        let pool = Pool::new("SQLite3", ConnectArgs::new()).unwrap();
        assert_eq!(pool.engine(), Engine::Sqlite);
        assert_eq!(pool.stats().total_connections, 0);
    }

    #[test]
    fn test_sequential_connect_reuses_connection() {
        let pool = Pool::new("sqlite3", ConnectArgs::new()).unwrap();
        let first_id = {
            let conn = pool.connect().unwrap();
            conn.id()
        };
        let conn = pool.connect().unwrap();
        assert_eq!(conn.id(), first_id);
        assert_eq!(pool.stats().total_connections, 1);
    }

    #[test]
    fn test_create_commit_reconnect_select() {
        let temp_dir = setup_test_dir();
        let pool = Pool::new("sqlite3", file_args(&temp_dir)).unwrap();

        {
            let conn = pool.connect().unwrap();
            let mut cur = conn.cursor().unwrap();
            cur.execute("CREATE TABLE t(x)", None).unwrap();
            conn.commit().unwrap();
        }

        let conn = pool.connect().unwrap();
        let mut cur = conn.cursor().unwrap();
        let rows = cur.execute("SELECT * FROM t", None).unwrap().fetchall().unwrap();
        assert!(rows.is_empty());
        assert_eq!(cur.rowcount(), 0);
    }

    #[test]
    fn test_insert_rowcount() {
        let temp_dir = setup_test_dir();
        let pool = Pool::new("sqlite3", file_args(&temp_dir)).unwrap();
        let conn = pool.connect().unwrap();
        let mut cur = conn.cursor().unwrap();
        cur.execute("CREATE TABLE t(x)", None).unwrap();
        cur.execute(
            "INSERT INTO t VALUES (%s), (%s), (%s)",
            Some(&[Value::from(1), Value::from(2), Value::from(3)]),
        )
        .unwrap();
        assert_eq!(cur.rowcount(), 3);
        conn.commit().unwrap();
    }

    #[test]
    fn test_exhausted_when_capacity_reached() {
        let config = PoolConfig::new("sqlite3", ConnectArgs::new())
            .acquire_timeout(Some(Duration::from_millis(20)));
        let pool = Pool::with_config(config).unwrap();

        let held = pool.connect().unwrap();
        assert_eq!(pool.try_connect().err().unwrap().kind(), DbErrorKind::PoolExhausted);
        assert_eq!(pool.connect().err().unwrap().kind(), DbErrorKind::PoolExhausted);

        drop(held);
        assert!(pool.try_connect().is_ok());
    }

    #[test]
    fn test_grows_up_to_capacity() {
        let config = PoolConfig::new("sqlite3", ConnectArgs::new()).max_connections(2);
        let pool = Pool::with_config(config).unwrap();

        let a = pool.connect().unwrap();
        let b = pool.connect().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(
            pool.stats(),
            PoolStats {
                total_connections: 2,
                idle_connections: 0,
                in_use_connections: 2,
                max_connections: 2,
            }
        );
        drop(a);
        assert_eq!(pool.stats().idle_connections, 1);
    }

    #[test]
    fn test_closed_connection_is_discarded() {
        let pool = Pool::new("sqlite3", ConnectArgs::new()).unwrap();
        let first_id = {
            let conn = pool.connect().unwrap();
            conn.close().unwrap();
            conn.id()
        };
        assert_eq!(pool.stats().total_connections, 0);

        let conn = pool.connect().unwrap();
        assert_ne!(conn.id(), first_id);
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_uncommitted_work_rolled_back_on_check_in() {
        let temp_dir = setup_test_dir();
        let pool = Pool::new("sqlite3", file_args(&temp_dir)).unwrap();
        {
            let conn = pool.connect().unwrap();
            let mut cur = conn.cursor().unwrap();
            cur.execute("CREATE TABLE t(x)", None).unwrap();
            conn.commit().unwrap();
            cur.execute("INSERT INTO t VALUES (%s)", Some(&[Value::from(1)]))
                .unwrap();
        }

        let conn = pool.connect().unwrap();
        assert!(!conn.in_transaction());
        let mut cur = conn.cursor().unwrap();
        cur.execute("SELECT COUNT(*) FROM t", None).unwrap();
        assert_eq!(cur.fetchone().unwrap(), Some(Row(vec![Value::Integer(0)])));
    }

    #[test]
    fn test_waiter_gets_returned_connection() {
        let pool = Arc::new(Pool::new("sqlite3", ConnectArgs::new()).unwrap());
        let held = pool.connect().unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.connect().map(|c| c.id()))
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);

        let id = waiter.join().unwrap().unwrap();
        assert_eq!(id, held_id);
    }

    #[test]
    fn test_close_pool() {
        let pool = Pool::new("sqlite3", ConnectArgs::new()).unwrap();
        let conn = pool.connect().unwrap();
        pool.close();
        assert_eq!(pool.connect().err().unwrap().kind(), DbErrorKind::PoolClosed);

        drop(conn);
        assert_eq!(pool.stats().total_connections, 0);
    }

    #[test]
    fn test_failed_open_frees_slot() {
        let temp_dir = setup_test_dir();
        let args = ConnectArgs::new()
            .with("database", temp_dir.path().join("missing.sqlite3").display())
            .with("read_only", true);
        let pool = Pool::new("sqlite3", args).unwrap();

        assert_eq!(pool.connect().err().unwrap().kind(), DbErrorKind::Connection);
        assert_eq!(pool.stats().total_connections, 0);
    }
}
