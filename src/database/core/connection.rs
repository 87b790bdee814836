//! Connection and cursor management
//!
//! This module provides the engine-neutral [`Connection`] and [`Cursor`] types. The
//! engine-specific work (opening the physical link, binding values, running a
//! statement) lives behind the [`Backend`] trait; everything that must behave the
//! same on every engine (closed-state checks, implicit transactions, placeholder
//! rewriting, result buffering) lives here.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info};

use super::error::{DbError, DbResult};
use super::placeholder::{rewrite_placeholders, PlaceholderStyle};
use super::statement::StatementKind;
use super::value::{ConnectArgs, Row, Value};
use crate::database::engine::Engine;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Buffered outcome of one statement on an engine
#[derive(Debug, Default)]
pub struct Execution {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Affected rows, or produced rows for statements with result columns
    pub rowcount: i64,
    pub lastrowid: Option<i64>,
}

/// Engine-specific physical connection
///
/// Implementations own the native handle. Placeholders are already in the
/// engine's native syntax when `execute` is called.
pub trait Backend: Send {
    fn execute(&mut self, statement: &str, params: &[Value]) -> DbResult<Execution>;

    fn begin(&mut self) -> DbResult<()>;

    fn commit(&mut self) -> DbResult<()>;

    fn rollback(&mut self) -> DbResult<()>;

    fn in_transaction(&self) -> bool;

    fn close(self: Box<Self>) -> DbResult<()>;
}

type SharedBackend = Mutex<Option<Box<dyn Backend>>>;

fn lock_backend(handle: &SharedBackend) -> MutexGuard<'_, Option<Box<dyn Backend>>> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One live link to a database engine
///
/// The connection exclusively owns its native handle. Cursors only hold a weak
/// reference to it, so once the connection is closed or dropped every cursor
/// operation fails with [`DbError::ClosedConnection`].
pub struct Connection {
    id: u64,
    engine: Engine,
    handle: Arc<SharedBackend>,
}

impl Connection {
    /// Open a connection on an already resolved engine
    pub fn connect(engine: Engine, args: &ConnectArgs) -> DbResult<Self> {
        let backend = engine.open(args)?;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        info!("opened {} connection #{}", engine, id);
        Ok(Connection {
            id,
            engine,
            handle: Arc::new(Mutex::new(Some(backend))),
        })
    }

    /// Resolve `engine_name` and open a connection
    pub fn open(engine_name: &str, args: &ConnectArgs) -> DbResult<Self> {
        let engine = Engine::resolve(engine_name)?;
        Self::connect(engine, args)
    }

    /// Process-unique identifier of the underlying handle
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn is_closed(&self) -> bool {
        lock_backend(&self.handle).is_none()
    }

    pub fn in_transaction(&self) -> bool {
        lock_backend(&self.handle)
            .as_ref()
            .is_some_and(|b| b.in_transaction())
    }

    /// Create a new cursor bound to this connection
    pub fn cursor(&self) -> DbResult<Cursor> {
        if self.is_closed() {
            return Err(DbError::ClosedConnection);
        }
        Ok(Cursor::new(
            Arc::downgrade(&self.handle),
            self.engine.placeholder_style(),
        ))
    }

    /// Commit the current transaction
    pub fn commit(&self) -> DbResult<()> {
        let mut guard = lock_backend(&self.handle);
        let backend = guard
            .as_mut()
            .ok_or_else(|| DbError::connection("cannot commit: connection is closed"))?;
        backend.commit()
    }

    /// Roll back the current transaction
    pub fn rollback(&self) -> DbResult<()> {
        let mut guard = lock_backend(&self.handle);
        let backend = guard
            .as_mut()
            .ok_or_else(|| DbError::connection("cannot roll back: connection is closed"))?;
        backend.rollback()
    }

    /// Close the connection. Closing twice is a no-op.
    ///
    /// The connection counts as closed even if the engine reports an error while
    /// releasing the handle; that error is still returned.
    pub fn close(&self) -> DbResult<()> {
        let backend = lock_backend(&self.handle).take();
        match backend {
            Some(backend) => {
                info!("closing {} connection #{}", self.engine, self.id);
                backend.close()
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("engine", &self.engine)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Statement-execution context bound to a [`Connection`]
///
/// Each `execute` replaces the buffered result of the previous one.
pub struct Cursor {
    handle: Weak<SharedBackend>,
    style: PlaceholderStyle,
    columns: Vec<String>,
    rows: VecDeque<Row>,
    rowcount: i64,
    lastrowid: Option<i64>,
    executed: bool,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("style", &self.style)
            .field("columns", &self.columns)
            .field("buffered_rows", &self.rows.len())
            .field("rowcount", &self.rowcount)
            .field("lastrowid", &self.lastrowid)
            .finish()
    }
}

impl Cursor {
    fn new(handle: Weak<SharedBackend>, style: PlaceholderStyle) -> Self {
        Cursor {
            handle,
            style,
            columns: Vec::new(),
            rows: VecDeque::new(),
            rowcount: -1,
            lastrowid: None,
            executed: false,
        }
    }

    /// Run `statement` on the owning connection
    ///
    /// Without parameters the statement is sent as written. With parameters, every
    /// `%s` marker is rewritten to the engine's native syntax and bound
    /// positionally. Unless a transaction is already active, one is opened first
    /// for everything except transaction control and statements that cannot run
    /// inside a transaction block (`VACUUM`, `PRAGMA`, `CREATE DATABASE`, ...).
    /// Returns the cursor for chaining.
    pub fn execute(&mut self, statement: &str, params: Option<&[Value]>) -> DbResult<&mut Self> {
        let handle = self.handle.upgrade().ok_or(DbError::ClosedConnection)?;
        let mut guard = lock_backend(&handle);
        let backend = guard.as_mut().ok_or(DbError::ClosedConnection)?;

        let (sql, values) = match params {
            Some(values) => (rewrite_placeholders(statement, self.style), values),
            None => (statement.to_string(), &[][..]),
        };

        if StatementKind::of(&sql).opens_transaction() && !backend.in_transaction() {
            backend.begin()?;
        }

        debug!(statement = %sql, params = values.len(), "executing statement");
        let execution = backend.execute(&sql, values)?;

        self.columns = execution.columns;
        self.rows = execution.rows.into();
        self.rowcount = execution.rowcount;
        self.lastrowid = execution.lastrowid;
        self.executed = true;
        Ok(self)
    }

    /// Run `statement` once per parameter set; `rowcount` is the sum over all runs
    pub fn execute_many(&mut self, statement: &str, param_sets: &[Vec<Value>]) -> DbResult<&mut Self> {
        let mut total = 0i64;
        for params in param_sets {
            self.execute(statement, Some(params))?;
            total += self.rowcount.max(0);
        }
        self.rows.clear();
        self.columns.clear();
        self.rowcount = total;
        self.executed = true;
        Ok(self)
    }

    fn ensure_readable(&self) -> DbResult<()> {
        let handle = self.handle.upgrade().ok_or(DbError::ClosedConnection)?;
        if lock_backend(&handle).is_none() {
            return Err(DbError::ClosedConnection);
        }
        if !self.executed {
            return Err(DbError::CursorState(
                "fetch called before execute".to_string(),
            ));
        }
        Ok(())
    }

    /// Next row, or `None` once the result is exhausted
    pub fn fetchone(&mut self) -> DbResult<Option<Row>> {
        self.ensure_readable()?;
        Ok(self.rows.pop_front())
    }

    /// Up to `size` of the remaining rows
    pub fn fetchmany(&mut self, size: usize) -> DbResult<Vec<Row>> {
        self.ensure_readable()?;
        let n = size.min(self.rows.len());
        Ok(self.rows.drain(..n).collect())
    }

    /// All remaining rows, in order
    pub fn fetchall(&mut self) -> DbResult<Vec<Row>> {
        self.ensure_readable()?;
        Ok(self.rows.drain(..).collect())
    }

    /// Rows affected or produced by the last execute; `-1` before any execute
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    /// Row id of the last inserted row, where the engine reports one
    pub fn lastrowid(&self) -> Option<i64> {
        self.lastrowid
    }

    /// Column names of the last result
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DbErrorKind;

    fn memory() -> Connection {
        Connection::connect(Engine::Sqlite, &ConnectArgs::new()).unwrap()
    }

    #[test]
    fn test_execute_and_fetch() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        cur.execute("CREATE TABLE t (x INTEGER, y TEXT)", None).unwrap();
        cur.execute(
            "INSERT INTO t (x, y) VALUES (%s, %s), (%s, %s)",
            Some(&[1.into(), "a".into(), 2.into(), "b".into()]),
        )
        .unwrap();
        assert_eq!(cur.rowcount(), 2);

        let row = cur
            .execute("SELECT x, y FROM t ORDER BY x", None)
            .unwrap()
            .fetchone()
            .unwrap()
            .unwrap();
        assert_eq!(row.values(), &[Value::Integer(1), Value::from("a")]);
        assert_eq!(cur.columns(), &["x".to_string(), "y".to_string()]);

        let rest = cur.fetchall().unwrap();
        assert_eq!(rest.len(), 1);
        assert!(cur.fetchone().unwrap().is_none());
        assert!(cur.fetchall().unwrap().is_empty());
    }

    #[test]
    fn test_fetch_before_execute() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        assert_eq!(cur.rowcount(), -1);
        assert_eq!(cur.fetchone().unwrap_err().kind(), DbErrorKind::CursorState);
        assert_eq!(cur.fetchall().unwrap_err().kind(), DbErrorKind::CursorState);

        // recoverable: execute then fetch again
        cur.execute("SELECT 1", None).unwrap();
        assert_eq!(cur.fetchone().unwrap(), Some(Row(vec![Value::Integer(1)])));
    }

    #[test]
    fn test_fetchmany() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        cur.execute("CREATE TABLE t (x)", None).unwrap();
        cur.execute_many(
            "INSERT INTO t VALUES (%s)",
            &[vec![Value::from(1)], vec![Value::from(2)], vec![Value::from(3)]],
        )
        .unwrap();
        assert_eq!(cur.rowcount(), 3);

        cur.execute("SELECT x FROM t ORDER BY x", None).unwrap();
        assert_eq!(cur.fetchmany(2).unwrap().len(), 2);
        assert_eq!(cur.fetchmany(2).unwrap().len(), 1);
        assert!(cur.fetchmany(2).unwrap().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let conn = memory();
        assert!(!conn.is_closed());
        conn.close().unwrap();
        assert!(conn.is_closed());
        conn.close().unwrap();
    }

    #[test]
    fn test_operations_after_close() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        cur.execute("SELECT 1", None).unwrap();
        conn.close().unwrap();

        assert_eq!(conn.cursor().unwrap_err().kind(), DbErrorKind::ClosedConnection);
        assert_eq!(
            cur.execute("SELECT 1", None).unwrap_err().kind(),
            DbErrorKind::ClosedConnection
        );
        assert_eq!(cur.fetchone().unwrap_err().kind(), DbErrorKind::ClosedConnection);
        assert_eq!(conn.commit().unwrap_err().kind(), DbErrorKind::Connection);
        assert_eq!(conn.rollback().unwrap_err().kind(), DbErrorKind::Connection);
    }

    #[test]
    fn test_cursor_outliving_connection() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        drop(conn);
        assert_eq!(
            cur.execute("SELECT 1", None).unwrap_err().kind(),
            DbErrorKind::ClosedConnection
        );
    }

    #[test]
    fn test_implicit_transaction_and_rollback() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        cur.execute("CREATE TABLE t (x)", None).unwrap();
        conn.commit().unwrap();
        assert!(!conn.in_transaction());

        cur.execute("INSERT INTO t VALUES (%s)", Some(&[7.into()])).unwrap();
        assert!(conn.in_transaction());
        conn.rollback().unwrap();

        cur.execute("SELECT COUNT(*) FROM t", None).unwrap();
        assert_eq!(cur.fetchone().unwrap(), Some(Row(vec![Value::Integer(0)])));
    }

    #[test]
    fn test_commit_without_transaction_fails() {
        let conn = memory();
        let err = conn.commit().unwrap_err();
        assert_eq!(err.kind(), DbErrorKind::Connection);
    }

    #[test]
    fn test_query_error_carries_diagnostic() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        let err = cur.execute("SELEC 1", None).unwrap_err();
        assert_eq!(err.kind(), DbErrorKind::Query);
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_unresolvable_engine() {
        let err = Connection::open("oracle", &ConnectArgs::new()).unwrap_err();
        assert_eq!(err.kind(), DbErrorKind::UnsupportedEngine);
    }

    #[test]
    fn test_percent_s_sent_literally_without_params() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        let row = cur.execute("SELECT '%s'", None).unwrap().fetchone().unwrap();
        assert_eq!(row, Some(Row(vec![Value::from("%s")])));
    }

    #[test]
    fn test_placeholder_count_mismatch() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        let err = cur
            .execute("SELECT %s, %s", Some(&[Value::from(1)]))
            .unwrap_err();
        assert_eq!(err.kind(), DbErrorKind::Query);
    }

    #[test]
    fn test_rowcount_after_ddl() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        cur.execute("CREATE TABLE t (x)", None).unwrap();
        assert_eq!(cur.rowcount(), -1);

        cur.execute("INSERT INTO t VALUES (1), (2), (3)", None).unwrap();
        assert_eq!(cur.rowcount(), 3);
        assert_eq!(cur.lastrowid(), Some(3));

        cur.execute("CREATE TABLE u (y)", None).unwrap();
        assert_eq!(cur.rowcount(), -1);
        assert_eq!(cur.lastrowid(), None);

        cur.execute("UPDATE t SET x = x + 1 WHERE x > 1", None).unwrap();
        assert_eq!(cur.rowcount(), 2);
        assert_eq!(cur.lastrowid(), None);
    }

    #[test]
    fn test_vacuum_and_pragma_run_outside_transaction() {
        let temp_dir = tempfile::tempdir().unwrap();
        let args = ConnectArgs::new().with("database", temp_dir.path().join("v.sqlite3").display());
        let conn = Connection::connect(Engine::Sqlite, &args).unwrap();
        let mut cur = conn.cursor().unwrap();
        cur.execute("CREATE TABLE t (x)", None).unwrap();
        cur.execute("INSERT INTO t VALUES (1)", None).unwrap();
        conn.commit().unwrap();

        cur.execute("VACUUM", None).unwrap();
        assert!(!conn.in_transaction());

        let mode = cur
            .execute("PRAGMA journal_mode=WAL", None)
            .unwrap()
            .fetchone()
            .unwrap();
        assert_eq!(mode, Some(Row(vec![Value::from("wal")])));
        assert!(!conn.in_transaction());
    }

    #[test]
    fn test_commented_begin_is_transaction_control() {
        let conn = memory();
        let mut cur = conn.cursor().unwrap();
        cur.execute("CREATE TABLE t (x)", None).unwrap();
        conn.commit().unwrap();

        cur.execute("-- explicit\nBEGIN", None).unwrap();
        assert!(conn.in_transaction());
        cur.execute("INSERT INTO t VALUES (1)", None).unwrap();
        cur.execute("/* done */ COMMIT", None).unwrap();
        assert!(!conn.in_transaction());
    }

    #[test]
    fn test_cursor_debug() {
        let conn = memory();
        let cur = conn.cursor().unwrap();
        let shown = format!("{:?}", cur);
        assert!(shown.starts_with("Cursor"));
        assert!(shown.contains("rowcount: -1"));
    }
}
