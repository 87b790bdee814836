//! SQLite backend
//!
//! Thin wrapper around a `rusqlite` connection, opened from [`ConnectArgs`]:
//!
//! - `database` (alias `path`): database file, `:memory:` by default
//! - `timeout`: busy timeout in seconds (fractional allowed)
//! - `read_only`: open without write access; the file must already exist
//! - `journal_mode`: optional `PRAGMA journal_mode` value, one of `DELETE`,
//!   `TRUNCATE`, `PERSIST`, `MEMORY`, `WAL` or `OFF`
//!
//! For statements without result columns, `rowcount` is the number of changed
//! rows for DML and `-1` otherwise; `lastrowid` is only reported after an insert.

use std::time::Duration;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};

use super::{report_unknown_args, Engine};
use crate::database::core::{
    Backend, ConnectArgs, DbError, DbResult, Execution, Row, StatementKind, Value,
};

const KNOWN_ARGS: &[&str] = &["database", "path", "timeout", "read_only", "journal_mode"];

const JOURNAL_MODES: &[&str] = &["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];

/// Physical SQLite connection
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn open(args: &ConnectArgs) -> DbResult<Self> {
        report_unknown_args(Engine::Sqlite, args, KNOWN_ARGS);

        let path = args.get_any(&["database", "path"]).unwrap_or(":memory:");
        let read_only = args.get_parsed::<bool>("read_only")?.unwrap_or(false);

        let conn = match (path, read_only) {
            (":memory:", _) => Connection::open_in_memory()
                .map_err(|e| DbError::connection(format!("Failed to create in-memory database: {}", e)))?,
            (p, true) => Connection::open_with_flags(
                p,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| DbError::connection(format!("Failed to open database at '{}': {}", p, e)))?,
            (p, false) => Connection::open(p)
                .map_err(|e| DbError::connection(format!("Failed to open database at '{}': {}", p, e)))?,
        };

        let backend = SqliteBackend { conn };
        backend.configure(args)?;
        Ok(backend)
    }

    fn configure(&self, args: &ConnectArgs) -> DbResult<()> {
        if let Some(secs) = args.get_parsed::<f64>("timeout")? {
            if !secs.is_finite() || secs < 0.0 {
                return Err(DbError::connection(format!("invalid busy timeout: {}", secs)));
            }
            self.conn
                .busy_timeout(Duration::from_secs_f64(secs))
                .map_err(|e| DbError::connection(format!("Failed to set busy timeout: {}", e)))?;
        }

        if let Some(mode) = args.get("journal_mode") {
            let mode = mode.trim().to_ascii_uppercase();
            if !JOURNAL_MODES.contains(&mode.as_str()) {
                return Err(DbError::connection(format!(
                    "invalid journal_mode '{}', expected one of {}",
                    mode,
                    JOURNAL_MODES.join(", ")
                )));
            }
            let _: String = self
                .conn
                .query_row(&format!("PRAGMA journal_mode={}", mode), [], |row| row.get(0))
                .map_err(|e| DbError::connection(format!("Failed to set journal mode: {}", e)))?;
        }

        // Enable foreign keys
        self.conn
            .execute("PRAGMA foreign_keys=ON", [])
            .map_err(|e| DbError::connection(format!("Failed to enable foreign keys: {}", e)))?;

        Ok(())
    }

    fn control(&self, sql: &str, what: &str) -> DbResult<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| DbError::connection(format!("Failed to {}: {}", what, e)))
    }
}

fn query_error(e: rusqlite::Error) -> DbError {
    DbError::query(e.to_string())
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*b as i64)),
        })
    }
}

impl Backend for SqliteBackend {
    fn execute(&mut self, statement: &str, params: &[Value]) -> DbResult<Execution> {
        let mut stmt = self.conn.prepare(statement).map_err(query_error)?;
        let column_count = stmt.column_count();

        if column_count == 0 {
            let affected = stmt
                .execute(params_from_iter(params.iter()))
                .map_err(query_error)?;
            // sqlite3_changes() is left over from the last DML statement after DDL
            let kind = StatementKind::of(statement);
            return Ok(Execution {
                columns: Vec::new(),
                rows: Vec::new(),
                rowcount: if kind.is_dml() { affected as i64 } else { -1 },
                lastrowid: (kind == StatementKind::Insert).then(|| self.conn.last_insert_rowid()),
            });
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(query_error)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(query_error)? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(from_value_ref(row.get_ref(i).map_err(query_error)?));
            }
            out.push(Row(values));
        }

        Ok(Execution {
            columns,
            rowcount: out.len() as i64,
            rows: out,
            lastrowid: None,
        })
    }

    fn begin(&mut self) -> DbResult<()> {
        self.control("BEGIN", "begin transaction")
    }

    fn commit(&mut self) -> DbResult<()> {
        self.control("COMMIT", "commit")
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.control("ROLLBACK", "roll back")
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn close(self: Box<Self>) -> DbResult<()> {
        let SqliteBackend { conn } = *self;
        conn.close()
            .map_err(|(_, e)| DbError::connection(format!("Failed to close database: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DbErrorKind;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let backend = SqliteBackend::open(&ConnectArgs::new());
        assert!(backend.is_ok());
    }

    #[test]
    fn test_open_file_with_options() {
        let temp_dir = setup_test_dir();
        let path = temp_dir.path().join("opts.sqlite3");
        let args = ConnectArgs::new()
            .with("database", path.display())
            .with("timeout", "1.5")
            .with("journal_mode", "WAL")
            .with("unknown_key", "ignored");

        let mut backend = SqliteBackend::open(&args).unwrap();
        let result = backend.execute("PRAGMA journal_mode", &[]).unwrap();
        assert_eq!(result.rows[0].values(), &[Value::from("wal")]);
        assert!(path.exists());
    }

    #[test]
    fn test_read_only_missing_file() {
        let temp_dir = setup_test_dir();
        let path = temp_dir.path().join("missing.sqlite3");
        let args = ConnectArgs::new()
            .with("database", path.display())
            .with("read_only", true);

        let err = SqliteBackend::open(&args).err().unwrap();
        assert_eq!(err.kind(), DbErrorKind::Connection);
    }

    #[test]
    fn test_value_round_trip_types() {
        let mut backend = SqliteBackend::open(&ConnectArgs::new()).unwrap();
        backend
            .execute("CREATE TABLE v (i INTEGER, r REAL, t TEXT, b BLOB, n, f INTEGER)", &[])
            .unwrap();
        let inserted = backend
            .execute(
                "INSERT INTO v VALUES (?, ?, ?, ?, ?, ?)",
                &[
                    Value::Integer(-3),
                    Value::Real(0.25),
                    Value::from("héllo"),
                    Value::Blob(vec![0, 1, 255]),
                    Value::Null,
                    Value::Boolean(true),
                ],
            )
            .unwrap();
        assert_eq!(inserted.rowcount, 1);
        assert_eq!(inserted.lastrowid, Some(1));

        let result = backend.execute("SELECT * FROM v", &[]).unwrap();
        assert_eq!(result.columns, vec!["i", "r", "t", "b", "n", "f"]);
        assert_eq!(
            result.rows[0].values(),
            &[
                Value::Integer(-3),
                Value::Real(0.25),
                Value::from("héllo"),
                Value::Blob(vec![0, 1, 255]),
                Value::Null,
                Value::Integer(1),
            ]
        );
    }

    #[test]
    fn test_constraint_violation_is_query_error() {
        let mut backend = SqliteBackend::open(&ConnectArgs::new()).unwrap();
        backend
            .execute("CREATE TABLE u (id INTEGER PRIMARY KEY, name TEXT UNIQUE)", &[])
            .unwrap();
        backend
            .execute("INSERT INTO u (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        let err = backend
            .execute("INSERT INTO u (name) VALUES (?)", &[Value::from("a")])
            .unwrap_err();
        assert_eq!(err.kind(), DbErrorKind::Query);
        assert!(err.to_string().contains("UNIQUE"));
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let mut backend = SqliteBackend::open(&ConnectArgs::new()).unwrap();
        let err = backend.execute("SELECT ?, ?", &[Value::Integer(1)]).unwrap_err();
        assert_eq!(err.kind(), DbErrorKind::Query);
    }

    #[test]
    fn test_invalid_journal_mode_rejected() {
        let temp_dir = setup_test_dir();
        let args = ConnectArgs::new()
            .with("database", temp_dir.path().join("j.sqlite3").display())
            .with("journal_mode", "WAL; DROP TABLE t");
        let err = SqliteBackend::open(&args).err().unwrap();
        assert_eq!(err.kind(), DbErrorKind::Connection);
        assert!(err.to_string().contains("invalid journal_mode"));

        let args = ConnectArgs::new().with("journal_mode", "memory");
        assert!(SqliteBackend::open(&args).is_ok());
    }

    #[test]
    fn test_ddl_does_not_report_stale_changes() {
        let mut backend = SqliteBackend::open(&ConnectArgs::new()).unwrap();
        backend.execute("CREATE TABLE t (x)", &[]).unwrap();
        let inserted = backend
            .execute("INSERT INTO t VALUES (1), (2), (3)", &[])
            .unwrap();
        assert_eq!(inserted.rowcount, 3);
        assert_eq!(inserted.lastrowid, Some(3));

        let created = backend.execute("CREATE TABLE u (y)", &[]).unwrap();
        assert_eq!(created.rowcount, -1);
        assert_eq!(created.lastrowid, None);

        let deleted = backend.execute("DELETE FROM t WHERE x < 3", &[]).unwrap();
        assert_eq!(deleted.rowcount, 2);
        assert_eq!(deleted.lastrowid, None);
    }
}
