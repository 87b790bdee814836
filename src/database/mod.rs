//! Database module
//!
//! Uniform database access over several engines, organized into:
//!
//! - **core**: engine-neutral connection/cursor interface, values and errors
//! - **engine**: the engine registry and one backend per engine
//! - **pool**: bounded connection pool
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/              # Foundation
//! │   ├── connection     # Connection, Cursor, Backend trait
//! │   ├── placeholder    # %s -> native placeholder rewriting
//! │   ├── value          # Value, Row, ConnectArgs
//! │   └── error          # DbError taxonomy
//! │
//! ├── engine/            # Registry
//! │   ├── sqlite_conn    # rusqlite backend
//! │   └── postgres_conn  # postgres backend (feature "postgres")
//! │
//! └── pool               # Checkout/check-in pool
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use keystone::database::{ConnectArgs, Pool, Value};
//!
//! let pool = Pool::new("sqlite3", ConnectArgs::new().with("database", "app.sqlite3"))?;
//! let conn = pool.connect()?;
//! let mut cur = conn.cursor()?;
//! cur.execute("INSERT INTO users (name) VALUES (%s)", Some(&[Value::from("alice")]))?;
//! conn.commit()?;
//!
//! let rows = cur.execute("SELECT name FROM users", None)?.fetchall()?;
//! ```

pub mod core;
pub mod engine;
pub mod pool;

pub use core::{
    rewrite_placeholders, Backend, ConnectArgs, Connection, Cursor, DbError, DbErrorKind,
    DbResult, Execution, PlaceholderStyle, Row, Value,
};
pub use engine::{Engine, SqliteBackend};
pub use pool::{
    Pool, PoolConfig, PoolStats, PooledConnection, DEFAULT_ACQUIRE_TIMEOUT,
    DEFAULT_MAX_CONNECTIONS,
};

#[cfg(feature = "postgres")]
pub use engine::PostgresBackend;
