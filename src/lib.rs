#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Keystone - uniform database access and server-side sessions
//!
//! Keystone exposes one connection/cursor interface over several database
//! engines, a bounded connection pool, and a session object for transient
//! per-client state. It can be used as both a command-line application and
//! a library.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (always) | SQLite engine, pool, sessions, configuration | `rusqlite`, `config` |
//! | `postgres` | PostgreSQL engine | `postgres`, `bytes` |
//! | `cli` | The `keystone` binary | `clap`, `tabled`, `tracing-subscriber` |
//! | `full` | All of the above | |
//!
//! Engines whose feature is disabled stay in the registry: looking them up by
//! name succeeds, connecting fails with [`DbError::DriverUnavailable`].
//!
//! # Architecture
//!
//! - **[`database`]**: engine registry, connections, cursors and the pool
//! - **[`session`]**: session identifiers and the session object
//! - **[`config`]**: configuration file and environment handling
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use keystone::{ConnectArgs, Pool, Value};
//!
//! let pool = Pool::new("sqlite3", ConnectArgs::new())?;
//! let conn = pool.connect()?;
//! let mut cur = conn.cursor()?;
//! cur.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", None)?;
//! cur.execute("INSERT INTO users (name) VALUES (%s)", Some(&[Value::from("alice")]))?;
//! conn.commit()?;
//!
//! for row in cur.execute("SELECT id, name FROM users", None)?.fetchall()? {
//!     println!("{:?}", row);
//! }
//! ```
//!
//! ## Sessions
//!
//! ```rust,ignore
//! use keystone::Session;
//!
//! let mut session = Session::new();
//! session.set("user_id", 42);
//! assert!(session.is_changed());
//! ```

pub mod config;
pub mod database;
pub mod session;

pub use config::{DatabaseSettings, KeystoneConfig, SessionSettings};

pub use database::{
    ConnectArgs, Connection, Cursor, DbError, DbErrorKind, DbResult, Engine, PlaceholderStyle,
    Pool, PoolConfig, PoolStats, PooledConnection, Row, Value,
};

pub use session::{Session, SessionError, SessionId, SessionRecord};
