//! Engine registry
//!
//! A closed set of supported engines. Each variant maps to one [`Backend`]
//! implementation; a new engine is added by adding a variant, its tags and its
//! backend module.
//!
//! | Engine | Tags | Driver | Feature |
//! |--------|------|--------|---------|
//! | SQLite | `sqlite`, `sqlite3` | `rusqlite` (bundled) | always |
//! | PostgreSQL | `postgres`, `postgresql`, `pg` | `postgres` | `postgres` |

use std::fmt;
use std::str::FromStr;

use crate::database::core::{Backend, ConnectArgs, DbError, DbResult, PlaceholderStyle};

#[cfg(feature = "postgres")]
mod postgres_conn;
mod sqlite_conn;

#[cfg(feature = "postgres")]
pub use postgres_conn::PostgresBackend;
pub use sqlite_conn::SqliteBackend;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Sqlite,
    Postgres,
}

impl Engine {
    pub const ALL: [Engine; 2] = [Engine::Sqlite, Engine::Postgres];

    /// Look up an engine by its (case-insensitive) tag
    ///
    /// Only checks the registry; use [`Engine::resolve`] to also require the driver.
    pub fn from_name(name: &str) -> DbResult<Engine> {
        let normalized = name.trim().to_ascii_lowercase();
        Engine::ALL
            .into_iter()
            .find(|e| e.tags().contains(&normalized.as_str()))
            .ok_or_else(|| DbError::UnsupportedEngine(name.to_string()))
    }

    /// Look up an engine and make sure its driver is part of this build
    pub fn resolve(name: &str) -> DbResult<Engine> {
        let engine = Engine::from_name(name)?;
        if !engine.is_available() {
            return Err(DbError::DriverUnavailable(engine.to_string()));
        }
        Ok(engine)
    }

    /// Engines whose driver is compiled in
    pub fn available() -> Vec<Engine> {
        Engine::ALL.into_iter().filter(|e| e.is_available()).collect()
    }

    pub fn is_available(&self) -> bool {
        match self {
            Engine::Sqlite => true,
            Engine::Postgres => cfg!(feature = "postgres"),
        }
    }

    pub fn tags(&self) -> &'static [&'static str] {
        match self {
            Engine::Sqlite => &["sqlite", "sqlite3"],
            Engine::Postgres => &["postgres", "postgresql", "pg"],
        }
    }

    /// Canonical tag, as used in configuration files
    pub fn tag(&self) -> &'static str {
        match self {
            Engine::Sqlite => "sqlite3",
            Engine::Postgres => "postgresql",
        }
    }

    pub fn placeholder_style(&self) -> PlaceholderStyle {
        match self {
            Engine::Sqlite => PlaceholderStyle::QuestionMark,
            Engine::Postgres => PlaceholderStyle::Numbered,
        }
    }

    /// Open a physical connection
    pub(crate) fn open(&self, args: &ConnectArgs) -> DbResult<Box<dyn Backend>> {
        match self {
            Engine::Sqlite => Ok(Box::new(SqliteBackend::open(args)?)),
            Engine::Postgres => open_postgres(args),
        }
    }
}

#[cfg(feature = "postgres")]
fn open_postgres(args: &ConnectArgs) -> DbResult<Box<dyn Backend>> {
    Ok(Box::new(PostgresBackend::open(args)?))
}

#[cfg(not(feature = "postgres"))]
fn open_postgres(_args: &ConnectArgs) -> DbResult<Box<dyn Backend>> {
    Err(DbError::DriverUnavailable(Engine::Postgres.to_string()))
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Sqlite => write!(f, "SQLite"),
            Engine::Postgres => write!(f, "PostgreSQL"),
        }
    }
}

impl FromStr for Engine {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Engine::from_name(s)
    }
}

/// Log argument keys an engine does not understand
pub(crate) fn report_unknown_args(engine: Engine, args: &ConnectArgs, known: &[&str]) {
    for (key, _) in args.iter() {
        if !known.contains(&key) {
            tracing::debug!("ignoring unknown {} connection argument '{}'", engine, key);
        }
    }
}
