//! Database error taxonomy
//!
//! Every fallible operation of the database layer returns [`DbError`]. Callers that need
//! to branch on the failure (e.g. reconnect on a connection error) match on
//! [`DbError::kind`] instead of inspecting message text.

use std::fmt;

/// Result alias used throughout the database layer
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Fieldless classification of a [`DbError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorKind {
    UnsupportedEngine,
    DriverUnavailable,
    Connection,
    ClosedConnection,
    Query,
    CursorState,
    PoolExhausted,
    PoolClosed,
    PoolConfig,
}

/// Errors raised by engines, connections, cursors and the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Logical engine name is not in the registry
    UnsupportedEngine(String),
    /// Engine is known but its driver was not compiled into this build
    DriverUnavailable(String),
    /// Connect, commit or rollback failed at the engine level
    ConnectionError(String),
    /// Operation attempted on a closed (or dropped) connection
    ClosedConnection,
    /// Statement failed; carries the engine diagnostic
    QueryError(String),
    /// Fetch attempted before any execute
    CursorState(String),
    /// No connection became available within the acquire timeout
    PoolExhausted { max_connections: usize },
    /// The pool was shut down
    PoolClosed,
    /// Invalid pool configuration
    PoolConfig(String),
}

impl DbError {
    pub fn kind(&self) -> DbErrorKind {
        match self {
            DbError::UnsupportedEngine(_) => DbErrorKind::UnsupportedEngine,
            DbError::DriverUnavailable(_) => DbErrorKind::DriverUnavailable,
            DbError::ConnectionError(_) => DbErrorKind::Connection,
            DbError::ClosedConnection => DbErrorKind::ClosedConnection,
            DbError::QueryError(_) => DbErrorKind::Query,
            DbError::CursorState(_) => DbErrorKind::CursorState,
            DbError::PoolExhausted { .. } => DbErrorKind::PoolExhausted,
            DbError::PoolClosed => DbErrorKind::PoolClosed,
            DbError::PoolConfig(_) => DbErrorKind::PoolConfig,
        }
    }

    pub(crate) fn connection(message: impl Into<String>) -> Self {
        DbError::ConnectionError(message.into())
    }

    pub(crate) fn query(message: impl Into<String>) -> Self {
        DbError::QueryError(message.into())
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::UnsupportedEngine(name) => write!(f, "Unsupported database engine: '{}'", name),
            DbError::DriverUnavailable(engine) => write!(
                f,
                "No driver available for {} databases in this build",
                engine
            ),
            DbError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            DbError::ClosedConnection => write!(f, "Connection is closed"),
            DbError::QueryError(msg) => write!(f, "Query error: {}", msg),
            DbError::CursorState(msg) => write!(f, "Invalid cursor state: {}", msg),
            DbError::PoolExhausted { max_connections } => write!(
                f,
                "Connection pool timeout: all {} connections in use",
                max_connections
            ),
            DbError::PoolClosed => write!(f, "Connection pool is closed"),
            DbError::PoolConfig(msg) => write!(f, "Invalid pool configuration: {}", msg),
        }
    }
}

impl std::error::Error for DbError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(
            DbError::UnsupportedEngine("oracle".into()).kind(),
            DbErrorKind::UnsupportedEngine
        );
        assert_eq!(
            DbError::DriverUnavailable("PostgreSQL".into()).kind(),
            DbErrorKind::DriverUnavailable
        );
        assert_eq!(DbError::ClosedConnection.kind(), DbErrorKind::ClosedConnection);
        assert_ne!(
            DbError::UnsupportedEngine("x".into()).kind(),
            DbError::DriverUnavailable("x".into()).kind()
        );
    }

    #[test]
    fn test_display_preserves_diagnostic() {
        let err = DbError::query("near \"SELEC\": syntax error");
        assert_eq!(err.to_string(), "Query error: near \"SELEC\": syntax error");
    }
}
