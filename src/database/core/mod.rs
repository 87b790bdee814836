//! Core database infrastructure
//!
//! This module provides the engine-neutral building blocks of the database layer:
//! - `Connection` / `Cursor`: uniform connection and statement interface
//! - `Backend`: the capability trait each engine implements
//! - `Value` / `Row` / `ConnectArgs`: data crossing the engine boundary
//! - `DbError`: error taxonomy
//! - placeholder rewriting from `%s` into each engine's native syntax
//! - statement classification for implicit transactions and row counts

mod connection;
mod error;
mod placeholder;
mod statement;
mod value;

pub use connection::{Backend, Connection, Cursor, Execution};
pub use error::{DbError, DbErrorKind, DbResult};
pub use placeholder::{rewrite_placeholders, PlaceholderStyle};
pub(crate) use statement::StatementKind;
#[cfg(feature = "postgres")]
pub(crate) use statement::TxControl;
pub use value::{ConnectArgs, Row, Value};
