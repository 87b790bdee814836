//! Statement classification by leading keywords
//!
//! Connections decide whether to open an implicit transaction, and backends
//! decide what `rowcount`/`lastrowid` mean, from the first few keywords of a
//! statement. Leading whitespace and comments are skipped.

/// Explicit transaction-control statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxControl {
    Begin,
    Commit,
    Rollback,
    /// SAVEPOINT, RELEASE and ROLLBACK TO: no change to the outer transaction
    Nested,
}

impl TxControl {
    #[cfg_attr(not(feature = "postgres"), allow(dead_code))]
    pub(crate) fn of(statement: &str) -> Option<TxControl> {
        match StatementKind::of(statement) {
            StatementKind::Control(control) => Some(control),
            _ => None,
        }
    }
}

/// What a statement does, as far as transactions and row counts are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatementKind {
    Control(TxControl),
    /// INSERT or REPLACE
    Insert,
    /// UPDATE, DELETE or MERGE
    Modify,
    /// Must run outside a transaction block (VACUUM, PRAGMA, CREATE DATABASE, ...)
    Standalone,
    /// Queries and DDL
    Other,
}

impl StatementKind {
    pub(crate) fn of(statement: &str) -> StatementKind {
        let words = leading_words(statement, 6);
        let Some(first) = words.first() else {
            return StatementKind::Other;
        };
        let second = words.get(1).map(String::as_str);

        match first.as_str() {
            "BEGIN" | "START" => StatementKind::Control(TxControl::Begin),
            "COMMIT" | "END" => StatementKind::Control(TxControl::Commit),
            "ROLLBACK" | "ABORT" => {
                match words[1..].iter().find(|w| *w != "TRANSACTION" && *w != "WORK") {
                    Some(w) if w == "TO" => StatementKind::Control(TxControl::Nested),
                    _ => StatementKind::Control(TxControl::Rollback),
                }
            }
            "SAVEPOINT" | "RELEASE" => StatementKind::Control(TxControl::Nested),
            "INSERT" | "REPLACE" => StatementKind::Insert,
            "UPDATE" | "DELETE" | "MERGE" => StatementKind::Modify,
            "VACUUM" | "PRAGMA" | "ATTACH" | "DETACH" => StatementKind::Standalone,
            "CREATE" | "DROP" if matches!(second, Some("DATABASE") | Some("TABLESPACE")) => {
                StatementKind::Standalone
            }
            "ALTER" if second == Some("SYSTEM") => StatementKind::Standalone,
            "CREATE" | "DROP" | "REINDEX" if words.iter().any(|w| w == "CONCURRENTLY") => {
                StatementKind::Standalone
            }
            _ => StatementKind::Other,
        }
    }

    /// Whether the connection opens a transaction before running this statement
    pub(crate) fn opens_transaction(self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Modify | StatementKind::Other
        )
    }

    /// INSERT, REPLACE, UPDATE, DELETE or MERGE
    pub(crate) fn is_dml(self) -> bool {
        matches!(self, StatementKind::Insert | StatementKind::Modify)
    }
}

/// Strip leading whitespace, `--` line comments and `/* */` block comments
fn skip_leading_trivia(mut statement: &str) -> &str {
    loop {
        statement = statement.trim_start();
        if let Some(rest) = statement.strip_prefix("--") {
            statement = match rest.find('\n') {
                Some(end) => &rest[end + 1..],
                None => "",
            };
        } else if let Some(rest) = statement.strip_prefix("/*") {
            statement = match rest.find("*/") {
                Some(end) => &rest[end + 2..],
                None => "",
            };
        } else {
            return statement;
        }
    }
}

/// First `limit` keywords of `statement`, upper-cased
fn leading_words(statement: &str, limit: usize) -> Vec<String> {
    skip_leading_trivia(statement)
        .split(|c: char| c.is_whitespace() || c == ';' || c == '(')
        .filter(|w| !w.is_empty())
        .take(limit)
        .map(|w| w.to_ascii_uppercase())
        .collect()
}
