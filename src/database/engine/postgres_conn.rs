//! PostgreSQL backend
//!
//! Uses the synchronous `postgres` client. Recognised [`ConnectArgs`] keys:
//! `host`, `port`, `user`, `password`, `database` (alias `dbname`),
//! `connect_timeout` (seconds) and `application_name`.
//!
//! Values are bound against the parameter types the server reports for the
//! prepared statement, so an integer can feed an `int4` column and `NULL` can feed
//! any column. Text bound to a non-text parameter is sent in text form and parsed
//! by the server, so `'2024-01-01'` can feed a `date`.

use std::error::Error as StdError;
use std::time::Duration;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::types::{to_sql_checked, Format, FromSql, IsNull, Kind, ToSql, Type};
use postgres::{Client, Config, NoTls};

use super::{report_unknown_args, Engine};
use crate::database::core::{
    Backend, ConnectArgs, DbError, DbResult, Execution, Row, StatementKind, TxControl, Value,
};

const KNOWN_ARGS: &[&str] = &[
    "host",
    "port",
    "user",
    "password",
    "database",
    "dbname",
    "connect_timeout",
    "application_name",
];

/// Physical PostgreSQL connection
pub struct PostgresBackend {
    client: Client,
    in_transaction: bool,
}

impl PostgresBackend {
    pub fn open(args: &ConnectArgs) -> DbResult<Self> {
        let config = build_config(args)?;
        let host = args.get("host").unwrap_or("localhost").to_string();
        let client = config.connect(NoTls).map_err(|e| {
            DbError::connection(format!("Failed to connect to PostgreSQL at '{}': {}", host, e))
        })?;
        Ok(PostgresBackend {
            client,
            in_transaction: false,
        })
    }

    fn control(&mut self, sql: &str, what: &str) -> DbResult<()> {
        self.client
            .batch_execute(sql)
            .map_err(|e| DbError::connection(format!("Failed to {}: {}", what, e)))
    }

    fn track(&mut self, statement: &str) {
        match TxControl::of(statement) {
            Some(TxControl::Begin) => self.in_transaction = true,
            Some(TxControl::Commit) | Some(TxControl::Rollback) => self.in_transaction = false,
            Some(TxControl::Nested) | None => {}
        }
    }
}

pub(crate) fn build_config(args: &ConnectArgs) -> DbResult<Config> {
    report_unknown_args(Engine::Postgres, args, KNOWN_ARGS);

    let mut config = Config::new();
    config.host(args.get("host").unwrap_or("localhost"));
    if let Some(port) = args.get_parsed::<u16>("port")? {
        config.port(port);
    }
    if let Some(user) = args.get("user") {
        config.user(user);
    }
    if let Some(password) = args.get("password") {
        config.password(password);
    }
    if let Some(dbname) = args.get_any(&["database", "dbname"]) {
        config.dbname(dbname);
    }
    if let Some(secs) = args.get_parsed::<u64>("connect_timeout")? {
        config.connect_timeout(Duration::from_secs(secs));
    }
    if let Some(name) = args.get("application_name") {
        config.application_name(name);
    }
    Ok(config)
}

fn query_error(e: postgres::Error) -> DbError {
    // the server diagnostic is in the source chain; prefer it over the generic text
    match e.as_db_error() {
        Some(db) => DbError::query(format!("{}: {}", db.severity(), db.message())),
        None => DbError::query(e.to_string()),
    }
}

type BoxError = Box<dyn StdError + Sync + Send>;

fn is_text(ty: &Type) -> bool {
    <&str as ToSql>::accepts(ty)
}

fn mismatch(value: &str, ty: &Type) -> BoxError {
    format!("cannot bind {} to a parameter of type {}", value, ty).into()
}

impl Value {
    /// Whether this value is sent in text form and parsed by the server, the way
    /// an untyped literal is. Used for parameter types with no binary mapping
    /// here, e.g. text into a `timestamptz` or an integer into a `numeric`.
    fn binds_as_text(&self, ty: &Type) -> bool {
        match self {
            Value::Integer(_) => {
                !matches!(
                    *ty,
                    Type::INT2 | Type::INT4 | Type::INT8 | Type::OID | Type::FLOAT4 | Type::FLOAT8 | Type::BOOL
                ) && !is_text(ty)
            }
            Value::Real(_) => !matches!(*ty, Type::FLOAT4 | Type::FLOAT8) && !is_text(ty),
            Value::Text(_) => !is_text(ty),
            Value::Null | Value::Blob(_) | Value::Boolean(_) => false,
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.binds_as_text(ty) {
            out.extend_from_slice(self.to_string().as_bytes());
            return Ok(IsNull::No);
        }
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT8 => i.to_sql(ty, out),
                Type::OID => u32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::BOOL => (*i != 0).to_sql(ty, out),
                _ => i.to_string().as_str().to_sql(ty, out),
            },
            Value::Real(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                _ => f.to_string().as_str().to_sql(ty, out),
            },
            Value::Text(s) => s.as_str().to_sql(ty, out),
            Value::Blob(b) if *ty == Type::BYTEA => b.as_slice().to_sql(ty, out),
            Value::Blob(_) => Err(mismatch("a blob", ty)),
            Value::Boolean(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::INT2 => (*b as i16).to_sql(ty, out),
                Type::INT4 => (*b as i32).to_sql(ty, out),
                Type::INT8 => (*b as i64).to_sql(ty, out),
                _ if is_text(ty) => b.to_string().as_str().to_sql(ty, out),
                _ => Err(mismatch("a boolean", ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, ty: &Type) -> Format {
        if self.binds_as_text(ty) {
            Format::Text
        } else {
            Format::Binary
        }
    }

    to_sql_checked!();
}

/// Column value as received, in the binary wire format
struct RawColumn<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawColumn<'a> {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(RawColumn(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Base-10000 `numeric` wire format rendered as a decimal string
fn numeric_to_string(raw: &[u8]) -> Result<String, BoxError> {
    let word = |i: usize| -> Result<i16, BoxError> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };

    let ndigits = word(0)?.max(0) as usize;
    let weight = word(1)? as i32;
    let sign = word(2)? as u16;
    let dscale = word(3)?.max(0) as usize;
    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<_>, _>>()?;
    let digit = |i: i32| -> i16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit(i)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

fn uuid_to_string(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() != 16 {
        return Err(format!("invalid uuid length {}", raw.len()).into());
    }
    let hex: String = raw.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

/// Map one non-NULL column value onto [`Value`]
///
/// Date and time types become ISO 8601 text (RFC 3339 for `timestamptz`);
/// `numeric`, `uuid`, `json` and `jsonb` become their usual text form. Types
/// without a mapping come back as raw bytes.
fn decode(ty: &Type, raw: &[u8]) -> Result<Value, BoxError> {
    let value = match *ty {
        Type::BOOL => Value::Boolean(bool::from_sql(ty, raw)?),
        Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
        Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
        Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
        Type::OID => Value::from(u32::from_sql(ty, raw)?),
        Type::FLOAT4 => Value::from(f32::from_sql(ty, raw)?),
        Type::FLOAT8 => Value::from(f64::from_sql(ty, raw)?),
        Type::BYTEA => Value::Blob(raw.to_vec()),
        Type::TIMESTAMP => Value::Text(
            NaiveDateTime::from_sql(ty, raw)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        Type::TIMESTAMPTZ => Value::Text(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339()),
        Type::DATE => Value::Text(NaiveDate::from_sql(ty, raw)?.to_string()),
        Type::TIME => Value::Text(NaiveTime::from_sql(ty, raw)?.to_string()),
        Type::NUMERIC => Value::Text(numeric_to_string(raw)?),
        Type::UUID => Value::Text(uuid_to_string(raw)?),
        Type::JSON | Type::XML => Value::Text(std::str::from_utf8(raw)?.to_string()),
        Type::JSONB => match raw.split_first() {
            Some((&1, body)) => Value::Text(std::str::from_utf8(body)?.to_string()),
            _ => return Err("unsupported jsonb format version".into()),
        },
        _ if is_text(ty) => Value::Text(<&str as FromSql>::from_sql(ty, raw)?.to_string()),
        _ => match ty.kind() {
            Kind::Domain(inner) => decode(inner, raw)?,
            Kind::Enum(_) => Value::Text(std::str::from_utf8(raw)?.to_string()),
            _ => Value::Blob(raw.to_vec()),
        },
    };
    Ok(value)
}

fn read_column(row: &postgres::Row, index: usize) -> DbResult<Value> {
    let column = &row.columns()[index];
    let read_error = |e: &dyn std::fmt::Display| {
        DbError::query(format!(
            "cannot read column '{}' of type {}: {}",
            column.name(),
            column.type_(),
            e
        ))
    };

    let raw = row
        .try_get::<_, Option<RawColumn<'_>>>(index)
        .map_err(|e| read_error(&e))?;
    match raw {
        None => Ok(Value::Null),
        Some(RawColumn(bytes)) => decode(column.type_(), bytes).map_err(|e| read_error(&e)),
    }
}

impl Backend for PostgresBackend {
    fn execute(&mut self, statement: &str, params: &[Value]) -> DbResult<Execution> {
        let stmt = self.client.prepare(statement).map_err(query_error)?;
        if stmt.params().len() != params.len() {
            return Err(DbError::query(format!(
                "statement expects {} parameters, {} supplied",
                stmt.params().len(),
                params.len()
            )));
        }

        let bound: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        let execution = if stmt.columns().is_empty() {
            let affected = self.client.execute(&stmt, &bound).map_err(query_error)?;
            let dml = StatementKind::of(statement).is_dml();
            Execution {
                rowcount: if dml { affected as i64 } else { -1 },
                ..Default::default()
            }
        } else {
            let columns = stmt.columns().iter().map(|c| c.name().to_string()).collect();
            let rows = self.client.query(&stmt, &bound).map_err(query_error)?;
            let mut out = Vec::with_capacity(rows.len());
            for row in &rows {
                let mut values = Vec::with_capacity(row.len());
                for i in 0..row.len() {
                    values.push(read_column(row, i)?);
                }
                out.push(Row(values));
            }
            Execution {
                columns,
                rowcount: out.len() as i64,
                rows: out,
                lastrowid: None,
            }
        };

        self.track(statement);
        Ok(execution)
    }

    fn begin(&mut self) -> DbResult<()> {
        self.control("BEGIN", "begin transaction")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::connection("cannot commit - no transaction is active"));
        }
        self.in_transaction = false;
        self.control("COMMIT", "commit")
    }

    fn rollback(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::connection("cannot rollback - no transaction is active"));
        }
        self.in_transaction = false;
        self.control("ROLLBACK", "roll back")
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn close(self: Box<Self>) -> DbResult<()> {
        let PostgresBackend { client, .. } = *self;
        client
            .close()
            .map_err(|e| DbError::connection(format!("Failed to close connection: {}", e)))
    }
}
