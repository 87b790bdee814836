use anyhow::Result;
use clap::Args;
use keystone::{KeystoneConfig, Row, Value};
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing::info;

/// Arguments for the Query command
#[derive(Args)]
pub struct QueryArgs {
    /// SQL statement; use %s for each parameter
    #[clap(name = "SQL")]
    pub sql: String,

    /// Parameter values, in order. `null`, integers and floats are typed, anything else is text
    #[clap(short = 'p', long = "param")]
    pub params: Vec<String>,

    /// Output rows as JSON objects
    #[clap(long)]
    pub json: bool,
}

fn parse_param(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Real(f);
    }
    Value::Text(raw.to_string())
}

fn rows_to_json(columns: &[String], rows: &[Row]) -> serde_json::Value {
    let objects = rows
        .iter()
        .map(|row| {
            let map: serde_json::Map<String, serde_json::Value> = columns
                .iter()
                .cloned()
                .zip(row.values().iter().map(|v| serde_json::json!(v)))
                .collect();
            serde_json::Value::Object(map)
        })
        .collect();
    serde_json::Value::Array(objects)
}

pub fn run(config: &KeystoneConfig, args: QueryArgs) -> Result<()> {
    let QueryArgs { sql, params, json } = args;

    let pool = config.pool()?;
    let conn = pool.connect()?;
    let mut cursor = conn.cursor()?;

    let values: Vec<Value> = params.iter().map(|p| parse_param(p)).collect();
    let bound = match values.is_empty() {
        true => None,
        false => Some(values.as_slice()),
    };

    let rows = cursor.execute(&sql, bound)?.fetchall()?;
    if conn.in_transaction() {
        conn.commit()?;
    }
    let columns = cursor.columns().to_vec();
    info!("statement done, rowcount {}", cursor.rowcount());

    if json {
        println!("{}", serde_json::to_string_pretty(&rows_to_json(&columns, &rows))?);
        return Ok(());
    }

    if columns.is_empty() {
        match (cursor.rowcount(), cursor.lastrowid()) {
            (n, _) if n < 0 => println!("OK"),
            (n, Some(id)) => println!("{} rows affected, last row id {}", n, id),
            (n, None) => println!("{} rows affected", n),
        }
        return Ok(());
    }

    let mut builder = Builder::default();
    builder.push_record(columns.iter().cloned());
    for row in &rows {
        builder.push_record(row.values().iter().map(|v| v.to_string()));
    }
    println!("{}", builder.build().with(Style::rounded()));
    Ok(())
}
