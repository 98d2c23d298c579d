//! Raw read-only query passthrough used by tooling.

use super::sqlite::Database;
use crate::error::Error;
use rusqlite::types::ValueRef;
use serde_json::{Map, Value};

/// One result row as an ordered column-name → value mapping.
pub type RawRow = Map<String, Value>;

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(
            b.iter().map(|byte| format!("{:02x}", byte)).collect::<String>(),
        ),
    }
}

impl Database {
    /// Execute a single read-only statement and return its rows. Statements
    /// that would write to the database are refused before execution.
    pub fn run_sql(&self, sql: &str) -> Result<Vec<RawRow>, Error> {
        let mut stmt = self.connection().prepare(sql)?;
        if !stmt.readonly() {
            return Err(Error::Other(format!(
                "refusing to run a statement that writes: {}",
                sql
            )));
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Map::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(idx)?));
            }
            out.push(record);
        }
        Ok(out)
    }
}
