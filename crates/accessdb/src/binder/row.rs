//! Row abstraction the binder reads through.

use std::collections::HashMap;

use tokio_postgres::types::Type;
use tokio_postgres::Row;

use crate::value::{SqlNullType, SqlValue};

/// A readable result row. Column names are matched case-insensitively
/// (Postgres folds unquoted aliases to lower case).
pub trait RowSource {
    /// Column names present in the row, lower case.
    fn columns(&self) -> Vec<String>;

    /// The cell under `name`: `None` when the column does not exist,
    /// `Some(SqlValue::Null(_))` for a SQL NULL.
    fn value(&self, name: &str) -> Option<SqlValue>;
}

/// In-memory row used by unit tests and fixtures.
#[derive(Debug, Default)]
pub struct FixtureRow {
    cells: Vec<(String, SqlValue)>,
}

impl FixtureRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a cell, replacing any previous value under the same name.
    pub fn set(&mut self, name: &str, value: SqlValue) -> &mut Self {
        let name = name.to_ascii_lowercase();
        if let Some(cell) = self.cells.iter_mut().find(|(n, _)| *n == name) {
            cell.1 = value;
        } else {
            self.cells.push((name, value));
        }
        self
    }
}

impl RowSource for FixtureRow {
    fn columns(&self) -> Vec<String> {
        self.cells.iter().map(|(n, _)| n.clone()).collect()
    }

    fn value(&self, name: &str) -> Option<SqlValue> {
        let name = name.to_ascii_lowercase();
        self.cells
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
    }
}

/// Adapter over a driver row. Column positions are resolved once at
/// construction so repeated lookups during materialization stay cheap.
pub struct PgRow {
    row: Row,
    index: HashMap<String, usize>,
}

impl PgRow {
    pub fn new(row: Row) -> Self {
        let index = row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name().to_ascii_lowercase(), i))
            .collect();
        Self { row, index }
    }

    fn decode(&self, idx: usize) -> Option<SqlValue> {
        let column_type = self.row.columns()[idx].type_().clone();

        // Each arm reads Option<T>; None is a SQL NULL with the matching
        // type hint.
        if column_type == Type::UUID {
            self.row
                .try_get::<_, Option<uuid::Uuid>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::Uuid))
        } else if column_type == Type::BOOL {
            self.row
                .try_get::<_, Option<bool>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::Bool))
        } else if column_type == Type::INT4 {
            self.row
                .try_get::<_, Option<i32>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::I32))
        } else if column_type == Type::INT8 {
            self.row
                .try_get::<_, Option<i64>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::I64))
        } else if column_type == Type::FLOAT8 {
            self.row
                .try_get::<_, Option<f64>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::F64))
        } else if column_type == Type::NUMERIC {
            self.row
                .try_get::<_, Option<rust_decimal::Decimal>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::Decimal))
        } else if column_type == Type::TIMESTAMPTZ {
            self.row
                .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::Timestamptz))
        } else if column_type == Type::DATE {
            self.row
                .try_get::<_, Option<chrono::NaiveDate>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::Date))
        } else if column_type == Type::JSON || column_type == Type::JSONB {
            self.row
                .try_get::<_, Option<serde_json::Value>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::Json))
        } else if column_type == Type::BYTEA {
            self.row
                .try_get::<_, Option<Vec<u8>>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::Bytes))
        } else {
            self.row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .map(|v| wrap(v, SqlNullType::Text))
        }
    }
}

fn wrap<T: Into<SqlValue>>(value: Option<T>, null: SqlNullType) -> SqlValue {
    match value {
        Some(v) => v.into(),
        None => SqlValue::Null(null),
    }
}

impl RowSource for PgRow {
    fn columns(&self) -> Vec<String> {
        self.row
            .columns()
            .iter()
            .map(|c| c.name().to_ascii_lowercase())
            .collect()
    }

    fn value(&self, name: &str) -> Option<SqlValue> {
        let idx = *self.index.get(&name.to_ascii_lowercase())?;
        self.decode(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_row_case_insensitive() {
        let mut row = FixtureRow::new();
        row.set("Name", SqlValue::Text("x".into()));

        assert_eq!(row.value("name"), Some(SqlValue::Text("x".into())));
        assert_eq!(row.value("NAME"), Some(SqlValue::Text("x".into())));
        assert_eq!(row.value("other"), None);
    }

    #[test]
    fn test_fixture_row_replaces_on_set() {
        let mut row = FixtureRow::new();
        row.set("name", SqlValue::Text("a".into()));
        row.set("name", SqlValue::Text("b".into()));

        assert_eq!(row.columns().len(), 1);
        assert_eq!(row.value("name"), Some(SqlValue::Text("b".into())));
    }
}
