//! Result binder: reconstructs (possibly nested) domain objects from flat
//! result rows, following the same prefix convention the query builder uses
//! to alias joined columns.
//!
//! The binder reads through the [`RowSource`] abstraction so the mapping
//! logic is exercised against synthetic rows in tests and against
//! `tokio_postgres::Row` in production, with identical behavior.

mod row;

pub use row::{FixtureRow, PgRow, RowSource};

use serde::de::DeserializeOwned;

use crate::error::{DbError, Result};
use crate::query::filter::GenericParameter;
use crate::schema::{DataType, DbModel, TypeSchema};
use crate::value::{FromSqlValue, SqlNullType, SqlValue};

/// Materialization trait: build `Self` from the columns under `prefix`.
///
/// Implementations read their own columns with [`field`] and hand nested
/// objects to [`sub_object`], which applies the null-object rule before any
/// per-column work happens.
pub trait FromRow: Sized {
    fn from_row(row: &dyn RowSource, prefix: &str) -> Result<Self>;
}

/// Read one typed field from `<prefix><name>`.
///
/// A missing column and a SQL NULL are equivalent: optional targets become
/// `None`, required targets fail with a binding error naming the column.
pub fn field<V: FromSqlValue>(row: &dyn RowSource, prefix: &str, name: &str) -> Result<V> {
    let column = format!("{}{}", prefix, name);
    let value = row
        .value(&column)
        .unwrap_or(SqlValue::Null(SqlNullType::Text));

    V::from_sql_value(value).map_err(|e| DbError::bind("row", column, e))
}

/// Materialize a nested object from the columns under
/// `<prefix><alias>_`, or `None` when the join produced no row.
///
/// Null-object rule: the related type's primary-key column decides. When
/// `<prefix><alias>_<pk>` is SQL NULL the whole sub-object is absent, no
/// matter what other non-null values appear under the prefix (a paged or
/// defaulted column can carry residue on outer-join misses).
pub fn sub_object<R: FromRow + DbModel>(
    row: &dyn RowSource,
    prefix: &str,
    alias: &str,
) -> Result<Option<R>> {
    let nested_prefix = format!("{}{}_", prefix, alias);
    let key_column = format!("{}{}", nested_prefix, R::primary_key()[0]);

    match row.value(&key_column) {
        None | Some(SqlValue::Null(_)) => Ok(None),
        Some(_) => R::from_row(row, &nested_prefix).map(Some),
    }
}

/// Decode a JSON-encoded collection column into a vector.
///
/// A missing column, SQL NULL, or empty payload decodes to an empty vector,
/// never an absent one.
pub fn json_list<R: DeserializeOwned>(
    row: &dyn RowSource,
    prefix: &str,
    name: &str,
) -> Result<Vec<R>> {
    let column = format!("{}{}", prefix, name);
    match row.value(&column) {
        None | Some(SqlValue::Null(_)) => Ok(Vec::new()),
        Some(SqlValue::Json(value)) => Ok(serde_json::from_value(value)?),
        Some(SqlValue::Text(text)) if text.trim().is_empty() => Ok(Vec::new()),
        Some(SqlValue::Text(text)) => Ok(serde_json::from_str(&text)?),
        Some(other) => Err(DbError::bind(
            "row",
            column,
            format!("expected json collection, got {}", other.kind()),
        )),
    }
}

/// Materialize every row of a result set.
pub fn rows_to_objects<T: FromRow>(rows: &[impl RowSource]) -> Result<Vec<T>> {
    rows.iter()
        .map(|row| T::from_row(row as &dyn RowSource, ""))
        .collect()
}

/// Write-direction helper: restrict an entity's full parameter set to the
/// columns a translation row stores (text columns plus the primary key).
pub fn translation_parameters(
    parameters: Vec<GenericParameter>,
    schema: &TypeSchema,
) -> Vec<GenericParameter> {
    parameters
        .into_iter()
        .filter(|p| {
            schema.is_key_column(&p.key)
                || schema
                    .column(&p.key)
                    .is_some_and(|c| c.data_type == DataType::Text)
        })
        .collect()
}
