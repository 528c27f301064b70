//! High-throughput bulk ingest and set-based merge.
//!
//! The pipeline streams entity batches into an unlogged staging table with
//! binary COPY, then merges staging into the target with one set-based
//! statement under the audit session context, and finally drops the
//! staging table. Cancellation between chunks leaves the staging table
//! droppable; its unlogged, disposable nature is the cleanup mechanism,
//! not transactional rollback.

mod copy;
mod merge;

pub use merge::{build_merge_statement, MergeStatement};

use std::sync::Arc;

use bytes::BytesMut;
use futures::SinkExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchemaNames;
use crate::error::{DbError, Result};
use crate::executor::DbExecutor;
use crate::query::builder::{QueryBuilder, TableKind};
use crate::query::{ChangeRequestOptions, GenericParameter, Query};
use crate::schema::{DataType, DbModel, SchemaRegistry, TypeSchema};

/// Rows per COPY frame flush.
const COPY_CHUNK_ROWS: usize = 1000;

/// A column eligible for bulk load: its wire type and where the value sits
/// in the entity's bound parameter list.
#[derive(Debug, Clone)]
pub struct IngestColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub is_nullable: bool,
    pub bind_index: usize,
}

/// Bulk ingest service.
pub struct IngestService {
    executor: DbExecutor,
    registry: Arc<SchemaRegistry>,
    names: SchemaNames,
}

impl IngestService {
    pub fn new(executor: DbExecutor, registry: Arc<SchemaRegistry>, names: SchemaNames) -> Self {
        Self {
            executor,
            registry,
            names,
        }
    }

    /// Staging table name for one ingest run:
    /// `ingest.<tablename>_<ingestid-without-dashes>`.
    pub fn staging_table_name(type_name: &str, ingest_id: Uuid) -> String {
        format!("ingest.{}_{}", type_name, ingest_id.simple())
    }

    /// Stream a batch straight into the live table.
    pub async fn ingest<T: DbModel>(
        &self,
        data: &[T],
        options: &ChangeRequestOptions,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<usize> {
        let schema = self.registry.schema::<T>()?;
        let table = QueryBuilder::new(&schema, &self.names).table_name(TableKind::Base);
        self.write_copy(&schema, &table, data, options, cancel).await
    }

    /// Stream a batch into a fresh unlogged staging table cloned from the
    /// target's column list.
    pub async fn ingest_temp<T: DbModel>(
        &self,
        data: &[T],
        ingest_id: Uuid,
        options: &ChangeRequestOptions,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<usize> {
        if ingest_id.is_nil() {
            return Err(DbError::Config(format!(
                "Ingest id '{}' not valid",
                ingest_id
            )));
        }

        let schema = self.registry.schema::<T>()?;
        let target = QueryBuilder::new(&schema, &self.names).table_name(TableKind::Base);
        let staging = Self::staging_table_name(&schema.type_name, ingest_id);
        let columns = schema.column_names().join(", ");

        self.executor
            .execute_script(&format!(
                "CREATE SCHEMA IF NOT EXISTS ingest;\nCREATE UNLOGGED TABLE IF NOT EXISTS {} AS SELECT {} FROM {} WITH NO DATA;",
                staging, columns, target
            ))
            .await?;

        self.write_copy(&schema, &staging, data, options, cancel)
            .await
    }

    /// Merge the staging table into the target on `match_columns` (primary
    /// key when empty), inserting unmatched rows, then drop the staging
    /// table. Drop is attempted even when the merge fails.
    pub async fn merge_temp<T: DbModel>(
        &self,
        ingest_id: Uuid,
        match_columns: &[String],
        options: &ChangeRequestOptions,
    ) -> Result<u64> {
        let schema = self.registry.schema::<T>()?;
        let staging = Self::staging_table_name(&schema.type_name, ingest_id);
        let statement = build_merge_statement(&schema, &self.names, &staging, match_columns);

        debug!(staging = %staging, "Starting merge");

        let mut query = Query::new(statement.sql);
        query.settings = options.session_settings();
        let merged = self.executor.execute(&query).await;

        let dropped = self
            .executor
            .execute_script(&format!("DROP TABLE IF EXISTS {};", staging))
            .await;

        match (merged, dropped) {
            (Ok(n), Ok(())) => {
                info!(rows = n, staging = %staging, "Merge complete");
                Ok(n)
            }
            (Ok(n), Err(e)) => {
                warn!(staging = %staging, error = %e, "Staging table cleanup failed");
                Ok(n)
            }
            (Err(e), dropped) => {
                if let Err(drop_err) = dropped {
                    warn!(staging = %staging, error = %drop_err, "Staging table cleanup failed");
                }
                Err(e)
            }
        }
    }

    /// Ingest into a fresh staging table and merge it into the target.
    pub async fn ingest_and_merge<T: DbModel>(
        &self,
        data: &[T],
        match_columns: &[String],
        options: &ChangeRequestOptions,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<u64> {
        let ingest_id = Uuid::now_v7();
        self.ingest_temp(data, ingest_id, options, cancel).await?;
        self.merge_temp::<T>(ingest_id, match_columns, options).await
    }

    /// Stream rows into `table` with binary COPY under the audit context.
    ///
    /// A cell that fails to encode is retried as NULL; when the column
    /// cannot take a NULL the whole ingest aborts.
    async fn write_copy<T: DbModel>(
        &self,
        schema: &TypeSchema,
        table: &str,
        data: &[T],
        options: &ChangeRequestOptions,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let columns = ingest_columns(schema, &data[0].bind())?;
        let column_list = columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let copy_sql = format!("COPY {} ({}) FROM STDIN (FORMAT BINARY)", table, column_list);

        let mut client = self
            .executor
            .pool()
            .get()
            .await
            .map_err(|e| DbError::pool(e, "getting connection for bulk ingest"))?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| DbError::ingest(table, e))?;

        for setting in options.session_settings() {
            tx.batch_execute(&setting.render())
                .await
                .map_err(|e| DbError::ingest(table, e))?;
        }

        let mut completed = 0usize;
        {
            let sink = tx
                .copy_in(&copy_sql)
                .await
                .map_err(|e| DbError::ingest(table, format!("COPY init: {}", e)))?;
            tokio::pin!(sink);

            let mut buf = BytesMut::with_capacity(1024 * 1024);
            copy::write_header(&mut buf);

            for entity in data {
                if let Some(cancel) = cancel {
                    if *cancel.borrow() {
                        return Err(DbError::Cancelled);
                    }
                }

                let bound = entity.bind();
                copy::write_row_header(&mut buf, columns.len());

                for column in &columns {
                    let value = bound.get(column.bind_index).map(|p| &p.value);
                    let value = value.ok_or_else(|| {
                        DbError::bind(&schema.type_name, &column.name, "bound parameter missing")
                    })?;

                    if let Err(e) = copy::write_value(&mut buf, value, column.data_type) {
                        warn!(
                            column = %column.name,
                            table = %table,
                            error = %e,
                            "Failed to write cell, trying null"
                        );
                        if !column.is_nullable {
                            return Err(DbError::ingest(
                                table,
                                format!(
                                    "cell for non-nullable column '{}' failed and cannot be null: {}",
                                    column.name, e
                                ),
                            ));
                        }
                        copy::write_null(&mut buf);
                    }
                }

                completed += 1;
                if completed % COPY_CHUNK_ROWS == 0 {
                    sink.send(buf.split().freeze())
                        .await
                        .map_err(|e| DbError::ingest(table, format!("COPY send: {}", e)))?;
                }
            }

            copy::write_trailer(&mut buf);
            sink.send(buf.split().freeze())
                .await
                .map_err(|e| DbError::ingest(table, format!("COPY send: {}", e)))?;

            sink.finish()
                .await
                .map_err(|e| DbError::ingest(table, format!("COPY finish: {}", e)))?;
        }

        tx.commit().await.map_err(|e| DbError::ingest(table, e))?;

        info!(rows = completed, table = %table, "Ingested");
        Ok(completed)
    }
}

/// Derive the bulk-load column set from the schema and an entity's bound
/// parameters: every column must have a bound value.
fn ingest_columns(
    schema: &TypeSchema,
    bound: &[GenericParameter],
) -> Result<Vec<IngestColumnDefinition>> {
    schema
        .columns
        .iter()
        .map(|c| {
            let bind_index = bound
                .iter()
                .position(|p| p.key == c.name)
                .ok_or_else(|| {
                    DbError::bind(
                        &schema.type_name,
                        &c.name,
                        "entity binds no parameter for column",
                    )
                })?;
            Ok(IngestColumnDefinition {
                name: c.name.clone(),
                data_type: c.data_type,
                is_nullable: c.is_nullable,
                bind_index,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeSchema;

    fn schema() -> TypeSchema {
        TypeSchema::builder("resource")
            .key_column("id", DataType::Uuid)
            .column("name", DataType::Text)
            .nullable_column("refid", DataType::Text, None)
            .build()
            .unwrap()
    }

    #[test]
    fn test_staging_table_name_strips_dashes() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            IngestService::staging_table_name("resource", id),
            "ingest.resource_550e8400e29b41d4a716446655440000"
        );
    }

    #[test]
    fn test_ingest_columns_map_bind_positions() {
        let bound = vec![
            GenericParameter::new("refid", "x"),
            GenericParameter::new("id", Uuid::nil()),
            GenericParameter::new("name", "n"),
        ];

        let columns = ingest_columns(&schema(), &bound).unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].bind_index, 1);
        assert!(!columns[0].is_nullable);
        assert_eq!(columns[2].name, "refid");
        assert_eq!(columns[2].bind_index, 0);
        assert!(columns[2].is_nullable);
    }

    #[test]
    fn test_ingest_columns_missing_bind_is_error() {
        let bound = vec![GenericParameter::new("id", Uuid::nil())];
        let err = ingest_columns(&schema(), &bound).unwrap_err();
        assert!(matches!(err, DbError::Bind { .. }));
    }
}
