//! # accessdb
//!
//! Generic PostgreSQL persistence, schema migration and bulk ingest engine
//! for the access management platform.
//!
//! This library provides the data-access core the platform services build
//! on instead of a conventional ORM:
//!
//! - **Schema registry**: explicit per-type descriptors, memoized for the
//!   process lifetime
//! - **Query builder**: basic and joined SELECTs, parameterized writes and
//!   migration DDL rendered from a clause IR
//! - **Result binder**: flat rows demultiplexed into nested object graphs
//!   via the column-prefix convention
//! - **Repositories**: basic CRUD, extended (joined) shapes, and
//!   many-to-many cross-reference access
//! - **Migration engine**: idempotent DDL tracked by an append-only
//!   ledger, with temporal history and translation shadow tables
//! - **Bulk ingest**: binary COPY into unlogged staging tables with a
//!   set-based merge
//!
//! ## Example
//!
//! ```rust,no_run
//! use accessdb::{DbAccessConfig, DbExecutor, MigrationService, SchemaRegistry};
//! use std::sync::Arc;
//!
//! # struct Resource;
//! # impl accessdb::DbModel for Resource {
//! #     fn type_name() -> &'static str { "resource" }
//! #     fn describe() -> accessdb::TypeSchemaBuilder {
//! #         accessdb::TypeSchema::builder("resource")
//! #             .key_column("id", accessdb::DataType::Uuid)
//! #     }
//! #     fn bind(&self) -> Vec<accessdb::GenericParameter> { Vec::new() }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), accessdb::DbError> {
//!     let config = DbAccessConfig::load("config.yaml")?;
//!     let executor = DbExecutor::connect(&config.connection).await?;
//!     let registry = Arc::new(SchemaRegistry::new());
//!
//!     let mut migrations = MigrationService::from_config(executor, registry, &config);
//!     migrations.register::<Resource>()?;
//!     migrations.migrate(None).await?;
//!     Ok(())
//! }
//! ```

pub mod binder;
pub mod config;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod migrate;
pub mod query;
pub mod repo;
pub mod schema;
pub mod translate;
pub mod value;

// Re-exports for convenient access
pub use binder::{field, json_list, sub_object, FixtureRow, FromRow, PgRow, RowSource};
pub use config::{ConnectionConfig, DbAccessConfig, SchemaNames};
pub use error::{DbError, Result};
pub use executor::DbExecutor;
pub use ingest::{build_merge_statement, IngestService, MergeStatement};
pub use migrate::{MigrationLedgerEntry, MigrationRunSummary, MigrationService};
pub use query::{
    ChangeRequestOptions, FilterComparer, GenericFilter, GenericParameter, Paging, RequestOptions,
};
pub use repo::{BasicRepo, CrossRepo, ExtendedRepo, Page};
pub use schema::{DataType, DbModel, SchemaRegistry, TypeSchema, TypeSchemaBuilder};
pub use translate::{TranslationEntry, TranslationStore};
pub use value::{FromSqlValue, SqlNullType, SqlValue};
