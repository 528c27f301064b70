//! SQL construction: filters, request shaping, the select IR, the query
//! builder and the migration DDL builder.
//!
//! All statement text is assembled from a clause list and rendered once at
//! the end; values are always bound parameters, never interpolated. The one
//! exception is session settings (`SET LOCAL`), which Postgres cannot
//! parameterize; those values are escaped literals rendered by the executor.

pub mod ast;
pub mod builder;
pub mod ddl;
pub mod filter;
pub mod options;
pub mod plan;

pub use ast::Query;
pub use builder::QueryBuilder;
pub use ddl::{DdlBuilder, MigrationScript, MigrationScriptCollection};
pub use filter::{FilterComparer, GenericFilter, GenericParameter};
pub use options::{ChangeRequestOptions, Paging, RequestOptions, SessionSetting};
pub use plan::{CrossRelation, JoinKind, JoinPlan, JoinSpec};
