//! Per-type persistence metadata: column layout, keys, feature flags.
//!
//! Domain types register an explicit descriptor through [`DbModel::describe`]
//! instead of being inspected at runtime; the [`SchemaRegistry`] memoizes the
//! validated result per type for the process lifetime.

mod registry;
mod types;

pub use registry::SchemaRegistry;
pub use types::{
    ColumnDef, DataType, DbModel, ForeignKeyDef, TypeSchema, TypeSchemaBuilder, UniqueConstraintDef,
};
