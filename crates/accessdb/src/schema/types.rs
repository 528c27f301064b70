//! Schema descriptor types and the model registration trait.

use crate::error::{DbError, Result};
use crate::query::filter::GenericParameter;

/// Column data types supported by the engine.
///
/// Each knows its Postgres DDL spelling; the COPY wire encoding lives with
/// the ingest pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Uuid,
    Text,
    Integer,
    BigInt,
    Boolean,
    Timestamptz,
    Date,
    Numeric,
    Jsonb,
}

impl DataType {
    /// DDL type name.
    pub fn postgres(&self) -> &'static str {
        match self {
            DataType::Uuid => "uuid",
            DataType::Text => "text",
            DataType::Integer => "integer",
            DataType::BigInt => "bigint",
            DataType::Boolean => "boolean",
            DataType::Timestamptz => "timestamptz",
            DataType::Date => "date",
            DataType::Numeric => "numeric",
            DataType::Jsonb => "jsonb",
        }
    }
}

/// A single column of a persisted type.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Column name (lower case, matches the property name).
    pub name: String,

    /// Column data type.
    pub data_type: DataType,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Optional DDL default value literal.
    pub default_value: Option<String>,
}

/// A foreign key from one of this type's columns to another type's column.
#[derive(Debug, Clone)]
pub struct ForeignKeyDef {
    /// Column on this type.
    pub column: String,

    /// Referenced type name (its base table).
    pub ref_type: String,

    /// Referenced column (default "id").
    pub ref_column: String,

    /// ON DELETE CASCADE when true, otherwise ON DELETE SET NULL.
    pub cascade_delete: bool,
}

/// A unique constraint over one or more columns.
#[derive(Debug, Clone)]
pub struct UniqueConstraintDef {
    /// Constrained column names.
    pub columns: Vec<String>,
}

/// Per-type persistence metadata, built once and cached by the registry.
#[derive(Debug, Clone)]
pub struct TypeSchema {
    /// Type name; doubles as the table name under each schema.
    pub type_name: String,

    /// Ordered column list, primary-key columns first.
    pub columns: Vec<ColumnDef>,

    /// Primary-key column names. Never empty.
    pub primary_key: Vec<String>,

    /// Foreign keys, also used as migration ordering dependencies.
    pub foreign_keys: Vec<ForeignKeyDef>,

    /// Unique constraints.
    pub unique_constraints: Vec<UniqueConstraintDef>,

    /// Whether a history shadow table and as-of view exist for this type.
    pub has_history: bool,

    /// Whether a translation shadow table exists for this type.
    pub has_translation: bool,
}

impl TypeSchema {
    /// Start building a descriptor for the named type.
    pub fn builder(type_name: impl Into<String>) -> TypeSchemaBuilder {
        TypeSchemaBuilder::new(type_name)
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether the named column is part of the primary key.
    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    /// Names of all columns, in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Text columns, which are the ones a translation row can override.
    pub fn text_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.data_type == DataType::Text)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Builder for [`TypeSchema`]. `build` validates the key invariants and is
/// the fail-fast point for domain/schema drift.
#[derive(Debug, Clone)]
pub struct TypeSchemaBuilder {
    type_name: String,
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
    foreign_keys: Vec<ForeignKeyDef>,
    unique_constraints: Vec<UniqueConstraintDef>,
    has_history: bool,
    has_translation: bool,
}

impl TypeSchemaBuilder {
    fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
            has_history: false,
            has_translation: false,
        }
    }

    /// Add a primary-key column.
    pub fn key_column(mut self, name: &str, data_type: DataType) -> Self {
        self.primary_key.push(name.to_string());
        self.columns.push(ColumnDef {
            name: name.to_string(),
            data_type,
            is_nullable: false,
            default_value: None,
        });
        self
    }

    /// Add a NOT NULL column.
    pub fn column(mut self, name: &str, data_type: DataType) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            data_type,
            is_nullable: false,
            default_value: None,
        });
        self
    }

    /// Add a nullable column with an optional default literal.
    pub fn nullable_column(
        mut self,
        name: &str,
        data_type: DataType,
        default_value: Option<&str>,
    ) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            data_type,
            is_nullable: true,
            default_value: default_value.map(str::to_string),
        });
        self
    }

    /// Add a NOT NULL column with a default literal.
    pub fn column_with_default(mut self, name: &str, data_type: DataType, default: &str) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            data_type,
            is_nullable: false,
            default_value: Some(default.to_string()),
        });
        self
    }

    /// Register a foreign key to another type's id column.
    pub fn foreign_key(mut self, column: &str, ref_type: &str, cascade_delete: bool) -> Self {
        self.foreign_keys.push(ForeignKeyDef {
            column: column.to_string(),
            ref_type: ref_type.to_string(),
            ref_column: "id".to_string(),
            cascade_delete,
        });
        self
    }

    /// Register a unique constraint.
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique_constraints.push(UniqueConstraintDef {
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Enable the history shadow table, triggers and as-of view.
    pub fn with_history(mut self) -> Self {
        self.has_history = true;
        self
    }

    /// Enable the translation shadow table.
    pub fn with_translation(mut self) -> Self {
        self.has_translation = true;
        self
    }

    /// Validate and produce the schema. Primary-key drift is fatal here.
    pub fn build(self) -> Result<TypeSchema> {
        if self.primary_key.is_empty() {
            return Err(DbError::MissingPrimaryKey {
                type_name: self.type_name,
                column: "<none declared>".to_string(),
            });
        }

        for key in &self.primary_key {
            if !self.columns.iter().any(|c| &c.name == key) {
                return Err(DbError::MissingPrimaryKey {
                    type_name: self.type_name,
                    column: key.clone(),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DbError::Config(format!(
                    "Type '{}' declares column '{}' twice",
                    self.type_name, column.name
                )));
            }
        }

        Ok(TypeSchema {
            type_name: self.type_name,
            columns: self.columns,
            primary_key: self.primary_key,
            foreign_keys: self.foreign_keys,
            unique_constraints: self.unique_constraints,
            has_history: self.has_history,
            has_translation: self.has_translation,
        })
    }
}

/// Registration trait connecting a domain type to its persistence metadata
/// and write-direction binding.
pub trait DbModel: Send + Sync + 'static {
    /// Type name; doubles as the table name under each schema.
    fn type_name() -> &'static str;

    /// Primary-key column names, cheap to consult without building the
    /// full descriptor. Must match what `describe` declares.
    fn primary_key() -> &'static [&'static str] {
        &["id"]
    }

    /// The full schema descriptor. Built once per process by the registry.
    fn describe() -> TypeSchemaBuilder;

    /// One parameter per column, in `describe` order.
    fn bind(&self) -> Vec<GenericParameter>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_produces_schema() {
        let schema = TypeSchema::builder("resource")
            .key_column("id", DataType::Uuid)
            .column("name", DataType::Text)
            .nullable_column("refid", DataType::Text, None)
            .foreign_key("providerid", "provider", false)
            .unique(&["name"])
            .with_history()
            .with_translation()
            .build()
            .unwrap();

        assert_eq!(schema.type_name, "resource");
        assert_eq!(schema.primary_key, vec!["id"]);
        assert_eq!(schema.columns.len(), 3);
        assert!(schema.has_history);
        assert!(schema.has_translation);
        assert!(schema.is_key_column("id"));
        assert!(!schema.is_key_column("name"));
    }

    #[test]
    fn test_missing_primary_key_is_fatal() {
        let err = TypeSchema::builder("orphan")
            .column("name", DataType::Text)
            .build()
            .unwrap_err();

        assert!(matches!(err, DbError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = TypeSchema::builder("dup")
            .key_column("id", DataType::Uuid)
            .column("name", DataType::Text)
            .column("name", DataType::Text)
            .build()
            .unwrap_err();

        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn test_text_columns_selects_translatable() {
        let schema = TypeSchema::builder("package")
            .key_column("id", DataType::Uuid)
            .column("name", DataType::Text)
            .column("urn", DataType::Text)
            .column("isdelegable", DataType::Boolean)
            .build()
            .unwrap();

        assert_eq!(schema.text_columns(), vec!["name", "urn"]);
    }
}
