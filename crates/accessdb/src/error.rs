//! Error types for the persistence engine.

use thiserror::Error;

/// Main error type for database access, migration and ingest operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// Configuration error (invalid YAML, missing fields, bad ssl_mode, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database driver error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Connection pool error with context about where it occurred.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A type was used before a schema descriptor was registered for it.
    #[error("No schema definition found for type '{type_name}'")]
    MissingDefinition { type_name: String },

    /// A declared primary-key column has no matching column definition.
    /// Indicates domain/schema drift and is not recoverable at runtime.
    #[error("Type '{type_name}' does not define primary-key column '{column}'")]
    MissingPrimaryKey { type_name: String, column: String },

    /// A filter used a comparator the query builder cannot render.
    #[error("Comparator '{comparator}' is not supported for property '{property}'")]
    UnsupportedComparator {
        comparator: String,
        property: String,
    },

    /// Two join registrations produced the same column alias prefix.
    #[error("Join alias prefix '{prefix}' is already in use on '{type_name}'")]
    AliasCollision { type_name: String, prefix: String },

    /// An extended lookup by id found no row.
    #[error("{type_name} with id '{id}' not found")]
    NotFound { type_name: String, id: String },

    /// A value could not be converted between a domain field and a column.
    #[error("Binding failed for {type_name}.{column}: {message}")]
    Bind {
        type_name: String,
        column: String,
        message: String,
    },

    /// A statement failed; carries the rendered SQL and parameter values
    /// for diagnosability, plus the SQLSTATE code when the driver saw one.
    #[error("Query failed: {message}\n  SQL: {sql}\n  Params: {params}")]
    Query {
        message: String,
        sql: String,
        params: String,
        code: Option<String>,
    },

    /// A migration statement failed after exhausting retries.
    #[error("Migration '{key}' for '{object_name}' failed: {message}")]
    Migration {
        object_name: String,
        key: String,
        message: String,
    },

    /// A bulk ingest batch failed.
    #[error("Ingest into {table} failed: {message}")]
    Ingest { table: String, message: String },

    /// JSON serialization/deserialization error (collection columns).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error (configuration files).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error (config file reads).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation was cancelled via the cancel channel.
    #[error("Operation cancelled")]
    Cancelled,
}

impl DbError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        DbError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Query error carrying the statement text and parameter preview.
    pub fn query(message: impl ToString, sql: impl Into<String>, params: String) -> Self {
        DbError::Query {
            message: message.to_string(),
            sql: sql.into(),
            params,
            code: None,
        }
    }

    /// Wrap a driver error, preserving its SQLSTATE code.
    pub fn pg_query(error: tokio_postgres::Error, sql: impl Into<String>, params: String) -> Self {
        let code = error.code().map(|c| c.code().to_string());
        DbError::Query {
            message: error.to_string(),
            sql: sql.into(),
            params,
            code,
        }
    }

    /// Whether this error is a unique-constraint violation. The migration
    /// ledger relies on this to detect concurrent double-application.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Query { code: Some(code), .. } => code == "23505",
            DbError::Database(e) => {
                e.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }

    /// Create a Bind error naming the owning type and column.
    pub fn bind(
        type_name: impl Into<String>,
        column: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        DbError::Bind {
            type_name: type_name.into(),
            column: column.into(),
            message: message.to_string(),
        }
    }

    /// Create an Ingest error.
    pub fn ingest(table: impl Into<String>, message: impl ToString) -> Self {
        DbError::Ingest {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Format error with full details including the source chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, DbError>;
