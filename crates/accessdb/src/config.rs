//! Configuration for the persistence engine.
//!
//! Loaded from YAML. Schema names follow the platform convention: the two
//! configured schemas (base, translation) each get a `_history` sibling that
//! the migration engine provisions.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbAccessConfig {
    /// Database connection settings.
    pub connection: ConnectionConfig,

    /// Schema naming.
    #[serde(default)]
    pub schemas: SchemaNames,

    /// Identifier grouping the ledger entries written by this deployment.
    #[serde(default = "default_collection_id")]
    pub collection_id: String,

    /// Role granted read/write on the provisioned schemas, when set.
    #[serde(default)]
    pub read_user: Option<String>,

    /// Whether the migration engine runs at startup.
    #[serde(default = "default_true")]
    pub enable_migration: bool,
}

impl DbAccessConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DbAccessConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field combinations that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.connection.host.is_empty() {
            return Err(DbError::Config("connection.host must not be empty".into()));
        }

        if self.collection_id.is_empty() {
            return Err(DbError::Config("collection_id must not be empty".into()));
        }

        match self.connection.ssl_mode.as_str() {
            "disable" | "require" | "verify-ca" | "verify-full" => {}
            other => {
                return Err(DbError::Config(format!(
                    "Invalid ssl_mode '{}'. Valid options: disable, require, verify-ca, verify-full",
                    other
                )));
            }
        }

        self.schemas.validate()
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// TLS mode: disable, require, verify-ca, verify-full.
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 8).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Schema names for the four physical schemas each type can span.
///
/// The history names are derived, never configured, so the naming
/// convention stays fixed across deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaNames {
    /// Schema holding the live tables (default: "dbo").
    #[serde(default = "default_base_schema")]
    pub base: String,

    /// Schema holding the translation shadow tables (default: "translation").
    #[serde(default = "default_translation_schema")]
    pub translation: String,
}

impl Default for SchemaNames {
    fn default() -> Self {
        Self {
            base: default_base_schema(),
            translation: default_translation_schema(),
        }
    }
}

impl SchemaNames {
    /// History sibling of the base schema.
    pub fn base_history(&self) -> String {
        format!("{}_history", self.base)
    }

    /// History sibling of the translation schema.
    pub fn translation_history(&self) -> String {
        format!("{}_history", self.translation)
    }

    fn validate(&self) -> Result<()> {
        for name in [&self.base, &self.translation] {
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(DbError::Config(format!("Invalid schema name '{}'", name)));
            }
        }
        Ok(())
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "require".to_string()
}

fn default_max_connections() -> usize {
    8
}

fn default_base_schema() -> String {
    "dbo".to_string()
}

fn default_translation_schema() -> String {
    "translation".to_string()
}

fn default_collection_id() -> String {
    "v1".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
connection:
  host: localhost
  database: accessdb
  user: app
  password: secret
  ssl_mode: disable
"#
    }

    #[test]
    fn test_defaults_applied() {
        let config: DbAccessConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.connection.port, 5432);
        assert_eq!(config.schemas.base, "dbo");
        assert_eq!(config.schemas.translation, "translation");
        assert_eq!(config.collection_id, "v1");
        assert!(config.enable_migration);
    }

    #[test]
    fn test_history_schema_names_derived() {
        let names = SchemaNames::default();
        assert_eq!(names.base_history(), "dbo_history");
        assert_eq!(names.translation_history(), "translation_history");
    }

    #[test]
    fn test_invalid_ssl_mode_rejected() {
        let mut config: DbAccessConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.connection.ssl_mode = "maybe".to_string();
        assert!(matches!(config.validate(), Err(DbError::Config(_))));
    }

    #[test]
    fn test_invalid_schema_name_rejected() {
        let mut config: DbAccessConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.schemas.base = "dbo;drop".to_string();
        assert!(matches!(config.validate(), Err(DbError::Config(_))));
    }
}
