//! The migration ledger: one row per applied DDL statement.
//!
//! The ledger is the sole mechanism deciding whether a statement needs to
//! run, and — through its unique index — the sole cross-process guard
//! against double-application. Rows are appended, never updated or deleted.

use chrono::{DateTime, Utc};

use crate::binder::{field, FromRow, RowSource};
use crate::error::Result;

/// Fully-qualified ledger table name. Fixed, not derived from the schema
/// configuration: every deployment writes the same ledger.
pub(crate) const LEDGER_TABLE: &str = "dbo._migration";

/// DDL for the ledger table and its uniqueness guard.
pub(crate) const LEDGER_DDL: &str = "CREATE SCHEMA IF NOT EXISTS dbo;
CREATE TABLE IF NOT EXISTS dbo._migration (
objectname text NOT NULL,
key text NOT NULL,
at timestamptz NOT NULL,
status text NOT NULL,
script text NOT NULL,
collectionid text NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_migration_objectname_key_collectionid ON dbo._migration (objectname, key, collectionid);";

/// A record of one applied DDL statement.
#[derive(Debug, Clone)]
pub struct MigrationLedgerEntry {
    /// Migration unit (type name, or "dbo" for shared objects).
    pub object_name: String,

    /// Stable string identifying the statement.
    pub key: String,

    /// When the statement was applied.
    pub at: DateTime<Utc>,

    /// Application status; always "Executed" for appended rows.
    pub status: String,

    /// The raw script text, kept for forensics.
    pub script: String,

    /// Deployment collection the entry belongs to.
    pub collection_id: String,
}

impl MigrationLedgerEntry {
    /// A fresh entry for a just-executed script.
    pub fn executed(
        object_name: impl Into<String>,
        key: impl Into<String>,
        script: impl Into<String>,
        collection_id: impl Into<String>,
    ) -> Self {
        Self {
            object_name: object_name.into(),
            key: key.into(),
            at: Utc::now(),
            status: "Executed".to_string(),
            script: script.into(),
            collection_id: collection_id.into(),
        }
    }

    /// Whether this entry proves `key` already ran for `object_name`.
    pub fn matches(&self, object_name: &str, key: &str) -> bool {
        self.object_name == object_name && self.key == key
    }
}

impl FromRow for MigrationLedgerEntry {
    fn from_row(row: &dyn RowSource, prefix: &str) -> Result<Self> {
        Ok(Self {
            object_name: field(row, prefix, "objectname")?,
            key: field(row, prefix, "key")?,
            at: field(row, prefix, "at")?,
            status: field(row, prefix, "status")?,
            script: field(row, prefix, "script")?,
            collection_id: field(row, prefix, "collectionid")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::FixtureRow;
    use crate::value::SqlValue;

    #[test]
    fn test_entry_matches_on_object_and_key() {
        let entry = MigrationLedgerEntry::executed(
            "resource",
            "CREATE TABLE dbo.resource",
            "CREATE TABLE ...",
            "v1",
        );

        assert!(entry.matches("resource", "CREATE TABLE dbo.resource"));
        assert!(!entry.matches("resource", "CREATE TABLE dbo.provider"));
        assert!(!entry.matches("provider", "CREATE TABLE dbo.resource"));
    }

    #[test]
    fn test_entry_from_row() {
        let mut row = FixtureRow::new();
        row.set("objectname", SqlValue::Text("resource".into()));
        row.set("key", SqlValue::Text("CREATE TABLE dbo.resource".into()));
        row.set("at", SqlValue::Timestamptz(Utc::now()));
        row.set("status", SqlValue::Text("Executed".into()));
        row.set("script", SqlValue::Text("CREATE TABLE ...".into()));
        row.set("collectionid", SqlValue::Text("v1".into()));

        let entry = MigrationLedgerEntry::from_row(&row, "").unwrap();
        assert_eq!(entry.object_name, "resource");
        assert_eq!(entry.collection_id, "v1");
    }
}
