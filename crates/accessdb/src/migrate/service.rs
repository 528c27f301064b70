//! The migration engine.
//!
//! Each registered type is one migration unit moving through
//! NeedsMigration → Applying → Logged. Units apply in passes: a unit whose
//! foreign-key dependencies are not Logged yet waits for a later pass, a
//! unit whose statement fails goes back to the retry queue, and the run
//! keeps going with the other units. The ledger snapshot — loaded once at
//! init and appended on every successful statement — is the only thing
//! consulted to decide whether a statement runs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{DbAccessConfig, SchemaNames};
use crate::error::{DbError, Result};
use crate::executor::DbExecutor;
use crate::migrate::ledger::{MigrationLedgerEntry, LEDGER_DDL, LEDGER_TABLE};
use crate::query::ddl::{shared_validfrom_function, DdlBuilder, MigrationScript};
use crate::query::{GenericParameter, MigrationScriptCollection, Query, QueryBuilder};
use crate::schema::{DbModel, SchemaRegistry};
use crate::value::SqlValue;

/// Statements for one unit retry this many times before the unit is marked
/// failed for the run.
const MAX_RETRY: u32 = 10;

/// Per-unit progress through a run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum UnitStatus {
    NeedsMigration,
    Applying,
    Logged,
    Failed(String),
}

/// Outcome of one migration run.
#[derive(Debug, Default)]
pub struct MigrationRunSummary {
    /// Statements executed and logged this run.
    pub applied: usize,

    /// Statements skipped because the ledger already had them.
    pub skipped: usize,

    /// Units that did not reach Logged: (object name, reason).
    pub failed: Vec<(String, String)>,
}

impl MigrationRunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Service applying DDL idempotently, tracked by the append-only ledger.
pub struct MigrationService {
    executor: DbExecutor,
    registry: Arc<SchemaRegistry>,
    names: SchemaNames,
    collection_id: String,
    read_user: Option<String>,
    ledger: Vec<MigrationLedgerEntry>,
    collections: Vec<MigrationScriptCollection>,
    needs_shared_history: bool,
    initialized: bool,
}

impl MigrationService {
    pub fn new(
        executor: DbExecutor,
        registry: Arc<SchemaRegistry>,
        names: SchemaNames,
        collection_id: impl Into<String>,
        read_user: Option<String>,
    ) -> Self {
        Self {
            executor,
            registry,
            names,
            collection_id: collection_id.into(),
            read_user,
            ledger: Vec::new(),
            collections: Vec::new(),
            needs_shared_history: false,
            initialized: false,
        }
    }

    pub fn from_config(
        executor: DbExecutor,
        registry: Arc<SchemaRegistry>,
        config: &DbAccessConfig,
    ) -> Self {
        Self::new(
            executor,
            registry,
            config.schemas.clone(),
            config.collection_id.clone(),
            config.read_user.clone(),
        )
    }

    /// Generate and queue the migration scripts for a type. Registration
    /// order is the only ordering guarantee across types; callers register
    /// foreign-key targets before their dependents.
    pub fn register<T: DbModel>(&mut self) -> Result<()> {
        let schema = self.registry.schema::<T>()?;

        if self.collections.iter().any(|c| c.type_name == schema.type_name) {
            warn!("Type '{}' registered twice for migration", schema.type_name);
            return Ok(());
        }

        if schema.has_history {
            self.needs_shared_history = true;
        }

        self.collections
            .push(DdlBuilder::new(&schema, &self.names).script_collection());
        Ok(())
    }

    /// Queue a hand-written statement under a named object (standalone
    /// views, helper functions). Ledger semantics are the same as for
    /// generated scripts: the (object, key) pair decides whether it runs.
    pub fn register_script(&mut self, object_name: &str, key: &str, sql: &str) {
        let script = MigrationScript {
            key: key.to_string(),
            sql: sql.to_string(),
        };

        match self
            .collections
            .iter_mut()
            .find(|c| c.type_name == object_name)
        {
            Some(collection) => collection.scripts.push(script),
            None => self.collections.push(MigrationScriptCollection {
                type_name: object_name.to_string(),
                scripts: vec![script],
                dependencies: Vec::new(),
            }),
        }
    }

    /// Provision schemas and the ledger, then load the in-memory snapshot.
    pub async fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let schemas = [
            self.names.base.clone(),
            self.names.translation.clone(),
            self.names.base_history(),
            self.names.translation_history(),
        ];
        for schema in &schemas {
            self.executor
                .execute_script(&format!("CREATE SCHEMA IF NOT EXISTS {};", schema))
                .await?;
        }

        if let Some(read_user) = &self.read_user {
            for schema in &schemas {
                self.executor
                    .execute_script(&format!(
                        "GRANT USAGE ON SCHEMA {schema} TO {user};\nGRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {schema} TO {user};",
                        schema = schema,
                        user = read_user,
                    ))
                    .await?;
            }
        }

        self.executor.execute_script(LEDGER_DDL).await?;

        let mut query = Query::new(format!(
            "SELECT objectname, key, at, status, script, collectionid FROM {} WHERE collectionid = $1",
            LEDGER_TABLE
        ));
        query.params.push(SqlValue::Text(self.collection_id.clone()));
        self.ledger = self.executor.query(&query).await?;

        info!(
            entries = self.ledger.len(),
            collection = %self.collection_id,
            "Migration ledger loaded"
        );
        self.initialized = true;
        Ok(())
    }

    /// Run all queued migrations. A failing statement sends its unit to the
    /// retry queue and the run continues with other units; only units that
    /// exhaust their retries (or wait on one that did) end up failed.
    pub async fn migrate(
        &mut self,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<MigrationRunSummary> {
        self.init().await?;

        if self.collections.is_empty() {
            return Err(DbError::Config(
                "Nothing to migrate. Register types before calling migrate.".into(),
            ));
        }

        let mut summary = MigrationRunSummary::default();

        if self.needs_shared_history {
            let script = shared_validfrom_function(&self.names);
            self.apply_script("dbo", &script, &mut summary).await?;
        }

        let mut status: HashMap<String, UnitStatus> = self
            .collections
            .iter()
            .map(|c| (c.type_name.clone(), UnitStatus::NeedsMigration))
            .collect();
        let mut retries: HashMap<String, u32> = HashMap::new();
        let collections = self.collections.clone();

        loop {
            if let Some(cancel) = &cancel {
                if *cancel.borrow() {
                    return Err(DbError::Cancelled);
                }
            }

            let mut progressed = false;

            for collection in &collections {
                let name = collection.type_name.clone();
                if status[&name] != UnitStatus::NeedsMigration {
                    continue;
                }

                let retry = retries.entry(name.clone()).or_default();
                if *retry > MAX_RETRY {
                    warn!(unit = %name, "Migration unit exceeded retry limit");
                    status.insert(name, UnitStatus::Failed("max retry reached".into()));
                    progressed = true;
                    continue;
                }

                // Nothing left to run for this unit: it is Logged without
                // waiting for dependencies.
                if pending_scripts(&self.ledger, collection).is_empty() {
                    status.insert(name, UnitStatus::Logged);
                    progressed = true;
                    continue;
                }

                let ready = collection.dependencies.iter().all(|dep| {
                    matches!(status.get(dep), Some(UnitStatus::Logged))
                        || self.dependency_satisfied(dep)
                });
                if !ready {
                    debug!(unit = %name, "Migration unit waiting on dependencies");
                    *retries.entry(name).or_default() += 1;
                    continue;
                }

                status.insert(name.clone(), UnitStatus::Applying);
                match self.apply_collection(collection, &mut summary).await {
                    Ok(()) => {
                        status.insert(name.clone(), UnitStatus::Logged);
                        retries.insert(name, 0);
                        progressed = true;
                    }
                    Err(e) => {
                        warn!(unit = %name, error = %e, "Migration unit failed, queued for retry");
                        status.insert(name.clone(), UnitStatus::NeedsMigration);
                        *retries.entry(name).or_default() += 1;
                    }
                }
            }

            let open: Vec<String> = status
                .iter()
                .filter(|(_, s)| !matches!(s, UnitStatus::Logged | UnitStatus::Failed(_)))
                .map(|(n, _)| n.clone())
                .collect();

            if open.is_empty() {
                break;
            }

            if !progressed && open.iter().all(|n| retries.get(n).copied().unwrap_or(0) > MAX_RETRY) {
                break;
            }
        }

        for (name, state) in &status {
            match state {
                UnitStatus::Logged => info!(unit = %name, "Migration unit logged"),
                UnitStatus::Failed(reason) => {
                    summary.failed.push((name.clone(), reason.clone()));
                }
                other => {
                    summary
                        .failed
                        .push((name.clone(), format!("run ended in state {:?}", other)));
                }
            }
        }

        info!(
            applied = summary.applied,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            "Migration run finished"
        );
        Ok(summary)
    }

    /// A dependency registered in an earlier run (or by another deployment)
    /// is satisfied when its base table is already in the ledger.
    fn dependency_satisfied(&self, dep: &str) -> bool {
        let key = format!("CREATE TABLE {}.{}", self.names.base, dep);
        self.ledger.iter().any(|e| e.matches(dep, &key))
    }

    async fn apply_collection(
        &mut self,
        collection: &MigrationScriptCollection,
        summary: &mut MigrationRunSummary,
    ) -> Result<()> {
        for script in &collection.scripts {
            self.apply_script(&collection.type_name, script, summary)
                .await?;
        }
        Ok(())
    }

    /// Apply a single statement if the snapshot does not already prove it
    /// ran, then append it to the ledger and the snapshot.
    async fn apply_script(
        &mut self,
        object_name: &str,
        script: &MigrationScript,
        summary: &mut MigrationRunSummary,
    ) -> Result<()> {
        if !needs_migration(&self.ledger, object_name, &script.key) {
            summary.skipped += 1;
            return Ok(());
        }

        debug!(key = %script.key, "Applying migration statement");
        self.executor.execute_script(&script.sql).await?;
        self.log_migration(object_name, script).await?;
        summary.applied += 1;
        Ok(())
    }

    async fn log_migration(&mut self, object_name: &str, script: &MigrationScript) -> Result<()> {
        let entry = MigrationLedgerEntry::executed(
            object_name,
            &script.key,
            &script.sql,
            &self.collection_id,
        );

        let parameters = vec![
            GenericParameter::new("objectname", entry.object_name.clone()),
            GenericParameter::new("key", entry.key.clone()),
            GenericParameter::new("at", entry.at),
            GenericParameter::new("status", entry.status.clone()),
            GenericParameter::new("script", entry.script.clone()),
            GenericParameter::new("collectionid", entry.collection_id.clone()),
        ];

        let mut query = Query::new(format!(
            "INSERT INTO {} (objectname, key, at, status, script, collectionid) VALUES ($1, $2, $3, $4, $5, $6)",
            LEDGER_TABLE
        ));
        query.params = parameters.into_iter().map(|p| p.value).collect();

        match self.executor.execute(&query).await {
            Ok(_) => {}
            // A concurrent run applied the same statement first; its ledger
            // row is the proof, ours is redundant.
            Err(e) if e.is_unique_violation() => {
                debug!(key = %entry.key, "Ledger entry already written by a concurrent run");
            }
            Err(e) => return Err(e),
        }

        info!(key = %entry.key, "Migration logged");
        self.ledger.push(entry);
        Ok(())
    }

    /// Rendered per-type scripts, exposed for inspection/export tooling.
    pub fn planned_scripts(&self) -> &[MigrationScriptCollection] {
        &self.collections
    }

    /// Fully-qualified table name helper for callers coordinating with the
    /// engine (the ingest pipeline's staging DDL).
    pub fn table_name<T: DbModel>(&self) -> Result<String> {
        let schema = self.registry.schema::<T>()?;
        Ok(QueryBuilder::new(&schema, &self.names)
            .table_name(crate::query::builder::TableKind::Base))
    }
}

/// Whether the snapshot lacks an entry for (object, key): absence means the
/// statement must run.
fn needs_migration(ledger: &[MigrationLedgerEntry], object_name: &str, key: &str) -> bool {
    !ledger.iter().any(|e| e.matches(object_name, key))
}

/// The statements of a collection the snapshot does not already cover.
fn pending_scripts<'c>(
    ledger: &[MigrationLedgerEntry],
    collection: &'c MigrationScriptCollection,
) -> Vec<&'c MigrationScript> {
    collection
        .scripts
        .iter()
        .filter(|s| needs_migration(ledger, &collection.type_name, &s.key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ddl::DdlBuilder;
    use crate::schema::{DataType, TypeSchema};

    fn collection() -> MigrationScriptCollection {
        let schema = TypeSchema::builder("resource")
            .key_column("id", DataType::Uuid)
            .column("name", DataType::Text)
            .with_history()
            .build()
            .unwrap();
        DdlBuilder::new(&schema, &SchemaNames::default()).script_collection()
    }

    fn entries_for(collection: &MigrationScriptCollection) -> Vec<MigrationLedgerEntry> {
        collection
            .scripts
            .iter()
            .map(|s| {
                MigrationLedgerEntry::executed(&collection.type_name, &s.key, &s.sql, "v1")
            })
            .collect()
    }

    #[test]
    fn test_empty_ledger_needs_everything() {
        let collection = collection();
        let pending = pending_scripts(&[], &collection);
        assert_eq!(pending.len(), collection.scripts.len());
    }

    #[test]
    fn test_full_ledger_needs_nothing() {
        // The idempotence property: a second run over the ledger state
        // produced by the first run has zero statements to apply.
        let collection = collection();
        let ledger = entries_for(&collection);
        assert!(pending_scripts(&ledger, &collection).is_empty());
    }

    #[test]
    fn test_partial_ledger_needs_remainder() {
        let collection = collection();
        let mut ledger = entries_for(&collection);
        let removed = ledger.pop().unwrap();

        let pending = pending_scripts(&ledger, &collection);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, removed.key);
    }

    #[test]
    fn test_key_matching_is_scoped_to_object() {
        let collection = collection();
        // Same keys logged under a different object name prove nothing.
        let ledger: Vec<MigrationLedgerEntry> = collection
            .scripts
            .iter()
            .map(|s| MigrationLedgerEntry::executed("othertype", &s.key, &s.sql, "v1"))
            .collect();

        assert_eq!(
            pending_scripts(&ledger, &collection).len(),
            collection.scripts.len()
        );
    }
}
