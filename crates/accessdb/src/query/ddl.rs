//! Migration DDL generation.
//!
//! Pure template rendering over a [`TypeSchema`]: no connection required, so
//! every script shape is unit-testable. The migration engine decides what to
//! execute; this module only decides what the statements say.
//!
//! Script order within a type is fixed and reproducible:
//! base table → translation table → history table → history-translation
//! table, then columns (each fanned across the same four tables), then
//! constraints, then the history triggers and as-of views.

use tracing::warn;

use crate::config::SchemaNames;
use crate::query::builder::{QueryBuilder, TableKind};
use crate::schema::{ColumnDef, ForeignKeyDef, TypeSchema, UniqueConstraintDef};

/// Postgres folds identifiers longer than 63 bytes; generated names are cut
/// explicitly so the ledger key and the database agree on the name.
const MAX_IDENTIFIER_LEN: usize = 63;

/// One DDL statement with its stable ledger key.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub key: String,
    pub sql: String,
}

/// All scripts for one migration unit (one type), plus the type names it
/// depends on (foreign-key targets must be Logged first).
#[derive(Debug, Clone)]
pub struct MigrationScriptCollection {
    pub type_name: String,
    pub scripts: Vec<MigrationScript>,
    pub dependencies: Vec<String>,
}

/// DDL builder bound to one schema.
pub struct DdlBuilder<'a> {
    schema: &'a TypeSchema,
    names: &'a SchemaNames,
}

impl<'a> DdlBuilder<'a> {
    pub fn new(schema: &'a TypeSchema, names: &'a SchemaNames) -> Self {
        Self { schema, names }
    }

    /// The full, ordered script collection for this type.
    pub fn script_collection(&self) -> MigrationScriptCollection {
        let mut scripts = Vec::new();

        scripts.extend(self.create_tables());

        for column in self.non_key_columns() {
            scripts.extend(self.create_column(column));
        }

        for fk in &self.schema.foreign_keys {
            scripts.extend(self.foreign_key(fk));
        }

        for uc in &self.schema.unique_constraints {
            scripts.push(self.unique_constraint(uc));
        }

        if self.schema.has_history {
            scripts.extend(self.history_scripts(false));
            if self.schema.has_translation {
                scripts.extend(self.history_scripts(true));
            }
        }

        MigrationScriptCollection {
            type_name: self.schema.type_name.clone(),
            scripts,
            dependencies: self
                .schema
                .foreign_keys
                .iter()
                .map(|fk| fk.ref_type.clone())
                .collect(),
        }
    }

    fn builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self.schema, self.names)
    }

    fn non_key_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.schema
            .columns
            .iter()
            .filter(|c| !self.schema.is_key_column(&c.name))
    }

    /// CREATE TABLE statements in the fixed four-table order. Tables start
    /// with only the primary-key columns; everything else arrives through
    /// append-only ADD COLUMN scripts so old and new deployments converge.
    fn create_tables(&self) -> Vec<MigrationScript> {
        let builder = self.builder();
        let mut scripts = Vec::new();

        let base = builder.table_name(TableKind::Base);
        scripts.push(MigrationScript {
            key: format!("CREATE TABLE {}", base),
            sql: self.create_table_sql(&base, false, false),
        });

        if self.schema.has_translation {
            let translation = builder.table_name(TableKind::Translation);
            scripts.push(MigrationScript {
                key: format!("CREATE TABLE {}", translation),
                sql: self.create_table_sql(&translation, false, true),
            });

            // Translation rows die with the base row.
            let fk_name = truncate_identifier(&format!(
                "fk_translation_{}_id",
                self.schema.type_name
            ));
            scripts.push(MigrationScript {
                key: format!("ADD CONSTRAINT {}.{}", translation, fk_name),
                sql: format!(
                    "ALTER TABLE {translation} DROP CONSTRAINT IF EXISTS {fk};\nALTER TABLE {translation} ADD CONSTRAINT {fk} FOREIGN KEY (id) REFERENCES {base} (id) ON DELETE CASCADE;",
                    translation = translation,
                    fk = fk_name,
                    base = base,
                ),
            });
        }

        if self.schema.has_history {
            let history = builder.table_name(TableKind::History);
            scripts.push(MigrationScript {
                key: format!("CREATE TABLE {}", history),
                sql: self.create_table_sql(&history, true, false),
            });

            if self.schema.has_translation {
                let translation_history = builder.table_name(TableKind::TranslationHistory);
                scripts.push(MigrationScript {
                    key: format!("CREATE TABLE {}", translation_history),
                    sql: self.create_table_sql(&translation_history, true, true),
                });
            }
        }

        scripts
    }

    fn create_table_sql(&self, table: &str, is_history: bool, is_translation: bool) -> String {
        let key_columns: Vec<String> = self
            .schema
            .primary_key
            .iter()
            .map(|k| {
                let column = self.schema.column(k).expect("validated by builder");
                format!("{} {} NOT NULL", column.name, column.data_type.postgres())
            })
            .collect();

        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (\n{}", table, key_columns.join(",\n"));

        if self.schema.has_history {
            sql.push_str(",\nvalidfrom timestamptz NOT NULL DEFAULT now()");
        }
        if is_history {
            sql.push_str(",\nvalidto timestamptz NOT NULL DEFAULT now()");
        }
        if is_translation {
            sql.push_str(",\nlanguage text NOT NULL");
        }

        // History tables are trigger-populated heaps; only live tables get
        // a primary key.
        if !is_history {
            let mut key = self.schema.primary_key.join(", ");
            if is_translation {
                key.push_str(", language");
            }
            sql.push_str(&format!(
                ",\nCONSTRAINT pk_{} PRIMARY KEY ({})",
                self.schema.type_name, key
            ));
        }

        sql.push_str("\n);");
        sql
    }

    /// ADD COLUMN scripts for one column, fanned across all four tables.
    /// Shadow tables always take the column as nullable: history rows
    /// predate the column and translation rows override selectively.
    fn create_column(&self, column: &ColumnDef) -> Vec<MigrationScript> {
        if column.is_nullable && column.default_value.is_none() {
            warn!(
                "{}.{}: a nullable column with no default value will fail to backfill on a non-empty table",
                self.schema.type_name, column.name
            );
        }

        let builder = self.builder();
        let mut scripts = vec![self.add_column_sql(
            &builder.table_name(TableKind::Base),
            column,
            column.is_nullable,
        )];

        if self.schema.has_translation {
            scripts.push(self.add_column_sql(
                &builder.table_name(TableKind::Translation),
                column,
                true,
            ));
        }

        if self.schema.has_history {
            scripts.push(self.add_column_sql(&builder.table_name(TableKind::History), column, true));
            if self.schema.has_translation {
                scripts.push(self.add_column_sql(
                    &builder.table_name(TableKind::TranslationHistory),
                    column,
                    true,
                ));
            }
        }

        scripts
    }

    fn add_column_sql(&self, table: &str, column: &ColumnDef, nullable: bool) -> MigrationScript {
        let default = column
            .default_value
            .as_deref()
            .map(|d| format!(" DEFAULT {}", d))
            .unwrap_or_default();

        MigrationScript {
            key: format!("ADD COLUMN {}.{}", table, column.name),
            sql: format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {} {}{};",
                table,
                column.name,
                column.data_type.postgres(),
                if nullable { "NULL" } else { "NOT NULL" },
                default,
            ),
        }
    }

    /// Foreign-key constraint plus its lookup index.
    fn foreign_key(&self, fk: &ForeignKeyDef) -> Vec<MigrationScript> {
        let table = self.builder().table_name(TableKind::Base);
        let ref_table = format!("{}.{}", self.names.base, fk.ref_type);
        let name = truncate_identifier(&format!("fk_{}_{}", self.schema.type_name, fk.column));
        let on_delete = if fk.cascade_delete {
            "ON DELETE CASCADE"
        } else {
            "ON DELETE SET NULL"
        };

        let constraint = MigrationScript {
            key: format!("ADD CONSTRAINT {}.{}", table, name),
            sql: format!(
                "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {name};\nALTER TABLE {table} ADD CONSTRAINT {name} FOREIGN KEY ({column}) REFERENCES {ref_table} ({ref_column}) {on_delete};",
                table = table,
                name = name,
                column = fk.column,
                ref_table = ref_table,
                ref_column = fk.ref_column,
                on_delete = on_delete,
            ),
        };

        let index_name = truncate_identifier(&format!(
            "fk_{}_{}_{}_idx",
            self.schema.type_name, fk.column, fk.ref_type
        ));
        let index = MigrationScript {
            key: format!("CREATE INDEX {}", index_name),
            sql: format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
                index_name, table, fk.column
            ),
        };

        vec![constraint, index]
    }

    fn unique_constraint(&self, uc: &UniqueConstraintDef) -> MigrationScript {
        let table = self.builder().table_name(TableKind::Base);
        let name = truncate_identifier(&format!(
            "uc_{}_{}",
            self.schema.type_name,
            uc.columns.join("_")
        ));

        MigrationScript {
            key: format!("ADD CONSTRAINT {}.{}", table, name),
            sql: format!(
                "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {name};\nALTER TABLE {table} ADD CONSTRAINT {name} UNIQUE ({columns});",
                table = table,
                name = name,
                columns = uc.columns.join(", "),
            ),
        }
    }

    /// Temporal history provisioning for the live table (or its translation
    /// sibling): validfrom stamping, old-row copy on update, as-of view.
    fn history_scripts(&self, is_translation: bool) -> Vec<MigrationScript> {
        let builder = self.builder();
        let type_name = &self.schema.type_name;

        let (table, history_table, view) = if is_translation {
            (
                builder.table_name(TableKind::Translation),
                builder.table_name(TableKind::TranslationHistory),
                builder.table_name(TableKind::TranslationHistoryView),
            )
        } else {
            (
                builder.table_name(TableKind::Base),
                builder.table_name(TableKind::History),
                builder.table_name(TableKind::HistoryView),
            )
        };

        let columns: Vec<&str> = self.schema.column_names();
        let column_list = columns.join(", ");
        let old_columns: Vec<String> = columns.iter().map(|c| format!("OLD.{}", c)).collect();
        let language_column = if is_translation { "language, " } else { "" };
        let old_language = if is_translation { "OLD.language, " } else { "" };

        let validfrom_trigger = MigrationScript {
            key: format!("TRIGGER {}_update_validfrom ON {}", type_name, table),
            sql: format!(
                "CREATE OR REPLACE TRIGGER {type_name}_update_validfrom BEFORE UPDATE ON {table}\nFOR EACH ROW EXECUTE FUNCTION {base}.update_validfrom();",
                type_name = type_name,
                table = table,
                base = self.names.base,
            ),
        };

        let copy_function = MigrationScript {
            key: format!("FUNCTION {}_copy_to_history()", table),
            sql: format!(
                "CREATE OR REPLACE FUNCTION {table}_copy_to_history() RETURNS TRIGGER AS $$ BEGIN\nINSERT INTO {history} ({columns}, {language}validfrom, validto) VALUES ({old_columns}, {old_language}OLD.validfrom, now());\nRETURN NEW;\nEND; $$ LANGUAGE plpgsql;\nCREATE OR REPLACE TRIGGER {type_name}_history AFTER UPDATE ON {table}\nFOR EACH ROW EXECUTE FUNCTION {table}_copy_to_history();",
                table = table,
                history = history_table,
                columns = column_list,
                language = language_column,
                old_columns = old_columns.join(", "),
                old_language = old_language,
                type_name = type_name,
            ),
        };

        // The view reads app.asof from the session, defaulting to now():
        // closed history rows from the shadow table, the open row from the
        // live table.
        let as_of = "coalesce(current_setting('app.asof', true)::timestamptz, now())";
        let history_view = MigrationScript {
            key: format!("VIEW {}", view),
            sql: format!(
                "CREATE OR REPLACE VIEW {view} AS\nSELECT {columns}, {language}validfrom, validto\nFROM {history}\nWHERE validfrom <= {as_of}\nAND validto > {as_of}\nUNION ALL\nSELECT {columns}, {language}validfrom, now() AS validto\nFROM {table}\nWHERE validfrom <= {as_of};",
                view = view,
                columns = column_list,
                language = language_column,
                history = history_table,
                table = table,
                as_of = as_of,
            ),
        };

        vec![validfrom_trigger, copy_function, history_view]
    }
}

/// The shared validfrom-stamping trigger function; provisioned once per
/// database, before any per-type trigger references it.
pub fn shared_validfrom_function(names: &SchemaNames) -> MigrationScript {
    MigrationScript {
        key: "FUNCTION update_validfrom".to_string(),
        sql: format!(
            "CREATE OR REPLACE FUNCTION {base}.update_validfrom() RETURNS trigger AS\n$$\nBEGIN\n  NEW.validfrom := NOW();\n  RETURN NEW;\nEND;\n$$ LANGUAGE plpgsql;",
            base = names.base,
        ),
    }
}

fn truncate_identifier(name: &str) -> String {
    let mut name = name.to_ascii_lowercase();
    name.truncate(MAX_IDENTIFIER_LEN);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;

    fn full_schema() -> TypeSchema {
        TypeSchema::builder("resource")
            .key_column("id", DataType::Uuid)
            .column("name", DataType::Text)
            .column("providerid", DataType::Uuid)
            .foreign_key("providerid", "provider", false)
            .unique(&["name", "providerid"])
            .with_history()
            .with_translation()
            .build()
            .unwrap()
    }

    fn plain_schema() -> TypeSchema {
        TypeSchema::builder("resourcetype")
            .key_column("id", DataType::Uuid)
            .column("name", DataType::Text)
            .build()
            .unwrap()
    }

    #[test]
    fn test_four_tables_in_fixed_order() {
        let schema = full_schema();
        let names = SchemaNames::default();
        let collection = DdlBuilder::new(&schema, &names).script_collection();

        let table_keys: Vec<&str> = collection
            .scripts
            .iter()
            .filter(|s| s.key.starts_with("CREATE TABLE"))
            .map(|s| s.key.as_str())
            .collect();

        assert_eq!(
            table_keys,
            vec![
                "CREATE TABLE dbo.resource",
                "CREATE TABLE translation.resource",
                "CREATE TABLE dbo_history._resource",
                "CREATE TABLE translation_history._resource",
            ]
        );
    }

    #[test]
    fn test_generation_is_reproducible() {
        let schema = full_schema();
        let names = SchemaNames::default();

        let first = DdlBuilder::new(&schema, &names).script_collection();
        let second = DdlBuilder::new(&schema, &names).script_collection();

        let keys = |c: &MigrationScriptCollection| {
            c.scripts.iter().map(|s| s.key.clone()).collect::<Vec<_>>()
        };
        assert_eq!(keys(&first), keys(&second));
    }

    #[test]
    fn test_plain_type_gets_single_table() {
        let schema = plain_schema();
        let names = SchemaNames::default();
        let collection = DdlBuilder::new(&schema, &names).script_collection();

        let table_keys: Vec<&str> = collection
            .scripts
            .iter()
            .filter(|s| s.key.starts_with("CREATE TABLE"))
            .map(|s| s.key.as_str())
            .collect();
        assert_eq!(table_keys, vec!["CREATE TABLE dbo.resourcetype"]);
        assert!(!collection.scripts.iter().any(|s| s.key.contains("validfrom")));
    }

    #[test]
    fn test_base_table_script_shape() {
        let schema = full_schema();
        let names = SchemaNames::default();
        let collection = DdlBuilder::new(&schema, &names).script_collection();

        let base = &collection.scripts[0];
        assert!(base.sql.contains("CREATE TABLE IF NOT EXISTS dbo.resource"));
        assert!(base.sql.contains("id uuid NOT NULL"));
        assert!(base.sql.contains("validfrom timestamptz NOT NULL DEFAULT now()"));
        assert!(base.sql.contains("CONSTRAINT pk_resource PRIMARY KEY (id)"));
        // Non-key columns are added later, not inline.
        assert!(!base.sql.contains("providerid"));
    }

    #[test]
    fn test_translation_table_keyed_with_language() {
        let schema = full_schema();
        let names = SchemaNames::default();
        let collection = DdlBuilder::new(&schema, &names).script_collection();

        let translation = collection
            .scripts
            .iter()
            .find(|s| s.key == "CREATE TABLE translation.resource")
            .unwrap();
        assert!(translation.sql.contains("language text NOT NULL"));
        assert!(translation
            .sql
            .contains("CONSTRAINT pk_resource PRIMARY KEY (id, language)"));
    }

    #[test]
    fn test_history_table_has_validity_range_and_no_pk() {
        let schema = full_schema();
        let names = SchemaNames::default();
        let collection = DdlBuilder::new(&schema, &names).script_collection();

        let history = collection
            .scripts
            .iter()
            .find(|s| s.key == "CREATE TABLE dbo_history._resource")
            .unwrap();
        assert!(history.sql.contains("validfrom timestamptz NOT NULL DEFAULT now()"));
        assert!(history.sql.contains("validto timestamptz NOT NULL DEFAULT now()"));
        assert!(!history.sql.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_columns_fan_across_all_tables_nullable_in_shadows() {
        let schema = full_schema();
        let names = SchemaNames::default();
        let collection = DdlBuilder::new(&schema, &names).script_collection();

        let name_scripts: Vec<&MigrationScript> = collection
            .scripts
            .iter()
            .filter(|s| s.key.starts_with("ADD COLUMN") && s.key.ends_with(".name"))
            .collect();

        assert_eq!(name_scripts.len(), 4);
        assert!(name_scripts[0].key.contains("dbo.resource"));
        assert!(name_scripts[0].sql.contains("NOT NULL"));
        for shadow in &name_scripts[1..] {
            assert!(shadow.sql.contains("NULL"));
            assert!(!shadow.sql.contains("NOT NULL"));
        }
    }

    #[test]
    fn test_foreign_key_with_index() {
        let schema = full_schema();
        let names = SchemaNames::default();
        let collection = DdlBuilder::new(&schema, &names).script_collection();

        let fk = collection
            .scripts
            .iter()
            .find(|s| s.key == "ADD CONSTRAINT dbo.resource.fk_resource_providerid")
            .unwrap();
        assert!(fk.sql.contains(
            "ADD CONSTRAINT fk_resource_providerid FOREIGN KEY (providerid) REFERENCES dbo.provider (id) ON DELETE SET NULL"
        ));

        assert!(collection
            .scripts
            .iter()
            .any(|s| s.key == "CREATE INDEX fk_resource_providerid_provider_idx"));

        assert_eq!(collection.dependencies, vec!["provider"]);
    }

    #[test]
    fn test_history_trigger_and_view_scripts() {
        let schema = full_schema();
        let names = SchemaNames::default();
        let collection = DdlBuilder::new(&schema, &names).script_collection();

        let trigger = collection
            .scripts
            .iter()
            .find(|s| s.key == "TRIGGER resource_update_validfrom ON dbo.resource")
            .unwrap();
        assert!(trigger.sql.contains("BEFORE UPDATE ON dbo.resource"));
        assert!(trigger.sql.contains("dbo.update_validfrom()"));

        let copy = collection
            .scripts
            .iter()
            .find(|s| s.key == "FUNCTION dbo.resource_copy_to_history()")
            .unwrap();
        assert!(copy.sql.contains("INSERT INTO dbo_history._resource"));
        assert!(copy.sql.contains("OLD.id, OLD.name, OLD.providerid"));
        assert!(copy.sql.contains("OLD.validfrom, now()"));
        assert!(copy.sql.contains("AFTER UPDATE ON dbo.resource"));

        let view = collection
            .scripts
            .iter()
            .find(|s| s.key == "VIEW dbo_history.resource")
            .unwrap();
        assert!(view.sql.contains(
            "coalesce(current_setting('app.asof', true)::timestamptz, now())"
        ));
        assert!(view.sql.contains("UNION ALL"));
        assert!(view.sql.contains("now() AS validto"));
    }

    #[test]
    fn test_translation_history_carries_language() {
        let schema = full_schema();
        let names = SchemaNames::default();
        let collection = DdlBuilder::new(&schema, &names).script_collection();

        let copy = collection
            .scripts
            .iter()
            .find(|s| s.key == "FUNCTION translation.resource_copy_to_history()")
            .unwrap();
        assert!(copy.sql.contains("OLD.language"));

        let view = collection
            .scripts
            .iter()
            .find(|s| s.key == "VIEW translation_history.resource")
            .unwrap();
        assert!(view.sql.contains("language, validfrom"));
    }

    #[test]
    fn test_identifier_truncated_to_limit() {
        let schema = TypeSchema::builder("averylongtypename_thatgoeson_andkeepsgoing")
            .key_column("id", DataType::Uuid)
            .column(
                "acolumnwithanextremelylongname_reallyquitelong",
                DataType::Uuid,
            )
            .foreign_key(
                "acolumnwithanextremelylongname_reallyquitelong",
                "someothertype",
                false,
            )
            .build()
            .unwrap();
        let names = SchemaNames::default();
        let collection = DdlBuilder::new(&schema, &names).script_collection();

        for script in &collection.scripts {
            if let Some(name) = script.key.strip_prefix("CREATE INDEX ") {
                assert!(name.len() <= MAX_IDENTIFIER_LEN);
            }
        }
    }

    #[test]
    fn test_shared_validfrom_function() {
        let script = shared_validfrom_function(&SchemaNames::default());
        assert_eq!(script.key, "FUNCTION update_validfrom");
        assert!(script.sql.contains("dbo.update_validfrom()"));
        assert!(script.sql.contains("NEW.validfrom := NOW()"));
    }
}
