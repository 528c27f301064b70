//! Staging-to-target merge statement.

use crate::config::SchemaNames;
use crate::query::builder::{QueryBuilder, TableKind};
use crate::schema::TypeSchema;

/// The rendered merge plus the fragments describing what a matched-row
/// update would look like.
///
/// Only the `WHEN NOT MATCHED THEN INSERT` branch is part of `sql`: rows
/// already present under the match columns are left untouched, even when
/// their non-key columns differ. `update_fragment` and `change_predicate`
/// are rendered for diagnostics and tests, not execution.
#[derive(Debug)]
pub struct MergeStatement {
    pub sql: String,
    pub update_fragment: String,
    pub change_predicate: String,
}

/// Render the merge from the staging table into the target table, matching
/// on `match_columns` (the primary key when empty).
pub fn build_merge_statement(
    schema: &TypeSchema,
    names: &SchemaNames,
    staging_table: &str,
    match_columns: &[String],
) -> MergeStatement {
    let target = QueryBuilder::new(schema, names).table_name(TableKind::Base);

    let match_columns: Vec<String> = if match_columns.is_empty() {
        schema.primary_key.clone()
    } else {
        match_columns
            .iter()
            .map(|c| c.to_ascii_lowercase())
            .collect()
    };

    let columns = schema.column_names();
    let non_match: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| !match_columns.iter().any(|m| m == c))
        .collect();

    let match_predicate = match_columns
        .iter()
        .map(|c| format!("target.{} = source.{}", c, c))
        .collect::<Vec<_>>()
        .join(" AND ");

    let change_predicate = non_match
        .iter()
        .map(|c| format!("target.{} <> source.{}", c, c))
        .collect::<Vec<_>>()
        .join(" OR ");

    let update_fragment = non_match
        .iter()
        .map(|c| format!("{} = source.{}", c, c))
        .collect::<Vec<_>>()
        .join(", ");

    let insert_columns = columns.join(", ");
    let insert_values = columns
        .iter()
        .map(|c| format!("source.{}", c))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "MERGE INTO {target} AS target USING {staging} AS source ON {predicate}\nWHEN NOT MATCHED THEN\nINSERT ({columns}) VALUES ({values});",
        target = target,
        staging = staging_table,
        predicate = match_predicate,
        columns = insert_columns,
        values = insert_values,
    );

    MergeStatement {
        sql,
        update_fragment,
        change_predicate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;

    fn schema() -> TypeSchema {
        TypeSchema::builder("resource")
            .key_column("id", DataType::Uuid)
            .column("name", DataType::Text)
            .column("providerid", DataType::Uuid)
            .build()
            .unwrap()
    }

    #[test]
    fn test_merge_defaults_to_primary_key_match() {
        let statement =
            build_merge_statement(&schema(), &SchemaNames::default(), "ingest.resource_x", &[]);

        assert!(statement
            .sql
            .starts_with("MERGE INTO dbo.resource AS target USING ingest.resource_x AS source ON target.id = source.id"));
    }

    #[test]
    fn test_merge_is_insert_only() {
        // Matched-but-changed rows are not updated: the update branch is
        // rendered for inspection but absent from the executed statement.
        let statement =
            build_merge_statement(&schema(), &SchemaNames::default(), "ingest.resource_x", &[]);

        assert!(statement.sql.contains("WHEN NOT MATCHED THEN"));
        assert!(!statement.sql.contains("WHEN MATCHED"));
        assert!(!statement.sql.contains("UPDATE SET"));

        assert_eq!(
            statement.update_fragment,
            "name = source.name, providerid = source.providerid"
        );
        assert_eq!(
            statement.change_predicate,
            "target.name <> source.name OR target.providerid <> source.providerid"
        );
        assert!(!statement.sql.contains(&statement.update_fragment));
    }

    #[test]
    fn test_merge_with_explicit_match_columns() {
        let statement = build_merge_statement(
            &schema(),
            &SchemaNames::default(),
            "ingest.resource_x",
            &["providerid".to_string(), "name".to_string()],
        );

        assert!(statement
            .sql
            .contains("ON target.providerid = source.providerid AND target.name = source.name"));
        assert_eq!(statement.update_fragment, "id = source.id");
    }

    #[test]
    fn test_merge_inserts_all_columns() {
        let statement =
            build_merge_statement(&schema(), &SchemaNames::default(), "ingest.resource_x", &[]);

        assert!(statement.sql.contains(
            "INSERT (id, name, providerid) VALUES (source.id, source.name, source.providerid)"
        ));
    }
}
