//! Statement builder for one type schema.
//!
//! Renders basic and extended SELECTs, the write statements, and the
//! cross-reference join clause. Values are always positional parameters;
//! identifiers come from validated schema descriptors, never from caller
//! strings.

use std::collections::HashMap;

use uuid::Uuid;

use crate::config::SchemaNames;
use crate::error::{DbError, Result};
use crate::query::ast::{Query, SelectIr};
use crate::query::filter::{FilterComparer, GenericFilter, GenericParameter};
use crate::query::options::RequestOptions;
use crate::query::plan::{CrossRelation, JoinKind, JoinPlan, JoinSpec};
use crate::schema::{DataType, TypeSchema};
use crate::value::SqlValue;

/// Which physical table of a type a statement addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Base,
    Translation,
    History,
    HistoryView,
    TranslationHistory,
    TranslationHistoryView,
}

/// Positional parameter accumulator: pushing a value yields its `$n`
/// placeholder.
#[derive(Debug, Default)]
struct Params {
    values: Vec<SqlValue>,
}

impl Params {
    fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }
}

/// A cross-reference join clause: restricts the selected side to rows
/// related (through the join table) to one id on the other side.
#[derive(Debug)]
pub struct CrossJoin<'a> {
    pub relation: &'a CrossRelation,
    /// Join-table column referencing the selected side.
    pub join_column: &'a str,
    /// Join-table column filtered to `id` (the other side).
    pub filter_column: &'a str,
    pub id: Uuid,
}

/// Statement builder bound to one schema and the deployment's schema names.
pub struct QueryBuilder<'a> {
    schema: &'a TypeSchema,
    names: &'a SchemaNames,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(schema: &'a TypeSchema, names: &'a SchemaNames) -> Self {
        Self { schema, names }
    }

    /// Fully-qualified physical name for one of the type's tables/views.
    ///
    /// The naming convention is load-bearing for compatibility:
    /// base `dbo.resource`, translation `translation.resource`, history
    /// table `dbo_history._resource`, history view `dbo_history.resource`.
    pub fn table_name(&self, kind: TableKind) -> String {
        Self::table_name_for(self.schema, self.names, kind)
    }

    fn table_name_for(schema: &TypeSchema, names: &SchemaNames, kind: TableKind) -> String {
        let type_name = &schema.type_name;
        match kind {
            TableKind::Base => format!("{}.{}", names.base, type_name),
            TableKind::Translation => format!("{}.{}", names.translation, type_name),
            TableKind::History => format!("{}._{}", names.base_history(), type_name),
            TableKind::HistoryView => format!("{}.{}", names.base_history(), type_name),
            TableKind::TranslationHistory => {
                format!("{}._{}", names.translation_history(), type_name)
            }
            TableKind::TranslationHistoryView => {
                format!("{}.{}", names.translation_history(), type_name)
            }
        }
    }

    /// The table (or as-of view) reads are served from.
    fn read_source(&self, schema: &TypeSchema, options: &RequestOptions, translated: bool) -> String {
        let use_history = options.as_of.is_some() && schema.has_history;
        let kind = match (use_history, translated) {
            (false, false) => TableKind::Base,
            (false, true) => TableKind::Translation,
            (true, false) => TableKind::HistoryView,
            (true, true) => TableKind::TranslationHistoryView,
        };
        Self::table_name_for(schema, self.names, kind)
    }

    /// Basic SELECT over the type's own columns.
    pub fn build_basic_select(
        &self,
        options: &RequestOptions,
        filters: &[GenericFilter],
        cross: Option<&CrossJoin<'_>>,
    ) -> Result<Query> {
        let mut params = Params::default();
        let alias = self.schema.type_name.clone();
        let translated = options.language.is_some() && self.schema.has_translation;

        let mut ir = SelectIr {
            projection: self.own_columns(self.schema, &alias, translated),
            source: self.select_source(self.schema, &alias, options, &mut params),
            ..Default::default()
        };

        if let Some(cross) = cross {
            ir.joins.push(self.cross_join_clause(&alias, cross, &mut params));
        }

        self.apply_shaping(&mut ir, &alias, options)?;
        ir.predicates
            .extend(self.render_filters(&alias, filters, &mut params)?);

        Ok(Query {
            sql: ir.render(),
            params: params.values,
            settings: options.session_settings(),
        })
    }

    /// Extended SELECT: the basic projection plus every relation in the
    /// plan, each under its accumulated column prefix.
    pub fn build_extended_select(
        &self,
        plan: &JoinPlan,
        options: &RequestOptions,
        filters: &[GenericFilter],
        cross: Option<&CrossJoin<'_>>,
    ) -> Result<Query> {
        let mut params = Params::default();
        let alias = self.schema.type_name.clone();
        let translated = options.language.is_some() && self.schema.has_translation;

        let mut ir = SelectIr {
            projection: self.own_columns(self.schema, &alias, translated),
            source: self.select_source(self.schema, &alias, options, &mut params),
            ..Default::default()
        };

        for join in plan.joins() {
            match &join.kind {
                JoinKind::Object { optional } => {
                    ir.projection.extend(self.join_columns(join, options));
                    ir.joins
                        .push(self.join_clause(plan, join, *optional, options, &mut params));
                }
                JoinKind::List => {
                    ir.projection.push(self.list_column(&alias, join));
                }
            }
        }

        if let Some(cross) = cross {
            ir.joins.push(self.cross_join_clause(&alias, cross, &mut params));
        }

        self.apply_shaping(&mut ir, &alias, options)?;
        ir.predicates
            .extend(self.render_filters(&alias, filters, &mut params)?);

        Ok(Query {
            sql: ir.render(),
            params: params.values,
            settings: options.session_settings(),
        })
    }

    /// INSERT with one parameter per supplied column, sorted by name so the
    /// statement text is stable for a given column set.
    pub fn build_insert(
        &self,
        parameters: &[GenericParameter],
        for_translation: bool,
    ) -> Query {
        let mut params = Params::default();
        let sorted = sorted_by_key(parameters);

        let columns: Vec<&str> = sorted.iter().map(|p| p.key.as_str()).collect();
        let placeholders: Vec<String> = sorted
            .iter()
            .map(|p| params.push(p.value.clone()))
            .collect();

        let table = self.write_table(for_translation);
        Query {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params: params.values,
            settings: Vec::new(),
        }
    }

    /// UPDATE keyed on the primary key (plus language for translations).
    pub fn build_update(
        &self,
        parameters: &[GenericParameter],
        id: Uuid,
        language: Option<&str>,
        for_translation: bool,
    ) -> Query {
        let mut params = Params::default();
        let sorted = sorted_by_key(parameters);

        let assignments: Vec<String> = sorted
            .iter()
            .map(|p| format!("{} = {}", p.key, params.push(p.value.clone())))
            .collect();

        let table = self.write_table(for_translation);
        let mut sql = format!(
            "UPDATE {} SET {} WHERE id = {}",
            table,
            assignments.join(", "),
            params.push(SqlValue::Uuid(id))
        );

        if for_translation {
            let language = language.unwrap_or_default().to_string();
            sql.push_str(&format!(
                " AND language = {}",
                params.push(SqlValue::Text(language))
            ));
        }

        Query {
            sql,
            params: params.values,
            settings: Vec::new(),
        }
    }

    /// UPSERT rendered as a MERGE against a one-row source of the match
    /// values. Matched rows update only when a non-key column actually
    /// differs; unmatched rows insert.
    pub fn build_upsert(
        &self,
        parameters: &[GenericParameter],
        match_columns: &[String],
        language: Option<&str>,
        for_translation: bool,
    ) -> Result<Query> {
        let mut params = Params::default();
        let sorted = sorted_by_key(parameters);

        // Placeholder per supplied column; reused across MERGE branches.
        let mut placeholder: HashMap<&str, String> = HashMap::new();
        for p in &sorted {
            placeholder.insert(p.key.as_str(), params.push(p.value.clone()));
        }

        let mut match_columns: Vec<String> = if match_columns.is_empty() {
            self.schema.primary_key.clone()
        } else {
            match_columns.to_vec()
        };
        for m in &match_columns {
            if !placeholder.contains_key(m.as_str()) {
                return Err(DbError::Config(format!(
                    "Upsert on '{}' matches on '{}' but no such parameter was supplied",
                    self.schema.type_name, m
                )));
            }
        }
        if for_translation {
            let language = language.unwrap_or_default().to_string();
            placeholder.insert("language", params.push(SqlValue::Text(language)));
            match_columns.push("language".to_string());
        }

        let source_columns: Vec<String> = match_columns
            .iter()
            .map(|c| format!("{} AS {}", placeholder[c.as_str()], c))
            .collect();
        let match_predicate: Vec<String> = match_columns
            .iter()
            .map(|c| format!("t.{} = n.{}", c, c))
            .collect();

        let update_columns: Vec<&GenericParameter> = sorted
            .iter()
            .filter(|p| !match_columns.contains(&p.key))
            .collect();

        let insert_columns: Vec<String> = sorted
            .iter()
            .map(|p| p.key.clone())
            .chain(for_translation.then(|| "language".to_string()))
            .collect();
        let insert_values: Vec<String> = insert_columns
            .iter()
            .map(|c| placeholder[c.as_str()].clone())
            .collect();

        let table = self.write_table(for_translation);
        let mut sql = format!(
            "WITH n AS (SELECT {})\nMERGE INTO {} AS t USING n ON {}",
            source_columns.join(", "),
            table,
            match_predicate.join(" AND ")
        );

        if !update_columns.is_empty() {
            let changed: Vec<String> = update_columns
                .iter()
                .map(|p| format!("t.{} IS DISTINCT FROM {}", p.key, placeholder[p.key.as_str()]))
                .collect();
            let assignments: Vec<String> = update_columns
                .iter()
                .map(|p| format!("{} = {}", p.key, placeholder[p.key.as_str()]))
                .collect();
            sql.push_str(&format!(
                "\nWHEN MATCHED AND ({}) THEN\nUPDATE SET {}",
                changed.join(" OR "),
                assignments.join(", ")
            ));
        }

        sql.push_str(&format!(
            "\nWHEN NOT MATCHED THEN\nINSERT ({}) VALUES ({})",
            insert_columns.join(", "),
            insert_values.join(", ")
        ));

        Ok(Query {
            sql,
            params: params.values,
            settings: Vec::new(),
        })
    }

    /// DELETE by filters.
    pub fn build_delete(&self, filters: &[GenericFilter]) -> Result<Query> {
        let mut params = Params::default();
        let table = self.write_table(false);
        let predicates = self.render_filters(&self.schema.type_name, filters, &mut params)?;

        let mut sql = format!("DELETE FROM {} AS {}", table, self.schema.type_name);
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        Ok(Query {
            sql,
            params: params.values,
            settings: Vec::new(),
        })
    }

    fn write_table(&self, for_translation: bool) -> String {
        if for_translation {
            self.table_name(TableKind::Translation)
        } else {
            self.table_name(TableKind::Base)
        }
    }

    /// Projection for the type's own columns, coalescing text columns from
    /// the translation lateral when a language is active.
    fn own_columns(&self, schema: &TypeSchema, alias: &str, translated: bool) -> Vec<String> {
        schema
            .columns
            .iter()
            .map(|c| {
                if translated && c.data_type == DataType::Text && !schema.is_key_column(&c.name) {
                    format!("coalesce(t_{}.{}, {}.{}) AS {}", alias, c.name, alias, c.name, c.name)
                } else {
                    format!("{}.{} AS {}", alias, c.name, c.name)
                }
            })
            .collect()
    }

    /// FROM clause body: the read source, plus the translation lateral when
    /// a language is active.
    fn select_source(
        &self,
        schema: &TypeSchema,
        alias: &str,
        options: &RequestOptions,
        params: &mut Params,
    ) -> String {
        let base = format!("{} AS {}", self.read_source(schema, options, false), alias);

        match (&options.language, schema.has_translation) {
            (Some(language), true) => {
                let translation = self.read_source(schema, options, true);
                let placeholder = params.push(SqlValue::Text(language.clone()));
                format!(
                    "{}\nLEFT JOIN LATERAL (SELECT * FROM {} AS t WHERE t.id = {}.id AND t.language = {}) AS t_{} ON true",
                    base, translation, alias, placeholder, alias
                )
            }
            _ => base,
        }
    }

    /// Projection for one object relation: every related column aliased
    /// with the accumulated prefix.
    fn join_columns(&self, join: &JoinSpec, options: &RequestOptions) -> Vec<String> {
        let sql_alias = join.sql_alias();
        let translated = options.language.is_some() && join.schema.has_translation;

        join.schema
            .columns
            .iter()
            .map(|c| {
                if translated && c.data_type == DataType::Text && !join.schema.is_key_column(&c.name)
                {
                    format!(
                        "coalesce(t{}.{}, {}.{}) AS {}{}",
                        sql_alias, c.name, sql_alias, c.name, join.prefix, c.name
                    )
                } else {
                    format!("{}.{} AS {}{}", sql_alias, c.name, join.prefix, c.name)
                }
            })
            .collect()
    }

    /// JOIN clause for one object relation, with the translation lateral
    /// appended when a language is active.
    fn join_clause(
        &self,
        plan: &JoinPlan,
        join: &JoinSpec,
        optional: bool,
        options: &RequestOptions,
        params: &mut Params,
    ) -> String {
        let sql_alias = join.sql_alias();
        let table = self.read_source(&join.schema, options, false);

        let parent_alias = match &join.parent {
            None => plan.root().type_name.clone(),
            Some(parent) => plan
                .joins()
                .iter()
                .find(|j| &j.alias == parent)
                .map(|j| j.sql_alias())
                .unwrap_or_else(|| plan.root().type_name.clone()),
        };

        let join_kind = if optional { "LEFT OUTER JOIN" } else { "INNER JOIN" };
        let mut clause = format!(
            "{} {} AS {} ON {}.{} = {}.{}",
            join_kind, table, sql_alias, parent_alias, join.base_column, sql_alias, join.ref_column
        );

        if let (Some(language), true) = (&options.language, join.schema.has_translation) {
            let translation = self.read_source(&join.schema, options, true);
            let placeholder = params.push(SqlValue::Text(language.clone()));
            clause.push_str(&format!(
                "\nLEFT JOIN LATERAL (SELECT * FROM {} AS t WHERE t.id = {}.id AND t.language = {}) AS t{} ON true",
                translation, sql_alias, placeholder, sql_alias
            ));
        }

        clause
    }

    /// Projection for a list relation: related rows aggregated into one
    /// JSON array column, empty array when there are none.
    fn list_column(&self, root_alias: &str, join: &JoinSpec) -> String {
        let table = Self::table_name_for(&join.schema, self.names, TableKind::Base);
        format!(
            "COALESCE((SELECT JSON_AGG(ROW_TO_JSON({alias})) FROM {table} AS {alias} WHERE {alias}.{ref_col} = {root}.{base_col}), '[]') AS {alias}",
            alias = join.alias,
            table = table,
            ref_col = join.ref_column,
            root = root_alias,
            base_col = join.base_column,
        )
    }

    fn cross_join_clause(
        &self,
        alias: &str,
        cross: &CrossJoin<'_>,
        params: &mut Params,
    ) -> String {
        let table = Self::table_name_for(&cross.relation.cross_schema, self.names, TableKind::Base);
        let placeholder = params.push(SqlValue::Uuid(cross.id));
        format!(
            "INNER JOIN {} AS x ON {}.{} = x.{} AND x.{} = {}",
            table, alias, self.schema.primary_key[0], cross.join_column, cross.filter_column, placeholder
        )
    }

    /// Ordering and paging. The order-by property must be a known column;
    /// unknown names fall back to the primary key.
    fn apply_shaping(&self, ir: &mut SelectIr, alias: &str, options: &RequestOptions) -> Result<()> {
        let order_column = options
            .order_by
            .as_deref()
            .map(str::to_ascii_lowercase)
            .filter(|o| self.schema.column(o).is_some())
            .unwrap_or_else(|| self.schema.primary_key[0].clone());

        match options.paging {
            Some(paging) => {
                ir.projection.push(format!(
                    "ROW_NUMBER() OVER (ORDER BY {}.{}) AS _rownum",
                    alias, order_column
                ));
                ir.paging = Some(paging);
            }
            None => {
                if options.order_by.is_some() {
                    ir.order_by = Some(format!("{}.{}", alias, order_column));
                }
            }
        }

        Ok(())
    }

    /// Render the WHERE terms. Repeated Equals terms on one property group
    /// into `IN`, repeated NotEqual into `NOT IN`; any other comparator on
    /// a repeated property is rejected.
    fn render_filters(
        &self,
        alias: &str,
        filters: &[GenericFilter],
        params: &mut Params,
    ) -> Result<Vec<String>> {
        for filter in filters {
            if self.schema.column(&filter.property).is_none() {
                return Err(DbError::Config(format!(
                    "Filter references unknown property '{}' on '{}'",
                    filter.property, self.schema.type_name
                )));
            }
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for filter in filters {
            *counts.entry(filter.property.as_str()).or_default() += 1;
        }

        let mut predicates = Vec::new();

        for filter in filters.iter().filter(|f| counts[f.property.as_str()] == 1) {
            let placeholder = params.push(filter.bind_value());
            predicates.push(format!(
                "{}.{} {} {}",
                alias,
                filter.property,
                filter.comparer.operator(),
                placeholder
            ));
        }

        let mut grouped: Vec<&str> = counts
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(p, _)| *p)
            .collect();
        grouped.sort_unstable();

        for property in grouped {
            let mut in_list = Vec::new();
            let mut not_in_list = Vec::new();

            for filter in filters.iter().filter(|f| f.property == property) {
                match filter.comparer {
                    FilterComparer::Equals => in_list.push(params.push(filter.bind_value())),
                    FilterComparer::NotEqual => not_in_list.push(params.push(filter.bind_value())),
                    other => {
                        return Err(DbError::UnsupportedComparator {
                            comparator: other.name().to_string(),
                            property: property.to_string(),
                        });
                    }
                }
            }

            if !in_list.is_empty() {
                predicates.push(format!("{}.{} IN ({})", alias, property, in_list.join(", ")));
            }
            if !not_in_list.is_empty() {
                predicates.push(format!(
                    "{}.{} NOT IN ({})",
                    alias,
                    property,
                    not_in_list.join(", ")
                ));
            }
        }

        Ok(predicates)
    }
}

fn sorted_by_key(parameters: &[GenericParameter]) -> Vec<GenericParameter> {
    let mut sorted = parameters.to_vec();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::options::Paging;
    use std::sync::Arc;

    fn names() -> SchemaNames {
        SchemaNames::default()
    }

    fn resource_schema() -> TypeSchema {
        TypeSchema::builder("resource")
            .key_column("id", DataType::Uuid)
            .column("name", DataType::Text)
            .column("providerid", DataType::Uuid)
            .column("isactive", DataType::Boolean)
            .with_history()
            .with_translation()
            .build()
            .unwrap()
    }

    fn provider_schema() -> Arc<TypeSchema> {
        Arc::new(
            TypeSchema::builder("provider")
                .key_column("id", DataType::Uuid)
                .column("name", DataType::Text)
                .column("typeid", DataType::Uuid)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_table_naming_convention() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        assert_eq!(builder.table_name(TableKind::Base), "dbo.resource");
        assert_eq!(builder.table_name(TableKind::Translation), "translation.resource");
        assert_eq!(builder.table_name(TableKind::History), "dbo_history._resource");
        assert_eq!(builder.table_name(TableKind::HistoryView), "dbo_history.resource");
        assert_eq!(
            builder.table_name(TableKind::TranslationHistory),
            "translation_history._resource"
        );
        assert_eq!(
            builder.table_name(TableKind::TranslationHistoryView),
            "translation_history.resource"
        );
    }

    #[test]
    fn test_basic_select_filters_and_params() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let filters = vec![
            GenericFilter::new("name", "Acme"),
            GenericFilter::new("isactive", true),
        ];
        let query = builder
            .build_basic_select(&RequestOptions::default(), &filters, None)
            .unwrap();

        assert!(query.sql.contains("FROM dbo.resource AS resource"));
        assert!(query.sql.contains("WHERE resource.name = $1 AND resource.isactive = $2"));
        assert_eq!(query.params.len(), 2);
        assert_eq!(query.params[0], SqlValue::Text("Acme".into()));
        assert_eq!(query.params[1], SqlValue::Bool(true));
    }

    #[test]
    fn test_contains_renders_ilike_with_wildcards() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let filters = vec![GenericFilter::with_comparer(
            "name",
            FilterComparer::Contains,
            "acme",
        )];
        let query = builder
            .build_basic_select(&RequestOptions::default(), &filters, None)
            .unwrap();

        assert!(query.sql.contains("resource.name ILIKE $1"));
        assert_eq!(query.params[0], SqlValue::Text("%acme%".into()));
    }

    #[test]
    fn test_repeated_equals_group_into_in() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let filters = vec![
            GenericFilter::new("providerid", a),
            GenericFilter::new("providerid", b),
        ];
        let query = builder
            .build_basic_select(&RequestOptions::default(), &filters, None)
            .unwrap();

        assert!(query.sql.contains("resource.providerid IN ($1, $2)"));
    }

    #[test]
    fn test_repeated_non_equality_rejected() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let filters = vec![
            GenericFilter::with_comparer("name", FilterComparer::Contains, "a"),
            GenericFilter::with_comparer("name", FilterComparer::Contains, "b"),
        ];
        let err = builder
            .build_basic_select(&RequestOptions::default(), &filters, None)
            .unwrap_err();

        assert!(matches!(err, DbError::UnsupportedComparator { .. }));
    }

    #[test]
    fn test_unknown_filter_property_rejected() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let filters = vec![GenericFilter::new("nosuchcolumn", "x")];
        assert!(builder
            .build_basic_select(&RequestOptions::default(), &filters, None)
            .is_err());
    }

    #[test]
    fn test_language_adds_lateral_and_coalesce() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let options = RequestOptions {
            language: Some("nob".into()),
            ..Default::default()
        };
        let query = builder.build_basic_select(&options, &[], None).unwrap();

        assert!(query.sql.contains("LEFT JOIN LATERAL (SELECT * FROM translation.resource AS t"));
        assert!(query.sql.contains("t.language = $1"));
        assert!(query
            .sql
            .contains("coalesce(t_resource.name, resource.name) AS name"));
        // Non-text columns never coalesce.
        assert!(query.sql.contains("resource.isactive AS isactive"));
    }

    #[test]
    fn test_as_of_reads_history_view_and_sets_session() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let options = RequestOptions {
            as_of: Some(chrono::Utc::now()),
            ..Default::default()
        };
        let query = builder.build_basic_select(&options, &[], None).unwrap();

        assert!(query.sql.contains("FROM dbo_history.resource AS resource"));
        assert_eq!(query.settings.len(), 1);
        assert_eq!(query.settings[0].name, "app.asof");
    }

    #[test]
    fn test_extended_select_prefixes_joined_columns() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let mut plan = JoinPlan::new(Arc::new(resource_schema()));
        plan.join("provider", provider_schema(), "providerid", true)
            .unwrap();

        let query = builder
            .build_extended_select(&plan, &RequestOptions::default(), &[], None)
            .unwrap();

        assert!(query.sql.contains("_provider.id AS provider_id"));
        assert!(query.sql.contains("_provider.name AS provider_name"));
        assert!(query.sql.contains(
            "LEFT OUTER JOIN dbo.provider AS _provider ON resource.providerid = _provider.id"
        ));
    }

    #[test]
    fn test_nested_join_accumulates_prefix() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let provider_type = Arc::new(
            TypeSchema::builder("providertype")
                .key_column("id", DataType::Uuid)
                .column("name", DataType::Text)
                .build()
                .unwrap(),
        );

        let mut plan = JoinPlan::new(Arc::new(resource_schema()));
        plan.join("provider", provider_schema(), "providerid", false)
            .unwrap();
        plan.join_nested("provider", "type", provider_type, "typeid", false)
            .unwrap();

        let query = builder
            .build_extended_select(&plan, &RequestOptions::default(), &[], None)
            .unwrap();

        assert!(query.sql.contains("_provider_type.name AS provider_type_name"));
        assert!(query.sql.contains(
            "INNER JOIN dbo.providertype AS _provider_type ON _provider.typeid = _provider_type.id"
        ));
    }

    #[test]
    fn test_list_relation_projects_json_agg() {
        let schema = provider_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let mut plan = JoinPlan::new(provider_schema());
        plan.join_list("resources", Arc::new(resource_schema()), "providerid")
            .unwrap();

        let query = builder
            .build_extended_select(&plan, &RequestOptions::default(), &[], None)
            .unwrap();

        assert!(query.sql.contains(
            "COALESCE((SELECT JSON_AGG(ROW_TO_JSON(resources)) FROM dbo.resource AS resources WHERE resources.providerid = provider.id), '[]') AS resources"
        ));
    }

    #[test]
    fn test_paging_adds_rownum_and_cte() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let options = RequestOptions {
            paging: Some(Paging::new(20, 2)),
            order_by: Some("name".into()),
            ..Default::default()
        };
        let query = builder.build_basic_select(&options, &[], None).unwrap();

        assert!(query
            .sql
            .contains("ROW_NUMBER() OVER (ORDER BY resource.name) AS _rownum"));
        assert!(query.sql.contains("OFFSET 20 ROWS FETCH NEXT 20 ROWS ONLY"));
    }

    #[test]
    fn test_unknown_order_by_falls_back_to_key() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let options = RequestOptions {
            paging: Some(Paging::new(20, 1)),
            order_by: Some("bogus".into()),
            ..Default::default()
        };
        let query = builder.build_basic_select(&options, &[], None).unwrap();

        assert!(query
            .sql
            .contains("ROW_NUMBER() OVER (ORDER BY resource.id) AS _rownum"));
    }

    #[test]
    fn test_insert_sorts_columns() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let parameters = vec![
            GenericParameter::new("name", "Acme"),
            GenericParameter::new("id", Uuid::nil()),
        ];
        let query = builder.build_insert(&parameters, false);

        assert_eq!(
            query.sql,
            "INSERT INTO dbo.resource (id, name) VALUES ($1, $2)"
        );
    }

    #[test]
    fn test_update_translation_keys_on_id_and_language() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let parameters = vec![GenericParameter::new("name", "Aksjeselskap")];
        let query = builder.build_update(&parameters, Uuid::nil(), Some("nob"), true);

        assert_eq!(
            query.sql,
            "UPDATE translation.resource SET name = $1 WHERE id = $2 AND language = $3"
        );
        assert_eq!(query.params[2], SqlValue::Text("nob".into()));
    }

    #[test]
    fn test_upsert_updates_only_on_change_and_inserts() {
        let schema = resource_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let parameters = vec![
            GenericParameter::new("id", Uuid::nil()),
            GenericParameter::new("name", "Acme"),
        ];
        let query = builder.build_upsert(&parameters, &[], None, false).unwrap();

        assert!(query.sql.starts_with("WITH n AS (SELECT $1 AS id)"));
        assert!(query.sql.contains("MERGE INTO dbo.resource AS t USING n ON t.id = n.id"));
        assert!(query.sql.contains("WHEN MATCHED AND (t.name IS DISTINCT FROM $2)"));
        assert!(query.sql.contains("WHEN NOT MATCHED THEN\nINSERT (id, name) VALUES ($1, $2)"));
    }

    #[test]
    fn test_cross_join_clause() {
        let schema = provider_schema();
        let names = names();
        let builder = QueryBuilder::new(&schema, &names);

        let cross_schema = Arc::new(
            TypeSchema::builder("packageresource")
                .key_column("id", DataType::Uuid)
                .column("packageid", DataType::Uuid)
                .column("resourceid", DataType::Uuid)
                .build()
                .unwrap(),
        );
        let relation = CrossRelation::new(cross_schema, "packageid", "resourceid");
        let id = Uuid::now_v7();
        let cross = CrossJoin {
            relation: &relation,
            join_column: "packageid",
            filter_column: "resourceid",
            id,
        };

        let query = builder
            .build_basic_select(&RequestOptions::default(), &[], Some(&cross))
            .unwrap();

        assert!(query.sql.contains(
            "INNER JOIN dbo.packageresource AS x ON provider.id = x.packageid AND x.resourceid = $1"
        ));
        assert_eq!(query.params[0], SqlValue::Uuid(id));
    }
}
