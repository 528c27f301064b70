//! Join plans: the explicit description of how an extended query reaches
//! related types and under which column-name prefix each one surfaces.
//!
//! A plan is resolved once per query shape (at repository construction) and
//! reused for every request; the result binder walks the same prefixes when
//! demultiplexing rows, so builder and binder can never drift apart.

use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::schema::TypeSchema;

/// How a related type joins into the result shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinKind {
    /// Single related object; LEFT OUTER when optional, INNER otherwise.
    Object { optional: bool },

    /// Collection of related rows, projected as a JSON-aggregated column.
    List,
}

/// One relation in a join plan.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    /// Relation alias, unique within its nesting level.
    pub alias: String,

    /// Accumulated column-name prefix (`provider_`, `provider_type_`, …).
    pub prefix: String,

    /// Alias of the parent relation for nested joins; None when joined
    /// directly to the root.
    pub parent: Option<String>,

    /// Schema of the related type.
    pub schema: Arc<TypeSchema>,

    /// Join column on the parent side.
    pub base_column: String,

    /// Join column on the related side.
    pub ref_column: String,

    /// Object or list relation.
    pub kind: JoinKind,
}

impl JoinSpec {
    /// The SQL alias of the joined table (`_provider`, `_provider_type`).
    pub fn sql_alias(&self) -> String {
        format!("_{}", self.prefix.trim_end_matches('_'))
    }
}

/// The resolved join plan for one extended query shape.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    root: Arc<TypeSchema>,
    joins: Vec<JoinSpec>,
}

impl JoinPlan {
    pub fn new(root: Arc<TypeSchema>) -> Self {
        Self {
            root,
            joins: Vec::new(),
        }
    }

    /// The root type schema.
    pub fn root(&self) -> &Arc<TypeSchema> {
        &self.root
    }

    /// All registered relations, in registration order.
    pub fn joins(&self) -> &[JoinSpec] {
        &self.joins
    }

    /// Join a related object directly to the root. `base_column` is the
    /// root column holding the related id.
    pub fn join(
        &mut self,
        alias: &str,
        schema: Arc<TypeSchema>,
        base_column: &str,
        optional: bool,
    ) -> Result<&mut Self> {
        let prefix = format!("{}_", alias.to_ascii_lowercase());
        self.insert(JoinSpec {
            alias: alias.to_ascii_lowercase(),
            prefix,
            parent: None,
            schema,
            base_column: base_column.to_ascii_lowercase(),
            ref_column: "id".to_string(),
            kind: JoinKind::Object { optional },
        })
    }

    /// Join a related object through an already-registered relation,
    /// accumulating the parent's prefix.
    pub fn join_nested(
        &mut self,
        parent_alias: &str,
        alias: &str,
        schema: Arc<TypeSchema>,
        base_column: &str,
        optional: bool,
    ) -> Result<&mut Self> {
        let parent = self
            .joins
            .iter()
            .find(|j| j.alias == parent_alias.to_ascii_lowercase())
            .ok_or_else(|| DbError::Config(format!(
                "Nested join '{}' on '{}' references unknown parent '{}'",
                alias, self.root.type_name, parent_alias
            )))?;

        let prefix = format!("{}{}_", parent.prefix, alias.to_ascii_lowercase());
        let parent_alias = parent.alias.clone();
        self.insert(JoinSpec {
            alias: alias.to_ascii_lowercase(),
            prefix,
            parent: Some(parent_alias),
            schema,
            base_column: base_column.to_ascii_lowercase(),
            ref_column: "id".to_string(),
            kind: JoinKind::Object { optional },
        })
    }

    /// Register a list relation: rows of `schema` whose `ref_column` points
    /// back at the root's primary key, surfaced as one JSON column.
    pub fn join_list(
        &mut self,
        alias: &str,
        schema: Arc<TypeSchema>,
        ref_column: &str,
    ) -> Result<&mut Self> {
        let prefix = format!("{}_", alias.to_ascii_lowercase());
        self.insert(JoinSpec {
            alias: alias.to_ascii_lowercase(),
            prefix,
            parent: None,
            schema,
            base_column: self.root.primary_key[0].clone(),
            ref_column: ref_column.to_ascii_lowercase(),
            kind: JoinKind::List,
        })
    }

    fn insert(&mut self, spec: JoinSpec) -> Result<&mut Self> {
        // Two relations rendering the same prefix would make their columns
        // indistinguishable in the flat result set.
        if self.joins.iter().any(|j| j.prefix == spec.prefix) {
            return Err(DbError::AliasCollision {
                type_name: self.root.type_name.clone(),
                prefix: spec.prefix,
            });
        }

        self.joins.push(spec);
        Ok(self)
    }
}

/// A many-to-many cross-reference: the join table plus the two columns
/// pointing at each side.
#[derive(Debug, Clone)]
pub struct CrossRelation {
    /// Schema of the join table.
    pub cross_schema: Arc<TypeSchema>,

    /// Column in the join table referencing side A.
    pub a_column: String,

    /// Column in the join table referencing side B.
    pub b_column: String,
}

impl CrossRelation {
    pub fn new(cross_schema: Arc<TypeSchema>, a_column: &str, b_column: &str) -> Self {
        Self {
            cross_schema,
            a_column: a_column.to_ascii_lowercase(),
            b_column: b_column.to_ascii_lowercase(),
        }
    }
}
