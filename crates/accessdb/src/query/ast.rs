//! Minimal select IR: a clause list rendered to text once, at the end.

use crate::query::options::{Paging, SessionSetting};
use crate::value::SqlValue;

/// A rendered statement plus everything needed to execute it: positional
/// parameters in `$n` order and the session settings the executor must
/// apply in the same transaction.
#[derive(Debug, Clone)]
pub struct Query {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub settings: Vec<SessionSetting>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            settings: Vec::new(),
        }
    }

    /// Parameter preview for error messages: `$1='a', $2=NULL, …`.
    pub fn params_preview(&self) -> String {
        self.params
            .iter()
            .enumerate()
            .map(|(i, p)| format!("${}={}", i + 1, p.preview()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Clause list for a SELECT. The builder fills it; nothing here knows about
/// schemas or filters.
#[derive(Debug, Default)]
pub(crate) struct SelectIr {
    /// Projected column expressions, already aliased.
    pub projection: Vec<String>,

    /// The FROM clause body (table with alias, possibly a lateral join).
    pub source: String,

    /// JOIN clauses in order.
    pub joins: Vec<String>,

    /// Predicates combined with AND.
    pub predicates: Vec<String>,

    /// ORDER BY expression (without the keyword).
    pub order_by: Option<String>,

    /// Paging window; wraps the query in the paged-result CTE.
    pub paging: Option<Paging>,
}

impl SelectIr {
    pub fn render(&self) -> String {
        let mut sql = String::new();
        sql.push_str("SELECT ");
        sql.push_str(&self.projection.join(", "));
        sql.push_str("\nFROM ");
        sql.push_str(&self.source);

        for join in &self.joins {
            sql.push('\n');
            sql.push_str(join);
        }

        if !self.predicates.is_empty() {
            sql.push_str("\nWHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }

        if let Some(order_by) = &self.order_by {
            if self.paging.is_none() {
                sql.push_str("\nORDER BY ");
                sql.push_str(order_by);
            }
        }

        match self.paging {
            None => sql,
            Some(paging) => wrap_paged(&sql, paging),
        }
    }
}

/// Wrap a select in the paged-result CTE. The inner query must project a
/// `_rownum` column; the outer select appends the total item count so one
/// round trip returns both the window and the page info.
fn wrap_paged(inner: &str, paging: Paging) -> String {
    format!(
        "WITH pagedresult AS (\n{}\n)\nSELECT *\nFROM pagedresult, (SELECT MAX(pagedresult._rownum) AS _totalitemcount, {} AS _pagesize, {} AS _pagenumber FROM pagedresult) AS _pageinfo\nORDER BY _rownum OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
        inner,
        paging.page_size,
        paging.page_number,
        paging.offset(),
        paging.page_size
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_minimal() {
        let ir = SelectIr {
            projection: vec!["resource.id AS id".into(), "resource.name AS name".into()],
            source: "dbo.resource AS resource".into(),
            ..Default::default()
        };

        assert_eq!(
            ir.render(),
            "SELECT resource.id AS id, resource.name AS name\nFROM dbo.resource AS resource"
        );
    }

    #[test]
    fn test_render_predicates_joined_with_and() {
        let ir = SelectIr {
            projection: vec!["r.id AS id".into()],
            source: "dbo.resource AS r".into(),
            predicates: vec!["r.name = $1".into(), "r.isactive = $2".into()],
            ..Default::default()
        };

        assert!(ir.render().ends_with("WHERE r.name = $1 AND r.isactive = $2"));
    }

    #[test]
    fn test_render_paged_wraps_in_cte() {
        let ir = SelectIr {
            projection: vec![
                "r.id AS id".into(),
                "ROW_NUMBER() OVER (ORDER BY r.id) AS _rownum".into(),
            ],
            source: "dbo.resource AS r".into(),
            paging: Some(Paging::new(10, 2)),
            ..Default::default()
        };

        let sql = ir.render();
        assert!(sql.starts_with("WITH pagedresult AS ("));
        assert!(sql.contains("MAX(pagedresult._rownum) AS _totalitemcount"));
        assert!(sql.contains("OFFSET 10 ROWS FETCH NEXT 10 ROWS ONLY"));
    }

    #[test]
    fn test_params_preview() {
        let mut query = Query::new("SELECT 1");
        query.params.push(SqlValue::Text("acme".into()));
        query.params.push(SqlValue::Null(crate::value::SqlNullType::Uuid));

        assert_eq!(query.params_preview(), "$1='acme', $2=NULL");
    }
}
