//! Extended repository: joined result shapes demultiplexed into nested
//! objects.

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use uuid::Uuid;

use crate::binder::FromRow;
use crate::config::SchemaNames;
use crate::error::{DbError, Result};
use crate::executor::DbExecutor;
use crate::query::{GenericFilter, JoinPlan, QueryBuilder, RequestOptions};
use crate::repo::BasicRepo;
use crate::schema::{DbModel, SchemaRegistry};

/// Repository producing `TExt`, the extended shape of `T` with its related
/// objects resolved through one joined select.
///
/// The join plan is registered once at construction time and reused for
/// every request; the `TExt` materializer must read its sub-objects under
/// the same aliases the plan declares.
pub struct ExtendedRepo<T, TExt> {
    basic: BasicRepo<T>,
    plan: JoinPlan,
    _marker: PhantomData<fn() -> TExt>,
}

impl<T, TExt> ExtendedRepo<T, TExt>
where
    T: DbModel + FromRow,
    TExt: FromRow,
{
    pub fn new(
        executor: DbExecutor,
        registry: Arc<SchemaRegistry>,
        names: SchemaNames,
    ) -> Result<Self> {
        let root = registry.schema::<T>()?;
        Ok(Self {
            basic: BasicRepo::new(executor, registry, names),
            plan: JoinPlan::new(root),
            _marker: PhantomData,
        })
    }

    /// Register an object relation on the root. `base_column` is the root
    /// column holding the related id.
    pub fn join<R: DbModel>(mut self, alias: &str, base_column: &str, optional: bool) -> Result<Self> {
        let schema = self.basic.registry().schema::<R>()?;
        self.plan.join(alias, schema, base_column, optional)?;
        Ok(self)
    }

    /// Register an object relation hanging off an earlier relation.
    pub fn join_nested<R: DbModel>(
        mut self,
        parent_alias: &str,
        alias: &str,
        base_column: &str,
        optional: bool,
    ) -> Result<Self> {
        let schema = self.basic.registry().schema::<R>()?;
        self.plan
            .join_nested(parent_alias, alias, schema, base_column, optional)?;
        Ok(self)
    }

    /// Register a list relation, surfaced as a JSON-aggregated column.
    pub fn join_list<R: DbModel>(mut self, alias: &str, ref_column: &str) -> Result<Self> {
        let schema = self.basic.registry().schema::<R>()?;
        self.plan.join_list(alias, schema, ref_column)?;
        Ok(self)
    }

    /// The resolved join plan, for sharing with a cross repository side.
    pub fn plan(&self) -> &JoinPlan {
        &self.plan
    }

    /// Fetch the extended shape by id.
    ///
    /// Zero rows is an error here, unlike `BasicRepo::get` which returns
    /// `None`. Callers that need probe-by-id semantics must use the basic
    /// layer.
    pub async fn get_extended(&self, id: Uuid, options: &RequestOptions) -> Result<TExt> {
        let filters = [GenericFilter::new("id", id)];
        let mut rows = self.list_extended(&filters, options).await?;

        if rows.is_empty() {
            let schema = self.basic.schema()?;
            return Err(DbError::NotFound {
                type_name: schema.type_name.clone(),
                id: id.to_string(),
            });
        }

        Ok(rows.swap_remove(0))
    }

    /// Fetch extended shapes by filters.
    pub async fn list_extended(
        &self,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<Vec<TExt>> {
        let schema = self.basic.schema()?;
        let query = QueryBuilder::new(&schema, self.basic.names()).build_extended_select(
            &self.plan,
            options,
            filters,
            None,
        )?;
        self.basic.executor().query(&query).await
    }
}

/// The basic operations remain available on the extended repository.
impl<T, TExt> Deref for ExtendedRepo<T, TExt> {
    type Target = BasicRepo<T>;

    fn deref(&self) -> &Self::Target {
        &self.basic
    }
}
