//! Cross-reference repository for many-to-many join tables.
//!
//! The join table `X` relates two entity types A and B. `get_a(id)` returns
//! the A-side entities related to one B, `get_b(id)` the B-side entities
//! related to one A; both reuse the select paths of the target side with
//! the cross-reference join clause applied, only swapping which join-table
//! column is filtered.

use std::marker::PhantomData;
use std::sync::Arc;

use uuid::Uuid;

use crate::binder::FromRow;
use crate::config::SchemaNames;
use crate::error::Result;
use crate::executor::DbExecutor;
use crate::query::builder::CrossJoin;
use crate::query::{CrossRelation, GenericFilter, JoinPlan, QueryBuilder, RequestOptions};
use crate::schema::{DbModel, SchemaRegistry};

/// Repository over the cross table `X` between sides `A` and `B`.
pub struct CrossRepo<X, A, B> {
    executor: DbExecutor,
    registry: Arc<SchemaRegistry>,
    names: SchemaNames,
    relation: CrossRelation,
    plan_a: Option<JoinPlan>,
    plan_b: Option<JoinPlan>,
    _marker: PhantomData<fn() -> (X, A, B)>,
}

impl<X, A, B> CrossRepo<X, A, B>
where
    X: DbModel,
    A: DbModel + FromRow,
    B: DbModel + FromRow,
{
    /// `a_column` and `b_column` are the join-table columns referencing the
    /// A and B sides.
    pub fn new(
        executor: DbExecutor,
        registry: Arc<SchemaRegistry>,
        names: SchemaNames,
        a_column: &str,
        b_column: &str,
    ) -> Result<Self> {
        let cross_schema = registry.schema::<X>()?;
        Ok(Self {
            executor,
            registry,
            names,
            relation: CrossRelation::new(cross_schema, a_column, b_column),
            plan_a: None,
            plan_b: None,
            _marker: PhantomData,
        })
    }

    /// Attach a join plan to the A side so `get_a_extended` can produce
    /// nested shapes.
    pub fn with_plan_a(mut self, plan: JoinPlan) -> Self {
        self.plan_a = Some(plan);
        self
    }

    /// Attach a join plan to the B side.
    pub fn with_plan_b(mut self, plan: JoinPlan) -> Self {
        self.plan_b = Some(plan);
        self
    }

    /// A-side entities related to the B entity `id`.
    pub async fn get_a(
        &self,
        id: Uuid,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<Vec<A>> {
        let schema = self.registry.schema::<A>()?;
        let cross = CrossJoin {
            relation: &self.relation,
            join_column: &self.relation.a_column,
            filter_column: &self.relation.b_column,
            id,
        };
        let query = QueryBuilder::new(&schema, &self.names)
            .build_basic_select(options, filters, Some(&cross))?;
        self.executor.query(&query).await
    }

    /// B-side entities related to the A entity `id`.
    pub async fn get_b(
        &self,
        id: Uuid,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<Vec<B>> {
        let schema = self.registry.schema::<B>()?;
        let cross = CrossJoin {
            relation: &self.relation,
            join_column: &self.relation.b_column,
            filter_column: &self.relation.a_column,
            id,
        };
        let query = QueryBuilder::new(&schema, &self.names)
            .build_basic_select(options, filters, Some(&cross))?;
        self.executor.query(&query).await
    }

    /// A-side extended shapes related to the B entity `id`; requires a
    /// plan registered with `with_plan_a`.
    pub async fn get_a_extended<Out: FromRow>(
        &self,
        id: Uuid,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<Vec<Out>> {
        let schema = self.registry.schema::<A>()?;
        let plan = match &self.plan_a {
            Some(plan) => plan.clone(),
            None => JoinPlan::new(schema.clone()),
        };
        let cross = CrossJoin {
            relation: &self.relation,
            join_column: &self.relation.a_column,
            filter_column: &self.relation.b_column,
            id,
        };
        let query = QueryBuilder::new(&schema, &self.names)
            .build_extended_select(&plan, options, filters, Some(&cross))?;
        self.executor.query(&query).await
    }

    /// B-side extended shapes related to the A entity `id`.
    pub async fn get_b_extended<Out: FromRow>(
        &self,
        id: Uuid,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<Vec<Out>> {
        let schema = self.registry.schema::<B>()?;
        let plan = match &self.plan_b {
            Some(plan) => plan.clone(),
            None => JoinPlan::new(schema.clone()),
        };
        let cross = CrossJoin {
            relation: &self.relation,
            join_column: &self.relation.b_column,
            filter_column: &self.relation.a_column,
            id,
        };
        let query = QueryBuilder::new(&schema, &self.names)
            .build_extended_select(&plan, options, filters, Some(&cross))?;
        self.executor.query(&query).await
    }
}
