//! Single-type CRUD repository.

use std::marker::PhantomData;
use std::sync::Arc;

use uuid::Uuid;

use crate::binder::{self, field, FromRow, RowSource};
use crate::config::SchemaNames;
use crate::error::Result;
use crate::executor::DbExecutor;
use crate::query::{
    ChangeRequestOptions, GenericFilter, GenericParameter, QueryBuilder, RequestOptions,
};
use crate::schema::{DbModel, SchemaRegistry, TypeSchema};

/// One page of a paged result, with the window metadata the paged CTE
/// returns alongside the rows.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_items: i64,
    pub page_size: i64,
    pub page_number: i64,
}

/// Basic repository for one domain type.
pub struct BasicRepo<T> {
    executor: DbExecutor,
    registry: Arc<SchemaRegistry>,
    names: SchemaNames,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DbModel + FromRow> BasicRepo<T> {
    pub fn new(executor: DbExecutor, registry: Arc<SchemaRegistry>, names: SchemaNames) -> Self {
        Self {
            executor,
            registry,
            names,
            _marker: PhantomData,
        }
    }

    pub(crate) fn executor(&self) -> &DbExecutor {
        &self.executor
    }

    pub(crate) fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub(crate) fn names(&self) -> &SchemaNames {
        &self.names
    }

    pub(crate) fn schema(&self) -> Result<Arc<TypeSchema>> {
        self.registry.schema::<T>()
    }

    /// Fetch by id. Zero rows is a normal empty result.
    pub async fn get(&self, id: Uuid, options: &RequestOptions) -> Result<Option<T>> {
        let filters = [GenericFilter::new("id", id)];
        let mut rows = self.list(&filters, options).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Fetch by filters.
    pub async fn list(&self, filters: &[GenericFilter], options: &RequestOptions) -> Result<Vec<T>> {
        let schema = self.schema()?;
        let query =
            QueryBuilder::new(&schema, &self.names).build_basic_select(options, filters, None)?;
        self.executor.query(&query).await
    }

    /// Fetch one page plus the total item count from the same round trip.
    pub async fn list_paged(
        &self,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<Page<T>> {
        let paging = options.paging.unwrap_or(crate::query::Paging {
            page_size: 50,
            page_number: 1,
        });
        let mut options = options.clone();
        options.paging = Some(paging);

        let schema = self.schema()?;
        let query =
            QueryBuilder::new(&schema, &self.names).build_basic_select(&options, filters, None)?;
        let rows = self.executor.query_rows(&query).await?;

        let total_items = match rows.first() {
            Some(row) => field::<i64>(row as &dyn RowSource, "", "_totalitemcount")?,
            None => 0,
        };
        let items = rows
            .iter()
            .map(|row| T::from_row(row as &dyn RowSource, ""))
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total_items,
            page_size: paging.page_size,
            page_number: paging.page_number,
        })
    }

    /// Insert the entity.
    pub async fn create(&self, entity: &T, audit: &ChangeRequestOptions) -> Result<u64> {
        let schema = self.schema()?;
        let mut query = QueryBuilder::new(&schema, &self.names).build_insert(&entity.bind(), false);
        query.settings = audit.session_settings();
        self.executor.execute(&query).await
    }

    /// Insert-or-update keyed on the primary key.
    pub async fn upsert(&self, entity: &T, audit: &ChangeRequestOptions) -> Result<u64> {
        self.upsert_on(entity, &[], audit).await
    }

    /// Insert-or-update keyed on an explicit match-column set.
    pub async fn upsert_on(
        &self,
        entity: &T,
        match_columns: &[String],
        audit: &ChangeRequestOptions,
    ) -> Result<u64> {
        let schema = self.schema()?;
        let mut query = QueryBuilder::new(&schema, &self.names).build_upsert(
            &entity.bind(),
            match_columns,
            None,
            false,
        )?;
        query.settings = audit.session_settings();
        self.executor.execute(&query).await
    }

    /// Overwrite all columns of the row with the entity's values.
    pub async fn update(&self, id: Uuid, entity: &T, audit: &ChangeRequestOptions) -> Result<u64> {
        self.update_fields(id, &entity.bind(), audit).await
    }

    /// Update only the supplied columns.
    pub async fn update_fields(
        &self,
        id: Uuid,
        parameters: &[GenericParameter],
        audit: &ChangeRequestOptions,
    ) -> Result<u64> {
        let schema = self.schema()?;
        let mut query =
            QueryBuilder::new(&schema, &self.names).build_update(parameters, id, None, false);
        query.settings = audit.session_settings();
        self.executor.execute(&query).await
    }

    /// Delete by id.
    pub async fn delete(&self, id: Uuid, audit: &ChangeRequestOptions) -> Result<u64> {
        let schema = self.schema()?;
        let filters = [GenericFilter::new("id", id)];
        let mut query = QueryBuilder::new(&schema, &self.names).build_delete(&filters)?;
        query.settings = audit.session_settings();
        self.executor.execute(&query).await
    }

    /// Insert a translation row for the entity. A no-op returning 0 when
    /// the type has no translation table.
    pub async fn create_translation(
        &self,
        entity: &T,
        language: &str,
        audit: &ChangeRequestOptions,
    ) -> Result<u64> {
        let schema = self.schema()?;
        if !schema.has_translation {
            return Ok(0);
        }

        let mut parameters = binder::translation_parameters(entity.bind(), &schema);
        parameters.push(GenericParameter::new("language", language));

        let mut query = QueryBuilder::new(&schema, &self.names).build_insert(&parameters, true);
        query.settings = audit.session_settings();
        self.executor.execute(&query).await
    }

    /// Update a translation row. A no-op returning 0 when the type has no
    /// translation table.
    pub async fn update_translation(
        &self,
        id: Uuid,
        entity: &T,
        language: &str,
        audit: &ChangeRequestOptions,
    ) -> Result<u64> {
        let schema = self.schema()?;
        if !schema.has_translation {
            return Ok(0);
        }

        let parameters = binder::translation_parameters(entity.bind(), &schema);
        let mut query =
            QueryBuilder::new(&schema, &self.names).build_update(&parameters, id, Some(language), true);
        query.settings = audit.session_settings();
        self.executor.execute(&query).await
    }

    /// Insert-or-update a translation row.
    pub async fn upsert_translation(
        &self,
        entity: &T,
        language: &str,
        audit: &ChangeRequestOptions,
    ) -> Result<u64> {
        let schema = self.schema()?;
        if !schema.has_translation {
            return Ok(0);
        }

        let parameters = binder::translation_parameters(entity.bind(), &schema);
        let mut query = QueryBuilder::new(&schema, &self.names).build_upsert(
            &parameters,
            &[],
            Some(language),
            true,
        )?;
        query.settings = audit.session_settings();
        self.executor.execute(&query).await
    }
}
