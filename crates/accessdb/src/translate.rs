//! Collaborator interface for translation content.
//!
//! This engine provisions the translation storage schema (shadow tables
//! keyed by primary key plus language) and writes translation rows through
//! the repositories; resolving translated *content* into entities is owned
//! by a collaborator implementing this trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::binder::FromRow;
use crate::error::Result;
use crate::query::GenericParameter;
use crate::schema::DbModel;

/// One translation row: the translated text columns of an entity for one
/// language.
#[derive(Debug, Clone)]
pub struct TranslationEntry {
    pub type_name: String,
    pub id: Uuid,
    pub language: String,
    pub fields: Vec<GenericParameter>,
}

/// Translation content resolution, implemented outside this crate.
#[async_trait]
pub trait TranslationStore: Send + Sync {
    /// Return the entity with its text columns replaced by the requested
    /// language. With `allow_partial`, untranslated columns keep their
    /// base-language values; without it a missing translation is an error.
    async fn translate<T: DbModel + FromRow + Send>(
        &self,
        entity: T,
        language: &str,
        allow_partial: bool,
    ) -> Result<T>;

    /// Insert or update one translation row.
    async fn upsert_entry(&self, entry: TranslationEntry) -> Result<()>;
}
