//! Process-wide schema cache.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::schema::types::{DbModel, TypeSchema};

/// Memoizing registry mapping a domain type to its validated [`TypeSchema`].
///
/// First access from concurrent callers may compute redundantly; exactly one
/// winner writes the cache entry and everyone observes that value afterwards.
/// Entries live for the process lifetime.
pub struct SchemaRegistry {
    cache: RwLock<HashMap<TypeId, Arc<TypeSchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the schema for `T`, computing and caching it on first use.
    ///
    /// Fails fast when the descriptor is invalid (for example a declared
    /// primary-key column with no matching column definition); that error is
    /// configuration drift and is not retried.
    pub fn schema<T: DbModel>(&self) -> Result<Arc<TypeSchema>> {
        let key = TypeId::of::<T>();

        if let Some(schema) = self.cache.read().expect("schema cache poisoned").get(&key) {
            return Ok(schema.clone());
        }

        let built = Arc::new(T::describe().build()?);

        let mut cache = self.cache.write().expect("schema cache poisoned");
        Ok(cache.entry(key).or_insert(built).clone())
    }

    /// Number of cached descriptors, used by startup diagnostics.
    pub fn len(&self) -> usize {
        self.cache.read().expect("schema cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::GenericParameter;
    use crate::schema::types::{DataType, TypeSchemaBuilder};

    struct Provider;

    impl DbModel for Provider {
        fn type_name() -> &'static str {
            "provider"
        }

        fn describe() -> TypeSchemaBuilder {
            TypeSchema::builder("provider")
                .key_column("id", DataType::Uuid)
                .column("name", DataType::Text)
        }

        fn bind(&self) -> Vec<GenericParameter> {
            Vec::new()
        }
    }

    struct Broken;

    impl DbModel for Broken {
        fn type_name() -> &'static str {
            "broken"
        }

        fn describe() -> TypeSchemaBuilder {
            // No key column declared at all.
            TypeSchema::builder("broken").column("name", DataType::Text)
        }

        fn bind(&self) -> Vec<GenericParameter> {
            Vec::new()
        }
    }

    #[test]
    fn test_schema_cached_and_shared() {
        let registry = SchemaRegistry::new();
        let first = registry.schema::<Provider>().unwrap();
        let second = registry.schema::<Provider>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_descriptor_fails_every_time() {
        let registry = SchemaRegistry::new();
        assert!(registry.schema::<Broken>().is_err());
        assert!(registry.schema::<Broken>().is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_first_access_single_winner() {
        let registry = Arc::new(SchemaRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.schema::<Provider>().unwrap())
            })
            .collect();

        let schemas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for pair in schemas.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
    }
}
