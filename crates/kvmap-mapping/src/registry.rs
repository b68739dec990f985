//! Entity registry
//!
//! Maps type identity to frozen metadata. Built once before any operation
//! runs; lookups afterwards are lock-free reads of an immutable map.

use crate::entity::Entity;
use crate::metadata::EntityMetadata;
use kvmap_common::{Error, Result};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

type AnyMetadata = Arc<dyn Any + Send + Sync>;

/// Immutable type-to-metadata table
#[derive(Clone, Default)]
pub struct EntityRegistry {
    entries: Arc<HashMap<TypeId, AnyMetadata>>,
    names: Arc<Vec<&'static str>>,
}

impl EntityRegistry {
    #[must_use]
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    /// Metadata for `T`, or `UnmappedType` if `T` was never registered
    pub fn resolve<T: Entity>(&self) -> Result<Arc<EntityMetadata<T>>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<EntityMetadata<T>>().ok())
            .ok_or_else(|| Error::unmapped(std::any::type_name::<T>()))
    }

    #[must_use]
    pub fn contains<T: Entity>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Registered type names, in registration order
    #[must_use]
    pub fn type_names(&self) -> &[&'static str] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects entity registrations at startup
#[derive(Default)]
pub struct EntityRegistryBuilder {
    entries: HashMap<TypeId, AnyMetadata>,
    names: Vec<&'static str>,
}

impl EntityRegistryBuilder {
    /// Validate and add `T`'s mapping. Registering a type twice replaces
    /// the earlier entry.
    pub fn register<T: Entity>(mut self) -> Result<Self> {
        let meta = T::mapping().build()?;
        debug!(
            "Registered {} -> set '{}' ({} fields, versioned: {})",
            meta.type_name(),
            meta.set_name(),
            meta.fields.len(),
            meta.has_version()
        );
        if self
            .entries
            .insert(TypeId::of::<T>(), Arc::new(meta))
            .is_none()
        {
            self.names.push(std::any::type_name::<T>());
        }
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> EntityRegistry {
        info!("Entity registry built with {} types", self.entries.len());
        EntityRegistry {
            entries: Arc::new(self.entries),
            names: Arc::new(self.names),
        }
    }
}
