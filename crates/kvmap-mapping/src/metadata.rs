//! Frozen per-type accessor tables

use crate::converter::RecordView;
use crate::entity::{
    ExpirationGetFn, ExpirationSetFn, FieldFn, IdFn, ReaderFn, VersionGetFn, VersionSetFn,
};
use kvmap_common::{Expiration, Result, Value};

pub(crate) struct IdField<T> {
    pub(crate) name: String,
    pub(crate) get: IdFn<T>,
}

pub(crate) struct VersionField<T> {
    pub(crate) name: String,
    pub(crate) get: VersionGetFn<T>,
    pub(crate) set: VersionSetFn<T>,
}

pub(crate) struct ExpirationField<T> {
    pub(crate) name: String,
    pub(crate) get: ExpirationGetFn<T>,
    pub(crate) set: ExpirationSetFn<T>,
}

pub(crate) struct FieldAccessor<T> {
    pub(crate) name: String,
    pub(crate) get: FieldFn<T>,
}

/// Validated mapping of one entity type.
///
/// Built once by the registry and shared behind an `Arc`; never mutated.
pub struct EntityMetadata<T> {
    pub(crate) type_name: &'static str,
    pub(crate) set_name: String,
    pub(crate) id: IdField<T>,
    pub(crate) version: Option<VersionField<T>>,
    pub(crate) expiration: Option<ExpirationField<T>>,
    pub(crate) fields: Vec<FieldAccessor<T>>,
    pub(crate) reader: ReaderFn<T>,
    pub(crate) default_expiration: Expiration,
    pub(crate) touch_on_read: bool,
}

impl<T> EntityMetadata<T> {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Set (container) the entity's records live in
    #[must_use]
    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    #[must_use]
    pub fn id_name(&self) -> &str {
        &self.id.name
    }

    pub fn id_of(&self, entity: &T) -> String {
        (self.id.get)(entity)
    }

    #[must_use]
    pub const fn has_version(&self) -> bool {
        self.version.is_some()
    }

    #[must_use]
    pub fn version_name(&self) -> Option<&str> {
        self.version.as_ref().map(|v| v.name.as_str())
    }

    /// Current version, `None` when the type is unversioned or the entity
    /// was never persisted
    pub fn version_of(&self, entity: &T) -> Option<u32> {
        self.version.as_ref().and_then(|v| (v.get)(entity))
    }

    /// Stamp the version field; no-op for unversioned types
    pub fn set_version(&self, entity: &mut T, generation: u32) {
        if let Some(v) = &self.version {
            (v.set)(entity, generation);
        }
    }

    #[must_use]
    pub const fn has_expiration_field(&self) -> bool {
        self.expiration.is_some()
    }

    /// Expiration to write: the entity's own value, else the type default
    pub fn expiration_of(&self, entity: &T) -> Expiration {
        self.expiration
            .as_ref()
            .and_then(|e| (e.get)(entity))
            .unwrap_or(self.default_expiration)
    }

    pub(crate) fn set_expiration(&self, entity: &mut T, seconds: Option<u32>) {
        if let Some(e) = &self.expiration {
            (e.set)(entity, seconds);
        }
    }

    #[must_use]
    pub const fn default_expiration(&self) -> Expiration {
        self.default_expiration
    }

    #[must_use]
    pub const fn touch_on_read(&self) -> bool {
        self.touch_on_read
    }

    /// Names of the bins written for this type, in declaration order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub(crate) fn field_values<'a>(
        &'a self,
        entity: &'a T,
    ) -> impl Iterator<Item = (&'a str, Result<Value>)> + 'a {
        self.fields
            .iter()
            .map(move |f| (f.name.as_str(), (f.get)(entity)))
    }

    pub(crate) fn read(&self, view: &RecordView<'_>) -> Result<T> {
        (self.reader)(view)
    }
}
