//! Record converter
//!
//! Entity -> bins on the write path, record -> entity on the read path.
//! Both directions are pure functions of their inputs.

use crate::metadata::EntityMetadata;
use kvmap_common::{Bins, Error, Expiration, Record, Result, StoreKey, Value};
use serde::de::DeserializeOwned;
use tracing::trace;

/// Everything needed to write one entity
#[derive(Clone, Debug, PartialEq)]
pub struct WriteData {
    pub key: StoreKey,
    /// Persistable fields in declaration order; never contains the version
    pub bins: Bins,
    pub expiration: Expiration,
    /// Version the entity carried before the write
    pub version: Option<u32>,
}

/// Read-only view of a stored record handed to entity readers
pub struct RecordView<'a> {
    key: &'a StoreKey,
    record: &'a Record,
    type_name: &'static str,
}

impl<'a> RecordView<'a> {
    #[must_use]
    pub const fn new(key: &'a StoreKey, record: &'a Record, type_name: &'static str) -> Self {
        Self {
            key,
            record,
            type_name,
        }
    }

    /// The entity identifier the record is stored under
    #[must_use]
    pub fn id(&self) -> &str {
        self.key.user_key()
    }

    #[must_use]
    pub const fn key(&self) -> &StoreKey {
        self.key
    }

    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.record.generation
    }

    /// Raw bin value
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.record.get(name)
    }

    /// Decode a bin into a typed field. A missing bin decodes like `Nil`,
    /// so `Option<_>` fields read back as `None`.
    pub fn get<D: DeserializeOwned>(&self, name: &str) -> Result<D> {
        self.record
            .get(name)
            .unwrap_or(&Value::Nil)
            .decode()
            .map_err(|e| Error::conversion(format!("{}.{name}: {e}", self.type_name)))
    }
}

/// Converts between entities and store records for one namespace
#[derive(Clone, Debug)]
pub struct RecordConverter {
    namespace: String,
}

impl RecordConverter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of the record holding entity `id` of type `T`
    pub fn key_for<T>(&self, meta: &EntityMetadata<T>, id: &str) -> Result<StoreKey> {
        if id.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{}: id must not be empty",
                meta.type_name()
            )));
        }
        Ok(StoreKey::new(&self.namespace, meta.set_name(), id))
    }

    /// Build the write-side record of an entity
    pub fn to_record<T>(&self, meta: &EntityMetadata<T>, entity: &T) -> Result<WriteData> {
        let key = self.key_for(meta, &meta.id_of(entity))?;
        let mut bins = Bins::new();
        for (name, value) in meta.field_values(entity) {
            let value = value.map_err(|e| match e {
                Error::Conversion(msg) => {
                    Error::conversion(format!("{}.{name}: {msg}", meta.type_name()))
                }
                other => other,
            })?;
            bins.set(name, value);
        }
        trace!("Converted {} into {} bins", key, bins.len());
        Ok(WriteData {
            key,
            bins,
            expiration: meta.expiration_of(entity),
            version: meta.version_of(entity),
        })
    }

    /// Rehydrate an entity. Absence is `Ok(None)`, never an error.
    ///
    /// The version field, if declared, receives the record generation and
    /// the expiration field receives the seconds left before expiry.
    pub fn from_record<T>(
        &self,
        meta: &EntityMetadata<T>,
        key: &StoreKey,
        record: Option<&Record>,
    ) -> Result<Option<T>> {
        record.map(|r| self.read(meta, key, r)).transpose()
    }

    /// Rehydrate an entity from a record known to exist
    pub fn read<T>(&self, meta: &EntityMetadata<T>, key: &StoreKey, record: &Record) -> Result<T> {
        let view = RecordView::new(key, record, meta.type_name());
        let mut entity = meta.read(&view)?;
        meta.set_version(&mut entity, record.generation);
        // 0 on a read means the record has no expiry
        let remaining = (record.expiration > 0).then_some(record.expiration);
        meta.set_expiration(&mut entity, remaining);
        Ok(entity)
    }
}
