//! Entity mapping declarations
//!
//! An entity type implements [`Entity`] and returns an [`EntityMapping`]
//! listing plain function pointers for every accessor the converter needs.
//! No runtime introspection is involved.
//!
//! ```ignore
//! impl Entity for Person {
//!     fn mapping() -> EntityMapping<Self> {
//!         EntityMapping::<Self>::new()
//!             .id("id", |p| p.id.clone())
//!             .version("version", |p| p.version, |p, v| p.version = Some(v))
//!             .field("firstname", |p| Ok(p.firstname.as_str().into()))
//!             .reader(|r| Ok(Person {
//!                 id: r.id().to_string(),
//!                 version: None,
//!                 firstname: r.get("firstname")?,
//!             }))
//!     }
//! }
//! ```

use crate::converter::RecordView;
use crate::metadata::{EntityMetadata, ExpirationField, FieldAccessor, IdField, VersionField};
use kvmap_common::{Error, Expiration, Result, Value};
use std::collections::HashSet;
use tracing::warn;

/// Reads the identifier, stringified
pub type IdFn<T> = fn(&T) -> String;
/// Reads the version; `None` or 0 means never persisted
pub type VersionGetFn<T> = fn(&T) -> Option<u32>;
/// Stamps the version with a store generation
pub type VersionSetFn<T> = fn(&mut T, u32);
/// Reads the entity's own expiration; `None` falls back to the default
pub type ExpirationGetFn<T> = fn(&T) -> Option<Expiration>;
/// Receives the seconds left before expiry after a read; `None` when the
/// record never expires
pub type ExpirationSetFn<T> = fn(&mut T, Option<u32>);
/// Reads one persistable field
pub type FieldFn<T> = fn(&T) -> Result<Value>;
/// Builds an entity from a stored record
pub type ReaderFn<T> = fn(&RecordView<'_>) -> Result<T>;

/// A type that can be persisted through kvmap
pub trait Entity: Send + Sync + Sized + 'static {
    /// Accessor table for this type; called once during registration
    fn mapping() -> EntityMapping<Self>;
}

/// Builder for an entity's accessor table
pub struct EntityMapping<T> {
    set_name: Option<String>,
    id: Option<IdField<T>>,
    version: Option<VersionField<T>>,
    expiration: Option<ExpirationField<T>>,
    fields: Vec<FieldAccessor<T>>,
    reader: Option<ReaderFn<T>>,
    default_expiration: Expiration,
    touch_on_read: bool,
}

impl<T> Default for EntityMapping<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EntityMapping<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            set_name: None,
            id: None,
            version: None,
            expiration: None,
            fields: Vec::new(),
            reader: None,
            default_expiration: Expiration::NamespaceDefault,
            touch_on_read: false,
        }
    }

    /// Override the set name (defaults to the short type name)
    #[must_use]
    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.set_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn id(mut self, name: impl Into<String>, get: IdFn<T>) -> Self {
        self.id = Some(IdField {
            name: name.into(),
            get,
        });
        self
    }

    /// Declare a version field holding the record generation
    #[must_use]
    pub fn version(mut self, name: impl Into<String>, get: VersionGetFn<T>, set: VersionSetFn<T>) -> Self {
        self.version = Some(VersionField {
            name: name.into(),
            get,
            set,
        });
        self
    }

    /// Declare a field that controls the record's expiration
    #[must_use]
    pub fn expiration(
        mut self,
        name: impl Into<String>,
        get: ExpirationGetFn<T>,
        set: ExpirationSetFn<T>,
    ) -> Self {
        self.expiration = Some(ExpirationField {
            name: name.into(),
            get,
            set,
        });
        self
    }

    /// Declare a persistable field stored as a bin
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, get: FieldFn<T>) -> Self {
        self.fields.push(FieldAccessor {
            name: name.into(),
            get,
        });
        self
    }

    #[must_use]
    pub fn reader(mut self, read: ReaderFn<T>) -> Self {
        self.reader = Some(read);
        self
    }

    /// Expiration applied when the entity carries none of its own
    #[must_use]
    pub const fn default_expiration(mut self, expiration: Expiration) -> Self {
        self.default_expiration = expiration;
        self
    }

    /// Reset the record's expiration whenever it is read by id
    #[must_use]
    pub const fn touch_on_read(mut self, touch: bool) -> Self {
        self.touch_on_read = touch;
        self
    }

    /// Validate the table and freeze it.
    ///
    /// A missing id accessor or reader makes the type unmapped. Duplicate
    /// names, including a field reusing the version or expiration name,
    /// are configuration errors.
    pub(crate) fn build(self) -> Result<EntityMetadata<T>> {
        let type_name = std::any::type_name::<T>();
        let Some(id) = self.id else {
            return Err(Error::unmapped(format!("{type_name} (no id accessor)")));
        };
        let Some(reader) = self.reader else {
            return Err(Error::unmapped(format!("{type_name} (no reader)")));
        };

        let mut names = HashSet::new();
        let special = self
            .version
            .iter()
            .map(|v| v.name.as_str())
            .chain(self.expiration.iter().map(|e| e.name.as_str()));
        for name in special.chain(self.fields.iter().map(|f| f.name.as_str())) {
            if !names.insert(name) {
                return Err(Error::Configuration(format!(
                    "{type_name}: field '{name}' is declared twice"
                )));
            }
        }

        if self.touch_on_read && self.expiration.is_some() {
            warn!(
                "{} refreshes expiration on read but also declares an expiration field; find_by_id will be rejected",
                type_name
            );
        }

        let set_name = self.set_name.unwrap_or_else(|| short_type_name(type_name).to_string());
        Ok(EntityMetadata {
            type_name,
            set_name,
            id,
            version: self.version,
            expiration: self.expiration,
            fields: self.fields,
            reader,
            default_expiration: self.default_expiration,
            touch_on_read: self.touch_on_read,
        })
    }
}

/// `my_app::model::Person<u8>` -> `Person`
fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
