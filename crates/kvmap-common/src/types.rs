//! Core types for kvmap
//!
//! Keys, bins and records as exchanged with the store client.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a single record in the store.
///
/// Derived from an entity's identifier plus the namespace and set the
/// entity is mapped to. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreKey {
    namespace: String,
    set_name: String,
    user_key: String,
}

impl StoreKey {
    pub fn new(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        user_key: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: set_name.into(),
            user_key: user_key.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    /// The stringified entity identifier
    #[must_use]
    pub fn user_key(&self) -> &str {
        &self.user_key
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.set_name, self.user_key)
    }
}

/// A named value within a record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub name: String,
    pub value: Value,
}

impl Bin {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered bin-name to value mapping.
///
/// Insertion order is preserved; setting an existing name replaces the
/// value in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bins(Vec<Bin>);

impl Bins {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Set a bin, replacing any existing bin of the same name
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|b| b.name == name) {
            Some(bin) => bin.value = value,
            None => self.0.push(Bin { name, value }),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|b| b.name == name).map(|b| &b.value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.0.iter().position(|b| b.name == name)?;
        Some(self.0.remove(idx).value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bin> {
        self.0.iter()
    }

    /// Merge `other` into self; bins in `other` win
    pub fn merge(&mut self, other: Self) {
        for bin in other.0 {
            self.set(bin.name, bin.value);
        }
    }
}

impl FromIterator<Bin> for Bins {
    fn from_iter<I: IntoIterator<Item = Bin>>(iter: I) -> Self {
        let mut bins = Self::new();
        for bin in iter {
            bins.set(bin.name, bin.value);
        }
        bins
    }
}

impl IntoIterator for Bins {
    type Item = Bin;
    type IntoIter = std::vec::IntoIter<Bin>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Record expiration as understood by the store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiration {
    /// Use the namespace's default time-to-live
    #[default]
    NamespaceDefault,
    /// Never expire
    Never,
    /// Keep whatever expiration the record already has
    DontUpdate,
    /// Expire this many seconds after the write
    Seconds(u32),
}

impl Expiration {
    /// Wire value of the expiration: 0 = namespace default, -1 = never,
    /// -2 = don't update, otherwise seconds.
    #[must_use]
    pub const fn as_ttl(self) -> i64 {
        match self {
            Self::NamespaceDefault => 0,
            Self::Never => -1,
            Self::DontUpdate => -2,
            Self::Seconds(s) => s as i64,
        }
    }
}

/// A record as read back from the store
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub bins: Bins,
    /// Store-assigned write counter; starts at 1 and increases on every
    /// successful write to the key
    pub generation: u32,
    /// Seconds until expiry at read time, 0 when the record never expires
    pub expiration: u32,
}

impl Record {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }
}

/// A key paired with its record, as produced by scans
#[derive(Clone, Debug, PartialEq)]
pub struct KeyRecord {
    pub key: StoreKey,
    pub record: Record,
}
