//! kvmap Mapping - Entity metadata and record conversion
//!
//! Entities describe themselves once through an explicit accessor table
//! ([`EntityMapping`]). The tables are validated and frozen into an
//! immutable [`EntityRegistry`] at startup and shared read-only by every
//! operation afterwards. [`RecordConverter`] turns entities into store
//! bins and rehydrates them from records.

pub mod converter;
pub mod entity;
pub mod metadata;
pub mod registry;

pub use converter::{RecordConverter, RecordView, WriteData};
pub use entity::{Entity, EntityMapping};
pub use metadata::EntityMetadata;
pub use registry::{EntityRegistry, EntityRegistryBuilder};
