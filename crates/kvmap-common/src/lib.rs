//! kvmap Common - Shared types and utilities
//!
//! This crate provides the value model, record and key types, write
//! policies, query descriptors, configuration and the store-agnostic error
//! taxonomy used by every kvmap component.

pub mod config;
pub mod error;
pub mod policy;
pub mod query;
pub mod types;
pub mod value;

pub use config::Config;
pub use error::{Error, Result};
pub use policy::{ExistenceAction, GenerationPolicy, WritePolicy, WritePolicyBuilder};
pub use query::{Filter, Query, Sort, SortDirection};
pub use types::*;
pub use value::Value;
