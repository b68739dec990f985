//! kvmap Client - Store client interface
//!
//! This crate defines the narrow interface kvmap consumes from the
//! key-value store's client SDK ([`StoreClient`]), the store's native
//! failure codes ([`ResultCode`]) and the multi-operation list used by
//! `operate` ([`Operation`]).
//!
//! [`MemoryStore`] is an in-process implementation with the same
//! existence, generation and expiration semantics as the remote store. It
//! backs the test suites and the CLI.

pub mod client;
pub mod error;
pub mod memory;
pub mod operation;

// Re-exports
pub use client::{RecordStream, StoreClient};
pub use error::{ClientError, ClientResult, ResultCode};
pub use memory::MemoryStore;
pub use operation::Operation;
