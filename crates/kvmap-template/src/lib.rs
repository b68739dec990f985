//! kvmap Template - Typed persistence operations
//!
//! This crate runs entity operations against a [`StoreClient`]:
//! - [`AsyncTemplate`]: non-blocking operations, lazy entity streams and
//!   cancellable [`OperationHandle`]s
//! - [`BlockingTemplate`]: the same operations driven to completion on a
//!   private runtime
//! - optimistic concurrency on versioned entities through the store's
//!   record generation ([`WriteMode`])
//! - translation of store failure codes into [`kvmap_common::Error`]
//!
//! [`StoreClient`]: kvmap_client::StoreClient

pub mod blocking;
pub mod cas;
pub mod handle;
pub mod template;
pub mod translate;

pub use blocking::BlockingTemplate;
pub use cas::WriteMode;
pub use handle::OperationHandle;
pub use template::{AsyncTemplate, EntityStream};
pub use translate::{DefaultErrorTranslator, ErrorTranslator};
