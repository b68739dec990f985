//! Store client trait

use crate::error::ClientResult;
use crate::operation::Operation;
use async_trait::async_trait;
use futures::stream::BoxStream;
use kvmap_common::{Bins, Filter, KeyRecord, Record, StoreKey, WritePolicy};

/// Records produced by a scan
pub type RecordStream = BoxStream<'static, ClientResult<KeyRecord>>;

/// Interface to the key-value store.
///
/// The client is a shared resource owned by the surrounding application;
/// kvmap only borrows it and never opens or closes connections. Every
/// method is one round trip to the store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Read a record; `None` when the key does not exist
    async fn get(&self, key: &StoreKey) -> ClientResult<Option<Record>>;

    /// Check whether a key exists
    async fn exists(&self, key: &StoreKey) -> ClientResult<bool>;

    /// Write bins under `policy`; returns the record's new generation
    async fn put(&self, policy: &WritePolicy, key: &StoreKey, bins: &Bins) -> ClientResult<u32>;

    /// Delete a record; returns whether it existed
    async fn delete(&self, policy: &WritePolicy, key: &StoreKey) -> ClientResult<bool>;

    /// Apply several operations atomically to one record.
    ///
    /// Fails with `KeyNotFound` when the record is absent and none of the
    /// operations can create it.
    async fn operate(
        &self,
        policy: &WritePolicy,
        key: &StoreKey,
        ops: &[Operation],
    ) -> ClientResult<Record>;

    /// Read many records in one request; results follow the order of `keys`
    async fn batch_get(&self, keys: &[StoreKey]) -> ClientResult<Vec<Option<Record>>>;

    /// Scan a set, optionally filtered
    async fn scan(
        &self,
        namespace: &str,
        set_name: &str,
        filter: Option<&Filter>,
    ) -> ClientResult<RecordStream>;
}
