//! Blocking template
//!
//! Runs every [`AsyncTemplate`] operation to completion on a runtime owned
//! by the template. Calls block the current thread until the store
//! responds, so they must not be made from inside an async context.

use crate::template::AsyncTemplate;
use futures::TryStreamExt;
use kvmap_common::{Error, Query, Result, Sort, WritePolicy};
use kvmap_mapping::Entity;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// Synchronous entity operations
#[derive(Clone)]
pub struct BlockingTemplate {
    inner: AsyncTemplate,
    runtime: Arc<Runtime>,
}

impl BlockingTemplate {
    /// Wrap `template` with a private current-thread runtime
    pub fn new(template: AsyncTemplate) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build runtime: {e}")))?;
        Ok(Self::with_runtime(template, Arc::new(runtime)))
    }

    /// Wrap `template` with a runtime shared with other components
    #[must_use]
    pub const fn with_runtime(template: AsyncTemplate, runtime: Arc<Runtime>) -> Self {
        Self {
            inner: template,
            runtime,
        }
    }

    /// The non-blocking template this one drives
    #[must_use]
    pub const fn as_async(&self) -> &AsyncTemplate {
        &self.inner
    }

    fn run<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    pub fn save<T: Entity>(&self, entity: &mut T) -> Result<()> {
        self.run(self.inner.save(entity))
    }

    pub fn insert<T: Entity>(&self, entity: &mut T) -> Result<()> {
        self.run(self.inner.insert(entity))
    }

    pub fn insert_all<T: Entity>(&self, entities: &mut [T]) -> Result<()> {
        self.run(self.inner.insert_all(entities))
    }

    pub fn update<T: Entity>(&self, entity: &mut T) -> Result<()> {
        self.run(self.inner.update(entity))
    }

    pub fn persist<T: Entity>(&self, entity: &mut T, policy: &WritePolicy) -> Result<()> {
        self.run(self.inner.persist(entity, policy))
    }

    pub fn find_by_id<T: Entity>(&self, id: &str) -> Result<Option<T>> {
        self.run(self.inner.find_by_id(id))
    }

    pub fn find_by_ids<T: Entity, S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<T>> {
        self.run(self.inner.find_by_ids(ids))
    }

    pub fn find_all<T: Entity>(&self) -> Result<Vec<T>> {
        self.run(async { self.inner.find_all::<T>().await?.try_collect().await })
    }

    pub fn find_in_range<T: Entity>(
        &self,
        offset: u64,
        limit: u64,
        sort: Option<&Sort>,
    ) -> Result<Vec<T>> {
        self.run(async {
            self.inner
                .find_in_range::<T>(offset, limit, sort)
                .await?
                .try_collect()
                .await
        })
    }

    pub fn find<T: Entity>(&self, query: &Query) -> Result<Vec<T>> {
        self.run(async { self.inner.find::<T>(query).await?.try_collect().await })
    }

    pub fn count<T: Entity>(&self) -> Result<u64> {
        self.run(self.inner.count::<T>())
    }

    pub fn exists<T: Entity>(&self, id: &str) -> Result<bool> {
        self.run(self.inner.exists::<T>(id))
    }

    pub fn delete<T: Entity>(&self, entity: &T) -> Result<bool> {
        self.run(self.inner.delete(entity))
    }

    pub fn delete_by_id<T: Entity>(&self, id: &str) -> Result<bool> {
        self.run(self.inner.delete_by_id::<T>(id))
    }

    pub fn add<T: Entity>(&self, entity: &T, values: &[(&str, i64)]) -> Result<T> {
        self.run(self.inner.add(entity, values))
    }

    pub fn append<T: Entity>(&self, entity: &T, values: &[(&str, &str)]) -> Result<T> {
        self.run(self.inner.append(entity, values))
    }

    pub fn prepend<T: Entity>(&self, entity: &T, values: &[(&str, &str)]) -> Result<T> {
        self.run(self.inner.prepend(entity, values))
    }
}
