//! Async template
//!
//! Typed CRUD over a shared [`StoreClient`]. Every mutating call sends
//! exactly one request; versioned writes retrieve the new generation in
//! the same round trip through `operate(puts + header)`. The template
//! suspends only while awaiting the client and never holds a lock across
//! a request. Concurrent writers to one key are arbitrated by the store's
//! generation check, not by this layer.

use crate::cas::WriteMode;
use crate::handle::OperationHandle;
use crate::translate::{DefaultErrorTranslator, ErrorTranslator};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use kvmap_client::{ClientError, Operation, RecordStream, ResultCode, StoreClient};
use kvmap_common::{
    Bin, Config, Error, ExistenceAction, Filter, GenerationPolicy, KeyRecord, Query, Result, Sort,
    StoreKey, WritePolicy,
};
use kvmap_mapping::{Entity, EntityMetadata, EntityRegistry, RecordConverter, WriteData};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Single-pass stream of entities; every find call returns a fresh one
pub type EntityStream<T> = BoxStream<'static, Result<T>>;

/// Non-blocking entity operations.
///
/// Cheap to clone; clones share the client, registry and translator.
#[derive(Clone)]
pub struct AsyncTemplate {
    client: Arc<dyn StoreClient>,
    registry: EntityRegistry,
    converter: RecordConverter,
    translator: Arc<dyn ErrorTranslator>,
    base_policy: WritePolicy,
    batch_concurrency: usize,
}

impl AsyncTemplate {
    /// Create a template over a client owned by the caller
    pub fn new(client: Arc<dyn StoreClient>, registry: EntityRegistry, config: &Config) -> Self {
        Self {
            client,
            registry,
            converter: RecordConverter::new(&config.store.namespace),
            translator: Arc::new(DefaultErrorTranslator),
            base_policy: config.base_write_policy(),
            batch_concurrency: config.template.batch_concurrency.max(1),
        }
    }

    /// Replace the error translator
    #[must_use]
    pub fn with_translator(mut self, translator: Arc<dyn ErrorTranslator>) -> Self {
        self.translator = translator;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.converter.namespace()
    }

    /// Policy every template write starts from
    #[must_use]
    pub const fn base_policy(&self) -> &WritePolicy {
        &self.base_policy
    }

    fn translate(&self, err: ClientError, key: &StoreKey) -> Error {
        self.translator.translate(err, Some(key))
    }

    fn prepare<T: Entity>(&self, entity: &T) -> Result<(Arc<EntityMetadata<T>>, WriteData)> {
        let meta = self.registry.resolve::<T>()?;
        let data = self.converter.to_record(&meta, entity)?;
        Ok((meta, data))
    }

    /// Write bins and read back the new generation in one request
    async fn write_with_header(
        &self,
        mode: WriteMode,
        policy: &WritePolicy,
        data: &WriteData,
    ) -> Result<u32> {
        let ops = Operation::puts(&data.bins, &[Operation::GetHeader]);
        match self.client.operate(policy, &data.key, &ops).await {
            Ok(record) => Ok(record.generation),
            Err(e) => {
                let err = mode.translate(e, &data.key, self.translator.as_ref());
                if err.is_conflict() {
                    debug!("Write conflict on {}: {}", data.key, err);
                }
                Err(err)
            }
        }
    }

    /// Save an entity.
    ///
    /// Unversioned types are upserted. Versioned entities are created when
    /// their version is unset and otherwise replaced only if the stored
    /// generation still equals their version; the version is then set to
    /// the new generation.
    pub async fn save<T: Entity>(&self, entity: &mut T) -> Result<()> {
        let (meta, data) = self.prepare(entity)?;
        let mode = WriteMode::select(meta.has_version(), data.version);
        let policy = mode.policy(&self.base_policy, data.expiration);
        debug!("save {} ({:?})", data.key, mode);

        if mode.tracks_version() {
            let generation = self.write_with_header(mode, &policy, &data).await?;
            meta.set_version(entity, generation);
        } else {
            self.client
                .put(&policy, &data.key, &data.bins)
                .await
                .map_err(|e| self.translate(e, &data.key))?;
        }
        Ok(())
    }

    /// Create an entity; fails with `DuplicateKey` if the key exists
    pub async fn insert<T: Entity>(&self, entity: &mut T) -> Result<()> {
        let (meta, data) = self.prepare(entity)?;
        let policy = WritePolicy::builder(&self.base_policy)
            .existence_action(ExistenceAction::CreateOnly)
            .generation_policy(GenerationPolicy::None)
            .expiration(data.expiration)
            .send_key(true)
            .build();
        debug!("insert {}", data.key);

        if meta.has_version() {
            let generation = self
                .write_with_header(WriteMode::Create, &policy, &data)
                .await?;
            meta.set_version(entity, generation);
        } else {
            self.client
                .put(&policy, &data.key, &data.bins)
                .await
                .map_err(|e| self.translate(e, &data.key))?;
        }
        Ok(())
    }

    /// Insert many entities concurrently, at most `batch_concurrency` in
    /// flight. Every insert is attempted; the failure of the earliest entity
    /// in input order is returned.
    pub async fn insert_all<T: Entity>(&self, entities: &mut [T]) -> Result<()> {
        let total = entities.len();
        let results: Vec<Result<()>> = stream::iter(entities.iter_mut().map(|e| self.insert(e)))
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        let mut failures = results.into_iter().filter_map(Result::err);
        match failures.next() {
            None => Ok(()),
            Some(first) => {
                warn!(
                    "insert_all: {} of {} inserts failed, first: {}",
                    failures.count() + 1,
                    total,
                    first
                );
                Err(first)
            }
        }
    }

    /// Update an existing entity; fails with `KeyNotFound` if absent.
    ///
    /// Bins not mapped by the entity are kept. Versioned entities with a
    /// version are checked against the stored generation.
    pub async fn update<T: Entity>(&self, entity: &mut T) -> Result<()> {
        let (meta, data) = self.prepare(entity)?;
        let mode = WriteMode::select(meta.has_version(), data.version);
        let mut builder = WritePolicy::builder(&self.base_policy)
            .existence_action(ExistenceAction::UpdateOnly)
            .generation_policy(GenerationPolicy::None)
            .expiration(data.expiration)
            .send_key(true);
        if let WriteMode::Update { expected } = mode {
            builder = builder
                .generation_policy(GenerationPolicy::ExpectEqual)
                .generation(expected);
        }
        let policy = builder.build();
        debug!("update {} ({:?})", data.key, mode);

        if meta.has_version() {
            let generation = self.write_with_header(mode, &policy, &data).await?;
            meta.set_version(entity, generation);
        } else {
            self.client
                .put(&policy, &data.key, &data.bins)
                .await
                .map_err(|e| self.translate(e, &data.key))?;
        }
        Ok(())
    }

    /// Write with a caller-supplied policy, bypassing version selection.
    /// The version field, if any, still receives the new generation.
    pub async fn persist<T: Entity>(&self, entity: &mut T, policy: &WritePolicy) -> Result<()> {
        let (meta, data) = self.prepare(entity)?;
        debug!("persist {} ({:?})", data.key, policy.existence_action());
        let generation = self
            .client
            .put(policy, &data.key, &data.bins)
            .await
            .map_err(|e| self.translate(e, &data.key))?;
        meta.set_version(entity, generation);
        Ok(())
    }

    /// Read an entity by id; absence is `Ok(None)`.
    ///
    /// Types that refresh on read are fetched together with a touch that
    /// resets their expiration, and the post-touch record is returned. Such
    /// types must not also declare an expiration field.
    pub async fn find_by_id<T: Entity>(&self, id: &str) -> Result<Option<T>> {
        let meta = self.registry.resolve::<T>()?;
        if meta.touch_on_read() && meta.has_expiration_field() {
            return Err(Error::precondition(format!(
                "{} refreshes expiration on read and must not declare an expiration field",
                meta.type_name()
            )));
        }
        let key = self.converter.key_for(&meta, id)?;
        debug!("find_by_id {}", key);

        let record = if meta.touch_on_read() {
            let policy = WritePolicy::builder(&self.base_policy)
                .expiration(meta.default_expiration())
                .build();
            match self
                .client
                .operate(&policy, &key, &[Operation::Touch, Operation::Get])
                .await
            {
                Ok(record) => Some(record),
                Err(e) if e.code == ResultCode::KeyNotFound => None,
                Err(e) => return Err(self.translate(e, &key)),
            }
        } else {
            self.client
                .get(&key)
                .await
                .map_err(|e| self.translate(e, &key))?
        };
        self.converter.from_record(&meta, &key, record.as_ref())
    }

    /// Read several entities in one batch request.
    ///
    /// Missing ids are dropped; the result holds only existing entities.
    pub async fn find_by_ids<T: Entity, S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<T>> {
        let meta = self.registry.resolve::<T>()?;
        let keys = ids
            .iter()
            .map(|id| self.converter.key_for(&meta, id.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        debug!("find_by_ids {} keys in {}", keys.len(), meta.set_name());

        let records = self
            .client
            .batch_get(&keys)
            .await
            .map_err(|e| self.translator.translate(e, None))?;
        keys.iter()
            .zip(records)
            .filter_map(|(key, record)| record.map(|r| self.converter.read(&meta, key, &r)))
            .collect()
    }

    /// Every entity of type `T`
    pub async fn find_all<T: Entity>(&self) -> Result<EntityStream<T>> {
        let meta = self.registry.resolve::<T>()?;
        let records = self.scan(&meta, None).await?;
        Ok(self.entities(meta, records))
    }

    /// A window of entities: skip `offset`, take at most `limit`, optionally
    /// ordered by `sort`
    pub async fn find_in_range<T: Entity>(
        &self,
        offset: u64,
        limit: u64,
        sort: Option<&Sort>,
    ) -> Result<EntityStream<T>> {
        let meta = self.registry.resolve::<T>()?;
        let records = self.scan(&meta, None).await?;
        let records = self.window(records, sort, offset, Some(limit)).await?;
        Ok(self.entities(meta, records))
    }

    /// Entities matching `query`.
    ///
    /// An offset without ordering is rejected: scan order is unspecified,
    /// so pages would overlap.
    pub async fn find<T: Entity>(&self, query: &Query) -> Result<EntityStream<T>> {
        query.validate()?;
        let meta = self.registry.resolve::<T>()?;
        let records = self.scan(&meta, query.filter.as_ref()).await?;
        let records = self
            .window(records, query.sort.as_ref(), query.offset, query.limit)
            .await?;
        Ok(self.entities(meta, records))
    }

    /// Number of stored entities of type `T`
    pub async fn count<T: Entity>(&self) -> Result<u64> {
        let meta = self.registry.resolve::<T>()?;
        let records = self.scan(&meta, None).await?;
        let translator = Arc::clone(&self.translator);
        records
            .map_err(move |e| translator.translate(e, None))
            .try_fold(0u64, |n, _| async move { Ok::<_, Error>(n + 1) })
            .await
    }

    /// Whether an entity with `id` exists
    pub async fn exists<T: Entity>(&self, id: &str) -> Result<bool> {
        let meta = self.registry.resolve::<T>()?;
        let key = self.converter.key_for(&meta, id)?;
        self.client
            .exists(&key)
            .await
            .map_err(|e| self.translate(e, &key))
    }

    /// Delete an entity's record; returns whether it existed
    pub async fn delete<T: Entity>(&self, entity: &T) -> Result<bool> {
        let meta = self.registry.resolve::<T>()?;
        self.delete_key(&meta, &meta.id_of(entity)).await
    }

    /// Delete by id; returns whether the record existed
    pub async fn delete_by_id<T: Entity>(&self, id: &str) -> Result<bool> {
        let meta = self.registry.resolve::<T>()?;
        self.delete_key(&meta, id).await
    }

    async fn delete_key<T>(&self, meta: &EntityMetadata<T>, id: &str) -> Result<bool> {
        let key = self.converter.key_for(meta, id)?;
        debug!("delete {}", key);
        self.client
            .delete(&self.base_policy, &key)
            .await
            .map_err(|e| self.translate(e, &key))
    }

    /// Atomically add to integer fields and return the updated entity
    pub async fn add<T: Entity>(&self, entity: &T, values: &[(&str, i64)]) -> Result<T> {
        let ops = values
            .iter()
            .map(|(name, delta)| Operation::Add(Bin::new(*name, *delta)))
            .collect();
        self.modify(entity, ops).await
    }

    /// Atomically append to string fields and return the updated entity
    pub async fn append<T: Entity>(&self, entity: &T, values: &[(&str, &str)]) -> Result<T> {
        let ops = values
            .iter()
            .map(|(name, suffix)| Operation::Append(Bin::new(*name, *suffix)))
            .collect();
        self.modify(entity, ops).await
    }

    /// Atomically prepend to string fields and return the updated entity
    pub async fn prepend<T: Entity>(&self, entity: &T, values: &[(&str, &str)]) -> Result<T> {
        let ops = values
            .iter()
            .map(|(name, prefix)| Operation::Prepend(Bin::new(*name, *prefix)))
            .collect();
        self.modify(entity, ops).await
    }

    async fn modify<T: Entity>(&self, entity: &T, mut ops: Vec<Operation>) -> Result<T> {
        let meta = self.registry.resolve::<T>()?;
        if ops.is_empty() {
            return Err(Error::invalid_argument("no fields to modify"));
        }
        for op in &ops {
            if let Operation::Add(bin) | Operation::Append(bin) | Operation::Prepend(bin) = op
                && !meta.field_names().any(|name| name == bin.name)
            {
                return Err(Error::invalid_argument(format!(
                    "{} has no field '{}'",
                    meta.type_name(),
                    bin.name
                )));
            }
        }

        let key = self.converter.key_for(&meta, &meta.id_of(entity))?;
        let policy = WritePolicy::builder(&self.base_policy)
            .expiration(meta.expiration_of(entity))
            .build();
        ops.push(Operation::Get);
        debug!("modify {} ({} ops)", key, ops.len() - 1);

        let record = self
            .client
            .operate(&policy, &key, &ops)
            .await
            .map_err(|e| self.translate(e, &key))?;
        self.converter.read(&meta, &key, &record)
    }

    /// Run an operation on its own task and return a cancellable handle.
    ///
    /// ```ignore
    /// let handle = template.spawn(|t| async move { t.find_by_id::<Person>("p1").await });
    /// handle.cancel();
    /// ```
    pub fn spawn<R, F, Fut>(&self, op: F) -> OperationHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        OperationHandle::new(tokio::spawn(op(self.clone())))
    }

    async fn scan<T>(&self, meta: &EntityMetadata<T>, filter: Option<&Filter>) -> Result<RecordStream> {
        debug!("scan {}/{}", self.namespace(), meta.set_name());
        self.client
            .scan(self.namespace(), meta.set_name(), filter)
            .await
            .map_err(|e| self.translator.translate(e, None))
    }

    /// Apply ordering and paging. Ordering needs the whole result set;
    /// without it records stream through untouched.
    async fn window(
        &self,
        records: RecordStream,
        sort: Option<&Sort>,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<RecordStream> {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let Some(sort) = sort else {
            // Failures always pass through; only records count toward the window
            let end = skip.saturating_add(take);
            let windowed = records
                .scan(0usize, move |seen, item| {
                    let next = match item {
                        Err(e) => Some(Some(Err(e))),
                        Ok(_) if *seen >= end => None,
                        Ok(kr) => {
                            *seen += 1;
                            Some((*seen > skip).then_some(Ok(kr)))
                        }
                    };
                    future::ready(next)
                })
                .filter_map(future::ready);
            return Ok(windowed.boxed());
        };

        let mut all: Vec<KeyRecord> = records
            .try_collect()
            .await
            .map_err(|e| self.translator.translate(e, None))?;
        all.sort_by(|a, b| sort.compare(&a.record, &b.record));
        Ok(stream::iter(all.into_iter().skip(skip).take(take).map(Ok)).boxed())
    }

    fn entities<T: Entity>(&self, meta: Arc<EntityMetadata<T>>, records: RecordStream) -> EntityStream<T> {
        let converter = self.converter.clone();
        let translator = Arc::clone(&self.translator);
        records
            .map(move |item| {
                let kr = item.map_err(|e| translator.translate(e, None))?;
                converter.read(&meta, &kr.key, &kr.record)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kvmap_client::{ClientResult, MemoryStore};
    use kvmap_common::{Bins, Expiration, Record, Value};
    use kvmap_mapping::EntityMapping;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    struct Person {
        id: String,
        version: Option<u32>,
        name: String,
        age: i64,
    }

    impl Person {
        fn new(id: &str, name: &str, age: i64) -> Self {
            Self {
                id: id.to_string(),
                version: None,
                name: name.to_string(),
                age,
            }
        }
    }

    impl Entity for Person {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::<Self>::new()
                .id("id", |p| p.id.clone())
                .version("version", |p| p.version, |p, v| p.version = Some(v))
                .field("name", |p| Ok(p.name.as_str().into()))
                .field("age", |p| Ok(p.age.into()))
                .reader(|r| {
                    Ok(Self {
                        id: r.id().to_string(),
                        version: None,
                        name: r.get("name")?,
                        age: r.get("age")?,
                    })
                })
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Note {
        id: String,
        text: String,
    }

    impl Entity for Note {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::<Self>::new()
                .id("id", |n| n.id.clone())
                .field("text", |n| Ok(n.text.as_str().into()))
                .reader(|r| {
                    Ok(Self {
                        id: r.id().to_string(),
                        text: r.get("text")?,
                    })
                })
        }
    }

    #[derive(Debug)]
    struct Session {
        id: String,
        version: Option<u32>,
        user: String,
    }

    impl Entity for Session {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::<Self>::new()
                .id("id", |s| s.id.clone())
                .version("version", |s| s.version, |s, v| s.version = Some(v))
                .field("user", |s| Ok(s.user.as_str().into()))
                .default_expiration(Expiration::Seconds(60))
                .touch_on_read(true)
                .reader(|r| {
                    Ok(Self {
                        id: r.id().to_string(),
                        version: None,
                        user: r.get("user")?,
                    })
                })
        }
    }

    #[derive(Debug)]
    struct ExpiringSession {
        id: String,
        ttl: Option<u32>,
    }

    impl Entity for ExpiringSession {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::<Self>::new()
                .id("id", |s| s.id.clone())
                .expiration("ttl", |s| s.ttl.map(Expiration::Seconds), |s, secs| s.ttl = secs)
                .touch_on_read(true)
                .reader(|r| {
                    Ok(Self {
                        id: r.id().to_string(),
                        ttl: None,
                    })
                })
        }
    }

    #[derive(Debug)]
    struct Ticket {
        id: String,
        version: Option<u32>,
        ttl: Option<u32>,
        note: String,
    }

    impl Ticket {
        fn new(id: &str, note: &str) -> Self {
            Self {
                id: id.to_string(),
                version: None,
                ttl: None,
                note: note.to_string(),
            }
        }
    }

    impl Entity for Ticket {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::<Self>::new()
                .id("id", |t| t.id.clone())
                .version("version", |t| t.version, |t, v| t.version = Some(v))
                .expiration("ttl", |t| t.ttl.map(Expiration::Seconds), |t, secs| t.ttl = secs)
                .field("note", |t| Ok(t.note.as_str().into()))
                .reader(|r| {
                    Ok(Self {
                        id: r.id().to_string(),
                        version: None,
                        ttl: None,
                        note: r.get("note")?,
                    })
                })
        }
    }

    /// Delegates to a [`MemoryStore`] but fails the first scanned item
    struct FailingScan {
        inner: MemoryStore,
    }

    #[async_trait]
    impl StoreClient for FailingScan {
        async fn get(&self, key: &StoreKey) -> ClientResult<Option<Record>> {
            self.inner.get(key).await
        }

        async fn exists(&self, key: &StoreKey) -> ClientResult<bool> {
            self.inner.exists(key).await
        }

        async fn put(&self, policy: &WritePolicy, key: &StoreKey, bins: &Bins) -> ClientResult<u32> {
            self.inner.put(policy, key, bins).await
        }

        async fn delete(&self, policy: &WritePolicy, key: &StoreKey) -> ClientResult<bool> {
            self.inner.delete(policy, key).await
        }

        async fn operate(
            &self,
            policy: &WritePolicy,
            key: &StoreKey,
            ops: &[Operation],
        ) -> ClientResult<Record> {
            self.inner.operate(policy, key, ops).await
        }

        async fn batch_get(&self, keys: &[StoreKey]) -> ClientResult<Vec<Option<Record>>> {
            self.inner.batch_get(keys).await
        }

        async fn scan(
            &self,
            namespace: &str,
            set_name: &str,
            filter: Option<&Filter>,
        ) -> ClientResult<RecordStream> {
            let records = self.inner.scan(namespace, set_name, filter).await?;
            let failure = ClientError::new(ResultCode::ServerError, "node unavailable");
            Ok(stream::iter([Err(failure)]).chain(records).boxed())
        }
    }

    struct Unregistered;

    impl Entity for Unregistered {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::<Self>::new()
                .id("id", |_| "x".to_string())
                .reader(|_| Ok(Self))
        }
    }

    fn setup_with(store: MemoryStore) -> (Arc<MemoryStore>, AsyncTemplate) {
        let store = Arc::new(store);
        let registry = EntityRegistry::builder()
            .register::<Person>()
            .unwrap()
            .register::<Note>()
            .unwrap()
            .register::<Session>()
            .unwrap()
            .register::<ExpiringSession>()
            .unwrap()
            .register::<Ticket>()
            .unwrap()
            .build();
        let client: Arc<dyn StoreClient> = store.clone();
        let template = AsyncTemplate::new(client, registry, &Config::default());
        (store, template)
    }

    fn setup() -> (Arc<MemoryStore>, AsyncTemplate) {
        setup_with(MemoryStore::new())
    }

    fn person_key(id: &str) -> StoreKey {
        StoreKey::new("test", "Person", id)
    }

    async fn people(stream: EntityStream<Person>) -> Vec<Person> {
        stream.try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_sequential_saves_count_generations() {
        let (_, template) = setup();
        let mut person = Person::new("p1", "Dave", 30);
        for n in 1..=5 {
            template.save(&mut person).await.unwrap();
            assert_eq!(person.version, Some(n));
        }
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let (store, template) = setup();

        let mut dave = Person::new("p1", "Dave", 30);
        template.insert(&mut dave).await.unwrap();
        assert_eq!(dave.version, Some(1));

        template.save(&mut dave).await.unwrap();
        assert_eq!(dave.version, Some(2));

        let mut stale = Person {
            version: Some(1),
            name: "Changed".to_string(),
            ..dave.clone()
        };
        let err = template.save(&mut stale).await.unwrap_err();
        assert!(matches!(err, Error::OptimisticLock { .. }), "{err}");
        assert_eq!(stale.version, Some(1));

        let record = store.peek(&person_key("p1")).unwrap();
        assert_eq!(record.generation, 2);
        assert_eq!(record.get("name"), Some(&Value::from("Dave")));
    }

    #[tokio::test]
    async fn test_concurrent_writers_one_wins() {
        let (store, template) = setup();
        let mut original = Person::new("p1", "Dave", 30);
        template.save(&mut original).await.unwrap();

        let mut a = Person {
            name: "A".to_string(),
            ..original.clone()
        };
        let mut b = Person {
            name: "B".to_string(),
            ..original.clone()
        };
        let (ra, rb) = tokio::join!(template.save(&mut a), template.save(&mut b));
        assert!(ra.is_ok() ^ rb.is_ok());
        let failed = if ra.is_err() { ra } else { rb };
        assert!(failed.unwrap_err().is_conflict());
        assert_eq!(store.peek(&person_key("p1")).unwrap().generation, 2);
    }

    #[tokio::test]
    async fn test_unversioned_save_overwrites() {
        let (store, template) = setup();
        let mut note = Note {
            id: "n1".to_string(),
            text: "first".to_string(),
        };
        template.save(&mut note).await.unwrap();
        note.text = "second".to_string();
        template.save(&mut note).await.unwrap();

        let found: Note = template.find_by_id("n1").await.unwrap().unwrap();
        assert_eq!(found.text, "second");
        assert_eq!(store.len(), 1);
        assert!(store.has_user_key(&StoreKey::new("test", "Note", "n1")));
    }

    #[tokio::test]
    async fn test_insert_twice_is_duplicate() {
        let (_, template) = setup();
        let mut note = Note {
            id: "n1".to_string(),
            text: "hello".to_string(),
        };
        template.insert(&mut note).await.unwrap();
        let err = template.insert(&mut note.clone()).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }), "{err}");

        let mut first = Person::new("p1", "Dave", 30);
        template.insert(&mut first).await.unwrap();
        let err = template
            .insert(&mut Person::new("p1", "Other", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_first_save_on_existing_key_is_duplicate() {
        let (_, template) = setup();
        template.save(&mut Person::new("p1", "Dave", 30)).await.unwrap();
        let err = template
            .save(&mut Person::new("p1", "Impostor", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_update() {
        let (store, template) = setup();
        let err = template
            .update(&mut Person::new("p1", "Dave", 30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }), "{err}");
        assert!(store.is_empty());

        let mut dave = Person::new("p1", "Dave", 30);
        template.insert(&mut dave).await.unwrap();
        dave.age = 31;
        template.update(&mut dave).await.unwrap();
        assert_eq!(dave.version, Some(2));

        let mut stale = Person {
            version: Some(1),
            ..dave.clone()
        };
        let err = template.update(&mut stale).await.unwrap_err();
        assert!(matches!(err, Error::OptimisticLock { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_persist_with_explicit_policy() {
        let (_, template) = setup();
        let update_only = WritePolicy::builder(template.base_policy())
            .existence_action(ExistenceAction::UpdateOnly)
            .build();
        let mut dave = Person::new("p1", "Dave", 30);
        let err = template.persist(&mut dave, &update_only).await.unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }), "{err}");

        template
            .persist(&mut dave, &WritePolicy::default())
            .await
            .unwrap();
        assert_eq!(dave.version, Some(1));
        template.persist(&mut dave, &update_only).await.unwrap();
        assert_eq!(dave.version, Some(2));
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let (_, template) = setup();
        assert!(template.find_by_id::<Person>("nobody").await.unwrap().is_none());

        let mut dave = Person::new("p1", "Dave", 30);
        template.save(&mut dave).await.unwrap();
        let found = template.find_by_id::<Person>("p1").await.unwrap().unwrap();
        assert_eq!(found, dave);

        let err = template.find_by_id::<Unregistered>("x").await.err().unwrap();
        assert!(matches!(err, Error::UnmappedType { .. }));
    }

    #[tokio::test]
    async fn test_find_by_ids_drops_missing() {
        let (store, template) = setup();
        for id in ["a", "b", "c"] {
            template.save(&mut Person::new(id, id, 1)).await.unwrap();
        }
        let before = store.request_count();
        let found: Vec<Person> = template
            .find_by_ids(&["c", "x", "a", "y"])
            .await
            .unwrap();
        assert_eq!(store.request_count(), before + 1);

        let mut ids: Vec<_> = found.iter().map(|p| p.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(found.iter().all(|p| p.version == Some(1)));

        let empty: Vec<Person> = template.find_by_ids::<Person, &str>(&[]).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_touch_on_read_bumps_version() {
        let (store, template) = setup();
        let mut session = Session {
            id: "s1".to_string(),
            version: None,
            user: "dave".to_string(),
        };
        template.save(&mut session).await.unwrap();
        let before = session.version.unwrap();

        let read = template.find_by_id::<Session>("s1").await.unwrap().unwrap();
        assert!(read.version.unwrap() > before);
        assert_eq!(read.user, "dave");
        assert_eq!(
            store.peek(&StoreKey::new("test", "Session", "s1")).unwrap().expiration,
            60
        );

        assert!(template.find_by_id::<Session>("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_touch_on_read_with_expiration_field_rejected() {
        let (store, template) = setup();
        let mut session = ExpiringSession {
            id: "s1".to_string(),
            ttl: Some(30),
        };
        template.save(&mut session).await.unwrap();

        let before = store.request_count();
        let err = template
            .find_by_id::<ExpiringSession>("s1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)), "{err}");
        assert_eq!(store.request_count(), before);
    }

    #[tokio::test]
    async fn test_find_all_and_count() {
        let (_, template) = setup();
        for (id, age) in [("a", 30), ("b", 20), ("c", 40)] {
            template.save(&mut Person::new(id, id, age)).await.unwrap();
        }
        template
            .save(&mut Note {
                id: "n".to_string(),
                text: "x".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(people(template.find_all().await.unwrap()).await.len(), 3);
        // each call yields a fresh stream
        assert_eq!(people(template.find_all().await.unwrap()).await.len(), 3);
        assert_eq!(template.count::<Person>().await.unwrap(), 3);
        assert_eq!(template.count::<Note>().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_in_range_sorted() {
        let (_, template) = setup();
        for (id, age) in [("a", 30), ("b", 20), ("c", 40), ("d", 10)] {
            template.save(&mut Person::new(id, id, age)).await.unwrap();
        }
        let sort = Sort::asc("age");
        let page = people(template.find_in_range(1, 2, Some(&sort)).await.unwrap()).await;
        let ages: Vec<_> = page.iter().map(|p| p.age).collect();
        assert_eq!(ages, vec![20, 30]);

        let unsorted = people(template.find_in_range(0, 3, None).await.unwrap()).await;
        assert_eq!(unsorted.len(), 3);
    }

    #[tokio::test]
    async fn test_find_in_range_reports_scan_failure() {
        let store = FailingScan {
            inner: MemoryStore::new(),
        };
        let registry = EntityRegistry::builder()
            .register::<Person>()
            .unwrap()
            .build();
        let template = AsyncTemplate::new(Arc::new(store), registry, &Config::default());
        for id in ["a", "b", "c"] {
            template.save(&mut Person::new(id, id, 20)).await.unwrap();
        }

        let items: Vec<Result<Person>> = template
            .find_in_range::<Person>(1, 10, None)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], Err(Error::Store { code: 1, .. })), "{:?}", items[0]);
        assert_eq!(items.iter().filter(|i| i.is_ok()).count(), 2);

        let err = template
            .find_in_range::<Person>(0, 1, None)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert_eq!(err.store_code(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_modify_save_keeps_record() {
        let (store, template) = setup();
        template.save(&mut Ticket::new("t1", "open")).await.unwrap();

        let mut read = template.find_by_id::<Ticket>("t1").await.unwrap().unwrap();
        assert_eq!(read.ttl, None);
        read.note = "closed".to_string();
        template.save(&mut read).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        let found = template.find_by_id::<Ticket>("t1").await.unwrap().unwrap();
        assert_eq!(found.note, "closed");
        assert_eq!(found.version, Some(2));

        // a bounded lifetime survives the same cycle
        let mut expiring = Ticket {
            ttl: Some(120),
            ..Ticket::new("t2", "open")
        };
        template.save(&mut expiring).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        let mut read = template.find_by_id::<Ticket>("t2").await.unwrap().unwrap();
        assert_eq!(read.ttl, Some(100));
        template.save(&mut read).await.unwrap();
        let key = StoreKey::new("test", "Ticket", "t2");
        assert_eq!(store.peek(&key).unwrap().expiration, 100);
    }

    #[tokio::test]
    async fn test_find_query() {
        let (_, template) = setup();
        for (id, age) in [("a", 30), ("b", 20), ("c", 40), ("d", 10), ("e", 35)] {
            template.save(&mut Person::new(id, id, age)).await.unwrap();
        }

        let query = Query::new(Some(Filter::range("age", 20, 35)))
            .with_sort(Sort::desc("age"))
            .with_offset(1)
            .with_limit(2);
        let found = people(template.find(&query).await.unwrap()).await;
        let ages: Vec<_> = found.iter().map(|p| p.age).collect();
        assert_eq!(ages, vec![30, 20]);

        let equal = Query::new(Some(Filter::equal("name", "d")));
        let found = people(template.find(&equal).await.unwrap()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].age, 10);

        let bad = Query::new(None).with_offset(1);
        let err = template.find::<Person>(&bad).await.err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(msg) if msg.starts_with("Unsorted query")));
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let (_, template) = setup();
        let mut dave = Person::new("p1", "Dave", 30);
        template.save(&mut dave).await.unwrap();
        template.save(&mut Person::new("p2", "Carter", 40)).await.unwrap();

        assert!(template.exists::<Person>("p1").await.unwrap());
        assert!(template.delete(&dave).await.unwrap());
        assert!(!template.exists::<Person>("p1").await.unwrap());
        assert!(!template.delete(&dave).await.unwrap());

        assert!(template.delete_by_id::<Person>("p2").await.unwrap());
        assert_eq!(template.count::<Person>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_append_prepend() {
        let (_, template) = setup();
        let mut dave = Person::new("p1", "ave", 30);
        template.save(&mut dave).await.unwrap();

        let older = template.add(&dave, &[("age", 5)]).await.unwrap();
        assert_eq!(older.age, 35);
        assert_eq!(older.version, Some(2));

        let renamed = template.prepend(&older, &[("name", "D")]).await.unwrap();
        assert_eq!(renamed.name, "Dave");
        let renamed = template.append(&renamed, &[("name", "!")]).await.unwrap();
        assert_eq!(renamed.name, "Dave!");
        assert_eq!(renamed.version, Some(4));

        let err = template.add(&dave, &[("salary", 1)]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
        let err = template.add(&dave, &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    }

    #[tokio::test]
    async fn test_add_to_string_field_is_store_error() {
        let (_, template) = setup();
        let mut dave = Person::new("p1", "Dave", 30);
        template.save(&mut dave).await.unwrap();
        let err = template.add(&dave, &[("name", 1)]).await.unwrap_err();
        assert_eq!(err.store_code(), Some(ResultCode::BinTypeError.code()));
    }

    #[tokio::test]
    async fn test_insert_all_reports_first_failure() {
        let (store, template) = setup();
        template.insert(&mut Person::new("p3", "Taken", 1)).await.unwrap();

        let mut batch: Vec<_> = (1..=5)
            .map(|i| Person::new(&format!("p{i}"), "batch", i))
            .collect();
        let err = template.insert_all(&mut batch).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }), "{err}");
        assert_eq!(store.len(), 5);
        assert_eq!(batch.iter().filter(|p| p.version == Some(1)).count(), 4);

        let mut fresh: Vec<_> = (6..=9)
            .map(|i| Person::new(&format!("p{i}"), "batch", i))
            .collect();
        template.insert_all(&mut fresh).await.unwrap();
        assert!(fresh.iter().all(|p| p.version == Some(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_all_failure_follows_input_order() {
        let (_, template) =
            setup_with(MemoryStore::new().with_latency(Duration::from_millis(10)));
        template.insert(&mut Person::new("p1", "Taken", 1)).await.unwrap();

        // the duplicate waits on the store; the empty id fails before any request
        let mut batch = vec![
            Person::new("p1", "batch", 1),
            Person::new("p2", "batch", 2),
            Person::new("", "batch", 3),
        ];
        let err = template.insert_all(&mut batch).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }), "{err}");
        assert_eq!(batch[1].version, Some(1));
    }

    #[tokio::test]
    async fn test_store_failures_translated() {
        let (store, template) = setup();
        store.fail_next(ResultCode::Timeout);
        let err = template.find_by_id::<Person>("p1").await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(err.is_retryable());

        store.fail_next(ResultCode::Other(99));
        let err = template
            .save(&mut Person::new("p1", "Dave", 30))
            .await
            .unwrap_err();
        assert_eq!(err.store_code(), Some(99));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_and_cancel() {
        let (_, template) = setup_with(MemoryStore::new().with_latency(Duration::from_secs(10)));

        let handle = template.spawn(|t| async move {
            t.save(&mut Person::new("p1", "Dave", 30)).await?;
            t.count::<Person>().await
        });
        assert_eq!(handle.await.unwrap(), 1);

        let handle = template.spawn(|t| async move {
            let mut person = Person::new("p2", "Carter", 40);
            t.save(&mut person).await?;
            Ok::<_, Error>(person)
        });
        handle.cancel();
        assert!(matches!(handle.await, Err(Error::Cancelled)));
    }
}
