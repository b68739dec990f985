//! In-memory store
//!
//! Implements [`StoreClient`] over a `BTreeMap` with the remote store's
//! write semantics: existence actions, generation checks, per-write
//! generation increments starting at 1, touch, and expiration. Failure
//! injection, artificial latency and a request counter make it usable as
//! a test double for the template layer.

use crate::client::{RecordStream, StoreClient};
use crate::error::{ClientError, ClientResult, ResultCode};
use crate::operation::Operation;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kvmap_common::{
    Bin, Bins, ExistenceAction, Expiration, Filter, GenerationPolicy, KeyRecord, Record, StoreKey,
    Value, WritePolicy,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Clone, Debug)]
struct StoredRecord {
    bins: Bins,
    generation: u32,
    expires_at: Option<Instant>,
    user_key_stored: bool,
}

impl StoredRecord {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }

    fn to_record(&self, now: Instant, with_bins: bool) -> Record {
        // Round up so a fresh record reports its full time-to-live
        let expiration = self.expires_at.map_or(0, |t| {
            let left = t.saturating_duration_since(now);
            let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            u32::try_from(secs).unwrap_or(u32::MAX)
        });
        Record {
            bins: if with_bins {
                self.bins.clone()
            } else {
                Bins::new()
            },
            generation: self.generation,
            expiration,
        }
    }
}

/// In-memory implementation of [`StoreClient`]
pub struct MemoryStore {
    records: RwLock<BTreeMap<StoreKey, StoredRecord>>,
    /// Namespace default time-to-live; `None` means records never expire
    default_ttl: Option<Duration>,
    /// Delay applied to every request before it is served
    latency: Option<Duration>,
    /// Failures returned by the next requests, in order
    injected: Mutex<VecDeque<ResultCode>>,
    requests: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store whose namespace default is "never expire"
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            default_ttl: None,
            latency: None,
            injected: Mutex::new(VecDeque::new()),
            requests: AtomicU64::new(0),
        }
    }

    /// Set the namespace default time-to-live
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Delay every request by `latency`
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next request fail with `code`
    pub fn fail_next(&self, code: ResultCode) {
        self.injected.lock().push_back(code);
    }

    /// Number of requests served so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Read a record without counting a request
    pub fn peek(&self, key: &StoreKey) -> Option<Record> {
        let now = Instant::now();
        self.records
            .read()
            .get(key)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.to_record(now, true))
    }

    /// Whether the user key was stored with the record
    pub fn has_user_key(&self, key: &StoreKey) -> bool {
        self.records
            .read()
            .get(key)
            .is_some_and(|r| r.user_key_stored)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records
            .read()
            .values()
            .filter(|r| !r.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record
    pub fn clear(&self) {
        self.records.write().clear();
    }

    async fn begin(&self, op: &str, key: Option<&StoreKey>) -> ClientResult<()> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let injected = self.injected.lock().pop_front();
        if let Some(code) = injected {
            debug!("Injected {} failure on {} {:?}", code, op, key.map(ToString::to_string));
            return Err(ClientError::new(code, format!("injected failure on {op}")));
        }
        trace!("{} {:?}", op, key.map(ToString::to_string));
        Ok(())
    }

    fn purge_expired(records: &mut BTreeMap<StoreKey, StoredRecord>, key: &StoreKey, now: Instant) {
        if records.get(key).is_some_and(|r| r.is_expired(now)) {
            records.remove(key);
        }
    }

    fn check_write(
        existing: Option<&StoredRecord>,
        policy: &WritePolicy,
        key: &StoreKey,
    ) -> ClientResult<()> {
        match (policy.existence_action(), existing) {
            (ExistenceAction::CreateOnly, Some(_)) => {
                return Err(ClientError::new(
                    ResultCode::KeyExists,
                    format!("key {key} already exists"),
                ));
            }
            (ExistenceAction::UpdateOnly | ExistenceAction::ReplaceOnly, None) => {
                return Err(ClientError::new(
                    ResultCode::KeyNotFound,
                    format!("key {key} not found"),
                ));
            }
            _ => {}
        }

        // The generation check only applies to records that exist
        if policy.generation_policy() == GenerationPolicy::ExpectEqual
            && let Some(record) = existing
            && record.generation != policy.generation()
        {
            return Err(ClientError::new(
                ResultCode::GenerationError,
                format!(
                    "generation mismatch on {key}: expected {}, found {}",
                    policy.generation(),
                    record.generation
                ),
            ));
        }
        Ok(())
    }

    /// Generation after a write. Wraps past `u32::MAX` back to 1, since 0
    /// is reserved for "never written".
    fn next_generation(existing: Option<&StoredRecord>) -> u32 {
        match existing.map(|r| r.generation) {
            None | Some(u32::MAX) => 1,
            Some(g) => g + 1,
        }
    }

    fn expires_at(
        &self,
        policy: &WritePolicy,
        existing: Option<&StoredRecord>,
        now: Instant,
    ) -> Option<Instant> {
        let namespace_default = || self.default_ttl.map(|ttl| now + ttl);
        match policy.expiration() {
            Expiration::NamespaceDefault | Expiration::Seconds(0) => namespace_default(),
            Expiration::Never => None,
            Expiration::DontUpdate => existing.map_or_else(namespace_default, |r| r.expires_at),
            Expiration::Seconds(secs) => Some(now + Duration::from_secs(u64::from(secs))),
        }
    }

    fn apply_put(bins: &mut Bins, bin: &Bin) {
        if bin.value.is_nil() {
            bins.remove(&bin.name);
        } else {
            bins.set(bin.name.clone(), bin.value.clone());
        }
    }

    fn apply_add(bins: &mut Bins, bin: &Bin) -> ClientResult<()> {
        let delta = bin.value.as_i64().ok_or_else(|| bin_type_error(bin, "int"))?;
        let current = match bins.get(&bin.name) {
            None | Some(Value::Nil) => 0,
            Some(Value::Int(i)) => *i,
            Some(_) => return Err(bin_type_error(bin, "int")),
        };
        bins.set(bin.name.clone(), current.wrapping_add(delta));
        Ok(())
    }

    fn apply_concat(bins: &mut Bins, bin: &Bin, append: bool) -> ClientResult<()> {
        let part = bin.value.as_str().ok_or_else(|| bin_type_error(bin, "string"))?;
        let current = match bins.get(&bin.name) {
            None | Some(Value::Nil) => "",
            Some(Value::String(s)) => s.as_str(),
            Some(_) => return Err(bin_type_error(bin, "string")),
        };
        let joined = if append {
            format!("{current}{part}")
        } else {
            format!("{part}{current}")
        };
        bins.set(bin.name.clone(), joined);
        Ok(())
    }
}

fn bin_type_error(bin: &Bin, expected: &str) -> ClientError {
    ClientError::new(
        ResultCode::BinTypeError,
        format!("bin '{}' requires {expected}, got {}", bin.name, bin.value.kind()),
    )
}

fn key_not_found(key: &StoreKey) -> ClientError {
    ClientError::new(ResultCode::KeyNotFound, format!("key {key} not found"))
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn get(&self, key: &StoreKey) -> ClientResult<Option<Record>> {
        self.begin("get", Some(key)).await?;
        let now = Instant::now();
        Ok(self
            .records
            .read()
            .get(key)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.to_record(now, true)))
    }

    async fn exists(&self, key: &StoreKey) -> ClientResult<bool> {
        self.begin("exists", Some(key)).await?;
        let now = Instant::now();
        Ok(self
            .records
            .read()
            .get(key)
            .is_some_and(|r| !r.is_expired(now)))
    }

    async fn put(&self, policy: &WritePolicy, key: &StoreKey, bins: &Bins) -> ClientResult<u32> {
        self.begin("put", Some(key)).await?;
        let now = Instant::now();
        let mut records = self.records.write();
        Self::purge_expired(&mut records, key, now);

        let existing = records.get(key);
        Self::check_write(existing, policy, key)?;

        let mut new_bins = match (policy.existence_action(), existing) {
            (ExistenceAction::Upsert | ExistenceAction::UpdateOnly, Some(record)) => {
                record.bins.clone()
            }
            _ => Bins::new(),
        };
        for bin in bins.iter() {
            Self::apply_put(&mut new_bins, bin);
        }

        let generation = Self::next_generation(existing);
        let expires_at = self.expires_at(policy, existing, now);
        let user_key_stored = policy.send_key() || existing.is_some_and(|r| r.user_key_stored);

        records.insert(
            key.clone(),
            StoredRecord {
                bins: new_bins,
                generation,
                expires_at,
                user_key_stored,
            },
        );
        Ok(generation)
    }

    async fn delete(&self, policy: &WritePolicy, key: &StoreKey) -> ClientResult<bool> {
        self.begin("delete", Some(key)).await?;
        let now = Instant::now();
        let mut records = self.records.write();
        Self::purge_expired(&mut records, key, now);

        if policy.generation_policy() == GenerationPolicy::ExpectEqual
            && let Some(record) = records.get(key)
            && record.generation != policy.generation()
        {
            return Err(ClientError::new(
                ResultCode::GenerationError,
                format!("generation mismatch on {key}"),
            ));
        }
        Ok(records.remove(key).is_some())
    }

    async fn operate(
        &self,
        policy: &WritePolicy,
        key: &StoreKey,
        ops: &[Operation],
    ) -> ClientResult<Record> {
        self.begin("operate", Some(key)).await?;
        let now = Instant::now();
        let mut records = self.records.write();
        Self::purge_expired(&mut records, key, now);

        let existing = records.get(key);
        let want_bins = ops.iter().any(|op| matches!(op, Operation::Get));

        if !ops.iter().any(Operation::is_write) {
            return existing
                .map(|r| r.to_record(now, want_bins))
                .ok_or_else(|| key_not_found(key));
        }

        let modifies_bins = ops
            .iter()
            .any(|op| op.is_write() && !matches!(op, Operation::Touch));
        if existing.is_none() && !modifies_bins {
            return Err(key_not_found(key));
        }
        Self::check_write(existing, policy, key)?;

        let replaces = matches!(
            policy.existence_action(),
            ExistenceAction::ReplaceOnly | ExistenceAction::CreateOnly
        );
        let mut bins = match existing {
            Some(record) if !(replaces && modifies_bins) => record.bins.clone(),
            _ => Bins::new(),
        };

        // Work on a copy so a failing op leaves the record untouched
        for op in ops {
            match op {
                Operation::Put(bin) => Self::apply_put(&mut bins, bin),
                Operation::Add(bin) => Self::apply_add(&mut bins, bin)?,
                Operation::Append(bin) => Self::apply_concat(&mut bins, bin, true)?,
                Operation::Prepend(bin) => Self::apply_concat(&mut bins, bin, false)?,
                Operation::Touch | Operation::Get | Operation::GetHeader => {}
            }
        }

        let stored = StoredRecord {
            bins,
            generation: Self::next_generation(existing),
            expires_at: self.expires_at(policy, existing, now),
            user_key_stored: policy.send_key() || existing.is_some_and(|r| r.user_key_stored),
        };
        let result = stored.to_record(now, want_bins);
        records.insert(key.clone(), stored);
        Ok(result)
    }

    async fn batch_get(&self, keys: &[StoreKey]) -> ClientResult<Vec<Option<Record>>> {
        self.begin("batch_get", None).await?;
        let now = Instant::now();
        let records = self.records.read();
        Ok(keys
            .iter()
            .map(|key| {
                records
                    .get(key)
                    .filter(|r| !r.is_expired(now))
                    .map(|r| r.to_record(now, true))
            })
            .collect())
    }

    async fn scan(
        &self,
        namespace: &str,
        set_name: &str,
        filter: Option<&Filter>,
    ) -> ClientResult<RecordStream> {
        self.begin("scan", None).await?;
        let now = Instant::now();
        let items: Vec<KeyRecord> = self
            .records
            .read()
            .iter()
            .filter(|(key, r)| {
                key.namespace() == namespace && key.set_name() == set_name && !r.is_expired(now)
            })
            .map(|(key, r)| KeyRecord {
                key: key.clone(),
                record: r.to_record(now, true),
            })
            .filter(|kr| filter.is_none_or(|f| f.matches(&kr.record)))
            .collect();
        Ok(stream::iter(items.into_iter().map(Ok)).boxed())
    }
}
