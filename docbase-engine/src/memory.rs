//! # In-Memory Bucket
//!
//! Provide an in-process bucket with sharded locking, CAS versioning,
//! TTL-aware lookups and soft locks, so the client can be driven without a
//! cluster.
//!
//! ## Usage
//!
//! - Buckets are created through [`MemoryCluster`](crate::MemoryCluster) and
//!   opened via the `Cluster`/`Bucket` traits.
//! - Every handle returned by `open_bucket` shares the same [`BucketStore`];
//!   handles are interchangeable and `disconnect` only retires one handle.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-shard locks reduce contention under concurrency.
//! 2. **Encoded Values**: Documents are stored as JSON bytes, so every read
//!    returns a fresh copy just like a network round trip would.
//! 3. **TTL and Lock Fast Path**: Expiry and lock windows are checked on
//!    access; nothing has to run in the background.
//! 4. **Monotonic CAS**: Every mutation takes the next value of a per-bucket
//!    counter; locks take one too, so a lock CAS is never a stale one.
//!
//! ## Structure Overview
//!
//! ```text
//! BucketStore
//!   ├── shards: Vec<Shard>
//!   │     └── Shard { inner: RwLock<HashMap<String, Entry>> }
//!   │           └── Entry { value: Bytes, cas, expires_at, lock: Option<SoftLock> }
//!   └── views: RwLock<HashMap<(design, view), ViewIndex>>
//! ```

use std::collections::HashMap as StdHashMap;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use docbase_common::{
    Bucket, Cas, DocError, DocResult, N1qlQuery, Query, QueryRow, Stale, StoreOptions,
    StoredValue, ViewQuery,
};

use crate::statement::Statement;
use crate::views::{MapFn, ViewIndex};

/// Default shard count; a power of two for fast masking.
const DEFAULT_SHARD_COUNT: usize = 16;

#[derive(Debug)]
struct SoftLock {
    cas: u64,
    until: Instant,
}

/// A single stored document.
#[derive(Debug)]
struct Entry {
    // Encoded JSON document.
    value: Bytes,
    cas: u64,
    // Absolute expiration timestamp.
    expires_at: Option<Instant>,
    lock: Option<SoftLock>,
}

impl Entry {
    fn new(value: Bytes, cas: u64, expires_at: Option<Instant>) -> Self {
        Entry {
            value,
            cas,
            expires_at,
            lock: None,
        }
    }

    /// Returns true when the entry has expired at `now`.
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Lock CAS, if a lock is still inside its window at `now`.
    fn lock_cas(&self, now: Instant) -> Option<u64> {
        self.lock
            .as_ref()
            .filter(|lock| now < lock.until)
            .map(|lock| lock.cas)
    }

    fn decode(&self) -> DocResult<Value> {
        Ok(serde_json::from_slice(&self.value)?)
    }

    fn stored(&self) -> DocResult<StoredValue> {
        Ok(StoredValue::new(Cas::from_raw(self.cas), self.decode()?))
    }
}

/// Per-shard lock wrapper.
#[derive(Debug)]
struct Shard {
    inner: RwLock<HashMap<String, Entry, RandomState>>,
}

/// Shared state of one bucket, owned by the cluster.
pub struct BucketStore {
    name: String,
    password: Option<String>,
    replicas: u32,
    shards: Vec<Shard>,
    shard_mask: usize,
    hash_state: RandomState,
    next_cas: AtomicU64,
    views: RwLock<StdHashMap<(String, String), ViewIndex>>,
}

impl BucketStore {
    pub(crate) fn new(name: &str, password: Option<&str>, replicas: u32) -> Self {
        let shard_count = normalize_shard_count(DEFAULT_SHARD_COUNT);
        let hash_state = RandomState::new();
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(Shard {
                inner: RwLock::new(HashMap::with_hasher(hash_state.clone())),
            });
        }

        BucketStore {
            name: name.to_string(),
            password: password.map(str::to_string),
            replicas,
            shards,
            shard_mask: shard_count - 1,
            hash_state,
            next_cas: AtomicU64::new(0),
            views: RwLock::new(StdHashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn password_matches(&self, password: Option<&str>) -> bool {
        match &self.password {
            Some(expected) => password == Some(expected.as_str()),
            None => true,
        }
    }

    pub(crate) fn define_view(&self, design: &str, view: &str, map: MapFn) {
        self.views
            .write()
            .insert((design.to_string(), view.to_string()), ViewIndex::new(map));
    }

    /// Number of times a view index has been rebuilt.
    pub fn view_builds(&self, design: &str, view: &str) -> Option<u64> {
        self.views
            .read()
            .get(&(design.to_string(), view.to_string()))
            .map(ViewIndex::builds)
    }

    /// Number of live (unexpired) documents.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .inner
                    .read()
                    .values()
                    .filter(|entry| !entry.is_expired(now))
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes expired entries across all shards.
    ///
    /// This is an O(n) scan; expiry is otherwise enforced lazily on access.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut inner = shard.inner.write();
            let before = inner.len();
            inner.retain(|_, entry| !entry.is_expired(now));
            removed += before - inner.len();
        }
        removed
    }

    /// Hashes a key to its owning shard index.
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key.as_bytes());
        (hasher.finish() as usize) & self.shard_mask
    }

    fn shard_for(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    fn next_cas(&self) -> u64 {
        self.next_cas.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn check_durability(&self, options: &StoreOptions) -> DocResult<()> {
        if options.persist_to > self.replicas + 1 || options.replicate_to > self.replicas {
            return Err(DocError::InvalidArgument(format!(
                "durability requirement (persist_to={}, replicate_to={}) exceeds {} replica(s)",
                options.persist_to, options.replicate_to, self.replicas
            )));
        }
        Ok(())
    }

    fn get(&self, key: &str, now: Instant) -> DocResult<StoredValue> {
        let inner = self.shard_for(key).inner.read();
        match inner.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                if entry.lock_cas(now).is_some() {
                    return Err(DocError::LockedDocument(key.to_string()));
                }
                entry.stored()
            }
            _ => Err(DocError::KeyNotFound(key.to_string())),
        }
    }

    fn get_and_lock(&self, key: &str, lock_time: Duration, now: Instant) -> DocResult<StoredValue> {
        let until = now.checked_add(lock_time).ok_or_else(|| {
            DocError::InvalidArgument(format!("lock time {:?} is out of range", lock_time))
        })?;
        let mut inner = self.shard_for(key).inner.write();
        let entry = live_entry(&mut inner, key, now)?;
        if entry.lock_cas(now).is_some() {
            return Err(DocError::LockedDocument(key.to_string()));
        }

        let cas = self.next_cas();
        entry.cas = cas;
        entry.lock = Some(SoftLock { cas, until });
        debug!(bucket = %self.name, key, ?lock_time, "document locked");
        entry.stored()
    }

    fn insert(&self, key: &str, value: &Value, options: &StoreOptions, now: Instant) -> DocResult<Cas> {
        self.check_durability(options)?;
        let expires_at = deadline(now, options.expiry)?;
        let encoded = encode(value)?;
        let mut inner = self.shard_for(key).inner.write();
        if let Some(entry) = inner.get(key) {
            if !entry.is_expired(now) {
                return Err(DocError::KeyAlreadyExists(key.to_string()));
            }
        }

        let cas = self.next_cas();
        inner.insert(
            key.to_string(),
            Entry::new(encoded, cas, expires_at),
        );
        Ok(Cas::from_raw(cas))
    }

    fn upsert(&self, key: &str, value: &Value, options: &StoreOptions, now: Instant) -> DocResult<Cas> {
        self.check_durability(options)?;
        let expires_at = deadline(now, options.expiry)?;
        let encoded = encode(value)?;
        let mut inner = self.shard_for(key).inner.write();

        let exists = inner.get(key).map(|entry| !entry.is_expired(now)).unwrap_or(false);
        if exists {
            let entry = live_entry(&mut inner, key, now)?;
            check_write(entry, key, options.cas, now)?;
        } else if options.cas.is_some() {
            return Err(DocError::KeyNotFound(key.to_string()));
        }

        let cas = self.next_cas();
        inner.insert(
            key.to_string(),
            Entry::new(encoded, cas, expires_at),
        );
        Ok(Cas::from_raw(cas))
    }

    fn replace(&self, key: &str, value: &Value, options: &StoreOptions, now: Instant) -> DocResult<Cas> {
        self.check_durability(options)?;
        let expires_at = deadline(now, options.expiry)?;
        let encoded = encode(value)?;
        let mut inner = self.shard_for(key).inner.write();
        let entry = live_entry(&mut inner, key, now)?;
        check_write(entry, key, options.cas, now)?;

        let cas = self.next_cas();
        *entry = Entry::new(encoded, cas, expires_at);
        Ok(Cas::from_raw(cas))
    }

    fn remove(&self, key: &str, options: &StoreOptions, now: Instant) -> DocResult<Cas> {
        self.check_durability(options)?;
        let mut inner = self.shard_for(key).inner.write();
        let entry = live_entry(&mut inner, key, now)?;
        check_write(entry, key, options.cas, now)?;

        inner.remove(key);
        Ok(Cas::from_raw(self.next_cas()))
    }

    fn counter(
        &self,
        key: &str,
        delta: i64,
        initial: Option<i64>,
        expiry: Duration,
        now: Instant,
    ) -> DocResult<StoredValue> {
        let expires_at = deadline(now, expiry)?;
        let mut inner = self.shard_for(key).inner.write();
        let exists = inner.get(key).map(|entry| !entry.is_expired(now)).unwrap_or(false);

        if !exists {
            let start = initial.ok_or_else(|| DocError::KeyNotFound(key.to_string()))?;
            let value = Value::from(start);
            let cas = self.next_cas();
            inner.insert(
                key.to_string(),
                Entry::new(encode(&value)?, cas, expires_at),
            );
            return Ok(StoredValue::new(Cas::from_raw(cas), value));
        }

        let entry = live_entry(&mut inner, key, now)?;
        check_write(entry, key, None, now)?;
        let current = entry.decode()?.as_i64().ok_or_else(|| {
            DocError::InvalidArgument(format!("counter '{}' does not hold an integer", key))
        })?;

        let value = Value::from(current.saturating_add(delta));
        let cas = self.next_cas();
        entry.value = encode(&value)?;
        entry.cas = cas;
        Ok(StoredValue::new(Cas::from_raw(cas), value))
    }

    fn unlock(&self, key: &str, cas: Cas, now: Instant) -> DocResult<()> {
        let mut inner = self.shard_for(key).inner.write();
        let entry = live_entry(&mut inner, key, now)?;
        match entry.lock_cas(now) {
            Some(lock_cas) if Cas::from_raw(lock_cas) == cas => {
                entry.lock = None;
                debug!(bucket = %self.name, key, "document unlocked");
                Ok(())
            }
            Some(_) => Err(DocError::CasMismatch(key.to_string())),
            // Not locked: only a current CAS is accepted, as a version check.
            None if Cas::from_raw(entry.cas) == cas => {
                entry.lock = None;
                Ok(())
            }
            None => Err(DocError::CasMismatch(key.to_string())),
        }
    }

    fn touch(&self, key: &str, expiry: Duration, now: Instant) -> DocResult<Cas> {
        let expires_at = deadline(now, expiry)?;
        let mut inner = self.shard_for(key).inner.write();
        let entry = live_entry(&mut inner, key, now)?;
        check_write(entry, key, None, now)?;

        let cas = self.next_cas();
        entry.cas = cas;
        entry.expires_at = expires_at;
        Ok(Cas::from_raw(cas))
    }

    fn append(&self, key: &str, fragment: &str, options: &StoreOptions, now: Instant) -> DocResult<Cas> {
        self.check_durability(options)?;
        let mut inner = self.shard_for(key).inner.write();
        let entry = live_entry(&mut inner, key, now)?;
        check_write(entry, key, options.cas, now)?;

        let mut text = match entry.decode()? {
            Value::String(text) => text,
            _ => {
                return Err(DocError::InvalidArgument(format!(
                    "append requires a string document: {}",
                    key
                )))
            }
        };
        text.push_str(fragment);

        let cas = self.next_cas();
        entry.value = encode(&Value::String(text))?;
        entry.cas = cas;
        entry.lock = None;
        Ok(Cas::from_raw(cas))
    }

    /// Decoded snapshot of every live document, used to rebuild views.
    fn documents(&self, now: Instant) -> Vec<(String, Value)> {
        let mut documents = Vec::new();
        for shard in &self.shards {
            let inner = shard.inner.read();
            for (key, entry) in inner.iter() {
                if entry.is_expired(now) {
                    continue;
                }
                if let Ok(value) = entry.decode() {
                    documents.push((key.clone(), value));
                }
            }
        }
        documents
    }

    fn query_view(&self, query: &ViewQuery, now: Instant) -> DocResult<Vec<QueryRow>> {
        let mut views = self.views.write();
        let index = views
            .get_mut(&(query.design.clone(), query.view.clone()))
            .ok_or_else(|| {
                DocError::InvalidArgument(format!(
                    "view not found: {}/{}",
                    query.design, query.view
                ))
            })?;

        if query.stale == Stale::Before {
            index.rebuild(&self.documents(now));
        }
        let rows = index.select(query);
        if query.stale == Stale::After {
            index.rebuild(&self.documents(now));
        }
        Ok(rows)
    }

    fn query_statement(&self, query: &N1qlQuery, now: Instant) -> DocResult<Vec<QueryRow>> {
        let statement = Statement::parse(&query.statement)?;
        if statement.bucket != self.name {
            return Err(DocError::InvalidArgument(format!(
                "statement targets bucket '{}' but was sent to '{}'",
                statement.bucket, self.name
            )));
        }

        let mut documents = self.documents(now);
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        let rows = documents
            .into_iter()
            .filter(|(_, doc)| statement.matches(doc))
            .map(|(id, doc)| QueryRow {
                id: Some(id),
                key: Value::Null,
                value: doc,
            });

        Ok(match statement.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        })
    }
}

/// Returns the live entry for `key`, dropping it first if it expired.
fn live_entry<'a>(
    inner: &'a mut HashMap<String, Entry, RandomState>,
    key: &str,
    now: Instant,
) -> DocResult<&'a mut Entry> {
    let expired = match inner.get(key) {
        Some(entry) => entry.is_expired(now),
        None => return Err(DocError::KeyNotFound(key.to_string())),
    };
    if expired {
        inner.remove(key);
        return Err(DocError::KeyNotFound(key.to_string()));
    }
    inner
        .get_mut(key)
        .ok_or_else(|| DocError::KeyNotFound(key.to_string()))
}

/// Validates a mutation against the entry's CAS and lock.
///
/// A locked entry accepts only its lock CAS; a CAS-less write is rejected as
/// locked, any other CAS as a mismatch.
fn check_write(entry: &Entry, key: &str, cas: Option<Cas>, now: Instant) -> DocResult<()> {
    match (entry.lock_cas(now), cas) {
        (Some(lock_cas), Some(cas)) if Cas::from_raw(lock_cas) == cas => Ok(()),
        (Some(_), Some(_)) => Err(DocError::CasMismatch(key.to_string())),
        (Some(_), None) => Err(DocError::LockedDocument(key.to_string())),
        (None, Some(cas)) if Cas::from_raw(entry.cas) != cas => {
            Err(DocError::CasMismatch(key.to_string()))
        }
        (None, _) => Ok(()),
    }
}

fn encode(value: &Value) -> DocResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Expiry instant of a write at `now`; zero means no expiry.
fn deadline(now: Instant, expiry: Duration) -> DocResult<Option<Instant>> {
    if expiry.is_zero() {
        return Ok(None);
    }
    now.checked_add(expiry)
        .map(Some)
        .ok_or_else(|| DocError::InvalidArgument(format!("expiry {:?} is out of range", expiry)))
}

/// Normalizes shard counts to a power of two for fast masking.
fn normalize_shard_count(count: usize) -> usize {
    let count = count.max(1);
    count.next_power_of_two()
}

/// A handle on a [`BucketStore`], returned by `MemoryCluster::open_bucket`.
pub struct MemoryBucket {
    store: Arc<BucketStore>,
    connected: AtomicBool,
    query_endpoint: RwLock<Option<String>>,
}

impl MemoryBucket {
    pub(crate) fn new(store: Arc<BucketStore>) -> Self {
        MemoryBucket {
            store,
            connected: AtomicBool::new(true),
            query_endpoint: RwLock::new(None),
        }
    }

    /// Underlying shared store.
    pub fn store(&self) -> &Arc<BucketStore> {
        &self.store
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Query endpoint registered through `enable_n1ql`.
    pub fn query_endpoint(&self) -> Option<String> {
        self.query_endpoint.read().clone()
    }

    /// Fails with `BucketUnavailable` once the handle was disconnected, then
    /// yields once so every operation suspends like a network round trip.
    async fn round_trip(&self) -> DocResult<Instant> {
        if !self.is_connected() {
            return Err(DocError::BucketUnavailable(self.store.name.clone()));
        }
        tokio::task::yield_now().await;
        Ok(Instant::now())
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.store.name
    }

    fn enable_n1ql(&self, endpoint: &str) {
        *self.query_endpoint.write() = Some(endpoint.to_string());
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    async fn get(&self, key: &str) -> DocResult<StoredValue> {
        let now = self.round_trip().await?;
        self.store.get(key, now)
    }

    async fn get_and_lock(&self, key: &str, lock_time: Duration) -> DocResult<StoredValue> {
        let now = self.round_trip().await?;
        self.store.get_and_lock(key, lock_time, now)
    }

    async fn get_multi(&self, keys: &[String]) -> DocResult<Vec<(String, DocResult<StoredValue>)>> {
        let now = self.round_trip().await?;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), self.store.get(key, now)))
            .collect())
    }

    async fn insert(&self, key: &str, value: &Value, options: &StoreOptions) -> DocResult<Cas> {
        let now = self.round_trip().await?;
        self.store.insert(key, value, options, now)
    }

    async fn upsert(&self, key: &str, value: &Value, options: &StoreOptions) -> DocResult<Cas> {
        let now = self.round_trip().await?;
        self.store.upsert(key, value, options, now)
    }

    async fn replace(&self, key: &str, value: &Value, options: &StoreOptions) -> DocResult<Cas> {
        let now = self.round_trip().await?;
        self.store.replace(key, value, options, now)
    }

    async fn remove(&self, key: &str, options: &StoreOptions) -> DocResult<Cas> {
        let now = self.round_trip().await?;
        self.store.remove(key, options, now)
    }

    async fn counter(
        &self,
        key: &str,
        delta: i64,
        initial: Option<i64>,
        expiry: Duration,
    ) -> DocResult<StoredValue> {
        let now = self.round_trip().await?;
        self.store.counter(key, delta, initial, expiry, now)
    }

    async fn unlock(&self, key: &str, cas: Cas) -> DocResult<()> {
        let now = self.round_trip().await?;
        self.store.unlock(key, cas, now)
    }

    async fn touch(&self, key: &str, expiry: Duration) -> DocResult<Cas> {
        let now = self.round_trip().await?;
        self.store.touch(key, expiry, now)
    }

    async fn append(&self, key: &str, fragment: &str, options: &StoreOptions) -> DocResult<Cas> {
        let now = self.round_trip().await?;
        self.store.append(key, fragment, options, now)
    }

    async fn query(&self, query: &Query) -> DocResult<Vec<QueryRow>> {
        let now = self.round_trip().await?;
        match query {
            Query::View(view) => self.store.query_view(view, now),
            Query::N1ql(statement) => {
                if self.query_endpoint().is_none() {
                    return Err(DocError::ConnectionFailure(format!(
                        "query service is not enabled on bucket '{}'",
                        self.store.name
                    )));
                }
                self.store.query_statement(statement, now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbase_common::ErrorKind;
    use serde_json::json;

    fn bucket() -> MemoryBucket {
        MemoryBucket::new(Arc::new(BucketStore::new("default", None, 0)))
    }

    fn opts() -> StoreOptions {
        StoreOptions::default()
    }

    #[tokio::test]
    async fn insert_get_roundtrip() {
        let bucket = bucket();
        let body = json!({"firstName": "foo", "lastName": "bar"});
        let cas = bucket.insert("user::1", &body, &opts()).await.unwrap();
        assert!(!cas.is_empty());

        let stored = bucket.get("user::1").await.unwrap();
        assert_eq!(stored.value, body);
        assert_eq!(stored.cas, cas);
    }

    #[tokio::test]
    async fn insert_twice_fails() {
        let bucket = bucket();
        bucket.insert("k", &json!(1), &opts()).await.unwrap();
        let err = bucket.insert("k", &json!(2), &opts()).await.unwrap_err();
        assert!(matches!(err, DocError::KeyAlreadyExists(_)));
        assert_eq!(bucket.get("k").await.unwrap().value, json!(1));
    }

    #[tokio::test]
    async fn replace_checks_cas() {
        let bucket = bucket();
        let first = bucket.insert("k", &json!(1), &opts()).await.unwrap();
        bucket.upsert("k", &json!(2), &opts()).await.unwrap();

        let stale = StoreOptions {
            cas: Some(first),
            ..StoreOptions::default()
        };
        let err = bucket.replace("k", &json!(3), &stale).await.unwrap_err();
        assert!(err.is_cas_mismatch());
        assert_eq!(bucket.get("k").await.unwrap().value, json!(2));

        let missing = bucket.replace("nope", &json!(3), &opts()).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_blocks_reads_until_expiry() {
        let bucket = bucket();
        bucket.insert("k", &json!({"a": 1}), &opts()).await.unwrap();
        let locked = bucket
            .get_and_lock("k", Duration::from_secs(15))
            .await
            .unwrap();

        assert!(bucket.get("k").await.unwrap_err().is_locked());
        assert!(bucket
            .get_and_lock("k", Duration::from_secs(1))
            .await
            .unwrap_err()
            .is_locked());
        assert!(bucket.upsert("k", &json!(0), &opts()).await.unwrap_err().is_locked());

        tokio::time::advance(Duration::from_secs(16)).await;
        let after = bucket.get("k").await.unwrap();
        assert_eq!(after.cas, locked.cas);
    }

    #[tokio::test]
    async fn lock_cas_releases_on_write() {
        let bucket = bucket();
        bucket.insert("k", &json!(1), &opts()).await.unwrap();
        let locked = bucket.get_and_lock("k", Duration::from_secs(15)).await.unwrap();

        let wrong = StoreOptions {
            cas: Some(Cas::from_raw(9_999)),
            ..StoreOptions::default()
        };
        assert!(bucket.replace("k", &json!(2), &wrong).await.unwrap_err().is_cas_mismatch());

        let right = StoreOptions {
            cas: Some(locked.cas),
            ..StoreOptions::default()
        };
        bucket.replace("k", &json!(2), &right).await.unwrap();
        assert_eq!(bucket.get("k").await.unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn unlock_requires_lock_cas() {
        let bucket = bucket();
        bucket.insert("k", &json!(1), &opts()).await.unwrap();
        let locked = bucket.get_and_lock("k", Duration::from_secs(15)).await.unwrap();

        assert!(bucket.unlock("k", Cas::from_raw(1)).await.unwrap_err().is_cas_mismatch());
        bucket.unlock("k", locked.cas).await.unwrap();
        assert!(bucket.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn counter_initial_and_delta() {
        let bucket = bucket();
        let missing = bucket.counter("c", 1, None, Duration::ZERO).await.unwrap_err();
        assert!(missing.is_not_found());

        let first = bucket.counter("c", 5, Some(10), Duration::ZERO).await.unwrap();
        assert_eq!(first.value, json!(10));
        let second = bucket.counter("c", -3, Some(10), Duration::ZERO).await.unwrap();
        assert_eq!(second.value, json!(7));
    }

    #[tokio::test]
    async fn append_extends_strings() {
        let bucket = bucket();
        bucket.insert("s", &json!("foo"), &opts()).await.unwrap();
        bucket.append("s", " bar", &opts()).await.unwrap();
        assert_eq!(bucket.get("s").await.unwrap().value, json!("foo bar"));

        bucket.insert("o", &json!({}), &opts()).await.unwrap();
        assert!(bucket.append("o", "x", &opts()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_and_touch() {
        let bucket = bucket();
        let expiring = StoreOptions {
            expiry: Duration::from_secs(5),
            ..StoreOptions::default()
        };
        bucket.insert("a", &json!(1), &expiring).await.unwrap();
        bucket.insert("b", &json!(1), &expiring).await.unwrap();
        bucket.touch("b", Duration::ZERO).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(bucket.get("a").await.unwrap_err().is_not_found());
        assert!(bucket.get("b").await.is_ok());
        // Reads hide expired entries but leave them for the purge.
        assert_eq!(bucket.store().purge_expired(Instant::now()), 1);
        assert_eq!(bucket.store().len(), 1);
    }

    #[tokio::test]
    async fn get_multi_tags_entries_with_keys() {
        let bucket = bucket();
        bucket.insert("k1", &json!(1), &opts()).await.unwrap();
        bucket.insert("k3", &json!(3), &opts()).await.unwrap();

        let keys = vec!["k1".to_string(), "k2".to_string(), "k3".to_string()];
        let results = bucket.get_multi(&keys).await.unwrap();
        let tags: Vec<_> = results.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(tags, vec!["k1", "k2", "k3"]);
        assert_eq!(results[0].1.as_ref().unwrap().value, json!(1));
        assert!(results[1].1.as_ref().unwrap_err().is_not_found());
        assert_eq!(results[2].1.as_ref().unwrap().value, json!(3));
    }

    #[tokio::test]
    async fn out_of_range_durations_are_rejected() {
        let bucket = bucket();
        bucket.insert("k", &json!(1), &opts()).await.unwrap();

        let err = bucket.get_and_lock("k", Duration::MAX).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(bucket.get("k").await.is_ok(), "rejected lock must not hold");

        let forever = StoreOptions {
            expiry: Duration::MAX,
            ..opts()
        };
        let err = bucket.insert("other", &json!(2), &forever).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(bucket.get("other").await.unwrap_err().is_not_found());

        assert!(bucket.upsert("k", &json!(3), &forever).await.is_err());
        assert!(bucket.touch("k", Duration::MAX).await.is_err());
        assert!(bucket.counter("c", 1, Some(0), Duration::MAX).await.is_err());
        assert_eq!(bucket.get("k").await.unwrap().value, json!(1));
    }

    #[tokio::test]
    async fn stale_views_need_forcing() {
        let bucket = bucket();
        bucket.store().define_view(
            "users",
            "by_name",
            Arc::new(|_id: &str, doc: &Value| match doc.get("name") {
                Some(name) => vec![(name.clone(), Value::Null)],
                None => Vec::new(),
            }),
        );
        bucket.insert("u1", &json!({"name": "ann"}), &opts()).await.unwrap();

        let stale = Query::View(ViewQuery::new("users", "by_name").stale(Stale::Ok));
        assert!(bucket.query(&stale).await.unwrap().is_empty());

        let forced = Query::View(ViewQuery::new("users", "by_name").stale(Stale::Before));
        assert_eq!(bucket.query(&forced).await.unwrap().len(), 1);
        assert_eq!(bucket.query(&stale).await.unwrap().len(), 1);
        assert_eq!(bucket.store().view_builds("users", "by_name"), Some(1));
    }

    #[tokio::test]
    async fn statements_need_query_endpoint() {
        let bucket = bucket();
        bucket.insert("u1", &json!({"_type": "user"}), &opts()).await.unwrap();
        bucket.insert("p1", &json!({"_type": "post"}), &opts()).await.unwrap();

        let query: Query = "SELECT * FROM `default` WHERE _type = 'user'".into();
        assert!(bucket.query(&query).await.is_err());

        bucket.enable_n1ql("http://localhost:8093");
        let rows = bucket.query(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn durability_beyond_replicas_is_rejected() {
        let bucket = bucket();
        let strict = StoreOptions {
            replicate_to: 1,
            ..StoreOptions::default()
        };
        let err = bucket.insert("k", &json!(1), &strict).await.unwrap_err();
        assert!(matches!(err, DocError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn disconnected_handle_is_unavailable() {
        let bucket = bucket();
        bucket.disconnect();
        let err = bucket.get("k").await.unwrap_err();
        assert!(matches!(err, DocError::BucketUnavailable(_)));
    }
}
