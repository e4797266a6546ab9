//! # Key-Value Gateway
//!
//! Purpose: Expose every bucket primitive behind one uniform async API that
//! resolves the bucket, runs the primitive and reshapes the outcome into the
//! single-result ([`OpResult`]) or multi-result ([`MultiResult`]) contract.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: callers name buckets; handles, caching and query
//!    endpoints stay inside [`ConnectionManager`].
//! 2. **Option Structs**: each operation takes its own defaulted options
//!    value instead of positional overloads.
//! 3. **Write Follow-ups**: a write may read itself back (`populate`), force
//!    views (`views`), or both. With both, the two branches run concurrently
//!    after the write and are joined before returning.
//! 4. **Committed Writes Stand**: a view-index failure after a write is
//!    attached to the result (`index_error`), never returned instead of it.
//!
//! ## Follow-up Flow
//!
//! ```text
//! write ──┬── populate only ──> get ──────────────────────> OpResult{value}
//!         ├── views only ─────> index_views ──────────────> OpResult{index_error?}
//!         └── both ───────────> spawn(get) + spawn(index) ─> join ─> OpResult
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use docbase_common::{
    Bucket, Cas, DocError, DocResult, MultiResult, OpResult, Query, QueryRow, StoreOptions,
    StoredValue, ViewIndexRequest,
};

use crate::connection::ConnectionManager;
use crate::multi::aggregate;
use crate::views::{index_views, join_failure};

/// Default soft-lock window of `get_and_lock`.
pub const DEFAULT_LOCK_TIME: Duration = Duration::from_secs(15);

/// Options of `get`. Reserved; every field is defaulted.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {}

/// Options of `get_and_lock`.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// How long the lock holds unless released by a write or `unlock`.
    pub lock_time: Duration,
    /// Return the document body along with the lock CAS.
    pub populate: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        LockOptions {
            lock_time: DEFAULT_LOCK_TIME,
            populate: true,
        }
    }
}

/// Options of `insert`, `upsert`, `replace` and `append`.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Expected CAS. Ignored by `insert`.
    pub cas: Option<Cas>,
    /// Document time-to-live; zero disables expiry.
    pub expiry: Duration,
    pub persist_to: u32,
    pub replicate_to: u32,
    /// Read the document back after the write.
    pub populate: bool,
    /// Views to force after the write.
    pub views: Vec<ViewIndexRequest>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            cas: None,
            expiry: Duration::ZERO,
            persist_to: 0,
            replicate_to: 0,
            populate: true,
            views: Vec::new(),
        }
    }
}

impl WriteOptions {
    fn store_options(&self) -> StoreOptions {
        StoreOptions {
            cas: self.cas,
            expiry: self.expiry,
            persist_to: self.persist_to,
            replicate_to: self.replicate_to,
        }
    }
}

/// Options of `remove`.
#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    pub cas: Option<Cas>,
    pub persist_to: u32,
    pub replicate_to: u32,
    /// Views to force after the removal.
    pub views: Vec<ViewIndexRequest>,
}

/// Options of `counter`.
#[derive(Debug, Clone)]
pub struct CounterOptions {
    /// Value a missing counter starts from; `None` makes a missing counter
    /// fail with `KeyNotFound`.
    pub initial: Option<i64>,
    pub expiry: Duration,
}

impl Default for CounterOptions {
    fn default() -> Self {
        CounterOptions {
            initial: Some(0),
            expiry: Duration::ZERO,
        }
    }
}

/// Options of `query`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Replace hits with their documents. Unset means `true` for view
    /// queries and `false` for statements.
    pub populate: Option<bool>,
}

/// Outcome of a query.
#[derive(Debug, Clone)]
pub enum QueryHits {
    /// Raw rows as returned by the index or query service.
    Rows(Vec<QueryRow>),
    /// Documents read back for the row ids, one entry per row.
    Documents(MultiResult),
}

impl QueryHits {
    pub fn len(&self) -> usize {
        match self {
            QueryHits::Rows(rows) => rows.len(),
            QueryHits::Documents(documents) => documents.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Insert,
    Upsert,
    Replace,
}

enum Branch {
    Index(DocResult<()>),
    Populate(DocResult<StoredValue>),
}

/// Uniform async access to bucket primitives.
///
/// Cheap to clone; clones share one [`ConnectionManager`].
#[derive(Clone)]
pub struct KVGateway {
    connections: Arc<ConnectionManager>,
}

impl KVGateway {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        KVGateway { connections }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    async fn bucket(&self, name: &str) -> DocResult<Arc<dyn Bucket>> {
        self.connections.bucket(name, None).await
    }

    /// Reads `key`.
    pub async fn get(&self, bucket: &str, key: &str, _options: &GetOptions) -> DocResult<OpResult> {
        let handle = self.bucket(bucket).await?;
        let stored = handle.get(key).await?;
        Ok(OpResult::new(key, stored.cas, Some(stored.value)))
    }

    /// Reads `key` and soft-locks it. The returned CAS is the only one that
    /// can write to or unlock the document until the lock lapses.
    pub async fn get_and_lock(
        &self,
        bucket: &str,
        key: &str,
        options: &LockOptions,
    ) -> DocResult<OpResult> {
        let handle = self.bucket(bucket).await?;
        let stored = handle
            .get_and_lock(key, options.lock_time)
            .await
            .map_err(|err| log_conflict(bucket, key, err))?;
        let value = if options.populate {
            Some(stored.value)
        } else {
            None
        };
        Ok(OpResult::new(key, stored.cas, value))
    }

    /// Reads every key of `keys`.
    ///
    /// An empty list answers with an empty result without touching the
    /// bucket. When some keys fail, the positional result travels inside
    /// [`DocError::PartialMultiKeyFailure`].
    pub async fn get_multi(&self, bucket: &str, keys: &[String]) -> DocResult<MultiResult> {
        if keys.is_empty() {
            return Ok(MultiResult::default());
        }
        let handle = self.bucket(bucket).await?;
        let responses = handle.get_multi(keys).await?;
        aggregate(keys, responses).into_checked()
    }

    /// Creates `key`; fails with `KeyAlreadyExists` when it exists.
    pub async fn insert(
        &self,
        bucket: &str,
        key: &str,
        value: &serde_json::Value,
        options: &WriteOptions,
    ) -> DocResult<OpResult> {
        self.write(WriteKind::Insert, bucket, key, value, options).await
    }

    /// Creates or overwrites `key`.
    pub async fn upsert(
        &self,
        bucket: &str,
        key: &str,
        value: &serde_json::Value,
        options: &WriteOptions,
    ) -> DocResult<OpResult> {
        self.write(WriteKind::Upsert, bucket, key, value, options).await
    }

    /// Overwrites an existing `key`.
    pub async fn replace(
        &self,
        bucket: &str,
        key: &str,
        value: &serde_json::Value,
        options: &WriteOptions,
    ) -> DocResult<OpResult> {
        self.write(WriteKind::Replace, bucket, key, value, options).await
    }

    pub async fn remove(&self, bucket: &str, key: &str, options: &RemoveOptions) -> DocResult<OpResult> {
        let handle = self.bucket(bucket).await?;
        let store_options = StoreOptions {
            cas: options.cas,
            persist_to: options.persist_to,
            replicate_to: options.replicate_to,
            ..StoreOptions::default()
        };
        let cas = handle
            .remove(key, &store_options)
            .await
            .map_err(|err| log_conflict(bucket, key, err))?;
        self.follow_up(handle, key, cas, false, &options.views).await
    }

    /// Adds `delta` to the counter document `key`.
    pub async fn counter(
        &self,
        bucket: &str,
        key: &str,
        delta: i64,
        options: &CounterOptions,
    ) -> DocResult<OpResult> {
        let handle = self.bucket(bucket).await?;
        let stored = handle
            .counter(key, delta, options.initial, options.expiry)
            .await?;
        Ok(OpResult::new(key, stored.cas, Some(stored.value)))
    }

    /// Releases the soft lock on `key`.
    pub async fn unlock(&self, bucket: &str, key: &str, cas: Cas) -> DocResult<()> {
        let handle = self.bucket(bucket).await?;
        handle
            .unlock(key, cas)
            .await
            .map_err(|err| log_conflict(bucket, key, err))
    }

    /// Resets the expiry of `key`; zero disables it.
    pub async fn touch(&self, bucket: &str, key: &str, expiry: Duration) -> DocResult<OpResult> {
        let handle = self.bucket(bucket).await?;
        let cas = handle.touch(key, expiry).await?;
        Ok(OpResult::new(key, cas, None))
    }

    /// Appends `fragment` to the string document `key`.
    pub async fn append(
        &self,
        bucket: &str,
        key: &str,
        fragment: &str,
        options: &WriteOptions,
    ) -> DocResult<OpResult> {
        let handle = self.bucket(bucket).await?;
        let cas = handle
            .append(key, fragment, &options.store_options())
            .await
            .map_err(|err| log_conflict(bucket, key, err))?;
        self.follow_up(handle, key, cas, options.populate, &options.views)
            .await
    }

    /// Runs a view query or statement. Strings are promoted to statements.
    ///
    /// With populate and at least one hit carrying a document id, the hits
    /// are replaced by their documents, read in one multi-key request.
    pub async fn query(
        &self,
        bucket: &str,
        query: impl Into<Query>,
        options: &QueryOptions,
    ) -> DocResult<QueryHits> {
        let query = query.into();
        if let Query::N1ql(statement) = &query {
            if statement.statement.trim().is_empty() {
                return Err(DocError::InvalidArgument(
                    "query statement must not be empty".to_string(),
                ));
            }
        }
        let populate = options
            .populate
            .unwrap_or_else(|| query.populates_by_default());

        let handle = self.bucket(bucket).await?;
        let rows = handle.query(&query).await?;
        debug!(bucket = %bucket, rows = rows.len(), populate, "query answered");

        let ids: Vec<String> = rows.iter().filter_map(|row| row.id.clone()).collect();
        if !populate || ids.is_empty() {
            return Ok(QueryHits::Rows(rows));
        }
        let responses = handle.get_multi(&ids).await?;
        Ok(QueryHits::Documents(aggregate(&ids, responses).into_checked()?))
    }

    /// Forces every view of `views` on `bucket`; see [`crate::views`].
    pub async fn index_views(&self, bucket: &str, views: &[ViewIndexRequest]) -> DocResult<()> {
        if views.is_empty() {
            return Ok(());
        }
        let handle = self.bucket(bucket).await?;
        index_views(handle, views).await
    }

    async fn write(
        &self,
        kind: WriteKind,
        bucket: &str,
        key: &str,
        value: &serde_json::Value,
        options: &WriteOptions,
    ) -> DocResult<OpResult> {
        let handle = self.bucket(bucket).await?;
        let mut store_options = options.store_options();
        let cas = match kind {
            WriteKind::Insert => {
                store_options.cas = None;
                handle.insert(key, value, &store_options).await
            }
            WriteKind::Upsert => handle.upsert(key, value, &store_options).await,
            WriteKind::Replace => handle.replace(key, value, &store_options).await,
        }
        .map_err(|err| log_conflict(bucket, key, err))?;

        debug!(bucket = %bucket, key = %key, ?kind, "document written");
        self.follow_up(handle, key, cas, options.populate, &options.views)
            .await
    }

    /// Runs the populate and view-index follow-ups of a committed write.
    async fn follow_up(
        &self,
        handle: Arc<dyn Bucket>,
        key: &str,
        cas: Cas,
        populate: bool,
        views: &[ViewIndexRequest],
    ) -> DocResult<OpResult> {
        let mut result = OpResult::new(key, cas, None);

        if views.is_empty() {
            if populate {
                let stored = handle.get(key).await?;
                result.cas = stored.cas;
                result.value = Some(stored.value);
            }
            return Ok(result);
        }

        if !populate {
            if let Err(err) = index_views(handle, views).await {
                warn!(key = %key, error = %err, "view indexing failed after write");
                result.index_error = Some(err);
            }
            return Ok(result);
        }

        let mut tasks = JoinSet::new();
        {
            let handle = Arc::clone(&handle);
            let views = views.to_vec();
            tasks.spawn(async move { Branch::Index(index_views(handle, &views).await) });
        }
        {
            let key = key.to_string();
            tasks.spawn(async move { Branch::Populate(handle.get(&key).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            let branch = match joined {
                Ok(branch) => branch,
                Err(err) => {
                    tasks.detach_all();
                    return Err(join_failure(err));
                }
            };
            match branch {
                Branch::Populate(Ok(stored)) => {
                    result.cas = stored.cas;
                    result.value = Some(stored.value);
                }
                Branch::Populate(Err(err)) => {
                    tasks.detach_all();
                    return Err(err);
                }
                Branch::Index(Ok(())) => {}
                Branch::Index(Err(err)) => {
                    warn!(key = %key, error = %err, "view indexing failed after write");
                    result.index_error = Some(err);
                }
            }
        }
        Ok(result)
    }
}

fn log_conflict(bucket: &str, key: &str, err: DocError) -> DocError {
    if err.is_cas_mismatch() || err.is_locked() {
        warn!(bucket = %bucket, key = %key, error = %err, "write conflict");
    }
    err
}
