//! # Backing Store Seams
//!
//! Purpose: Describe the clustered document store as three async traits so the
//! client can drive any implementation (a network SDK or the in-process
//! `docbase-engine`).
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Connector` dials, `Cluster` opens buckets,
//!    `Bucket` executes primitives; the client never sees concrete types.
//! 2. **Raw Shapes**: stores return [`StoredValue`]/[`Cas`]; reshaping into the
//!    canonical result contracts is the gateway's job.
//! 3. **Send + Sync**: handles are shared as `Arc<dyn ..>` across tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ClusterSettings;
use crate::error::DocResult;
use crate::query::Query;
use crate::types::{Cas, QueryRow, StoreOptions, StoredValue};

/// Establishes cluster connections from settings.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dials the cluster described by `settings`.
    async fn connect(&self, settings: &ClusterSettings) -> DocResult<Arc<dyn Cluster>>;
}

/// An established cluster connection.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Opens the bucket `name`, authenticating with `password` when given.
    async fn open_bucket(&self, name: &str, password: Option<&str>) -> DocResult<Arc<dyn Bucket>>;
}

/// An opened bucket: the primitive key-value and query operations.
///
/// A soft-locked key rejects reads and CAS-less writes with
/// `DocError::LockedDocument`; a write carrying the lock CAS releases the lock.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Bucket name.
    fn name(&self) -> &str;

    /// Registers the query service endpoint used for statement queries.
    fn enable_n1ql(&self, endpoint: &str);

    /// Closes the bucket; later calls fail with `BucketUnavailable`.
    fn disconnect(&self);

    async fn get(&self, key: &str) -> DocResult<StoredValue>;

    /// Reads `key` and soft-locks it for `lock_time`.
    async fn get_and_lock(&self, key: &str, lock_time: Duration) -> DocResult<StoredValue>;

    /// Reads every key; the outer error is bucket-level, inner ones per key.
    ///
    /// Each entry is tagged with its key. Entries may come back in any order
    /// and entries of failed keys may be missing.
    async fn get_multi(&self, keys: &[String]) -> DocResult<Vec<(String, DocResult<StoredValue>)>>;

    /// Creates `key`; fails with `KeyAlreadyExists` when present.
    async fn insert(&self, key: &str, value: &Value, options: &StoreOptions) -> DocResult<Cas>;

    /// Creates or overwrites `key`, honouring `options.cas` when set.
    async fn upsert(&self, key: &str, value: &Value, options: &StoreOptions) -> DocResult<Cas>;

    /// Overwrites an existing `key`; fails with `KeyNotFound` when absent.
    async fn replace(&self, key: &str, value: &Value, options: &StoreOptions) -> DocResult<Cas>;

    async fn remove(&self, key: &str, options: &StoreOptions) -> DocResult<Cas>;

    /// Adds `delta` to a numeric document. A missing key is created with
    /// `initial` when given, otherwise the call fails with `KeyNotFound`.
    async fn counter(
        &self,
        key: &str,
        delta: i64,
        initial: Option<i64>,
        expiry: Duration,
    ) -> DocResult<StoredValue>;

    /// Releases a soft lock acquired with `get_and_lock`.
    async fn unlock(&self, key: &str, cas: Cas) -> DocResult<()>;

    /// Resets the expiry of `key`. Zero disables expiry.
    async fn touch(&self, key: &str, expiry: Duration) -> DocResult<Cas>;

    /// Appends `fragment` to a string document.
    async fn append(&self, key: &str, fragment: &str, options: &StoreOptions) -> DocResult<Cas>;

    /// Runs a view or statement query.
    async fn query(&self, query: &Query) -> DocResult<Vec<QueryRow>>;
}
