//! # In-Memory Cluster
//!
//! Purpose: Stand in for a remote cluster. Buckets and their views are
//! provisioned up front, then reached through the same `Connector` ->
//! `Cluster` -> `Bucket` path a network client would take.
//!
//! ## Design Principles
//! 1. **Shared Handle**: `MemoryCluster` is cheap to clone; the connector,
//!    the tests and the opened buckets all see the same stores.
//! 2. **Observable Dials**: connect and open attempts are counted, so callers
//!    can check how often a cluster was actually reached.
//! 3. **Fault Switch**: `set_reachable(false)` makes every dial fail with
//!    `ConnectionFailure`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use docbase_common::{Bucket, Cluster, ClusterSettings, Connector, DocError, DocResult};

use crate::memory::{BucketStore, MemoryBucket};
use crate::views::MapFn;

struct ClusterInner {
    buckets: RwLock<HashMap<String, Arc<BucketStore>>>,
    replicas: u32,
    reachable: AtomicBool,
    connects: AtomicUsize,
    opens: AtomicUsize,
}

/// A process-local cluster holding named buckets.
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        MemoryCluster::new()
    }
}

impl MemoryCluster {
    /// Creates an empty cluster without replicas.
    pub fn new() -> Self {
        MemoryCluster::with_replicas(0)
    }

    /// Creates an empty cluster whose buckets keep `replicas` replicas, which
    /// bounds the durability requirements writes may ask for.
    pub fn with_replicas(replicas: u32) -> Self {
        MemoryCluster {
            inner: Arc::new(ClusterInner {
                buckets: RwLock::new(HashMap::new()),
                replicas,
                reachable: AtomicBool::new(true),
                connects: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
            }),
        }
    }

    /// Provisions bucket `name`. Re-creating an existing bucket keeps it.
    pub fn create_bucket(&self, name: &str, password: Option<&str>) -> Arc<BucketStore> {
        let mut buckets = self.inner.buckets.write();
        buckets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BucketStore::new(name, password, self.inner.replicas)))
            .clone()
    }

    /// Registers view `design/view` on bucket `bucket`.
    pub fn define_view(&self, bucket: &str, design: &str, view: &str, map: MapFn) -> DocResult<()> {
        let store = self.store(bucket).ok_or_else(|| DocError::BucketOpenFailure {
            bucket: bucket.to_string(),
            reason: "no such bucket".to_string(),
        })?;
        store.define_view(design, view, map);
        Ok(())
    }

    /// Shared store of bucket `name`, if provisioned.
    pub fn store(&self, name: &str) -> Option<Arc<BucketStore>> {
        self.inner.buckets.read().get(name).cloned()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::Release);
    }

    /// Number of successful `connect` calls.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::Acquire)
    }

    /// Number of successful `open_bucket` calls.
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::Acquire)
    }

    fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn open_bucket(&self, name: &str, password: Option<&str>) -> DocResult<Arc<dyn Bucket>> {
        tokio::task::yield_now().await;
        if !self.is_reachable() {
            return Err(DocError::ConnectionFailure(format!(
                "cluster unreachable while opening '{}'",
                name
            )));
        }

        let store = self.store(name).ok_or_else(|| DocError::BucketOpenFailure {
            bucket: name.to_string(),
            reason: "no such bucket".to_string(),
        })?;
        if !store.password_matches(password) {
            return Err(DocError::BucketOpenFailure {
                bucket: name.to_string(),
                reason: "authentication failed".to_string(),
            });
        }

        self.inner.opens.fetch_add(1, Ordering::AcqRel);
        debug!(bucket = %name, "memory bucket opened");
        Ok(Arc::new(MemoryBucket::new(store)))
    }
}

/// Connector dialing a [`MemoryCluster`].
#[derive(Clone)]
pub struct MemoryConnector {
    cluster: MemoryCluster,
}

impl MemoryConnector {
    pub fn new(cluster: MemoryCluster) -> Self {
        MemoryConnector { cluster }
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, settings: &ClusterSettings) -> DocResult<Arc<dyn Cluster>> {
        tokio::task::yield_now().await;
        if settings.host.is_empty() {
            return Err(DocError::ConnectionFailure("empty host".to_string()));
        }
        if !self.cluster.is_reachable() {
            return Err(DocError::ConnectionFailure(format!(
                "cannot reach {}",
                settings.connection_string()
            )));
        }

        self.cluster.inner.connects.fetch_add(1, Ordering::AcqRel);
        info!(address = %settings.connection_string(), "connected to memory cluster");
        Ok(Arc::new(self.cluster.clone()))
    }
}
