//! # Connection Manager
//!
//! Purpose: Own the single cluster connection of a client instance and the
//! bucket handles opened through it.
//!
//! ## Design Principles
//! 1. **Lazy Dial**: The cluster is dialed on first use and reused after.
//! 2. **Minimal Locking**: The bucket cache mutex is held only to look up or
//!    insert a handle, never across an open.
//! 3. **No Retries**: Connect and open failures surface unchanged.
//! 4. **Last Insert Wins**: Two tasks opening the same bucket for the first
//!    time may both dial; handles are interchangeable, so the later insert
//!    simply replaces the earlier one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use docbase_common::{Bucket, Cluster, ClusterSettings, Connector, DocError, DocResult};

/// Per-instance cluster connection and bucket cache.
pub struct ConnectionManager {
    settings: ClusterSettings,
    connector: Arc<dyn Connector>,
    cluster: OnceCell<Arc<dyn Cluster>>,
    buckets: Mutex<HashMap<String, Arc<dyn Bucket>>>,
}

impl ConnectionManager {
    /// Creates a manager; nothing is dialed until the first request.
    pub fn new(settings: ClusterSettings, connector: Arc<dyn Connector>) -> Self {
        ConnectionManager {
            settings,
            connector,
            cluster: OnceCell::new(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    /// Returns the cluster handle, dialing it on first access.
    pub async fn connection(&self) -> DocResult<Arc<dyn Cluster>> {
        let cluster = self
            .cluster
            .get_or_try_init(|| async {
                let cluster = self.connector.connect(&self.settings).await?;
                info!(address = %self.settings.connection_string(), "cluster connection established");
                Ok::<_, DocError>(cluster)
            })
            .await?;
        Ok(Arc::clone(cluster))
    }

    /// Returns the cached handle of bucket `name`, opening it when needed.
    ///
    /// A missing `password` falls back to the settings password. When a
    /// query port is configured, the query endpoint is registered on newly
    /// opened handles.
    pub async fn bucket(&self, name: &str, password: Option<&str>) -> DocResult<Arc<dyn Bucket>> {
        let cached = self.buckets.lock().get(name).cloned();
        if let Some(bucket) = cached {
            debug!(bucket = %name, "bucket cache hit");
            return Ok(bucket);
        }

        let cluster = self.connection().await?;
        let password = password.or(self.settings.password.as_deref());
        let bucket = cluster.open_bucket(name, password).await?;
        if let Some(endpoint) = self.settings.query_endpoint() {
            bucket.enable_n1ql(&endpoint);
        }

        self.buckets
            .lock()
            .insert(name.to_string(), Arc::clone(&bucket));
        info!(bucket = %name, "bucket opened");
        Ok(bucket)
    }

    /// Names of the buckets currently cached, sorted.
    pub fn cached_buckets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Disconnects and discards every cached bucket handle.
    ///
    /// The cluster connection itself is kept; buckets are reopened on demand.
    pub fn release(&self) {
        let buckets: Vec<(String, Arc<dyn Bucket>)> = self.buckets.lock().drain().collect();
        for (name, bucket) in &buckets {
            bucket.disconnect();
            debug!(bucket = %name, "bucket disconnected");
        }
        info!(count = buckets.len(), "released bucket handles");
    }
}
