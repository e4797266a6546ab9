#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use docbase_client::{ClusterSettings, Environment, KVGateway};
use docbase_engine::{MapFn, MemoryCluster, MemoryConnector};

pub const BUCKET: &str = "default";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Cluster with bucket `default` and the `users/by_last_name` view.
pub fn cluster() -> MemoryCluster {
    init_tracing();
    let cluster = MemoryCluster::new();
    cluster.create_bucket(BUCKET, None);
    cluster
        .define_view(BUCKET, "users", "by_last_name", by_last_name())
        .expect("define view");
    cluster
}

pub fn by_last_name() -> MapFn {
    Arc::new(|_id: &str, doc: &Value| match doc.get("lastName") {
        Some(name) => vec![(name.clone(), Value::Null)],
        None => Vec::new(),
    })
}

pub fn environment(cluster: &MemoryCluster) -> Environment {
    Environment::new(
        ClusterSettings::default(),
        Arc::new(MemoryConnector::new(cluster.clone())),
    )
}

pub fn gateway(cluster: &MemoryCluster) -> KVGateway {
    environment(cluster).gateway().clone()
}
