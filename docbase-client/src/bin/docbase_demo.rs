//! # DocBase Demo
//!
//! Purpose: Walk one document through its lifecycle against the in-process
//! cluster: insert, locked update, view query and counter.
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use docbase_client::{
    ClusterSettings, CounterOptions, Environment, FetchOptions, ModelDefinition, QueryOptions,
    SaveOptions, Stale, UpdateOptions, ViewIndexRequest, ViewQuery,
};
use docbase_engine::{MemoryCluster, MemoryConnector};

const BUCKET: &str = "default";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cluster = MemoryCluster::new();
    cluster.create_bucket(BUCKET, None);
    cluster.define_view(
        BUCKET,
        "users",
        "by_last_name",
        Arc::new(|_id: &str, doc: &Value| match (doc.get("_type"), doc.get("lastName")) {
            (Some(kind), Some(name)) if kind == "user" => vec![(name.clone(), Value::Null)],
            _ => Vec::new(),
        }),
    )?;

    let env = Environment::new(
        ClusterSettings::default(),
        Arc::new(MemoryConnector::new(cluster.clone())),
    );
    let users = env.define_model(ModelDefinition::new(BUCKET, "user").schema(json!({
        "type": "object",
        "properties": {
            "firstName": {"type": "string"},
            "lastName": {"type": "string"},
            "address": {"type": "object"}
        },
        "required": ["firstName", "lastName"]
    })))?;

    let by_last_name = ViewIndexRequest::new("users", "by_last_name");
    let (mut user, saved) = users
        .insert(
            None,
            json!({"firstName": "foo", "lastName": "bar", "address": {"city": "Lisbon", "zip": "1000"}}),
            &SaveOptions {
                user: "demo".to_string(),
                views: vec![by_last_name.clone()],
                ..SaveOptions::default()
            },
        )
        .await
        .context("insert user")?;
    info!(key = %saved.hit, cas = %saved.cas, "user inserted");

    let locked = users
        .get(
            user.unique_id(),
            &FetchOptions {
                lock: true,
                ..FetchOptions::default()
            },
        )
        .await
        .context("lock user")?;
    let lock_cas = locked.cas().context("locked document without cas")?;

    user.update(
        &json!({"address": {"city": "Porto"}}),
        &UpdateOptions {
            cas: Some(lock_cas),
            user: "demo".to_string(),
            views: vec![by_last_name],
            ..UpdateOptions::default()
        },
    )
    .await
    .context("update user")?;
    let address = user.get("address").cloned().unwrap_or(Value::Null);
    info!(%address, "user updated");

    let found = users
        .query(
            ViewQuery::new("users", "by_last_name")
                .stale(Stale::Ok)
                .key(json!("bar")),
            &QueryOptions::default(),
        )
        .await
        .context("query users")?;
    if found.is_empty() {
        bail!("view query missed the freshly written user");
    }
    info!(hits = found.len(), "view query answered");

    let visits = user
        .counter(1, &CounterOptions::default())
        .await
        .context("count visit")?;
    let count = visits.value.unwrap_or(Value::Null);
    info!(visits = %count, "visit counted");

    env.release();
    Ok(())
}
