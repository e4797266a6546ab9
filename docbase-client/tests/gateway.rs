mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use docbase_client::{
    ClusterSettings, ConnectionManager, CounterOptions, DocError, GetOptions, LockOptions,
    QueryHits, QueryOptions, RemoveOptions, Stale, ViewIndexRequest, ViewQuery, WriteOptions,
};
use docbase_engine::{MemoryCluster, MemoryConnector};

use common::{cluster, gateway, BUCKET};

fn no_populate() -> WriteOptions {
    WriteOptions {
        populate: false,
        ..WriteOptions::default()
    }
}

fn manager(cluster: &MemoryCluster, settings: ClusterSettings) -> ConnectionManager {
    ConnectionManager::new(settings, Arc::new(MemoryConnector::new(cluster.clone())))
}

#[tokio::test]
async fn connection_is_dialed_once_and_buckets_are_cached() {
    let cluster = cluster();
    let manager = manager(&cluster, ClusterSettings::default());

    manager.connection().await.expect("connect");
    manager.bucket(BUCKET, None).await.expect("open");
    manager.bucket(BUCKET, None).await.expect("cached");

    assert_eq!(cluster.connect_count(), 1);
    assert_eq!(cluster.open_count(), 1);
    assert_eq!(manager.cached_buckets(), vec![BUCKET.to_string()]);
}

#[tokio::test]
async fn release_disconnects_cached_buckets() {
    let cluster = cluster();
    let manager = manager(&cluster, ClusterSettings::default());
    let bucket = manager.bucket(BUCKET, None).await.expect("open");

    manager.release();
    assert!(manager.cached_buckets().is_empty());
    let err = bucket.get("missing").await.unwrap_err();
    assert!(matches!(err, DocError::BucketUnavailable(_)));

    manager.bucket(BUCKET, None).await.expect("reopen");
    assert_eq!(cluster.open_count(), 2);
    assert_eq!(cluster.connect_count(), 1);
}

#[tokio::test]
async fn open_failures_propagate_unchanged() {
    let cluster = cluster();
    cluster.create_bucket("secure", Some("s3cret"));

    let manager = manager(&cluster, ClusterSettings::default());
    let err = manager.bucket("secure", None).await.err().expect("no password");
    assert!(matches!(err, DocError::BucketOpenFailure { .. }));
    assert!(manager.cached_buckets().is_empty());

    let manager = manager_with_password(&cluster);
    manager.bucket("secure", None).await.expect("settings password");

    cluster.set_reachable(false);
    let offline = manager_with_password(&cluster);
    let err = offline.connection().await.err().expect("unreachable");
    assert!(matches!(err, DocError::ConnectionFailure(_)));
}

fn manager_with_password(cluster: &MemoryCluster) -> ConnectionManager {
    manager(cluster, ClusterSettings::default().with_password("s3cret"))
}

#[tokio::test]
async fn query_endpoint_follows_settings() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    gateway
        .upsert(BUCKET, "user::1", &json!({"_type": "user"}), &no_populate())
        .await
        .expect("upsert");
    let hits = gateway
        .query(BUCKET, "SELECT * FROM `default` WHERE _type = 'user'", &QueryOptions::default())
        .await
        .expect("query");
    assert_eq!(hits.len(), 1);

    let without_query = manager(&cluster, ClusterSettings::default().with_query_port(None));
    let bucket = without_query.bucket(BUCKET, None).await.expect("open");
    let err = bucket
        .query(&"SELECT * FROM `default`".into())
        .await
        .unwrap_err();
    assert!(matches!(err, DocError::ConnectionFailure(_)));
}

#[tokio::test]
async fn insert_then_get_round_trips() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    let body = json!({"firstName": "foo", "lastName": "bar", "tags": ["a", "b"]});

    let inserted = gateway
        .insert(BUCKET, "user::1", &body, &no_populate())
        .await
        .expect("insert");
    assert!(!inserted.cas.is_empty());
    assert_eq!(inserted.hit, "user::1");
    assert!(inserted.value.is_none());

    let fetched = gateway
        .get(BUCKET, "user::1", &GetOptions::default())
        .await
        .expect("get");
    assert_eq!(fetched.value, Some(body));
    assert_eq!(fetched.cas, inserted.cas);
}

#[tokio::test]
async fn second_insert_fails_and_keeps_original() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    gateway
        .insert(BUCKET, "k", &json!({"v": 1}), &no_populate())
        .await
        .expect("insert");

    let err = gateway
        .insert(BUCKET, "k", &json!({"v": 2}), &no_populate())
        .await
        .unwrap_err();
    assert!(matches!(err, DocError::KeyAlreadyExists(_)));

    let fetched = gateway.get(BUCKET, "k", &GetOptions::default()).await.expect("get");
    assert_eq!(fetched.value, Some(json!({"v": 1})));
}

#[tokio::test]
async fn populate_returns_stored_document() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    let body = json!({"firstName": "foo", "lastName": "bar"});

    let result = gateway
        .insert(BUCKET, "user::populate", &body, &WriteOptions::default())
        .await
        .expect("insert");
    assert_eq!(result.value, Some(body));
    assert!(result.index_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn lock_blocks_get_until_it_lapses() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    gateway
        .insert(BUCKET, "k", &json!({"v": 1}), &no_populate())
        .await
        .expect("insert");

    let locked = gateway
        .get_and_lock(BUCKET, "k", &LockOptions::default())
        .await
        .expect("lock");
    assert_eq!(locked.value, Some(json!({"v": 1})));

    let err = gateway.get(BUCKET, "k", &GetOptions::default()).await.unwrap_err();
    assert!(err.is_locked());

    tokio::time::advance(Duration::from_secs(16)).await;
    gateway
        .get(BUCKET, "k", &GetOptions::default())
        .await
        .expect("lock lapsed");
}

#[tokio::test]
async fn unbounded_lock_time_and_expiry_are_rejected() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    gateway
        .insert(BUCKET, "k", &json!({"v": 1}), &no_populate())
        .await
        .expect("insert");

    let err = gateway
        .get_and_lock(
            BUCKET,
            "k",
            &LockOptions {
                lock_time: Duration::MAX,
                populate: true,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocError::InvalidArgument(_)));
    gateway
        .get(BUCKET, "k", &GetOptions::default())
        .await
        .expect("still unlocked");

    let err = gateway
        .insert(
            BUCKET,
            "forever",
            &json!({"v": 2}),
            &WriteOptions {
                expiry: Duration::MAX,
                ..WriteOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocError::InvalidArgument(_)));
    let err = gateway
        .get(BUCKET, "forever", &GetOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = gateway.touch(BUCKET, "k", Duration::MAX).await.unwrap_err();
    assert!(matches!(err, DocError::InvalidArgument(_)));
}

#[tokio::test]
async fn lock_cas_writes_and_unlocks() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    gateway
        .insert(BUCKET, "k", &json!({"v": 1}), &no_populate())
        .await
        .expect("insert");

    let lock = LockOptions {
        populate: false,
        ..LockOptions::default()
    };
    let locked = gateway.get_and_lock(BUCKET, "k", &lock).await.expect("lock");
    assert!(locked.value.is_none());

    let err = gateway
        .upsert(BUCKET, "k", &json!({"v": 2}), &no_populate())
        .await
        .unwrap_err();
    assert!(err.is_locked());

    let write = WriteOptions {
        cas: Some(locked.cas),
        ..WriteOptions::default()
    };
    let written = gateway
        .replace(BUCKET, "k", &json!({"v": 2}), &write)
        .await
        .expect("replace with lock cas");
    assert_eq!(written.value, Some(json!({"v": 2})));

    let relocked = gateway.get_and_lock(BUCKET, "k", &lock).await.expect("relock");
    gateway.unlock(BUCKET, "k", relocked.cas).await.expect("unlock");
    gateway
        .get(BUCKET, "k", &GetOptions::default())
        .await
        .expect("unlocked");
}

#[tokio::test]
async fn remove_honours_cas() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    let first = gateway
        .insert(BUCKET, "k", &json!(1), &no_populate())
        .await
        .expect("insert");
    gateway
        .upsert(BUCKET, "k", &json!(2), &no_populate())
        .await
        .expect("upsert");

    let stale = RemoveOptions {
        cas: Some(first.cas),
        ..RemoveOptions::default()
    };
    let err = gateway.remove(BUCKET, "k", &stale).await.unwrap_err();
    assert!(err.is_cas_mismatch());

    gateway
        .remove(BUCKET, "k", &RemoveOptions::default())
        .await
        .expect("remove");
    let err = gateway.get(BUCKET, "k", &GetOptions::default()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn get_multi_is_positional() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    gateway
        .insert(BUCKET, "k1", &json!({"n": 1}), &no_populate())
        .await
        .expect("k1");
    gateway
        .insert(BUCKET, "k3", &json!({"n": 3}), &no_populate())
        .await
        .expect("k3");

    let keys = vec!["k1".to_string(), "k2".to_string(), "k3".to_string()];
    let err = gateway.get_multi(BUCKET, &keys).await.unwrap_err();
    let partial = err.partial_result().expect("partial result");

    let hits: Vec<_> = partial.iter().map(|entry| entry.hit.as_str()).collect();
    assert_eq!(hits, vec!["k1", "k2", "k3"]);
    assert_eq!(partial.results()[0].value(), Some(&json!({"n": 1})));
    assert_eq!(partial.results()[2].value(), Some(&json!({"n": 3})));

    let errors = partial.errors().expect("errors");
    assert_eq!(errors.len(), 3);
    assert!(errors[0].is_none());
    assert!(errors[1].as_ref().map(DocError::is_not_found).unwrap_or(false));
    assert!(errors[2].is_none());

    let present = vec!["k1".to_string(), "k3".to_string()];
    let all = gateway.get_multi(BUCKET, &present).await.expect("all present");
    assert_eq!(all.len(), 2);
    assert!(all.errors().is_none());
}

#[tokio::test]
async fn get_multi_of_nothing_skips_the_bucket() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    let result = gateway.get_multi(BUCKET, &[]).await.expect("empty");
    assert!(result.is_empty());
    assert_eq!(cluster.connect_count(), 0);
}

#[tokio::test]
async fn index_views_makes_writes_visible_to_stale_queries() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    let stale_query = ViewQuery::new("users", "by_last_name")
        .stale(Stale::Ok)
        .key(json!("bar"));
    let raw = QueryOptions {
        populate: Some(false),
    };

    gateway
        .insert(BUCKET, "user::1", &json!({"lastName": "bar"}), &no_populate())
        .await
        .expect("insert");
    let before = gateway
        .query(BUCKET, stale_query.clone(), &raw)
        .await
        .expect("stale query");
    assert!(before.is_empty());

    gateway
        .index_views(BUCKET, &[ViewIndexRequest::new("users", "by_last_name")])
        .await
        .expect("index");
    let after = gateway
        .query(BUCKET, stale_query, &QueryOptions::default())
        .await
        .expect("stale query");
    match after {
        QueryHits::Documents(documents) => {
            assert_eq!(documents.len(), 1);
            assert_eq!(documents.results()[0].hit, "user::1");
            assert_eq!(
                documents.results()[0].value(),
                Some(&json!({"lastName": "bar"}))
            );
        }
        QueryHits::Rows(rows) => panic!("expected documents, got {} rows", rows.len()),
    }
}

#[tokio::test]
async fn write_with_views_and_populate_joins_both_branches() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    let options = WriteOptions {
        views: vec![ViewIndexRequest::new("users", "by_last_name")],
        ..WriteOptions::default()
    };

    let result = gateway
        .upsert(BUCKET, "user::2", &json!({"lastName": "zed"}), &options)
        .await
        .expect("upsert");
    assert_eq!(result.value, Some(json!({"lastName": "zed"})));
    assert!(result.index_error.is_none());

    let store = cluster.store(BUCKET).expect("store");
    assert_eq!(store.view_builds("users", "by_last_name"), Some(1));
}

#[tokio::test]
async fn index_failure_is_reported_next_to_the_write() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    let options = WriteOptions {
        views: vec![ViewIndexRequest::new("users", "missing_view")],
        ..WriteOptions::default()
    };

    let result = gateway
        .upsert(BUCKET, "user::3", &json!({"lastName": "kept"}), &options)
        .await
        .expect("write committed");
    assert_eq!(result.value, Some(json!({"lastName": "kept"})));
    match result.index_error {
        Some(DocError::IndexSyncFailure { design, view, .. }) => {
            assert_eq!(design, "users");
            assert_eq!(view, "missing_view");
        }
        other => panic!("unexpected index error: {:?}", other),
    }

    let err = gateway
        .index_views(BUCKET, &[ViewIndexRequest::new("users", "missing_view")])
        .await
        .unwrap_err();
    assert!(matches!(err, DocError::IndexSyncFailure { .. }));
}

#[tokio::test]
async fn statement_queries_do_not_populate_by_default() {
    let cluster = cluster();
    let gateway = gateway(&cluster);
    for (key, kind) in [("user::1", "user"), ("post::1", "post"), ("user::2", "user")] {
        gateway
            .upsert(BUCKET, key, &json!({"_type": kind}), &no_populate())
            .await
            .expect("upsert");
    }

    let statement = "SELECT * FROM `default` WHERE _type = 'user'";
    match gateway
        .query(BUCKET, statement, &QueryOptions::default())
        .await
        .expect("query")
    {
        QueryHits::Rows(rows) => {
            let ids: Vec<_> = rows.iter().filter_map(|row| row.id.as_deref()).collect();
            assert_eq!(ids, vec!["user::1", "user::2"]);
        }
        QueryHits::Documents(_) => panic!("statements should return rows"),
    }

    let populated = gateway
        .query(
            BUCKET,
            statement,
            &QueryOptions {
                populate: Some(true),
            },
        )
        .await
        .expect("populated query");
    assert!(matches!(populated, QueryHits::Documents(ref docs) if docs.len() == 2));

    let err = gateway
        .query(BUCKET, "   ", &QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DocError::InvalidArgument(_)));
}

#[tokio::test]
async fn counters_touch_and_append() {
    let cluster = cluster();
    let gateway = gateway(&cluster);

    let first = gateway
        .counter(BUCKET, "hits", 1, &CounterOptions::default())
        .await
        .expect("create counter");
    assert_eq!(first.value, Some(json!(0)));
    let second = gateway
        .counter(BUCKET, "hits", 5, &CounterOptions::default())
        .await
        .expect("increment");
    assert_eq!(second.value, Some(json!(5)));

    let strict = CounterOptions {
        initial: None,
        ..CounterOptions::default()
    };
    let err = gateway.counter(BUCKET, "other", 1, &strict).await.unwrap_err();
    assert!(err.is_not_found());

    gateway
        .insert(BUCKET, "log", &Value::String("a".into()), &no_populate())
        .await
        .expect("insert");
    let appended = gateway
        .append(BUCKET, "log", "b", &WriteOptions::default())
        .await
        .expect("append");
    assert_eq!(appended.value, Some(json!("ab")));

    let touched = gateway
        .touch(BUCKET, "log", Duration::from_secs(60))
        .await
        .expect("touch");
    assert_ne!(touched.cas, appended.cas);
}
