//! # View Index Synchronizer
//!
//! Views are maintained asynchronously by the store, so a query issued right
//! after a write may not see it. Forcing each affected view with a
//! `stale = Before` query that matches nothing (`key = []`) rebuilds the index
//! as a side effect; the rows are discarded.
//!
//! All views are forced concurrently. The call returns once every view is
//! rebuilt, or on the first failure; tasks still in flight are detached and
//! run to completion on their own.

use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::debug;

use docbase_common::{Bucket, DocError, DocResult, Query, ViewIndexRequest};

/// Forces every view of `requests` on `bucket`.
pub(crate) async fn index_views(
    bucket: Arc<dyn Bucket>,
    requests: &[ViewIndexRequest],
) -> DocResult<()> {
    if requests.is_empty() {
        return Ok(());
    }

    let mut tasks = JoinSet::new();
    for request in requests.iter().cloned() {
        let bucket = Arc::clone(&bucket);
        tasks.spawn(async move { force_view(bucket, request).await });
    }

    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(join_failure).and_then(|outcome| outcome);
        if let Err(err) = outcome {
            tasks.detach_all();
            return Err(err);
        }
    }
    Ok(())
}

async fn force_view(bucket: Arc<dyn Bucket>, request: ViewIndexRequest) -> DocResult<()> {
    debug!(bucket = %bucket.name(), design = %request.design, view = %request.view, "forcing view index");
    let query = Query::View(request.forcing_query());
    match bucket.query(&query).await {
        Ok(_) => Ok(()),
        Err(source) => Err(DocError::IndexSyncFailure {
            design: request.design,
            view: request.view,
            source: Box::new(source),
        }),
    }
}

/// Maps a failed spawned branch onto the error taxonomy.
pub(crate) fn join_failure(err: JoinError) -> DocError {
    DocError::Internal(format!("spawned branch failed: {}", err))
}
