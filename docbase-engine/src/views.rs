//! # View Indexes
//!
//! Secondary indexes maintained the way the cluster maintains them: a map
//! function emits `(key, value)` rows per document, and the row set is only
//! rebuilt when a query asks for it (`Stale::Before` / `Stale::After`). Writes
//! never touch an index, so a `Stale::Ok` query right after a write can miss
//! the written document.

use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::Value;

use docbase_common::{QueryRow, ViewQuery};

/// Map function of a view: `(document id, document) -> emitted rows`.
pub type MapFn = Arc<dyn Fn(&str, &Value) -> Vec<(Value, Value)> + Send + Sync>;

/// Materialized rows of one view.
pub(crate) struct ViewIndex {
    map: MapFn,
    rows: Vec<QueryRow>,
    builds: u64,
}

impl ViewIndex {
    pub(crate) fn new(map: MapFn) -> Self {
        ViewIndex {
            map,
            rows: Vec::new(),
            builds: 0,
        }
    }

    /// Number of completed rebuilds.
    pub(crate) fn builds(&self) -> u64 {
        self.builds
    }

    /// Re-runs the map function over `documents` and replaces every row.
    pub(crate) fn rebuild(&mut self, documents: &[(String, Value)]) {
        let mut rows = Vec::new();
        for (id, doc) in documents {
            for (key, value) in (self.map)(id, doc) {
                rows.push(QueryRow {
                    id: Some(id.clone()),
                    key,
                    value,
                });
            }
        }
        rows.sort_by(|a, b| collate(&a.key, &b.key).then_with(|| a.id.cmp(&b.id)));
        self.rows = rows;
        self.builds += 1;
    }

    /// Applies key filters, ordering, skip and limit of `query`.
    pub(crate) fn select(&self, query: &ViewQuery) -> Vec<QueryRow> {
        let mut rows: Vec<QueryRow> = self
            .rows
            .iter()
            .filter(|row| matches_keys(row, query))
            .cloned()
            .collect();

        if query.descending {
            rows.reverse();
        }

        let rows = rows.into_iter().skip(query.skip);
        match query.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

fn matches_keys(row: &QueryRow, query: &ViewQuery) -> bool {
    if let Some(keys) = &query.keys {
        return keys.iter().any(|key| collate(&row.key, key) == Ordering::Equal);
    }
    if let Some(key) = &query.key {
        return collate(&row.key, key) == Ordering::Equal;
    }

    // Descending queries walk the index backwards, so the range bounds swap.
    let low_side = if query.descending {
        Ordering::Greater
    } else {
        Ordering::Less
    };

    let after_start = match &query.start_key {
        Some(start) => collate(&row.key, start) != low_side,
        None => true,
    };
    let before_end = match &query.end_key {
        Some(end) => {
            let ord = collate(&row.key, end);
            ord == low_side || (ord == Ordering::Equal && query.inclusive_end)
        }
        None => true,
    };
    after_start && before_end
}

/// View collation: null < booleans < numbers < strings < arrays < objects.
pub fn collate(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = collate(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| collate(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn by_last_name() -> MapFn {
        Arc::new(|_id: &str, doc: &Value| match doc.get("lastName") {
            Some(name) => vec![(name.clone(), Value::Null)],
            None => Vec::new(),
        })
    }

    fn documents() -> Vec<(String, Value)> {
        vec![
            ("user::1".to_string(), json!({"lastName": "bar"})),
            ("user::2".to_string(), json!({"lastName": "alpha"})),
            ("user::3".to_string(), json!({"lastName": "zed"})),
            ("user::4".to_string(), json!({"other": true})),
        ]
    }

    #[test]
    fn rebuild_sorts_by_collated_key() {
        let mut index = ViewIndex::new(by_last_name());
        index.rebuild(&documents());
        let rows = index.select(&ViewQuery::new("users", "by_last_name"));
        let ids: Vec<_> = rows.iter().filter_map(|row| row.id.as_deref()).collect();
        assert_eq!(ids, vec!["user::2", "user::1", "user::3"]);
        assert_eq!(index.builds(), 1);
    }

    #[test]
    fn key_and_range_filters() {
        let mut index = ViewIndex::new(by_last_name());
        index.rebuild(&documents());

        let exact = index.select(&ViewQuery::new("users", "v").key(json!("bar")));
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].id.as_deref(), Some("user::1"));

        let empty = index.select(&ViewQuery::new("users", "v").key(json!([])));
        assert!(empty.is_empty());

        let range = index.select(&ViewQuery::new("users", "v").range(
            Some(json!("b")),
            Some(json!("zed")),
            false,
        ));
        assert_eq!(range.len(), 1);

        let descending = index.select(
            &ViewQuery::new("users", "v")
                .descending(true)
                .range(Some(json!("zed")), Some(json!("bar")), true),
        );
        let ids: Vec<_> = descending.iter().filter_map(|row| row.id.as_deref()).collect();
        assert_eq!(ids, vec!["user::3", "user::1"]);
    }

    #[test]
    fn skip_and_limit() {
        let mut index = ViewIndex::new(by_last_name());
        index.rebuild(&documents());
        let rows = index.select(&ViewQuery::new("users", "v").skip(1).limit(1));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id.as_deref(), Some("user::1"));
    }

    #[test]
    fn collation_orders_types() {
        assert_eq!(collate(&Value::Null, &json!(false)), Ordering::Less);
        assert_eq!(collate(&json!(10), &json!("a")), Ordering::Less);
        assert_eq!(collate(&json!([1, 2]), &json!([1, 3])), Ordering::Less);
        assert_eq!(collate(&json!([1]), &json!([1, 0])), Ordering::Less);
        assert_eq!(collate(&json!({"a": 1}), &json!([])), Ordering::Greater);
    }
}
