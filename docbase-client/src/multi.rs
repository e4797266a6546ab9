//! # Multi-Key Aggregation
//!
//! Purpose: Reshape per-key store responses into the positional
//! [`MultiResult`] contract, and reconcile fetched documents back onto
//! caller-held instances.
//!
//! ## Design Principles
//! 1. **Positional Output**: exactly one entry per requested key, in request
//!    order, each tagged with its key. Store entries are matched by key, so
//!    reordered or omitted entries never shift results onto other keys; a
//!    key with no entry gets `KeyNotFound`.
//! 2. **Identity Matching**: hydration pairs documents with instances by the
//!    unique-id field, never by position.

use std::collections::HashMap;

use serde_json::Value;

use docbase_common::{DocError, DocResult, KeyResult, MultiResult, StoredValue};

use crate::model::Document;

/// Builds the positional result of a multi-key read from key-tagged store
/// entries. Entries for keys that were not requested are dropped.
pub(crate) fn aggregate(
    keys: &[String],
    responses: Vec<(String, DocResult<StoredValue>)>,
) -> MultiResult {
    let responses: HashMap<String, DocResult<StoredValue>> = responses.into_iter().collect();
    let results = keys
        .iter()
        .map(|key| KeyResult {
            hit: key.clone(),
            result: responses
                .get(key)
                .cloned()
                .unwrap_or_else(|| Err(DocError::KeyNotFound(key.clone()))),
        })
        .collect();
    MultiResult::new(results)
}

/// Copies every successfully fetched document onto the instances whose
/// `uuid_field` matches, and records its CAS. Returns the number of
/// instances hydrated.
pub(crate) fn hydrate(instances: &mut [Document], result: &MultiResult, uuid_field: &str) -> usize {
    let mut hydrated = 0;
    for entry in result.iter() {
        let stored = match &entry.result {
            Ok(stored) => stored,
            Err(_) => continue,
        };
        let fields = match &stored.value {
            Value::Object(fields) => fields,
            _ => continue,
        };
        let unique_id = match fields.get(uuid_field) {
            Some(unique_id) => unique_id,
            None => continue,
        };

        for instance in instances
            .iter_mut()
            .filter(|instance| instance.get(uuid_field) == Some(unique_id))
        {
            instance.absorb(fields, stored.cas);
            hydrated += 1;
        }
    }
    hydrated
}
