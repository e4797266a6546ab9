//! # Record Type Definitions
//!
//! Core data shapes exchanged between the backing store, the gateway and the
//! model layer.
//!
//! ## Design Principles
//!
//! 1. **Opaque Versions**: [`Cas`] only supports equality; nothing outside a
//!    store implementation looks at its representation.
//! 2. **Deterministic Keys**: [`DocumentKey`] is always composed from a type
//!    name and a unique id, `<type>::<uniqueId>`.
//! 3. **Positional Multi-Results**: [`MultiResult`] keeps exactly one entry per
//!    requested key, in request order, each tagged with its key (`hit`).
//!
//! ## Shapes
//!
//! ```text
//! Single-result:  OpResult   { cas, value?, hit, index_error? }
//! Multi-result:   MultiResult[ KeyResult { hit, Ok(StoredValue{cas,value}) | Err(error) } ]
//! ```

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::error::DocError;

/// Separator between the type name and the unique id of a document key.
pub const KEY_SEPARATOR: &str = "::";

/// Opaque compare-and-swap token returned by the store on every read/write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cas(u64);

impl Cas {
    /// Wraps a store-specific version value. Only store implementations
    /// should need this.
    pub fn from_raw(raw: u64) -> Self {
        Cas(raw)
    }

    /// Returns true for the zero token, which no store hands out.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Document id composed as `<type>::<uniqueId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Builds the key of document `unique_id` of type `type_name`.
    pub fn compose(type_name: &str, unique_id: &str) -> Self {
        DocumentKey(format!("{}{}{}", type_name, KEY_SEPARATOR, unique_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Type name part of the key.
    pub fn type_name(&self) -> &str {
        match self.0.split_once(KEY_SEPARATOR) {
            Some((type_name, _)) => type_name,
            None => "",
        }
    }

    /// Unique id part of the key.
    pub fn unique_id(&self) -> &str {
        match self.0.split_once(KEY_SEPARATOR) {
            Some((_, unique_id)) => unique_id,
            None => &self.0,
        }
    }

    /// Key of the counter document attached to this key, `<key>-<suffix>`.
    pub fn counter_key(&self, suffix: &str) -> String {
        format!("{}-{}", self.0, suffix)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Raw value plus CAS as returned by a store read.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub cas: Cas,
    pub value: Value,
}

impl StoredValue {
    pub fn new(cas: Cas, value: Value) -> Self {
        StoredValue { cas, value }
    }
}

/// Durability and versioning knobs passed to store writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Expected CAS; `None` disables the comparison.
    pub cas: Option<Cas>,
    /// Document time-to-live. Zero means the document never expires.
    pub expiry: Duration,
    /// Number of nodes the write must be persisted to.
    pub persist_to: u32,
    /// Number of replicas the write must reach.
    pub replicate_to: u32,
}

/// Canonical single-result shape.
#[derive(Debug, Clone)]
pub struct OpResult {
    pub cas: Cas,
    /// Document body when the operation read one back.
    pub value: Option<Value>,
    /// Resolved document key.
    pub hit: String,
    /// View-index failure reported next to a committed write.
    pub index_error: Option<DocError>,
}

impl OpResult {
    pub fn new(hit: impl Into<String>, cas: Cas, value: Option<Value>) -> Self {
        OpResult {
            cas,
            value,
            hit: hit.into(),
            index_error: None,
        }
    }
}

/// One positional entry of a multi-key response.
#[derive(Debug, Clone)]
pub struct KeyResult {
    /// Key this entry was requested for.
    pub hit: String,
    pub result: Result<StoredValue, DocError>,
}

impl KeyResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn cas(&self) -> Option<Cas> {
        self.result.as_ref().ok().map(|stored| stored.cas)
    }

    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok().map(|stored| &stored.value)
    }

    pub fn error(&self) -> Option<&DocError> {
        self.result.as_ref().err()
    }
}

/// Canonical multi-result shape: one entry per requested key, in order.
#[derive(Debug, Clone, Default)]
pub struct MultiResult {
    results: Vec<KeyResult>,
}

impl MultiResult {
    pub fn new(results: Vec<KeyResult>) -> Self {
        MultiResult { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[KeyResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<KeyResult> {
        self.results
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyResult> {
        self.results.iter()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|entry| !entry.is_ok()).count()
    }

    pub fn is_partial(&self) -> bool {
        self.failed_count() > 0
    }

    /// Positional errors, `None` when every key succeeded.
    ///
    /// The returned vector has one slot per requested key: `None` where the
    /// key succeeded and the specific error where it failed.
    pub fn errors(&self) -> Option<Vec<Option<DocError>>> {
        if !self.is_partial() {
            return None;
        }
        Some(
            self.results
                .iter()
                .map(|entry| entry.error().cloned())
                .collect(),
        )
    }

    /// Converts a partially failed result into
    /// [`DocError::PartialMultiKeyFailure`].
    pub fn into_checked(self) -> Result<MultiResult, DocError> {
        if self.is_partial() {
            Err(DocError::PartialMultiKeyFailure(Box::new(self)))
        } else {
            Ok(self)
        }
    }
}

impl IntoIterator for MultiResult {
    type Item = KeyResult;
    type IntoIter = std::vec::IntoIter<KeyResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// A row returned by a view or statement query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    /// Id of the emitting document, when the row refers to one.
    pub id: Option<String>,
    pub key: Value,
    pub value: Value,
}
