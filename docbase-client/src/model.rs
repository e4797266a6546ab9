//! # Document Model
//!
//! Purpose: Give application code a typed document lifecycle (create, save,
//! partial update, fetch, lock, remove, count) on top of the key-value
//! gateway, with key namespacing, metadata stamping and optimistic
//! concurrency handled in one place.
//!
//! ## Design Principles
//! 1. **One Engine, Many Types**: a [`Model`] is the generic engine bound to
//!    one [`ModelContext`] (bucket, type name, reserved field names) and one
//!    validator. Per-type behaviour is data, not subclassing.
//! 2. **Registered Context**: models are only handed out by an
//!    [`Environment`](crate::Environment), so no operation can run without a
//!    context.
//! 3. **All or Nothing Locally**: `save` and `update` build the candidate
//!    document on the side; the instance changes only once the write
//!    succeeded. A failed validation leaves the instance exactly as it was.
//! 4. **Reserved Fields Are Owned**: partial updates cannot forge the
//!    unique id, type or audit fields.
//! 5. **Methods as Extension Traits**: per-type behaviour beyond persistence
//!    is an extension trait implemented for [`Document`] or [`Model`] by the
//!    application, not a table stored in the descriptor.
//!
//! ## Lifecycle
//!
//! ```text
//! Transient ──save/insert──> Persisted ──fetch(lock)──> Locked
//!     ▲                         │  ▲                      │
//!     │                         │  └──update/unlock/lapse─┘
//!     └──────── (none) ─────────┴──remove──> Removed
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use docbase_common::{Cas, DocError, DocResult, DocumentKey, OpResult, Query, ViewIndexRequest};

use crate::gateway::{
    CounterOptions, GetOptions, KVGateway, LockOptions, QueryHits, QueryOptions, RemoveOptions,
    WriteOptions, DEFAULT_LOCK_TIME,
};
use crate::multi::hydrate;
use crate::schema::ValidatorHandle;

/// Default suffix of a document's counter key, `<key>-counter`.
pub const DEFAULT_COUNTER_SUFFIX: &str = "counter";

/// Names of the reserved metadata fields of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldNames {
    pub uuid: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub created_on: String,
    pub updated_on: String,
    pub created_by: String,
    pub updated_by: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        FieldNames {
            uuid: "_uId".to_string(),
            type_name: "_type".to_string(),
            created_on: "_createDate".to_string(),
            updated_on: "_updateDate".to_string(),
            created_by: "_createUser".to_string(),
            updated_by: "_updateUser".to_string(),
        }
    }
}

impl FieldNames {
    /// Every reserved field name.
    pub fn reserved(&self) -> [&str; 6] {
        [
            &self.uuid,
            &self.type_name,
            &self.created_on,
            &self.updated_on,
            &self.created_by,
            &self.updated_by,
        ]
    }
}

/// Binding of a model type to its bucket and field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelContext {
    pub bucket: String,
    pub type_name: String,
    pub fields: FieldNames,
}

/// Options of [`Document::save`] and [`Model::insert`].
#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub cas: Option<Cas>,
    /// Read the stored document back into the instance.
    pub populate: bool,
    /// Recorded in the created-by and updated-by fields.
    pub user: String,
    pub expiry: Duration,
    pub persist_to: u32,
    pub replicate_to: u32,
    pub views: Vec<ViewIndexRequest>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            cas: None,
            populate: true,
            user: String::new(),
            expiry: Duration::ZERO,
            persist_to: 0,
            replicate_to: 0,
            views: Vec::new(),
        }
    }
}

/// Options of [`Document::update`].
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// CAS captured earlier, typically by a locking fetch. The document is
    /// unlocked with it before the fetch, and the fetched CAS must match it.
    pub cas: Option<Cas>,
    /// Replace top-level properties wholesale instead of merging recursively.
    pub shallow: bool,
    pub user: String,
    pub populate: bool,
    pub expiry: Duration,
    pub persist_to: u32,
    pub replicate_to: u32,
    pub views: Vec<ViewIndexRequest>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            cas: None,
            shallow: false,
            user: String::new(),
            populate: true,
            expiry: Duration::ZERO,
            persist_to: 0,
            replicate_to: 0,
            views: Vec::new(),
        }
    }
}

/// Options of [`Document::fetch`] and [`Model::get`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Soft-lock the document; the CAS kept on the instance is the lock CAS.
    pub lock: bool,
    pub lock_time: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            lock: false,
            lock_time: DEFAULT_LOCK_TIME,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SaveMode {
    Insert,
    Upsert,
}

struct ModelInner {
    context: ModelContext,
    gateway: KVGateway,
    validator: ValidatorHandle,
}

/// Persistence engine bound to one document type.
///
/// Cheap to clone; obtained from [`Environment::define_model`](crate::Environment::define_model).
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    pub(crate) fn new(context: ModelContext, gateway: KVGateway, validator: ValidatorHandle) -> Self {
        Model {
            inner: Arc::new(ModelInner {
                context,
                gateway,
                validator,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.context.type_name
    }

    pub fn context(&self) -> &ModelContext {
        &self.inner.context
    }

    pub fn fields(&self) -> &FieldNames {
        &self.inner.context.fields
    }

    fn bucket(&self) -> &str {
        &self.inner.context.bucket
    }

    fn gateway(&self) -> &KVGateway {
        &self.inner.gateway
    }

    /// Key of document `unique_id` of this type.
    pub fn key(&self, unique_id: &str) -> DocumentKey {
        DocumentKey::compose(self.name(), unique_id)
    }

    /// Builds a transient instance.
    ///
    /// The unique id is `unique_id`, or a fresh v4 UUID. Fields of `data`
    /// are copied over the initial unique id and type, so hydrating from a
    /// stored body keeps its identity. `data` must be an object or null.
    pub fn create(&self, unique_id: Option<&str>, data: Value) -> DocResult<Document> {
        let fields = self.fields();
        let mut document = Map::new();
        let unique_id = match unique_id {
            Some(unique_id) => unique_id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        document.insert(fields.uuid.clone(), Value::String(unique_id));
        document.insert(fields.type_name.clone(), Value::String(self.name().to_string()));

        match data {
            Value::Object(data) => document.extend(data),
            Value::Null => {}
            _ => {
                return Err(DocError::InvalidArgument(format!(
                    "{} documents must be objects",
                    self.name()
                )))
            }
        }

        Ok(Document {
            model: self.clone(),
            data: document,
            cas: None,
        })
    }

    /// Creates, stamps, validates and inserts a new document. Fails with
    /// `KeyAlreadyExists` when the key is taken.
    pub async fn insert(
        &self,
        unique_id: Option<&str>,
        data: Value,
        options: &SaveOptions,
    ) -> DocResult<(Document, OpResult)> {
        let mut document = self.create(unique_id, data)?;
        let result = document.persist(SaveMode::Insert, options).await?;
        Ok((document, result))
    }

    /// Loads document `unique_id`, optionally locking it.
    pub async fn get(&self, unique_id: &str, options: &FetchOptions) -> DocResult<Document> {
        let mut document = self.create(Some(unique_id), Value::Null)?;
        document.fetch(options).await?;
        Ok(document)
    }

    /// Loads several documents in one request.
    ///
    /// Documents are matched to the requested ids by their unique-id field.
    /// When some keys fail the whole call fails with
    /// `PartialMultiKeyFailure`, which still carries every per-key outcome.
    pub async fn get_multi(&self, unique_ids: &[&str]) -> DocResult<Vec<Document>> {
        let mut documents = unique_ids
            .iter()
            .copied()
            .map(|unique_id| self.create(Some(unique_id), Value::Null))
            .collect::<DocResult<Vec<_>>>()?;
        let keys: Vec<String> = unique_ids
            .iter()
            .map(|unique_id| self.key(unique_id).to_string())
            .collect();

        let result = self.gateway().get_multi(self.bucket(), &keys).await?;
        let hydrated = hydrate(&mut documents, &result, &self.fields().uuid);
        debug!(model = %self.name(), requested = keys.len(), hydrated, "documents hydrated");
        Ok(documents)
    }

    /// Overwrites document `unique_id` with `data` as given. No stamping or
    /// validation takes place.
    pub async fn replace(
        &self,
        unique_id: &str,
        data: &Value,
        options: &WriteOptions,
    ) -> DocResult<OpResult> {
        let key = self.key(unique_id);
        self.gateway()
            .replace(self.bucket(), key.as_str(), data, options)
            .await
    }

    pub async fn remove(&self, unique_id: &str, options: &RemoveOptions) -> DocResult<OpResult> {
        let key = self.key(unique_id);
        self.gateway()
            .remove(self.bucket(), key.as_str(), options)
            .await
    }

    /// Runs `query` on the model's bucket and turns every hit carrying an
    /// object body into an instance. Populated hits keep their CAS.
    pub async fn query(
        &self,
        query: impl Into<Query>,
        options: &QueryOptions,
    ) -> DocResult<Vec<Document>> {
        let hits = self.gateway().query(self.bucket(), query, options).await?;
        let mut documents = Vec::with_capacity(hits.len());
        match hits {
            QueryHits::Rows(rows) => {
                for row in rows {
                    if row.value.is_object() {
                        documents.push(self.hydrated(row.value, None)?);
                    }
                }
            }
            QueryHits::Documents(result) => {
                for entry in result {
                    if let Ok(stored) = entry.result {
                        if stored.value.is_object() {
                            documents.push(self.hydrated(stored.value, Some(stored.cas))?);
                        }
                    }
                }
            }
        }
        Ok(documents)
    }

    /// Runs the model's validator over `document`.
    pub async fn validate(&self, document: &mut Map<String, Value>) -> DocResult<()> {
        self.inner.validator.validate(self.name(), document).await
    }

    fn hydrated(&self, value: Value, cas: Option<Cas>) -> DocResult<Document> {
        let mut document = self.create(None, value)?;
        document.cas = cas;
        Ok(document)
    }
}

/// One in-memory document: application fields, reserved metadata and the
/// last CAS seen from the store.
#[derive(Clone)]
pub struct Document {
    model: Model,
    data: Map<String, Value>,
    cas: Option<Cas>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("model", &self.model.name())
            .field("data", &self.data)
            .field("cas", &self.cas)
            .finish()
    }
}

impl Document {
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Unique id of the document, empty when the field was removed.
    pub fn unique_id(&self) -> &str {
        self.data
            .get(&self.model.fields().uuid)
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn key(&self) -> DocumentKey {
        self.model.key(self.unique_id())
    }

    /// CAS of the last successful operation, `None` while transient.
    pub fn cas(&self) -> Option<Cas> {
        self.cas
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.data
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        self.data.insert(field.into(), value);
        self
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Copies the top-level properties of `src` whose names do not start
    /// with `_`, deep-cloned. Non-object sources are ignored.
    pub fn merge(&mut self, src: &Value) -> &mut Self {
        if let Value::Object(src) = src {
            for (name, value) in src {
                if !name.starts_with('_') {
                    self.data.insert(name.clone(), value.clone());
                }
            }
        }
        self
    }

    /// Stamps, validates and upserts the instance.
    ///
    /// The created fields are stamped only when absent; the updated fields
    /// always. When validation fails the instance is left untouched.
    pub async fn save(&mut self, options: &SaveOptions) -> DocResult<OpResult> {
        self.persist(SaveMode::Upsert, options).await
    }

    async fn persist(&mut self, mode: SaveMode, options: &SaveOptions) -> DocResult<OpResult> {
        let fields = self.model.fields().clone();
        let now = Value::from(timestamp_millis());
        let user = Value::String(options.user.clone());

        let mut candidate = self.data.clone();
        if !candidate.contains_key(&fields.created_on) {
            candidate.insert(fields.created_on.clone(), now.clone());
            candidate.insert(fields.created_by.clone(), user.clone());
        }
        candidate.insert(fields.updated_on.clone(), now);
        candidate.insert(fields.updated_by.clone(), user);

        self.model.validate(&mut candidate).await?;

        let key = self.key();
        let value = Value::Object(candidate);
        let write_options = WriteOptions {
            cas: options.cas,
            expiry: options.expiry,
            persist_to: options.persist_to,
            replicate_to: options.replicate_to,
            populate: options.populate,
            views: options.views.clone(),
        };
        let gateway = self.model.gateway();
        let result = match mode {
            SaveMode::Insert => {
                gateway
                    .insert(self.model.bucket(), key.as_str(), &value, &write_options)
                    .await?
            }
            SaveMode::Upsert => {
                gateway
                    .upsert(self.model.bucket(), key.as_str(), &value, &write_options)
                    .await?
            }
        };

        debug!(model = %self.model.name(), key = %key, ?mode, "document saved");
        self.commit(value, &result);
        Ok(result)
    }

    /// Applies `partial` to the stored document with optimistic concurrency.
    ///
    /// Steps, in order:
    /// 1. With `options.cas`: unlock with it (a stale CAS fails with
    ///    `CasMismatch`).
    /// 2. Fetch the current copy; with `options.cas` its CAS must match.
    /// 3. Merge `partial` over it (deep unless `shallow`), ignoring reserved
    ///    fields, and restamp the updated fields.
    /// 4. Validate, then replace guarded by the fetched CAS.
    ///
    /// The instance is only mutated when every step succeeded.
    pub async fn update(&mut self, partial: &Value, options: &UpdateOptions) -> DocResult<OpResult> {
        let partial = partial.as_object().ok_or_else(|| {
            DocError::InvalidArgument("update payload must be an object".to_string())
        })?;
        let key = self.key();
        let bucket = self.model.bucket();
        let gateway = self.model.gateway();

        if let Some(cas) = options.cas {
            gateway.unlock(bucket, key.as_str(), cas).await?;
        }

        let current = gateway
            .get(bucket, key.as_str(), &GetOptions::default())
            .await?;
        if let Some(cas) = options.cas {
            if current.cas != cas {
                warn!(key = %key, "document changed since its CAS was captured");
                return Err(DocError::CasMismatch(key.to_string()));
            }
        }

        let mut candidate = match current.value {
            Some(Value::Object(stored)) => stored,
            _ => {
                return Err(DocError::InvalidArgument(format!(
                    "stored document is not an object: {}",
                    key
                )))
            }
        };

        let fields = self.model.fields().clone();
        let reserved = fields.reserved();
        let patch: Map<String, Value> = partial
            .iter()
            .filter(|(name, _)| !reserved.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if options.shallow {
            candidate.extend(patch);
        } else {
            deep_merge(&mut candidate, &patch);
        }
        candidate.insert(fields.updated_on.clone(), Value::from(timestamp_millis()));
        candidate.insert(
            fields.updated_by.clone(),
            Value::String(options.user.clone()),
        );

        self.model.validate(&mut candidate).await?;

        let value = Value::Object(candidate);
        let write_options = WriteOptions {
            cas: Some(current.cas),
            expiry: options.expiry,
            persist_to: options.persist_to,
            replicate_to: options.replicate_to,
            populate: options.populate,
            views: options.views.clone(),
        };
        let result = gateway
            .replace(bucket, key.as_str(), &value, &write_options)
            .await?;

        debug!(model = %self.model.name(), key = %key, shallow = options.shallow, "document updated");
        self.commit(value, &result);
        Ok(result)
    }

    /// Reloads the instance from the store, optionally locking it.
    pub async fn fetch(&mut self, options: &FetchOptions) -> DocResult<OpResult> {
        let key = self.key();
        let bucket = self.model.bucket();
        let gateway = self.model.gateway();
        let result = if options.lock {
            let lock = LockOptions {
                lock_time: options.lock_time,
                populate: true,
            };
            gateway.get_and_lock(bucket, key.as_str(), &lock).await?
        } else {
            gateway
                .get(bucket, key.as_str(), &GetOptions::default())
                .await?
        };

        if let Some(Value::Object(stored)) = &result.value {
            self.absorb(stored, result.cas);
        } else {
            self.cas = Some(result.cas);
        }
        Ok(result)
    }

    /// Removes the stored document.
    ///
    /// A locked document needs its lock CAS: without a CAS the call fails
    /// with `LockedDocument`, with a different CAS it fails with
    /// `CasMismatch`.
    pub async fn remove(&mut self, options: &RemoveOptions) -> DocResult<OpResult> {
        let key = self.key();
        let result = self
            .model
            .gateway()
            .remove(self.model.bucket(), key.as_str(), options)
            .await?;
        self.cas = None;
        Ok(result)
    }

    /// Releases a lock taken by a locking fetch.
    pub async fn unlock(&self, cas: Cas) -> DocResult<()> {
        let key = self.key();
        self.model
            .gateway()
            .unlock(self.model.bucket(), key.as_str(), cas)
            .await
    }

    /// Sets a new time-to-live; zero disables expiry.
    pub async fn touch(&mut self, expiry: Duration) -> DocResult<OpResult> {
        let key = self.key();
        let result = self
            .model
            .gateway()
            .touch(self.model.bucket(), key.as_str(), expiry)
            .await?;
        self.cas = Some(result.cas);
        Ok(result)
    }

    /// Adds `delta` to the counter kept at `<key>-counter`.
    pub async fn counter(&self, delta: i64, options: &CounterOptions) -> DocResult<OpResult> {
        self.counter_named(DEFAULT_COUNTER_SUFFIX, delta, options)
            .await
    }

    /// Adds `delta` to the counter kept at `<key>-<suffix>`.
    pub async fn counter_named(
        &self,
        suffix: &str,
        delta: i64,
        options: &CounterOptions,
    ) -> DocResult<OpResult> {
        let key = self.key().counter_key(suffix);
        self.model
            .gateway()
            .counter(self.model.bucket(), &key, delta, options)
            .await
    }

    /// Copies every field of `stored` onto the instance and records `cas`.
    pub(crate) fn absorb(&mut self, stored: &Map<String, Value>, cas: Cas) {
        for (name, value) in stored {
            self.data.insert(name.clone(), value.clone());
        }
        self.cas = Some(cas);
    }

    fn commit(&mut self, written: Value, result: &OpResult) {
        self.data = match (&result.value, written) {
            (Some(Value::Object(stored)), _) => stored.clone(),
            (_, Value::Object(written)) => written,
            _ => Map::new(),
        };
        self.cas = Some(result.cas);
    }
}

/// Recursively merges `patch` into `target`: nested objects are merged,
/// every other value replaces the target's value at that path.
pub fn deep_merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (name, value) in patch {
        if let (Some(Value::Object(existing)), Value::Object(nested)) = (target.get_mut(name), value) {
            deep_merge(existing, nested);
            continue;
        }
        target.insert(name.clone(), value.clone());
    }
}

fn timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
