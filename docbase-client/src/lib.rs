//! # DocBase Client
//!
//! Purpose: Provide a document-model persistence layer over a clustered
//! key-value/document store, hiding connection lifecycle, key namespacing,
//! optimistic concurrency and view-index synchronization.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: [`Environment`] hands out [`Model`] handles; the
//!    gateway and connection manager stay behind it.
//! 2. **Async Composition**: sequential steps are plain `.await` chains,
//!    independent branches are spawned and joined.
//! 3. **Canonical Results**: every operation answers with an
//!    [`OpResult`](docbase_common::OpResult) or a positional
//!    [`MultiResult`](docbase_common::MultiResult), or a `DocError`.
//!
//! ## Layers
//!
//! ```text
//! Environment ─> Model / Document ─> KVGateway ─> ConnectionManager ─> Bucket
//!                                        └─> view index synchronizer
//! ```

mod connection;
mod environment;
mod gateway;
mod model;
mod multi;
mod schema;
mod views;

pub use connection::ConnectionManager;
pub use environment::{Environment, EnvironmentOptions, ModelDefinition};
pub use gateway::{
    CounterOptions, GetOptions, KVGateway, LockOptions, QueryHits, QueryOptions, RemoveOptions,
    WriteOptions, DEFAULT_LOCK_TIME,
};
pub use model::{
    deep_merge, Document, FetchOptions, FieldNames, Model, ModelContext, SaveOptions,
    UpdateOptions, DEFAULT_COUNTER_SUFFIX,
};
pub use schema::{AsyncValidator, JsonSchema, SchemaOptions, Validator, ValidatorHandle};

pub use docbase_common::{
    Cas, ClusterSettings, DocError, DocResult, DocumentKey, ErrorKind, KeyResult, MultiResult,
    N1qlQuery, OpResult, Query, QueryRow, Stale, ViewIndexRequest, ViewQuery,
};
