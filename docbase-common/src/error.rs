//! # Error Taxonomy
//!
//! Purpose: Give every layer (store, gateway, model) one error type so results
//! can flow upward unchanged.
//!
//! ## Design Principles
//! 1. **Kinds, not representations**: callers branch on [`ErrorKind`], payloads
//!    only carry context for humans.
//! 2. **Clone-able**: multi-key operations keep one error per requested key, so
//!    errors are stored by value in positional arrays.
//! 3. **No retries**: nothing in this crate retries; errors are surfaced as-is.

use thiserror::Error;

use crate::types::MultiResult;

/// Result alias used across the workspace.
pub type DocResult<T> = Result<T, DocError>;

/// Errors surfaced by the store, the gateway and the model layer.
#[derive(Debug, Clone, Error)]
pub enum DocError {
    /// The cluster could not be reached.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// The cluster refused to open a bucket (unknown name, bad password).
    #[error("failed to open bucket '{bucket}': {reason}")]
    BucketOpenFailure { bucket: String, reason: String },

    /// A previously opened bucket can no longer serve requests.
    #[error("bucket '{0}' is unavailable")]
    BucketUnavailable(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key already exists: {0}")]
    KeyAlreadyExists(String),

    /// Write rejected because the server-side CAS differs from the supplied one.
    #[error("cas mismatch on key: {0}")]
    CasMismatch(String),

    /// The key is soft-locked and the request carried no lock CAS.
    #[error("document is locked: {0}")]
    LockedDocument(String),

    /// Rejected by the model's validator. Issues are reported unchanged.
    #[error("validation failed for {model}: {}", .issues.join("; "))]
    ValidationFailed { model: String, issues: Vec<String> },

    #[error("operation timed out: {0}")]
    OperationTimeout(String),

    /// Some keys of a multi-key request failed; the positional result is kept.
    #[error("{} of {} keys failed", .0.failed_count(), .0.len())]
    PartialMultiKeyFailure(Box<MultiResult>),

    /// Forcing a view index after a write failed. The write itself committed.
    #[error("failed to index view {design}/{view}: {source}")]
    IndexSyncFailure {
        design: String,
        view: String,
        source: Box<DocError>,
    },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Caller contract violation (empty statement, wrong value shape).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A spawned branch of an operation panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`DocError`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionFailure,
    BucketOpenFailure,
    BucketUnavailable,
    KeyNotFound,
    KeyAlreadyExists,
    CasMismatch,
    LockedDocument,
    ValidationFailed,
    OperationTimeout,
    PartialMultiKeyFailure,
    IndexSyncFailure,
    ModelNotFound,
    InvalidArgument,
    Serialization,
    Internal,
}

impl DocError {
    /// Returns the payload-free kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocError::ConnectionFailure(_) => ErrorKind::ConnectionFailure,
            DocError::BucketOpenFailure { .. } => ErrorKind::BucketOpenFailure,
            DocError::BucketUnavailable(_) => ErrorKind::BucketUnavailable,
            DocError::KeyNotFound(_) => ErrorKind::KeyNotFound,
            DocError::KeyAlreadyExists(_) => ErrorKind::KeyAlreadyExists,
            DocError::CasMismatch(_) => ErrorKind::CasMismatch,
            DocError::LockedDocument(_) => ErrorKind::LockedDocument,
            DocError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            DocError::OperationTimeout(_) => ErrorKind::OperationTimeout,
            DocError::PartialMultiKeyFailure(_) => ErrorKind::PartialMultiKeyFailure,
            DocError::IndexSyncFailure { .. } => ErrorKind::IndexSyncFailure,
            DocError::ModelNotFound(_) => ErrorKind::ModelNotFound,
            DocError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DocError::Serialization(_) => ErrorKind::Serialization,
            DocError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::KeyNotFound
    }

    pub fn is_cas_mismatch(&self) -> bool {
        self.kind() == ErrorKind::CasMismatch
    }

    pub fn is_locked(&self) -> bool {
        self.kind() == ErrorKind::LockedDocument
    }

    /// Returns the positional result carried by a partial multi-key failure.
    pub fn partial_result(&self) -> Option<&MultiResult> {
        match self {
            DocError::PartialMultiKeyFailure(result) => Some(result),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DocError {
    fn from(err: serde_json::Error) -> Self {
        DocError::Serialization(err.to_string())
    }
}
