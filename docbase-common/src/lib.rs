// docbase-common - Shared types and backend seams for DocBase
//
// This crate defines the error taxonomy, record shapes, query descriptions and
// the traits a backing store must implement to be driven by `docbase-client`.

pub mod backend;
pub mod config;
pub mod error;
pub mod query;
pub mod types;

// Re-export for convenience
pub use backend::*;
pub use config::*;
pub use error::*;
pub use query::*;
pub use types::*;
