//! # DocBase In-Process Store
//!
//! Purpose: Provide a cluster implementation that lives inside the process,
//! so the client's persistence engine runs unchanged in tests, demos and
//! local development.
//!
//! ## Design Principles
//! 1. **Same Seams**: Everything is reached through the `Connector`,
//!    `Cluster` and `Bucket` traits of `docbase-common`.
//! 2. **Store Semantics**: CAS tokens, soft locks, expiry and view staleness
//!    behave the way the client expects a real cluster to behave.
//! 3. **Concurrency**: Sharded `parking_lot` locks; every operation yields to
//!    the runtime once, like a network round trip.

mod cluster;
mod memory;
mod statement;
mod views;

pub use cluster::{MemoryCluster, MemoryConnector};
pub use memory::{BucketStore, MemoryBucket};
pub use views::{collate, MapFn};
