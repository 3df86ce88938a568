//! Gstore implement the storage-node write path of a replicated
//! property-graph: vertices, edges and their secondary indexes live in
//! partitions whose data sits in an embedded key/value engine and whose
//! mutations travel through a consensus log.
//!
//! The core of the package is the per-row read-modify-write executor in
//! [update]: it locks the row in the process-wide [lockmap], reads and
//! decodes the stored row under the schema version that authored it
//! ([row], [schema]), evaluates filter and update expressions ([expr]),
//! re-encodes under the latest schema, derives the secondary-index delta
//! against the per-partition state oracle ([index]) and hands one atomic
//! [batch] to the replicated KV layer ([kv]). The [dispatch] module fans
//! a multi-partition request out over a worker pool and folds the
//! per-partition results, surfacing leader redirects to the client.
//!
//! Consistency contract, in short:
//!
//! * per-row strict serializability, via the memory lock;
//! * a row and its index entries change in one atomic batch, so readers
//!   never observe one without the other;
//! * no ordering promise across rows or partitions beyond what the
//!   consensus log imposes.
//!
//! The consensus layer and the embedded engine are collaborators behind
//! the traits in [kv]; [memkv] is an in-process stand-in good enough to
//! run the whole write path in tests.

#[macro_use]
mod error;
#[macro_use]
pub mod util;

pub mod batch;
pub mod dispatch;
pub mod expr;
pub mod index;
pub mod keys;
pub mod kv;
pub mod lockmap;
pub mod memkv;
pub mod row;
pub mod schema;
pub mod types;
pub mod update;

pub use crate::error::{Error, Result};
