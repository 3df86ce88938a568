//! Module `kv` name the contracts this package consumes from below: the
//! embedded KV engine for reads and the consensus layer for writes.
//!
//! The replicated append is asynchronous by construction: the call
//! returns the receiving side of a one-shot channel and the reply
//! arriving on it is the completion. An executor is a task that blocks
//! on that receiver; there is no separate latch object.

use std::sync::mpsc;

use crate::{
    batch::WriteBatch,
    types::{HostAddr, PartId, SpaceId},
    Result,
};

/// Reply to a replicated batch append.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AppendReply {
    /// Batch is committed and applied, all-or-nothing.
    Ok,
    /// This node is not the leader; hint carries the current leader when
    /// known.
    LeaderChanged { leader: Option<HostAddr> },
    /// The caller's deadline expired before the batch committed.
    Timeout,
    /// Engine-level failure, propagated unchanged.
    IoError { msg: String },
}

/// Keyed reads against the embedded engine of one partition.
pub trait RawStore: Send + Sync {
    /// Point lookup. Absence is not an error.
    fn get(&self, space: SpaceId, part: PartId, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(
        &self,
        space: SpaceId,
        part: PartId,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Replicated, atomic batch append plus the leadership oracle.
pub trait Replicator: Send + Sync {
    /// Submit `batch` for consensus on (`space`, `part`). The returned
    /// receiver yields exactly one [AppendReply].
    fn async_append(
        &self,
        space: SpaceId,
        part: PartId,
        batch: WriteBatch,
    ) -> Result<mpsc::Receiver<AppendReply>>;

    /// Current leader of the partition, when known.
    fn leader(&self, space: SpaceId, part: PartId) -> Option<HostAddr>;
}
