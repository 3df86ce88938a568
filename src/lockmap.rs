//! Module `lockmap` implement the row-level memory-lock table.
//!
//! The table is the only process-wide mutable state on the write path: a
//! sharded set of row identities, one entry per in-flight
//! read-modify-write. Acquisition is non-blocking: a conflict fails
//! immediately with [Error::ConcurrentModify] naming the contended row,
//! and the caller may retry. The returned guard owns the identity and
//! releases it on drop, on every exit path.

use lazy_static::lazy_static;

use std::{
    collections::hash_map::DefaultHasher,
    collections::HashSet,
    fmt,
    hash::{Hash, Hasher},
    result,
    sync::atomic::{AtomicU64, Ordering::SeqCst},
    sync::Arc,
};

use crate::{
    types::{EdgeType, PartId, SpaceId, TagId},
    util::Latch,
    Error, Result,
};

/// Number of shards in the default, process-wide table.
pub const N_SHARDS: usize = 64;

lazy_static! {
    static ref GLOBAL: Arc<LockMap> = Arc::new(LockMap::new(N_SHARDS));
}

/// Handle to the process-wide lock table.
pub fn global() -> Arc<LockMap> {
    Arc::clone(&GLOBAL)
}

/// Identity of one logical row, the unit of mutual exclusion.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum RowKey {
    Vertex {
        space: SpaceId,
        part: PartId,
        tag: TagId,
        vid: Vec<u8>,
    },
    Edge {
        space: SpaceId,
        part: PartId,
        src: Vec<u8>,
        etype: EdgeType,
        rank: i64,
        dst: Vec<u8>,
    },
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            RowKey::Vertex {
                space,
                part,
                tag,
                vid,
            } => {
                write!(f, "vertex<{},{},{},{:?}>", space, part, tag, vid)
            }
            RowKey::Edge {
                space,
                part,
                src,
                etype,
                rank,
                dst,
            } => write!(
                f,
                "edge<{},{},{:?},{},{},{:?}>",
                space, part, src, etype, rank, dst
            ),
        }
    }
}

/// Sharded set of in-flight row identities.
pub struct LockMap {
    shards: Vec<Latch<HashSet<RowKey>>>,
    held: AtomicU64,
    conflicts: AtomicU64,
}

impl LockMap {
    pub fn new(n_shards: usize) -> LockMap {
        let shards = (0..n_shards.max(1)).map(|_| Latch::new(HashSet::new())).collect();
        LockMap {
            shards,
            held: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &RowKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Install `key` into the table. Insertion is atomic per key; a
    /// conflict fails immediately, there is no queuing.
    pub fn try_lock(&self, key: RowKey) -> Result<Guard> {
        let inserted = {
            let mut shard = self.shards[self.shard(&key)].write();
            shard.insert(key.clone())
        };
        if inserted {
            self.held.fetch_add(1, SeqCst);
            Ok(Guard { map: self, key })
        } else {
            self.conflicts.fetch_add(1, SeqCst);
            log::debug!(target: "lockmap", "contended {}", key);
            err_at!(ConcurrentModify, msg: "{}", key)
        }
    }

    fn unlock(&self, key: &RowKey) {
        let mut shard = self.shards[self.shard(key)].write();
        shard.remove(key);
        self.held.fetch_sub(1, SeqCst);
    }

    pub fn to_stats(&self) -> Stats {
        Stats {
            held: self.held.load(SeqCst),
            conflicts: self.conflicts.load(SeqCst),
        }
    }
}

/// Owns a locked row identity, releases it on drop.
pub struct Guard<'a> {
    map: &'a LockMap,
    key: RowKey,
}

impl<'a> Guard<'a> {
    pub fn as_key(&self) -> &RowKey {
        &self.key
    }
}

impl<'a> Drop for Guard<'a> {
    fn drop(&mut self) {
        self.map.unlock(&self.key);
    }
}

#[derive(Clone, Debug, Default)]
pub struct Stats {
    /// Locks currently held.
    pub held: u64,
    /// Failed acquisitions, cumulative.
    pub conflicts: u64,
}

#[cfg(test)]
#[path = "lockmap_test.rs"]
mod lockmap_test;
