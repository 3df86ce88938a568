//! Module `memkv` implement an in-memory KV engine and single-replica
//! consensus stand-in, enough to run the whole write path in one
//! process.
//!
//! Each partition is a sorted map under its own latch; a batch is
//! round-tripped through its cbor wire form and applied under the write
//! latch, so readers observe either none or all of a batch. Leadership
//! is simulated: a partition marked remote refuses appends with the
//! configured leader hint, and reply injection lets callers rehearse
//! timeouts and engine failures.

use std::{collections::BTreeMap, collections::HashMap, sync::mpsc, sync::Arc};

use crate::{
    batch::{Op, WriteBatch},
    kv::{AppendReply, RawStore, Replicator},
    types::{HostAddr, PartId, SpaceId},
    util::{self, Latch},
    Error, Result,
};

struct Partition {
    data: Latch<BTreeMap<Vec<u8>, Vec<u8>>>,
    // None: this node leads. Some(hint): appends are refused.
    remote_leader: Latch<Option<Option<HostAddr>>>,
    inject: Latch<Option<AppendReply>>,
}

impl Partition {
    fn new() -> Partition {
        Partition {
            data: Latch::new(BTreeMap::new()),
            remote_leader: Latch::new(None),
            inject: Latch::new(None),
        }
    }
}

/// In-memory engine, implement [RawStore] and [Replicator].
pub struct MemKv {
    parts: Latch<HashMap<(SpaceId, PartId), Arc<Partition>>>,
}

impl Default for MemKv {
    fn default() -> MemKv {
        MemKv::new()
    }
}

impl MemKv {
    pub fn new() -> MemKv {
        MemKv {
            parts: Latch::new(HashMap::new()),
        }
    }

    pub fn add_part(&self, space: SpaceId, part: PartId) {
        let mut parts = self.parts.write();
        parts
            .entry((space, part))
            .or_insert_with(|| Arc::new(Partition::new()));
    }

    fn part(&self, space: SpaceId, part: PartId) -> Result<Arc<Partition>> {
        let parts = self.parts.read();
        match parts.get(&(space, part)) {
            Some(p) => Ok(Arc::clone(p)),
            None => err_at!(KVEngine, msg: "no partition ({},{})", space, part),
        }
    }

    /// Mark the partition as led elsewhere; appends reply LeaderChanged
    /// with `leader` as the hint. `make_local` reverts.
    pub fn set_remote_leader(
        &self,
        space: SpaceId,
        part: PartId,
        leader: Option<HostAddr>,
    ) -> Result<()> {
        let p = self.part(space, part)?;
        *p.remote_leader.write() = Some(leader);
        Ok(())
    }

    pub fn make_local(&self, space: SpaceId, part: PartId) -> Result<()> {
        let p = self.part(space, part)?;
        *p.remote_leader.write() = None;
        Ok(())
    }

    /// Arrange for the next append on the partition to fail with
    /// `reply`, without applying the batch.
    pub fn inject_reply(&self, space: SpaceId, part: PartId, reply: AppendReply) -> Result<()> {
        let p = self.part(space, part)?;
        *p.inject.write() = Some(reply);
        Ok(())
    }

    /// Number of keys stored in the partition.
    pub fn part_len(&self, space: SpaceId, part: PartId) -> Result<usize> {
        let p = self.part(space, part)?;
        let n = p.data.read().len();
        Ok(n)
    }
}

impl RawStore for MemKv {
    fn get(&self, space: SpaceId, part: PartId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let p = self.part(space, part)?;
        let data = p.data.read();
        Ok(data.get(key).cloned())
    }

    fn scan_prefix(
        &self,
        space: SpaceId,
        part: PartId,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let p = self.part(space, part)?;
        let data = p.data.read();
        let pairs = data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(pairs)
    }
}

impl Replicator for MemKv {
    fn async_append(
        &self,
        space: SpaceId,
        part: PartId,
        batch: WriteBatch,
    ) -> Result<mpsc::Receiver<AppendReply>> {
        let p = self.part(space, part)?;
        let (tx, rx) = mpsc::channel();

        if let Some(reply) = p.inject.write().take() {
            tx.send(reply).ok();
            return Ok(rx);
        }
        if let Some(leader) = p.remote_leader.read().clone() {
            tx.send(AppendReply::LeaderChanged { leader }).ok();
            return Ok(rx);
        }

        // the wire hop a real consensus layer would take
        let data = util::into_cbor_bytes(batch)?;
        let (batch, _) = util::from_cbor_bytes::<WriteBatch>(&data)?;

        {
            let mut data = p.data.write();
            for op in batch.into_ops() {
                match op {
                    Op::P { key, value } => {
                        data.insert(key, value);
                    }
                    Op::R { key } => {
                        data.remove(&key);
                    }
                }
            }
        }
        tx.send(AppendReply::Ok).ok();
        Ok(rx)
    }

    fn leader(&self, space: SpaceId, part: PartId) -> Option<HostAddr> {
        let p = self.part(space, part).ok()?;
        let result = match p.remote_leader.read().clone() {
            Some(hint) => hint,
            None => None,
        };
        result
    }
}

#[cfg(test)]
#[path = "memkv_test.rs"]
mod memkv_test;
