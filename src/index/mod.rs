//! Module `index` implement secondary-index maintenance for the write
//! path.
//!
//! An index entry's key is the fixed-width encoding of the indexed
//! fields followed by the row's primary identity; its value is the row's
//! TTL anchor, empty when the schema has no TTL. Writers never touch an
//! index directly while it is rebuilding: they emit operation-log
//! records instead, which the rebuild subsystem replays. A locked index
//! refuses the whole mutation before anything is written.

use lazy_static::lazy_static;

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering::SeqCst},
    sync::Arc,
};

use crate::{
    batch::WriteBatch,
    keys,
    schema::Schema,
    types::{self, IndexId, PartId, SchemaId, SpaceId, Value},
    util::Latch,
    Error, Result,
};

lazy_static! {
    // delete-operation records within a partition must be unique and
    // replay in emission order.
    static ref OPLOG_SEQ: AtomicU64 = AtomicU64::new(1);
}

fn next_oplog_seq() -> u64 {
    OPLOG_SEQ.fetch_add(1, SeqCst)
}

/// One indexed field. `str_len` is the declared fixed width for string
/// columns, ignored for other types.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub str_len: usize,
}

impl Field {
    pub fn new(name: &str) -> Field {
        Field {
            name: name.to_string(),
            str_len: 0,
        }
    }

    pub fn new_str(name: &str, str_len: usize) -> Field {
        Field {
            name: name.to_string(),
            str_len,
        }
    }
}

/// Definition of a secondary index over one schema.
#[derive(Clone, Debug)]
pub struct IndexDef {
    id: IndexId,
    schema: SchemaId,
    fields: Vec<Field>,
}

impl IndexDef {
    pub fn new(id: IndexId, schema: SchemaId, fields: Vec<Field>) -> IndexDef {
        IndexDef { id, schema, fields }
    }

    pub fn to_id(&self) -> IndexId {
        self.id
    }

    pub fn to_schema(&self) -> SchemaId {
        self.schema
    }

    pub fn as_fields(&self) -> &[Field] {
        &self.fields
    }

    /// Concatenated fixed-width cells of this index's fields, fetched
    /// through `fetch`. None when a field cannot be resolved, in which
    /// case the row has no entry in this index.
    pub fn cells<F>(&self, schema: &Schema, fetch: F) -> Result<Option<Vec<u8>>>
    where
        F: Fn(&str) -> Result<Value>,
    {
        let mut cells = vec![];
        for field in self.fields.iter() {
            let col = match schema.col(&field.name) {
                Some((_, col)) => col,
                None => {
                    err_at!(IndexNotFound, msg: "field {:?} of index {}", field.name, self.id)?
                }
            };
            let val = match fetch(&field.name) {
                Ok(val) => val,
                Err(Error::ReadPropFailed(_, _)) => return Ok(None),
                Err(e) => return Err(e),
            };
            cells.extend_from_slice(&types::index_cell(&val, col.typ, field.str_len)?);
        }
        Ok(Some(cells))
    }
}

/// Lifecycle state of one index on one partition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    Normal,
    Rebuilding,
    Locked,
}

#[derive(Default)]
struct Inner {
    defs: HashMap<(SpaceId, SchemaId), Vec<Arc<IndexDef>>>,
    states: HashMap<(SpaceId, PartId, IndexId), State>,
    busy: HashMap<(SpaceId, PartId), Arc<AtomicU64>>,
}

/// Registry of index definitions plus the per-(space,part,index) state
/// oracle consulted by writers.
pub struct Indexes {
    inner: Latch<Inner>,
}

impl Default for Indexes {
    fn default() -> Indexes {
        Indexes::new()
    }
}

impl Indexes {
    pub fn new() -> Indexes {
        Indexes {
            inner: Latch::new(Inner::default()),
        }
    }

    pub fn register(&self, space: SpaceId, def: IndexDef) -> Result<()> {
        let mut inner = self.inner.write();
        let defs = inner.defs.entry((space, def.schema)).or_insert_with(Vec::new);
        if defs.iter().any(|d| d.id == def.id) {
            err_at!(InvalidInput, msg: "index {} exists in space {}", def.id, space)?;
        }
        defs.push(Arc::new(def));
        Ok(())
    }

    pub fn unregister(&self, space: SpaceId, schema: SchemaId, index: IndexId) {
        let mut inner = self.inner.write();
        if let Some(defs) = inner.defs.get_mut(&(space, schema)) {
            defs.retain(|d| d.id != index);
        }
    }

    /// Every index targeting `schema` in `space`.
    pub fn indexes_for(&self, space: SpaceId, schema: SchemaId) -> Vec<Arc<IndexDef>> {
        let inner = self.inner.read();
        match inner.defs.get(&(space, schema)) {
            Some(defs) => defs.clone(),
            None => vec![],
        }
    }

    /// Oracle consulted by writers for every write. Unset states are
    /// Normal.
    pub fn state(&self, space: SpaceId, part: PartId, index: IndexId) -> State {
        let inner = self.inner.read();
        inner
            .states
            .get(&(space, part, index))
            .copied()
            .unwrap_or(State::Normal)
    }

    pub fn set_state(&self, space: SpaceId, part: PartId, index: IndexId, state: State) {
        let mut inner = self.inner.write();
        inner.states.insert((space, part, index), state);
    }

    /// RAII-count an executor against (`space`,`part`) for its lifetime.
    /// Rebuilders quiesce by waiting for [Indexes::in_flight] to drain.
    pub fn busy(&self, space: SpaceId, part: PartId) -> BusyGuard {
        let counter = {
            let mut inner = self.inner.write();
            let counter = inner
                .busy
                .entry((space, part))
                .or_insert_with(|| Arc::new(AtomicU64::new(0)));
            Arc::clone(counter)
        };
        counter.fetch_add(1, SeqCst);
        BusyGuard { counter }
    }

    /// Number of executors currently in flight on (`space`,`part`).
    pub fn in_flight(&self, space: SpaceId, part: PartId) -> u64 {
        let inner = self.inner.read();
        match inner.busy.get(&(space, part)) {
            Some(counter) => counter.load(SeqCst),
            None => 0,
        }
    }
}

/// See [Indexes::busy].
pub struct BusyGuard {
    counter: Arc<AtomicU64>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, SeqCst);
    }
}

/// Index-entry value: the row's TTL anchor, empty when there is none.
pub fn entry_value(ttl_anchor: Option<i64>) -> Vec<u8> {
    match ttl_anchor {
        Some(anchor) => anchor.to_le_bytes().to_vec(),
        None => vec![],
    }
}

/// Apply the state-oracle table for one index to `batch`.
///
/// | state      | old entry               | new entry               |
/// |------------|-------------------------|-------------------------|
/// | Normal     | remove                  | put                     |
/// | Rebuilding | delete-operation record | modify-operation record |
/// | Locked     | refuse                  | refuse                  |
///
/// `old_key`/`new_key` are full index-entry keys; None means the row has
/// no entry on that side. Must be called before the primary write is
/// committed, so a Locked refusal leaves nothing visible.
pub fn delta_ops(
    batch: &mut WriteBatch,
    state: State,
    part: PartId,
    old_key: Option<Vec<u8>>,
    new_key: Option<Vec<u8>>,
    new_value: Vec<u8>,
) -> Result<()> {
    match state {
        State::Locked => err_at!(IndexLocked, msg: "part {}", part),
        State::Normal => {
            if let Some(old) = old_key {
                batch.remove(old);
            }
            if let Some(new) = new_key {
                batch.put(new, new_value);
            }
            Ok(())
        }
        State::Rebuilding => {
            if let Some(old) = old_key {
                let rec = keys::delete_oplog_key(part, next_oplog_seq())?;
                batch.put(rec, old);
            }
            if let Some(new) = new_key {
                let rec = keys::modify_oplog_key(part, &new)?;
                batch.put(rec, new_value);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
