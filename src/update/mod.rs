//! Module `update` implement the read-modify-write executor, the core of
//! the write path.
//!
//! One executor invocation handles one vertex or edge row: acquire the
//! row's memory lock, read and decode the stored row, evaluate the
//! filter, apply the update assignments left to right, re-encode under
//! the latest schema, derive the index delta against the state oracle,
//! and hand the assembled batch to the replicated KV layer. The lock is
//! released on every exit path; yielded columns are produced for applied
//! rows and, informationally, for filtered ones.
//!
//! The pipeline is a list of tagged [node::Node]s fixed at plan-build
//! time; collaborator handles live in an immutable [Context] while all
//! per-run state is owned by the executor and dropped at the end.

use std::sync::Arc;

use crate::{
    index::Indexes,
    keys,
    kv::{RawStore, Replicator},
    lockmap::{LockMap, RowKey},
    schema::Catalog,
    types::{EdgeType, HostAddr, PartId, SchemaId, SpaceId, TagId, Value},
    Error, Result,
};

mod mutate;
mod node;

/// The row a mutation is aimed at.
#[derive(Clone, Debug)]
pub enum Target {
    Vertex {
        vid: Vec<u8>,
        tag: TagId,
    },
    Edge {
        src: Vec<u8>,
        etype: EdgeType,
        rank: i64,
        dst: Vec<u8>,
    },
}

impl Target {
    pub fn schema_id(&self) -> SchemaId {
        match self {
            Target::Vertex { tag, .. } => SchemaId::for_tag(*tag),
            Target::Edge { etype, .. } => SchemaId::for_edge(*etype),
        }
    }

    fn row_key(&self, part: PartId, vid_len: usize) -> Result<Vec<u8>> {
        match self {
            Target::Vertex { vid, tag } => keys::vertex_key(part, vid, vid_len, *tag),
            Target::Edge {
                src,
                etype,
                rank,
                dst,
            } => keys::edge_key(part, vid_len, src, *etype, *rank, dst),
        }
    }

    fn lock_key(&self, space: SpaceId, part: PartId) -> RowKey {
        match self {
            Target::Vertex { vid, tag } => RowKey::Vertex {
                space,
                part,
                tag: *tag,
                vid: vid.clone(),
            },
            Target::Edge {
                src,
                etype,
                rank,
                dst,
            } => RowKey::Edge {
                space,
                part,
                src: src.clone(),
                etype: *etype,
                rank: *rank,
                dst: dst.clone(),
            },
        }
    }

    fn primary_identity(&self, vid_len: usize) -> Result<Vec<u8>> {
        match self {
            Target::Vertex { vid, .. } => keys::vertex_identity(vid, vid_len),
            Target::Edge {
                src, rank, dst, ..
            } => keys::edge_identity(vid_len, src, *rank, dst),
        }
    }

    // the four implicit columns a filter/update/yield expression can
    // reference besides the row's own properties.
    fn implicit_props(&self) -> Vec<(String, Value)> {
        fn vid_value(vid: &[u8]) -> Value {
            Value::Str(String::from_utf8_lossy(vid).into_owned())
        }

        match self {
            Target::Vertex { vid, tag } => vec![
                ("_vid".to_string(), vid_value(vid)),
                ("_tag".to_string(), Value::Int(*tag as i64)),
            ],
            Target::Edge {
                src,
                etype,
                rank,
                dst,
            } => vec![
                ("_src".to_string(), vid_value(src)),
                ("_type".to_string(), Value::Int(*etype as i64)),
                ("_rank".to_string(), Value::Int(*rank)),
                ("_dst".to_string(), vid_value(dst)),
            ],
        }
    }
}

/// One update assignment, `name = <expression>`, expression in its wire
/// encoding.
#[derive(Clone, Debug)]
pub struct PropSet {
    pub name: String,
    pub expr: Vec<u8>,
}

impl PropSet {
    pub fn new(name: &str, expr: Vec<u8>) -> PropSet {
        PropSet {
            name: name.to_string(),
            expr,
        }
    }
}

/// One yielded column: output name plus the expression producing it.
#[derive(Clone, Debug)]
pub struct YieldCol {
    pub name: String,
    pub expr: Vec<u8>,
}

impl YieldCol {
    pub fn new(name: &str, expr: Vec<u8>) -> YieldCol {
        YieldCol {
            name: name.to_string(),
            expr,
        }
    }
}

/// One row's worth of an update request.
#[derive(Clone, Debug)]
pub struct RowUpdate {
    pub part: PartId,
    pub target: Target,
    pub sets: Vec<PropSet>,
    /// Encoded filter expression; rows failing it report FilteredOut and
    /// still yield their old columns.
    pub filter: Option<Vec<u8>>,
    /// Insert the row when it is missing (upsert).
    pub insertable: bool,
}

/// Terminal status of one executor invocation.
#[derive(Clone, Debug)]
pub enum RowStatus {
    /// Mutation committed. `inserted` distinguishes the upsert insert
    /// path.
    Applied { inserted: bool },
    /// Filter said no; nothing written, old columns yielded.
    Filtered,
    /// Terminal error, nothing written.
    Failed(Error),
}

/// What one executor invocation came back with.
#[derive(Clone, Debug)]
pub struct RowOutcome {
    pub part: PartId,
    pub status: RowStatus,
    /// Leader hint accompanying a LeaderChanged failure.
    pub leader: Option<HostAddr>,
    /// Values of the request's yield columns, in request order.
    pub yields: Option<Vec<Value>>,
}

impl RowOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, RowStatus::Failed(_))
    }
}

/// Immutable bundle of collaborator handles, shared by every executor of
/// one space.
#[derive(Clone)]
pub struct Context {
    space: SpaceId,
    catalog: Arc<Catalog>,
    indexes: Arc<Indexes>,
    store: Arc<dyn RawStore>,
    repl: Arc<dyn Replicator>,
    locks: Arc<LockMap>,
}

impl Context {
    pub fn new(
        space: SpaceId,
        catalog: Arc<Catalog>,
        indexes: Arc<Indexes>,
        store: Arc<dyn RawStore>,
        repl: Arc<dyn Replicator>,
        locks: Arc<LockMap>,
    ) -> Context {
        Context {
            space,
            catalog,
            indexes,
            store,
            repl,
            locks,
        }
    }

    pub fn to_space(&self) -> SpaceId {
        self.space
    }
}

/// Executes mutations against one space.
pub struct Executor {
    ctx: Context,
}

impl Executor {
    pub fn new(ctx: Context) -> Executor {
        Executor { ctx }
    }

    pub fn as_context(&self) -> &Context {
        &self.ctx
    }

    /// Run the read-modify-write state machine for one row. Never
    /// panics; every failure lands in the outcome's status.
    pub fn update(&self, row: &RowUpdate, yields: &[YieldCol]) -> RowOutcome {
        match node::exec(&self.ctx, row, yields) {
            Ok(done) => RowOutcome {
                part: row.part,
                status: match done.filtered {
                    true => RowStatus::Filtered,
                    false => RowStatus::Applied {
                        inserted: done.inserted,
                    },
                },
                leader: None,
                yields: done.yields,
            },
            Err(fail) => {
                log::debug!(
                    target: "update",
                    "part-{} update failed: {}", row.part, fail.err
                );
                RowOutcome {
                    part: row.part,
                    status: RowStatus::Failed(fail.err),
                    leader: fail.leader,
                    yields: None,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
