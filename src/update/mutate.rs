//! Insert and delete, the non-read-modify-write mutations. Both go
//! through the same batch assembly and index-delta machinery as update;
//! insert overwrites whatever is stored (last write wins) and neither
//! takes the row's memory lock.

use std::sync::Arc;

use crate::{
    batch::WriteBatch,
    row::{Reader, Writer},
    update::{node, Context, Executor, Target},
    types::{EdgeType, PartId, TagId, Value},
    Error, Result,
};

impl Executor {
    /// Insert (or overwrite) a vertex row from literal property values.
    pub fn insert_vertex(
        &self,
        part: PartId,
        vid: &[u8],
        tag: TagId,
        props: &[(String, Value)],
    ) -> Result<()> {
        let target = Target::Vertex {
            vid: vid.to_vec(),
            tag,
        };
        insert(&self.ctx, part, target, props)
    }

    /// Insert (or overwrite) one side of an edge. The dispatcher places
    /// the +type row at the src partition and the -type row at the dst
    /// partition; this writes exactly the side addressed by `etype`.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_edge(
        &self,
        part: PartId,
        src: &[u8],
        etype: EdgeType,
        rank: i64,
        dst: &[u8],
        props: &[(String, Value)],
    ) -> Result<()> {
        let target = Target::Edge {
            src: src.to_vec(),
            etype,
            rank,
            dst: dst.to_vec(),
        };
        insert(&self.ctx, part, target, props)
    }

    /// Remove a vertex row and its index entries.
    pub fn delete_vertex(&self, part: PartId, vid: &[u8], tag: TagId) -> Result<()> {
        let target = Target::Vertex {
            vid: vid.to_vec(),
            tag,
        };
        delete(&self.ctx, part, target)
    }

    /// Remove one side of an edge and its index entries.
    pub fn delete_edge(
        &self,
        part: PartId,
        src: &[u8],
        etype: EdgeType,
        rank: i64,
        dst: &[u8],
    ) -> Result<()> {
        let target = Target::Edge {
            src: src.to_vec(),
            etype,
            rank,
            dst: dst.to_vec(),
        };
        delete(&self.ctx, part, target)
    }
}

fn insert(ctx: &Context, part: PartId, target: Target, props: &[(String, Value)]) -> Result<()> {
    let view = ctx.catalog.view(ctx.space)?;
    let sid = target.schema_id();
    let schema = view.latest(sid)?;
    let key = target.row_key(part, view.vid_len())?;

    let _busy = ctx.indexes.busy(ctx.space, part);

    let mut writer = Writer::new(Arc::clone(&schema));
    for (name, val) in props.iter() {
        writer.set(name, val.clone())?;
    }
    let data = writer.finish()?;

    // stored row, for index cleanup; an undecodable row being
    // overwritten loses its stale entries to the rebuild subsystem
    let old = match ctx.store.get(ctx.space, part, &key)? {
        Some(stored) => Reader::load(&view, sid, stored).ok(),
        None => None,
    };

    let mut batch = WriteBatch::new();
    batch.put(key, data.clone());

    let new_reader = match Reader::load(&view, sid, data) {
        Ok(reader) => reader,
        Err(Error::DecodeFail(p, m)) => Err(Error::IllegalData(p, m))?,
        Err(e) => Err(e)?,
    };
    let primary = target.primary_identity(view.vid_len())?;
    node::index_delta(
        ctx,
        &mut batch,
        part,
        sid,
        &schema,
        old.as_ref(),
        Some(&new_reader),
        &primary,
    )?;

    node::commit(ctx, part, batch).map_err(|fail| fail.err)
}

fn delete(ctx: &Context, part: PartId, target: Target) -> Result<()> {
    let view = ctx.catalog.view(ctx.space)?;
    let sid = target.schema_id();
    let schema = view.latest(sid)?;
    let key = target.row_key(part, view.vid_len())?;

    let _busy = ctx.indexes.busy(ctx.space, part);

    let old = match ctx.store.get(ctx.space, part, &key)? {
        Some(stored) => match Reader::load(&view, sid, stored) {
            Ok(reader) => reader,
            Err(Error::DecodeFail(p, m)) => Err(Error::IllegalData(p, m))?,
            Err(e) => Err(e)?,
        },
        None => err_at!(KeyNotFound, msg: "{:?} part-{}", target, part)?,
    };

    let mut batch = WriteBatch::new();
    batch.remove(key);

    let primary = target.primary_identity(view.vid_len())?;
    node::index_delta(
        ctx,
        &mut batch,
        part,
        sid,
        &schema,
        Some(&old),
        None,
        &primary,
    )?;

    node::commit(ctx, part, batch).map_err(|fail| fail.err)
}
