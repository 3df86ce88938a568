//! The executor's node pipeline. The pipeline shape is fixed at plan
//! build time -- source, optional filter, update, yield -- and driven by
//! a single execute function dispatching on the node variant.

use std::{collections::BTreeMap, mem, result, sync::Arc};

use crate::{
    batch::WriteBatch,
    expr::{Expr, PropContext},
    index,
    kv::AppendReply,
    row::{Reader, Writer},
    schema::{Schema, View},
    types::{HostAddr, PartId, SchemaId, Value},
    update::{Context, RowUpdate, Target, YieldCol},
    util, Error, Result,
};

/// Successful run: what the mutation did and what it yields.
pub(crate) struct Done {
    pub inserted: bool,
    pub filtered: bool,
    pub yields: Option<Vec<Value>>,
}

/// Failed run; a LeaderChanged failure carries the hint alongside.
pub(crate) struct Failure {
    pub err: Error,
    pub leader: Option<HostAddr>,
}

impl From<Error> for Failure {
    fn from(err: Error) -> Failure {
        Failure { err, leader: None }
    }
}

pub(crate) enum Node {
    Source,
    Filter { expr: Expr },
    Update { sets: Vec<(String, Expr)> },
    Yield { cols: Vec<(String, Expr)> },
}

// Per-run mutable state, owned by the executor and dropped at the end.
struct ExecState {
    part: PartId,
    target: Target,
    insertable: bool,
    view: View,
    sid: SchemaId,
    schema: Arc<Schema>,
    key: Vec<u8>,
    implicit: Vec<(String, Value)>,
    old: Option<Reader>,
    props: BTreeMap<String, Value>,
    inserted: bool,
    filtered: bool,
    batch: WriteBatch,
    yields: Option<Vec<Value>>,
}

struct EvalCtx<'a> {
    implicit: &'a [(String, Value)],
    props: &'a BTreeMap<String, Value>,
}

impl<'a> PropContext for EvalCtx<'a> {
    fn prop(&self, name: &str) -> Option<Value> {
        for (key, val) in self.implicit.iter() {
            if key == name {
                return Some(val.clone());
            }
        }
        self.props.get(name).cloned()
    }
}

impl ExecState {
    fn eval(&self, expr: &Expr) -> Result<Value> {
        let ctx = EvalCtx {
            implicit: &self.implicit,
            props: &self.props,
        };
        expr.eval(&ctx)
    }
}

// wire decode failures on request expressions surface as IllegalData.
fn decode_expr(data: &[u8]) -> Result<Expr> {
    match Expr::decode(data) {
        Ok(expr) => Ok(expr),
        Err(Error::DecodeFail(p, m)) => Err(Error::IllegalData(p, m)),
        Err(e) => Err(e),
    }
}

fn build_plan(row: &RowUpdate, ycols: &[YieldCol]) -> Result<Vec<Node>> {
    let mut plan = vec![Node::Source];
    if let Some(data) = &row.filter {
        plan.push(Node::Filter {
            expr: decode_expr(data)?,
        });
    }
    let mut sets = vec![];
    for set in row.sets.iter() {
        sets.push((set.name.clone(), decode_expr(&set.expr)?));
    }
    plan.push(Node::Update { sets });

    let mut cols = vec![];
    for col in ycols.iter() {
        cols.push((col.name.clone(), decode_expr(&col.expr)?));
    }
    plan.push(Node::Yield { cols });
    Ok(plan)
}

impl Node {
    fn execute(&self, ctx: &Context, st: &mut ExecState) -> Result<()> {
        match self {
            Node::Source => source(ctx, st),
            Node::Filter { expr } => filter(st, expr),
            Node::Update { sets } => update(ctx, st, sets),
            Node::Yield { cols } => yields(st, cols),
        }
    }
}

fn source(ctx: &Context, st: &mut ExecState) -> Result<()> {
    let data = ctx.store.get(ctx.space, st.part, &st.key)?;

    let old = match data {
        Some(data) => {
            let reader = match Reader::load(&st.view, st.sid, data) {
                Ok(reader) => reader,
                Err(Error::DecodeFail(p, m)) => Err(Error::IllegalData(p, m))?,
                Err(e) => Err(e)?,
            };
            // expired rows read as absent
            if reader.is_expired(util::unix_now_secs())? {
                None
            } else {
                Some(reader)
            }
        }
        None => None,
    };

    match (old, st.insertable) {
        (Some(reader), _) => {
            // materialize every column of the latest schema, including
            // defaults/nulls for columns added since this row was written
            for col in st.schema.as_cols().iter() {
                st.props.insert(col.name.clone(), reader.get(col)?);
            }
            st.old = Some(reader);
        }
        (None, true) => {
            st.inserted = true;
            for col in st.schema.as_cols().iter() {
                if let Some(default) = &col.default {
                    let val = match default.eval(&crate::expr::NullContext) {
                        Ok(val) => match val.coerce_to(col.typ) {
                            Ok(val) => val,
                            Err(e) => {
                                err_at!(InvalidDefault, msg: "{:?}: {}", col.name, e)?
                            }
                        },
                        Err(e) => {
                            err_at!(InvalidDefault, msg: "{:?}: {}", col.name, e)?
                        }
                    };
                    st.props.insert(col.name.clone(), val);
                } else if col.nullable {
                    st.props.insert(col.name.clone(), Value::Null);
                }
                // non-nullable, undefaulted columns must come from the
                // update assignments; the writer enforces that
            }
        }
        (None, false) => err_at!(KeyNotFound, msg: "{:?} part-{}", st.target, st.part)?,
    }
    Ok(())
}

fn filter(st: &mut ExecState, expr: &Expr) -> Result<()> {
    // nothing to filter on the insert path
    if st.inserted {
        return Ok(());
    }
    match st.eval(expr)? {
        Value::Bool(true) => Ok(()),
        Value::Bool(false) | Value::Null => {
            st.filtered = true;
            Ok(())
        }
        val => err_at!(IllegalData, msg: "filter evaluated to {}", val),
    }
}

fn update(ctx: &Context, st: &mut ExecState, sets: &[(String, Expr)]) -> Result<()> {
    if st.filtered {
        return Ok(());
    }

    // left-to-right, each assignment visible to the ones after it
    for (name, expr) in sets.iter() {
        if st.schema.col(name).is_none() {
            err_at!(InvalidFieldValue, msg: "unknown column {:?}", name)?;
        }
        let val = st.eval(expr)?;
        st.props.insert(name.clone(), val);
    }

    let mut writer = Writer::new(Arc::clone(&st.schema));
    for (name, val) in st.props.iter() {
        writer.set(name, val.clone())?;
    }
    let data = writer.finish()?;

    st.batch.put(st.key.clone(), data.clone());

    let new_reader = match Reader::load(&st.view, st.sid, data) {
        Ok(reader) => reader,
        Err(Error::DecodeFail(p, m)) => Err(Error::IllegalData(p, m))?,
        Err(e) => Err(e)?,
    };
    let primary = st.target.primary_identity(st.view.vid_len())?;
    index_delta(
        ctx,
        &mut st.batch,
        st.part,
        st.sid,
        &st.schema,
        st.old.as_ref(),
        Some(&new_reader),
        &primary,
    )
}

fn yields(st: &mut ExecState, cols: &[(String, Expr)]) -> Result<()> {
    if cols.is_empty() {
        return Ok(());
    }
    let mut vals = vec![];
    for (_, expr) in cols.iter() {
        vals.push(st.eval(expr)?);
    }
    st.yields = Some(vals);
    Ok(())
}

/// Stage the index delta of one mutation into `batch`, per the state
/// oracle. `old`/`new` are readers over the stored and the freshly
/// encoded row; either side may be absent (insert path, delete path).
pub(crate) fn index_delta(
    ctx: &Context,
    batch: &mut WriteBatch,
    part: PartId,
    sid: SchemaId,
    schema: &Schema,
    old: Option<&Reader>,
    new: Option<&Reader>,
    primary: &[u8],
) -> Result<()> {
    for def in ctx.indexes.indexes_for(ctx.space, sid) {
        let state = ctx.indexes.state(ctx.space, part, def.to_id());

        let old_key = match old {
            Some(reader) => def
                .cells(schema, |name| fetch_col(schema, reader, name))?
                .map(|cells| keys_for(part, def.to_id(), &cells, primary))
                .transpose()?,
            None => None,
        };
        let new_key = match new {
            Some(reader) => def
                .cells(schema, |name| fetch_col(schema, reader, name))?
                .map(|cells| keys_for(part, def.to_id(), &cells, primary))
                .transpose()?,
            None => None,
        };
        let value = match new {
            Some(reader) => index::entry_value(reader.ttl_anchor()?),
            None => vec![],
        };
        index::delta_ops(batch, state, part, old_key, new_key, value)?;
    }
    Ok(())
}

fn fetch_col(schema: &Schema, reader: &Reader, name: &str) -> Result<Value> {
    match schema.col(name) {
        Some((_, col)) => reader.get(col),
        None => err_at!(ReadPropFailed, msg: "column {:?}", name),
    }
}

fn keys_for(part: PartId, index: u32, cells: &[u8], primary: &[u8]) -> Result<Vec<u8>> {
    crate::keys::index_key(part, index, cells, primary)
}

/// Block on the one-shot append reply; the receiver returned by the
/// replicator is the completion.
pub(crate) fn commit(
    ctx: &Context,
    part: PartId,
    batch: WriteBatch,
) -> result::Result<(), Failure> {
    let rx = ctx
        .repl
        .async_append(ctx.space, part, batch)
        .map_err(Failure::from)?;
    let reply: AppendReply =
        err_at!(IPCFail, rx.recv(), "append part-{}", part).map_err(Failure::from)?;

    match reply {
        AppendReply::Ok => Ok(()),
        AppendReply::LeaderChanged { leader } => {
            let res: Result<()> = match &leader {
                Some(addr) => err_at!(LeaderChanged, msg: "part-{} at {}", part, addr),
                None => err_at!(LeaderChanged, msg: "part-{} leader unknown", part),
            };
            Err(Failure {
                err: res.unwrap_err(),
                leader,
            })
        }
        AppendReply::Timeout => {
            let res: Result<()> = err_at!(TimedOut, msg: "append part-{}", part);
            Err(Failure::from(res.unwrap_err()))
        }
        AppendReply::IoError { msg } => {
            let res: Result<()> = err_at!(KVEngine, msg: "append part-{}: {}", part, msg);
            Err(Failure::from(res.unwrap_err()))
        }
    }
}

/// Drive one row through the state machine. The memory lock and the
/// in-flight counter are RAII guards, released on every path out.
pub(crate) fn exec(
    ctx: &Context,
    row: &RowUpdate,
    ycols: &[YieldCol],
) -> result::Result<Done, Failure> {
    let plan = build_plan(row, ycols)?;

    let view = ctx.catalog.view(ctx.space)?;
    let sid = row.target.schema_id();
    let schema = view.latest(sid)?;
    let key = row.target.row_key(row.part, view.vid_len())?;

    let _busy = ctx.indexes.busy(ctx.space, row.part);
    let _lock = ctx
        .locks
        .try_lock(row.target.lock_key(ctx.space, row.part))?;

    let mut st = ExecState {
        part: row.part,
        target: row.target.clone(),
        insertable: row.insertable,
        implicit: row.target.implicit_props(),
        view,
        sid,
        schema,
        key,
        old: None,
        props: BTreeMap::new(),
        inserted: false,
        filtered: false,
        batch: WriteBatch::new(),
        yields: None,
    };

    for node in plan.iter() {
        node.execute(ctx, &mut st)?;
    }

    if !st.filtered && !st.batch.is_empty() {
        commit(ctx, st.part, mem::take(&mut st.batch))?;
    }

    Ok(Done {
        inserted: st.inserted,
        filtered: st.filtered,
        yields: st.yields.take(),
    })
}
