//! Module `dispatch` fan a multi-row update request out over a worker
//! pool and fold the per-row outcomes into the response: a result vector
//! with one code per touched partition -- only the first failure of a
//! partition is surfaced -- and, when the request yields columns, a
//! result set with the leading `_inserted` column.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering::SeqCst},
    sync::{mpsc, Arc},
};

use crate::{
    types::{HostAddr, PartId, SpaceId, Value},
    update::{Executor, RowOutcome, RowStatus, RowUpdate, YieldCol},
    util::thread::{Pool, Rx},
    Error, Result,
};

/// Configuration for a [Dispatcher].
#[derive(Clone, Debug)]
pub struct Config {
    /// Uniquely name dispatcher instances; worker threads are named
    /// after it.
    pub name: String,
    /// Number of worker threads; bounds the executor fan-out.
    pub pool_size: usize,
}

impl Config {
    pub fn new(name: &str) -> Config {
        Config {
            name: name.to_string(),
            pool_size: num_cpus::get(),
        }
    }

    pub fn set_pool_size(&mut self, pool_size: usize) -> &mut Self {
        self.pool_size = pool_size;
        self
    }
}

/// A batch of row updates scoped to one space, possibly many partitions.
#[derive(Clone, Debug)]
pub struct UpdateRequest {
    pub space: SpaceId,
    pub rows: Vec<RowUpdate>,
    /// Yield columns, shared by every row of the request.
    pub yields: Vec<YieldCol>,
}

/// Result code of one partition, the failure taxonomy flattened.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Code {
    Succeeded,
    KeyNotFound,
    ConcurrentModify,
    LeaderChanged,
    IllegalData,
    NoDefaultAndNotNullable,
    InvalidFieldValue,
    InvalidDefault,
    ReadPropFailed,
    IndexLocked,
    IndexNotFound,
    SchemaNotFound,
    KVEngine,
    TimedOut,
    Internal,
}

fn code_of(err: &Error) -> Code {
    match err {
        Error::KeyNotFound(_, _) => Code::KeyNotFound,
        Error::ConcurrentModify(_, _) => Code::ConcurrentModify,
        Error::LeaderChanged(_, _) => Code::LeaderChanged,
        Error::IllegalData(_, _) => Code::IllegalData,
        Error::NoDefaultAndNotNullable(_, _) => Code::NoDefaultAndNotNullable,
        Error::InvalidFieldValue(_, _) => Code::InvalidFieldValue,
        Error::InvalidDefault(_, _) => Code::InvalidDefault,
        Error::ReadPropFailed(_, _) => Code::ReadPropFailed,
        Error::IndexLocked(_, _) => Code::IndexLocked,
        Error::IndexNotFound(_, _) => Code::IndexNotFound,
        Error::SchemaNotFound(_, _) => Code::SchemaNotFound,
        Error::KVEngine(_, _) => Code::KVEngine,
        Error::TimedOut(_, _) => Code::TimedOut,
        _ => Code::Internal,
    }
}

/// Outcome of one partition; `leader` accompanies LeaderChanged so the
/// client can redirect.
#[derive(Clone, Debug)]
pub struct PartResult {
    pub part: PartId,
    pub code: Code,
    pub leader: Option<HostAddr>,
}

/// Yielded columns across the request's rows. The first column is
/// `_inserted`.
#[derive(Clone, Debug, PartialEq)]
pub struct DataSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Response to an [UpdateRequest].
#[derive(Clone, Debug)]
pub struct Response {
    pub results: Vec<PartResult>,
    pub data: Option<DataSet>,
}

enum Req {
    Row {
        exec: Arc<Executor>,
        row: RowUpdate,
        yields: Arc<Vec<YieldCol>>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub n_requests: u64,
    pub n_rows: u64,
    pub n_failures: u64,
}

/// Fans requests out over a fixed worker pool.
pub struct Dispatcher {
    pool: Pool<Req, RowOutcome>,
    n_requests: AtomicU64,
    n_rows: AtomicU64,
    n_failures: AtomicU64,
}

impl Dispatcher {
    pub fn new(config: Config) -> Result<Dispatcher> {
        let pool = Pool::new_spawned(&config.name, config.pool_size, main_loop)?;
        Ok(Dispatcher {
            pool,
            n_requests: AtomicU64::new(0),
            n_rows: AtomicU64::new(0),
            n_failures: AtomicU64::new(0),
        })
    }

    /// Issue one executor per row, bounded by the pool, and finalize the
    /// response once every executor has reported.
    pub fn dispatch(&self, exec: &Arc<Executor>, req: UpdateRequest) -> Result<Response> {
        if req.space != exec.as_context().to_space() {
            err_at!(
                InvalidInput, msg: "request space {} executor space {}",
                req.space, exec.as_context().to_space()
            )?;
        }

        self.n_requests.fetch_add(1, SeqCst);
        let n_rows = req.rows.len() as u64;
        self.n_rows.fetch_add(n_rows, SeqCst);
        log::debug!(
            target: "dispatch",
            "space-{} fan out {} rows over {} workers",
            req.space, n_rows, self.pool.pool_size()
        );

        // touched partitions, in request order
        let mut parts: Vec<PartId> = vec![];
        for row in req.rows.iter() {
            if !parts.contains(&row.part) {
                parts.push(row.part);
            }
        }

        let yields = Arc::new(req.yields);
        let names: Vec<String> = yields.iter().map(|col| col.name.clone()).collect();

        let (tx, rx) = mpsc::channel();
        let n = req.rows.len();
        for row in req.rows.into_iter() {
            let msg = Req::Row {
                exec: Arc::clone(exec),
                row,
                yields: Arc::clone(&yields),
            };
            self.pool.request_tx(msg, tx.clone())?;
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(n);
        for _ in 0..n {
            outcomes.push(err_at!(IPCFail, rx.recv())?);
        }

        let response = finalize(parts, &names, outcomes);
        let failures = response
            .results
            .iter()
            .filter(|r| r.code != Code::Succeeded)
            .count() as u64;
        self.n_failures.fetch_add(failures, SeqCst);
        Ok(response)
    }

    pub fn to_stats(&self) -> Stats {
        Stats {
            n_requests: self.n_requests.load(SeqCst),
            n_rows: self.n_rows.load(SeqCst),
            n_failures: self.n_failures.load(SeqCst),
        }
    }

    /// Shutdown the worker pool, waiting for in-flight rows.
    pub fn close_wait(self) -> Result<()> {
        self.pool.close_wait()?;
        Ok(())
    }
}

fn main_loop(rx: Rx<Req, RowOutcome>) -> impl FnOnce() {
    move || {
        // disconnect of the input channel is the shutdown signal
        for (msg, reply_tx) in rx {
            let Req::Row { exec, row, yields } = msg;
            let out = exec.update(&row, &yields);
            if let Some(reply_tx) = reply_tx {
                reply_tx.send(out).ok();
            }
        }
    }
}

fn finalize(parts: Vec<PartId>, names: &[String], outcomes: Vec<RowOutcome>) -> Response {
    // first failure per partition wins; everything else is success
    let mut failed: HashMap<PartId, PartResult> = HashMap::new();
    let mut rows: Vec<Vec<Value>> = vec![];

    for out in outcomes.into_iter() {
        match &out.status {
            RowStatus::Failed(err) => {
                failed.entry(out.part).or_insert_with(|| PartResult {
                    part: out.part,
                    code: code_of(err),
                    leader: out.leader.clone(),
                });
            }
            RowStatus::Applied { inserted } => {
                if let Some(vals) = out.yields {
                    let mut row = vec![Value::Bool(*inserted)];
                    row.extend(vals);
                    rows.push(row);
                }
            }
            RowStatus::Filtered => {
                // informational: old columns still come back
                if let Some(vals) = out.yields {
                    let mut row = vec![Value::Bool(false)];
                    row.extend(vals);
                    rows.push(row);
                }
            }
        }
    }

    let results = parts
        .into_iter()
        .map(|part| match failed.remove(&part) {
            Some(result) => result,
            None => PartResult {
                part,
                code: Code::Succeeded,
                leader: None,
            },
        })
        .collect();

    let data = if rows.is_empty() {
        None
    } else {
        let mut columns = vec!["_inserted".to_string()];
        columns.extend(names.iter().cloned());
        Some(DataSet { columns, rows })
    };

    Response { results, data }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod dispatch_test;
