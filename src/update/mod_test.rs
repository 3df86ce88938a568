use std::{sync::Arc, thread};

use super::*;
use crate::{
    expr::{BinOp, Expr},
    index::{Field, IndexDef, State},
    kv::AppendReply,
    lockmap::LockMap,
    memkv::MemKv,
    row::Reader,
    schema::{Catalog, Column, Push, Schema},
    types::{self, Type},
};

struct Rig {
    kv: Arc<MemKv>,
    catalog: Arc<Catalog>,
    indexes: Arc<Indexes>,
    locks: Arc<LockMap>,
    exec: Executor,
}

const SPACE: SpaceId = 1;
const PART: PartId = 1;
const PERSON: TagId = 1;
const COUNTER: TagId = 2;
const KNOWS: EdgeType = 7;
const AGE_INDEX: u32 = 11;

fn rig() -> Rig {
    let kv = Arc::new(MemKv::new());
    for part in 1..=3 {
        kv.add_part(SPACE, part);
    }

    let catalog = Arc::new(Catalog::new());
    catalog
        .apply(Push::Space {
            space: SPACE,
            vid_len: 8,
        })
        .unwrap();
    catalog
        .apply(Push::Schema {
            space: SPACE,
            name: "person".to_string(),
            schema: Schema::new(SchemaId::for_tag(PERSON), 1)
                .add_column(Column::new("name", Type::Str).set_nullable(false))
                .add_column(Column::new("age", Type::Int)),
        })
        .unwrap();
    catalog
        .apply(Push::Schema {
            space: SPACE,
            name: "counter".to_string(),
            schema: Schema::new(SchemaId::for_tag(COUNTER), 1)
                .add_column(Column::new("a", Type::Int))
                .add_column(Column::new("x", Type::Int))
                .add_column(Column::new("y", Type::Int)),
        })
        .unwrap();
    catalog
        .apply(Push::Schema {
            space: SPACE,
            name: "knows".to_string(),
            schema: Schema::new(SchemaId::for_edge(KNOWS), 1)
                .add_column(Column::new("since", Type::Int)),
        })
        .unwrap();

    let indexes = Arc::new(Indexes::new());
    indexes
        .register(
            SPACE,
            IndexDef::new(AGE_INDEX, SchemaId::for_tag(PERSON), vec![Field::new("age")]),
        )
        .unwrap();

    let locks = Arc::new(LockMap::new(16));
    let ctx = Context::new(
        SPACE,
        Arc::clone(&catalog),
        Arc::clone(&indexes),
        Arc::clone(&kv) as Arc<dyn crate::kv::RawStore>,
        Arc::clone(&kv) as Arc<dyn crate::kv::Replicator>,
        Arc::clone(&locks),
    );
    Rig {
        kv,
        catalog,
        indexes,
        locks,
        exec: Executor::new(ctx),
    }
}

fn vertex(vid: &[u8], tag: TagId) -> Target {
    Target::Vertex {
        vid: vid.to_vec(),
        tag,
    }
}

fn set(name: &str, expr: Expr) -> PropSet {
    PropSet::new(name, expr.to_bytes())
}

fn age_index_key(age: i64, vid: &[u8]) -> Vec<u8> {
    let cells = types::index_cell(&Value::Int(age), Type::Int, 0).unwrap();
    let primary = crate::keys::vertex_identity(vid, 8).unwrap();
    crate::keys::index_key(PART, AGE_INDEX, &cells, &primary).unwrap()
}

fn read_age(rig: &Rig, vid: &[u8]) -> Value {
    let view = rig.catalog.view(SPACE).unwrap();
    let key = crate::keys::vertex_key(PART, vid, 8, PERSON).unwrap();
    let data = rig.kv.get(SPACE, PART, &key).unwrap().unwrap();
    let reader = Reader::load(&view, SchemaId::for_tag(PERSON), data).unwrap();
    reader.get_by_name("age").unwrap()
}

// scenario A: simple update moves the primary row and the index entry
// in one batch.
#[test]
fn test_simple_update() {
    let rig = rig();
    rig.exec
        .insert_vertex(
            PART,
            b"00000001",
            PERSON,
            &[
                ("name".to_string(), Value::from("a")),
                ("age".to_string(), Value::Int(30)),
            ],
        )
        .unwrap();
    assert!(rig.kv.get(SPACE, PART, &age_index_key(30, b"00000001")).unwrap().is_some());

    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000001", PERSON),
        sets: vec![set("age", Expr::constant(31_i64))],
        filter: None,
        insertable: false,
    };
    let yields = vec![YieldCol::new("person.age", Expr::prop("age").to_bytes())];
    let out = rig.exec.update(&row, &yields);

    assert!(matches!(out.status, RowStatus::Applied { inserted: false }), "{:?}", out.status);
    assert_eq!(out.yields, Some(vec![Value::Int(31)]));
    assert_eq!(read_age(&rig, b"00000001"), Value::Int(31));

    // old entry removed, new entry present
    assert!(rig.kv.get(SPACE, PART, &age_index_key(30, b"00000001")).unwrap().is_none());
    assert!(rig.kv.get(SPACE, PART, &age_index_key(31, b"00000001")).unwrap().is_some());
}

// scenario B: upsert on a missing row takes the insert path.
#[test]
fn test_upsert_insert_path() {
    let rig = rig();
    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000002", PERSON),
        sets: vec![set("name", Expr::constant("b"))],
        filter: None,
        insertable: true,
    };
    let yields = vec![
        YieldCol::new("person.name", Expr::prop("name").to_bytes()),
        YieldCol::new("person.age", Expr::prop("age").to_bytes()),
    ];
    let out = rig.exec.update(&row, &yields);

    assert!(matches!(out.status, RowStatus::Applied { inserted: true }), "{:?}", out.status);
    assert_eq!(out.yields, Some(vec![Value::from("b"), Value::Null]));
    assert_eq!(read_age(&rig, b"00000002"), Value::Null);
}

// property 5, the other half: insertable=false on a missing row.
#[test]
fn test_missing_not_insertable() {
    let rig = rig();
    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000009", PERSON),
        sets: vec![set("age", Expr::constant(1_i64))],
        filter: None,
        insertable: false,
    };
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Failed(Error::KeyNotFound(_, _))));
}

// scenario C: a false filter commits nothing and yields the old row.
#[test]
fn test_filter_out() {
    let rig = rig();
    rig.exec
        .insert_vertex(
            PART,
            b"00000001",
            PERSON,
            &[
                ("name".to_string(), Value::from("a")),
                ("age".to_string(), Value::Int(30)),
            ],
        )
        .unwrap();

    let filter = Expr::binary(BinOp::Gt, Expr::prop("age"), Expr::constant(100_i64));
    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000001", PERSON),
        sets: vec![set("age", Expr::constant(99_i64))],
        filter: Some(filter.to_bytes()),
        insertable: false,
    };
    let yields = vec![YieldCol::new("person.age", Expr::prop("age").to_bytes())];
    let out = rig.exec.update(&row, &yields);

    assert!(matches!(out.status, RowStatus::Filtered), "{:?}", out.status);
    assert_eq!(out.yields, Some(vec![Value::Int(30)]));
    assert_eq!(read_age(&rig, b"00000001"), Value::Int(30));
    assert!(rig.kv.get(SPACE, PART, &age_index_key(30, b"00000001")).unwrap().is_some());
    assert!(rig.kv.get(SPACE, PART, &age_index_key(99, b"00000001")).unwrap().is_none());
}

// a filter that cannot type-check is IllegalData, not FilteredOut.
#[test]
fn test_filter_illegal() {
    let rig = rig();
    rig.exec
        .insert_vertex(
            PART,
            b"00000001",
            PERSON,
            &[
                ("name".to_string(), Value::from("a")),
                ("age".to_string(), Value::Int(30)),
            ],
        )
        .unwrap();

    let filter = Expr::binary(BinOp::Gt, Expr::prop("name"), Expr::constant(1_i64));
    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000001", PERSON),
        sets: vec![set("age", Expr::constant(1_i64))],
        filter: Some(filter.to_bytes()),
        insertable: false,
    };
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Failed(Error::IllegalData(_, _))));
    assert_eq!(read_age(&rig, b"00000001"), Value::Int(30));
}

// property 4: assignments apply left to right, each visible to the next.
#[test]
fn test_update_ordering() {
    let rig = rig();
    rig.exec
        .insert_vertex(
            PART,
            b"00000003",
            COUNTER,
            &[
                ("a".to_string(), Value::Int(5)),
                ("x".to_string(), Value::Int(99)),
                ("y".to_string(), Value::Int(99)),
            ],
        )
        .unwrap();

    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000003", COUNTER),
        sets: vec![
            set("x", Expr::prop("a")),
            set(
                "y",
                Expr::binary(BinOp::Add, Expr::prop("x"), Expr::constant(1_i64)),
            ),
        ],
        filter: None,
        insertable: false,
    };
    let yields = vec![
        YieldCol::new("x", Expr::prop("x").to_bytes()),
        YieldCol::new("y", Expr::prop("y").to_bytes()),
    ];
    let out = rig.exec.update(&row, &yields);
    assert!(matches!(out.status, RowStatus::Applied { .. }), "{:?}", out.status);
    assert_eq!(out.yields, Some(vec![Value::Int(5), Value::Int(6)]));
}

// scenario D: the loser of a lock race fails with ConcurrentModify and
// succeeds on retry; property 2: racing increments serialize.
#[test]
fn test_concurrent_modify() {
    let rig = rig();
    rig.exec
        .insert_vertex(PART, b"00000004", COUNTER, &[("a".to_string(), Value::Int(0))])
        .unwrap();

    // deterministic conflict: hold the row's lock, then try to update
    let guard = rig
        .locks
        .try_lock(vertex(b"00000004", COUNTER).lock_key(SPACE, PART))
        .unwrap();
    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000004", COUNTER),
        sets: vec![set(
            "a",
            Expr::binary(BinOp::Add, Expr::prop("a"), Expr::constant(1_i64)),
        )],
        filter: None,
        insertable: false,
    };
    let out = rig.exec.update(&row, &[]);
    match &out.status {
        RowStatus::Failed(Error::ConcurrentModify(_, msg)) => {
            assert!(msg.contains("vertex"), "{}", msg)
        }
        status => panic!("{:?}", status),
    }
    drop(guard);

    // retry of the loser lands; initial + 1
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Applied { .. }), "{:?}", out.status);

    // racing increments with client-side retry serialize to N
    let rig = Arc::new(rig);
    let n_threads: i64 = 4;
    let mut handles = vec![];
    for _ in 0..n_threads {
        let rig = Arc::clone(&rig);
        let row = row.clone();
        handles.push(thread::spawn(move || loop {
            match rig.exec.update(&row, &[]).status {
                RowStatus::Applied { .. } => break,
                RowStatus::Failed(Error::ConcurrentModify(_, _)) => thread::yield_now(),
                status => panic!("{:?}", status),
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    let view = rig.catalog.view(SPACE).unwrap();
    let key = crate::keys::vertex_key(PART, b"00000004", 8, COUNTER).unwrap();
    let data = rig.kv.get(SPACE, PART, &key).unwrap().unwrap();
    let reader = Reader::load(&view, SchemaId::for_tag(COUNTER), data).unwrap();
    assert_eq!(reader.get_by_name("a").unwrap(), Value::Int(1 + n_threads));
}

// scenario E: while an index rebuilds, writers emit operation-log
// records instead of touching the index.
#[test]
fn test_rebuild_coexistence() {
    let rig = rig();
    rig.exec
        .insert_vertex(
            PART,
            b"00000001",
            PERSON,
            &[
                ("name".to_string(), Value::from("a")),
                ("age".to_string(), Value::Int(30)),
            ],
        )
        .unwrap();

    rig.indexes.set_state(SPACE, PART, AGE_INDEX, State::Rebuilding);

    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000001", PERSON),
        sets: vec![set("age", Expr::constant(31_i64))],
        filter: None,
        insertable: false,
    };
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Applied { .. }), "{:?}", out.status);

    // the index itself is untouched: old entry still there, no new one
    assert!(rig.kv.get(SPACE, PART, &age_index_key(30, b"00000001")).unwrap().is_some());
    assert!(rig.kv.get(SPACE, PART, &age_index_key(31, b"00000001")).unwrap().is_none());

    // a delete-operation record carrying the old key, and a
    // modify-operation record embedding the new key
    let oplog = rig
        .kv
        .scan_prefix(SPACE, PART, &crate::keys::oplog_prefix(PART).unwrap())
        .unwrap();
    assert_eq!(oplog.len(), 2);
    let old_key = age_index_key(30, b"00000001");
    let new_key = age_index_key(31, b"00000001");
    assert!(oplog.iter().any(|(_, v)| v == &old_key));
    assert!(oplog.iter().any(|(k, _)| k.ends_with(&new_key)));
}

// a locked index refuses the whole mutation before anything commits.
#[test]
fn test_index_locked() {
    let rig = rig();
    rig.exec
        .insert_vertex(
            PART,
            b"00000001",
            PERSON,
            &[
                ("name".to_string(), Value::from("a")),
                ("age".to_string(), Value::Int(30)),
            ],
        )
        .unwrap();

    rig.indexes.set_state(SPACE, PART, AGE_INDEX, State::Locked);

    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000001", PERSON),
        sets: vec![set("age", Expr::constant(31_i64))],
        filter: None,
        insertable: false,
    };
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Failed(Error::IndexLocked(_, _))));
    assert_eq!(read_age(&rig, b"00000001"), Value::Int(30));
    assert!(rig.kv.get(SPACE, PART, &age_index_key(30, b"00000001")).unwrap().is_some());
}

// scenario F at the executor level: a LeaderChanged reply carries the
// hint out and leaves nothing visible.
#[test]
fn test_leader_changed() {
    let rig = rig();
    rig.exec
        .insert_vertex(
            PART,
            b"00000001",
            PERSON,
            &[
                ("name".to_string(), Value::from("a")),
                ("age".to_string(), Value::Int(30)),
            ],
        )
        .unwrap();

    let addr = HostAddr::new("peer-2", 44500);
    rig.kv.set_remote_leader(SPACE, PART, Some(addr.clone())).unwrap();

    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000001", PERSON),
        sets: vec![set("age", Expr::constant(31_i64))],
        filter: None,
        insertable: false,
    };
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Failed(Error::LeaderChanged(_, _))));
    assert_eq!(out.leader, Some(addr));

    rig.kv.make_local(SPACE, PART).unwrap();
    assert_eq!(read_age(&rig, b"00000001"), Value::Int(30));
}

// the append deadline expiring surfaces unchanged, lock released.
#[test]
fn test_append_timeout() {
    let rig = rig();
    rig.exec
        .insert_vertex(
            PART,
            b"00000001",
            PERSON,
            &[
                ("name".to_string(), Value::from("a")),
                ("age".to_string(), Value::Int(30)),
            ],
        )
        .unwrap();
    rig.kv.inject_reply(SPACE, PART, AppendReply::Timeout).unwrap();

    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000001", PERSON),
        sets: vec![set("age", Expr::constant(31_i64))],
        filter: None,
        insertable: false,
    };
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Failed(Error::TimedOut(_, _))));
    assert_eq!(rig.locks.to_stats().held, 0);

    // retry goes through
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Applied { .. }), "{:?}", out.status);
}

#[test]
fn test_edge_update() {
    let rig = rig();
    rig.exec
        .insert_edge(
            PART,
            b"00000001",
            KNOWS,
            3,
            b"00000002",
            &[("since".to_string(), Value::Int(2020))],
        )
        .unwrap();

    let target = Target::Edge {
        src: b"00000001".to_vec(),
        etype: KNOWS,
        rank: 3,
        dst: b"00000002".to_vec(),
    };
    let row = RowUpdate {
        part: PART,
        target: target.clone(),
        sets: vec![set("since", Expr::constant(2021_i64))],
        filter: None,
        insertable: false,
    };
    let yields = vec![
        YieldCol::new("since", Expr::prop("since").to_bytes()),
        YieldCol::new("rank", Expr::prop("_rank").to_bytes()),
    ];
    let out = rig.exec.update(&row, &yields);
    assert!(matches!(out.status, RowStatus::Applied { inserted: false }), "{:?}", out.status);
    assert_eq!(out.yields, Some(vec![Value::Int(2021), Value::Int(3)]));

    // the reverse side is a different logical edge
    let row = RowUpdate {
        part: PART,
        target: Target::Edge {
            src: b"00000001".to_vec(),
            etype: -KNOWS,
            rank: 3,
            dst: b"00000002".to_vec(),
        },
        sets: vec![set("since", Expr::constant(1999_i64))],
        filter: None,
        insertable: false,
    };
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Failed(Error::KeyNotFound(_, _))));
}

#[test]
fn test_delete_vertex() {
    let rig = rig();
    rig.exec
        .insert_vertex(
            PART,
            b"00000001",
            PERSON,
            &[
                ("name".to_string(), Value::from("a")),
                ("age".to_string(), Value::Int(30)),
            ],
        )
        .unwrap();

    rig.exec.delete_vertex(PART, b"00000001", PERSON).unwrap();
    let key = crate::keys::vertex_key(PART, b"00000001", 8, PERSON).unwrap();
    assert_eq!(rig.kv.get(SPACE, PART, &key).unwrap(), None);
    // index entry died with the row, in the same batch
    assert!(rig.kv.get(SPACE, PART, &age_index_key(30, b"00000001")).unwrap().is_none());

    assert!(matches!(
        rig.exec.delete_vertex(PART, b"00000001", PERSON),
        Err(Error::KeyNotFound(_, _))
    ));
}

// expired rows read as absent: an upsert takes the insert path over one.
#[test]
fn test_ttl_expired_row_upserts() {
    let rig = rig();
    catalog_session_schema(&rig.catalog);

    let anchor = crate::util::unix_now_secs() - 3600;
    rig.exec
        .insert_vertex(PART, b"00000005", 9, &[("ts".to_string(), Value::Int(anchor))])
        .unwrap();

    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000005", 9),
        sets: vec![set("ts", Expr::constant(crate::util::unix_now_secs()))],
        filter: None,
        insertable: true,
    };
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Applied { inserted: true }), "{:?}", out.status);
}

fn catalog_session_schema(catalog: &Catalog) {
    catalog
        .apply(Push::Schema {
            space: SPACE,
            name: "session".to_string(),
            schema: Schema::new(SchemaId::for_tag(9), 1)
                .add_column(Column::new("ts", Type::Int))
                .set_ttl("ts", 60),
        })
        .unwrap();
}

// property: after any sequence of updates, every stored person row has
// exactly one entry in the (Normal) age index, keyed by its current age.
#[test]
fn test_index_consistency() {
    use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

    let seed: u64 = random();
    println!("test_index_consistency {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let rig = rig();
    let vids: Vec<Vec<u8>> = (0..8_u64).map(|i| format!("{:08}", i).into_bytes()).collect();
    for vid in vids.iter() {
        rig.exec
            .insert_vertex(
                PART,
                vid,
                PERSON,
                &[
                    ("name".to_string(), Value::from("n")),
                    ("age".to_string(), Value::Int(0)),
                ],
            )
            .unwrap();
    }

    let mut ages = vec![0_i64; vids.len()];
    for _ in 0..200 {
        let i = rng.gen::<usize>() % vids.len();
        let age = (rng.gen::<u32>() % 1000) as i64;
        let row = RowUpdate {
            part: PART,
            target: vertex(&vids[i], PERSON),
            sets: vec![set("age", Expr::constant(age))],
            filter: None,
            insertable: false,
        };
        let out = rig.exec.update(&row, &[]);
        assert!(matches!(out.status, RowStatus::Applied { .. }), "{:?}", out.status);
        ages[i] = age;
    }

    for (i, vid) in vids.iter().enumerate() {
        assert_eq!(read_age(&rig, vid), Value::Int(ages[i]));
    }
    // one index entry per row, each matching the row's current age
    let prefix = crate::keys::index_prefix(PART, AGE_INDEX).unwrap();
    let entries = rig.kv.scan_prefix(SPACE, PART, &prefix).unwrap();
    assert_eq!(entries.len(), vids.len());
    for (i, vid) in vids.iter().enumerate() {
        assert!(
            entries.iter().any(|(k, _)| k == &age_index_key(ages[i], vid)),
            "missing entry for {:?}",
            vid
        );
    }
}

// a dropped schema fails the executor, not the process.
#[test]
fn test_schema_dropped() {
    let rig = rig();
    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000001", 42),
        sets: vec![],
        filter: None,
        insertable: true,
    };
    let out = rig.exec.update(&row, &[]);
    assert!(matches!(out.status, RowStatus::Failed(Error::SchemaNotFound(_, _))));
}

// the in-flight counter covers the whole executor run.
#[test]
fn test_busy_counter_drains() {
    let rig = rig();
    let row = RowUpdate {
        part: PART,
        target: vertex(b"00000001", PERSON),
        sets: vec![set("name", Expr::constant("a"))],
        filter: None,
        insertable: true,
    };
    rig.exec.update(&row, &[]);
    assert_eq!(rig.indexes.in_flight(SPACE, PART), 0);
}
