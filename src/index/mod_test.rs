use super::*;
use crate::{
    batch::Op,
    schema::{Column, Schema},
    types::Type,
};

fn person_schema() -> Schema {
    Schema::new(SchemaId::for_tag(1), 1)
        .add_column(Column::new("name", Type::Str).set_nullable(false))
        .add_column(Column::new("age", Type::Int))
}

fn age_index() -> IndexDef {
    IndexDef::new(11, SchemaId::for_tag(1), vec![Field::new("age")])
}

#[test]
fn test_registry() {
    let indexes = Indexes::new();
    indexes.register(1, age_index()).unwrap();
    assert!(indexes.register(1, age_index()).is_err());

    let defs = indexes.indexes_for(1, SchemaId::for_tag(1));
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].to_id(), 11);
    assert!(indexes.indexes_for(1, SchemaId::for_tag(2)).is_empty());
    assert!(indexes.indexes_for(2, SchemaId::for_tag(1)).is_empty());

    indexes.unregister(1, SchemaId::for_tag(1), 11);
    assert!(indexes.indexes_for(1, SchemaId::for_tag(1)).is_empty());
}

#[test]
fn test_state_oracle() {
    let indexes = Indexes::new();
    assert_eq!(indexes.state(1, 1, 11), State::Normal);

    indexes.set_state(1, 1, 11, State::Rebuilding);
    assert_eq!(indexes.state(1, 1, 11), State::Rebuilding);
    // per-partition, not per-index
    assert_eq!(indexes.state(1, 2, 11), State::Normal);

    indexes.set_state(1, 1, 11, State::Locked);
    assert_eq!(indexes.state(1, 1, 11), State::Locked);
}

#[test]
fn test_cells() {
    let schema = person_schema();
    let def = age_index();

    let cells = def
        .cells(&schema, |name| {
            assert_eq!(name, "age");
            Ok(Value::Int(30))
        })
        .unwrap()
        .unwrap();
    assert_eq!(cells, types::index_cell(&Value::Int(30), Type::Int, 0).unwrap());

    // unresolvable field: the row has no entry in this index
    let cells = def
        .cells(&schema, |_| err_at!(ReadPropFailed, msg: "absent"))
        .unwrap();
    assert!(cells.is_none());

    // field not in the schema
    let def = IndexDef::new(12, SchemaId::for_tag(1), vec![Field::new("ghost")]);
    assert!(def.cells(&schema, |_| Ok(Value::Int(1))).is_err());
}

#[test]
fn test_delta_ops_normal() {
    let mut batch = WriteBatch::new();
    delta_ops(
        &mut batch,
        State::Normal,
        3,
        Some(b"old-key".to_vec()),
        Some(b"new-key".to_vec()),
        b"anchor".to_vec(),
    )
    .unwrap();

    assert_eq!(batch.len(), 2);
    assert_eq!(
        batch.as_ops()[0],
        Op::R {
            key: b"old-key".to_vec()
        }
    );
    assert_eq!(
        batch.as_ops()[1],
        Op::P {
            key: b"new-key".to_vec(),
            value: b"anchor".to_vec()
        }
    );
}

#[test]
fn test_delta_ops_rebuilding() {
    let mut batch = WriteBatch::new();
    delta_ops(
        &mut batch,
        State::Rebuilding,
        3,
        Some(b"old-key".to_vec()),
        Some(b"new-key".to_vec()),
        vec![],
    )
    .unwrap();

    // both sides become operation-log records under the reserved prefix
    assert_eq!(batch.len(), 2);
    let prefix = keys::oplog_prefix(3).unwrap();
    for op in batch.as_ops() {
        assert!(op.as_key().starts_with(&prefix));
        assert!(matches!(op, Op::P { .. }));
    }
    match &batch.as_ops()[0] {
        Op::P { value, .. } => assert_eq!(value, &b"old-key".to_vec()),
        _ => unreachable!(),
    }
    match &batch.as_ops()[1] {
        Op::P { key, .. } => assert!(key.ends_with(b"new-key")),
        _ => unreachable!(),
    }
}

#[test]
fn test_delta_ops_locked() {
    let mut batch = WriteBatch::new();
    let res = delta_ops(
        &mut batch,
        State::Locked,
        3,
        Some(b"old-key".to_vec()),
        None,
        vec![],
    );
    assert!(matches!(res, Err(Error::IndexLocked(_, _))));
    // nothing was staged
    assert!(batch.is_empty());
}

#[test]
fn test_busy_counter() {
    let indexes = Indexes::new();
    assert_eq!(indexes.in_flight(1, 1), 0);

    let g1 = indexes.busy(1, 1);
    let g2 = indexes.busy(1, 1);
    let g3 = indexes.busy(1, 2);
    assert_eq!(indexes.in_flight(1, 1), 2);
    assert_eq!(indexes.in_flight(1, 2), 1);

    drop(g1);
    assert_eq!(indexes.in_flight(1, 1), 1);
    drop(g2);
    drop(g3);
    assert_eq!(indexes.in_flight(1, 1), 0);
    assert_eq!(indexes.in_flight(1, 2), 0);
}

#[test]
fn test_entry_value() {
    assert_eq!(entry_value(None), Vec::<u8>::new());
    assert_eq!(entry_value(Some(7)), 7_i64.to_le_bytes().to_vec());
}
