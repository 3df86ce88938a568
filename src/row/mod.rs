//! Module `row` implement the column-wise row codec.
//!
//! Payload layout:
//!
//! ```text
//! ver(8 LE) | null-bitmap(ceil(ncols/8)) | cell(8) per column | var-region
//! ```
//!
//! `ver` is the version of the schema that authored the row; decoding
//! always happens under that version, however old, while new rows are
//! encoded under the latest version. Numeric cells hold the value in
//! little-endian; string cells hold `(offset u32, len u32)` into the
//! var-region. Null columns have their bitmap bit set and an all-zero
//! cell.

use std::{convert::TryInto, sync::Arc};

use crate::{
    expr::NullContext,
    schema::{Column, Schema, View},
    types::{SchemaId, Type, Value},
    Error, Result,
};

const CELL: usize = 8;

fn bitmap_len(ncols: usize) -> usize {
    (ncols + 7) / 8
}

/// Decode rows stored under any published version of their schema.
pub struct Reader {
    schema: Arc<Schema>,
    data: Vec<u8>,
}

impl Reader {
    /// Resolve the authoring schema from the version embedded in `data`
    /// and wrap the payload for column access.
    pub fn load(view: &View, id: SchemaId, data: Vec<u8>) -> Result<Reader> {
        check_remaining!(data, 8, "row-ver")?;
        let ver = u64::from_le_bytes(data[..8].try_into().unwrap());
        let schema = view.by_version(id, ver)?;

        let want = 8 + bitmap_len(schema.ncols()) + schema.ncols() * CELL;
        check_remaining!(data, want, "row-cells")?;
        Ok(Reader { schema, data })
    }

    pub fn as_schema(&self) -> &Schema {
        &self.schema
    }

    /// Value of column `col`, where `col` is the declaration from the
    /// schema the caller is materializing (typically the latest). In
    /// order of preference: the stored value, the column default under a
    /// null context, null; [Error::ReadPropFailed] when the column is
    /// absent, non-nullable and undefaulted.
    pub fn get(&self, col: &Column) -> Result<Value> {
        match self.schema.col(&col.name) {
            Some((pos, stored)) => self.stored_value(pos, stored),
            None => absent_value(col),
        }
    }

    /// Like [Reader::get] for a column known to exist in the authoring
    /// schema; used when walking the authoring schema itself.
    pub fn get_by_name(&self, name: &str) -> Result<Value> {
        match self.schema.col(name) {
            Some((pos, stored)) => self.stored_value(pos, stored),
            None => err_at!(ReadPropFailed, msg: "column {:?}", name),
        }
    }

    fn stored_value(&self, pos: usize, col: &Column) -> Result<Value> {
        let nb = bitmap_len(self.schema.ncols());
        if self.data[8 + pos / 8] & (1 << (pos % 8)) != 0 {
            return Ok(Value::Null);
        }
        let off = 8 + nb + pos * CELL;
        let cell: [u8; CELL] = self.data[off..off + CELL].try_into().unwrap();
        match col.typ {
            Type::Bool => Ok(Value::Bool(cell[0] != 0)),
            Type::Int => Ok(Value::Int(i64::from_le_bytes(cell))),
            Type::Float => Ok(Value::Float(f64::from_bits(u64::from_le_bytes(cell)))),
            Type::Str => {
                let var_start = 8 + nb + self.schema.ncols() * CELL;
                let s = u32::from_le_bytes(cell[..4].try_into().unwrap()) as usize;
                let l = u32::from_le_bytes(cell[4..].try_into().unwrap()) as usize;
                let (lo, hi) = (var_start + s, var_start + s + l);
                if hi > self.data.len() {
                    err_at!(DecodeFail, msg: "str cell {}..{}/{}", lo, hi, self.data.len())?;
                }
                let s = err_at!(DecodeFail, std::str::from_utf8(&self.data[lo..hi]))?;
                Ok(Value::Str(s.to_string()))
            }
        }
    }

    /// TTL anchor of this row, when its authoring schema declares one.
    pub fn ttl_anchor(&self) -> Result<Option<i64>> {
        match self.schema.as_ttl() {
            Some(ttl) => match self.get_by_name(&ttl.col)? {
                Value::Int(anchor) => Ok(Some(anchor)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Whether this row has outlived its TTL at wall-clock `now_secs`.
    /// Rows without a TTL, or with a null anchor, never expire.
    pub fn is_expired(&self, now_secs: i64) -> Result<bool> {
        let duration = match self.schema.as_ttl() {
            Some(ttl) => ttl.duration_secs,
            None => return Ok(false),
        };
        match self.ttl_anchor()? {
            Some(anchor) => Ok(anchor.saturating_add(duration) < now_secs),
            None => Ok(false),
        }
    }
}

fn absent_value(col: &Column) -> Result<Value> {
    if let Some(default) = &col.default {
        let val = match default.eval(&NullContext) {
            Ok(val) => val,
            Err(e) => err_at!(InvalidDefault, msg: "{:?}: {}", col.name, e)?,
        };
        return val.coerce_to(col.typ);
    }
    if col.nullable {
        Ok(Value::Null)
    } else {
        err_at!(ReadPropFailed, msg: "column {:?}", col.name)
    }
}

/// Encode a new row under the latest schema.
pub struct Writer {
    schema: Arc<Schema>,
    values: Vec<Option<Value>>,
}

impl Writer {
    pub fn new(schema: Arc<Schema>) -> Writer {
        let values = vec![None; schema.ncols()];
        Writer { schema, values }
    }

    /// Stage a value for column `name`, in any order. Unknown columns and
    /// type mismatches are refused.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let (pos, col) = match self.schema.col(name) {
            Some(found) => found,
            None => err_at!(InvalidFieldValue, msg: "unknown column {:?}", name)?,
        };
        if value.is_null() && !col.nullable {
            err_at!(InvalidFieldValue, msg: "null into non-nullable {:?}", name)?;
        }
        self.values[pos] = Some(value.coerce_to(col.typ)?);
        Ok(())
    }

    /// Resolve unset columns and produce the payload. Unset columns fall
    /// back to their default, then to null; a non-nullable undefaulted
    /// column left unset fails, as does an unset TTL column.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if let Some(ttl) = self.schema.as_ttl() {
            match self.schema.col(&ttl.col) {
                Some((pos, _)) if self.values[pos].is_some() => (),
                Some(_) => {
                    err_at!(InvalidFieldValue, msg: "ttl column {:?} not set", ttl.col)?
                }
                None => err_at!(Fatal, msg: "ttl column {:?} not in schema", ttl.col)?,
            }
        }

        let ncols = self.schema.ncols();
        let nb = bitmap_len(ncols);
        let mut data = vec![0; 8 + nb + ncols * CELL];
        data[..8].copy_from_slice(&self.schema.to_ver().to_le_bytes());
        let mut var: Vec<u8> = vec![];

        for (pos, col) in self.schema.as_cols().iter().enumerate() {
            let val = match self.values[pos].take() {
                Some(val) => val,
                None => absent_value(col).map_err(|e| match e {
                    Error::ReadPropFailed(p, m) => Error::NoDefaultAndNotNullable(p, m),
                    e => e,
                })?,
            };
            let off = 8 + nb + pos * CELL;
            match val {
                Value::Null => data[8 + pos / 8] |= 1 << (pos % 8),
                Value::Bool(v) => data[off] = v as u8,
                Value::Int(v) => data[off..off + CELL].copy_from_slice(&v.to_le_bytes()),
                Value::Float(v) => {
                    data[off..off + CELL].copy_from_slice(&v.to_bits().to_le_bytes())
                }
                Value::Str(v) => {
                    let cell_s = (var.len() as u32).to_le_bytes();
                    let cell_l = (v.len() as u32).to_le_bytes();
                    data[off..off + 4].copy_from_slice(&cell_s);
                    data[off + 4..off + CELL].copy_from_slice(&cell_l);
                    var.extend_from_slice(v.as_bytes());
                }
            }
        }

        data.extend_from_slice(&var);
        Ok(data)
    }
}
