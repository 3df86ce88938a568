//! Module `keys` implement the on-disk key layouts for vertex rows, edge
//! rows, secondary-index entries and operation-log records.
//!
//! Layouts are stable, changing them is a format break. Multi-byte
//! integers are little-endian, except the edge ranking and the index
//! cells, which are big-endian and sign-biased so that lexicographic
//! order equals numeric order. In every layout `part_id` comes right
//! after the marker byte, ahead of any variable-length tail, so that a
//! partition can be prefix-scanned.

use std::convert::TryInto;

use crate::{
    types::{EdgeType, PartId, TagId},
    Error, Result,
};

pub const TAG_MARKER: u8 = 0x01;
pub const EDGE_MARKER: u8 = 0x02;
pub const INDEX_MARKER: u8 = 0x03;
pub const OPLOG_MARKER: u8 = 0x04;

const OPLOG_DELETE: u8 = 0x01;
const OPLOG_MODIFY: u8 = 0x02;

const EDGE_KEY_PLACEHOLDER: u8 = 0x00;

const RANK_SIGN_MASK: u64 = 0x8000_0000_0000_0000;

// part-id is serialized as 3 bytes.
const MAX_PART_ID: u32 = 0x00FF_FFFF;

fn push_part(buf: &mut Vec<u8>, part: PartId) -> Result<()> {
    if part > MAX_PART_ID {
        err_at!(InvalidInput, msg: "part-id {} exceeds 24 bits", part)?;
    }
    buf.extend_from_slice(&part.to_le_bytes()[..3]);
    Ok(())
}

fn take_part(buf: &[u8]) -> PartId {
    u32::from_le_bytes([buf[0], buf[1], buf[2], 0])
}

/// Zero-pad `vid` to the space's fixed vid-length. Longer vids are
/// refused.
pub fn pad_vid(vid: &[u8], vid_len: usize) -> Result<Vec<u8>> {
    if vid.len() > vid_len {
        err_at!(InvalidInput, msg: "vid {} bytes exceeds vid_len {}", vid.len(), vid_len)
    } else {
        let mut out = vid.to_vec();
        out.resize(vid_len, 0);
        Ok(out)
    }
}

/// Bias `rank` so that its big-endian bytes sort numerically.
pub fn rank_cell(rank: i64) -> [u8; 8] {
    ((rank as u64) ^ RANK_SIGN_MASK).to_be_bytes()
}

fn rank_from_cell(cell: &[u8]) -> i64 {
    let bits = u64::from_be_bytes(cell.try_into().unwrap());
    (bits ^ RANK_SIGN_MASK) as i64
}

/// Encode a vertex row key:
/// `tag_marker(1) | part_id(3) | vid(vid_len) | tag_id(4)`.
pub fn vertex_key(part: PartId, vid: &[u8], vid_len: usize, tag: TagId) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(1 + 3 + vid_len + 4);
    key.push(TAG_MARKER);
    push_part(&mut key, part)?;
    key.extend_from_slice(&pad_vid(vid, vid_len)?);
    key.extend_from_slice(&tag.to_le_bytes());
    Ok(key)
}

/// Encode an edge row key:
/// `edge_marker(1) | part_id(3) | src(vid_len) | edge_type(4) |
/// ranking(8, biased BE) | dst(vid_len) | placeholder(1)`.
pub fn edge_key(
    part: PartId,
    vid_len: usize,
    src: &[u8],
    etype: EdgeType,
    rank: i64,
    dst: &[u8],
) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(1 + 3 + vid_len + 4 + 8 + vid_len + 1);
    key.push(EDGE_MARKER);
    push_part(&mut key, part)?;
    key.extend_from_slice(&pad_vid(src, vid_len)?);
    key.extend_from_slice(&etype.to_le_bytes());
    key.extend_from_slice(&rank_cell(rank));
    key.extend_from_slice(&pad_vid(dst, vid_len)?);
    key.push(EDGE_KEY_PLACEHOLDER);
    Ok(key)
}

/// Encode a secondary-index entry key:
/// `index_marker(1) | part_id(3) | index_id(4) | cells | primary-identity`.
pub fn index_key(part: PartId, index: u32, cells: &[u8], primary: &[u8]) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(1 + 3 + 4 + cells.len() + primary.len());
    key.push(INDEX_MARKER);
    push_part(&mut key, part)?;
    key.extend_from_slice(&index.to_le_bytes());
    key.extend_from_slice(cells);
    key.extend_from_slice(primary);
    Ok(key)
}

/// Prefix under which every entry of index `index` in `part` lives.
pub fn index_prefix(part: PartId, index: u32) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(1 + 3 + 4);
    key.push(INDEX_MARKER);
    push_part(&mut key, part)?;
    key.extend_from_slice(&index.to_le_bytes());
    Ok(key)
}

/// Key of a delete-operation log record; `seq` keeps records within a
/// partition unique and replay-ordered.
pub fn delete_oplog_key(part: PartId, seq: u64) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(1 + 3 + 1 + 8);
    key.push(OPLOG_MARKER);
    push_part(&mut key, part)?;
    key.push(OPLOG_DELETE);
    key.extend_from_slice(&seq.to_be_bytes());
    Ok(key)
}

/// Key of a modify-operation log record, embedding the index key that the
/// rebuild subsystem must re-apply.
pub fn modify_oplog_key(part: PartId, index_key: &[u8]) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(1 + 3 + 1 + index_key.len());
    key.push(OPLOG_MARKER);
    push_part(&mut key, part)?;
    key.push(OPLOG_MODIFY);
    key.extend_from_slice(index_key);
    Ok(key)
}

/// Prefix under which all operation-log records of `part` live. The
/// rebuild subsystem scans this.
pub fn oplog_prefix(part: PartId) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(1 + 3);
    key.push(OPLOG_MARKER);
    push_part(&mut key, part)?;
    Ok(key)
}

/// Parsed form of a vertex row key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VertexKey {
    pub part: PartId,
    pub vid: Vec<u8>,
    pub tag: TagId,
}

/// Parsed form of an edge row key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EdgeKey {
    pub part: PartId,
    pub src: Vec<u8>,
    pub etype: EdgeType,
    pub rank: i64,
    pub dst: Vec<u8>,
}

pub fn parse_vertex_key(vid_len: usize, key: &[u8]) -> Result<VertexKey> {
    check_remaining!(key, 1 + 3 + vid_len + 4, "vertex-key")?;
    if key[0] != TAG_MARKER {
        err_at!(DecodeFail, msg: "vertex-key marker {:x}", key[0])?;
    }
    let part = take_part(&key[1..4]);
    let vid = key[4..4 + vid_len].to_vec();
    let n = 4 + vid_len;
    let tag = u32::from_le_bytes(key[n..n + 4].try_into().unwrap());
    Ok(VertexKey { part, vid, tag })
}

pub fn parse_edge_key(vid_len: usize, key: &[u8]) -> Result<EdgeKey> {
    check_remaining!(key, 1 + 3 + vid_len + 4 + 8 + vid_len + 1, "edge-key")?;
    if key[0] != EDGE_MARKER {
        err_at!(DecodeFail, msg: "edge-key marker {:x}", key[0])?;
    }
    let part = take_part(&key[1..4]);
    let mut n = 4;
    let src = key[n..n + vid_len].to_vec();
    n += vid_len;
    let etype = i32::from_le_bytes(key[n..n + 4].try_into().unwrap());
    n += 4;
    let rank = rank_from_cell(&key[n..n + 8]);
    n += 8;
    let dst = key[n..n + vid_len].to_vec();
    Ok(EdgeKey {
        part,
        src,
        etype,
        rank,
        dst,
    })
}

/// Primary identity of a vertex row, as embedded at the tail of its
/// index entries.
pub fn vertex_identity(vid: &[u8], vid_len: usize) -> Result<Vec<u8>> {
    pad_vid(vid, vid_len)
}

/// Primary identity of an edge row, as embedded at the tail of its index
/// entries: `src | ranking(biased BE) | dst`.
pub fn edge_identity(vid_len: usize, src: &[u8], rank: i64, dst: &[u8]) -> Result<Vec<u8>> {
    let mut id = Vec::with_capacity(vid_len + 8 + vid_len);
    id.extend_from_slice(&pad_vid(src, vid_len)?);
    id.extend_from_slice(&rank_cell(rank));
    id.extend_from_slice(&pad_vid(dst, vid_len)?);
    Ok(id)
}

#[cfg(test)]
#[path = "keys_test.rs"]
mod keys_test;
