// A disjoint range of object identifiers owned by one peer.
//
// The hub partitions a single increasing id counter into `IdBlock`s (see
// `tandem_hub::id_alloc`). A peer generates ids by advancing `cursor` within
// its block; blocks never overlap, so no two peers ever mint the same id.
// Running past `range_size` is the owner's problem: `next_id` returns `None`
// and the peer must ask the hub for a fresh block before that happens.
//
// Wire layout: range_start:i32, range_size:i32, owning_unit:i32, cursor:i32.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::DecodeError;
use crate::types::UnitId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdBlock {
    pub range_start: i32,
    pub range_size: i32,
    pub owning_unit: UnitId,
    pub cursor: i32,
}

impl IdBlock {
    pub fn new(range_start: i32, range_size: i32, owning_unit: UnitId) -> Self {
        Self {
            range_start,
            range_size,
            owning_unit,
            cursor: 0,
        }
    }

    /// One past the last id in this block.
    pub fn range_end(&self) -> i32 {
        self.range_start.saturating_add(self.range_size)
    }

    pub fn contains(&self, id: i32) -> bool {
        id >= self.range_start && id < self.range_end()
    }

    pub fn remaining(&self) -> i32 {
        (self.range_size - self.cursor).max(0)
    }

    /// Hands out the next id, or `None` once the block is used up.
    pub fn next_id(&mut self) -> Option<i32> {
        if self.cursor >= self.range_size {
            return None;
        }
        let id = self.range_start + self.cursor;
        self.cursor += 1;
        Some(id)
    }

    pub fn encode_into(&self, w: &mut ByteWriter) {
        w.write_i32(self.range_start)
            .write_i32(self.range_size)
            .write_i32(self.owning_unit.0)
            .write_i32(self.cursor);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.encode_into(&mut w);
        w.into_bytes()
    }

    pub fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            range_start: r.read_i32()?,
            range_size: r.read_i32()?,
            owning_unit: UnitId(r.read_i32()?),
            cursor: r.read_i32()?,
        })
    }
}
