//! Slice serialization: streaming node blobs to an output sink.
//!
//! The writer emits node blobs contiguously into a sink and returns
//! refs valid in the output space. Children are written before their
//! parents so ref slots can be patched to output offsets on the way
//! out; tagged integer slots pass through untouched. The output buffer
//! is itself a valid arena image: reserve 8 leading zero bytes and the
//! emitted root ref can be attached directly.

use bytes::{BufMut, BytesMut};
use strata_arena::{is_ref, Arena, Ref, HEADER_SIZE};
use strata_common::{Result, StrataError};

/// Byte sink consumed by the slice writer. `write_bytes` returns the
/// offset at which the blob landed, which doubles as its ref in the
/// output space.
pub trait OutputSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<u64>;
}

/// Growable in-memory sink whose finished buffer is attachable as an
/// arena image.
pub struct VecSink {
    buf: BytesMut,
}

impl VecSink {
    pub fn new() -> Self {
        let mut buf = BytesMut::new();
        // Reserve the null-ref slot, as the arena does.
        buf.put_bytes(0, 8);
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= 8
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

impl Default for VecSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for VecSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.buf.len() as u64;
        debug_assert!(offset % 8 == 0);
        self.buf.put_slice(bytes);
        let pad = (8 - self.buf.len() % 8) % 8;
        self.buf.put_bytes(0, pad);
        Ok(offset)
    }
}

/// Validates slice-write arguments against the column.
pub fn check_slice(offset: usize, size: usize, table_size: usize, column_size: usize) -> Result<()> {
    if table_size != column_size {
        return Err(StrataError::invariant(format!(
            "table size {table_size} disagrees with column size {column_size}"
        )));
    }
    if offset + size > column_size {
        return Err(StrataError::InvalidRange {
            begin: offset,
            end: offset + size,
            size: column_size,
        });
    }
    Ok(())
}

/// Writes the node at `r` and (for ref-bearing nodes) its whole subtree
/// into `sink`, children first. Returns the node's ref in the output
/// space.
pub fn write_node_deep(arena: &Arena, r: Ref, sink: &mut dyn OutputSink) -> Result<u64> {
    let header = arena.checked_header(r)?;
    if !header.has_refs() && !header.is_inner() {
        let blob = arena.with_node_blob(r, |blob| blob.to_vec());
        return sink.write_bytes(&blob);
    }

    // Rewrite each ref slot to the offset its child landed at.
    let slots = header.size as usize;
    let mut patched: Vec<(usize, u64)> = Vec::with_capacity(slots);
    for i in 0..slots {
        let v = arena.read_u64(r, i);
        if v != 0 && is_ref(v) {
            let out_ref = write_node_deep(arena, v, sink)?;
            patched.push((i, out_ref));
        }
    }
    let mut blob = arena.with_node_blob(r, |blob| blob.to_vec());
    for (slot, out_ref) in patched {
        let at = HEADER_SIZE + slot * 8;
        blob[at..at + 8].copy_from_slice(&out_ref.to_le_bytes());
    }
    sink.write_bytes(&blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::fixed;
    use strata_arena::FLAG_HAS_REFS;

    #[test]
    fn test_sink_offsets_aligned() {
        let mut sink = VecSink::new();
        let a = sink.write_bytes(&[1, 2, 3]).unwrap();
        let b = sink.write_bytes(&[4]).unwrap();
        assert_eq!(a, 8);
        assert_eq!(b % 8, 0);
        assert!(b > a);
    }

    #[test]
    fn test_write_plain_leaf_roundtrip() {
        let arena = Arena::new();
        let mut leaf = fixed::create(&arena, 0, 8).unwrap();
        for i in 0..5u64 {
            fixed::insert(&arena, &mut leaf, i as usize, &i.to_le_bytes()).unwrap();
        }
        let mut sink = VecSink::new();
        let out_ref = write_node_deep(&arena, leaf, &mut sink).unwrap();

        let reloaded = Arena::new();
        reloaded.attach_buffer(sink.into_vec()).unwrap();
        assert_eq!(fixed::size(&reloaded, out_ref), 5);
        for i in 0..5u64 {
            assert_eq!(fixed::get_u64(&reloaded, out_ref, i as usize), i);
        }
    }

    #[test]
    fn test_write_ref_node_patches_children() {
        let arena = Arena::new();
        let mut child = fixed::create(&arena, 0, 8).unwrap();
        fixed::insert(&arena, &mut child, 0, &77u64.to_le_bytes()).unwrap();

        let parent = arena.alloc(FLAG_HAS_REFS, 0, 16).unwrap();
        arena.write_u64(parent, 0, child);
        arena.write_u64(parent, 1, strata_arena::tag_int(5));
        arena.set_node_size(parent, 2);

        let mut sink = VecSink::new();
        let out_ref = write_node_deep(&arena, parent, &mut sink).unwrap();

        let reloaded = Arena::new();
        reloaded.attach_buffer(sink.into_vec()).unwrap();
        let out_child = reloaded.read_u64(out_ref, 0);
        assert_ne!(out_child, child, "child slot must be rewritten");
        assert_eq!(fixed::get_u64(&reloaded, out_child, 0), 77);
        // The tagged slot is passed through untouched.
        assert_eq!(reloaded.read_u64(out_ref, 1), strata_arena::tag_int(5));
    }
}
