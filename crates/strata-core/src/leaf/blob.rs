//! Big-blob leaf encoding: one allocation per value.
//!
//! The leaf is a fixed-width ref array (`has_refs` and the context flag
//! both set): slot `i` holds the ref of a standalone blob node carrying
//! element `i`'s bytes, or 0 for a null element. Values of any size fit;
//! this is the terminal encoding of both upgrade chains.

use crate::leaf::fixed;
use strata_arena::{Arena, Ref, FLAG_CONTEXT, FLAG_HAS_REFS};
use strata_common::Result;

/// Creates an empty big-blob leaf.
pub fn create(arena: &Arena) -> Result<Ref> {
    fixed::create(arena, FLAG_HAS_REFS | FLAG_CONTEXT, 8)
}

fn alloc_blob(arena: &Arena, data: &[u8]) -> Result<Ref> {
    let blob = arena.alloc(0, 0, data.len().max(8))?;
    arena.write_bytes(blob, 0, data);
    arena.set_node_size(blob, data.len());
    Ok(blob)
}

pub fn size(arena: &Arena, r: Ref) -> usize {
    fixed::size(arena, r)
}

/// Reads element `ndx`; None for a null element.
pub fn get(arena: &Arena, r: Ref, ndx: usize) -> Option<Vec<u8>> {
    let blob = fixed::get_u64(arena, r, ndx);
    if blob == 0 {
        return None;
    }
    let len = arena.node_size(blob);
    Some(arena.read_bytes(blob, 0, len))
}

/// Overwrites element `ndx`, freeing the previous blob.
pub fn set(arena: &Arena, r: Ref, ndx: usize, value: Option<&[u8]>) -> Result<()> {
    let old = fixed::get_u64(arena, r, ndx);
    let new = match value {
        Some(data) => alloc_blob(arena, data)?,
        None => 0,
    };
    fixed::set_u64(arena, r, ndx, new);
    if old != 0 {
        arena.free(old);
    }
    Ok(())
}

/// Inserts an element at `ndx`; returns a sibling ref on split.
pub fn insert(arena: &Arena, r: &mut Ref, ndx: usize, value: Option<&[u8]>) -> Result<Option<Ref>> {
    let blob = match value {
        Some(data) => alloc_blob(arena, data)?,
        None => 0,
    };
    fixed::insert(arena, r, ndx, &blob.to_le_bytes())
}

/// Removes element `ndx`, freeing its blob.
pub fn erase(arena: &Arena, r: Ref, ndx: usize) {
    let blob = fixed::get_u64(arena, r, ndx);
    if blob != 0 {
        arena.free(blob);
    }
    fixed::erase(arena, r, ndx);
}

/// Resets the leaf to zero elements, freeing every blob.
pub fn clear(arena: &Arena, r: Ref) {
    let count = size(arena, r);
    for i in 0..count {
        let blob = fixed::get_u64(arena, r, i);
        if blob != 0 {
            arena.free(blob);
        }
    }
    fixed::clear(arena, r);
}

/// Copies elements `[offset, offset + len)` into a fresh leaf in `target`,
/// deep-copying the blobs.
pub fn slice(arena: &Arena, r: Ref, offset: usize, len: usize, target: &Arena) -> Result<Ref> {
    let mut out = create(target)?;
    for i in 0..len {
        let elem = get(arena, r, offset + i);
        insert(target, &mut out, i, elem.as_deref())?;
    }
    Ok(out)
}
