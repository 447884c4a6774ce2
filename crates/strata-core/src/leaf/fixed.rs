//! Fixed-width leaf encoding.
//!
//! Cells are `width` bytes each, stored back to back in the node payload.
//! This encoding backs integer, bool and float leaves (width 8 / 1 / 8),
//! small-string leaves (width 16), ref leaves of sub-table and backlink
//! columns (width 8, `has_refs` set) and the slot array of big-blob
//! leaves. The node grows by reallocation; callers pass `&mut Ref` to
//! mutating operations and write the possibly-changed ref back into the
//! parent slot.

use crate::constants::{LEAF_INITIAL_CAPACITY, MAX_LEAF_SIZE};
use strata_arena::{Arena, Ref};
use strata_common::{Result, StrataError};

/// Creates an empty fixed-width leaf with the given header flags.
pub fn create(arena: &Arena, flags: u8, width: u8) -> Result<Ref> {
    arena.alloc(flags, width, LEAF_INITIAL_CAPACITY * width as usize)
}

/// Element count.
pub fn size(arena: &Arena, r: Ref) -> usize {
    arena.node_size(r)
}

/// Reads the cell at `ndx`.
pub fn get(arena: &Arena, r: Ref, ndx: usize) -> Vec<u8> {
    let width = arena.header(r).width as usize;
    arena.read_bytes(r, ndx * width, width)
}

/// Reads the cell at `ndx` as a little-endian u64 (width must be 8).
pub fn get_u64(arena: &Arena, r: Ref, ndx: usize) -> u64 {
    debug_assert_eq!(arena.header(r).width, 8);
    arena.read_u64(r, ndx)
}

/// Reads the cell at `ndx` as a single byte (width must be 1).
pub fn get_byte(arena: &Arena, r: Ref, ndx: usize) -> u8 {
    debug_assert_eq!(arena.header(r).width, 1);
    arena.read_bytes(r, ndx, 1)[0]
}

/// Overwrites the cell at `ndx`.
pub fn set(arena: &Arena, r: Ref, ndx: usize, cell: &[u8]) {
    let header = arena.header(r);
    debug_assert_eq!(cell.len(), header.width as usize);
    debug_assert!(ndx < header.size as usize);
    arena.write_bytes(r, ndx * cell.len(), cell);
}

/// Overwrites the cell at `ndx` with a little-endian u64.
pub fn set_u64(arena: &Arena, r: Ref, ndx: usize, value: u64) {
    debug_assert_eq!(arena.header(r).width, 8);
    debug_assert!(ndx < arena.node_size(r));
    arena.write_u64(r, ndx, value);
}

/// Inserts a cell at `ndx` (== size for append). Returns a new sibling
/// ref when the leaf was full and had to split: an append lands alone in
/// the sibling, an interior insert moves the suffix to the sibling and
/// appends the new cell to this leaf.
pub fn insert(arena: &Arena, r: &mut Ref, ndx: usize, cell: &[u8]) -> Result<Option<Ref>> {
    let header = arena.header(*r);
    let width = header.width as usize;
    debug_assert_eq!(cell.len(), width);
    let count = header.size as usize;
    debug_assert!(ndx <= count);

    if count < MAX_LEAF_SIZE {
        ensure_capacity(arena, r, (count + 1) * width)?;
        if ndx < count {
            arena.move_bytes(*r, ndx * width, (ndx + 1) * width, (count - ndx) * width);
        }
        arena.write_bytes(*r, ndx * width, cell);
        arena.set_node_size(*r, count + 1);
        return Ok(None);
    }

    // Full leaf: split.
    let sibling = arena.alloc(header.flags, header.width, LEAF_INITIAL_CAPACITY * width)?;
    let mut sib = sibling;
    if ndx == count {
        insert(arena, &mut sib, 0, cell)?;
    } else {
        let tail = count - ndx;
        ensure_capacity(arena, &mut sib, tail * width)?;
        let bytes = arena.read_bytes(*r, ndx * width, tail * width);
        arena.write_bytes(sib, 0, &bytes);
        arena.set_node_size(sib, tail);
        arena.set_node_size(*r, ndx);
        arena.write_bytes(*r, ndx * width, cell);
        arena.set_node_size(*r, ndx + 1);
    }
    Ok(Some(sib))
}

/// Removes the cell at `ndx`.
pub fn erase(arena: &Arena, r: Ref, ndx: usize) {
    let header = arena.header(r);
    let width = header.width as usize;
    let count = header.size as usize;
    debug_assert!(ndx < count);
    if ndx + 1 < count {
        arena.move_bytes(r, (ndx + 1) * width, ndx * width, (count - ndx - 1) * width);
    }
    arena.set_node_size(r, count - 1);
}

/// Resets the leaf to zero elements, keeping its allocation.
pub fn clear(arena: &Arena, r: Ref) {
    arena.set_node_size(r, 0);
}

/// Copies cells `[offset, offset + len)` into a fresh leaf in `target`.
pub fn slice(arena: &Arena, r: Ref, offset: usize, len: usize, target: &Arena) -> Result<Ref> {
    let header = arena.header(r);
    let width = header.width as usize;
    let count = header.size as usize;
    if offset + len > count {
        return Err(StrataError::InvalidRange {
            begin: offset,
            end: offset + len,
            size: count,
        });
    }
    let out = target.alloc(header.flags, header.width, (len.max(1)) * width)?;
    let bytes = arena.read_bytes(r, offset * width, len * width);
    target.write_bytes(out, 0, &bytes);
    target.set_node_size(out, len);
    Ok(out)
}

/// Grows the payload allocation to at least `needed` bytes, moving the
/// node if necessary. The caller's ref is updated in place.
pub fn ensure_capacity(arena: &Arena, r: &mut Ref, needed: usize) -> Result<()> {
    let header = arena.header(*r);
    if header.capacity_bytes() >= needed {
        return Ok(());
    }
    let width = header.width as usize;
    let mut new_cap = header.capacity_bytes().max(width) * 2;
    while new_cap < needed {
        new_cap *= 2;
    }
    new_cap = new_cap.min(MAX_LEAF_SIZE * width.max(1) * 2);
    let new_ref = arena.alloc(header.flags, header.width, new_cap.max(needed))?;
    let used = header.size as usize * width;
    if used > 0 {
        let bytes = arena.read_bytes(*r, 0, used);
        arena.write_bytes(new_ref, 0, &bytes);
    }
    arena.set_node_size(new_ref, header.size as usize);
    arena.free(*r);
    *r = new_ref;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_values(arena: &Arena, r: Ref) -> Vec<u64> {
        (0..size(arena, r)).map(|i| get_u64(arena, r, i)).collect()
    }

    #[test]
    fn test_insert_and_get() {
        let arena = Arena::new();
        let mut r = create(&arena, 0, 8).unwrap();
        for i in 0..20u64 {
            assert!(insert(&arena, &mut r, i as usize, &i.to_le_bytes()).unwrap().is_none());
        }
        assert_eq!(size(&arena, r), 20);
        assert_eq!(get_u64(&arena, r, 0), 0);
        assert_eq!(get_u64(&arena, r, 19), 19);
    }

    #[test]
    fn test_interior_insert_shifts() {
        let arena = Arena::new();
        let mut r = create(&arena, 0, 8).unwrap();
        for i in [1u64, 2, 4] {
            let pos = size(&arena, r);
            insert(&arena, &mut r, pos, &i.to_le_bytes()).unwrap();
        }
        insert(&arena, &mut r, 2, &3u64.to_le_bytes()).unwrap();
        assert_eq!(leaf_values(&arena, r), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_erase() {
        let arena = Arena::new();
        let mut r = create(&arena, 0, 8).unwrap();
        for i in 0..5u64 {
            insert(&arena, &mut r, i as usize, &i.to_le_bytes()).unwrap();
        }
        erase(&arena, r, 2);
        assert_eq!(leaf_values(&arena, r), vec![0, 1, 3, 4]);
        erase(&arena, r, 3);
        assert_eq!(leaf_values(&arena, r), vec![0, 1, 3]);
    }

    #[test]
    fn test_split_on_append() {
        let arena = Arena::new();
        let mut r = create(&arena, 0, 8).unwrap();
        for i in 0..MAX_LEAF_SIZE as u64 {
            assert!(insert(&arena, &mut r, i as usize, &i.to_le_bytes()).unwrap().is_none());
        }
        let sib = insert(&arena, &mut r, MAX_LEAF_SIZE, &9999u64.to_le_bytes())
            .unwrap()
            .expect("split expected");
        assert_eq!(size(&arena, r), MAX_LEAF_SIZE);
        assert_eq!(size(&arena, sib), 1);
        assert_eq!(get_u64(&arena, sib, 0), 9999);
    }

    #[test]
    fn test_split_interior() {
        let arena = Arena::new();
        let mut r = create(&arena, 0, 8).unwrap();
        for i in 0..MAX_LEAF_SIZE as u64 {
            insert(&arena, &mut r, i as usize, &i.to_le_bytes()).unwrap();
        }
        let sib = insert(&arena, &mut r, 10, &7777u64.to_le_bytes())
            .unwrap()
            .expect("split expected");
        assert_eq!(size(&arena, r), 11);
        assert_eq!(get_u64(&arena, r, 10), 7777);
        assert_eq!(size(&arena, sib), MAX_LEAF_SIZE - 10);
        assert_eq!(get_u64(&arena, sib, 0), 10);
    }

    #[test]
    fn test_byte_width_cells() {
        let arena = Arena::new();
        let mut r = create(&arena, 0, 1).unwrap();
        insert(&arena, &mut r, 0, &[1]).unwrap();
        insert(&arena, &mut r, 1, &[0]).unwrap();
        insert(&arena, &mut r, 2, &[1]).unwrap();
        assert_eq!(get_byte(&arena, r, 0), 1);
        assert_eq!(get_byte(&arena, r, 1), 0);
        assert_eq!(get_byte(&arena, r, 2), 1);
    }

    #[test]
    fn test_slice() {
        let arena = Arena::new();
        let target = Arena::new();
        let mut r = create(&arena, 0, 8).unwrap();
        for i in 0..10u64 {
            insert(&arena, &mut r, i as usize, &i.to_le_bytes()).unwrap();
        }
        let out = slice(&arena, r, 3, 4, &target).unwrap();
        assert_eq!(size(&target, out), 4);
        assert_eq!(get_u64(&target, out, 0), 3);
        assert_eq!(get_u64(&target, out, 3), 6);
    }

    #[test]
    fn test_slice_out_of_range() {
        let arena = Arena::new();
        let mut r = create(&arena, 0, 8).unwrap();
        insert(&arena, &mut r, 0, &1u64.to_le_bytes()).unwrap();
        assert!(slice(&arena, r, 0, 2, &arena).is_err());
    }
}
