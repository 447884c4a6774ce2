//! Indirect leaf encoding: an offsets child plus a bytes child.
//!
//! The leaf node itself holds exactly two ref slots (`has_refs` set, no
//! context flag): the first points at a fixed-width node of per-element
//! end offsets, the second at a raw byte node with the concatenated
//! payloads. Element `i` occupies `[end(i-1), end(i))` of the byte node.
//! Bit 63 of an end offset marks a null element (its range is empty).
//!
//! Medium strings (16..=63 bytes) and small binaries (<= 64 bytes) use
//! this encoding.

use crate::constants::{LEAF_INITIAL_CAPACITY, MAX_LEAF_SIZE};
use crate::leaf::fixed;
use strata_arena::{Arena, Ref, FLAG_HAS_REFS};
use strata_common::Result;

const NULL_BIT: u64 = 1 << 63;
const OFF_MASK: u64 = NULL_BIT - 1;

/// Creates an empty indirect leaf.
pub fn create(arena: &Arena) -> Result<Ref> {
    let offsets = fixed::create(arena, 0, 8)?;
    let bytes = arena.alloc(0, 0, LEAF_INITIAL_CAPACITY * 8)?;
    let node = arena.alloc(FLAG_HAS_REFS, 0, 16)?;
    arena.write_u64(node, 0, offsets);
    arena.write_u64(node, 1, bytes);
    arena.set_node_size(node, 2);
    Ok(node)
}

fn offsets_ref(arena: &Arena, r: Ref) -> Ref {
    arena.read_u64(r, 0)
}

fn bytes_ref(arena: &Arena, r: Ref) -> Ref {
    arena.read_u64(r, 1)
}

/// Element count.
pub fn size(arena: &Arena, r: Ref) -> usize {
    fixed::size(arena, offsets_ref(arena, r))
}

/// Byte range and null flag of element `ndx`.
fn elem_range(arena: &Arena, offsets: Ref, ndx: usize) -> (usize, usize, bool) {
    let start = if ndx == 0 {
        0
    } else {
        (fixed::get_u64(arena, offsets, ndx - 1) & OFF_MASK) as usize
    };
    let raw = fixed::get_u64(arena, offsets, ndx);
    ((start), (raw & OFF_MASK) as usize, raw & NULL_BIT != 0)
}

/// Reads element `ndx`; None for a null element.
pub fn get(arena: &Arena, r: Ref, ndx: usize) -> Option<Vec<u8>> {
    let offsets = offsets_ref(arena, r);
    let (start, end, is_null) = elem_range(arena, offsets, ndx);
    if is_null {
        return None;
    }
    Some(arena.read_bytes(bytes_ref(arena, r), start, end - start))
}

/// Total payload bytes in use.
fn bytes_used(arena: &Arena, r: Ref) -> usize {
    arena.node_size(bytes_ref(arena, r))
}

/// Grows the byte child to hold at least `needed` bytes, rewiring the
/// leaf's second slot if the child moved.
fn ensure_bytes_capacity(arena: &Arena, r: Ref, needed: usize) -> Result<()> {
    let old = bytes_ref(arena, r);
    let header = arena.header(old);
    if header.capacity_bytes() >= needed {
        return Ok(());
    }
    let mut cap = header.capacity_bytes().max(8) * 2;
    while cap < needed {
        cap *= 2;
    }
    let new = arena.alloc(0, 0, cap)?;
    let used = header.size as usize;
    if used > 0 {
        let data = arena.read_bytes(old, 0, used);
        arena.write_bytes(new, 0, &data);
    }
    arena.set_node_size(new, used);
    arena.free(old);
    arena.write_u64(r, 1, new);
    Ok(())
}

/// Shifts the end offsets of elements `[from, count)` by `delta`,
/// preserving their null bits.
fn shift_offsets(arena: &Arena, offsets: Ref, from: usize, delta: isize) {
    if delta == 0 {
        return;
    }
    let count = fixed::size(arena, offsets);
    for i in from..count {
        let raw = fixed::get_u64(arena, offsets, i);
        let shifted = ((raw & OFF_MASK) as i64 + delta as i64) as u64;
        fixed::set_u64(arena, offsets, i, shifted | (raw & NULL_BIT));
    }
}

/// Overwrites element `ndx`.
pub fn set(arena: &Arena, r: Ref, ndx: usize, value: Option<&[u8]>) -> Result<()> {
    let offsets = offsets_ref(arena, r);
    let (start, end, _) = elem_range(arena, offsets, ndx);
    let old_len = end - start;
    let data = value.unwrap_or(&[]);
    let delta = data.len() as isize - old_len as isize;

    let used = bytes_used(arena, r);
    if delta > 0 {
        ensure_bytes_capacity(arena, r, used + delta as usize)?;
    }
    let bytes = bytes_ref(arena, r);
    if delta != 0 && end < used {
        arena.move_bytes(bytes, end, (end as isize + delta) as usize, used - end);
    }
    arena.write_bytes(bytes, start, data);
    arena.set_node_size(bytes, (used as isize + delta) as usize);

    let null_bit = if value.is_none() { NULL_BIT } else { 0 };
    fixed::set_u64(arena, offsets, ndx, (start + data.len()) as u64 | null_bit);
    shift_offsets(arena, offsets, ndx + 1, delta);
    Ok(())
}

/// Inserts an element at `ndx` (== size for append). Returns a sibling
/// leaf ref when this leaf was full.
pub fn insert(arena: &Arena, r: &mut Ref, ndx: usize, value: Option<&[u8]>) -> Result<Option<Ref>> {
    let count = size(arena, *r);
    debug_assert!(ndx <= count);

    if count >= MAX_LEAF_SIZE {
        let sibling = create(arena)?;
        let mut sib = sibling;
        if ndx == count {
            insert(arena, &mut sib, 0, value)?;
        } else {
            // Move the suffix to the sibling, then append here.
            for i in ndx..count {
                let elem = get(arena, *r, i);
                let sib_len = size(arena, sib);
                insert(arena, &mut sib, sib_len, elem.as_deref())?;
            }
            truncate(arena, *r, ndx);
            insert(arena, r, ndx, value)?;
        }
        return Ok(Some(sib));
    }

    let offsets = offsets_ref(arena, *r);
    let start = if ndx == 0 {
        0
    } else {
        (fixed::get_u64(arena, offsets, ndx - 1) & OFF_MASK) as usize
    };
    let data = value.unwrap_or(&[]);
    let used = bytes_used(arena, *r);
    ensure_bytes_capacity(arena, *r, used + data.len())?;
    let bytes = bytes_ref(arena, *r);
    if start < used {
        arena.move_bytes(bytes, start, start + data.len(), used - start);
    }
    arena.write_bytes(bytes, start, data);
    arena.set_node_size(bytes, used + data.len());

    let null_bit = if value.is_none() { NULL_BIT } else { 0 };
    let mut offsets_mut = offsets;
    fixed::insert(
        arena,
        &mut offsets_mut,
        ndx,
        &((start + data.len()) as u64 | null_bit).to_le_bytes(),
    )?;
    if offsets_mut != offsets {
        arena.write_u64(*r, 0, offsets_mut);
    }
    shift_offsets(arena, offsets_mut, ndx + 1, data.len() as isize);
    Ok(None)
}

/// Removes element `ndx`.
pub fn erase(arena: &Arena, r: Ref, ndx: usize) {
    let offsets = offsets_ref(arena, r);
    let (start, end, _) = elem_range(arena, offsets, ndx);
    let len = end - start;
    let used = bytes_used(arena, r);
    let bytes = bytes_ref(arena, r);
    if end < used {
        arena.move_bytes(bytes, end, start, used - end);
    }
    arena.set_node_size(bytes, used - len);
    fixed::erase(arena, offsets, ndx);
    shift_offsets(arena, offsets, ndx, -(len as isize));
}

/// Drops elements `[keep, count)`.
fn truncate(arena: &Arena, r: Ref, keep: usize) {
    let offsets = offsets_ref(arena, r);
    let new_used = if keep == 0 {
        0
    } else {
        (fixed::get_u64(arena, offsets, keep - 1) & OFF_MASK) as usize
    };
    arena.set_node_size(bytes_ref(arena, r), new_used);
    arena.set_node_size(offsets, keep);
}

/// Resets the leaf to zero elements.
pub fn clear(arena: &Arena, r: Ref) {
    truncate(arena, r, 0);
}

/// Copies elements `[offset, offset + len)` into a fresh leaf in `target`.
pub fn slice(arena: &Arena, r: Ref, offset: usize, len: usize, target: &Arena) -> Result<Ref> {
    let mut out = create(target)?;
    for i in 0..len {
        let elem = get(arena, r, offset + i);
        insert(target, &mut out, i, elem.as_deref())?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let arena = Arena::new();
        let mut r = create(&arena).unwrap();
        insert(&arena, &mut r, 0, Some(b"a longer value than fifteen")).unwrap();
        insert(&arena, &mut r, 1, Some(b"")).unwrap();
        insert(&arena, &mut r, 2, None).unwrap();
        assert_eq!(size(&arena, r), 3);
        assert_eq!(get(&arena, r, 0).as_deref(), Some(&b"a longer value than fifteen"[..]));
        assert_eq!(get(&arena, r, 1).as_deref(), Some(&b""[..]));
        assert_eq!(get(&arena, r, 2), None);
    }

    #[test]
    fn test_interior_insert() {
        let arena = Arena::new();
        let mut r = create(&arena).unwrap();
        insert(&arena, &mut r, 0, Some(b"first")).unwrap();
        insert(&arena, &mut r, 1, Some(b"third")).unwrap();
        insert(&arena, &mut r, 1, Some(b"second-second-second")).unwrap();
        assert_eq!(get(&arena, r, 0).as_deref(), Some(&b"first"[..]));
        assert_eq!(get(&arena, r, 1).as_deref(), Some(&b"second-second-second"[..]));
        assert_eq!(get(&arena, r, 2).as_deref(), Some(&b"third"[..]));
    }

    #[test]
    fn test_set_grows_and_shrinks() {
        let arena = Arena::new();
        let mut r = create(&arena).unwrap();
        insert(&arena, &mut r, 0, Some(b"aa")).unwrap();
        insert(&arena, &mut r, 1, Some(b"bb")).unwrap();
        insert(&arena, &mut r, 2, Some(b"cc")).unwrap();

        set(&arena, r, 1, Some(b"a much longer replacement value")).unwrap();
        assert_eq!(get(&arena, r, 0).as_deref(), Some(&b"aa"[..]));
        assert_eq!(
            get(&arena, r, 1).as_deref(),
            Some(&b"a much longer replacement value"[..])
        );
        assert_eq!(get(&arena, r, 2).as_deref(), Some(&b"cc"[..]));

        set(&arena, r, 1, Some(b"x")).unwrap();
        assert_eq!(get(&arena, r, 1).as_deref(), Some(&b"x"[..]));
        assert_eq!(get(&arena, r, 2).as_deref(), Some(&b"cc"[..]));
    }

    #[test]
    fn test_set_null_keeps_neighbors() {
        let arena = Arena::new();
        let mut r = create(&arena).unwrap();
        insert(&arena, &mut r, 0, Some(b"left")).unwrap();
        insert(&arena, &mut r, 1, Some(b"mid")).unwrap();
        insert(&arena, &mut r, 2, Some(b"right")).unwrap();
        set(&arena, r, 1, None).unwrap();
        assert_eq!(get(&arena, r, 1), None);
        assert_eq!(get(&arena, r, 0).as_deref(), Some(&b"left"[..]));
        assert_eq!(get(&arena, r, 2).as_deref(), Some(&b"right"[..]));
    }

    #[test]
    fn test_erase_middle() {
        let arena = Arena::new();
        let mut r = create(&arena).unwrap();
        insert(&arena, &mut r, 0, Some(b"one")).unwrap();
        insert(&arena, &mut r, 1, Some(b"two")).unwrap();
        insert(&arena, &mut r, 2, Some(b"three")).unwrap();
        erase(&arena, r, 1);
        assert_eq!(size(&arena, r), 2);
        assert_eq!(get(&arena, r, 0).as_deref(), Some(&b"one"[..]));
        assert_eq!(get(&arena, r, 1).as_deref(), Some(&b"three"[..]));
    }

    #[test]
    fn test_clear() {
        let arena = Arena::new();
        let mut r = create(&arena).unwrap();
        insert(&arena, &mut r, 0, Some(b"value")).unwrap();
        clear(&arena, r);
        assert_eq!(size(&arena, r), 0);
        insert(&arena, &mut r, 0, Some(b"fresh")).unwrap();
        assert_eq!(get(&arena, r, 0).as_deref(), Some(&b"fresh"[..]));
    }

    #[test]
    fn test_slice() {
        let arena = Arena::new();
        let target = Arena::new();
        let mut r = create(&arena).unwrap();
        for i in 0..6 {
            let v = format!("value-number-{i}");
            insert(&arena, &mut r, i, Some(v.as_bytes())).unwrap();
        }
        let out = slice(&arena, r, 2, 3, &target).unwrap();
        assert_eq!(size(&target, out), 3);
        assert_eq!(get(&target, out, 0).as_deref(), Some(&b"value-number-2"[..]));
        assert_eq!(get(&target, out, 2).as_deref(), Some(&b"value-number-4"[..]));
    }
}
