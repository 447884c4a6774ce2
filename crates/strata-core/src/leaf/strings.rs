//! Small-string leaf encoding.
//!
//! Strings up to 15 bytes are stored in fixed 16-byte cells: the payload
//! padded with zeros, followed by one length byte. Length byte 0xFF
//! marks a null cell. Longer values require an upgrade to the medium or
//! big encoding; this module never stores them.

use crate::constants::SMALL_STRING_MAX;
use crate::leaf::fixed;
use strata_arena::{Arena, Ref};
use strata_common::Result;

const CELL: usize = 16;
const NULL_LEN: u8 = 0xFF;

fn encode_cell(value: Option<&str>) -> [u8; CELL] {
    let mut cell = [0u8; CELL];
    match value {
        Some(s) => {
            debug_assert!(s.len() <= SMALL_STRING_MAX);
            cell[..s.len()].copy_from_slice(s.as_bytes());
            cell[CELL - 1] = s.len() as u8;
        }
        None => cell[CELL - 1] = NULL_LEN,
    }
    cell
}

fn decode_cell(cell: &[u8]) -> Option<String> {
    let len = cell[CELL - 1];
    if len == NULL_LEN {
        return None;
    }
    Some(String::from_utf8_lossy(&cell[..len as usize]).into_owned())
}

/// Returns true if `value` fits a small-string cell.
pub fn fits(value: Option<&str>) -> bool {
    value.map_or(true, |s| s.len() <= SMALL_STRING_MAX)
}

/// Creates an empty small-string leaf.
pub fn create(arena: &Arena) -> Result<Ref> {
    fixed::create(arena, 0, CELL as u8)
}

pub fn size(arena: &Arena, r: Ref) -> usize {
    fixed::size(arena, r)
}

pub fn get(arena: &Arena, r: Ref, ndx: usize) -> Option<String> {
    decode_cell(&fixed::get(arena, r, ndx))
}

pub fn set(arena: &Arena, r: Ref, ndx: usize, value: Option<&str>) {
    fixed::set(arena, r, ndx, &encode_cell(value));
}

pub fn insert(arena: &Arena, r: &mut Ref, ndx: usize, value: Option<&str>) -> Result<Option<Ref>> {
    fixed::insert(arena, r, ndx, &encode_cell(value))
}

pub fn erase(arena: &Arena, r: Ref, ndx: usize) {
    fixed::erase(arena, r, ndx);
}

pub fn clear(arena: &Arena, r: Ref) {
    fixed::clear(arena, r);
}

pub fn slice(arena: &Arena, r: Ref, offset: usize, len: usize, target: &Arena) -> Result<Ref> {
    fixed::slice(arena, r, offset, len, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let arena = Arena::new();
        let mut r = create(&arena).unwrap();
        insert(&arena, &mut r, 0, Some("hello")).unwrap();
        insert(&arena, &mut r, 1, Some("")).unwrap();
        insert(&arena, &mut r, 2, None).unwrap();
        insert(&arena, &mut r, 3, Some("fifteen-bytes!!")).unwrap();

        assert_eq!(size(&arena, r), 4);
        assert_eq!(get(&arena, r, 0).as_deref(), Some("hello"));
        assert_eq!(get(&arena, r, 1).as_deref(), Some(""));
        assert_eq!(get(&arena, r, 2), None);
        assert_eq!(get(&arena, r, 3).as_deref(), Some("fifteen-bytes!!"));
    }

    #[test]
    fn test_empty_and_null_distinct() {
        let arena = Arena::new();
        let mut r = create(&arena).unwrap();
        insert(&arena, &mut r, 0, Some("")).unwrap();
        insert(&arena, &mut r, 1, None).unwrap();
        assert!(get(&arena, r, 0).is_some());
        assert!(get(&arena, r, 1).is_none());
    }

    #[test]
    fn test_set_overwrites() {
        let arena = Arena::new();
        let mut r = create(&arena).unwrap();
        insert(&arena, &mut r, 0, Some("abc")).unwrap();
        set(&arena, r, 0, Some("xyz"));
        assert_eq!(get(&arena, r, 0).as_deref(), Some("xyz"));
        set(&arena, r, 0, None);
        assert_eq!(get(&arena, r, 0), None);
    }

    #[test]
    fn test_fits() {
        assert!(fits(Some("123456789012345")));
        assert!(!fits(Some("1234567890123456")));
        assert!(fits(None));
    }
}
