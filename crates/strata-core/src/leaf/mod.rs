//! Leaf encodings and the upgrade protocol.
//!
//! A leaf's encoding is discovered from its header flag bits alone (plus
//! the cell width for fixed-width leaves); no typed pointer is kept. The
//! dispatchers in this module read the bits once and route to the
//! encoding modules. String and binary leaves upgrade to a wider
//! encoding when a value outgrows the current one; downgrades never
//! happen.

pub mod blob;
pub mod fixed;
pub mod indirect;
pub mod strings;

use crate::constants::{MEDIUM_STRING_MAX, SMALL_BINARY_MAX, SMALL_STRING_MAX};
use strata_arena::{Arena, NodeKind, Ref, FLAG_HAS_REFS};
use strata_common::{Result, StrataError};
use tracing::debug;

/// Creates a fixed-width leaf whose slots are refs (sub-table and
/// backlink columns).
pub fn create_ref_leaf(arena: &Arena) -> Result<Ref> {
    fixed::create(arena, FLAG_HAS_REFS, 8)
}

// =============================================================================
// String leaves
// =============================================================================

/// String leaf encodings, ordered by the upgrade chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StringLeafType {
    Small,
    Medium,
    Big,
}

/// Classifies a string leaf from its header bits.
pub fn string_leaf_type(arena: &Arena, r: Ref) -> Result<StringLeafType> {
    match arena.header(r).kind() {
        NodeKind::SmallLeaf => Ok(StringLeafType::Small),
        NodeKind::IndirectLeaf => Ok(StringLeafType::Medium),
        NodeKind::BigLeaf => Ok(StringLeafType::Big),
        NodeKind::Inner => Err(StrataError::NodeCorrupted {
            ref_value: r,
            reason: "inner node where string leaf expected".to_string(),
        }),
    }
}

/// The minimal encoding able to hold a value of the given length.
pub fn required_string_leaf(value: Option<&str>) -> StringLeafType {
    match value {
        None => StringLeafType::Small,
        Some(s) if s.len() <= SMALL_STRING_MAX => StringLeafType::Small,
        Some(s) if s.len() <= MEDIUM_STRING_MAX => StringLeafType::Medium,
        Some(_) => StringLeafType::Big,
    }
}

pub fn string_leaf_size(arena: &Arena, r: Ref) -> usize {
    match string_leaf_type(arena, r).expect("string leaf") {
        StringLeafType::Small => strings::size(arena, r),
        StringLeafType::Medium => indirect::size(arena, r),
        StringLeafType::Big => blob::size(arena, r),
    }
}

pub fn string_leaf_get(arena: &Arena, r: Ref, ndx: usize) -> Option<String> {
    match string_leaf_type(arena, r).expect("string leaf") {
        StringLeafType::Small => strings::get(arena, r, ndx),
        StringLeafType::Medium => {
            indirect::get(arena, r, ndx).map(|b| String::from_utf8_lossy(&b).into_owned())
        }
        StringLeafType::Big => {
            blob::get(arena, r, ndx).map(|b| String::from_utf8_lossy(&b).into_owned())
        }
    }
}

/// Upgrades the leaf at `*r` to `target` encoding: the replacement leaf
/// is fully staged (allocated and populated) before `*r` is rewired with
/// a single write, then the old leaf is destroyed.
pub fn upgrade_string_leaf(arena: &Arena, r: &mut Ref, target: StringLeafType) -> Result<()> {
    let current = string_leaf_type(arena, *r)?;
    if current >= target {
        return Ok(());
    }
    debug!(from = ?current, to = ?target, "string leaf upgrade");
    let count = string_leaf_size(arena, *r);
    let mut new_leaf = match target {
        StringLeafType::Small => unreachable!("no downgrade path"),
        StringLeafType::Medium => indirect::create(arena)?,
        StringLeafType::Big => blob::create(arena)?,
    };
    for i in 0..count {
        let value = string_leaf_get(arena, *r, i);
        match target {
            StringLeafType::Medium => {
                indirect::insert(arena, &mut new_leaf, i, value.as_deref().map(str::as_bytes))?;
            }
            StringLeafType::Big => {
                blob::insert(arena, &mut new_leaf, i, value.as_deref().map(str::as_bytes))?;
            }
            StringLeafType::Small => unreachable!(),
        }
    }
    let old = *r;
    *r = new_leaf;
    arena.destroy_deep(old);
    Ok(())
}

/// Sets element `ndx`, upgrading the leaf first if the value needs it.
pub fn string_leaf_set(arena: &Arena, r: &mut Ref, ndx: usize, value: Option<&str>) -> Result<()> {
    upgrade_string_leaf(arena, r, required_string_leaf(value))?;
    match string_leaf_type(arena, *r)? {
        StringLeafType::Small => {
            strings::set(arena, *r, ndx, value);
            Ok(())
        }
        StringLeafType::Medium => indirect::set(arena, *r, ndx, value.map(str::as_bytes)),
        StringLeafType::Big => blob::set(arena, *r, ndx, value.map(str::as_bytes)),
    }
}

/// Inserts element `ndx`, upgrading first if needed. Returns the new
/// sibling ref when the leaf split.
pub fn string_leaf_insert(
    arena: &Arena,
    r: &mut Ref,
    ndx: usize,
    value: Option<&str>,
) -> Result<Option<Ref>> {
    upgrade_string_leaf(arena, r, required_string_leaf(value))?;
    match string_leaf_type(arena, *r)? {
        StringLeafType::Small => strings::insert(arena, r, ndx, value),
        StringLeafType::Medium => indirect::insert(arena, r, ndx, value.map(str::as_bytes)),
        StringLeafType::Big => blob::insert(arena, r, ndx, value.map(str::as_bytes)),
    }
}

pub fn string_leaf_erase(arena: &Arena, r: Ref, ndx: usize) {
    match string_leaf_type(arena, r).expect("string leaf") {
        StringLeafType::Small => strings::erase(arena, r, ndx),
        StringLeafType::Medium => indirect::erase(arena, r, ndx),
        StringLeafType::Big => blob::erase(arena, r, ndx),
    }
}

pub fn string_leaf_clear(arena: &Arena, r: Ref) {
    match string_leaf_type(arena, r).expect("string leaf") {
        StringLeafType::Small => strings::clear(arena, r),
        StringLeafType::Medium => indirect::clear(arena, r),
        StringLeafType::Big => blob::clear(arena, r),
    }
}

pub fn string_leaf_slice(
    arena: &Arena,
    r: Ref,
    offset: usize,
    len: usize,
    target: &Arena,
) -> Result<Ref> {
    match string_leaf_type(arena, r)? {
        StringLeafType::Small => strings::slice(arena, r, offset, len, target),
        StringLeafType::Medium => indirect::slice(arena, r, offset, len, target),
        StringLeafType::Big => blob::slice(arena, r, offset, len, target),
    }
}

// =============================================================================
// Binary leaves
// =============================================================================

/// Binary leaf encodings, ordered by the upgrade chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BinaryLeafType {
    Small,
    Big,
}

/// Classifies a binary leaf from its header bits.
pub fn binary_leaf_type(arena: &Arena, r: Ref) -> Result<BinaryLeafType> {
    match arena.header(r).kind() {
        NodeKind::IndirectLeaf => Ok(BinaryLeafType::Small),
        NodeKind::BigLeaf => Ok(BinaryLeafType::Big),
        kind => Err(StrataError::NodeCorrupted {
            ref_value: r,
            reason: format!("{kind:?} where binary leaf expected"),
        }),
    }
}

/// The minimal encoding able to hold a value of the given length.
pub fn required_binary_leaf(value: Option<&[u8]>) -> BinaryLeafType {
    match value {
        Some(b) if b.len() > SMALL_BINARY_MAX => BinaryLeafType::Big,
        _ => BinaryLeafType::Small,
    }
}

pub fn binary_leaf_size(arena: &Arena, r: Ref) -> usize {
    match binary_leaf_type(arena, r).expect("binary leaf") {
        BinaryLeafType::Small => indirect::size(arena, r),
        BinaryLeafType::Big => blob::size(arena, r),
    }
}

pub fn binary_leaf_get(arena: &Arena, r: Ref, ndx: usize) -> Option<Vec<u8>> {
    match binary_leaf_type(arena, r).expect("binary leaf") {
        BinaryLeafType::Small => indirect::get(arena, r, ndx),
        BinaryLeafType::Big => blob::get(arena, r, ndx),
    }
}

/// Upgrades the binary leaf at `*r`; same staging discipline as strings.
pub fn upgrade_binary_leaf(arena: &Arena, r: &mut Ref, target: BinaryLeafType) -> Result<()> {
    let current = binary_leaf_type(arena, *r)?;
    if current >= target {
        return Ok(());
    }
    debug!(from = ?current, to = ?target, "binary leaf upgrade");
    let count = binary_leaf_size(arena, *r);
    let mut new_leaf = blob::create(arena)?;
    for i in 0..count {
        let value = binary_leaf_get(arena, *r, i);
        blob::insert(arena, &mut new_leaf, i, value.as_deref())?;
    }
    let old = *r;
    *r = new_leaf;
    arena.destroy_deep(old);
    Ok(())
}

pub fn binary_leaf_set(arena: &Arena, r: &mut Ref, ndx: usize, value: Option<&[u8]>) -> Result<()> {
    upgrade_binary_leaf(arena, r, required_binary_leaf(value))?;
    match binary_leaf_type(arena, *r)? {
        BinaryLeafType::Small => indirect::set(arena, *r, ndx, value),
        BinaryLeafType::Big => blob::set(arena, *r, ndx, value),
    }
}

pub fn binary_leaf_insert(
    arena: &Arena,
    r: &mut Ref,
    ndx: usize,
    value: Option<&[u8]>,
) -> Result<Option<Ref>> {
    upgrade_binary_leaf(arena, r, required_binary_leaf(value))?;
    match binary_leaf_type(arena, *r)? {
        BinaryLeafType::Small => indirect::insert(arena, r, ndx, value),
        BinaryLeafType::Big => blob::insert(arena, r, ndx, value),
    }
}

pub fn binary_leaf_erase(arena: &Arena, r: Ref, ndx: usize) {
    match binary_leaf_type(arena, r).expect("binary leaf") {
        BinaryLeafType::Small => indirect::erase(arena, r, ndx),
        BinaryLeafType::Big => blob::erase(arena, r, ndx),
    }
}

pub fn binary_leaf_clear(arena: &Arena, r: Ref) {
    match binary_leaf_type(arena, r).expect("binary leaf") {
        BinaryLeafType::Small => indirect::clear(arena, r),
        BinaryLeafType::Big => blob::clear(arena, r),
    }
}

pub fn binary_leaf_slice(
    arena: &Arena,
    r: Ref,
    offset: usize,
    len: usize,
    target: &Arena,
) -> Result<Ref> {
    match binary_leaf_type(arena, r)? {
        BinaryLeafType::Small => indirect::slice(arena, r, offset, len, target),
        BinaryLeafType::Big => blob::slice(arena, r, offset, len, target),
    }
}
