//! Memory arena and node headers for the StrataDB storage core.
//!
//! This crate provides:
//! - The 8-byte node header with the three classification flag bits
//! - The slab arena: allocation, ref translation, deep destroy,
//!   baseline versioning, and snapshot buffer attach
//! - The tagged-integer convention for ref slots

mod arena;
pub mod header;

pub use arena::{Arena, Ref};
pub use header::{
    is_ref, tag_int, untag_int, NodeHeader, NodeKind, FLAG_CONTEXT, FLAG_HAS_REFS, FLAG_INNER,
    HEADER_SIZE,
};
