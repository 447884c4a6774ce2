//! Columnar storage core for StrataDB.
//!
//! This crate provides:
//! - A persistent B+-tree over arena refs with split-on-full insert and
//!   rebalance-free erase
//! - Size-class leaf encodings with a one-way upgrade protocol
//! - The typed column family sharing one lifecycle contract
//! - The column-level schema (spec) with sparse subspec bookkeeping
//! - A radix-trie search index kept coherent ahead of tree mutations
//! - Sub-table accessor caching with reference-counted lifetimes
//! - Cascading row removal through strong links
//! - Slice serialization to a re-attachable buffer

pub mod bptree;
pub mod cascade;
pub mod column;
pub mod constants;
pub mod index;
pub mod leaf;
pub mod spec;
pub mod table;
pub mod write;

pub use bptree::{BpTree, LeafOps};
pub use cascade::{CascadeRow, CascadeState};
pub use column::{
    BacklinkColumn, BinaryColumn, BoolColumn, CascadeColumn, Column, FloatColumn, IndexedColumn,
    IntColumn, LinkColumn, ScalarColumn, StringColumn, SubtableColumn, SubtableHost,
};
pub use constants::{MAX_LEAF_SIZE, MEDIUM_STRING_MAX, SMALL_BINARY_MAX, SMALL_STRING_MAX};
pub use index::StringIndex;
pub use spec::Spec;
pub use table::{Group, Table, TableRef};
pub use write::{OutputSink, VecSink};
