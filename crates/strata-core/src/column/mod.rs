//! The column family.
//!
//! Every column is a façade over one B+-tree: it owns the root ref, the
//! optional search index, and the per-type leaf handlers. The family is
//! a tagged variant rather than an inheritance tree; shared lifecycle
//! plumbing (attach/detach, parent-slot rewiring, baseline refresh)
//! lives in [`ColumnBase`], and [`Column`] dispatches the common
//! contract by match.

pub mod binary;
pub mod link;
pub mod scalar;
pub mod string;
pub mod subtable;

use crate::bptree::{BpTree, LeafOps};
use crate::cascade::{CascadeRow, CascadeState};
use crate::leaf::fixed;
use crate::spec::Spec;
use crate::table::{Group, TableRef};
use crate::write::OutputSink;
use strata_arena::{Arena, Ref};
use strata_common::{ColumnAttr, Result, StrataError};

pub use binary::BinaryColumn;
pub use link::{BacklinkColumn, LinkColumn};
pub use scalar::{BoolColumn, FloatColumn, IntColumn, ScalarColumn};
pub use string::StringColumn;
pub use subtable::SubtableColumn;

/// Capability: participates in cascade. Link columns contribute the
/// rows their strong links orphan; every other column kind is inert.
pub trait CascadeColumn {
    /// Breaks the links held by one row, inserting newly doomed target
    /// rows into `state`. Returns the rows added so the caller can keep
    /// expanding the closure.
    fn cascade_break_backlinks_to(
        &self,
        col_ndx: usize,
        row_ndx: usize,
        state: &mut CascadeState,
        group: &Group,
    ) -> Result<Vec<CascadeRow>>;

    /// Breaks the links of every row `[0, num_rows)`; bulk clear drives
    /// this with `stop_on_table` set to the clearing table.
    fn cascade_break_backlinks_to_all_rows(
        &self,
        col_ndx: usize,
        num_rows: usize,
        state: &mut CascadeState,
        group: &Group,
    ) -> Result<Vec<CascadeRow>> {
        let mut added = Vec::new();
        for row in 0..num_rows {
            added.extend(self.cascade_break_backlinks_to(col_ndx, row, state, group)?);
        }
        Ok(added)
    }
}

/// Capability: supports a search index.
pub trait IndexedColumn {
    fn has_search_index(&self) -> bool;

    /// Installs a search index populated from current contents.
    fn create_search_index(&mut self, allow_duplicates: bool) -> Result<()>;

    fn destroy_search_index(&mut self);
}

/// Capability: holds cached sub-table accessors.
pub trait SubtableHost {
    /// The live accessor at `row`, if one is cached.
    fn get_subtable_accessor(&self, row: usize) -> Option<TableRef>;

    /// Detaches and drops the cached accessor at `row`, if any.
    fn discard_subtable_accessor(&self, row: usize);
}

/// Shared column state: the arena handle, the tree, the attach flag and
/// the optional parent slot holding this column's root ref.
pub struct ColumnBase {
    arena: Arena,
    tree: BpTree,
    attached: bool,
    /// (columns node, slot index) when the column is hosted in a table.
    parent: Option<(Ref, usize)>,
}

impl ColumnBase {
    pub fn new(arena: Arena, root: Ref) -> Self {
        Self {
            arena,
            tree: BpTree::new(root),
            attached: true,
            parent: None,
        }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn root(&self) -> Ref {
        self.tree.root()
    }

    pub fn tree(&self) -> &BpTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut BpTree {
        &mut self.tree
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn check_attached(&self) -> Result<()> {
        if self.attached {
            Ok(())
        } else {
            Err(StrataError::DetachedAccess)
        }
    }

    /// Detach is idempotent; any further operation is an error.
    pub fn detach(&mut self) {
        self.attached = false;
        self.tree.set_root(0);
    }

    pub fn set_parent(&mut self, columns_node: Ref, ndx_in_parent: usize) {
        self.parent = Some((columns_node, ndx_in_parent));
    }

    pub fn ndx_in_parent(&self) -> Option<usize> {
        self.parent.map(|(_, n)| n)
    }

    pub fn set_ndx_in_parent(&mut self, ndx: usize) {
        if let Some((node, _)) = self.parent {
            self.parent = Some((node, ndx));
        }
    }

    /// Writes the current root ref into the parent slot, if any.
    pub fn update_parent(&self) {
        if let Some((node, ndx)) = self.parent {
            self.arena.write_u64(node, ndx, self.tree.root());
        }
    }

    /// Re-reads the root ref from the parent slot after the arena moved
    /// past `old_baseline`. Returns true when a refresh happened.
    pub fn update_from_parent(&mut self, old_baseline: u64) -> bool {
        if self.arena.baseline() == old_baseline {
            return false;
        }
        self.refresh_root_from_parent();
        true
    }

    /// Unconditionally re-resolves the root from the parent slot.
    pub fn refresh_root_from_parent(&mut self) {
        if let Some((node, ndx)) = self.parent {
            let root = self.arena.read_u64(node, ndx);
            self.tree.set_root(root);
        }
    }

    /// Replaces the root and rewires the parent slot in one step.
    pub fn replace_root(&mut self, new_root: Ref) {
        self.tree.set_root(new_root);
        self.update_parent();
    }
}

/// Raw u64-cell leaf ops shared by link, backlink and sub-table columns.
pub(crate) struct RawU64Ops {
    pub value: u64,
}

impl LeafOps for RawU64Ops {
    fn leaf_size(&self, arena: &Arena, leaf: Ref) -> usize {
        fixed::size(arena, leaf)
    }

    fn leaf_insert(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<Option<Ref>> {
        fixed::insert(arena, leaf, ndx, &self.value.to_le_bytes())
    }

    fn leaf_set(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<()> {
        fixed::set_u64(arena, *leaf, ndx, self.value);
        Ok(())
    }

    fn leaf_erase(&mut self, arena: &Arena, leaf: Ref, ndx: usize) -> Result<bool> {
        fixed::erase(arena, leaf, ndx);
        Ok(fixed::size(arena, leaf) == 0)
    }
}

/// Bounds check shared by every typed accessor.
pub(crate) fn check_row(row: usize, size: usize) -> Result<()> {
    if row < size {
        Ok(())
    } else {
        Err(StrataError::out_of_bounds(row, size))
    }
}

/// Resolves an aggregate range: `end == None` means size-at-call.
pub(crate) fn check_range(begin: usize, end: Option<usize>, size: usize) -> Result<(usize, usize)> {
    let end = end.unwrap_or(size);
    if begin > end || end > size {
        return Err(StrataError::InvalidRange { begin, end, size });
    }
    Ok((begin, end))
}

/// A column of any type, dispatching the shared lifecycle contract.
pub enum Column {
    Int(IntColumn),
    Bool(BoolColumn),
    Float(FloatColumn),
    String(StringColumn),
    Binary(BinaryColumn),
    Subtable(SubtableColumn),
    Link(LinkColumn),
    BackLink(BacklinkColumn),
}

impl Column {
    pub fn size(&self) -> usize {
        match self {
            Column::Int(c) => c.size(),
            Column::Bool(c) => c.size(),
            Column::Float(c) => c.size(),
            Column::String(c) => c.size(),
            Column::Binary(c) => c.size(),
            Column::Subtable(c) => c.size(),
            Column::Link(c) => c.size(),
            Column::BackLink(c) => c.size(),
        }
    }

    pub fn root(&self) -> Ref {
        self.base().root()
    }

    pub fn base(&self) -> &ColumnBase {
        match self {
            Column::Int(c) => c.base(),
            Column::Bool(c) => c.base(),
            Column::Float(c) => c.base(),
            Column::String(c) => c.base(),
            Column::Binary(c) => c.base(),
            Column::Subtable(c) => c.base(),
            Column::Link(c) => c.base(),
            Column::BackLink(c) => c.base(),
        }
    }

    pub fn base_mut(&mut self) -> &mut ColumnBase {
        match self {
            Column::Int(c) => c.base_mut(),
            Column::Bool(c) => c.base_mut(),
            Column::Float(c) => c.base_mut(),
            Column::String(c) => c.base_mut(),
            Column::Binary(c) => c.base_mut(),
            Column::Subtable(c) => c.base_mut(),
            Column::Link(c) => c.base_mut(),
            Column::BackLink(c) => c.base_mut(),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.base().is_attached()
    }

    pub fn detach(&mut self) {
        match self {
            Column::Subtable(c) => c.detach(),
            other => other.base_mut().detach(),
        }
    }

    /// Inserts `num_rows` default-valued rows at `row` (== size appends).
    pub fn insert_rows(&mut self, row: usize, num_rows: usize, is_append: bool) -> Result<()> {
        match self {
            Column::Int(c) => c.insert(row, 0, num_rows, is_append),
            Column::Bool(c) => c.insert(row, false, num_rows, is_append),
            Column::Float(c) => c.insert(row, 0.0, num_rows, is_append),
            Column::String(c) => c.insert_default(row, num_rows, is_append),
            Column::Binary(c) => c.insert_default(row, num_rows, is_append),
            Column::Subtable(c) => c.insert_rows(row, num_rows, is_append),
            Column::Link(c) => c.insert_rows(row, num_rows, is_append),
            Column::BackLink(c) => c.insert_rows(row, num_rows, is_append),
        }
    }

    pub fn erase_row(&mut self, row: usize, is_last: bool) -> Result<()> {
        match self {
            Column::Int(c) => c.erase(row, is_last),
            Column::Bool(c) => c.erase(row, is_last),
            Column::Float(c) => c.erase(row, is_last),
            Column::String(c) => c.erase(row, is_last),
            Column::Binary(c) => c.erase(row, is_last),
            Column::Subtable(c) => c.erase(row, is_last),
            Column::Link(c) => c.erase(row, is_last),
            Column::BackLink(c) => c.erase(row, is_last),
        }
    }

    /// Overwrites `row` with the value at `last_row` and drops the last
    /// row. The sole row-removal primitive preserving dense indices.
    pub fn move_last_over(&mut self, row: usize, last_row: usize) -> Result<()> {
        match self {
            Column::Int(c) => c.move_last_over(row, last_row),
            Column::Bool(c) => c.move_last_over(row, last_row),
            Column::Float(c) => c.move_last_over(row, last_row),
            Column::String(c) => c.move_last_over(row, last_row),
            Column::Binary(c) => c.move_last_over(row, last_row),
            Column::Subtable(c) => c.move_last_over(row, last_row),
            Column::Link(c) => c.move_last_over(row, last_row),
            Column::BackLink(c) => c.move_last_over(row, last_row),
        }
    }

    /// Empties the column; it stays attached.
    pub fn clear(&mut self) -> Result<()> {
        match self {
            Column::Int(c) => c.clear(),
            Column::Bool(c) => c.clear(),
            Column::Float(c) => c.clear(),
            Column::String(c) => c.clear(),
            Column::Binary(c) => c.clear(),
            Column::Subtable(c) => c.clear(),
            Column::Link(c) => c.clear(),
            Column::BackLink(c) => c.clear(),
        }
    }

    pub fn update_from_parent(&mut self, old_baseline: u64) {
        match self {
            Column::Subtable(c) => c.update_from_parent(old_baseline),
            other => {
                other.base_mut().update_from_parent(old_baseline);
            }
        }
    }

    /// Post-transaction structural refresh: re-resolve the root from the
    /// parent slot and rebuild type-specific caches from the spec.
    pub fn refresh_accessor_tree(&mut self, col_ndx: usize, spec: &Spec) -> Result<()> {
        match self {
            Column::String(c) => c.refresh_accessor_tree(col_ndx, spec),
            Column::Subtable(c) => c.refresh_accessor_tree(col_ndx, spec),
            Column::Link(c) => c.refresh_accessor_tree(col_ndx, spec),
            Column::BackLink(c) => c.refresh_accessor_tree(col_ndx, spec),
            other => {
                other.base_mut().set_ndx_in_parent(spec.column_ndx_in_parent(col_ndx));
                other.base_mut().refresh_root_from_parent();
                Ok(())
            }
        }
    }

    /// Streams rows `[offset, offset + size)` into `sink` and returns
    /// the new root ref in the output space.
    pub fn write(
        &self,
        offset: usize,
        size: usize,
        table_size: usize,
        sink: &mut dyn OutputSink,
    ) -> Result<u64> {
        match self {
            Column::Int(c) => c.write(offset, size, table_size, sink),
            Column::Bool(c) => c.write(offset, size, table_size, sink),
            Column::Float(c) => c.write(offset, size, table_size, sink),
            Column::String(c) => c.write(offset, size, table_size, sink),
            Column::Binary(c) => c.write(offset, size, table_size, sink),
            Column::Subtable(c) => c.write(offset, size, table_size, sink),
            Column::Link(c) => c.write(offset, size, table_size, sink),
            Column::BackLink(c) => c.write(offset, size, table_size, sink),
        }
    }

    /// Structural validation of the tree and type-specific state.
    pub fn verify(&self) -> Result<()> {
        match self {
            Column::Int(c) => c.verify(),
            Column::Bool(c) => c.verify(),
            Column::Float(c) => c.verify(),
            Column::String(c) => c.verify(),
            Column::Binary(c) => c.verify(),
            Column::Subtable(c) => c.verify(),
            Column::Link(c) => c.verify(),
            Column::BackLink(c) => c.verify(),
        }
    }

    pub fn attr(&self) -> ColumnAttr {
        match self {
            Column::String(c) => c.attr(),
            Column::Link(c) => c.attr(),
            _ => ColumnAttr::NONE,
        }
    }

    /// Cascade hook for one row; ordinary columns are inert.
    pub fn cascade_break_backlinks_to(
        &self,
        col_ndx: usize,
        row_ndx: usize,
        state: &mut CascadeState,
        group: &Group,
    ) -> Result<Vec<CascadeRow>> {
        match self {
            Column::Link(c) => c.cascade_break_backlinks_to(col_ndx, row_ndx, state, group),
            _ => Ok(Vec::new()),
        }
    }

    /// Cascade hook for every row; ordinary columns are inert.
    pub fn cascade_break_backlinks_to_all_rows(
        &self,
        col_ndx: usize,
        num_rows: usize,
        state: &mut CascadeState,
        group: &Group,
    ) -> Result<Vec<CascadeRow>> {
        match self {
            Column::Link(c) => {
                c.cascade_break_backlinks_to_all_rows(col_ndx, num_rows, state, group)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Cached sub-table accessor at `row`; None for other column kinds.
    pub fn get_subtable_accessor(&self, row: usize) -> Option<TableRef> {
        match self {
            Column::Subtable(c) => c.get_subtable_accessor(row),
            _ => None,
        }
    }

    /// Drops the cached sub-table accessor at `row`, if any.
    pub fn discard_subtable_accessor(&self, row: usize) {
        if let Column::Subtable(c) = self {
            c.discard_subtable_accessor(row);
        }
    }
}
