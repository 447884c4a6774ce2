//! Sub-table column: each cell holds a whole nested table.
//!
//! Cells are refs to the nested table's columns node (0 = empty nested
//! table), stored in `has_refs` leaves so deep destroy reclaims whole
//! subtree families. Live nested-table accessors are cached in a
//! per-column map keyed by row. The map holds weak handles; each handle
//! keeps a strong reference to the *parent* table, so the parent cannot
//! die while nested accessors are out. The map is guarded by a
//! reentrant lock: nested refresh may navigate back through the parent
//! on the same thread.
//!
//! Accessor teardown is cooperative: a dropped handle removes itself
//! from the map, and a handle whose construction failed after
//! registration may call remove with an entry the map no longer has —
//! remove treats "not found" as success.

use crate::column::{check_row, ColumnBase, RawU64Ops, SubtableHost};
use crate::leaf::{create_ref_leaf, fixed};
use crate::spec::Spec;
use crate::table::{Table, TableRef};
use crate::write::{self, OutputSink};
use parking_lot::ReentrantMutex;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use strata_arena::{Arena, Ref};
use strata_common::{Result, StrataError};
use tracing::trace;

// =============================================================================
// Accessor map
// =============================================================================

struct MapEntry {
    row: Cell<usize>,
    id: u64,
    table: Weak<RefCell<Table>>,
}

struct MapInner {
    entries: Vec<MapEntry>,
    next_id: u64,
}

/// Shared, reentrantly-locked accessor map. Cloned into every nested
/// accessor so its drop can deregister itself.
#[derive(Clone)]
pub struct SharedSubtableMap {
    inner: Rc<ReentrantMutex<RefCell<MapInner>>>,
}

impl SharedSubtableMap {
    fn new() -> Self {
        Self {
            inner: Rc::new(ReentrantMutex::new(RefCell::new(MapInner {
                entries: Vec::new(),
                next_id: 0,
            }))),
        }
    }

    /// Live accessor at `row`, if cached.
    pub fn find(&self, row: usize) -> Option<TableRef> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner
            .entries
            .iter()
            .find(|e| e.row.get() == row)
            .and_then(|e| e.table.upgrade())
    }

    fn add(&self, row: usize, table: &TableRef) -> u64 {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(MapEntry {
            row: Cell::new(row),
            id,
            table: Rc::downgrade(table),
        });
        id
    }

    /// Deregisters the entry with the given id. A missing entry is not
    /// an error: a half-constructed accessor may deregister before it
    /// was ever fully registered.
    pub fn remove_by_id(&self, id: u64) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if let Some(pos) = inner.entries.iter().position(|e| e.id == id) {
            // Move last over; entry order carries no meaning.
            inner.entries.swap_remove(pos);
        }
    }

    pub fn is_empty(&self) -> bool {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.entries.len()
    }

    /// Strong handles to every live entry, with the rows they claim.
    /// Borrow is released before the caller touches any accessor.
    fn live_entries(&self) -> Vec<(usize, u64, TableRef)> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner
            .entries
            .iter()
            .filter_map(|e| e.table.upgrade().map(|t| (e.row.get(), e.id, t)))
            .collect()
    }

    /// Detaches and deregisters the accessor at `row`, if any.
    pub fn detach_and_remove(&self, row: usize) {
        let target = {
            let guard = self.inner.lock();
            let inner = guard.borrow();
            inner
                .entries
                .iter()
                .find(|e| e.row.get() == row)
                .and_then(|e| e.table.upgrade().map(|t| (e.id, t)))
        };
        if let Some((id, table)) = target {
            table.borrow_mut().detach();
            self.remove_by_id(id);
        }
    }

    /// Detaches every cached accessor and empties the map.
    pub fn detach_and_remove_all(&self) {
        for (_, id, table) in self.live_entries() {
            table.borrow_mut().detach();
            self.remove_by_id(id);
        }
        let guard = self.inner.lock();
        guard.borrow_mut().entries.clear();
    }

    pub fn update_from_parent(&self, old_baseline: u64) {
        for (_, _, table) in self.live_entries() {
            table.borrow_mut().update_from_parent(old_baseline);
        }
    }

    pub fn recursive_mark(&self) {
        for (_, _, table) in self.live_entries() {
            table.borrow_mut().recursive_mark();
        }
    }

    /// Post-transaction refresh. Iterates backwards because an entry may
    /// remove itself while being refreshed.
    pub fn refresh_accessor_tree(&self) -> Result<()> {
        let entries = self.live_entries();
        for (row, _, table) in entries.into_iter().rev() {
            let mut t = table.borrow_mut();
            t.set_row_in_parent(row);
            if t.is_marked() {
                t.refresh_accessor_tree()?;
                t.bump_version();
            } else {
                t.refresh_spec_accessor()?;
            }
        }
        Ok(())
    }

    // Row-index adjustments mirroring structural mutations.

    pub fn adj_insert_rows(&self, row: usize, num_rows: usize) {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        for e in &inner.entries {
            let r = e.row.get();
            if r >= row {
                e.row.set(r + num_rows);
            }
        }
        drop(inner);
        for (r, _, table) in self.live_entries() {
            table.borrow_mut().set_row_in_parent(r);
        }
    }

    pub fn adj_erase_row(&self, row: usize) {
        self.detach_and_remove(row);
        let guard = self.inner.lock();
        let inner = guard.borrow();
        for e in &inner.entries {
            let r = e.row.get();
            if r > row {
                e.row.set(r - 1);
            }
        }
        drop(inner);
        for (r, _, table) in self.live_entries() {
            table.borrow_mut().set_row_in_parent(r);
        }
    }

    /// The accessor at `to` (being overwritten) dies; the accessor at
    /// `from` (the moved last row) is re-indexed to `to`.
    pub fn adj_move_over(&self, from: usize, to: usize) {
        self.detach_and_remove(to);
        let guard = self.inner.lock();
        let inner = guard.borrow();
        for e in &inner.entries {
            if e.row.get() == from {
                e.row.set(to);
            }
        }
        drop(inner);
        for (r, _, table) in self.live_entries() {
            table.borrow_mut().set_row_in_parent(r);
        }
    }

    pub fn adj_set_null(&self, row: usize) {
        self.detach_and_remove(row);
    }

    pub fn adj_clear(&self) {
        self.detach_and_remove_all();
    }

    /// Every cached accessor must agree with the parent column's cell.
    pub fn verify(&self, parent: &SubtableColumn) -> Result<()> {
        for (row, _, table) in self.live_entries() {
            if row >= parent.size() {
                return Err(StrataError::invariant(format!(
                    "cached sub-table accessor at row {row} beyond column size"
                )));
            }
            let cell = parent.get_subtable_ref(row)?;
            let t = table.borrow();
            if t.columns_ref() != cell {
                return Err(StrataError::invariant(format!(
                    "cached sub-table accessor at row {row} disagrees with cell"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// SubtableColumn
// =============================================================================

pub struct SubtableColumn {
    base: ColumnBase,
    /// Top ref of the nested spec shared by all cells.
    subspec_ref: Ref,
    map: SharedSubtableMap,
    /// The hosting table, handed to nested accessors so they keep it
    /// alive (weak here to avoid a cycle).
    parent_table: Weak<RefCell<Table>>,
}

impl SubtableColumn {
    pub fn create(arena: &Arena, subspec_ref: Ref) -> Result<Self> {
        let root = create_ref_leaf(arena)?;
        Ok(Self {
            base: ColumnBase::new(arena.clone(), root),
            subspec_ref,
            map: SharedSubtableMap::new(),
            parent_table: Weak::new(),
        })
    }

    pub fn from_ref(arena: &Arena, root: Ref, subspec_ref: Ref) -> Self {
        Self {
            base: ColumnBase::new(arena.clone(), root),
            subspec_ref,
            map: SharedSubtableMap::new(),
            parent_table: Weak::new(),
        }
    }

    pub fn base(&self) -> &ColumnBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ColumnBase {
        &mut self.base
    }

    pub fn subspec_ref(&self) -> Ref {
        self.subspec_ref
    }

    pub fn accessor_map(&self) -> &SharedSubtableMap {
        &self.map
    }

    pub fn set_parent_table(&mut self, table: &TableRef) {
        self.parent_table = Rc::downgrade(table);
    }

    pub fn size(&self) -> usize {
        let arena = self.base.arena();
        self.base.tree().size(arena, &RawU64Ops { value: 0 })
    }

    /// The columns-root ref of the nested table at `row`; 0 when empty.
    pub fn get_subtable_ref(&self, row: usize) -> Result<Ref> {
        self.base.check_attached()?;
        check_row(row, self.size())?;
        let arena = self.base.arena();
        let (leaf, ndx) = self.base.tree().get_leaf(arena, row);
        let cell = fixed::get_u64(arena, leaf, ndx);
        if cell & 1 != 0 {
            return Err(StrataError::invariant(format!(
                "sub-table cell at row {row} holds a tagged value"
            )));
        }
        Ok(cell)
    }

    /// Row count of the nested table at `row` without instantiating an
    /// accessor.
    pub fn get_subtable_size(&self, row: usize) -> Result<usize> {
        let cell = self.get_subtable_ref(row)?;
        if cell == 0 {
            return Ok(0);
        }
        Table::nested_size(self.base.arena(), self.subspec_ref, cell)
    }

    /// Live handle to the nested table at `row`. Handles are cached and
    /// shared: a second call returns the same accessor. While at least
    /// one handle lives, the parent table is pinned.
    pub fn get_subtable_tableref(&mut self, row: usize) -> Result<TableRef> {
        self.base.check_attached()?;
        check_row(row, self.size())?;

        if let Some(existing) = self.map.find(row) {
            return Ok(existing);
        }

        let mut cell = self.get_subtable_ref(row)?;
        let arena = self.base.arena().clone();
        if cell == 0 {
            // Materialize the empty nested table so the accessor has a
            // columns root to sit on.
            cell = Table::create_columns_from_spec(&arena, self.subspec_ref)?;
            self.set_cell(row, cell)?;
        }

        let parent_guard = self.parent_table.upgrade();
        let table = Table::new_subtable(
            &arena,
            self.subspec_ref,
            cell,
            self.map.clone(),
            row,
            parent_guard,
        )?;
        let table = Rc::new(RefCell::new(table));
        let id = self.map.add(row, &table);
        table.borrow_mut().set_registration_id(id);
        trace!(row, "sub-table accessor created");
        Ok(table)
    }

    fn set_cell(&mut self, row: usize, value: u64) -> Result<()> {
        let arena = self.base.arena().clone();
        let mut ops = RawU64Ops { value };
        self.base.tree_mut().update(&arena, row, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    fn destroy_subtable(&self, row: usize) -> Result<()> {
        let cell = self.get_subtable_ref(row)?;
        if cell != 0 {
            self.base.arena().destroy_deep(cell);
        }
        Ok(())
    }

    /// Empties the nested table at `row` (cell becomes the null ref) and
    /// detaches any cached accessor.
    pub fn clear_subtable(&mut self, row: usize) -> Result<()> {
        self.destroy_subtable(row)?;
        self.set_cell(row, 0)?;
        self.map.adj_set_null(row);
        Ok(())
    }

    pub fn insert_rows(&mut self, row: usize, num_rows: usize, is_append: bool) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if row > size {
            return Err(StrataError::out_of_bounds(row, size));
        }
        let arena = self.base.arena().clone();
        let append = is_append || row == size;
        let pos = if append { None } else { Some(row) };
        let mut ops = RawU64Ops { value: 0 };
        for _ in 0..num_rows {
            self.base.tree_mut().insert(&arena, pos, &mut ops)?;
        }
        self.base.update_parent();
        if !append {
            self.map.adj_insert_rows(row, num_rows);
        }
        Ok(())
    }

    pub fn erase(&mut self, row: usize, is_last: bool) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        check_row(row, size)?;
        if is_last != (row == size - 1) {
            return Err(StrataError::invariant("is_last flag disagrees with row index"));
        }
        self.destroy_subtable(row)?;
        self.set_cell(row, 0)?;
        let arena = self.base.arena().clone();
        let pos = if is_last { None } else { Some(row) };
        let mut ops = RawU64Ops { value: 0 };
        self.base.tree_mut().erase(&arena, pos, &mut ops)?;
        self.base.update_parent();
        self.map.adj_erase_row(row);
        Ok(())
    }

    pub fn move_last_over(&mut self, row: usize, last_row: usize) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if last_row != size - 1 || row > last_row {
            return Err(StrataError::invariant("move_last_over row arguments invalid"));
        }
        if row != last_row {
            self.destroy_subtable(row)?;
            let moved = self.get_subtable_ref(last_row)?;
            self.set_cell(row, moved)?;
            // The cell now lives at `row`; orphan the source before the
            // erase so deep destroy cannot reach it twice.
            self.set_cell(last_row, 0)?;
        } else {
            self.destroy_subtable(row)?;
            self.set_cell(row, 0)?;
        }
        let arena = self.base.arena().clone();
        let mut ops = RawU64Ops { value: 0 };
        self.base.tree_mut().erase(&arena, None, &mut ops)?;
        self.base.update_parent();
        self.map.adj_move_over(last_row, row);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.base.check_attached()?;
        self.map.adj_clear();
        let arena = self.base.arena().clone();
        let new_root = create_ref_leaf(&arena)?;
        let old = self.base.root();
        self.base.replace_root(new_root);
        arena.destroy_deep(old);
        Ok(())
    }

    pub fn detach(&mut self) {
        self.map.detach_and_remove_all();
        self.base.detach();
    }

    pub fn update_from_parent(&mut self, old_baseline: u64) {
        if self.base.update_from_parent(old_baseline) {
            self.map.update_from_parent(old_baseline);
        }
    }

    pub fn refresh_accessor_tree(&mut self, col_ndx: usize, spec: &Spec) -> Result<()> {
        self.base
            .set_ndx_in_parent(spec.column_ndx_in_parent(col_ndx));
        self.base.refresh_root_from_parent();
        let subspec_ndx = spec.get_subspec_ndx(col_ndx);
        self.subspec_ref = spec.get_subspec_ref(subspec_ndx)?;
        self.map.refresh_accessor_tree()
    }

    /// Row-by-row content comparison of the nested tables.
    pub fn compare_table(&mut self, other: &mut SubtableColumn) -> Result<bool> {
        let n = self.size();
        if other.size() != n {
            return Ok(false);
        }
        for i in 0..n {
            let a = self.get_subtable_tableref(i)?;
            let b = other.get_subtable_tableref(i)?;
            if !a.borrow().equals_content(&b.borrow())? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn write(
        &self,
        offset: usize,
        size: usize,
        table_size: usize,
        sink: &mut dyn OutputSink,
    ) -> Result<u64> {
        self.base.check_attached()?;
        write::check_slice(offset, size, table_size, self.size())?;
        let arena = self.base.arena();
        // Build a temporary slot leaf in the *same* arena so the deep
        // writer can follow the nested trees, then free only the leaf.
        let mut tmp = create_ref_leaf(arena)?;
        for i in 0..size {
            let cell = self.get_subtable_ref(offset + i)?;
            fixed::insert(arena, &mut tmp, i, &cell.to_le_bytes())?;
        }
        let out = write::write_node_deep(arena, tmp, sink)?;
        arena.free(tmp);
        Ok(out)
    }

    pub fn verify(&self) -> Result<()> {
        self.base.check_attached()?;
        let arena = self.base.arena();
        self.base.tree().verify(arena, &RawU64Ops { value: 0 })?;
        self.map.verify(self)
    }
}

impl SubtableHost for SubtableColumn {
    fn get_subtable_accessor(&self, row: usize) -> Option<TableRef> {
        self.map.find(row)
    }

    fn discard_subtable_accessor(&self, row: usize) {
        self.map.detach_and_remove(row);
    }
}
