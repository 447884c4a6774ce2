//! Link and backlink columns.
//!
//! A link column stores `target_row + 1` in plain integer cells (0 is
//! the null link) and names its target table through the spec's tagged
//! subspec entry. Every link column has a reciprocal backlink column in
//! the target table tracking who points at each row: a backlink cell is
//! 0 (no origins), a tagged origin row (single origin), or a ref to a
//! plain list node of origin rows. The tagged encoding keeps single
//! origins out of `destroy_deep`'s way.

use crate::cascade::{CascadeRow, CascadeState};
use crate::column::{check_row, CascadeColumn, ColumnBase, RawU64Ops};
use crate::leaf::{create_ref_leaf, fixed};
use crate::spec::Spec;
use crate::table::Group;
use crate::write::{self, OutputSink};
use strata_arena::{is_ref, tag_int, untag_int, Arena, Ref};
use strata_common::{ColumnAttr, Result, StrataError};
use tracing::debug;

// =============================================================================
// LinkColumn
// =============================================================================

pub struct LinkColumn {
    base: ColumnBase,
    target_table_ndx: usize,
    strong: bool,
}

impl LinkColumn {
    pub fn create(arena: &Arena, target_table_ndx: usize, strong: bool) -> Result<Self> {
        let root = fixed::create(arena, 0, 8)?;
        Ok(Self {
            base: ColumnBase::new(arena.clone(), root),
            target_table_ndx,
            strong,
        })
    }

    pub fn from_ref(arena: &Arena, root: Ref, target_table_ndx: usize, strong: bool) -> Self {
        Self {
            base: ColumnBase::new(arena.clone(), root),
            target_table_ndx,
            strong,
        }
    }

    pub fn base(&self) -> &ColumnBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ColumnBase {
        &mut self.base
    }

    pub fn target_table_ndx(&self) -> usize {
        self.target_table_ndx
    }

    pub fn is_strong(&self) -> bool {
        self.strong
    }

    pub fn attr(&self) -> ColumnAttr {
        if self.strong {
            ColumnAttr::STRONG_LINKS
        } else {
            ColumnAttr::NONE
        }
    }

    pub fn size(&self) -> usize {
        let arena = self.base.arena();
        self.base.tree().size(arena, &RawU64Ops { value: 0 })
    }

    pub fn get_link(&self, row: usize) -> Result<Option<usize>> {
        self.base.check_attached()?;
        check_row(row, self.size())?;
        let arena = self.base.arena();
        let (leaf, ndx) = self.base.tree().get_leaf(arena, row);
        let cell = fixed::get_u64(arena, leaf, ndx);
        Ok(if cell == 0 {
            None
        } else {
            Some(cell as usize - 1)
        })
    }

    pub fn is_null_link(&self, row: usize) -> Result<bool> {
        Ok(self.get_link(row)?.is_none())
    }

    /// Writes the raw link cell and returns the previous target. The
    /// caller keeps the reciprocal backlink column coherent.
    pub fn set_link_raw(&mut self, row: usize, target: Option<usize>) -> Result<Option<usize>> {
        self.base.check_attached()?;
        check_row(row, self.size())?;
        let old = self.get_link(row)?;
        let arena = self.base.arena().clone();
        let cell = target.map(|t| t as u64 + 1).unwrap_or(0);
        let mut ops = RawU64Ops { value: cell };
        self.base.tree_mut().update(&arena, row, &mut ops)?;
        self.base.update_parent();
        Ok(old)
    }

    pub fn insert_rows(&mut self, row: usize, num_rows: usize, is_append: bool) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if row > size {
            return Err(StrataError::out_of_bounds(row, size));
        }
        let arena = self.base.arena().clone();
        let pos = if is_append || row == size { None } else { Some(row) };
        let mut ops = RawU64Ops { value: 0 };
        for _ in 0..num_rows {
            self.base.tree_mut().insert(&arena, pos, &mut ops)?;
        }
        self.base.update_parent();
        Ok(())
    }

    pub fn erase(&mut self, row: usize, is_last: bool) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        check_row(row, size)?;
        if is_last != (row == size - 1) {
            return Err(StrataError::invariant("is_last flag disagrees with row index"));
        }
        let arena = self.base.arena().clone();
        let pos = if is_last { None } else { Some(row) };
        let mut ops = RawU64Ops { value: 0 };
        self.base.tree_mut().erase(&arena, pos, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    pub fn move_last_over(&mut self, row: usize, last_row: usize) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if last_row != size - 1 || row > last_row {
            return Err(StrataError::invariant("move_last_over row arguments invalid"));
        }
        if row != last_row {
            let value = self.get_link(last_row)?;
            self.set_link_raw(row, value)?;
        }
        self.erase(last_row, true)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.base.check_attached()?;
        let arena = self.base.arena().clone();
        let new_root = fixed::create(&arena, 0, 8)?;
        let old = self.base.root();
        self.base.replace_root(new_root);
        arena.destroy_deep(old);
        Ok(())
    }

    /// Rows whose link points at `target_row`.
    pub fn find_origins_of(&self, target_row: usize) -> Vec<usize> {
        let n = self.size();
        (0..n)
            .filter(|&r| self.get_link(r).ok().flatten() == Some(target_row))
            .collect()
    }

    pub fn refresh_accessor_tree(&mut self, col_ndx: usize, spec: &Spec) -> Result<()> {
        self.base
            .set_ndx_in_parent(spec.column_ndx_in_parent(col_ndx));
        self.base.refresh_root_from_parent();
        self.target_table_ndx = spec.get_opposite_link_table_ndx(col_ndx)?;
        self.strong = spec.column_attr(col_ndx)?.is_strong_links();
        Ok(())
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
        let scratch = Arena::new();
        let root = if self.base.tree().root_is_leaf(arena) {
            fixed::slice(arena, self.base.root(), offset, size, &scratch)?
        } else {
            let mut out = fixed::create(&scratch, 0, 8)?;
            for i in 0..size {
                let (leaf, ndx) = self.base.tree().get_leaf(arena, offset + i);
                let cell = fixed::get_u64(arena, leaf, ndx);
                fixed::insert(&scratch, &mut out, i, &cell.to_le_bytes())?;
            }
            out
        };
        write::write_node_deep(&scratch, root, sink)
    }

    pub fn verify(&self) -> Result<()> {
        self.base.check_attached()?;
        let arena = self.base.arena();
        self.base.tree().verify(arena, &RawU64Ops { value: 0 })
    }
}

impl CascadeColumn for LinkColumn {
    /// Weak links never propagate. A strong link dooms its target when
    /// no strong link from outside the closure still points at it; the
    /// stop guards suppress recursion into a clearing table or through
    /// one specific cell.
    fn cascade_break_backlinks_to(
        &self,
        col_ndx: usize,
        row_ndx: usize,
        state: &mut CascadeState,
        group: &Group,
    ) -> Result<Vec<CascadeRow>> {
        let mut added = Vec::new();
        if !self.strong {
            return Ok(added);
        }
        let Some(target_row) = self.get_link(row_ndx)? else {
            return Ok(added);
        };
        if state.stop_on_table == Some(self.target_table_ndx) {
            return Ok(added);
        }
        if state.stop_on_link_list == Some((col_ndx, row_ndx)) {
            return Ok(added);
        }
        let candidate = CascadeRow {
            table_ndx: self.target_table_ndx,
            row_ndx: target_row,
        };
        if state.contains(&candidate) {
            return Ok(added);
        }
        if group.external_strong_backlinks(self.target_table_ndx, target_row, state)? == 0 {
            state.insert(candidate);
            added.push(candidate);
            debug!(
                table = self.target_table_ndx,
                row = target_row,
                "row joins cascade closure"
            );
        }
        Ok(added)
    }
}

// =============================================================================
// BacklinkColumn
// =============================================================================

pub struct BacklinkColumn {
    base: ColumnBase,
    origin_table_ndx: usize,
    origin_col_ndx: usize,
}

impl BacklinkColumn {
    pub fn create(arena: &Arena, origin_table_ndx: usize, origin_col_ndx: usize) -> Result<Self> {
        let root = create_ref_leaf(arena)?;
        Ok(Self {
            base: ColumnBase::new(arena.clone(), root),
            origin_table_ndx,
            origin_col_ndx,
        })
    }

    pub fn from_ref(
        arena: &Arena,
        root: Ref,
        origin_table_ndx: usize,
        origin_col_ndx: usize,
    ) -> Self {
        Self {
            base: ColumnBase::new(arena.clone(), root),
            origin_table_ndx,
            origin_col_ndx,
        }
    }

    pub fn base(&self) -> &ColumnBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ColumnBase {
        &mut self.base
    }

    pub fn origin_table_ndx(&self) -> usize {
        self.origin_table_ndx
    }

    pub fn origin_col_ndx(&self) -> usize {
        self.origin_col_ndx
    }

    pub fn size(&self) -> usize {
        let arena = self.base.arena();
        self.base.tree().size(arena, &RawU64Ops { value: 0 })
    }

    fn cell(&self, row: usize) -> Result<u64> {
        self.base.check_attached()?;
        check_row(row, self.size())?;
        let arena = self.base.arena();
        let (leaf, ndx) = self.base.tree().get_leaf(arena, row);
        Ok(fixed::get_u64(arena, leaf, ndx))
    }

    fn set_cell(&mut self, row: usize, value: u64) -> Result<()> {
        let arena = self.base.arena().clone();
        let mut ops = RawU64Ops { value };
        self.base.tree_mut().update(&arena, row, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    /// Number of links pointing at `row`.
    pub fn backlink_count(&self, row: usize) -> Result<usize> {
        let cell = self.cell(row)?;
        Ok(match cell {
            0 => 0,
            c if !is_ref(c) => 1,
            list => fixed::size(self.base.arena(), list),
        })
    }

    /// Origin row of the `ndx`-th link into `row`.
    pub fn get_backlink(&self, row: usize, ndx: usize) -> Result<usize> {
        let cell = self.cell(row)?;
        match cell {
            0 => Err(StrataError::out_of_bounds(ndx, 0)),
            c if !is_ref(c) => {
                if ndx != 0 {
                    return Err(StrataError::out_of_bounds(ndx, 1));
                }
                Ok(untag_int(c).expect("odd cell is tagged") as usize)
            }
            list => {
                let arena = self.base.arena();
                let count = fixed::size(arena, list);
                check_row(ndx, count)?;
                Ok(fixed::get_u64(arena, list, ndx) as usize)
            }
        }
    }

    /// Registers a link from `origin_row` into `row`.
    pub fn add_backlink(&mut self, row: usize, origin_row: usize) -> Result<()> {
        let cell = self.cell(row)?;
        let arena = self.base.arena().clone();
        match cell {
            0 => self.set_cell(row, tag_int(origin_row as u64)),
            c if !is_ref(c) => {
                // Grow the single origin into a list node.
                let first = untag_int(c).expect("odd cell is tagged");
                let mut list = fixed::create(&arena, 0, 8)?;
                fixed::insert(&arena, &mut list, 0, &first.to_le_bytes())?;
                fixed::insert(&arena, &mut list, 1, &(origin_row as u64).to_le_bytes())?;
                self.set_cell(row, list)
            }
            list => {
                let mut list_ref = list;
                let count = fixed::size(&arena, list_ref);
                fixed::insert(&arena, &mut list_ref, count, &(origin_row as u64).to_le_bytes())?;
                if list_ref != list {
                    self.set_cell(row, list_ref)?;
                }
                Ok(())
            }
        }
    }

    /// Unregisters one link from `origin_row` into `row`.
    pub fn remove_backlink(&mut self, row: usize, origin_row: usize) -> Result<()> {
        let cell = self.cell(row)?;
        let arena = self.base.arena().clone();
        match cell {
            0 => Err(StrataError::invariant("no backlink to remove")),
            c if !is_ref(c) => {
                if untag_int(c) != Some(origin_row as u64) {
                    return Err(StrataError::invariant("backlink origin mismatch"));
                }
                self.set_cell(row, 0)
            }
            list => {
                let count = fixed::size(&arena, list);
                let pos = (0..count)
                    .find(|&i| fixed::get_u64(&arena, list, i) == origin_row as u64)
                    .ok_or_else(|| StrataError::invariant("backlink origin mismatch"))?;
                fixed::erase(&arena, list, pos);
                if count - 1 == 1 {
                    let only = fixed::get_u64(&arena, list, 0);
                    arena.free(list);
                    self.set_cell(row, tag_int(only))?;
                }
                Ok(())
            }
        }
    }

    /// Re-points one backlink after its origin row moved.
    pub fn update_backlink(&mut self, row: usize, old_origin: usize, new_origin: usize) -> Result<()> {
        self.remove_backlink(row, old_origin)?;
        self.add_backlink(row, new_origin)
    }

    pub fn insert_rows(&mut self, row: usize, num_rows: usize, is_append: bool) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if row > size {
            return Err(StrataError::out_of_bounds(row, size));
        }
        let arena = self.base.arena().clone();
        let pos = if is_append || row == size { None } else { Some(row) };
        let mut ops = RawU64Ops { value: 0 };
        for _ in 0..num_rows {
            self.base.tree_mut().insert(&arena, pos, &mut ops)?;
        }
        self.base.update_parent();
        Ok(())
    }

    pub fn erase(&mut self, row: usize, is_last: bool) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        check_row(row, size)?;
        if is_last != (row == size - 1) {
            return Err(StrataError::invariant("is_last flag disagrees with row index"));
        }
        let cell = self.cell(row)?;
        let arena = self.base.arena().clone();
        if cell != 0 && is_ref(cell) {
            arena.destroy_deep(cell);
        }
        // Orphan the cell before the tree erase so the list node is not
        // double-freed through the has_refs leaf.
        self.set_cell(row, 0)?;
        let pos = if is_last { None } else { Some(row) };
        let mut ops = RawU64Ops { value: 0 };
        self.base.tree_mut().erase(&arena, pos, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    pub fn move_last_over(&mut self, row: usize, last_row: usize) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if last_row != size - 1 || row > last_row {
            return Err(StrataError::invariant("move_last_over row arguments invalid"));
        }
        let old = self.cell(row)?;
        let arena = self.base.arena().clone();
        if old != 0 && is_ref(old) {
            arena.destroy_deep(old);
        }
        if row != last_row {
            let moved = self.cell(last_row)?;
            self.set_cell(row, moved)?;
            // The moved cell now lives at `row`; clear the source so the
            // erase below cannot free it.
            self.set_cell(last_row, 0)?;
        } else {
            self.set_cell(row, 0)?;
        }
        let mut ops = RawU64Ops { value: 0 };
        self.base.tree_mut().erase(&arena, None, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.base.check_attached()?;
        let arena = self.base.arena().clone();
        let new_root = create_ref_leaf(&arena)?;
        let old = self.base.root();
        self.base.replace_root(new_root);
        arena.destroy_deep(old);
        Ok(())
    }

    pub fn refresh_accessor_tree(&mut self, col_ndx: usize, spec: &Spec) -> Result<()> {
        self.base
            .set_ndx_in_parent(spec.column_ndx_in_parent(col_ndx));
        self.base.refresh_root_from_parent();
        self.origin_table_ndx = spec.get_opposite_link_table_ndx(col_ndx)?;
        self.origin_col_ndx = spec.get_origin_column_ndx(col_ndx)?;
        Ok(())
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
        // Backlink cells are rebuilt from the origin column on reload;
        // the slice carries empty cells of the right cardinality.
        let scratch = Arena::new();
        let mut out = create_ref_leaf(&scratch)?;
        for i in 0..size {
            fixed::insert(&scratch, &mut out, i, &0u64.to_le_bytes())?;
        }
        write::write_node_deep(&scratch, out, sink)
    }

    pub fn verify(&self) -> Result<()> {
        self.base.check_attached()?;
        let arena = self.base.arena();
        self.base.tree().verify(arena, &RawU64Ops { value: 0 })
    }
}
