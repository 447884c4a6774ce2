//! String column with size-class leaf upgrades and an optional search
//! index.
//!
//! Every mutating path updates the index *before* the tree, while the
//! old value is still queryable, so the index can locate the entry it
//! is about to change. A unique-constraint rejection therefore surfaces
//! before any tree mutation and leaves the column untouched.

use crate::bptree::LeafOps;
use crate::column::{check_range, check_row, ColumnBase, IndexedColumn};
use crate::index::StringIndex;
use crate::leaf::{
    self, string_leaf_erase, string_leaf_get, string_leaf_insert, string_leaf_set,
    string_leaf_size, string_leaf_slice, strings,
};
use crate::spec::Spec;
use crate::write::{self, OutputSink};
use strata_arena::{Arena, Ref};
use strata_common::{ColumnAttr, Result, StrataError};
use tracing::trace;

struct StringOps<'a> {
    value: Option<&'a str>,
}

impl LeafOps for StringOps<'_> {
    fn leaf_size(&self, arena: &Arena, leaf: Ref) -> usize {
        string_leaf_size(arena, leaf)
    }

    fn leaf_insert(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<Option<Ref>> {
        string_leaf_insert(arena, leaf, ndx, self.value)
    }

    fn leaf_set(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<()> {
        string_leaf_set(arena, leaf, ndx, self.value)
    }

    fn leaf_erase(&mut self, arena: &Arena, leaf: Ref, ndx: usize) -> Result<bool> {
        string_leaf_erase(arena, leaf, ndx);
        Ok(string_leaf_size(arena, leaf) == 0)
    }
}

pub struct StringColumn {
    base: ColumnBase,
    nullable: bool,
    index: Option<StringIndex>,
}

impl StringColumn {
    /// Creates a column with a fresh empty small-string root leaf.
    pub fn create(arena: &Arena, nullable: bool) -> Result<Self> {
        let root = strings::create(arena)?;
        Ok(Self {
            base: ColumnBase::new(arena.clone(), root),
            nullable,
            index: None,
        })
    }

    pub fn from_ref(arena: &Arena, root: Ref, nullable: bool) -> Self {
        Self {
            base: ColumnBase::new(arena.clone(), root),
            nullable,
            index: None,
        }
    }

    pub fn base(&self) -> &ColumnBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ColumnBase {
        &mut self.base
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn attr(&self) -> ColumnAttr {
        let mut attr = ColumnAttr::NONE;
        if self.nullable {
            attr = attr.with(ColumnAttr::NULLABLE);
        }
        if let Some(index) = &self.index {
            attr = attr.with(ColumnAttr::INDEXED);
            if !index.allow_duplicates() {
                attr = attr.with(ColumnAttr::UNIQUE);
            }
        }
        attr
    }

    pub fn size(&self) -> usize {
        let arena = self.base.arena();
        self.base.tree().size(arena, &StringOps { value: None })
    }

    pub fn get(&self, row: usize) -> Result<Option<String>> {
        self.base.check_attached()?;
        check_row(row, self.size())?;
        let arena = self.base.arena();
        let (leaf, ndx) = self.base.tree().get_leaf(arena, row);
        Ok(string_leaf_get(arena, leaf, ndx))
    }

    pub fn is_null(&self, row: usize) -> Result<bool> {
        Ok(self.get(row)?.is_none())
    }

    fn check_value(&self, value: Option<&str>) -> Result<()> {
        if value.is_none() && !self.nullable {
            return Err(StrataError::ColumnNotNullable);
        }
        Ok(())
    }

    pub fn set(&mut self, row: usize, value: Option<&str>) -> Result<()> {
        self.base.check_attached()?;
        check_row(row, self.size())?;
        self.check_value(value)?;

        // Index first: it must still be able to find the old value.
        if self.index.is_some() {
            let old = self.get(row)?;
            self.index
                .as_mut()
                .expect("checked above")
                .set(row, old.as_deref(), value)?;
        }

        let arena = self.base.arena().clone();
        let mut ops = StringOps { value };
        self.base.tree_mut().update(&arena, row, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    pub fn set_null(&mut self, row: usize) -> Result<()> {
        self.set(row, None)
    }

    /// Inserts `num_rows` copies of `value` at `row` (== size appends).
    pub fn insert(
        &mut self,
        row: usize,
        value: Option<&str>,
        num_rows: usize,
        is_append: bool,
    ) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if row > size {
            return Err(StrataError::out_of_bounds(row, size));
        }
        self.check_value(value)?;

        let append = is_append || row == size;
        if let Some(index) = &mut self.index {
            index.insert(row, value, num_rows, append)?;
        }

        let arena = self.base.arena().clone();
        let pos = if append { None } else { Some(row) };
        let mut ops = StringOps { value };
        for _ in 0..num_rows {
            self.base.tree_mut().insert(&arena, pos, &mut ops)?;
        }
        self.base.update_parent();
        Ok(())
    }

    /// Appends one value.
    pub fn add(&mut self, value: Option<&str>) -> Result<()> {
        self.insert(self.size(), value, 1, true)
    }

    /// Inserts default-valued rows (null when nullable, "" otherwise).
    pub fn insert_default(&mut self, row: usize, num_rows: usize, is_append: bool) -> Result<()> {
        let value = if self.nullable { None } else { Some("") };
        self.insert(row, value, num_rows, is_append)
    }

    pub fn erase(&mut self, row: usize, is_last: bool) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        check_row(row, size)?;
        if is_last != (row == size - 1) {
            return Err(StrataError::invariant("is_last flag disagrees with row index"));
        }

        if self.index.is_some() {
            let old = self.get(row)?;
            self.index
                .as_mut()
                .expect("checked above")
                .erase(row, old.as_deref(), is_last);
        }

        let arena = self.base.arena().clone();
        let pos = if is_last { None } else { Some(row) };
        let mut ops = StringOps { value: None };
        self.base.tree_mut().erase(&arena, pos, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    /// Overwrites `row` with the value at `last_row`, then drops the
    /// last row. The moved value is copied out first because the write
    /// may relocate the leaf it came from.
    pub fn move_last_over(&mut self, row: usize, last_row: usize) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if last_row != size - 1 || row > last_row {
            return Err(StrataError::invariant("move_last_over row arguments invalid"));
        }
        let value = self.get(last_row)?;

        if self.index.is_some() {
            let old = self.get(row)?;
            let index = self.index.as_mut().expect("checked above");
            // is_last here tells the index not to shift suffix rows: the
            // tree erase below targets the final row.
            index.erase(row, old.as_deref(), true);
            if row != last_row {
                index.update_ref(value.as_deref(), last_row, row);
            }
        }

        let arena = self.base.arena().clone();
        if row != last_row {
            let mut ops = StringOps {
                value: value.as_deref(),
            };
            self.base.tree_mut().update(&arena, row, &mut ops)?;
        }
        let mut ops = StringOps { value: None };
        self.base.tree_mut().erase(&arena, None, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    /// Empties the column and resets the root to a small-string leaf.
    pub fn clear(&mut self) -> Result<()> {
        self.base.check_attached()?;
        if let Some(index) = &mut self.index {
            index.clear();
        }
        let arena = self.base.arena().clone();
        let new_root = strings::create(&arena)?;
        let old = self.base.root();
        self.base.replace_root(new_root);
        arena.destroy_deep(old);
        Ok(())
    }

    pub fn swap_rows(&mut self, row_a: usize, row_b: usize) -> Result<()> {
        if row_a == row_b {
            return Ok(());
        }
        let a = self.get(row_a)?;
        let b = self.get(row_b)?;
        self.set(row_a, b.as_deref())?;
        self.set(row_b, a.as_deref())
    }

    /// Streams each value in `[begin, end)` with its row index.
    pub fn for_each(&self, begin: usize, end: usize, mut f: impl FnMut(usize, Option<String>)) {
        let arena = self.base.arena();
        let mut row = 0usize;
        for leaf in self.base.tree().leaf_refs(arena) {
            let count = string_leaf_size(arena, leaf);
            if row + count > begin && row < end {
                for i in 0..count {
                    let r = row + i;
                    if r >= begin && r < end {
                        f(r, string_leaf_get(arena, leaf, i));
                    }
                }
            }
            row += count;
            if row >= end {
                break;
            }
        }
    }

    fn full_range(&self, begin: usize, end: Option<usize>) -> bool {
        begin == 0 && end.is_none()
    }

    pub fn count(&self, value: Option<&str>, begin: usize, end: Option<usize>) -> Result<usize> {
        if let (Some(index), true) = (&self.index, self.full_range(begin, end)) {
            return Ok(index.count(value));
        }
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut n = 0;
        self.for_each(begin, end, |_, v| {
            if v.as_deref() == value {
                n += 1;
            }
        });
        Ok(n)
    }

    pub fn find_first(
        &self,
        value: Option<&str>,
        begin: usize,
        end: Option<usize>,
    ) -> Result<Option<usize>> {
        if let (Some(index), true) = (&self.index, self.full_range(begin, end)) {
            return Ok(index.find_first(value));
        }
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut found = None;
        self.for_each(begin, end, |row, v| {
            if found.is_none() && v.as_deref() == value {
                found = Some(row);
            }
        });
        Ok(found)
    }

    pub fn find_all(
        &self,
        value: Option<&str>,
        begin: usize,
        end: Option<usize>,
    ) -> Result<Vec<usize>> {
        if let (Some(index), true) = (&self.index, self.full_range(begin, end)) {
            return Ok(index.find_all(value));
        }
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut rows = Vec::new();
        self.for_each(begin, end, |row, v| {
            if v.as_deref() == value {
                rows.push(row);
            }
        });
        Ok(rows)
    }

    /// First row whose value is >= `value`, assuming ascending contents.
    pub fn lower_bound_string(&self, value: &str) -> usize {
        let size = self.size();
        let mut bound = size;
        self.for_each(0, size, |row, v| {
            if bound == size && v.as_deref() >= Some(value) {
                bound = row;
            }
        });
        bound
    }

    /// First row whose value is > `value`, assuming ascending contents.
    pub fn upper_bound_string(&self, value: &str) -> usize {
        let size = self.size();
        let mut bound = size;
        self.for_each(0, size, |row, v| {
            if bound == size && v.as_deref() > Some(value) {
                bound = row;
            }
        });
        bound
    }

    pub fn search_index(&self) -> Option<&StringIndex> {
        self.index.as_ref()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn update_from_parent(&mut self, old_baseline: u64) {
        self.base.update_from_parent(old_baseline);
    }

    /// Post-transaction refresh: re-resolve the root, re-sync the slot
    /// index, and rebuild the search index when the spec says the column
    /// is indexed.
    pub fn refresh_accessor_tree(&mut self, col_ndx: usize, spec: &Spec) -> Result<()> {
        self.base
            .set_ndx_in_parent(spec.column_ndx_in_parent(col_ndx));
        self.base.refresh_root_from_parent();
        let attr = spec.column_attr(col_ndx)?;
        if attr.is_indexed() && self.index.is_none() {
            self.create_search_index(!attr.is_unique())?;
        } else if !attr.is_indexed() {
            self.index = None;
        }
        Ok(())
    }

    pub fn compare_string(&self, other: &StringColumn) -> bool {
        let n = self.size();
        if other.size() != n {
            return false;
        }
        for i in 0..n {
            match (self.get(i), other.get(i)) {
                (Ok(a), Ok(b)) if a == b => {}
                _ => return false,
            }
        }
        true
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
            string_leaf_slice(arena, self.base.root(), offset, size, &scratch)?
        } else {
            let mut out = StringColumn::create(&scratch, self.nullable)?;
            let mut copy_err = None;
            self.for_each(offset, offset + size, |_, v| {
                if copy_err.is_none() {
                    if let Err(e) = out.add(v.as_deref()) {
                        copy_err = Some(e);
                    }
                }
            });
            if let Some(e) = copy_err {
                return Err(e);
            }
            out.base.root()
        };
        write::write_node_deep(&scratch, root, sink)
    }

    /// Header-bit classification of the root leaf, for inspection.
    pub fn root_leaf_type(&self) -> Result<leaf::StringLeafType> {
        self.base.check_attached()?;
        leaf::string_leaf_type(self.base.arena(), self.base.root())
    }

    pub fn verify(&self) -> Result<()> {
        self.base.check_attached()?;
        let arena = self.base.arena();
        self.base
            .tree()
            .verify(arena, &StringOps { value: None })?;
        if let Some(index) = &self.index {
            index.verify_against(self.size(), |row| self.get(row).unwrap_or(None))?;
        }
        Ok(())
    }
}

impl IndexedColumn for StringColumn {
    fn has_search_index(&self) -> bool {
        self.index.is_some()
    }

    /// Installs a search index and populates it from current contents.
    fn create_search_index(&mut self, allow_duplicates: bool) -> Result<()> {
        self.base.check_attached()?;
        let mut index = StringIndex::new(allow_duplicates);
        let size = self.size();
        let mut populate_err = None;
        self.for_each(0, size, |row, v| {
            if populate_err.is_none() {
                if let Err(e) = index.insert(row, v.as_deref(), 1, true) {
                    populate_err = Some(e);
                }
            }
        });
        if let Some(e) = populate_err {
            return Err(e);
        }
        trace!(rows = size, "search index populated");
        self.index = Some(index);
        Ok(())
    }

    fn destroy_search_index(&mut self) {
        self.index = None;
    }
}
