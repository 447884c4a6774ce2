//! Scalar columns: integers, booleans, floats.
//!
//! Cells are fixed width, so leaves never upgrade and set never moves a
//! node. Aggregates stream over the leaves in order.

use crate::bptree::LeafOps;
use crate::column::{check_range, check_row, ColumnBase};
use crate::leaf::fixed;
use crate::write::{self, OutputSink};
use std::marker::PhantomData;
use strata_arena::{Arena, Ref};
use strata_common::{Result, StrataError};

/// A fixed-width cell value.
pub trait ScalarValue: Copy + Default + PartialEq + PartialOrd + std::fmt::Debug {
    const WIDTH: u8;
    fn write_cell(self, cell: &mut [u8]);
    fn read_cell(cell: &[u8]) -> Self;
}

impl ScalarValue for i64 {
    const WIDTH: u8 = 8;

    fn write_cell(self, cell: &mut [u8]) {
        cell.copy_from_slice(&self.to_le_bytes());
    }

    fn read_cell(cell: &[u8]) -> Self {
        i64::from_le_bytes(cell.try_into().unwrap())
    }
}

impl ScalarValue for f64 {
    const WIDTH: u8 = 8;

    fn write_cell(self, cell: &mut [u8]) {
        cell.copy_from_slice(&self.to_bits().to_le_bytes());
    }

    fn read_cell(cell: &[u8]) -> Self {
        f64::from_bits(u64::from_le_bytes(cell.try_into().unwrap()))
    }
}

impl ScalarValue for bool {
    const WIDTH: u8 = 1;

    fn write_cell(self, cell: &mut [u8]) {
        cell[0] = self as u8;
    }

    fn read_cell(cell: &[u8]) -> Self {
        cell[0] != 0
    }
}

struct ScalarOps<T: ScalarValue> {
    value: T,
}

impl<T: ScalarValue> ScalarOps<T> {
    fn cell(&self) -> Vec<u8> {
        let mut cell = vec![0u8; T::WIDTH as usize];
        self.value.write_cell(&mut cell);
        cell
    }
}

impl<T: ScalarValue> LeafOps for ScalarOps<T> {
    fn leaf_size(&self, arena: &Arena, leaf: Ref) -> usize {
        fixed::size(arena, leaf)
    }

    fn leaf_insert(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<Option<Ref>> {
        fixed::insert(arena, leaf, ndx, &self.cell())
    }

    fn leaf_set(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<()> {
        fixed::set(arena, *leaf, ndx, &self.cell());
        Ok(())
    }

    fn leaf_erase(&mut self, arena: &Arena, leaf: Ref, ndx: usize) -> Result<bool> {
        fixed::erase(arena, leaf, ndx);
        Ok(fixed::size(arena, leaf) == 0)
    }
}

/// Typed column over fixed-width cells.
pub struct ScalarColumn<T: ScalarValue> {
    base: ColumnBase,
    _marker: PhantomData<T>,
}

pub type IntColumn = ScalarColumn<i64>;
pub type BoolColumn = ScalarColumn<bool>;
pub type FloatColumn = ScalarColumn<f64>;

impl<T: ScalarValue> ScalarColumn<T> {
    /// Creates a detachable column with a fresh empty root leaf.
    pub fn create(arena: &Arena) -> Result<Self> {
        let root = fixed::create(arena, 0, T::WIDTH)?;
        Ok(Self {
            base: ColumnBase::new(arena.clone(), root),
            _marker: PhantomData,
        })
    }

    /// Attaches to an existing root.
    pub fn from_ref(arena: &Arena, root: Ref) -> Self {
        Self {
            base: ColumnBase::new(arena.clone(), root),
            _marker: PhantomData,
        }
    }

    pub fn base(&self) -> &ColumnBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ColumnBase {
        &mut self.base
    }

    fn ops(&self, value: T) -> ScalarOps<T> {
        ScalarOps { value }
    }

    pub fn size(&self) -> usize {
        let arena = self.base.arena().clone();
        self.base.tree().size(&arena, &self.ops(T::default()))
    }

    pub fn get(&self, row: usize) -> Result<T> {
        self.base.check_attached()?;
        check_row(row, self.size())?;
        let arena = self.base.arena();
        let (leaf, ndx) = self.base.tree().get_leaf(arena, row);
        Ok(T::read_cell(&fixed::get(arena, leaf, ndx)))
    }

    pub fn set(&mut self, row: usize, value: T) -> Result<()> {
        self.base.check_attached()?;
        check_row(row, self.size())?;
        let arena = self.base.arena().clone();
        let mut ops = self.ops(value);
        self.base.tree_mut().update(&arena, row, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    /// Inserts `num_rows` copies of `value` at `row` (== size appends).
    pub fn insert(&mut self, row: usize, value: T, num_rows: usize, is_append: bool) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if row > size {
            return Err(StrataError::out_of_bounds(row, size));
        }
        let arena = self.base.arena().clone();
        let pos = if is_append || row == size { None } else { Some(row) };
        let mut ops = self.ops(value);
        for _ in 0..num_rows {
            self.base.tree_mut().insert(&arena, pos, &mut ops)?;
        }
        self.base.update_parent();
        Ok(())
    }

    /// Appends one value.
    pub fn add(&mut self, value: T) -> Result<()> {
        self.insert(self.size(), value, 1, true)
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
        let mut ops = self.ops(T::default());
        self.base.tree_mut().erase(&arena, pos, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    /// Overwrites `row` with the value at `last_row`, then drops the
    /// last row.
    pub fn move_last_over(&mut self, row: usize, last_row: usize) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if last_row != size - 1 || row > last_row {
            return Err(StrataError::invariant("move_last_over row arguments invalid"));
        }
        let value = self.get(last_row)?;
        if row != last_row {
            self.set(row, value)?;
        }
        self.erase(last_row, true)
    }

    /// Empties the column; it stays attached with a fresh root leaf.
    pub fn clear(&mut self) -> Result<()> {
        self.base.check_attached()?;
        let arena = self.base.arena().clone();
        let new_root = fixed::create(&arena, 0, T::WIDTH)?;
        let old = self.base.root();
        self.base.replace_root(new_root);
        arena.destroy_deep(old);
        Ok(())
    }

    pub fn swap_rows(&mut self, row_a: usize, row_b: usize) -> Result<()> {
        let a = self.get(row_a)?;
        let b = self.get(row_b)?;
        self.set(row_a, b)?;
        self.set(row_b, a)
    }

    /// Streams each value in `[begin, end)` with its row index.
    pub fn for_each(&self, begin: usize, end: usize, mut f: impl FnMut(usize, T)) {
        let arena = self.base.arena();
        let mut row = 0usize;
        for leaf in self.base.tree().leaf_refs(arena) {
            let count = fixed::size(arena, leaf);
            if row + count > begin && row < end {
                for i in 0..count {
                    let r = row + i;
                    if r >= begin && r < end {
                        f(r, T::read_cell(&fixed::get(arena, leaf, i)));
                    }
                }
            }
            row += count;
            if row >= end {
                break;
            }
        }
    }

    /// Occurrences of `value` in `[begin, end)`; `end == None` means
    /// size-at-call.
    pub fn count(&self, value: T, begin: usize, end: Option<usize>) -> Result<usize> {
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut n = 0;
        self.for_each(begin, end, |_, v| {
            if v == value {
                n += 1;
            }
        });
        Ok(n)
    }

    pub fn find_first(&self, value: T, begin: usize, end: Option<usize>) -> Result<Option<usize>> {
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut found = None;
        self.for_each(begin, end, |row, v| {
            if found.is_none() && v == value {
                found = Some(row);
            }
        });
        Ok(found)
    }

    pub fn find_all(&self, value: T, begin: usize, end: Option<usize>) -> Result<Vec<usize>> {
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut rows = Vec::new();
        self.for_each(begin, end, |row, v| {
            if v == value {
                rows.push(row);
            }
        });
        Ok(rows)
    }

    pub fn minimum(&self, begin: usize, end: Option<usize>) -> Result<Option<T>> {
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut min: Option<T> = None;
        self.for_each(begin, end, |_, v| match min {
            Some(m) if m <= v => {}
            _ => min = Some(v),
        });
        Ok(min)
    }

    pub fn maximum(&self, begin: usize, end: Option<usize>) -> Result<Option<T>> {
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut max: Option<T> = None;
        self.for_each(begin, end, |_, v| match max {
            Some(m) if m >= v => {}
            _ => max = Some(v),
        });
        Ok(max)
    }

    /// Row-by-row equality with another column of the same type.
    pub fn compare(&self, other: &Self) -> bool {
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
            fixed::slice(arena, self.base.root(), offset, size, &scratch)?
        } else {
            let mut out = ScalarColumn::<T>::create(&scratch)?;
            let mut copy_err = None;
            self.for_each(offset, offset + size, |_, v| {
                if copy_err.is_none() {
                    if let Err(e) = out.add(v) {
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

    pub fn verify(&self) -> Result<()> {
        self.base.check_attached()?;
        let arena = self.base.arena();
        self.base.tree().verify(arena, &self.ops(T::default()))
    }
}

impl ScalarColumn<i64> {
    pub fn sum(&self, begin: usize, end: Option<usize>) -> Result<i64> {
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut total = 0i64;
        self.for_each(begin, end, |_, v| total = total.wrapping_add(v));
        Ok(total)
    }

    pub fn average(&self, begin: usize, end: Option<usize>) -> Result<f64> {
        let (begin, end) = check_range(begin, end, self.size())?;
        if begin == end {
            return Ok(0.0);
        }
        Ok(self.sum(begin, Some(end))? as f64 / (end - begin) as f64)
    }
}

impl ScalarColumn<f64> {
    pub fn sum(&self, begin: usize, end: Option<usize>) -> Result<f64> {
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut total = 0f64;
        self.for_each(begin, end, |_, v| total += v);
        Ok(total)
    }

    pub fn average(&self, begin: usize, end: Option<usize>) -> Result<f64> {
        let (begin, end) = check_range(begin, end, self.size())?;
        if begin == end {
            return Ok(0.0);
        }
        Ok(self.sum(begin, Some(end))? / (end - begin) as f64)
    }
}
