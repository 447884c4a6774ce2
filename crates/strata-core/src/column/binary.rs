//! Binary column: arbitrary byte values with a two-stage encoding.
//!
//! Values up to 64 bytes live in the indirect (offsets + bytes) leaf;
//! anything larger upgrades the leaf to big-blob form. Binary columns
//! carry no search index.

use crate::bptree::LeafOps;
use crate::column::{check_range, check_row, ColumnBase};
use crate::leaf::{
    self, binary_leaf_erase, binary_leaf_get, binary_leaf_insert, binary_leaf_set,
    binary_leaf_size, binary_leaf_slice, indirect,
};
use crate::write::{self, OutputSink};
use strata_arena::{Arena, Ref};
use strata_common::{Result, StrataError};

struct BinaryOps<'a> {
    value: Option<&'a [u8]>,
}

impl LeafOps for BinaryOps<'_> {
    fn leaf_size(&self, arena: &Arena, leaf: Ref) -> usize {
        binary_leaf_size(arena, leaf)
    }

    fn leaf_insert(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<Option<Ref>> {
        binary_leaf_insert(arena, leaf, ndx, self.value)
    }

    fn leaf_set(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<()> {
        binary_leaf_set(arena, leaf, ndx, self.value)
    }

    fn leaf_erase(&mut self, arena: &Arena, leaf: Ref, ndx: usize) -> Result<bool> {
        binary_leaf_erase(arena, leaf, ndx);
        Ok(binary_leaf_size(arena, leaf) == 0)
    }
}

pub struct BinaryColumn {
    base: ColumnBase,
    nullable: bool,
}

impl BinaryColumn {
    pub fn create(arena: &Arena, nullable: bool) -> Result<Self> {
        let root = indirect::create(arena)?;
        Ok(Self {
            base: ColumnBase::new(arena.clone(), root),
            nullable,
        })
    }

    pub fn from_ref(arena: &Arena, root: Ref, nullable: bool) -> Self {
        Self {
            base: ColumnBase::new(arena.clone(), root),
            nullable,
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

    pub fn size(&self) -> usize {
        let arena = self.base.arena();
        self.base.tree().size(arena, &BinaryOps { value: None })
    }

    pub fn get(&self, row: usize) -> Result<Option<Vec<u8>>> {
        self.base.check_attached()?;
        check_row(row, self.size())?;
        let arena = self.base.arena();
        let (leaf, ndx) = self.base.tree().get_leaf(arena, row);
        Ok(binary_leaf_get(arena, leaf, ndx))
    }

    pub fn is_null(&self, row: usize) -> Result<bool> {
        Ok(self.get(row)?.is_none())
    }

    fn check_value(&self, value: Option<&[u8]>) -> Result<()> {
        if value.is_none() && !self.nullable {
            return Err(StrataError::ColumnNotNullable);
        }
        Ok(())
    }

    pub fn set(&mut self, row: usize, value: Option<&[u8]>) -> Result<()> {
        self.base.check_attached()?;
        check_row(row, self.size())?;
        self.check_value(value)?;
        let arena = self.base.arena().clone();
        let mut ops = BinaryOps { value };
        self.base.tree_mut().update(&arena, row, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    pub fn set_null(&mut self, row: usize) -> Result<()> {
        self.set(row, None)
    }

    pub fn insert(
        &mut self,
        row: usize,
        value: Option<&[u8]>,
        num_rows: usize,
        is_append: bool,
    ) -> Result<()> {
        self.base.check_attached()?;
        let size = self.size();
        if row > size {
            return Err(StrataError::out_of_bounds(row, size));
        }
        self.check_value(value)?;
        let arena = self.base.arena().clone();
        let pos = if is_append || row == size { None } else { Some(row) };
        let mut ops = BinaryOps { value };
        for _ in 0..num_rows {
            self.base.tree_mut().insert(&arena, pos, &mut ops)?;
        }
        self.base.update_parent();
        Ok(())
    }

    pub fn add(&mut self, value: Option<&[u8]>) -> Result<()> {
        self.insert(self.size(), value, 1, true)
    }

    pub fn insert_default(&mut self, row: usize, num_rows: usize, is_append: bool) -> Result<()> {
        let value: Option<&[u8]> = if self.nullable { None } else { Some(&[]) };
        self.insert(row, value, num_rows, is_append)
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
        let mut ops = BinaryOps { value: None };
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
        let value = self.get(last_row)?;
        let arena = self.base.arena().clone();
        if row != last_row {
            let mut ops = BinaryOps {
                value: value.as_deref(),
            };
            self.base.tree_mut().update(&arena, row, &mut ops)?;
        }
        let mut ops = BinaryOps { value: None };
        self.base.tree_mut().erase(&arena, None, &mut ops)?;
        self.base.update_parent();
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.base.check_attached()?;
        let arena = self.base.arena().clone();
        let new_root = indirect::create(&arena)?;
        let old = self.base.root();
        self.base.replace_root(new_root);
        arena.destroy_deep(old);
        Ok(())
    }

    pub fn for_each(&self, begin: usize, end: usize, mut f: impl FnMut(usize, Option<Vec<u8>>)) {
        let arena = self.base.arena();
        let mut row = 0usize;
        for leaf in self.base.tree().leaf_refs(arena) {
            let count = binary_leaf_size(arena, leaf);
            if row + count > begin && row < end {
                for i in 0..count {
                    let r = row + i;
                    if r >= begin && r < end {
                        f(r, binary_leaf_get(arena, leaf, i));
                    }
                }
            }
            row += count;
            if row >= end {
                break;
            }
        }
    }

    pub fn count(&self, value: Option<&[u8]>, begin: usize, end: Option<usize>) -> Result<usize> {
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
        value: Option<&[u8]>,
        begin: usize,
        end: Option<usize>,
    ) -> Result<Option<usize>> {
        let (begin, end) = check_range(begin, end, self.size())?;
        let mut found = None;
        self.for_each(begin, end, |row, v| {
            if found.is_none() && v.as_deref() == value {
                found = Some(row);
            }
        });
        Ok(found)
    }

    pub fn compare_binary(&self, other: &BinaryColumn) -> bool {
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
            binary_leaf_slice(arena, self.base.root(), offset, size, &scratch)?
        } else {
            let mut out = BinaryColumn::create(&scratch, self.nullable)?;
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

    pub fn root_leaf_type(&self) -> Result<leaf::BinaryLeafType> {
        self.base.check_attached()?;
        leaf::binary_leaf_type(self.base.arena(), self.base.root())
    }

    pub fn verify(&self) -> Result<()> {
        self.base.check_attached()?;
        let arena = self.base.arena();
        self.base.tree().verify(arena, &BinaryOps { value: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::BinaryLeafType;

    #[test]
    fn test_insert_get() {
        let arena = Arena::new();
        let mut col = BinaryColumn::create(&arena, false).unwrap();
        col.add(Some(b"abc")).unwrap();
        col.add(Some(b"")).unwrap();
        assert_eq!(col.size(), 2);
        assert_eq!(col.get(0).unwrap().as_deref(), Some(&b"abc"[..]));
        assert_eq!(col.get(1).unwrap().as_deref(), Some(&b""[..]));
    }

    #[test]
    fn test_upgrade_small_to_big() {
        let arena = Arena::new();
        let mut col = BinaryColumn::create(&arena, false).unwrap();
        col.add(Some(&[1u8; 64])).unwrap();
        assert_eq!(col.root_leaf_type().unwrap(), BinaryLeafType::Small);
        col.add(Some(&[2u8; 65])).unwrap();
        assert_eq!(col.root_leaf_type().unwrap(), BinaryLeafType::Big);
        assert_eq!(col.get(0).unwrap().unwrap(), vec![1u8; 64]);
        assert_eq!(col.get(1).unwrap().unwrap(), vec![2u8; 65]);
    }

    #[test]
    fn test_no_downgrade_after_short_replacement() {
        let arena = Arena::new();
        let mut col = BinaryColumn::create(&arena, false).unwrap();
        col.add(Some(&[9u8; 100])).unwrap();
        col.set(0, Some(b"x")).unwrap();
        assert_eq!(col.root_leaf_type().unwrap(), BinaryLeafType::Big);
        assert_eq!(col.get(0).unwrap().as_deref(), Some(&b"x"[..]));
    }

    #[test]
    fn test_nullable() {
        let arena = Arena::new();
        let mut col = BinaryColumn::create(&arena, true).unwrap();
        col.add(None).unwrap();
        col.add(Some(b"data")).unwrap();
        assert!(col.is_null(0).unwrap());
        assert!(!col.is_null(1).unwrap());

        let mut strict = BinaryColumn::create(&arena, false).unwrap();
        strict.add(Some(b"v")).unwrap();
        assert!(matches!(
            strict.set_null(0),
            Err(StrataError::ColumnNotNullable)
        ));
    }

    #[test]
    fn test_move_last_over() {
        let arena = Arena::new();
        let mut col = BinaryColumn::create(&arena, false).unwrap();
        for v in [&b"a"[..], b"b", b"c"] {
            col.add(Some(v)).unwrap();
        }
        col.move_last_over(0, 2).unwrap();
        assert_eq!(col.size(), 2);
        assert_eq!(col.get(0).unwrap().as_deref(), Some(&b"c"[..]));
    }

    #[test]
    fn test_find_and_count() {
        let arena = Arena::new();
        let mut col = BinaryColumn::create(&arena, false).unwrap();
        for v in [&b"x"[..], b"y", b"x"] {
            col.add(Some(v)).unwrap();
        }
        assert_eq!(col.count(Some(b"x"), 0, None).unwrap(), 2);
        assert_eq!(col.find_first(Some(b"y"), 0, None).unwrap(), Some(1));
    }
}
