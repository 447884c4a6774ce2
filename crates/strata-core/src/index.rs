//! Search index: a radix trie from column values to row sets.
//!
//! The trie is keyed by the value's bytes, one nibble per level, with a
//! one-byte prefix separating null from non-null values. Row sets are
//! kept sorted. The index stores row numbers, so structural row
//! mutations in the column must be mirrored here: inserting a row in
//! the middle shifts every row number at or above it, erasing shifts
//! them back down, and `move_last_over` re-points one row via
//! [`StringIndex::update_ref`].
//!
//! Columns call the index *before* mutating their tree, so a unique
//! constraint violation surfaces while both structures still agree.

use strata_common::{Result, StrataError};

const NULL_PREFIX: u8 = 0;
const VALUE_PREFIX: u8 = 1;

#[derive(Default)]
struct TrieNode {
    children: [Option<Box<TrieNode>>; 16],
    /// Rows holding the value that terminates at this node, sorted.
    rows: Vec<usize>,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.children.iter().all(|c| c.is_none())
    }
}

fn key_bytes(value: Option<&str>) -> Vec<u8> {
    match value {
        None => vec![NULL_PREFIX],
        Some(s) => {
            let mut key = Vec::with_capacity(1 + s.len());
            key.push(VALUE_PREFIX);
            key.extend_from_slice(s.as_bytes());
            key
        }
    }
}

fn nibbles(key: &[u8]) -> impl Iterator<Item = usize> + '_ {
    key.iter().flat_map(|b| [(b >> 4) as usize, (b & 0xF) as usize])
}

/// Radix-trie search index over string values.
pub struct StringIndex {
    root: TrieNode,
    allow_duplicates: bool,
}

impl StringIndex {
    pub fn new(allow_duplicates: bool) -> Self {
        Self {
            root: TrieNode::default(),
            allow_duplicates,
        }
    }

    pub fn allow_duplicates(&self) -> bool {
        self.allow_duplicates
    }

    fn node(&self, value: Option<&str>) -> Option<&TrieNode> {
        let key = key_bytes(value);
        let mut node = &self.root;
        for n in nibbles(&key) {
            node = node.children[n].as_deref()?;
        }
        Some(node)
    }

    fn node_mut(&mut self, value: Option<&str>) -> &mut TrieNode {
        let key = key_bytes(value);
        let mut node = &mut self.root;
        for n in nibbles(&key) {
            node = &mut **node.children[n].get_or_insert_with(Default::default);
        }
        node
    }

    /// Registers `num_rows` consecutive rows starting at `row`, all
    /// holding `value`. When the insert is not an append, existing row
    /// numbers at or above `row` are shifted up first.
    pub fn insert(
        &mut self,
        row: usize,
        value: Option<&str>,
        num_rows: usize,
        is_append: bool,
    ) -> Result<()> {
        if !self.allow_duplicates {
            let occupied = self.count(value);
            if occupied + num_rows > 1 {
                return Err(StrataError::UniqueConstraint);
            }
        }
        if !is_append {
            self.shift_rows(row, num_rows as isize);
        }
        let node = self.node_mut(value);
        for i in 0..num_rows {
            let r = row + i;
            if let Err(pos) = node.rows.binary_search(&r) {
                node.rows.insert(pos, r);
            }
        }
        Ok(())
    }

    /// Re-points `row` from `old` to `new`. Fails on a unique violation
    /// before anything is modified.
    pub fn set(&mut self, row: usize, old: Option<&str>, new: Option<&str>) -> Result<()> {
        if old == new {
            return Ok(());
        }
        if !self.allow_duplicates {
            let existing = self.find_all(new);
            if !existing.is_empty() && existing != [row] {
                return Err(StrataError::UniqueConstraint);
            }
        }
        self.remove_row(old, row);
        let node = self.node_mut(new);
        if let Err(pos) = node.rows.binary_search(&row) {
            node.rows.insert(pos, row);
        }
        Ok(())
    }

    /// Unregisters `row` (which held `old`). With `is_last` the suffix
    /// row numbers are left untouched; otherwise they shift down by one.
    pub fn erase(&mut self, row: usize, old: Option<&str>, is_last: bool) {
        self.remove_row(old, row);
        if !is_last {
            self.shift_rows(row + 1, -1);
        }
    }

    /// Moves the registration of `value` from row `from` to row `to`.
    pub fn update_ref(&mut self, value: Option<&str>, from: usize, to: usize) {
        self.remove_row(value, from);
        let node = self.node_mut(value);
        if let Err(pos) = node.rows.binary_search(&to) {
            node.rows.insert(pos, to);
        }
    }

    pub fn clear(&mut self) {
        self.root = TrieNode::default();
    }

    /// Smallest row holding `value`.
    pub fn find_first(&self, value: Option<&str>) -> Option<usize> {
        self.node(value).and_then(|n| n.rows.first().copied())
    }

    /// All rows holding `value`, ascending.
    pub fn find_all(&self, value: Option<&str>) -> Vec<usize> {
        self.node(value).map(|n| n.rows.clone()).unwrap_or_default()
    }

    pub fn count(&self, value: Option<&str>) -> usize {
        self.node(value).map(|n| n.rows.len()).unwrap_or(0)
    }

    fn remove_row(&mut self, value: Option<&str>, row: usize) {
        let key = key_bytes(value);
        remove_and_prune(&mut self.root, &mut nibbles(&key).collect::<Vec<_>>().into_iter(), row);
    }

    /// Adds `delta` to every registered row number >= `from`.
    fn shift_rows(&mut self, from: usize, delta: isize) {
        fn walk(node: &mut TrieNode, from: usize, delta: isize) {
            for row in node.rows.iter_mut() {
                if *row >= from {
                    *row = (*row as isize + delta) as usize;
                }
            }
            for child in node.children.iter_mut().flatten() {
                walk(child, from, delta);
            }
        }
        walk(&mut self.root, from, delta);
    }

    /// Checks every mapping against the column's current contents.
    pub fn verify_against(
        &self,
        size: usize,
        get: impl Fn(usize) -> Option<String>,
    ) -> Result<()> {
        fn walk(
            node: &TrieNode,
            size: usize,
            get: &impl Fn(usize) -> Option<String>,
            prefix: &mut Vec<u8>,
        ) -> Result<()> {
            if !node.rows.is_empty() {
                // Reassemble the key from the nibble path.
                debug_assert!(prefix.len() % 2 == 0);
                let bytes: Vec<u8> = prefix
                    .chunks(2)
                    .map(|pair| (pair[0] << 4) | pair[1])
                    .collect();
                let expected = if bytes[0] == NULL_PREFIX {
                    None
                } else {
                    Some(String::from_utf8_lossy(&bytes[1..]).into_owned())
                };
                for &row in &node.rows {
                    if row >= size {
                        return Err(StrataError::invariant(format!(
                            "index row {row} beyond column size {size}"
                        )));
                    }
                    if get(row) != expected {
                        return Err(StrataError::invariant(format!(
                            "index mapping stale at row {row}"
                        )));
                    }
                }
            }
            for (i, child) in node.children.iter().enumerate() {
                if let Some(child) = child {
                    prefix.push(i as u8);
                    walk(child, size, get, prefix)?;
                    prefix.pop();
                }
            }
            Ok(())
        }
        walk(&self.root, size, &get, &mut Vec::new())
    }
}

fn remove_and_prune(
    node: &mut TrieNode,
    path: &mut impl Iterator<Item = usize>,
    row: usize,
) -> bool {
    match path.next() {
        None => {
            if let Ok(pos) = node.rows.binary_search(&row) {
                node.rows.remove(pos);
            }
        }
        Some(n) => {
            if let Some(child) = node.children[n].as_deref_mut() {
                if remove_and_prune(child, path, row) {
                    node.children[n] = None;
                }
            }
        }
    }
    node.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find() {
        let mut index = StringIndex::new(true);
        index.insert(0, Some("alpha"), 1, true).unwrap();
        index.insert(1, Some("beta"), 1, true).unwrap();
        index.insert(2, Some("alpha"), 1, true).unwrap();

        assert_eq!(index.find_first(Some("alpha")), Some(0));
        assert_eq!(index.find_all(Some("alpha")), vec![0, 2]);
        assert_eq!(index.count(Some("alpha")), 2);
        assert_eq!(index.count(Some("gamma")), 0);
        assert_eq!(index.find_first(Some("gamma")), None);
    }

    #[test]
    fn test_null_tracked_separately() {
        let mut index = StringIndex::new(true);
        index.insert(0, None, 1, true).unwrap();
        index.insert(1, Some(""), 1, true).unwrap();
        assert_eq!(index.find_all(None), vec![0]);
        assert_eq!(index.find_all(Some("")), vec![1]);
    }

    #[test]
    fn test_interior_insert_shifts_rows() {
        let mut index = StringIndex::new(true);
        index.insert(0, Some("a"), 1, true).unwrap();
        index.insert(1, Some("b"), 1, true).unwrap();
        // Insert before row 1: "b" moves to row 2.
        index.insert(1, Some("c"), 1, false).unwrap();
        assert_eq!(index.find_all(Some("a")), vec![0]);
        assert_eq!(index.find_all(Some("c")), vec![1]);
        assert_eq!(index.find_all(Some("b")), vec![2]);
    }

    #[test]
    fn test_erase_shifts_rows() {
        let mut index = StringIndex::new(true);
        for (i, v) in ["a", "b", "c"].iter().enumerate() {
            index.insert(i, Some(v), 1, true).unwrap();
        }
        index.erase(1, Some("b"), false);
        assert_eq!(index.find_all(Some("a")), vec![0]);
        assert_eq!(index.find_all(Some("b")), vec![]);
        assert_eq!(index.find_all(Some("c")), vec![1]);
    }

    #[test]
    fn test_erase_last_no_shift() {
        let mut index = StringIndex::new(true);
        index.insert(0, Some("a"), 1, true).unwrap();
        index.insert(1, Some("b"), 1, true).unwrap();
        index.erase(1, Some("b"), true);
        assert_eq!(index.find_all(Some("a")), vec![0]);
        assert_eq!(index.count(Some("b")), 0);
    }

    #[test]
    fn test_update_ref() {
        let mut index = StringIndex::new(true);
        index.insert(0, Some("a"), 1, true).unwrap();
        index.insert(1, Some("b"), 1, true).unwrap();
        index.insert(2, Some("c"), 1, true).unwrap();
        // move_last_over(0, 2): "c" moves from row 2 to row 0.
        index.erase(0, Some("a"), true);
        index.update_ref(Some("c"), 2, 0);
        assert_eq!(index.find_all(Some("c")), vec![0]);
        assert_eq!(index.count(Some("a")), 0);
    }

    #[test]
    fn test_unique_constraint_insert() {
        let mut index = StringIndex::new(false);
        index.insert(0, Some("a"), 1, true).unwrap();
        let err = index.insert(1, Some("a"), 1, true);
        assert!(matches!(err, Err(StrataError::UniqueConstraint)));
        // Failed insert left the index unchanged.
        assert_eq!(index.find_all(Some("a")), vec![0]);
    }

    #[test]
    fn test_unique_constraint_set() {
        let mut index = StringIndex::new(false);
        index.insert(0, Some("a"), 1, true).unwrap();
        index.insert(1, Some("b"), 1, true).unwrap();
        let err = index.set(1, Some("b"), Some("a"));
        assert!(matches!(err, Err(StrataError::UniqueConstraint)));
        assert_eq!(index.find_all(Some("b")), vec![1]);
        // Setting a row to its own value is not a violation.
        index.set(0, Some("a"), Some("a")).unwrap();
    }

    #[test]
    fn test_set_moves_mapping() {
        let mut index = StringIndex::new(true);
        index.insert(0, Some("old"), 1, true).unwrap();
        index.set(0, Some("old"), Some("new")).unwrap();
        assert_eq!(index.count(Some("old")), 0);
        assert_eq!(index.find_all(Some("new")), vec![0]);
    }

    #[test]
    fn test_clear() {
        let mut index = StringIndex::new(true);
        index.insert(0, Some("a"), 1, true).unwrap();
        index.clear();
        assert_eq!(index.count(Some("a")), 0);
        assert_eq!(index.find_first(Some("a")), None);
    }

    #[test]
    fn test_verify_against() {
        let mut index = StringIndex::new(true);
        let values = ["x", "y", "x"];
        for (i, v) in values.iter().enumerate() {
            index.insert(i, Some(v), 1, true).unwrap();
        }
        index
            .verify_against(3, |row| Some(values[row].to_string()))
            .unwrap();
        assert!(index
            .verify_against(3, |_| Some("wrong".to_string()))
            .is_err());
    }
}
