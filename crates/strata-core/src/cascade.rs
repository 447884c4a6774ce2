//! Cascade state: the set of rows scheduled for removal when strong
//! links into them break.
//!
//! The row set is kept sorted by `(table_ndx, row_ndx)` and de-duplicated
//! on insert. The two stop guards are mutually exclusive: `stop_on_table`
//! suppresses recursion into one whole table (bulk clear uses it to
//! avoid reentrance), `stop_on_link_list` suppresses recursion through
//! one specific link-list cell.

/// A (table, row) pair in lexicographic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CascadeRow {
    pub table_ndx: usize,
    pub row_ndx: usize,
}

#[derive(Default)]
pub struct CascadeState {
    /// Sorted, de-duplicated set of rows to delete.
    pub rows: Vec<CascadeRow>,
    /// No recursion into this table.
    pub stop_on_table: Option<usize>,
    /// No recursion through this (link-list column, row) cell.
    pub stop_on_link_list: Option<(usize, usize)>,
}

impl CascadeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop_on_table(table_ndx: usize) -> Self {
        Self {
            stop_on_table: Some(table_ndx),
            ..Self::default()
        }
    }

    pub fn with_stop_on_link_list(col_ndx: usize, row_ndx: usize) -> Self {
        Self {
            stop_on_link_list: Some((col_ndx, row_ndx)),
            ..Self::default()
        }
    }

    /// Inserts in sorted position; returns false if already present.
    pub fn insert(&mut self, row: CascadeRow) -> bool {
        debug_assert!(
            self.stop_on_table.is_none() || self.stop_on_link_list.is_none(),
            "stop guards are mutually exclusive"
        );
        match self.rows.binary_search(&row) {
            Ok(_) => false,
            Err(pos) => {
                self.rows.insert(pos, row);
                true
            }
        }
    }

    pub fn contains(&self, row: &CascadeRow) -> bool {
        self.rows.binary_search(row).is_ok()
    }
}
