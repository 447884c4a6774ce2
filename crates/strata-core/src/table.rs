//! Thin table and group front door.
//!
//! A table is a spec plus one column accessor per spec entry, rooted in
//! a shared columns node (one ref slot per column, plus a reserved slot
//! after each indexed column). A group is an ordered registry of tables
//! giving link columns their `table_ndx → table` resolution and hosting
//! the cascade closure over strong links.
//!
//! Nested tables are the same type: a sub-table accessor wraps the
//! columns node stored in its parent cell and registers itself with the
//! parent column's accessor map.

use crate::cascade::{CascadeRow, CascadeState};
use crate::column::{
    BacklinkColumn, BinaryColumn, Column, IndexedColumn, IntColumn,
    LinkColumn, ScalarColumn, StringColumn, SubtableColumn,
};
use crate::column::subtable::SharedSubtableMap;
use crate::leaf::{create_ref_leaf, fixed, indirect, strings};
use crate::spec::Spec;
use crate::write::OutputSink;
use std::cell::RefCell;
use std::rc::Rc;
use strata_arena::{Arena, Ref};
use strata_common::{ColumnAttr, ColumnType, EngineConfig, IndexConfig, Result, StrataError};
use tracing::debug;

pub type TableRef = Rc<RefCell<Table>>;

/// Registration of a nested-table accessor with its parent column.
struct Registration {
    map: SharedSubtableMap,
    id: u64,
    row: usize,
    /// Keeps the parent table alive while this accessor lives.
    _parent: Option<TableRef>,
}

pub struct Table {
    arena: Arena,
    spec: Spec,
    columns_ref: Ref,
    cols: Vec<Column>,
    num_rows: usize,
    /// Index within the owning group; None for nested tables.
    table_ndx: Option<usize>,
    /// Index policy inherited from the owning group.
    index_config: IndexConfig,
    detached: bool,
    marked: bool,
    version: u64,
    registration: Option<Registration>,
}

impl Table {
    /// Creates a free-standing (group-level) table.
    pub fn create(arena: &Arena) -> Result<TableRef> {
        let spec = Spec::create_empty(arena)?;
        let columns_ref = arena.alloc(strata_arena::FLAG_HAS_REFS, 8, 8)?;
        Ok(Rc::new(RefCell::new(Table {
            arena: arena.clone(),
            spec,
            columns_ref,
            cols: Vec::new(),
            num_rows: 0,
            table_ndx: None,
            index_config: IndexConfig::default(),
            detached: false,
            marked: false,
            version: 0,
            registration: None,
        })))
    }

    /// Creates an accessor for a nested table rooted at `columns_ref`.
    pub(crate) fn new_subtable(
        arena: &Arena,
        spec_ref: Ref,
        columns_ref: Ref,
        map: SharedSubtableMap,
        row: usize,
        parent: Option<TableRef>,
    ) -> Result<Table> {
        let spec = Spec::from_ref(arena, spec_ref)?;
        let mut table = Table {
            arena: arena.clone(),
            spec,
            columns_ref,
            cols: Vec::new(),
            num_rows: 0,
            table_ndx: None,
            index_config: IndexConfig::default(),
            detached: false,
            marked: false,
            version: 0,
            registration: Some(Registration {
                map,
                id: u64::MAX,
                row,
                _parent: parent,
            }),
        };
        table.build_column_accessors()?;
        table.num_rows = table.cols.first().map(|c| c.size()).unwrap_or(0);
        Ok(table)
    }

    pub(crate) fn set_registration_id(&mut self, id: u64) {
        if let Some(reg) = self.registration.as_mut() {
            reg.id = id;
        }
    }

    /// Materializes an empty columns node for the given spec: one empty
    /// root per column, plus a reserved slot per indexed column.
    pub(crate) fn create_columns_from_spec(arena: &Arena, spec_ref: Ref) -> Result<Ref> {
        let spec = Spec::from_ref(arena, spec_ref)?;
        let mut columns = arena.alloc(strata_arena::FLAG_HAS_REFS, 8, 8)?;
        let n = spec.column_count();
        for i in 0..n {
            let root = create_empty_root(arena, spec.column_type(i)?)?;
            let slots = arena.node_size(columns);
            fixed::insert(arena, &mut columns, slots, &root.to_le_bytes())?;
            if spec.column_attr(i)?.is_indexed() {
                let slots = arena.node_size(columns);
                fixed::insert(arena, &mut columns, slots, &0u64.to_le_bytes())?;
            }
        }
        Ok(columns)
    }

    /// Row count of a nested table without building accessors.
    pub(crate) fn nested_size(arena: &Arena, spec_ref: Ref, columns_ref: Ref) -> Result<usize> {
        let spec = Spec::from_ref(arena, spec_ref)?;
        if spec.column_count() == 0 {
            return Ok(0);
        }
        let root = arena.read_u64(columns_ref, spec.column_ndx_in_parent(0));
        let col = make_column(arena, &spec, 0, root)?;
        Ok(col.size())
    }

    fn build_column_accessors(&mut self) -> Result<()> {
        self.cols.clear();
        let n = self.spec.column_count();
        for i in 0..n {
            let slot = self.spec.column_ndx_in_parent(i);
            let root = self.arena.read_u64(self.columns_ref, slot);
            let mut col = make_column(&self.arena, &self.spec, i, root)?;
            col.base_mut().set_parent(self.columns_ref, slot);
            self.cols.push(col);
        }
        Ok(())
    }

    // =========================================================================
    // Structure
    // =========================================================================

    pub fn is_attached(&self) -> bool {
        !self.detached
    }

    fn check_attached(&self) -> Result<()> {
        if self.detached {
            Err(StrataError::DetachedAccess)
        } else {
            Ok(())
        }
    }

    pub fn size(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn column_count(&self) -> usize {
        self.cols.len()
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn spec_mut(&mut self) -> &mut Spec {
        &mut self.spec
    }

    pub(crate) fn columns_ref(&self) -> Ref {
        self.columns_ref
    }

    pub fn set_table_ndx(&mut self, ndx: usize) {
        self.table_ndx = Some(ndx);
    }

    pub fn table_ndx(&self) -> Option<usize> {
        self.table_ndx
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub(crate) fn set_index_config(&mut self, config: IndexConfig) {
        self.index_config = config;
    }

    /// Appends a column to the schema. Existing rows get default values.
    /// The group's index policy is folded into the persisted attributes,
    /// so an `enforce_unique` engine makes every indexed column unique.
    pub fn add_column(
        &mut self,
        column_type: ColumnType,
        name: &str,
        attr: ColumnAttr,
    ) -> Result<usize> {
        self.check_attached()?;
        if self.registration.is_some() {
            // A live nested accessor cannot re-shape its schema; mutate
            // the parent spec's subspec before materializing accessors.
            return Err(StrataError::Internal(
                "cannot add columns through a live nested-table accessor".to_string(),
            ));
        }
        let attr = if attr.is_indexed() && self.index_config.enforce_unique {
            attr.with(ColumnAttr::UNIQUE)
        } else {
            attr
        };
        let ndx = self.spec.column_count();
        self.spec.insert_column(ndx, column_type, name, attr)?;

        let root = create_empty_root_for_spec(&self.arena, &self.spec, ndx)?;
        let slot = self.spec.column_ndx_in_parent(ndx);
        let mut columns = self.columns_ref;
        fixed::insert(&self.arena, &mut columns, slot, &root.to_le_bytes())?;
        if attr.is_indexed() {
            fixed::insert(&self.arena, &mut columns, slot + 1, &0u64.to_le_bytes())?;
        }
        if columns != self.columns_ref {
            self.columns_ref = columns;
            for col in self.cols.iter_mut() {
                let old_ndx = col.base().ndx_in_parent().unwrap_or(0);
                col.base_mut().set_parent(columns, old_ndx);
            }
        }

        let mut col = make_column(&self.arena, &self.spec, ndx, root)?;
        col.base_mut().set_parent(self.columns_ref, slot);
        if self.num_rows > 0 {
            col.insert_rows(0, self.num_rows, true)?;
        }
        if let (Column::String(c), true) = (&mut col, attr.is_indexed()) {
            c.create_search_index(!attr.is_unique())?;
        }
        self.cols.push(col);
        debug!(column = name, ?column_type, "column added");
        Ok(ndx)
    }

    pub fn column(&self, ndx: usize) -> Result<&Column> {
        self.cols
            .get(ndx)
            .ok_or_else(|| StrataError::out_of_bounds(ndx, self.cols.len()))
    }

    pub fn column_mut(&mut self, ndx: usize) -> Result<&mut Column> {
        let n = self.cols.len();
        self.cols
            .get_mut(ndx)
            .ok_or_else(|| StrataError::out_of_bounds(ndx, n))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.spec.column_index_by_name(name)
    }

    // =========================================================================
    // Row operations
    // =========================================================================

    /// Appends `num_rows` default-valued rows; returns the first new
    /// row's index.
    pub fn add_empty_rows(&mut self, num_rows: usize) -> Result<usize> {
        self.check_attached()?;
        let first = self.num_rows;
        for col in self.cols.iter_mut() {
            col.insert_rows(first, num_rows, true)?;
        }
        self.num_rows += num_rows;
        Ok(first)
    }

    pub fn insert_empty_rows(&mut self, row: usize, num_rows: usize) -> Result<()> {
        self.check_attached()?;
        if row > self.num_rows {
            return Err(StrataError::out_of_bounds(row, self.num_rows));
        }
        for col in self.cols.iter_mut() {
            col.insert_rows(row, num_rows, row == self.num_rows)?;
        }
        self.num_rows += num_rows;
        Ok(())
    }

    pub fn erase_row(&mut self, row: usize) -> Result<()> {
        self.check_attached()?;
        let is_last = row + 1 == self.num_rows;
        for col in self.cols.iter_mut() {
            col.erase_row(row, is_last)?;
        }
        self.num_rows -= 1;
        Ok(())
    }

    /// Raw per-column move-last-over. Link fixups across tables are the
    /// group's concern.
    pub fn move_last_over(&mut self, row: usize) -> Result<()> {
        self.check_attached()?;
        if row >= self.num_rows {
            return Err(StrataError::out_of_bounds(row, self.num_rows));
        }
        let last = self.num_rows - 1;
        for col in self.cols.iter_mut() {
            col.move_last_over(row, last)?;
        }
        self.num_rows -= 1;
        Ok(())
    }

    /// Raw per-column clear. Cascading through strong links is the
    /// group's concern; see `Group::clear_table`.
    pub fn clear(&mut self) -> Result<()> {
        self.check_attached()?;
        for col in self.cols.iter_mut() {
            col.clear()?;
        }
        self.num_rows = 0;
        Ok(())
    }

    // =========================================================================
    // Typed cell access
    // =========================================================================

    fn int_col(&self, ndx: usize) -> Result<&IntColumn> {
        match self.column(ndx)? {
            Column::Int(c) => Ok(c),
            other => Err(type_mismatch("Int", other)),
        }
    }

    fn int_col_mut(&mut self, ndx: usize) -> Result<&mut IntColumn> {
        match self.column_mut(ndx)? {
            Column::Int(c) => Ok(c),
            other => Err(type_mismatch("Int", other)),
        }
    }

    fn string_col(&self, ndx: usize) -> Result<&StringColumn> {
        match self.column(ndx)? {
            Column::String(c) => Ok(c),
            other => Err(type_mismatch("String", other)),
        }
    }

    fn string_col_mut(&mut self, ndx: usize) -> Result<&mut StringColumn> {
        match self.column_mut(ndx)? {
            Column::String(c) => Ok(c),
            other => Err(type_mismatch("String", other)),
        }
    }

    pub fn get_int(&self, col: usize, row: usize) -> Result<i64> {
        self.int_col(col)?.get(row)
    }

    pub fn set_int(&mut self, col: usize, row: usize, value: i64) -> Result<()> {
        self.int_col_mut(col)?.set(row, value)
    }

    pub fn get_bool(&self, col: usize, row: usize) -> Result<bool> {
        match self.column(col)? {
            Column::Bool(c) => c.get(row),
            other => Err(type_mismatch("Bool", other)),
        }
    }

    pub fn set_bool(&mut self, col: usize, row: usize, value: bool) -> Result<()> {
        match self.column_mut(col)? {
            Column::Bool(c) => c.set(row, value),
            other => Err(type_mismatch("Bool", other)),
        }
    }

    pub fn get_float(&self, col: usize, row: usize) -> Result<f64> {
        match self.column(col)? {
            Column::Float(c) => c.get(row),
            other => Err(type_mismatch("Float", other)),
        }
    }

    pub fn set_float(&mut self, col: usize, row: usize, value: f64) -> Result<()> {
        match self.column_mut(col)? {
            Column::Float(c) => c.set(row, value),
            other => Err(type_mismatch("Float", other)),
        }
    }

    pub fn get_string(&self, col: usize, row: usize) -> Result<Option<String>> {
        self.string_col(col)?.get(row)
    }

    pub fn set_string(&mut self, col: usize, row: usize, value: Option<&str>) -> Result<()> {
        self.string_col_mut(col)?.set(row, value)
    }

    pub fn get_binary(&self, col: usize, row: usize) -> Result<Option<Vec<u8>>> {
        match self.column(col)? {
            Column::Binary(c) => c.get(row),
            other => Err(type_mismatch("Binary", other)),
        }
    }

    pub fn set_binary(&mut self, col: usize, row: usize, value: Option<&[u8]>) -> Result<()> {
        match self.column_mut(col)? {
            Column::Binary(c) => c.set(row, value),
            other => Err(type_mismatch("Binary", other)),
        }
    }

    pub fn get_link(&self, col: usize, row: usize) -> Result<Option<usize>> {
        match self.column(col)? {
            Column::Link(c) => c.get_link(row),
            other => Err(type_mismatch("Link", other)),
        }
    }

    /// Live handle to the nested table in the given cell. The handle is
    /// shared and cached; see the sub-table column for lifetime rules.
    pub fn get_subtable(this: &TableRef, col: usize, row: usize) -> Result<TableRef> {
        let mut table = this.borrow_mut();
        table.check_attached()?;
        match table.column_mut(col)? {
            Column::Subtable(c) => {
                c.set_parent_table(this);
                c.get_subtable_tableref(row)
            }
            other => Err(type_mismatch("Table", other)),
        }
    }

    pub fn get_subtable_size(&self, col: usize, row: usize) -> Result<usize> {
        match self.column(col)? {
            Column::Subtable(c) => c.get_subtable_size(row),
            other => Err(type_mismatch("Table", other)),
        }
    }

    // =========================================================================
    // Accessor lifecycle
    // =========================================================================

    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        for col in self.cols.iter_mut() {
            col.detach();
        }
    }

    pub(crate) fn set_row_in_parent(&mut self, row: usize) {
        if let Some(reg) = self.registration.as_mut() {
            reg.row = row;
        }
    }

    pub fn row_in_parent(&self) -> Option<usize> {
        self.registration.as_ref().map(|r| r.row)
    }

    pub fn mark(&mut self) {
        self.marked = true;
    }

    pub fn is_marked(&self) -> bool {
        self.marked
    }

    pub fn recursive_mark(&mut self) {
        self.marked = true;
        for col in self.cols.iter() {
            if let Column::Subtable(c) = col {
                c.accessor_map().recursive_mark();
            }
        }
    }

    pub fn update_from_parent(&mut self, old_baseline: u64) {
        for col in self.cols.iter_mut() {
            col.update_from_parent(old_baseline);
        }
        let _ = self.spec.update_from_parent(old_baseline);
    }

    /// Rebuilds every column accessor from the spec and columns node.
    pub fn refresh_accessor_tree(&mut self) -> Result<()> {
        let n = self.spec.column_count();
        if n != self.cols.len() {
            // Structure changed: rebuild from scratch.
            self.build_column_accessors()?;
        } else {
            for (i, col) in self.cols.iter_mut().enumerate() {
                col.refresh_accessor_tree(i, &self.spec)?;
            }
        }
        self.num_rows = self.cols.first().map(|c| c.size()).unwrap_or(0);
        self.marked = false;
        Ok(())
    }

    /// Refreshes only the spec accessor (the cheap path for unmarked
    /// nested tables).
    pub fn refresh_spec_accessor(&mut self) -> Result<()> {
        self.spec.update_from_parent(u64::MAX).map(|_| ())
    }

    /// Content equality across all non-structural columns; nested
    /// tables compare by cell size.
    pub fn equals_content(&self, other: &Table) -> Result<bool> {
        if !self.spec.equals(&other.spec)? || self.num_rows != other.num_rows {
            return Ok(false);
        }
        for (a, b) in self.cols.iter().zip(other.cols.iter()) {
            let equal = match (a, b) {
                (Column::Int(x), Column::Int(y)) => x.compare(y),
                (Column::Bool(x), Column::Bool(y)) => x.compare(y),
                (Column::Float(x), Column::Float(y)) => x.compare(y),
                (Column::String(x), Column::String(y)) => x.compare_string(y),
                (Column::Binary(x), Column::Binary(y)) => x.compare_binary(y),
                (Column::Subtable(x), Column::Subtable(y)) => {
                    let n = x.size();
                    n == y.size()
                        && (0..n).all(|i| {
                            x.get_subtable_size(i).ok() == y.get_subtable_size(i).ok()
                        })
                }
                (Column::Link(x), Column::Link(y)) => {
                    let n = x.size();
                    n == y.size()
                        && (0..n).all(|i| x.get_link(i).ok() == y.get_link(i).ok())
                }
                (Column::BackLink(_), Column::BackLink(_)) => true,
                _ => false,
            };
            if !equal {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn write_columns(
        &self,
        offset: usize,
        size: usize,
        sink: &mut dyn OutputSink,
    ) -> Result<Vec<u64>> {
        self.cols
            .iter()
            .map(|c| c.write(offset, size, self.num_rows, sink))
            .collect()
    }

    pub fn verify(&self) -> Result<()> {
        self.spec.verify()?;
        for col in self.cols.iter() {
            col.verify()?;
            if col.size() != self.num_rows {
                return Err(StrataError::invariant(
                    "column sizes disagree within one table",
                ));
            }
        }
        Ok(())
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        // A nested accessor deregisters itself; the map tolerates a
        // missing entry (construction may have failed after add). The
        // strong parent guard is released after this body, so the
        // parent outlives the deregistration.
        if let Some(reg) = self.registration.take() {
            if reg.id != u64::MAX {
                reg.map.remove_by_id(reg.id);
            }
        }
    }
}

fn type_mismatch(expected: &str, got: &Column) -> StrataError {
    let actual = match got {
        Column::Int(_) => "Int",
        Column::Bool(_) => "Bool",
        Column::Float(_) => "Float",
        Column::String(_) => "String",
        Column::Binary(_) => "Binary",
        Column::Subtable(_) => "Table",
        Column::Link(_) => "Link",
        Column::BackLink(_) => "BackLink",
    };
    StrataError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Creates the empty root node for a column of the given type.
fn create_empty_root(arena: &Arena, column_type: ColumnType) -> Result<Ref> {
    match column_type {
        ColumnType::Int | ColumnType::Float => fixed::create(arena, 0, 8),
        ColumnType::Bool => fixed::create(arena, 0, 1),
        ColumnType::String | ColumnType::StringEnum => strings::create(arena),
        ColumnType::Binary => indirect::create(arena),
        ColumnType::Table | ColumnType::BackLink => create_ref_leaf(arena),
        ColumnType::Link | ColumnType::LinkList => fixed::create(arena, 0, 8),
    }
}

fn create_empty_root_for_spec(arena: &Arena, spec: &Spec, ndx: usize) -> Result<Ref> {
    create_empty_root(arena, spec.column_type(ndx)?)
}

/// Builds the typed accessor for spec column `ndx` on an existing root.
fn make_column(arena: &Arena, spec: &Spec, ndx: usize, root: Ref) -> Result<Column> {
    let attr = spec.column_attr(ndx)?;
    let nullable = attr.is_nullable();
    Ok(match spec.column_type(ndx)? {
        ColumnType::Int => Column::Int(ScalarColumn::from_ref(arena, root)),
        ColumnType::Bool => Column::Bool(ScalarColumn::from_ref(arena, root)),
        ColumnType::Float => Column::Float(ScalarColumn::from_ref(arena, root)),
        ColumnType::String => Column::String(StringColumn::from_ref(arena, root, nullable)),
        ColumnType::StringEnum => {
            return Err(StrataError::Internal(
                "enum-coded string columns have no accessor in this build".to_string(),
            ))
        }
        ColumnType::Binary => Column::Binary(BinaryColumn::from_ref(arena, root, nullable)),
        ColumnType::Table => {
            let subspec_ndx = spec.get_subspec_ndx(ndx);
            let subspec_ref = spec.get_subspec_ref(subspec_ndx)?;
            Column::Subtable(SubtableColumn::from_ref(arena, root, subspec_ref))
        }
        ColumnType::Link => {
            let target = spec.get_opposite_link_table_ndx(ndx).unwrap_or(0);
            Column::Link(LinkColumn::from_ref(
                arena,
                root,
                target,
                attr.is_strong_links(),
            ))
        }
        ColumnType::LinkList => {
            return Err(StrataError::Internal(
                "link-list columns have no accessor in this build".to_string(),
            ))
        }
        ColumnType::BackLink => {
            let origin_table = spec.get_opposite_link_table_ndx(ndx).unwrap_or(0);
            let origin_col = spec.get_origin_column_ndx(ndx).unwrap_or(0);
            Column::BackLink(BacklinkColumn::from_ref(arena, root, origin_table, origin_col))
        }
    })
}

// =============================================================================
// Group
// =============================================================================

/// Ordered registry of group-level tables sharing one arena.
pub struct Group {
    arena: Arena,
    config: EngineConfig,
    tables: Vec<TableRef>,
}

impl Group {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Builds the group's arena from the config and hands the index
    /// policy to every table created through it.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            arena: Arena::with_config(config.arena.clone()),
            config,
            tables: Vec::new(),
        }
    }

    pub fn with_arena(arena: Arena) -> Self {
        Self {
            arena,
            config: EngineConfig::default(),
            tables: Vec::new(),
        }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn add_table(&mut self) -> Result<TableRef> {
        let table = Table::create(&self.arena)?;
        {
            let mut t = table.borrow_mut();
            t.set_table_ndx(self.tables.len());
            t.set_index_config(self.config.index.clone());
        }
        self.tables.push(table.clone());
        Ok(table)
    }

    pub fn table(&self, ndx: usize) -> Result<TableRef> {
        self.tables
            .get(ndx)
            .cloned()
            .ok_or(StrataError::TableNotFound(ndx))
    }

    /// Adds a link column to `origin` targeting `target`, wiring the
    /// reciprocal backlink column and both specs' tagged entries.
    pub fn add_link_column(
        &mut self,
        origin_ndx: usize,
        name: &str,
        target_ndx: usize,
        strong: bool,
    ) -> Result<usize> {
        let origin = self.table(origin_ndx)?;
        let target = self.table(target_ndx)?;

        let attr = if strong {
            ColumnAttr::STRONG_LINKS
        } else {
            ColumnAttr::NONE
        };
        let link_col = {
            let mut t = origin.borrow_mut();
            let col = t.add_column(ColumnType::Link, name, attr)?;
            t.spec.set_opposite_link_table_ndx(col, target_ndx)?;
            // Rebuild the accessor now that the spec names its target.
            let Table { spec, cols, .. } = &mut *t;
            if let Column::Link(c) = &mut cols[col] {
                c.refresh_accessor_tree(col, spec)?;
            }
            col
        };

        {
            let mut t = target.borrow_mut();
            let col = t.add_column(ColumnType::BackLink, "", ColumnAttr::NONE)?;
            t.spec.set_opposite_link_table_ndx(col, origin_ndx)?;
            t.spec.set_backlink_origin_column(col, link_col)?;
            let Table { spec, cols, .. } = &mut *t;
            if let Column::BackLink(c) = &mut cols[col] {
                c.refresh_accessor_tree(col, spec)?;
            }
        }
        debug!(origin = origin_ndx, target = target_ndx, strong, "link column wired");
        Ok(link_col)
    }

    /// Sets a link cell, keeping the reciprocal backlink coherent.
    pub fn set_link(
        &self,
        origin_ndx: usize,
        col: usize,
        row: usize,
        new_target: Option<usize>,
    ) -> Result<()> {
        let origin = self.table(origin_ndx)?;
        let (old_target, target_ndx) = {
            let mut t = origin.borrow_mut();
            match t.column_mut(col)? {
                Column::Link(c) => {
                    let target_ndx = c.target_table_ndx();
                    let old = c.set_link_raw(row, new_target)?;
                    (old, target_ndx)
                }
                other => return Err(type_mismatch("Link", other)),
            }
        };

        let target = self.table(target_ndx)?;
        let backlink_col = target
            .borrow()
            .spec
            .find_backlink_column(origin_ndx, col)?;
        if let Some(old) = old_target {
            let mut t = target.borrow_mut();
            if let Column::BackLink(c) = t.column_mut(backlink_col)? {
                c.remove_backlink(old, row)?;
            }
        }
        if let Some(new) = new_target {
            let mut t = target.borrow_mut();
            if let Column::BackLink(c) = t.column_mut(backlink_col)? {
                c.add_backlink(new, row)?;
            }
        }
        Ok(())
    }

    /// Strong links into `(table_ndx, row)` from rows *outside* the
    /// cascade state. Weak links never keep a row alive. Rows of the
    /// `stop_on_table` table count as inside the closure, as if all of
    /// them had been seeded up front.
    pub(crate) fn external_strong_backlinks(
        &self,
        table_ndx: usize,
        row: usize,
        state: &CascadeState,
    ) -> Result<usize> {
        let table = self.table(table_ndx)?;
        let t = table.borrow();
        let mut external = 0;
        for col in t.cols.iter() {
            if let Column::BackLink(c) = col {
                let origin_table_ndx = c.origin_table_ndx();
                let origin_col = c.origin_col_ndx();
                let strong = {
                    let origin = self.table(origin_table_ndx)?;
                    let strong = origin
                        .borrow()
                        .spec
                        .column_attr(origin_col)?
                        .is_strong_links();
                    strong
                };
                if !strong {
                    continue;
                }
                let count = c.backlink_count(row)?;
                for i in 0..count {
                    let origin_row = c.get_backlink(row, i)?;
                    let origin = CascadeRow {
                        table_ndx: origin_table_ndx,
                        row_ndx: origin_row,
                    };
                    let in_closure = state.contains(&origin)
                        || state.stop_on_table == Some(origin_table_ndx);
                    if !in_closure {
                        external += 1;
                    }
                }
            }
        }
        Ok(external)
    }

    /// Breaks one row's links through the column-family cascade hooks,
    /// returning the rows that joined the closure.
    fn break_links_of_row(
        &self,
        current: CascadeRow,
        state: &mut CascadeState,
    ) -> Result<Vec<CascadeRow>> {
        let table = self.table(current.table_ndx)?;
        let t = table.borrow();
        let mut added = Vec::new();
        for (i, col) in t.cols.iter().enumerate() {
            added.extend(col.cascade_break_backlinks_to(i, current.row_ndx, state, self)?);
        }
        Ok(added)
    }

    /// Computes the transitive closure of rows to delete through strong
    /// links, honoring the state's stop guards. Each column contributes
    /// through its cascade hook; ordinary columns are inert.
    pub fn cascade_collect(&self, seeds: &[CascadeRow], state: &mut CascadeState) -> Result<()> {
        let mut worklist: Vec<CascadeRow> = Vec::new();
        for &seed in seeds {
            if state.insert(seed) {
                worklist.push(seed);
            }
        }
        while let Some(current) = worklist.pop() {
            let added = self.break_links_of_row(current, state)?;
            worklist.extend(added);
        }
        Ok(())
    }

    /// Removes a row by move-last-over, re-pointing links that referred
    /// to the moved last row.
    pub fn move_last_over(&self, table_ndx: usize, row: usize) -> Result<()> {
        let table = self.table(table_ndx)?;
        let last = {
            let t = table.borrow();
            if row >= t.num_rows {
                return Err(StrataError::out_of_bounds(row, t.num_rows));
            }
            t.num_rows - 1
        };

        // Collect link fixups referring to the deleted row and the
        // moved row before any mutation.
        let mut retarget: Vec<(usize, usize, usize)> = Vec::new(); // (origin_table, origin_col, origin_row)
        let mut sever: Vec<(usize, usize, usize)> = Vec::new();
        {
            let t = table.borrow();
            for col in t.cols.iter() {
                if let Column::BackLink(c) = col {
                    for i in 0..c.backlink_count(row)? {
                        sever.push((c.origin_table_ndx(), c.origin_col_ndx(), c.get_backlink(row, i)?));
                    }
                    if last != row {
                        for i in 0..c.backlink_count(last)? {
                            retarget.push((
                                c.origin_table_ndx(),
                                c.origin_col_ndx(),
                                c.get_backlink(last, i)?,
                            ));
                        }
                    }
                }
            }
        }

        // Links into the deleted row become null (their targets are
        // gone); the backlink cell itself dies with the row below.
        for (origin_table, origin_col, origin_row) in sever {
            let origin = self.table(origin_table)?;
            let mut t = origin.borrow_mut();
            if let Column::Link(c) = t.column_mut(origin_col)? {
                c.set_link_raw(origin_row, None)?;
            }
        }
        // The deleted row's own outgoing links deregister from their
        // targets' backlink cells.
        let dying_links: Vec<(usize, usize, Option<usize>)> = {
            let t = table.borrow();
            t.cols
                .iter()
                .enumerate()
                .filter_map(|(i, col)| match col {
                    Column::Link(c) => {
                        Some((i, c.target_table_ndx(), c.get_link(row).ok().flatten()))
                    }
                    _ => None,
                })
                .collect()
        };
        for (col_ndx, target_table, target_row) in dying_links {
            let Some(target_row) = target_row else { continue };
            let target = self.table(target_table)?;
            let backlink_col = target
                .borrow()
                .spec
                .find_backlink_column(table_ndx, col_ndx)?;
            let mut t = target.borrow_mut();
            if let Column::BackLink(c) = t.column_mut(backlink_col)? {
                c.remove_backlink(target_row, row)?;
            }
        }
        // Links into the moved row follow it to its new index.
        for (origin_table, origin_col, origin_row) in retarget {
            let origin = self.table(origin_table)?;
            let mut t = origin.borrow_mut();
            if let Column::Link(c) = t.column_mut(origin_col)? {
                c.set_link_raw(origin_row, Some(row))?;
            }
        }
        // Outgoing links of the moved row keep their targets, but the
        // targets' backlink entries must name the new origin row.
        if last != row {
            let moved_links: Vec<(usize, usize, Option<usize>)> = {
                let t = table.borrow();
                t.cols
                    .iter()
                    .enumerate()
                    .filter_map(|(i, col)| match col {
                        Column::Link(c) => {
                            Some((i, c.target_table_ndx(), c.get_link(last).ok().flatten()))
                        }
                        _ => None,
                    })
                    .collect()
            };
            for (col_ndx, target_table, target_row) in moved_links {
                let Some(target_row) = target_row else { continue };
                let target = self.table(target_table)?;
                let backlink_col = target
                    .borrow()
                    .spec
                    .find_backlink_column(table_ndx, col_ndx)?;
                let mut t = target.borrow_mut();
                if let Column::BackLink(c) = t.column_mut(backlink_col)? {
                    c.update_backlink(target_row, last, row)?;
                }
            }
        }

        let result = table.borrow_mut().move_last_over(row);
        result
    }

    /// Cascades the seeds through strong links and removes the closure,
    /// highest row indices first so earlier removals cannot shift later
    /// targets.
    pub fn cascade_remove(&self, seeds: &[CascadeRow]) -> Result<Vec<CascadeRow>> {
        let mut state = CascadeState::new();
        self.cascade_collect(seeds, &mut state)?;
        let mut doomed = state.rows.clone();
        doomed.sort_by(|a, b| b.row_ndx.cmp(&a.row_ndx));
        for row in &doomed {
            self.move_last_over(row.table_ndx, row.row_ndx)?;
        }
        Ok(state.rows)
    }

    /// Empties a table, first cascading through every row's strong
    /// links. The state's `stop_on_table` guard suppresses recursion
    /// back into the clearing table, whose rows all die anyway. Returns
    /// the rows removed from *other* tables.
    pub fn clear_table(&self, table_ndx: usize) -> Result<Vec<CascadeRow>> {
        let table = self.table(table_ndx)?;
        let num_rows = table.borrow().size();

        // Every column contributes its whole-column cascade hook, then
        // the closure expands transitively outside the stopped table.
        let mut state = CascadeState::with_stop_on_table(table_ndx);
        let mut worklist = {
            let t = table.borrow();
            let mut added = Vec::new();
            for (i, col) in t.cols.iter().enumerate() {
                added.extend(col.cascade_break_backlinks_to_all_rows(
                    i,
                    num_rows,
                    &mut state,
                    self,
                )?);
            }
            added
        };
        while let Some(current) = worklist.pop() {
            worklist.extend(self.break_links_of_row(current, &mut state)?);
        }

        // Remove the closure (all rows live outside the cleared table),
        // highest row indices first.
        let mut doomed = state.rows.clone();
        doomed.sort_by(|a, b| b.row_ndx.cmp(&a.row_ndx));
        for row in &doomed {
            self.move_last_over(row.table_ndx, row.row_ndx)?;
        }

        // Surviving targets of the cleared rows' remaining links lose
        // the backlink entries naming cleared-table origins.
        let remaining: Vec<(usize, usize, usize, usize)> = {
            let t = table.borrow();
            let mut links = Vec::new();
            for (i, col) in t.cols.iter().enumerate() {
                if let Column::Link(c) = col {
                    let target_table = c.target_table_ndx();
                    if target_table == table_ndx {
                        continue;
                    }
                    for row in 0..t.num_rows {
                        if let Some(target_row) = c.get_link(row)? {
                            links.push((i, target_table, target_row, row));
                        }
                    }
                }
            }
            links
        };
        for (col_ndx, target_table, target_row, origin_row) in remaining {
            let target = self.table(target_table)?;
            let backlink_col = target
                .borrow()
                .spec
                .find_backlink_column(table_ndx, col_ndx)?;
            let mut t = target.borrow_mut();
            if let Column::BackLink(c) = t.column_mut(backlink_col)? {
                c.remove_backlink(target_row, origin_row)?;
            }
        }

        // Links from surviving rows of other tables into the cleared
        // table become null.
        let incoming: Vec<(usize, usize, usize)> = {
            let t = table.borrow();
            let mut origins = Vec::new();
            for col in t.cols.iter() {
                if let Column::BackLink(c) = col {
                    for row in 0..t.num_rows {
                        for i in 0..c.backlink_count(row)? {
                            origins.push((
                                c.origin_table_ndx(),
                                c.origin_col_ndx(),
                                c.get_backlink(row, i)?,
                            ));
                        }
                    }
                }
            }
            origins
        };
        for (origin_table, origin_col, origin_row) in incoming {
            if origin_table == table_ndx {
                continue;
            }
            let origin = self.table(origin_table)?;
            let mut t = origin.borrow_mut();
            if let Column::Link(c) = t.column_mut(origin_col)? {
                c.set_link_raw(origin_row, None)?;
            }
        }

        debug!(table = table_ndx, removed = doomed.len(), "table cleared with cascade");
        table.borrow_mut().clear()?;
        Ok(state.rows)
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}
