//! Column-level schema.
//!
//! A spec is a small node cluster: a top node with three mandatory
//! child arrays (`types`, `names`, `attrs`) and two optional ones
//! (`subspecs`, `enumkeys`). The subspec array is sparse: only Table,
//! Link, LinkList and BackLink columns contribute entries (1, 1, 1 and
//! 2 respectively), so positions are recomputed from the type array on
//! every access. Backlink columns have no public name, so the names
//! array is shorter than the type array by their count.
//!
//! Foreign table and column indices are stored as tagged integers
//! (`(n << 1) | 1`) so `destroy_deep` never mistakes them for refs.

use crate::leaf::{blob, fixed};
use strata_arena::{tag_int, untag_int, Arena, Ref, FLAG_HAS_REFS};
use strata_common::{ColumnAttr, ColumnType, Result, StrataError};

const SLOT_TYPES: usize = 0;
const SLOT_NAMES: usize = 1;
const SLOT_ATTRS: usize = 2;
const SLOT_SUBSPECS: usize = 3;
const SLOT_ENUMKEYS: usize = 4;

/// Cached child-spec accessor slot, parallel to the subspecs array.
struct SubspecSlot {
    is_spec: bool,
    spec: Option<Box<Spec>>,
}

impl SubspecSlot {
    fn new(is_spec: bool) -> Self {
        Self {
            is_spec,
            spec: None,
        }
    }
}

pub struct Spec {
    arena: Arena,
    top: Ref,
    /// (subspecs node of the parent spec, entry index) when nested.
    parent: Option<(Ref, usize)>,
    subspec_ptrs: Vec<SubspecSlot>,
    has_strong_links: bool,
}

impl Spec {
    /// Creates an empty spec cluster and returns its accessor.
    pub fn create_empty(arena: &Arena) -> Result<Spec> {
        let top = Self::create_empty_ref(arena)?;
        Spec::from_ref(arena, top)
    }

    /// Allocates an empty spec cluster, returning the top ref only.
    pub fn create_empty_ref(arena: &Arena) -> Result<Ref> {
        let types = fixed::create(arena, 0, 8)?;
        let names = blob::create(arena)?;
        let attrs = fixed::create(arena, 0, 8)?;
        let top = arena.alloc(FLAG_HAS_REFS, 8, 3 * 8)?;
        arena.write_u64(top, SLOT_TYPES, types);
        arena.write_u64(top, SLOT_NAMES, names);
        arena.write_u64(top, SLOT_ATTRS, attrs);
        arena.set_node_size(top, 3);
        Ok(top)
    }

    /// Attaches an accessor to an existing spec cluster.
    pub fn from_ref(arena: &Arena, top: Ref) -> Result<Spec> {
        let top_size = arena.checked_header(top)?.size as usize;
        if !(3..=5).contains(&top_size) {
            return Err(StrataError::NodeCorrupted {
                ref_value: top,
                reason: format!("spec top has {top_size} slots"),
            });
        }
        let mut spec = Spec {
            arena: arena.clone(),
            top,
            parent: None,
            subspec_ptrs: Vec::new(),
            has_strong_links: false,
        };
        spec.reset_subspec_ptrs()?;
        spec.update_has_strong_link_columns()?;
        Ok(spec)
    }

    pub fn top_ref(&self) -> Ref {
        self.top
    }

    pub fn set_parent(&mut self, subspecs_node: Ref, ndx: usize) {
        self.parent = Some((subspecs_node, ndx));
    }

    pub fn ndx_in_parent(&self) -> Option<usize> {
        self.parent.map(|(_, n)| n)
    }

    pub fn detach(&mut self) {
        self.top = 0;
        self.subspec_ptrs.clear();
    }

    pub fn is_attached(&self) -> bool {
        self.top != 0
    }

    // =========================================================================
    // Array access helpers
    // =========================================================================

    fn array_ref(&self, slot: usize) -> Ref {
        self.arena.read_u64(self.top, slot)
    }

    fn types_ref(&self) -> Ref {
        self.array_ref(SLOT_TYPES)
    }

    fn has_subspecs(&self) -> bool {
        self.arena.node_size(self.top) > SLOT_SUBSPECS && self.array_ref(SLOT_SUBSPECS) != 0
    }

    fn has_enumkeys(&self) -> bool {
        self.arena.node_size(self.top) > SLOT_ENUMKEYS && self.array_ref(SLOT_ENUMKEYS) != 0
    }

    /// Inserts into one of the u64 child arrays, rewiring the top slot
    /// if the node moved.
    fn array_insert(&self, slot: usize, ndx: usize, value: u64) -> Result<()> {
        let mut r = self.array_ref(slot);
        let old = r;
        fixed::insert(&self.arena, &mut r, ndx, &value.to_le_bytes())?;
        if r != old {
            self.arena.write_u64(self.top, slot, r);
        }
        Ok(())
    }

    // =========================================================================
    // Column info
    // =========================================================================

    pub fn column_count(&self) -> usize {
        fixed::size(&self.arena, self.types_ref())
    }

    /// Number of columns with a public name (everything but backlinks).
    pub fn public_column_count(&self) -> usize {
        blob::size(&self.arena, self.array_ref(SLOT_NAMES))
    }

    pub fn column_type(&self, ndx: usize) -> Result<ColumnType> {
        if ndx >= self.column_count() {
            return Err(StrataError::out_of_bounds(ndx, self.column_count()));
        }
        let raw = fixed::get_u64(&self.arena, self.types_ref(), ndx);
        ColumnType::from_u8(raw as u8).ok_or_else(|| {
            StrataError::invariant(format!("unknown column type id {raw} at column {ndx}"))
        })
    }

    pub(crate) fn set_column_type(&self, ndx: usize, column_type: ColumnType) {
        fixed::set_u64(&self.arena, self.types_ref(), ndx, column_type as u64);
    }

    pub fn column_attr(&self, ndx: usize) -> Result<ColumnAttr> {
        if ndx >= self.column_count() {
            return Err(StrataError::out_of_bounds(ndx, self.column_count()));
        }
        let raw = fixed::get_u64(&self.arena, self.array_ref(SLOT_ATTRS), ndx);
        Ok(ColumnAttr::from_bits(raw as u8))
    }

    pub fn set_column_attr(&mut self, ndx: usize, attr: ColumnAttr) -> Result<()> {
        if ndx >= self.column_count() {
            return Err(StrataError::out_of_bounds(ndx, self.column_count()));
        }
        fixed::set_u64(&self.arena, self.array_ref(SLOT_ATTRS), ndx, attr.bits() as u64);
        self.update_has_strong_link_columns()
    }

    /// Name of a non-backlink column. Backlinks have no public name and
    /// indexing into names is not defined for them.
    pub fn column_name(&self, ndx: usize) -> Result<String> {
        let column_type = self.column_type(ndx)?;
        if !column_type.has_name() {
            return Err(StrataError::invariant("backlink columns have no name"));
        }
        let name_ndx = self.name_ndx(ndx);
        let bytes = blob::get(&self.arena, self.array_ref(SLOT_NAMES), name_ndx)
            .unwrap_or_default();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn column_index_by_name(&self, name: &str) -> Option<usize> {
        let n = self.column_count();
        (0..n).find(|&i| {
            self.column_type(i)
                .map(|t| t.has_name())
                .unwrap_or(false)
                && self.column_name(i).map(|s| s == name).unwrap_or(false)
        })
    }

    fn name_ndx(&self, column_ndx: usize) -> usize {
        (0..column_ndx)
            .filter(|&i| self.column_type(i).map(|t| t.has_name()).unwrap_or(false))
            .count()
    }

    /// Slot of this column's root in the hosting table's columns node.
    /// Indexed columns occupy one extra slot, so later columns shift.
    pub fn column_ndx_in_parent(&self, column_ndx: usize) -> usize {
        let offset = (0..column_ndx)
            .filter(|&i| {
                self.column_attr(i)
                    .map(|a| a.is_indexed())
                    .unwrap_or(false)
            })
            .count();
        column_ndx + offset
    }

    pub fn has_strong_link_columns(&self) -> bool {
        self.has_strong_links
    }

    fn update_has_strong_link_columns(&mut self) -> Result<()> {
        let n = self.column_count();
        self.has_strong_links = (0..n).any(|i| {
            self.column_attr(i)
                .map(|a| a.is_strong_links())
                .unwrap_or(false)
        });
        Ok(())
    }

    // =========================================================================
    // Subspec indexing
    // =========================================================================

    /// Position of `column_ndx`'s entry run in the sparse subspec array:
    /// the sum of entries contributed by all earlier columns.
    pub fn get_subspec_ndx(&self, column_ndx: usize) -> usize {
        (0..column_ndx)
            .map(|i| {
                self.column_type(i)
                    .map(|t| t.subspec_entries())
                    .unwrap_or(0)
            })
            .sum()
    }

    fn subspecs_size(&self) -> usize {
        if self.has_subspecs() {
            fixed::size(&self.arena, self.array_ref(SLOT_SUBSPECS))
        } else {
            0
        }
    }

    pub fn get_subspec_ref(&self, subspec_ndx: usize) -> Result<Ref> {
        if subspec_ndx >= self.subspecs_size() {
            return Err(StrataError::out_of_bounds(subspec_ndx, self.subspecs_size()));
        }
        Ok(fixed::get_u64(&self.arena, self.array_ref(SLOT_SUBSPECS), subspec_ndx))
    }

    /// Child-spec accessor for a Table column's entry, created on demand
    /// and cached.
    pub fn get_subspec_by_ndx(&mut self, subspec_ndx: usize) -> Result<&mut Spec> {
        if subspec_ndx >= self.subspec_ptrs.len() {
            return Err(StrataError::out_of_bounds(subspec_ndx, self.subspec_ptrs.len()));
        }
        if !self.subspec_ptrs[subspec_ndx].is_spec {
            return Err(StrataError::invariant(format!(
                "subspec entry {subspec_ndx} is not a nested spec"
            )));
        }
        if self.subspec_ptrs[subspec_ndx].spec.is_none() {
            let child_ref = self.get_subspec_ref(subspec_ndx)?;
            let mut child = Spec::from_ref(&self.arena, child_ref)?;
            child.set_parent(self.array_ref(SLOT_SUBSPECS), subspec_ndx);
            self.subspec_ptrs[subspec_ndx].spec = Some(Box::new(child));
        }
        Ok(self.subspec_ptrs[subspec_ndx]
            .spec
            .as_mut()
            .expect("cached above"))
    }

    /// Rebuilds the subspec cache skeleton from the type array.
    fn reset_subspec_ptrs(&mut self) -> Result<()> {
        let n = self.subspecs_size();
        self.subspec_ptrs.clear();
        self.subspec_ptrs.resize_with(n, || SubspecSlot::new(false));
        let cols = self.column_count();
        for i in 0..cols {
            if self.column_type(i)? == ColumnType::Table {
                let subspec_ndx = self.get_subspec_ndx(i);
                if subspec_ndx >= n {
                    return Err(StrataError::invariant(
                        "subspec array shorter than type array requires",
                    ));
                }
                self.subspec_ptrs[subspec_ndx].is_spec = true;
            }
        }
        Ok(())
    }

    /// Reassigns cached child specs' in-parent positions after the
    /// subspec array shifted under them.
    fn adj_subspec_ptrs(&mut self) {
        let subspecs = self.array_ref(SLOT_SUBSPECS);
        for (i, slot) in self.subspec_ptrs.iter_mut().enumerate() {
            if let Some(spec) = slot.spec.as_mut() {
                spec.set_parent(subspecs, i);
            }
        }
    }

    /// Makes sure the top node has a subspecs array to insert into.
    fn ensure_subspecs(&mut self) -> Result<()> {
        if self.has_subspecs() {
            return Ok(());
        }
        let subspecs = fixed::create(&self.arena, FLAG_HAS_REFS, 8)?;
        let top_size = self.arena.node_size(self.top);
        if top_size == 3 {
            self.grow_top(4)?;
        }
        self.arena.write_u64(self.top, SLOT_SUBSPECS, subspecs);
        Ok(())
    }

    /// Grows the top node to `slots` slots (they read as 0 until set).
    fn grow_top(&mut self, slots: usize) -> Result<()> {
        let mut top = self.top;
        fixed::ensure_capacity(&self.arena, &mut top, slots * 8)?;
        if top != self.top {
            self.top = top;
            if let Some((parent_node, ndx)) = self.parent {
                self.arena.write_u64(parent_node, ndx, top);
            }
        }
        let current = self.arena.node_size(self.top);
        for slot in current..slots {
            self.arena.write_u64(self.top, slot, 0);
        }
        self.arena.set_node_size(self.top, slots);
        Ok(())
    }

    // =========================================================================
    // Column mutation
    // =========================================================================

    pub fn insert_column(
        &mut self,
        column_ndx: usize,
        column_type: ColumnType,
        name: &str,
        attr: ColumnAttr,
    ) -> Result<()> {
        if column_ndx > self.column_count() {
            return Err(StrataError::out_of_bounds(column_ndx, self.column_count()));
        }

        if column_type.has_name() {
            let name_ndx = self.name_ndx(column_ndx);
            let mut names = self.array_ref(SLOT_NAMES);
            let old = names;
            blob::insert(&self.arena, &mut names, name_ndx, Some(name.as_bytes()))?;
            if names != old {
                self.arena.write_u64(self.top, SLOT_NAMES, names);
            }
        }
        self.array_insert(SLOT_TYPES, column_ndx, column_type as u64)?;
        self.array_insert(SLOT_ATTRS, column_ndx, attr.bits() as u64)?;

        if column_type.has_subspec() {
            self.ensure_subspecs()?;
            let subspec_ndx = self.get_subspec_ndx(column_ndx);
            match column_type {
                ColumnType::Table => {
                    let nested = Spec::create_empty_ref(&self.arena)?;
                    self.array_insert(SLOT_SUBSPECS, subspec_ndx, nested)?;
                    self.subspec_ptrs
                        .insert(subspec_ndx, SubspecSlot::new(true));
                }
                ColumnType::Link | ColumnType::LinkList => {
                    // Target table index arrives later as a tagged int;
                    // until then the entry is a null ref.
                    self.array_insert(SLOT_SUBSPECS, subspec_ndx, 0)?;
                    self.subspec_ptrs
                        .insert(subspec_ndx, SubspecSlot::new(false));
                }
                ColumnType::BackLink => {
                    // Origin table index, then origin column index.
                    self.array_insert(SLOT_SUBSPECS, subspec_ndx, 0)?;
                    self.array_insert(SLOT_SUBSPECS, subspec_ndx + 1, 0)?;
                    self.subspec_ptrs
                        .insert(subspec_ndx, SubspecSlot::new(false));
                    self.subspec_ptrs
                        .insert(subspec_ndx, SubspecSlot::new(false));
                }
                _ => unreachable!("has_subspec covers exactly these types"),
            }
            self.adj_subspec_ptrs();
        }

        self.update_has_strong_link_columns()
    }

    pub fn erase_column(&mut self, column_ndx: usize) -> Result<()> {
        let column_type = self.column_type(column_ndx)?;

        match column_type {
            ColumnType::Table => {
                let subspec_ndx = self.get_subspec_ndx(column_ndx);
                let nested = self.get_subspec_ref(subspec_ndx)?;
                self.arena.destroy_deep(nested);
                fixed::erase(&self.arena, self.array_ref(SLOT_SUBSPECS), subspec_ndx);
                self.subspec_ptrs.remove(subspec_ndx);
                self.adj_subspec_ptrs();
            }
            ColumnType::Link | ColumnType::LinkList => {
                let subspec_ndx = self.get_subspec_ndx(column_ndx);
                fixed::erase(&self.arena, self.array_ref(SLOT_SUBSPECS), subspec_ndx);
                self.subspec_ptrs.remove(subspec_ndx);
                self.adj_subspec_ptrs();
            }
            ColumnType::BackLink => {
                let subspec_ndx = self.get_subspec_ndx(column_ndx);
                let subspecs = self.array_ref(SLOT_SUBSPECS);
                fixed::erase(&self.arena, subspecs, subspec_ndx);
                fixed::erase(&self.arena, subspecs, subspec_ndx);
                self.subspec_ptrs.remove(subspec_ndx);
                self.subspec_ptrs.remove(subspec_ndx);
                self.adj_subspec_ptrs();
            }
            ColumnType::StringEnum => {
                let keys_ndx = self.get_enumkeys_ndx(column_ndx);
                let keys_ref =
                    fixed::get_u64(&self.arena, self.array_ref(SLOT_ENUMKEYS), keys_ndx);
                if keys_ref != 0 {
                    self.arena.destroy_deep(keys_ref);
                }
                fixed::erase(&self.arena, self.array_ref(SLOT_ENUMKEYS), keys_ndx);
            }
            _ => {}
        }

        if column_type.has_name() {
            let name_ndx = self.name_ndx(column_ndx);
            blob::erase(&self.arena, self.array_ref(SLOT_NAMES), name_ndx);
        }
        fixed::erase(&self.arena, self.types_ref(), column_ndx);
        fixed::erase(&self.arena, self.array_ref(SLOT_ATTRS), column_ndx);

        self.update_has_strong_link_columns()
    }

    // =========================================================================
    // Link metadata (tagged integers)
    // =========================================================================

    fn check_link_column(&self, column_ndx: usize) -> Result<ColumnType> {
        let t = self.column_type(column_ndx)?;
        if !matches!(
            t,
            ColumnType::Link | ColumnType::LinkList | ColumnType::BackLink
        ) {
            return Err(StrataError::invariant(format!(
                "column {column_ndx} carries no link target"
            )));
        }
        Ok(t)
    }

    pub fn set_opposite_link_table_ndx(&self, column_ndx: usize, table_ndx: usize) -> Result<()> {
        self.check_link_column(column_ndx)?;
        let subspec_ndx = self.get_subspec_ndx(column_ndx);
        fixed::set_u64(
            &self.arena,
            self.array_ref(SLOT_SUBSPECS),
            subspec_ndx,
            tag_int(table_ndx as u64),
        );
        Ok(())
    }

    pub fn get_opposite_link_table_ndx(&self, column_ndx: usize) -> Result<usize> {
        self.check_link_column(column_ndx)?;
        let subspec_ndx = self.get_subspec_ndx(column_ndx);
        let tagged = fixed::get_u64(&self.arena, self.array_ref(SLOT_SUBSPECS), subspec_ndx);
        if tagged == 0 {
            return Err(StrataError::invariant("link target never set"));
        }
        let value = untag_int(tagged).ok_or_else(|| {
            StrataError::invariant("link target slot holds a ref, expected tagged int")
        })?;
        Ok(value as usize)
    }

    pub fn set_backlink_origin_column(
        &self,
        backlink_col_ndx: usize,
        origin_col_ndx: usize,
    ) -> Result<()> {
        if self.column_type(backlink_col_ndx)? != ColumnType::BackLink {
            return Err(StrataError::invariant("not a backlink column"));
        }
        let subspec_ndx = self.get_subspec_ndx(backlink_col_ndx);
        fixed::set_u64(
            &self.arena,
            self.array_ref(SLOT_SUBSPECS),
            subspec_ndx + 1,
            tag_int(origin_col_ndx as u64),
        );
        Ok(())
    }

    pub fn get_origin_column_ndx(&self, backlink_col_ndx: usize) -> Result<usize> {
        if self.column_type(backlink_col_ndx)? != ColumnType::BackLink {
            return Err(StrataError::invariant("not a backlink column"));
        }
        let subspec_ndx = self.get_subspec_ndx(backlink_col_ndx);
        let tagged =
            fixed::get_u64(&self.arena, self.array_ref(SLOT_SUBSPECS), subspec_ndx + 1);
        if tagged == 0 {
            return Err(StrataError::invariant("backlink origin never set"));
        }
        let value = untag_int(tagged).ok_or_else(|| {
            StrataError::invariant("backlink origin slot holds a ref, expected tagged int")
        })?;
        Ok(value as usize)
    }

    /// Finds the backlink column tracking links from the given origin.
    pub fn find_backlink_column(
        &self,
        origin_table_ndx: usize,
        origin_col_ndx: usize,
    ) -> Result<usize> {
        let n = self.column_count();
        for i in 0..n {
            if self.column_type(i)? != ColumnType::BackLink {
                continue;
            }
            if self.get_opposite_link_table_ndx(i)? == origin_table_ndx
                && self.get_origin_column_ndx(i)? == origin_col_ndx
            {
                return Ok(i);
            }
        }
        Err(StrataError::invariant(format!(
            "no backlink column for origin table {origin_table_ndx} column {origin_col_ndx}"
        )))
    }

    // =========================================================================
    // Enum keys
    // =========================================================================

    /// Position of a StringEnum column's key list: the count of
    /// enum-coded columns before it.
    pub fn get_enumkeys_ndx(&self, column_ndx: usize) -> usize {
        (0..column_ndx)
            .filter(|&i| matches!(self.column_type(i), Ok(ColumnType::StringEnum)))
            .count()
    }

    /// Converts a String column to enum coding, installing its key list.
    pub fn upgrade_string_to_enum(&mut self, column_ndx: usize, keys_ref: Ref) -> Result<()> {
        if self.column_type(column_ndx)? != ColumnType::String {
            return Err(StrataError::invariant(
                "only string columns upgrade to enum coding",
            ));
        }
        if !self.has_enumkeys() {
            let enumkeys = fixed::create(&self.arena, FLAG_HAS_REFS, 8)?;
            self.grow_top(5)?;
            self.arena.write_u64(self.top, SLOT_ENUMKEYS, enumkeys);
        }
        let ins_pos = self.get_enumkeys_ndx(column_ndx);
        self.array_insert(SLOT_ENUMKEYS, ins_pos, keys_ref)?;
        self.set_column_type(column_ndx, ColumnType::StringEnum);
        Ok(())
    }

    pub fn get_enumkeys_ref(&self, column_ndx: usize) -> Result<Ref> {
        if self.column_type(column_ndx)? != ColumnType::StringEnum {
            return Err(StrataError::invariant("column is not enum-coded"));
        }
        let keys_ndx = self.get_enumkeys_ndx(column_ndx);
        Ok(fixed::get_u64(&self.arena, self.array_ref(SLOT_ENUMKEYS), keys_ndx))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Baseline refresh: re-read the top ref from the parent slot and
    /// rebuild the subspec cache. A second call at the same baseline is
    /// a no-op.
    pub fn update_from_parent(&mut self, old_baseline: u64) -> Result<bool> {
        if self.arena.baseline() == old_baseline {
            return Ok(false);
        }
        if let Some((parent_node, ndx)) = self.parent {
            self.top = fixed::get_u64(&self.arena, parent_node, ndx);
        }
        self.reset_subspec_ptrs()?;
        for slot in self.subspec_ptrs.iter_mut() {
            // Drop cached children; they re-resolve on next access.
            slot.spec = None;
        }
        self.update_has_strong_link_columns()?;
        Ok(true)
    }

    /// Deep equality, with String and StringEnum considered equivalent
    /// and nested table specs compared recursively.
    pub fn equals(&self, other: &Spec) -> Result<bool> {
        let n = self.column_count();
        if other.column_count() != n {
            return Ok(false);
        }
        for i in 0..n {
            if self.column_attr(i)? != other.column_attr(i)? {
                return Ok(false);
            }
            let lhs_type = self.column_type(i)?;
            let rhs_type = other.column_type(i)?;
            if lhs_type.has_name() != rhs_type.has_name() {
                return Ok(false);
            }
            if lhs_type.has_name() && self.column_name(i)? != other.column_name(i)? {
                return Ok(false);
            }
            match lhs_type {
                ColumnType::String | ColumnType::StringEnum => {
                    if !rhs_type.is_string() {
                        return Ok(false);
                    }
                }
                ColumnType::Table => {
                    if rhs_type != ColumnType::Table {
                        return Ok(false);
                    }
                    let lhs_ref = self.get_subspec_ref(self.get_subspec_ndx(i))?;
                    let rhs_ref = other.get_subspec_ref(other.get_subspec_ndx(i))?;
                    let lhs = Spec::from_ref(&self.arena, lhs_ref)?;
                    let rhs = Spec::from_ref(&other.arena, rhs_ref)?;
                    if !lhs.equals(&rhs)? {
                        return Ok(false);
                    }
                }
                ColumnType::Link | ColumnType::LinkList => {
                    if rhs_type != lhs_type {
                        return Ok(false);
                    }
                    if self.get_opposite_link_table_ndx(i)?
                        != other.get_opposite_link_table_ndx(i)?
                    {
                        return Ok(false);
                    }
                }
                _ => {
                    if rhs_type != lhs_type {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Checks the spec's array-size invariants.
    pub fn verify(&self) -> Result<()> {
        let n = self.column_count();
        let backlinks = (0..n)
            .filter(|&i| matches!(self.column_type(i), Ok(ColumnType::BackLink)))
            .count();
        if self.public_column_count() + backlinks != n {
            return Err(StrataError::invariant(
                "name array size disagrees with type array",
            ));
        }
        let expected: usize = (0..n)
            .map(|i| {
                self.column_type(i)
                    .map(|t| t.subspec_entries())
                    .unwrap_or(0)
            })
            .sum();
        if self.subspecs_size() != expected {
            return Err(StrataError::invariant(format!(
                "subspec array has {} entries, types require {expected}",
                self.subspecs_size()
            )));
        }
        if fixed::size(&self.arena, self.array_ref(SLOT_ATTRS)) != n {
            return Err(StrataError::invariant(
                "attr array size disagrees with type array",
            ));
        }
        Ok(())
    }

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }
}
