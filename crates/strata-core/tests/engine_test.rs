//! End-to-end scenarios for the column storage core:
//! - Two-column filter conjunctions over typed columns
//! - String leaf upgrade chain with header-bit checks
//! - Sub-table accessor survival across move-last-over
//! - Search-index coherence under bulk mutation
//! - Cascade through strong links (weak links do not propagate)
//! - Spec subspec indexing across column erase
//! - Slice-write round trips through a re-attached arena

use rand::Rng;
use std::collections::HashSet;
use strata_arena::Arena;
use strata_common::{ColumnAttr, ColumnType, EngineConfig, IndexConfig, StrataError};
use strata_core::column::{IndexedColumn, IntColumn, StringColumn};
use strata_core::leaf::StringLeafType;
use strata_core::table::{Group, Table};
use strata_core::write::VecSink;
use strata_core::{CascadeRow, CascadeState, Spec};

// =============================================================================
// S1: Query-like two-column filter
// =============================================================================

#[test]
fn two_column_filter_conjunction() {
    let arena = Arena::new();
    let table = Table::create(&arena).unwrap();
    {
        let mut t = table.borrow_mut();
        t.add_column(ColumnType::Int, "col1", ColumnAttr::NONE).unwrap();
        t.add_column(ColumnType::String, "col2", ColumnAttr::NONE).unwrap();
        let rows = [
            (1, "a"),
            (2, "a"),
            (3, "X"),
            (4, "a"),
            (5, "a"),
            (6, "X"),
            (7, "X"),
        ];
        for (i, (n, s)) in rows.iter().enumerate() {
            t.add_empty_rows(1).unwrap();
            t.set_int(0, i, *n).unwrap();
            t.set_string(1, i, Some(s)).unwrap();
        }
    }

    let t = table.borrow();
    let filter = |want_s: &str, pred: &dyn Fn(i64) -> bool| -> Vec<usize> {
        (0..t.size())
            .filter(|&row| {
                t.get_string(1, row).unwrap().as_deref() == Some(want_s)
                    && pred(t.get_int(0, row).unwrap())
            })
            .collect()
    };

    // col2 == "a" AND col1 > 2 AND col1 != 4
    assert_eq!(filter("a", &|v| v > 2 && v != 4), vec![4]);
    // col2 == "X" AND col1 > 4
    assert_eq!(filter("X", &|v| v > 4), vec![5, 6]);
}

// =============================================================================
// S2: String leaf upgrade
// =============================================================================

#[test]
fn string_leaf_upgrade_chain() {
    let arena = Arena::new();
    let mut col = StringColumn::create(&arena, false).unwrap();

    col.add(Some("a")).unwrap();
    let medium = "a".repeat(30);
    col.add(Some(&medium)).unwrap();
    let big = "a".repeat(200);
    col.add(Some(&big)).unwrap();

    assert_eq!(col.size(), 3);
    assert_eq!(col.get(0).unwrap().as_deref(), Some("a"));
    assert_eq!(col.get(1).unwrap().as_deref(), Some(medium.as_str()));
    assert_eq!(col.get(2).unwrap().as_deref(), Some(big.as_str()));

    // Root leaf header: has_refs=1, context_flag=1 (big-blob form).
    assert_eq!(col.root_leaf_type().unwrap(), StringLeafType::Big);
    let header = arena.header(col.base().root());
    assert!(header.has_refs());
    assert!(header.context_flag());
    assert!(!header.is_inner());
}

// =============================================================================
// S3: Move-last-over preserves sub-table accessors
// =============================================================================

#[test]
fn move_last_over_preserves_subtable_accessor() {
    let arena = Arena::new();
    let table = Table::create(&arena).unwrap();
    {
        let mut t = table.borrow_mut();
        t.add_column(ColumnType::Table, "sub", ColumnAttr::NONE).unwrap();
        // Give the nested spec one int column before any accessor is built.
        let subspec = t.spec_mut().get_subspec_by_ndx(0).unwrap();
        subspec
            .insert_column(0, ColumnType::Int, "v", ColumnAttr::NONE)
            .unwrap();
        t.add_empty_rows(3).unwrap();
    }

    let sub = Table::get_subtable(&table, 0, 2).unwrap();
    {
        let mut s = sub.borrow_mut();
        s.add_empty_rows(1).unwrap();
        s.set_int(0, 0, 42).unwrap();
        assert_eq!(s.row_in_parent(), Some(2));
    }

    table.borrow_mut().move_last_over(0).unwrap();
    assert_eq!(table.borrow().size(), 2);

    // The live accessor was re-indexed to row 0.
    assert_eq!(sub.borrow().row_in_parent(), Some(0));
    assert!(sub.borrow().is_attached());
    assert_eq!(sub.borrow().get_int(0, 0).unwrap(), 42);

    // A subsequent lookup returns the very same handle.
    let again = Table::get_subtable(&table, 0, 0).unwrap();
    assert!(std::rc::Rc::ptr_eq(&sub, &again));

    table.borrow().verify().unwrap();
}

#[test]
fn subtable_accessor_lifecycle() {
    let arena = Arena::new();
    let table = Table::create(&arena).unwrap();
    {
        let mut t = table.borrow_mut();
        t.add_column(ColumnType::Table, "sub", ColumnAttr::NONE).unwrap();
        let subspec = t.spec_mut().get_subspec_by_ndx(0).unwrap();
        subspec
            .insert_column(0, ColumnType::Int, "v", ColumnAttr::NONE)
            .unwrap();
        t.add_empty_rows(2).unwrap();
    }

    // Two lookups share one accessor; dropping all handles empties the map.
    let a = Table::get_subtable(&table, 0, 0).unwrap();
    let b = Table::get_subtable(&table, 0, 0).unwrap();
    assert!(std::rc::Rc::ptr_eq(&a, &b));
    drop(b);
    drop(a);
    let fresh = Table::get_subtable(&table, 0, 0).unwrap();
    fresh.borrow_mut().add_empty_rows(1).unwrap();
    assert_eq!(table.borrow().get_subtable_size(0, 0).unwrap(), 1);
}

// =============================================================================
// S4: Index coherence under bulk mutation
// =============================================================================

#[test]
fn index_coherence_under_bulk_mutation() {
    let arena = Arena::new();
    let mut col = StringColumn::create(&arena, false).unwrap();
    let mut rng = rand::thread_rng();

    let mut values = Vec::new();
    for _ in 0..1000 {
        let len = rng.gen_range(0..40);
        let v: String = (0..len)
            .map(|_| (b'a' + rng.gen_range(0..6)) as char)
            .collect();
        col.add(Some(&v)).unwrap();
        values.push(v);
    }
    col.create_search_index(true).unwrap();

    let distinct: HashSet<&String> = values.iter().collect();
    let assert_paths_agree = |col: &StringColumn| {
        for v in &distinct {
            let via_index = col.count(Some(v), 0, None).unwrap();
            let via_scan = col.count(Some(v), 0, Some(col.size())).unwrap();
            assert_eq!(via_index, via_scan, "count mismatch for {v:?}");
            assert_eq!(
                col.find_all(Some(v), 0, None).unwrap(),
                col.find_all(Some(v), 0, Some(col.size())).unwrap(),
                "find_all mismatch for {v:?}"
            );
        }
    };
    assert_paths_agree(&col);
    col.verify().unwrap();

    // Erase every third row, from the back so indices stay valid.
    let mut i = col.size();
    while i > 0 {
        i -= 1;
        if i % 3 == 0 {
            let is_last = i == col.size() - 1;
            col.erase(i, is_last).unwrap();
        }
    }
    assert_paths_agree(&col);
    col.verify().unwrap();

    col.clear().unwrap();
    assert_eq!(col.size(), 0);
    for v in &distinct {
        assert_eq!(col.find_first(Some(v), 0, None).unwrap(), None);
        assert_eq!(col.find_first(Some(v), 0, Some(0)).unwrap(), None);
    }
}

#[test]
fn unique_index_rejects_before_tree_mutation() {
    let arena = Arena::new();
    let mut col = StringColumn::create(&arena, false).unwrap();
    col.add(Some("unique")).unwrap();
    col.create_search_index(false).unwrap();

    assert!(matches!(
        col.add(Some("unique")),
        Err(StrataError::UniqueConstraint)
    ));
    assert_eq!(col.size(), 1);
    // Re-setting a row to its own value is not a violation.
    col.set(0, Some("unique")).unwrap();
    col.verify().unwrap();
}

// =============================================================================
// S5: Cascade through strong links
// =============================================================================

#[test]
fn cascade_through_strong_links() {
    let mut group = Group::new();
    let a = group.add_table().unwrap();
    let b = group.add_table().unwrap();

    b.borrow_mut()
        .add_column(ColumnType::Int, "val", ColumnAttr::NONE)
        .unwrap();
    let link_col = group.add_link_column(0, "to_b", 1, true).unwrap();

    a.borrow_mut().add_empty_rows(1).unwrap();
    b.borrow_mut().add_empty_rows(1).unwrap();
    group.set_link(0, link_col, 0, Some(0)).unwrap();

    let mut state = CascadeState::new();
    group
        .cascade_collect(&[CascadeRow { table_ndx: 0, row_ndx: 0 }], &mut state)
        .unwrap();
    let pairs: Vec<(usize, usize)> =
        state.rows.iter().map(|r| (r.table_ndx, r.row_ndx)).collect();
    assert_eq!(pairs, vec![(0, 0), (1, 0)]);

    // A third table with a *weak* link into the same row of B: the
    // closure is unchanged and C's row is untouched.
    let c = group.add_table().unwrap();
    let weak_col = group.add_link_column(2, "weak_to_b", 1, false).unwrap();
    c.borrow_mut().add_empty_rows(1).unwrap();
    group.set_link(2, weak_col, 0, Some(0)).unwrap();

    let mut state2 = CascadeState::new();
    group
        .cascade_collect(&[CascadeRow { table_ndx: 0, row_ndx: 0 }], &mut state2)
        .unwrap();
    let pairs2: Vec<(usize, usize)> =
        state2.rows.iter().map(|r| (r.table_ndx, r.row_ndx)).collect();
    assert_eq!(pairs2, vec![(0, 0), (1, 0)]);
    assert_eq!(c.borrow().size(), 1);
}

#[test]
fn cascade_stops_on_shared_target() {
    let mut group = Group::new();
    let a = group.add_table().unwrap();
    let b = group.add_table().unwrap();

    b.borrow_mut()
        .add_column(ColumnType::Int, "val", ColumnAttr::NONE)
        .unwrap();
    let link_col = group.add_link_column(0, "to_b", 1, true).unwrap();

    // Two rows of A point at the same row of B; removing one row of A
    // must not pull B's row into the closure.
    a.borrow_mut().add_empty_rows(2).unwrap();
    b.borrow_mut().add_empty_rows(1).unwrap();
    group.set_link(0, link_col, 0, Some(0)).unwrap();
    group.set_link(0, link_col, 1, Some(0)).unwrap();

    let mut state = CascadeState::new();
    group
        .cascade_collect(&[CascadeRow { table_ndx: 0, row_ndx: 0 }], &mut state)
        .unwrap();
    let pairs: Vec<(usize, usize)> =
        state.rows.iter().map(|r| (r.table_ndx, r.row_ndx)).collect();
    assert_eq!(pairs, vec![(0, 0)]);
}

#[test]
fn clear_table_cascades_through_strong_links() {
    let mut group = Group::new();
    let a = group.add_table().unwrap();
    let b = group.add_table().unwrap();

    b.borrow_mut()
        .add_column(ColumnType::Int, "val", ColumnAttr::NONE)
        .unwrap();
    let link_col = group.add_link_column(0, "to_b", 1, true).unwrap();

    a.borrow_mut().add_empty_rows(2).unwrap();
    b.borrow_mut().add_empty_rows(3).unwrap();
    for (row, v) in [(0, 10), (1, 20), (2, 30)] {
        b.borrow_mut().set_int(0, row, v).unwrap();
    }
    group.set_link(0, link_col, 0, Some(0)).unwrap();
    group.set_link(0, link_col, 1, Some(1)).unwrap();

    let removed = group.clear_table(0).unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(a.borrow().size(), 0);
    // The two orphaned targets die with the clear; the unreferenced
    // third row survives.
    assert_eq!(b.borrow().size(), 1);
    assert_eq!(b.borrow().get_int(0, 0).unwrap(), 30);
    a.borrow().verify().unwrap();
    b.borrow().verify().unwrap();
}

#[test]
fn clear_table_with_weak_links_leaves_targets() {
    let mut group = Group::new();
    let b = group.add_table().unwrap();
    let c = group.add_table().unwrap();

    b.borrow_mut()
        .add_column(ColumnType::Int, "val", ColumnAttr::NONE)
        .unwrap();
    let weak_col = group.add_link_column(1, "weak_to_b", 0, false).unwrap();

    b.borrow_mut().add_empty_rows(1).unwrap();
    c.borrow_mut().add_empty_rows(1).unwrap();
    group.set_link(1, weak_col, 0, Some(0)).unwrap();

    let removed = group.clear_table(1).unwrap();
    assert!(removed.is_empty());
    assert_eq!(c.borrow().size(), 0);
    assert_eq!(b.borrow().size(), 1);
    b.borrow().verify().unwrap();
}

#[test]
fn cascade_stop_on_link_list_cell_suppresses_recursion() {
    let mut group = Group::new();
    let a = group.add_table().unwrap();
    let b = group.add_table().unwrap();

    b.borrow_mut()
        .add_column(ColumnType::Int, "val", ColumnAttr::NONE)
        .unwrap();
    let link_col = group.add_link_column(0, "to_b", 1, true).unwrap();
    a.borrow_mut().add_empty_rows(1).unwrap();
    b.borrow_mut().add_empty_rows(1).unwrap();
    group.set_link(0, link_col, 0, Some(0)).unwrap();

    // The guarded cell contributes nothing, so the target survives.
    let mut state = CascadeState::with_stop_on_link_list(link_col, 0);
    group
        .cascade_collect(&[CascadeRow { table_ndx: 0, row_ndx: 0 }], &mut state)
        .unwrap();
    let pairs: Vec<(usize, usize)> =
        state.rows.iter().map(|r| (r.table_ndx, r.row_ndx)).collect();
    assert_eq!(pairs, vec![(0, 0)]);
}

#[test]
fn cascade_remove_applies_closure() {
    let mut group = Group::new();
    let a = group.add_table().unwrap();
    let b = group.add_table().unwrap();

    b.borrow_mut()
        .add_column(ColumnType::Int, "val", ColumnAttr::NONE)
        .unwrap();
    let link_col = group.add_link_column(0, "to_b", 1, true).unwrap();

    a.borrow_mut().add_empty_rows(1).unwrap();
    b.borrow_mut().add_empty_rows(2).unwrap();
    b.borrow_mut().set_int(0, 0, 100).unwrap();
    b.borrow_mut().set_int(0, 1, 200).unwrap();
    group.set_link(0, link_col, 0, Some(0)).unwrap();

    let removed = group
        .cascade_remove(&[CascadeRow { table_ndx: 0, row_ndx: 0 }])
        .unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(a.borrow().size(), 0);
    // Row 1 of B was moved over the deleted row 0.
    assert_eq!(b.borrow().size(), 1);
    assert_eq!(b.borrow().get_int(0, 0).unwrap(), 200);
}

// =============================================================================
// S6: Spec subspec indexing across erase
// =============================================================================

#[test]
fn spec_subspec_indexing_across_erase() {
    let arena = Arena::new();
    let mut spec = Spec::create_empty(&arena).unwrap();
    spec.insert_column(0, ColumnType::Int, "a", ColumnAttr::NONE).unwrap();
    spec.insert_column(1, ColumnType::Table, "t", ColumnAttr::NONE).unwrap();
    spec.insert_column(2, ColumnType::Link, "l", ColumnAttr::NONE).unwrap();
    spec.insert_column(3, ColumnType::Int, "b", ColumnAttr::NONE).unwrap();
    spec.insert_column(4, ColumnType::BackLink, "", ColumnAttr::NONE).unwrap();
    spec.set_opposite_link_table_ndx(2, 1).unwrap();

    let ndx: Vec<usize> = (0..5).map(|i| spec.get_subspec_ndx(i)).collect();
    assert_eq!(ndx, vec![0, 0, 1, 2, 2]);

    // Populate the nested spec so its destruction is observable.
    spec.get_subspec_by_ndx(0)
        .unwrap()
        .insert_column(0, ColumnType::String, "inner", ColumnAttr::NONE)
        .unwrap();

    spec.erase_column(1).unwrap();
    assert_eq!(spec.column_count(), 4);
    let ndx: Vec<usize> = (0..4).map(|i| spec.get_subspec_ndx(i)).collect();
    assert_eq!(ndx, vec![0, 0, 1, 1]);
    assert_eq!(spec.get_opposite_link_table_ndx(1).unwrap(), 1);
    spec.verify().unwrap();
}

#[test]
fn spec_child_handles_reindexed_after_erase() {
    let arena = Arena::new();
    let mut spec = Spec::create_empty(&arena).unwrap();
    spec.insert_column(0, ColumnType::Table, "first", ColumnAttr::NONE).unwrap();
    spec.insert_column(1, ColumnType::Table, "second", ColumnAttr::NONE).unwrap();

    spec.get_subspec_by_ndx(1)
        .unwrap()
        .insert_column(0, ColumnType::Int, "v", ColumnAttr::NONE)
        .unwrap();

    spec.erase_column(0).unwrap();
    // The surviving child handle now sits at subspec position 0.
    let child = spec.get_subspec_by_ndx(0).unwrap();
    assert_eq!(child.ndx_in_parent(), Some(0));
    assert_eq!(child.column_name(0).unwrap(), "v");
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn int_column_write_roundtrip() {
    let arena = Arena::new();
    let mut col = IntColumn::create(&arena).unwrap();
    let n = 2500;
    for i in 0..n {
        col.add(i * 7 - 300).unwrap();
    }

    let mut sink = VecSink::new();
    let out_root = col.write(0, n as usize, n as usize, &mut sink).unwrap();

    let reloaded = Arena::new();
    reloaded.attach_buffer(sink.into_vec()).unwrap();
    let col2 = IntColumn::from_ref(&reloaded, out_root);
    assert_eq!(col2.size(), n as usize);
    for i in 0..n as usize {
        assert_eq!(col2.get(i).unwrap(), i as i64 * 7 - 300);
    }
    col2.verify().unwrap();
}

#[test]
fn string_column_write_roundtrip_through_file() {
    let arena = Arena::new();
    let mut col = StringColumn::create(&arena, true).unwrap();
    let values: Vec<Option<String>> = vec![
        Some("short".to_string()),
        None,
        Some("m".repeat(40)),
        Some("b".repeat(500)),
        Some(String::new()),
    ];
    for v in &values {
        col.add(v.as_deref()).unwrap();
    }

    let mut sink = VecSink::new();
    let out_root = col.write(0, values.len(), values.len(), &mut sink).unwrap();

    // The serialized image survives a trip through the filesystem.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slice.strata");
    std::fs::write(&path, sink.into_vec()).unwrap();
    let bytes = std::fs::read(&path).unwrap();

    let reloaded = Arena::new();
    reloaded.attach_buffer(bytes).unwrap();
    let col2 = StringColumn::from_ref(&reloaded, out_root, true);
    assert_eq!(col2.size(), values.len());
    for (i, v) in values.iter().enumerate() {
        assert_eq!(col2.get(i).unwrap(), *v, "row {i}");
    }
}

#[test]
fn partial_slice_write() {
    let arena = Arena::new();
    let mut col = IntColumn::create(&arena).unwrap();
    for i in 0..100 {
        col.add(i).unwrap();
    }
    let mut sink = VecSink::new();
    let out_root = col.write(20, 10, 100, &mut sink).unwrap();

    let reloaded = Arena::new();
    reloaded.attach_buffer(sink.into_vec()).unwrap();
    let col2 = IntColumn::from_ref(&reloaded, out_root);
    assert_eq!(col2.size(), 10);
    for i in 0..10 {
        assert_eq!(col2.get(i).unwrap(), 20 + i as i64);
    }
}

// =============================================================================
// Idempotence laws
// =============================================================================

#[test]
fn clear_then_insert_matches_fresh_column() {
    let arena = Arena::new();
    let mut used = StringColumn::create(&arena, false).unwrap();
    for i in 0..50 {
        used.add(Some(&format!("value-{}", i).repeat(i % 5 + 1))).unwrap();
    }
    used.clear().unwrap();
    used.add(Some("only")).unwrap();

    let mut fresh = StringColumn::create(&arena, false).unwrap();
    fresh.add(Some("only")).unwrap();

    assert!(used.compare_string(&fresh));
    assert_eq!(used.root_leaf_type().unwrap(), fresh.root_leaf_type().unwrap());
}

#[test]
fn update_from_parent_twice_is_noop() {
    let arena = Arena::new();
    let mut col = IntColumn::create(&arena).unwrap();
    col.add(5).unwrap();
    let baseline = arena.baseline();
    assert!(!col.base_mut().update_from_parent(baseline));
    assert!(!col.base_mut().update_from_parent(baseline));
    assert_eq!(col.get(0).unwrap(), 5);
}

#[test]
fn refresh_accessor_tree_idempotent() {
    let arena = Arena::new();
    let table = Table::create(&arena).unwrap();
    {
        let mut t = table.borrow_mut();
        t.add_column(ColumnType::Int, "n", ColumnAttr::NONE).unwrap();
        t.add_column(ColumnType::String, "s", ColumnAttr::INDEXED).unwrap();
        t.add_empty_rows(3).unwrap();
        t.set_int(0, 1, 9).unwrap();
        t.set_string(1, 1, Some("mid")).unwrap();
    }
    {
        let mut t = table.borrow_mut();
        t.refresh_accessor_tree().unwrap();
        t.refresh_accessor_tree().unwrap();
        assert_eq!(t.get_int(0, 1).unwrap(), 9);
        assert_eq!(t.get_string(1, 1).unwrap().as_deref(), Some("mid"));
        t.verify().unwrap();
    }
}

// =============================================================================
// Engine configuration
// =============================================================================

#[test]
fn engine_config_enforces_unique_indexes() {
    let config = EngineConfig {
        index: IndexConfig {
            enforce_unique: true,
        },
        ..EngineConfig::default()
    };
    let mut group = Group::with_config(config);
    let table = group.add_table().unwrap();

    // The column asked only for INDEXED; the engine policy upgrades it
    // to a unique index, persisted in the spec's attributes.
    {
        let mut t = table.borrow_mut();
        t.add_column(ColumnType::String, "s", ColumnAttr::INDEXED).unwrap();
        assert!(t.spec().column_attr(0).unwrap().is_unique());
        t.add_empty_rows(1).unwrap();
        t.set_string(0, 0, Some("dup")).unwrap();
        t.add_empty_rows(1).unwrap();
        let err = t.set_string(0, 1, Some("dup"));
        assert!(matches!(err, Err(StrataError::UniqueConstraint)));
        assert_eq!(t.get_string(0, 1).unwrap().as_deref(), Some(""));
    }
}

#[test]
fn default_config_allows_duplicate_index_values() {
    let mut group = Group::new();
    let table = group.add_table().unwrap();
    let mut t = table.borrow_mut();
    t.add_column(ColumnType::String, "s", ColumnAttr::INDEXED).unwrap();
    t.add_empty_rows(1).unwrap();
    t.set_string(0, 0, Some("dup")).unwrap();
    t.add_empty_rows(1).unwrap();
    t.set_string(0, 1, Some("dup")).unwrap();
    assert!(!t.spec().column_attr(0).unwrap().is_unique());
}

// =============================================================================
// Group-level link maintenance
// =============================================================================

#[test]
fn move_last_over_retargets_links() {
    let mut group = Group::new();
    let a = group.add_table().unwrap();
    let b = group.add_table().unwrap();

    b.borrow_mut()
        .add_column(ColumnType::Int, "val", ColumnAttr::NONE)
        .unwrap();
    let link_col = group.add_link_column(0, "to_b", 1, false).unwrap();

    a.borrow_mut().add_empty_rows(1).unwrap();
    b.borrow_mut().add_empty_rows(3).unwrap();
    b.borrow_mut().set_int(0, 2, 777).unwrap();
    group.set_link(0, link_col, 0, Some(2)).unwrap();

    // Deleting row 0 of B moves row 2 into its place; the link follows.
    group.move_last_over(1, 0).unwrap();
    assert_eq!(b.borrow().size(), 2);
    assert_eq!(b.borrow().get_int(0, 0).unwrap(), 777);
    assert_eq!(a.borrow().get_link(link_col, 0).unwrap(), Some(0));
}
