//! Persistent B+-tree over arena refs.
//!
//! The tree holds a single root ref; inner nodes index children by
//! cumulative element count (see [`node`]). Leaves are opaque to the
//! tree: every element-level operation is delegated to a [`LeafOps`]
//! implementation carrying the value being written, mirroring how the
//! column family specializes one generic walker per encoding.
//!
//! Splits occur exactly when a node is full. Erase never rebalances:
//! underfull nodes are allowed, empty leaves are unlinked, and a root
//! with a single child is demoted.

pub mod node;

use crate::constants::MAX_INNER_CHILDREN;
use strata_arena::{Arena, Ref};
use strata_common::{Result, StrataError};
use tracing::trace;

/// Leaf capability set consumed by the tree walkers. Implementations
/// carry the pending value (like the original's leaf-handler state
/// objects) and dispatch on the leaf's header bits.
pub trait LeafOps {
    /// Element count of a leaf.
    fn leaf_size(&self, arena: &Arena, leaf: Ref) -> usize;

    /// Inserts the pending value at `ndx`, upgrading or reallocating the
    /// leaf as needed (the ref is updated in place). Returns the new
    /// sibling ref when the leaf split.
    fn leaf_insert(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<Option<Ref>>;

    /// Overwrites element `ndx` with the pending value; may upgrade or
    /// replace the leaf.
    fn leaf_set(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<()>;

    /// Erases element `ndx`. Returns true when the leaf is now empty, in
    /// which case the walker unlinks and destroys it.
    fn leaf_erase(&mut self, arena: &Arena, leaf: Ref, ndx: usize) -> Result<bool>;
}

/// B+-tree handle: the root ref plus the walkers. The owning column
/// stores the tree and rewires its parent slot when the root changes.
#[derive(Debug, Clone, Copy)]
pub struct BpTree {
    root: Ref,
}

impl BpTree {
    pub fn new(root: Ref) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Ref {
        self.root
    }

    pub fn set_root(&mut self, root: Ref) {
        self.root = root;
    }

    pub fn root_is_leaf(&self, arena: &Arena) -> bool {
        !arena.header(self.root).is_inner()
    }

    /// Element count. O(1) for inner roots (reads the last cumulative
    /// count); delegates to the leaf for leaf roots.
    pub fn size(&self, arena: &Arena, ops: &impl LeafOps) -> usize {
        if self.root_is_leaf(arena) {
            ops.leaf_size(arena, self.root)
        } else {
            node::total(arena, self.root) as usize
        }
    }

    /// Resolves element `pos` to its leaf and the index within it.
    pub fn get_leaf(&self, arena: &Arena, pos: usize) -> (Ref, usize) {
        let mut current = self.root;
        let mut pos = pos;
        while arena.header(current).is_inner() {
            let (k, inner_pos) = node::find_child(arena, current, pos);
            current = node::child(arena, current, k);
            pos = inner_pos;
        }
        (current, pos)
    }

    /// Inserts one element at `pos`; `None` appends. A root split
    /// instates a new, taller root.
    pub fn insert(&mut self, arena: &Arena, pos: Option<usize>, ops: &mut impl LeafOps) -> Result<()> {
        let mut root = self.root;
        let split = insert_recurse(arena, &mut root, pos, ops)?;
        self.root = root;
        if let Some((sibling, sibling_size)) = split {
            self.introduce_new_root(arena, sibling, sibling_size, ops)?;
        }
        Ok(())
    }

    /// Overwrites element `pos` in place via `ops.leaf_set`.
    pub fn update(&mut self, arena: &Arena, pos: usize, ops: &mut impl LeafOps) -> Result<()> {
        let mut root = self.root;
        update_recurse(arena, &mut root, pos, ops)?;
        self.root = root;
        Ok(())
    }

    /// Erases element `pos`; `None` erases the last element, which lets
    /// inner nodes skip position arithmetic on the common removal path.
    pub fn erase(&mut self, arena: &Arena, pos: Option<usize>, ops: &mut impl LeafOps) -> Result<()> {
        let mut root = self.root;
        erase_recurse(arena, &mut root, pos, ops)?;
        self.root = root;
        // Demote the root while it has exactly one child.
        while arena.header(self.root).is_inner() && node::child_count(arena, self.root) == 1 {
            let only = node::child(arena, self.root, 0);
            arena.free(self.root);
            trace!(new_root = only, "root demoted");
            self.root = only;
        }
        Ok(())
    }

    /// In-order leaf refs, for leaf-streamed scans.
    pub fn leaf_refs(&self, arena: &Arena) -> Vec<Ref> {
        let mut leaves = Vec::new();
        collect_leaves(arena, self.root, &mut leaves);
        leaves
    }

    /// Structural validation: tagged counts, child counts, and agreement
    /// between cumulative counts and actual subtree sizes.
    pub fn verify(&self, arena: &Arena, ops: &impl LeafOps) -> Result<()> {
        verify_recurse(arena, self.root, ops, true)?;
        Ok(())
    }

    fn introduce_new_root(
        &mut self,
        arena: &Arena,
        sibling: Ref,
        sibling_size: usize,
        ops: &impl LeafOps,
    ) -> Result<()> {
        let old_total = subtree_size(arena, self.root, ops) as u64;
        let mut new_root = node::create(arena)?;
        node::insert_child(arena, &mut new_root, 0, self.root, old_total)?;
        node::insert_child(arena, &mut new_root, 1, sibling, old_total + sibling_size as u64)?;
        trace!(root = new_root, "new root introduced");
        self.root = new_root;
        Ok(())
    }
}

fn subtree_size(arena: &Arena, r: Ref, ops: &impl LeafOps) -> usize {
    if arena.header(r).is_inner() {
        node::total(arena, r) as usize
    } else {
        ops.leaf_size(arena, r)
    }
}

/// Recursive insert. Returns the new right sibling of `*node_ref` (and
/// its subtree size) when a split bubbled up.
fn insert_recurse(
    arena: &Arena,
    node_ref: &mut Ref,
    pos: Option<usize>,
    ops: &mut impl LeafOps,
) -> Result<Option<(Ref, usize)>> {
    if !arena.header(*node_ref).is_inner() {
        let count = ops.leaf_size(arena, *node_ref);
        let ndx = pos.unwrap_or(count);
        let sibling = ops.leaf_insert(arena, node_ref, ndx)?;
        return Ok(sibling.map(|s| (s, ops.leaf_size(arena, s))));
    }

    let children = node::child_count(arena, *node_ref);
    let (k, child_pos) = match pos {
        None => (children - 1, None),
        Some(p) => {
            let (k, inner) = node::find_child(arena, *node_ref, p);
            (k, Some(inner))
        }
    };

    let mut child = node::child(arena, *node_ref, k);
    let split = insert_recurse(arena, &mut child, child_pos, ops)?;
    node::set_child(arena, *node_ref, k, child);

    match split {
        None => {
            node::adjust_cums(arena, *node_ref, k, 1);
            Ok(None)
        }
        Some((sibling, sibling_size)) => {
            let prev = if k == 0 { 0 } else { node::cum(arena, *node_ref, k - 1) };
            let child_size = subtree_size(arena, child, ops) as u64;
            node::adjust_cums(arena, *node_ref, k + 1, 1);
            node::set_cum(arena, *node_ref, k, prev + child_size);
            node::insert_child(
                arena,
                node_ref,
                k + 1,
                sibling,
                prev + child_size + sibling_size as u64,
            )?;

            if node::child_count(arena, *node_ref) <= MAX_INNER_CHILDREN {
                return Ok(None);
            }
            // Inner node overflow: split at the midpoint.
            let count = node::child_count(arena, *node_ref);
            let half = count / 2;
            let base = node::cum(arena, *node_ref, half - 1);
            let mut new_inner = node::create(arena)?;
            for (j, i) in (half..count).enumerate() {
                node::insert_child(
                    arena,
                    &mut new_inner,
                    j,
                    node::child(arena, *node_ref, i),
                    node::cum(arena, *node_ref, i) - base,
                )?;
            }
            let new_total = node::total(arena, *node_ref) - base;
            node::truncate(arena, *node_ref, half);
            trace!(node = *node_ref, sibling = new_inner, "inner node split");
            Ok(Some((new_inner, new_total as usize)))
        }
    }
}

fn update_recurse(
    arena: &Arena,
    node_ref: &mut Ref,
    pos: usize,
    ops: &mut impl LeafOps,
) -> Result<()> {
    if !arena.header(*node_ref).is_inner() {
        return ops.leaf_set(arena, node_ref, pos);
    }
    let (k, child_pos) = node::find_child(arena, *node_ref, pos);
    let mut child = node::child(arena, *node_ref, k);
    update_recurse(arena, &mut child, child_pos, ops)?;
    node::set_child(arena, *node_ref, k, child);
    Ok(())
}

/// Recursive erase. Returns true when the subtree at `*node_ref` became
/// empty and should be unlinked by the caller.
fn erase_recurse(
    arena: &Arena,
    node_ref: &mut Ref,
    pos: Option<usize>,
    ops: &mut impl LeafOps,
) -> Result<bool> {
    if !arena.header(*node_ref).is_inner() {
        let count = ops.leaf_size(arena, *node_ref);
        if count == 0 {
            return Err(StrataError::invariant("erase from empty leaf"));
        }
        let ndx = pos.unwrap_or(count - 1);
        return ops.leaf_erase(arena, *node_ref, ndx);
    }

    let children = node::child_count(arena, *node_ref);
    let (k, child_pos) = match pos {
        None => (children - 1, None),
        Some(p) => {
            let (k, inner) = node::find_child(arena, *node_ref, p);
            (k, Some(inner))
        }
    };

    let mut child = node::child(arena, *node_ref, k);
    let child_empty = erase_recurse(arena, &mut child, child_pos, ops)?;
    node::set_child(arena, *node_ref, k, child);

    if child_empty {
        arena.destroy_deep(child);
        node::erase_child(arena, *node_ref, k);
        node::adjust_cums(arena, *node_ref, k, -1);
        return Ok(node::child_count(arena, *node_ref) == 0);
    }
    node::adjust_cums(arena, *node_ref, k, -1);
    Ok(false)
}

fn collect_leaves(arena: &Arena, r: Ref, out: &mut Vec<Ref>) {
    if arena.header(r).is_inner() {
        for i in 0..node::child_count(arena, r) {
            collect_leaves(arena, node::child(arena, r, i), out);
        }
    } else {
        out.push(r);
    }
}

fn verify_recurse(arena: &Arena, r: Ref, ops: &impl LeafOps, is_root: bool) -> Result<usize> {
    use crate::constants::MAX_LEAF_SIZE;
    if !arena.header(r).is_inner() {
        let count = ops.leaf_size(arena, r);
        if count > MAX_LEAF_SIZE {
            return Err(StrataError::NodeCorrupted {
                ref_value: r,
                reason: format!("leaf size {count} exceeds maximum"),
            });
        }
        if count == 0 && !is_root {
            return Err(StrataError::NodeCorrupted {
                ref_value: r,
                reason: "empty non-root leaf".to_string(),
            });
        }
        return Ok(count);
    }
    node::verify(arena, r)?;
    let children = node::child_count(arena, r);
    if children > MAX_INNER_CHILDREN {
        return Err(StrataError::NodeCorrupted {
            ref_value: r,
            reason: format!("inner node has {children} children"),
        });
    }
    let mut running = 0u64;
    for i in 0..children {
        let sub = verify_recurse(arena, node::child(arena, r, i), ops, false)?;
        running += sub as u64;
        if node::cum(arena, r, i) != running {
            return Err(StrataError::NodeCorrupted {
                ref_value: r,
                reason: format!("cumulative count mismatch at child {i}"),
            });
        }
    }
    Ok(running as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_LEAF_SIZE;
    use crate::leaf::fixed;

    /// Minimal u64 leaf ops for exercising the walkers.
    struct U64Ops {
        pending: u64,
    }

    impl LeafOps for U64Ops {
        fn leaf_size(&self, arena: &Arena, leaf: Ref) -> usize {
            fixed::size(arena, leaf)
        }

        fn leaf_insert(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<Option<Ref>> {
            fixed::insert(arena, leaf, ndx, &self.pending.to_le_bytes())
        }

        fn leaf_set(&mut self, arena: &Arena, leaf: &mut Ref, ndx: usize) -> Result<()> {
            fixed::set_u64(arena, *leaf, ndx, self.pending);
            Ok(())
        }

        fn leaf_erase(&mut self, arena: &Arena, leaf: Ref, ndx: usize) -> Result<bool> {
            fixed::erase(arena, leaf, ndx);
            Ok(fixed::size(arena, leaf) == 0)
        }
    }

    fn new_tree(arena: &Arena) -> BpTree {
        BpTree::new(fixed::create(arena, 0, 8).unwrap())
    }

    fn get(arena: &Arena, tree: &BpTree, i: usize) -> u64 {
        let (leaf, ndx) = tree.get_leaf(arena, i);
        fixed::get_u64(arena, leaf, ndx)
    }

    #[test]
    fn test_append_many_splits() {
        let arena = Arena::new();
        let mut tree = new_tree(&arena);
        let n = 3 * MAX_LEAF_SIZE + 17;
        for i in 0..n as u64 {
            tree.insert(&arena, None, &mut U64Ops { pending: i }).unwrap();
        }
        let ops = U64Ops { pending: 0 };
        assert_eq!(tree.size(&arena, &ops), n);
        assert!(!tree.root_is_leaf(&arena));
        for i in [0, 1, MAX_LEAF_SIZE - 1, MAX_LEAF_SIZE, n - 1] {
            assert_eq!(get(&arena, &tree, i), i as u64);
        }
        tree.verify(&arena, &ops).unwrap();
    }

    #[test]
    fn test_insert_at_boundary_triggers_one_split() {
        let arena = Arena::new();
        let mut tree = new_tree(&arena);
        for i in 0..MAX_LEAF_SIZE as u64 {
            tree.insert(&arena, None, &mut U64Ops { pending: i }).unwrap();
        }
        assert!(tree.root_is_leaf(&arena));
        tree.insert(&arena, None, &mut U64Ops { pending: 9999 }).unwrap();
        assert!(!tree.root_is_leaf(&arena));
        assert_eq!(node::child_count(&arena, tree.root()), 2);
        let ops = U64Ops { pending: 0 };
        assert_eq!(tree.size(&arena, &ops), MAX_LEAF_SIZE + 1);
        tree.verify(&arena, &ops).unwrap();
    }

    #[test]
    fn test_interior_insert() {
        let arena = Arena::new();
        let mut tree = new_tree(&arena);
        let n = 2 * MAX_LEAF_SIZE;
        for i in 0..n as u64 {
            tree.insert(&arena, None, &mut U64Ops { pending: i * 2 }).unwrap();
        }
        // Insert in the middle of the first leaf.
        tree.insert(&arena, Some(5), &mut U64Ops { pending: 11 }).unwrap();
        let ops = U64Ops { pending: 0 };
        assert_eq!(tree.size(&arena, &ops), n + 1);
        assert_eq!(get(&arena, &tree, 4), 8);
        assert_eq!(get(&arena, &tree, 5), 11);
        assert_eq!(get(&arena, &tree, 6), 10);
        tree.verify(&arena, &ops).unwrap();
    }

    #[test]
    fn test_update() {
        let arena = Arena::new();
        let mut tree = new_tree(&arena);
        let n = MAX_LEAF_SIZE + 100;
        for i in 0..n as u64 {
            tree.insert(&arena, None, &mut U64Ops { pending: i }).unwrap();
        }
        tree.update(&arena, 0, &mut U64Ops { pending: 555 }).unwrap();
        tree.update(&arena, n - 1, &mut U64Ops { pending: 777 }).unwrap();
        assert_eq!(get(&arena, &tree, 0), 555);
        assert_eq!(get(&arena, &tree, n - 1), 777);
    }

    #[test]
    fn test_erase_all_demotes_root() {
        let arena = Arena::new();
        let mut tree = new_tree(&arena);
        let n = MAX_LEAF_SIZE + 50;
        for i in 0..n as u64 {
            tree.insert(&arena, None, &mut U64Ops { pending: i }).unwrap();
        }
        assert!(!tree.root_is_leaf(&arena));
        // Erase from the back using the fast path.
        for _ in 0..n {
            tree.erase(&arena, None, &mut U64Ops { pending: 0 }).unwrap();
        }
        let ops = U64Ops { pending: 0 };
        assert_eq!(tree.size(&arena, &ops), 0);
        assert!(tree.root_is_leaf(&arena));
    }

    #[test]
    fn test_erase_front_keeps_order() {
        let arena = Arena::new();
        let mut tree = new_tree(&arena);
        let n = 2 * MAX_LEAF_SIZE;
        for i in 0..n as u64 {
            tree.insert(&arena, None, &mut U64Ops { pending: i }).unwrap();
        }
        for _ in 0..MAX_LEAF_SIZE {
            tree.erase(&arena, Some(0), &mut U64Ops { pending: 0 }).unwrap();
        }
        let ops = U64Ops { pending: 0 };
        assert_eq!(tree.size(&arena, &ops), MAX_LEAF_SIZE);
        assert_eq!(get(&arena, &tree, 0), MAX_LEAF_SIZE as u64);
        tree.verify(&arena, &ops).unwrap();
    }

    #[test]
    fn test_size_tracks_mutation_count() {
        let arena = Arena::new();
        let mut tree = new_tree(&arena);
        let ops = U64Ops { pending: 0 };
        let mut expected = 0usize;
        for i in 0..2500u64 {
            tree.insert(&arena, None, &mut U64Ops { pending: i }).unwrap();
            expected += 1;
        }
        for _ in 0..700 {
            tree.erase(&arena, Some(0), &mut U64Ops { pending: 0 }).unwrap();
            expected -= 1;
        }
        assert_eq!(tree.size(&arena, &ops), expected);
    }

    #[test]
    fn test_leaf_refs_in_order() {
        let arena = Arena::new();
        let mut tree = new_tree(&arena);
        let n = 3 * MAX_LEAF_SIZE;
        for i in 0..n as u64 {
            tree.insert(&arena, None, &mut U64Ops { pending: i }).unwrap();
        }
        let leaves = tree.leaf_refs(&arena);
        assert!(leaves.len() >= 3);
        let mut last = None;
        let mut total = 0;
        for leaf in leaves {
            let first = fixed::get_u64(&arena, leaf, 0);
            if let Some(prev) = last {
                assert!(first > prev);
            }
            last = Some(first);
            total += fixed::size(&arena, leaf);
        }
        assert_eq!(total, n);
    }
}
