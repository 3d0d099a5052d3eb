// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core tree implementation: arenas, leaf index, insertion, removal, refit.

use alloc::vec::Vec;
use core::hash::Hash;

use hashbrown::HashMap;

use crate::types::{Aabb3, Entity};

/// "Notably better" threshold for the merge-and-pushdown escape during
/// descent: a merged sibling pair is only pushed down (and a fresh leaf
/// created in its place) when the merged cost falls below this fraction of
/// the cheaper descent option. Tunable; raising it trades tree quality for
/// fewer structural edits.
pub(crate) const MERGE_PUSHDOWN_RATIO: f64 = 0.3;

/// Index of a node in the node arena.
///
/// Plain 0-based arena index. Slots are recycled through a free list, so a
/// `NodeId` held across structural edits may come to denote a different
/// node; the tree never hands these out.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "arena indices are 32-bit by design"
    )]
    pub(crate) const fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Index of a bucket in the bucket arena. Same recycling scheme as
/// [`NodeId`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BucketId(u32);

impl BucketId {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "arena indices are 32-bit by design"
    )]
    pub(crate) const fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

bitflags::bitflags! {
    /// Per-node state bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct NodeFlags: u8 {
        /// The node is already waiting in the refit queue for the next
        /// [`Tree::optimize`] drain.
        const OPTIMIZATION_QUEUED = 0b0000_0001;
    }
}

/// A tree node. Leaf iff `bucket` is present; branch iff both children are
/// present and `bucket` is absent. Any other shape is invalid.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Node {
    pub(crate) aabb: Aabb3,
    pub(crate) parent: Option<NodeId>,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
    /// Distance from the root; the root is at 0.
    pub(crate) depth: u32,
    pub(crate) bucket: Option<BucketId>,
    pub(crate) flags: NodeFlags,
}

impl Node {
    pub(crate) fn is_leaf(&self) -> bool {
        self.bucket.is_some()
    }

    pub(crate) fn is_valid_leaf(&self) -> bool {
        self.is_leaf() && self.left.is_none() && self.right.is_none()
    }

    pub(crate) fn is_valid_branch(&self) -> bool {
        !self.is_leaf() && self.left.is_some() && self.right.is_some()
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.is_valid_leaf() || self.is_valid_branch()
    }
}

/// A dynamic bounding-volume hierarchy over entities of type `E`.
///
/// Interior nodes carry the union box of their two children; leaves carry a
/// bucket of entity handles. A reverse index maps each inserted entity to
/// the leaf that holds it, so motion and removal re-find the entity without
/// a search. See the crate docs for the concurrency contract.
pub struct Tree<E> {
    pub(crate) root: NodeId,
    /// Node arena; slots are recycled via `free_nodes`.
    pub(crate) nodes: Vec<Node>,
    pub(crate) free_nodes: Vec<NodeId>,
    /// Bucket arena; slots are recycled via `free_buckets`.
    pub(crate) buckets: Vec<Vec<E>>,
    pub(crate) free_buckets: Vec<BucketId>,
    /// Reverse index: entity -> owning leaf.
    pub(crate) leaves: HashMap<E, NodeId>,
    /// Leaves whose boxes changed since the last [`Tree::optimize`] drain.
    pub(crate) refit_queue: Vec<NodeId>,
    /// Bucket capacity before a leaf splits.
    pub(crate) max_leaves: usize,
    /// High-water mark of node depth over the tree's lifetime.
    pub(crate) max_depth: u32,
}

impl<E> Default for Tree<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> core::fmt::Debug for Tree<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tree")
            .field("entities", &self.leaves.len())
            .field("nodes_total", &self.nodes.len())
            .field("nodes_free", &self.free_nodes.len())
            .field("buckets_total", &self.buckets.len())
            .field("buckets_free", &self.free_buckets.len())
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl<E> Tree<E> {
    /// Create an empty tree with a bucket capacity of one entity per leaf.
    ///
    /// An empty tree is a single leaf root with an empty bucket.
    pub fn new() -> Self {
        Self::with_max_leaves(1)
    }

    /// Create an empty tree with the given bucket capacity.
    ///
    /// Rotation-based rebalancing ([`Tree::optimize`]) only runs with a
    /// capacity of one; larger buckets still split, refit, and answer
    /// queries.
    ///
    /// # Panics
    ///
    /// Panics if `max_leaves` is zero.
    pub fn with_max_leaves(max_leaves: usize) -> Self {
        assert!(max_leaves >= 1, "bucket capacity must be at least 1");
        let mut tree = Self {
            root: NodeId::new(0),
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            buckets: Vec::new(),
            free_buckets: Vec::new(),
            leaves: HashMap::new(),
            refit_queue: Vec::new(),
            max_leaves,
            max_depth: 0,
        };
        tree.root = tree.alloc_leaf_node();
        tree
    }

    /// Number of entities currently in the tree.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the tree holds no entities.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// High-water mark of node depth over the tree's lifetime. The root is
    /// at depth 0; removals do not lower this.
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.idx()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.idx()]
    }

    // --- arenas ---

    fn alloc_bucket(&mut self) -> BucketId {
        if let Some(id) = self.free_buckets.pop() {
            id
        } else {
            self.buckets.push(Vec::new());
            BucketId::new(self.buckets.len() - 1)
        }
    }

    /// Pop a recycled node or append a fresh one. Recycled nodes were reset
    /// when freed.
    pub(crate) fn alloc_node(&mut self, bucket: Option<BucketId>) -> NodeId {
        let id = if let Some(id) = self.free_nodes.pop() {
            id
        } else {
            self.nodes.push(Node::default());
            NodeId::new(self.nodes.len() - 1)
        };
        self.nodes[id.idx()].bucket = bucket;
        id
    }

    pub(crate) fn alloc_leaf_node(&mut self) -> NodeId {
        let bucket = self.alloc_bucket();
        self.alloc_node(Some(bucket))
    }

    fn free_node(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.idx()];
        node.parent = None;
        node.left = None;
        node.right = None;
        node.bucket = None;
        node.depth = 0;
        node.flags = NodeFlags::empty();
        self.free_nodes.push(id);
    }

    fn free_bucket(&mut self, id: BucketId) {
        self.buckets[id.idx()].clear();
        self.free_buckets.push(id);
    }

    // --- structure helpers ---

    pub(crate) fn sibling(&self, id: NodeId) -> NodeId {
        let parent = self.node(id).parent.expect("sibling of a parentless node");
        let parent = self.node(parent);
        if parent.left == Some(id) {
            parent.right.expect("branch without a right child")
        } else {
            parent.left.expect("branch without a left child")
        }
    }

    /// Assign `depth` to `id` and `depth + 1` downward through the subtree,
    /// bumping the `max_depth` high-water mark along the way.
    pub(crate) fn set_depth(&mut self, id: NodeId, depth: u32) {
        let mut stack = alloc::vec![(id, depth)];
        while let Some((id, depth)) = stack.pop() {
            let node = &mut self.nodes[id.idx()];
            debug_assert!(node.is_valid(), "malformed node while assigning depths");
            node.depth = depth;
            let (left, right) = (node.left, node.right);
            if depth > self.max_depth {
                self.max_depth = depth;
            }
            if let (Some(left), Some(right)) = (left, right) {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
    }

    /// Set a branch's box to the union of its children, optionally walking
    /// the correction all the way to the root.
    pub(crate) fn child_refit(&mut self, id: NodeId, propagate: bool) {
        let mut cur = id;
        loop {
            let node = &self.nodes[cur.idx()];
            let left = node.left.expect("refit on a node without children");
            let right = node.right.expect("refit on a node without children");
            let aabb = self.nodes[left.idx()]
                .aabb
                .union(&self.nodes[right.idx()].aabb);
            self.nodes[cur.idx()].aabb = aabb;
            if !propagate {
                break;
            }
            match self.nodes[cur.idx()].parent {
                Some(parent) => cur = parent,
                None => break,
            }
        }
    }
}

impl<E: Entity + Copy + Eq + Hash> Tree<E> {
    /// Whether the entity is currently in the tree.
    pub fn contains(&self, entity: E) -> bool {
        self.leaves.contains_key(&entity)
    }

    /// Iterate over every entity currently in the tree, in no particular
    /// order.
    pub fn entities(&self) -> impl Iterator<Item = &E> {
        self.leaves.keys()
    }

    /// The box enclosing every entity in the tree, or `None` when empty.
    pub fn bounds(&self) -> Option<Aabb3> {
        if self.leaves.is_empty() {
            None
        } else {
            Some(self.node(self.root).aabb)
        }
    }

    /// Insert an entity, descending from the root by surface-area cost.
    pub fn add(&mut self, entity: E) {
        let aabb = Aabb3::from_entity(&entity);
        let sa = aabb.surface_area();
        self.add_to_node(self.root, entity, aabb, sa);
    }

    fn add_to_node(&mut self, start: NodeId, entity: E, aabb: Aabb3, sa: f64) {
        let mut id = start;
        while !self.node(id).is_leaf() {
            let node = self.node(id);
            let left = node.left.expect("branch without a left child");
            let right = node.right.expect("branch without a right child");
            let left_box = self.node(left).aabb;
            let right_box = self.node(right).aabb;

            let new_left_sa = right_box.surface_area() + left_box.union(&aabb).surface_area();
            let new_right_sa = left_box.surface_area() + right_box.union(&aabb).surface_area();
            let merged_sa = left_box.union(&right_box).surface_area() + sa;

            if merged_sa < new_left_sa.min(new_right_sa) * MERGE_PUSHDOWN_RATIO {
                self.add_item_to_branch(id, entity);
                return;
            }

            id = if new_left_sa < new_right_sa { left } else { right };
        }
        self.add_item_to_leaf(id, entity);
    }

    pub(crate) fn add_item_to_node(&mut self, id: NodeId, entity: E) {
        if self.node(id).is_leaf() {
            self.add_item_to_leaf(id, entity);
        } else {
            self.add_item_to_branch(id, entity);
        }
    }

    fn add_item_to_leaf(&mut self, id: NodeId, entity: E) {
        let bucket = self.node(id).bucket.expect("append to a branch node");
        self.buckets[bucket.idx()].push(entity);
        self.leaves.insert(entity, id);
        self.refit_volume(id);
        self.split_if_necessary(id);
    }

    /// Merge-and-pushdown: the branch's two children move under a fresh
    /// interior node, making room for a new leaf holding the entity.
    fn add_item_to_branch(&mut self, id: NodeId, entity: E) {
        let node = self.node(id);
        let left = node.left.expect("branch without a left child");
        let right = node.right.expect("branch without a right child");
        let depth = node.depth;

        let merged = self.alloc_node(None);
        {
            let m = self.node_mut(merged);
            m.left = Some(left);
            m.right = Some(right);
            m.parent = Some(id);
        }
        self.node_mut(left).parent = Some(merged);
        self.node_mut(right).parent = Some(merged);
        self.child_refit(merged, false);

        let leaf = self.alloc_leaf_node();
        self.node_mut(leaf).parent = Some(id);
        let bucket = self.node(leaf).bucket.expect("fresh leaf without a bucket");
        self.buckets[bucket.idx()].push(entity);
        self.leaves.insert(entity, leaf);
        self.compute_volume(leaf);

        {
            let n = self.node_mut(id);
            n.left = Some(merged);
            n.right = Some(leaf);
        }
        self.set_depth(id, depth);
        self.child_refit(id, true);
    }

    /// Remove an entity from the tree.
    ///
    /// # Panics
    ///
    /// Panics if the entity was never inserted (or was already removed).
    pub fn remove(&mut self, entity: E) {
        let leaf = self
            .leaves
            .remove(&entity)
            .expect("remove of an entity that is not in the tree");
        let bucket = self
            .node(leaf)
            .bucket
            .expect("leaf index points at a branch node");
        let items = &mut self.buckets[bucket.idx()];
        let at = items
            .iter()
            .position(|item| *item == entity)
            .expect("entity missing from its leaf bucket");
        items.remove(at);

        if self.buckets[bucket.idx()].is_empty() {
            if self.node(leaf).parent.is_some() {
                self.remove_node(leaf);
            }
            // An emptied root leaf stays put: the tree is back in its
            // initial single-leaf state.
        } else {
            self.refit_volume(leaf);
        }
    }

    /// Collapse an emptied leaf: its sibling is spliced into the
    /// grandparent's slot (or promoted to root), and the leaf and its
    /// parent are freed.
    ///
    /// Returns the promoted sibling's new parent, if any.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self
            .node(id)
            .parent
            .expect("attempt to collapse a parentless node");
        let grandparent = self.node(parent).parent;
        let parent_depth = self.node(parent).depth;
        let keep = self.sibling(id);

        match grandparent {
            None => {
                self.root = keep;
                self.node_mut(keep).parent = None;
            }
            Some(grandparent) => {
                self.node_mut(keep).parent = Some(grandparent);
                let g = self.node_mut(grandparent);
                if g.left == Some(parent) {
                    g.left = Some(keep);
                } else {
                    g.right = Some(keep);
                }
            }
        }

        let bucket = self.node(id).bucket.expect("collapse of a branch node");
        self.free_bucket(bucket);
        self.free_node(id);
        self.free_node(parent);

        // The kept subtree rose into the freed parent's position.
        self.set_depth(keep, parent_depth);

        let new_parent = self.node(keep).parent;
        if let Some(new_parent) = new_parent {
            self.child_refit(new_parent, true);
        }
        new_parent
    }

    /// Take an entity out of a leaf it is known to live in. Emptied leaves
    /// collapse via [`Tree::remove_node`]; the caller guarantees the leaf
    /// has a parent.
    pub(crate) fn remove_item_from_node(&mut self, id: NodeId, entity: E) {
        let bucket = self.node(id).bucket.expect("remove on a non-leaf node");
        assert!(
            self.node(id).parent.is_some(),
            "attempt to collapse a parentless node"
        );
        self.leaves.remove(&entity);
        let items = &mut self.buckets[bucket.idx()];
        let at = items
            .iter()
            .position(|item| *item == entity)
            .expect("entity missing from its leaf bucket");
        items.remove(at);

        if self.buckets[bucket.idx()].is_empty() {
            self.remove_node(id);
        } else {
            self.refit_volume(id);
        }
    }

    // --- volumes ---

    /// Recompute a leaf's box from its bucket. Leaves an empty bucket's box
    /// untouched. Does not propagate; callers that need ancestor updates
    /// follow with [`Tree::refit_volume`] or [`Tree::child_refit`].
    pub(crate) fn compute_volume(&mut self, id: NodeId) {
        let bucket = self
            .nodes[id.idx()]
            .bucket
            .expect("volume from bucket on a branch node");
        let items = &self.buckets[bucket.idx()];
        let mut iter = items.iter();
        let Some(first) = iter.next() else {
            return;
        };
        let mut aabb = Aabb3::from_entity(first);
        for entity in iter {
            aabb = aabb.union(&Aabb3::from_entity(entity));
        }
        self.nodes[id.idx()].aabb = aabb;
    }

    /// Recompute a leaf's box and, when it changed, refit every ancestor.
    /// Returns whether a change happened. Box comparison is exact.
    pub(crate) fn refit_volume(&mut self, id: NodeId) -> bool {
        let old = self.nodes[id.idx()].aabb;
        self.compute_volume(id);
        if self.nodes[id.idx()].aabb == old {
            return false;
        }
        if let Some(parent) = self.nodes[id.idx()].parent {
            self.child_refit(parent, true);
        }
        true
    }
}
