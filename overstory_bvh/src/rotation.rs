// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rotation-based rebalancing: queueing moved entities, the depth-wave
//! `optimize` drain, and the local tree rotations it applies.

use core::hash::Hash;
use core::mem;

use tracing::error;

use crate::tree::{MERGE_PUSHDOWN_RATIO, NodeFlags, NodeId, Tree};
use crate::types::{Aabb3, Entity};

/// A local tree edit that preserves the set of leaves while changing the
/// interior structure. Named by which slots swap: `LeftRightLeft` swaps the
/// left child with the right child's left child, and so on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Rotation {
    None,
    LeftRightLeft,
    LeftRightRight,
    RightLeftLeft,
    RightLeftRight,
    LeftLeftRightRight,
    LeftLeftRightLeft,
}

impl Rotation {
    const CANDIDATES: [Self; 6] = [
        Self::LeftRightLeft,
        Self::LeftRightRight,
        Self::RightLeftLeft,
        Self::RightLeftRight,
        Self::LeftLeftRightRight,
        Self::LeftLeftRightLeft,
    ];
}

impl<E: Entity + Copy + Eq + Hash> Tree<E> {
    /// Announce that an entity may have moved.
    ///
    /// Re-runs the insertion descent from the root; when a strictly better
    /// leaf or branch is found the entity is relocated immediately.
    /// Otherwise, if refitting the owning leaf changed its box, the leaf is
    /// queued for the next [`Tree::optimize`] drain.
    ///
    /// Returns `false` (and does nothing) iff the entity is not in the
    /// tree.
    pub fn queue_for_optimize(&mut self, entity: E) -> bool {
        let Some(&leaf) = self.leaves.get(&entity) else {
            return false;
        };

        if !self.node(leaf).is_leaf() {
            error!(node = leaf.idx(), "leaf index points at a branch node");
        }

        if let Some(better) = self.try_find_better_node(leaf, entity) {
            self.move_item_between_nodes(leaf, better, entity);
        } else if self.refit_volume(leaf) && self.node(leaf).parent.is_some() {
            self.refit_queue.push(leaf);
        }

        true
    }

    /// Re-run the insertion descent for an entity that already lives in
    /// `cur`. Returns a strictly better destination, or `None` when the
    /// descent lands on the root, on `cur` itself, or on `cur`'s own parent
    /// (pulling a leaf up beside its parent would leave a dangling slot).
    fn try_find_better_node(&self, cur: NodeId, entity: E) -> Option<NodeId> {
        let aabb = Aabb3::from_entity(&entity);
        let sa = aabb.surface_area();

        let mut bn = self.root;
        while !self.node(bn).is_leaf() {
            assert!(self.node(bn).is_valid(), "malformed node during descent");
            let node = self.node(bn);
            let left = node.left.expect("branch without a left child");
            let right = node.right.expect("branch without a right child");
            let left_box = self.node(left).aabb;
            let right_box = self.node(right).aabb;

            let left_sa = right_box.surface_area() + left_box.union(&aabb).surface_area();
            let right_sa = left_box.surface_area() + right_box.union(&aabb).surface_area();
            let merged_sa = left_box.union(&right_box).surface_area() + sa;

            if merged_sa < left_sa.min(right_sa) * MERGE_PUSHDOWN_RATIO {
                break;
            }

            bn = if left_sa <= right_sa { left } else { right };
        }

        if bn == self.root || bn == cur {
            return None;
        }
        if self.node(cur).parent == Some(bn) && self.node(cur).is_leaf() {
            return None;
        }
        Some(bn)
    }

    pub(crate) fn move_item_between_nodes(&mut self, from: NodeId, to: NodeId, entity: E) {
        self.remove_item_from_node(from, entity);
        self.add_item_to_node(to, entity);
    }

    /// Drain the refit queue, rotating queued subtrees in waves from the
    /// shallowest queued depth upward toward the root.
    ///
    /// Only runs when the bucket capacity is one; larger buckets keep their
    /// queue untouched.
    pub fn optimize(&mut self) {
        if self.max_leaves != 1 {
            return;
        }
        if self.refit_queue.is_empty() {
            return;
        }

        let mut queue = mem::take(&mut self.refit_queue);
        queue.sort_by_key(|&id| self.node(id).depth);

        let mut cur_depth = self.node(queue[0]).depth;
        let mut i = 0;
        while cur_depth > 0 {
            while i < queue.len() {
                let id = queue[i];
                if self.node(id).depth != cur_depth {
                    break;
                }
                i += 1;

                if !self.node(id).is_valid() {
                    continue;
                }
                self.node_mut(id).flags.remove(NodeFlags::OPTIMIZATION_QUEUED);
                self.try_rotate(id);

                let Some(parent) = self.node(id).parent else {
                    continue;
                };
                if self
                    .node(parent)
                    .flags
                    .contains(NodeFlags::OPTIMIZATION_QUEUED)
                {
                    continue;
                }
                self.node_mut(parent)
                    .flags
                    .insert(NodeFlags::OPTIMIZATION_QUEUED);
                queue.push(parent);
            }
            cur_depth -= 1;
        }

        // Entries the wave never reached keep their flag; clear it so a
        // later drain can queue them again.
        for id in queue {
            self.node_mut(id).flags.remove(NodeFlags::OPTIMIZATION_QUEUED);
        }
    }

    /// Evaluate the six rotation candidates against the branch's current
    /// cost and apply the best one if it is a strict improvement. A no-op
    /// on leaves.
    pub(crate) fn try_rotate(&mut self, id: NodeId) {
        if self.node(id).is_leaf() {
            return;
        }

        let left = self.node(id).left.expect("branch without a left child");
        let right = self.node(id).right.expect("branch without a right child");
        let sa = self.node(left).aabb.surface_area() + self.node(right).aabb.surface_area();

        let mut best = Rotation::None;
        let mut best_sa = f64::INFINITY;
        for rotation in Rotation::CANDIDATES {
            let cost = self.rotation_cost(id, rotation);
            if cost < best_sa {
                best = rotation;
                best_sa = cost;
            }
        }
        if best == Rotation::None {
            return;
        }
        if (sa - best_sa) / sa <= 0.0 {
            return;
        }
        self.apply_rotation(id, best);
    }

    /// Sum of the two post-rotation subtree surface areas, or infinity when
    /// a child the candidate needs to open up is a leaf.
    fn rotation_cost(&self, id: NodeId, rotation: Rotation) -> f64 {
        let node = self.node(id);
        let left = node.left.expect("branch without a left child");
        let right = node.right.expect("branch without a right child");

        let sa = |id: NodeId| self.node(id).aabb.surface_area();
        let union_sa =
            |a: NodeId, b: NodeId| self.node(a).aabb.union(&self.node(b).aabb).surface_area();

        match rotation {
            Rotation::None => f64::INFINITY,
            Rotation::LeftRightLeft => {
                if self.node(right).is_leaf() {
                    return f64::INFINITY;
                }
                let right = self.node(right);
                sa(right.left.unwrap()) + union_sa(left, right.right.unwrap())
            }
            Rotation::LeftRightRight => {
                if self.node(right).is_leaf() {
                    return f64::INFINITY;
                }
                let right = self.node(right);
                sa(right.right.unwrap()) + union_sa(left, right.left.unwrap())
            }
            Rotation::RightLeftLeft => {
                if self.node(left).is_leaf() {
                    return f64::INFINITY;
                }
                let left = self.node(left);
                sa(left.left.unwrap()) + union_sa(right, left.right.unwrap())
            }
            Rotation::RightLeftRight => {
                if self.node(left).is_leaf() {
                    return f64::INFINITY;
                }
                let left = self.node(left);
                sa(left.right.unwrap()) + union_sa(right, left.left.unwrap())
            }
            Rotation::LeftLeftRightRight => {
                if self.node(left).is_leaf() || self.node(right).is_leaf() {
                    return f64::INFINITY;
                }
                let (ll, lr) = (self.node(left).left.unwrap(), self.node(left).right.unwrap());
                let (rl, rr) = (
                    self.node(right).left.unwrap(),
                    self.node(right).right.unwrap(),
                );
                union_sa(rr, lr) + union_sa(rl, ll)
            }
            Rotation::LeftLeftRightLeft => {
                if self.node(left).is_leaf() || self.node(right).is_leaf() {
                    return f64::INFINITY;
                }
                let (ll, lr) = (self.node(left).left.unwrap(), self.node(left).right.unwrap());
                let (rl, rr) = (
                    self.node(right).left.unwrap(),
                    self.node(right).right.unwrap(),
                );
                union_sa(rl, lr) + union_sa(rr, ll)
            }
        }
    }

    fn apply_rotation(&mut self, id: NodeId, rotation: Rotation) {
        let left = self.node(id).left.expect("branch without a left child");
        let right = self.node(id).right.expect("branch without a right child");

        match rotation {
            Rotation::None => return,
            Rotation::LeftRightLeft => {
                let grandchild = self.node(right).left.expect("rotation into a leaf");
                self.node_mut(id).left = Some(grandchild);
                self.node_mut(grandchild).parent = Some(id);
                self.node_mut(right).left = Some(left);
                self.node_mut(left).parent = Some(right);
                self.child_refit(right, false);
            }
            Rotation::LeftRightRight => {
                let grandchild = self.node(right).right.expect("rotation into a leaf");
                self.node_mut(id).left = Some(grandchild);
                self.node_mut(grandchild).parent = Some(id);
                self.node_mut(right).right = Some(left);
                self.node_mut(left).parent = Some(right);
                self.child_refit(right, false);
            }
            Rotation::RightLeftLeft => {
                let grandchild = self.node(left).left.expect("rotation into a leaf");
                self.node_mut(id).right = Some(grandchild);
                self.node_mut(grandchild).parent = Some(id);
                self.node_mut(left).left = Some(right);
                self.node_mut(right).parent = Some(left);
                self.child_refit(left, false);
            }
            Rotation::RightLeftRight => {
                let grandchild = self.node(left).right.expect("rotation into a leaf");
                self.node_mut(id).right = Some(grandchild);
                self.node_mut(grandchild).parent = Some(id);
                self.node_mut(left).right = Some(right);
                self.node_mut(right).parent = Some(left);
                self.child_refit(left, false);
            }
            Rotation::LeftLeftRightRight => {
                let ll = self.node(left).left.expect("rotation into a leaf");
                let rr = self.node(right).right.expect("rotation into a leaf");
                self.node_mut(left).left = Some(rr);
                self.node_mut(rr).parent = Some(left);
                self.node_mut(right).right = Some(ll);
                self.node_mut(ll).parent = Some(right);
                self.child_refit(left, false);
                self.child_refit(right, false);
            }
            Rotation::LeftLeftRightLeft => {
                let ll = self.node(left).left.expect("rotation into a leaf");
                let rl = self.node(right).left.expect("rotation into a leaf");
                self.node_mut(left).left = Some(rl);
                self.node_mut(rl).parent = Some(left);
                self.node_mut(right).left = Some(ll);
                self.node_mut(ll).parent = Some(right);
                self.child_refit(left, false);
                self.child_refit(right, false);
            }
        }

        // The single rotations move grandchildren across levels.
        if matches!(
            rotation,
            Rotation::LeftRightLeft
                | Rotation::LeftRightRight
                | Rotation::RightLeftLeft
                | Rotation::RightLeftRight
        ) {
            let depth = self.node(id).depth;
            self.set_depth(id, depth);
        }
    }
}
