// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Leaf splitting: axis choice by surface-area score, midpoint partition.

use alloc::vec::Vec;
use core::cmp::Ordering;
use core::hash::Hash;
use core::mem;

use crate::tree::{BucketId, NodeId, Tree};
use crate::types::{Aabb3, Axis, Entity};

impl<E: Entity + Copy + Eq + Hash> Tree<E> {
    pub(crate) fn split_if_necessary(&mut self, id: NodeId) {
        if self.item_count(id) > self.max_leaves {
            self.split_node(id);
        }
    }

    pub(crate) fn item_count(&self, id: NodeId) -> usize {
        match self.node(id).bucket {
            Some(bucket) => self.buckets[bucket.idx()].len(),
            None => 0,
        }
    }

    /// Turn an over-capacity leaf into a branch over two half-buckets.
    ///
    /// Each axis is scored by stably sorting the bucket along it and
    /// pricing the midpoint split as `sa(left)·|left| + sa(right)·|right|`;
    /// the first axis with the smallest score wins. The left half keeps the
    /// leaf's bucket, the right half gets a fresh one.
    fn split_node(&mut self, id: NodeId) {
        let bucket = self.node(id).bucket.expect("split of a branch node");
        let mut items = mem::take(&mut self.buckets[bucket.idx()]);
        for entity in &items {
            self.leaves.remove(entity);
        }

        let mid = items.len() / 2;
        let mut best: Option<(f64, Axis)> = None;
        for axis in Axis::ALL {
            sort_by_axis(&mut items, axis);
            let score = split_score(&items, mid);
            if best.is_none_or(|(best_score, _)| score < best_score) {
                best = Some((score, axis));
            }
        }
        let (_, axis) = best.expect("split of an empty bucket");
        sort_by_axis(&mut items, axis);
        let right_items = items.split_off(mid);

        let depth = self.node(id).depth;
        let left = self.node_from_split(id, items, depth + 1, Some(bucket));
        let right = self.node_from_split(id, right_items, depth + 1, None);

        {
            let node = self.node_mut(id);
            node.left = Some(left);
            node.right = Some(right);
            node.bucket = None;
        }
        assert!(
            self.node(id).is_valid_branch()
                && self.node(left).is_valid()
                && self.node(right).is_valid(),
            "split produced an invalid branch"
        );
    }

    /// Build one half of a split: a leaf under `parent` holding `items`,
    /// re-split recursively if still over capacity.
    fn node_from_split(
        &mut self,
        parent: NodeId,
        items: Vec<E>,
        depth: u32,
        bucket: Option<BucketId>,
    ) -> NodeId {
        assert!(!items.is_empty(), "split produced an empty half");

        let id = match bucket {
            Some(bucket) => self.alloc_node(Some(bucket)),
            None => self.alloc_leaf_node(),
        };
        {
            let node = self.node_mut(id);
            node.parent = Some(parent);
            node.depth = depth;
        }
        if depth > self.max_depth {
            self.max_depth = depth;
        }

        let count = items.len();
        for entity in &items {
            self.leaves.insert(*entity, id);
        }
        let bucket = self.node(id).bucket.expect("split node without a bucket");
        self.buckets[bucket.idx()] = items;

        self.compute_volume(id);
        self.split_if_necessary(id);
        if count > self.max_leaves {
            // The recursive split turned this node into a branch; replace
            // the bucket envelope with the children's union.
            self.child_refit(id, false);
        }
        id
    }
}

fn sort_by_axis<E: Entity>(items: &mut [E], axis: Axis) {
    items.sort_by(|a, b| {
        let pa = axis.component(a.position());
        let pb = axis.component(b.position());
        match pa.partial_cmp(&pb) {
            Some(ord) => ord,
            None => Ordering::Equal,
        }
    });
}

fn split_score<E: Entity>(items: &[E], mid: usize) -> f64 {
    let left = &items[..mid];
    let right = &items[mid..];
    envelope(left).surface_area() * left.len() as f64
        + envelope(right).surface_area() * right.len() as f64
}

fn envelope<E: Entity>(items: &[E]) -> Aabb3 {
    let (first, rest) = items.split_first().expect("envelope of no entities");
    let mut aabb = Aabb3::from_entity(first);
    for entity in rest {
        aabb = aabb.union(&Aabb3::from_entity(entity));
    }
    aabb
}
