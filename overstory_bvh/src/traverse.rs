// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Predicate-driven traversal, serial and parallel.

use alloc::vec::Vec;
use core::hash::Hash;

use crate::tree::{NodeId, Tree};
use crate::types::{Aabb3, Entity};

impl<E: Entity + Copy + Eq + Hash> Tree<E> {
    /// Collect every entity under nodes whose box the predicate accepts.
    ///
    /// Pre-order, left before right; each entity appears at most once
    /// because it lives in exactly one leaf. `traverse(|_| true)` yields
    /// the whole population; `traverse(|_| false)` yields nothing.
    pub fn traverse<F>(&self, predicate: F) -> Vec<E>
    where
        F: Fn(&Aabb3) -> bool,
    {
        let mut hits = Vec::new();
        self.traverse_from(self.root, &predicate, &mut hits);
        hits
    }

    fn traverse_from<F>(&self, start: NodeId, predicate: &F, hits: &mut Vec<E>)
    where
        F: Fn(&Aabb3) -> bool,
    {
        let mut stack = alloc::vec![start];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if !node.is_valid() || !predicate(&node.aabb) {
                continue;
            }
            if let Some(bucket) = node.bucket {
                hits.extend(self.buckets[bucket.idx()].iter().copied());
            }
            // Pre-order, left before right: the right child is pushed
            // first so the left pops first.
            if let Some(right) = node.right {
                stack.push(right);
            }
            if let Some(left) = node.left {
                stack.push(left);
            }
        }
    }

    /// Like [`Tree::traverse`], but the two root subtrees are walked by two
    /// parallel tasks.
    ///
    /// Returns the same entities as the serial walk; ordering between the
    /// two halves is not part of the contract. The caller must ensure no
    /// writer runs for the duration (see the crate docs).
    #[cfg(feature = "std")]
    pub fn concurrent_traverse<F>(&self, predicate: F) -> Vec<E>
    where
        F: Fn(&Aabb3) -> bool + Sync,
        E: Send + Sync,
    {
        let root = self.node(self.root);
        if !root.is_valid() || !predicate(&root.aabb) {
            return Vec::new();
        }
        let (Some(left), Some(right)) = (root.left, root.right) else {
            // A leaf root has nothing to fan out over.
            let mut hits = Vec::new();
            if let Some(bucket) = root.bucket {
                hits.extend(self.buckets[bucket.idx()].iter().copied());
            }
            return hits;
        };

        let (mut hits, right_hits) = rayon::join(
            || {
                let mut out = Vec::new();
                self.traverse_from(left, &predicate, &mut out);
                out
            },
            || {
                let mut out = Vec::new();
                self.traverse_from(right, &predicate, &mut out);
                out
            },
        );
        hits.extend(right_hits);
        hits
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use core::hash::{Hash, Hasher};

    use glam::DVec3;

    use super::*;

    #[derive(Debug)]
    struct Particle {
        id: u32,
        position: DVec3,
        radius: f64,
    }

    impl PartialEq for Particle {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }

    impl Eq for Particle {}

    impl Hash for Particle {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.id.hash(state);
        }
    }

    impl Entity for Particle {
        fn position(&self) -> DVec3 {
            self.position
        }

        fn radius(&self) -> f64 {
            self.radius
        }
    }

    struct Rng(u64);

    impl Rng {
        fn new(seed: u64) -> Self {
            Self(seed)
        }

        fn next_u64(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn coord(&mut self, extent: u64) -> f64 {
            (self.next_u64() % extent) as f64
        }
    }

    fn scatter(count: u32, extent: u64, seed: u64) -> Vec<Particle> {
        let mut rng = Rng::new(seed);
        (0..count)
            .map(|id| Particle {
                id,
                position: DVec3::new(
                    rng.coord(extent),
                    rng.coord(extent),
                    rng.coord(extent),
                ),
                radius: 1.0,
            })
            .collect()
    }

    /// Slab-method ray/AABB intersection.
    struct Ray {
        pos: DVec3,
        dir: DVec3,
    }

    impl Ray {
        fn intersects(&self, aabb: &Aabb3) -> bool {
            let inv = self.dir.recip();
            let t1 = (aabb.min.x - self.pos.x) * inv.x;
            let t2 = (aabb.max.x - self.pos.x) * inv.x;
            let t3 = (aabb.min.y - self.pos.y) * inv.y;
            let t4 = (aabb.max.y - self.pos.y) * inv.y;
            let t5 = (aabb.min.z - self.pos.z) * inv.z;
            let t6 = (aabb.max.z - self.pos.z) * inv.z;

            let tmin = t1.min(t2).max(t3.min(t4)).max(t5.min(t6));
            let tmax = t1.max(t2).min(t3.max(t4)).min(t5.max(t6));

            // The box is behind the ray, or the slabs never overlap.
            tmax >= 0.0 && tmin <= tmax
        }
    }

    #[test]
    fn empty_tree_traverses_to_nothing() {
        let tree: Tree<&Particle> = Tree::new();
        assert!(tree.traverse(|_| true).is_empty());
    }

    #[test]
    fn rejecting_predicate_yields_nothing() {
        let particles = scatter(32, 100, 4);
        let mut tree = Tree::new();
        for p in &particles {
            tree.add(p);
        }
        assert!(tree.traverse(|_| false).is_empty());
    }

    #[test]
    fn accepting_predicate_yields_everything_once() {
        let particles = scatter(100, 500, 8);
        let mut tree = Tree::new();
        for p in &particles {
            tree.add(p);
        }
        let mut ids: Vec<u32> = tree.traverse(|_| true).iter().map(|p| p.id).collect();
        ids.sort_unstable();
        let expected: Vec<u32> = (0..100).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn ray_query_matches_a_linear_scan() {
        // 1000 entities uniform in [0, 1000)^3, radius 1, fixed seed; a
        // diagonal ray must hit the same set through the hierarchy as
        // through a naive scan over every entity.
        let particles = scatter(1000, 1000, 1_313_131_313);
        let mut tree = Tree::new();
        for p in &particles {
            tree.add(p);
        }

        let gunshot = Ray {
            pos: DVec3::ZERO,
            dir: DVec3::new(45.0, 45.0, 0.0),
        };

        let mut from_tree: Vec<u32> = tree
            .traverse(|aabb| gunshot.intersects(aabb))
            .iter()
            .map(|p| p.id)
            .collect();
        from_tree.sort_unstable();

        let mut from_scan: Vec<u32> = particles
            .iter()
            .filter(|p| gunshot.intersects(&Aabb3::from_entity(p)))
            .map(|p| p.id)
            .collect();
        from_scan.sort_unstable();

        assert!(!from_scan.is_empty(), "the ray must hit something");
        assert_eq!(from_tree, from_scan);
    }

    #[test]
    fn serial_traverse_is_preorder_left_first() {
        // Two well-separated groups: the left subtree's entities must all
        // appear before the right subtree's.
        let near = Particle {
            id: 1,
            position: DVec3::splat(0.0),
            radius: 1.0,
        };
        let far = Particle {
            id: 2,
            position: DVec3::splat(1000.0),
            radius: 1.0,
        };
        let mut tree = Tree::new();
        tree.add(&near);
        tree.add(&far);

        let root = &tree.nodes[tree.root.idx()];
        let left = root.left.expect("two entities make a branch root");
        let first_leaf_box = tree.nodes[left.idx()].aabb;

        let hits = tree.traverse(|_| true);
        assert_eq!(hits.len(), 2);
        assert_eq!(Aabb3::from_entity(&hits[0]), first_leaf_box);
    }

    #[cfg(feature = "std")]
    #[test]
    fn concurrent_traverse_matches_serial() {
        let particles = scatter(500, 800, 6);
        let mut tree = Tree::new();
        for p in &particles {
            tree.add(p);
        }

        let region = Aabb3::new(DVec3::splat(100.0), DVec3::splat(400.0));
        let predicate = |aabb: &Aabb3| aabb.intersects(&region);

        let mut serial: Vec<u32> = tree.traverse(predicate).iter().map(|p| p.id).collect();
        let mut parallel: Vec<u32> = tree
            .concurrent_traverse(predicate)
            .iter()
            .map(|p| p.id)
            .collect();
        serial.sort_unstable();
        parallel.sort_unstable();
        assert_eq!(serial, parallel);
    }

    #[cfg(feature = "std")]
    #[test]
    fn concurrent_traverse_on_small_trees() {
        let solo = Particle {
            id: 1,
            position: DVec3::splat(5.0),
            radius: 1.0,
        };
        let mut tree = Tree::new();
        assert!(tree.concurrent_traverse(|_| true).is_empty());

        tree.add(&solo);
        assert_eq!(tree.concurrent_traverse(|_| true), [&solo]);
        assert!(tree.concurrent_traverse(|_| false).is_empty());
    }
}
