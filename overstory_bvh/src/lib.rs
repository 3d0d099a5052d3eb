// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Overstory BVH: a dynamic 3D bounding-volume hierarchy.
//!
//! Overstory BVH is a reusable building block for broad-phase collision
//! queries over moving entities: game worlds, simulations, and editors that
//! need "every entity whose bounding box passes this test" without a full
//! rebuild on every tick.
//!
//! - Online insertion and removal of entities, guided by a surface-area
//!   heuristic (SAH).
//! - In-place refit after motion: announce a move with
//!   [`Tree::queue_for_optimize`], then drain with [`Tree::optimize`], which
//!   rebalances the touched part of the tree through local rotations.
//! - Predicate-driven traversal with [`Tree::traverse`], and a parallel
//!   variant ([`Tree::concurrent_traverse`]) that walks the two root
//!   subtrees as independent tasks.
//!
//! The tree does not own entities. It stores small, copyable handles and
//! observes position and radius through the [`Entity`] capability whenever
//! it needs fresh geometry, so the owner remains free to move an entity
//! between announcements. Handles are compared by identity (`Eq` + `Hash`
//! over an id or address), never by value.
//!
//! ## Concurrency model
//!
//! The tree is single-writer: `add`, `remove`, `queue_for_optimize`, and
//! `optimize` must not run concurrently with each other or with a reader.
//! `traverse` is pure-read and supports any number of concurrent readers
//! while no writer is active. [`Tree::concurrent_traverse`] spawns two
//! cooperating tasks over disjoint subtrees and joins them before
//! returning; it requires the default `std` feature.
//!
//! ## Example
//!
//! ```
//! use overstory_bvh::glam::DVec3;
//! use overstory_bvh::{Aabb3, Entity, Tree};
//!
//! #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
//! struct Probe(i32);
//!
//! impl Entity for Probe {
//!     fn position(&self) -> DVec3 {
//!         DVec3::new(f64::from(self.0) * 10.0, 0.0, 0.0)
//!     }
//!
//!     fn radius(&self) -> f64 {
//!         1.0
//!     }
//! }
//!
//! let mut tree = Tree::new();
//! for i in 0..32 {
//!     tree.add(Probe(i));
//! }
//!
//! // Everything overlapping a region near the origin.
//! let near = Aabb3::new(DVec3::splat(-5.0), DVec3::splat(5.0));
//! let hits = tree.traverse(|aabb| aabb.intersects(&near));
//! assert_eq!(hits, vec![Probe(0)]);
//! ```
//!
//! ## Float semantics
//!
//! Coordinates are `f64` and assumed finite (no NaNs). Box equality during
//! refit is exact: any motion, however small, counts as a change.

#![no_std]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

mod rotation;
mod split;
mod traverse;
mod tree;
mod types;

pub use glam;

pub use tree::Tree;
pub use types::{Aabb3, Entity};
