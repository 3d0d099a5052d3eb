// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive geometry types and the entity capability.

use glam::DVec3;

/// Axis-aligned bounding box in 3D.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Aabb3 {
    /// Minimum corner.
    pub min: DVec3,
    /// Maximum corner.
    pub max: DVec3,
}

impl Aabb3 {
    /// Create a new AABB from min/max corners.
    pub const fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// The box `[p − r, p + r]` around an entity's current position.
    pub fn from_entity<E: Entity + ?Sized>(entity: &E) -> Self {
        let pos = entity.position();
        let half = DVec3::splat(entity.radius());
        Self {
            min: pos - half,
            max: pos + half,
        }
    }

    /// Strict overlap test on all three axes.
    ///
    /// Boxes that merely touch (share a face, edge, or corner) do not
    /// intersect.
    pub fn intersects(&self, other: &Self) -> bool {
        self.max.x > other.min.x
            && self.min.x < other.max.x
            && self.max.y > other.min.y
            && self.min.y < other.max.y
            && self.max.z > other.min.z
            && self.min.z < other.max.z
    }

    /// Total surface area, `2·(dx·dy + dx·dz + dy·dz)`.
    ///
    /// A zero-extent box has surface area 0.
    pub fn surface_area(&self) -> f64 {
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.x * d.z + d.y * d.z)
    }

    /// Componentwise union of the two boxes. Commutative and idempotent.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Capability the tree observes on stored entities.
///
/// The tree stores `E` by value as a cheap handle and never mutates the
/// entity behind it. Position and radius are re-read wherever the tree
/// needs fresh geometry (insert, refit, re-find-best), so owners may move
/// an entity at any time between
/// [`Tree::queue_for_optimize`](crate::Tree::queue_for_optimize) calls.
///
/// Handles are compared by identity: implement `Eq` and `Hash` over a
/// unique id (or an address), not over the entity's value. Two handles for
/// distinct entities at the same position must not compare equal.
pub trait Entity {
    /// Center of the entity's bounding sphere.
    fn position(&self) -> DVec3;

    /// Radius of the entity's bounding sphere.
    fn radius(&self) -> f64;
}

impl<E: Entity + ?Sized> Entity for &E {
    fn position(&self) -> DVec3 {
        (**self).position()
    }

    fn radius(&self) -> f64 {
        (**self).radius()
    }
}

/// Coordinate axis, used by the leaf-splitting heuristic.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub(crate) const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    pub(crate) fn component(self, v: DVec3) -> f64 {
        match self {
            Self::X => v.x,
            Self::Y => v.y,
            Self::Z => v.z,
        }
    }
}
