//! Math type re-exports and the axis-aligned box used by the BVH.

pub use glam::{Mat3, Mat4, Quat, UVec2, Vec2, Vec3, Vec4};

use std::fmt;

/// Axis-aligned bounding box with single precision.
#[derive(Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Empty box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new box from min and max points.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Check if this box is empty (inverted on some axis).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this box to include a point.
    ///
    /// Uses `f32::min`/`f32::max` per component, so NaN coordinates are
    /// skipped rather than poisoning the box.
    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = Vec3::new(self.min.x.min(p.x), self.min.y.min(p.y), self.min.z.min(p.z));
        self.max = Vec3::new(self.max.x.max(p.x), self.max.y.max(p.y), self.max.z.max(p.z));
    }

    /// Check whether a point lies inside (inclusive).
    #[inline]
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Get the size (extents) of the box.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Axis of largest extent (0=x, 1=y, 2=z).
    ///
    /// Ties resolve to the lowest axis; a NaN extent never wins over a
    /// finite one because the comparison is strict.
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let e = self.size().to_array();
        let mut axis = 0;
        for i in 1..3 {
            if e[i] > e[axis] || (e[axis].is_nan() && !e[i].is_nan()) {
                axis = i;
            }
        }
        axis
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aabb({:?} - {:?})", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_expand() {
        let mut b = Aabb::EMPTY;
        assert!(b.is_empty());

        b.expand_by_point(Vec3::new(1.0, 2.0, 3.0));
        b.expand_by_point(Vec3::new(-1.0, 0.0, 5.0));
        assert!(!b.is_empty());
        assert_eq!(b.min, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(b.max, Vec3::new(1.0, 2.0, 5.0));
        assert!(b.contains_point(Vec3::new(0.0, 1.0, 4.0)));
        assert!(!b.contains_point(Vec3::new(0.0, 3.0, 4.0)));
    }

    #[test]
    fn test_aabb_nan_is_skipped() {
        let mut b = Aabb::EMPTY;
        b.expand_by_point(Vec3::splat(f32::NAN));
        assert!(b.is_empty());
        b.expand_by_point(Vec3::ONE);
        assert_eq!(b.min, Vec3::ONE);
        assert_eq!(b.max, Vec3::ONE);
    }

    #[test]
    fn test_longest_axis_ties() {
        let b = Aabb::new(Vec3::ZERO, Vec3::new(2.0, 2.0, 1.0));
        assert_eq!(b.longest_axis(), 0);
        let b = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 3.0, 3.0));
        assert_eq!(b.longest_axis(), 1);
        let b = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 3.0));
        assert_eq!(b.longest_axis(), 2);
        assert_eq!(Aabb::EMPTY.longest_axis(), 0);
    }
}
