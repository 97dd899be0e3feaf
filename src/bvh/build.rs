//! Object-median BVH builder.
//!
//! Splits on the longest axis of the node bounds at the median triangle
//! (by centroid), recursing until leaves are at or under the threshold.
//! Nodes are pushed after their children, so every child index is smaller
//! than its parent's and the root is the last node written.

use std::cmp::Ordering;

use super::{BvhNode, BvhSettings, TriangleRange};
use crate::scene::{Triangle, Vertex};
use crate::util::{Aabb, Vec3};

/// Subtree built in isolation; child links index into `nodes`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBvh {
    pub nodes: Vec<BvhNode>,
    pub root: usize,
}

impl LocalBvh {
    /// Levels on the deepest root-to-leaf path.
    pub fn depth(&self) -> usize {
        super::tree_depth(&self.nodes, self.root).unwrap_or(0)
    }
}

/// Build one instance's subtree over its whole triangle range.
///
/// The range must be non-empty; empty instances are skipped by the caller.
#[tracing::instrument(skip_all, fields(start = range.start(), tri_count = range.len()))]
pub fn build_subtree(
    range: &mut TriangleRange<'_>,
    vertices: &[Vertex],
    settings: BvhSettings,
) -> LocalBvh {
    debug_assert!(!range.is_empty());
    let (start, end) = (range.start(), range.end());
    // Median splits produce at most 2n - 1 nodes.
    let mut nodes = Vec::with_capacity(2 * range.len());
    let root = build(
        range,
        vertices,
        start,
        end,
        settings.enabled,
        settings.leaf_threshold,
        &mut nodes,
    );
    LocalBvh { nodes, root }
}

/// Build the subtree for `[start, end)` and return the index of its root.
///
/// Sorts the range in place along the split axis. `nodes` is append-only;
/// indices written into it are relative to its start, so callers that
/// share one vector across instances must track their own base offset.
pub fn build(
    range: &mut TriangleRange<'_>,
    vertices: &[Vertex],
    start: usize,
    end: usize,
    recurse: bool,
    leaf_threshold: usize,
    nodes: &mut Vec<BvhNode>,
) -> usize {
    let bounds = range_bounds(range.slice(start, end), vertices);

    if end - start <= leaf_threshold || !recurse {
        nodes.push(BvhNode::leaf(bounds, start, end - start));
        return nodes.len() - 1;
    }

    let axis = bounds.longest_axis();
    sort_along_axis(range.slice_mut(start, end), vertices, axis);

    let mid = (start + end) / 2;
    let left = build(range, vertices, start, mid, recurse, leaf_threshold, nodes);
    let right = build(range, vertices, mid, end, recurse, leaf_threshold, nodes);

    nodes.push(BvhNode::internal(bounds, left, right));
    nodes.len() - 1
}

/// Elementwise min/max over every vertex of every triangle.
fn range_bounds(triangles: &[Triangle], vertices: &[Vertex]) -> Aabb {
    let mut bounds = Aabb::EMPTY;
    for tri in triangles {
        for idx in tri.indices() {
            bounds.expand_by_point(vertices[idx as usize].position);
        }
    }
    bounds
}

/// Mean of the three vertex positions.
#[inline]
fn centroid(tri: &Triangle, vertices: &[Vertex]) -> Vec3 {
    let [a, b, c] = tri.indices().map(|i| vertices[i as usize].position);
    (a + b + c) / 3.0
}

/// Stable sort by centroid along `axis` with a total-order tie-break:
/// the other two axes in cyclic order, then vertex indices, then material.
fn sort_along_axis(triangles: &mut [Triangle], vertices: &[Vertex], axis: usize) {
    let mut keyed: Vec<([f32; 3], Triangle)> = triangles
        .iter()
        .map(|t| {
            let c = centroid(t, vertices).to_array();
            ([c[axis], c[(axis + 1) % 3], c[(axis + 2) % 3]], *t)
        })
        .collect();

    keyed.sort_by(|(ka, ta), (kb, tb)| {
        ka[0]
            .total_cmp(&kb[0])
            .then_with(|| ka[1].total_cmp(&kb[1]))
            .then_with(|| ka[2].total_cmp(&kb[2]))
            .then_with(|| compare_triangles(ta, tb))
    });

    for (dst, (_, tri)) in triangles.iter_mut().zip(keyed) {
        *dst = tri;
    }
}

fn compare_triangles(a: &Triangle, b: &Triangle) -> Ordering {
    (a.v0, a.v1, a.v2, a.material_id).cmp(&(b.v0, b.v1, b.v2, b.material_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Vec2;

    /// Triangle centered at (cx, cy, cz) in the XY plane; pushes its vertices.
    fn make_tri(vertices: &mut Vec<Vertex>, cx: f32, cy: f32, cz: f32) -> Triangle {
        let base = vertices.len() as u32;
        for p in [
            Vec3::new(cx - 0.5, cy - 0.5, cz),
            Vec3::new(cx + 0.5, cy - 0.5, cz),
            Vec3::new(cx, cy + 0.5, cz),
        ] {
            vertices.push(Vertex::new(p, Vec3::Z, Vec2::ZERO));
        }
        Triangle::new(base, base + 1, base + 2, -1)
    }

    fn build_default(tris: &mut [Triangle], verts: &[Vertex]) -> LocalBvh {
        build_subtree(&mut TriangleRange::new(0, tris), verts, BvhSettings::default())
    }

    fn row(n: usize) -> (Vec<Vertex>, Vec<Triangle>) {
        let mut verts = Vec::new();
        // Reverse order so the builder has to sort.
        let tris = (0..n)
            .rev()
            .map(|i| make_tri(&mut verts, i as f32 * 2.0, 0.0, 0.0))
            .collect();
        (verts, tris)
    }

    #[test]
    fn test_single_triangle() {
        let (verts, mut tris) = row(1);
        let local = build_default(&mut tris, &verts);
        assert_eq!(local.nodes.len(), 1);
        assert_eq!(local.root, 0);
        let leaf = local.nodes[0];
        assert!(leaf.is_leaf());
        assert_eq!(leaf.triangle_count, 1);
        assert_eq!(leaf.bounds.min, Vec3::new(-0.5, -0.5, 0.0));
        assert_eq!(leaf.bounds.max, Vec3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn test_ten_triangles_shape() {
        let (verts, mut tris) = row(10);
        let local = build_default(&mut tris, &verts);
        // 10 -> 5 + 5 -> (2 + 3) + (2 + 3)
        assert_eq!(local.nodes.len(), 7);
        assert_eq!(local.root, 6);
        let leaves: Vec<u32> = local
            .nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.triangle_count)
            .collect();
        assert_eq!(leaves, vec![2, 3, 2, 3]);
    }

    #[test]
    fn test_children_precede_parents() {
        let (verts, mut tris) = row(37);
        let local = build_default(&mut tris, &verts);
        for (i, n) in local.nodes.iter().enumerate() {
            if !n.is_leaf() {
                assert!((n.left_child as usize) < i);
                assert!((n.right_child as usize) < i);
                assert_eq!(n.triangle_start, -1);
                assert_eq!(n.triangle_count, 0);
            }
        }
        assert_eq!(local.root, local.nodes.len() - 1);
    }

    #[test]
    fn test_sorts_range_along_x() {
        let (verts, mut tris) = row(9);
        build_default(&mut tris, &verts);
        let xs: Vec<f32> = tris.iter().map(|t| centroid(t, &verts).x).collect();
        assert!(xs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_disabled_builds_one_leaf() {
        let (verts, mut tris) = row(20);
        let before = tris.clone();
        let settings = BvhSettings {
            enabled: false,
            ..Default::default()
        };
        let local = build_subtree(&mut TriangleRange::new(0, &mut tris), &verts, settings);
        assert_eq!(local.nodes.len(), 1);
        assert_eq!(local.nodes[0].triangle_count, 20);
        assert_eq!(local.nodes[0].bounds.min.x, -0.5);
        assert_eq!(local.nodes[0].bounds.max.x, 38.5);
        // No split, no sort.
        assert_eq!(tris, before);
    }

    #[test]
    fn test_offset_range_uses_absolute_indices() {
        let (verts, mut tris) = row(6);
        let mut all = vec![Triangle::new(0, 0, 0, 9); 3];
        all.append(&mut tris);
        let mut range = TriangleRange::new(3, &mut all[3..]);
        let local = build_subtree(&mut range, &verts, BvhSettings::default());
        let starts: Vec<i32> = local
            .nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.triangle_start)
            .collect();
        assert_eq!(starts, vec![3, 6]);
        // Prefix untouched.
        assert!(all[..3].iter().all(|t| t.material_id == 9));
    }

    #[test]
    fn test_symmetric_ties_are_deterministic() {
        // All centroids share x, several share y or z.
        let mut verts = Vec::new();
        let mut tris = Vec::new();
        for (y, z) in [(0.0, 3.0), (0.0, -3.0), (5.0, 0.0), (-5.0, 0.0), (0.0, 0.0), (1.0, 1.0)] {
            tris.push(make_tri(&mut verts, 0.0, y, z));
        }
        let mut a = tris.clone();
        let mut b: Vec<Triangle> = tris.iter().rev().copied().collect();
        let settings = BvhSettings {
            leaf_threshold: 1,
            enabled: true,
        };
        let la = build_subtree(&mut TriangleRange::new(0, &mut a), &verts, settings);
        let lb = build_subtree(&mut TriangleRange::new(0, &mut b), &verts, settings);
        assert_eq!(la, lb);
        assert_eq!(a, b);
    }

    #[test]
    fn test_nan_vertices_give_degenerate_leaf() {
        let nan = Vec3::splat(f32::NAN);
        let verts = vec![Vertex::new(nan, Vec3::ZERO, Vec2::ZERO); 3];
        let mut tris = vec![Triangle::new(0, 1, 2, -1)];
        let local = build_default(&mut tris, &verts);
        assert_eq!(local.nodes.len(), 1);
        assert!(local.nodes[0].bounds.is_empty());
    }
}
