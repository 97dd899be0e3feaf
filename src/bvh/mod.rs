//! Bounding volume hierarchy over triangle meshes.
//!
//! Each mesh instance gets its own binary tree, built into a private
//! arena by [`build_subtree`] and then relocated into the scene-wide node
//! array held by [`BvhArena`].
//!
//! ## Layout
//! ```text
//! [ instance 0 subtree (children before parents) | instance 1 subtree | ... ]
//!                                      ^ root = last node of the block
//! ```

mod build;

pub use build::{build, build_subtree, LocalBvh};

use std::ops::Range;

use crate::scene::Triangle;
use crate::util::{Aabb, Error, Result};

/// Default maximum triangles per leaf.
pub const DEFAULT_LEAF_THRESHOLD: usize = 4;

/// Valid leaf thresholds.
pub const LEAF_THRESHOLD_RANGE: std::ops::RangeInclusive<usize> = 1..=64;

/// Node slots in the intersection shader's traversal stack.
///
/// Traversal pops one node and pushes both children, so a tree whose
/// deepest path has `d` levels never holds more than `d` entries.
pub const TRAVERSAL_STACK_SIZE: usize = 64;

/// Build parameters shared by every instance in one scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BvhSettings {
    /// Leaves hold at most this many triangles when recursion is on.
    pub leaf_threshold: usize,
    /// When false every instance gets a single leaf covering all of it.
    pub enabled: bool,
}

impl Default for BvhSettings {
    fn default() -> Self {
        Self {
            leaf_threshold: DEFAULT_LEAF_THRESHOLD,
            enabled: true,
        }
    }
}

/// Tree node. Child indices are relative to whichever array holds the node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    pub bounds: Aabb,
    /// -1 on leaves.
    pub left_child: i32,
    /// -1 on leaves.
    pub right_child: i32,
    /// Absolute triangle index on leaves, -1 on internal nodes.
    pub triangle_start: i32,
    /// 0 on internal nodes.
    pub triangle_count: u32,
}

impl BvhNode {
    pub fn leaf(bounds: Aabb, start: usize, count: usize) -> Self {
        Self {
            bounds,
            left_child: -1,
            right_child: -1,
            triangle_start: start as i32,
            triangle_count: count as u32,
        }
    }

    pub fn internal(bounds: Aabb, left: usize, right: usize) -> Self {
        Self {
            bounds,
            left_child: left as i32,
            right_child: right as i32,
            triangle_start: -1,
            triangle_count: 0,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.left_child < 0 && self.right_child < 0
    }

    /// Copy with child links shifted by `base`.
    fn relocated(&self, base: u32) -> Self {
        let shift = |c: i32| if c >= 0 { c + base as i32 } else { c };
        Self {
            left_child: shift(self.left_child),
            right_child: shift(self.right_child),
            ..*self
        }
    }
}

/// Mutable view of one instance's triangles, addressed by absolute index.
///
/// The builder reorders triangles through this handle only, so nothing
/// outside `[base, base + len)` can move.
#[derive(Debug)]
pub struct TriangleRange<'a> {
    base: usize,
    triangles: &'a mut [Triangle],
}

impl<'a> TriangleRange<'a> {
    /// Wrap `triangles`, whose first element sits at absolute index `base`.
    pub fn new(base: usize, triangles: &'a mut [Triangle]) -> Self {
        Self { base, triangles }
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.base + self.triangles.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Triangles in `[start, end)` (absolute indices).
    ///
    /// Panics if the range leaves this instance; that is a caller bug.
    pub fn slice(&self, start: usize, end: usize) -> &[Triangle] {
        assert!(start >= self.base && end <= self.end() && start <= end);
        &self.triangles[start - self.base..end - self.base]
    }

    /// Mutable triangles in `[start, end)` (absolute indices).
    pub fn slice_mut(&mut self, start: usize, end: usize) -> &mut [Triangle] {
        assert!(start >= self.base && end <= self.end() && start <= end);
        let base = self.base;
        &mut self.triangles[start - base..end - base]
    }
}

/// Scene-wide node array that per-instance subtrees are copied into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BvhArena {
    nodes: Vec<BvhNode>,
}

impl BvhArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a subtree, returning its relocated root and node range.
    pub fn append_subtree(&mut self, local: &LocalBvh) -> (i32, Range<u32>) {
        let base = self.nodes.len() as u32;
        self.nodes.extend(local.nodes.iter().map(|n| n.relocated(base)));
        let end = self.nodes.len() as u32;
        ((local.root as u32 + base) as i32, base..end)
    }

    /// Rewrite a subtree in place. `range` must be exactly as long as `local`.
    ///
    /// Returns `None` (and leaves the arena untouched) when the sizes differ.
    pub fn overwrite_subtree(&mut self, range: Range<u32>, local: &LocalBvh) -> Option<i32> {
        if (range.end - range.start) as usize != local.nodes.len()
            || range.end as usize > self.nodes.len()
        {
            return None;
        }
        let base = range.start;
        for (dst, src) in self.nodes[range.start as usize..range.end as usize]
            .iter_mut()
            .zip(&local.nodes)
        {
            *dst = src.relocated(base);
        }
        Some((local.root as u32 + base) as i32)
    }
}

/// Levels on the deepest path of a median-split tree over `count`
/// triangles; a lone leaf is one level.
///
/// A split at `(start + end) / 2` leaves `ceil(n / 2)` triangles on the
/// right, which is the larger side.
pub fn subtree_depth(count: usize, settings: BvhSettings) -> usize {
    if !settings.enabled {
        return 1;
    }
    let threshold = settings.leaf_threshold.max(1);
    let mut n = count;
    let mut depth = 1;
    while n > threshold {
        n = n.div_ceil(2);
        depth += 1;
    }
    depth
}

/// Fail if a tree over `count` triangles would outgrow `stack_size`.
pub fn check_traversal_depth(count: usize, settings: BvhSettings, stack_size: usize) -> Result<()> {
    let depth = subtree_depth(count, settings);
    if depth > stack_size {
        return Err(Error::inconsistent(format!(
            "bvh over {count} triangles is {depth} levels deep, traversal stack holds {stack_size}"
        )));
    }
    Ok(())
}

/// Measured depth of the tree rooted at `root`.
///
/// `None` if a child link leaves `nodes` or does not precede its parent.
pub fn tree_depth(nodes: &[BvhNode], root: usize) -> Option<usize> {
    if root >= nodes.len() {
        return None;
    }
    let mut deepest = 0;
    let mut stack = vec![(root, 1usize)];
    while let Some((i, level)) = stack.pop() {
        deepest = deepest.max(level);
        let node = &nodes[i];
        if node.is_leaf() {
            continue;
        }
        for child in [node.left_child, node.right_child] {
            if child < 0 || child as usize >= i {
                return None;
            }
            stack.push((child as usize, level + 1));
        }
    }
    Some(deepest)
}
