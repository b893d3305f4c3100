//! Bounding Volume Hierarchy over drawables
//!
//! Nodes live in a flat arena. Leaves store an `object_index` into the
//! drawable table owned by the render manager; the tree owns no payload.
//!
//! Traversal is iterative and uses a stack supplied by the caller, so a
//! query issued once per light per frame does not allocate:
//!
//! ```ignore
//! let mut stack = Vec::new();
//! for leaf in tree.enumerate(frustum_filter, &mut stack, &light_frustum) {
//!     draw(leaf.object_index);
//! }
//! ```

use glam::Vec3;
use penumbra_math::{Aabb, Frustum};

/// A node of the hierarchy
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BvhNode {
    pub bounds: Aabb,
    /// Index into the external drawable table (leaves only)
    pub object_index: Option<u32>,
    pub parent: Option<u32>,
    pub child1: Option<u32>,
    pub child2: Option<u32>,
    pub is_leaf: bool,
}

/// Decision returned by an enumeration filter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BvhFilterResult {
    /// Accept the node: leaves are yielded, internal nodes are descended
    Keep,
    /// Reject the node together with its subtree
    Skip,
}

/// Bounding volume hierarchy
#[derive(Clone, Debug, Default)]
pub struct BvhTree {
    nodes: Vec<BvhNode>,
    root: Option<u32>,
    /// object index -> leaf node index
    leaf_of: Vec<Option<u32>>,
    version: u32,
}

impl BvhTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from `(object_index, bounds)` pairs
    ///
    /// Top-down, splitting at the median of the largest axis.
    pub fn build(&mut self, items: &[(u32, Aabb)]) {
        self.nodes.clear();
        self.leaf_of.clear();
        self.version = self.version.wrapping_add(1);

        if items.is_empty() {
            self.root = None;
            return;
        }

        let max_object = items.iter().map(|(i, _)| *i).max().unwrap_or(0) as usize;
        self.leaf_of.resize(max_object + 1, None);
        self.nodes.reserve(items.len() * 2);

        let mut work: Vec<(u32, Aabb, Vec3)> = items
            .iter()
            .map(|(index, bounds)| (*index, *bounds, bounds.center()))
            .collect();

        self.root = Some(self.build_recursive(&mut work, None));
    }

    fn build_recursive(&mut self, items: &mut [(u32, Aabb, Vec3)], parent: Option<u32>) -> u32 {
        let node_index = self.nodes.len() as u32;

        if let [(object, bounds, _)] = items {
            self.nodes.push(BvhNode {
                bounds: *bounds,
                object_index: Some(*object),
                parent,
                child1: None,
                child2: None,
                is_leaf: true,
            });
            self.leaf_of[*object as usize] = Some(node_index);
            return node_index;
        }

        let bounds = items
            .iter()
            .fold(Aabb::EMPTY, |acc, (_, b, _)| acc.union(b));

        // Split on centroid extent, not box extent, so overlapping boxes still separate
        let centroid_bounds = items
            .iter()
            .fold(Aabb::EMPTY, |acc, (_, _, c)| acc.expand_to_include(*c));
        let axis = centroid_bounds.largest_axis();
        items.sort_by(|a, b| a.2[axis].total_cmp(&b.2[axis]));

        self.nodes.push(BvhNode {
            bounds,
            object_index: None,
            parent,
            child1: None,
            child2: None,
            is_leaf: false,
        });

        let mid = items.len() / 2;
        let (left, right) = items.split_at_mut(mid);
        let child1 = self.build_recursive(left, Some(node_index));
        let child2 = self.build_recursive(right, Some(node_index));

        let node = &mut self.nodes[node_index as usize];
        node.child1 = Some(child1);
        node.child2 = Some(child2);

        node_index
    }

    /// Update a leaf's bounds and re-union its ancestors
    ///
    /// Returns false if the object is not in the tree.
    pub fn refit(&mut self, object_index: u32, bounds: Aabb) -> bool {
        let Some(leaf) = self.leaf_of.get(object_index as usize).copied().flatten() else {
            return false;
        };

        self.nodes[leaf as usize].bounds = bounds;
        let mut current = self.nodes[leaf as usize].parent;
        while let Some(index) = current {
            let node = self.nodes[index as usize];
            let mut union = Aabb::EMPTY;
            for child in [node.child1, node.child2].into_iter().flatten() {
                union = union.union(&self.nodes[child as usize].bounds);
            }
            self.nodes[index as usize].bounds = union;
            current = node.parent;
        }

        self.version = self.version.wrapping_add(1);
        true
    }

    /// Lazily enumerate leaves accepted by `filter`
    ///
    /// `stack` is cleared and reused; its capacity survives between calls.
    /// Sibling order is unspecified.
    pub fn enumerate<'a, C, F>(
        &'a self,
        filter: F,
        stack: &'a mut Vec<u32>,
        context: &'a C,
    ) -> BvhEnumerator<'a, C, F>
    where
        C: ?Sized,
        F: FnMut(&BvhNode, &C) -> BvhFilterResult,
    {
        stack.clear();
        if let Some(root) = self.root {
            stack.push(root);
        }
        BvhEnumerator {
            tree: self,
            filter,
            stack,
            context,
        }
    }

    pub fn node(&self, index: u32) -> Option<&BvhNode> {
        self.nodes.get(index as usize)
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    pub fn root(&self) -> Option<u32> {
        self.root
    }

    pub fn root_bounds(&self) -> Option<Aabb> {
        self.root.map(|r| self.nodes[r as usize].bounds)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf).count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Incremented on every build and refit
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// Iterator returned by [`BvhTree::enumerate`]
pub struct BvhEnumerator<'a, C: ?Sized, F> {
    tree: &'a BvhTree,
    filter: F,
    stack: &'a mut Vec<u32>,
    context: &'a C,
}

impl<'a, C, F> Iterator for BvhEnumerator<'a, C, F>
where
    C: ?Sized,
    F: FnMut(&BvhNode, &C) -> BvhFilterResult,
{
    type Item = &'a BvhNode;

    fn next(&mut self) -> Option<Self::Item> {
        let tree: &'a BvhTree = self.tree;
        while let Some(index) = self.stack.pop() {
            let node = &tree.nodes[index as usize];
            if (self.filter)(node, self.context) == BvhFilterResult::Skip {
                continue;
            }
            if node.is_leaf {
                return Some(node);
            }
            if let Some(child) = node.child2 {
                self.stack.push(child);
            }
            if let Some(child) = node.child1 {
                self.stack.push(child);
            }
        }
        None
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Keeps nodes intersecting a frustum (spot lights, camera culling)
pub fn frustum_filter(node: &BvhNode, frustum: &Frustum) -> BvhFilterResult {
    if frustum.intersects_aabb(&node.bounds) {
        BvhFilterResult::Keep
    } else {
        BvhFilterResult::Skip
    }
}

/// Keeps nodes intersecting a box (point light influence volume)
pub fn aabb_filter(node: &BvhNode, volume: &Aabb) -> BvhFilterResult {
    if volume.intersects(&node.bounds) {
        BvhFilterResult::Keep
    } else {
        BvhFilterResult::Skip
    }
}

/// Keeps nodes intersecting any cascade frustum
pub fn cascade_filter(node: &BvhNode, cascades: &[Frustum]) -> BvhFilterResult {
    if cascades.iter().any(|f| f.intersects_aabb(&node.bounds)) {
        BvhFilterResult::Keep
    } else {
        BvhFilterResult::Skip
    }
}
