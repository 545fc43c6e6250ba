//! Dynamic bounding volume tree.
//!
//! A self-balancing binary tree over fattened bounding volumes, used by the
//! broad phase to find candidate pairs in O(log n) per query.
//!
//! # Features
//!
//! - **Incremental updates**: proxies are inserted, moved and removed without rebuilds
//! - **Fat volumes**: leaves store volumes grown by a margin, so small motions
//!   leave the tree untouched
//! - **AVL rotations**: every ancestor of a modified leaf is rebalanced on the
//!   way up, keeping sibling heights within one of each other
//! - **Generic volume**: [`Aabb`] (surface-area cost) and [`BoundingSphere`]
//!   (volume cost) both work
//!
//! # Example
//!
//! ```
//! use physics_core::dynamic_tree::DynamicTree;
//! use physics_core::shape::Aabb;
//! use nalgebra::{Point3, Vector3};
//!
//! let mut tree = DynamicTree::new(0.1);
//! let a = tree.create_proxy(Aabb::from_center(Point3::origin(), Vector3::repeat(0.5)), "a");
//! let _b = tree.create_proxy(Aabb::from_center(Point3::new(5.0, 0.0, 0.0), Vector3::repeat(0.5)), "b");
//!
//! let mut hits = Vec::new();
//! tree.query(&Aabb::from_center(Point3::origin(), Vector3::repeat(1.0)), |id| {
//!     hits.push(id);
//!     true
//! });
//! assert_eq!(hits, vec![a]);
//! ```

use std::f64::consts::PI;
use std::fmt;

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::shape::Aabb;

const NULL_NODE: u32 = u32::MAX;

/// How far ahead of a moving proxy its fat volume is stretched, in displacements.
pub const DISPLACEMENT_MULTIPLIER: f64 = 2.0;

/// Handle to a leaf of a [`DynamicTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProxyId(u32);

impl ProxyId {
    /// Raw node index.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proxy({})", self.0)
    }
}

// ============================================================================
// Bounding volumes
// ============================================================================

/// A volume the tree can store at its nodes.
pub trait BoundingVolume: Copy {
    /// Smallest volume enclosing both.
    #[must_use]
    fn merged(&self, other: &Self) -> Self;
    /// Whether `other` lies entirely inside.
    fn contains(&self, other: &Self) -> bool;
    /// Whether the two volumes overlap.
    fn intersects(&self, other: &Self) -> bool;
    /// Insertion cost metric (surface area or volume).
    fn cost(&self) -> f64;
    /// Volume grown by `margin` in every direction.
    #[must_use]
    fn loosened(&self, margin: f64) -> Self;
    /// Volume stretched to cover a future `displacement`.
    #[must_use]
    fn predicted(&self, displacement: &Vector3<f64>) -> Self;
}

impl BoundingVolume for Aabb {
    fn merged(&self, other: &Self) -> Self {
        self.union(other)
    }

    fn contains(&self, other: &Self) -> bool {
        Self::contains(self, other)
    }

    fn intersects(&self, other: &Self) -> bool {
        self.overlaps(other)
    }

    fn cost(&self) -> f64 {
        self.surface_area()
    }

    fn loosened(&self, margin: f64) -> Self {
        self.expanded(margin)
    }

    fn predicted(&self, displacement: &Vector3<f64>) -> Self {
        self.swept(&(displacement * DISPLACEMENT_MULTIPLIER))
    }
}

/// Bounding sphere, for trees that cull by volume rather than surface area.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingSphere {
    /// Center.
    pub center: Point3<f64>,
    /// Radius.
    pub radius: f64,
}

impl BoundingSphere {
    /// Create a bounding sphere.
    #[must_use]
    pub const fn new(center: Point3<f64>, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Sphere enclosing an AABB.
    #[must_use]
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self {
            center: aabb.center(),
            radius: aabb.half_extents().norm(),
        }
    }
}

impl BoundingVolume for BoundingSphere {
    fn merged(&self, other: &Self) -> Self {
        let offset = other.center - self.center;
        let distance = offset.norm();
        if distance + other.radius <= self.radius {
            return *self;
        }
        if distance + self.radius <= other.radius {
            return *other;
        }
        let radius = 0.5 * (distance + self.radius + other.radius);
        let center = self.center + offset * ((radius - self.radius) / distance);
        Self { center, radius }
    }

    fn contains(&self, other: &Self) -> bool {
        (other.center - self.center).norm() + other.radius <= self.radius
    }

    fn intersects(&self, other: &Self) -> bool {
        (other.center - self.center).norm() <= self.radius + other.radius
    }

    fn cost(&self) -> f64 {
        4.0 / 3.0 * PI * self.radius.powi(3)
    }

    fn loosened(&self, margin: f64) -> Self {
        Self {
            center: self.center,
            radius: self.radius + margin,
        }
    }

    fn predicted(&self, displacement: &Vector3<f64>) -> Self {
        let shift = displacement * (0.5 * DISPLACEMENT_MULTIPLIER);
        Self {
            center: self.center + shift,
            radius: self.radius + shift.norm(),
        }
    }
}

// ============================================================================
// Tree
// ============================================================================

#[derive(Debug, Clone)]
struct TreeNode<V, T> {
    volume: V,
    parent: u32,
    child1: u32,
    child2: u32,
    /// Leaf = 0, free = -1.
    height: i32,
    user_data: Option<T>,
}

impl<V, T> TreeNode<V, T> {
    fn is_leaf(&self) -> bool {
        self.child1 == NULL_NODE
    }
}

/// Dynamic bounding volume tree with user data on its leaves.
#[derive(Debug, Clone)]
pub struct DynamicTree<V, T> {
    nodes: Vec<TreeNode<V, T>>,
    free_list: Vec<u32>,
    root: u32,
    margin: f64,
}

impl<V: BoundingVolume, T> DynamicTree<V, T> {
    /// Create an empty tree that fattens leaves by `margin`.
    #[must_use]
    pub fn new(margin: f64) -> Self {
        Self {
            nodes: Vec::with_capacity(16),
            free_list: Vec::new(),
            root: NULL_NODE,
            margin,
        }
    }

    /// Insert a leaf for `volume`, stored fattened by the tree margin.
    pub fn create_proxy(&mut self, volume: V, user_data: T) -> ProxyId {
        let leaf = self.allocate_node(volume.loosened(self.margin));
        self.nodes[leaf as usize].user_data = Some(user_data);
        self.nodes[leaf as usize].height = 0;
        self.insert_leaf(leaf);
        ProxyId(leaf)
    }

    /// Remove a leaf. Unknown ids are ignored.
    pub fn destroy_proxy(&mut self, proxy: ProxyId) -> Option<T> {
        if !self.is_live_leaf(proxy) {
            return None;
        }
        self.remove_leaf(proxy.0);
        let data = self.nodes[proxy.0 as usize].user_data.take();
        self.free_node(proxy.0);
        data
    }

    /// Update a leaf for a new tight `volume` after moving by `displacement`.
    ///
    /// Returns `false` (tree untouched) while the tight volume still fits in
    /// the stored fat volume; otherwise reinserts the leaf and returns `true`.
    pub fn move_proxy(&mut self, proxy: ProxyId, volume: V, displacement: &Vector3<f64>) -> bool {
        if !self.is_live_leaf(proxy) {
            return false;
        }
        if self.nodes[proxy.0 as usize].volume.contains(&volume) {
            return false;
        }

        self.remove_leaf(proxy.0);
        self.nodes[proxy.0 as usize].volume = volume.loosened(self.margin).predicted(displacement);
        self.insert_leaf(proxy.0);
        true
    }

    /// Fat volume stored for a leaf.
    #[must_use]
    pub fn fat_volume(&self, proxy: ProxyId) -> Option<&V> {
        self.is_live_leaf(proxy)
            .then(|| &self.nodes[proxy.0 as usize].volume)
    }

    /// User data of a leaf.
    #[must_use]
    pub fn user_data(&self, proxy: ProxyId) -> Option<&T> {
        self.nodes
            .get(proxy.0 as usize)
            .and_then(|n| n.user_data.as_ref())
    }

    /// Visit every leaf whose fat volume intersects `volume`.
    ///
    /// The callback returns `false` to stop the query early.
    pub fn query(&self, volume: &V, mut callback: impl FnMut(ProxyId) -> bool) {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack = Vec::with_capacity(64);
        stack.push(self.root);

        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            if !node.volume.intersects(volume) {
                continue;
            }
            if node.is_leaf() {
                if !callback(ProxyId(id)) {
                    return;
                }
            } else {
                stack.push(node.child1);
                stack.push(node.child2);
            }
        }
    }

    /// Height of the tree; an empty tree or single leaf is 0.
    #[must_use]
    pub fn height(&self) -> i32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    /// Number of nodes in use, internal nodes included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_list.len()
    }

    /// Number of leaves.
    #[must_use]
    pub fn proxy_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.height == 0 && n.user_data.is_some())
            .count()
    }

    /// Largest height difference between siblings anywhere in the tree.
    #[must_use]
    pub fn max_balance(&self) -> i32 {
        self.nodes
            .iter()
            .filter(|n| n.height > 0)
            .map(|n| {
                (self.nodes[n.child2 as usize].height - self.nodes[n.child1 as usize].height).abs()
            })
            .max()
            .unwrap_or(0)
    }

    /// Check parent links, heights, enclosing volumes and balance.
    ///
    /// Returns a description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.root == NULL_NODE {
            return Ok(());
        }
        if self.nodes[self.root as usize].parent != NULL_NODE {
            return Err("root has a parent".to_owned());
        }

        let mut stack = vec![self.root];
        let mut reached = 0;
        while let Some(id) = stack.pop() {
            reached += 1;
            let node = &self.nodes[id as usize];
            if node.is_leaf() {
                if node.height != 0 || node.child2 != NULL_NODE {
                    return Err(format!("leaf {id} is malformed"));
                }
                continue;
            }

            let (c1, c2) = (&self.nodes[node.child1 as usize], &self.nodes[node.child2 as usize]);
            if c1.parent != id || c2.parent != id {
                return Err(format!("children of {id} have wrong parent links"));
            }
            if node.height != 1 + c1.height.max(c2.height) {
                return Err(format!("node {id} has a stale height"));
            }
            if (c1.height - c2.height).abs() > 1 {
                return Err(format!("node {id} is unbalanced"));
            }
            if !node.volume.contains(&c1.volume) || !node.volume.contains(&c2.volume) {
                return Err(format!("node {id} does not enclose its children"));
            }
            stack.push(node.child1);
            stack.push(node.child2);
        }

        if reached != self.node_count() {
            return Err(format!(
                "{reached} nodes reachable, {} allocated",
                self.node_count()
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn is_live_leaf(&self, proxy: ProxyId) -> bool {
        self.nodes
            .get(proxy.0 as usize)
            .is_some_and(|n| n.height == 0 && n.user_data.is_some())
    }

    fn allocate_node(&mut self, volume: V) -> u32 {
        let node = TreeNode {
            volume,
            parent: NULL_NODE,
            child1: NULL_NODE,
            child2: NULL_NODE,
            height: 0,
            user_data: None,
        };
        if let Some(id) = self.free_list.pop() {
            self.nodes[id as usize] = node;
            id
        } else {
            self.nodes.push(node);
            u32::try_from(self.nodes.len() - 1).unwrap_or(NULL_NODE - 1)
        }
    }

    fn free_node(&mut self, id: u32) {
        let node = &mut self.nodes[id as usize];
        node.height = -1;
        node.parent = NULL_NODE;
        node.child1 = NULL_NODE;
        node.child2 = NULL_NODE;
        node.user_data = None;
        self.free_list.push(id);
    }

    /// Cost of pairing `leaf` with the subtree at `child`.
    fn descend_cost(&self, child: u32, leaf: &V) -> f64 {
        let node = &self.nodes[child as usize];
        let merged = leaf.merged(&node.volume).cost();
        if node.is_leaf() {
            merged
        } else {
            merged - node.volume.cost()
        }
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Always pair with a leaf: splitting an internal node would unbalance
        // the new parent by the height of that subtree.
        let leaf_volume = self.nodes[leaf as usize].volume;
        let mut sibling = self.root;
        while !self.nodes[sibling as usize].is_leaf() {
            let node = &self.nodes[sibling as usize];
            let (child1, child2) = (node.child1, node.child2);
            let cost1 = self.descend_cost(child1, &leaf_volume);
            let cost2 = self.descend_cost(child2, &leaf_volume);
            sibling = if cost1 <= cost2 { child1 } else { child2 };
        }

        let old_parent = self.nodes[sibling as usize].parent;
        let merged = leaf_volume.merged(&self.nodes[sibling as usize].volume);
        let new_parent = self.allocate_node(merged);
        {
            let node = &mut self.nodes[new_parent as usize];
            node.parent = old_parent;
            node.child1 = sibling;
            node.child2 = leaf;
            node.height = 1;
        }
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        if old_parent == NULL_NODE {
            self.root = new_parent;
        } else {
            self.replace_child(old_parent, sibling, new_parent);
        }

        self.refit_upwards(old_parent);
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grandparent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].child1 == leaf {
            self.nodes[parent as usize].child2
        } else {
            self.nodes[parent as usize].child1
        };

        self.nodes[leaf as usize].parent = NULL_NODE;
        if grandparent == NULL_NODE {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
            self.free_node(parent);
        } else {
            self.replace_child(grandparent, parent, sibling);
            self.nodes[sibling as usize].parent = grandparent;
            self.free_node(parent);
            self.refit_upwards(grandparent);
        }
    }

    fn replace_child(&mut self, parent: u32, old: u32, new: u32) {
        let node = &mut self.nodes[parent as usize];
        if node.child1 == old {
            node.child1 = new;
        } else {
            node.child2 = new;
        }
    }

    /// Walk from `start` to the root, rebalancing and refitting each node.
    fn refit_upwards(&mut self, start: u32) {
        let mut id = start;
        while id != NULL_NODE {
            id = self.balance(id);
            self.refit(id);
            id = self.nodes[id as usize].parent;
        }
    }

    fn refit(&mut self, id: u32) {
        let (c1, c2) = {
            let node = &self.nodes[id as usize];
            (node.child1, node.child2)
        };
        let h = 1 + self.nodes[c1 as usize]
            .height
            .max(self.nodes[c2 as usize].height);
        let volume = self.nodes[c1 as usize]
            .volume
            .merged(&self.nodes[c2 as usize].volume);
        let node = &mut self.nodes[id as usize];
        node.height = h;
        node.volume = volume;
    }

    /// Rotate `a` if its children differ in height by more than one.
    ///
    /// The taller child is promoted; of its two children it keeps the taller
    /// one and hands the shorter one down to `a`. Returns the subtree root.
    fn balance(&mut self, a: u32) -> u32 {
        let node = &self.nodes[a as usize];
        if node.is_leaf() || node.height < 2 {
            return a;
        }

        let (b, c) = (node.child1, node.child2);
        let diff = self.nodes[c as usize].height - self.nodes[b as usize].height;

        if diff > 1 {
            self.rotate_up(a, c)
        } else if diff < -1 {
            self.rotate_up(a, b)
        } else {
            a
        }
    }

    /// Promote `child` (the taller child of `a`) to take `a`'s place.
    fn rotate_up(&mut self, a: u32, child: u32) -> u32 {
        let (f, g) = {
            let node = &self.nodes[child as usize];
            (node.child1, node.child2)
        };
        let (tall, short) = if self.nodes[f as usize].height > self.nodes[g as usize].height {
            (f, g)
        } else {
            (g, f)
        };

        // `child` replaces `a` under a's parent.
        let parent = self.nodes[a as usize].parent;
        self.nodes[child as usize].parent = parent;
        if parent == NULL_NODE {
            self.root = child;
        } else {
            self.replace_child(parent, a, child);
        }

        // `child` adopts `a` and its own taller child.
        {
            let node = &mut self.nodes[child as usize];
            node.child1 = a;
            node.child2 = tall;
        }
        self.nodes[a as usize].parent = child;
        self.nodes[tall as usize].parent = child;

        // `a` takes the shorter child in the slot `child` vacated.
        self.replace_child(a, child, short);
        self.nodes[short as usize].parent = a;

        self.refit(a);
        self.refit(child);
        child
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cube(x: f64, y: f64, z: f64, half: f64) -> Aabb {
        Aabb::from_center(Point3::new(x, y, z), Vector3::repeat(half))
    }

    #[test]
    fn test_insert_and_query() {
        let mut tree = DynamicTree::new(0.0);
        let ids: Vec<_> = (0..10)
            .map(|i| tree.create_proxy(cube(f64::from(i) * 3.0, 0.0, 0.0, 1.0), i))
            .collect();

        let mut hits = Vec::new();
        tree.query(&cube(6.0, 0.0, 0.0, 0.5), |id| {
            hits.push(*tree.user_data(id).unwrap());
            true
        });
        assert_eq!(hits, vec![2]);
        assert_eq!(tree.proxy_count(), 10);
        assert_eq!(tree.node_count(), 19);
        assert!(tree.validate().is_ok());
        assert!(tree.height() <= 5);
        assert_eq!(tree.user_data(ids[9]), Some(&9));
    }

    #[test]
    fn test_query_early_exit() {
        let mut tree = DynamicTree::new(0.0);
        for i in 0..5 {
            tree.create_proxy(cube(0.0, 0.0, 0.0, 1.0), i);
        }
        let mut count = 0;
        tree.query(&cube(0.0, 0.0, 0.0, 1.0), |_| {
            count += 1;
            count < 2
        });
        assert_eq!(count, 2);
    }

    #[test]
    fn test_move_within_fat_volume_is_free() {
        let mut tree = DynamicTree::new(0.5);
        let id = tree.create_proxy(cube(0.0, 0.0, 0.0, 1.0), ());
        assert!(!tree.move_proxy(id, cube(0.2, 0.0, 0.0, 1.0), &Vector3::new(0.2, 0.0, 0.0)));
        assert!(tree.move_proxy(id, cube(2.0, 0.0, 0.0, 1.0), &Vector3::new(1.8, 0.0, 0.0)));

        let fat = tree.fat_volume(id).unwrap();
        assert!(fat.contains(&cube(2.0, 0.0, 0.0, 1.0)));
        // Predicted along +x only.
        assert!(fat.max.x > 3.5 + 3.0);
        assert!((fat.min.x - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_destroy_proxy() {
        let mut tree = DynamicTree::new(0.1);
        let a = tree.create_proxy(cube(0.0, 0.0, 0.0, 1.0), 'a');
        let b = tree.create_proxy(cube(4.0, 0.0, 0.0, 1.0), 'b');
        assert_eq!(tree.destroy_proxy(a), Some('a'));
        assert_eq!(tree.destroy_proxy(a), None);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.user_data(b), Some(&'b'));
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_randomized_balance() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = DynamicTree::new(0.1);
        let mut live = Vec::new();

        for step in 0..2000 {
            let remove = !live.is_empty() && rng.gen_bool(0.4);
            if remove {
                let idx = rng.gen_range(0..live.len());
                let id = live.swap_remove(idx);
                tree.destroy_proxy(id);
            } else {
                let aabb = cube(
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(0.1..3.0),
                );
                live.push(tree.create_proxy(aabb, step));
            }

            if step % 50 == 0 && !live.is_empty() {
                let idx = rng.gen_range(0..live.len());
                let target = cube(
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                    1.0,
                );
                tree.move_proxy(live[idx], target, &Vector3::zeros());
            }

            assert!(tree.max_balance() <= 1, "unbalanced after step {step}");
        }

        assert!(tree.validate().is_ok(), "{:?}", tree.validate());
        assert_eq!(tree.proxy_count(), live.len());
    }

    #[test]
    fn test_sphere_tree() {
        let mut tree = DynamicTree::new(0.0);
        let mut rng = StdRng::seed_from_u64(11);
        for i in 0..200 {
            let center = Point3::new(
                rng.gen_range(-20.0..20.0),
                rng.gen_range(-20.0..20.0),
                rng.gen_range(-20.0..20.0),
            );
            tree.create_proxy(BoundingSphere::new(center, rng.gen_range(0.1..1.0)), i);
        }
        assert!(tree.validate().is_ok(), "{:?}", tree.validate());
        assert!(tree.max_balance() <= 1);

        let everything = BoundingSphere::new(Point3::origin(), 100.0);
        let mut count = 0;
        tree.query(&everything, |_| {
            count += 1;
            true
        });
        assert_eq!(count, 200);
    }

    #[test]
    fn test_bounding_sphere_merge() {
        let a = BoundingSphere::new(Point3::origin(), 1.0);
        let b = BoundingSphere::new(Point3::new(4.0, 0.0, 0.0), 1.0);
        let m = a.merged(&b);
        assert!((m.radius - 3.0).abs() < 1e-12);
        assert!((m.center.x - 2.0).abs() < 1e-12);
        assert!(m.contains(&a) && m.contains(&b));

        let inner = BoundingSphere::new(Point3::new(0.5, 0.0, 0.0), 0.2);
        assert_eq!(a.merged(&inner), a);
    }
}
