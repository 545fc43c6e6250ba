//! Broad phase collision culling.
//!
//! Wraps a [`DynamicTree`] of fat AABBs and remembers which proxies moved
//! since the last pair update. [`BroadPhase::update_pairs`] then queries only
//! the moved proxies and reports each overlapping pair exactly once.

use std::collections::BTreeSet;

use nalgebra::Vector3;

use crate::dynamic_tree::{DynamicTree, ProxyId};
use crate::shape::Aabb;

/// Receiver of candidate pairs found by [`BroadPhase::update_pairs`].
pub trait PairCallback<T> {
    /// Called once per unique overlapping pair.
    fn add_pair(&mut self, a: T, b: T);
}

impl<T, F: FnMut(T, T)> PairCallback<T> for F {
    fn add_pair(&mut self, a: T, b: T) {
        self(a, b);
    }
}

/// Dynamic-tree broad phase with a moved-proxy buffer.
#[derive(Debug, Clone)]
pub struct BroadPhase<T> {
    tree: DynamicTree<Aabb, T>,
    move_buffer: Vec<ProxyId>,
}

impl<T: Copy> BroadPhase<T> {
    /// Create an empty broad phase whose fat AABBs use `margin`.
    #[must_use]
    pub fn new(margin: f64) -> Self {
        Self {
            tree: DynamicTree::new(margin),
            move_buffer: Vec::new(),
        }
    }

    /// Add a proxy; it takes part in the next pair update.
    pub fn create_proxy(&mut self, aabb: Aabb, user_data: T) -> ProxyId {
        let proxy = self.tree.create_proxy(aabb, user_data);
        self.buffer_move(proxy);
        proxy
    }

    /// Remove a proxy.
    pub fn destroy_proxy(&mut self, proxy: ProxyId) -> Option<T> {
        self.move_buffer.retain(|&p| p != proxy);
        self.tree.destroy_proxy(proxy)
    }

    /// Report a proxy's new tight AABB.
    ///
    /// The proxy is buffered for the next pair update only when it left its
    /// fat AABB.
    pub fn move_proxy(&mut self, proxy: ProxyId, aabb: Aabb, displacement: &Vector3<f64>) {
        if self.tree.move_proxy(proxy, aabb, displacement) {
            self.buffer_move(proxy);
        }
    }

    /// Force a proxy into the next pair update.
    pub fn buffer_move(&mut self, proxy: ProxyId) {
        self.move_buffer.push(proxy);
    }

    /// Whether the fat AABBs of two proxies overlap.
    #[must_use]
    pub fn test_overlap(&self, a: ProxyId, b: ProxyId) -> bool {
        match (self.tree.fat_volume(a), self.tree.fat_volume(b)) {
            (Some(a), Some(b)) => a.overlaps(b),
            _ => false,
        }
    }

    /// Fat AABB of a proxy.
    #[must_use]
    pub fn fat_aabb(&self, proxy: ProxyId) -> Option<&Aabb> {
        self.tree.fat_volume(proxy)
    }

    /// User data of a proxy.
    #[must_use]
    pub fn user_data(&self, proxy: ProxyId) -> Option<&T> {
        self.tree.user_data(proxy)
    }

    /// Visit every proxy whose fat AABB overlaps `aabb`.
    pub fn query(&self, aabb: &Aabb, callback: impl FnMut(ProxyId) -> bool) {
        self.tree.query(aabb, callback);
    }

    /// Report every overlapping pair involving a moved proxy, then clear the
    /// moved buffer.
    ///
    /// Pairs are keyed by (smaller id, larger id), so each one reaches the
    /// callback once no matter how many moved proxies discovered it.
    pub fn update_pairs(&mut self, callback: &mut impl PairCallback<T>) {
        let mut pairs = BTreeSet::new();

        for &query_proxy in &self.move_buffer {
            let Some(fat) = self.tree.fat_volume(query_proxy).copied() else {
                continue;
            };
            self.tree.query(&fat, |proxy| {
                if proxy != query_proxy {
                    pairs.insert((proxy.min(query_proxy), proxy.max(query_proxy)));
                }
                true
            });
        }
        self.move_buffer.clear();

        for (a, b) in pairs {
            if let (Some(&data_a), Some(&data_b)) = (self.tree.user_data(a), self.tree.user_data(b))
            {
                callback.add_pair(data_a, data_b);
            }
        }
    }

    /// Number of proxies waiting for the next pair update.
    #[must_use]
    pub fn move_count(&self) -> usize {
        self.move_buffer.len()
    }

    /// Number of proxies.
    #[must_use]
    pub fn proxy_count(&self) -> usize {
        self.tree.proxy_count()
    }

    /// Height of the underlying tree.
    #[must_use]
    pub fn tree_height(&self) -> i32 {
        self.tree.height()
    }

    /// Underlying tree.
    #[must_use]
    pub fn tree(&self) -> &DynamicTree<Aabb, T> {
        &self.tree
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn cube(x: f64, y: f64, z: f64, half: f64) -> Aabb {
        Aabb::from_center(Point3::new(x, y, z), Vector3::repeat(half))
    }

    fn collect(bp: &mut BroadPhase<usize>) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        bp.update_pairs(&mut |a: usize, b: usize| pairs.push((a.min(b), a.max(b))));
        pairs
    }

    #[test]
    fn test_pairs_reported_once() {
        let mut bp = BroadPhase::new(0.1);
        bp.create_proxy(cube(0.0, 0.0, 0.0, 1.0), 0);
        bp.create_proxy(cube(1.0, 0.0, 0.0, 1.0), 1);
        bp.create_proxy(cube(10.0, 0.0, 0.0, 1.0), 2);

        assert_eq!(bp.move_count(), 3);
        let pairs = collect(&mut bp);
        assert_eq!(pairs, vec![(0, 1)]);
        assert_eq!(bp.move_count(), 0);

        // Nothing moved, nothing reported.
        assert!(collect(&mut bp).is_empty());
    }

    #[test]
    fn test_small_move_is_not_buffered() {
        let mut bp = BroadPhase::new(0.5);
        let id = bp.create_proxy(cube(0.0, 0.0, 0.0, 1.0), 0);
        collect(&mut bp);

        bp.move_proxy(id, cube(0.1, 0.0, 0.0, 1.0), &Vector3::new(0.1, 0.0, 0.0));
        assert_eq!(bp.move_count(), 0);

        bp.move_proxy(id, cube(3.0, 0.0, 0.0, 1.0), &Vector3::new(2.9, 0.0, 0.0));
        assert_eq!(bp.move_count(), 1);
    }

    #[test]
    fn test_overlap_and_destroy() {
        let mut bp = BroadPhase::new(0.1);
        let a = bp.create_proxy(cube(0.0, 0.0, 0.0, 1.0), 0);
        let b = bp.create_proxy(cube(2.1, 0.0, 0.0, 1.0), 1);
        assert!(bp.test_overlap(a, b));

        assert_eq!(bp.destroy_proxy(b), Some(1));
        assert!(!bp.test_overlap(a, b));
        assert_eq!(bp.proxy_count(), 1);
        assert_eq!(bp.move_count(), 1);
    }

    #[test]
    fn test_soundness_against_brute_force() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut bp = BroadPhase::new(0.1);
        let mut boxes = Vec::new();
        let mut ids = Vec::new();

        for i in 0..150 {
            let aabb = cube(
                rng.gen_range(-15.0..15.0),
                rng.gen_range(-15.0..15.0),
                rng.gen_range(-15.0..15.0),
                rng.gen_range(0.2..2.0),
            );
            boxes.push(aabb);
            ids.push(bp.create_proxy(aabb, i));
        }
        let first: HashSet<_> = collect(&mut bp).into_iter().collect();
        assert_eq!(bp.tree_height(), bp.tree().height());
        // 150 leaves need at least 8 levels; balancing keeps it close.
        assert!((8..=20).contains(&bp.tree_height()), "height {}", bp.tree_height());

        for i in 0..boxes.len() {
            for j in (i + 1)..boxes.len() {
                if boxes[i].overlaps(&boxes[j]) {
                    assert!(first.contains(&(i, j)), "missed pair ({i}, {j})");
                }
            }
        }

        // Move a third of the proxies and check pairs involving them.
        let mut moved = HashSet::new();
        for i in (0..boxes.len()).step_by(3) {
            let offset = Vector3::new(
                rng.gen_range(-3.0..3.0),
                rng.gen_range(-3.0..3.0),
                rng.gen_range(-3.0..3.0),
            );
            let aabb = Aabb::new(boxes[i].min + offset, boxes[i].max + offset);
            boxes[i] = aabb;
            bp.move_proxy(ids[i], aabb, &offset);
            bp.buffer_move(ids[i]);
            moved.insert(i);
        }
        let second: HashSet<_> = collect(&mut bp).into_iter().collect();

        for &i in &moved {
            for j in 0..boxes.len() {
                if i != j && boxes[i].overlaps(&boxes[j]) {
                    assert!(second.contains(&(i.min(j), i.max(j))));
                }
            }
        }
        assert!(bp.tree().validate().is_ok());
    }
}
