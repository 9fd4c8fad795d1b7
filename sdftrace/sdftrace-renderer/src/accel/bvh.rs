//! Flattened binary BVH shared by bottom-level (triangles) and top-level (instances) structures.
//! One primitive per leaf, children allocated as adjacent pairs, so a structure over `n`
//! primitives always holds exactly `2n - 1` nodes and refit never changes topology.

use bytemuck::{Pod, Zeroable};

use crate::math::{intersect_aabb, safe_inverse, Aabb, Vec3};

pub const NODE_BYTES: u64 = std::mem::size_of::<BvhNode>() as u64;

/// Traversal stack depth; the builder keeps trees shallower than this.
pub const STACK_DEPTH: usize = 64;

const SAH_BINS: usize = 12;
const SAH_DEPTH_LIMIT: u32 = 32;

/// Interior: `count == 0`, children at `left_or_first` and `left_or_first + 1`.
/// Leaf: `count == 1`, primitive id in `left_or_first`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub min: [f32; 3],
    pub left_or_first: u32,
    pub max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(Vec3::from(self.min), Vec3::from(self.max))
    }

    fn set_bounds(&mut self, b: &Aabb) {
        self.min = b.min.into();
        self.max = b.max.into();
    }
}

pub fn node_count(primitive_count: usize) -> usize {
    (2 * primitive_count).saturating_sub(1).max(1)
}

struct Builder<'a> {
    bounds: &'a [Aabb],
    centroids: Vec<Vec3>,
    nodes: Vec<BvhNode>,
}

impl Builder<'_> {
    fn range_bounds(&self, prims: &[u32]) -> Aabb {
        prims.iter().fold(Aabb::empty(), |acc, &p| acc.union(&self.bounds[p as usize]))
    }

    /// Binned SAH split. Returns the number of primitives that go left.
    fn split(&self, prims: &mut [u32], depth: u32) -> usize {
        let cb = Aabb::from_points(prims.iter().map(|&p| self.centroids[p as usize]));
        let extent = cb.max - cb.min;
        let axis = if extent.x >= extent.y && extent.x >= extent.z { 0 } else if extent.y >= extent.z { 1 } else { 2 };
        let mid = prims.len() / 2;
        if extent[axis] <= 0.0 || depth >= SAH_DEPTH_LIMIT {
            prims.select_nth_unstable_by(mid, |&a, &b| {
                self.centroids[a as usize][axis].total_cmp(&self.centroids[b as usize][axis])
            });
            return mid;
        }
        let bin_of = |p: u32| {
            let t = (self.centroids[p as usize][axis] - cb.min[axis]) / extent[axis];
            ((t * SAH_BINS as f32) as usize).min(SAH_BINS - 1)
        };
        let mut bins = [(Aabb::empty(), 0usize); SAH_BINS];
        for &p in prims.iter() {
            let b = &mut bins[bin_of(p)];
            b.0 = b.0.union(&self.bounds[p as usize]);
            b.1 += 1;
        }
        let mut best = (f32::MAX, 0usize);
        for split in 1..SAH_BINS {
            let (left, right) = bins.split_at(split);
            let side = |s: &[(Aabb, usize)]| s.iter().fold((Aabb::empty(), 0), |acc, b| (acc.0.union(&b.0), acc.1 + b.1));
            let (lb, ln) = side(left);
            let (rb, rn) = side(right);
            if ln == 0 || rn == 0 {
                continue;
            }
            let cost = lb.surface_area() * ln as f32 + rb.surface_area() * rn as f32;
            if cost < best.0 {
                best = (cost, split);
            }
        }
        if best.0 == f32::MAX {
            prims.select_nth_unstable_by(mid, |&a, &b| {
                self.centroids[a as usize][axis].total_cmp(&self.centroids[b as usize][axis])
            });
            return mid;
        }
        let mut left = 0;
        for i in 0..prims.len() {
            if bin_of(prims[i]) < best.1 {
                prims.swap(i, left);
                left += 1;
            }
        }
        left
    }

    fn build(&mut self, node: usize, prims: &mut [u32], depth: u32) {
        let b = self.range_bounds(prims);
        self.nodes[node].set_bounds(&b);
        if prims.len() == 1 {
            self.nodes[node].left_or_first = prims[0];
            self.nodes[node].count = 1;
            return;
        }
        let left_count = self.split(prims, depth);
        let left = self.nodes.len();
        self.nodes.push(BvhNode::default());
        self.nodes.push(BvhNode::default());
        self.nodes[node].left_or_first = left as u32;
        self.nodes[node].count = 0;
        let (l, r) = prims.split_at_mut(left_count);
        self.build(left, l, depth + 1);
        self.build(left + 1, r, depth + 1);
    }
}

/// Build over primitive bounds. Node indices are relative to the structure's first node.
pub fn build(bounds: &[Aabb]) -> Vec<BvhNode> {
    if bounds.is_empty() {
        // Empty structure: a leaf that no ray can enter.
        let mut node = BvhNode { count: 1, ..BvhNode::default() };
        node.set_bounds(&Aabb::empty());
        return vec![node];
    }
    let mut prims: Vec<u32> = (0..bounds.len() as u32).collect();
    let mut builder = Builder {
        bounds,
        centroids: bounds.iter().map(Aabb::center).collect(),
        nodes: Vec::with_capacity(node_count(bounds.len())),
    };
    builder.nodes.push(BvhNode::default());
    builder.build(0, &mut prims, 0);
    builder.nodes
}

/// Recompute bounds bottom-up for new primitive bounds. Children always follow their parent.
pub fn refit(nodes: &mut [BvhNode], bounds: &[Aabb]) {
    for i in (0..nodes.len()).rev() {
        let n = nodes[i];
        let b = if n.is_leaf() {
            bounds.get(n.left_or_first as usize).copied().unwrap_or_else(Aabb::empty)
        } else {
            let l = n.left_or_first as usize;
            nodes[l].bounds().union(&nodes[l + 1].bounds())
        };
        nodes[i].set_bounds(&b);
    }
}

/// Closest-hit traversal. `on_leaf(primitive, t_max)` returns a closer hit distance, if any.
/// Returns the final `t_max`.
pub fn traverse<F>(nodes: &[BvhNode], root: usize, origin: Vec3, dir: Vec3, mut t_max: f32, mut on_leaf: F) -> f32
where
    F: FnMut(u32, f32) -> Option<f32>,
{
    let inv = safe_inverse(dir);
    let mut stack = [0u32; STACK_DEPTH];
    let mut sp = 1;
    while sp > 0 {
        sp -= 1;
        let node = match nodes.get(root + stack[sp] as usize) {
            Some(n) => *n,
            None => continue,
        };
        if intersect_aabb(origin, inv, Vec3::from(node.min), Vec3::from(node.max), t_max).is_none() {
            continue;
        }
        if node.is_leaf() {
            if let Some(t) = on_leaf(node.left_or_first, t_max) {
                t_max = t;
            }
        } else if sp + 2 <= STACK_DEPTH {
            stack[sp] = node.left_or_first;
            stack[sp + 1] = node.left_or_first + 1;
            sp += 2;
        }
    }
    t_max
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SplitMix64, enough for reproducible primitive soups.
    struct TestRng(u64);

    impl TestRng {
        fn next_u64(&mut self) -> u64 {
            self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = self.0;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^ (z >> 31)
        }

        fn next_f32(&mut self) -> f32 {
            (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
        }

        fn next_box(&mut self) -> Aabb {
            let c = Vec3::new(self.next_f32() * 20.0 - 10.0, self.next_f32() * 20.0 - 10.0, self.next_f32() * 20.0 - 10.0);
            let h = Vec3::new(self.next_f32(), self.next_f32(), self.next_f32()) * 0.5;
            Aabb::new(c - h, c + h)
        }
    }

    fn depth(nodes: &[BvhNode], i: usize) -> usize {
        let n = nodes[i];
        if n.is_leaf() {
            1
        } else {
            1 + depth(nodes, n.left_or_first as usize).max(depth(nodes, n.left_or_first as usize + 1))
        }
    }

    #[test]
    fn one_primitive_per_leaf_and_exact_node_count() {
        let mut rng = TestRng(7);
        for n in [1usize, 2, 3, 17, 300] {
            let bounds: Vec<Aabb> = (0..n).map(|_| rng.next_box()).collect();
            let nodes = build(&bounds);
            assert_eq!(nodes.len(), node_count(n));
            let mut seen = vec![false; n];
            for node in nodes.iter().filter(|n| n.is_leaf()) {
                assert_eq!(node.count, 1);
                assert!(!seen[node.left_or_first as usize]);
                seen[node.left_or_first as usize] = true;
            }
            assert!(seen.iter().all(|&s| s));
            assert!(depth(&nodes, 0) < STACK_DEPTH);
        }
    }

    #[test]
    fn parents_enclose_children() {
        let mut rng = TestRng(11);
        let bounds: Vec<Aabb> = (0..128).map(|_| rng.next_box()).collect();
        let nodes = build(&bounds);
        for n in nodes.iter().filter(|n| !n.is_leaf()) {
            let parent = n.bounds();
            for c in [n.left_or_first as usize, n.left_or_first as usize + 1] {
                let child = nodes[c].bounds();
                assert!(parent.contains(child.min) && parent.contains(child.max));
            }
        }
    }

    #[test]
    fn refit_matches_moved_primitives() {
        let mut rng = TestRng(3);
        let mut bounds: Vec<Aabb> = (0..64).map(|_| rng.next_box()).collect();
        let mut nodes = build(&bounds);
        let topology: Vec<(u32, u32)> = nodes.iter().map(|n| (n.left_or_first, n.count)).collect();
        let shift = Vec3::new(5.0, -2.0, 1.0);
        for b in bounds.iter_mut().take(10) {
            *b = Aabb::new(b.min + shift, b.max + shift);
        }
        refit(&mut nodes, &bounds);
        let after: Vec<(u32, u32)> = nodes.iter().map(|n| (n.left_or_first, n.count)).collect();
        assert_eq!(topology, after);
        let root = nodes[0].bounds();
        for b in &bounds {
            assert!(root.contains(b.min) && root.contains(b.max));
        }
    }

    #[test]
    fn traversal_finds_the_closest_box() {
        let mut rng = TestRng(99);
        let bounds: Vec<Aabb> = (0..200).map(|_| rng.next_box()).collect();
        let nodes = build(&bounds);
        let inv_hit = |o: Vec3, d: Vec3, b: &Aabb, t: f32| intersect_aabb(o, safe_inverse(d), b.min, b.max, t);
        for _ in 0..50 {
            let o = Vec3::new(rng.next_f32() * 30.0 - 15.0, rng.next_f32() * 30.0 - 15.0, -20.0);
            let d = Vec3::new(0.0, 0.0, 1.0);
            let brute = bounds.iter().filter_map(|b| inv_hit(o, d, b, 100.0)).fold(100.0f32, f32::min);
            let found = traverse(&nodes, 0, o, d, 100.0, |p, t| inv_hit(o, d, &bounds[p as usize], t));
            assert_eq!(found, brute);
        }
    }
}
