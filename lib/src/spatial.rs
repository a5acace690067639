//! Octree over body positions for radius and nearest-neighbour queries.

use std::{cmp::Reverse, collections::BinaryHeap, collections::HashMap};

use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use tracing::{debug, warn};

use crate::{bodies::BodyId, config::OctreeSettings};

/// Axis-aligned box, closed on both ends.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl Aabb {
    pub fn cube(center: Vector3<f64>, half: f64) -> Self {
        let h = Vector3::repeat(half);
        Self {
            min: center - h,
            max: center + h,
        }
    }

    pub fn center(&self) -> Vector3<f64> {
        (self.min + self.max) / 2.0
    }

    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|k| self.min[k] <= p[k] && p[k] <= self.max[k])
    }

    /// Squared distance from `p` to the nearest point of the box.
    pub fn distance_squared(&self, p: &Vector3<f64>) -> f64 {
        (0..3)
            .map(|k| {
                let d = (self.min[k] - p[k]).max(0.0).max(p[k] - self.max[k]);
                d * d
            })
            .sum()
    }

    fn octant_of(&self, p: &Vector3<f64>) -> usize {
        let c = self.center();
        (0..3).fold(0, |acc, k| acc | (usize::from(p[k] >= c[k]) << k))
    }

    fn octant(&self, index: usize) -> Aabb {
        let c = self.center();
        let mut min = self.min;
        let mut max = c;
        for k in 0..3 {
            if index & (1 << k) != 0 {
                min[k] = c[k];
                max[k] = self.max[k];
            }
        }
        Aabb { min, max }
    }
}

#[derive(Clone, Debug)]
struct Node {
    bounds: Aabb,
    depth: u8,
    parent: Option<usize>,
    children: Option<[usize; 8]>,
    items: Vec<(BodyId, Vector3<f64>)>,
}

impl Node {
    fn leaf(bounds: Aabb, depth: u8, parent: Option<usize>) -> Self {
        Self {
            bounds,
            depth,
            parent,
            children: None,
            items: vec![],
        }
    }
}

/// A loose-growing octree. Nodes hold body IDs and a copy of the position
/// they were indexed at; the bodies themselves live in the registry.
#[derive(Clone, Debug)]
pub struct Octree {
    nodes: Vec<Node>,
    /// Leaf node currently holding each body.
    leaves: HashMap<BodyId, usize>,
    /// First index of each block of eight detached nodes, reused by splits.
    free: Vec<usize>,
    settings: OctreeSettings,
}

impl Default for Octree {
    fn default() -> Self {
        Self::new(OctreeSettings::default())
    }
}

impl Octree {
    pub fn new(settings: OctreeSettings) -> Self {
        Self {
            nodes: vec![Node::leaf(Aabb::cube(Vector3::zeros(), 1.0), 0, None)],
            leaves: HashMap::new(),
            free: vec![],
            settings,
        }
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn contains(&self, id: BodyId) -> bool {
        self.leaves.contains_key(&id)
    }

    pub fn bounds(&self) -> Aabb {
        self.nodes[0].bounds
    }

    /// Nodes currently attached to the tree.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 8 * self.free.len()
    }

    /// The position `id` was last indexed at.
    pub fn indexed_position(&self, id: BodyId) -> Option<Vector3<f64>> {
        let leaf = *self.leaves.get(&id)?;
        self.nodes[leaf]
            .items
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, p)| *p)
    }

    /// Insert or move `id`. Non-finite positions are refused.
    pub fn insert(&mut self, id: BodyId, position: Vector3<f64>) -> bool {
        if !position.iter().all(|x| x.is_finite()) {
            warn!(%id, "refusing to index a non-finite position");
            return false;
        }
        if self.leaves.contains_key(&id) {
            return self.update(id, position);
        }
        if !self.nodes[0].bounds.contains(&position) {
            let mut all = self.entries();
            all.push((id, position));
            self.rebuild(all);
            return true;
        }
        self.insert_from_root(id, position);
        true
    }

    pub fn remove(&mut self, id: BodyId) -> bool {
        let Some(leaf) = self.leaves.remove(&id) else {
            return false;
        };
        self.nodes[leaf].items.retain(|(i, _)| *i != id);
        if let Some(parent) = self.nodes[leaf].parent {
            self.collapse(parent);
        }
        true
    }

    /// Fold sparse children back into their parent, walking up from
    /// `index` while the merged node still fits in one leaf.
    fn collapse(&mut self, mut index: usize) {
        loop {
            let Some(children) = self.nodes[index].children else {
                return;
            };
            if children.iter().any(|&c| self.nodes[c].children.is_some()) {
                return;
            }
            let count = children.iter().map(|&c| self.nodes[c].items.len()).sum::<usize>();
            if count > self.settings.leaf_capacity {
                return;
            }
            let mut items = vec![];
            for &c in &children {
                items.append(&mut self.nodes[c].items);
            }
            for (id, _) in &items {
                self.leaves.insert(*id, index);
            }
            let node = &mut self.nodes[index];
            node.items = items;
            node.children = None;
            self.free.push(children[0]);
            match self.nodes[index].parent {
                Some(parent) => index = parent,
                None => return,
            }
        }
    }

    /// Move `id` to `position`. A body that stays inside its leaf is updated
    /// in place; one that leaves it is removed and reinserted.
    pub fn update(&mut self, id: BodyId, position: Vector3<f64>) -> bool {
        if !position.iter().all(|x| x.is_finite()) {
            warn!(%id, "refusing to index a non-finite position");
            return false;
        }
        let Some(&leaf) = self.leaves.get(&id) else {
            return self.insert(id, position);
        };
        let node = &mut self.nodes[leaf];
        if node.bounds.contains(&position) {
            if let Some(item) = node.items.iter_mut().find(|(i, _)| *i == id) {
                item.1 = position;
            }
            return true;
        }
        self.remove(id);
        self.insert(id, position)
    }

    /// Discard the tree and index `entries` from scratch, sizing the root
    /// to fit them.
    pub fn rebuild(&mut self, entries: Vec<(BodyId, Vector3<f64>)>) {
        let entries = entries
            .into_iter()
            .filter(|(_, p)| p.iter().all(|x| x.is_finite()))
            .collect::<Vec<_>>();
        let (min, max) = entries.iter().fold(
            (Vector3::repeat(f64::INFINITY), Vector3::repeat(f64::NEG_INFINITY)),
            |(min, max), (_, p)| (min.inf(p), max.sup(p)),
        );
        let bounds = if entries.is_empty() {
            Aabb::cube(Vector3::zeros(), 1.0)
        } else {
            let center = (min + max) / 2.0;
            let half = ((max - min).max() / 2.0 * 1.25).max(1.0);
            Aabb::cube(center, half)
        };
        debug!(count = entries.len(), half = (bounds.max[0] - bounds.min[0]) / 2.0, "rebuilding octree");

        self.nodes.clear();
        self.nodes.push(Node::leaf(bounds, 0, None));
        self.leaves.clear();
        self.free.clear();
        for (id, p) in entries {
            self.insert_from_root(id, p);
        }
    }

    fn entries(&self) -> Vec<(BodyId, Vector3<f64>)> {
        self.nodes.iter().flat_map(|n| n.items.iter().copied()).collect()
    }

    fn insert_from_root(&mut self, id: BodyId, position: Vector3<f64>) {
        self.insert_below(0, id, position);
    }

    fn split(&mut self, index: usize) {
        let bounds = self.nodes[index].bounds;
        let depth = self.nodes[index].depth + 1;
        let first = match self.free.pop() {
            Some(first) => {
                for k in 0..8 {
                    self.nodes[first + k] = Node::leaf(bounds.octant(k), depth, Some(index));
                }
                first
            }
            None => {
                let first = self.nodes.len();
                self.nodes
                    .extend((0..8).map(|k| Node::leaf(bounds.octant(k), depth, Some(index))));
                first
            }
        };
        let children: [usize; 8] = std::array::from_fn(|k| first + k);
        let items = std::mem::take(&mut self.nodes[index].items);
        self.nodes[index].children = Some(children);
        for (id, p) in items {
            self.insert_below(index, id, p);
        }
    }

    fn insert_below(&mut self, start: usize, id: BodyId, position: Vector3<f64>) {
        let mut index = start;
        while let Some(children) = self.nodes[index].children {
            index = children[self.nodes[index].bounds.octant_of(&position)];
        }
        self.nodes[index].items.push((id, position));
        self.leaves.insert(id, index);

        let node = &self.nodes[index];
        if node.items.len() > self.settings.leaf_capacity && node.depth < self.settings.max_depth {
            self.split(index);
        }
    }

    /// Every indexed body within `radius` of `center` (boundary inclusive),
    /// in ascending ID order.
    pub fn query(&self, center: &Vector3<f64>, radius: f64) -> Vec<BodyId> {
        let mut found = vec![];
        if radius.is_nan() || radius < 0.0 {
            return found;
        }
        let r2 = radius * radius;
        let mut stack = vec![0];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if node.bounds.distance_squared(center) > r2 {
                continue;
            }
            match node.children {
                Some(children) => stack.extend(children),
                None => found.extend(
                    node.items
                        .iter()
                        .filter(|(_, p)| (p - center).norm_squared() <= r2)
                        .map(|(id, _)| *id),
                ),
            }
        }
        found.sort_unstable();
        found
    }

    /// The indexed body closest to `position` that passes `accept`, with
    /// its distance.
    pub fn nearest(
        &self,
        position: &Vector3<f64>,
        mut accept: impl FnMut(BodyId) -> bool,
    ) -> Option<(BodyId, f64)> {
        let mut best: Option<(BodyId, f64)> = None;
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((OrderedFloat(self.nodes[0].bounds.distance_squared(position)), 0)));
        while let Some(Reverse((OrderedFloat(d2), index))) = heap.pop() {
            if best.is_some_and(|(_, b)| d2 > b * b) {
                break;
            }
            let node = &self.nodes[index];
            match node.children {
                Some(children) => {
                    for child in children {
                        let cd2 = self.nodes[child].bounds.distance_squared(position);
                        heap.push(Reverse((OrderedFloat(cd2), child)));
                    }
                }
                None => {
                    for &(id, p) in &node.items {
                        let d = (p - position).norm();
                        let better = match best {
                            Some((best_id, b)) => d < b || (d == b && id < best_id),
                            None => true,
                        };
                        if better && accept(id) {
                            best = Some((id, d));
                        }
                    }
                }
            }
        }
        best
    }
}
