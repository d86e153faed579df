//! Bounding box tree over the nodes of a tile
//!
//! The tree is built over the XZ bounding rectangles of the nodes and stored as
//! a flat array of boxes. Queries take a closure that evaluates a single node,
//! which keeps the tree independent of how node geometry is stored and of the
//! filter applied to candidates.

use glam::Vec3;
use navgraph_common::{Int2, Int3, PRECISION_FACTOR};

use crate::graph_node::NodeIndex;

/// Maximum number of nodes stored in a leaf
pub const MAXIMUM_LEAF_SIZE: usize = 4;

/// Integer rectangle on the XZ plane. `y` is the z axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRect {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl IntRect {
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    /// Bounding rectangle of the XZ projection of `points`
    pub fn from_points(points: &[Int3]) -> Self {
        let mut rect = IntRect::new(i32::MAX, i32::MAX, i32::MIN, i32::MIN);
        for p in points {
            rect.xmin = rect.xmin.min(p.x);
            rect.ymin = rect.ymin.min(p.z);
            rect.xmax = rect.xmax.max(p.x);
            rect.ymax = rect.ymax.max(p.z);
        }
        rect
    }

    pub fn union(&self, other: &IntRect) -> IntRect {
        IntRect::new(
            self.xmin.min(other.xmin),
            self.ymin.min(other.ymin),
            self.xmax.max(other.xmax),
            self.ymax.max(other.ymax),
        )
    }

    pub fn width(&self) -> i64 {
        self.xmax as i64 - self.xmin as i64
    }

    pub fn height(&self) -> i64 {
        self.ymax as i64 - self.ymin as i64
    }

    /// True if the world-space point lies inside the rectangle on XZ
    pub fn contains_world(&self, p: Vec3) -> bool {
        p.x >= self.xmin as f32 * PRECISION_FACTOR
            && p.z >= self.ymin as f32 * PRECISION_FACTOR
            && p.x <= self.xmax as f32 * PRECISION_FACTOR
            && p.z <= self.ymax as f32 * PRECISION_FACTOR
    }

    /// Squared XZ distance from a world-space point to the rectangle
    pub fn sqr_distance_world(&self, p: Vec3) -> f32 {
        let xmin = self.xmin as f32 * PRECISION_FACTOR;
        let xmax = self.xmax as f32 * PRECISION_FACTOR;
        let zmin = self.ymin as f32 * PRECISION_FACTOR;
        let zmax = self.ymax as f32 * PRECISION_FACTOR;
        let dx = (xmin - p.x).max(0.0).max(p.x - xmax);
        let dz = (zmin - p.z).max(0.0).max(p.z - zmax);
        dx * dx + dz * dz
    }
}

/// A node registered in the tree
#[derive(Debug, Clone, Copy)]
pub struct BBTreeItem {
    pub node: NodeIndex,
    pub rect: IntRect,
    /// XZ position used to partition the node
    pub position: Int2,
}

#[derive(Debug, Clone, Copy)]
enum BoxKind {
    Leaf { offset: u32, len: u8 },
    Inner { left: u32, right: u32 },
}

#[derive(Debug, Clone, Copy)]
struct BBTreeBox {
    rect: IntRect,
    kind: BoxKind,
}

/// Result of a closest-node query
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClosestNode {
    pub node: Option<NodeIndex>,
    /// Closest point on the node to the query point
    pub position: Vec3,
}

/// Axis-aligned bounding box tree over node rectangles
#[derive(Debug, Clone, Default)]
pub struct BBTree {
    boxes: Vec<BBTreeBox>,
    node_lookup: Vec<NodeIndex>,
}

impl BBTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.boxes.clear();
        self.node_lookup.clear();
    }

    /// Number of nodes in the tree
    pub fn len(&self) -> usize {
        self.node_lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_lookup.is_empty()
    }

    /// Bounds of the whole tree
    pub fn rect(&self) -> Option<IntRect> {
        self.boxes.first().map(|b| b.rect)
    }

    /// Rebuilds the tree from scratch
    pub fn rebuild_from(&mut self, items: &[BBTreeItem]) {
        self.clear();
        if items.is_empty() {
            return;
        }
        self.boxes.reserve((items.len() as f32 * 2.1).ceil() as usize);
        self.node_lookup.reserve(items.len());

        let mut permutation: Vec<usize> = (0..items.len()).collect();
        self.build_recursive(items, &mut permutation);
    }

    fn build_recursive(&mut self, items: &[BBTreeItem], permutation: &mut [usize]) -> u32 {
        let rect = permutation
            .iter()
            .map(|&i| items[i].rect)
            .reduce(|a, b| a.union(&b))
            .unwrap_or(IntRect::new(0, 0, 0, 0));

        let box_index = self.boxes.len() as u32;
        self.boxes.push(BBTreeBox {
            rect,
            kind: BoxKind::Leaf { offset: 0, len: 0 },
        });

        if permutation.len() <= MAXIMUM_LEAF_SIZE {
            let offset = self.node_lookup.len() as u32;
            self.node_lookup.extend(permutation.iter().map(|&i| items[i].node));
            self.boxes[box_index as usize].kind = BoxKind::Leaf {
                offset,
                len: permutation.len() as u8,
            };
            return box_index;
        }

        let split_x_first = rect.width() >= rect.height();
        let mut split = split_by_axis(items, permutation, &rect, split_x_first);
        if split == 0 || split == permutation.len() {
            // Degenerate on the longer axis, try the other one
            split = split_by_axis(items, permutation, &rect, !split_x_first);
        }
        if split == 0 || split == permutation.len() {
            // Every node shares the same position on both axes
            let axis_x = split_x_first;
            permutation.sort_by_key(|&i| {
                if axis_x {
                    items[i].position.x
                } else {
                    items[i].position.y
                }
            });
            split = permutation.len() / 2;
        }

        let (lower, upper) = permutation.split_at_mut(split);
        let left = self.build_recursive(items, lower);
        let right = self.build_recursive(items, upper);
        self.boxes[box_index as usize].kind = BoxKind::Inner { left, right };
        box_index
    }

    /// Finds the closest node to `p`, improving on `best` if possible.
    ///
    /// `distance` is the current best distance and is only lowered. The
    /// closure returns the closest point on a node, or `None` if the node is not
    /// acceptable.
    pub fn query_closest<F>(&self, p: Vec3, distance: &mut f32, best: &mut ClosestNode, mut closest: F)
    where
        F: FnMut(NodeIndex) -> Option<Vec3>,
    {
        self.query_closest_internal(p, distance, best, false, &mut closest);
    }

    /// Like [`BBTree::query_closest`] but distances are measured on XZ only
    pub fn query_closest_xz<F>(&self, p: Vec3, distance: &mut f32, best: &mut ClosestNode, mut closest: F)
    where
        F: FnMut(NodeIndex) -> Option<Vec3>,
    {
        self.query_closest_internal(p, distance, best, true, &mut closest);
    }

    fn query_closest_internal<F>(
        &self,
        p: Vec3,
        distance: &mut f32,
        best: &mut ClosestNode,
        xz_only: bool,
        closest: &mut F,
    ) where
        F: FnMut(NodeIndex) -> Option<Vec3>,
    {
        let original_sqr = *distance * *distance;
        let mut sqr_distance = original_sqr;
        if !self.boxes.is_empty() && self.boxes[0].rect.sqr_distance_world(p) < sqr_distance {
            self.search_box_closest(0, p, &mut sqr_distance, best, xz_only, closest);
            // Only touch the distance if it improved, to avoid drift from sqrt rounding
            if sqr_distance < original_sqr {
                *distance = sqr_distance.sqrt();
            }
        }
    }

    fn search_box_closest<F>(
        &self,
        box_index: u32,
        p: Vec3,
        closest_sqr: &mut f32,
        best: &mut ClosestNode,
        xz_only: bool,
        closest: &mut F,
    ) where
        F: FnMut(NodeIndex) -> Option<Vec3>,
    {
        let bb = self.boxes[box_index as usize];
        match bb.kind {
            BoxKind::Leaf { offset, len } => {
                let start = offset as usize;
                for &node in &self.node_lookup[start..start + len as usize] {
                    let Some(point) = closest(node) else {
                        continue;
                    };
                    let dist = if xz_only {
                        navgraph_common::sqr_distance_xz(point, p)
                    } else {
                        (point - p).length_squared()
                    };
                    let better = dist < *closest_sqr
                        || (xz_only
                            && dist <= *closest_sqr
                            && best.node.is_some()
                            && (point.y - p.y).abs() < (best.position.y - p.y).abs());
                    if better {
                        best.node = Some(node);
                        best.position = point;
                        *closest_sqr = dist;
                    }
                }
            }
            BoxKind::Inner { left, right } => {
                let left_dist = self.boxes[left as usize].rect.sqr_distance_world(p);
                let right_dist = self.boxes[right as usize].rect.sqr_distance_world(p);
                let (first, first_dist, second, second_dist) = if left_dist <= right_dist {
                    (left, left_dist, right, right_dist)
                } else {
                    (right, right_dist, left, left_dist)
                };
                if first_dist <= *closest_sqr {
                    self.search_box_closest(first, p, closest_sqr, best, xz_only, closest);
                }
                if second_dist <= *closest_sqr {
                    self.search_box_closest(second, p, closest_sqr, best, xz_only, closest);
                }
            }
        }
    }

    /// Returns the first node whose rectangle contains `p` and for which
    /// `contains` returns true
    pub fn query_inside<F>(&self, p: Vec3, mut contains: F) -> Option<NodeIndex>
    where
        F: FnMut(NodeIndex) -> bool,
    {
        if self.boxes.is_empty() {
            return None;
        }
        self.search_box_inside(0, p, &mut contains)
    }

    fn search_box_inside<F>(&self, box_index: u32, p: Vec3, contains: &mut F) -> Option<NodeIndex>
    where
        F: FnMut(NodeIndex) -> bool,
    {
        let bb = self.boxes[box_index as usize];
        if !bb.rect.contains_world(p) {
            return None;
        }
        match bb.kind {
            BoxKind::Leaf { offset, len } => {
                let start = offset as usize;
                self.node_lookup[start..start + len as usize]
                    .iter()
                    .copied()
                    .find(|&node| contains(node))
            }
            BoxKind::Inner { left, right } => self
                .search_box_inside(left, p, contains)
                .or_else(|| self.search_box_inside(right, p, contains)),
        }
    }

    /// Depth of the deepest leaf, mostly useful for diagnostics
    pub fn depth(&self) -> usize {
        fn walk(tree: &BBTree, index: u32) -> usize {
            match tree.boxes[index as usize].kind {
                BoxKind::Leaf { .. } => 1,
                BoxKind::Inner { left, right } => 1 + walk(tree, left).max(walk(tree, right)),
            }
        }
        if self.boxes.is_empty() {
            0
        } else {
            walk(self, 0)
        }
    }
}

/// Moves items whose position is above the rectangle's midpoint to the end of
/// `permutation` and returns the index of the first of them
fn split_by_axis(items: &[BBTreeItem], permutation: &mut [usize], rect: &IntRect, axis_x: bool) -> usize {
    let divider = if axis_x {
        ((rect.xmin as i64 + rect.xmax as i64) / 2) as i32
    } else {
        ((rect.ymin as i64 + rect.ymax as i64) / 2) as i32
    };
    let coord = |i: usize| {
        if axis_x {
            items[i].position.x
        } else {
            items[i].position.y
        }
    };

    let mut mx = permutation.len();
    let mut i = 0;
    while i < mx {
        if coord(permutation[i]) > divider {
            mx -= 1;
            permutation.swap(mx, i);
        } else {
            i += 1;
        }
    }
    mx
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Square cells laid out on a grid, 1 world unit each
    fn grid_items(size: i32) -> Vec<BBTreeItem> {
        let mut items = Vec::new();
        for z in 0..size {
            for x in 0..size {
                let rect = IntRect::new(x * 1000, z * 1000, x * 1000 + 1000, z * 1000 + 1000);
                items.push(BBTreeItem {
                    node: NodeIndex((x + z * size) as u32),
                    rect,
                    position: Int2::new(x * 1000 + 500, z * 1000 + 500),
                });
            }
        }
        items
    }

    fn closest_on_rect(rect: &IntRect, p: Vec3) -> Vec3 {
        Vec3::new(
            p.x.clamp(rect.xmin as f32 * 0.001, rect.xmax as f32 * 0.001),
            0.0,
            p.z.clamp(rect.ymin as f32 * 0.001, rect.ymax as f32 * 0.001),
        )
    }

    #[test]
    fn test_build_leaf_sizes() {
        let items = grid_items(10);
        let mut tree = BBTree::new();
        tree.rebuild_from(&items);

        assert_eq!(tree.len(), 100);
        assert_eq!(tree.rect(), Some(IntRect::new(0, 0, 10000, 10000)));
        // A balanced split of 100 items into leaves of 4 stays shallow
        assert!(tree.depth() <= 8, "depth {}", tree.depth());
    }

    #[test]
    fn test_degenerate_positions_still_split() {
        let items: Vec<BBTreeItem> = (0..20)
            .map(|i| BBTreeItem {
                node: NodeIndex(i),
                rect: IntRect::new(0, 0, 1000, 1000),
                position: Int2::new(500, 500),
            })
            .collect();
        let mut tree = BBTree::new();
        tree.rebuild_from(&items);
        assert_eq!(tree.len(), 20);
    }

    #[test]
    fn test_query_inside() {
        let items = grid_items(8);
        let mut tree = BBTree::new();
        tree.rebuild_from(&items);

        let p = Vec3::new(3.5, 0.0, 6.25);
        let found = tree.query_inside(p, |node| {
            let rect = items[node.0 as usize].rect;
            rect.contains_world(p)
        });
        assert_eq!(found, Some(NodeIndex(3 + 6 * 8)));

        assert_eq!(tree.query_inside(Vec3::new(-1.0, 0.0, 0.5), |_| true), None);
    }

    #[test]
    fn test_query_closest_matches_brute_force() {
        let items = grid_items(6);
        let mut tree = BBTree::new();
        tree.rebuild_from(&items);

        // Only odd nodes are acceptable, so the search has to look past the first hit
        let accept = |node: NodeIndex| node.0 % 2 == 1;
        for p in [
            Vec3::new(-2.0, 0.0, -2.0),
            Vec3::new(2.2, 0.0, 3.7),
            Vec3::new(9.0, 0.0, 1.0),
        ] {
            let mut distance = f32::INFINITY;
            let mut best = ClosestNode::default();
            tree.query_closest(p, &mut distance, &mut best, |node| {
                accept(node).then(|| closest_on_rect(&items[node.0 as usize].rect, p))
            });

            let brute = items
                .iter()
                .filter(|it| accept(it.node))
                .map(|it| (closest_on_rect(&it.rect, p) - p).length())
                .fold(f32::INFINITY, f32::min);
            assert!((distance - brute).abs() < 1e-4, "{distance} != {brute}");
            assert!(best.node.is_some());
        }
    }

    #[test]
    fn test_query_closest_never_worsens() {
        let items = grid_items(4);
        let mut tree = BBTree::new();
        tree.rebuild_from(&items);

        let p = Vec3::new(10.0, 0.0, 10.0);
        let mut distance = 0.5;
        let mut best = ClosestNode {
            node: Some(NodeIndex(99)),
            position: p,
        };
        tree.query_closest(p, &mut distance, &mut best, |node| {
            Some(closest_on_rect(&items[node.0 as usize].rect, p))
        });
        assert_eq!(best.node, Some(NodeIndex(99)));
        assert_eq!(distance, 0.5);
    }
}
