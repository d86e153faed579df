//! Nearest node constraints
//!
//! A constraint decides which nodes are acceptable when a world position is
//! snapped onto the graph, for example at the start and end of a path.

use glam::Vec3;
use std::ops::{Deref, DerefMut};

use crate::graph_node::{GraphNode, NodeIndex};

/// Result of a nearest node query
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NNInfo {
    pub node: Option<NodeIndex>,
    /// Closest point on the node to the query position
    pub position: Vec3,
}

impl NNInfo {
    pub fn new(node: NodeIndex, position: Vec3) -> Self {
        Self {
            node: Some(node),
            position,
        }
    }
}

/// Filter applied to nearest node queries
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct NNConstraint {
    /// Bitmask of graph indices to search
    pub graph_mask: u32,
    /// Only accept nodes in `area` when `area` is not negative
    pub constrain_area: bool,
    pub area: i32,
    pub constrain_walkability: bool,
    /// Required walkability when `constrain_walkability` is set
    pub walkable: bool,
    /// Measure distances on the XZ plane only
    pub distance_xz: bool,
    pub constrain_tags: bool,
    /// Bitmask of accepted tags
    pub tags: u32,
    /// Reject nodes further away than the configured nearest node distance
    pub constrain_distance: bool,
}

impl NNConstraint {
    /// A constraint that accepts every node
    pub fn none() -> Self {
        Self {
            graph_mask: u32::MAX,
            constrain_area: false,
            area: -1,
            constrain_walkability: false,
            walkable: false,
            distance_xz: false,
            constrain_tags: false,
            tags: u32::MAX,
            constrain_distance: false,
        }
    }

    /// True if graphs with this index should be searched
    pub fn suitable_graph(&self, graph_index: u32) -> bool {
        graph_index >= 32 || (self.graph_mask >> graph_index) & 1 != 0
    }

    /// True if the node passes every enabled filter
    pub fn suitable(&self, node: &GraphNode) -> bool {
        if node.is_destroyed() {
            return false;
        }
        if self.constrain_walkability && node.walkable() != self.walkable {
            return false;
        }
        if self.constrain_area && self.area >= 0 && node.area() as i32 != self.area {
            return false;
        }
        if self.constrain_tags && (self.tags >> node.tag()) & 1 == 0 {
            return false;
        }
        true
    }
}

impl Default for NNConstraint {
    /// Walkable nodes with any tag, within the nearest node distance
    fn default() -> Self {
        Self {
            graph_mask: u32::MAX,
            constrain_area: false,
            area: -1,
            constrain_walkability: true,
            walkable: true,
            distance_xz: false,
            constrain_tags: true,
            tags: u32::MAX,
            constrain_distance: true,
        }
    }
}

/// Constraint used by paths.
///
/// With `constrain_to_start_area` set, the end node is restricted to the start
/// node's connected component once the start is known, so an unreachable end
/// point is moved onto the closest reachable node. Without it an end point in
/// another component fails the path.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PathNNConstraint {
    pub constraint: NNConstraint,
    pub constrain_to_start_area: bool,
}

impl PathNNConstraint {
    /// Moves the end point onto the closest node reachable from the start
    pub fn reachable_from_start() -> Self {
        Self {
            constraint: NNConstraint::default(),
            constrain_to_start_area: true,
        }
    }

    /// Called with the resolved start node before the end point is resolved
    pub fn set_start(&mut self, node: Option<&GraphNode>) {
        match node {
            Some(node) if self.constrain_to_start_area => {
                self.constraint.constrain_area = true;
                self.constraint.area = node.area() as i32;
            }
            _ => self.constraint.constrain_area = false,
        }
    }

    /// Undo [`PathNNConstraint::set_start`] so the constraint can be reused
    pub fn reset_start(&mut self) {
        self.constraint.area = -1;
        self.constraint.constrain_area = self.constrain_to_start_area;
    }
}

impl Default for PathNNConstraint {
    fn default() -> Self {
        NNConstraint::default().into()
    }
}

impl From<NNConstraint> for PathNNConstraint {
    fn from(constraint: NNConstraint) -> Self {
        Self {
            constrain_to_start_area: false,
            constraint,
        }
    }
}

impl Deref for PathNNConstraint {
    type Target = NNConstraint;

    fn deref(&self) -> &NNConstraint {
        &self.constraint
    }
}

impl DerefMut for PathNNConstraint {
    fn deref_mut(&mut self) -> &mut NNConstraint {
        &mut self.constraint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_node::{NodeArena, NodeKind};
    use crate::triangle_mesh_node::TriangleMeshNode;

    fn node(arena: &mut NodeArena) -> NodeIndex {
        arena
            .allocate(NodeKind::Triangle(TriangleMeshNode::new(0, 1, 2)))
            .unwrap()
    }

    #[test]
    fn test_default_rejects_unwalkable() {
        let mut arena = NodeArena::new();
        let n = node(&mut arena);
        let constraint = NNConstraint::default();
        assert!(constraint.suitable(&arena[n]));

        arena[n].set_walkable(false);
        assert!(!constraint.suitable(&arena[n]));
        assert!(NNConstraint::none().suitable(&arena[n]));
    }

    #[test]
    fn test_tag_mask() {
        let mut arena = NodeArena::new();
        let n = node(&mut arena);
        arena[n].set_tag(3);

        let mut constraint = NNConstraint::default();
        constraint.tags = !(1 << 3);
        assert!(!constraint.suitable(&arena[n]));
        constraint.tags = 1 << 3;
        assert!(constraint.suitable(&arena[n]));
    }

    #[test]
    fn test_path_constraint_restricts_end_to_start_area() {
        let mut arena = NodeArena::new();
        let start = node(&mut arena);
        let same = node(&mut arena);
        let other = node(&mut arena);
        arena[start].set_area(1);
        arena[same].set_area(1);
        arena[other].set_area(2);

        let mut constraint = PathNNConstraint::reachable_from_start();
        // Before the start is known every area is accepted
        assert!(constraint.suitable(&arena[other]));

        constraint.set_start(Some(&arena[start]));
        assert!(constraint.suitable(&arena[same]));
        assert!(!constraint.suitable(&arena[other]));

        constraint.set_start(None);
        assert!(constraint.suitable(&arena[other]));
    }

    #[test]
    fn test_default_path_constraint_keeps_other_areas() {
        let mut arena = NodeArena::new();
        let start = node(&mut arena);
        let other = node(&mut arena);
        arena[start].set_area(1);
        arena[other].set_area(2);

        let mut constraint = PathNNConstraint::default();
        constraint.set_start(Some(&arena[start]));
        assert!(constraint.suitable(&arena[other]));
    }

    #[test]
    fn test_graph_mask() {
        let mut constraint = NNConstraint::default();
        constraint.graph_mask = 0b10;
        assert!(!constraint.suitable_graph(0));
        assert!(constraint.suitable_graph(1));
    }
}
