//! Pluggable traversal rules

use crate::graph_node::GraphNode;

/// Decides which nodes a path may enter and what entering them costs.
///
/// The default methods implement the standard rules: a node is traversable
/// when it is walkable and its tag is enabled, and entering it costs the
/// tag penalty plus the node's own penalty.
pub trait TraversalProvider: Send + Sync {
    fn can_traverse(&self, enabled_tags: u32, node: &GraphNode) -> bool {
        node.walkable() && (enabled_tags >> node.tag()) & 1 != 0
    }

    fn traversal_cost(&self, tag_penalties: &[u32; 32], node: &GraphNode) -> u32 {
        tag_penalties[node.tag() as usize].saturating_add(node.penalty())
    }
}

/// Provider with the standard rules
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTraversalProvider;

impl TraversalProvider for DefaultTraversalProvider {}
