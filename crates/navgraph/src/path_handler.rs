//! Per-worker search scratch state
//!
//! Every worker owns one [`PathHandler`]. It keeps one [`PathNode`] per graph
//! node, tagged with the id of the path that last touched it, so stale
//! records from earlier searches are ignored without clearing the table.

use std::sync::atomic::{AtomicU16, Ordering};

use navgraph_common::Result;

use crate::binary_heap::{BinaryHeap, NOT_IN_HEAP};
use crate::config::PathfinderConfig;
use crate::funnel::FunnelPortals;
use crate::graph_node::NodeIndex;
use crate::pool::{ListPool, ObjectPool};

static NEXT_PATH_ID: AtomicU16 = AtomicU16::new(1);

/// Returns a fresh path id. Ids wrap around and never return 0, which
/// marks path nodes no search has touched.
pub fn next_path_id() -> u16 {
    loop {
        let id = NEXT_PATH_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Search record of one graph node for one worker
#[derive(Debug, Clone, Copy)]
pub struct PathNode {
    pub node: NodeIndex,
    pub parent: Option<NodeIndex>,
    /// Id of the search that last wrote this record
    pub path_id: u16,
    /// Cost of the connection from the parent
    pub cost: u32,
    pub g: u32,
    pub h: u32,
    pub(crate) heap_index: u16,
    /// Marks target nodes
    pub flag1: bool,
    /// Marks nodes whose connections have a special cost
    pub flag2: bool,
}

impl PathNode {
    pub fn new(node: NodeIndex) -> Self {
        Self {
            node,
            parent: None,
            path_id: 0,
            cost: 0,
            g: 0,
            h: 0,
            heap_index: NOT_IN_HEAP,
            flag1: false,
            flag2: false,
        }
    }

    #[inline]
    pub fn f(&self) -> u32 {
        self.g.saturating_add(self.h)
    }
}

/// Scratch buffers reused between paths on the same worker
#[derive(Debug, Default)]
pub struct ScratchPools {
    pub node_lists: ListPool<NodeIndex>,
    pub portals: ObjectPool<FunnelPortals>,
}

/// Search state owned by a single worker
#[derive(Debug)]
pub struct PathHandler {
    nodes: Vec<PathNode>,
    heap: BinaryHeap,
    path_id: u16,
    thread_id: usize,
    pub scratch: ScratchPools,
}

impl PathHandler {
    pub fn new(thread_id: usize, config: &PathfinderConfig) -> Result<Self> {
        Ok(Self {
            nodes: Vec::new(),
            heap: BinaryHeap::new(
                config.initial_heap_capacity,
                config.heap_growth_factor,
                config.heap_sort_g_on_ties,
            )?,
            path_id: 0,
            thread_id,
            scratch: ScratchPools {
                portals: ObjectPool::with_reset(FunnelPortals::clear),
                ..Default::default()
            },
        })
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// Id of the path currently being searched
    pub fn path_id(&self) -> u16 {
        self.path_id
    }

    /// Makes room for every node index below `node_capacity`
    pub fn ensure_capacity(&mut self, node_capacity: usize) {
        let len = self.nodes.len();
        if node_capacity > len {
            self.nodes
                .extend((len..node_capacity).map(|i| PathNode::new(NodeIndex(i as u32))));
        }
    }

    /// Prepares the handler for a new search.
    ///
    /// When path ids wrap around, every record is cleared so that an old
    /// record cannot be mistaken for one written by the new path.
    pub fn initialize_for_path(&mut self, path_id: u16, node_capacity: usize) {
        self.ensure_capacity(node_capacity);
        if path_id < self.path_id {
            self.clear_path_ids();
        }
        self.path_id = path_id;
        self.heap.clear(&mut self.nodes);
    }

    /// Resets the path id of every record
    pub fn clear_path_ids(&mut self) {
        log::debug!("Clearing path ids on worker {}", self.thread_id);
        for node in &mut self.nodes {
            node.path_id = 0;
        }
    }

    /// Search record of a node.
    ///
    /// # Panics
    ///
    /// If the index was not covered by [`PathHandler::ensure_capacity`].
    #[inline]
    pub fn node(&self, index: NodeIndex) -> &PathNode {
        &self.nodes[index.as_usize()]
    }

    #[inline]
    pub fn node_mut(&mut self, index: NodeIndex) -> &mut PathNode {
        &mut self.nodes[index.as_usize()]
    }

    pub fn heap_add(&mut self, index: NodeIndex) -> Result<()> {
        self.heap.add(&mut self.nodes, index.0)
    }

    pub fn heap_remove(&mut self) -> Option<NodeIndex> {
        self.heap.remove(&mut self.nodes).map(NodeIndex)
    }

    pub fn heap_is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    /// Nodes currently in the open list
    pub fn heap_items(&self) -> Vec<NodeIndex> {
        self.heap.items().map(NodeIndex).collect()
    }

    /// Restores the open list order after H scores changed
    pub fn rebuild_heap(&mut self) {
        self.heap.rebuild(&mut self.nodes);
    }

    /// Empties the open list without touching the records
    pub fn clear_heap(&mut self) {
        self.heap.clear(&mut self.nodes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_ids_skip_zero() {
        for _ in 0..70_000 {
            assert_ne!(next_path_id(), 0);
        }
    }

    #[test]
    fn test_wrap_clears_records() -> Result<()> {
        let mut handler = PathHandler::new(0, &PathfinderConfig::default())?;
        handler.initialize_for_path(500, 4);
        handler.node_mut(NodeIndex(2)).path_id = 500;

        handler.initialize_for_path(501, 4);
        assert_eq!(handler.node(NodeIndex(2)).path_id, 500);

        handler.initialize_for_path(3, 4);
        assert_eq!(handler.node(NodeIndex(2)).path_id, 0);
        Ok(())
    }

    #[test]
    fn test_initialize_clears_heap() -> Result<()> {
        let mut handler = PathHandler::new(0, &PathfinderConfig::default())?;
        handler.initialize_for_path(10, 8);
        handler.heap_add(NodeIndex(3))?;
        handler.heap_add(NodeIndex(5))?;
        assert_eq!(handler.heap_len(), 2);

        handler.initialize_for_path(11, 8);
        assert!(handler.heap_is_empty());
        assert_eq!(handler.node(NodeIndex(3)).heap_index, NOT_IN_HEAP);
        Ok(())
    }

    #[test]
    fn test_capacity_grows_lazily() -> Result<()> {
        let mut handler = PathHandler::new(1, &PathfinderConfig::default())?;
        handler.ensure_capacity(3);
        handler.ensure_capacity(2);
        assert_eq!(handler.node(NodeIndex(2)).node, NodeIndex(2));
        handler.ensure_capacity(10);
        assert_eq!(handler.node(NodeIndex(9)).node, NodeIndex(9));
        assert_eq!(handler.thread_id(), 1);
        Ok(())
    }
}
