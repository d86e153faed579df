//! Graph nodes, connections and the node arena
//!
//! Nodes live in a single [`NodeArena`] owned by the navigation data and are
//! addressed by [`NodeIndex`] handles. Destroyed slots keep their data until
//! the index is handed out again, so a stale handle never points outside the
//! arena; it just refers to a node whose state is [`NodeState::Destroyed`].

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use navgraph_common::{Error, Int3, Result};
use std::fmt;
use std::io::{Read, Write};
use std::ops::{Index, IndexMut};

use crate::triangle_mesh_node::TriangleMeshNode;

/// Largest usable node index; the range above it was reserved for flags
pub const MAX_NODE_INDEX: u32 = 0x0FFF_FFFE;

/// Marks a connection that does not run along an edge of the node's shape
pub const NO_SHAPE_EDGE: u8 = 0xFF;

/// Handle of a node in the [`NodeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a node slot is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Live(NodeIndex),
    Destroyed,
}

/// Identity of a node plus two scratch flags used by graph algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdentity {
    pub state: NodeState,
    pub temporary_flag1: bool,
    pub temporary_flag2: bool,
}

impl NodeIdentity {
    fn live(index: NodeIndex) -> Self {
        Self {
            state: NodeState::Live(index),
            temporary_flag1: false,
            temporary_flag2: false,
        }
    }
}

/// Packed per-node attributes
///
/// | bits | field |
/// |---|---|
/// | 0 | walkable |
/// | 1..18 | area (connected component) |
/// | 19..24 | tag |
/// | 24..32 | graph index |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags(u32);

impl NodeFlags {
    const WALKABLE_MASK: u32 = 1;
    const AREA_OFFSET: u32 = 1;
    const AREA_MASK: u32 = ((1 << 17) - 1) << Self::AREA_OFFSET;
    const TAG_OFFSET: u32 = 19;
    const TAG_MASK: u32 = ((1 << 5) - 1) << Self::TAG_OFFSET;
    const GRAPH_OFFSET: u32 = 24;
    const GRAPH_MASK: u32 = 0xFF << Self::GRAPH_OFFSET;

    pub const MAX_AREA_INDEX: u32 = Self::AREA_MASK >> Self::AREA_OFFSET;
    pub const MAX_TAG_INDEX: u32 = Self::TAG_MASK >> Self::TAG_OFFSET;
    pub const MAX_GRAPH_INDEX: u32 = Self::GRAPH_MASK >> Self::GRAPH_OFFSET;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn walkable(&self) -> bool {
        self.0 & Self::WALKABLE_MASK != 0
    }

    pub fn set_walkable(&mut self, walkable: bool) {
        self.0 = (self.0 & !Self::WALKABLE_MASK) | walkable as u32;
    }

    pub fn area(&self) -> u32 {
        (self.0 & Self::AREA_MASK) >> Self::AREA_OFFSET
    }

    pub fn set_area(&mut self, area: u32) {
        self.0 = (self.0 & !Self::AREA_MASK) | ((area << Self::AREA_OFFSET) & Self::AREA_MASK);
    }

    pub fn tag(&self) -> u32 {
        (self.0 & Self::TAG_MASK) >> Self::TAG_OFFSET
    }

    pub fn set_tag(&mut self, tag: u32) {
        self.0 = (self.0 & !Self::TAG_MASK) | ((tag << Self::TAG_OFFSET) & Self::TAG_MASK);
    }

    pub fn graph_index(&self) -> u32 {
        (self.0 & Self::GRAPH_MASK) >> Self::GRAPH_OFFSET
    }

    pub fn set_graph_index(&mut self, graph_index: u32) {
        self.0 =
            (self.0 & !Self::GRAPH_MASK) | ((graph_index << Self::GRAPH_OFFSET) & Self::GRAPH_MASK);
    }
}

/// Directed edge to another node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub node: NodeIndex,
    /// Cost of moving along the connection, 1000 per world unit
    pub cost: u32,
    /// Edge of this node's shape the connection crosses, or [`NO_SHAPE_EDGE`]
    pub shape_edge: u8,
}

impl Connection {
    pub fn new(node: NodeIndex, cost: u32, shape_edge: u8) -> Self {
        Self { node, cost, shape_edge }
    }

    pub fn is_edge_shared(&self) -> bool {
        self.shape_edge != NO_SHAPE_EDGE
    }
}

/// Concrete node shapes
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Triangle(TriangleMeshNode),
}

/// A node in a navigation graph
#[derive(Debug, Clone)]
pub struct GraphNode {
    identity: NodeIdentity,
    flags: NodeFlags,
    penalty: u32,
    /// Position in world space
    pub position: Int3,
    connections: Vec<Connection>,
    pub kind: NodeKind,
}

impl GraphNode {
    fn new(index: NodeIndex, kind: NodeKind) -> Self {
        let mut flags = NodeFlags::default();
        flags.set_walkable(true);
        Self {
            identity: NodeIdentity::live(index),
            flags,
            penalty: 0,
            position: Int3::ZERO,
            connections: Vec::new(),
            kind,
        }
    }

    /// The node's handle, or `None` once destroyed
    pub fn index(&self) -> Option<NodeIndex> {
        match self.identity.state {
            NodeState::Live(index) => Some(index),
            NodeState::Destroyed => None,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.identity.state == NodeState::Destroyed
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn identity_mut(&mut self) -> &mut NodeIdentity {
        &mut self.identity
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: NodeFlags) {
        self.flags = flags;
    }

    pub fn walkable(&self) -> bool {
        self.flags.walkable()
    }

    pub fn set_walkable(&mut self, walkable: bool) {
        self.flags.set_walkable(walkable);
    }

    pub fn area(&self) -> u32 {
        self.flags.area()
    }

    pub fn set_area(&mut self, area: u32) {
        self.flags.set_area(area);
    }

    pub fn tag(&self) -> u32 {
        self.flags.tag()
    }

    pub fn set_tag(&mut self, tag: u32) {
        self.flags.set_tag(tag);
    }

    pub fn graph_index(&self) -> u32 {
        self.flags.graph_index()
    }

    pub fn set_graph_index(&mut self, graph_index: u32) {
        self.flags.set_graph_index(graph_index);
    }

    pub fn penalty(&self) -> u32 {
        self.penalty
    }

    /// Sets the traversal penalty.
    ///
    /// Very large penalties make the search degenerate into a breadth first
    /// search and can overflow accumulated costs, so values above `0xFFFFFF`
    /// are reported.
    pub fn set_penalty(&mut self, penalty: u32) {
        if penalty > 0x00FF_FFFF {
            log::warn!(
                "Very high penalty applied ({penalty}). Are you sure negative values haven't underflowed?"
            );
        }
        self.penalty = penalty;
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connection_to(&self, other: NodeIndex) -> Option<&Connection> {
        self.connections.iter().find(|c| c.node == other)
    }

    pub fn contains_connection(&self, other: NodeIndex) -> bool {
        self.connection_to(other).is_some()
    }

    pub fn as_triangle(&self) -> Option<&TriangleMeshNode> {
        match &self.kind {
            NodeKind::Triangle(tri) => Some(tri),
        }
    }

    /// Adds a connection or updates an existing one in place.
    ///
    /// The shape edge of an existing connection is only overwritten when
    /// `shape_edge` is given.
    pub(crate) fn add_connection(&mut self, node: NodeIndex, cost: u32, shape_edge: Option<u8>) {
        if let Some(existing) = self.connections.iter_mut().find(|c| c.node == node) {
            existing.cost = cost;
            if let Some(edge) = shape_edge {
                existing.shape_edge = edge;
            }
            return;
        }
        self.connections
            .push(Connection::new(node, cost, shape_edge.unwrap_or(NO_SHAPE_EDGE)));
    }

    pub(crate) fn remove_connection(&mut self, node: NodeIndex) -> bool {
        match self.connections.iter().position(|c| c.node == node) {
            Some(i) => {
                self.connections.remove(i);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_connections(&mut self, connections: Vec<Connection>) {
        self.connections = connections;
    }

    pub(crate) fn take_connections(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.connections)
    }

    /// Writes penalty and flags
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.penalty)?;
        writer.write_u32::<LittleEndian>(self.flags.bits())?;
        Ok(())
    }

    /// Reads penalty and flags written by [`GraphNode::write_to`]
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        self.penalty = reader.read_u32::<LittleEndian>()?;
        self.flags = NodeFlags::from_bits(reader.read_u32::<LittleEndian>()?);
        Ok(())
    }

    /// Writes the connection list; `-1` marks a node without connections
    pub fn write_references_to<W: Write, F>(&self, writer: &mut W, remap: F) -> Result<()>
    where
        F: Fn(NodeIndex) -> i32,
    {
        if self.connections.is_empty() {
            writer.write_i32::<LittleEndian>(-1)?;
            return Ok(());
        }
        writer.write_i32::<LittleEndian>(self.connections.len() as i32)?;
        for conn in &self.connections {
            writer.write_i32::<LittleEndian>(remap(conn.node))?;
            writer.write_u32::<LittleEndian>(conn.cost)?;
            writer.write_u8(conn.shape_edge)?;
        }
        Ok(())
    }

    /// Reads a connection list written by [`GraphNode::write_references_to`].
    ///
    /// Connections whose target cannot be resolved are dropped.
    pub fn read_references_from<R: Read, F>(&mut self, reader: &mut R, resolve: F) -> Result<()>
    where
        F: Fn(i32) -> Option<NodeIndex>,
    {
        let count = reader.read_i32::<LittleEndian>()?;
        self.connections.clear();
        if count < 0 {
            return Ok(());
        }
        self.connections.reserve(count as usize);
        for _ in 0..count {
            let target = reader.read_i32::<LittleEndian>()?;
            let cost = reader.read_u32::<LittleEndian>()?;
            let shape_edge = reader.read_u8()?;
            if let Some(node) = resolve(target) {
                self.connections.push(Connection::new(node, cost, shape_edge));
            }
        }
        Ok(())
    }
}

/// Owner of every node, with index recycling
#[derive(Debug, Default, Clone)]
pub struct NodeArena {
    nodes: Vec<GraphNode>,
    free: Vec<u32>,
    live_count: usize,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a node, reusing the most recently destroyed index if any
    pub fn allocate(&mut self, kind: NodeKind) -> Result<NodeIndex> {
        let index = if let Some(free) = self.free.pop() {
            let index = NodeIndex(free);
            self.nodes[free as usize] = GraphNode::new(index, kind);
            index
        } else {
            let next = self.nodes.len() as u32;
            if next > MAX_NODE_INDEX {
                return Err(Error::InvalidGraph(format!(
                    "too many nodes, the maximum is {}",
                    MAX_NODE_INDEX + 1
                )));
            }
            let index = NodeIndex(next);
            self.nodes.push(GraphNode::new(index, kind));
            index
        };
        self.live_count += 1;
        Ok(index)
    }

    pub fn get(&self, index: NodeIndex) -> Option<&GraphNode> {
        self.nodes.get(index.as_usize())
    }

    pub fn get_mut(&mut self, index: NodeIndex) -> Option<&mut GraphNode> {
        self.nodes.get_mut(index.as_usize())
    }

    /// Returns the node if the handle refers to a live node
    pub fn get_live(&self, index: NodeIndex) -> Option<&GraphNode> {
        self.get(index).filter(|n| !n.is_destroyed())
    }

    /// One past the highest index ever handed out
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode)> {
        self.nodes.iter().filter_map(|n| n.index().map(|i| (i, n)))
    }

    /// Adds a connection from `from` to `to`, updating cost in place if one exists
    pub fn add_connection(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        cost: u32,
        shape_edge: Option<u8>,
    ) -> Result<()> {
        if self.get_live(to).is_none() {
            return Err(Error::InvalidGraph(format!(
                "cannot connect {from} to destroyed or unknown node {to}"
            )));
        }
        match self.nodes.get_mut(from.as_usize()) {
            Some(node) if !node.is_destroyed() => {
                node.add_connection(to, cost, shape_edge);
                Ok(())
            }
            _ => Err(Error::InvalidGraph(format!(
                "cannot add a connection from destroyed or unknown node {from}"
            ))),
        }
    }

    /// Removes the connection `from -> to`. Returns false if it did not exist.
    pub fn remove_connection(&mut self, from: NodeIndex, to: NodeIndex) -> bool {
        self.nodes
            .get_mut(from.as_usize())
            .map(|n| n.remove_connection(to))
            .unwrap_or(false)
    }

    pub fn contains_connection(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.get(from).map(|n| n.contains_connection(to)).unwrap_or(false)
    }

    /// Removes every connection of `index`, and with `also_reverse` the
    /// connections pointing back at it from its neighbours
    pub fn clear_connections(&mut self, index: NodeIndex, also_reverse: bool) {
        let Some(node) = self.nodes.get_mut(index.as_usize()) else {
            return;
        };
        let connections = node.take_connections();
        if also_reverse {
            for conn in connections {
                if let Some(other) = self.nodes.get_mut(conn.node.as_usize()) {
                    other.remove_connection(index);
                }
            }
        }
    }

    /// Clears the node's connections in both directions, marks it destroyed
    /// and recycles its index
    pub fn destroy(&mut self, index: NodeIndex) {
        if self.get_live(index).is_none() {
            return;
        }
        self.clear_connections(index, true);
        let node = &mut self.nodes[index.as_usize()];
        node.identity.state = NodeState::Destroyed;
        node.identity.temporary_flag1 = false;
        node.identity.temporary_flag2 = false;
        self.free.push(index.0);
        self.live_count -= 1;
    }
}

impl Index<NodeIndex> for NodeArena {
    type Output = GraphNode;

    fn index(&self, index: NodeIndex) -> &GraphNode {
        &self.nodes[index.as_usize()]
    }
}

impl IndexMut<NodeIndex> for NodeArena {
    fn index_mut(&mut self, index: NodeIndex) -> &mut GraphNode {
        &mut self.nodes[index.as_usize()]
    }
}
