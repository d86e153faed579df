//! Owner of every graph and node
//!
//! [`NavData`] is the shared, read-mostly state that path searches run
//! against. Workers hold it behind a read lock; structural edits go through
//! `&mut NavData`, which the path processor only hands out while pathfinding
//! is paused.

use glam::Vec3;
use navgraph_common::{Error, Int3, Result};
use std::ops::{Deref, DerefMut};

use crate::config::EmbeddingSettings;
use crate::euclidean_embedding::EuclideanEmbedding;
use crate::graph_node::{GraphNode, NodeArena, NodeFlags, NodeIndex};
use crate::linecast::GraphHitInfo;
use crate::navmesh_graph::{NavmeshGraph, NavmeshGraphSettings};
use crate::nn_constraint::{NNConstraint, NNInfo};

/// Mutable view of the node arena handed out by [`NavData::nodes_mut`]
#[derive(Debug)]
pub struct NodesMut<'a> {
    data: &'a mut NavData,
}

impl Deref for NodesMut<'_> {
    type Target = NodeArena;

    fn deref(&self) -> &NodeArena {
        &self.data.nodes
    }
}

impl DerefMut for NodesMut<'_> {
    fn deref_mut(&mut self) -> &mut NodeArena {
        &mut self.data.nodes
    }
}

impl Drop for NodesMut<'_> {
    fn drop(&mut self) {
        self.data.flood_fill();
    }
}

/// Graphs, nodes and precomputed heuristic data
#[derive(Debug, Clone)]
pub struct NavData {
    graphs: Vec<NavmeshGraph>,
    nodes: NodeArena,
    embedding: EuclideanEmbedding,
    max_nearest_node_distance: f32,
}

impl Default for NavData {
    fn default() -> Self {
        Self::new()
    }
}

impl NavData {
    pub fn new() -> Self {
        Self {
            graphs: Vec::new(),
            nodes: NodeArena::new(),
            embedding: EuclideanEmbedding::default(),
            max_nearest_node_distance: 100.0,
        }
    }

    pub fn graphs(&self) -> &[NavmeshGraph] {
        &self.graphs
    }

    pub fn graph(&self, graph_index: u32) -> Option<&NavmeshGraph> {
        self.graphs.get(graph_index as usize)
    }

    pub fn nodes(&self) -> &NodeArena {
        &self.nodes
    }

    /// Direct access to the node arena for connection and flag edits.
    ///
    /// Connected components are recomputed when the returned guard is dropped.
    pub fn nodes_mut(&mut self) -> NodesMut<'_> {
        self.embedding.invalidate();
        NodesMut { data: self }
    }

    pub fn node(&self, index: NodeIndex) -> Option<&GraphNode> {
        self.nodes.get_live(index)
    }

    /// Graph owning the node
    pub fn graph_of(&self, index: NodeIndex) -> Option<&NavmeshGraph> {
        let node = self.nodes.get_live(index)?;
        self.graphs.get(node.graph_index() as usize)
    }

    pub fn max_nearest_node_distance(&self) -> f32 {
        self.max_nearest_node_distance
    }

    pub fn set_max_nearest_node_distance(&mut self, distance: f32) {
        self.max_nearest_node_distance = distance;
    }

    pub fn embedding(&self) -> &EuclideanEmbedding {
        &self.embedding
    }

    /// Adds an empty graph and returns its index
    pub fn add_graph(&mut self, settings: NavmeshGraphSettings) -> Result<u32> {
        let graph_index = self.graphs.len() as u32;
        if graph_index > NodeFlags::MAX_GRAPH_INDEX {
            return Err(Error::InvalidConfig(format!(
                "cannot add more than {} graphs",
                NodeFlags::MAX_GRAPH_INDEX + 1
            )));
        }
        self.graphs.push(NavmeshGraph::new(graph_index, settings)?);
        log::debug!("Added graph {graph_index}");
        Ok(graph_index)
    }

    fn graph_index_checked(&self, graph_index: u32) -> Result<usize> {
        if (graph_index as usize) < self.graphs.len() {
            Ok(graph_index as usize)
        } else {
            Err(Error::InvalidArgument(format!(
                "no graph with index {graph_index}"
            )))
        }
    }

    /// Replaces a tile using vertices given in world space
    pub fn add_tile(&mut self, graph_index: u32, x: i32, z: i32, verts: &[Vec3], tris: Vec<i32>) -> Result<()> {
        let gi = self.graph_index_checked(graph_index)?;
        let transform = *self.graphs[gi].transform();
        let verts_in_graph_space = verts
            .iter()
            .map(|&v| Int3::from_vec3(transform.inverse_transform(v)))
            .collect();
        self.replace_tile(graph_index, x, z, verts_in_graph_space, tris)
    }

    /// Replaces a tile using vertices given in graph space, then recomputes
    /// connected components
    pub fn replace_tile(
        &mut self,
        graph_index: u32,
        x: i32,
        z: i32,
        verts_in_graph_space: Vec<Int3>,
        tris: Vec<i32>,
    ) -> Result<()> {
        let gi = self.graph_index_checked(graph_index)?;
        self.graphs[gi].replace_tile(&mut self.nodes, x, z, verts_in_graph_space, tris)?;
        self.embedding.invalidate();
        self.flood_fill();
        Ok(())
    }

    /// Removes a single node from its tile and destroys it
    pub fn destroy_node(&mut self, index: NodeIndex) -> Result<()> {
        let node = self
            .nodes
            .get_live(index)
            .ok_or_else(|| Error::InvalidArgument(format!("node {index} is not alive")))?;
        let gi = node.graph_index() as usize;
        let tile_index = node
            .as_triangle()
            .map(|t| t.tile_index())
            .ok_or_else(|| Error::InvalidGraph(format!("node {index} has no tile")))?;

        let graph = self
            .graphs
            .get_mut(gi)
            .ok_or_else(|| Error::InvalidGraph(format!("node {index} references missing graph {gi}")))?;
        let tile = graph
            .tiles_mut()
            .get_mut(tile_index)
            .ok_or_else(|| Error::InvalidGraph(format!("node {index} references missing tile {tile_index}")))?;
        let slot = tile
            .nodes
            .iter()
            .position(|&n| n == index)
            .ok_or_else(|| Error::InvalidGraph(format!("node {index} is not stored in tile {tile_index}")))?;
        tile.nodes.remove(slot);
        tile.tris.drain(slot * 3..slot * 3 + 3);

        self.nodes.destroy(index);
        graph.rebuild_bb_tree(&self.nodes, tile_index);
        self.embedding.invalidate();
        self.flood_fill();
        Ok(())
    }

    /// Closest node to `position` over every graph the constraint allows.
    ///
    /// Each graph first reports its closest node regardless of the
    /// constraint. Only if the overall best node is unsuitable is a
    /// constrained search run on that graph. Results further away than the
    /// nearest node distance are rejected when the constraint asks for it.
    pub fn get_nearest(&self, position: Vec3, constraint: &NNConstraint) -> NNInfo {
        let mut best = NNInfo::default();
        let mut best_graph = None;
        let mut best_distance = f32::INFINITY;

        for graph in &self.graphs {
            if !constraint.suitable_graph(graph.graph_index()) {
                continue;
            }
            let info = graph.get_nearest(&self.nodes, position, Some(constraint));
            if info.node.is_none() {
                continue;
            }
            let distance = (info.position - position).length();
            if distance < best_distance {
                best_distance = distance;
                best = info;
                best_graph = Some(graph);
            }
        }

        let Some(graph) = best_graph else {
            return NNInfo::default();
        };

        let suitable = best
            .node
            .and_then(|n| self.nodes.get_live(n))
            .map(|n| constraint.suitable(n))
            .unwrap_or(false);
        if !suitable {
            best = graph.get_nearest_force(&self.nodes, position, Some(constraint));
        }

        let Some(node) = best.node.and_then(|n| self.nodes.get_live(n)) else {
            return NNInfo::default();
        };
        if !constraint.suitable(node) {
            return NNInfo::default();
        }
        let max = self.max_nearest_node_distance;
        if constraint.constrain_distance && (best.position - position).length_squared() > max * max {
            return NNInfo::default();
        }
        best
    }

    /// Assigns connected component ids to every walkable node.
    ///
    /// Unwalkable nodes get area 0. Components are numbered from 1 and the
    /// numbering saturates at [`NodeFlags::MAX_AREA_INDEX`].
    pub fn flood_fill(&mut self) {
        let all: Vec<NodeIndex> = self.nodes.iter().map(|(index, _)| index).collect();
        for &index in &all {
            self.nodes[index].set_area(0);
        }

        let mut area = 0;
        let mut warned = false;
        let mut stack = Vec::new();
        for &seed in &all {
            let node = &self.nodes[seed];
            if !node.walkable() || node.area() != 0 {
                continue;
            }
            if area < NodeFlags::MAX_AREA_INDEX {
                area += 1;
            } else if !warned {
                log::warn!(
                    "Too many areas, at most {} are supported. Some disconnected regions will share an area.",
                    NodeFlags::MAX_AREA_INDEX
                );
                warned = true;
            }

            self.nodes[seed].set_area(area);
            stack.push(seed);
            while let Some(current) = stack.pop() {
                for i in 0..self.nodes[current].connections().len() {
                    let other = self.nodes[current].connections()[i].node;
                    let Some(node) = self.nodes.get_live(other) else {
                        continue;
                    };
                    if node.walkable() && node.area() != area {
                        self.nodes[other].set_area(area);
                        stack.push(other);
                    }
                }
            }
        }
        log::debug!("Flood fill found {area} areas");
    }

    /// Portal between two connected nodes of the same graph
    pub fn portal(&self, from: NodeIndex, to: NodeIndex) -> Option<(Vec3, Vec3)> {
        let graph = self.graph_of(from)?;
        if self.nodes.get_live(to)?.graph_index() != graph.graph_index() {
            return None;
        }
        graph.portal(&self.nodes, from, to)
    }

    /// Linecast on the graph containing the node closest to `origin`
    pub fn linecast(&self, origin: Vec3, end: Vec3, trace: Option<&mut Vec<NodeIndex>>) -> Result<(bool, GraphHitInfo)> {
        let start = self.get_nearest(origin, &NNConstraint::none());
        match start.node.and_then(|n| self.graph_of(n)) {
            Some(graph) => graph.linecast(&self.nodes, origin, end, start.node, trace),
            None => {
                log::error!("Could not find a valid node to start from");
                let hit = GraphHitInfo {
                    origin,
                    point: origin,
                    ..Default::default()
                };
                Ok((true, hit))
            }
        }
    }

    /// Changes how heuristic pivots are chosen and recomputes the embedding
    pub fn set_embedding_settings(&mut self, settings: EmbeddingSettings) -> Result<()> {
        settings.validate()?;
        self.embedding = EuclideanEmbedding::new(settings);
        self.embedding.recalculate(&self.nodes);
        Ok(())
    }

    /// Recomputes the embedding if a graph edit invalidated it
    pub fn refresh_embedding(&mut self) {
        if self.embedding.is_dirty() {
            self.embedding.recalculate(&self.nodes);
        }
    }

    pub(crate) fn from_parts(graphs: Vec<NavmeshGraph>, nodes: NodeArena, max_nearest_node_distance: f32) -> Self {
        Self {
            graphs,
            nodes,
            embedding: EuclideanEmbedding::default(),
            max_nearest_node_distance,
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<NavmeshGraph>, NodeArena, EuclideanEmbedding) {
        (self.graphs, self.nodes, self.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_graphs() -> Result<NavData> {
        let mut data = NavData::new();
        for offset in [0.0, 100.0] {
            let gi = data.add_graph(NavmeshGraphSettings {
                tile_world_size_x: 4.0,
                tile_world_size_z: 4.0,
                origin: Vec3::new(offset, 0.0, 0.0),
                ..Default::default()
            })?;
            let verts = [
                Vec3::new(offset, 0.0, 0.0),
                Vec3::new(offset, 0.0, 4.0),
                Vec3::new(offset + 4.0, 0.0, 4.0),
                Vec3::new(offset + 4.0, 0.0, 0.0),
            ];
            data.add_tile(gi, 0, 0, &verts, vec![0, 1, 2, 0, 2, 3])?;
        }
        Ok(data)
    }

    #[test]
    fn test_get_nearest_picks_closest_graph() -> Result<()> {
        let data = two_graphs()?;
        let info = data.get_nearest(Vec3::new(101.0, 0.0, 1.0), &NNConstraint::default());
        let node = info.node.expect("node");
        assert_eq!(data.nodes()[node].graph_index(), 1);

        let mut mask = NNConstraint::default();
        mask.graph_mask = 1;
        let info = data.get_nearest(Vec3::new(101.0, 0.0, 1.0), &mask);
        // Graph 0 is 97 units away, within the default nearest node distance
        assert_eq!(data.nodes()[info.node.expect("node")].graph_index(), 0);
        Ok(())
    }

    #[test]
    fn test_get_nearest_respects_max_distance() -> Result<()> {
        let mut data = two_graphs()?;
        data.set_max_nearest_node_distance(1.0);
        let far = Vec3::new(50.0, 0.0, 2.0);
        assert!(data.get_nearest(far, &NNConstraint::default()).node.is_none());
        assert!(data.get_nearest(far, &NNConstraint::none()).node.is_some());
        Ok(())
    }

    #[test]
    fn test_get_nearest_falls_back_to_constrained_search() -> Result<()> {
        let mut data = two_graphs()?;
        let p = Vec3::new(1.0, 0.0, 3.0);
        let closest = data.get_nearest(p, &NNConstraint::none()).node.expect("node");
        data.nodes_mut()[closest].set_walkable(false);

        let info = data.get_nearest(p, &NNConstraint::default());
        let node = info.node.expect("node");
        assert_ne!(node, closest);
        assert_eq!(data.nodes()[node].graph_index(), 0);
        Ok(())
    }

    #[test]
    fn test_flood_fill_separates_components() -> Result<()> {
        let data = two_graphs()?;
        let areas: Vec<u32> = data.nodes().iter().map(|(_, n)| n.area()).collect();
        assert_eq!(areas, vec![1, 1, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_flood_fill_skips_unwalkable() -> Result<()> {
        let mut data = two_graphs()?;
        let first = data.graphs()[0].tiles()[0].nodes[0];
        data.nodes_mut()[first].set_walkable(false);
        assert_eq!(data.nodes()[first].area(), 0);
        Ok(())
    }

    #[test]
    fn test_connection_edits_recompute_areas() -> Result<()> {
        let mut data = two_graphs()?;
        let [a, b] = [0, 1].map(|i| data.graphs()[0].tiles()[0].nodes[i]);
        assert_eq!(data.nodes()[a].area(), data.nodes()[b].area());

        {
            let mut nodes = data.nodes_mut();
            assert!(nodes.remove_connection(a, b));
            assert!(nodes.remove_connection(b, a));
        }
        assert_ne!(data.nodes()[a].area(), data.nodes()[b].area());

        let other = data.graphs()[1].tiles()[0].nodes[0];
        data.nodes_mut().add_connection(a, other, 1000, None)?;
        data.nodes_mut().add_connection(other, a, 1000, None)?;
        assert_eq!(data.nodes()[a].area(), data.nodes()[other].area());
        assert_ne!(data.nodes()[a].area(), data.nodes()[b].area());
        Ok(())
    }

    #[test]
    fn test_destroy_node() -> Result<()> {
        let mut data = two_graphs()?;
        let tile_nodes = data.graphs()[0].tiles()[0].nodes.clone();
        data.destroy_node(tile_nodes[0])?;

        assert!(data.node(tile_nodes[0]).is_none());
        assert!(data.nodes()[tile_nodes[1]].connections().is_empty());
        let tile = &data.graphs()[0].tiles()[0];
        assert_eq!(tile.nodes, vec![tile_nodes[1]]);
        assert_eq!(tile.tris.len(), 3);
        assert!(data.destroy_node(tile_nodes[0]).is_err());
        Ok(())
    }
}
