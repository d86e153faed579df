//! Tiled navmesh graph
//!
//! A [`NavmeshGraph`] owns a grid of [`NavmeshTile`]s and a transform between
//! graph space and world space. Nodes themselves live in the shared
//! [`NodeArena`], which is passed explicitly to every operation that reads or
//! modifies them.
//!
//! Tile construction follows a fixed order: vertices are registered on the
//! tile, [`NavmeshGraph::create_nodes`] builds one node per triangle,
//! [`NavmeshGraph::create_node_connections`] links nodes inside the tile and
//! [`NavmeshGraph::connect_tile_with_neighbours`] stitches the tile to the
//! tiles around it.

use glam::Vec3;
use navgraph_common::{is_clockwise_xz, sqr_distance_segment_segment, Error, Int2, Int3, Result};
use std::collections::HashMap;

use crate::bb_tree::{BBTreeItem, ClosestNode, IntRect};
use crate::graph_node::{Connection, NodeArena, NodeFlags, NodeIndex, NodeKind};
use crate::graph_transform::GraphTransform;
use crate::navmesh_tile::{
    tile_index_of, NavmeshTile, MAX_TILE_VERTICES, TILE_INDEX_MASK, TILE_INDEX_OFFSET,
};
use crate::nn_constraint::{NNConstraint, NNInfo};
use crate::triangle_mesh_node::{MeshNode, TriangleMeshNode};

/// Settings of a navmesh graph, stored as JSON in graph files
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshGraphSettings {
    /// Number of tiles along the x axis
    pub tile_x_count: i32,
    /// Number of tiles along the z axis
    pub tile_z_count: i32,
    /// Size of a tile along x, in world units
    pub tile_world_size_x: f32,
    /// Size of a tile along z, in world units
    pub tile_world_size_z: f32,
    /// World position of the graph space origin
    pub origin: Vec3,
    /// Rotation of the graph around the y axis, in degrees
    pub rotation_y: f32,
    /// Border edges of adjacent tiles closer than this are connected even if
    /// their vertices do not match exactly
    pub max_tile_connection_edge_distance: f32,
    /// Measure nearest node distances on the XZ plane only
    pub nearest_search_only_xz: bool,
    /// Penalty given to every new node
    pub initial_penalty: u32,
}

impl Default for NavmeshGraphSettings {
    fn default() -> Self {
        Self {
            tile_x_count: 1,
            tile_z_count: 1,
            tile_world_size_x: 32.0,
            tile_world_size_z: 32.0,
            origin: Vec3::ZERO,
            rotation_y: 0.0,
            max_tile_connection_edge_distance: 0.0,
            nearest_search_only_xz: false,
            initial_penalty: 0,
        }
    }
}

impl NavmeshGraphSettings {
    pub fn validate(&self) -> Result<()> {
        if self.tile_x_count < 0 || self.tile_z_count < 0 {
            return Err(Error::InvalidConfig(
                "tile counts must not be negative".to_string(),
            ));
        }
        if (self.tile_x_count as i64) * (self.tile_z_count as i64) > TILE_INDEX_MASK as i64 + 1 {
            return Err(Error::InvalidConfig(format!(
                "too many tiles ({}x{}), at most {} are supported",
                self.tile_x_count,
                self.tile_z_count,
                TILE_INDEX_MASK + 1
            )));
        }
        if self.tile_world_size_x <= 0.0 || self.tile_world_size_z <= 0.0 {
            return Err(Error::InvalidConfig(
                "tile world sizes must be positive".to_string(),
            ));
        }
        if self.max_tile_connection_edge_distance < 0.0 {
            return Err(Error::InvalidConfig(
                "max_tile_connection_edge_distance must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn transform(&self) -> GraphTransform {
        GraphTransform::from_origin_rotation(self.origin, self.rotation_y)
    }
}

/// A navmesh graph made of square tiles
#[derive(Debug, Clone)]
pub struct NavmeshGraph {
    graph_index: u32,
    settings: NavmeshGraphSettings,
    tiles: Vec<NavmeshTile>,
    transform: GraphTransform,
}

impl NavmeshGraph {
    /// Creates a graph with every tile empty
    pub fn new(graph_index: u32, settings: NavmeshGraphSettings) -> Result<Self> {
        settings.validate()?;
        if graph_index > NodeFlags::MAX_GRAPH_INDEX {
            return Err(Error::InvalidConfig(format!(
                "graph index {graph_index} exceeds the maximum of {}",
                NodeFlags::MAX_GRAPH_INDEX
            )));
        }
        let transform = settings.transform();
        let mut graph = Self {
            graph_index,
            settings,
            tiles: Vec::new(),
            transform,
        };
        graph.fill_with_empty_tiles();
        Ok(graph)
    }

    pub fn graph_index(&self) -> u32 {
        self.graph_index
    }

    pub fn settings(&self) -> &NavmeshGraphSettings {
        &self.settings
    }

    pub fn transform(&self) -> &GraphTransform {
        &self.transform
    }

    pub fn tile_x_count(&self) -> i32 {
        self.settings.tile_x_count
    }

    pub fn tile_z_count(&self) -> i32 {
        self.settings.tile_z_count
    }

    pub fn tile_world_size_x(&self) -> f32 {
        self.settings.tile_world_size_x
    }

    pub fn tile_world_size_z(&self) -> f32 {
        self.settings.tile_world_size_z
    }

    pub fn tiles(&self) -> &[NavmeshTile] {
        &self.tiles
    }

    pub fn tile_index(&self, x: i32, z: i32) -> usize {
        (x + z * self.settings.tile_x_count) as usize
    }

    /// Tile at the given tile coordinates
    pub fn tile(&self, x: i32, z: i32) -> Option<&NavmeshTile> {
        if x < 0 || z < 0 || x >= self.tile_x_count() || z >= self.tile_z_count() {
            return None;
        }
        self.tiles.get(self.tile_index(x, z))
    }

    /// Tile coordinates of a tile index
    pub fn tile_coordinates_of_index(&self, tile_index: usize) -> (i32, i32) {
        let z = tile_index as i32 / self.settings.tile_x_count;
        let x = tile_index as i32 - z * self.settings.tile_x_count;
        (x, z)
    }

    /// Tile coordinates containing a world position; may be out of bounds
    pub fn tile_coordinates(&self, position: Vec3) -> Int2 {
        let local = self.transform.inverse_transform(position);
        Int2::new(
            (local.x / self.settings.tile_world_size_x) as i32,
            (local.z / self.settings.tile_world_size_z) as i32,
        )
    }

    /// World-space coordinates of a vertex reference
    pub fn vertex(&self, vertex_ref: i32) -> Int3 {
        self.tiles[tile_index_of(vertex_ref)].vertex(vertex_ref)
    }

    /// Graph-space coordinates of a vertex reference
    pub fn vertex_in_graph_space(&self, vertex_ref: i32) -> Int3 {
        self.tiles[tile_index_of(vertex_ref)].vertex_in_graph_space(vertex_ref)
    }

    /// Every node of every tile, in tile order
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.tiles.iter().flat_map(|t| t.nodes.iter().copied())
    }

    /// Resets the tile grid to empty tiles. Nodes of previous tiles are not
    /// destroyed; use [`NavmeshGraph::clear_tiles`] for that.
    pub fn fill_with_empty_tiles(&mut self) {
        let (tx, tz) = (self.tile_x_count(), self.tile_z_count());
        self.tiles = (0..tz)
            .flat_map(|z| (0..tx).map(move |x| NavmeshTile::new_empty(x, z)))
            .collect();
    }

    /// Destroys every node and empties all tiles
    pub fn clear_tiles(&mut self, nodes: &mut NodeArena) {
        for tile in &self.tiles {
            for &node in &tile.nodes {
                nodes.destroy(node);
            }
        }
        self.fill_with_empty_tiles();
    }

    /// Creates one node per triangle of the tile at `tile_index`.
    ///
    /// `buffer` must hold at least `tris.len() / 3` slots. Empty slots receive
    /// newly allocated nodes; filled slots are reset and reused. The tile's
    /// vertex arrays must already be registered so the winding can be checked.
    pub fn create_nodes(
        &self,
        nodes: &mut NodeArena,
        buffer: &mut [Option<NodeIndex>],
        tris: &[i32],
        tile_index: usize,
        graph_index: u32,
    ) -> Result<()> {
        if buffer.len() < tris.len() / 3 {
            return Err(Error::InvalidArgument(
                "buffer must be at least as large as tris.len() / 3".to_string(),
            ));
        }
        let tile_bits = (tile_index as i32) << TILE_INDEX_OFFSET;

        for (i, slot) in buffer.iter_mut().enumerate().take(tris.len() / 3) {
            let mut tri = TriangleMeshNode::new(
                tris[i * 3] | tile_bits,
                tris[i * 3 + 1] | tile_bits,
                tris[i * 3 + 2] | tile_bits,
            );

            // Clockwise in graph space; world space may be mirrored by the transform
            let [a, b, c] = tri.vertices_in_graph_space(self);
            if !is_clockwise_xz(a, b, c) {
                tri.swap_winding();
            }

            let index = match *slot {
                Some(existing) if nodes.get_live(existing).is_some() => {
                    nodes.clear_connections(existing, true);
                    nodes[existing].kind = NodeKind::Triangle(tri);
                    existing
                }
                _ => nodes.allocate(NodeKind::Triangle(tri))?,
            };

            let node = &mut nodes[index];
            node.set_walkable(true);
            node.set_tag(0);
            node.set_penalty(self.settings.initial_penalty);
            node.set_graph_index(graph_index);
            node.position = tri.centroid(self);
            *slot = Some(index);
        }
        Ok(())
    }

    /// Connects nodes of the same tile that share an edge.
    ///
    /// Any existing connections of the nodes are replaced.
    pub fn create_node_connections(&self, nodes: &mut NodeArena, tile_nodes: &[NodeIndex]) {
        let triangle = |nodes: &NodeArena, index: NodeIndex| match nodes[index].kind {
            NodeKind::Triangle(tri) => tri,
        };

        // Edge (first vertex, second vertex) -> node owning that directed edge
        let mut edge_map: HashMap<Int2, usize> = HashMap::with_capacity(tile_nodes.len() * 3);
        for (i, &index) in tile_nodes.iter().enumerate() {
            let tri = triangle(nodes, index);
            let count = tri.vertex_count();
            for a in 0..count {
                let key = Int2::new(tri.vertex_index(a), tri.vertex_index((a + 1) % count));
                // Duplicate edges only happen for degenerate input, keep the first
                edge_map.entry(key).or_insert(i);
            }
        }

        for &index in tile_nodes {
            let tri = triangle(nodes, index);
            let count = tri.vertex_count();
            let mut connections = Vec::with_capacity(count);

            for a in 0..count {
                let first = tri.vertex_index(a);
                let second = tri.vertex_index((a + 1) % count);
                let Some(&other_slot) = edge_map.get(&Int2::new(second, first)) else {
                    continue;
                };
                let other_index = tile_nodes[other_slot];
                let other = triangle(nodes, other_index);
                let other_count = other.vertex_count();
                for b in 0..other_count {
                    if other.vertex_index(b) == second
                        && other.vertex_index((b + 1) % other_count) == first
                    {
                        let cost = (nodes[index].position - nodes[other_index].position)
                            .cost_magnitude() as u32;
                        connections.push(Connection::new(other_index, cost, a as u8));
                        break;
                    }
                }
            }
            nodes[index].set_connections(connections);
        }
    }

    /// Creates connections between the nodes along the shared border of two
    /// adjacent tiles
    pub fn connect_tiles(&self, nodes: &mut NodeArena, tile1: usize, tile2: usize) -> Result<()> {
        let (Some(t1), Some(t2)) = (self.tiles.get(tile1), self.tiles.get(tile2)) else {
            return Err(Error::InvalidArgument(format!(
                "tile index out of range ({tile1}, {tile2})"
            )));
        };

        let t1x = t1.x.clamp(0, self.tile_x_count() - 1);
        let t1z = t1.z.clamp(0, self.tile_z_count() - 1);
        let t2x = t2.x.clamp(0, self.tile_x_count() - 1);
        let t2z = t2.z.clamp(0, self.tile_z_count() - 1);

        // The axis perpendicular to the shared border and the axis along it
        let (coord, altcoord, t1coord, t2coord, tile_world_size) = if t1x == t2x {
            (2, 0, t1z, t2z, self.tile_world_size_z())
        } else if t1z == t2z {
            (0, 2, t1x, t2x, self.tile_world_size_x())
        } else {
            return Err(Error::InvalidArgument(
                "tiles are not adjacent (neither x or z coordinates match)".to_string(),
            ));
        };

        if (t1coord - t2coord).abs() != 1 {
            return Err(Error::InvalidArgument(format!(
                "tiles are not adjacent (tile coordinates must differ by exactly 1, got '{t1coord}' and '{t2coord}')"
            )));
        }

        let midpoint = (t1coord.max(t2coord) as f64 * tile_world_size as f64 * 1000.0).round() as i32;
        let max_distance = self.settings.max_tile_connection_edge_distance;
        let max_sqr_distance = max_distance * max_distance;

        let border_edges = |tile: &NavmeshTile| -> Result<Vec<(NodeIndex, u8, Int3, Int3, i32, i32)>> {
            let mut edges = Vec::new();
            for &index in &tile.nodes {
                let node = &nodes[index];
                if node.graph_index() != self.graph_index {
                    return Err(Error::InvalidGraph(format!(
                        "node {index} belongs to graph {} but is stored in graph {}",
                        node.graph_index(),
                        self.graph_index
                    )));
                }
                let NodeKind::Triangle(tri) = node.kind;
                let count = tri.vertex_count();
                for a in 0..count {
                    let v1 = tri.vertex_in_graph_space(self, a);
                    let v2 = tri.vertex_in_graph_space(self, (a + 1) % count);
                    if (v1[coord] - midpoint).abs() < 2 && (v2[coord] - midpoint).abs() < 2 {
                        let minalt = v1[altcoord].min(v2[altcoord]);
                        let maxalt = v1[altcoord].max(v2[altcoord]);
                        // Degenerate edge
                        if minalt == maxalt {
                            continue;
                        }
                        edges.push((index, a as u8, v1, v2, minalt, maxalt));
                    }
                }
            }
            Ok(edges)
        };

        let edges1 = border_edges(t1)?;
        let edges2 = border_edges(t2)?;

        let mut new_connections = Vec::new();
        for &(node_a, a, a1, a2, minalt, maxalt) in &edges1 {
            for &(node_b, b, b1, b2, minalt2, maxalt2) in &edges2 {
                if !(maxalt > minalt2 && minalt < maxalt2) {
                    continue;
                }
                let matches = (a1 == b1 && a2 == b2)
                    || (a1 == b2 && a2 == b1)
                    || sqr_distance_segment_segment(a1.to_vec3(), a2.to_vec3(), b1.to_vec3(), b2.to_vec3())
                        < max_sqr_distance;
                if matches {
                    let cost = (nodes[node_a].position - nodes[node_b].position).cost_magnitude() as u32;
                    new_connections.push((node_a, node_b, cost, a, b));
                }
            }
        }

        for (node_a, node_b, cost, a, b) in new_connections {
            nodes.add_connection(node_a, node_b, cost, Some(a))?;
            nodes.add_connection(node_b, node_a, cost, Some(b))?;
        }
        Ok(())
    }

    /// Connects a tile to its four orthogonal neighbours
    pub fn connect_tile_with_neighbours(&self, nodes: &mut NodeArena, tile_index: usize) -> Result<()> {
        let tile = self
            .tiles
            .get(tile_index)
            .ok_or_else(|| Error::InvalidArgument(format!("tile index {tile_index} out of range")))?;
        if tile.w != 1 || tile.d != 1 {
            return Err(Error::InvalidTile(
                "tile widths or depths other than 1 are not supported".to_string(),
            ));
        }

        for (dx, dz) in [(0, -1), (-1, 0), (1, 0), (0, 1)] {
            let x = tile.x + dx;
            let z = tile.z + dz;
            if x < 0 || z < 0 || x >= self.tile_x_count() || z >= self.tile_z_count() {
                continue;
            }
            self.connect_tiles(nodes, self.tile_index(x, z), tile_index)?;
        }
        Ok(())
    }

    /// Replaces the contents of a tile and reconnects it to its neighbours.
    ///
    /// Vertices are given in graph space. Nodes of the previous tile contents
    /// are destroyed and their indices recycled.
    pub fn replace_tile(
        &mut self,
        nodes: &mut NodeArena,
        x: i32,
        z: i32,
        verts_in_graph_space: Vec<Int3>,
        tris: Vec<i32>,
    ) -> Result<()> {
        if x < 0 || z < 0 || x >= self.tile_x_count() || z >= self.tile_z_count() {
            return Err(Error::InvalidTile(format!(
                "tile ({x}, {z}) is outside the {}x{} grid",
                self.tile_x_count(),
                self.tile_z_count()
            )));
        }
        if tris.len() % 3 != 0 {
            return Err(Error::InvalidTile(
                "triangle index count must be a multiple of 3".to_string(),
            ));
        }
        if verts_in_graph_space.len() > MAX_TILE_VERTICES {
            return Err(Error::InvalidTile(format!(
                "too many vertices in the tile ({}), at most {MAX_TILE_VERTICES} are supported",
                verts_in_graph_space.len()
            )));
        }
        if let Some(&bad) = tris.iter().find(|&&t| t < 0 || t as usize >= verts_in_graph_space.len()) {
            return Err(Error::InvalidTile(format!(
                "triangle references vertex {bad} but the tile has {} vertices",
                verts_in_graph_space.len()
            )));
        }

        let tile_index = self.tile_index(x, z);
        for node in std::mem::take(&mut self.tiles[tile_index].nodes) {
            nodes.destroy(node);
        }

        let verts = verts_in_graph_space
            .iter()
            .map(|&v| self.transform.transform_int3(v))
            .collect();
        self.tiles[tile_index] = NavmeshTile {
            x,
            z,
            w: 1,
            d: 1,
            tris,
            verts,
            verts_in_graph_space,
            nodes: Vec::new(),
            bb_tree: Default::default(),
        };

        let tris = std::mem::take(&mut self.tiles[tile_index].tris);
        let mut buffer = vec![None; tris.len() / 3];
        let created = self.create_nodes(nodes, &mut buffer, &tris, tile_index, self.graph_index);
        self.tiles[tile_index].tris = tris;
        created?;

        let tile_nodes: Vec<NodeIndex> = buffer.into_iter().flatten().collect();
        self.create_node_connections(nodes, &tile_nodes);
        self.tiles[tile_index].nodes = tile_nodes;
        self.rebuild_bb_tree(nodes, tile_index);
        self.connect_tile_with_neighbours(nodes, tile_index)?;

        log::debug!(
            "Replaced tile ({x}, {z}) of graph {} with {} nodes",
            self.graph_index,
            self.tiles[tile_index].nodes.len()
        );
        Ok(())
    }

    /// Rebuilds the spatial index of a tile from its nodes' world vertices
    pub fn rebuild_bb_tree(&mut self, nodes: &NodeArena, tile_index: usize) {
        let items: Vec<BBTreeItem> = self.tiles[tile_index]
            .nodes
            .iter()
            .map(|&index| {
                let NodeKind::Triangle(tri) = nodes[index].kind;
                let verts = tri.vertices(self);
                BBTreeItem {
                    node: index,
                    rect: IntRect::from_points(&verts),
                    position: nodes[index].position.xz(),
                }
            })
            .collect();
        self.tiles[tile_index].bb_tree.rebuild_from(&items);
    }

    /// Portal between two connected nodes of this graph, as (left, right)
    /// seen when moving from `from` to `to`.
    ///
    /// Returns `None` if the connection does not run along a shared edge.
    pub fn portal(&self, nodes: &NodeArena, from: NodeIndex, to: NodeIndex) -> Option<(Vec3, Vec3)> {
        let from_node = nodes.get_live(from)?;
        let to_node = nodes.get_live(to)?;
        if from_node.graph_index() != self.graph_index || to_node.graph_index() != self.graph_index {
            return None;
        }
        let edge = from_node.connection_to(to)?.shape_edge;
        if edge as usize >= 3 {
            return None;
        }
        let NodeKind::Triangle(tri_a) = from_node.kind;
        let NodeKind::Triangle(tri_b) = to_node.kind;

        let mut left = tri_a.vertex_in_graph_space(self, edge as usize);
        let mut right = tri_a.vertex_in_graph_space(self, (edge as usize + 1) % 3);

        let tile_a = tri_a.tile_index();
        let tile_b = tri_b.tile_index();
        if tile_a != tile_b {
            // Border edges of different tiles may only partially overlap, clamp
            // the portal to the common part
            let (x1, z1) = self.tile_coordinates_of_index(tile_a);
            let (x2, z2) = self.tile_coordinates_of_index(tile_b);
            let coord = if (x1 - x2).abs() == 1 {
                2
            } else if (z1 - z2).abs() == 1 {
                0
            } else {
                log::error!("Tiles not adjacent ({x1}, {z1}) ({x2}, {z2})");
                return None;
            };

            if let Some(back) = to_node.connection_to(from).map(|c| c.shape_edge) {
                if back as usize >= 3 {
                    log::error!("Connection {from} -> {to} uses an edge in one direction only");
                    return None;
                }
                let b1 = tri_b.vertex_in_graph_space(self, back as usize);
                let b2 = tri_b.vertex_in_graph_space(self, (back as usize + 1) % 3);
                let mincoord = left[coord].min(right[coord]).max(b1[coord].min(b2[coord]));
                let maxcoord = left[coord].max(right[coord]).min(b1[coord].max(b2[coord]));
                if left[coord] < right[coord] {
                    left[coord] = mincoord;
                    right[coord] = maxcoord;
                } else {
                    left[coord] = maxcoord;
                    right[coord] = mincoord;
                }
            }
        }

        Some((
            self.transform.transform(left.to_vec3()),
            self.transform.transform(right.to_vec3()),
        ))
    }

    /// Closest node to `position` without any filtering other than measuring
    /// on XZ when the constraint asks for it
    pub fn get_nearest(&self, nodes: &NodeArena, position: Vec3, constraint: Option<&NNConstraint>) -> NNInfo {
        let xz_only = NNConstraint {
            distance_xz: true,
            ..NNConstraint::none()
        };
        let unconstrained = match constraint {
            Some(c) if c.distance_xz => Some(&xz_only),
            _ => None,
        };
        self.get_nearest_force(nodes, position, unconstrained)
    }

    /// Closest node to `position` that satisfies `constraint`.
    ///
    /// Tiles are visited in a diamond pattern around the tile containing the
    /// position, stopping once no unvisited tile can hold a closer node.
    pub fn get_nearest_force(&self, nodes: &NodeArena, position: Vec3, constraint: Option<&NNConstraint>) -> NNInfo {
        if self.tiles.is_empty() {
            return NNInfo::default();
        }

        let coords = self.tile_coordinates(position);
        let tx = coords.x.clamp(0, self.tile_x_count() - 1);
        let tz = coords.y.clamp(0, self.tile_z_count() - 1);
        let wmax = self.tile_x_count() + self.tile_z_count();
        let max_tile_size = self.tile_world_size_x().max(self.tile_world_size_z());

        let xz_search = self.settings.nearest_search_only_xz || constraint.map(|c| c.distance_xz).unwrap_or(false);
        let mut best = ClosestNode::default();
        let mut best_distance = f32::INFINITY;

        let evaluate = |index: NodeIndex| -> Option<Vec3> {
            let node = nodes.get_live(index)?;
            if let Some(c) = constraint {
                if !c.suitable(node) {
                    return None;
                }
            }
            let NodeKind::Triangle(tri) = node.kind;
            Some(if xz_search {
                tri.closest_point_on_node_xz(self, position)
            } else {
                tri.closest_point_on_node(self, position)
            })
        };

        for w in 0..wmax {
            if best_distance < (w - 2) as f32 * max_tile_size {
                break;
            }
            let zmax = (w + tz + 1).min(self.tile_z_count());
            for z in (tz - w).max(0)..zmax {
                let original_dx = (w - (z - tz).abs()).abs();
                let mut dx = original_dx;
                loop {
                    let x = tx - dx;
                    if x >= 0 && x < self.tile_x_count() {
                        let tree = &self.tiles[self.tile_index(x, z)].bb_tree;
                        if xz_search {
                            tree.query_closest_xz(position, &mut best_distance, &mut best, evaluate);
                        } else {
                            tree.query_closest(position, &mut best_distance, &mut best, evaluate);
                        }
                    }
                    dx = -dx;
                    if dx == original_dx {
                        break;
                    }
                }
            }
        }

        NNInfo {
            node: best.node,
            position: best.position,
        }
    }

    /// Node containing the world position when seen from above
    pub fn point_on_navmesh(&self, nodes: &NodeArena, position: Vec3, constraint: Option<&NNConstraint>) -> Option<NodeIndex> {
        let coords = self.tile_coordinates(position);
        let tile = self.tile(coords.x, coords.y)?;
        let local = Int3::from_vec3(self.transform.inverse_transform(position));
        tile.bb_tree.query_inside(position, |index| {
            let Some(node) = nodes.get_live(index) else {
                return false;
            };
            if constraint.map(|c| !c.suitable(node)).unwrap_or(false) {
                return false;
            }
            let NodeKind::Triangle(tri) = node.kind;
            tri.contains_point_in_graph_space(self, local)
        })
    }

    /// Recomputes the cost of every connection from node positions
    pub fn recalculate_connection_costs(&self, nodes: &mut NodeArena) {
        let all: Vec<NodeIndex> = self.nodes().collect();
        for index in all {
            let position = nodes[index].position;
            let updated: Vec<Connection> = nodes[index]
                .connections()
                .iter()
                .map(|c| {
                    let cost = nodes
                        .get_live(c.node)
                        .map(|other| (position - other.position).cost_magnitude() as u32)
                        .unwrap_or(c.cost);
                    Connection::new(c.node, cost, c.shape_edge)
                })
                .collect();
            nodes[index].set_connections(updated);
        }
    }

    pub(crate) fn tiles_mut(&mut self) -> &mut Vec<NavmeshTile> {
        &mut self.tiles
    }

    pub(crate) fn set_settings(&mut self, settings: NavmeshGraphSettings) -> Result<()> {
        settings.validate()?;
        self.transform = settings.transform();
        self.settings = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(tiles_x: i32, tiles_z: i32) -> NavmeshGraphSettings {
        NavmeshGraphSettings {
            tile_x_count: tiles_x,
            tile_z_count: tiles_z,
            tile_world_size_x: 4.0,
            tile_world_size_z: 4.0,
            ..Default::default()
        }
    }

    /// Two triangles covering the whole tile, vertices in graph space
    fn square_tile(x: i32, z: i32) -> (Vec<Int3>, Vec<i32>) {
        let (x0, z0) = (x * 4000, z * 4000);
        let verts = vec![
            Int3::new(x0, 0, z0),
            Int3::new(x0, 0, z0 + 4000),
            Int3::new(x0 + 4000, 0, z0 + 4000),
            Int3::new(x0 + 4000, 0, z0),
        ];
        (verts, vec![0, 1, 2, 0, 2, 3])
    }

    fn build(tiles_x: i32, tiles_z: i32) -> Result<(NavmeshGraph, NodeArena)> {
        let mut graph = NavmeshGraph::new(0, settings(tiles_x, tiles_z))?;
        let mut nodes = NodeArena::new();
        for z in 0..tiles_z {
            for x in 0..tiles_x {
                let (verts, tris) = square_tile(x, z);
                graph.replace_tile(&mut nodes, x, z, verts, tris)?;
            }
        }
        Ok((graph, nodes))
    }

    #[test]
    fn test_create_nodes_enforces_clockwise_winding() -> Result<()> {
        let mut graph = NavmeshGraph::new(0, settings(1, 1))?;
        let mut nodes = NodeArena::new();
        // Counter-clockwise input
        let verts = vec![Int3::new(0, 0, 0), Int3::new(4000, 0, 0), Int3::new(0, 0, 4000)];
        graph.replace_tile(&mut nodes, 0, 0, verts, vec![0, 1, 2])?;

        let node = graph.tiles()[0].nodes[0];
        let NodeKind::Triangle(tri) = nodes[node].kind;
        let [a, b, c] = tri.vertices_in_graph_space(&graph);
        assert!(is_clockwise_xz(a, b, c));
        assert_eq!(nodes[node].position, Int3::new(1333, 0, 1333));
        Ok(())
    }

    #[test]
    fn test_create_nodes_rejects_short_buffer() -> Result<()> {
        let graph = NavmeshGraph::new(0, settings(1, 1))?;
        let mut nodes = NodeArena::new();
        let mut buffer = vec![None; 1];
        let result = graph.create_nodes(&mut nodes, &mut buffer, &[0, 1, 2, 0, 2, 3], 0, 0);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_inner_tile_connections() -> Result<()> {
        let (graph, nodes) = build(1, 1)?;
        let tile = &graph.tiles()[0];
        assert_eq!(tile.nodes.len(), 2);

        let (a, b) = (tile.nodes[0], tile.nodes[1]);
        let ab = nodes[a].connection_to(b).expect("a -> b");
        let ba = nodes[b].connection_to(a).expect("b -> a");
        assert_eq!(ab.cost, ba.cost);
        assert_eq!(ab.cost, (nodes[a].position - nodes[b].position).cost_magnitude() as u32);
        assert_ne!(ab.shape_edge, crate::graph_node::NO_SHAPE_EDGE);
        Ok(())
    }

    #[test]
    fn test_tiles_are_stitched() -> Result<()> {
        let (graph, nodes) = build(2, 1)?;
        let left_tile = &graph.tiles()[0];
        let right_tile = &graph.tiles()[1];

        let crossing = left_tile
            .nodes
            .iter()
            .flat_map(|&n| nodes[n].connections().iter().map(move |c| (n, c.node)))
            .filter(|(_, other)| right_tile.nodes.contains(other))
            .count();
        assert_eq!(crossing, 1);
        Ok(())
    }

    #[test]
    fn test_connect_tiles_rejects_non_adjacent() -> Result<()> {
        let (graph, mut nodes) = build(3, 3)?;
        assert!(graph.connect_tiles(&mut nodes, 0, 2).is_err());
        assert!(graph.connect_tiles(&mut nodes, 0, 4).is_err());
        Ok(())
    }

    #[test]
    fn test_replace_tile_destroys_old_nodes() -> Result<()> {
        let (mut graph, mut nodes) = build(2, 1)?;
        let old: Vec<NodeIndex> = graph.tiles()[1].nodes.clone();
        let (verts, tris) = square_tile(1, 0);
        graph.replace_tile(&mut nodes, 1, 0, verts, tris)?;

        assert_eq!(nodes.live_count(), 4);
        // Indices are recycled, and the neighbour is stitched to the new nodes
        for &n in &graph.tiles()[1].nodes {
            assert!(old.contains(&n));
        }
        for &n in &graph.tiles()[0].nodes {
            for c in nodes[n].connections() {
                assert!(!nodes[c.node].is_destroyed());
            }
        }
        Ok(())
    }

    #[test]
    fn test_get_nearest_force() -> Result<()> {
        let (graph, nodes) = build(3, 3)?;

        let p = Vec3::new(5.0, 1.0, 9.0);
        let info = graph.get_nearest_force(&nodes, p, None);
        let node = info.node.expect("node");
        assert!((info.position - Vec3::new(5.0, 0.0, 9.0)).length() < 1e-4);
        let NodeKind::Triangle(tri) = nodes[node].kind;
        assert!(tri.contains_point(&graph, p));

        // Far outside the graph the closest point is on the border
        let outside = graph.get_nearest_force(&nodes, Vec3::new(-10.0, 0.0, 6.0), None);
        assert!(outside.node.is_some());
        assert!((outside.position - Vec3::new(0.0, 0.0, 6.0)).length() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_get_nearest_force_respects_constraint() -> Result<()> {
        let (graph, mut nodes) = build(2, 1)?;
        for &n in &graph.tiles()[0].nodes {
            nodes[n].set_walkable(false);
        }
        let constraint = NNConstraint::default();
        let info = graph.get_nearest_force(&nodes, Vec3::new(1.0, 0.0, 2.0), Some(&constraint));
        let node = info.node.expect("node");
        assert!(graph.tiles()[1].nodes.contains(&node));
        assert!((info.position.x - 4.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_tile_coordinates_with_transform() -> Result<()> {
        let mut s = settings(2, 2);
        s.origin = Vec3::new(10.0, 0.0, 0.0);
        let graph = NavmeshGraph::new(0, s)?;
        assert_eq!(graph.tile_coordinates(Vec3::new(15.0, 0.0, 5.0)), Int2::new(1, 1));
        assert_eq!(graph.tile_coordinates(Vec3::new(11.0, 0.0, 1.0)), Int2::new(0, 0));
        Ok(())
    }
}
