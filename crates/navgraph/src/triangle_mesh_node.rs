//! Triangle nodes and the shape operations shared by mesh nodes

use glam::Vec3;
use navgraph_common::{
    closest_point_on_triangle, closest_point_on_triangle_xz, contains_point_xz, triangle_area_xz, Int3,
};

use crate::navmesh_graph::NavmeshGraph;
use crate::navmesh_tile::{tile_index_of, vertex_array_index};

/// Geometry of a node whose shape is a polygon stored in a navmesh graph
pub trait MeshNode {
    fn vertex_count(&self) -> usize;

    /// Vertex reference (tile index and vertex slot) of the i-th vertex
    fn vertex_index(&self, i: usize) -> i32;

    fn vertex(&self, graph: &NavmeshGraph, i: usize) -> Int3 {
        graph.vertex(self.vertex_index(i))
    }

    fn vertex_in_graph_space(&self, graph: &NavmeshGraph, i: usize) -> Int3 {
        graph.vertex_in_graph_space(self.vertex_index(i))
    }

    /// Closest point on the node to `p`, in world space
    fn closest_point_on_node(&self, graph: &NavmeshGraph, p: Vec3) -> Vec3;

    /// Closest point on the node to `p` when seen from above, in world space
    fn closest_point_on_node_xz(&self, graph: &NavmeshGraph, p: Vec3) -> Vec3;

    /// Closest point to the world-space `p`, in graph space, guaranteed to be
    /// inside the node unless the node is degenerate
    fn closest_point_on_node_xz_in_graph_space(&self, graph: &NavmeshGraph, p: Vec3) -> Int3;

    fn contains_point_in_graph_space(&self, graph: &NavmeshGraph, p: Int3) -> bool;

    /// Area of the node projected on the XZ plane, in world units squared
    fn surface_area(&self, graph: &NavmeshGraph) -> f32;

    /// True if the world-space point is inside the node when seen from above
    fn contains_point(&self, graph: &NavmeshGraph, p: Vec3) -> bool {
        let local = Int3::from_vec3(graph.transform().inverse_transform(p));
        self.contains_point_in_graph_space(graph, local)
    }
}

/// A triangular node in a navmesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleMeshNode {
    pub v0: i32,
    pub v1: i32,
    pub v2: i32,
}

impl TriangleMeshNode {
    pub fn new(v0: i32, v1: i32, v2: i32) -> Self {
        Self { v0, v1, v2 }
    }

    /// Index of the tile the node belongs to
    pub fn tile_index(&self) -> usize {
        tile_index_of(self.v0)
    }

    /// Slot of the i-th vertex in the tile's vertex arrays
    pub fn vertex_array_index(&self, i: usize) -> usize {
        vertex_array_index(self.vertex_index(i))
    }

    pub fn vertices(&self, graph: &NavmeshGraph) -> [Int3; 3] {
        [graph.vertex(self.v0), graph.vertex(self.v1), graph.vertex(self.v2)]
    }

    pub fn vertices_in_graph_space(&self, graph: &NavmeshGraph) -> [Int3; 3] {
        [
            graph.vertex_in_graph_space(self.v0),
            graph.vertex_in_graph_space(self.v1),
            graph.vertex_in_graph_space(self.v2),
        ]
    }

    /// Average of the world-space vertices
    pub fn centroid(&self, graph: &NavmeshGraph) -> Int3 {
        let [a, b, c] = self.vertices(graph);
        let avg = |x: i32, y: i32, z: i32| ((x as i64 + y as i64 + z as i64) as f64 / 3.0).round() as i32;
        Int3::new(avg(a.x, b.x, c.x), avg(a.y, b.y, c.y), avg(a.z, b.z, c.z))
    }

    pub(crate) fn swap_winding(&mut self) {
        std::mem::swap(&mut self.v0, &mut self.v2);
    }
}

impl MeshNode for TriangleMeshNode {
    fn vertex_count(&self) -> usize {
        3
    }

    fn vertex_index(&self, i: usize) -> i32 {
        match i {
            0 => self.v0,
            1 => self.v1,
            _ => self.v2,
        }
    }

    fn closest_point_on_node(&self, graph: &NavmeshGraph, p: Vec3) -> Vec3 {
        let [a, b, c] = self.vertices(graph);
        closest_point_on_triangle(a.to_vec3(), b.to_vec3(), c.to_vec3(), p)
    }

    fn closest_point_on_node_xz(&self, graph: &NavmeshGraph, p: Vec3) -> Vec3 {
        let [a, b, c] = self.vertices(graph);
        closest_point_on_triangle_xz(a.to_vec3(), b.to_vec3(), c.to_vec3(), p)
    }

    fn closest_point_on_node_xz_in_graph_space(&self, graph: &NavmeshGraph, p: Vec3) -> Int3 {
        let [a, b, c] = self.vertices_in_graph_space(graph);
        let local = graph.transform().inverse_transform(p);
        let closest = Int3::from_vec3(closest_point_on_triangle_xz(
            a.to_vec3(),
            b.to_vec3(),
            c.to_vec3(),
            local,
        ));
        if contains_point_xz(a, b, c, closest) {
            return closest;
        }

        // Rounding may have pushed the point just outside, try its integer neighbours
        for dx in -1..=1 {
            for dz in -1..=1 {
                if dx == 0 && dz == 0 {
                    continue;
                }
                let candidate = Int3::new(closest.x + dx, closest.y, closest.z + dz);
                if contains_point_xz(a, b, c, candidate) {
                    return candidate;
                }
            }
        }
        closest
    }

    fn contains_point_in_graph_space(&self, graph: &NavmeshGraph, p: Int3) -> bool {
        let [a, b, c] = self.vertices_in_graph_space(graph);
        contains_point_xz(a, b, c, p)
    }

    fn surface_area(&self, graph: &NavmeshGraph) -> f32 {
        let [a, b, c] = self.vertices(graph);
        triangle_area_xz(a.to_vec3(), b.to_vec3(), c.to_vec3())
    }
}
