//! Line of sight queries on navmesh graphs
//!
//! A linecast walks from triangle to triangle along a straight line in graph
//! space using exact integer side tests, so the answer does not depend on
//! floating point rounding of the mesh.

use glam::Vec3;
use navgraph_common::{line_intersection_point_xz, side_xz, Error, Int3, Result, Side};

use crate::graph_node::{NodeArena, NodeIndex, NodeKind};
use crate::navmesh_graph::NavmeshGraph;
use crate::triangle_mesh_node::MeshNode;

/// Upper bound on the number of triangles a single linecast may visit
const MAX_LINECAST_STEPS: usize = 2000;

/// Result of a linecast
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GraphHitInfo {
    /// Start of the line, snapped onto the navmesh
    pub origin: Vec3,
    /// Where the line hit an obstacle, or the end point if nothing was hit
    pub point: Vec3,
    /// Last node the line was inside
    pub node: Option<NodeIndex>,
    /// Start of the edge that was hit
    pub tangent_origin: Vec3,
    /// Direction of the edge that was hit
    pub tangent: Vec3,
}

impl GraphHitInfo {
    /// Distance from the origin to the hit point
    pub fn distance(&self) -> f32 {
        (self.point - self.origin).length()
    }
}

/// Exit edge lookup indexed by the side codes of the three triangle vertices
/// relative to the line, two bits per vertex. `0xFF` means no exit edge.
///
/// When the line passes through a vertex several edges qualify; the one with
/// the fewest colinear vertices is picked so a line running along an edge
/// cannot bounce between the two triangles sharing it.
pub static LINECAST_SHAPE_EDGE_LOOKUP: [u8; 64] = build_shape_edge_lookup();

const fn build_shape_edge_lookup() -> [u8; 64] {
    const COLINEAR: u8 = 0;
    const LEFT: u8 = 1;
    const RIGHT: u8 = 2;

    let mut table = [0xFFu8; 64];
    let mut i = 0;
    while i < 64 {
        let sides = [(i & 3) as u8, ((i >> 2) & 3) as u8, ((i >> 4) & 3) as u8];
        if sides[0] != 3 && sides[1] != 3 && sides[2] != 3 {
            let mut best_badness = u8::MAX;
            let mut j = 0;
            while j < 3 {
                let s0 = sides[j];
                let s1 = sides[(j + 1) % 3];
                if (s0 == LEFT || s0 == COLINEAR) && (s1 == RIGHT || s1 == COLINEAR) {
                    let badness = (s0 == COLINEAR) as u8 + (s1 == COLINEAR) as u8;
                    if badness < best_badness {
                        table[i] = j as u8;
                        best_badness = badness;
                    }
                }
                j += 1;
            }
        }
        i += 1;
    }
    table
}

fn is_nan(v: Vec3) -> bool {
    (v.x + v.y + v.z).is_nan()
}

impl NavmeshGraph {
    /// Returns true if the straight line from `origin` to `end` leaves the
    /// walkable surface, together with details about where it stopped.
    ///
    /// `hint` may name the node containing `origin` to skip the nearest node
    /// search. Every node the line passes through is appended to `trace`.
    pub fn linecast(
        &self,
        nodes: &NodeArena,
        origin: Vec3,
        end: Vec3,
        hint: Option<NodeIndex>,
        mut trace: Option<&mut Vec<NodeIndex>>,
    ) -> Result<(bool, GraphHitInfo)> {
        if is_nan(origin) {
            return Err(Error::InvalidArgument("origin is NaN".to_string()));
        }
        if is_nan(end) {
            return Err(Error::InvalidArgument("end is NaN".to_string()));
        }

        let mut hit = GraphHitInfo::default();

        let start = hint
            .filter(|&n| nodes.get_live(n).is_some())
            .or_else(|| self.get_nearest(nodes, origin, None).node);
        let Some(mut current) = start else {
            log::error!("Could not find a valid node to start from");
            hit.origin = origin;
            hit.point = origin;
            return Ok((true, hit));
        };

        let NodeKind::Triangle(first) = nodes[current].kind;
        let origin_in_graph_space = first.closest_point_on_node_xz_in_graph_space(self, origin);
        hit.origin = self.transform().transform(origin_in_graph_space.to_vec3());

        if !nodes[current].walkable() {
            hit.node = Some(current);
            hit.point = hit.origin;
            hit.tangent_origin = hit.origin;
            return Ok((true, hit));
        }

        let end_in_graph_space = Int3::from_vec3(self.transform().inverse_transform(end));
        if origin_in_graph_space == end_in_graph_space {
            hit.point = hit.origin;
            hit.node = Some(current);
            return Ok((false, hit));
        }

        let mut steps = 0;
        loop {
            steps += 1;
            if steps > MAX_LINECAST_STEPS {
                log::error!("Linecast was stuck in infinite loop. Breaking.");
                return Ok((true, hit));
            }

            if let Some(trace) = trace.as_deref_mut() {
                trace.push(current);
            }

            let node = &nodes[current];
            let NodeKind::Triangle(tri) = node.kind;
            let verts = tri.vertices_in_graph_space(self);
            let side_of = |p: Int3| side_xz(origin_in_graph_space, end_in_graph_space, p);
            let side_code = side_of(verts[0]).bits()
                | (side_of(verts[1]).bits() << 2)
                | (side_of(verts[2]).bits() << 4);
            let shape_edge_a = LINECAST_SHAPE_EDGE_LOOKUP[side_code as usize];

            // The edge is (verts[a], verts[a + 1]); with no exit edge this
            // checks the last edge
            let edge = (shape_edge_a as usize).min(2);
            let edge_start = verts[edge];
            let edge_end = verts[(edge + 1) % 3];

            if side_xz(edge_start, edge_end, end_in_graph_space) != Side::Left {
                // The end point is inside the current node
                hit.point = end;
                hit.node = Some(current);
                return Ok((false, hit));
            }

            if shape_edge_a == 0xFF {
                log::error!("Line does not intersect node at all");
                hit.node = Some(current);
                hit.point = hit.origin;
                hit.tangent_origin = hit.origin;
                return Ok((true, hit));
            }

            let mut entered = None;
            for conn in node.connections() {
                if conn.shape_edge != shape_edge_a {
                    continue;
                }
                let Some(neighbour) = nodes.get_live(conn.node) else {
                    continue;
                };
                if !neighbour.walkable() {
                    continue;
                }
                // One-directional connections cannot be crossed
                let Some(shape_edge_b) = neighbour.connection_to(current).map(|c| c.shape_edge as usize) else {
                    continue;
                };
                if shape_edge_b >= 3 {
                    continue;
                }
                let NodeKind::Triangle(other) = neighbour.kind;
                let side1 = side_of(other.vertex_in_graph_space(self, shape_edge_b));
                let side2 = side_of(other.vertex_in_graph_space(self, (shape_edge_b + 1) % 3));
                if matches!(side1, Side::Right | Side::Colinear) && matches!(side2, Side::Left | Side::Colinear) {
                    entered = Some(conn.node);
                    break;
                }
            }

            match entered {
                Some(next) => current = next,
                None => {
                    // Hit the border of the navmesh
                    let start_f = edge_start.to_vec3();
                    let end_f = edge_end.to_vec3();
                    let intersection = line_intersection_point_xz(
                        start_f,
                        end_f,
                        origin_in_graph_space.to_vec3(),
                        end_in_graph_space.to_vec3(),
                    );
                    let transform = self.transform();
                    hit.point = transform.transform(intersection);
                    hit.node = Some(current);
                    let hit_edge_start = transform.transform(start_f);
                    let hit_edge_end = transform.transform(end_f);
                    hit.tangent = hit_edge_end - hit_edge_start;
                    hit.tangent_origin = hit_edge_start;
                    return Ok((true, hit));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navmesh_graph::NavmeshGraphSettings;

    fn strip() -> Result<(NavmeshGraph, NodeArena)> {
        let settings = NavmeshGraphSettings {
            tile_x_count: 2,
            tile_z_count: 1,
            tile_world_size_x: 4.0,
            tile_world_size_z: 4.0,
            ..Default::default()
        };
        let mut graph = NavmeshGraph::new(0, settings)?;
        let mut nodes = NodeArena::new();
        for x in 0..2 {
            let x0 = x * 4000;
            let verts = vec![
                Int3::new(x0, 0, 0),
                Int3::new(x0, 0, 4000),
                Int3::new(x0 + 4000, 0, 4000),
                Int3::new(x0 + 4000, 0, 0),
            ];
            graph.replace_tile(&mut nodes, x, 0, verts, vec![0, 1, 2, 0, 2, 3])?;
        }
        Ok((graph, nodes))
    }

    #[test]
    fn test_lookup_table() {
        let code = |a: Side, b: Side, c: Side| (a.bits() | (b.bits() << 2) | (c.bits() << 4)) as usize;
        assert_eq!(LINECAST_SHAPE_EDGE_LOOKUP[code(Side::Left, Side::Right, Side::Right)], 0);
        assert_eq!(LINECAST_SHAPE_EDGE_LOOKUP[code(Side::Right, Side::Left, Side::Right)], 1);
        assert_eq!(LINECAST_SHAPE_EDGE_LOOKUP[code(Side::Right, Side::Right, Side::Left)], 2);
        // Every vertex on the same side: the line misses the triangle
        assert_eq!(LINECAST_SHAPE_EDGE_LOOKUP[code(Side::Left, Side::Left, Side::Left)], 0xFF);
        // Through a vertex, prefer the edge with fewer colinear vertices
        assert_eq!(LINECAST_SHAPE_EDGE_LOOKUP[code(Side::Colinear, Side::Left, Side::Right)], 1);
        assert_eq!(LINECAST_SHAPE_EDGE_LOOKUP[3], 0xFF);
    }

    #[test]
    fn test_linecast_inside_single_triangle() -> Result<()> {
        let (graph, nodes) = strip()?;
        let (hit_anything, hit) = graph.linecast(&nodes, Vec3::new(0.5, 0.0, 3.0), Vec3::new(1.0, 0.0, 3.5), None, None)?;
        assert!(!hit_anything);
        assert_eq!(hit.point, Vec3::new(1.0, 0.0, 3.5));
        assert!(hit.node.is_some());
        Ok(())
    }

    #[test]
    fn test_linecast_between_interior_points_never_hits() -> Result<()> {
        let triangles = [
            [Int3::new(0, 0, 0), Int3::new(0, 0, 4000), Int3::new(4000, 0, 0)],
            [Int3::new(500, 0, 500), Int3::new(3900, 0, 1200), Int3::new(1000, 0, 3800)],
            [Int3::new(100, 0, 3900), Int3::new(3900, 0, 3900), Int3::new(2000, 0, 100)],
            [Int3::new(0, 0, 1800), Int3::new(4000, 0, 2000), Int3::new(2100, 0, 2400)],
        ];
        let weights = [
            [0.34, 0.33, 0.33],
            [0.8, 0.1, 0.1],
            [0.1, 0.8, 0.1],
            [0.1, 0.1, 0.8],
            [0.45, 0.45, 0.1],
            [0.1, 0.45, 0.45],
        ];

        for rotation_y in [0.0, 37.0, 90.0, 200.0] {
            for verts in &triangles {
                let settings = NavmeshGraphSettings {
                    tile_x_count: 1,
                    tile_z_count: 1,
                    tile_world_size_x: 4.0,
                    tile_world_size_z: 4.0,
                    origin: Vec3::new(-3.0, 0.0, 5.0),
                    rotation_y,
                    ..Default::default()
                };
                let mut graph = NavmeshGraph::new(0, settings)?;
                let mut nodes = NodeArena::new();
                graph.replace_tile(&mut nodes, 0, 0, verts.to_vec(), vec![0, 1, 2])?;

                let world = verts.map(|v| graph.transform().transform_int3(v).to_vec3());
                let point = |w: [f32; 3]| world[0] * w[0] + world[1] * w[1] + world[2] * w[2];
                for from in &weights {
                    for to in &weights {
                        let (a, b) = (point(*from), point(*to));
                        let (hit_anything, hit) = graph.linecast(&nodes, a, b, None, None)?;
                        assert!(
                            !hit_anything,
                            "{a:?} -> {b:?} hit at {:?} in {verts:?} rotated by {rotation_y}",
                            hit.point
                        );
                        assert!((hit.point - b).length() < 0.01);
                    }
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_linecast_across_tiles() -> Result<()> {
        let (graph, nodes) = strip()?;
        let mut trace = Vec::new();
        let (hit_anything, _) = graph.linecast(
            &nodes,
            Vec3::new(0.5, 0.0, 2.0),
            Vec3::new(7.5, 0.0, 2.2),
            None,
            Some(&mut trace),
        )?;
        assert!(!hit_anything);
        assert!(trace.len() >= 3);
        Ok(())
    }

    #[test]
    fn test_linecast_hits_border() -> Result<()> {
        let (graph, nodes) = strip()?;
        let (hit_anything, hit) = graph.linecast(&nodes, Vec3::new(1.0, 0.0, 2.0), Vec3::new(1.0, 0.0, 10.0), None, None)?;
        assert!(hit_anything);
        assert!((hit.point - Vec3::new(1.0, 0.0, 4.0)).length() < 1e-3);
        assert!((hit.distance() - 2.0).abs() < 1e-3);
        assert!(hit.tangent.x.abs() > 0.0);
        assert_eq!(hit.tangent.z, 0.0);
        Ok(())
    }

    #[test]
    fn test_linecast_from_unwalkable_node() -> Result<()> {
        let (graph, mut nodes) = strip()?;
        let start = graph.get_nearest(&nodes, Vec3::new(0.5, 0.0, 3.0), None).node.expect("node");
        nodes[start].set_walkable(false);
        let (hit_anything, hit) = graph.linecast(&nodes, Vec3::new(0.5, 0.0, 3.0), Vec3::new(3.0, 0.0, 3.0), Some(start), None)?;
        assert!(hit_anything);
        assert_eq!(hit.node, Some(start));
        assert_eq!(hit.point, hit.origin);
        Ok(())
    }

    #[test]
    fn test_linecast_rejects_nan() -> Result<()> {
        let (graph, nodes) = strip()?;
        let result = graph.linecast(&nodes, Vec3::new(f32::NAN, 0.0, 0.0), Vec3::ZERO, None, None);
        assert!(result.is_err());
        Ok(())
    }
}
