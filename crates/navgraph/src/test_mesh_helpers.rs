//! Small hand-built graphs shared by the scenario tests

use glam::Vec3;
use navgraph_common::Result;

use crate::graph_node::NodeIndex;
use crate::nav_data::NavData;
use crate::navmesh_graph::NavmeshGraphSettings;
use crate::nn_constraint::NNConstraint;

/// Size of a corridor tile in world units
pub const CORRIDOR_TILE_SIZE: f32 = 6.0;

/// A 2x2 tile graph holding a corridor of two triangles along the x axis.
///
/// The first triangle lies in tile (0, 0) and points at the origin, the
/// second lies in tile (1, 0) and points at (12, 0, 0). They share the edge
/// from (6, 0, -1) to (6, 0, 1), which is on the border between the tiles.
/// Tiles (0, 1) and (1, 1) are empty.
pub fn corridor_nav_data() -> Result<NavData> {
    let mut data = NavData::new();
    let gi = data.add_graph(NavmeshGraphSettings {
        tile_x_count: 2,
        tile_z_count: 2,
        tile_world_size_x: CORRIDOR_TILE_SIZE,
        tile_world_size_z: CORRIDOR_TILE_SIZE,
        origin: Vec3::new(0.0, 0.0, -2.0),
        ..Default::default()
    })?;

    data.add_tile(
        gi,
        0,
        0,
        &[
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(6.0, 0.0, 1.0),
            Vec3::new(6.0, 0.0, -1.0),
        ],
        vec![0, 1, 2],
    )?;
    data.add_tile(
        gi,
        1,
        0,
        &[
            Vec3::new(6.0, 0.0, -1.0),
            Vec3::new(6.0, 0.0, 1.0),
            Vec3::new(12.0, 0.0, 0.0),
        ],
        vec![0, 1, 2],
    )?;
    Ok(data)
}

/// The two corridor nodes, in tile order
pub fn corridor_nodes(data: &NavData) -> (NodeIndex, NodeIndex) {
    let tiles = data.graphs()[0].tiles();
    (tiles[0].nodes[0], tiles[1].nodes[0])
}

/// A flat grid of `tiles_x` by `tiles_z` square tiles starting at the
/// origin. Every tile is split into two triangles along its diagonal.
pub fn grid_nav_data(tiles_x: i32, tiles_z: i32, tile_size: f32) -> Result<NavData> {
    let mut data = NavData::new();
    let gi = data.add_graph(NavmeshGraphSettings {
        tile_x_count: tiles_x,
        tile_z_count: tiles_z,
        tile_world_size_x: tile_size,
        tile_world_size_z: tile_size,
        ..Default::default()
    })?;

    for z in 0..tiles_z {
        for x in 0..tiles_x {
            let (x0, z0) = (x as f32 * tile_size, z as f32 * tile_size);
            let verts = [
                Vec3::new(x0, 0.0, z0),
                Vec3::new(x0, 0.0, z0 + tile_size),
                Vec3::new(x0 + tile_size, 0.0, z0 + tile_size),
                Vec3::new(x0 + tile_size, 0.0, z0),
            ];
            data.add_tile(gi, x, z, &verts, vec![0, 1, 2, 0, 2, 3])?;
        }
    }
    Ok(data)
}

/// Node containing or closest to a point
pub fn node_at(data: &NavData, position: Vec3) -> Option<NodeIndex> {
    data.get_nearest(position, &NNConstraint::none()).node
}
