//! A single tile of a navmesh graph

use navgraph_common::Int3;

use crate::bb_tree::BBTree;
use crate::graph_node::NodeIndex;

/// Bits of a vertex reference that index into the tile's vertex arrays
pub const VERTEX_INDEX_MASK: i32 = 0xFFF;

/// Bits of a vertex reference (after shifting) that hold the tile index
pub const TILE_INDEX_MASK: i32 = 0x7FFFF;

/// Shift of the tile index inside a vertex reference
pub const TILE_INDEX_OFFSET: i32 = 12;

/// Maximum number of vertices a tile can hold
pub const MAX_TILE_VERTICES: usize = (VERTEX_INDEX_MASK + 1) as usize;

/// Tile index encoded in a vertex reference
#[inline]
pub fn tile_index_of(vertex_ref: i32) -> usize {
    ((vertex_ref >> TILE_INDEX_OFFSET) & TILE_INDEX_MASK) as usize
}

/// Position of a vertex reference in its tile's vertex arrays
#[inline]
pub fn vertex_array_index(vertex_ref: i32) -> usize {
    (vertex_ref & VERTEX_INDEX_MASK) as usize
}

/// One grid cell of a navmesh graph
#[derive(Debug, Clone, Default)]
pub struct NavmeshTile {
    /// Tile x coordinate, in tiles
    pub x: i32,
    /// Tile z coordinate, in tiles
    pub z: i32,
    /// Width in tiles, always 1
    pub w: i32,
    /// Depth in tiles, always 1
    pub d: i32,
    /// Triangle vertex indices, three per triangle
    pub tris: Vec<i32>,
    /// Vertices in world space
    pub verts: Vec<Int3>,
    /// Vertices in graph space
    pub verts_in_graph_space: Vec<Int3>,
    /// One node per triangle, in triangle order
    pub nodes: Vec<NodeIndex>,
    pub bb_tree: BBTree,
}

impl NavmeshTile {
    pub fn new_empty(x: i32, z: i32) -> Self {
        Self {
            x,
            z,
            w: 1,
            d: 1,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.tris.len() / 3
    }

    #[inline]
    pub fn vertex(&self, vertex_ref: i32) -> Int3 {
        self.verts[vertex_array_index(vertex_ref)]
    }

    #[inline]
    pub fn vertex_in_graph_space(&self, vertex_ref: i32) -> Int3 {
        self.verts_in_graph_space[vertex_array_index(vertex_ref)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_reference_layout() {
        let tile_index = 1234;
        let vref = 17 | (tile_index << TILE_INDEX_OFFSET);
        assert_eq!(tile_index_of(vref), 1234);
        assert_eq!(vertex_array_index(vref), 17);

        let max_tile = TILE_INDEX_MASK;
        let vref = VERTEX_INDEX_MASK | (max_tile << TILE_INDEX_OFFSET);
        assert_eq!(tile_index_of(vref), TILE_INDEX_MASK as usize);
        assert_eq!(vertex_array_index(vref), 4095);
    }
}
