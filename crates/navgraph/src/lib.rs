//! Tile-based navigation mesh pathfinding
//!
//! This crate searches graphs of triangles laid out on a grid of tiles. Every
//! coordinate is stored with fixed-point precision, so a search gives the same
//! result on every machine.
//!
//! # Features
//!
//! - **Navmesh graphs**: tiles of triangles stitched together across tile borders
//! - **Spatial queries**: nearest node lookups through a per-tile bounding box tree
//! - **A\* search**: start/end searches and searches towards many targets at once
//! - **Path smoothing**: funnel string pulling through the traversed triangles
//! - **Linecasts**: straight line visibility checks that walk the graph
//! - **Path pipeline**: worker threads or a cooperative loop with pooled paths
//! - **Binary graph files**: save and load whole graphs
//!
//! # Example
//!
//! ```rust,ignore
//! use navgraph::{NavData, PathfinderConfig, PathProcessor, ThreadCount};
//!
//! let data = NavData::load_from_file("level.navgraph")?;
//! let config = PathfinderConfig {
//!     thread_count: ThreadCount::None,
//!     ..Default::default()
//! };
//! let processor = PathProcessor::new(data, config)?;
//!
//! let path = processor.ab_path(start, end);
//! processor.start_path(&path, false)?;
//! processor.block_until_calculated(&path)?;
//! println!("{:?}", path.lock().base().vector_path);
//! ```
//!
//! # Architecture
//!
//! - [`NavData`]: owns every graph, the node arena and heuristic data
//! - [`NavmeshGraph`]: tile grid of one graph
//! - [`ABPath`] and [`MultiTargetPath`]: search requests
//! - [`PathProcessor`]: queues requests and runs them on worker threads

pub mod ab_path;
pub mod bb_tree;
pub mod binary_heap;
pub mod config;
pub mod euclidean_embedding;
pub mod funnel;
pub mod graph_node;
pub mod graph_transform;
pub mod heuristic;
pub mod linecast;
pub mod multi_target_path;
pub mod nav_data;
pub mod navmesh_graph;
pub mod navmesh_tile;
pub mod nn_constraint;
pub mod path;
pub mod path_handler;
pub mod path_processor;
pub mod pool;
#[cfg(feature = "serialization")]
pub mod serialization;
pub mod traversal;
pub mod triangle_mesh_node;

pub use ab_path::ABPath;
pub use bb_tree::BBTree;
pub use binary_heap::BinaryHeap;
pub use config::{EmbeddingSettings, PathLog, PathfinderConfig, PivotSelection, ThreadCount};
pub use euclidean_embedding::EuclideanEmbedding;
pub use funnel::FunnelOptions;
pub use graph_node::{Connection, GraphNode, NodeArena, NodeFlags, NodeIndex, NodeKind, NO_SHAPE_EDGE};
pub use graph_transform::GraphTransform;
pub use heuristic::Heuristic;
pub use linecast::GraphHitInfo;
pub use multi_target_path::{HeuristicMode, MultiTargetPath};
pub use nav_data::{NavData, NodesMut};
pub use navmesh_graph::{NavmeshGraph, NavmeshGraphSettings};
pub use navmesh_tile::NavmeshTile;
pub use nn_constraint::{NNConstraint, NNInfo, PathNNConstraint};
pub use path::{
    ClaimKey, Path, PathBase, PathCallback, PathCompleteState, PathHandle, PathProgress, PathState,
};
pub use path_handler::{PathHandler, PathNode};
pub use path_processor::{GraphUpdateLock, PathHook, PathProcessor, PathReturnQueue};
pub use pool::{ArrayPool, ListPool, ObjectPool, PathPool};
pub use traversal::{DefaultTraversalProvider, TraversalProvider};
pub use triangle_mesh_node::{MeshNode, TriangleMeshNode};

pub use navgraph_common::{Error, Int2, Int3, Result};

#[cfg(test)]
mod test_mesh_helpers;

#[cfg(all(test, feature = "serialization"))]
mod serialization_tests;
