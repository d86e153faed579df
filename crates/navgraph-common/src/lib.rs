//! Common utilities and data structures shared by the navgraph crates
//!
//! Every coordinate stored in a graph is an [`Int3`] with a fixed precision of
//! 1000 units per world unit, so orientation and intersection predicates are
//! evaluated exactly and give the same answer on every machine.

mod geometry;
mod math;
mod vector;

pub use geometry::*;
pub use math::*;
pub use vector::*;

/// Represents a 3D position in world space
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("invalid tile: {0}")]
    InvalidTile(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("binary heap size really large ({0}), this is probably caused by an infinite loop in the search")]
    HeapOverflow(usize),

    #[error("pool misuse: {0}")]
    Pool(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("pathfinding failed: {0}")]
    Pathfinding(String),

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for navgraph operations
pub type Result<T> = std::result::Result<T, Error>;
