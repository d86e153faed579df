//! Configuration for the pathfinding pipeline

use navgraph_common::{Error, Result};

use crate::binary_heap::MAX_HEAP_SIZE;
use crate::heuristic::Heuristic;

/// Number of worker threads used to calculate paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum ThreadCount {
    /// Half of the logical cores, between 1 and 4
    AutomaticLowLoad,
    /// All logical cores but one, between 1 and 8
    AutomaticHighLoad,
    /// No worker threads; paths are calculated by [`tick`](crate::PathProcessor::tick)
    #[default]
    None,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
}

impl ThreadCount {
    /// Resolves the setting to a concrete number of threads. Zero means
    /// paths are calculated cooperatively.
    pub fn resolve(self) -> usize {
        let cores = || std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        match self {
            ThreadCount::AutomaticLowLoad => (cores() / 2).clamp(1, 4),
            ThreadCount::AutomaticHighLoad => cores().saturating_sub(1).clamp(1, 8),
            ThreadCount::None => 0,
            ThreadCount::One => 1,
            ThreadCount::Two => 2,
            ThreadCount::Three => 3,
            ThreadCount::Four => 4,
            ThreadCount::Five => 5,
            ThreadCount::Six => 6,
            ThreadCount::Seven => 7,
            ThreadCount::Eight => 8,
        }
    }

    /// Maps an explicit thread count onto the enum
    pub fn from_count(count: usize) -> Result<Self> {
        Ok(match count {
            0 => ThreadCount::None,
            1 => ThreadCount::One,
            2 => ThreadCount::Two,
            3 => ThreadCount::Three,
            4 => ThreadCount::Four,
            5 => ThreadCount::Five,
            6 => ThreadCount::Six,
            7 => ThreadCount::Seven,
            8 => ThreadCount::Eight,
            n => {
                return Err(Error::InvalidConfig(format!(
                    "at most 8 worker threads are supported, got {n}"
                )))
            }
        })
    }
}

/// How much to log about each calculated path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum PathLog {
    None,
    #[default]
    Normal,
    Heavy,
    OnlyErrors,
}

/// How pivots for the euclidean embedding are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum PivotSelection {
    /// No embedding; heuristics use distances only
    #[default]
    None,
    /// Start from the first walkable node, then repeatedly pick the node
    /// furthest from all pivots chosen so far
    SpreadOut,
    /// Use the nodes listed in [`EmbeddingSettings::custom_pivots`]
    Custom,
}

/// Settings of the precomputed heuristic lower bound
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct EmbeddingSettings {
    pub pivot_selection: PivotSelection,
    /// Number of pivots for [`PivotSelection::SpreadOut`]
    pub pivot_count: usize,
    /// Node indices for [`PivotSelection::Custom`]
    pub custom_pivots: Vec<u32>,
}

impl EmbeddingSettings {
    pub fn validate(&self) -> Result<()> {
        match self.pivot_selection {
            PivotSelection::SpreadOut if self.pivot_count == 0 => Err(Error::InvalidConfig(
                "spread out pivot selection needs at least one pivot".to_string(),
            )),
            PivotSelection::Custom if self.custom_pivots.is_empty() => Err(Error::InvalidConfig(
                "custom pivot selection needs at least one pivot".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Configuration of a [`PathProcessor`](crate::PathProcessor)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct PathfinderConfig {
    pub thread_count: ThreadCount,
    /// Default heuristic of new paths
    pub heuristic: Heuristic,
    /// Default heuristic scale of new paths
    pub heuristic_scale: f32,
    /// Time a single [`tick`](crate::PathProcessor::tick) may spend calculating
    pub max_frame_time_ms: f32,
    /// Nearest node queries further away than this fail when constrained
    pub max_nearest_node_distance: f32,
    /// Initial number of open list slots per worker
    pub initial_heap_capacity: usize,
    /// Growth factor of the open list
    pub heap_growth_factor: f32,
    /// Prefer nodes with a larger G score when F scores tie
    pub heap_sort_g_on_ties: bool,
    pub log_path_results: PathLog,
    pub euclidean_embedding: EmbeddingSettings,
}

impl Default for PathfinderConfig {
    fn default() -> Self {
        Self {
            thread_count: ThreadCount::default(),
            heuristic: Heuristic::Euclidean,
            heuristic_scale: 1.0,
            max_frame_time_ms: 1.0,
            max_nearest_node_distance: 100.0,
            initial_heap_capacity: 128,
            heap_growth_factor: 2.0,
            heap_sort_g_on_ties: true,
            log_path_results: PathLog::Normal,
            euclidean_embedding: EmbeddingSettings::default(),
        }
    }
}

impl PathfinderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.initial_heap_capacity == 0 || self.initial_heap_capacity > MAX_HEAP_SIZE {
            return Err(Error::InvalidConfig(format!(
                "initial heap capacity must be between 1 and {MAX_HEAP_SIZE}, got {}",
                self.initial_heap_capacity
            )));
        }

        if !(self.heap_growth_factor > 1.0) {
            return Err(Error::InvalidConfig(
                "heap growth factor must be greater than 1".to_string(),
            ));
        }

        if !(self.heuristic_scale >= 0.0) {
            return Err(Error::InvalidConfig(
                "heuristic scale must not be negative".to_string(),
            ));
        }

        if !(self.max_frame_time_ms > 0.0) {
            return Err(Error::InvalidConfig(
                "max frame time must be positive".to_string(),
            ));
        }

        if !(self.max_nearest_node_distance >= 0.0) {
            return Err(Error::InvalidConfig(
                "max nearest node distance must not be negative".to_string(),
            ));
        }

        self.euclidean_embedding.validate()
    }
}
