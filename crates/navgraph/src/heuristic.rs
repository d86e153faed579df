//! A* heuristics

use navgraph_common::Int3;

/// Estimate of the remaining cost used to order the open list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum Heuristic {
    /// No estimate, the search degenerates to Dijkstra
    None,
    Manhattan,
    DiagonalManhattan,
    #[default]
    Euclidean,
}

impl Heuristic {
    /// Estimated cost between two positions, before any embedding bound.
    ///
    /// The scale is applied here; a scale of at most 1 keeps the estimate
    /// admissible for costs derived from node distances.
    pub fn estimate(self, target: Int3, position: Int3, scale: f32) -> u32 {
        match self {
            Heuristic::None => 0,
            Heuristic::Euclidean => ((target - position).cost_magnitude() as f32 * scale) as u32,
            Heuristic::Manhattan => {
                let d = target - position;
                let sum = d.x.unsigned_abs() as u64 + d.y.unsigned_abs() as u64 + d.z.unsigned_abs() as u64;
                (sum as f64 * scale as f64) as u32
            }
            Heuristic::DiagonalManhattan => {
                let d = target - position;
                let (x, y, z) = (
                    d.x.unsigned_abs() as u64,
                    d.y.unsigned_abs() as u64,
                    d.z.unsigned_abs() as u64,
                );
                let diag = x.min(z);
                let diag2 = x.max(z);
                let sum = (14 * diag) / 10 + (diag2 - diag) + y;
                (sum as f64 * scale as f64) as u32
            }
        }
    }
}

impl std::str::FromStr for Heuristic {
    type Err = navgraph_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Heuristic::None),
            "manhattan" => Ok(Heuristic::Manhattan),
            "diagonal-manhattan" | "diagonal_manhattan" | "diagonalmanhattan" => Ok(Heuristic::DiagonalManhattan),
            "euclidean" => Ok(Heuristic::Euclidean),
            other => Err(navgraph_common::Error::InvalidArgument(format!(
                "unknown heuristic '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimates() {
        let target = Int3::new(3000, 0, 4000);
        let origin = Int3::ZERO;
        assert_eq!(Heuristic::None.estimate(target, origin, 1.0), 0);
        assert_eq!(Heuristic::Euclidean.estimate(target, origin, 1.0), 5000);
        assert_eq!(Heuristic::Manhattan.estimate(target, origin, 1.0), 7000);
        // 1.4 * 3000 + (4000 - 3000)
        assert_eq!(Heuristic::DiagonalManhattan.estimate(target, origin, 1.0), 5200);
        assert_eq!(Heuristic::Euclidean.estimate(target, origin, 0.5), 2500);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Euclidean".parse::<Heuristic>().ok(), Some(Heuristic::Euclidean));
        assert_eq!("diagonal-manhattan".parse::<Heuristic>().ok(), Some(Heuristic::DiagonalManhattan));
        assert!("octile".parse::<Heuristic>().is_err());
    }
}
