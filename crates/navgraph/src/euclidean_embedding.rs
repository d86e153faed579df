//! Precomputed heuristic lower bound
//!
//! A handful of pivot nodes are chosen and the shortest path cost from each
//! pivot to every node is stored. For two nodes `a` and `b` the triangle
//! inequality gives `cost(a, b) >= |d(a, p) - d(b, p)|` for every pivot `p`,
//! which A* uses to raise its distance based estimate without overestimating.
//! Connections are assumed to be symmetric.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::config::{EmbeddingSettings, PivotSelection};
use crate::graph_node::{NodeArena, NodeIndex};
use crate::pool::ArrayPool;

const UNREACHABLE: u32 = u32::MAX;

/// Pivot distances used to tighten A* heuristics
#[derive(Debug, Clone, Default)]
pub struct EuclideanEmbedding {
    settings: EmbeddingSettings,
    pivots: Vec<NodeIndex>,
    /// Cost from each pivot to every node index
    costs: Vec<Vec<u32>>,
    dirty: bool,
}

impl EuclideanEmbedding {
    /// An embedding that still has to be calculated
    pub fn new(settings: EmbeddingSettings) -> Self {
        let dirty = settings.pivot_selection != PivotSelection::None;
        Self {
            settings,
            pivots: Vec::new(),
            costs: Vec::new(),
            dirty,
        }
    }

    pub fn settings(&self) -> &EmbeddingSettings {
        &self.settings
    }

    pub fn pivots(&self) -> &[NodeIndex] {
        &self.pivots
    }

    /// Marks the stored costs as stale after the graph changed
    pub fn invalidate(&mut self) {
        if self.settings.pivot_selection != PivotSelection::None {
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Lower bound on the cost between two nodes. Zero while stale or disabled.
    pub fn heuristic(&self, a: NodeIndex, b: NodeIndex) -> u32 {
        if self.dirty {
            return 0;
        }
        let mut best = 0;
        for costs in &self.costs {
            let (Some(&da), Some(&db)) = (costs.get(a.as_usize()), costs.get(b.as_usize())) else {
                continue;
            };
            if da == UNREACHABLE || db == UNREACHABLE {
                continue;
            }
            best = best.max(da.abs_diff(db));
        }
        best
    }

    /// Chooses pivots and recomputes their costs over the current nodes
    pub fn recalculate(&mut self, nodes: &NodeArena) {
        self.dirty = false;
        self.pivots.clear();
        self.costs.clear();

        let pool = ArrayPool::<u32>::new();
        match self.settings.pivot_selection {
            PivotSelection::None => return,
            PivotSelection::Custom => {
                for raw in self.settings.custom_pivots.clone() {
                    let index = NodeIndex(raw);
                    match nodes.get_live(index) {
                        Some(node) if node.walkable() => self.add_pivot(nodes, index, &pool),
                        _ => log::warn!("Pivot {raw} is not a walkable node and was ignored"),
                    }
                }
            }
            PivotSelection::SpreadOut => self.select_spread_out(nodes, &pool),
        }
        log::debug!(
            "Recalculated euclidean embedding with {} pivots over {} nodes",
            self.pivots.len(),
            nodes.live_count()
        );
    }

    fn add_pivot(&mut self, nodes: &NodeArena, pivot: NodeIndex, pool: &ArrayPool<u32>) {
        let n = nodes.capacity();
        let mut dist = pool.claim(n);
        dijkstra(nodes, pivot, &mut dist);
        self.pivots.push(pivot);
        self.costs.push(dist[..n].to_vec());
        if let Err(e) = pool.release(dist) {
            log::warn!("{e}");
        }
    }

    /// First walkable node, then repeatedly the node furthest from every
    /// pivot chosen so far
    fn select_spread_out(&mut self, nodes: &NodeArena, pool: &ArrayPool<u32>) {
        let Some(first) = nodes.iter().find(|(_, n)| n.walkable()).map(|(i, _)| i) else {
            return;
        };
        self.add_pivot(nodes, first, pool);

        let n = nodes.capacity();
        let mut closest = pool.claim(n);
        closest[..n].fill(UNREACHABLE);

        while self.pivots.len() < self.settings.pivot_count {
            let Some(latest) = self.costs.last() else { break };
            for (slot, &d) in closest[..n].iter_mut().zip(latest) {
                *slot = (*slot).min(d);
            }

            // Ties go to the lowest index so the choice is reproducible
            let mut best: Option<(u32, NodeIndex)> = None;
            for (index, node) in nodes.iter() {
                let d = closest[index.as_usize()];
                if !node.walkable() || d == UNREACHABLE || d == 0 {
                    continue;
                }
                if best.map_or(true, |(bd, _)| d > bd) {
                    best = Some((d, index));
                }
            }
            let Some((_, next)) = best else { break };
            self.add_pivot(nodes, next, pool);
        }

        if let Err(e) = pool.release(closest) {
            log::warn!("{e}");
        }
    }
}

/// Shortest path cost from `source` to every node over walkable nodes
fn dijkstra(nodes: &NodeArena, source: NodeIndex, dist: &mut [u32]) {
    dist.fill(UNREACHABLE);
    let Some(slot) = dist.get_mut(source.as_usize()) else {
        return;
    };
    *slot = 0;

    let mut open = BinaryHeap::new();
    open.push(Reverse((0u32, source.0)));
    while let Some(Reverse((d, raw))) = open.pop() {
        let index = NodeIndex(raw);
        if d > dist[index.as_usize()] {
            continue;
        }
        let Some(node) = nodes.get_live(index) else { continue };
        for conn in node.connections() {
            if !nodes.get_live(conn.node).is_some_and(|n| n.walkable()) {
                continue;
            }
            let next = d.saturating_add(conn.cost);
            if let Some(slot) = dist.get_mut(conn.node.as_usize()) {
                if next < *slot {
                    *slot = next;
                    open.push(Reverse((next, conn.node.0)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_node::NodeKind;
    use crate::triangle_mesh_node::TriangleMeshNode;
    use navgraph_common::Result;

    /// Nodes in a line, each connection costing 1000 in both directions
    fn line(n: usize) -> Result<(NodeArena, Vec<NodeIndex>)> {
        let mut arena = NodeArena::new();
        let mut nodes = Vec::new();
        for _ in 0..n {
            nodes.push(arena.allocate(NodeKind::Triangle(TriangleMeshNode::new(0, 1, 2)))?);
        }
        for w in nodes.windows(2) {
            arena.add_connection(w[0], w[1], 1000, None)?;
            arena.add_connection(w[1], w[0], 1000, None)?;
        }
        Ok((arena, nodes))
    }

    #[test]
    fn test_disabled_embedding_is_zero() -> Result<()> {
        let (arena, n) = line(3)?;
        let mut embedding = EuclideanEmbedding::default();
        embedding.recalculate(&arena);
        assert!(!embedding.is_dirty());
        assert_eq!(embedding.heuristic(n[0], n[2]), 0);
        Ok(())
    }

    #[test]
    fn test_spread_out_picks_far_ends() -> Result<()> {
        let (arena, n) = line(5)?;
        let mut embedding = EuclideanEmbedding::new(EmbeddingSettings {
            pivot_selection: PivotSelection::SpreadOut,
            pivot_count: 2,
            custom_pivots: Vec::new(),
        });
        assert!(embedding.is_dirty());
        assert_eq!(embedding.heuristic(n[0], n[4]), 0);

        embedding.recalculate(&arena);
        assert_eq!(embedding.pivots(), &[n[0], n[4]]);
        // Exact on a line
        assert_eq!(embedding.heuristic(n[1], n[4]), 3000);
        assert_eq!(embedding.heuristic(n[2], n[2]), 0);
        Ok(())
    }

    #[test]
    fn test_custom_pivots_never_overestimate() -> Result<()> {
        let (mut arena, n) = line(4)?;
        // A shortcut makes the line no longer a line
        arena.add_connection(n[0], n[3], 1500, None)?;
        arena.add_connection(n[3], n[0], 1500, None)?;

        let mut embedding = EuclideanEmbedding::new(EmbeddingSettings {
            pivot_selection: PivotSelection::Custom,
            pivot_count: 0,
            custom_pivots: vec![n[1].0, 999],
        });
        embedding.recalculate(&arena);
        assert_eq!(embedding.pivots(), &[n[1]]);
        assert!(embedding.heuristic(n[0], n[3]) <= 1500);
        assert_eq!(embedding.heuristic(n[1], n[2]), 1000);
        Ok(())
    }

    #[test]
    fn test_invalidate_disables_until_recalculated() -> Result<()> {
        let (arena, n) = line(3)?;
        let mut embedding = EuclideanEmbedding::new(EmbeddingSettings {
            pivot_selection: PivotSelection::Custom,
            pivot_count: 0,
            custom_pivots: vec![n[0].0],
        });
        embedding.recalculate(&arena);
        assert_eq!(embedding.heuristic(n[0], n[2]), 2000);

        embedding.invalidate();
        assert_eq!(embedding.heuristic(n[0], n[2]), 0);
        embedding.recalculate(&arena);
        assert_eq!(embedding.heuristic(n[0], n[2]), 2000);
        Ok(())
    }
}
