//! Open list of the A* search
//!
//! A 4-ary min-heap over path node indices. Each [`PathNode`] caches its slot
//! in the heap so that adding a node which is already present rewrites its
//! entry in place instead of inserting a duplicate.

use navgraph_common::{Error, Result};

use crate::path_handler::PathNode;

/// Number of children per heap node
pub const D: usize = 4;

/// Heap slot value of nodes that are not in the heap
pub const NOT_IN_HEAP: u16 = 0xFFFF;

/// Largest number of items the heap can hold, limited by the `u16` slot index
pub const MAX_HEAP_SIZE: usize = NOT_IN_HEAP as usize - 1;

#[derive(Debug, Clone, Copy)]
struct Tuple {
    f: u32,
    g: u32,
    node: u32,
}

/// D-ary min-heap ordered by F score
#[derive(Debug, Clone)]
pub struct BinaryHeap {
    heap: Vec<Tuple>,
    capacity: usize,
    growth_factor: f32,
    sort_g_on_ties: bool,
}

/// Capacities are kept at a multiple of D plus one
fn round_up_capacity(n: usize) -> usize {
    let rem = n % D;
    if rem == 1 {
        n
    } else if rem == 0 {
        n + 1
    } else {
        n + (D - rem) + 1
    }
}

impl BinaryHeap {
    pub fn new(capacity: usize, growth_factor: f32, sort_g_on_ties: bool) -> Result<Self> {
        if capacity == 0 || capacity > MAX_HEAP_SIZE {
            return Err(Error::InvalidConfig(format!(
                "heap capacity must be between 1 and {MAX_HEAP_SIZE}, got {capacity}"
            )));
        }
        if !(growth_factor > 1.0) {
            return Err(Error::InvalidConfig(format!(
                "heap growth factor must be greater than 1, got {growth_factor}"
            )));
        }
        let capacity = round_up_capacity(capacity).min(MAX_HEAP_SIZE);
        Ok(Self {
            heap: Vec::with_capacity(capacity),
            capacity,
            growth_factor,
            sort_g_on_ties,
        })
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Path node indices currently in the heap, in slot order
    pub fn items(&self) -> impl Iterator<Item = u32> + '_ {
        self.heap.iter().map(|t| t.node)
    }

    /// Removes every item and marks the nodes as not in the heap
    pub fn clear(&mut self, nodes: &mut [PathNode]) {
        for t in &self.heap {
            nodes[t.node as usize].heap_index = NOT_IN_HEAP;
        }
        self.heap.clear();
    }

    #[inline]
    fn better(&self, a: Tuple, b: Tuple) -> bool {
        a.f < b.f || (self.sort_g_on_ties && a.f == b.f && a.g > b.g)
    }

    fn expand(&mut self) -> Result<()> {
        if self.capacity >= MAX_HEAP_SIZE {
            return Err(Error::HeapOverflow(self.capacity));
        }
        let grown = ((self.capacity as f32) * self.growth_factor).ceil() as usize;
        let new_capacity = round_up_capacity(grown.max(self.capacity + 4)).min(MAX_HEAP_SIZE);
        log::trace!("Growing open list from {} to {new_capacity} slots", self.capacity);
        self.heap.reserve_exact(new_capacity - self.heap.len());
        self.capacity = new_capacity;
        Ok(())
    }

    /// Adds the node, or moves it to its new position if it is already in the heap
    pub fn add(&mut self, nodes: &mut [PathNode], index: u32) -> Result<()> {
        let node = &nodes[index as usize];
        let tuple = Tuple {
            f: node.f(),
            g: node.g,
            node: index,
        };

        let slot = if node.heap_index != NOT_IN_HEAP && (node.heap_index as usize) < self.heap.len() {
            let slot = node.heap_index as usize;
            self.heap[slot] = tuple;
            slot
        } else {
            if self.heap.len() >= self.capacity {
                self.expand()?;
            }
            self.heap.push(tuple);
            self.heap.len() - 1
        };

        let slot = self.sift_up(nodes, slot);
        self.sift_down(nodes, slot);
        Ok(())
    }

    /// Removes and returns the node with the lowest F score
    pub fn remove(&mut self, nodes: &mut [PathNode]) -> Option<u32> {
        let last = self.heap.pop()?;
        if self.heap.is_empty() {
            nodes[last.node as usize].heap_index = NOT_IN_HEAP;
            return Some(last.node);
        }
        let top = self.heap[0];
        nodes[top.node as usize].heap_index = NOT_IN_HEAP;
        self.heap[0] = last;
        self.sift_down(nodes, 0);
        Some(top.node)
    }

    /// Re-reads F and G of every item and restores the heap order.
    ///
    /// Needed after the H scores of queued nodes change.
    pub fn rebuild(&mut self, nodes: &mut [PathNode]) {
        for t in &mut self.heap {
            let node = &nodes[t.node as usize];
            t.f = node.f();
            t.g = node.g;
        }
        if self.heap.len() < 2 {
            return;
        }
        for slot in (0..=(self.heap.len() - 2) / D).rev() {
            self.sift_down(nodes, slot);
        }
        // sift_down only writes slots it moves, so refresh the rest
        for (slot, t) in self.heap.iter().enumerate() {
            nodes[t.node as usize].heap_index = slot as u16;
        }
    }

    fn sift_up(&mut self, nodes: &mut [PathNode], mut slot: usize) -> usize {
        let item = self.heap[slot];
        while slot > 0 {
            let parent = (slot - 1) / D;
            let parent_item = self.heap[parent];
            if !self.better(item, parent_item) {
                break;
            }
            self.heap[slot] = parent_item;
            nodes[parent_item.node as usize].heap_index = slot as u16;
            slot = parent;
        }
        self.heap[slot] = item;
        nodes[item.node as usize].heap_index = slot as u16;
        slot
    }

    fn sift_down(&mut self, nodes: &mut [PathNode], mut slot: usize) {
        let item = self.heap[slot];
        let len = self.heap.len();
        loop {
            let first_child = slot * D + 1;
            if first_child >= len {
                break;
            }
            let mut best = first_child;
            for child in first_child + 1..(first_child + D).min(len) {
                if self.better(self.heap[child], self.heap[best]) {
                    best = child;
                }
            }
            if !self.better(self.heap[best], item) {
                break;
            }
            let moved = self.heap[best];
            self.heap[slot] = moved;
            nodes[moved.node as usize].heap_index = slot as u16;
            slot = best;
        }
        self.heap[slot] = item;
        nodes[item.node as usize].heap_index = slot as u16;
    }

    /// True if no child orders before its parent
    pub fn is_valid(&self) -> bool {
        (1..self.heap.len()).all(|i| !self.better(self.heap[i], self.heap[(i - 1) / D]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_node::NodeIndex;

    fn nodes(n: usize) -> Vec<PathNode> {
        (0..n).map(|i| PathNode::new(NodeIndex(i as u32))).collect()
    }

    #[test]
    fn test_capacity_rounding() -> Result<()> {
        assert_eq!(round_up_capacity(4), 5);
        assert_eq!(round_up_capacity(5), 5);
        assert_eq!(round_up_capacity(6), 9);
        assert_eq!(BinaryHeap::new(7, 2.0, true)?.capacity(), 9);
        assert!(BinaryHeap::new(0, 2.0, true).is_err());
        assert!(BinaryHeap::new(8, 1.0, true).is_err());
        Ok(())
    }

    #[test]
    fn test_pops_in_order_and_grows() -> Result<()> {
        let mut pn = nodes(200);
        let mut heap = BinaryHeap::new(1, 2.0, false)?;
        let mut rng = fastrand::Rng::with_seed(7);
        for i in 0..200 {
            pn[i].g = rng.u32(..1000);
            heap.add(&mut pn, i as u32)?;
        }
        assert!(heap.is_valid());

        let mut last = 0;
        while let Some(i) = heap.remove(&mut pn) {
            assert!(pn[i as usize].f() >= last);
            assert_eq!(pn[i as usize].heap_index, NOT_IN_HEAP);
            last = pn[i as usize].f();
        }
        Ok(())
    }

    #[test]
    fn test_random_operations_keep_heap_property() -> Result<()> {
        let mut pn = nodes(64);
        let mut heap = BinaryHeap::new(4, 2.0, true)?;
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..2000 {
            let i = rng.usize(..pn.len());
            match rng.u8(..3) {
                0 if pn[i].heap_index == NOT_IN_HEAP => {
                    pn[i].g = rng.u32(..500);
                    pn[i].h = rng.u32(..500);
                    heap.add(&mut pn, i as u32)?;
                }
                0 | 1 if pn[i].heap_index != NOT_IN_HEAP => {
                    pn[i].g = pn[i].g.saturating_sub(rng.u32(..50));
                    heap.add(&mut pn, i as u32)?;
                }
                _ => {
                    heap.remove(&mut pn);
                }
            }
            assert!(heap.is_valid());
            let in_heap = pn.iter().filter(|n| n.heap_index != NOT_IN_HEAP).count();
            assert_eq!(heap.len(), in_heap);
        }
        Ok(())
    }

    #[test]
    fn test_decrease_key_does_not_duplicate() -> Result<()> {
        let mut pn = nodes(10);
        let mut heap = BinaryHeap::new(16, 2.0, true)?;
        for i in 0..10 {
            pn[i].g = 100 + i as u32 * 10;
            heap.add(&mut pn, i as u32)?;
        }
        pn[9].g = 1;
        heap.add(&mut pn, 9)?;
        assert_eq!(heap.len(), 10);
        assert!(heap.is_valid());
        assert_eq!(heap.remove(&mut pn), Some(9));
        Ok(())
    }

    #[test]
    fn test_ties_prefer_larger_g() -> Result<()> {
        let mut pn = nodes(2);
        pn[0].g = 10;
        pn[0].h = 90;
        pn[1].g = 60;
        pn[1].h = 40;

        let mut heap = BinaryHeap::new(4, 2.0, true)?;
        heap.add(&mut pn, 0)?;
        heap.add(&mut pn, 1)?;
        assert_eq!(heap.remove(&mut pn), Some(1));

        let mut heap = BinaryHeap::new(4, 2.0, false)?;
        heap.add(&mut pn, 0)?;
        heap.add(&mut pn, 1)?;
        // Without the tie-break the first inserted stays on top
        assert_eq!(heap.remove(&mut pn), Some(0));
        Ok(())
    }

    #[test]
    fn test_heap_property_under_mixed_operations() -> Result<()> {
        let mut pn = nodes(300);
        let mut heap = BinaryHeap::new(8, 1.5, true)?;
        let mut rng = fastrand::Rng::with_seed(42);
        for round in 0..2000 {
            let i = rng.usize(..300);
            match round % 3 {
                0 | 1 => {
                    pn[i].g = rng.u32(..500);
                    pn[i].h = rng.u32(..500);
                    heap.add(&mut pn, i as u32)?;
                }
                _ => {
                    heap.remove(&mut pn);
                }
            }
            assert!(heap.is_valid());
        }
        Ok(())
    }

    #[test]
    fn test_rebuild_after_h_change() -> Result<()> {
        let mut pn = nodes(20);
        let mut heap = BinaryHeap::new(8, 2.0, true)?;
        for i in 0..20 {
            pn[i].h = i as u32;
            heap.add(&mut pn, i as u32)?;
        }
        for p in pn.iter_mut() {
            p.h = 100 - p.h;
        }
        heap.rebuild(&mut pn);
        assert!(heap.is_valid());
        assert_eq!(heap.remove(&mut pn), Some(19));
        for i in heap.items() {
            assert_ne!(pn[i as usize].heap_index, NOT_IN_HEAP);
        }
        Ok(())
    }

    #[test]
    fn test_overflow_is_an_error() -> Result<()> {
        let mut pn = nodes(MAX_HEAP_SIZE + 1);
        let mut heap = BinaryHeap::new(MAX_HEAP_SIZE, 2.0, false)?;
        for i in 0..MAX_HEAP_SIZE {
            heap.add(&mut pn, i as u32)?;
        }
        let result = heap.add(&mut pn, MAX_HEAP_SIZE as u32);
        assert!(matches!(result, Err(Error::HeapOverflow(_))));
        Ok(())
    }
}
