//! Collapse candidate queue
//!
//! A binary min-heap of (cost, edge) entries with lazy invalidation: every
//! edge carries a version stamp, re-scoring an edge bumps the stamp and
//! pushes a fresh entry, and entries whose stamp no longer matches are
//! dropped when they reach the top.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy)]
struct Entry {
    cost: f64,
    edge: usize,
    version: u32,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smallest cost first, ties broken by the smaller edge id
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.edge.cmp(&self.edge))
            .then_with(|| other.version.cmp(&self.version))
    }
}

/// Priority queue of edge collapse candidates
#[derive(Debug, Clone, Default)]
pub struct CandidateQueue {
    heap: BinaryHeap<Entry>,
    versions: Vec<u32>,
    stale_skipped: usize,
}

impl CandidateQueue {
    pub fn new(edge_count: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(edge_count),
            versions: vec![0; edge_count],
            stale_skipped: 0,
        }
    }

    /// Queue `edge` at `cost` under its current version
    pub fn push(&mut self, edge: usize, cost: f64) {
        self.heap.push(Entry {
            cost,
            edge,
            version: self.versions[edge],
        });
    }

    /// Retire every queued entry of `edge`
    pub fn invalidate(&mut self, edge: usize) {
        self.versions[edge] = self.versions[edge].wrapping_add(1);
    }

    /// Replace the queued cost of `edge`
    pub fn update(&mut self, edge: usize, cost: f64) {
        self.invalidate(edge);
        self.push(edge, cost);
    }

    /// Pop the cheapest live entry as `(edge, cost)`
    pub fn pop(&mut self) -> Option<(usize, f64)> {
        while let Some(entry) = self.heap.pop() {
            if entry.version == self.versions[entry.edge] {
                return Some((entry.edge, entry.cost));
            }
            self.stale_skipped += 1;
        }
        None
    }

    /// Entries in the heap, stale ones included
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn stale_skipped(&self) -> usize {
        self.stale_skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_cost_order() {
        let mut queue = CandidateQueue::new(4);
        queue.push(0, 3.0);
        queue.push(1, 1.0);
        queue.push(2, 2.0);
        queue.push(3, f64::INFINITY);
        assert_eq!(queue.pop(), Some((1, 1.0)));
        assert_eq!(queue.pop(), Some((2, 2.0)));
        assert_eq!(queue.pop(), Some((0, 3.0)));
        assert_eq!(queue.pop(), Some((3, f64::INFINITY)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_ties_break_on_edge_id() {
        let mut queue = CandidateQueue::new(3);
        queue.push(2, 1.0);
        queue.push(0, 1.0);
        queue.push(1, 1.0);
        assert_eq!(queue.pop().map(|(e, _)| e), Some(0));
        assert_eq!(queue.pop().map(|(e, _)| e), Some(1));
        assert_eq!(queue.pop().map(|(e, _)| e), Some(2));
    }

    #[test]
    fn test_stale_entries_are_skipped() {
        let mut queue = CandidateQueue::new(2);
        queue.push(0, 1.0);
        queue.push(1, 2.0);
        queue.update(0, 5.0);
        queue.invalidate(1);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some((0, 5.0)));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.stale_skipped(), 2);
        assert!(queue.is_empty());
    }
}
