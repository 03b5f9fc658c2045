//! Importance ordering with lazy re-prioritisation

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Contraction priority. Lower contracts earlier.
///
/// `shortcuts - (in_degree + out_degree) + contracted_neighbours`
#[inline]
pub(super) fn priority(shortcuts: usize, degree: usize, contracted_neighbours: u32) -> i64 {
    shortcuts as i64 - degree as i64 + contracted_neighbours as i64
}

/// Min-heap of `(priority, node)`; equal priorities pop in node id order
#[derive(Debug, Default)]
pub(super) struct ContractionQueue {
    heap: BinaryHeap<Reverse<(i64, u32)>>,
}

impl ContractionQueue {
    pub fn with_priorities(priorities: impl IntoIterator<Item = (u32, i64)>) -> Self {
        let heap = priorities
            .into_iter()
            .map(|(node, prio)| Reverse((prio, node)))
            .collect();
        Self { heap }
    }

    pub fn push(&mut self, node: u32, priority: i64) {
        self.heap.push(Reverse((priority, node)));
    }

    pub fn pop(&mut self) -> Option<(u32, i64)> {
        self.heap.pop().map(|Reverse((prio, node))| (node, prio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_lowest_priority_then_lowest_id() {
        let mut q = ContractionQueue::with_priorities([(3, 0), (1, 2), (2, 0), (0, -1)]);
        assert_eq!(q.pop(), Some((0, -1)));
        assert_eq!(q.pop(), Some((2, 0)));
        assert_eq!(q.pop(), Some((3, 0)));
        q.push(3, 1);
        assert_eq!(q.pop(), Some((3, 1)));
        assert_eq!(q.pop(), Some((1, 2)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_priority_formula() {
        assert_eq!(priority(0, 4, 0), -4);
        assert_eq!(priority(6, 4, 3), 5);
    }
}
