//! Local witness searches
//!
//! A witness is a path `u → … → w` that avoids the node being contracted
//! and is no longer than the path through it. Distances live in a hash map
//! because a search only touches a small neighbourhood.

use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::contraction::WorkGraph;
use super::Weight;

pub(super) struct Witnesses {
    /// Tentative distances from the source; each is the length of a real path
    pub dist: FxHashMap<u32, Weight>,
    /// The search stopped at the settle limit before exhausting its bound
    pub hit_limit: bool,
}

impl Witnesses {
    /// True when a path of length `<= weight` to `target` avoiding the contracted node exists
    #[inline]
    pub fn covers(&self, target: u32, weight: Weight) -> bool {
        self.dist.get(&target).is_some_and(|&d| d <= weight)
    }
}

/// Bounded Dijkstra from `source` over uncontracted nodes, never entering `avoid`
pub(super) fn search(
    graph: &WorkGraph,
    source: u32,
    avoid: u32,
    bound: Weight,
    settle_limit: usize,
) -> Witnesses {
    let mut dist: FxHashMap<u32, Weight> = FxHashMap::default();
    let mut heap = BinaryHeap::new();
    let mut settled = 0usize;
    let mut hit_limit = false;

    dist.insert(source, 0);
    heap.push(Reverse((0, source)));

    while let Some(Reverse((d, node))) = heap.pop() {
        if dist.get(&node).is_some_and(|&best| d > best) {
            continue;
        }
        if d > bound {
            break;
        }
        settled += 1;
        if settled > settle_limit {
            hit_limit = true;
            break;
        }

        for arc in graph.out(node) {
            if arc.node == avoid || graph.is_contracted(arc.node) {
                continue;
            }
            let nd = d.saturating_add(arc.weight);
            if nd > bound {
                continue;
            }
            let entry = dist.entry(arc.node).or_insert(Weight::MAX);
            if nd < *entry {
                *entry = nd;
                heap.push(Reverse((nd, arc.node)));
            }
        }
    }

    Witnesses { dist, hit_limit }
}
