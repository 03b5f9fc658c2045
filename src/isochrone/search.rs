//! Bounded searches over the hierarchy
//!
//! Key points:
//! 1. Version-stamped distances (O(1) reset between queries)
//! 2. One reusable state per worker thread (no allocation per query)
//! 3. Labels above the budget are never pushed

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::cancel::{CancelToken, Interrupt};
use crate::ch::{ArcRef, ContractionHierarchy, ShortcutId, Weight, INFINITY};
use crate::network::NodeId;
use crate::overlay::ResolvedOverlay;

/// Sweep steps between two cancellation checks in the PHAST sweep
const SWEEP_CHECK_INTERVAL: usize = 1024;

#[derive(Clone, Copy)]
struct DistEntry {
    dist: Weight,
    version: u32,
}

/// Reusable search state with version stamping
pub(crate) struct SearchState {
    dist: Vec<DistEntry>,
    parent: Vec<(u32, ArcRef)>,
    version: u32,
    heap: BinaryHeap<Reverse<(Weight, u32)>>,
    settled: Vec<u32>,
}

impl SearchState {
    fn new(n_nodes: usize) -> Self {
        Self {
            dist: vec![
                DistEntry {
                    dist: INFINITY,
                    version: 0
                };
                n_nodes
            ],
            parent: vec![(u32::MAX, ArcRef::Shortcut(ShortcutId(u32::MAX))); n_nodes],
            version: 0,
            heap: BinaryHeap::with_capacity(1024),
            settled: Vec::new(),
        }
    }

    #[inline(always)]
    fn reset(&mut self) {
        self.version = self.version.wrapping_add(1);
        if self.version == 0 {
            // wrapped: full reset
            for entry in &mut self.dist {
                entry.version = 0;
            }
            self.version = 1;
        }
        self.heap.clear();
        self.settled.clear();
    }

    #[inline(always)]
    pub fn get_dist(&self, node: u32) -> Weight {
        let entry = &self.dist[node as usize];
        if entry.version == self.version {
            entry.dist
        } else {
            INFINITY
        }
    }

    #[inline(always)]
    fn set_dist(&mut self, node: u32, dist: Weight) {
        self.dist[node as usize] = DistEntry {
            dist,
            version: self.version,
        };
    }

    /// Lower the label of `node` to `dist` via `arc` from `from`; true if it improved
    #[inline(always)]
    pub fn relax(&mut self, from: u32, node: u32, dist: Weight, arc: ArcRef) -> bool {
        if dist < self.get_dist(node) {
            self.set_dist(node, dist);
            self.parent[node as usize] = (from, arc);
            self.heap.push(Reverse((dist, node)));
            true
        } else {
            false
        }
    }

    /// Pop the next node to settle, skipping stale heap entries
    #[inline]
    pub fn pop(&mut self) -> Option<(u32, Weight)> {
        while let Some(Reverse((d, node))) = self.heap.pop() {
            if d == self.get_dist(node) {
                return Some((node, d));
            }
        }
        None
    }

    pub fn start(&mut self, origin: u32) {
        self.reset();
        self.set_dist(origin, 0);
        self.heap.push(Reverse((0, origin)));
    }

    pub fn mark_settled(&mut self, node: u32) {
        self.settled.push(node);
    }

    /// Settled nodes sorted by id, with their parent arcs when requested
    pub fn finish(
        &self,
        origin: u32,
        with_paths: bool,
    ) -> (Vec<(NodeId, Weight)>, Option<ParentMap>) {
        let mut reached: Vec<(NodeId, Weight)> = self
            .settled
            .iter()
            .map(|&n| (NodeId(n), self.get_dist(n)))
            .collect();
        reached.sort_unstable_by_key(|(n, _)| *n);

        let parents = with_paths.then(|| {
            self.settled
                .iter()
                .filter(|&&n| n != origin)
                .map(|&n| {
                    let (from, arc) = self.parent[n as usize];
                    (NodeId(n), (NodeId(from), arc))
                })
                .collect()
        });
        (reached, parents)
    }
}

/// Node → `(predecessor, arc into node)`
pub(crate) type ParentMap = FxHashMap<NodeId, (NodeId, ArcRef)>;

thread_local! {
    static SEARCH_STATE: RefCell<Option<SearchState>> = const { RefCell::new(None) };
}

/// Run `f` with this thread's search state, sized for `n_nodes`
pub(crate) fn with_state<R>(n_nodes: usize, f: impl FnOnce(&mut SearchState) -> R) -> R {
    SEARCH_STATE.with(|cell| {
        let mut slot = cell.borrow_mut();
        // a different network size means a different dataset
        if slot.as_ref().is_some_and(|s| s.dist.len() != n_nodes) {
            *slot = None;
        }
        let state = slot.get_or_insert_with(|| SearchState::new(n_nodes));
        f(state)
    })
}

/// Raw search output
#[derive(Debug, Default)]
pub(crate) struct SearchOutcome {
    pub reached: Vec<(NodeId, Weight)>,
    pub parents: Option<ParentMap>,
    pub interrupt: Option<Interrupt>,
    pub settled: usize,
    pub relaxed: usize,
}

#[inline]
fn interrupted(cancel: Option<&CancelToken>) -> Option<Interrupt> {
    cancel.and_then(|c| c.check().err())
}

/// Bounded Dijkstra over upward and downward arcs, skipping what the overlay invalidates
pub(crate) fn bounded(
    ch: &ContractionHierarchy,
    origin: NodeId,
    budget: Weight,
    overlay: Option<&ResolvedOverlay>,
    with_paths: bool,
    cancel: Option<&CancelToken>,
) -> SearchOutcome {
    with_state(ch.n_nodes(), |state| {
        state.start(origin.0);
        let mut relaxed = 0usize;
        let mut interrupt = None;

        while let Some((u, d)) = state.pop() {
            state.mark_settled(u);
            if let Some(i) = interrupted(cancel) {
                interrupt = Some(i);
                break;
            }

            for (head, weight, arc) in ch.up().arcs(u).chain(ch.down().arcs(u)) {
                if overlay.is_some_and(|o| !o.keeps(arc)) {
                    continue;
                }
                let nd = d.saturating_add(weight);
                if nd <= budget && state.relax(u, head, nd, arc) {
                    relaxed += 1;
                }
            }
            if let Some(overlay) = overlay {
                for &(head, weight, edge) in overlay.arcs_from(u) {
                    let nd = d.saturating_add(weight);
                    if nd <= budget && state.relax(u, head, nd, ArcRef::Original(edge)) {
                        relaxed += 1;
                    }
                }
            }
        }

        let (reached, parents) = state.finish(origin.0, with_paths);
        SearchOutcome {
            settled: reached.len(),
            reached,
            parents,
            interrupt,
            relaxed,
        }
    })
}

/// PHAST: bounded upward search, then one downward sweep in decreasing rank.
/// A node's label is final once the sweep has passed it.
pub(crate) fn phast(
    ch: &ContractionHierarchy,
    origin: NodeId,
    budget: Weight,
    with_paths: bool,
    cancel: Option<&CancelToken>,
) -> SearchOutcome {
    with_state(ch.n_nodes(), |state| {
        state.start(origin.0);
        let mut relaxed = 0usize;
        let mut upward_settled = 0usize;

        // upward phase: labels are upper bounds only
        while let Some((u, d)) = state.pop() {
            if let Some(i) = interrupted(cancel) {
                state.settled.clear();
                state.mark_settled(origin.0);
                let (reached, parents) = state.finish(origin.0, with_paths);
                return SearchOutcome {
                    reached,
                    parents,
                    interrupt: Some(i),
                    settled: upward_settled,
                    relaxed,
                };
            }
            upward_settled += 1;
            for (head, weight, arc) in ch.up().arcs(u) {
                let nd = d.saturating_add(weight);
                if nd <= budget && state.relax(u, head, nd, arc) {
                    relaxed += 1;
                }
            }
        }

        // downward sweep
        let mut interrupt = None;
        for (step, &v) in ch.order().iter().rev().enumerate() {
            if step % SWEEP_CHECK_INTERVAL == 0 {
                if let Some(i) = interrupted(cancel) {
                    interrupt = Some(i);
                    break;
                }
            }
            let v = v.0;
            let mut best = state.get_dist(v);
            let mut via = None;
            for (tail, weight, arc) in ch.down_in(v) {
                let du = state.get_dist(tail);
                if du == INFINITY {
                    continue;
                }
                let nd = du.saturating_add(weight);
                if nd <= budget && nd < best {
                    best = nd;
                    via = Some((tail, arc));
                }
            }
            if let Some((tail, arc)) = via {
                state.set_dist(v, best);
                state.parent[v as usize] = (tail, arc);
                relaxed += 1;
            }
            if best <= budget {
                state.mark_settled(v);
            }
        }
        state.heap.clear();
        if interrupt.is_some() && !state.settled.contains(&origin.0) {
            state.mark_settled(origin.0);
        }

        let (reached, parents) = state.finish(origin.0, with_paths);
        SearchOutcome {
            settled: upward_settled + reached.len(),
            reached,
            parents,
            interrupt,
            relaxed,
        }
    })
}
