//! Contraction hierarchy for one travel mode
//!
//! Every arc usable by the mode is kept (originals and shortcuts), split by
//! rank into an upward CSR (head ranked above tail) and a downward CSR (head
//! ranked below tail). Together they hold every outgoing arc of a node, so a
//! bounded Dijkstra over both is exact on the original graph while shortcuts
//! let it step over contracted intermediates.

use serde::Serialize;

use crate::mode::Mode;
use crate::network::{EdgeId, NodeId};

mod contraction;
mod ordering;
mod witness;

pub use contraction::build;

/// Fixed-point cost: network units × [`COST_SCALE`]
pub type Weight = u64;

/// Micro-units per network unit
pub const COST_SCALE: f64 = 1_000_000.0;

/// Unreached
pub const INFINITY: Weight = u64::MAX;

/// Largest weight a single arc, shortcut or budget may carry (about 4.6e12 network units).
/// The sum of two such weights still fits a `Weight`.
pub const MAX_WEIGHT: Weight = 1 << 62;

/// Convert a network-unit cost to a weight. `None` if it does not fit.
#[inline]
pub fn to_weight(cost: f64) -> Option<Weight> {
    let scaled = (cost * COST_SCALE).round();
    (scaled >= 0.0 && scaled <= MAX_WEIGHT as f64).then_some(scaled as Weight)
}

#[inline]
pub fn to_cost(weight: Weight) -> f64 {
    weight as f64 / COST_SCALE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShortcutId(pub u32);

impl ShortcutId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What an arc stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ArcRef {
    Original(EdgeId),
    Shortcut(ShortcutId),
}

/// Shortcut `tail → via → head`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortcut {
    pub tail: NodeId,
    pub head: NodeId,
    pub weight: Weight,
    /// The contracted node this shortcut bypasses
    pub via: NodeId,
    /// `tail → via`
    pub first: ArcRef,
    /// `via → head`
    pub second: ArcRef,
}

/// CSR arcs keyed by tail
#[derive(Debug, Clone, Default)]
pub struct ArcTable {
    pub offsets: Vec<u64>,
    pub heads: Vec<u32>,
    pub weights: Vec<Weight>,
    pub refs: Vec<ArcRef>,
}

impl ArcTable {
    /// Counting sort of `(tail, head, weight, ref)` arcs, stable in input order
    pub(crate) fn from_arcs(n_nodes: usize, arcs: &[(u32, u32, Weight, ArcRef)]) -> Self {
        let mut offsets = vec![0u64; n_nodes + 1];
        for &(tail, ..) in arcs {
            offsets[tail as usize + 1] += 1;
        }
        for i in 0..n_nodes {
            offsets[i + 1] += offsets[i];
        }

        let mut cursor: Vec<u64> = offsets[..n_nodes].to_vec();
        let mut heads = vec![0u32; arcs.len()];
        let mut weights = vec![0; arcs.len()];
        let mut refs = vec![ArcRef::Original(EdgeId(0)); arcs.len()];
        for &(tail, head, weight, arc) in arcs {
            let slot = cursor[tail as usize] as usize;
            heads[slot] = head;
            weights[slot] = weight;
            refs[slot] = arc;
            cursor[tail as usize] += 1;
        }

        Self {
            offsets,
            heads,
            weights,
            refs,
        }
    }

    #[inline(always)]
    pub fn range(&self, node: u32) -> std::ops::Range<usize> {
        self.offsets[node as usize] as usize..self.offsets[node as usize + 1] as usize
    }

    /// `(head, weight, ref)` of the arcs leaving `node`
    #[inline(always)]
    pub fn arcs(&self, node: u32) -> impl Iterator<Item = (u32, Weight, ArcRef)> + '_ {
        self.range(node)
            .map(move |i| (self.heads[i], self.weights[i], self.refs[i]))
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }
}

/// Preprocessing counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HierarchyStats {
    pub n_nodes: usize,
    pub n_original_arcs: usize,
    pub n_shortcuts: usize,
    pub n_up_arcs: usize,
    pub n_down_arcs: usize,
    pub witness_searches: u64,
    /// Witness searches cut off by the settle limit
    pub witness_limit_hits: u64,
    /// Nodes re-queued by lazy re-prioritisation
    pub lazy_updates: u64,
    pub build_ms: u64,
}

/// Contraction hierarchy of one mode over one network version
#[derive(Debug, Clone)]
pub struct ContractionHierarchy {
    pub(crate) network_version: u64,
    pub(crate) mode: Mode,
    pub(crate) n_edges: usize,
    /// Node → contraction rank
    pub(crate) rank: Vec<u32>,
    /// Rank → node
    pub(crate) order: Vec<NodeId>,
    pub(crate) up: ArcTable,
    pub(crate) down: ArcTable,
    /// Downward arcs keyed by head: `down_in_arcs[down_in_offsets[v]..]` index into `down`
    pub(crate) down_in_offsets: Vec<u64>,
    pub(crate) down_in_arcs: Vec<u32>,
    /// Downward arc index → tail
    pub(crate) down_tails: Vec<u32>,
    pub(crate) shortcuts: Vec<Shortcut>,
    /// Arc key (edge id, then `n_edges + shortcut id`) → shortcuts that directly contain it
    pub(crate) parent_offsets: Vec<u64>,
    pub(crate) parents: Vec<ShortcutId>,
    pub(crate) stats: HierarchyStats,
}

impl ContractionHierarchy {
    pub fn network_version(&self) -> u64 {
        self.network_version
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn n_nodes(&self) -> usize {
        self.rank.len()
    }

    pub fn rank(&self, node: NodeId) -> u32 {
        self.rank[node.index()]
    }

    /// Nodes in contraction order
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn up(&self) -> &ArcTable {
        &self.up
    }

    pub fn down(&self) -> &ArcTable {
        &self.down
    }

    pub fn shortcuts(&self) -> &[Shortcut] {
        &self.shortcuts
    }

    pub fn shortcut(&self, id: ShortcutId) -> &Shortcut {
        &self.shortcuts[id.index()]
    }

    pub fn stats(&self) -> &HierarchyStats {
        &self.stats
    }

    /// Downward arcs entering `node` from higher-ranked tails, as `(tail, weight, ref)`
    #[inline]
    pub(crate) fn down_in(&self, node: u32) -> impl Iterator<Item = (u32, Weight, ArcRef)> + '_ {
        let start = self.down_in_offsets[node as usize] as usize;
        let end = self.down_in_offsets[node as usize + 1] as usize;
        self.down_in_arcs[start..end].iter().map(move |&i| {
            let i = i as usize;
            (self.down_tails[i], self.down.weights[i], self.down.refs[i])
        })
    }

    fn parent_key(&self, arc: ArcRef) -> usize {
        match arc {
            ArcRef::Original(e) => e.index(),
            ArcRef::Shortcut(s) => self.n_edges + s.index(),
        }
    }

    /// Shortcuts that use `arc` as one of their two halves. Overlay-added edges have none.
    pub fn parents_of(&self, arc: ArcRef) -> &[ShortcutId] {
        if matches!(arc, ArcRef::Original(e) if e.index() >= self.n_edges) {
            return &[];
        }
        let key = self.parent_key(arc);
        if key + 1 >= self.parent_offsets.len() {
            return &[];
        }
        let start = self.parent_offsets[key] as usize;
        let end = self.parent_offsets[key + 1] as usize;
        &self.parents[start..end]
    }

    /// Expand an arc into the original edges it stands for, in travel order
    pub fn unpack(&self, arc: ArcRef) -> Vec<EdgeId> {
        let mut path = Vec::new();
        self.unpack_into(arc, &mut path);
        path
    }

    pub fn unpack_into(&self, arc: ArcRef, path: &mut Vec<EdgeId>) {
        let mut stack = vec![arc];
        while let Some(arc) = stack.pop() {
            match arc {
                ArcRef::Original(edge) => path.push(edge),
                ArcRef::Shortcut(id) => {
                    let shortcut = &self.shortcuts[id.index()];
                    stack.push(shortcut.second);
                    stack.push(shortcut.first);
                }
            }
        }
    }
}
