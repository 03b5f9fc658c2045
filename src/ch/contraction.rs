//! Node contraction
//!
//! Nodes are contracted one at a time in importance order. For each node the
//! witness searches (one per in-neighbour) run in parallel on an immutable
//! view of the working graph; the resulting shortcuts are then applied by the
//! single writer before the next node is picked.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::time::Instant;

use super::ordering::{priority, ContractionQueue};
use super::{
    to_weight, witness, ArcRef, ArcTable, ContractionHierarchy, HierarchyStats, Shortcut,
    ShortcutId, Weight, MAX_WEIGHT,
};
use crate::config::ContractionConfig;
use crate::error::BuildError;
use crate::mode::Mode;
use crate::network::{EdgeId, Network, NodeId};

#[derive(Debug, Clone, Copy)]
pub(super) struct WorkArc {
    pub node: u32,
    pub weight: Weight,
    pub arc: ArcRef,
}

/// Remaining (uncontracted) graph plus the shortcuts created so far
pub(super) struct WorkGraph {
    out: Vec<Vec<WorkArc>>,
    inc: Vec<Vec<WorkArc>>,
    contracted: Vec<bool>,
    contracted_neighbours: Vec<u32>,
    shortcuts: Vec<Shortcut>,
}

/// A shortcut the contraction of `via` requires
#[derive(Debug, Clone, Copy)]
struct Candidate {
    tail: u32,
    head: u32,
    weight: Weight,
    first: ArcRef,
    second: ArcRef,
}

/// Outcome of simulating the contraction of one node
struct Plan {
    via: u32,
    candidates: Vec<Candidate>,
    degree: usize,
    searches: u64,
    limit_hits: u64,
}

impl Plan {
    fn priority(&self, graph: &WorkGraph) -> i64 {
        priority(
            self.candidates.len(),
            self.degree,
            graph.contracted_neighbours[self.via as usize],
        )
    }
}

impl WorkGraph {
    fn new(n_nodes: usize, arcs: &[(u32, u32, Weight, ArcRef)]) -> Self {
        let mut out = vec![Vec::new(); n_nodes];
        let mut inc = vec![Vec::new(); n_nodes];
        for &(tail, head, weight, arc) in arcs {
            out[tail as usize].push(WorkArc {
                node: head,
                weight,
                arc,
            });
            inc[head as usize].push(WorkArc {
                node: tail,
                weight,
                arc,
            });
        }
        Self {
            out,
            inc,
            contracted: vec![false; n_nodes],
            contracted_neighbours: vec![0; n_nodes],
            shortcuts: Vec::new(),
        }
    }

    #[inline(always)]
    pub fn out(&self, node: u32) -> &[WorkArc] {
        &self.out[node as usize]
    }

    #[inline(always)]
    pub fn is_contracted(&self, node: u32) -> bool {
        self.contracted[node as usize]
    }

    /// Cheapest arc to each distinct uncontracted neighbour, sorted by node id
    fn cheapest(arcs: &[WorkArc], contracted: &[bool], exclude: u32) -> Vec<WorkArc> {
        let mut best: FxHashMap<u32, WorkArc> = FxHashMap::default();
        for a in arcs {
            if a.node == exclude || contracted[a.node as usize] {
                continue;
            }
            best.entry(a.node)
                .and_modify(|b| {
                    if a.weight < b.weight {
                        *b = *a;
                    }
                })
                .or_insert(*a);
        }
        let mut v: Vec<WorkArc> = best.into_values().collect();
        v.sort_unstable_by_key(|a| a.node);
        v
    }

    /// Shortcuts needed if `v` were contracted now
    fn plan(&self, v: u32, config: &ContractionConfig) -> Plan {
        let ins = Self::cheapest(&self.inc[v as usize], &self.contracted, v);
        let outs = Self::cheapest(&self.out[v as usize], &self.contracted, v);
        let degree = ins.len() + outs.len();

        if ins.is_empty() || outs.is_empty() {
            return Plan {
                via: v,
                candidates: Vec::new(),
                degree,
                searches: 0,
                limit_hits: 0,
            };
        }

        let max_out = outs.iter().map(|a| a.weight).max().unwrap_or(0);
        let per_source = |into: &WorkArc| -> (Vec<Candidate>, bool) {
            let bound = into.weight.saturating_add(max_out);
            let witnesses = witness::search(self, into.node, v, bound, config.witness_settle_limit);
            let mut found = Vec::new();
            for from in &outs {
                if from.node == into.node {
                    continue;
                }
                let weight = into.weight.saturating_add(from.weight);
                if weight > MAX_WEIGHT || witnesses.covers(from.node, weight) {
                    continue;
                }
                found.push(Candidate {
                    tail: into.node,
                    head: from.node,
                    weight,
                    first: into.arc,
                    second: from.arc,
                });
            }
            (found, witnesses.hit_limit)
        };

        let results: Vec<(Vec<Candidate>, bool)> = if ins.len() >= config.parallel_witness_min {
            ins.par_iter().map(per_source).collect()
        } else {
            ins.iter().map(per_source).collect()
        };

        let limit_hits = results.iter().filter(|(_, hit)| *hit).count() as u64;
        Plan {
            via: v,
            candidates: results.into_iter().flat_map(|(c, _)| c).collect(),
            degree,
            searches: ins.len() as u64,
            limit_hits,
        }
    }

    /// Insert the planned shortcuts and remove `via` from the working graph
    fn contract(&mut self, plan: Plan) {
        let via = plan.via;
        for c in plan.candidates {
            self.insert_shortcut(c, via);
        }

        self.contracted[via as usize] = true;
        let outs = std::mem::take(&mut self.out[via as usize]);
        let ins = std::mem::take(&mut self.inc[via as usize]);
        let mut touched: Vec<u32> = outs.iter().chain(ins.iter()).map(|a| a.node).collect();
        touched.sort_unstable();
        touched.dedup();
        for x in touched {
            if x == via {
                continue;
            }
            self.contracted_neighbours[x as usize] += 1;
            self.out[x as usize].retain(|a| a.node != via);
            self.inc[x as usize].retain(|a| a.node != via);
        }
    }

    fn insert_shortcut(&mut self, c: Candidate, via: u32) {
        let existing = &self.out[c.tail as usize];
        if existing
            .iter()
            .any(|a| a.node == c.head && a.weight <= c.weight)
        {
            return;
        }

        let shortcut = Shortcut {
            tail: NodeId(c.tail),
            head: NodeId(c.head),
            weight: c.weight,
            via: NodeId(via),
            first: c.first,
            second: c.second,
        };

        // a heavier shortcut between the same pair is replaced in place
        let heavier = existing.iter().position(|a| {
            a.node == c.head && matches!(a.arc, ArcRef::Shortcut(_))
        });
        if let Some(pos) = heavier {
            let arc = self.out[c.tail as usize][pos].arc;
            if let ArcRef::Shortcut(id) = arc {
                self.shortcuts[id.index()] = shortcut;
                self.out[c.tail as usize][pos].weight = c.weight;
                if let Some(back) = self.inc[c.head as usize].iter_mut().find(|a| a.arc == arc) {
                    back.weight = c.weight;
                }
                return;
            }
        }

        let arc = ArcRef::Shortcut(ShortcutId(self.shortcuts.len() as u32));
        self.shortcuts.push(shortcut);
        self.out[c.tail as usize].push(WorkArc {
            node: c.head,
            weight: c.weight,
            arc,
        });
        self.inc[c.head as usize].push(WorkArc {
            node: c.tail,
            weight: c.weight,
            arc,
        });
    }
}

/// Usable arcs of `mode` as `(tail, head, weight, ref)`, after validating their costs
fn original_arcs(
    network: &Network,
    mode: Mode,
) -> Result<Vec<(u32, u32, Weight, ArcRef)>, BuildError> {
    let mut arcs = Vec::with_capacity(network.n_edges());
    for (i, e) in network.edges().iter().enumerate() {
        let edge = EdgeId(i as u32);
        let Some(cost) = e.costs.get(mode) else {
            continue;
        };
        if !cost.is_finite() || cost < 0.0 {
            return Err(BuildError::InvalidCost { edge, mode, cost });
        }
        let weight = to_weight(cost).ok_or(BuildError::CostOutOfRange { edge, mode, cost })?;
        if network.mode_cost(edge, mode).is_none() || e.from == e.to {
            continue;
        }
        arcs.push((e.from.0, e.to.0, weight, ArcRef::Original(edge)));
    }
    Ok(arcs)
}

/// Build the contraction hierarchy of `mode` over `network`
pub fn build(
    network: &Network,
    mode: Mode,
    config: &ContractionConfig,
) -> Result<ContractionHierarchy, BuildError> {
    let start = Instant::now();
    network
        .check_adjacency()
        .map_err(BuildError::InconsistentAdjacency)?;

    let n_nodes = network.n_nodes();
    let originals = original_arcs(network, mode)?;
    tracing::info!(
        %mode,
        version = network.version(),
        nodes = n_nodes,
        arcs = originals.len(),
        "building contraction hierarchy"
    );

    let mut graph = WorkGraph::new(n_nodes, &originals);
    let mut stats = HierarchyStats {
        n_nodes,
        n_original_arcs: originals.len(),
        ..Default::default()
    };

    let initial: Vec<(u32, i64)> = (0..n_nodes as u32)
        .into_par_iter()
        .map(|v| (v, graph.plan(v, config).priority(&graph)))
        .collect();
    let mut queue = ContractionQueue::with_priorities(initial);

    let mut rank = vec![0u32; n_nodes];
    let mut order = Vec::with_capacity(n_nodes);
    let progress_step = (n_nodes / 10).max(1);

    while let Some((v, popped)) = queue.pop() {
        if graph.is_contracted(v) {
            continue;
        }
        let plan = graph.plan(v, config);
        stats.witness_searches += plan.searches;
        stats.witness_limit_hits += plan.limit_hits;

        let current = plan.priority(&graph);
        if current > popped {
            queue.push(v, current);
            stats.lazy_updates += 1;
            continue;
        }

        rank[v as usize] = order.len() as u32;
        order.push(NodeId(v));
        graph.contract(plan);

        if order.len() % progress_step == 0 {
            tracing::debug!(
                contracted = order.len(),
                total = n_nodes,
                shortcuts = graph.shortcuts.len(),
                "contraction progress"
            );
        }
    }

    let shortcuts = graph.shortcuts;
    let mut up_arcs = Vec::new();
    let mut down_arcs = Vec::new();
    let shortcut_arcs = shortcuts.iter().enumerate().map(|(i, s)| {
        (s.tail.0, s.head.0, s.weight, ArcRef::Shortcut(ShortcutId(i as u32)))
    });
    for arc in originals.iter().copied().chain(shortcut_arcs) {
        if rank[arc.1 as usize] > rank[arc.0 as usize] {
            up_arcs.push(arc);
        } else {
            down_arcs.push(arc);
        }
    }

    let up = ArcTable::from_arcs(n_nodes, &up_arcs);
    let down = ArcTable::from_arcs(n_nodes, &down_arcs);

    // downward arcs keyed by head, for the PHAST sweep
    let mut down_tails = vec![0u32; down.len()];
    for u in 0..n_nodes as u32 {
        for i in down.range(u) {
            down_tails[i] = u;
        }
    }
    let (down_in_offsets, down_in_arcs) =
        index_by(n_nodes, down.heads.iter().map(|&h| h as usize).enumerate());

    let n_edges = network.n_edges();
    let (parent_offsets, parent_raw) = index_by(
        n_edges + shortcuts.len(),
        shortcuts.iter().enumerate().flat_map(|(i, s)| {
            let key = |arc: ArcRef| match arc {
                ArcRef::Original(e) => e.index(),
                ArcRef::Shortcut(p) => n_edges + p.index(),
            };
            [(i, key(s.first)), (i, key(s.second))]
        }),
    );
    let parents = parent_raw.into_iter().map(ShortcutId).collect();

    stats.n_shortcuts = shortcuts.len();
    stats.n_up_arcs = up.len();
    stats.n_down_arcs = down.len();
    stats.build_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        %mode,
        shortcuts = stats.n_shortcuts,
        up = stats.n_up_arcs,
        down = stats.n_down_arcs,
        witness_searches = stats.witness_searches,
        witness_limit_hits = stats.witness_limit_hits,
        lazy_updates = stats.lazy_updates,
        elapsed_ms = stats.build_ms,
        "contraction hierarchy built"
    );

    Ok(ContractionHierarchy {
        network_version: network.version(),
        mode,
        n_edges,
        rank,
        order,
        up,
        down,
        down_in_offsets,
        down_in_arcs,
        down_tails,
        shortcuts,
        parent_offsets,
        parents,
        stats,
    })
}

/// CSR over `(value, key)` pairs: `values[offsets[k]..offsets[k + 1]]` hold the values of key `k`
fn index_by(
    n_keys: usize,
    pairs: impl Iterator<Item = (usize, usize)> + Clone,
) -> (Vec<u64>, Vec<u32>) {
    let mut offsets = vec![0u64; n_keys + 1];
    for (_, key) in pairs.clone() {
        offsets[key + 1] += 1;
    }
    for i in 0..n_keys {
        offsets[i + 1] += offsets[i];
    }
    let mut cursor: Vec<u64> = offsets[..n_keys].to_vec();
    let mut values = vec![0u32; offsets[n_keys] as usize];
    for (value, key) in pairs {
        values[cursor[key] as usize] = value as u32;
        cursor[key] += 1;
    }
    (offsets, values)
}
