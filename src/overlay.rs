//! Scenario overlays
//!
//! An overlay is a small, ordered list of edge edits targeting one network
//! version. It is pure data: queries resolve it on the fly and the shared
//! network and hierarchy are never touched. Scenario edits only affect
//! reachability (catchment-style) queries.
//!
//! ```json
//! {
//!   "scenario_id": "3f0e9c1a-bike-lane",
//!   "base_version": 4,
//!   "operations": [
//!     { "op": "delete", "edge": 17 },
//!     { "op": "modify_cost", "edge": 18, "costs": { "walk": 40.0 } },
//!     { "op": "add", "from": 3, "to": 9, "costs": { "walk": 25.0, "bike": 8.0 } }
//!   ]
//! }
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::ch::{to_weight, ArcRef, ContractionHierarchy, ShortcutId, Weight};
use crate::error::QueryError;
use crate::mode::Mode;
use crate::network::{EdgeId, ModeCosts, Network, NodeId};

/// One edge edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EdgeOp {
    /// New directed edge. Its id is `edge_count + i` for the i-th `Add` of the overlay.
    Add {
        from: NodeId,
        to: NodeId,
        costs: ModeCosts,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        geometry: Option<u64>,
    },
    /// Replace every per-mode cost of an edge
    ModifyCost { edge: EdgeId, costs: ModeCosts },
    Delete { edge: EdgeId },
}

/// Per-request network delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOverlay {
    pub scenario_id: String,
    /// Network version the edits were authored against
    pub base_version: u64,
    pub operations: Vec<EdgeOp>,
}

impl ScenarioOverlay {
    pub fn new(scenario_id: impl Into<String>, base_version: u64, operations: Vec<EdgeOp>) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            base_version,
            operations,
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Geometry reference of `edge` as seen through the overlay: base edges
    /// from `network`, added edges from their `Add` operation
    pub fn geometry_of(&self, network: &Network, edge: EdgeId) -> Option<u64> {
        match edge.index().checked_sub(network.n_edges()) {
            None => network.edge(edge).and_then(|e| e.geometry),
            Some(i) => self
                .operations
                .iter()
                .filter_map(|op| match op {
                    EdgeOp::Add { geometry, .. } => Some(*geometry),
                    _ => None,
                })
                .nth(i)
                .flatten(),
        }
    }

    /// Geometry references for a path that may run over added edges
    pub fn geometry_refs(&self, network: &Network, path: &[EdgeId]) -> Vec<u64> {
        path.iter().filter_map(|&e| self.geometry_of(network, e)).collect()
    }

    /// Apply the operations in order against `network` for `mode`
    pub(crate) fn resolve(
        &self,
        network: &Network,
        mode: Mode,
    ) -> Result<ResolvedOverlay, QueryError> {
        if self.base_version != network.version() {
            return Err(QueryError::VersionMismatch {
                overlay: self.base_version,
                active: network.version(),
            });
        }

        let n_nodes = network.n_nodes();
        let n_edges = network.n_edges();
        let mut state: FxHashMap<EdgeId, EdgeState> = FxHashMap::default();
        let mut n_added = 0u32;

        let current = |state: &FxHashMap<EdgeId, EdgeState>, edge: EdgeId| match state.get(&edge) {
            Some(entry) => *entry,
            None => network.edge(edge).map(|e| (e.from, e.to, e.costs)),
        };

        for (i, op) in self.operations.iter().enumerate() {
            match op {
                EdgeOp::Add { from, to, costs, .. } => {
                    for node in [from, to] {
                        if node.index() >= n_nodes {
                            return Err(QueryError::InvalidArgument(format!(
                                "overlay operation {i} references unknown node {node}"
                            )));
                        }
                    }
                    check_costs(i, costs)?;
                    let id = EdgeId(n_edges as u32 + n_added);
                    n_added += 1;
                    state.insert(id, Some((*from, *to, *costs)));
                }
                EdgeOp::ModifyCost { edge, costs } => {
                    let (from, to, _) =
                        current(&state, *edge).ok_or_else(|| unknown_edge(i, *edge))?;
                    check_costs(i, costs)?;
                    state.insert(*edge, Some((from, to, *costs)));
                }
                EdgeOp::Delete { edge } => {
                    current(&state, *edge).ok_or_else(|| unknown_edge(i, *edge))?;
                    state.insert(*edge, None);
                }
            }
        }

        let mut touched: Vec<_> = state.into_iter().collect();
        touched.sort_unstable_by_key(|(id, _)| *id);

        let mut resolved = ResolvedOverlay {
            n_ops: self.operations.len(),
            ..Default::default()
        };
        for (id, edge) in touched {
            if id.index() < n_edges {
                resolved.masked.insert(id);
            }
            let Some((from, to, costs)) = edge else {
                continue;
            };
            let Some(cost) = costs.get(mode) else {
                continue;
            };
            let allowed = network.nodes()[from.index()].modes.contains(mode)
                && network.nodes()[to.index()].modes.contains(mode);
            if !allowed || from == to {
                continue;
            }
            let weight = to_weight(cost).ok_or_else(|| {
                QueryError::InvalidArgument(format!(
                    "overlay cost {cost} of edge {id} is out of range"
                ))
            })?;
            resolved.arcs.entry(from.0).or_default().push((to.0, weight, id));
        }
        Ok(resolved)
    }
}

/// `(from, to, costs)` of an edge after the operations so far, `None` once deleted
type EdgeState = Option<(NodeId, NodeId, ModeCosts)>;

fn unknown_edge(op: usize, edge: EdgeId) -> QueryError {
    QueryError::InvalidArgument(format!(
        "overlay operation {op} references unknown or deleted edge {edge}"
    ))
}

fn check_costs(op: usize, costs: &ModeCosts) -> Result<(), QueryError> {
    for &mode in Mode::all() {
        if let Some(cost) = costs.get(mode) {
            if !cost.is_finite() || cost < 0.0 {
                return Err(QueryError::InvalidArgument(format!(
                    "overlay operation {op}: {mode} cost {cost} is not a finite non-negative number"
                )));
            }
        }
    }
    Ok(())
}

/// An overlay applied to one network and mode
#[derive(Debug, Default)]
pub(crate) struct ResolvedOverlay {
    pub n_ops: usize,
    /// Base edges whose base arc must be skipped (deleted or re-costed)
    pub masked: FxHashSet<EdgeId>,
    /// Shortcuts whose unpacked path runs over a masked edge
    pub stale: FxHashSet<ShortcutId>,
    /// Live replacement and added arcs by tail: `(head, weight, edge)`
    pub arcs: FxHashMap<u32, Vec<(u32, Weight, EdgeId)>>,
}

impl ResolvedOverlay {
    /// Mark every shortcut that transitively contains a masked edge
    pub fn mark_stale(&mut self, ch: &ContractionHierarchy) {
        let mut stack: Vec<ArcRef> = self.masked.iter().map(|&e| ArcRef::Original(e)).collect();
        while let Some(arc) = stack.pop() {
            for &parent in ch.parents_of(arc) {
                if self.stale.insert(parent) {
                    stack.push(ArcRef::Shortcut(parent));
                }
            }
        }
    }

    /// Base arc `arc` is unaffected by the overlay
    #[inline]
    pub fn keeps(&self, arc: ArcRef) -> bool {
        match arc {
            ArcRef::Original(e) => !self.masked.contains(&e),
            ArcRef::Shortcut(s) => !self.stale.contains(&s),
        }
    }

    #[inline]
    pub fn arcs_from(&self, node: u32) -> &[(u32, Weight, EdgeId)] {
        self.arcs.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContractionConfig;
    use crate::mode::ModeMask;
    use crate::network::{Edge, NetworkBuilder};

    fn square() -> Network {
        let mut b = NetworkBuilder::new();
        let n: Vec<_> = (0..4).map(|i| b.add_node(i as f64, 0.0, ModeMask::ALL)).collect();
        for i in 0..4 {
            b.add_bidirectional(n[i], n[(i + 1) % 4], ModeCosts::uniform(1.0));
        }
        b.build().unwrap().with_version(1)
    }

    #[test]
    fn test_json_round_trip_reads_like_a_scenario_file() {
        let overlay = ScenarioOverlay::new(
            "s1",
            1,
            vec![
                EdgeOp::Delete { edge: EdgeId(2) },
                EdgeOp::Add {
                    from: NodeId(0),
                    to: NodeId(2),
                    costs: ModeCosts::only(Mode::Bike, 0.5),
                    geometry: None,
                },
            ],
        );
        let json = overlay.to_json().unwrap();
        assert!(json.contains("\"op\": \"delete\""));
        assert!(json.contains("\"bike\": 0.5"));
        assert_eq!(ScenarioOverlay::from_json(&json).unwrap(), overlay);
    }

    #[test]
    fn test_later_operations_see_added_edges() {
        let net = square();
        let overlay = ScenarioOverlay::new(
            "s",
            1,
            vec![
                EdgeOp::Add {
                    from: NodeId(0),
                    to: NodeId(2),
                    costs: ModeCosts::uniform(1.0),
                    geometry: None,
                },
                EdgeOp::ModifyCost {
                    edge: EdgeId(8),
                    costs: ModeCosts::only(Mode::Walk, 0.25),
                },
                EdgeOp::Delete { edge: EdgeId(0) },
            ],
        );
        let resolved = overlay.resolve(&net, Mode::Walk).unwrap();
        assert_eq!(resolved.arcs_from(0), &[(2, 250_000, EdgeId(8))]);
        assert!(resolved.masked.contains(&EdgeId(0)));
        assert!(!resolved.masked.contains(&EdgeId(8)));

        // bike lost its cost on the added edge
        let bike = overlay.resolve(&net, Mode::Bike).unwrap();
        assert!(bike.arcs_from(0).is_empty());
    }

    #[test]
    fn test_added_edges_keep_their_geometry() {
        let mut b = NetworkBuilder::new();
        let a = b.add_node(0.0, 0.0, ModeMask::ALL);
        let c = b.add_node(1.0, 0.0, ModeMask::ALL);
        b.push_edge(Edge {
            from: a,
            to: c,
            costs: ModeCosts::uniform(1.0),
            length_m: None,
            geometry: Some(11),
        });
        let net = b.build().unwrap();

        let add = |geometry| EdgeOp::Add {
            from: c,
            to: a,
            costs: ModeCosts::uniform(1.0),
            geometry,
        };
        let overlay = ScenarioOverlay::new(
            "s",
            0,
            vec![add(None), EdgeOp::Delete { edge: EdgeId(0) }, add(Some(42))],
        );
        assert_eq!(overlay.geometry_of(&net, EdgeId(0)), Some(11));
        assert_eq!(overlay.geometry_of(&net, EdgeId(1)), None);
        assert_eq!(overlay.geometry_of(&net, EdgeId(2)), Some(42));
        assert_eq!(overlay.geometry_of(&net, EdgeId(3)), None);
        assert_eq!(
            overlay.geometry_refs(&net, &[EdgeId(2), EdgeId(0), EdgeId(1)]),
            vec![42, 11]
        );
    }

    #[test]
    fn test_invalid_overlays() {
        let net = square();
        let stale = ScenarioOverlay::new("s", 7, vec![]);
        assert_eq!(
            stale.resolve(&net, Mode::Walk).unwrap_err(),
            QueryError::VersionMismatch { overlay: 7, active: 1 }
        );

        for op in [
            EdgeOp::Delete { edge: EdgeId(99) },
            EdgeOp::ModifyCost {
                edge: EdgeId(0),
                costs: ModeCosts::only(Mode::Walk, -1.0),
            },
            EdgeOp::Add {
                from: NodeId(0),
                to: NodeId(40),
                costs: ModeCosts::uniform(1.0),
                geometry: None,
            },
        ] {
            let overlay = ScenarioOverlay::new("s", 1, vec![op]);
            assert!(matches!(
                overlay.resolve(&net, Mode::Walk),
                Err(QueryError::InvalidArgument(_))
            ));
        }

        let twice = ScenarioOverlay::new(
            "s",
            1,
            vec![EdgeOp::Delete { edge: EdgeId(1) }, EdgeOp::Delete { edge: EdgeId(1) }],
        );
        assert!(twice.resolve(&net, Mode::Walk).is_err());
    }

    #[test]
    fn test_stale_shortcuts_cover_masked_edges() {
        let net = square();
        let ch = crate::ch::build(&net, Mode::Walk, &ContractionConfig::default()).unwrap();
        for e in 0..net.n_edges() as u32 {
            let overlay = ScenarioOverlay::new("s", 1, vec![EdgeOp::Delete { edge: EdgeId(e) }]);
            let mut resolved = overlay.resolve(&net, Mode::Walk).unwrap();
            resolved.mark_stale(&ch);
            for (i, _) in ch.shortcuts().iter().enumerate() {
                let id = ShortcutId(i as u32);
                let uses = ch.unpack(ArcRef::Shortcut(id)).contains(&EdgeId(e));
                assert_eq!(resolved.stale.contains(&id), uses);
            }
        }
    }
}
