//! Plain bounded Dijkstra on the original graph
//!
//! Serves overlays too large for shortcut invalidation (the merged base +
//! overlay graph is searched directly) and is the reference oracle for the
//! hierarchy searches.

use super::search::{with_state, SearchOutcome};
use crate::cancel::CancelToken;
use crate::ch::{to_weight, ArcRef, Weight};
use crate::mode::Mode;
use crate::network::{Network, NodeId};
use crate::overlay::ResolvedOverlay;

pub(crate) fn merged(
    network: &Network,
    mode: Mode,
    origin: NodeId,
    budget: Weight,
    overlay: Option<&ResolvedOverlay>,
    with_paths: bool,
    cancel: Option<&CancelToken>,
) -> SearchOutcome {
    with_state(network.n_nodes(), |state| {
        state.start(origin.0);
        let mut relaxed = 0usize;
        let mut interrupt = None;

        while let Some((u, d)) = state.pop() {
            state.mark_settled(u);
            if let Some(i) = cancel.and_then(|c| c.check().err()) {
                interrupt = Some(i);
                break;
            }

            for (edge, e) in network.out_edges(NodeId(u)) {
                if overlay.is_some_and(|o| o.masked.contains(&edge)) {
                    continue;
                }
                let Some(weight) = network.mode_cost(edge, mode).and_then(to_weight) else {
                    continue;
                };
                let nd = d.saturating_add(weight);
                if nd <= budget && state.relax(u, e.to.0, nd, ArcRef::Original(edge)) {
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

/// Every node within `budget` of `origin` for `mode`, sorted by node id.
/// No hierarchy involved.
pub fn reference_isochrone(
    network: &Network,
    mode: Mode,
    origin: NodeId,
    budget: Weight,
) -> Vec<(NodeId, Weight)> {
    if origin.index() >= network.n_nodes() {
        return Vec::new();
    }
    merged(network, mode, origin, budget, None, false, None).reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeMask;
    use crate::network::{ModeCosts, NetworkBuilder};

    #[test]
    fn test_reference_respects_budget_and_mode() {
        let mut b = NetworkBuilder::new();
        let n: Vec<_> = (0..4).map(|_| b.add_node(0.0, 0.0, ModeMask::ALL)).collect();
        b.add_edge(n[0], n[1], ModeCosts::uniform(1.0));
        b.add_edge(n[1], n[2], ModeCosts::uniform(1.5));
        b.add_edge(n[0], n[3], ModeCosts::only(Mode::Car, 0.5));
        let net = b.build().unwrap();

        let walk = reference_isochrone(&net, Mode::Walk, NodeId(0), 2_500_000);
        assert_eq!(walk, vec![(NodeId(0), 0), (NodeId(1), 1_000_000), (NodeId(2), 2_500_000)]);
        let short = reference_isochrone(&net, Mode::Walk, NodeId(0), 2_499_999);
        assert_eq!(short.len(), 2);
        let car = reference_isochrone(&net, Mode::Car, NodeId(0), 600_000);
        assert_eq!(car, vec![(NodeId(0), 0), (NodeId(3), 500_000)]);
    }
}
