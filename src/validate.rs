//! Validation of hierarchy isochrones
//!
//! Compares hierarchy results against plain Dijkstra on the original graph
//! and checks that every shortcut unpacks to a connected original path of
//! the same weight.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::ch::{to_weight, ArcRef, ContractionHierarchy, ShortcutId, Weight, MAX_WEIGHT};
use crate::isochrone::{reference_isochrone, IsochroneEngine, IsochroneRequest};
use crate::network::{Network, NodeId};

const MAX_REPORTED: usize = 10;

/// First differing node of one origin
#[derive(Debug, Clone, Serialize)]
pub struct Mismatch {
    pub origin: NodeId,
    pub node: NodeId,
    pub expected: Option<Weight>,
    pub actual: Option<Weight>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub queries: usize,
    pub matching: usize,
    pub mismatching: usize,
    /// Origins the mode may not start from
    pub skipped: usize,
    pub shortcuts_checked: usize,
    pub broken_shortcuts: Vec<ShortcutId>,
    pub mismatches: Vec<Mismatch>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.mismatching == 0 && self.broken_shortcuts.is_empty()
    }
}

/// Compare `n_queries` random-origin isochrones against the reference search
pub fn validate_isochrones(
    engine: &IsochroneEngine,
    n_queries: usize,
    max_cost: f64,
    seed: u64,
) -> ValidationReport {
    let network = engine.network().network();
    let mode = engine.mode();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut report = ValidationReport::default();
    if network.n_nodes() == 0 {
        return report;
    }
    let budget = to_weight(max_cost).unwrap_or(MAX_WEIGHT);

    for i in 0..n_queries {
        let origin = NodeId(rng.random_range(0..network.n_nodes() as u32));
        report.queries += 1;

        let request = IsochroneRequest::new(origin, mode, max_cost);
        let actual = match engine.isochrone(&request) {
            Ok(result) => result.reached,
            Err(e) => {
                tracing::debug!(%origin, error = %e, "skipping origin");
                report.skipped += 1;
                continue;
            }
        };
        let expected = reference_isochrone(network, mode, origin, budget);

        if actual == expected {
            report.matching += 1;
        } else {
            report.mismatching += 1;
            if report.mismatches.len() < MAX_REPORTED {
                report.mismatches.push(first_difference(origin, &expected, &actual));
            }
        }

        if (i + 1) % 100 == 0 {
            tracing::info!(
                done = i + 1,
                total = n_queries,
                matching = report.matching,
                mismatching = report.mismatching,
                "validation progress"
            );
        }
    }

    let broken = broken_shortcuts(network, engine.hierarchy());
    report.shortcuts_checked = engine.hierarchy().shortcuts().len();
    report.broken_shortcuts = broken;
    report
}

fn first_difference(
    origin: NodeId,
    expected: &[(NodeId, Weight)],
    actual: &[(NodeId, Weight)],
) -> Mismatch {
    let lookup = |set: &[(NodeId, Weight)], node: NodeId| {
        set.binary_search_by_key(&node, |(n, _)| *n).ok().map(|i| set[i].1)
    };
    let node = expected
        .iter()
        .chain(actual.iter())
        .map(|(n, _)| *n)
        .filter(|&n| lookup(expected, n) != lookup(actual, n))
        .min()
        .unwrap_or(origin);
    Mismatch {
        origin,
        node,
        expected: lookup(expected, node),
        actual: lookup(actual, node),
    }
}

/// Shortcuts whose unpacked path is disconnected or weighs something else
pub fn broken_shortcuts(network: &Network, ch: &ContractionHierarchy) -> Vec<ShortcutId> {
    let mode = ch.mode();
    let mut broken = Vec::new();
    for (i, shortcut) in ch.shortcuts().iter().enumerate() {
        let id = ShortcutId(i as u32);
        let path = ch.unpack(ArcRef::Shortcut(id));

        let mut at = shortcut.tail;
        let mut total: Weight = 0;
        let mut ok = true;
        for edge in &path {
            let Some(e) = network.edge(*edge) else {
                ok = false;
                break;
            };
            let Some(w) = network.mode_cost(*edge, mode).and_then(to_weight) else {
                ok = false;
                break;
            };
            if e.from != at {
                ok = false;
                break;
            }
            total = total.saturating_add(w);
            at = e.to;
        }
        if !ok || at != shortcut.head || total != shortcut.weight {
            broken.push(id);
        }
    }
    broken
}
