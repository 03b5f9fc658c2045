//! Bounded reachability queries
//!
//! An [`IsochroneEngine`] pins one `(network, hierarchy)` snapshot and answers
//! "which nodes are reachable from this origin within this budget, and at
//! what cost". It holds no mutable state and is shared freely across threads;
//! per-query scratch space lives in thread-local search states.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::cancel::{CancelToken, Interrupt};
use crate::ch::{to_cost, to_weight, ArcRef, ContractionHierarchy, Weight, MAX_WEIGHT};
use crate::config::{QueryConfig, SearchStrategy};
use crate::error::QueryError;
use crate::mode::Mode;
use crate::network::{EdgeId, NetworkHandle, NodeId};
use crate::overlay::ScenarioOverlay;

mod dijkstra;
mod search;

pub use dijkstra::reference_isochrone;
use search::{ParentMap, SearchOutcome};

/// Cost thresholds splitting a result into bands: sorted, distinct, positive
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breaks(Vec<f64>);

impl Breaks {
    pub fn new(mut values: Vec<f64>) -> Result<Self, QueryError> {
        if values.is_empty() {
            return Err(QueryError::InvalidArgument("at least one break is required".into()));
        }
        if let Some(bad) = values.iter().find(|b| !b.is_finite() || **b <= 0.0) {
            return Err(QueryError::InvalidArgument(format!(
                "break {bad} must be positive and finite"
            )));
        }
        values.sort_by(f64::total_cmp);
        values.dedup();
        Ok(Self(values))
    }

    /// `steps` equal bands up to `max_cost`
    pub fn evenly_spaced(max_cost: f64, steps: usize) -> Result<Self, QueryError> {
        if steps == 0 {
            return Err(QueryError::InvalidArgument("steps must be at least 1".into()));
        }
        Self::new(
            (1..=steps)
                .map(|i| match i {
                    i if i == steps => max_cost,
                    i => max_cost * i as f64 / steps as f64,
                })
                .collect(),
        )
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

/// Nodes whose cost lies in `(lower, upper]` (`[0, upper]` for the first band)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Band {
    pub lower: f64,
    pub upper: f64,
    pub nodes: Vec<NodeId>,
}

/// Whether the search ran to exhaustion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Complete,
    Cancelled,
    TimedOut,
}

impl From<Option<Interrupt>> for Completion {
    fn from(interrupt: Option<Interrupt>) -> Self {
        match interrupt {
            None => Completion::Complete,
            Some(Interrupt::Cancelled) => Completion::Cancelled,
            Some(Interrupt::TimedOut) => Completion::TimedOut,
        }
    }
}

/// Which search produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Trivial,
    Bounded,
    Phast,
    /// Overlay above the fallback threshold: plain Dijkstra on the merged graph
    OverlayFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchStats {
    pub kind: SearchKind,
    pub settled: usize,
    pub relaxed: usize,
    /// Shortcuts skipped because the overlay touches their path
    pub stale_shortcuts: usize,
    pub elapsed_us: u64,
}

/// One isochrone query
#[derive(Debug, Clone)]
pub struct IsochroneRequest {
    pub origin: NodeId,
    pub mode: Mode,
    /// Budget in network units (seconds or metres)
    pub max_cost: f64,
    pub breaks: Option<Breaks>,
    pub overlay: Option<Arc<ScenarioOverlay>>,
    pub with_paths: bool,
    pub cancel: Option<CancelToken>,
}

impl IsochroneRequest {
    pub fn new(origin: NodeId, mode: Mode, max_cost: f64) -> Self {
        Self {
            origin,
            mode,
            max_cost,
            breaks: None,
            overlay: None,
            with_paths: false,
            cancel: None,
        }
    }

    pub fn with_breaks(mut self, breaks: Breaks) -> Self {
        self.breaks = Some(breaks);
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<ScenarioOverlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn with_paths(mut self) -> Self {
        self.with_paths = true;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Parent arcs of a finished search, unpacked on demand
#[derive(Debug, Clone)]
struct PathIndex {
    parents: ParentMap,
    hierarchy: Arc<ContractionHierarchy>,
}

/// Reached nodes and their minimal costs
#[derive(Debug, Clone, Serialize)]
pub struct IsochroneResult {
    pub origin: NodeId,
    pub mode: Mode,
    pub max_cost: f64,
    pub network_version: u64,
    pub scenario_id: Option<String>,
    /// `(node, cost in micro-units)`, sorted by node id
    pub reached: Vec<(NodeId, Weight)>,
    pub bands: Option<Vec<Band>>,
    pub status: Completion,
    pub stats: SearchStats,
    #[serde(skip)]
    paths: Option<PathIndex>,
}

impl IsochroneResult {
    pub fn len(&self) -> usize {
        self.reached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reached.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.status == Completion::Complete
    }

    pub fn weight_of(&self, node: NodeId) -> Option<Weight> {
        self.reached
            .binary_search_by_key(&node, |(n, _)| *n)
            .ok()
            .map(|i| self.reached[i].1)
    }

    /// Cost in network units
    pub fn cost_of(&self, node: NodeId) -> Option<f64> {
        self.weight_of(node).map(to_cost)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.weight_of(node).is_some()
    }

    /// `(node, cost in network units)` in node id order
    pub fn costs(&self) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.reached.iter().map(|&(n, w)| (n, to_cost(w)))
    }

    /// Fail unless the search completed
    pub fn into_complete(self) -> Result<Self, QueryError> {
        let reason = match self.status {
            Completion::Complete => return Ok(self),
            Completion::Cancelled => "cancelled",
            Completion::TimedOut => "timed out",
        };
        Err(QueryError::ResourceExhausted {
            reason,
            settled: self.reached.len(),
        })
    }

    /// Original edges of the cheapest path from the origin to `node`.
    /// `None` when paths were not requested or `node` was not reached.
    pub fn path_to(&self, node: NodeId) -> Option<Vec<EdgeId>> {
        let index = self.paths.as_ref()?;
        if !self.contains(node) {
            return None;
        }

        let mut arcs: Vec<ArcRef> = Vec::new();
        let mut at = node;
        while at != self.origin {
            let &(from, arc) = index.parents.get(&at)?;
            arcs.push(arc);
            at = from;
        }

        let mut path = Vec::new();
        for arc in arcs.into_iter().rev() {
            index.hierarchy.unpack_into(arc, &mut path);
        }
        Some(path)
    }
}

/// Query executor over one pinned snapshot
#[derive(Debug, Clone)]
pub struct IsochroneEngine {
    network: NetworkHandle,
    hierarchy: Arc<ContractionHierarchy>,
    config: QueryConfig,
}

impl IsochroneEngine {
    pub fn new(
        network: NetworkHandle,
        hierarchy: Arc<ContractionHierarchy>,
        config: QueryConfig,
    ) -> Result<Self, QueryError> {
        if hierarchy.network_version() != network.version()
            || hierarchy.n_nodes() != network.n_nodes()
        {
            return Err(QueryError::InvalidArgument(format!(
                "hierarchy was built for network version {}, snapshot is version {}",
                hierarchy.network_version(),
                network.version()
            )));
        }
        Ok(Self::from_parts(network, hierarchy, config))
    }

    /// Pair a hierarchy with the network it was just built from
    pub(crate) fn from_parts(
        network: NetworkHandle,
        hierarchy: Arc<ContractionHierarchy>,
        config: QueryConfig,
    ) -> Self {
        Self {
            network,
            hierarchy,
            config,
        }
    }

    pub fn network(&self) -> &NetworkHandle {
        &self.network
    }

    pub fn hierarchy(&self) -> &Arc<ContractionHierarchy> {
        &self.hierarchy
    }

    pub fn mode(&self) -> Mode {
        self.hierarchy.mode()
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn isochrone(&self, request: &IsochroneRequest) -> Result<IsochroneResult, QueryError> {
        let start = Instant::now();
        let network = self.network.network();
        let ch = self.hierarchy.as_ref();

        if request.origin.index() >= network.n_nodes() {
            return Err(QueryError::NodeNotFound {
                node: request.origin,
                n_nodes: network.n_nodes(),
            });
        }
        if request.mode != ch.mode() {
            return Err(QueryError::ModeMismatch {
                requested: request.mode,
                built: ch.mode(),
            });
        }
        if !request.max_cost.is_finite() {
            return Err(QueryError::InvalidArgument(format!(
                "budget {} is not finite",
                request.max_cost
            )));
        }
        if let Some(breaks) = &request.breaks {
            if let Some(over) = breaks.values().iter().find(|b| **b > request.max_cost) {
                return Err(QueryError::InvalidArgument(format!(
                    "break {over} exceeds budget {}",
                    request.max_cost
                )));
            }
        }
        if !network.nodes()[request.origin.index()].modes.contains(request.mode) {
            return Err(QueryError::InvalidArgument(format!(
                "origin {} does not allow {}",
                request.origin, request.mode
            )));
        }

        let mut resolved = match &request.overlay {
            Some(overlay) => Some(overlay.resolve(network, request.mode)?),
            None => None,
        };

        let timeout_token;
        let cancel = match (self.config.timeout(), &request.cancel) {
            (None, token) => token.as_ref(),
            (Some(timeout), Some(token)) => {
                timeout_token = token.child_with_timeout(Some(timeout));
                Some(&timeout_token)
            }
            (Some(timeout), None) => {
                timeout_token = CancelToken::with_timeout(timeout);
                Some(&timeout_token)
            }
        };

        let (kind, outcome, stale) = if request.max_cost <= 0.0 {
            let outcome = SearchOutcome {
                reached: vec![(request.origin, 0)],
                parents: request.with_paths.then(ParentMap::default),
                settled: 1,
                ..Default::default()
            };
            (SearchKind::Trivial, outcome, 0)
        } else {
            let budget = to_weight(request.max_cost).unwrap_or(MAX_WEIGHT);
            match resolved.as_mut() {
                Some(overlay) if overlay.n_ops > self.config.overlay_fallback_threshold => {
                    tracing::warn!(
                        ops = overlay.n_ops,
                        threshold = self.config.overlay_fallback_threshold,
                        "overlay too large for shortcut invalidation, searching merged graph"
                    );
                    let outcome = dijkstra::merged(
                        network,
                        request.mode,
                        request.origin,
                        budget,
                        Some(&*overlay),
                        request.with_paths,
                        cancel,
                    );
                    (SearchKind::OverlayFallback, outcome, 0)
                }
                Some(overlay) if overlay.n_ops > 0 => {
                    overlay.mark_stale(ch);
                    let stale = overlay.stale.len();
                    let outcome = search::bounded(
                        ch,
                        request.origin,
                        budget,
                        Some(&*overlay),
                        request.with_paths,
                        cancel,
                    );
                    (SearchKind::Bounded, outcome, stale)
                }
                _ if self.config.strategy == SearchStrategy::Phast => {
                    let outcome =
                        search::phast(ch, request.origin, budget, request.with_paths, cancel);
                    (SearchKind::Phast, outcome, 0)
                }
                _ => {
                    let outcome = search::bounded(
                        ch,
                        request.origin,
                        budget,
                        None,
                        request.with_paths,
                        cancel,
                    );
                    (SearchKind::Bounded, outcome, 0)
                }
            }
        };

        let status = Completion::from(outcome.interrupt);
        if status != Completion::Complete {
            tracing::warn!(
                origin = %request.origin,
                ?status,
                settled = outcome.settled,
                "isochrone stopped early"
            );
        }

        let bands = request
            .breaks
            .as_ref()
            .map(|breaks| partition_bands(&outcome.reached, breaks));

        let stats = SearchStats {
            kind,
            settled: outcome.settled,
            relaxed: outcome.relaxed,
            stale_shortcuts: stale,
            elapsed_us: start.elapsed().as_micros() as u64,
        };
        tracing::debug!(
            origin = %request.origin,
            mode = %request.mode,
            ?kind,
            reached = outcome.reached.len(),
            settled = stats.settled,
            elapsed_us = stats.elapsed_us,
            "isochrone"
        );

        Ok(IsochroneResult {
            origin: request.origin,
            mode: request.mode,
            max_cost: request.max_cost,
            network_version: network.version(),
            scenario_id: request.overlay.as_ref().map(|o| o.scenario_id.clone()),
            reached: outcome.reached,
            bands,
            status,
            stats,
            paths: outcome.parents.map(|parents| PathIndex {
                parents,
                hierarchy: Arc::clone(&self.hierarchy),
            }),
        })
    }
}

/// Split reached nodes into `(break[i-1], break[i]]` bands
fn partition_bands(reached: &[(NodeId, Weight)], breaks: &Breaks) -> Vec<Band> {
    let uppers: Vec<Weight> = breaks
        .values()
        .iter()
        .map(|&b| to_weight(b).unwrap_or(MAX_WEIGHT))
        .collect();
    let mut bands: Vec<Band> = breaks
        .values()
        .iter()
        .enumerate()
        .map(|(i, &upper)| Band {
            lower: if i == 0 { 0.0 } else { breaks.values()[i - 1] },
            upper,
            nodes: Vec::new(),
        })
        .collect();

    for &(node, w) in reached {
        let i = uppers.partition_point(|&u| u < w);
        if let Some(band) = bands.get_mut(i) {
            band.nodes.push(node);
        }
    }
    bands
}

/// Band index of a weight, `None` above the last break
pub(crate) fn band_of(weight: Weight, breaks: &Breaks) -> Option<u32> {
    let i = breaks
        .values()
        .partition_point(|&b| to_weight(b).unwrap_or(MAX_WEIGHT) < weight);
    (i < breaks.values().len()).then_some(i as u32)
}
