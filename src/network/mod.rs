//! Multi-modal network representation
//!
//! Nodes and edges live in dense arrays indexed by `NodeId` / `EdgeId`.
//! Forward and backward adjacency are CSR index lists into the edge array,
//! so a `Network` has no internal references and is trivially `Send + Sync`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigurationError;
use crate::mode::{Mode, ModeMask};

pub mod columnar;
pub mod store;

pub use columnar::{load_network, write_network, LoadOptions, EDGES_FILE, NODES_FILE};
pub use store::{NetworkHandle, NetworkStore};

/// Dense 0-based node index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Dense 0-based edge index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl EdgeId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-mode edge costs in network units. `None` = mode may not use the edge.
///
/// Serialised as a map keyed by mode name, e.g. `{"walk": 12.0, "bike": 4.0}`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "CostMap", into = "CostMap")]
pub struct ModeCosts(pub [Option<f64>; Mode::COUNT]);

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CostMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    walk: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bike: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    car: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transit: Option<f64>,
}

impl From<CostMap> for ModeCosts {
    fn from(m: CostMap) -> Self {
        ModeCosts([m.walk, m.bike, m.car, m.transit])
    }
}

impl From<ModeCosts> for CostMap {
    fn from(c: ModeCosts) -> Self {
        let [walk, bike, car, transit] = c.0;
        CostMap {
            walk,
            bike,
            car,
            transit,
        }
    }
}

impl ModeCosts {
    /// Same cost for every mode
    pub fn uniform(cost: f64) -> Self {
        ModeCosts([Some(cost); Mode::COUNT])
    }

    /// Cost for a single mode, all others disallowed
    pub fn only(mode: Mode, cost: f64) -> Self {
        ModeCosts::default().with(mode, cost)
    }

    pub fn with(mut self, mode: Mode, cost: f64) -> Self {
        self.0[mode.index()] = Some(cost);
        self
    }

    pub fn without(mut self, mode: Mode) -> Self {
        self.0[mode.index()] = None;
        self
    }

    #[inline(always)]
    pub fn get(&self, mode: Mode) -> Option<f64> {
        self.0[mode.index()]
    }

    pub fn set(&mut self, mode: Mode, cost: Option<f64>) {
        self.0[mode.index()] = cost;
    }

    /// Modes with a cost
    pub fn mask(&self) -> ModeMask {
        Mode::all().iter().copied().filter(|m| self.get(*m).is_some()).collect()
    }
}

/// A network node. Its id is its index in `Network::nodes`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub lon: f64,
    pub lat: f64,
    /// Modes allowed to start, end or pass through this node
    pub modes: ModeMask,
}

/// A directed edge. Its id is its index in `Network::edges`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub costs: ModeCosts,
    /// Physical length, when the source provides one
    pub length_m: Option<f64>,
    /// Opaque reference to the edge geometry, resolved by polygon builders
    pub geometry: Option<u64>,
}

/// CSR index: `edges[offsets[u]..offsets[u + 1]]` are the edges of node `u`
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    pub offsets: Vec<u64>,
    pub edges: Vec<EdgeId>,
}

impl Adjacency {
    /// Counting-sort the edges by `key`, stable in edge id order
    fn build(n_nodes: usize, edges: &[Edge], key: impl Fn(&Edge) -> NodeId) -> Self {
        let mut offsets = vec![0u64; n_nodes + 1];
        for e in edges {
            offsets[key(e).index() + 1] += 1;
        }
        for i in 0..n_nodes {
            offsets[i + 1] += offsets[i];
        }

        let mut cursor: Vec<u64> = offsets[..n_nodes].to_vec();
        let mut slots = vec![EdgeId(0); edges.len()];
        for (i, e) in edges.iter().enumerate() {
            let u = key(e).index();
            slots[cursor[u] as usize] = EdgeId(i as u32);
            cursor[u] += 1;
        }

        Self {
            offsets,
            edges: slots,
        }
    }

    #[inline(always)]
    pub fn edges_of(&self, node: NodeId) -> &[EdgeId] {
        let start = self.offsets[node.index()] as usize;
        let end = self.offsets[node.index() + 1] as usize;
        &self.edges[start..end]
    }

    pub fn n_nodes(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
}

/// Immutable multi-modal network snapshot
#[derive(Debug, Clone)]
pub struct Network {
    version: u64,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    forward: Adjacency,
    backward: Adjacency,
}

impl Network {
    /// Version assigned by the store on publish (0 = never published)
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.index())
    }

    pub fn forward(&self) -> &Adjacency {
        &self.forward
    }

    pub fn backward(&self) -> &Adjacency {
        &self.backward
    }

    /// Outgoing edges of `node`
    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, &Edge)> + '_ {
        self.forward
            .edges_of(node)
            .iter()
            .map(move |&e| (e, &self.edges[e.index()]))
    }

    /// Incoming edges of `node`
    pub fn in_edges(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, &Edge)> + '_ {
        self.backward
            .edges_of(node)
            .iter()
            .map(move |&e| (e, &self.edges[e.index()]))
    }

    /// Cost of `edge` for `mode`, if the mode may traverse it.
    ///
    /// An edge is usable iff it carries a cost for the mode and both of its
    /// endpoints allow the mode.
    pub fn mode_cost(&self, edge: EdgeId, mode: Mode) -> Option<f64> {
        let e = self.edges.get(edge.index())?;
        let cost = e.costs.get(mode)?;
        let allowed = self.nodes[e.from.index()].modes.contains(mode)
            && self.nodes[e.to.index()].modes.contains(mode);
        allowed.then_some(cost)
    }

    /// Geometry references for a path of edges (edges without one are skipped)
    pub fn geometry_refs(&self, path: &[EdgeId]) -> Vec<u64> {
        path.iter()
            .filter_map(|e| self.edges.get(e.index()).and_then(|e| e.geometry))
            .collect()
    }

    /// Check that both adjacency indices describe exactly the edge list
    pub fn check_adjacency(&self) -> std::result::Result<(), String> {
        for (name, adj, endpoint) in [
            ("forward", &self.forward, true),
            ("backward", &self.backward, false),
        ] {
            if adj.offsets.len() != self.nodes.len() + 1 {
                return Err(format!(
                    "{name} offsets have {} entries for {} nodes",
                    adj.offsets.len(),
                    self.nodes.len()
                ));
            }
            if adj.offsets.windows(2).any(|w| w[0] > w[1]) {
                return Err(format!("{name} offsets are not monotonic"));
            }
            if adj.offsets.last().copied() != Some(self.edges.len() as u64)
                || adj.edges.len() != self.edges.len()
            {
                return Err(format!(
                    "{name} index covers {} edges, network has {}",
                    adj.edges.len(),
                    self.edges.len()
                ));
            }

            let mut seen = vec![false; self.edges.len()];
            for u in 0..self.nodes.len() {
                let node = NodeId(u as u32);
                for &e in adj.edges_of(node) {
                    let edge = self
                        .edges
                        .get(e.index())
                        .ok_or_else(|| format!("{name} index references missing edge {e}"))?;
                    let owner = if endpoint { edge.from } else { edge.to };
                    if owner != node {
                        return Err(format!(
                            "{name} index lists edge {e} under node {node}, edge belongs to {owner}"
                        ));
                    }
                    if std::mem::replace(&mut seen[e.index()], true) {
                        return Err(format!("{name} index lists edge {e} twice"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// In-memory network construction with the same validation as the loader
#[derive(Debug, Default, Clone)]
pub struct NetworkBuilder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n_nodes: usize, n_edges: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(n_nodes),
            edges: Vec::with_capacity(n_edges),
        }
    }

    pub fn add_node(&mut self, lon: f64, lat: f64, modes: ModeMask) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { lon, lat, modes });
        id
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId, costs: ModeCosts) -> EdgeId {
        self.push_edge(Edge {
            from,
            to,
            costs,
            length_m: None,
            geometry: None,
        })
    }

    /// Two directed edges `a → b` and `b → a` with the same costs
    pub fn add_bidirectional(
        &mut self,
        a: NodeId,
        b: NodeId,
        costs: ModeCosts,
    ) -> (EdgeId, EdgeId) {
        (self.add_edge(a, b, costs), self.add_edge(b, a, costs))
    }

    pub fn push_edge(&mut self, edge: Edge) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(edge);
        id
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    /// Validate and index. The result is unpublished (version 0).
    pub fn build(self) -> Result<Network, ConfigurationError> {
        let Self { nodes, edges } = self;

        if nodes.len() >= u32::MAX as usize {
            return Err(ConfigurationError::TooLarge {
                what: "nodes",
                limit: u32::MAX as u64 - 1,
            });
        }
        if edges.len() >= u32::MAX as usize {
            return Err(ConfigurationError::TooLarge {
                what: "edges",
                limit: u32::MAX as u64 - 1,
            });
        }

        for (i, n) in nodes.iter().enumerate() {
            if !n.lon.is_finite() || !n.lat.is_finite() {
                return Err(ConfigurationError::InvalidCoordinate {
                    node: NodeId(i as u32),
                    lon: n.lon,
                    lat: n.lat,
                });
            }
        }

        for (i, e) in edges.iter().enumerate() {
            let edge = EdgeId(i as u32);
            for endpoint in [e.from, e.to] {
                if endpoint.index() >= nodes.len() {
                    return Err(ConfigurationError::DanglingEndpoint {
                        edge,
                        node: endpoint.0 as i64,
                        n_nodes: nodes.len(),
                    });
                }
            }
            for &mode in Mode::all() {
                if let Some(cost) = e.costs.get(mode) {
                    if !cost.is_finite() || cost < 0.0 {
                        return Err(ConfigurationError::InvalidCost { edge, mode, cost });
                    }
                }
            }
            if let Some(length) = e.length_m {
                if !length.is_finite() || length < 0.0 {
                    return Err(ConfigurationError::InvalidLength { edge, length });
                }
            }
        }

        let forward = Adjacency::build(nodes.len(), &edges, |e| e.from);
        let backward = Adjacency::build(nodes.len(), &edges, |e| e.to);

        Ok(Network {
            version: 0,
            nodes,
            edges,
            forward,
            backward,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Network {
        let mut b = NetworkBuilder::new();
        let n0 = b.add_node(0.0, 0.0, ModeMask::ALL);
        let n1 = b.add_node(1.0, 0.0, ModeMask::ALL);
        let n2 = b.add_node(0.0, 1.0, ModeMask::ALL.without(Mode::Car));
        b.add_edge(n0, n1, ModeCosts::uniform(1.0));
        b.add_edge(n1, n2, ModeCosts::uniform(2.0));
        b.add_edge(n2, n0, ModeCosts::only(Mode::Walk, 3.0));
        b.add_edge(n0, n2, ModeCosts::uniform(5.0));
        b.build().unwrap()
    }

    #[test]
    fn test_adjacency_matches_edges() {
        let net = triangle();
        assert_eq!(net.n_nodes(), 3);
        assert_eq!(net.n_edges(), 4);
        let out0: Vec<_> = net.out_edges(NodeId(0)).map(|(e, _)| e).collect();
        assert_eq!(out0, vec![EdgeId(0), EdgeId(3)]);
        let in2: Vec<_> = net.in_edges(NodeId(2)).map(|(e, _)| e).collect();
        assert_eq!(in2, vec![EdgeId(1), EdgeId(3)]);
        net.check_adjacency().unwrap();
    }

    #[test]
    fn test_mode_cost_respects_node_availability() {
        let net = triangle();
        assert_eq!(net.mode_cost(EdgeId(0), Mode::Car), Some(1.0));
        // node 2 forbids cars
        assert_eq!(net.mode_cost(EdgeId(1), Mode::Car), None);
        assert_eq!(net.mode_cost(EdgeId(2), Mode::Bike), None);
        assert_eq!(net.mode_cost(EdgeId(2), Mode::Walk), Some(3.0));
    }

    #[test]
    fn test_rejects_dangling_endpoint() {
        let mut b = NetworkBuilder::new();
        let a = b.add_node(0.0, 0.0, ModeMask::ALL);
        b.add_edge(a, NodeId(4), ModeCosts::uniform(1.0));
        assert!(matches!(
            b.build(),
            Err(ConfigurationError::DanglingEndpoint { node: 4, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_costs() {
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let mut b = NetworkBuilder::new();
            let a = b.add_node(0.0, 0.0, ModeMask::ALL);
            let c = b.add_node(0.0, 0.0, ModeMask::ALL);
            b.add_edge(a, c, ModeCosts::only(Mode::Bike, bad));
            assert!(matches!(
                b.build(),
                Err(ConfigurationError::InvalidCost { mode: Mode::Bike, .. })
            ));
        }
    }

    #[test]
    fn test_detects_corrupt_adjacency() {
        let mut net = triangle();
        net.forward.edges.swap(0, 2);
        assert!(net.check_adjacency().is_err());
    }
}
