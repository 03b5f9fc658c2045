use butterfly_reach::ch::to_weight;
use butterfly_reach::isochrone::reference_isochrone;
use butterfly_reach::isochrone::SearchKind;
use butterfly_reach::network::Edge;
use butterfly_reach::{
    synthetic, EdgeId, EdgeOp, Engine, EngineConfig, IsochroneRequest, Mode, ModeCosts, Network,
    NetworkBuilder, NodeId, QueryError, ScenarioOverlay,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn engine_with(network: Network, fallback_threshold: usize) -> Engine {
    let mut config = EngineConfig::default();
    config.workers.threads = 1;
    config.query.overlay_fallback_threshold = fallback_threshold;
    let engine = Engine::new(config).unwrap();
    let handle = engine.publish_network(network);
    for &mode in Mode::all() {
        engine.build_hierarchy(&handle, mode).unwrap();
    }
    engine
}

/// The network with the overlay applied as a plain edit
fn apply(network: &Network, ops: &[EdgeOp]) -> Network {
    let mut edges: Vec<Option<Edge>> = network.edges().iter().copied().map(Some).collect();
    for op in ops {
        match op {
            EdgeOp::Add {
                from,
                to,
                costs,
                geometry,
            } => edges.push(Some(Edge {
                from: *from,
                to: *to,
                costs: *costs,
                length_m: None,
                geometry: *geometry,
            })),
            EdgeOp::ModifyCost { edge, costs } => {
                if let Some(e) = edges[edge.index()].as_mut() {
                    e.costs = *costs;
                }
            }
            EdgeOp::Delete { edge } => edges[edge.index()] = None,
        }
    }

    let mut b = NetworkBuilder::new();
    for node in network.nodes() {
        b.add_node(node.lon, node.lat, node.modes);
    }
    for edge in edges.into_iter().flatten() {
        b.push_edge(edge);
    }
    b.build().unwrap()
}

fn random_ops(network: &Network, n: usize, rng: &mut StdRng) -> Vec<EdgeOp> {
    let n_edges = network.n_edges() as u32;
    let n_nodes = network.n_nodes() as u32;
    let mut deleted = Vec::new();
    let mut ops = Vec::new();
    while ops.len() < n {
        match rng.random_range(0..3) {
            0 => {
                let edge = EdgeId(rng.random_range(0..n_edges));
                if !deleted.contains(&edge) {
                    deleted.push(edge);
                    ops.push(EdgeOp::Delete { edge });
                }
            }
            1 => {
                let edge = EdgeId(rng.random_range(0..n_edges));
                if !deleted.contains(&edge) {
                    let cost = rng.random_range(1.0..400.0);
                    ops.push(EdgeOp::ModifyCost {
                        edge,
                        costs: ModeCosts::uniform(cost).without(Mode::Transit),
                    });
                }
            }
            _ => ops.push(EdgeOp::Add {
                from: NodeId(rng.random_range(0..n_nodes)),
                to: NodeId(rng.random_range(0..n_nodes)),
                costs: ModeCosts::uniform(rng.random_range(0.0..50.0)),
                geometry: None,
            }),
        }
    }
    ops
}

#[test]
fn test_overlay_results_match_the_edited_network() {
    let network = synthetic::random(250, 3, 5).unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    let hierarchy_engine = engine_with(network.clone(), usize::MAX);
    let fallback_engine = engine_with(network.clone(), 0);
    let base = hierarchy_engine.current_network().unwrap();

    for round in 0..12 {
        let ops = random_ops(&base, 1 + round % 6, &mut rng);
        let edited = apply(&base, &ops);
        let overlay = Arc::new(ScenarioOverlay::new(format!("s{round}"), base.version(), ops));

        for &mode in Mode::all() {
            for origin in (0..250).step_by(31).map(NodeId) {
                if !base.nodes()[origin.index()].modes.contains(mode) {
                    continue;
                }
                let request =
                    IsochroneRequest::new(origin, mode, 300.0).with_overlay(Arc::clone(&overlay));
                let via_hierarchy = hierarchy_engine.isochrone(&request).unwrap();
                let via_fallback = fallback_engine.isochrone(&request).unwrap();
                let expected =
                    reference_isochrone(&edited, mode, origin, to_weight(300.0).unwrap());

                assert_eq!(via_hierarchy.stats.kind, SearchKind::Bounded);
                assert_eq!(via_fallback.stats.kind, SearchKind::OverlayFallback);
                let context = format!("round {round}, {mode}, origin {origin}");
                assert_eq!(via_hierarchy.reached, expected, "{context}");
                assert_eq!(via_fallback.reached, expected, "{context}");
                assert_eq!(
                    via_hierarchy.scenario_id.as_deref(),
                    Some(format!("s{round}").as_str())
                );
            }
        }
    }
}

#[test]
fn test_closing_an_edge_never_grows_the_isochrone() {
    let engine = engine_with(synthetic::random(300, 3, 8).unwrap(), 64);
    let network = engine.current_network().unwrap();
    let origin = NodeId(11);
    let base = engine
        .isochrone(&IsochroneRequest::new(origin, Mode::Walk, 600.0))
        .unwrap();

    for edge in (0..network.n_edges() as u32).step_by(17).map(EdgeId) {
        let overlay = Arc::new(ScenarioOverlay::new(
            "closure",
            network.version(),
            vec![EdgeOp::Delete { edge }],
        ));
        let closed = engine
            .isochrone(&IsochroneRequest::new(origin, Mode::Walk, 600.0).with_overlay(overlay))
            .unwrap();
        for &(node, weight) in &closed.reached {
            let before = base.weight_of(node).unwrap();
            assert!(weight >= before, "edge {edge}: node {node} got cheaper");
        }
        assert!(closed.len() <= base.len());
    }
}

#[test]
fn test_deleted_bridge_cuts_off_the_far_side() {
    // 0 <-> 1 <-> 2, the only way to 2 is over edge 2 (1 -> 2)
    let mut b = NetworkBuilder::new();
    let n: Vec<_> = (0..3)
        .map(|i| b.add_node(0.0, i as f64 * 0.001, butterfly_reach::ModeMask::ALL))
        .collect();
    b.add_bidirectional(n[0], n[1], ModeCosts::uniform(1.0));
    let (bridge, _) = b.add_bidirectional(n[1], n[2], ModeCosts::uniform(1.0));
    let engine = engine_with(b.build().unwrap(), 64);
    let version = engine.current_network().unwrap().version();

    let overlay = ScenarioOverlay::new("closure", version, vec![EdgeOp::Delete { edge: bridge }]);
    let result = engine
        .isochrone(&IsochroneRequest::new(n[0], Mode::Walk, 10.0).with_overlay(Arc::new(overlay)))
        .unwrap();
    assert_eq!(result.reached, vec![(n[0], 0), (n[1], 1_000_000)]);

    // a new shortcut 0 -> 2 restores it
    let overlay = Arc::new(ScenarioOverlay::new(
        "detour",
        version,
        vec![
            EdgeOp::Delete { edge: bridge },
            EdgeOp::Add {
                from: n[0],
                to: n[2],
                costs: ModeCosts::uniform(5.0),
                geometry: Some(7),
            },
        ],
    ));
    let result = engine
        .isochrone(
            &IsochroneRequest::new(n[0], Mode::Walk, 10.0)
                .with_overlay(Arc::clone(&overlay))
                .with_paths(),
        )
        .unwrap();
    assert_eq!(result.cost_of(n[2]), Some(5.0));
    // added edges are numbered after the base edges
    let path = result.path_to(n[2]).unwrap();
    assert_eq!(path, vec![EdgeId(4)]);
    let network = engine.current_network().unwrap();
    assert_eq!(overlay.geometry_refs(&network, &path), vec![7]);
}

#[test]
fn test_overlay_must_target_the_active_network() {
    let engine = engine_with(synthetic::grid(3, 3, 1.0).unwrap(), 64);
    let version = engine.current_network().unwrap().version();

    let request = IsochroneRequest::new(NodeId(0), Mode::Walk, 2.0);
    let stale = ScenarioOverlay::new("old", version + 1, vec![EdgeOp::Delete { edge: EdgeId(0) }]);
    let err = engine
        .isochrone(&request.clone().with_overlay(Arc::new(stale)))
        .unwrap_err();
    assert_eq!(
        err,
        QueryError::VersionMismatch {
            overlay: version + 1,
            active: version
        }
    );

    let unknown = ScenarioOverlay::new("bad", version, vec![EdgeOp::Delete { edge: EdgeId(1000) }]);
    let err = engine
        .isochrone(&request.with_overlay(Arc::new(unknown)))
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgument(_)));
}

#[test]
fn test_empty_overlay_is_the_base_network() {
    let engine = engine_with(synthetic::random(200, 3, 2).unwrap(), 64);
    let version = engine.current_network().unwrap().version();
    let request = IsochroneRequest::new(NodeId(3), Mode::Walk, 400.0);
    let base = engine.isochrone(&request).unwrap();
    let noop = Arc::new(ScenarioOverlay::new("noop", version, vec![]));
    let with_empty = engine
        .isochrone(&request.clone().with_overlay(noop))
        .unwrap();
    assert_eq!(base.reached, with_empty.reached);
    assert_eq!(with_empty.scenario_id.as_deref(), Some("noop"));
}
