//! Synthetic networks for tests, benchmarks and the `generate` command

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ConfigurationError;
use crate::mode::{Mode, ModeMask};
use crate::network::{Edge, ModeCosts, Network, NetworkBuilder, NodeId};

/// `width × height` grid, row-major ids, each neighbour pair joined both ways at `cost`
pub fn grid(width: usize, height: usize, cost: f64) -> Result<Network, ConfigurationError> {
    let mut b = NetworkBuilder::with_capacity(width * height, 4 * width * height);
    for y in 0..height {
        for x in 0..width {
            b.add_node(x as f64 * 0.001, y as f64 * 0.001, ModeMask::ALL);
        }
    }
    let id = |x: usize, y: usize| NodeId((y * width + x) as u32);
    let costs = ModeCosts::uniform(cost);
    for y in 0..height {
        for x in 0..width {
            if x + 1 < width {
                b.add_bidirectional(id(x, y), id(x + 1, y), costs);
            }
            if y + 1 < height {
                b.add_bidirectional(id(x, y), id(x, y + 1), costs);
            }
        }
    }
    b.build()
}

/// Random sparse multi-modal network
///
/// Edges carry random lengths and per-mode costs; some modes are missing on
/// some edges, a few nodes forbid cars, and parallel edges, zero costs and
/// one-way streets all occur.
pub fn random(
    n_nodes: usize,
    avg_out_degree: usize,
    seed: u64,
) -> Result<Network, ConfigurationError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_edges = n_nodes * avg_out_degree;
    let mut b = NetworkBuilder::with_capacity(n_nodes, n_edges);

    for _ in 0..n_nodes {
        let mut modes = ModeMask::ALL;
        if rng.random_bool(0.1) {
            modes = modes.without(Mode::Car);
        }
        b.add_node(rng.random_range(4.0..5.0), rng.random_range(50.0..51.0), modes);
    }
    if n_nodes == 0 {
        return b.build();
    }

    for _ in 0..n_edges {
        let from = NodeId(rng.random_range(0..n_nodes as u32));
        let to = NodeId(rng.random_range(0..n_nodes as u32));
        let length_m: f64 = if rng.random_bool(0.02) {
            0.0
        } else {
            rng.random_range(5.0..500.0)
        };

        let mut costs = ModeCosts::default();
        for &mode in Mode::all() {
            let speed_ms = match mode {
                Mode::Walk => 1.39,
                Mode::Bike => 4.17,
                Mode::Car => 13.9,
                Mode::Transit => 8.0,
            };
            let present = match mode {
                Mode::Walk => rng.random_bool(0.95),
                Mode::Bike => rng.random_bool(0.8),
                Mode::Car => rng.random_bool(0.6),
                Mode::Transit => rng.random_bool(0.3),
            };
            if present {
                costs.set(mode, Some((length_m / speed_ms * 10.0).round() / 10.0));
            }
        }

        b.push_edge(Edge {
            from,
            to,
            costs,
            length_m: Some(length_m),
            geometry: Some(rng.random_range(0..1_000_000)),
        });
        if rng.random_bool(0.6) {
            b.push_edge(Edge {
                from: to,
                to: from,
                costs,
                length_m: Some(length_m),
                geometry: None,
            });
        }
    }
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_shape() {
        let net = grid(5, 4, 1.0).unwrap();
        assert_eq!(net.n_nodes(), 20);
        // horizontal 4*4 + vertical 5*3, both directions
        assert_eq!(net.n_edges(), 2 * (16 + 15));
        assert_eq!(net.out_edges(NodeId(0)).count(), 2);
        assert_eq!(net.out_edges(NodeId(6)).count(), 4);
    }

    #[test]
    fn test_random_is_seeded() {
        let a = random(50, 3, 11).unwrap();
        let b = random(50, 3, 11).unwrap();
        assert_eq!(a.edges(), b.edges());
        assert_eq!(a.nodes(), b.nodes());
        let c = random(50, 3, 12).unwrap();
        assert_ne!(a.edges(), c.edges());
    }
}
