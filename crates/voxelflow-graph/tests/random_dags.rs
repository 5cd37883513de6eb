//! Property checks on randomly generated unit graphs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use voxelflow_graph::{DependencyGraph, UnitSpec};

/// Unit `i` writes `f{i}` and reads a random subset of fields written by
/// lower-numbered units, so the graph is acyclic by construction.
fn random_dag(rng: &mut StdRng, n: usize) -> Vec<UnitSpec> {
    let mut units: Vec<UnitSpec> = (0..n)
        .map(|i| {
            let reads: Vec<String> = (0..i)
                .filter(|_| rng.gen_bool(0.2))
                .map(|j| format!("f{}", j))
                .collect();
            UnitSpec::new(format!("u{}", i))
                .reads(reads)
                .writes([format!("f{}", i)])
                .with_neighbor_radius(rng.gen_range(0..3))
        })
        .collect();
    // Registration order must not matter for validity.
    for i in (1..units.len()).rev() {
        let j = rng.gen_range(0..=i);
        units.swap(i, j);
    }
    units
}

#[test]
fn test_random_dags_respect_every_edge() {
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..50 {
        let n = rng.gen_range(1..40);
        let graph = DependencyGraph::from_units(random_dag(&mut rng, n));
        assert!(!graph.has_cycle());

        let order = graph.execution_order().unwrap();
        assert_eq!(order.len(), n);

        let mut sorted = order.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), n, "schedule must be a permutation");

        let pos = |id: &str| order.iter().position(|u| u == id).unwrap();
        for edge in graph.edges() {
            assert!(pos(&edge.from) < pos(&edge.to), "{} must precede {}", edge.from, edge.to);
        }

        assert_eq!(graph.execution_order().unwrap(), order);
    }
}

#[test]
fn test_back_edge_creates_cycle() {
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..20 {
        let n = rng.gen_range(3..30);
        let mut graph = DependencyGraph::from_units(random_dag(&mut rng, n));

        // Chain through every unit, then close the loop.
        for i in 0..n {
            let prev = if i == 0 { n - 1 } else { i - 1 };
            let id = format!("u{}", i);
            let mut unit = graph.unit(&id).unwrap().clone();
            unit = unit.reads([format!("f{}", prev)]);
            graph.add_unit(unit);
        }

        assert!(graph.has_cycle());
        let err = graph.execution_order().unwrap_err();
        assert!(err.units.len() >= 2);
        assert_eq!(graph.len(), n);
    }
}

#[test]
fn test_same_graph_same_order_across_instances() {
    let mut rng = StdRng::seed_from_u64(42);
    let units = random_dag(&mut rng, 25);

    let a = DependencyGraph::from_units(units.clone()).execution_order().unwrap();
    let b = DependencyGraph::from_units(units).execution_order().unwrap();
    assert_eq!(a, b);
}
