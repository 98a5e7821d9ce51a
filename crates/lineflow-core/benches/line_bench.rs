//! Criterion benchmarks for the line simulation.
//!
//! Two benchmark groups:
//! - `parallel_chains`: 100 independent 10-node chains with failures
//! - `branch_tree`: a binary tree of branch points, 6 levels deep

use criterion::{Criterion, criterion_group, criterion_main};
use lineflow_core::id::NodeId;
use lineflow_core::line::Line;
use lineflow_core::spawner::SpawnerConfig;
use lineflow_core::test_utils::*;

// ===========================================================================
// Line builders
// ===========================================================================

/// 100 chains: spawner -> 9 failing segments -> sink.
fn build_parallel_chains() -> Line {
    let mut line = Line::new(0xC0FFEE);
    let mut vertex = 0;
    for _ in 0..100 {
        let mut chain: Vec<NodeId> = Vec::with_capacity(10);
        for i in 0..10 {
            let config = if i == 9 {
                sink(vertex, 8)
            } else {
                failing(vertex, 8, 40.0, Some(6))
            };
            chain.push(line.add_node(config).unwrap());
            vertex += 1;
        }
        for pair in chain.windows(2) {
            line.connect(pair[0], pair[1], 2).unwrap();
        }
        line.add_spawner(SpawnerConfig::default(), chain[0], 1).unwrap();
    }
    line
}

/// Root fans out in a binary tree; leaves are sinks.
fn build_branch_tree() -> Line {
    let mut line = Line::new(7);
    let root = line.add_node(failing(0, 16, 80.0, Some(4))).unwrap();
    let mut frontier = vec![root];
    let mut vertex = 1;
    for depth in 0..6 {
        let leaf = depth == 5;
        let mut next = Vec::with_capacity(frontier.len() * 2);
        for &parent in &frontier {
            for weight in [0.6, 0.4] {
                let config = if leaf {
                    sink(vertex, 8)
                } else {
                    failing(vertex, 8, 60.0, Some(5))
                };
                let child = line.add_node(config).unwrap();
                vertex += 1;
                line.connect_branch(parent, child, fixed(weight), 1).unwrap();
                next.push(child);
            }
        }
        frontier = next;
    }
    line.add_spawner(SpawnerConfig::default(), root, 1).unwrap();
    line
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_parallel_chains(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_chains");
    group.sample_size(50);

    let mut line = build_parallel_chains();
    line.run(200);

    group.bench_function("100_chains_10_nodes", |b| {
        b.iter(|| {
            line.step();
        });
    });

    group.finish();
}

fn bench_branch_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("branch_tree");
    group.sample_size(50);

    let mut line = build_branch_tree();
    line.run(200);

    group.bench_function("binary_tree_depth_6", |b| {
        b.iter(|| {
            line.step();
        });
    });

    group.bench_function("observation_127_nodes", |b| {
        b.iter(|| line.observation());
    });

    group.finish();
}

criterion_group!(benches, bench_parallel_chains, bench_branch_tree);
criterion_main!(benches);
