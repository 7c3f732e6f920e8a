//! Conservation property: with decay disabled, a diffusion-only tick
//! neither creates nor destroys activation in any channel.

use ember_core::prelude::*;
use ember_engine::engine::Engine;
use ember_engine::graph_mem::MemoryGraph;

fn dense_graph(n: u64) -> (MemoryGraph, Vec<NodeId>) {
    let mut graph = MemoryGraph::new();
    let nodes: Vec<NodeId> = (0..n)
        .map(|i| {
            graph.add_node(NodeData {
                id: NodeId::from_seed(i),
                kind: NodeKind::Concept,
                base_weight: 1.0,
                embedding: None,
            })
        })
        .collect();
    let mut link_seed = 0;
    for i in 0..n as usize {
        for j in 0..n as usize {
            if i != j && (i + j) % 2 == 0 {
                graph.add_link(LinkData {
                    id: LinkId::from_seed(link_seed),
                    source: nodes[i],
                    target: nodes[j],
                    weight: 0.2 + 0.1 * ((i + j) % 5) as f64,
                    kind: LinkKind::Association,
                    stats: LinkStats::default(),
                    created_tick: 0,
                });
                link_seed += 1;
            }
        }
    }
    (graph, nodes)
}

#[test]
fn diffusion_only_ticks_conserve_every_channel() {
    let (graph, nodes) = dense_graph(8);
    // The safety bounds pin the tuned decay rate to (numerically) zero,
    // so the controller cannot re-enable decay mid-test.
    let config = SimConfig {
        decay_bounds: (0.0, 1e-15),
        initial_decay_rate: 0.0,
        link_decay_rate: 0.0,
        // Thresholds far above any activation: no instances, no strides.
        threshold_floor: 100.0,
        fixed_stride_budget: Some(0),
        ..Default::default()
    };
    let mut engine = Engine::new(graph, config).unwrap();

    let alpha = ChannelId::from_seed(1);
    let beta = ChannelId::from_seed(2);
    engine.store_mut().set(nodes[0], alpha, 1.0);
    engine.store_mut().set(nodes[3], alpha, 0.4);
    engine.store_mut().set(nodes[5], beta, 2.5);

    let alpha_before = engine.store().channel_total(&alpha);
    let beta_before = engine.store().channel_total(&beta);

    for _ in 0..25 {
        let stats = engine.step(1.0);
        assert_eq!(stats.strides, 0);
        assert!(stats.diffusion_transfers > 0, "diffusion should keep flowing");
    }

    let alpha_after = engine.store().channel_total(&alpha);
    let beta_after = engine.store().channel_total(&beta);
    assert!(
        (alpha_before - alpha_after).abs() < 1e-9,
        "alpha drifted: {alpha_before} -> {alpha_after}"
    );
    assert!(
        (beta_before - beta_after).abs() < 1e-9,
        "beta drifted: {beta_before} -> {beta_after}"
    );
}

#[test]
fn channels_never_leak_into_each_other() {
    let (graph, nodes) = dense_graph(6);
    let config = SimConfig {
        decay_bounds: (0.0, 1e-15),
        initial_decay_rate: 0.0,
        link_decay_rate: 0.0,
        threshold_floor: 100.0,
        fixed_stride_budget: Some(0),
        ..Default::default()
    };
    let mut engine = Engine::new(graph, config).unwrap();

    let alpha = ChannelId::from_seed(1);
    let beta = ChannelId::from_seed(2);
    engine.store_mut().set(nodes[0], alpha, 1.0);

    for _ in 0..10 {
        engine.step(1.0);
    }
    assert!(engine.store().channel_total(&alpha) > 0.0);
    assert_eq!(engine.store().channel_total(&beta), 0.0);
}
