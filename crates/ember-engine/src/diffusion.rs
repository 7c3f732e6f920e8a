//! Per-tick diffusion and decay.
//!
//! Diffusion moves activation along weighted outgoing links:
//! `transfer = activation × weight × diffusion_rate × Δt`, computed from
//! pre-phase state for every node in the frontier and applied atomically
//! at the phase barrier. Outflow is proportionally rescaled so a source
//! can never go negative, which keeps a diffusion-only tick exactly
//! conservative.
//!
//! Decay is multiplicative, `exp(-δ·Δt)`, with the activation rate tuned
//! by the criticality controller and scaled per node kind. Link weights
//! decay on their own, much slower, independently configured rate.

use crate::threshold::ThresholdEngine;
use ember_core::config::{KindDecayScales, SimConfig};
use ember_core::graph::GraphStore;
use ember_core::prelude::ActivationStore;
use ember_core::types::{NodeKind, PrunedLink, Tick};

/// Smoothing for the per-link flow magnitude EMA.
const FLOW_ALPHA: f64 = 0.2;

/// Outcome of one diffusion pass, before the commit barrier.
#[derive(Debug, Clone, Default)]
pub struct DiffusionReport {
    /// Number of individual link transfers staged.
    pub transfers: usize,
    /// Total staged flow magnitude.
    pub total_flow: f64,
    /// Transfers skipped as numerical noise.
    pub skipped: usize,
}

/// Outcome of one decay pass.
#[derive(Debug, Clone, Default)]
pub struct DecayReport {
    pub nodes_decayed: usize,
    pub links_pruned: Vec<PrunedLink>,
}

pub struct DiffusionScheduler;

impl DiffusionScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Transfers below this fraction of the flow scale are numerical
    /// noise: skipping them bounds bookkeeping on negligible flows.
    fn cutoff(source_activation: f64) -> f64 {
        f64::EPSILON.sqrt() * (1.0 + source_activation)
    }

    /// Stage one diffusion pass. The caller owns the commit barrier.
    pub fn diffuse<G: GraphStore>(
        &self,
        graph: &mut G,
        store: &mut ActivationStore,
        diffusion_rate: f64,
        dt: f64,
        tick: Tick,
    ) -> DiffusionReport {
        let mut report = DiffusionReport::default();
        let frontier = store.support();

        for node in frontier {
            // Pre-phase state: committed values only.
            let channels: Vec<_> = store.channels(&node).to_vec();
            let out_links = graph.outgoing(&node);
            if out_links.is_empty() {
                continue;
            }

            for (channel, activation) in channels {
                if activation <= 0.0 || store.is_isolated(&node, &channel) {
                    continue;
                }

                let mut raw: Vec<(ember_core::types::LinkId, ember_core::types::NodeId, f64)> =
                    Vec::new();
                let mut total = 0.0;
                for link_id in &out_links {
                    let Some(link) = graph.link(link_id) else {
                        continue;
                    };
                    if link.weight <= 0.0 {
                        continue;
                    }
                    let amount = activation * link.weight * diffusion_rate * dt;
                    if amount > 0.0 {
                        raw.push((*link_id, link.target, amount));
                        total += amount;
                    }
                }
                if total <= 0.0 {
                    continue;
                }

                // A dense out-neighborhood may ask for more than the source
                // holds; rescale so the staged outflow never exceeds it.
                let scale = if total > activation {
                    activation / total
                } else {
                    1.0
                };

                for (link_id, target, amount) in raw {
                    let amount = amount * scale;
                    if amount < Self::cutoff(activation) {
                        report.skipped += 1;
                        continue;
                    }
                    if store.is_isolated(&target, &channel) {
                        continue;
                    }
                    store.stage(node, channel, -amount);
                    store.stage(target, channel, amount);
                    report.transfers += 1;
                    report.total_flow += amount;

                    if let Some(link) = graph.link_mut(&link_id) {
                        let ema = link.stats.flow_ema;
                        link.stats.flow_ema = ema + FLOW_ALPHA * (amount - ema);
                        link.stats.last_tick = tick;
                    }
                }
            }
        }
        report
    }

    /// Apply activation and link-weight decay. Runs in its own phase; the
    /// in-place writes *are* the barrier.
    ///
    /// Quiet (node, channel) pairs feed their post-decay level into the
    /// threshold engine's noise floor on the way through.
    #[allow(clippy::too_many_arguments)]
    pub fn decay<G: GraphStore>(
        &self,
        graph: &mut G,
        store: &mut ActivationStore,
        thresholds: &mut ThresholdEngine,
        decay_rate: f64,
        dt: f64,
        config: &SimConfig,
        tick: Tick,
    ) -> DecayReport {
        let mut report = DecayReport::default();

        for node in store.support() {
            let kind = graph.node(&node).map(|n| n.kind).unwrap_or(NodeKind::Concept);
            let scale = Self::kind_scale(&config.kind_decay_scales, kind);
            let factor = (-decay_rate * scale * dt).exp();
            if factor < 1.0 {
                store.scale_node(&node, factor);
                report.nodes_decayed += 1;
            }
            for (channel, activation) in store.channels(&node).to_vec() {
                thresholds.observe_quiet(node, channel, activation);
            }
        }

        report.links_pruned = graph.decay_weights(
            config.link_decay_rate,
            dt,
            config.link_prune_floor,
            tick,
            config.link_maturation_ticks,
        );
        report
    }

    fn kind_scale(scales: &KindDecayScales, kind: NodeKind) -> f64 {
        match kind {
            NodeKind::Concept => scales.concept,
            NodeKind::Percept => scales.percept,
            NodeKind::Episode => scales.episode,
        }
    }
}

impl Default for DiffusionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Adaptive tick duration: idle periods cost near-zero compute, active
/// periods tick near the minimum interval.
pub fn adaptive_dt(seconds_since_last_stimulus: f64, config: &SimConfig) -> f64 {
    seconds_since_last_stimulus.clamp(config.min_tick_interval, config.max_tick_interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_mem::MemoryGraph;
    use ember_core::types::*;

    fn two_node_graph(weight: f64) -> (MemoryGraph, NodeId, NodeId) {
        let mut graph = MemoryGraph::new();
        let a = graph.add_node(NodeData::new(NodeKind::Concept));
        let b = graph.add_node(NodeData::new(NodeKind::Concept));
        graph.add_link(LinkData::new(a, b, weight, LinkKind::Association));
        (graph, a, b)
    }

    #[test]
    fn diffusion_moves_activation_downstream() {
        let (mut graph, a, b) = two_node_graph(0.5);
        let mut store = ActivationStore::new();
        let chan = ChannelId::from_seed(1);
        store.set(a, chan, 0.9);

        let sched = DiffusionScheduler::new();
        let report = sched.diffuse(&mut graph, &mut store, 0.1, 1.0, 0);
        store.commit();

        assert_eq!(report.transfers, 1);
        let expected = 0.9 * 0.5 * 0.1;
        assert!((store.get(&b, &chan) - expected).abs() < 1e-12);
        assert!((store.get(&a, &chan) - (0.9 - expected)).abs() < 1e-12);
    }

    #[test]
    fn diffusion_conserves_channel_total() {
        let mut graph = MemoryGraph::new();
        let nodes: Vec<NodeId> = (0..5)
            .map(|_| graph.add_node(NodeData::new(NodeKind::Concept)))
            .collect();
        for i in 0..5 {
            for j in 0..5 {
                if i != j {
                    graph.add_link(LinkData::new(
                        nodes[i],
                        nodes[j],
                        0.3 + 0.1 * i as f64,
                        LinkKind::Association,
                    ));
                }
            }
        }
        let mut store = ActivationStore::new();
        let chan = ChannelId::from_seed(1);
        store.set(nodes[0], chan, 1.0);
        store.set(nodes[2], chan, 0.4);

        let before = store.channel_total(&chan);
        let sched = DiffusionScheduler::new();
        for tick in 0..10 {
            sched.diffuse(&mut graph, &mut store, 0.2, 1.0, tick);
            store.commit();
        }
        let after = store.channel_total(&chan);
        assert!(
            (before - after).abs() < 1e-9,
            "total drifted: {before} -> {after}"
        );
    }

    #[test]
    fn dense_outflow_never_overdraws_the_source() {
        let mut graph = MemoryGraph::new();
        let hub = graph.add_node(NodeData::new(NodeKind::Concept));
        for _ in 0..20 {
            let spoke = graph.add_node(NodeData::new(NodeKind::Concept));
            graph.add_link(LinkData::new(hub, spoke, 1.0, LinkKind::Association));
        }
        let mut store = ActivationStore::new();
        let chan = ChannelId::from_seed(1);
        store.set(hub, chan, 0.5);

        // rate·dt=1 over 20 unit-weight links would ask for 10× the source.
        let sched = DiffusionScheduler::new();
        sched.diffuse(&mut graph, &mut store, 1.0, 1.0, 0);
        store.commit();

        assert!(store.get(&hub, &chan) >= 0.0);
        assert!((store.channel_total(&chan) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn decay_respects_kind_scales() {
        let mut graph = MemoryGraph::new();
        let concept = graph.add_node(NodeData::new(NodeKind::Concept));
        let episode = graph.add_node(NodeData::new(NodeKind::Episode));
        let mut store = ActivationStore::new();
        let chan = ChannelId::from_seed(1);
        store.set(concept, chan, 1.0);
        store.set(episode, chan, 1.0);

        let config = SimConfig {
            kind_decay_scales: KindDecayScales {
                concept: 1.0,
                percept: 1.0,
                episode: 0.0, // decay disabled for episodes
            },
            ..Default::default()
        };
        let mut thresholds = ThresholdEngine::new(config.z_alpha, config.threshold_floor);
        let sched = DiffusionScheduler::new();
        sched.decay(
            &mut graph,
            &mut store,
            &mut thresholds,
            0.5,
            1.0,
            &config,
            0,
        );

        assert!(store.get(&concept, &chan) < 1.0);
        assert_eq!(store.get(&episode, &chan), 1.0);
    }

    #[test]
    fn isolated_pairs_are_skipped() {
        let (mut graph, a, b) = two_node_graph(0.5);
        let mut store = ActivationStore::new();
        let chan = ChannelId::from_seed(1);
        store.set(a, chan, 0.9);
        // Poison the pair so the guard isolates it.
        store.stage(a, chan, f64::NAN);
        store.commit();
        assert!(store.is_isolated(&a, &chan));

        let sched = DiffusionScheduler::new();
        let report = sched.diffuse(&mut graph, &mut store, 0.1, 1.0, 0);
        store.commit();
        assert_eq!(report.transfers, 0);
        assert_eq!(store.get(&b, &chan), 0.0);
    }

    #[test]
    fn adaptive_dt_clamps_to_configured_bounds() {
        let config = SimConfig::default();
        assert_eq!(adaptive_dt(0.0, &config), config.min_tick_interval);
        assert_eq!(adaptive_dt(100.0, &config), config.max_tick_interval);
        let mid = (config.min_tick_interval + config.max_tick_interval) / 2.0;
        assert_eq!(adaptive_dt(mid, &config), mid);
    }
}
