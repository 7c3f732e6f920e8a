//! Bounded stimulus injection.
//!
//! A stimulus arrives already reduced to similarity-scored candidates.
//! Injection proceeds in three self-calibrating steps: the candidate
//! prefix is chosen by entropy coverage (peaked similarity distributions
//! inject into few candidates, flat ones into more); the total budget
//! comes from compute headroom times stability-regime health; and the
//! budget is distributed proportional to `similarity ×
//! threshold-crossing efficiency`, capped per node at its
//! gap-to-threshold with capped surplus redistributed to the remaining
//! uncapped candidates. Injection never wastes budget overshooting an
//! already-active node. Link candidates split their allocation across the
//! two endpoints by the learned directional prior.

use crate::threshold::{ModulationContext, ThresholdEngine};
use ember_core::graph::GraphStore;
use ember_core::prelude::ActivationStore;
use ember_core::stats::entropy_coverage_prefix;
use ember_core::types::{CandidateRef, NodeId, StimulusEvent};
use std::collections::BTreeMap;
use tracing::debug;

/// Redistribution passes after the initial allocation.
const REDISTRIBUTION_PASSES: usize = 2;

/// Outcome of injecting one stimulus. Writes are staged; the engine owns
/// the commit barrier.
#[derive(Debug, Clone, Default)]
pub struct InjectionReport {
    /// Candidates present on the event and resolvable in the graph.
    pub considered: usize,
    /// Candidates in the entropy-derived prefix.
    pub selected: usize,
    /// Budget the headroom and regime allowed.
    pub budget: f64,
    /// Activation actually staged.
    pub injected: f64,
    /// Per-node staged amounts, in node id order.
    pub allocations: Vec<(NodeId, f64)>,
}

/// One selected candidate with its endpoint breakdown: a node candidate
/// has one endpoint at full share, a link candidate two endpoints split by
/// the directional prior.
struct Selected {
    similarity: f64,
    endpoints: Vec<(NodeId, f64)>,
}

pub struct StimulusInjector;

impl StimulusInjector {
    pub fn new() -> Self {
        Self
    }

    fn endpoints_of<G: GraphStore>(graph: &G, candidate: &CandidateRef) -> Option<Vec<(NodeId, f64)>> {
        match candidate {
            CandidateRef::Node(node) => {
                graph.node(node)?;
                Some(vec![(*node, 1.0)])
            }
            CandidateRef::Link(link_id) => {
                let link = graph.link(link_id)?;
                let source_share = link.stats.direction_prior();
                Some(vec![
                    (link.source, source_share),
                    (link.target, 1.0 - source_share),
                ])
            }
        }
    }

    /// Inject one stimulus. `headroom` is the engine's free compute
    /// fraction in [0, 1]; `regime_health` comes from the criticality
    /// controller.
    pub fn inject<G: GraphStore>(
        &self,
        graph: &G,
        store: &mut ActivationStore,
        thresholds: &mut ThresholdEngine,
        mctx: &ModulationContext<'_>,
        event: &StimulusEvent,
        headroom: f64,
        regime_health: f64,
    ) -> InjectionReport {
        let channel = event.channel;
        let mut report = InjectionReport::default();

        // Resolve candidates against the graph, keeping event order for
        // equal similarities.
        let mut candidates: Vec<Selected> = Vec::new();
        for (candidate, similarity) in &event.candidates {
            let similarity = similarity.clamp(0.0, 1.0);
            if similarity <= 0.0 {
                continue;
            }
            if let Some(endpoints) = Self::endpoints_of(graph, candidate) {
                candidates.push(Selected {
                    similarity,
                    endpoints,
                });
            }
        }
        report.considered = candidates.len();
        if candidates.is_empty() {
            return report;
        }

        // Entropy-adaptive prefix over the similarity distribution.
        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let sims: Vec<f64> = candidates.iter().map(|c| c.similarity).collect();
        let selected = entropy_coverage_prefix(&sims);
        candidates.truncate(selected);
        report.selected = selected;

        // Remaining gap per distinct endpoint node.
        let mut node_gap: BTreeMap<NodeId, f64> = BTreeMap::new();
        for candidate in &candidates {
            for (node, _) in &candidate.endpoints {
                node_gap.entry(*node).or_insert_with(|| {
                    let m = mctx.for_pair(graph, node, &channel);
                    let threshold = thresholds.threshold(node, &channel, &m);
                    (threshold - store.get(node, &channel)).max(0.0)
                });
            }
        }

        // Injection budget: a healthy regime on an unloaded host may fill
        // every selected gap; load or a hot regime shrinks that.
        let gap_total: f64 = node_gap.values().sum();
        let budget = headroom.clamp(0.0, 1.0) * regime_health.clamp(0.0, 1.0) * gap_total;
        report.budget = budget;
        if budget <= 0.0 {
            debug!(
                candidates = report.considered,
                "stimulus arrived with no injection budget"
            );
            return report;
        }

        // Candidate gap: prior-weighted over its endpoints. Distribution
        // weight: similarity × efficiency, where efficiency is the mean
        // candidate gap over this candidate's gap: candidates closer to
        // crossing convert budget into crossings more cheaply, and the
        // mean-gap numerator keeps the weights scale-free.
        let candidate_gap = |c: &Selected, gaps: &BTreeMap<NodeId, f64>| -> f64 {
            c.endpoints
                .iter()
                .map(|(node, _)| gaps.get(node).copied().unwrap_or(0.0))
                .sum()
        };
        let initial_gaps: Vec<f64> = candidates
            .iter()
            .map(|c| candidate_gap(c, &node_gap))
            .collect();
        let positive: Vec<f64> = initial_gaps.iter().copied().filter(|g| *g > 0.0).collect();
        let mean_gap = if positive.is_empty() {
            0.0
        } else {
            positive.iter().sum::<f64>() / positive.len() as f64
        };
        let weights: Vec<f64> = candidates
            .iter()
            .zip(initial_gaps.iter())
            .map(|(c, gap)| {
                if *gap > 0.0 {
                    c.similarity * (mean_gap / gap)
                } else {
                    0.0
                }
            })
            .collect();

        // Proportional allocation capped at the endpoints' remaining gaps,
        // with capped surplus redistributed to still-open candidates.
        let mut staged: BTreeMap<NodeId, f64> = BTreeMap::new();
        let mut remaining = budget;
        for _ in 0..=REDISTRIBUTION_PASSES {
            if remaining <= 0.0 {
                break;
            }
            let open: Vec<usize> = (0..candidates.len())
                .filter(|&i| weights[i] > 0.0 && candidate_gap(&candidates[i], &node_gap) > 0.0)
                .collect();
            let open_weight: f64 = open.iter().map(|&i| weights[i]).sum();
            if open.is_empty() || open_weight <= 0.0 {
                break;
            }
            let mut consumed = 0.0;
            for &i in &open {
                let offered = remaining * weights[i] / open_weight;
                // Split across endpoints by the directional prior; an
                // endpoint at capacity passes its share to the other.
                let mut leftover = 0.0;
                for (node, share) in &candidates[i].endpoints {
                    let gap = node_gap.get_mut(node).expect("endpoint gap present");
                    let accepted = (offered * share + leftover).min(*gap);
                    leftover = (offered * share + leftover) - accepted;
                    if accepted > 0.0 {
                        *gap -= accepted;
                        *staged.entry(*node).or_insert(0.0) += accepted;
                        consumed += accepted;
                    }
                }
            }
            remaining -= consumed;
            if consumed <= 0.0 {
                break;
            }
        }

        for (node, amount) in staged {
            store.stage(node, channel, amount);
            thresholds.mark_driven(node, channel);
            report.injected += amount;
            report.allocations.push((node, amount));
        }
        report
    }
}

impl Default for StimulusInjector {
    fn default() -> Self {
        Self::new()
    }
}
