//! Budgeted, fair stride scheduling.
//!
//! Each active channel gets an allocation weight
//! `(1/extent) × urgency × reachability × health`, every factor normalized
//! to mean 1.0 across the currently active channels; there is no fixed
//! baseline. Fractional weights become integer stride quotas through
//! largest-remainder (Hamilton) apportionment against the tick's total
//! stride budget, which is itself derived from the remaining tick deadline
//! divided by the EMA of observed per-stride cost.
//!
//! Execution is zippered round-robin: one stride per channel per pass,
//! cycling until quotas exhaust or channels converge, so a single large
//! channel cannot monopolize early tick time. A channel converges when the
//! predicted ROI of its next-best candidate falls below the lower
//! statistical whisker of its own recent stride ROI history.

use crate::criticality::CriticalityController;
use crate::instance::InstanceArena;
use crate::stride::{execute_stride, ChannelOverlay, StrideOutcome};
use crate::threshold::{ModulationContext, ThresholdEngine};
use crate::valence::{NeedContext, ScoredChannel, ValenceScorer};
use ember_core::config::SimConfig;
use ember_core::graph::GraphStore;
use ember_core::prelude::ActivationStore;
use ember_core::stats::Ema;
use ember_core::types::{ChannelId, NodeId, Tick};
use serde::Serialize;
use std::collections::BTreeSet;

#[cfg(feature = "parallel")]
use rayon::iter::{ParallelBridge, ParallelIterator};

/// Graph bound for the traversal phase. With the `parallel` feature the
/// graph is read concurrently during valence scoring, so it must be Sync.
#[cfg(feature = "parallel")]
pub trait PhaseGraph: GraphStore + Sync {}
#[cfg(feature = "parallel")]
impl<T: GraphStore + Sync> PhaseGraph for T {}

#[cfg(not(feature = "parallel"))]
pub trait PhaseGraph: GraphStore {}
#[cfg(not(feature = "parallel"))]
impl<T: GraphStore> PhaseGraph for T {}

/// One channel's share of the tick budget.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaShare {
    pub channel: ChannelId,
    pub weight: f64,
    pub quota: usize,
}

/// Everything the redistribution phase produced.
#[derive(Debug, Default)]
pub struct TraversalOutcome {
    pub outcomes: Vec<StrideOutcome>,
    pub quotas: Vec<QuotaShare>,
    pub batches: Vec<(ChannelId, ScoredChannel)>,
    pub budget: usize,
    pub converged_channels: usize,
}

/// Largest-remainder (Hamilton) apportionment of an integer budget across
/// fractional weights. The returned quotas always sum exactly to `budget`
/// whenever any weight is positive; an all-zero weight vector yields
/// all-zero quotas.
pub fn hamilton_apportion(budget: usize, weights: &[f64]) -> Vec<usize> {
    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= 0.0 || budget == 0 {
        return vec![0; weights.len()];
    }

    let exact: Vec<f64> = weights
        .iter()
        .map(|w| {
            if w.is_finite() && *w > 0.0 {
                budget as f64 * w / total
            } else {
                0.0
            }
        })
        .collect();

    let mut quotas: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let assigned: usize = quotas.iter().sum();
    let mut leftover = budget - assigned;

    // Distribute the remainder by largest fractional part; ties go to the
    // earlier index so the result is deterministic.
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = exact[a] - exact[a].floor();
        let fb = exact[b] - exact[b].floor();
        fb.partial_cmp(&fa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    for idx in order {
        if leftover == 0 {
            break;
        }
        if weights[idx] > 0.0 {
            quotas[idx] += 1;
            leftover -= 1;
        }
    }
    // If every positive-weight lane was already topped up, cycle again.
    while leftover > 0 {
        let mut progressed = false;
        for (idx, w) in weights.iter().enumerate() {
            if leftover == 0 {
                break;
            }
            if *w > 0.0 {
                quotas[idx] += 1;
                leftover -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    quotas
}

/// Smoothing for the observed per-stride execution cost.
const COST_ALPHA: f64 = 0.2;

pub struct TraversalScheduler {
    stride_cost_ema: Ema,
}

impl TraversalScheduler {
    pub fn new() -> Self {
        Self {
            stride_cost_ema: Ema::new(COST_ALPHA),
        }
    }

    /// Feed an observed per-stride execution cost (seconds).
    pub fn observe_stride_cost(&mut self, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            self.stride_cost_ema.update(seconds);
        }
    }

    /// Total stride budget for this tick.
    ///
    /// Self-tuning and hardware-adaptive: remaining deadline divided by
    /// the EMA per-stride cost. Before any cost has been observed the
    /// bootstrap budget is one stride per active channel. A configured
    /// fixed budget (deterministic replay) overrides everything.
    pub fn stride_budget(
        &self,
        config: &SimConfig,
        elapsed_seconds: f64,
        active_channels: usize,
    ) -> usize {
        if let Some(fixed) = config.fixed_stride_budget {
            return fixed;
        }
        let remaining = (config.tick_deadline - elapsed_seconds).max(0.0);
        match self.stride_cost_ema.get() {
            Some(cost) if cost > 0.0 => (remaining / cost) as usize,
            _ => active_channels,
        }
    }

    /// Per-channel allocation weights from the scored batches.
    ///
    /// Factor order: inverse extent size, urgency (mean target gap ratio),
    /// reachability (candidate structural mass), health (stride ROI EMA).
    /// Each factor vector is normalized to mean 1.0 before the product, so
    /// no factor needs an absolute scale.
    fn allocation_weights(
        arena: &InstanceArena,
        batches: &[(ChannelId, ScoredChannel)],
    ) -> Vec<f64> {
        let n = batches.len();
        let mut extent_inv = vec![0.0; n];
        let mut urgency = vec![0.0; n];
        let mut reach = vec![0.0; n];
        let mut health = vec![0.0; n];

        for (i, (channel, batch)) in batches.iter().enumerate() {
            let Some(instance) = arena.get(channel) else {
                continue;
            };
            extent_inv[i] = 1.0 / instance.extent_size().max(1) as f64;
            let working = &batch.scores[..batch.selected.min(batch.scores.len())];
            if !working.is_empty() {
                urgency[i] =
                    working.iter().map(|s| s.gap_ratio).sum::<f64>() / working.len() as f64;
                reach[i] = working.iter().map(|s| s.signals[6]).sum();
            }
            health[i] = instance.roi_health();
        }

        for factor in [&mut extent_inv, &mut urgency, &mut reach, &mut health] {
            let mean = factor.iter().sum::<f64>() / n.max(1) as f64;
            if mean > 0.0 {
                for f in factor.iter_mut() {
                    *f /= mean;
                }
            } else {
                // Factor carries no information this tick: neutral.
                for f in factor.iter_mut() {
                    *f = 1.0;
                }
            }
        }

        (0..n)
            .map(|i| {
                // A channel with no executable candidates gets no quota
                // regardless of its other factors.
                if batches[i].1.scores.is_empty() {
                    0.0
                } else {
                    extent_inv[i] * urgency[i] * reach[i] * health[i]
                }
            })
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn score_all<G: PhaseGraph>(
        graph: &G,
        store: &ActivationStore,
        thresholds: &ThresholdEngine,
        mctx: &ModulationContext<'_>,
        need: &NeedContext<'_>,
        scorer: &ValenceScorer,
        arena: &mut InstanceArena,
    ) -> Vec<(ChannelId, ScoredChannel)> {
        let mut batches: Vec<(ChannelId, ScoredChannel)> = arena
            .iter_mut()
            .par_bridge()
            .map(|(channel, instance)| {
                (
                    *channel,
                    scorer.score_channel(graph, store, thresholds, mctx, instance, need),
                )
            })
            .collect();
        batches.sort_by_key(|(channel, _)| *channel);
        batches
    }

    #[cfg(not(feature = "parallel"))]
    fn score_all<G: PhaseGraph>(
        graph: &G,
        store: &ActivationStore,
        thresholds: &ThresholdEngine,
        mctx: &ModulationContext<'_>,
        need: &NeedContext<'_>,
        scorer: &ValenceScorer,
        arena: &mut InstanceArena,
    ) -> Vec<(ChannelId, ScoredChannel)> {
        arena
            .iter_mut()
            .map(|(channel, instance)| {
                (
                    *channel,
                    scorer.score_channel(graph, store, thresholds, mctx, instance, need),
                )
            })
            .collect()
    }

    /// Run the redistribution phase. Transfers are staged into `store`;
    /// the engine owns the commit barrier.
    #[allow(clippy::too_many_arguments)]
    pub fn run_phase<G: PhaseGraph>(
        &mut self,
        graph: &mut G,
        store: &mut ActivationStore,
        thresholds: &ThresholdEngine,
        controller: &CriticalityController,
        arena: &mut InstanceArena,
        scorer: &ValenceScorer,
        mctx: &ModulationContext<'_>,
        need: &NeedContext<'_>,
        tick_start_active: &BTreeSet<(NodeId, ChannelId)>,
        budget: usize,
        tick: Tick,
    ) -> TraversalOutcome {
        let batches = Self::score_all(&*graph, store, thresholds, mctx, need, scorer, arena);
        let weights = Self::allocation_weights(arena, &batches);
        let quota_values = hamilton_apportion(budget, &weights);

        let quotas: Vec<QuotaShare> = batches
            .iter()
            .zip(weights.iter().zip(quota_values.iter()))
            .map(|((channel, _), (weight, quota))| QuotaShare {
                channel: *channel,
                weight: *weight,
                quota: *quota,
            })
            .collect();

        struct Plan {
            channel: ChannelId,
            quota: usize,
            cursor: usize,
            converged: bool,
            overlay: ChannelOverlay,
        }
        let mut plans: Vec<Plan> = quotas
            .iter()
            .map(|q| Plan {
                channel: q.channel,
                quota: q.quota,
                cursor: 0,
                converged: false,
                overlay: ChannelOverlay::new(),
            })
            .collect();

        let mut outcomes = Vec::new();
        let mut progressed = true;
        while progressed {
            progressed = false;
            for (i, plan) in plans.iter_mut().enumerate() {
                if plan.converged || plan.quota == 0 {
                    continue;
                }
                let batch = &batches[i].1;
                if plan.cursor >= batch.selected.min(batch.scores.len()) {
                    plan.converged = true;
                    continue;
                }
                let candidate = &batch.scores[plan.cursor];

                // Relative stopping rule: predicted ROI against the
                // channel's own recent realized ROI.
                if let Some(whisker) =
                    arena.get(&plan.channel).and_then(|inst| inst.roi_whisker())
                {
                    if candidate.predicted_roi < whisker {
                        plan.converged = true;
                        continue;
                    }
                }

                let guard = controller.local_guard(&*graph, &candidate.source);
                let source_mod = mctx.for_pair(&*graph, &candidate.source, &plan.channel);
                let target_mod = mctx.for_pair(&*graph, &candidate.target, &plan.channel);
                let source_was_active =
                    tick_start_active.contains(&(candidate.source, plan.channel));
                let target_was_active =
                    tick_start_active.contains(&(candidate.target, plan.channel));
                if let Some(outcome) = execute_stride(
                    graph,
                    store,
                    thresholds,
                    &source_mod,
                    &target_mod,
                    guard,
                    plan.channel,
                    candidate.link,
                    source_was_active,
                    target_was_active,
                    &mut plan.overlay,
                    tick,
                ) {
                    if let Some(instance) = arena.get_mut(&plan.channel) {
                        instance.record_roi(outcome.roi);
                    }
                    outcomes.push(outcome);
                }
                plan.cursor += 1;
                plan.quota -= 1;
                progressed = true;
            }
        }

        TraversalOutcome {
            outcomes,
            quotas,
            converged_channels: plans.iter().filter(|p| p.converged).count(),
            batches,
            budget,
        }
    }
}

impl Default for TraversalScheduler {
    fn default() -> Self {
        Self::new()
    }
}
