//! Composite, self-calibrating edge desirability.
//!
//! For every candidate outgoing edge of an active channel the scorer
//! computes several independent "need" signals. Each raw signal is turned
//! into a standardized surprise against that channel's own rolling
//! statistics for that signal, clipped to non-negative, and normalized
//! into a gate weight across all signals. One abnormal need therefore
//! dominates the gate; when every need is satisfied the gates flatten and
//! influence is weak and diffuse. There are no fixed signal weights
//! anywhere.
//!
//! Edge selection uses the same entropy-adaptive coverage rule as
//! stimulus injection: rank by valence, take the smallest prefix covering
//! the entropy-derived target.

use crate::instance::ChannelInstance;
use crate::threshold::{ModulationContext, ThresholdEngine};
use ember_core::graph::GraphStore;
use ember_core::prelude::ActivationStore;
use ember_core::semantic::normalized_similarity;
use ember_core::stats::{entropy_coverage_prefix, RollingMoments};
use ember_core::types::{LinkId, NodeId};

/// Number of independent need signals.
pub const SIGNAL_COUNT: usize = 7;

/// Signal names, index-aligned with `EdgeScore::signals`.
pub const SIGNAL_NAMES: [&str; SIGNAL_COUNT] = [
    "gap_closure",
    "goal",
    "identity",
    "diversity",
    "affect",
    "merge",
    "ease",
];

/// Non-negative standardized surprise of `x` against rolling moments.
///
/// The spread is floored at a sliver of the mean so that a history with
/// zero variance still registers departures as (very) surprising instead
/// of muting them.
fn surprise(stats: &RollingMoments, x: f64) -> f64 {
    if stats.count() < 2 {
        return 0.0;
    }
    let scale = stats
        .std()
        .max(stats.mean().abs() * 1e-6)
        .max(f64::MIN_POSITIVE);
    ((x - stats.mean()) / scale).max(0.0)
}

/// Optional semantic context for need scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeedContext<'a> {
    pub goal: Option<&'a [f32]>,
    pub mood: Option<&'a [f32]>,
}

/// A scored candidate edge.
#[derive(Debug, Clone)]
pub struct EdgeScore {
    pub link: LinkId,
    pub source: NodeId,
    pub target: NodeId,
    /// Gate-weighted sum of the raw need signals.
    pub valence: f64,
    /// Predicted return on investment: the estimated fraction of the
    /// target's threshold gap this stride would close. Compared against
    /// the channel's ROI whisker by the convergence rule.
    pub predicted_roi: f64,
    /// Target gap as a fraction of its threshold, in [0, 1].
    pub gap_ratio: f64,
    pub signals: [f64; SIGNAL_COUNT],
}

/// Result of scoring one channel's candidate edges.
#[derive(Debug, Clone, Default)]
pub struct ScoredChannel {
    /// All candidates, sorted by descending valence.
    pub scores: Vec<EdgeScore>,
    /// Length of the entropy-derived working prefix.
    pub selected: usize,
}

pub struct ValenceScorer;

impl ValenceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score every candidate outgoing edge of the channel's extent.
    ///
    /// Updates the instance's per-signal rolling statistics as a side
    /// effect; surprise is always measured against the state *before*
    /// this batch.
    pub fn score_channel<G: GraphStore>(
        &self,
        graph: &G,
        store: &ActivationStore,
        thresholds: &ThresholdEngine,
        mctx: &ModulationContext<'_>,
        instance: &mut ChannelInstance,
        need: &NeedContext<'_>,
    ) -> ScoredChannel {
        let channel = instance.channel;
        struct RawCandidate {
            link: LinkId,
            source: NodeId,
            target: NodeId,
            gap_ratio: f64,
            signals: [f64; SIGNAL_COUNT],
            available: [bool; SIGNAL_COUNT],
        }
        let mut raw: Vec<RawCandidate> = Vec::new();

        for source in instance.extent.iter().copied().collect::<Vec<_>>() {
            let source_mod = mctx.for_pair(graph, &source, &channel);
            let source_act = store.get(&source, &channel);
            let source_thr = thresholds.threshold(&source, &channel, &source_mod);
            let slack = (source_act - source_thr).max(0.0);
            if slack <= 0.0 {
                continue;
            }

            for link_id in graph.outgoing(&source) {
                let Some(link) = graph.link(&link_id) else {
                    continue;
                };
                if link.weight <= 0.0 {
                    continue;
                }
                let target = link.target;
                if store.is_isolated(&target, &channel) {
                    continue;
                }

                let mut signals = [0.0; SIGNAL_COUNT];
                let mut available = [false; SIGNAL_COUNT];

                // Gap closure: estimated fraction of the target's
                // threshold gap this transfer would close.
                let target_mod = mctx.for_pair(graph, &target, &channel);
                let target_act = store.get(&target, &channel);
                let target_thr = thresholds.threshold(&target, &channel, &target_mod);
                let gap = (target_thr - target_act).max(0.0);
                let estimate = slack * link.weight;
                if gap > 0.0 {
                    signals[0] = (estimate / gap).min(1.0);
                }
                available[0] = true;
                let gap_ratio = if target_thr > 0.0 {
                    (gap / target_thr).clamp(0.0, 1.0)
                } else {
                    0.0
                };

                let embedding = graph.node(&target).and_then(|n| n.embedding.as_deref());

                if let Some(sim) = need
                    .goal
                    .and_then(|goal| embedding.and_then(|e| normalized_similarity(e, goal)))
                {
                    signals[1] = sim;
                    available[1] = true;
                }

                if let Some(sim) = instance
                    .centroid
                    .as_deref()
                    .and_then(|c| embedding.and_then(|e| normalized_similarity(e, c)))
                {
                    signals[2] = sim;
                    available[2] = true;
                    // Diversity is the complement of footprint similarity:
                    // how much new semantic ground the target opens.
                    signals[3] = 1.0 - sim;
                    available[3] = true;
                }

                if let Some(sim) = need
                    .mood
                    .and_then(|mood| embedding.and_then(|e| normalized_similarity(e, mood)))
                {
                    signals[4] = sim;
                    available[4] = true;
                }

                // Merge opportunity: the target already glows in another
                // channel, so feeding it here can join a larger pattern.
                // Soft membership, so a pattern hovering at its threshold
                // neither flickers in nor out of consideration.
                signals[5] = store
                    .channels(&target)
                    .iter()
                    .filter(|(c, _)| *c != channel)
                    .map(|(other, a)| {
                        let other_mod = mctx.for_pair(graph, &target, other);
                        thresholds.soft(&target, other, *a, &other_mod)
                    })
                    .fold(0.0f64, f64::max);
                available[5] = true;

                // Structural ease.
                signals[6] = link.weight;
                available[6] = true;

                raw.push(RawCandidate {
                    link: link_id,
                    source,
                    target,
                    gap_ratio,
                    signals,
                    available,
                });
            }
        }

        // Standardized surprise against the channel's own history, then
        // gate-normalize. Statistics observe the batch only after all
        // surprises are read.
        let mut scores: Vec<EdgeScore> = raw
            .iter()
            .map(|c| {
                let mut surprise_z = [0.0; SIGNAL_COUNT];
                let mut total = 0.0;
                let mut n_available = 0usize;
                for k in 0..SIGNAL_COUNT {
                    if !c.available[k] {
                        continue;
                    }
                    n_available += 1;
                    let z = surprise(&instance.signal_stats[k], c.signals[k]);
                    surprise_z[k] = z;
                    total += z;
                }
                let valence = if total > 0.0 {
                    (0..SIGNAL_COUNT)
                        .filter(|k| c.available[*k])
                        .map(|k| (surprise_z[k] / total) * c.signals[k])
                        .sum()
                } else if n_available > 0 {
                    // All needs satisfied: weak, diffuse influence.
                    (0..SIGNAL_COUNT)
                        .filter(|k| c.available[*k])
                        .map(|k| c.signals[k] / n_available as f64)
                        .sum()
                } else {
                    0.0
                };
                EdgeScore {
                    link: c.link,
                    source: c.source,
                    target: c.target,
                    valence,
                    predicted_roi: c.signals[0],
                    gap_ratio: c.gap_ratio,
                    signals: c.signals,
                }
            })
            .collect();

        for c in &raw {
            for k in 0..SIGNAL_COUNT {
                if c.available[k] {
                    instance.signal_stats[k].update(c.signals[k]);
                }
            }
        }

        scores.sort_by(|a, b| {
            b.valence
                .partial_cmp(&a.valence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.link.cmp(&b.link))
        });
        let valences: Vec<f64> = scores.iter().map(|s| s.valence).collect();
        let selected = entropy_coverage_prefix(&valences);

        ScoredChannel { scores, selected }
    }
}

impl Default for ValenceScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_mem::MemoryGraph;
    use crate::instance::InstanceArena;
    use ember_core::types::*;

    struct Fixture {
        graph: MemoryGraph,
        store: ActivationStore,
        thresholds: ThresholdEngine,
        arena: InstanceArena,
        channel: ChannelId,
        source: NodeId,
        targets: Vec<NodeId>,
    }

    /// One hot source with `n` targets, uniform weights.
    fn fixture(n: usize) -> Fixture {
        let mut graph = MemoryGraph::new();
        let source = graph.add_node(NodeData::new(NodeKind::Concept));
        let targets: Vec<NodeId> = (0..n)
            .map(|i| {
                graph.add_node(
                    NodeData::new(NodeKind::Concept).with_embedding(vec![i as f32, 1.0]),
                )
            })
            .collect();
        for (i, t) in targets.iter().enumerate() {
            graph.add_link(LinkData {
                id: LinkId::from_seed(i as u64),
                source,
                target: *t,
                weight: 0.5,
                kind: LinkKind::Association,
                stats: LinkStats::default(),
                created_tick: 0,
            });
        }
        let channel = ChannelId::from_seed(1);
        let mut store = ActivationStore::new();
        store.set(source, channel, 1.0);
        let thresholds = ThresholdEngine::new(1.28, 0.1);
        let mut arena = InstanceArena::new();
        arena.on_crossing(channel, source, 0, None);
        Fixture {
            graph,
            store,
            thresholds,
            arena,
            channel,
            source,
            targets,
        }
    }

    #[test]
    fn scores_every_candidate_edge() {
        let mut f = fixture(4);
        let scorer = ValenceScorer::new();
        let instance = f.arena.get_mut(&f.channel).unwrap();
        let scored = scorer.score_channel(
            &f.graph,
            &f.store,
            &f.thresholds,
            &ModulationContext::default(),
            instance,
            &NeedContext::default(),
        );
        assert_eq!(scored.scores.len(), 4);
        assert!(scored.selected >= 1 && scored.selected <= 4);
        for s in &scored.scores {
            assert_eq!(s.source, f.source);
            assert!(s.valence >= 0.0);
        }
    }

    #[test]
    fn abnormal_need_dominates_the_gate() {
        let mut f = fixture(2);
        let scorer = ValenceScorer::new();

        // Burn in history: repeatedly score so the per-signal stats settle
        // on the uniform-weight steady state.
        for _ in 0..20 {
            let instance = f.arena.get_mut(&f.channel).unwrap();
            scorer.score_channel(
                &f.graph,
                &f.store,
                &f.thresholds,
                &ModulationContext::default(),
                instance,
                &NeedContext::default(),
            );
        }

        // Now make one target vastly easier structurally.
        let boosted_link = f.graph.outgoing(&f.source)[0];
        f.graph.set_weight(&boosted_link, 1.0);

        let instance = f.arena.get_mut(&f.channel).unwrap();
        let scored = scorer.score_channel(
            &f.graph,
            &f.store,
            &f.thresholds,
            &ModulationContext::default(),
            instance,
            &NeedContext::default(),
        );
        assert_eq!(scored.scores[0].link, boosted_link, "surprising edge ranks first");
        assert!(scored.scores[0].valence > scored.scores[1].valence);
    }

    #[test]
    fn satisfied_needs_give_diffuse_influence() {
        let mut f = fixture(3);
        let scorer = ValenceScorer::new();
        // First pass: no history at all, every surprise is zero -> uniform
        // gates across all candidates.
        let instance = f.arena.get_mut(&f.channel).unwrap();
        let scored = scorer.score_channel(
            &f.graph,
            &f.store,
            &f.thresholds,
            &ModulationContext::default(),
            instance,
            &NeedContext::default(),
        );
        let spread = scored.scores[0].valence - scored.scores[scored.scores.len() - 1].valence;
        assert!(spread < 0.5, "uniform candidates should score close together");
    }

    #[test]
    fn goal_signal_requires_goal_and_embedding() {
        let mut f = fixture(2);
        let scorer = ValenceScorer::new();
        let goal = vec![1.0f32, 0.0];

        let instance = f.arena.get_mut(&f.channel).unwrap();
        let scored = scorer.score_channel(
            &f.graph,
            &f.store,
            &f.thresholds,
            &ModulationContext::default(),
            instance,
            &NeedContext {
                goal: Some(&goal),
                mood: None,
            },
        );
        // Goal signal populated for embedded targets.
        assert!(scored.scores.iter().any(|s| s.signals[1] > 0.0));

        // Without a goal, the signal is absent everywhere.
        let instance = f.arena.get_mut(&f.channel).unwrap();
        let scored = scorer.score_channel(
            &f.graph,
            &f.store,
            &f.thresholds,
            &ModulationContext::default(),
            instance,
            &NeedContext::default(),
        );
        assert!(scored.scores.iter().all(|s| s.signals[1] == 0.0));
    }

    #[test]
    fn merge_signal_sees_other_channels() {
        let mut f = fixture(2);
        let other = ChannelId::from_seed(9);
        // Target 0 glows in another channel.
        f.store.set(f.targets[0], other, 0.5);

        let scorer = ValenceScorer::new();
        let instance = f.arena.get_mut(&f.channel).unwrap();
        let scored = scorer.score_channel(
            &f.graph,
            &f.store,
            &f.thresholds,
            &ModulationContext::default(),
            instance,
            &NeedContext::default(),
        );
        let merge_of = |t: NodeId| {
            scored
                .scores
                .iter()
                .find(|s| s.target == t)
                .map(|s| s.signals[5])
                .unwrap()
        };
        assert!(merge_of(f.targets[0]) > merge_of(f.targets[1]));
    }

    #[test]
    fn below_slack_sources_produce_no_candidates() {
        let mut f = fixture(2);
        // Drop the source below threshold.
        f.store.set(f.source, f.channel, 0.01);
        let scorer = ValenceScorer::new();
        let instance = f.arena.get_mut(&f.channel).unwrap();
        let scored = scorer.score_channel(
            &f.graph,
            &f.store,
            &f.thresholds,
            &ModulationContext::default(),
            instance,
            &NeedContext::default(),
        );
        assert!(scored.scores.is_empty());
    }
}
