//! Statistically derived activation thresholds.
//!
//! The base threshold for a (node, channel) pair is `μ + z_α·σ` over that
//! pair's own noise floor: rolling moments accumulated only during quiet
//! ticks, so signal never contaminates the noise estimate. On top of the
//! base term sit multiplicative modulation factors (stability, compute
//! load, goal, mood, recency). Every factor is optional: a missing
//! upstream signal contributes exactly 1.0, never an error.
//!
//! Two readings exist on purpose. The **hard** test `activation ≥
//! threshold` drives set membership and events; the **soft** sigmoid
//! weight drives ranking and selection, so near-threshold ties cannot
//! flicker membership decisions.

use ember_core::graph::GraphStore;
use ember_core::semantic::normalized_similarity;
use ember_core::stats::RollingMoments;
use ember_core::types::{ChannelId, NodeId};
use std::collections::{BTreeMap, BTreeSet};

/// Smoothing factor for the per-pair noise moments.
const NOISE_ALPHA: f64 = 0.1;

/// Optional modulation inputs for one threshold evaluation.
///
/// All fields default to `None` (neutral). The engine fills in whatever
/// upstream signals happen to exist this tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct Modulation {
    /// Estimated spectral radius over its target. Above 1.0 the system is
    /// running hot and thresholds rise.
    pub rho_ratio: Option<f64>,
    /// Compute load ratio (observed tick cost / deadline).
    pub load: Option<f64>,
    /// Goal alignment of this node in [0, 1].
    pub goal_alignment: Option<f64>,
    /// Mood alignment of this node in [0, 1].
    pub mood_alignment: Option<f64>,
    /// Recency score of this node-channel in [0, 1].
    pub recency: Option<f64>,
}

impl Modulation {
    /// Ratio-type factor: the signal is already centered on 1.0.
    fn ratio_factor(signal: Option<f64>) -> f64 {
        match signal {
            Some(s) if s.is_finite() => s.clamp(0.5, 2.0),
            _ => 1.0,
        }
    }

    /// Load factor: load 0 is neutral, saturation doubles the threshold.
    fn load_factor(signal: Option<f64>) -> f64 {
        match signal {
            Some(s) if s.is_finite() => (1.0 + s.max(0.0)).min(2.0),
            _ => 1.0,
        }
    }

    /// Alignment-type factor: fully aligned is neutral, fully unaligned
    /// doubles the threshold. Providing the signal focuses the system on
    /// aligned items rather than boosting them below the noise floor.
    fn alignment_factor(signal: Option<f64>) -> f64 {
        match signal {
            Some(s) if s.is_finite() => (2.0 / (1.0 + s.clamp(0.0, 1.0))).clamp(1.0, 2.0),
            _ => 1.0,
        }
    }

    fn product(&self) -> f64 {
        Self::ratio_factor(self.rho_ratio)
            * Self::load_factor(self.load)
            * Self::alignment_factor(self.goal_alignment)
            * Self::alignment_factor(self.mood_alignment)
            * Self::alignment_factor(self.recency)
    }
}

/// Tick-wide modulation inputs plus the lookups needed to specialize them
/// per (node, channel) pair.
///
/// The engine builds one of these per tick; components derive concrete
/// [`Modulation`] values from it wherever they evaluate a threshold, so
/// every component sees the same threshold for the same pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModulationContext<'a> {
    pub rho_ratio: Option<f64>,
    pub load: Option<f64>,
    pub goal: Option<&'a [f32]>,
    pub mood: Option<&'a [f32]>,
    /// Recency scores for pairs that crossed threshold recently.
    pub recency: Option<&'a BTreeMap<(NodeId, ChannelId), f64>>,
}

impl ModulationContext<'_> {
    /// Specialize the tick-wide inputs for one (node, channel) pair.
    pub fn for_pair<G: GraphStore>(
        &self,
        graph: &G,
        node: &NodeId,
        channel: &ChannelId,
    ) -> Modulation {
        let embedding = graph.node(node).and_then(|n| n.embedding.as_deref());
        Modulation {
            rho_ratio: self.rho_ratio,
            load: self.load,
            goal_alignment: self
                .goal
                .and_then(|g| embedding.and_then(|e| normalized_similarity(e, g))),
            mood_alignment: self
                .mood
                .and_then(|m| embedding.and_then(|e| normalized_similarity(e, m))),
            recency: self.recency.and_then(|map| map.get(&(*node, *channel)).copied()),
        }
    }
}

/// Per-(node, channel) threshold computation with quiet-tick noise
/// statistics.
pub struct ThresholdEngine {
    z_alpha: f64,
    floor: f64,
    noise: BTreeMap<(NodeId, ChannelId), RollingMoments>,
    /// Pairs that received external drive this tick; excluded from noise
    /// updates until the tick ends.
    driven: BTreeSet<(NodeId, ChannelId)>,
    /// Cleared by the criticality circuit breaker: when false, only the
    /// base statistical term applies.
    modulators_enabled: bool,
}

impl ThresholdEngine {
    pub fn new(z_alpha: f64, floor: f64) -> Self {
        Self {
            z_alpha,
            floor,
            noise: BTreeMap::new(),
            driven: BTreeSet::new(),
            modulators_enabled: true,
        }
    }

    /// Base statistical term `max(floor, μ + z_α·σ)`.
    fn base(&self, node: &NodeId, channel: &ChannelId) -> f64 {
        let stat = match self.noise.get(&(*node, *channel)) {
            Some(s) if s.count() >= 2 => s.mean() + self.z_alpha * s.std(),
            _ => 0.0,
        };
        stat.max(self.floor)
    }

    /// Threshold for a pair under the given modulation.
    pub fn threshold(&self, node: &NodeId, channel: &ChannelId, m: &Modulation) -> f64 {
        let base = self.base(node, channel);
        if self.modulators_enabled {
            base * m.product()
        } else {
            base
        }
    }

    /// Hard membership test. Use only for bookkeeping and events.
    pub fn is_active(&self, activation: f64, threshold: f64) -> bool {
        activation >= threshold
    }

    /// Soft activation weight `σ(κ·(activation − threshold))` in (0, 1).
    ///
    /// The slope κ is the reciprocal of the pair's noise spread, so "near
    /// the threshold" always means "within the noise" rather than a fixed
    /// margin. Before any noise is known the threshold itself sets the
    /// scale.
    pub fn soft(&self, node: &NodeId, channel: &ChannelId, activation: f64, m: &Modulation) -> f64 {
        let threshold = self.threshold(node, channel, m);
        let sigma = self
            .noise
            .get(&(*node, *channel))
            .map(|s| s.std())
            .filter(|s| *s > 0.0)
            .unwrap_or_else(|| threshold.max(f64::MIN_POSITIVE));
        let kappa = 1.0 / sigma;
        1.0 / (1.0 + (-kappa * (activation - threshold)).exp())
    }

    /// Mark a pair as externally driven this tick.
    pub fn mark_driven(&mut self, node: NodeId, channel: ChannelId) {
        self.driven.insert((node, channel));
    }

    /// Feed an observed activation into the noise floor. Only applied for
    /// pairs that saw no external drive this tick.
    pub fn observe_quiet(&mut self, node: NodeId, channel: ChannelId, activation: f64) {
        if self.driven.contains(&(node, channel)) {
            return;
        }
        self.noise
            .entry((node, channel))
            .or_insert_with(|| RollingMoments::new(NOISE_ALPHA))
            .update(activation);
    }

    /// End-of-tick bookkeeping: the driven set resets.
    pub fn end_tick(&mut self) {
        self.driven.clear();
    }

    /// Toggled by the criticality circuit breaker.
    pub fn set_modulators_enabled(&mut self, enabled: bool) {
        self.modulators_enabled = enabled;
    }

    pub fn modulators_enabled(&self) -> bool {
        self.modulators_enabled
    }

    /// Noise moments for a pair, if any samples exist.
    pub fn noise_stats(&self, node: &NodeId, channel: &ChannelId) -> Option<&RollingMoments> {
        self.noise.get(&(*node, *channel))
    }

    /// Seed the noise floor directly. Test/replay fixture use.
    pub fn seed_noise(&mut self, node: NodeId, channel: ChannelId, samples: &[f64]) {
        let stat = self
            .noise
            .entry((node, channel))
            .or_insert_with(|| RollingMoments::new(NOISE_ALPHA));
        for &s in samples {
            stat.update(s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeId {
        NodeId::from_seed(1)
    }

    fn chan() -> ChannelId {
        ChannelId::from_seed(1)
    }

    fn engine_with_noise(z_alpha: f64, mean: f64, spread: f64) -> ThresholdEngine {
        let mut engine = ThresholdEngine::new(z_alpha, 0.01);
        // Alternate around the mean so the EW variance settles near
        // spread².
        let samples: Vec<f64> = (0..200)
            .map(|i| if i % 2 == 0 { mean + spread } else { mean - spread })
            .collect();
        engine.seed_noise(node(), chan(), &samples);
        engine
    }

    #[test]
    fn threshold_tracks_mu_plus_z_sigma() {
        let engine = engine_with_noise(1.28, 0.10, 0.02);
        let t = engine.threshold(&node(), &chan(), &Modulation::default());
        // μ + z·σ ≈ 0.10 + 1.28·0.02 ≈ 0.126
        assert!((t - 0.126).abs() < 0.01, "threshold {t}");
        assert!(!engine.is_active(0.12, t));
        assert!(engine.is_active(0.13, t));
    }

    #[test]
    fn threshold_is_monotone_in_z_alpha() {
        let mut last = 0.0;
        for z in [0.5, 1.0, 1.28, 1.6, 2.5] {
            let engine = engine_with_noise(z, 0.10, 0.02);
            let t = engine.threshold(&node(), &chan(), &Modulation::default());
            assert!(t >= last, "z={z}: {t} < {last}");
            last = t;
        }
    }

    #[test]
    fn missing_modulators_are_exactly_neutral() {
        let engine = engine_with_noise(1.28, 0.10, 0.02);
        let bare = engine.threshold(&node(), &chan(), &Modulation::default());
        let modulated = engine.threshold(
            &node(),
            &chan(),
            &Modulation {
                rho_ratio: None,
                load: None,
                goal_alignment: None,
                mood_alignment: None,
                recency: None,
            },
        );
        assert_eq!(bare, modulated);
    }

    #[test]
    fn supercritical_rho_raises_threshold() {
        let engine = engine_with_noise(1.28, 0.10, 0.02);
        let base = engine.threshold(&node(), &chan(), &Modulation::default());
        let hot = engine.threshold(
            &node(),
            &chan(),
            &Modulation {
                rho_ratio: Some(1.4),
                ..Default::default()
            },
        );
        assert!(hot > base);
    }

    #[test]
    fn circuit_breaker_strips_modulation() {
        let mut engine = engine_with_noise(1.28, 0.10, 0.02);
        let m = Modulation {
            rho_ratio: Some(1.8),
            load: Some(0.9),
            ..Default::default()
        };
        let modulated = engine.threshold(&node(), &chan(), &m);
        engine.set_modulators_enabled(false);
        let stripped = engine.threshold(&node(), &chan(), &m);
        assert!(stripped < modulated);
        let bare = engine.threshold(&node(), &chan(), &Modulation::default());
        assert_eq!(stripped, bare * 1.0);
    }

    #[test]
    fn driven_pairs_do_not_update_noise() {
        let mut engine = ThresholdEngine::new(1.28, 0.01);
        engine.mark_driven(node(), chan());
        engine.observe_quiet(node(), chan(), 5.0);
        assert!(engine.noise_stats(&node(), &chan()).is_none());

        engine.end_tick();
        engine.observe_quiet(node(), chan(), 0.1);
        assert_eq!(engine.noise_stats(&node(), &chan()).unwrap().count(), 1);
    }

    #[test]
    fn cold_start_uses_the_floor() {
        let engine = ThresholdEngine::new(1.28, 0.05);
        let t = engine.threshold(&node(), &chan(), &Modulation::default());
        assert_eq!(t, 0.05);
    }

    #[test]
    fn soft_weight_is_monotone_and_bounded() {
        let engine = engine_with_noise(1.28, 0.10, 0.02);
        let m = Modulation::default();
        let below = engine.soft(&node(), &chan(), 0.08, &m);
        let near = engine.soft(&node(), &chan(), 0.126, &m);
        let above = engine.soft(&node(), &chan(), 0.30, &m);
        assert!(below < near && near < above);
        assert!(below > 0.0 && above < 1.0);
        // At the threshold the soft weight sits at one half.
        assert!((near - 0.5).abs() < 0.2);
    }
}
