//! Simulation configuration.
//!
//! Only externally-meaningful knobs live here: the false-positive target
//! for thresholds, timing bounds, and safety rails for the self-tuned
//! rates. Every other coefficient in the engine is derived at runtime from
//! rolling statistics and must not appear in this struct.

use crate::error::{EmberError, Result};
use serde::{Deserialize, Serialize};

/// Per-node-kind scale applied to the global activation decay rate.
///
/// A scale of 0.0 disables activation decay for that kind entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindDecayScales {
    pub concept: f64,
    pub percept: f64,
    pub episode: f64,
}

impl Default for KindDecayScales {
    fn default() -> Self {
        Self {
            concept: 1.0,
            percept: 1.0,
            episode: 1.0,
        }
    }
}

/// Configuration for one simulation instance.
///
/// Deserialization fills missing fields from the defaults, so a partial
/// config file only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Threshold z-score target. Sets the false-positive rate of the
    /// statistical activation threshold (default 1.28 ≈ 10% one-sided).
    pub z_alpha: f64,
    /// Lower bound on the adaptive tick interval, in seconds.
    pub min_tick_interval: f64,
    /// Upper bound on the adaptive tick interval, in seconds.
    pub max_tick_interval: f64,
    /// Wall-clock compute budget per tick, in seconds. The stride budget is
    /// derived from this divided by the observed per-stride cost.
    pub tick_deadline: f64,
    /// Safety bounds `(min, max)` for the self-tuned activation decay rate.
    pub decay_bounds: (f64, f64),
    /// Starting activation decay rate. Must lie within `decay_bounds`.
    pub initial_decay_rate: f64,
    /// Starting diffusion rate (fraction of activation offered per link per
    /// unit time). The criticality controller may reduce it.
    pub initial_diffusion_rate: f64,
    /// Link-weight decay rate. Deliberately independent of the tuned
    /// activation decay rate and much slower.
    pub link_decay_rate: f64,
    /// Spectral-radius target for the criticality controller.
    pub rho_target: f64,
    /// Floor under the statistical threshold. Covers the cold start before
    /// noise statistics exist.
    pub threshold_floor: f64,
    /// Per-kind scales on the activation decay rate.
    pub kind_decay_scales: KindDecayScales,
    /// Links whose weight decays below this are reported for pruning.
    pub link_prune_floor: f64,
    /// Grace window (ticks) before a young link becomes prunable.
    pub link_maturation_ticks: u64,
    /// Seed for the engine's deterministic RNG.
    pub seed: u64,
    /// Pin the per-tick stride budget instead of deriving it from wall
    /// clock. Required for bit-exact replay; `None` in production.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_stride_budget: Option<usize>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            z_alpha: 1.28,
            min_tick_interval: 0.05,
            max_tick_interval: 2.0,
            tick_deadline: 0.1,
            decay_bounds: (0.001, 0.9),
            initial_decay_rate: 0.1,
            initial_diffusion_rate: 0.5,
            link_decay_rate: 0.0005,
            rho_target: 1.0,
            threshold_floor: 0.05,
            kind_decay_scales: KindDecayScales::default(),
            link_prune_floor: 0.01,
            link_maturation_ticks: 50,
            seed: 0,
            fixed_stride_budget: None,
        }
    }
}

impl SimConfig {
    /// Validate all parameters. The only fatal error site in the engine:
    /// a config that passes here cannot fail later for configuration
    /// reasons.
    pub fn validate(&self) -> Result<()> {
        if !(self.z_alpha > 0.0 && self.z_alpha <= 10.0) {
            return Err(EmberError::out_of_range("z_alpha", 0.0, 10.0, self.z_alpha));
        }
        if !(self.min_tick_interval > 0.0) {
            return Err(EmberError::out_of_range(
                "min_tick_interval",
                0.0,
                f64::MAX,
                self.min_tick_interval,
            ));
        }
        if self.max_tick_interval < self.min_tick_interval {
            return Err(EmberError::invalid_value(
                "max_tick_interval",
                self.max_tick_interval.to_string(),
                "must be >= min_tick_interval",
            ));
        }
        if !(self.tick_deadline > 0.0) {
            return Err(EmberError::out_of_range(
                "tick_deadline",
                0.0,
                f64::MAX,
                self.tick_deadline,
            ));
        }
        let (lo, hi) = self.decay_bounds;
        if !(lo >= 0.0 && hi < 1.0 && lo < hi) {
            return Err(EmberError::invalid_value(
                "decay_bounds",
                format!("({lo}, {hi})"),
                "must satisfy 0 <= min < max < 1",
            ));
        }
        if !(self.initial_decay_rate >= lo && self.initial_decay_rate <= hi) {
            return Err(EmberError::out_of_range(
                "initial_decay_rate",
                lo,
                hi,
                self.initial_decay_rate,
            ));
        }
        if !(self.initial_diffusion_rate > 0.0 && self.initial_diffusion_rate.is_finite()) {
            return Err(EmberError::out_of_range(
                "initial_diffusion_rate",
                0.0,
                f64::MAX,
                self.initial_diffusion_rate,
            ));
        }
        if !(self.link_decay_rate >= 0.0 && self.link_decay_rate < 1.0) {
            return Err(EmberError::out_of_range(
                "link_decay_rate",
                0.0,
                1.0,
                self.link_decay_rate,
            ));
        }
        if !(self.rho_target > 0.0 && self.rho_target.is_finite()) {
            return Err(EmberError::out_of_range(
                "rho_target",
                0.0,
                f64::MAX,
                self.rho_target,
            ));
        }
        if !(self.threshold_floor >= 0.0 && self.threshold_floor.is_finite()) {
            return Err(EmberError::out_of_range(
                "threshold_floor",
                0.0,
                f64::MAX,
                self.threshold_floor,
            ));
        }
        for (name, scale) in [
            ("kind_decay_scales.concept", self.kind_decay_scales.concept),
            ("kind_decay_scales.percept", self.kind_decay_scales.percept),
            ("kind_decay_scales.episode", self.kind_decay_scales.episode),
        ] {
            if !(scale >= 0.0 && scale.is_finite()) {
                return Err(EmberError::out_of_range(name, 0.0, f64::MAX, scale));
            }
        }
        if !(self.link_prune_floor >= 0.0 && self.link_prune_floor < 1.0) {
            return Err(EmberError::out_of_range(
                "link_prune_floor",
                0.0,
                1.0,
                self.link_prune_floor,
            ));
        }
        Ok(())
    }
}
