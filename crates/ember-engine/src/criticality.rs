//! Spectral-radius self-tuning.
//!
//! The controller estimates ρ, the dominant eigenvalue magnitude of the
//! effective one-tick propagation operator
//! `(1−δ)·[(1−α)I + α·Pᵀ]` (P row-normalized from link weights), with a
//! few power-iteration steps restricted to the active-frontier subgraph.
//! The decay rate δ is then adjusted proportionally to the observed error
//! `ρ − target`; the proportionality gain is damped when consecutive
//! target crossings reveal oscillation. When δ saturates at a safety bound
//! and the error persists, the diffusion rate α is eased toward zero,
//! which pulls ρ toward `1−δ` from either side.
//!
//! Regime labels (subcritical / critical / supercritical) are purely
//! observational; the control law underneath is continuous.

use ember_core::graph::GraphStore;
use ember_core::stats::RollingMoments;
use ember_core::types::NodeId;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

const MAX_POWER_ITERS: usize = 12;
const POWER_TOL: f64 = 1e-3;
/// Retunes remembered for oscillation detection.
const CROSSING_WINDOW: u64 = 8;
/// Crossings within the window that count as oscillation.
const CROSSING_LIMIT: usize = 3;
const GAIN_MIN: f64 = 0.05;
/// Consecutive far-out-of-band retunes before the circuit breaker trips,
/// and in-band retunes before it resets.
const BREAKER_STREAK: u32 = 10;

/// Observational stability regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Regime {
    Subcritical,
    Critical,
    Supercritical,
}

/// Self-tuning stability controller.
pub struct CriticalityController {
    target: f64,
    bounds: (f64, f64),
    decay_rate: f64,
    diffusion_rate: f64,
    rho_stats: RollingMoments,
    last_rho: Option<f64>,
    last_error_sign: i8,
    gain: f64,
    retunes: u64,
    crossings: VecDeque<u64>,
    divergence_streak: u32,
    stable_streak: u32,
    breaker: bool,
}

impl CriticalityController {
    pub fn new(target: f64, bounds: (f64, f64), decay_rate: f64, diffusion_rate: f64) -> Self {
        Self {
            target,
            bounds,
            decay_rate,
            diffusion_rate,
            rho_stats: RollingMoments::new(0.2),
            last_rho: None,
            last_error_sign: 0,
            gain: 1.0,
            retunes: 0,
            crossings: VecDeque::new(),
            divergence_streak: 0,
            stable_streak: 0,
            breaker: false,
        }
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    pub fn diffusion_rate(&self) -> f64 {
        self.diffusion_rate
    }

    pub fn last_rho(&self) -> Option<f64> {
        self.last_rho
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Whether the modulator circuit breaker is currently tripped.
    pub fn breaker_active(&self) -> bool {
        self.breaker
    }

    /// Estimate ρ over the frontier subgraph. `None` when the frontier is
    /// too small to say anything; the caller treats that as a neutral
    /// no-op, not an error.
    pub fn estimate_rho<G: GraphStore>(&self, graph: &G, frontier: &[NodeId]) -> Option<f64> {
        let n = frontier.len();
        if n < 2 {
            return None;
        }
        let index: BTreeMap<NodeId, usize> = frontier
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        // Row-normalized transition structure restricted to the frontier.
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        let mut any_link = false;
        for (i, node) in frontier.iter().enumerate() {
            let mut row_sum = 0.0;
            let mut row = Vec::new();
            for link_id in graph.outgoing(node) {
                let Some(link) = graph.link(&link_id) else {
                    continue;
                };
                if link.weight <= 0.0 {
                    continue;
                }
                if let Some(&j) = index.get(&link.target) {
                    row.push((j, link.weight));
                    row_sum += link.weight;
                }
            }
            if row_sum > 0.0 {
                for (_, w) in row.iter_mut() {
                    *w /= row_sum;
                }
                any_link = true;
            }
            rows[i] = row;
        }
        if !any_link {
            return None;
        }

        let delta = self.decay_rate;
        let alpha = self.diffusion_rate.min(1.0);
        let mut v = vec![1.0 / n as f64; n];
        let mut lambda = 0.0;

        for _ in 0..MAX_POWER_ITERS {
            // u = (1−δ)[(1−α)v + α Pᵀ v]
            let mut inflow = vec![0.0; n];
            for (i, row) in rows.iter().enumerate() {
                for &(j, p) in row {
                    inflow[j] += p * v[i];
                }
            }
            let mut norm = 0.0;
            let mut u = vec![0.0; n];
            for j in 0..n {
                u[j] = (1.0 - delta) * ((1.0 - alpha) * v[j] + alpha * inflow[j]);
                norm += u[j] * u[j];
            }
            let norm = norm.sqrt();
            if norm <= f64::MIN_POSITIVE {
                return Some(0.0);
            }
            let prev_norm: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
            let next_lambda = norm / prev_norm;
            for x in u.iter_mut() {
                *x /= norm;
            }
            v = u;
            if (next_lambda - lambda).abs() <= POWER_TOL * next_lambda.max(f64::MIN_POSITIVE) {
                return Some(next_lambda);
            }
            lambda = next_lambda;
        }
        Some(lambda)
    }

    /// Adjust the global rates toward the target. A `None` estimate leaves
    /// everything untouched.
    pub fn retune(&mut self, rho: Option<f64>) {
        let Some(rho) = rho else {
            return;
        };
        if !rho.is_finite() {
            return;
        }
        self.retunes += 1;
        self.rho_stats.update(rho);
        self.last_rho = Some(rho);

        let error = rho - self.target;
        let normalized = error / self.target;

        // Oscillation detection: alternating error signs inside a short
        // window mean the gain is too hot.
        let sign = if normalized > 0.0 {
            1
        } else if normalized < 0.0 {
            -1
        } else {
            0
        };
        if sign != 0 && self.last_error_sign != 0 && sign != self.last_error_sign {
            self.crossings.push_back(self.retunes);
        }
        if sign != 0 {
            self.last_error_sign = sign;
        }
        while self
            .crossings
            .front()
            .is_some_and(|t| self.retunes - t > CROSSING_WINDOW)
        {
            self.crossings.pop_front();
        }
        if self.crossings.len() >= CROSSING_LIMIT {
            self.gain = (self.gain * 0.5).max(GAIN_MIN);
            self.crossings.clear();
            debug!(gain = self.gain, "criticality gain damped after oscillation");
        } else {
            self.gain = (self.gain * 1.02).min(1.0);
        }

        // Error-proportional decay adjustment within the safety bounds.
        let (lo, hi) = self.bounds;
        let width = hi - lo;
        let step = self.gain * normalized * width;
        let proposed = self.decay_rate + step;
        self.decay_rate = proposed.clamp(lo, hi);

        // Saturated with residual error: ease diffusion toward zero so the
        // operator approaches (1−δ)I and ρ approaches 1−δ.
        let saturated = (proposed < lo && normalized < 0.0) || (proposed > hi && normalized > 0.0);
        if saturated && normalized.abs() > POWER_TOL {
            self.diffusion_rate /= 1.0 + self.gain * normalized.abs();
        }

        self.update_breaker(rho);
    }

    fn update_breaker(&mut self, rho: f64) {
        let far_out = rho < self.target * 0.5 || rho > self.target * 1.5;
        let in_band = (rho - self.target).abs() <= self.target * 0.1;

        if far_out {
            self.divergence_streak += 1;
            self.stable_streak = 0;
        } else {
            self.divergence_streak = 0;
            if in_band {
                self.stable_streak += 1;
            } else {
                self.stable_streak = 0;
            }
        }

        if !self.breaker && self.divergence_streak >= BREAKER_STREAK {
            self.breaker = true;
            warn!(
                rho,
                target = self.target,
                "criticality divergence: threshold modulators disabled"
            );
        }
        if self.breaker && self.stable_streak >= BREAKER_STREAK {
            self.breaker = false;
            debug!(rho, "criticality stabilized: threshold modulators restored");
        }
    }

    /// Observational regime label for the latest estimate.
    pub fn regime(&self) -> Option<Regime> {
        self.last_rho.map(|rho| {
            if rho < self.target * 0.9 {
                Regime::Subcritical
            } else if rho > self.target * 1.1 {
                Regime::Supercritical
            } else {
                Regime::Critical
            }
        })
    }

    /// Regime health in (0, 1]: 1.0 at or below target, shrinking as the
    /// system runs hot. Scales the injection budget.
    pub fn regime_health(&self) -> f64 {
        match self.last_rho {
            Some(rho) if rho > self.target => (self.target / rho).clamp(0.0, 1.0),
            _ => 1.0,
        }
    }

    /// Local one-tick gain at a node: `(1−δ)((1−α) + α·Σ w_out)`, with the
    /// raw (unnormalized) outgoing weight mass. Values above the target
    /// mark local runaway candidates.
    pub fn local_gain<G: GraphStore>(&self, graph: &G, node: &NodeId) -> f64 {
        let out_mass: f64 = graph
            .outgoing(node)
            .iter()
            .filter_map(|id| graph.link(id))
            .map(|l| l.weight)
            .sum();
        let alpha = self.diffusion_rate.min(1.0);
        (1.0 - self.decay_rate) * ((1.0 - alpha) + alpha * out_mass)
    }

    /// Damping factor `min(1, target/ρ_local)` applied to stride transfers.
    pub fn local_guard<G: GraphStore>(&self, graph: &G, node: &NodeId) -> f64 {
        let local = self.local_gain(graph, node);
        if local > 0.0 {
            (self.target / local).min(1.0)
        } else {
            1.0
        }
    }
}
