//! Per-tick observability metrics.
//!
//! One `TickStats` is produced per tick and carried on the event stream's
//! tick-completion frame. These are measurements, not control inputs;
//! nothing in the engine branches on them.

use crate::criticality::Regime;
use serde::Serialize;

/// Summary of one completed tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickStats {
    pub tick: u64,
    /// Adaptive tick duration used this tick, in seconds.
    pub dt: f64,
    /// Stimuli dequeued and injected.
    pub stimuli: usize,
    /// Total activation staged by injection.
    pub injected: f64,
    /// Individual diffusion transfers.
    pub diffusion_transfers: usize,
    /// Strides executed (including zero-transfer strides).
    pub strides: usize,
    /// Stride budget the tick was allowed.
    pub stride_budget: usize,
    /// Channels that signalled convergence during traversal.
    pub converged_channels: usize,
    /// Threshold crossings observed across all phases.
    pub crossings: usize,
    /// Link weight updates applied by the learning phase.
    pub weight_updates: usize,
    /// Links reported for pruning after weight decay.
    pub links_pruned: usize,
    /// (node, channel) pairs isolated by the numeric guard.
    pub guarded: usize,
    /// Spectral-radius estimate, when the frontier supported one.
    pub rho: Option<f64>,
    /// Observational stability regime for `rho`.
    pub regime: Option<Regime>,
    /// Tuned global activation decay rate after this tick's retune.
    pub decay_rate: f64,
    /// Tuned global diffusion rate after this tick's retune.
    pub diffusion_rate: f64,
    /// Configured link-weight decay rate, surfaced alongside the tuned
    /// activation rate so the two can be compared in the open.
    pub link_decay_rate: f64,
    /// Live channel instances at tick end.
    pub active_channels: usize,
    /// Activation entries in the store at tick end.
    pub activation_entries: usize,
}
