//! The stride primitive — one conservative weighted-edge transfer.
//!
//! A stride moves activation from a slack-bearing source toward a target
//! along one link, within one channel. The transfer can never pull the
//! source below its post-threshold slack, never push the target above its
//! pre-stride gap, and is further damped by the local criticality guard.
//! Transfers are staged; the phase barrier commits them. A `StrideRecord`
//! is emitted regardless of outcome so the learning updater sees failed
//! and zero-transfer strides too.
//!
//! The record's `*_was_active` flags carry start-of-tick membership, not
//! the mid-phase threshold test: a source freshly lit by this tick's
//! injection counts as previously-inactive, which is exactly what the
//! strengthening gate needs to tell genuinely new associations apart from
//! ongoing active-to-active flow.
//!
//! Each channel executes its strides against the committed snapshot plus
//! its own overlay of earlier same-phase strides; channels never see each
//! other's staged writes.

use crate::threshold::{Modulation, ThresholdEngine};
use ember_core::graph::GraphStore;
use ember_core::prelude::ActivationStore;
use ember_core::types::{ChannelId, LinkId, NodeId, StrideRecord, Tick};
use std::collections::BTreeMap;

/// A channel's private view of this phase's staged transfers.
pub type ChannelOverlay = BTreeMap<NodeId, f64>;

/// Outcome of one stride.
#[derive(Debug, Clone)]
pub struct StrideOutcome {
    pub record: StrideRecord,
    /// Realized ROI: fraction of the target's pre-stride gap closed.
    pub roi: f64,
}

/// Effective activation a channel sees mid-phase: committed state plus its
/// own overlay.
fn effective(
    store: &ActivationStore,
    overlay: &ChannelOverlay,
    node: &NodeId,
    channel: &ChannelId,
) -> f64 {
    (store.get(node, channel) + overlay.get(node).copied().unwrap_or(0.0)).max(0.0)
}

/// Execute one stride over `link_id` in `channel`.
///
/// `source_modulation` / `target_modulation` carry this tick's threshold
/// modulation for the two endpoints; `guard` is the local criticality
/// damping factor `min(1, ρ_target/ρ_local)` for the source;
/// `source_was_active` / `target_was_active` are start-of-tick membership
/// flags recorded for the learning gate.
///
/// Returns `None` only if the link vanished; every attempted transfer,
/// including a zero one, yields a record.
#[allow(clippy::too_many_arguments)]
pub fn execute_stride<G: GraphStore>(
    graph: &mut G,
    store: &mut ActivationStore,
    thresholds: &ThresholdEngine,
    source_modulation: &Modulation,
    target_modulation: &Modulation,
    guard: f64,
    channel: ChannelId,
    link_id: LinkId,
    source_was_active: bool,
    target_was_active: bool,
    overlay: &mut ChannelOverlay,
    tick: Tick,
) -> Option<StrideOutcome> {
    let (source, target, weight) = {
        let link = graph.link(&link_id)?;
        (link.source, link.target, link.weight)
    };

    let source_before = effective(store, overlay, &source, &channel);
    let target_before = effective(store, overlay, &target, &channel);
    let source_threshold = thresholds.threshold(&source, &channel, source_modulation);
    let target_threshold = thresholds.threshold(&target, &channel, target_modulation);

    let slack = (source_before - source_threshold).max(0.0);
    let gap = (target_threshold - target_before).max(0.0);

    // Requested share: this link's weight relative to the source's other
    // candidate targets.
    let out_mass: f64 = graph
        .outgoing(&source)
        .iter()
        .filter_map(|id| graph.link(id))
        .map(|l| l.weight)
        .filter(|w| *w > 0.0)
        .sum();
    let share = if out_mass > 0.0 { weight / out_mass } else { 0.0 };

    let requested = slack * share;
    let mut transferred = requested.min(gap) * guard.clamp(0.0, 1.0);
    if !transferred.is_finite() || transferred < 0.0 {
        transferred = 0.0;
    }
    // Skip isolated endpoints entirely.
    if store.is_isolated(&source, &channel) || store.is_isolated(&target, &channel) {
        transferred = 0.0;
    }

    if transferred > 0.0 {
        store.stage(source, channel, -transferred);
        store.stage(target, channel, transferred);
        *overlay.entry(source).or_insert(0.0) -= transferred;
        *overlay.entry(target).or_insert(0.0) += transferred;

        if let Some(link) = graph.link_mut(&link_id) {
            link.stats.traversals += 1;
            let ema = link.stats.flow_ema;
            link.stats.flow_ema = ema + 0.2 * (transferred - ema);
            link.stats.last_tick = tick;
        }
    }

    let source_after = source_before - transferred;
    let target_after = target_before + transferred;
    let target_crossed = target_before < target_threshold
        && thresholds.is_active(target_after, target_threshold);

    let roi = if gap > 0.0 { transferred / gap } else { 0.0 };

    Some(StrideOutcome {
        record: StrideRecord {
            tick,
            channel,
            link: link_id,
            source,
            target,
            requested,
            transferred,
            source_before,
            source_after,
            target_before,
            target_after,
            source_threshold,
            target_threshold,
            source_was_active,
            target_was_active,
            target_crossed,
        },
        roi,
    })
}
