//! Cohort-relative link weight learning.
//!
//! Weight updates fire only behind the strengthening gate: both stride
//! endpoints must have been outside the active set at the start of the
//! tick, and the target must have crossed threshold as a result of the
//! stride. Genuinely new associations learn; ongoing active-to-active
//! flow does not.
//!
//! The update is `Δlog(weight) = η · z`, where z is the van der Waerden
//! rank z-score of the stride's outcome within a cohort of comparable
//! links (same kind, falling back to the whole eligible batch), and η is
//! the data-derived step `1 − e^{−Δt/τ̂}` with τ̂ the link's own EWMA
//! inter-update interval. Frequently-updated links get a responsive step,
//! rare ones a stable step; there is no fixed learning rate. Cohort
//! standardization happens at read time only; stored weights are never
//! destructively re-centered.

use ember_core::graph::GraphStore;
use ember_core::types::{LinkId, LinkKind, StrideRecord, Tick};
use ember_core::stats::van_der_waerden;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Below this many ranks a cohort carries no ordering information.
const MIN_COHORT: usize = 4;
/// Smoothing for the per-link inter-update interval EWMA.
const GAP_ALPHA: f64 = 0.3;

/// One applied weight change.
#[derive(Debug, Clone, Serialize)]
pub struct WeightUpdate {
    pub link: LinkId,
    pub before: f64,
    pub after: f64,
}

pub struct LearningUpdater;

impl LearningUpdater {
    pub fn new() -> Self {
        Self
    }

    /// Whether a stride record passes the strengthening gate.
    pub fn gate(record: &StrideRecord) -> bool {
        !record.source_was_active && !record.target_was_active && record.target_crossed
    }

    /// Outcome signals for one gated stride: transfer magnitude and the
    /// margin by which the target cleared its threshold.
    fn outcome_signals(record: &StrideRecord) -> (f64, f64) {
        let margin = (record.target_after - record.target_threshold).max(0.0);
        (record.transferred, margin)
    }

    /// Consume this tick's stride records and update link weights.
    pub fn apply<G: GraphStore>(
        &self,
        graph: &mut G,
        records: &[StrideRecord],
        tick: Tick,
    ) -> Vec<WeightUpdate> {
        // Gate first; everything else only ever sees eligible strides.
        let eligible: Vec<&StrideRecord> = records.iter().filter(|r| Self::gate(r)).collect();
        if eligible.is_empty() {
            return Vec::new();
        }

        // Cohorts of comparable links: same kind. Too-small cohorts fall
        // back to the pooled batch; a too-small pool is neutral (no
        // update), logged low-severity. That is expected sparse-data
        // behavior, not an error.
        let mut cohorts: BTreeMap<LinkKind, Vec<usize>> = BTreeMap::new();
        for (i, record) in eligible.iter().enumerate() {
            let Some(link) = graph.link(&record.link) else {
                continue;
            };
            cohorts.entry(link.kind).or_default().push(i);
        }

        let mut z_scores: Vec<Option<f64>> = vec![None; eligible.len()];
        let mut pooled: Vec<usize> = Vec::new();
        for (kind, members) in &cohorts {
            if members.len() >= MIN_COHORT {
                Self::fill_rank_scores(&eligible, members, &mut z_scores);
            } else {
                debug!(
                    ?kind,
                    size = members.len(),
                    "cohort too small for rank normalization, pooling"
                );
                pooled.extend_from_slice(members);
            }
        }
        if !pooled.is_empty() {
            if pooled.len() >= MIN_COHORT {
                Self::fill_rank_scores(&eligible, &pooled, &mut z_scores);
            } else if eligible.len() >= MIN_COHORT {
                // Broaden once more: rank the stragglers within the whole
                // eligible batch.
                let everyone: Vec<usize> = (0..eligible.len()).collect();
                let mut batch_scores: Vec<Option<f64>> = vec![None; eligible.len()];
                Self::fill_rank_scores(&eligible, &everyone, &mut batch_scores);
                for &i in &pooled {
                    z_scores[i] = batch_scores[i];
                }
            } else {
                debug!(
                    size = eligible.len(),
                    "insufficient cohort data, skipping weight updates"
                );
            }
        }

        // Apply Δlog(weight) = η·z with the per-link self-tuned step size.
        let mut updates = Vec::new();
        for (i, record) in eligible.iter().enumerate() {
            let Some(z) = z_scores[i] else {
                continue;
            };
            let Some(link) = graph.link_mut(&record.link) else {
                continue;
            };
            if link.weight <= 0.0 {
                continue;
            }

            let (dt, tau) = match link.stats.last_weight_update {
                Some(last) => {
                    let dt = tick.saturating_sub(last) as f64;
                    let tau = if link.stats.update_gap_ema > 0.0 {
                        link.stats.update_gap_ema
                    } else {
                        dt.max(1.0)
                    };
                    (dt, tau)
                }
                // First update: one unit interval against a unit timescale.
                None => (1.0, 1.0),
            };
            let eta = 1.0 - (-dt / tau).exp();

            let before = link.weight;
            let after = (before.ln() + eta * z).exp().min(1.0);
            if !after.is_finite() || after <= 0.0 {
                continue;
            }
            link.weight = after;

            // Self-tuning interval bookkeeping.
            if link.stats.last_weight_update.is_some() {
                let gap_ema = link.stats.update_gap_ema;
                link.stats.update_gap_ema = gap_ema + GAP_ALPHA * (dt - gap_ema);
            } else {
                link.stats.update_gap_ema = dt.max(1.0);
            }
            link.stats.last_weight_update = Some(tick);

            updates.push(WeightUpdate {
                link: record.link,
                before,
                after,
            });
        }
        updates
    }

    /// Rank the members' combined outcome signals and write their van der
    /// Waerden z-scores.
    fn fill_rank_scores(
        eligible: &[&StrideRecord],
        members: &[usize],
        z_scores: &mut [Option<f64>],
    ) {
        let transfers: Vec<f64> = members
            .iter()
            .map(|&i| Self::outcome_signals(eligible[i]).0)
            .collect();
        let margins: Vec<f64> = members
            .iter()
            .map(|&i| Self::outcome_signals(eligible[i]).1)
            .collect();
        let z_transfer = van_der_waerden(&transfers);
        let z_margin = van_der_waerden(&margins);
        for (slot, &i) in members.iter().enumerate() {
            z_scores[i] = Some((z_transfer[slot] + z_margin[slot]) / 2.0);
        }
    }
}

impl Default for LearningUpdater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_mem::MemoryGraph;
    use ember_core::types::*;

    fn world(n_links: u64, kind: LinkKind) -> (MemoryGraph, Vec<LinkId>) {
        let mut graph = MemoryGraph::new();
        let mut links = Vec::new();
        for i in 0..n_links {
            let a = graph.add_node(NodeData::new(NodeKind::Concept));
            let b = graph.add_node(NodeData::new(NodeKind::Concept));
            links.push(graph.add_link(LinkData {
                id: LinkId::from_seed(i),
                source: a,
                target: b,
                weight: 0.5,
                kind,
                stats: LinkStats::default(),
                created_tick: 0,
            }));
        }
        (graph, links)
    }

    fn record(link: LinkId, transferred: f64, active: bool, crossed: bool) -> StrideRecord {
        StrideRecord {
            tick: 1,
            channel: ChannelId::from_seed(1),
            link,
            source: NodeId::from_seed(0),
            target: NodeId::from_seed(1),
            requested: transferred,
            transferred,
            source_before: 0.5,
            source_after: 0.5 - transferred,
            target_before: 0.0,
            target_after: transferred,
            source_threshold: 0.1,
            target_threshold: transferred * 0.9,
            source_was_active: active,
            target_was_active: false,
            target_crossed: crossed,
        }
    }

    #[test]
    fn gate_blocks_active_endpoints() {
        let (mut graph, links) = world(6, LinkKind::Association);
        let updater = LearningUpdater::new();

        // Every record has an active source: zero weight deltas.
        let records: Vec<StrideRecord> = links
            .iter()
            .enumerate()
            .map(|(i, l)| record(*l, 0.1 + i as f64 * 0.05, true, true))
            .collect();
        let updates = updater.apply(&mut graph, &records, 1);
        assert!(updates.is_empty());
        for link in &links {
            assert_eq!(graph.link(link).unwrap().weight, 0.5);
        }
    }

    #[test]
    fn gate_requires_crossing() {
        let (mut graph, links) = world(6, LinkKind::Association);
        let updater = LearningUpdater::new();
        let records: Vec<StrideRecord> = links
            .iter()
            .map(|l| record(*l, 0.2, false, false))
            .collect();
        let updates = updater.apply(&mut graph, &records, 1);
        assert!(updates.is_empty());
    }

    #[test]
    fn rank_normalization_strengthens_top_weakens_bottom() {
        let (mut graph, links) = world(5, LinkKind::Association);
        let updater = LearningUpdater::new();
        let records: Vec<StrideRecord> = links
            .iter()
            .enumerate()
            .map(|(i, l)| record(*l, 0.1 + i as f64 * 0.1, false, true))
            .collect();
        let updates = updater.apply(&mut graph, &records, 1);
        assert_eq!(updates.len(), 5);

        // Largest transfer gains weight, smallest loses it, relative to
        // the cohort.
        let best = graph.link(&links[4]).unwrap().weight;
        let worst = graph.link(&links[0]).unwrap().weight;
        let median = graph.link(&links[2]).unwrap().weight;
        assert!(best > 0.5, "best {best}");
        assert!(worst < 0.5, "worst {worst}");
        assert!((median - 0.5).abs() < 1e-9, "median {median} stays put");
    }

    #[test]
    fn small_cohort_falls_back_to_pool() {
        // Two Association + three Precedence links: each kind cohort is
        // under the minimum, but pooled they rank together.
        let (mut graph, a_links) = world(2, LinkKind::Association);
        let mut p_links = Vec::new();
        for i in 10..13 {
            let a = graph.add_node(NodeData::new(NodeKind::Concept));
            let b = graph.add_node(NodeData::new(NodeKind::Concept));
            p_links.push(graph.add_link(LinkData {
                id: LinkId::from_seed(i),
                source: a,
                target: b,
                weight: 0.5,
                kind: LinkKind::Precedence,
                stats: LinkStats::default(),
                created_tick: 0,
            }));
        }
        let updater = LearningUpdater::new();
        let mut records = Vec::new();
        for (i, l) in a_links.iter().chain(p_links.iter()).enumerate() {
            records.push(record(*l, 0.1 + i as f64 * 0.1, false, true));
        }
        let updates = updater.apply(&mut graph, &records, 1);
        assert_eq!(updates.len(), 5, "pooled cohort updates everyone");
    }

    #[test]
    fn tiny_batch_is_neutral() {
        let (mut graph, links) = world(2, LinkKind::Association);
        let updater = LearningUpdater::new();
        let records: Vec<StrideRecord> = links
            .iter()
            .map(|l| record(*l, 0.3, false, true))
            .collect();
        let updates = updater.apply(&mut graph, &records, 1);
        assert!(updates.is_empty(), "two strides cannot be rank-normalized");
        assert_eq!(graph.link(&links[0]).unwrap().weight, 0.5);
    }

    #[test]
    fn weights_stay_in_unit_interval() {
        let (mut graph, links) = world(8, LinkKind::Association);
        let updater = LearningUpdater::new();
        for tick in 1..40 {
            let records: Vec<StrideRecord> = links
                .iter()
                .enumerate()
                .map(|(i, l)| record(*l, 0.1 + i as f64 * 0.1, false, true))
                .collect();
            updater.apply(&mut graph, &records, tick);
        }
        for link in &links {
            let w = graph.link(link).unwrap().weight;
            assert!(w > 0.0 && w <= 1.0, "weight {w} escaped (0, 1]");
        }
    }

    #[test]
    fn repeated_same_tick_updates_are_inert() {
        let (mut graph, links) = world(4, LinkKind::Association);
        let updater = LearningUpdater::new();
        let records: Vec<StrideRecord> = links
            .iter()
            .enumerate()
            .map(|(i, l)| record(*l, 0.1 + i as f64 * 0.1, false, true))
            .collect();
        updater.apply(&mut graph, &records, 5);
        let snapshot: Vec<f64> = links
            .iter()
            .map(|l| graph.link(l).unwrap().weight)
            .collect();

        // A second batch in the same tick has Δt = 0, so η = 0.
        updater.apply(&mut graph, &records, 5);
        for (link, before) in links.iter().zip(snapshot) {
            let after = graph.link(link).unwrap().weight;
            assert!((after - before).abs() < 1e-12);
        }
    }
}
