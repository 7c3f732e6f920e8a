//! Sparse per-(node, channel) activation storage with staged commits.
//!
//! All writes inside a tick phase are staged into a delta buffer and
//! applied at the phase barrier via [`ActivationStore::commit`]. Strides
//! and diffusion computed concurrently within a phase therefore never
//! observe each other's partial writes; the evaluation order of channels
//! and nodes cannot change the result.
//!
//! The commit boundary is also the numeric guard: a delta that would
//! produce a NaN or infinite activation clamps the entry to its previous
//! value and isolates the pair for the remainder of the tick.

use crate::types::{ChannelId, NodeId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A single live activation entry, used for snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationEntry {
    pub node: NodeId,
    pub channel: ChannelId,
    pub activation: f64,
}

/// Report from one commit barrier.
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    /// Pairs whose staged delta was non-finite; clamped and isolated.
    pub guarded: Vec<(NodeId, ChannelId)>,
    /// Number of entries actually changed.
    pub applied: usize,
}

/// Sparse activation table.
///
/// Per node, channels are a small sorted vector rather than a nested map:
/// nodes carry activation in a handful of channels at a time, and the
/// flat layout keeps iteration order deterministic.
#[derive(Debug, Default)]
pub struct ActivationStore {
    live: BTreeMap<NodeId, Vec<(ChannelId, f64)>>,
    staged: BTreeMap<(NodeId, ChannelId), f64>,
    isolated: BTreeSet<(NodeId, ChannelId)>,
}

impl ActivationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current committed activation. Zero for untracked pairs.
    pub fn get(&self, node: &NodeId, channel: &ChannelId) -> f64 {
        self.live
            .get(node)
            .and_then(|chans| {
                chans
                    .iter()
                    .find(|(c, _)| c == channel)
                    .map(|(_, a)| *a)
            })
            .unwrap_or(0.0)
    }

    /// Stage a delta for application at the next commit barrier.
    pub fn stage(&mut self, node: NodeId, channel: ChannelId, delta: f64) {
        if delta == 0.0 {
            return;
        }
        *self.staged.entry((node, channel)).or_insert(0.0) += delta;
    }

    /// Whether any writes are currently staged.
    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Phase barrier: apply all staged deltas against the committed state.
    ///
    /// Non-finite results clamp to the pre-commit value and isolate the
    /// pair for the rest of the tick; activation never goes negative.
    pub fn commit(&mut self) -> CommitReport {
        let mut report = CommitReport::default();
        let staged = std::mem::take(&mut self.staged);
        for ((node, channel), delta) in staged {
            let current = self.get(&node, &channel);
            let next = current + delta;
            if !next.is_finite() {
                self.isolated.insert((node, channel));
                report.guarded.push((node, channel));
                continue;
            }
            self.put(node, channel, next.max(0.0));
            report.applied += 1;
        }
        report
    }

    /// Discard staged writes without applying them.
    pub fn discard_staged(&mut self) {
        self.staged.clear();
    }

    /// Whether a pair was isolated by the numeric guard this tick.
    pub fn is_isolated(&self, node: &NodeId, channel: &ChannelId) -> bool {
        self.isolated.contains(&(*node, *channel))
    }

    /// Clear per-tick isolation marks. Called at the start of each tick.
    pub fn begin_tick(&mut self) {
        self.isolated.clear();
    }

    /// Overwrite an entry directly. Setup/test use; tick phases stage.
    pub fn set(&mut self, node: NodeId, channel: ChannelId, activation: f64) {
        if activation.is_finite() {
            self.put(node, channel, activation.max(0.0));
        }
    }

    fn put(&mut self, node: NodeId, channel: ChannelId, activation: f64) {
        let chans = self.live.entry(node).or_default();
        if let Some(pos) = chans.iter().position(|(c, _)| *c == channel) {
            if activation == 0.0 {
                chans.remove(pos);
            } else {
                chans[pos].1 = activation;
            }
        } else if activation != 0.0 {
            chans.push((channel, activation));
            chans.sort_by_key(|(c, _)| *c);
        }
        let now_empty = chans.is_empty();
        if now_empty {
            self.live.remove(&node);
        }
    }

    /// Multiply every channel of `node` by a factor. Used by the decay
    /// phase, which owns its own barrier by construction.
    pub fn scale_node(&mut self, node: &NodeId, factor: f64) {
        if !(factor.is_finite() && factor >= 0.0) {
            return;
        }
        let mut now_empty = false;
        if let Some(chans) = self.live.get_mut(node) {
            for (_, a) in chans.iter_mut() {
                *a *= factor;
            }
            chans.retain(|(_, a)| *a > 0.0);
            now_empty = chans.is_empty();
        }
        if now_empty {
            self.live.remove(node);
        }
    }

    /// Channels with nonzero activation at a node, sorted by channel id.
    pub fn channels(&self, node: &NodeId) -> &[(ChannelId, f64)] {
        self.live.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Nodes with any activation, in id order. This is the seed of the
    /// diffusion frontier.
    pub fn support(&self) -> Vec<NodeId> {
        self.live.keys().copied().collect()
    }

    /// Total activation in one channel across all nodes.
    pub fn channel_total(&self, channel: &ChannelId) -> f64 {
        self.live
            .values()
            .flat_map(|chans| chans.iter())
            .filter(|(c, _)| c == channel)
            .map(|(_, a)| a)
            .sum()
    }

    /// All `(node, activation)` pairs in one channel, in node id order.
    pub fn nodes_in_channel(&self, channel: &ChannelId) -> Vec<(NodeId, f64)> {
        self.live
            .iter()
            .filter_map(|(node, chans)| {
                chans
                    .iter()
                    .find(|(c, _)| c == channel)
                    .map(|(_, a)| (*node, *a))
            })
            .collect()
    }

    /// Flat snapshot of the committed table, in (node, channel) order.
    pub fn snapshot(&self) -> Vec<ActivationEntry> {
        self.live
            .iter()
            .flat_map(|(node, chans)| {
                chans.iter().map(|(channel, activation)| ActivationEntry {
                    node: *node,
                    channel: *channel,
                    activation: *activation,
                })
            })
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.live.values().map(|c| c.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(seed: u64) -> NodeId {
        NodeId::from_seed(seed)
    }

    fn chan(seed: u64) -> ChannelId {
        ChannelId::from_seed(seed)
    }

    #[test]
    fn staged_writes_are_invisible_until_commit() {
        let mut store = ActivationStore::new();
        store.stage(node(1), chan(1), 0.5);
        assert_eq!(store.get(&node(1), &chan(1)), 0.0);
        store.commit();
        assert_eq!(store.get(&node(1), &chan(1)), 0.5);
    }

    #[test]
    fn deltas_accumulate_within_a_phase() {
        let mut store = ActivationStore::new();
        store.stage(node(1), chan(1), 0.3);
        store.stage(node(1), chan(1), 0.2);
        store.commit();
        assert!((store.get(&node(1), &chan(1)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn commit_clamps_to_non_negative() {
        let mut store = ActivationStore::new();
        store.set(node(1), chan(1), 0.1);
        store.stage(node(1), chan(1), -0.5);
        store.commit();
        assert_eq!(store.get(&node(1), &chan(1)), 0.0);
        // Entry dropped from support once empty.
        assert!(store.support().is_empty());
    }

    #[test]
    fn non_finite_delta_is_guarded_and_isolated() {
        let mut store = ActivationStore::new();
        store.set(node(1), chan(1), 0.4);
        store.stage(node(1), chan(1), f64::INFINITY);
        let report = store.commit();
        assert_eq!(report.guarded.len(), 1);
        // Previous value preserved, pair isolated for the tick.
        assert_eq!(store.get(&node(1), &chan(1)), 0.4);
        assert!(store.is_isolated(&node(1), &chan(1)));
        store.begin_tick();
        assert!(!store.is_isolated(&node(1), &chan(1)));
    }

    #[test]
    fn channels_never_mix() {
        let mut store = ActivationStore::new();
        store.set(node(1), chan(1), 0.3);
        store.set(node(1), chan(2), 0.7);
        assert_eq!(store.get(&node(1), &chan(1)), 0.3);
        assert_eq!(store.get(&node(1), &chan(2)), 0.7);
        assert_eq!(store.channels(&node(1)).len(), 2);
        assert!((store.channel_total(&chan(2)) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn scale_node_drops_emptied_entries() {
        let mut store = ActivationStore::new();
        store.set(node(1), chan(1), 0.5);
        store.scale_node(&node(1), 0.0);
        assert!(store.support().is_empty());
    }

    #[test]
    fn snapshot_is_ordered_and_complete() {
        let mut store = ActivationStore::new();
        store.set(node(2), chan(1), 0.2);
        store.set(node(1), chan(1), 0.1);
        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap[0].node < snap[1].node);
    }
}
