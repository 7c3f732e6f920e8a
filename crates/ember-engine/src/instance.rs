//! Channel-instance arena.
//!
//! A channel instance is the live record of a channel that currently holds
//! above-threshold activation somewhere: it emerges the tick its first
//! node-channel crosses threshold, persists while any member stays above,
//! and dissolves the tick its extent empties. Lifecycle state lives here,
//! in an arena keyed by channel id, not on the nodes, so the external
//! aggregation layer consumes these records without touching node state.

use crate::valence::SIGNAL_COUNT;
use ember_core::stats::{lower_whisker, Ema, RollingMoments};
use ember_core::types::{ChannelId, NodeId, Tick};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Strides of ROI history kept per channel for the stopping rule.
const ROI_WINDOW: usize = 32;
/// Smoothing for per-signal need statistics and the ROI health EMA.
const STAT_ALPHA: f64 = 0.2;

/// Live record of one above-threshold channel.
#[derive(Debug)]
pub struct ChannelInstance {
    pub channel: ChannelId,
    /// Nodes currently above threshold in this channel.
    pub extent: BTreeSet<NodeId>,
    pub born_tick: Tick,
    pub last_crossing_tick: Tick,
    /// Realized ROI of recent strides, newest last.
    roi_history: VecDeque<f64>,
    roi_ema: Ema,
    /// Rolling moments per valence need signal, used to turn raw signals
    /// into standardized surprise.
    pub signal_stats: Vec<RollingMoments>,
    /// Running mean embedding of the extent (the channel's semantic
    /// footprint).
    pub centroid: Option<Vec<f32>>,
    centroid_count: usize,
}

impl ChannelInstance {
    fn new(channel: ChannelId, tick: Tick) -> Self {
        Self {
            channel,
            extent: BTreeSet::new(),
            born_tick: tick,
            last_crossing_tick: tick,
            roi_history: VecDeque::with_capacity(ROI_WINDOW),
            roi_ema: Ema::new(STAT_ALPHA),
            signal_stats: (0..SIGNAL_COUNT)
                .map(|_| RollingMoments::new(STAT_ALPHA))
                .collect(),
            centroid: None,
            centroid_count: 0,
        }
    }

    fn add_node(&mut self, node: NodeId, tick: Tick, embedding: Option<&[f32]>) {
        if self.extent.insert(node) {
            self.last_crossing_tick = tick;
            if let Some(emb) = embedding {
                self.fold_into_centroid(emb);
            }
        }
    }

    fn fold_into_centroid(&mut self, embedding: &[f32]) {
        match &mut self.centroid {
            Some(c) if c.len() == embedding.len() => {
                let k = self.centroid_count as f32;
                for (ci, ei) in c.iter_mut().zip(embedding) {
                    *ci = (*ci * k + ei) / (k + 1.0);
                }
                self.centroid_count += 1;
            }
            Some(_) => {}
            None => {
                self.centroid = Some(embedding.to_vec());
                self.centroid_count = 1;
            }
        }
    }

    pub fn extent_size(&self) -> usize {
        self.extent.len()
    }

    pub fn record_roi(&mut self, roi: f64) {
        if !roi.is_finite() {
            return;
        }
        if self.roi_history.len() == ROI_WINDOW {
            self.roi_history.pop_front();
        }
        self.roi_history.push_back(roi);
        self.roi_ema.update(roi);
    }

    /// EMA of recent stride ROI; the channel's "health" allocation factor.
    pub fn roi_health(&self) -> f64 {
        self.roi_ema.get_or(0.0).max(0.0)
    }

    /// Lower statistical whisker (Q1 − 1.5·IQR) of this channel's own
    /// recent stride ROI. The convergence rule compares predicted ROI
    /// against this: stopping is relative to the channel's recent
    /// performance, never a global constant.
    pub fn roi_whisker(&self) -> Option<f64> {
        let samples: Vec<f64> = self.roi_history.iter().copied().collect();
        lower_whisker(&samples)
    }
}

/// Arena of live channel instances, keyed by channel id.
#[derive(Debug, Default)]
pub struct InstanceArena {
    instances: BTreeMap<ChannelId, ChannelInstance>,
}

impl InstanceArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a threshold crossing. Returns true if this emerged a new
    /// instance.
    pub fn on_crossing(
        &mut self,
        channel: ChannelId,
        node: NodeId,
        tick: Tick,
        embedding: Option<&[f32]>,
    ) -> bool {
        let created = !self.instances.contains_key(&channel);
        self.instances
            .entry(channel)
            .or_insert_with(|| ChannelInstance::new(channel, tick))
            .add_node(node, tick, embedding);
        created
    }

    /// Register a node falling below threshold. Returns true if the
    /// instance dissolved.
    pub fn on_drop(&mut self, channel: &ChannelId, node: &NodeId) -> bool {
        let Some(instance) = self.instances.get_mut(channel) else {
            return false;
        };
        instance.extent.remove(node);
        if instance.extent.is_empty() {
            self.instances.remove(channel);
            true
        } else {
            false
        }
    }

    pub fn get(&self, channel: &ChannelId) -> Option<&ChannelInstance> {
        self.instances.get(channel)
    }

    pub fn get_mut(&mut self, channel: &ChannelId) -> Option<&mut ChannelInstance> {
        self.instances.get_mut(channel)
    }

    /// Channels with a live instance, in id order.
    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.instances.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChannelId, &ChannelInstance)> {
        self.instances.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ChannelId, &mut ChannelInstance)> {
        self.instances.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chan(seed: u64) -> ChannelId {
        ChannelId::from_seed(seed)
    }

    fn node(seed: u64) -> NodeId {
        NodeId::from_seed(seed)
    }

    #[test]
    fn instance_emerges_persists_and_dissolves() {
        let mut arena = InstanceArena::new();
        assert!(arena.on_crossing(chan(1), node(1), 5, None));
        assert!(!arena.on_crossing(chan(1), node(2), 6, None));
        assert_eq!(arena.get(&chan(1)).unwrap().extent_size(), 2);

        assert!(!arena.on_drop(&chan(1), &node(1)));
        assert!(arena.on_drop(&chan(1), &node(2)));
        assert!(arena.get(&chan(1)).is_none());
    }

    #[test]
    fn drop_of_unknown_channel_is_harmless() {
        let mut arena = InstanceArena::new();
        assert!(!arena.on_drop(&chan(9), &node(1)));
    }

    #[test]
    fn centroid_tracks_member_embeddings() {
        let mut arena = InstanceArena::new();
        arena.on_crossing(chan(1), node(1), 0, Some(&[1.0, 0.0]));
        arena.on_crossing(chan(1), node(2), 0, Some(&[0.0, 1.0]));
        let centroid = arena.get(&chan(1)).unwrap().centroid.clone().unwrap();
        assert!((centroid[0] - 0.5).abs() < 1e-6);
        assert!((centroid[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn roi_whisker_needs_history() {
        let mut arena = InstanceArena::new();
        arena.on_crossing(chan(1), node(1), 0, None);
        let instance = arena.get_mut(&chan(1)).unwrap();
        assert!(instance.roi_whisker().is_none());
        for roi in [0.5, 0.6, 0.55, 0.58, 0.52, 0.61] {
            instance.record_roi(roi);
        }
        let whisker = instance.roi_whisker().unwrap();
        assert!(whisker < 0.52, "whisker {whisker} sits below the bulk");
    }

    #[test]
    fn duplicate_crossings_do_not_grow_extent() {
        let mut arena = InstanceArena::new();
        arena.on_crossing(chan(1), node(1), 0, None);
        arena.on_crossing(chan(1), node(1), 1, None);
        assert_eq!(arena.get(&chan(1)).unwrap().extent_size(), 1);
    }
}
