//! Append-only, frame-numbered engine events.
//!
//! Every observable state change the engine makes is announced as a diff
//! event: quota allocations, valence batches, stride executions, threshold
//! crossings, weight updates, pruning, and tick summaries. Consumers
//! (visualization, monitoring) replay frames in order; no snapshot or
//! full-state events exist or are needed.

use crate::metrics::TickStats;
use crate::traversal::QuotaShare;
use ember_core::types::{ChannelId, LinkId, NodeId, PrunedLink, StrideRecord, Tick};
use serde::Serialize;
use std::io::Write;
use tracing::warn;

/// A single scored edge inside a valence batch event.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredEdge {
    pub link: LinkId,
    pub valence: f64,
}

/// Frame-numbered engine event.
#[derive(Debug, Clone, Serialize)]
pub enum EngineEvent {
    /// Stride quotas allocated for a tick.
    QuotaAllocated {
        frame: u64,
        tick: Tick,
        allocations: Vec<QuotaShare>,
    },
    /// Valence scores computed for one channel's candidate edges.
    ValenceBatch {
        frame: u64,
        tick: Tick,
        channel: ChannelId,
        scores: Vec<ScoredEdge>,
        selected: usize,
    },
    /// One stride executed.
    StrideExecuted {
        frame: u64,
        tick: Tick,
        record: StrideRecord,
    },
    /// A node-channel crossed its activation threshold.
    ThresholdCrossed {
        frame: u64,
        tick: Tick,
        node: NodeId,
        channel: ChannelId,
        activation: f64,
        threshold: f64,
    },
    /// A node-channel dropped below threshold and left its instance.
    ThresholdDropped {
        frame: u64,
        tick: Tick,
        node: NodeId,
        channel: ChannelId,
    },
    /// A channel instance dissolved (its extent emptied).
    ChannelDissolved {
        frame: u64,
        tick: Tick,
        channel: ChannelId,
    },
    /// A link weight was updated by the learning phase.
    WeightUpdated {
        frame: u64,
        tick: Tick,
        link: LinkId,
        before: f64,
        after: f64,
    },
    /// A link decayed below the prune floor and was removed from the
    /// working graph; the durable store decides its ultimate fate.
    LinkPruned {
        frame: u64,
        tick: Tick,
        pruned: PrunedLink,
    },
    /// Tick finished; all phase barriers committed.
    TickCompleted {
        frame: u64,
        tick: Tick,
        stats: TickStats,
    },
}

impl EngineEvent {
    pub fn frame(&self) -> u64 {
        match self {
            EngineEvent::QuotaAllocated { frame, .. }
            | EngineEvent::ValenceBatch { frame, .. }
            | EngineEvent::StrideExecuted { frame, .. }
            | EngineEvent::ThresholdCrossed { frame, .. }
            | EngineEvent::ThresholdDropped { frame, .. }
            | EngineEvent::ChannelDissolved { frame, .. }
            | EngineEvent::WeightUpdated { frame, .. }
            | EngineEvent::LinkPruned { frame, .. }
            | EngineEvent::TickCompleted { frame, .. } => *frame,
        }
    }
}

/// Consumer of the event stream.
pub trait EventSink {
    fn emit(&mut self, event: &EngineEvent);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &EngineEvent) {}
}

/// Collects events in memory. Test and inspection use.
#[derive(Debug, Default)]
pub struct VecSink {
    pub events: Vec<EngineEvent>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for VecSink {
    fn emit(&mut self, event: &EngineEvent) {
        self.events.push(event.clone());
    }
}

/// Writes one JSON object per line to any writer.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &EngineEvent) {
        match serde_json::to_string(event) {
            Ok(line) => {
                if writeln!(self.writer, "{line}").is_err() {
                    warn!(frame = event.frame(), "event sink write failed");
                }
            }
            Err(err) => warn!(%err, "event serialization failed"),
        }
    }
}
