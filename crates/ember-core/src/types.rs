//! Shared types used across all ember crates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node in the activation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id for tests and replay fixtures.
    pub fn from_seed(seed: u64) -> Self {
        Self(Uuid::from_u64_pair(0x6e6f6465, seed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a directed link between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub Uuid);

impl LinkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id for tests and replay fixtures.
    pub fn from_seed(seed: u64) -> Self {
        Self(Uuid::from_u64_pair(0x6c696e6b, seed))
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for an activation channel.
///
/// A channel is an independent activation dimension: a node may carry
/// activation in many channels at once, and channels never mix except
/// through explicit cross-channel aggregation by an external layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id for tests and replay fixtures.
    pub fn from_seed(seed: u64) -> Self {
        Self(Uuid::from_u64_pair(0x6368616e, seed))
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

/// The current tick of the simulation.
pub type Tick = u64;

/// Node type tag. Affects which decay scale applies (see `KindDecayScales`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// An abstract concept extracted from content.
    Concept,
    /// A raw perceptual item (short-lived by default).
    Percept,
    /// An episodic record (long retention by default).
    Episode,
}

/// Link type tag. Cohorts for weight learning are formed per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkKind {
    /// Generic learned association.
    Association,
    /// Temporal/causal precedence ("what comes next").
    Precedence,
    /// Wired from embedding similarity.
    Similarity,
}

/// Data stored on a graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Scalar prior importance, independent of any channel's activation.
    pub base_weight: f64,
    /// Content embedding. Opaque to the engine; used only through cosine
    /// similarity for goal/identity/diversity scoring.
    pub embedding: Option<Vec<f32>>,
}

impl NodeData {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            base_weight: 1.0,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Directional traversal statistics kept on every link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkStats {
    /// Number of strides executed across this link.
    pub traversals: u64,
    /// EMA of transferred flow magnitude.
    pub flow_ema: f64,
    /// Tick when the link last carried a stride or diffusion flow.
    pub last_tick: Tick,
    /// Accumulated evidence that the source activates before the target.
    pub forward_hits: f64,
    /// Accumulated evidence that the target activates before the source.
    pub backward_hits: f64,
    /// Tick of the last weight update, if any.
    pub last_weight_update: Option<Tick>,
    /// EWMA of the interval between weight updates, in ticks. Drives the
    /// per-link learning step size.
    pub update_gap_ema: f64,
}

impl LinkStats {
    /// Learned directional prior in [0, 1]: the share of an allocation that
    /// should go to the source endpoint. Laplace-smoothed so it starts at an
    /// even split until enough precedence history accrues.
    pub fn direction_prior(&self) -> f64 {
        (self.forward_hits + 1.0) / (self.forward_hits + self.backward_hits + 2.0)
    }
}

/// Data stored on a directed link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkData {
    pub id: LinkId,
    pub source: NodeId,
    pub target: NodeId,
    /// Normalized weight in [0, 1].
    pub weight: f64,
    pub kind: LinkKind,
    pub stats: LinkStats,
    pub created_tick: Tick,
}

impl LinkData {
    pub fn new(source: NodeId, target: NodeId, weight: f64, kind: LinkKind) -> Self {
        Self {
            id: LinkId::new(),
            source,
            target,
            weight: weight.clamp(0.0, 1.0),
            kind,
            stats: LinkStats::default(),
            created_tick: 0,
        }
    }
}

/// A link that decayed below the prune floor, reported to the owning store.
#[derive(Debug, Clone, Serialize)]
pub struct PrunedLink {
    pub link: LinkId,
    pub source: NodeId,
    pub target: NodeId,
    pub final_weight: f64,
}

/// Ephemeral record of one executed stride. Consumed same-tick by the
/// learning updater; never persisted by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct StrideRecord {
    pub tick: Tick,
    pub channel: ChannelId,
    pub link: LinkId,
    pub source: NodeId,
    pub target: NodeId,
    /// Transfer the scheduler asked for, before gap capping and guards.
    pub requested: f64,
    /// Transfer actually staged.
    pub transferred: f64,
    pub source_before: f64,
    pub source_after: f64,
    pub target_before: f64,
    pub target_after: f64,
    pub source_threshold: f64,
    pub target_threshold: f64,
    /// Whether either endpoint was at/above threshold before the stride.
    pub source_was_active: bool,
    pub target_was_active: bool,
    /// Whether the target crossed threshold as a result of the stride.
    pub target_crossed: bool,
}

/// What a stimulus candidate points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateRef {
    Node(NodeId),
    Link(LinkId),
}

/// Where a stimulus came from. Observational; does not branch engine logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StimulusSource {
    Text,
    Percept,
    Recall,
    Custom(String),
}

/// An external event, already reduced upstream to similarity-scored
/// candidates. The engine turns it into bounded activation injections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StimulusEvent {
    /// Channel the injection targets.
    pub channel: ChannelId,
    /// Ranked `(item, similarity)` candidates, similarity in [0, 1].
    pub candidates: Vec<(CandidateRef, f64)>,
    pub source: StimulusSource,
    /// Tick the event was observed (assigned by the producer).
    pub timestamp: Tick,
}

impl StimulusEvent {
    pub fn new(channel: ChannelId, source: StimulusSource, timestamp: Tick) -> Self {
        Self {
            channel,
            candidates: Vec::new(),
            source,
            timestamp,
        }
    }

    pub fn with_node(mut self, node: NodeId, similarity: f64) -> Self {
        self.candidates.push((CandidateRef::Node(node), similarity));
        self
    }

    pub fn with_link(mut self, link: LinkId, similarity: f64) -> Self {
        self.candidates.push((CandidateRef::Link(link), similarity));
        self
    }
}
