//! Ember Core Prelude — convenient imports for common usage.
//!
//! ```rust
//! use ember_core::prelude::*;
//! ```

// Re-export commonly used types
pub use crate::types::{
    CandidateRef, ChannelId, LinkData, LinkId, LinkKind, LinkStats, NodeData, NodeId, NodeKind,
    PrunedLink, StimulusEvent, StimulusSource, StrideRecord, Tick,
};

// Re-export the activation table
pub use crate::activation::{ActivationEntry, ActivationStore, CommitReport};

// Re-export the graph contract
pub use crate::graph::GraphStore;

// Re-export configuration
pub use crate::config::{KindDecayScales, SimConfig};

// Re-export statistics primitives
pub use crate::stats::{Ema, RollingMoments};

// Re-export error types
pub use crate::error::{EmberError, Result};
