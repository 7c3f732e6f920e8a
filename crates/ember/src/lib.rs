//! # Ember
//!
//! Adaptive spreading-activation engine for weighted knowledge graphs.
//!
//! Ember maintains per-node, per-channel activation on a directed graph,
//! propagates and decays it each tick, self-tunes its stability
//! (spectral-radius criticality control), converts external events into
//! bounded injections, and drives a budgeted, multi-signal-scored
//! traversal that both moves activation and learns link weights.
//!
//! ## Quick Start
//!
//! ```rust
//! use ember::prelude::*;
//!
//! // Build a small graph.
//! let mut graph = MemoryGraph::new();
//! let coffee = graph.add_node(NodeData::new(NodeKind::Concept));
//! let morning = graph.add_node(NodeData::new(NodeKind::Concept));
//! graph.add_link(LinkData::new(coffee, morning, 0.6, LinkKind::Association));
//!
//! // Run the engine against it.
//! let mut engine = Engine::new(graph, SimConfig::default()).unwrap();
//! let channel = ChannelId::new();
//! engine.enqueue(
//!     StimulusEvent::new(channel, StimulusSource::Text, 0).with_node(coffee, 0.9),
//! );
//! for _ in 0..10 {
//!     engine.step(0.1);
//! }
//! assert!(engine.store().get(&coffee, &channel) >= 0.0);
//! ```
//!
//! ## Architecture
//!
//! Ember is organized into two crates:
//!
//! - [`ember_core`] — shared types, the activation table, the graph
//!   contract, statistics kernels, configuration
//! - [`ember_engine`] — the tick loop and its components: thresholds,
//!   diffusion/decay, criticality control, stimulus injection, valence
//!   scoring, traversal scheduling, weight learning
//!
//! ## Key Concepts
//!
//! | Term | Meaning |
//! |------|---------|
//! | Activation | Non-negative scalar propagated and decayed per node-channel |
//! | Channel | Independent activation dimension at a node |
//! | Stride | One executed weighted-edge activation transfer |
//! | Valence | Self-calibrating desirability score of a candidate stride |
//! | ρ | Spectral radius of the one-tick propagation operator |
//! | Gap | Deficit between activation and threshold at a node-channel |

pub use ember_core;
pub use ember_engine;

pub mod prelude {
    //! Convenient imports for common usage.

    pub use ember_core::prelude::*;
    pub use ember_engine::criticality::{CriticalityController, Regime};
    pub use ember_engine::engine::{Engine, EngineSnapshot};
    pub use ember_engine::events::{EngineEvent, EventSink, JsonLinesSink, NullSink, VecSink};
    pub use ember_engine::graph_mem::MemoryGraph;
    pub use ember_engine::metrics::TickStats;
    pub use ember_engine::threshold::{Modulation, ModulationContext, ThresholdEngine};
}
