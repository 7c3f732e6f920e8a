//! # Ember Engine
//!
//! Tick-driven simulation runtime for the ember activation engine: a
//! phase-ordered loop that injects stimuli, diffuses and decays
//! activation, schedules budgeted strides across channels, self-tunes its
//! stability near criticality, and learns link weights from stride
//! outcomes.
//!
//! The engine owns only the dynamics. Durable node/link storage,
//! visualization, entity aggregation, and embedding retrieval are
//! external collaborators reached through [`ember_core::graph::GraphStore`],
//! the [`events::EventSink`] stream, and [`ember_core::types::StimulusEvent`].
//!
//! ## Quick Start
//!
//! ```rust
//! use ember_core::prelude::*;
//! use ember_engine::engine::Engine;
//! use ember_engine::graph_mem::MemoryGraph;
//!
//! let mut graph = MemoryGraph::new();
//! let a = graph.add_node(NodeData::new(NodeKind::Concept));
//! let b = graph.add_node(NodeData::new(NodeKind::Concept));
//! graph.add_link(LinkData::new(a, b, 0.5, LinkKind::Association));
//!
//! let mut engine = Engine::new(graph, SimConfig::default()).unwrap();
//! let channel = ChannelId::new();
//! engine.enqueue(
//!     StimulusEvent::new(channel, StimulusSource::Text, 0).with_node(a, 0.9),
//! );
//! let stats = engine.step(0.1);
//! assert_eq!(stats.stimuli, 1);
//! ```

pub mod criticality;
pub mod diffusion;
pub mod engine;
pub mod events;
pub mod graph_mem;
pub mod instance;
pub mod learning;
pub mod metrics;
pub mod prng;
pub mod stimulus;
pub mod stride;
pub mod threshold;
pub mod traversal;
pub mod valence;

#[cfg(feature = "async")]
pub mod driver;
