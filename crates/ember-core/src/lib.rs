//! # Ember Core
//!
//! Core types, traits, and statistics primitives for the ember
//! spreading-activation engine.
//!
//! This crate defines the data model shared across the framework:
//!
//! - **Activation** — sparse per-(node, channel) values with staged,
//!   barrier-committed writes ([`activation::ActivationStore`])
//! - **Graph contract** — the [`graph::GraphStore`] trait the engine
//!   simulates over; durable storage stays external
//! - **Statistics** — the rolling-moment, entropy-coverage, whisker, and
//!   rank-normalization kernels every self-tuning component builds on
//! - **Configuration** — externally supplied knobs with fatal-at-startup
//!   validation; all other coefficients are derived at runtime
//!
//! ## Quick Start
//!
//! ```rust
//! use ember_core::prelude::*;
//!
//! let mut store = ActivationStore::new();
//! let node = NodeId::from_seed(1);
//! let channel = ChannelId::from_seed(1);
//!
//! store.stage(node, channel, 0.9);
//! store.commit();
//! assert_eq!(store.get(&node, &channel), 0.9);
//! ```

pub mod activation;
pub mod config;
pub mod error;
pub mod graph;
pub mod prelude;
pub mod semantic;
pub mod stats;
pub mod types;
