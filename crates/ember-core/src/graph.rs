//! Graph store abstraction.
//!
//! The engine never owns durable node/link records: an external graph
//! store does. Within one tick the engine needs only lookup, weight
//! mutation, and neighbor enumeration, so that is the whole contract.
//! This is a trait rather than a concrete type so different backends can
//! sit behind the same simulation loop.

use crate::types::{LinkData, LinkId, NodeData, NodeId, PrunedLink, Tick};

/// The graph the engine simulates over.
///
/// Implementations must return neighbor lists in a stable order (link id
/// order); replay determinism depends on it.
pub trait GraphStore {
    /// Add a node and return its id.
    fn add_node(&mut self, data: NodeData) -> NodeId;

    /// Get node data by id.
    fn node(&self, id: &NodeId) -> Option<&NodeData>;

    /// Get mutable node data by id.
    fn node_mut(&mut self, id: &NodeId) -> Option<&mut NodeData>;

    /// Add a directed link and return its id.
    fn add_link(&mut self, data: LinkData) -> LinkId;

    /// Get link data by id.
    fn link(&self, id: &LinkId) -> Option<&LinkData>;

    /// Get mutable link data by id.
    fn link_mut(&mut self, id: &LinkId) -> Option<&mut LinkData>;

    /// Set a link's weight, clamped to [0, 1].
    fn set_weight(&mut self, id: &LinkId, weight: f64);

    /// Outgoing links of a node, in link id order.
    fn outgoing(&self, node: &NodeId) -> Vec<LinkId>;

    /// Incoming links of a node, in link id order.
    fn incoming(&self, node: &NodeId) -> Vec<LinkId>;

    /// All node ids, in id order.
    fn all_nodes(&self) -> Vec<NodeId>;

    /// All link ids, in id order.
    fn all_links(&self) -> Vec<LinkId>;

    /// Number of nodes.
    fn node_count(&self) -> usize;

    /// Number of links.
    fn link_count(&self) -> usize;

    /// Decay all link weights by `exp(-rate · dt)` and remove mature links
    /// that fell below the prune floor. Young links (within the maturation
    /// window) decay but are never pruned. Returns what was removed so the
    /// owning store can be told.
    fn decay_weights(
        &mut self,
        rate: f64,
        dt: f64,
        prune_floor: f64,
        current_tick: Tick,
        maturation_ticks: u64,
    ) -> Vec<PrunedLink>;
}
