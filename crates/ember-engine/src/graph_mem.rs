//! Concrete implementation of the GraphStore trait using petgraph.
//!
//! Backed by a directed petgraph `Graph` with HashMap indices for O(1)
//! node/link lookup by id. This is the engine's working copy; a durable
//! external store owns the records and learns about pruning through the
//! event stream.

use ember_core::graph::GraphStore;
use ember_core::types::*;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

/// Petgraph-backed implementation of the graph store.
pub struct MemoryGraph {
    graph: DiGraph<NodeData, LinkData>,
    /// Map from our NodeId to petgraph's internal index.
    node_index: HashMap<NodeId, NodeIndex>,
    /// Map from our LinkId to petgraph's internal edge index.
    link_index: HashMap<LinkId, EdgeIndex>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index: HashMap::new(),
            link_index: HashMap::new(),
        }
    }

    fn links_directed(&self, node: &NodeId, dir: Direction) -> Vec<LinkId> {
        let Some(&idx) = self.node_index.get(node) else {
            return Vec::new();
        };
        let mut links: Vec<LinkId> = self
            .graph
            .edges_directed(idx, dir)
            .map(|e| e.weight().id)
            .collect();
        links.sort();
        links
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for MemoryGraph {
    fn add_node(&mut self, data: NodeData) -> NodeId {
        let id = data.id;
        let idx = self.graph.add_node(data);
        self.node_index.insert(id, idx);
        id
    }

    fn node(&self, id: &NodeId) -> Option<&NodeData> {
        self.node_index.get(id).map(|idx| &self.graph[*idx])
    }

    fn node_mut(&mut self, id: &NodeId) -> Option<&mut NodeData> {
        self.node_index
            .get(id)
            .copied()
            .map(|idx| &mut self.graph[idx])
    }

    fn add_link(&mut self, data: LinkData) -> LinkId {
        let id = data.id;
        let Some(&from_idx) = self.node_index.get(&data.source) else {
            return id;
        };
        let Some(&to_idx) = self.node_index.get(&data.target) else {
            return id;
        };
        let edge_idx = self.graph.add_edge(from_idx, to_idx, data);
        self.link_index.insert(id, edge_idx);
        id
    }

    fn link(&self, id: &LinkId) -> Option<&LinkData> {
        self.link_index.get(id).map(|idx| &self.graph[*idx])
    }

    fn link_mut(&mut self, id: &LinkId) -> Option<&mut LinkData> {
        self.link_index
            .get(id)
            .copied()
            .map(|idx| &mut self.graph[idx])
    }

    fn set_weight(&mut self, id: &LinkId, weight: f64) {
        if let Some(&idx) = self.link_index.get(id) {
            self.graph[idx].weight = weight.clamp(0.0, 1.0);
        }
    }

    fn outgoing(&self, node: &NodeId) -> Vec<LinkId> {
        self.links_directed(node, Direction::Outgoing)
    }

    fn incoming(&self, node: &NodeId) -> Vec<LinkId> {
        self.links_directed(node, Direction::Incoming)
    }

    fn all_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .graph
            .node_indices()
            .map(|idx| self.graph[idx].id)
            .collect();
        nodes.sort();
        nodes
    }

    fn all_links(&self) -> Vec<LinkId> {
        let mut links: Vec<LinkId> = self.link_index.keys().copied().collect();
        links.sort();
        links
    }

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn decay_weights(
        &mut self,
        rate: f64,
        dt: f64,
        prune_floor: f64,
        current_tick: Tick,
        maturation_ticks: u64,
    ) -> Vec<PrunedLink> {
        let factor = (-rate * dt).exp();

        // Decay pass
        for edge_idx in self.graph.edge_indices() {
            self.graph[edge_idx].weight *= factor;
        }

        // Prune pass: only mature links are candidates
        let mut to_remove = Vec::new();
        for edge_idx in self.graph.edge_indices() {
            let link = &self.graph[edge_idx];
            let age = current_tick.saturating_sub(link.created_tick);
            if age >= maturation_ticks && link.weight < prune_floor {
                to_remove.push((edge_idx, link.id, link.source, link.target, link.weight));
            }
        }

        let pruned: Vec<PrunedLink> = to_remove
            .iter()
            .map(|(_, id, source, target, weight)| PrunedLink {
                link: *id,
                source: *source,
                target: *target,
                final_weight: *weight,
            })
            .collect();

        // Remove in reverse index order to avoid invalidation; removing an
        // edge can relocate the last edge's index, so rebuild the id map
        // afterwards.
        let mut indices: Vec<EdgeIndex> = to_remove.iter().map(|(idx, ..)| *idx).collect();
        indices.sort();
        for idx in indices.into_iter().rev() {
            if let Some(link) = self.graph.edge_weight(idx) {
                self.link_index.remove(&link.id);
            }
            self.graph.remove_edge(idx);
        }
        self.link_index = self
            .graph
            .edge_indices()
            .map(|idx| (self.graph[idx].id, idx))
            .collect();

        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_node(seed: u64) -> NodeData {
        NodeData {
            id: NodeId::from_seed(seed),
            kind: NodeKind::Concept,
            base_weight: 1.0,
            embedding: None,
        }
    }

    fn make_link(seed: u64, from: NodeId, to: NodeId, weight: f64) -> LinkData {
        LinkData {
            id: LinkId::from_seed(seed),
            source: from,
            target: to,
            weight,
            kind: LinkKind::Association,
            stats: LinkStats::default(),
            created_tick: 0,
        }
    }

    #[test]
    fn add_and_retrieve_nodes_and_links() {
        let mut graph = MemoryGraph::new();
        let a = graph.add_node(make_node(1));
        let b = graph.add_node(make_node(2));
        let link = graph.add_link(make_link(1, a, b, 0.5));

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.link_count(), 1);
        assert_eq!(graph.link(&link).unwrap().weight, 0.5);
        assert_eq!(graph.outgoing(&a), vec![link]);
        assert_eq!(graph.incoming(&b), vec![link]);
        assert!(graph.outgoing(&b).is_empty());
    }

    #[test]
    fn set_weight_clamps_to_unit_interval() {
        let mut graph = MemoryGraph::new();
        let a = graph.add_node(make_node(1));
        let b = graph.add_node(make_node(2));
        let link = graph.add_link(make_link(1, a, b, 0.5));

        graph.set_weight(&link, 1.8);
        assert_eq!(graph.link(&link).unwrap().weight, 1.0);
        graph.set_weight(&link, -0.2);
        assert_eq!(graph.link(&link).unwrap().weight, 0.0);
    }

    #[test]
    fn decay_prunes_mature_links_only() {
        let mut graph = MemoryGraph::new();
        let a = graph.add_node(make_node(1));
        let b = graph.add_node(make_node(2));
        let c = graph.add_node(make_node(3));

        // Old weak link: prunable. Young weak link: protected.
        let mut old = make_link(1, a, b, 0.02);
        old.created_tick = 0;
        let mut young = make_link(2, b, c, 0.02);
        young.created_tick = 95;
        let old_id = graph.add_link(old);
        let young_id = graph.add_link(young);

        let pruned = graph.decay_weights(0.5, 1.0, 0.05, 100, 50);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].link, old_id);
        assert!(graph.link(&old_id).is_none());
        assert!(graph.link(&young_id).is_some());
    }

    #[test]
    fn link_index_survives_removal() {
        let mut graph = MemoryGraph::new();
        let a = graph.add_node(make_node(1));
        let b = graph.add_node(make_node(2));
        let c = graph.add_node(make_node(3));
        let weak = graph.add_link(make_link(1, a, b, 0.001));
        let strong = graph.add_link(make_link(2, a, c, 0.9));

        graph.decay_weights(0.0, 1.0, 0.01, 100, 0);
        assert!(graph.link(&weak).is_none());
        // The surviving link is still addressable after index compaction.
        let survivor = graph.link(&strong).unwrap();
        assert_eq!(survivor.target, c);
        assert_eq!(graph.outgoing(&a), vec![strong]);
    }

    #[test]
    fn neighbor_lists_are_sorted_by_link_id() {
        let mut graph = MemoryGraph::new();
        let a = graph.add_node(make_node(1));
        let b = graph.add_node(make_node(2));
        let c = graph.add_node(make_node(3));
        // Insert out of id order.
        graph.add_link(make_link(9, a, b, 0.5));
        graph.add_link(make_link(3, a, c, 0.5));

        let out = graph.outgoing(&a);
        assert_eq!(out.len(), 2);
        assert!(out[0] < out[1]);
    }
}
