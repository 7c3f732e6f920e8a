//! Async tick driver (feature `async`).
//!
//! Owns an engine on a dedicated task, sleeps the adaptive interval
//! between ticks, and drains a stimulus channel at each tick boundary.
//! Stimuli that arrive mid-tick wait for the next tick; shutdown waits for
//! the current tick's final barrier; no mid-tick cancellation exists.

use crate::engine::Engine;
use crate::metrics::TickStats;
use crate::traversal::PhaseGraph;
use ember_core::types::StimulusEvent;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

/// Handle to a running driver.
pub struct DriverHandle {
    stimuli: mpsc::UnboundedSender<StimulusEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    stats: watch::Receiver<Option<TickStats>>,
    join: tokio::task::JoinHandle<()>,
}

impl DriverHandle {
    /// Queue a stimulus for the next tick.
    pub fn send(&self, stimulus: StimulusEvent) -> bool {
        self.stimuli.send(stimulus).is_ok()
    }

    /// Latest completed tick's stats.
    pub fn latest_stats(&self) -> Option<TickStats> {
        self.stats.borrow().clone()
    }

    /// Request shutdown and wait for the tick barrier.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}

/// Spawn the driver loop on the current tokio runtime.
pub fn spawn<G: PhaseGraph + Send + 'static>(mut engine: Engine<G>) -> DriverHandle {
    let (stim_tx, mut stim_rx) = mpsc::unbounded_channel::<StimulusEvent>();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let (stats_tx, stats_rx) = watch::channel(None);

    let join = tokio::spawn(async move {
        loop {
            // Drain whatever arrived since the last barrier.
            while let Ok(stimulus) = stim_rx.try_recv() {
                engine.enqueue(stimulus);
            }

            let stats = engine.tick();
            let interval = Duration::from_secs_f64(stats.dt);
            let _ = stats_tx.send(Some(stats));

            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("driver shutting down at tick barrier");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
                // A stimulus wakes the loop early: active periods tick
                // near the minimum interval.
                Some(stimulus) = stim_rx.recv() => {
                    engine.enqueue(stimulus);
                }
            }
        }
    });

    DriverHandle {
        stimuli: stim_tx,
        shutdown: Some(shutdown_tx),
        stats: stats_rx,
        join,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_mem::MemoryGraph;
    use ember_core::config::SimConfig;
    use ember_core::graph::GraphStore;
    use ember_core::types::*;

    fn small_world() -> (MemoryGraph, NodeId, ChannelId) {
        let mut graph = MemoryGraph::new();
        let a = graph.add_node(NodeData::new(NodeKind::Concept));
        let b = graph.add_node(NodeData::new(NodeKind::Concept));
        graph.add_link(LinkData::new(a, b, 0.5, LinkKind::Association));
        (graph, a, ChannelId::from_seed(1))
    }

    #[tokio::test]
    async fn driver_ticks_and_shuts_down_cleanly() {
        let (graph, node, channel) = small_world();
        let config = SimConfig {
            min_tick_interval: 0.01,
            max_tick_interval: 0.05,
            ..Default::default()
        };
        let engine = Engine::new(graph, config).unwrap();
        let handle = spawn(engine);

        handle.send(StimulusEvent::new(channel, StimulusSource::Text, 0).with_node(node, 0.9));
        tokio::time::sleep(Duration::from_millis(80)).await;

        let stats = handle.latest_stats();
        assert!(stats.is_some(), "driver should have completed ticks");
        handle.shutdown().await;
    }
}
