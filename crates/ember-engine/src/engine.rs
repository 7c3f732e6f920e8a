//! The tick engine — phase-ordered simulation loop.
//!
//! Each tick runs strictly sequential phases with commit barriers between
//! them: stimulus injection → diffusion → traversal → criticality retune →
//! decay (with quiet-tick noise updates and instance dissolution) →
//! learning. No phase begins before the previous phase's staged writes are
//! committed, and stimuli arriving mid-tick queue for the next tick.
//!
//! [`Engine::step`] takes an explicit tick duration and touches no wall
//! clock or OS entropy: an identical stimulus sequence and seed replays
//! to an identical final state. [`Engine::tick`] is the production
//! wrapper: it derives the adaptive tick duration from stimulus recency
//! and feeds observed costs back into the load and stride-cost EMAs.

use crate::criticality::CriticalityController;
use crate::diffusion::{adaptive_dt, DiffusionScheduler};
use crate::events::{EngineEvent, EventSink, NullSink, ScoredEdge};
use crate::instance::InstanceArena;
use crate::learning::LearningUpdater;
use crate::metrics::TickStats;
use crate::prng::Prng;
use crate::stimulus::StimulusInjector;
use crate::threshold::{ModulationContext, ThresholdEngine};
use crate::traversal::{PhaseGraph, TraversalScheduler};
use crate::valence::{NeedContext, ValenceScorer};
use ember_core::activation::{ActivationEntry, ActivationStore};
use ember_core::config::SimConfig;
use ember_core::error::Result;
use ember_core::graph::GraphStore;
use ember_core::stats::Ema;
use ember_core::types::{ChannelId, LinkId, NodeId, StimulusEvent, StrideRecord, Tick};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;
use tracing::{debug, warn};

/// Comparable state snapshot for replay verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub tick: Tick,
    pub activation: Vec<ActivationEntry>,
    pub weights: Vec<(LinkId, f64)>,
}

/// The simulation engine for one graph.
pub struct Engine<G: PhaseGraph> {
    graph: G,
    store: ActivationStore,
    config: SimConfig,
    thresholds: ThresholdEngine,
    controller: CriticalityController,
    diffusion: DiffusionScheduler,
    injector: StimulusInjector,
    traversal: TraversalScheduler,
    learner: LearningUpdater,
    scorer: ValenceScorer,
    arena: InstanceArena,
    sink: Box<dyn EventSink + Send>,
    prng: Prng,
    queue: VecDeque<StimulusEvent>,
    tick: Tick,
    frame: u64,
    goal: Option<Vec<f32>>,
    mood: Option<Vec<f32>>,
    /// Observed tick cost over the deadline, updated by `tick()` only.
    load_ema: Ema,
    /// Hard active set as of the last commit barrier.
    active: BTreeSet<(NodeId, ChannelId)>,
    /// Last crossing tick per pair, for recency modulation and precedence.
    crossing_ticks: BTreeMap<(NodeId, ChannelId), Tick>,
    /// EW mean of inter-crossing intervals; the recency timescale.
    crossing_gap_ema: Ema,
    last_stimulus: Option<Instant>,
}

impl<G: PhaseGraph> Engine<G> {
    /// Build an engine over a graph. The only fatal error site: an invalid
    /// configuration is rejected here and nowhere later.
    pub fn new(graph: G, config: SimConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            thresholds: ThresholdEngine::new(config.z_alpha, config.threshold_floor),
            controller: CriticalityController::new(
                config.rho_target,
                config.decay_bounds,
                config.initial_decay_rate,
                config.initial_diffusion_rate,
            ),
            diffusion: DiffusionScheduler::new(),
            injector: StimulusInjector::new(),
            traversal: TraversalScheduler::new(),
            learner: LearningUpdater::new(),
            scorer: ValenceScorer::new(),
            arena: InstanceArena::new(),
            sink: Box::new(NullSink),
            prng: Prng::new(config.seed),
            queue: VecDeque::new(),
            tick: 0,
            frame: 0,
            goal: None,
            mood: None,
            load_ema: Ema::new(0.2),
            active: BTreeSet::new(),
            crossing_ticks: BTreeMap::new(),
            crossing_gap_ema: Ema::new(0.2),
            last_stimulus: None,
            graph,
            store: ActivationStore::new(),
            config,
        })
    }

    /// Replace the event sink.
    pub fn with_sink(mut self, sink: Box<dyn EventSink + Send>) -> Self {
        self.sink = sink;
        self
    }

    pub fn set_sink(&mut self, sink: Box<dyn EventSink + Send>) {
        self.sink = sink;
    }

    /// Set the active goal embedding (threshold + valence modulation).
    pub fn set_goal(&mut self, goal: Option<Vec<f32>>) {
        self.goal = goal;
    }

    /// Set the mood vector (threshold + valence modulation).
    pub fn set_mood(&mut self, mood: Option<Vec<f32>>) {
        self.mood = mood;
    }

    /// Queue a stimulus for the next tick. Never processed mid-tick.
    pub fn enqueue(&mut self, stimulus: StimulusEvent) {
        self.last_stimulus = Some(Instant::now());
        self.queue.push_back(stimulus);
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn store(&self) -> &ActivationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ActivationStore {
        &mut self.store
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn controller(&self) -> &CriticalityController {
        &self.controller
    }

    pub fn arena(&self) -> &InstanceArena {
        &self.arena
    }

    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    /// The engine's deterministic RNG. Part of the replayable state.
    pub fn rng(&mut self) -> &mut Prng {
        &mut self.prng
    }

    /// Hard active set as of the last barrier.
    pub fn active_set(&self) -> &BTreeSet<(NodeId, ChannelId)> {
        &self.active
    }

    fn next_frame(&mut self) -> u64 {
        let frame = self.frame;
        self.frame += 1;
        frame
    }

    fn rho_ratio(&self) -> Option<f64> {
        self.controller
            .last_rho()
            .map(|rho| rho / self.config.rho_target)
    }

    /// Recency scores for recently-crossed pairs. The timescale is the EW
    /// mean inter-crossing interval, not a fixed half-life.
    fn recency_scores(&mut self, tick: Tick) -> BTreeMap<(NodeId, ChannelId), f64> {
        let Some(tau) = self.crossing_gap_ema.get().filter(|t| *t > 0.0) else {
            return BTreeMap::new();
        };
        self.crossing_ticks
            .retain(|_, t| (-((tick - *t) as f64) / tau).exp() > f64::EPSILON);
        self.crossing_ticks
            .iter()
            .map(|(pair, t)| (*pair, (-((tick - *t) as f64) / tau).exp()))
            .collect()
    }

    /// Re-derive the hard active set after a commit barrier, updating the
    /// instance arena, precedence accumulators, and the event stream.
    /// Returns the number of fresh crossings.
    fn refresh_active(&mut self, tick: Tick) -> usize {
        let rho_ratio = self.rho_ratio();
        let load = self.load_ema.get();
        let recency = self.recency_scores(tick);

        let mut current: BTreeSet<(NodeId, ChannelId)> = BTreeSet::new();
        let mut crossed: Vec<(NodeId, ChannelId, f64, f64)> = Vec::new();
        {
            let mctx = ModulationContext {
                rho_ratio,
                load,
                goal: self.goal.as_deref(),
                mood: self.mood.as_deref(),
                recency: Some(&recency),
            };
            for node in self.store.support() {
                for (channel, activation) in self.store.channels(&node).to_vec() {
                    let m = mctx.for_pair(&self.graph, &node, &channel);
                    let threshold = self.thresholds.threshold(&node, &channel, &m);
                    if self.thresholds.is_active(activation, threshold) {
                        current.insert((node, channel));
                        if !self.active.contains(&(node, channel)) {
                            crossed.push((node, channel, activation, threshold));
                        }
                    }
                }
            }
        }
        let dropped: Vec<(NodeId, ChannelId)> =
            self.active.difference(&current).copied().collect();

        for (node, channel, activation, threshold) in &crossed {
            if let Some(prev) = self.crossing_ticks.get(&(*node, *channel)) {
                let gap = tick.saturating_sub(*prev) as f64;
                if gap > 0.0 {
                    self.crossing_gap_ema.update(gap);
                }
            }
            self.crossing_ticks.insert((*node, *channel), tick);

            let embedding = self
                .graph
                .node(node)
                .and_then(|n| n.embedding.clone());
            self.arena
                .on_crossing(*channel, *node, tick, embedding.as_deref());
            // Precedence: the crossing node's already-active neighbors in
            // this channel activated first.
            self.update_precedence(*node, *channel);

            let frame = self.next_frame();
            self.sink.emit(&EngineEvent::ThresholdCrossed {
                frame,
                tick,
                node: *node,
                channel: *channel,
                activation: *activation,
                threshold: *threshold,
            });
        }

        for (node, channel) in &dropped {
            let dissolved = self.arena.on_drop(channel, node);
            let frame = self.next_frame();
            self.sink.emit(&EngineEvent::ThresholdDropped {
                frame,
                tick,
                node: *node,
                channel: *channel,
            });
            if dissolved {
                let frame = self.next_frame();
                self.sink.emit(&EngineEvent::ChannelDissolved {
                    frame,
                    tick,
                    channel: *channel,
                });
            }
        }

        self.active = current;
        crossed.len()
    }

    /// Accumulate directional precedence on the links around a node that
    /// just crossed: incoming links from already-active sources gain
    /// forward evidence, outgoing links to already-active targets gain
    /// backward evidence. `self.active` still holds the pre-barrier set
    /// here, which is exactly the "who was lit first" question.
    fn update_precedence(&mut self, node: NodeId, channel: ChannelId) {
        for link_id in self.graph.incoming(&node) {
            let source_active = self
                .graph
                .link(&link_id)
                .map(|l| self.active.contains(&(l.source, channel)))
                .unwrap_or(false);
            if source_active {
                if let Some(link) = self.graph.link_mut(&link_id) {
                    link.stats.forward_hits += 1.0;
                }
            }
        }
        for link_id in self.graph.outgoing(&node) {
            let target_active = self
                .graph
                .link(&link_id)
                .map(|l| self.active.contains(&(l.target, channel)))
                .unwrap_or(false);
            if target_active {
                if let Some(link) = self.graph.link_mut(&link_id) {
                    link.stats.backward_hits += 1.0;
                }
            }
        }
    }

    /// Run one tick with an explicit duration. Deterministic: no wall
    /// clock, no OS entropy.
    pub fn step(&mut self, dt: f64) -> TickStats {
        let tick = self.tick;
        self.store.begin_tick();
        let tick_start_active = self.active.clone();
        let mut guarded = 0usize;
        let mut crossings = 0usize;

        // ---- Phase 1: stimulus injection ----
        let drained: Vec<StimulusEvent> = self.queue.drain(..).collect();
        let stimuli = drained.len();
        let mut injected = 0.0;
        let headroom = (1.0 - self.load_ema.get_or(0.0)).clamp(0.0, 1.0);
        let regime_health = self.controller.regime_health();
        let rho_ratio = self.rho_ratio();
        let load = self.load_ema.get();
        let recency = self.recency_scores(tick);
        for event in &drained {
            let mctx = ModulationContext {
                rho_ratio,
                load,
                goal: self.goal.as_deref(),
                mood: self.mood.as_deref(),
                recency: Some(&recency),
            };
            let report = self.injector.inject(
                &self.graph,
                &mut self.store,
                &mut self.thresholds,
                &mctx,
                event,
                headroom,
                regime_health,
            );
            injected += report.injected;
        }
        drop(recency);
        let report = self.store.commit();
        guarded += report.guarded.len();
        crossings += self.refresh_active(tick);

        // ---- Phase 2: diffusion ----
        let diffusion_report = self.diffusion.diffuse(
            &mut self.graph,
            &mut self.store,
            self.controller.diffusion_rate(),
            dt,
            tick,
        );
        let report = self.store.commit();
        guarded += report.guarded.len();
        crossings += self.refresh_active(tick);

        // ---- Phase 3: traversal ----
        let budget = self
            .traversal
            .stride_budget(&self.config, 0.0, self.arena.len());
        let recency = self.recency_scores(tick);
        let traversal_outcome = {
            let mctx = ModulationContext {
                rho_ratio,
                load,
                goal: self.goal.as_deref(),
                mood: self.mood.as_deref(),
                recency: Some(&recency),
            };
            let need = NeedContext {
                goal: self.goal.as_deref(),
                mood: self.mood.as_deref(),
            };
            self.traversal.run_phase(
                &mut self.graph,
                &mut self.store,
                &self.thresholds,
                &self.controller,
                &mut self.arena,
                &self.scorer,
                &mctx,
                &need,
                &tick_start_active,
                budget,
                tick,
            )
        };
        drop(recency);

        if !traversal_outcome.quotas.is_empty() {
            let frame = self.next_frame();
            self.sink.emit(&EngineEvent::QuotaAllocated {
                frame,
                tick,
                allocations: traversal_outcome.quotas.clone(),
            });
        }
        for (channel, batch) in &traversal_outcome.batches {
            if batch.scores.is_empty() {
                continue;
            }
            let frame = self.next_frame();
            self.sink.emit(&EngineEvent::ValenceBatch {
                frame,
                tick,
                channel: *channel,
                scores: batch
                    .scores
                    .iter()
                    .map(|s| ScoredEdge {
                        link: s.link,
                        valence: s.valence,
                    })
                    .collect(),
                selected: batch.selected,
            });
        }
        let records: Vec<StrideRecord> = traversal_outcome
            .outcomes
            .iter()
            .map(|o| o.record.clone())
            .collect();
        for record in &records {
            let frame = self.next_frame();
            self.sink.emit(&EngineEvent::StrideExecuted {
                frame,
                tick,
                record: record.clone(),
            });
        }
        let report = self.store.commit();
        guarded += report.guarded.len();
        crossings += self.refresh_active(tick);

        // ---- Phase 4: criticality retune ----
        let frontier = self.store.support();
        let rho = self.controller.estimate_rho(&self.graph, &frontier);
        self.controller.retune(rho);
        self.thresholds
            .set_modulators_enabled(!self.controller.breaker_active());

        // ---- Phase 5: decay ----
        let decay_report = self.diffusion.decay(
            &mut self.graph,
            &mut self.store,
            &mut self.thresholds,
            self.controller.decay_rate(),
            dt,
            &self.config,
            tick,
        );
        for pruned in &decay_report.links_pruned {
            let frame = self.next_frame();
            self.sink.emit(&EngineEvent::LinkPruned {
                frame,
                tick,
                pruned: pruned.clone(),
            });
        }
        self.thresholds.end_tick();
        crossings += self.refresh_active(tick);

        // ---- Phase 6: learning ----
        let updates = self.learner.apply(&mut self.graph, &records, tick);
        for update in &updates {
            let frame = self.next_frame();
            self.sink.emit(&EngineEvent::WeightUpdated {
                frame,
                tick,
                link: update.link,
                before: update.before,
                after: update.after,
            });
        }

        if guarded > 0 {
            warn!(guarded, tick, "numeric guard isolated activation entries");
        }

        let stats = TickStats {
            tick,
            dt,
            stimuli,
            injected,
            diffusion_transfers: diffusion_report.transfers,
            strides: records.len(),
            stride_budget: traversal_outcome.budget,
            converged_channels: traversal_outcome.converged_channels,
            crossings,
            weight_updates: updates.len(),
            links_pruned: decay_report.links_pruned.len(),
            guarded,
            rho,
            regime: self.controller.regime(),
            decay_rate: self.controller.decay_rate(),
            diffusion_rate: self.controller.diffusion_rate(),
            link_decay_rate: self.config.link_decay_rate,
            active_channels: self.arena.len(),
            activation_entries: self.store.entry_count(),
        };
        let frame = self.next_frame();
        self.sink.emit(&EngineEvent::TickCompleted {
            frame,
            tick,
            stats: stats.clone(),
        });
        debug!(
            tick,
            strides = stats.strides,
            crossings = stats.crossings,
            rho = ?stats.rho,
            "tick complete"
        );

        self.tick += 1;
        stats
    }

    /// Run one tick against the wall clock: the tick duration adapts to
    /// stimulus recency, and observed costs feed the load and stride-cost
    /// estimators that size future budgets.
    pub fn tick(&mut self) -> TickStats {
        let since = self
            .last_stimulus
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(self.config.max_tick_interval);
        let dt = adaptive_dt(since, &self.config);

        let started = Instant::now();
        let stats = self.step(dt);
        let elapsed = started.elapsed().as_secs_f64();

        self.load_ema.update(elapsed / self.config.tick_deadline);
        if stats.strides > 0 {
            // Whole-tick cost over the stride count: a deliberately
            // conservative per-stride estimate.
            self.traversal
                .observe_stride_cost(elapsed / stats.strides as f64);
        }
        stats
    }

    /// Run `n` deterministic ticks of fixed duration.
    pub fn run(&mut self, n: usize, dt: f64) -> Vec<TickStats> {
        (0..n).map(|_| self.step(dt)).collect()
    }

    /// Comparable snapshot of the replayable state.
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            tick: self.tick,
            activation: self.store.snapshot(),
            weights: self
                .graph
                .all_links()
                .into_iter()
                .filter_map(|id| self.graph.link(&id).map(|l| (id, l.weight)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_mem::MemoryGraph;
    use ember_core::types::*;

    fn chain_graph(n: u64, weight: f64) -> (MemoryGraph, Vec<NodeId>) {
        let mut graph = MemoryGraph::new();
        let nodes: Vec<NodeId> = (0..n)
            .map(|i| {
                graph.add_node(NodeData {
                    id: NodeId::from_seed(i),
                    kind: NodeKind::Concept,
                    base_weight: 1.0,
                    embedding: None,
                })
            })
            .collect();
        for i in 0..(n - 1) as usize {
            graph.add_link(LinkData {
                id: LinkId::from_seed(i as u64),
                source: nodes[i],
                target: nodes[i + 1],
                weight,
                kind: LinkKind::Association,
                stats: LinkStats::default(),
                created_tick: 0,
            });
        }
        (graph, nodes)
    }

    fn quiet_config() -> SimConfig {
        SimConfig {
            decay_bounds: (0.0, 0.9),
            initial_decay_rate: 0.02,
            fixed_stride_budget: Some(8),
            ..Default::default()
        }
    }

    #[test]
    fn stimuli_queue_until_the_next_tick() {
        let (graph, nodes) = chain_graph(3, 0.5);
        let mut engine = Engine::new(graph, quiet_config()).unwrap();
        let channel = ChannelId::from_seed(1);

        engine.enqueue(
            StimulusEvent::new(channel, StimulusSource::Text, 0).with_node(nodes[0], 1.0),
        );
        // Nothing visible before the tick runs.
        assert_eq!(engine.store().get(&nodes[0], &channel), 0.0);

        let stats = engine.step(0.1);
        assert_eq!(stats.stimuli, 1);
        assert!(stats.injected > 0.0);
        assert!(engine.store().get(&nodes[0], &channel) > 0.0);
    }

    #[test]
    fn injection_to_threshold_emerges_an_instance() {
        let (graph, nodes) = chain_graph(2, 0.5);
        // Decay off so a node filled exactly to threshold stays there.
        let config = SimConfig {
            decay_bounds: (0.0, 0.9),
            initial_decay_rate: 0.0,
            fixed_stride_budget: Some(8),
            ..Default::default()
        };
        let mut engine = Engine::new(graph, config).unwrap();
        let channel = ChannelId::from_seed(1);

        // The chain tail has no outgoing links, so nothing drains it.
        engine.enqueue(
            StimulusEvent::new(channel, StimulusSource::Text, 0).with_node(nodes[1], 1.0),
        );
        let stats = engine.step(0.1);
        assert!(stats.crossings >= 1, "injection fills the gap exactly");
        assert_eq!(stats.active_channels, 1);
        assert!(engine.arena().get(&channel).is_some());
        assert!(engine.active_set().contains(&(nodes[1], channel)));
    }

    struct SharedSink(std::sync::Arc<std::sync::Mutex<Vec<EngineEvent>>>);

    impl EventSink for SharedSink {
        fn emit(&mut self, event: &EngineEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn event_stream_is_frame_ordered_and_complete() {
        let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let (graph, nodes) = chain_graph(3, 0.8);
        let mut engine = Engine::new(graph, quiet_config())
            .unwrap()
            .with_sink(Box::new(SharedSink(events.clone())));
        let channel = ChannelId::from_seed(1);
        engine.enqueue(
            StimulusEvent::new(channel, StimulusSource::Text, 0).with_node(nodes[0], 1.0),
        );
        engine.step(0.1);
        engine.step(0.1);

        let events = events.lock().unwrap();
        assert!(!events.is_empty());
        let frames: Vec<u64> = events.iter().map(|e| e.frame()).collect();
        assert!(
            frames.windows(2).all(|w| w[0] < w[1]),
            "frames must be strictly increasing: {frames:?}"
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::ThresholdCrossed { .. })));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, EngineEvent::TickCompleted { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn deterministic_replay_reproduces_state() {
        let build = || {
            let (graph, nodes) = chain_graph(5, 0.6);
            let mut engine = Engine::new(graph, quiet_config()).unwrap();
            let channel = ChannelId::from_seed(1);
            engine.enqueue(
                StimulusEvent::new(channel, StimulusSource::Text, 0)
                    .with_node(nodes[0], 0.9)
                    .with_node(nodes[2], 0.4),
            );
            engine.step(0.1);
            engine.enqueue(
                StimulusEvent::new(channel, StimulusSource::Percept, 1).with_node(nodes[1], 0.7),
            );
            for _ in 0..12 {
                engine.step(0.1);
            }
            engine.snapshot()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn shutdown_is_a_barrier_no_partial_state() {
        // step() returns only at a barrier: staged buffers are always
        // empty between ticks.
        let (graph, nodes) = chain_graph(4, 0.7);
        let mut engine = Engine::new(graph, quiet_config()).unwrap();
        let channel = ChannelId::from_seed(1);
        engine.enqueue(
            StimulusEvent::new(channel, StimulusSource::Text, 0).with_node(nodes[0], 1.0),
        );
        for _ in 0..5 {
            engine.step(0.1);
            assert!(!engine.store().has_staged());
        }
    }

    #[test]
    fn invalid_config_is_fatal_at_startup() {
        let (graph, _) = chain_graph(2, 0.5);
        let config = SimConfig {
            z_alpha: -1.0,
            ..Default::default()
        };
        assert!(Engine::new(graph, config).is_err());
    }
}
