//! Command-line harness for the ember engine.
//!
//! Builds a synthetic graph, feeds it a scripted stimulus schedule, runs
//! the engine for a number of ticks, and prints per-tick statistics plus
//! a final summary. Useful for eyeballing the dynamics and for capturing
//! event streams to feed a visualization.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use ember::prelude::*;
use ember::ember_engine::prng::Prng;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ember", about = "Adaptive spreading-activation engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a synthetic scenario for a number of ticks.
    Run {
        /// Graph topology to generate.
        #[arg(long, value_enum, default_value_t = Topology::Random)]
        topology: Topology,
        /// Number of nodes in the synthetic graph.
        #[arg(long, default_value_t = 64)]
        nodes: usize,
        /// Ticks to simulate.
        #[arg(long, default_value_t = 100)]
        ticks: usize,
        /// Fixed tick duration in seconds (deterministic stepping).
        #[arg(long, default_value_t = 0.1)]
        dt: f64,
        /// RNG seed for graph generation and the engine.
        #[arg(long, default_value_t = 7)]
        seed: u64,
        /// Inject a fresh stimulus every N ticks.
        #[arg(long, default_value_t = 5)]
        stimulus_every: usize,
        /// Engine configuration file (TOML). Defaults apply otherwise.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the event stream as JSON lines to this file.
        #[arg(long)]
        events: Option<PathBuf>,
        /// Print the final activation/weight snapshot as JSON.
        #[arg(long, default_value_t = false)]
        dump: bool,
        /// Print a stats line every N ticks.
        #[arg(long, default_value_t = 10)]
        report_every: usize,
    },
    /// Validate a configuration file and print the resolved values.
    CheckConfig {
        /// Engine configuration file (TOML).
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Topology {
    /// A single directed chain.
    Chain,
    /// A directed ring.
    Ring,
    /// Sparse random graph (~4 out-links per node).
    Random,
}

fn load_config(path: Option<&PathBuf>, seed: u64) -> Result<SimConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    config.seed = seed;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

/// Wire a deterministic-id link; self-links are skipped.
fn wire(
    graph: &mut MemoryGraph,
    nodes: &[NodeId],
    from: usize,
    to: usize,
    link_seed: &mut u64,
    prng: &mut Prng,
) {
    if from == to {
        return;
    }
    let weight = 0.2 + 0.7 * prng.next_f64();
    graph.add_link(LinkData {
        id: LinkId::from_seed(*link_seed),
        source: nodes[from],
        target: nodes[to],
        weight,
        kind: LinkKind::Association,
        stats: LinkStats::default(),
        created_tick: 0,
    });
    *link_seed += 1;
}

fn build_graph(topology: Topology, n: usize, prng: &mut Prng) -> (MemoryGraph, Vec<NodeId>) {
    let mut graph = MemoryGraph::new();
    let nodes: Vec<NodeId> = (0..n as u64)
        .map(|i| {
            let kind = match prng.next_index(4) {
                0 => NodeKind::Percept,
                1 => NodeKind::Episode,
                _ => NodeKind::Concept,
            };
            let embedding: Vec<f32> = (0..8).map(|_| prng.next_f64() as f32).collect();
            graph.add_node(NodeData {
                id: NodeId::from_seed(i),
                kind,
                base_weight: 1.0,
                embedding: Some(embedding),
            })
        })
        .collect();

    let mut link_seed = 0u64;
    match topology {
        Topology::Chain => {
            for i in 0..n.saturating_sub(1) {
                wire(&mut graph, &nodes, i, i + 1, &mut link_seed, prng);
            }
        }
        Topology::Ring => {
            for i in 0..n {
                wire(&mut graph, &nodes, i, (i + 1) % n, &mut link_seed, prng);
            }
        }
        Topology::Random => {
            for i in 0..n {
                for _ in 0..4 {
                    let j = prng.next_index(n);
                    wire(&mut graph, &nodes, i, j, &mut link_seed, prng);
                }
            }
        }
    }
    (graph, nodes)
}

fn stats_line(stats: &TickStats) -> String {
    let rho = stats
        .rho
        .map(|r| format!("{r:.3}"))
        .unwrap_or_else(|| "  -  ".to_string());
    format!(
        "tick {:>5}  inj {:>7.4}  diff {:>4}  strides {:>4}/{:<4}  cross {:>3}  learn {:>3}  rho {}  decay {:.4}",
        stats.tick,
        stats.injected,
        stats.diffusion_transfers,
        stats.strides,
        stats.stride_budget,
        stats.crossings,
        stats.weight_updates,
        rho,
        stats.decay_rate,
    )
}

#[allow(clippy::too_many_arguments)]
fn run(
    topology: Topology,
    nodes: usize,
    ticks: usize,
    dt: f64,
    seed: u64,
    stimulus_every: usize,
    config: Option<PathBuf>,
    events: Option<PathBuf>,
    dump: bool,
    report_every: usize,
) -> Result<()> {
    let config = load_config(config.as_ref(), seed)?;
    let mut graph_prng = Prng::new(seed ^ 0x5eed);
    let (graph, node_ids) = build_graph(topology, nodes, &mut graph_prng);

    println!(
        "{} {} nodes, {} links, {} ticks",
        "ember".bold().yellow(),
        node_ids.len(),
        graph.link_count(),
        ticks
    );

    let mut engine = Engine::new(graph, config)?;
    if let Some(path) = &events {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        engine.set_sink(Box::new(JsonLinesSink::new(BufWriter::new(file))));
    }

    let channels: Vec<ChannelId> = (0..3u64).map(ChannelId::from_seed).collect();
    let mut totals = (0usize, 0usize, 0usize); // strides, crossings, updates

    for tick in 0..ticks {
        if stimulus_every > 0 && tick % stimulus_every == 0 {
            let channel = channels[engine.rng().next_index(3)];
            let mut event =
                StimulusEvent::new(channel, StimulusSource::Text, tick as u64);
            let fan = 2 + engine.rng().next_index(6);
            for _ in 0..fan {
                let node = node_ids[engine.rng().next_index(node_ids.len())];
                let similarity = engine.rng().next_f64();
                event = event.with_node(node, similarity);
            }
            engine.enqueue(event);
        }

        let stats = engine.step(dt);
        totals.0 += stats.strides;
        totals.1 += stats.crossings;
        totals.2 += stats.weight_updates;

        if report_every > 0 && tick % report_every == 0 {
            println!("{}", stats_line(&stats));
        }
    }

    println!();
    println!("{}", "summary".bold());
    println!("  strides executed   {}", totals.0.to_string().cyan());
    println!("  threshold crossings {}", totals.1.to_string().cyan());
    println!("  weight updates     {}", totals.2.to_string().cyan());
    println!(
        "  active channels    {}",
        engine.arena().len().to_string().cyan()
    );
    println!(
        "  activation entries {}",
        engine.store().entry_count().to_string().cyan()
    );
    if let Some(rho) = engine.controller().last_rho() {
        let regime = match engine.controller().regime() {
            Some(Regime::Subcritical) => "subcritical".blue(),
            Some(Regime::Critical) => "critical".green(),
            Some(Regime::Supercritical) => "supercritical".red(),
            None => "unknown".normal(),
        };
        println!("  rho                {:.4} ({regime})", rho);
    }

    if dump {
        let snapshot = engine.snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            topology,
            nodes,
            ticks,
            dt,
            seed,
            stimulus_every,
            config,
            events,
            dump,
            report_every,
        } => run(
            topology,
            nodes,
            ticks,
            dt,
            seed,
            stimulus_every,
            config,
            events,
            dump,
            report_every,
        ),
        Command::CheckConfig { config } => {
            let resolved = load_config(Some(&config), 0)?;
            println!("{}", "configuration ok".green());
            println!("{}", toml::to_string_pretty(&resolved)?);
            Ok(())
        }
    }
}
