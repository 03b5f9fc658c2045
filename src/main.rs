use anyhow::{Context, Result};
use butterfly_reach::batch::export::write_od_file;
use butterfly_reach::config::SearchStrategy;
use butterfly_reach::network::write_network;
use butterfly_reach::validate::validate_isochrones;
use butterfly_reach::{
    synthetic, BatchRequest, Breaks, Engine, EngineConfig, IsochroneRequest, Mode, NodeId,
    ScenarioOverlay,
};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "butterfly-reach")]
#[command(
    about = "Isochrones over contraction hierarchies of multi-modal networks",
    long_about = None
)]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "butterfly_reach=debug"
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum NetworkKind {
    Grid,
    Random,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic network directory
    Generate {
        /// Output directory (nodes.arrow + edges.arrow)
        output: PathBuf,
        #[arg(long, value_enum, default_value = "grid")]
        kind: NetworkKind,
        /// Grid width / random node count
        #[arg(long, default_value = "100")]
        size: usize,
        /// Grid height
        #[arg(long, default_value = "100")]
        height: usize,
        /// Grid edge cost
        #[arg(long, default_value = "10.0")]
        cost: f64,
        /// Random average out-degree
        #[arg(long, default_value = "3")]
        degree: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Build a hierarchy and print its statistics
    Build {
        network: PathBuf,
        #[arg(long, default_value = "walk")]
        mode: Mode,
    },
    /// Single-origin isochrone, printed as JSON
    Isochrone {
        network: PathBuf,
        #[arg(long)]
        origin: u32,
        #[arg(long, default_value = "walk")]
        mode: Mode,
        /// Budget in network units
        #[arg(long)]
        max_cost: f64,
        /// Comma-separated band limits
        #[arg(long, value_delimiter = ',', conflicts_with = "steps")]
        breaks: Option<Vec<f64>>,
        /// Number of equal bands up to the budget
        #[arg(long)]
        steps: Option<usize>,
        /// Scenario overlay (JSON)
        #[arg(long)]
        overlay: Option<PathBuf>,
        #[arg(long)]
        strategy: Option<SearchStrategy>,
        /// Print the edge path to this node
        #[arg(long)]
        path_to: Option<u32>,
    },
    /// Many-origin batch, written as OD rows (Arrow IPC)
    Batch {
        network: PathBuf,
        /// Output Arrow IPC file
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "walk")]
        mode: Mode,
        #[arg(long)]
        max_cost: f64,
        /// Comma-separated origin node ids
        #[arg(long, value_delimiter = ',', conflicts_with = "random")]
        origins: Option<Vec<u32>>,
        /// Number of random origins
        #[arg(long)]
        random: Option<usize>,
        #[arg(long, default_value = "42")]
        seed: u64,
        #[arg(long)]
        steps: Option<usize>,
        #[arg(long)]
        overlay: Option<PathBuf>,
    },
    /// Compare hierarchy isochrones with plain Dijkstra on random origins
    Validate {
        network: PathBuf,
        #[arg(long, default_value = "walk")]
        mode: Mode,
        #[arg(long, default_value = "200")]
        queries: usize,
        #[arg(long, default_value = "600")]
        max_cost: f64,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log filter '{level}'"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), value)?;
    println!();
    Ok(())
}

fn read_overlay(path: &Path) -> Result<Arc<ScenarioOverlay>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read overlay {}", path.display()))?;
    let overlay = ScenarioOverlay::from_json(&json)
        .with_context(|| format!("invalid overlay {}", path.display()))?;
    Ok(Arc::new(overlay))
}

/// Load the network and build the hierarchy of `mode`
fn prepare(config: EngineConfig, network: &Path, mode: Mode) -> Result<Engine> {
    let engine = Engine::new(config)?;
    let handle = engine
        .load_network(network)
        .with_context(|| format!("failed to load network from {}", network.display()))?;
    engine
        .build_hierarchy(&handle, mode)
        .with_context(|| format!("failed to build {mode} hierarchy"))?;
    Ok(engine)
}

#[derive(Serialize)]
struct IsochroneOutput<'a> {
    origin: u32,
    mode: Mode,
    max_cost: f64,
    status: butterfly_reach::Completion,
    reached: usize,
    costs: Vec<(u32, f64)>,
    bands: &'a Option<Vec<butterfly_reach::isochrone::Band>>,
    stats: &'a butterfly_reach::isochrone::SearchStats,
    path: Option<Vec<u32>>,
    geometry: Option<Vec<u64>>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json)?;

    let mut config =
        EngineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Generate {
            output,
            kind,
            size,
            height,
            cost,
            degree,
            seed,
        } => {
            let start = Instant::now();
            let network = match kind {
                NetworkKind::Grid => synthetic::grid(size, height, cost)?,
                NetworkKind::Random => synthetic::random(size, degree, seed)?,
            };
            write_network(&output, &network)
                .with_context(|| format!("failed to write network to {}", output.display()))?;
            tracing::info!(
                nodes = network.n_nodes(),
                edges = network.n_edges(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "generated network"
            );
        }
        Commands::Build { network, mode } => {
            let engine = prepare(config, &network, mode)?;
            let snapshot = engine.snapshot(mode)?;
            print_json(snapshot.hierarchy().stats())?;
        }
        Commands::Isochrone {
            network,
            origin,
            mode,
            max_cost,
            breaks,
            steps,
            overlay,
            strategy,
            path_to,
        } => {
            if let Some(strategy) = strategy {
                config.query.strategy = strategy;
            }
            let engine = prepare(config, &network, mode)?;

            let mut request = IsochroneRequest::new(NodeId(origin), mode, max_cost);
            if let Some(breaks) = breaks {
                request = request.with_breaks(Breaks::new(breaks)?);
            } else if let Some(steps) = steps {
                request = request.with_breaks(Breaks::evenly_spaced(max_cost, steps)?);
            }
            if let Some(path) = overlay {
                request = request.with_overlay(read_overlay(&path)?);
            }
            if path_to.is_some() {
                request = request.with_paths();
            }

            let result = engine.isochrone(&request)?;
            let path = path_to.and_then(|node| result.path_to(NodeId(node)));
            let geometry = match (&path, engine.current_network()) {
                (Some(path), Some(handle)) => Some(match &request.overlay {
                    Some(overlay) => overlay.geometry_refs(&handle, path),
                    None => handle.geometry_refs(path),
                }),
                _ => None,
            };
            print_json(&IsochroneOutput {
                origin,
                mode,
                max_cost,
                status: result.status,
                reached: result.len(),
                costs: result.costs().map(|(n, c)| (n.0, c)).collect(),
                bands: &result.bands,
                stats: &result.stats,
                path: path.map(|p| p.into_iter().map(|e| e.0).collect()),
                geometry,
            })?;
        }
        Commands::Batch {
            network,
            output,
            mode,
            max_cost,
            origins,
            random,
            seed,
            steps,
            overlay,
        } => {
            let engine = prepare(config, &network, mode)?;
            let n_nodes = engine
                .current_network()
                .map(|h| h.n_nodes())
                .unwrap_or_default();

            let origins: Vec<NodeId> = match (origins, random) {
                (Some(ids), _) => ids.into_iter().map(NodeId).collect(),
                (None, Some(count)) if n_nodes > 0 => {
                    let mut rng = StdRng::seed_from_u64(seed);
                    (0..count)
                        .map(|_| NodeId(rng.random_range(0..n_nodes as u32)))
                        .collect()
                }
                _ => anyhow::bail!("pass --origins or --random with a non-empty network"),
            };

            let mut request = BatchRequest::new(origins, mode, max_cost);
            if let Some(steps) = steps {
                request = request.with_breaks(Breaks::evenly_spaced(max_cost, steps)?);
            }
            if let Some(path) = overlay {
                request = request.with_overlay(read_overlay(&path)?);
            }

            let result = engine.isochrone_batch(request)?;
            for (i, outcome) in result.results.iter().enumerate() {
                if let Err(e) = outcome {
                    tracing::warn!(index = i, error = %e, "origin failed");
                }
            }
            write_od_file(&output, &result)?;
            print_json(&result.stats)?;
        }
        Commands::Validate {
            network,
            mode,
            queries,
            max_cost,
            seed,
        } => {
            let engine = prepare(config, &network, mode)?;
            let snapshot = engine.snapshot(mode)?;
            let report = validate_isochrones(&snapshot, queries, max_cost, seed);
            print_json(&report)?;
            if !report.is_ok() {
                anyhow::bail!(
                    "{} of {} isochrones differ from Dijkstra, {} broken shortcuts",
                    report.mismatching,
                    report.queries,
                    report.broken_shortcuts.len()
                );
            }
        }
    }

    Ok(())
}
