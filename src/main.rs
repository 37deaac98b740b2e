//! kgpipe - knowledge-graph ingestion, analytics and visualization
//!
//! Reads the graph an upstream RAG indexer leaves in its working directory and
//! loads it into Neo4j, analyses it, or renders it.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kg_pipeline::error::PipelineError;
use kg_pipeline::export::{self, Scene};
use kg_pipeline::graph::{self, interchange, ParsedGraph};
use kg_pipeline::ingest::{IngestionCoordinator, IngestionReport, RunStatus};
use kg_pipeline::neo4j::GraphStore;
use kg_pipeline::{analytics, artifacts, layout, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "kgpipe")]
#[command(about = "Knowledge-graph ingestion, analytics and layout pipeline")]
struct Cli {
    /// YAML config file (default: ./kgpipe.yaml)
    #[arg(short, long, global = true, env = "KGPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines (also LOG_FORMAT=json)
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert the GraphML output into the intermediate graph_data.json
    Convert {
        /// GraphML file (default: <working_dir>/graph_chunk_entity_relation.graphml)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (default: <working_dir>/graph_data.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upsert the graph into Neo4j
    Ingest {
        /// Graph document (.graphml or .json)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Re-run only the failed batches listed in this report
        #[arg(long, value_name = "REPORT")]
        retry_failed: Option<PathBuf>,

        /// Where to write the run report (default: <working_dir>/ingest_report.json)
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print counts, relationship types and the most connected entities
    Analyze {
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read vdb_entities.json / vdb_relationships.json instead of a graph document
        #[arg(long, conflicts_with = "input")]
        vdb: bool,

        /// Number of entities in the centrality ranking
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Statistics file (default: <working_dir>/graph_stats.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Lay out the graph and render it to SVG or HTML
    Visualize {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(long, conflicts_with = "input")]
        vdb: bool,

        /// .svg or .html (default: <working_dir>/knowledge_graph.html)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Layout seed (overrides config)
        #[arg(long)]
        seed: Option<u64>,

        /// Layout iterations (overrides config)
        #[arg(long)]
        iterations: Option<usize>,

        /// Skip the force-directed layout and place nodes on a circle
        #[arg(long)]
        no_layout: bool,
    },

    /// Show stored relationships with their properties
    Inspect {
        /// Maximum number of relationships to print
        #[arg(short, long, default_value = "25")]
        limit: usize,
    },

    /// Export the stored graph to an intermediate JSON document
    Dump {
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kg_pipeline=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let log_json = cli.log_json
        || std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    init_tracing(log_json);

    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Convert { input, output } => run_convert(&config, input, output),
        Commands::Ingest {
            input,
            retry_failed,
            report,
        } => run_ingest(&config, input, retry_failed, report).await,
        Commands::Analyze {
            input,
            vdb,
            top_k,
            output,
        } => run_analyze(&config, input, vdb, top_k, output),
        Commands::Visualize {
            input,
            vdb,
            output,
            seed,
            iterations,
            no_layout,
        } => run_visualize(&config, input, vdb, output, seed, iterations, no_layout),
        Commands::Inspect { limit } => run_inspect(&config, limit).await,
        Commands::Dump { output } => run_dump(&config, &output).await,
    }
}

/// Load the input graph and apply the dangling-reference policy.
fn load_input(config: &Config, input: Option<PathBuf>, vdb: bool) -> Result<ParsedGraph> {
    let parsed = if vdb {
        let entities = config.artifact(artifacts::VDB_ENTITIES);
        let relationships = config.artifact(artifacts::VDB_RELATIONSHIPS);
        interchange::load_vdb_export(&entities, &relationships)
            .with_context(|| format!("Failed to load vector-db export from {}", config.working_dir.display()))?
    } else {
        let path = input.unwrap_or_else(|| config.artifact(artifacts::GRAPHML));
        graph::load_graph(&path).with_context(|| format!("Failed to load {}", path.display()))?
    };
    info!(
        nodes = parsed.graph.node_count(),
        edges = parsed.graph.edge_count(),
        dangling = parsed.dangling.len(),
        "Graph loaded"
    );
    Ok(parsed.enforce(config.dangling)?)
}

fn run_convert(config: &Config, input: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let parsed = load_input(config, input, false)?;
    let output = output.unwrap_or_else(|| config.artifact(artifacts::GRAPH_JSON));
    interchange::write_json(&parsed.graph, &output)?;
    println!(
        "Wrote {} nodes and {} edges to {}",
        parsed.graph.node_count(),
        parsed.graph.edge_count(),
        output.display()
    );
    Ok(())
}

async fn run_ingest(
    config: &Config,
    input: Option<PathBuf>,
    retry_failed: Option<PathBuf>,
    report_path: Option<PathBuf>,
) -> Result<()> {
    // Parse errors abort here, before any store I/O.
    let parsed = load_input(config, input, false)?;
    let previous = retry_failed
        .as_deref()
        .map(|path| {
            IngestionReport::read_json(path)
                .with_context(|| format!("Failed to read report {}", path.display()))
        })
        .transpose()?;

    let options = config.ingest_options()?;
    let store: Arc<dyn GraphStore> = Arc::new(config.neo4j_client()?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received: finishing in-flight batches, dispatching no more");
            on_signal.cancel();
        }
    });

    options
        .retry
        .run("schema", &cancel, || store.ensure_schema())
        .await
        .result
        .context("Failed to create the :Entity(id) constraint")?;

    let coordinator = IngestionCoordinator::new(store, options).with_cancellation(cancel);
    let report = match &previous {
        Some(previous) => coordinator.rerun_failed(&parsed, previous).await?,
        None => coordinator.run(&parsed).await,
    };

    let report_path = report_path.unwrap_or_else(|| config.artifact(artifacts::INGEST_REPORT));
    if let Some(dir) = report_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    report
        .write_json(&report_path)
        .with_context(|| format!("Failed to write report {}", report_path.display()))?;

    println!(
        "Run {}: {} batches attempted, {} succeeded, {} failed, {} skipped; {} items upserted; {} dangling edges excluded",
        report.run_id,
        report.attempted(),
        report.succeeded(),
        report.failed(),
        report.skipped(),
        report.items_upserted(),
        report.dangling.len()
    );
    for batch in report.failed_batches() {
        println!("  failed {} batch #{} ({} items, {} attempts): {:?}", batch.kind, batch.index, batch.size, batch.attempts, batch.status);
    }

    match report.status {
        RunStatus::Succeeded => Ok(()),
        RunStatus::Cancelled => Err(PipelineError::CancelledRun.into()),
        RunStatus::PartiallyFailed | RunStatus::Running => bail!(
            "{} batch(es) failed; re-run them with `kgpipe ingest --retry-failed {}`",
            report.failed(),
            report_path.display()
        ),
    }
}

fn run_analyze(
    config: &Config,
    input: Option<PathBuf>,
    vdb: bool,
    top_k: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let parsed = load_input(config, input, vdb)?;
    let stats = analytics::analyze(&parsed.graph, top_k.unwrap_or(config.top_k))?;

    println!("Entities:      {}", stats.entity_count);
    println!("Relationships: {}", stats.relationship_count);
    println!("Components:    {}", stats.component_count);
    println!("Isolated:      {}", stats.isolated_nodes.len());
    println!("\nRelationship types:");
    for k in &stats.relationship_types {
        println!("  {:<30} {}", k.kind, k.count);
    }
    println!("\nMost connected entities:");
    for (rank, r) in stats.centrality.iter().enumerate() {
        println!("  {}. {} ({} connections)", rank + 1, r.id, r.degree);
    }

    let output = output.unwrap_or_else(|| config.artifact(artifacts::GRAPH_STATS));
    stats.write_json(&output)?;
    info!("Statistics written to {}", output.display());
    Ok(())
}

fn run_visualize(
    config: &Config,
    input: Option<PathBuf>,
    vdb: bool,
    output: Option<PathBuf>,
    seed: Option<u64>,
    iterations: Option<usize>,
    no_layout: bool,
) -> Result<()> {
    let parsed = load_input(config, input, vdb)?;
    let graph = &parsed.graph;
    let stats = analytics::analyze(graph, config.top_k)?;

    let mut params = config.layout_params();
    params.seed = seed.unwrap_or(params.seed);
    params.iterations = iterations.unwrap_or(params.iterations);
    let computed = if no_layout {
        None
    } else {
        Some(layout::compute(graph, params)?)
    };

    let mut scene = Scene::new(graph)
        .with_stats(&stats)
        .with_size(config.layout_width, config.layout_height);
    if let Some(l) = &computed {
        scene = scene.with_layout(l);
    }

    let output = output.unwrap_or_else(|| config.artifact(artifacts::VISUALIZATION));
    export::export_to_path(&scene, &output)?;
    println!("Visualization written to {}", output.display());
    Ok(())
}

async fn run_inspect(config: &Config, limit: usize) -> Result<()> {
    let client = config.neo4j_client()?;
    let stored = client.export().await.context("Failed to read graph from Neo4j")?;

    println!("Nodes: {}", stored.node_count());
    println!("Relationships: {}", stored.edge_count());
    for edge in stored.edges().iter().take(limit) {
        println!("\n{} -[{}]-> {}", edge.source, edge.kind(), edge.target);
        println!("  weight: {}", edge.weight);
        if let Some(d) = &edge.description {
            println!("  description: {}", d);
        }
        if !edge.keywords.is_empty() {
            println!("  keywords: {}", edge.keywords.join(", "));
        }
        for (k, v) in &edge.extra {
            println!("  {}: {}", k, v);
        }
        for id in [&edge.source, &edge.target] {
            if let Some(node) = stored.node(id) {
                println!(
                    "  [{}] type={} description={}",
                    node.id,
                    node.entity_type.as_deref().unwrap_or("-"),
                    node.description.as_deref().unwrap_or("-")
                );
            }
        }
    }
    if stored.edge_count() > limit {
        println!("\n... {} more", stored.edge_count() - limit);
    }
    Ok(())
}

async fn run_dump(config: &Config, output: &std::path::Path) -> Result<()> {
    let client = config.neo4j_client()?;
    let stored = client.export().await.context("Failed to read graph from Neo4j")?;
    interchange::write_json(&stored, output)?;
    println!(
        "Dumped {} nodes and {} edges to {}",
        stored.node_count(),
        stored.edge_count(),
        output.display()
    );
    Ok(())
}
