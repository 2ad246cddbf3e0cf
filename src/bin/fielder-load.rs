//! fielder-load: run one knowledge-graph load.
//!
//! Usage:
//!   fielder-load --config fielder.toml
//!   fielder-load --builtin-geography --entities usda.json --crosswalk crosswalk.json
//!
//! Exit codes: 0 on success (individual record skips included), 1 on a
//! configuration or input error, 2 when the graph store is unreachable.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use fielder_graph::config::{InputPaths, CONFIG_ENV};
use fielder_graph::seed::SeedCatalog;
use fielder_graph::{
    EdgePolicy, Error, LoadInput, Loader, LoaderConfig, MemoryStore, RetryingStore, RunSummary,
};

/// Load growers, packinghouses and retailers into the knowledge graph
#[derive(Parser, Debug)]
#[command(name = "fielder-load")]
#[command(about = "Idempotent supply-chain knowledge graph load with rule inference")]
struct Args {
    /// TOML configuration file
    #[arg(long, short = 'c', env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Geography seed catalog (repeatable)
    #[arg(long)]
    geography: Vec<PathBuf>,

    /// Taxonomy seed catalog (repeatable)
    #[arg(long)]
    taxonomy: Vec<PathBuf>,

    /// Primary entity file, JSON array (repeatable)
    #[arg(long, short = 'e')]
    entities: Vec<PathBuf>,

    /// Enrichment file, JSON array (repeatable)
    #[arg(long)]
    enrichments: Vec<PathBuf>,

    /// Identity crosswalk, JSON array of {externalId, canonicalId}
    #[arg(long)]
    crosswalk: Option<PathBuf>,

    /// Rule definitions; the built-in rules are used when omitted
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Also load the built-in US states and USDA zones
    #[arg(long)]
    builtin_geography: bool,

    /// Linker edge policy: "cumulative" or "exact_set"
    #[arg(long, value_parser = parse_edge_policy)]
    edge_policy: Option<EdgePolicy>,

    /// JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Print the run summary as JSON instead of a table
    #[arg(long)]
    summary_json: bool,
}

fn parse_edge_policy(s: &str) -> Result<EdgePolicy, String> {
    serde_json::from_value(serde_json::Value::String(s.replace('-', "_")))
        .map_err(|_| format!("unknown edge policy '{s}' (expected cumulative or exact_set)"))
}

fn init_tracing(json: bool, default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Command-line paths extend the configured ones.
fn merge_inputs(mut paths: InputPaths, args: &Args) -> InputPaths {
    paths.geography.extend(args.geography.iter().cloned());
    paths.taxonomy.extend(args.taxonomy.iter().cloned());
    paths.entities.extend(args.entities.iter().cloned());
    paths.enrichments.extend(args.enrichments.iter().cloned());
    if args.crosswalk.is_some() {
        paths.crosswalk = args.crosswalk.clone();
    }
    if args.rules.is_some() {
        paths.rules = args.rules.clone();
    }
    paths
}

fn print_summary(summary: &RunSummary) {
    println!("Seed catalogs:   {} nodes, {} edges", summary.seed_nodes, summary.seed_edges);
    println!(
        "Entities:        {} created, {} updated, {} enriched",
        summary.entities_created, summary.entities_updated, summary.entities_enriched
    );
    println!(
        "Relationships:   {} linked ({} new, {} retracted)",
        summary.relationships_linked, summary.relationships_created, summary.relationships_retracted
    );
    println!(
        "Inference:       {} edges ({} new)",
        summary.inference_edges, summary.inference_created
    );
    for rule in &summary.inference.rules {
        match &rule.error {
            Some(err) => println!("  {:<32} FAILED: {err}", rule.rule),
            None => println!(
                "  {:<32} matched {:>6}  produced {:>6}  skipped {:>4}",
                rule.rule, rule.matched, rule.produced, rule.skipped
            ),
        }
    }

    println!("\nSkipped records: {}", summary.skips.total());
    for (kind, count) in summary.skips.iter() {
        println!("  {:<20} {count:>6}", format!("{kind:?}"));
    }

    println!("\nNode labels:");
    for (label, count) in &summary.stats.labels {
        println!("  {label:<20} {count:>8}");
    }
    println!("Relationship types:");
    for (rel_type, count) in &summary.stats.relationship_types {
        println!("  {rel_type:<20} {count:>8}");
    }
    println!("\nNodes:           {}", summary.stats.node_count);
    println!("Relationships:   {}", summary.stats.relationship_count);
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => LoaderConfig::from_file(path),
        None => Ok(LoaderConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fielder-load: {e}");
            return ExitCode::from(1);
        }
    };
    init_tracing(args.json_logs || config.logging.json, &config.logging.filter);

    let paths = merge_inputs(config.inputs.clone(), &args);
    let mut input = match LoadInput::from_paths(&paths) {
        Ok(input) => input,
        Err(e) => {
            tracing::error!(error = %e, "cannot read inputs");
            return ExitCode::from(1);
        }
    };
    if args.builtin_geography {
        let mut builtin = SeedCatalog::us_states();
        builtin.extend(SeedCatalog::usda_zones());
        input.geography.insert(0, builtin);
    }

    let store = RetryingStore::new(MemoryStore::new(), config.store.retry);
    let policy = args.edge_policy.unwrap_or(config.linker.edge_policy);
    let loader = Loader::new(store).with_edge_policy(policy);

    match loader.run(input).await {
        Ok(summary) => {
            if args.summary_json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        tracing::error!(error = %e, "cannot serialize summary");
                        return ExitCode::from(1);
                    }
                }
            } else {
                print_summary(&summary);
            }
            ExitCode::SUCCESS
        }
        Err(e @ Error::Connectivity(_)) => {
            tracing::error!(error = %e, "graph store unreachable, aborting");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!(error = %e, "load aborted");
            ExitCode::from(1)
        }
    }
}
