//! Multi-modal RAG CLI
//!
//! Command-line interface for indexing a product catalog, searching it and
//! evaluating retrieval quality.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use multimodal_rag::{
    build_from_config, evaluate, load_cases, FilterPredicate, FilterSchema, Modality, RagConfig,
    Result, SearchOutcome, Strategy,
};

#[derive(Parser)]
#[command(name = "mmrag")]
#[command(author, version, about = "Multi-modal product search", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "mmrag.toml", env = "MMRAG_CONFIG")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "mmrag.toml")]
        output: String,
    },

    /// Build the index and report what was indexed
    Index,

    /// Search the catalog
    Search {
        /// Query text
        query: String,

        /// Number of results (defaults to search.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Metadata filter as JSON, e.g. '{"color": "red", "price": {"$lt": 200}}'
        #[arg(short, long, conflicts_with = "smart")]
        filter: Option<String>,

        /// Extract the filter from the query with the language model
        #[arg(long)]
        smart: bool,

        /// Modalities to rank over (defaults to search.modalities)
        #[arg(short, long, value_enum)]
        modality: Vec<Modality>,
    },

    /// Answer a question about the catalog
    Ask {
        /// Question text
        question: String,
    },

    /// Evaluate a search strategy against labelled queries
    Eval {
        /// Strategy to evaluate
        #[arg(short, long, value_enum, default_value = "baseline")]
        strategy: Strategy,

        /// Evaluation cases (defaults to evaluation.cases_path)
        #[arg(long)]
        cases: Option<PathBuf>,

        /// JSON report output (defaults to evaluation.report_path)
        #[arg(long)]
        report: Option<PathBuf>,

        /// Results per query (defaults to search.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: &str) -> Result<RagConfig> {
    if Path::new(path).exists() {
        info!("Loading configuration from: {}", path);
        RagConfig::load(path)
    } else {
        info!("Using default configuration");
        Ok(RagConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { output } => {
            info!("Writing default configuration to: {}", output);
            RagConfig::default().save(&output)?;
            info!("Configuration saved successfully");
        }

        Commands::Index => {
            let config = load_config(&cli.config)?;
            let rag = build_from_config(&config).await?;
            let snapshot = rag.snapshot();
            let stats = snapshot.stats();
            println!("embedding model: {}", snapshot.embedding_model());
            println!("products: {}", stats.products);
            println!(
                "text vectors: {} ({} skipped)",
                stats.text_indexed, stats.text_skipped
            );
            println!(
                "image vectors: {} ({} skipped)",
                stats.image_indexed, stats.images_skipped
            );
        }

        Commands::Search {
            query,
            top_k,
            filter,
            smart,
            modality,
        } => {
            let mut config = load_config(&cli.config)?;
            if !modality.is_empty() {
                config.search.modalities = modality;
            }
            // Parse before the (slow) index build so a typo fails fast
            let filter = filter
                .map(|raw| -> Result<FilterPredicate> {
                    let value: serde_json::Value = serde_json::from_str(&raw)?;
                    FilterPredicate::from_json_strict(&value, &FilterSchema::open())
                })
                .transpose()?;
            let k = top_k.unwrap_or(config.search.top_k);

            let rag = build_from_config(&config).await?;
            let outcome = match (&filter, smart) {
                (Some(filter), _) => rag.hybrid_search(&query, filter, k).await?,
                (None, true) => rag.smart_search(&query, k).await?,
                (None, false) => rag.search(&query, k).await?,
            };
            print_outcome(&outcome);
        }

        Commands::Ask { question } => {
            let config = load_config(&cli.config)?;
            let rag = build_from_config(&config).await?;
            match rag.answer_question(&question).await {
                Ok(answer) => {
                    println!("{}", answer.answer);
                    println!();
                    println!("sources: {}", answer.sources.join(", "));
                }
                Err(e) => {
                    error!("Could not answer question: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Eval {
            strategy,
            cases,
            report,
            top_k,
        } => {
            let config = load_config(&cli.config)?;
            let cases_path = cases.unwrap_or_else(|| config.evaluation.cases_path.clone());
            let report_path = report.unwrap_or_else(|| config.evaluation.report_path.clone());
            let cases = load_cases(&cases_path)?;
            info!("Loaded {} cases from {}", cases.len(), cases_path.display());
            let k = top_k.unwrap_or(config.search.top_k);

            let rag = build_from_config(&config).await?;
            let report = evaluate(&cases, &rag.retriever(strategy), k).await?;
            report.render_summary();
            report.write_json(&report_path)?;
            println!();
            println!("wrote JSON report to {}", report_path.display());
        }
    }

    Ok(())
}

fn print_outcome(outcome: &SearchOutcome) {
    if !outcome.filter.is_empty() {
        println!("filter: {}", outcome.filter);
    }
    if outcome.filter_relaxed {
        println!("(no product matched the filter; showing unfiltered results)");
    }
    if outcome.results.is_empty() {
        println!("no results");
        return;
    }
    for result in &outcome.results {
        let record = &result.record;
        println!(
            "{}. {} [{}] score {:.3} ({})",
            result.rank, record.name, record.id, result.score, result.modality
        );
        println!(
            "   {}, {}, ${:.2}: {}",
            record.category, record.color, record.price, record.description
        );
    }
}
