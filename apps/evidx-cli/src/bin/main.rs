use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;

use evidx_cli::logging;
use evidx_core::config::{resolve_with_base, Config, Settings};
use evidx_core::layout::IndexLayout;
use evidx_core::manifest::IndexManifest;
use evidx_core::types::SourceType;
use evidx_embed::provider_from_settings;
use evidx_hybrid::{
    export, EngineConfig, ExportFormat, HybridSearchEngine, SearchFilters, SearchMode,
    SearchRequest,
};
use evidx_index::{FsDocumentSource, Indexer};

#[derive(Parser)]
#[command(
    name = "evidx",
    version,
    about = "Hybrid keyword + vector search over research runs and a knowledge base"
)]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,
    #[arg(long, global = true, env = "EVIDX_INDEX_DIR")]
    index_dir: Option<String>,
    #[arg(long, global = true)]
    kb_dir: Option<String>,
    #[arg(long, global = true)]
    runs_dir: Option<String>,
    /// Show a progress bar while embedding
    #[arg(long, global = true)]
    progress: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Re-index everything into a fresh generation
    Rebuild,
    /// Index new runs and knowledge-base changes
    Update,
    /// Show the published generation and its manifest
    Status,
    /// Query the index
    Search(SearchArgs),
}

#[derive(Args)]
struct SearchArgs {
    query: String,
    #[arg(long, default_value = "hybrid")]
    mode: SearchMode,
    #[arg(long, default_value_t = 10)]
    top_k: usize,
    #[arg(long)]
    year_from: Option<i32>,
    #[arg(long)]
    year_to: Option<i32>,
    #[arg(long = "tier")]
    tiers: Vec<String>,
    #[arg(long = "oa", action = ArgAction::Append, value_parser = clap::value_parser!(bool))]
    oa: Vec<bool>,
    #[arg(long = "source-type")]
    source_types: Vec<String>,
    #[arg(long = "topic")]
    topics: Vec<String>,
    #[arg(long, default_value = "md")]
    format: ExportFormat,
}

impl SearchArgs {
    fn request(&self) -> SearchRequest {
        let filters = SearchFilters {
            year_from: self.year_from,
            year_to: self.year_to,
            tier_in: self.tiers.iter().cloned().collect(),
            oa_in: self.oa.iter().copied().collect(),
            source_type_in: self
                .source_types
                .iter()
                .map(|s| SourceType::from(s.as_str()))
                .collect(),
            topics_any: self.topics.iter().cloned().collect(),
        };
        SearchRequest::new(&self.query)
            .with_mode(self.mode)
            .with_top_k(self.top_k)
            .with_filters(filters)
    }
}

struct Paths {
    index: PathBuf,
    kb: PathBuf,
    runs: PathBuf,
}

fn resolve_paths(cli: &Cli, settings: &Settings) -> Paths {
    let base = &cli.config_dir;
    let pick = |flag: &Option<String>, configured: &str| {
        resolve_with_base(base, flag.as_deref().unwrap_or(configured))
    };
    Paths {
        index: pick(&cli.index_dir, &settings.paths.index_dir),
        kb: pick(&cli.kb_dir, &settings.paths.kb_dir),
        runs: pick(&cli.runs_dir, &settings.paths.runs_dir),
    }
}

fn print_manifest(label: &str, manifest: &IndexManifest) {
    println!(
        "{label}: {} chunks, {} runs, model {} (dropped {}, updated {})",
        manifest.chunks,
        manifest.indexed_runs.len(),
        manifest.embedding_model,
        manifest.dropped_chunks,
        manifest.updated_at
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(&cli.config_dir).context("loading configuration")?;
    let settings = config.settings().context("reading settings")?;
    logging::init_with_settings(&settings.logging);

    let paths = resolve_paths(&cli, &settings);
    debug!(
        "index {}, kb {}, runs {}",
        paths.index.display(),
        paths.kb.display(),
        paths.runs.display()
    );
    let layout = IndexLayout::new(paths.index.clone());

    match &cli.command {
        Command::Rebuild | Command::Update => {
            let embedder = provider_from_settings(&settings.embedding)
                .context("creating embedding provider")?;
            let source = FsDocumentSource::new(paths.kb.clone(), paths.runs.clone());
            let indexer = Indexer::new(layout, source, embedder, settings.chunking.clone())
                .with_progress(cli.progress);
            if matches!(cli.command, Command::Rebuild) {
                let manifest = indexer.rebuild().context("rebuild failed")?;
                print_manifest("rebuilt", &manifest);
            } else {
                let manifest = indexer.update().context("update failed")?;
                print_manifest("updated", &manifest);
            }
        }
        Command::Status => match layout.current()? {
            Some(generation) => {
                println!("index: {}", paths.index.display());
                println!("generation: {}", generation.name());
                match IndexManifest::load(&generation.manifest())? {
                    Some(manifest) => println!("{}", serde_json::to_string_pretty(&manifest)?),
                    None => println!("manifest: missing"),
                }
            }
            None => println!("no index published at {}", paths.index.display()),
        },
        Command::Search(args) => {
            let embedder = provider_from_settings(&settings.embedding)
                .context("creating embedding provider")?;
            let engine =
                HybridSearchEngine::new(layout, embedder, EngineConfig::from(&settings.search));
            let response = engine.search(&args.request());
            if !response.index_available {
                eprintln!("no index at {}; run `evidx rebuild` first", paths.index.display());
            }
            for warning in &response.warnings {
                eprintln!("warning: {warning}");
            }
            print!("{}", export(&response.results, args.format)?);
            eprintln!(
                "{} results from {} candidates in {} ms",
                response.results.len(),
                response.total_candidates,
                response.took_ms
            );
        }
    }
    Ok(())
}
