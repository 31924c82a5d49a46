mod api;
mod cancel;
mod config;
mod db;
mod error;
mod index;
mod ingest;
mod markup;
mod model;
mod parser;
mod query;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::{Corpus, Settings};
use crate::index::SearchIndex;
use crate::ingest::Scope;
use crate::query::{parse_query, SearchOptions};

#[derive(Parser)]
#[command(name = "kant_search", about = "Kant Academy Edition ingestion and search")]
struct Cli {
    /// Config file (default: ./kant-search.toml if present)
    #[arg(short, long, global = true, env = "KS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve,
    /// Ingest one volume XML file
    Ingest {
        file: PathBuf,
        /// Expected volume number (default: taken from <band nr>)
        #[arg(short, long)]
        volume: Option<i32>,
    },
    /// Ingest every .xml file of a directory
    IngestDir { dir: PathBuf },
    /// Run a query against the index
    Search {
        query: String,
        /// Use the German stemming analyzer
        #[arg(long)]
        stemming: bool,
        #[arg(long)]
        headings: bool,
        #[arg(long)]
        footnotes: bool,
        #[arg(long)]
        summaries: bool,
        /// Restrict to work codes (repeatable)
        #[arg(short, long = "work")]
        works: Vec<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Show storage statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Serve => {
            let (_, index) = open_store(&settings)?;
            let corpus = Corpus::load(&settings.corpus.metadata)?;
            info!(
                volumes = corpus.volumes().len(),
                works = corpus.volumes().iter().map(|v| v.works.len()).sum::<usize>(),
                "loaded corpus metadata"
            );
            let state = api::AppState {
                corpus: Arc::new(corpus),
                db_path: Arc::new(settings.storage.db_path.clone()),
                index,
                ingest_lock: Arc::new(tokio::sync::Mutex::new(())),
                max_results: settings.search.max_results,
            };
            api::serve(state, &settings.server.bind).await
        }
        Commands::Ingest { file, volume } => {
            let (conn, index) = open_store(&settings)?;
            let corpus = Corpus::load(&settings.corpus.metadata)?;
            let bytes = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let flat = parser::process_volume(&bytes, volume, &corpus, &CancelToken::new())?;
            ingest::persist(&conn, &index, &flat, Scope::Volume)?;
            println!(
                "Ingested volume {}: {} works, {} documents",
                flat.volume.volume_number,
                flat.works.len(),
                flat.contents.len()
            );
            Ok(())
        }
        Commands::IngestDir { dir } => {
            let (conn, index) = open_store(&settings)?;
            let corpus = Corpus::load(&settings.corpus.metadata)?;
            let files = xml_files(&dir)?;
            if files.is_empty() {
                println!("No .xml files in {}", dir.display());
                return Ok(());
            }
            println!("Ingesting {} files...", files.len());
            let counts = ingest_files(&conn, &index, &corpus, &files)?;
            counts.print();
            Ok(())
        }
        Commands::Search {
            query,
            stemming,
            headings,
            footnotes,
            summaries,
            works,
            limit,
        } => {
            let (conn, index) = open_store(&settings)?;
            let options = SearchOptions {
                include_headings: headings,
                include_footnotes: footnotes,
                include_summaries: summaries,
                with_stemming: stemming,
                work_codes: (!works.is_empty()).then_some(works),
            };
            let ast = parse_query(&query)?;
            let q = index.build_query(&ast, &options)?;
            let keys = index.search(q.as_ref(), settings.search.max_results)?;
            if keys.is_empty() {
                println!("No matches.");
                return Ok(());
            }
            let hits = db::fetch_by_keys(&conn, &keys[..keys.len().min(limit)])?;

            println!(
                "{:>3} | {:<8} | {:>5} | {:<9} | {:<9} | {}",
                "#", "Work", "Ord", "Kind", "Pages", "Text"
            );
            println!("{}", "-".repeat(100));
            for (i, c) in hits.iter().enumerate() {
                let pages = c
                    .pages
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                println!(
                    "{:>3} | {:<8} | {:>5} | {:<9} | {:<9} | {}",
                    i + 1,
                    c.work_code,
                    c.ordinal,
                    c.kind.as_str(),
                    truncate(&pages, 9),
                    truncate(&c.search_text, 50)
                );
            }
            println!("\n{} matches ({} shown)", keys.len(), hits.len());
            Ok(())
        }
        Commands::Stats => {
            let (conn, index) = open_store(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Volumes:   {}", s.volumes);
            println!("Works:     {}", s.works);
            println!("Documents: {}", s.contents);
            for (kind, n) in &s.by_kind {
                println!("  {:<10} {}", kind, n);
            }
            println!("Indexed:   {}", index.num_docs());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(settings: &Settings) -> anyhow::Result<(rusqlite::Connection, SearchIndex)> {
    let conn = db::connect(&settings.storage.db_path)?;
    db::init_schema(&conn)?;
    let index = SearchIndex::open(&settings.storage.index_dir, settings.search.writer_memory)?;
    Ok((conn, index))
}

fn xml_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("xml")))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

struct IngestCounts {
    volumes: usize,
    works: usize,
    contents: usize,
    failed: usize,
}

impl IngestCounts {
    fn print(&self) {
        println!(
            "Saved {} volumes, {} works, {} documents ({} files failed).",
            self.volumes, self.works, self.contents, self.failed,
        );
    }
}

/// Pipeline in parallel, persistence sequential.
fn ingest_files(
    conn: &rusqlite::Connection,
    index: &SearchIndex,
    corpus: &Corpus,
    files: &[PathBuf],
) -> anyhow::Result<IngestCounts> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut counts = IngestCounts {
        volumes: 0,
        works: 0,
        contents: 0,
        failed: 0,
    };

    let cancel = CancelToken::new();
    for chunk in files.chunks(4) {
        let results: Vec<_> = chunk
            .par_iter()
            .map(|path| {
                let bytes = std::fs::read(path)?;
                Ok(parser::process_volume(&bytes, None, corpus, &cancel)?)
            })
            .collect::<Vec<anyhow::Result<_>>>();

        for (path, result) in chunk.iter().zip(results) {
            match result {
                Ok(flat) => {
                    ingest::persist(conn, index, &flat, Scope::Volume)?;
                    counts.volumes += 1;
                    counts.works += flat.works.len();
                    counts.contents += flat.contents.len();
                }
                Err(e) => {
                    warn!(file = %path.display(), "skipped: {e:#}");
                    counts.failed += 1;
                }
            }
            if let Some(name) = path.file_name() {
                pb.set_message(name.to_string_lossy().into_owned());
            }
            pb.inc(1);
        }
    }

    pb.finish_and_clear();
    Ok(counts)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
