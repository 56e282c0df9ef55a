//! One-off searches from the command line (`mcs search`).
//!
//! Runs the same matchers as the HTTP service and prints one block per
//! query, in input order. `--top-k` and `--certainty` override the
//! configured values for this invocation only.

use anyhow::{bail, Result};

use crate::config::{Config, MatchMode};
use crate::context::AppContext;
use crate::corpus::sqlite::SqliteCorpus;
use crate::db;
use crate::matcher::{match_by_containment, match_by_hash};
use crate::models::{QueryOutcome, SampleRecord, VectorHit};
use crate::normalize::hash_hex;
use crate::semantic::match_by_embedding;

pub async fn run_search(
    config: &Config,
    queries: &[String],
    mode: Option<&str>,
    top_k: Option<usize>,
    certainty: Option<f64>,
) -> Result<()> {
    let mode = mode.unwrap_or(config.db.match_mode.as_str());
    match mode {
        "containment" => run_exact(config, queries, MatchMode::Containment).await,
        "hash" => run_exact(config, queries, MatchMode::Hash).await,
        "vector" => run_vector(config, queries, top_k, certainty).await,
        other => bail!(
            "Unknown search mode: {}. Use containment, hash, or vector.",
            other
        ),
    }
}

async fn run_exact(config: &Config, queries: &[String], mode: MatchMode) -> Result<()> {
    let pool = db::connect(&config.db).await?;
    let corpus = SqliteCorpus::new(pool.clone(), &config.db);
    let outcomes = match mode {
        MatchMode::Containment => match_by_containment(&corpus, queries).await,
        MatchMode::Hash => match_by_hash(&corpus, queries).await,
    };
    pool.close().await;
    let outcomes = outcomes?;

    for (i, (query, outcome)) in queries.iter().zip(&outcomes).enumerate() {
        println!("query {}: \"{}\"", i + 1, preview(query));
        if mode == MatchMode::Hash {
            println!("  sha256: {}", hash_hex(query));
        }
        print_outcome(outcome, print_record);
    }
    Ok(())
}

async fn run_vector(
    config: &Config,
    queries: &[String],
    top_k: Option<usize>,
    certainty: Option<f64>,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Vector search requires an embedding provider. Set [embedding] provider in config.");
    }
    let ctx = AppContext::build(config).await?;
    let mut params = ctx.semantic_params();
    if let Some(k) = top_k {
        params.top_k = k;
    }
    if let Some(c) = certainty {
        params.certainty = c;
    }

    let result = match &ctx.semantic {
        Some(engine) => match_by_embedding(engine, queries, &params).await,
        None => Err(crate::error::RetrievalError::Disabled("embedding provider")),
    };
    ctx.close().await;
    let outcomes = result?;

    for (i, (query, outcome)) in queries.iter().zip(&outcomes).enumerate() {
        println!("query {}: \"{}\"", i + 1, preview(query));
        print_outcome(outcome, print_hit);
    }
    Ok(())
}

fn print_outcome<T>(outcome: &QueryOutcome<T>, print: fn(usize, &T)) {
    match outcome {
        QueryOutcome::Failed(e) => println!("  error: {}", e),
        QueryOutcome::Matched(items) if items.is_empty() => println!("  No results."),
        QueryOutcome::Matched(items) => {
            for (rank, item) in items.iter().enumerate() {
                print(rank + 1, item);
            }
        }
    }
    println!();
}

fn print_record(rank: usize, r: &SampleRecord) {
    println!(
        "  {}. [id {}] {} / {}",
        rank,
        r.id,
        r.title.as_deref().unwrap_or("(untitled)"),
        r.file_name.as_deref().unwrap_or("-")
    );
    if let Some(desc) = &r.description {
        println!("      description: {}", preview(desc));
    }
    if let Some(code) = &r.malicious_code {
        println!("      code: \"{}\"", preview(code));
    }
}

fn print_hit(rank: usize, h: &VectorHit) {
    println!(
        "  {}. [{:.3}] {} / {}",
        rank,
        h.certainty,
        h.title.as_deref().unwrap_or("(untitled)"),
        h.file_name.as_deref().unwrap_or("-")
    );
    println!("      distance: {:.4}", h.distance);
    if let Some(code) = &h.code {
        println!("      code: \"{}\"", preview(code));
    }
}

/// Single-line excerpt, at most 80 characters.
fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(80) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}
