//! Corpus ingestion from extraction output.
//!
//! The extraction pipeline writes one JSON object per line with `file_name`,
//! `title`, `code` (or `malicious_code`) and `describe` (or `description`).
//! Lookup columns are derived here, at write time, with the same normalizer
//! the matchers use at query time.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;

use crate::config::Config;
use crate::corpus::sqlite::SqliteCorpus;
use crate::db;
use crate::migrate::create_schema;
use crate::models::NewSample;
use crate::normalize::normalize;

/// Result of parsing a JSONL file.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub samples: Vec<NewSample>,
    /// `(line number, reason)` for every rejected line, 1-based.
    pub rejected: Vec<(usize, String)>,
    pub blank: usize,
}

/// Parse JSONL from `reader`. Blank lines are skipped; malformed lines and
/// samples whose code is only whitespace are rejected with their line number.
pub fn parse_jsonl(reader: impl BufRead) -> Result<ParsedBatch> {
    let mut batch = ParsedBatch::default();
    for (i, line) in reader.lines().enumerate() {
        let line_no = i + 1;
        let line = line.with_context(|| format!("Failed to read line {}", line_no))?;
        if line.trim().is_empty() {
            batch.blank += 1;
            continue;
        }
        match serde_json::from_str::<NewSample>(&line) {
            Ok(sample) if normalize(&sample.malicious_code).is_empty() => {
                batch.rejected.push((line_no, "code is empty".to_string()));
            }
            Ok(sample) => batch.samples.push(sample),
            Err(e) => batch.rejected.push((line_no, e.to_string())),
        }
    }
    Ok(batch)
}

/// `mcs load`: parse `path` and insert every valid sample in one transaction.
pub async fn load_jsonl(config: &Config, path: &Path, dry_run: bool) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let batch = parse_jsonl(std::io::BufReader::new(file))?;

    for (line_no, reason) in &batch.rejected {
        tracing::warn!(line = line_no, "skipping line: {}", reason);
    }

    if dry_run {
        println!("load {} (dry-run)", path.display());
        println!("  valid samples: {}", batch.samples.len());
        println!("  rejected lines: {}", batch.rejected.len());
        return Ok(());
    }

    let pool = db::connect(&config.db).await?;
    create_schema(&pool, &config.db.table, config.db.match_mode).await?;
    let corpus = SqliteCorpus::new(pool.clone(), &config.db);
    let inserted = corpus.insert_samples(&batch.samples).await;
    pool.close().await;
    let inserted = inserted.context("Failed to insert samples")?;

    println!("load {}", path.display());
    println!("  inserted: {}", inserted);
    println!("  rejected lines: {}", batch.rejected.len());
    println!("  match mode: {}", config.db.match_mode.as_str());
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reports_line_numbers() {
        let input = concat!(
            "{\"file_name\":\"a.pdf\",\"title\":\"t\",\"code\":\"import os\",\"describe\":\"d\"}\n",
            "\n",
            "not json\n",
            "{\"malicious_code\":\" \\n \"}\n",
            "{\"malicious_code\":\"eval(x)\"}\n",
        );
        let batch = parse_jsonl(input.as_bytes()).unwrap();
        assert_eq!(batch.samples.len(), 2);
        assert_eq!(batch.blank, 1);
        assert_eq!(
            batch.rejected.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![3, 4]
        );
        assert_eq!(batch.samples[1].malicious_code, "eval(x)");
    }

    #[test]
    fn test_missing_code_field_is_rejected() {
        let batch = parse_jsonl("{\"title\":\"no code\"}\n".as_bytes()).unwrap();
        assert!(batch.samples.is_empty());
        assert_eq!(batch.rejected[0].0, 1);
    }
}
