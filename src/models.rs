//! Core data models used throughout the retrieval service.
//!
//! Samples are written once by ingestion and only read afterwards. Queries and
//! their outcomes live for a single request.

use serde::{Deserialize, Serialize};

/// A sample as produced by the extraction pipeline, before it has an id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSample {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(alias = "code")]
    pub malicious_code: String,
    #[serde(default, alias = "describe")]
    pub description: Option<String>,
}

/// Metadata of a stored sample as returned by the relational matchers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    pub id: i64,
    pub file_name: Option<String>,
    pub title: Option<String>,
    pub malicious_code: Option<String>,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_str: Option<String>,
}

/// One nearest-neighbour hit from the vector corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub title: Option<String>,
    pub file_name: Option<String>,
    pub code: Option<String>,
    pub describe: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    /// Cosine distance, `1 - cos`.
    pub distance: f64,
    /// Weaviate certainty, `(1 + cos) / 2`.
    pub certainty: f64,
}

/// Outcome of one query within a batch.
///
/// Every input query gets exactly one outcome, at the same position as the
/// query, so a failure is reported in place instead of being dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome<T> {
    Matched(Vec<T>),
    Failed(String),
}

impl<T> QueryOutcome<T> {
    pub fn empty() -> Self {
        QueryOutcome::Matched(Vec::new())
    }

    pub fn matches(&self) -> &[T] {
        match self {
            QueryOutcome::Matched(items) => items,
            QueryOutcome::Failed(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            QueryOutcome::Matched(_) => None,
            QueryOutcome::Failed(msg) => Some(msg),
        }
    }

    pub fn is_hit(&self) -> bool {
        !self.matches().is_empty()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, QueryOutcome::Failed(_))
    }
}
