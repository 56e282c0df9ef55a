//! Exact-match strategies over the relational corpus.
//!
//! Both matchers walk the batch in order, issuing one lookup per query. A
//! failed lookup becomes a [`QueryOutcome::Failed`] in that query's slot and
//! the walk continues; losing the store itself ends the batch with an error,
//! since every remaining lookup would fail the same way.

use crate::corpus::CorpusStore;
use crate::error::{RetrievalError, StoreError};
use crate::models::{QueryOutcome, SampleRecord};
use crate::normalize::{content_hash, normalize};

/// Match each query by SHA-256 of its normalized form.
pub async fn match_by_hash(
    store: &dyn CorpusStore,
    queries: &[String],
) -> Result<Vec<QueryOutcome<SampleRecord>>, RetrievalError> {
    let mut outcomes = Vec::with_capacity(queries.len());
    for (i, query) in queries.iter().enumerate() {
        let digest = content_hash(&normalize(query));
        let result = store.find_by_hash(&digest).await;
        outcomes.push(settle(i, result)?);
    }
    Ok(outcomes)
}

/// Match each query against every stored snippet it literally contains.
pub async fn match_by_containment(
    store: &dyn CorpusStore,
    queries: &[String],
) -> Result<Vec<QueryOutcome<SampleRecord>>, RetrievalError> {
    let mut outcomes = Vec::with_capacity(queries.len());
    for (i, query) in queries.iter().enumerate() {
        let normalized = normalize(query);
        if normalized.is_empty() {
            outcomes.push(QueryOutcome::empty());
            continue;
        }
        let result = store.find_contained_in(&normalized).await;
        outcomes.push(settle(i, result)?);
    }
    Ok(outcomes)
}

fn settle(
    index: usize,
    result: Result<Vec<SampleRecord>, StoreError>,
) -> Result<QueryOutcome<SampleRecord>, RetrievalError> {
    match result {
        Ok(records) => Ok(QueryOutcome::Matched(records)),
        Err(e) if e.is_connection_lost() => {
            tracing::error!(query = index, "corpus store lost: {}", e);
            Err(e.into())
        }
        Err(e) => {
            tracing::warn!(query = index, "corpus lookup failed: {}", e);
            Ok(QueryOutcome::Failed(format!("query {}: {}", index, e)))
        }
    }
}
