//! Embedding-based matching against the vector corpus.
//!
//! Pipeline for one batch:
//!
//! 1. Queries over the simplifier threshold are reduced by the chat model
//!    (at most `concurrency_cap` at a time). A query reduced to nothing is
//!    settled as an empty match and not embedded.
//! 2. The remaining texts are encoded in a single embedder call, under a
//!    deadline that grows with the number of provider requests it needs, and
//!    scaled to unit length.
//! 3. One near-vector lookup per vector runs on its own task, gated by a
//!    semaphore with `min(n, concurrency_cap)` permits and an explicit
//!    timeout per lookup.
//! 4. Outcomes are written back by input index.
//!
//! An embedding failure fails the whole batch, since no slot has a vector to
//! search with. A lookup failure or timeout fails only its own slot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::config::Config;
use crate::embedding::{l2_normalize, request_budget, Embedder};
use crate::error::{Collaborator, RetrievalError};
use crate::models::{QueryOutcome, VectorHit};
use crate::simplify::Simplifier;
use crate::vector_store::VectorStore;

/// Per-request tuning for [`match_by_embedding`].
#[derive(Debug, Clone)]
pub struct SemanticParams {
    pub top_k: usize,
    pub certainty: f64,
    pub concurrency_cap: usize,
    /// Deadline for one provider request of up to `embed_batch_size` texts.
    pub embed_timeout: Duration,
    /// Texts per provider request; the embedder splits larger inputs.
    pub embed_batch_size: usize,
    pub lookup_timeout: Duration,
}

impl SemanticParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.search.top_k,
            certainty: config.search.certainty,
            concurrency_cap: config.search.max_threads,
            embed_timeout: request_budget(&config.embedding),
            embed_batch_size: config.embedding.batch_size.max(1),
            lookup_timeout: Duration::from_secs(config.vector.timeout_secs.max(1)),
        }
    }

    /// Deadline for embedding `n` texts, which the provider sends as
    /// `ceil(n / embed_batch_size)` sequential requests.
    pub fn embed_budget(&self, n: usize) -> Duration {
        let requests = n.div_ceil(self.embed_batch_size.max(1)).max(1);
        self.embed_timeout
            .saturating_mul(u32::try_from(requests).unwrap_or(u32::MAX))
    }
}

/// Collaborators of the embedding matcher.
#[derive(Clone)]
pub struct SemanticEngine {
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub simplifier: Option<Arc<Simplifier>>,
}

pub async fn match_by_embedding(
    engine: &SemanticEngine,
    queries: &[String],
    params: &SemanticParams,
) -> Result<Vec<QueryOutcome<VectorHit>>, RetrievalError> {
    if queries.is_empty() {
        return Ok(Vec::new());
    }
    let cap = params.concurrency_cap.max(1);

    let inputs = match &engine.simplifier {
        Some(simplifier) => {
            let simplifier = Arc::clone(simplifier);
            bounded_map(queries.to_vec(), cap, move |_, q| {
                let simplifier = Arc::clone(&simplifier);
                async move { simplifier.simplify(&q).await }
            })
            .await
            .into_iter()
            .zip(queries)
            .map(|(r, original)| r.unwrap_or_else(|_| original.clone()))
            .collect()
        }
        None => queries.to_vec(),
    };

    let mut outcomes: Vec<Option<QueryOutcome<VectorHit>>> = vec![None; queries.len()];
    let mut pending_idx = Vec::new();
    let mut pending_text = Vec::new();
    for (i, text) in inputs.into_iter().enumerate() {
        if engine.simplifier.is_some() && text.is_empty() && !queries[i].is_empty() {
            tracing::debug!(query = i, "simplifier found nothing relevant");
            outcomes[i] = Some(QueryOutcome::empty());
        } else {
            pending_idx.push(i);
            pending_text.push(text);
        }
    }

    if !pending_text.is_empty() {
        let budget = params.embed_budget(pending_text.len());
        let vectors = encode(engine.embedder.as_ref(), &pending_text, budget).await?;

        let store = Arc::clone(&engine.store);
        let (top_k, certainty, timeout) = (params.top_k, params.certainty, params.lookup_timeout);
        let items: Vec<(usize, Vec<f32>)> = pending_idx.iter().copied().zip(vectors).collect();
        let results = bounded_map(items, cap, move |_, (query, vector)| {
            let store = Arc::clone(&store);
            async move {
                let outcome = match tokio::time::timeout(
                    timeout,
                    store.near_vector(&vector, top_k, certainty),
                )
                .await
                {
                    Ok(Ok(hits)) => QueryOutcome::Matched(hits),
                    Ok(Err(e)) => {
                        tracing::warn!(query, store = store.name(), "vector lookup failed: {}", e);
                        QueryOutcome::Failed(format!("query {}: {}", query, e))
                    }
                    Err(_) => {
                        let e = RetrievalError::Timeout {
                            collaborator: Collaborator::VectorStore,
                            after: timeout,
                        };
                        tracing::warn!(query, "vector lookup timed out");
                        QueryOutcome::Failed(format!("query {}: {}", query, e))
                    }
                };
                (query, outcome)
            }
        })
        .await;

        for (slot, result) in pending_idx.iter().zip(results) {
            let (index, outcome) = match result {
                Ok(pair) => pair,
                Err(e) => (
                    *slot,
                    QueryOutcome::Failed(format!("query {}: lookup task failed: {}", slot, e)),
                ),
            };
            outcomes[index] = Some(outcome);
        }
    }

    outcomes
        .into_iter()
        .enumerate()
        .map(|(i, o)| {
            o.ok_or_else(|| RetrievalError::Internal(format!("query {} has no outcome", i)))
        })
        .collect()
}

/// Encode `texts` in one embedder call and unit-normalize the result.
pub async fn encode(
    embedder: &dyn Embedder,
    texts: &[String],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>, RetrievalError> {
    let mut vectors = match tokio::time::timeout(timeout, embedder.embed(texts)).await {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => {
            tracing::error!(model = embedder.model_name(), "embedding failed: {:#}", e);
            return Err(RetrievalError::Unavailable {
                collaborator: Collaborator::Embedder,
                message: e.to_string(),
            });
        }
        Err(_) => {
            return Err(RetrievalError::Timeout {
                collaborator: Collaborator::Embedder,
                after: timeout,
            })
        }
    };

    if vectors.len() != texts.len() {
        return Err(RetrievalError::Upstream {
            collaborator: Collaborator::Embedder,
            message: format!("expected {} vectors, got {}", texts.len(), vectors.len()),
        });
    }
    for v in vectors.iter_mut() {
        l2_normalize(v);
    }
    Ok(vectors)
}

/// Run `f` over `items` on spawned tasks with at most `cap` in flight.
/// Results come back in item order.
async fn bounded_map<T, F, Fut>(
    items: Vec<T>,
    cap: usize,
    f: F,
) -> Vec<Result<Fut::Output, tokio::task::JoinError>>
where
    T: Send + 'static,
    F: Fn(usize, T) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(cap.min(items.len()).max(1)));
    let mut handles = Vec::with_capacity(items.len());

    for (i, item) in items.into_iter().enumerate() {
        let sem = Arc::clone(&semaphore);
        let fut = f(i, item);
        handles.push(tokio::spawn(async move {
            // Never closed; the permit is held until the task finishes.
            let _permit = sem.acquire_owned().await.ok();
            fut.await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await);
    }
    results
}
