//! In-memory [`VectorStore`] for tests and local development.
//!
//! Brute-force cosine similarity over every stored vector. Results are sorted
//! by certainty descending with ties kept in insertion order.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::RetrievalError;
use crate::models::VectorHit;

use super::{certainty_from_cosine, VectorRecord, VectorStore};

#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<(VectorRecord, Vec<f32>)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: VectorRecord, vector: Vec<f32>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((record, vector));
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn near_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        certainty: f64,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut scored: Vec<(usize, f64)> = entries
            .iter()
            .enumerate()
            .map(|(i, (_, v))| (i, cosine_similarity(vector, v) as f64))
            .filter(|(_, cos)| certainty_from_cosine(*cos) >= certainty)
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, cos)| entries[i].0.clone().into_hit(cos))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str) -> VectorRecord {
        VectorRecord {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ranking_floor_and_limit() {
        let store = InMemoryVectorStore::new();
        store.insert(record("x"), vec![1.0, 0.0]);
        store.insert(record("y"), vec![0.0, 1.0]);
        store.insert(record("xy"), vec![1.0, 1.0]);
        store.insert(record("-x"), vec![-1.0, 0.0]);

        let hits = store.near_vector(&[1.0, 0.0], 10, 0.0).await.unwrap();
        let titles: Vec<_> = hits.iter().map(|h| h.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["x", "xy", "y", "-x"]);
        assert!((hits[0].certainty - 1.0).abs() < 1e-6);
        assert!(hits[0].distance.abs() < 1e-6);

        let hits = store.near_vector(&[1.0, 0.0], 10, 0.8).await.unwrap();
        let titles: Vec<_> = hits.iter().map(|h| h.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["x", "xy"]);

        let hits = store.near_vector(&[1.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let store = InMemoryVectorStore::new();
        store.insert(record("first"), vec![0.0, 2.0]);
        store.insert(record("second"), vec![0.0, 1.0]);
        let hits = store.near_vector(&[0.0, 1.0], 5, 0.5).await.unwrap();
        assert_eq!(hits[0].title.as_deref(), Some("first"));
        assert_eq!(hits[1].title.as_deref(), Some("second"));
        assert!(!store.is_empty());
    }
}
