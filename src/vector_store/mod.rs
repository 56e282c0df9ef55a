//! Vector corpus access.
//!
//! The vector corpus is populated independently of the relational table and
//! is only ever read here. [`VectorStore`] is the single operation the
//! embedding matcher needs: a bounded nearest-neighbour query with a
//! similarity floor.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`weaviate::WeaviateStore`] | production, GraphQL `nearVector` |
//! | [`memory::InMemoryVectorStore`] | tests and local runs, brute-force cosine |
//!
//! Scores follow Weaviate's cosine convention: `distance = 1 - cos` and
//! `certainty = (1 + cos) / 2`, so a certainty floor of `0.8` keeps
//! neighbours with `cos >= 0.6`.

pub mod memory;
pub mod weaviate;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RetrievalError;
use crate::models::VectorHit;

/// Descriptive properties stored alongside each vector.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VectorRecord {
    pub title: Option<String>,
    pub file_name: Option<String>,
    pub code: Option<String>,
    pub describe: Option<String>,
    pub hash: Option<String>,
}

impl VectorRecord {
    pub fn into_hit(self, cos: f64) -> VectorHit {
        VectorHit {
            title: self.title,
            file_name: self.file_name,
            code: self.code,
            describe: self.describe,
            hash: self.hash,
            distance: 1.0 - cos,
            certainty: certainty_from_cosine(cos),
        }
    }
}

/// Weaviate certainty for a cosine similarity.
pub fn certainty_from_cosine(cos: f64) -> f64 {
    (1.0 + cos) / 2.0
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend label for logs.
    fn name(&self) -> &str;

    /// Up to `top_k` neighbours of `vector` whose certainty is at least
    /// `certainty`, best first.
    async fn near_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        certainty: f64,
    ) -> Result<Vec<VectorHit>, RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certainty_convention() {
        assert!((certainty_from_cosine(1.0) - 1.0).abs() < 1e-12);
        assert!((certainty_from_cosine(0.0) - 0.5).abs() < 1e-12);
        assert!((certainty_from_cosine(-1.0)).abs() < 1e-12);

        let hit = VectorRecord::default().into_hit(0.6);
        assert!((hit.distance - 0.4).abs() < 1e-12);
        assert!((hit.certainty - 0.8).abs() < 1e-12);
    }
}
