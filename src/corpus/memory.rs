//! In-memory [`CorpusStore`] implementation for tests and tooling.
//!
//! Samples live in a `Vec` behind `std::sync::RwLock`; both lookups are
//! linear scans. Ids are assigned sequentially from 1, mirroring the SQLite
//! auto-increment key, so result order matches the SQL backend.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{NewSample, SampleRecord};
use crate::normalize::{content_hash, normalize, HASH_LEN};

use super::CorpusStore;

struct StoredSample {
    record: SampleRecord,
    format_code: String,
    hash_code: [u8; HASH_LEN],
}

/// In-memory corpus.
#[derive(Default)]
pub struct InMemoryCorpus {
    samples: RwLock<Vec<StoredSample>>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a sample and return its id.
    pub fn insert(&self, sample: NewSample) -> i64 {
        let format_code = normalize(&sample.malicious_code);
        let hash_code = content_hash(&format_code);
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        let id = samples.len() as i64 + 1;
        samples.push(StoredSample {
            record: SampleRecord {
                id,
                file_name: sample.file_name,
                title: sample.title,
                malicious_code: Some(sample.malicious_code),
                description: sample.description,
                hash_str: Some(hex::encode(hash_code)),
            },
            format_code,
            hash_code,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CorpusStore for InMemoryCorpus {
    async fn find_by_hash(
        &self,
        digest: &[u8; HASH_LEN],
    ) -> Result<Vec<SampleRecord>, StoreError> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        Ok(samples
            .iter()
            .filter(|s| &s.hash_code == digest)
            .map(|s| s.record.clone())
            .collect())
    }

    async fn find_contained_in(
        &self,
        normalized_query: &str,
    ) -> Result<Vec<SampleRecord>, StoreError> {
        if normalized_query.is_empty() {
            return Ok(Vec::new());
        }
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        Ok(samples
            .iter()
            .filter(|s| !s.format_code.is_empty() && normalized_query.contains(&s.format_code))
            .map(|s| SampleRecord {
                hash_str: None,
                ..s.record.clone()
            })
            .collect())
    }
}
