//! Relational corpus of catalogued samples.
//!
//! The [`CorpusStore`] trait is the read-only view the exact-match strategies
//! need. Two backends implement it:
//!
//! - [`sqlite::SqliteCorpus`] — the pooled SQLite table created by `mcs init`.
//! - [`memory::InMemoryCorpus`] — a linear-scan store for tests and tooling.
//!
//! Both return rows in ascending `id`, which is insertion order. Several rows
//! may share a digest; callers get all of them and no ranking among them.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::SampleRecord;
use crate::normalize::HASH_LEN;

#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// All samples whose stored `hash_code` equals `digest`.
    async fn find_by_hash(&self, digest: &[u8; HASH_LEN])
        -> Result<Vec<SampleRecord>, StoreError>;

    /// All samples whose non-empty `format_code` occurs literally inside
    /// `normalized_query`.
    async fn find_contained_in(
        &self,
        normalized_query: &str,
    ) -> Result<Vec<SampleRecord>, StoreError>;
}
