//! End-to-end matcher behaviour against real and instrumented stores.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use malcode_search::config::{DbConfig, MatchMode};
use malcode_search::corpus::memory::InMemoryCorpus;
use malcode_search::corpus::sqlite::SqliteCorpus;
use malcode_search::corpus::CorpusStore;
use malcode_search::db;
use malcode_search::embedding::Embedder;
use malcode_search::error::{RetrievalError, StoreError};
use malcode_search::matcher::{match_by_containment, match_by_hash};
use malcode_search::migrate::create_schema;
use malcode_search::models::{NewSample, QueryOutcome, SampleRecord, VectorHit};
use malcode_search::normalize::{hash_hex, HASH_LEN};
use malcode_search::semantic::{match_by_embedding, SemanticEngine, SemanticParams};
use malcode_search::vector_store::memory::InMemoryVectorStore;
use malcode_search::vector_store::{VectorRecord, VectorStore};

// ─── Helpers ────────────────────────────────────────────────────────

fn db_config(tmp: &TempDir, mode: MatchMode) -> DbConfig {
    let content = format!(
        "path = \"{}\"\nmatch_mode = \"{}\"\nmin_connections = 1\nmax_connections = 4\n",
        tmp.path().join("corpus.sqlite").display(),
        mode.as_str()
    );
    toml::from_str(&content).unwrap()
}

async fn sqlite_corpus(tmp: &TempDir, mode: MatchMode, codes: &[&str]) -> SqliteCorpus {
    let cfg = db_config(tmp, mode);
    let pool = db::connect(&cfg).await.unwrap();
    create_schema(&pool, &cfg.table, mode).await.unwrap();
    let corpus = SqliteCorpus::new(pool, &cfg);
    let samples: Vec<NewSample> = codes
        .iter()
        .enumerate()
        .map(|(i, c)| NewSample {
            title: Some(format!("sample {}", i + 1)),
            malicious_code: c.to_string(),
            ..Default::default()
        })
        .collect();
    corpus.insert_samples(&samples).await.unwrap();
    corpus
}

fn queries(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Text → 3-d vector keyed on a few tell-tale calls.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                if t.contains("system") {
                    vec![1.0, 0.0, 0.0]
                } else if t.contains("eval") {
                    vec![0.0, 1.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
    }
}

/// Records how many lookups are in flight at once.
struct CountingStore {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for CountingStore {
    fn name(&self) -> &str {
        "counting"
    }

    async fn near_vector(
        &self,
        _vector: &[f32],
        _top_k: usize,
        _certainty: f64,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

/// Hangs on the "eval" axis, answers immediately otherwise.
struct StallingStore {
    inner: InMemoryVectorStore,
}

#[async_trait]
impl VectorStore for StallingStore {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn near_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        certainty: f64,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        if vector[1] > 0.5 {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.near_vector(vector, top_k, certainty).await
    }
}

/// Times out on the second lookup of a batch; delegates otherwise.
struct FlakyCorpus {
    inner: InMemoryCorpus,
    calls: AtomicUsize,
}

#[async_trait]
impl CorpusStore for FlakyCorpus {
    async fn find_by_hash(
        &self,
        digest: &[u8; HASH_LEN],
    ) -> Result<Vec<SampleRecord>, StoreError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(StoreError::Timeout(Duration::from_secs(10)));
        }
        self.inner.find_by_hash(digest).await
    }

    async fn find_contained_in(
        &self,
        normalized_query: &str,
    ) -> Result<Vec<SampleRecord>, StoreError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(StoreError::Timeout(Duration::from_secs(10)));
        }
        self.inner.find_contained_in(normalized_query).await
    }
}

fn params(cap: usize) -> SemanticParams {
    SemanticParams {
        top_k: 5,
        certainty: 0.8,
        concurrency_cap: cap,
        embed_timeout: Duration::from_secs(5),
        embed_batch_size: 64,
        lookup_timeout: Duration::from_secs(5),
    }
}

// ─── Exact matching ─────────────────────────────────────────────────

#[tokio::test]
async fn test_hash_match_ignores_whitespace_layout() {
    let tmp = TempDir::new().unwrap();
    let corpus = sqlite_corpus(&tmp, MatchMode::Hash, &["import os\nprint('x')"]).await;

    let out = match_by_hash(&corpus, &queries(&["import os print('x')"]))
        .await
        .unwrap();
    assert_eq!(out.len(), 1);
    let records = out[0].matches();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, 1);
    assert_eq!(
        records[0].hash_str.as_deref(),
        Some(hash_hex("import os\nprint('x')").as_str())
    );
}

#[tokio::test]
async fn test_containment_is_one_directional() {
    let tmp = TempDir::new().unwrap();
    let corpus = sqlite_corpus(&tmp, MatchMode::Containment, &["import os"]).await;

    let out = match_by_containment(&corpus, &queries(&["xx import os yy"]))
        .await
        .unwrap();
    assert_eq!(out[0].matches().len(), 1);

    let tmp2 = TempDir::new().unwrap();
    let corpus = sqlite_corpus(&tmp2, MatchMode::Containment, &["xx import os yy"]).await;
    let out = match_by_containment(&corpus, &queries(&["import os"]))
        .await
        .unwrap();
    assert!(!out[0].is_hit());
}

#[tokio::test]
async fn test_multiple_rows_share_a_digest() {
    let tmp = TempDir::new().unwrap();
    let corpus = sqlite_corpus(&tmp, MatchMode::Hash, &["a b", "c", "ab"]).await;

    let out = match_by_hash(&corpus, &queries(&["a\tb"])).await.unwrap();
    let ids: Vec<i64> = out[0].matches().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn test_exact_matchers_preserve_order() {
    let tmp = TempDir::new().unwrap();
    let corpus = sqlite_corpus(&tmp, MatchMode::Containment, &["eval(", "os.system("]).await;

    let batch = queries(&["os.system(cmd)", "nothing here", "", "eval(payload)"]);
    let out = match_by_containment(&corpus, &batch).await.unwrap();
    assert_eq!(out.len(), batch.len());
    assert_eq!(out[0].matches()[0].id, 2);
    assert!(!out[1].is_hit());
    assert!(!out[2].is_hit());
    assert_eq!(out[3].matches()[0].id, 1);
}

#[tokio::test]
async fn test_timeout_in_one_slot_keeps_the_others() {
    let inner = InMemoryCorpus::new();
    for code in ["a", "b", "c"] {
        inner.insert(NewSample {
            malicious_code: code.to_string(),
            ..Default::default()
        });
    }
    let corpus = FlakyCorpus {
        inner,
        calls: AtomicUsize::new(0),
    };

    let out = match_by_hash(&corpus, &queries(&["a", "b", "c"])).await.unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(out[0].matches()[0].id, 1);
    let err = out[1].error().unwrap();
    assert!(err.starts_with("query 1:"), "{}", err);
    assert!(err.contains("timed out"), "{}", err);
    assert_eq!(out[2].matches()[0].id, 3);
}

#[tokio::test]
async fn test_closed_pool_fails_the_batch() {
    let tmp = TempDir::new().unwrap();
    let corpus = sqlite_corpus(&tmp, MatchMode::Containment, &["x"]).await;
    corpus.pool().close().await;

    let err = match_by_containment(&corpus, &queries(&["x"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Unavailable { .. }), "{}", err);
}

#[tokio::test]
async fn test_empty_batches() {
    let tmp = TempDir::new().unwrap();
    let corpus = sqlite_corpus(&tmp, MatchMode::Hash, &["x"]).await;
    assert!(match_by_hash(&corpus, &[]).await.unwrap().is_empty());

    let engine = SemanticEngine {
        embedder: Arc::new(KeywordEmbedder),
        store: Arc::new(InMemoryVectorStore::new()),
        simplifier: None,
    };
    assert!(match_by_embedding(&engine, &[], &params(4))
        .await
        .unwrap()
        .is_empty());
}

// ─── Embedding matching ─────────────────────────────────────────────

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let store = Arc::new(CountingStore::new());
    let engine = SemanticEngine {
        embedder: Arc::new(KeywordEmbedder),
        store: store.clone(),
        simplifier: None,
    };

    let batch: Vec<String> = (0..10).map(|i| format!("query {}", i)).collect();
    let out = match_by_embedding(&engine, &batch, &params(3)).await.unwrap();

    assert_eq!(out.len(), 10);
    assert_eq!(store.calls.load(Ordering::SeqCst), 10);
    let peak = store.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {} exceeded cap", peak);
    assert!(peak >= 1);
}

#[tokio::test]
async fn test_small_batch_uses_fewer_workers_than_cap() {
    let store = Arc::new(CountingStore::new());
    let engine = SemanticEngine {
        embedder: Arc::new(KeywordEmbedder),
        store: store.clone(),
        simplifier: None,
    };

    let out = match_by_embedding(&engine, &queries(&["a", "b"]), &params(20))
        .await
        .unwrap();
    assert_eq!(out.len(), 2);
    assert!(store.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_embedding_results_follow_input_order() {
    let store = InMemoryVectorStore::new();
    store.insert(
        VectorRecord {
            title: Some("shell".into()),
            code: Some("os.system(cmd)".into()),
            ..Default::default()
        },
        vec![1.0, 0.0, 0.0],
    );
    store.insert(
        VectorRecord {
            title: Some("eval".into()),
            code: Some("eval(payload)".into()),
            ..Default::default()
        },
        vec![0.0, 1.0, 0.0],
    );
    let engine = SemanticEngine {
        embedder: Arc::new(KeywordEmbedder),
        store: Arc::new(store),
        simplifier: None,
    };

    let batch = queries(&["eval(x)", "print(1)", "os.system('ls')"]);
    let out = match_by_embedding(&engine, &batch, &params(2)).await.unwrap();

    assert_eq!(out[0].matches()[0].title.as_deref(), Some("eval"));
    assert!(!out[1].is_hit());
    assert_eq!(out[2].matches()[0].title.as_deref(), Some("shell"));
    assert!((out[2].matches()[0].certainty - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_stalled_lookup_fails_only_its_slot() {
    let inner = InMemoryVectorStore::new();
    inner.insert(
        VectorRecord {
            title: Some("shell".into()),
            ..Default::default()
        },
        vec![1.0, 0.0, 0.0],
    );
    let engine = SemanticEngine {
        embedder: Arc::new(KeywordEmbedder),
        store: Arc::new(StallingStore { inner }),
        simplifier: None,
    };
    let mut p = params(3);
    p.lookup_timeout = Duration::from_millis(100);

    let batch = queries(&["system()", "eval(x)", "system(y)"]);
    let out = match_by_embedding(&engine, &batch, &p).await.unwrap();

    assert_eq!(out.len(), 3);
    assert!(out[0].is_hit());
    let err = out[1].error().unwrap();
    assert!(err.starts_with("query 1:"), "{}", err);
    assert!(err.contains("vector store timed out"), "{}", err);
    assert!(out[2].is_hit());
}

#[tokio::test]
async fn test_results_match_between_store_backends() {
    let codes = ["os.system(", "eval(", "import socket"];
    let tmp = TempDir::new().unwrap();
    let sqlite = sqlite_corpus(&tmp, MatchMode::Containment, &codes).await;
    let memory = InMemoryCorpus::new();
    for code in codes {
        memory.insert(NewSample {
            title: None,
            malicious_code: code.to_string(),
            ..Default::default()
        });
    }

    let batch = queries(&["import socket\nos.system(x)", "eval (y)", "nope"]);
    let a = match_by_containment(&sqlite, &batch).await.unwrap();
    let b = match_by_containment(&memory, &batch).await.unwrap();
    let ids = |o: &[QueryOutcome<SampleRecord>]| -> Vec<Vec<i64>> {
        o.iter()
            .map(|q| q.matches().iter().map(|r| r.id).collect())
            .collect()
    };
    assert_eq!(ids(&a), ids(&b));
    assert_eq!(ids(&a), vec![vec![1, 3], vec![2], vec![]]);
}
