//! Error taxonomy for the retrieval path.
//!
//! Configuration problems are reported through `anyhow` at startup and never
//! reach this type. Everything a request can run into is classified here so
//! the server can map it to a distinguishable HTTP status.

use std::time::Duration;

/// The external party an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    CorpusStore,
    VectorStore,
    Embedder,
    ChatModel,
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Collaborator::CorpusStore => "corpus store",
            Collaborator::VectorStore => "vector store",
            Collaborator::Embedder => "embedding model",
            Collaborator::ChatModel => "chat model",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        collaborator: Collaborator,
        message: String,
    },

    #[error("{collaborator} timed out after {}s", .after.as_secs_f64())]
    Timeout {
        collaborator: Collaborator,
        after: Duration,
    },

    #[error("{collaborator} returned an invalid response: {message}")]
    Upstream {
        collaborator: Collaborator,
        message: String,
    },

    #[error("{0} is not configured")]
    Disabled(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure of a single relational lookup.
///
/// `Unavailable` means the pool itself could not serve us (closed, exhausted
/// past the acquire timeout, or the connection dropped); the rest of the batch
/// would fail the same way. The other variants only concern one statement.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("query timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                StoreError::Unavailable("timed out acquiring a connection".to_string())
            }
            sqlx::Error::PoolClosed => StoreError::Unavailable("pool is closed".to_string()),
            sqlx::Error::Io(e) => StoreError::Unavailable(format!("i/o error: {}", e.kind())),
            sqlx::Error::WorkerCrashed => {
                StoreError::Unavailable("database worker crashed".to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<StoreError> for RetrievalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => RetrievalError::Unavailable {
                collaborator: Collaborator::CorpusStore,
                message,
            },
            StoreError::Timeout(after) => RetrievalError::Timeout {
                collaborator: Collaborator::CorpusStore,
                after,
            },
            StoreError::Query(message) => RetrievalError::Upstream {
                collaborator: Collaborator::CorpusStore,
                message,
            },
        }
    }
}
