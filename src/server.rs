//! HTTP retrieval service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Exact matching (containment or hash, per `[db].match_mode`) |
//! | `POST` | `/vector_search` | Embedding similarity against the vector corpus |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Both search endpoints take either a single string or a list of strings
//! and answer with exactly one `data` slot per input, in input order. A slot
//! whose lookup failed carries an `error` field and the response state is
//! `partial`; the request as a whole still succeeds.
//!
//! # Error Contract
//!
//! Request-level failures use the same body everywhere:
//!
//! ```json
//! { "error": { "code": "unavailable", "message": "corpus store unavailable: pool is closed" } }
//! ```
//!
//! | Code | Status | Meaning |
//! |------|--------|---------|
//! | `unavailable` | 503 | a store or model could not be reached |
//! | `timeout` | 504 | a collaborator, or the request as a whole, ran out of time |
//! | `bad_gateway` | 502 | a collaborator answered with an error or malformed payload |
//! | `embeddings_disabled` | 400 | `/vector_search` without an embedding provider |
//! | `internal` | 500 | anything else |
//!
//! Messages name the failing collaborator but never connection strings or keys.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

use crate::config::{Config, MatchMode};
use crate::context::AppContext;
use crate::error::RetrievalError;
use crate::matcher::{match_by_containment, match_by_hash};
use crate::models::{QueryOutcome, SampleRecord, VectorHit};
use crate::normalize::hash_hex;
use crate::semantic::match_by_embedding;

/// Starts the retrieval service.
///
/// Builds the [`AppContext`], binds `[server].bind`, and serves until ctrl-c
/// or SIGTERM. Pooled connections are closed after the last request drains.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = Arc::new(AppContext::build(config).await?);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        "listening on http://{} (match mode: {})",
        config.server.bind,
        config.db.match_mode.as_str()
    );

    serve(ctx.clone(), listener, shutdown_signal()).await?;
    ctx.close().await;
    tracing::info!("server stopped");
    Ok(())
}

/// Serve `ctx` on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    ctx: Arc<AppContext>,
    listener: tokio::net::TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// The service's routes with tracing and permissive CORS.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", post(handle_search))
        .route("/vector_search", post(handle_vector_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .with_state(ctx)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested, draining in-flight requests");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        let (status, code) = match &err {
            RetrievalError::Unavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            RetrievalError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            RetrievalError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "bad_gateway"),
            RetrievalError::Disabled(_) => (StatusCode::BAD_REQUEST, "embeddings_disabled"),
            RetrievalError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(%status, "request failed: {}", err);
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

/// Bound a handler's work by `[server].request_timeout_secs`.
async fn with_deadline<T>(
    ctx: &AppContext,
    work: impl Future<Output = Result<T, RetrievalError>>,
) -> Result<T, AppError> {
    let limit = Duration::from_secs(ctx.config.server.request_timeout_secs);
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError {
            status: StatusCode::GATEWAY_TIMEOUT,
            code: "timeout",
            message: format!("request exceeded {}s", limit.as_secs()),
        }),
    }
}

// ============ Requests ============

/// A single query or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub code_strings: OneOrMany,
}

#[derive(Debug, Deserialize)]
pub struct VectorSearchRequest {
    pub query_code: OneOrMany,
}

// ============ POST /search ============

#[derive(Debug, Serialize)]
pub struct SearchItem {
    pub code_string: String,
    /// Digest of the normalized query; only in hash mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub records: Vec<SampleRecord>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub state: &'static str,
    pub message: String,
    pub data: Vec<SearchItem>,
    /// Number of queries with at least one match.
    pub count: usize,
}

async fn handle_search(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let queries = req.code_strings.into_vec();
    let mode = ctx.config.db.match_mode;
    tracing::debug!(queries = queries.len(), mode = mode.as_str(), "search");

    let outcomes = with_deadline(&ctx, async {
        match mode {
            MatchMode::Containment => match_by_containment(ctx.corpus.as_ref(), &queries).await,
            MatchMode::Hash => match_by_hash(ctx.corpus.as_ref(), &queries).await,
        }
    })
    .await?;

    Ok(Json(search_response(mode, queries, outcomes)))
}

pub fn search_response(
    mode: MatchMode,
    queries: Vec<String>,
    outcomes: Vec<QueryOutcome<SampleRecord>>,
) -> SearchResponse {
    let total = queries.len();
    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    let hits = outcomes.iter().filter(|o| o.is_hit()).count();

    let data: Vec<SearchItem> = queries
        .into_iter()
        .zip(outcomes)
        .map(|(code_string, outcome)| {
            let hash = match mode {
                MatchMode::Hash => Some(hash_hex(&code_string)),
                MatchMode::Containment => None,
            };
            let error = outcome.error().map(str::to_string);
            let records = match outcome {
                QueryOutcome::Matched(records) => records,
                QueryOutcome::Failed(_) => Vec::new(),
            };
            SearchItem {
                code_string,
                hash,
                count: records.len(),
                records,
                error,
            }
        })
        .collect();

    let (state, message) = if failed > 0 {
        (
            "partial",
            format!(
                "{} of {} queries failed; {} matched",
                failed, total, hits
            ),
        )
    } else if hits > 0 {
        ("success", format!("found matches for {} of {} queries", hits, total))
    } else if total == 0 {
        ("not_found", "Empty query".to_string())
    } else {
        ("not_found", "no query matched a catalogued sample".to_string())
    };

    SearchResponse {
        state,
        message,
        data,
        count: hits,
    }
}

// ============ POST /vector_search ============

#[derive(Debug, Serialize)]
pub struct VectorSearchItem {
    pub input_code: String,
    pub records: Vec<VectorHit>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VectorSearchResponse {
    pub message: String,
    pub data: Vec<VectorSearchItem>,
    /// Number of queries with at least one hit.
    pub count: usize,
}

async fn handle_vector_search(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<VectorSearchRequest>,
) -> Result<Json<VectorSearchResponse>, AppError> {
    let queries = req.query_code.into_vec();
    if queries.is_empty() {
        return Ok(Json(vector_search_response(Vec::new(), Vec::new())));
    }
    let engine = ctx
        .semantic
        .as_ref()
        .ok_or(RetrievalError::Disabled("embedding provider"))?;
    let params = ctx.semantic_params();
    tracing::debug!(queries = queries.len(), top_k = params.top_k, "vector search");

    let outcomes = with_deadline(&ctx, match_by_embedding(engine, &queries, &params)).await?;
    Ok(Json(vector_search_response(queries, outcomes)))
}

pub fn vector_search_response(
    queries: Vec<String>,
    outcomes: Vec<QueryOutcome<VectorHit>>,
) -> VectorSearchResponse {
    let total = queries.len();
    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    let hits = outcomes.iter().filter(|o| o.is_hit()).count();

    let data: Vec<VectorSearchItem> = queries
        .into_iter()
        .zip(outcomes)
        .map(|(input_code, outcome)| {
            let error = outcome.error().map(str::to_string);
            let records = match outcome {
                QueryOutcome::Matched(records) => records,
                QueryOutcome::Failed(_) => Vec::new(),
            };
            VectorSearchItem {
                input_code,
                count: records.len(),
                records,
                error,
            }
        })
        .collect();

    let message = if total == 0 {
        "Empty query".to_string()
    } else if failed > 0 {
        format!("{} of {} queries failed", failed, total)
    } else if hits > 0 {
        "Success".to_string()
    } else {
        "No results found for any query".to_string()
    };

    VectorSearchResponse {
        message,
        data,
        count: hits,
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
