//! Weaviate-backed [`VectorStore`].
//!
//! Issues GraphQL `Get` queries with a `nearVector` clause against
//! `POST {url}/v1/graphql`. The class is expected to use cosine distance and
//! externally supplied vectors, with the properties
//! `title, file_name, code, describe, hash`.
//!
//! A GraphQL response carrying `errors`, or one without `data.Get.<class>`,
//! is reported as an invalid response from the vector store; transport
//! failures are reported as unavailable or timed out.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::VectorConfig;
use crate::error::{Collaborator, RetrievalError};
use crate::models::VectorHit;

use super::{VectorRecord, VectorStore};

pub struct WeaviateStore {
    client: reqwest::Client,
    url: String,
    class_name: String,
    timeout: Duration,
}

impl WeaviateStore {
    pub fn new(config: &VectorConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            class_name: config.class_name.clone(),
            timeout,
        })
    }

    /// `true` when the instance answers its readiness probe.
    pub async fn is_ready(&self) -> bool {
        match self
            .client
            .get(format!("{}/v1/.well-known/ready", self.url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> RetrievalError {
        if err.is_timeout() {
            RetrievalError::Timeout {
                collaborator: Collaborator::VectorStore,
                after: self.timeout,
            }
        } else {
            RetrievalError::Unavailable {
                collaborator: Collaborator::VectorStore,
                message: if err.is_connect() {
                    "connection refused or unreachable".to_string()
                } else {
                    err.without_url().to_string()
                },
            }
        }
    }
}

/// Build the GraphQL document for one near-vector lookup.
pub fn build_near_vector_query(
    class_name: &str,
    vector: &[f32],
    top_k: usize,
    certainty: f64,
) -> String {
    let vector_json = Value::from(vector.iter().map(|v| *v as f64).collect::<Vec<f64>>());
    format!(
        "{{ Get {{ {class}(nearVector: {{vector: {vector}, certainty: {certainty}}}, limit: {limit}) \
         {{ title file_name code describe hash _additional {{ distance certainty }} }} }} }}",
        class = class_name,
        vector = vector_json,
        certainty = certainty,
        limit = top_k,
    )
}

/// Extract hits from a GraphQL response body.
pub fn parse_near_vector_response(
    class_name: &str,
    json: &Value,
) -> Result<Vec<VectorHit>, RetrievalError> {
    let invalid = |message: String| RetrievalError::Upstream {
        collaborator: Collaborator::VectorStore,
        message,
    };

    if let Some(errors) = json.get("errors") {
        if !errors.is_null() {
            return Err(invalid(errors.to_string()));
        }
    }

    let objects = json
        .get("data")
        .and_then(|d| d.get("Get"))
        .and_then(|g| g.get(class_name))
        .and_then(|c| c.as_array())
        .ok_or_else(|| invalid(format!("missing data.Get.{} array", class_name)))?;

    let mut hits = Vec::with_capacity(objects.len());
    for obj in objects {
        let record: VectorRecord = serde_json::from_value(obj.clone())
            .map_err(|e| invalid(format!("malformed object: {}", e)))?;
        let additional = obj.get("_additional");
        let distance = additional
            .and_then(|a| a.get("distance"))
            .and_then(|d| d.as_f64());
        let certainty = additional
            .and_then(|a| a.get("certainty"))
            .and_then(|c| c.as_f64());

        // Prefer the store's own numbers; derive the missing one from the other.
        let cos = match (distance, certainty) {
            (Some(d), _) => 1.0 - d,
            (None, Some(c)) => 2.0 * c - 1.0,
            (None, None) => return Err(invalid("object without _additional scores".into())),
        };
        let mut hit = record.into_hit(cos);
        if let Some(c) = certainty {
            hit.certainty = c;
        }
        hits.push(hit);
    }
    Ok(hits)
}

#[async_trait]
impl VectorStore for WeaviateStore {
    fn name(&self) -> &str {
        "weaviate"
    }

    async fn near_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        certainty: f64,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        let query = build_near_vector_query(&self.class_name, vector, top_k, certainty);
        let resp = self
            .client
            .post(format!("{}/v1/graphql", self.url))
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                RetrievalError::Unavailable {
                    collaborator: Collaborator::VectorStore,
                    message: format!("HTTP {}", status),
                }
            } else {
                RetrievalError::Upstream {
                    collaborator: Collaborator::VectorStore,
                    message: format!("HTTP {}: {}", status, body),
                }
            });
        }

        let json: Value = resp.json().await.map_err(|e| RetrievalError::Upstream {
            collaborator: Collaborator::VectorStore,
            message: format!("response is not JSON: {}", e.without_url()),
        })?;
        parse_near_vector_response(&self.class_name, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_shape() {
        let q = build_near_vector_query("Security", &[0.5, -0.25], 5, 0.8);
        assert!(q.contains("Security(nearVector: {vector: [0.5,-0.25], certainty: 0.8}, limit: 5)"));
        assert!(q.contains("_additional { distance certainty }"));
        assert!(q.contains("title file_name code describe hash"));
    }

    #[test]
    fn test_parse_hits() {
        let body = json!({
            "data": { "Get": { "Security": [
                { "title": "t1", "file_name": "f1", "code": "c1", "describe": "d1", "hash": "h1",
                  "_additional": { "distance": 0.1, "certainty": 0.95 } },
                { "title": "t2", "file_name": null, "code": "c2", "describe": null, "hash": null,
                  "_additional": { "distance": 0.3, "certainty": null } }
            ] } }
        });
        let hits = parse_near_vector_response("Security", &body).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title.as_deref(), Some("t1"));
        assert!((hits[0].certainty - 0.95).abs() < 1e-9);
        assert!((hits[0].distance - 0.1).abs() < 1e-9);
        assert!(hits[1].file_name.is_none());
        assert!((hits[1].certainty - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_parse_errors_payload() {
        let body = json!({ "errors": [ { "message": "class not found" } ] });
        let err = parse_near_vector_response("Security", &body).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("vector store"), "{}", msg);
        assert!(msg.contains("class not found"), "{}", msg);
    }

    #[test]
    fn test_parse_missing_class() {
        let body = json!({ "data": { "Get": { "Other": [] } } });
        assert!(matches!(
            parse_near_vector_response("Security", &body),
            Err(RetrievalError::Upstream { .. })
        ));
    }

    #[test]
    fn test_parse_empty_result() {
        let body = json!({ "data": { "Get": { "Security": [] } } });
        assert!(parse_near_vector_response("Security", &body)
            .unwrap()
            .is_empty());
    }
}
