//! HTTP client for the remote encrypted-vector index service
//!
//! JSON over HTTP. Every request carries the `X-API-Key` header and the
//! shared `index_key` in its body.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{CreateOutcome, IndexClient, IndexConfig, IndexError, QueryResponse, UpsertAck};
use crate::models::EmbeddedRecord;

const USER_AGENT: &str = concat!("effin-node/", env!("CARGO_PKG_VERSION"));
const QUERY_INCLUDE: [&str; 2] = ["distance", "metadata"];

/// Remote index client
#[derive(Clone)]
pub struct HttpIndexClient {
    http_client: reqwest::Client,
    endpoint: String,
    index_key: String,
}

#[derive(Serialize)]
struct UpsertItem<'a> {
    id: &'a str,
    vector: &'a [f32],
    metadata: &'a crate::models::RecordMetadata,
}

impl HttpIndexClient {
    /// Build a client for `endpoint` (e.g. `http://localhost:8000`)
    pub fn new(endpoint: &str, api_key: &str, index_key: &str, timeout: Duration) -> Result<Self, IndexError> {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(IndexError::InvalidRequest(format!(
                "index endpoint must be an http(s) URL, got {:?}",
                endpoint
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|e| IndexError::InvalidRequest(format!("invalid API key header: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index_key: index_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// POST a JSON body and return the raw response (status unchecked)
    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, IndexError> {
        tracing::debug!(path, "Index request");
        self.http_client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)
    }

    /// Turn a non-success status into `IndexError::Api`
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, IndexError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(IndexError::NotFound(body));
        }
        Err(IndexError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn json_body(response: reqwest::Response) -> Result<Value, IndexError> {
        response
            .json::<Value>()
            .await
            .map_err(|e| IndexError::Parse(e.to_string()))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> IndexError {
    if err.is_timeout() {
        IndexError::Network(format!("request timed out: {}", err))
    } else {
        IndexError::Network(err.to_string())
    }
}

#[async_trait]
impl IndexClient for HttpIndexClient {
    async fn create_index(&self, name: &str, config: &IndexConfig) -> Result<CreateOutcome, IndexError> {
        let body = json!({
            "index_name": name,
            "index_key": self.index_key,
            "index_config": config,
        });
        let response = self.post("/v1/indexes/create", &body).await?;

        // The service answers 400/409 when the index already exists.
        if matches!(response.status(), StatusCode::BAD_REQUEST | StatusCode::CONFLICT) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        Self::check(response).await?;
        Ok(CreateOutcome::Created)
    }

    async fn delete_index(&self, name: &str) -> Result<(), IndexError> {
        let body = json!({ "index_name": name, "index_key": self.index_key });
        let response = self.post("/v1/indexes/delete", &body).await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>, IndexError> {
        let response = self
            .http_client
            .get(self.url("/v1/indexes/list"))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let value = Self::json_body(Self::check(response).await?).await?;

        let indexes = value
            .get("indexes")
            .and_then(Value::as_array)
            .ok_or_else(|| IndexError::Parse("list response has no 'indexes' array".to_string()))?;
        Ok(indexes
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn train(&self, name: &str) -> Result<(), IndexError> {
        let body = json!({ "index_name": name, "index_key": self.index_key });
        let response = self.post("/v1/indexes/train", &body).await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn batch_upsert(&self, name: &str, records: &[EmbeddedRecord]) -> Result<UpsertAck, IndexError> {
        if records.is_empty() {
            return Ok(UpsertAck { upserted: 0 });
        }
        let items: Vec<UpsertItem<'_>> = records
            .iter()
            .map(|r| UpsertItem {
                id: &r.id,
                vector: &r.vector,
                metadata: &r.metadata,
            })
            .collect();
        let body = json!({
            "index_name": name,
            "index_key": self.index_key,
            "items": items,
        });
        let response = self.post("/v1/vectors/upsert", &body).await?;
        Self::check(response).await?;
        Ok(UpsertAck {
            upserted: records.len(),
        })
    }

    async fn batch_query(&self, name: &str, vectors: &[Vec<f32>], top_k: usize) -> Result<QueryResponse, IndexError> {
        if vectors.is_empty() {
            return Ok(QueryResponse::default());
        }
        let body = json!({
            "index_name": name,
            "index_key": self.index_key,
            "query_vectors": vectors,
            "top_k": top_k,
            "include": QUERY_INCLUDE,
        });
        let response = self.post("/v1/vectors/query", &body).await?;
        let value = Self::json_body(Self::check(response).await?).await?;
        QueryResponse::from_value(value, vectors.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_endpoint() {
        let result = HttpIndexClient::new("localhost:8000", "key", "", Duration::from_secs(1));
        assert!(matches!(result, Err(IndexError::InvalidRequest(_))));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = HttpIndexClient::new("http://localhost:8000/", "key", "", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/v1/indexes/list"), "http://localhost:8000/v1/indexes/list");
    }
}
