//! JSON-over-HTTP remote store.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | retrieve | `GET {base}/stores/{name}` |
//! | create | `POST {base}/stores` `{"name"}` |
//! | list | `GET {base}/stores/{name}/files?limit=100&cursor=…` |
//! | upload | `POST {base}/stores/{name}/files` |
//! | delete | `DELETE {base}/stores/{name}/files/{id}` |
//!
//! Listing responses carry `data`, `has_more` and `cursor`; each file has
//! `id`, `external_id` and `metadata.{path,hash}`. Uploads send content
//! either base64-encoded (`"encoding": "base64"`) or as plain text
//! (`"encoding": "text"`).
//!
//! # Authentication
//!
//! A bearer token is read from the environment variable named by
//! `store.api_key_env` (default `TMIRROR_API_KEY`).
//!
//! # Retries
//!
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - Network error → retry
//! - HTTP 402, or a 4xx/429 body reporting an exceeded quota → [`StoreError::QuotaExceeded`]
//! - HTTP 404 → [`StoreError::NotFound`]
//! - HTTP 413/415/422 → [`StoreError::Rejected`]
//! - Any other 4xx → fail immediately

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{ListPage, RemoteStore, StoreError, StoreInfo, StoreResult, UploadContent, UploadRequest};
use crate::config::StoreConfig;
use crate::models::RemoteFileRecord;

const PAGE_LIMIT: usize = 100;

pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl HttpStore {
    /// # Errors
    ///
    /// Returns an error if `base_url` is not configured or the API key
    /// environment variable is not set.
    pub fn new(config: &StoreConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url
            .as_ref()
            .ok_or_else(|| anyhow!("store.base_url required for the http backend"))?
            .trim_end_matches('/')
            .to_string();

        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            max_retries: config.max_retries,
        })
    }

    fn store_url(&self, store: &str) -> String {
        format!("{}/stores/{}", self.base_url, uri_encode(store))
    }

    /// Send the request built by `build`, retrying transient failures.
    async fn execute<F>(&self, what: &str, build: F) -> StoreResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match build().bearer_auth(&self.api_key).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body = response.text().await.unwrap_or_default();
                    match classify_failure(status, &body) {
                        Some(err) => return Err(err),
                        None => {
                            debug!(what, %status, attempt, "transient store failure, retrying");
                            last_err = Some(anyhow!(
                                "{} failed (HTTP {}): {}",
                                what,
                                status,
                                truncate(&body)
                            ));
                        }
                    }
                }
                Err(e) => {
                    debug!(what, error = %e, attempt, "store request failed, retrying");
                    last_err = Some(anyhow::Error::new(e).context(format!("{} failed", what)));
                }
            }
        }

        Err(StoreError::Other(last_err.unwrap_or_else(|| {
            anyhow!("{} failed after retries", what)
        })))
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn list_files(&self, store: &str, cursor: Option<&str>) -> StoreResult<ListPage> {
        let url = format!("{}/files", self.store_url(store));
        let mut query = vec![("limit".to_string(), PAGE_LIMIT.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor".to_string(), cursor.to_string()));
        }

        let response = self
            .execute("list files", || self.client.get(&url).query(&query))
            .await?;
        let wire: WireList = response
            .json()
            .await
            .context("Failed to decode file listing")?;
        Ok(wire.into_page())
    }

    async fn upload_file(&self, store: &str, request: UploadRequest) -> StoreResult<RemoteFileRecord> {
        let url = format!("{}/files", self.store_url(store));
        let (encoding, content) = match &request.content {
            UploadContent::Binary(bytes) => (
                "base64",
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ),
            UploadContent::Text(text) => ("text", text.clone()),
        };
        let body = serde_json::json!({
            "external_id": request.external_id,
            "overwrite": true,
            "metadata": {
                "path": request.metadata.path,
                "hash": request.metadata.hash,
            },
            "encoding": encoding,
            "content": content,
        });

        let response = self
            .execute("upload file", || self.client.post(&url).json(&body))
            .await?;
        let wire: WireFile = response
            .json()
            .await
            .context("Failed to decode upload response")?;
        Ok(wire.into_record())
    }

    async fn delete_file(&self, store: &str, record_id: &str) -> StoreResult<()> {
        let url = format!("{}/files/{}", self.store_url(store), uri_encode(record_id));
        self.execute("delete file", || self.client.delete(&url))
            .await?;
        Ok(())
    }

    async fn retrieve(&self, store: &str) -> StoreResult<StoreInfo> {
        let url = self.store_url(store);
        let response = self
            .execute("retrieve store", || self.client.get(&url))
            .await?;
        Ok(response
            .json()
            .await
            .context("Failed to decode store response")?)
    }

    async fn create(&self, store: &str) -> StoreResult<StoreInfo> {
        let url = format!("{}/stores", self.base_url);
        let body = serde_json::json!({ "name": store });
        let response = self
            .execute("create store", || self.client.post(&url).json(&body))
            .await?;
        Ok(response
            .json()
            .await
            .context("Failed to decode store response")?)
    }
}

#[derive(Debug, Deserialize)]
struct WireList {
    #[serde(default)]
    data: Vec<WireFile>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    cursor: Option<String>,
}

impl WireList {
    fn into_page(self) -> ListPage {
        ListPage {
            records: self.data.into_iter().map(WireFile::into_record).collect(),
            cursor: self.cursor,
            has_more: self.has_more,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireFile {
    id: String,
    external_id: String,
    #[serde(default)]
    metadata: Option<WireMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    hash: Option<String>,
}

impl WireFile {
    fn into_record(self) -> RemoteFileRecord {
        RemoteFileRecord {
            external_id: self.external_id,
            record_id: self.id,
            hash: self.metadata.and_then(|m| m.hash),
        }
    }
}

/// Map a non-success response to a terminal error, or `None` to retry.
fn classify_failure(status: StatusCode, body: &str) -> Option<StoreError> {
    if status == StatusCode::PAYMENT_REQUIRED
        || (status.is_client_error() && mentions_quota(body))
    {
        return Some(StoreError::QuotaExceeded(truncate(body)));
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return None;
    }
    match status {
        StatusCode::NOT_FOUND => Some(StoreError::NotFound(truncate(body))),
        StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => Some(StoreError::Rejected(truncate(body))),
        _ => Some(StoreError::Other(anyhow!(
            "store API error {}: {}",
            status,
            truncate(body)
        ))),
    }
}

fn mentions_quota(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("quota") || lower.contains("limit exceeded") || lower.contains("usage limit")
}

fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}

/// URI-encode a path segment per RFC 3986.
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_is_recognized_by_status_or_body() {
        assert!(matches!(
            classify_failure(StatusCode::PAYMENT_REQUIRED, ""),
            Some(StoreError::QuotaExceeded(_))
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, "Monthly quota exceeded"),
            Some(StoreError::QuotaExceeded(_))
        ));
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, "{\"error\":\"Usage limit reached\"}"),
            Some(StoreError::QuotaExceeded(_))
        ));
    }

    #[test]
    fn rate_limits_and_server_errors_are_retried() {
        assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down").is_none());
        assert!(classify_failure(StatusCode::BAD_GATEWAY, "").is_none());
    }

    #[test]
    fn client_errors_map_to_kinds() {
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, "no such store"),
            Some(StoreError::NotFound(_))
        ));
        assert!(matches!(
            classify_failure(StatusCode::UNSUPPORTED_MEDIA_TYPE, "binary not allowed"),
            Some(StoreError::Rejected(_))
        ));
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, "bad token"),
            Some(StoreError::Other(_))
        ));
    }

    #[test]
    fn listing_response_decodes_into_page() {
        let json = r#"{
            "data": [
                {"id": "f1", "external_id": "/r/a.txt", "metadata": {"path": "/r/a.txt", "hash": "abc"}},
                {"id": "f2", "external_id": "/r/b.txt"}
            ],
            "has_more": true,
            "cursor": "next-token"
        }"#;
        let page = serde_json::from_str::<WireList>(json).unwrap().into_page();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].hash.as_deref(), Some("abc"));
        assert_eq!(page.records[1].hash, None);
        assert!(page.has_more);
        assert_eq!(page.cursor.as_deref(), Some("next-token"));
    }

    #[test]
    fn uri_encode_escapes_reserved() {
        assert_eq!(uri_encode("my store/x"), "my%20store%2Fx");
        assert_eq!(uri_encode("abc-_.~"), "abc-_.~");
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let config = StoreConfig {
            base_url: Some("https://store.example.com".into()),
            api_key_env: "TMIRROR_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..StoreConfig::default()
        };
        let err = HttpStore::new(&config).err().unwrap();
        assert!(err.to_string().contains("TMIRROR_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
