//! reqwest-backed store client for a Cloudinary-style REST API.
//!
//! Listing is cursor-paged: the API returns at most `page_size` resources
//! per call plus a continuation cursor, and the client keeps requesting
//! until no cursor remains. Reads (list/fetch) retry transient transport
//! failures with exponential backoff; uploads never retry internally, the
//! caller owns that decision.

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{ByteStream, ChunkRef, ObjectStore};

/// Connection settings for the remote store.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoreConfig {
    /// Management API base, e.g. `https://api.example.com/v1/media-cloud`.
    pub api_base: String,
    /// Public delivery base for fetching raw objects by identifier.
    pub delivery_base: String,
    pub api_key: String,
    pub api_secret: String,
    /// Listing page size requested from the API.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Retry attempts for list/fetch on transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_page_size() -> u32 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    120
}

/// One page of a resource listing.
#[derive(Debug, Deserialize)]
struct ListPage {
    resources: Vec<ListedResource>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedResource {
    public_id: String,
    bytes: Option<u64>,
}

/// Upload response carrying the stable delivery URL.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

pub struct HttpObjectStore {
    client: Client,
    config: StoreConfig,
}

impl HttpObjectStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        if config.api_base.is_empty() || config.delivery_base.is_empty() {
            return Err(StoreError::Configuration {
                reason: "store api_base and delivery_base must be set".to_string(),
            });
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn list_url(&self) -> String {
        format!("{}/resources/raw", self.config.api_base.trim_end_matches('/'))
    }

    fn upload_url(&self) -> String {
        format!("{}/raw/upload", self.config.api_base.trim_end_matches('/'))
    }

    fn delete_url(&self) -> String {
        format!(
            "{}/resources/raw/upload",
            self.config.api_base.trim_end_matches('/')
        )
    }

    /// Delivery URL for one object identifier.
    fn object_url(&self, id: &str) -> String {
        format!(
            "{}/raw/upload/{id}",
            self.config.delivery_base.trim_end_matches('/')
        )
    }

    /// Run `op` up to `max_retries + 1` times, backing off exponentially on
    /// transient errors.
    async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        error = %e,
                        "transient store error, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_page(&self, prefix: &str, cursor: Option<&str>) -> StoreResult<ListPage> {
        let url = self.list_url();
        let mut request = self
            .client
            .get(&url)
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .query(&[
                ("prefix", prefix),
                ("max_results", &self.config.page_size.to_string()),
            ]);
        if let Some(cursor) = cursor {
            request = request.query(&[("next_cursor", cursor)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StoreError::HttpStatus {
                status: response.status(),
                url,
                operation: "list",
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl ObjectStore for HttpObjectStore {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ChunkRef>> {
        let mut refs = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self
                .with_retries("list", || self.fetch_page(prefix, cursor.as_deref()))
                .await?;
            pages += 1;
            refs.extend(page.resources.into_iter().map(|r| ChunkRef {
                id: r.public_id,
                bytes: r.bytes,
            }));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(prefix, pages, chunks = refs.len(), "listed chunk prefix");
        if refs.is_empty() {
            return Err(StoreError::not_found(prefix));
        }
        Ok(refs)
    }

    async fn fetch(&self, id: &str) -> StoreResult<ByteStream> {
        let url = self.object_url(id);
        let response = self
            .with_retries("fetch", || {
                let url = url.clone();
                async move {
                    let response = self.client.get(&url).send().await?;
                    if response.status() == reqwest::StatusCode::NOT_FOUND {
                        return Err(StoreError::not_found(&url));
                    }
                    if !response.status().is_success() {
                        return Err(StoreError::HttpStatus {
                            status: response.status(),
                            url,
                            operation: "fetch",
                        });
                    }
                    Ok(response)
                }
            })
            .await?;

        Ok(response.bytes_stream().map_err(StoreError::from).boxed())
    }

    async fn upload(&self, local_path: &Path, id: &str) -> StoreResult<String> {
        let url = self.upload_url();
        let file = tokio::fs::File::open(local_path).await?;
        let body = reqwest::Body::wrap_stream(tokio_util_io_stream(file));

        let form = reqwest::multipart::Form::new()
            .text("public_id", id.to_string())
            .text("overwrite", "true")
            .part(
                "file",
                reqwest::multipart::Part::stream(body).file_name(
                    local_path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| id.to_string()),
                ),
            );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StoreError::Upload {
                reason: format!("{id}: HTTP {status}: {detail}"),
            });
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| StoreError::invalid_response(format!("upload response: {e}")))?;
        debug!(id, url = %parsed.secure_url, "uploaded object");
        Ok(parsed.secure_url)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let url = self.delete_url();
        let response = self
            .client
            .delete(&url)
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .query(&[("public_ids[]", id)])
            .send()
            .await?;
        // Missing objects delete as a no-op.
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::HttpStatus {
                status: response.status(),
                url,
                operation: "delete",
            });
        }
        Ok(())
    }
}

/// File -> byte-stream adapter for streaming multipart uploads.
fn tokio_util_io_stream(
    file: tokio::fs::File,
) -> impl futures::Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    tokio_util::io::ReaderStream::new(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StoreConfig {
        StoreConfig {
            api_base: "https://api.example.com/v1/demo/".to_string(),
            delivery_base: "https://cdn.example.com/demo".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }

    #[test]
    fn endpoint_urls_trim_trailing_slashes() {
        let store = HttpObjectStore::new(config()).unwrap();
        assert_eq!(
            store.list_url(),
            "https://api.example.com/v1/demo/resources/raw"
        );
        assert_eq!(store.upload_url(), "https://api.example.com/v1/demo/raw/upload");
        assert_eq!(
            store.object_url("room_alice_000001"),
            "https://cdn.example.com/demo/raw/upload/room_alice_000001"
        );
    }

    #[test]
    fn empty_base_urls_are_rejected() {
        let mut cfg = config();
        cfg.api_base = String::new();
        assert!(matches!(
            HttpObjectStore::new(cfg),
            Err(StoreError::Configuration { .. })
        ));
    }

    #[test]
    fn list_page_parses_cursor_and_sizes() {
        let json = r#"{
            "resources": [
                {"public_id": "s_p_000000", "bytes": 1024},
                {"public_id": "s_p_000001"}
            ],
            "next_cursor": "abc123"
        }"#;
        let page: ListPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.resources.len(), 2);
        assert_eq!(page.resources[0].bytes, Some(1024));
        assert_eq!(page.resources[1].bytes, None);
        assert_eq!(page.next_cursor.as_deref(), Some("abc123"));
    }

    #[test]
    fn final_list_page_has_no_cursor() {
        let json = r#"{"resources": []}"#;
        let page: ListPage = serde_json::from_str(json).unwrap();
        assert!(page.resources.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn upload_response_parses_secure_url() {
        let json = r#"{"secure_url": "https://cdn.example.com/demo/raw/upload/x_merged"}"#;
        let parsed: UploadResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.secure_url.ends_with("x_merged"));
    }
}
