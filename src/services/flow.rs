//! HTTP client for the Flow similarity-search backend.
//!
//! Flow exposes a Solr-style API per collection under
//! `host/context_path/collection`: `select` for listing and counting,
//! `duplicate` for similarity queries, `analyze` for feature extraction and
//! `update` for ingestion and commits. Every response carries a
//! `responseHeader.status`; failures add an `error.msg`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::FlowConfig;
use crate::core::thumbnail::ThumbnailService;
use crate::services::backend::{
    Backend, BackendError, Candidate, ImageSource, IngestDocument, Page, SimilarityQuery,
};

/// Analysis module producing the duplicate-detection features.
const DUPLICATE_MODULE: &str = "duplicate";

#[derive(Debug, Deserialize)]
struct SelectResponse<D> {
    response: DocList<D>,
    #[serde(rename = "nextCursorMark")]
    next_cursor_mark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocList<D> {
    #[serde(rename = "numFound", default)]
    num_found: u64,
    #[serde(default = "Vec::new")]
    docs: Vec<D>,
}

#[derive(Debug, Deserialize)]
struct IdDoc {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    outputs: Value,
}

/// Reachability summary for the `status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStatus {
    pub url: String,
    pub reachable: bool,
    pub documents: Option<u64>,
}

pub struct FlowClient {
    client: Client,
    config: FlowConfig,
    url: String,
    thumbnails: ThumbnailService,
}

impl FlowClient {
    pub fn new(config: FlowConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|source| BackendError::Http {
                operation: "connect",
                source,
            })?;
        Ok(Self {
            client,
            url: config.collection_url(),
            config,
            thumbnails: ThumbnailService::new(),
        })
    }

    pub fn with_thumbnail_size(mut self, size: u32) -> Self {
        self.thumbnails = ThumbnailService::with_size(size);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.url, name)
    }

    pub async fn ping(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                log::debug!("Ping {} failed: {err}", self.url);
                false
            }
        }
    }

    pub async fn status(&self) -> FlowStatus {
        let reachable = self.ping().await;
        let documents = if reachable {
            self.count().await.ok()
        } else {
            None
        };
        FlowStatus {
            url: self.url.clone(),
            reachable,
            documents,
        }
    }

    /// Send a request and return its JSON body once the backend reported success.
    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Value, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|source| BackendError::Http { operation, source })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| BackendError::Http { operation, source })?;

        let value: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) if !status.is_success() => {
                return Err(BackendError::Api {
                    operation,
                    message: format!("HTTP {status}"),
                });
            }
            Err(err) => {
                return Err(BackendError::Malformed {
                    operation,
                    message: err.to_string(),
                });
            }
        };

        if let Some(message) = value.pointer("/error/msg").and_then(Value::as_str) {
            return Err(BackendError::from_message(operation, message));
        }
        let header_status = value
            .pointer("/responseHeader/status")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if !status.is_success() || header_status != 0 {
            return Err(BackendError::Api {
                operation,
                message: format!("HTTP {status}, status {header_status}"),
            });
        }
        Ok(value)
    }

    fn decode<T: DeserializeOwned>(operation: &'static str, value: Value) -> Result<T, BackendError> {
        serde_json::from_value(value).map_err(|err| BackendError::Malformed {
            operation,
            message: err.to_string(),
        })
    }

    async fn upload_data_uri(&self, path: std::path::PathBuf) -> Result<String, BackendError> {
        let thumbnails = self.thumbnails.clone();
        let uri = tokio::task::spawn_blocking(move || thumbnails.to_data_uri(&path))
            .await
            .map_err(|err| {
                crate::core::thumbnail::ThumbnailError::Io(std::io::Error::other(err.to_string()))
            })??;
        Ok(uri)
    }
}

#[async_trait]
impl Backend for FlowClient {
    async fn list_page(&self, page_size: usize, cursor: &str) -> Result<Page, BackendError> {
        let rows = page_size.to_string();
        let request = self.client.get(self.endpoint("select")).query(&[
            ("q", "*:*"),
            ("rows", rows.as_str()),
            ("fl", "id"),
            ("sort", "id asc"),
            ("cursorMark", cursor),
        ]);
        let value = self.send("select", request).await?;
        let parsed: SelectResponse<IdDoc> = Self::decode("select", value)?;
        let next_cursor = parsed
            .next_cursor_mark
            .ok_or_else(|| BackendError::Malformed {
                operation: "select",
                message: "missing nextCursorMark".to_string(),
            })?;
        Ok(Page {
            ids: parsed.response.docs.into_iter().map(|d| d.id).collect(),
            next_cursor,
        })
    }

    async fn find_similar(
        &self,
        id: &str,
        query: &SimilarityQuery,
    ) -> Result<Vec<Candidate>, BackendError> {
        let rows = query.top_k.to_string();
        let threshold = query.threshold.to_string();
        let approximate = query.approximate.to_string();
        let request = self.client.get(self.endpoint("duplicate")).query(&[
            ("rank.by.id", id),
            ("fl", "id,score,filename,image"),
            ("rows", rows.as_str()),
            ("rank.threshold", threshold.as_str()),
            ("rank.approximate", approximate.as_str()),
            ("rank.smartfilter", query.filter.as_str()),
        ]);
        let value = self.send("duplicate", request).await?;
        let parsed: SelectResponse<Candidate> = Self::decode("duplicate", value)?;
        Ok(parsed.response.docs)
    }

    async fn count(&self) -> Result<u64, BackendError> {
        let request = self
            .client
            .get(self.endpoint("select"))
            .query(&[("q", "*:*"), ("rows", "0")]);
        let value = self.send("count", request).await?;
        let parsed: SelectResponse<Value> = Self::decode("count", value)?;
        Ok(parsed.response.num_found)
    }

    async fn analyze(&self, source: &ImageSource) -> Result<Value, BackendError> {
        let request = match source {
            ImageSource::Url(url) => self
                .client
                .get(self.endpoint("analyze"))
                .query(&[("modules.apply", DUPLICATE_MODULE), ("input.url", url.as_str())]),
            ImageSource::File(path) => {
                let data_uri = self.upload_data_uri(path.clone()).await?;
                // An empty logParamsList keeps the base64 payload out of the server log.
                self.client
                    .post(self.endpoint("analyze"))
                    .query(&[("modules.apply", DUPLICATE_MODULE), ("logParamsList", "")])
                    .form(&[("input.data", data_uri)])
            }
        };
        let value = self.send("analyze", request).await?;
        let parsed: AnalyzeResponse = Self::decode("analyze", value)?;
        Ok(parsed.outputs)
    }

    async fn ingest(&self, document: &IngestDocument) -> Result<(), BackendError> {
        let request = self.client.post(self.endpoint("update")).json(document);
        self.send("update", request).await?;
        Ok(())
    }

    async fn commit(&self) -> Result<(), BackendError> {
        let request = self.client.post(self.endpoint("update")).query(&[
            ("softCommit", "true"),
            ("openSearcher", "true"),
            ("waitSearcher", "true"),
        ]);
        self.send("commit", request).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        let url = format!(
            "{}/solr/{}/update",
            self.config.trimmed_host(),
            self.config.collection.trim_matches('/')
        );
        let request = self
            .client
            .post(url)
            .query(&[("commit", "true"), ("openSearcher", "true")])
            .json(&json!({ "delete": { "query": "*:*" } }));
        self.send("clear", request).await?;
        Ok(())
    }
}
