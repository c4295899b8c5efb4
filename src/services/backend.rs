use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::core::executor::TaskError;
use crate::core::profile::FilterMode;

/// Backend message fragment that signals the collection quota is exhausted.
const DOCUMENT_LIMIT_MARKER: &str = "document limit";

pub type ItemId = String;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error during {operation}: {source}")]
    Http {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("Malformed {operation} response: {message}")]
    Malformed {
        operation: &'static str,
        message: String,
    },

    #[error("{0}")]
    HardLimit(String),

    #[error("Thumbnail error: {0}")]
    Thumbnail(#[from] crate::core::thumbnail::ThumbnailError),
}

impl BackendError {
    /// Build an error from a backend-reported message, promoting quota
    /// messages to [`BackendError::HardLimit`].
    pub fn from_message(operation: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.to_lowercase().contains(DOCUMENT_LIMIT_MARKER) {
            BackendError::HardLimit(message)
        } else {
            BackendError::Api { operation, message }
        }
    }

    pub fn is_hard_limit(&self) -> bool {
        matches!(self, BackendError::HardLimit(_))
    }
}

impl From<BackendError> for TaskError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::HardLimit(message) => TaskError::HardLimit(message),
            other => TaskError::Failed(other.to_string()),
        }
    }
}

/// One page of the id enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub ids: Vec<ItemId>,
    pub next_cursor: String,
}

/// Parameters of a similarity query, fixed for a whole scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityQuery {
    pub top_k: usize,
    pub threshold: f64,
    pub approximate: bool,
    pub filter: FilterMode,
}

/// A scored match returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: ItemId,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub image: String,
}

impl Candidate {
    /// Label shown for the node: the filename for local uploads, the id otherwise.
    pub fn label(&self) -> &str {
        self.filename.as_deref().unwrap_or(&self.id)
    }
}

/// Where an image to be analyzed comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    File(PathBuf),
}

impl ImageSource {
    /// Classify a reference the way the backend does: `http…` is fetched
    /// remotely, everything else is a local file that has to be uploaded.
    pub fn parse(reference: &str) -> Self {
        if reference.starts_with("http") {
            ImageSource::Url(reference.to_string())
        } else {
            ImageSource::File(PathBuf::from(reference))
        }
    }

    pub fn reference(&self) -> String {
        match self {
            ImageSource::Url(url) => url.clone(),
            ImageSource::File(path) => path.to_string_lossy().into_owned(),
        }
    }
}

/// Document sent to the backend's update endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct IngestDocument {
    pub id: ItemId,
    pub image: String,
    pub filename: String,
    #[serde(rename = "import")]
    pub analysis: serde_json::Value,
}

/// The similarity-search service the scan and index pipelines run against.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch one page of ids sorted by id ascending, starting at `cursor`.
    async fn list_page(&self, page_size: usize, cursor: &str) -> Result<Page, BackendError>;

    async fn find_similar(
        &self,
        id: &str,
        query: &SimilarityQuery,
    ) -> Result<Vec<Candidate>, BackendError>;

    /// Total number of indexed documents.
    async fn count(&self) -> Result<u64, BackendError>;

    /// Run the duplicate analysis module on an image and return its payload.
    async fn analyze(&self, source: &ImageSource) -> Result<serde_json::Value, BackendError>;

    async fn ingest(&self, document: &IngestDocument) -> Result<(), BackendError>;

    async fn commit(&self) -> Result<(), BackendError>;

    /// Delete every document in the collection.
    async fn clear(&self) -> Result<(), BackendError>;
}
