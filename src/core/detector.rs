use std::sync::Arc;
use thiserror::Error;

use crate::core::executor::TaskError;
use crate::core::graph::{GraphError, MergeStats, SimilarityGraph};
use crate::services::backend::{Backend, BackendError, Candidate, SimilarityQuery};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Similarity query for {id} failed: {source}")]
    Backend {
        id: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<DetectError> for TaskError {
    fn from(err: DetectError) -> Self {
        match err {
            DetectError::Backend {
                source: BackendError::HardLimit(message),
                ..
            } => TaskError::HardLimit(message),
            other => TaskError::Failed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Only the item itself (or nothing) cleared the threshold.
    Unique,
    Linked(MergeStats),
}

/// Keep candidates scoring at least `threshold`.
pub fn relevant_matches(candidates: Vec<Candidate>, threshold: f64) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| c.score >= threshold)
        .collect()
}

/// Runs one similarity query per item and merges the hits into the shared graph.
pub struct SimilarityDetector<B: Backend + ?Sized> {
    backend: Arc<B>,
    graph: Arc<SimilarityGraph>,
    query: SimilarityQuery,
}

impl<B: Backend + ?Sized> SimilarityDetector<B> {
    pub fn new(backend: Arc<B>, graph: Arc<SimilarityGraph>, query: SimilarityQuery) -> Self {
        Self {
            backend,
            graph,
            query,
        }
    }

    pub async fn detect_one(&self, id: &str) -> Result<Detection, DetectError> {
        let candidates = self
            .backend
            .find_similar(id, &self.query)
            .await
            .map_err(|source| DetectError::Backend {
                id: id.to_string(),
                source,
            })?;

        // Approximate modes may return noise below the requested threshold.
        let relevant = relevant_matches(candidates, self.query.threshold);
        if relevant.len() < 2 {
            return Ok(Detection::Unique);
        }

        let stats = self.graph.merge_matches(id, &relevant)?;
        Ok(Detection::Linked(stats))
    }
}
