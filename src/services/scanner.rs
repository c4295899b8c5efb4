//! Scan pipeline: size the collection, list every id, query each one under
//! bounded concurrency and collapse the resulting graph into groups.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::config::{ConfigError, ScanConfig};
use crate::core::detector::SimilarityDetector;
use crate::core::enumerator::{EnumerationError, Enumerator};
use crate::core::executor::{
    Executor, ExecutorError, ProgressCallback, RunOutcome, RunReport, Task, TaskError,
};
use crate::core::graph::{FrozenGraph, SimilarityGraph};
use crate::core::grouper::{DuplicateGroups, group_duplicates};
use crate::core::profile::ScanMode;
use crate::services::backend::{Backend, BackendError, SimilarityQuery};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Could not count documents: {0}")]
    Count(#[source] BackendError),

    #[error(transparent)]
    Enumeration(#[from] EnumerationError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("{item}: {message}")]
    HardLimit { item: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub collection_size: u64,
    pub mode: ScanMode,
    /// Ids handed to the executor.
    pub scanned: usize,
    pub run: RunReport,
    pub graph: FrozenGraph,
    pub groups: DuplicateGroups,
}

impl ScanReport {
    pub fn is_cancelled(&self) -> bool {
        self.run.outcome == RunOutcome::Cancelled
    }

    fn cancelled(collection_size: u64, mode: ScanMode) -> Self {
        Self {
            collection_size,
            mode,
            scanned: 0,
            run: RunReport {
                total: 0,
                started: 0,
                completed: 0,
                failures: Vec::new(),
                outcome: RunOutcome::Cancelled,
            },
            graph: FrozenGraph::default(),
            groups: DuplicateGroups::default(),
        }
    }
}

pub struct Scanner<B: Backend + ?Sized + 'static> {
    backend: Arc<B>,
    config: ScanConfig,
    cancellation_token: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

impl<B: Backend + ?Sized + 'static> Scanner<B> {
    pub fn new(backend: Arc<B>, config: ScanConfig) -> Self {
        Self {
            backend,
            config,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel_scan(&self) {
        self.cancellation_token.store(true, Ordering::SeqCst);
    }

    /// Run a full scan.
    ///
    /// A cancelled scan returns `Ok` with [`ScanReport::is_cancelled`] set;
    /// a hard limit raised by any query is an error carrying the backend message.
    pub async fn scan(&self) -> Result<ScanReport, ScanError> {
        self.config.validate()?;

        let collection_size = self.backend.count().await.map_err(ScanError::Count)?;
        let mode = self.config.profile.resolve(collection_size);
        log::info!(
            "Collection holds {collection_size} documents, approximate={} filter={}",
            mode.approximate,
            mode.filter
        );

        let listing = Enumerator::new(self.backend.as_ref())
            .with_page_size(self.config.page_size)
            .with_cancellation_token(self.cancellation_token.clone())
            .list_ids(self.config.limit)
            .await;
        let ids = match listing {
            Ok(ids) => ids,
            Err(EnumerationError::Cancelled { pages }) => {
                log::info!("Scan cancelled while listing, {pages} pages read");
                return Ok(ScanReport::cancelled(collection_size, mode));
            }
            Err(err) => return Err(err.into()),
        };
        let scanned = ids.len();
        log::info!("Listed {scanned} ids");

        let graph = Arc::new(SimilarityGraph::new());
        let detector = Arc::new(SimilarityDetector::new(
            self.backend.clone(),
            graph.clone(),
            SimilarityQuery {
                top_k: self.config.top_k,
                threshold: self.config.threshold,
                approximate: mode.approximate,
                filter: mode.filter,
            },
        ));

        let tasks = ids
            .into_iter()
            .map(|id| {
                let detector = detector.clone();
                Task::new(id.clone(), move || async move {
                    detector
                        .detect_one(&id)
                        .await
                        .map(|_| ())
                        .map_err(TaskError::from)
                })
            })
            .collect();

        let mut executor = Executor::new(self.config.concurrency)
            .with_cancellation_token(self.cancellation_token.clone());
        if let Some(callback) = &self.progress {
            executor = executor.with_progress_callback(callback.clone());
        }
        let run = executor.run(tasks).await?;

        match &run.outcome {
            RunOutcome::HardLimit { label, message } => {
                return Err(ScanError::HardLimit {
                    item: label.clone(),
                    message: message.clone(),
                });
            }
            RunOutcome::Cancelled => {
                log::info!("Scan cancelled after {} of {scanned} items", run.completed);
            }
            RunOutcome::Finished => {}
        }

        let graph = graph.freeze();
        let groups = group_duplicates(&graph);
        log::info!(
            "Graph has {} nodes and {} edges, {} duplicate groups",
            graph.node_count(),
            graph.edge_count(),
            groups.len()
        );

        Ok(ScanReport {
            collection_size,
            mode,
            scanned,
            run,
            graph,
            groups,
        })
    }
}
