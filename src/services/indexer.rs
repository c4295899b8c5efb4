//! Index pipeline: discover local images, analyze each one and ingest it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::{ConfigError, IndexConfig};
use crate::core::executor::{
    Executor, ExecutorError, ProgressCallback, RunOutcome, RunReport, Task, TaskError,
};
use crate::core::thumbnail::ThumbnailService;
use crate::services::backend::{Backend, BackendError, ImageSource, IngestDocument, ItemId};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("{item}: {message}")]
    HardLimit { item: String, message: String },

    #[error("Commit failed: {0}")]
    Commit(#[source] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Images found under a directory, in walk order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub paths: Vec<PathBuf>,
    /// More images were present than `max_docs` allowed.
    pub truncated: bool,
}

/// Collect supported images under `root`, stopping at `max_docs`.
pub fn discover_images(
    root: &Path,
    recursive: bool,
    max_docs: usize,
) -> Result<Discovery, IndexError> {
    if !root.is_dir() {
        return Err(IndexError::InvalidPath {
            path: root.to_string_lossy().to_string(),
        });
    }
    let root = root.canonicalize()?;

    let mut walker = WalkDir::new(&root).follow_links(false).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut discovery = Discovery::default();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("Skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !ThumbnailService::is_supported_format(entry.path()) {
            continue;
        }
        if discovery.paths.len() >= max_docs {
            discovery.truncated = true;
            break;
        }
        discovery.paths.push(entry.into_path());
    }
    Ok(discovery)
}

/// Random 64-bit id rendered as 16 hex characters.
pub fn generate_id() -> ItemId {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub discovery: Discovery,
    pub run: RunReport,
}

impl IndexReport {
    pub fn is_cancelled(&self) -> bool {
        self.run.outcome == RunOutcome::Cancelled
    }
}

pub struct Indexer<B: Backend + ?Sized + 'static> {
    backend: Arc<B>,
    config: IndexConfig,
    cancellation_token: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

impl<B: Backend + ?Sized + 'static> Indexer<B> {
    pub fn new(backend: Arc<B>, config: IndexConfig) -> Self {
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

    pub fn cancel_indexing(&self) {
        self.cancellation_token.store(true, Ordering::SeqCst);
    }

    pub fn discover(&self, root: &Path) -> Result<Discovery, IndexError> {
        self.config.validate()?;
        let discovery = discover_images(root, self.config.recursive, self.config.max_docs)?;
        if discovery.truncated {
            log::warn!(
                "Doc limit of {} reached, remaining images are skipped",
                self.config.max_docs
            );
        }
        Ok(discovery)
    }

    /// Ingest every discovered image, then commit.
    ///
    /// The commit is issued however the run ends so documents ingested before
    /// a hard limit or a cancellation become visible.
    pub async fn index(&self, discovery: Discovery) -> Result<IndexReport, IndexError> {
        self.config.validate()?;

        let tasks = discovery
            .paths
            .iter()
            .cloned()
            .map(|path| {
                let backend = self.backend.clone();
                let label = path.to_string_lossy().into_owned();
                Task::new(label, move || async move {
                    add_image(backend.as_ref(), path)
                        .await
                        .map_err(TaskError::from)
                })
            })
            .collect();

        let mut executor = Executor::new(self.config.concurrency)
            .with_cancellation_token(self.cancellation_token.clone());
        if let Some(callback) = &self.progress {
            executor = executor.with_progress_callback(callback.clone());
        }
        let run = executor.run(tasks).await;

        let commit = self.backend.commit().await;
        let run = run?;

        if let RunOutcome::HardLimit { label, message } = &run.outcome {
            if let Err(err) = commit {
                log::warn!("Commit after hard limit failed: {err}");
            }
            return Err(IndexError::HardLimit {
                item: label.clone(),
                message: message.clone(),
            });
        }
        commit.map_err(IndexError::Commit)?;

        log::info!(
            "Indexed {} of {} images",
            run.completed - run.failed(),
            run.total
        );
        Ok(IndexReport { discovery, run })
    }

    pub async fn index_directory(&self, root: &Path) -> Result<IndexReport, IndexError> {
        let discovery = self.discover(root)?;
        self.index(discovery).await
    }
}

async fn add_image<B: Backend + ?Sized>(backend: &B, path: PathBuf) -> Result<(), BackendError> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let source = ImageSource::File(path);
    let analysis = backend.analyze(&source).await?;
    let document = IngestDocument {
        id: generate_id(),
        image: source.reference(),
        filename,
        analysis,
    };
    backend.ingest(&document).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utilities::MockBackend;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    fn photo_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("b.jpg"), b"jpeg").unwrap();
        fs::write(root.join("a.png"), b"png").unwrap();
        fs::write(root.join("notes.txt"), b"text").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("c.PNG"), b"png").unwrap();
        temp_dir
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn config(concurrency: usize) -> IndexConfig {
        IndexConfig {
            concurrency,
            ..IndexConfig::default()
        }
    }

    #[test]
    fn test_discovery_recursive_and_flat() {
        let temp_dir = photo_dir();

        let all = discover_images(temp_dir.path(), true, 100).unwrap();
        assert_eq!(names(&all.paths), vec!["a.png", "b.jpg", "c.PNG"]);
        assert!(!all.truncated);

        let flat = discover_images(temp_dir.path(), false, 100).unwrap();
        assert_eq!(names(&flat.paths), vec!["a.png", "b.jpg"]);
    }

    #[test]
    fn test_discovery_stops_at_max_docs() {
        let temp_dir = photo_dir();

        let capped = discover_images(temp_dir.path(), true, 2).unwrap();
        assert_eq!(names(&capped.paths), vec!["a.png", "b.jpg"]);
        assert!(capped.truncated);

        let exact = discover_images(temp_dir.path(), true, 3).unwrap();
        assert!(!exact.truncated);
    }

    #[test]
    fn test_discovery_rejects_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let result = discover_images(&temp_dir.path().join("missing"), true, 10);
        assert!(matches!(result, Err(IndexError::InvalidPath { .. })));
    }

    #[test]
    fn test_generated_ids_are_hex() {
        let ids: HashSet<_> = (0..100).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 100);
        for id in ids {
            assert_eq!(id.len(), 16);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[tokio::test]
    async fn test_index_ingests_and_commits() {
        let temp_dir = photo_dir();
        let backend = Arc::new(MockBackend::default());

        let report = Indexer::new(backend.clone(), config(2))
            .index_directory(temp_dir.path())
            .await
            .unwrap();
        assert_eq!(report.run.completed, 3);
        assert_eq!(report.run.failed(), 0);
        assert_eq!(backend.commits(), 1);

        let mut docs = backend.ingested();
        docs.sort_by(|a, b| a.filename.cmp(&b.filename));
        let filenames: Vec<_> = docs.iter().map(|d| d.filename.as_str()).collect();
        assert_eq!(filenames, vec!["a.png", "b.jpg", "c.PNG"]);
        for doc in &docs {
            assert!(doc.image.ends_with(&doc.filename));
            assert_eq!(doc.analysis["source"], doc.image.as_str());
        }
    }

    #[tokio::test]
    async fn test_document_limit_aborts_but_still_commits() {
        let temp_dir = photo_dir();
        let backend = Arc::new(MockBackend::default());
        backend.limit_documents(1);

        let err = Indexer::new(backend.clone(), config(1))
            .index_directory(temp_dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().ends_with("b.jpg: Document limit of 1 reached"));
        match err {
            IndexError::HardLimit { item, message } => {
                assert!(item.ends_with("b.jpg"));
                assert_eq!(message, "Document limit of 1 reached");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.ingested().len(), 1);
        assert_eq!(backend.commits(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_index_still_commits() {
        let temp_dir = photo_dir();
        let backend = Arc::new(MockBackend::default());
        let indexer = Indexer::new(backend.clone(), config(2));
        indexer.cancel_indexing();

        let report = indexer.index_directory(temp_dir.path()).await.unwrap();
        assert!(report.is_cancelled());
        assert!(backend.ingested().is_empty());
        assert_eq!(backend.commits(), 1);
    }
}
