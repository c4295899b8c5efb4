//! Scriptable in-memory backend shared by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::enumerator::START_CURSOR;
use crate::core::lock;
use crate::services::backend::{
    Backend, BackendError, Candidate, ImageSource, IngestDocument, ItemId, Page, SimilarityQuery,
};

#[derive(Default)]
pub struct MockBackend {
    items: Mutex<Vec<ItemId>>,
    scripted_pages: Mutex<VecDeque<(Vec<ItemId>, String)>>,
    list_calls: AtomicUsize,
    fail_listing_after: Mutex<Option<usize>>,
    similar: Mutex<HashMap<ItemId, Vec<Candidate>>>,
    failing_ids: Mutex<HashSet<ItemId>>,
    hard_limit_ids: Mutex<HashSet<ItemId>>,
    queries: Mutex<Vec<(ItemId, SimilarityQuery)>>,
    count_override: Mutex<Option<u64>>,
    ingested: Mutex<Vec<IngestDocument>>,
    ingest_limit: Mutex<Option<usize>>,
    commits: AtomicUsize,
}

impl MockBackend {
    pub fn with_items(mut items: Vec<ItemId>) -> Self {
        items.sort();
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    /// Serve these `(ids, next_cursor)` pages before falling back to `items`.
    pub fn script_pages(&self, pages: Vec<(Vec<ItemId>, String)>) {
        *lock(&self.scripted_pages) = pages.into();
    }

    pub fn fail_listing_after(&self, successful_pages: usize) {
        *lock(&self.fail_listing_after) = Some(successful_pages);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn set_similar(&self, id: &str, candidates: Vec<Candidate>) {
        lock(&self.similar).insert(id.to_string(), candidates);
    }

    pub fn fail_query(&self, id: &str) {
        lock(&self.failing_ids).insert(id.to_string());
    }

    pub fn hard_limit_on(&self, id: &str) {
        lock(&self.hard_limit_ids).insert(id.to_string());
    }

    pub fn queries(&self) -> Vec<(ItemId, SimilarityQuery)> {
        lock(&self.queries).clone()
    }

    pub fn set_count(&self, count: u64) {
        *lock(&self.count_override) = Some(count);
    }

    pub fn limit_documents(&self, max: usize) {
        *lock(&self.ingest_limit) = Some(max);
    }

    pub fn ingested(&self) -> Vec<IngestDocument> {
        lock(&self.ingested).clone()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

/// Candidate with the item id doubling as the image reference.
pub fn candidate(id: &str, score: f64) -> Candidate {
    Candidate {
        id: id.to_string(),
        score,
        filename: Some(format!("{id}.jpg")),
        image: format!("/photos/{id}.jpg"),
    }
}

fn cursor_offset(cursor: &str) -> usize {
    if cursor == START_CURSOR {
        return 0;
    }
    cursor
        .strip_prefix("pos:")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl Backend for MockBackend {
    async fn list_page(&self, page_size: usize, cursor: &str) -> Result<Page, BackendError> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *lock(&self.fail_listing_after) {
            if call >= limit {
                return Err(BackendError::Malformed {
                    operation: "select",
                    message: "truncated body".to_string(),
                });
            }
        }

        if let Some((ids, next_cursor)) = lock(&self.scripted_pages).pop_front() {
            return Ok(Page { ids, next_cursor });
        }

        let items = lock(&self.items);
        let start = cursor_offset(cursor).min(items.len());
        let end = (start + page_size).min(items.len());
        let ids = items[start..end].to_vec();
        let next_cursor = if ids.is_empty() {
            cursor.to_string()
        } else {
            format!("pos:{end}")
        };
        Ok(Page { ids, next_cursor })
    }

    async fn find_similar(
        &self,
        id: &str,
        query: &SimilarityQuery,
    ) -> Result<Vec<Candidate>, BackendError> {
        lock(&self.queries).push((id.to_string(), *query));
        tokio::task::yield_now().await;

        if lock(&self.hard_limit_ids).contains(id) {
            return Err(BackendError::HardLimit(
                "Document limit exceeded for this plan".to_string(),
            ));
        }
        if lock(&self.failing_ids).contains(id) {
            return Err(BackendError::Api {
                operation: "duplicate",
                message: format!("connection reset while querying {id}"),
            });
        }
        Ok(lock(&self.similar).get(id).cloned().unwrap_or_default())
    }

    async fn count(&self) -> Result<u64, BackendError> {
        if let Some(count) = *lock(&self.count_override) {
            return Ok(count);
        }
        Ok(lock(&self.items).len() as u64)
    }

    async fn analyze(&self, source: &ImageSource) -> Result<serde_json::Value, BackendError> {
        Ok(serde_json::json!({ "source": source.reference() }))
    }

    async fn ingest(&self, document: &IngestDocument) -> Result<(), BackendError> {
        let mut ingested = lock(&self.ingested);
        if let Some(max) = *lock(&self.ingest_limit) {
            if ingested.len() >= max {
                return Err(BackendError::from_message(
                    "update",
                    format!("Document limit of {max} reached"),
                ));
            }
        }
        ingested.push(document.clone());
        Ok(())
    }

    async fn commit(&self) -> Result<(), BackendError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        lock(&self.items).clear();
        Ok(())
    }
}
