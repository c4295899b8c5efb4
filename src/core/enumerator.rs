//! Cursor-paginated listing of every id in the collection.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::services::backend::{Backend, BackendError, ItemId};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Cursor that asks the backend for the first page.
pub const START_CURSOR: &str = "*";

#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("Listing page {page} failed: {source}")]
    Backend {
        page: usize,
        #[source]
        source: BackendError,
    },

    #[error("Backend returned previously used cursor {cursor:?} on page {page}")]
    CursorCycle { cursor: String, page: usize },

    #[error("Page size must be at least 1")]
    InvalidPageSize,

    #[error("Listing cancelled after {pages} pages")]
    Cancelled { pages: usize },
}

pub struct Enumerator<'a, B: Backend + ?Sized> {
    backend: &'a B,
    page_size: usize,
    cancellation_token: Option<Arc<AtomicBool>>,
}

impl<'a, B: Backend + ?Sized> Enumerator<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            page_size: DEFAULT_PAGE_SIZE,
            cancellation_token: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Stop before the next page request once `token` is set.
    pub fn with_cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token
            .as_ref()
            .is_some_and(|token| token.load(Ordering::SeqCst))
    }

    /// List ids in ascending order, each at most once, capped at `limit`.
    ///
    /// Pages are fetched strictly one after another. The listing ends when the
    /// backend hands back the cursor it was given, or once `limit` ids are
    /// collected.
    pub async fn list_ids(&self, limit: Option<usize>) -> Result<Vec<ItemId>, EnumerationError> {
        if self.page_size == 0 {
            return Err(EnumerationError::InvalidPageSize);
        }
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut seen: HashSet<ItemId> = HashSet::new();
        let mut used_cursors: HashSet<String> = HashSet::new();
        let mut cursor = START_CURSOR.to_string();
        let mut page = 0;

        loop {
            if self.is_cancelled() {
                return Err(EnumerationError::Cancelled { pages: page });
            }
            page += 1;
            let response = self
                .backend
                .list_page(self.page_size, &cursor)
                .await
                .map_err(|source| EnumerationError::Backend { page, source })?;

            let fetched = response.ids.len();
            for id in response.ids {
                if seen.insert(id.clone()) {
                    ids.push(id);
                } else {
                    log::warn!("Skipping id {id} listed twice");
                }
            }
            log::debug!("Page {page}: {fetched} ids, {} total", ids.len());

            if response.next_cursor == cursor {
                break;
            }
            if limit.is_some_and(|limit| ids.len() >= limit) {
                break;
            }

            used_cursors.insert(cursor);
            if used_cursors.contains(&response.next_cursor) {
                return Err(EnumerationError::CursorCycle {
                    cursor: response.next_cursor,
                    page,
                });
            }
            cursor = response.next_cursor;
        }

        if let Some(limit) = limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }
}
