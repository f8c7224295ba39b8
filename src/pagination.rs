//! Bounded multi-page aggregation
//!
//! Turns an offset/limit listing into one result set under page and item
//! ceilings. The loop is strictly sequential; each page's offset depends on
//! how many items the previous one actually returned.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PaginationConfig;
use crate::{Error, Result};

/// Caller's paging request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOptions {
    /// Follow pages until a ceiling or the end of the listing
    pub fetch_all: bool,
    /// Page size
    pub limit: usize,
    /// Starting offset
    pub offset: usize,
    /// Page ceiling when `fetch_all` is set
    pub max_pages: usize,
    /// Item ceiling when `fetch_all` is set
    pub max_items: usize,
}

impl PageOptions {
    /// One page with the configured page size
    pub fn single(config: &PaginationConfig) -> Self {
        Self {
            fetch_all: false,
            limit: config.limit,
            offset: 0,
            max_pages: config.max_pages,
            max_items: config.max_items,
        }
    }

    /// Every page up to the configured ceilings
    pub fn all(config: &PaginationConfig) -> Self {
        Self {
            fetch_all: true,
            ..Self::single(config)
        }
    }

    /// Start from another offset
    #[must_use]
    pub fn starting_at(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

impl Default for PageOptions {
    fn default() -> Self {
        Self::single(&PaginationConfig::default())
    }
}

/// What the page callback is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Items wanted
    pub limit: usize,
    /// Position in the listing
    pub offset: usize,
}

/// Paging metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Page size requested by the caller
    pub limit: usize,
    /// Offset the result starts at
    pub offset: usize,
    /// Size of the whole listing, when the remote reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_results: Option<usize>,
    /// More items remain past `next_offset`
    pub has_more: bool,
    /// Offset to resume from
    pub next_offset: Option<usize>,
    /// Pages fetched
    pub fetched_pages: usize,
    /// Items collected
    pub fetched_items: usize,
}

/// Items plus optional metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    /// Collected items
    pub items: Vec<T>,
    /// Paging metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    /// Set when a page did not have the expected shape
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_warning: Option<String>,
}

impl<T> PageResult<T> {
    /// A page of items without metadata
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            pagination: None,
            schema_warning: None,
        }
    }

    /// Attach metadata
    #[must_use]
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Attach a schema warning
    #[must_use]
    pub fn with_schema_warning(mut self, warning: impl Into<String>) -> Self {
        self.schema_warning = Some(warning.into());
        self
    }

    fn total_results(&self) -> Option<usize> {
        self.pagination.as_ref().and_then(|p| p.total_results)
    }
}

/// Fetch one page, or aggregate pages under `max_pages` / `max_items`
///
/// With `fetch_all` unset the callback runs once and its result is returned
/// untouched. Otherwise pages are requested in order until a short page,
/// the reported total, or a ceiling; hitting a ceiling reports
/// `has_more = true` with the offset to resume from.
pub async fn fetch_all_pages<T, F, Fut>(
    options: &PageOptions,
    mut fetch_page: F,
) -> Result<PageResult<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<PageResult<T>>>,
{
    if options.limit == 0 {
        return Err(Error::InvalidArgument(
            "page limit must be at least 1".to_string(),
        ));
    }

    if !options.fetch_all {
        return fetch_page(PageRequest {
            limit: options.limit,
            offset: options.offset,
        })
        .await;
    }

    let mut items: Vec<T> = Vec::new();
    let mut offset = options.offset;
    let mut fetched_pages = 0usize;
    let mut total_results = None;
    let mut schema_warning = None;

    let has_more = loop {
        if fetched_pages >= options.max_pages || items.len() >= options.max_items {
            debug!(fetched_pages, fetched_items = items.len(), offset, "Pagination ceiling reached");
            break true;
        }

        let remaining = options.max_items - items.len();
        let request = PageRequest {
            limit: options.limit.min(remaining),
            offset,
        };
        let page = fetch_page(request).await?;
        fetched_pages += 1;

        if let Some(total) = page.total_results() {
            total_results = Some(total);
        }
        if schema_warning.is_none() {
            schema_warning = page.schema_warning;
        }

        let mut page_items = page.items;
        let returned = page_items.len();
        page_items.truncate(remaining);
        offset += page_items.len();
        items.extend(page_items);

        if returned < request.limit {
            debug!(fetched_pages, fetched_items = items.len(), "Short page, listing exhausted");
            break false;
        }
        if total_results.is_some_and(|total| offset >= total) {
            debug!(fetched_pages, fetched_items = items.len(), "Reported total reached");
            break false;
        }
    };

    let fetched_items = items.len();
    Ok(PageResult {
        items,
        pagination: Some(Pagination {
            limit: options.limit,
            offset: options.offset,
            total_results,
            has_more,
            next_offset: has_more.then_some(offset),
            fetched_pages,
            fetched_items,
        }),
        schema_warning,
    })
}
