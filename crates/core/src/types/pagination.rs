//! Offset pagination math for catalog listings.

use serde::{Deserialize, Serialize};

/// Page size used when the caller gives none.
pub const DEFAULT_PAGE_SIZE: u32 = 12;

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A 1-based page request.
///
/// Out-of-range input is clamped rather than rejected: page 0 becomes page 1,
/// and the size is kept within `1..=MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: u32,
    limit: u32,
}

impl Pagination {
    /// Build a page request from optional query values.
    #[must_use]
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// The 1-based page number.
    #[must_use]
    pub const fn page(&self) -> u32 {
        self.page
    }

    /// Rows per page.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Rows to skip: `(page - 1) * limit`.
    #[must_use]
    pub fn skip(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    /// Whether rows remain after this page.
    ///
    /// `skip + returned < total`, where `returned` is the number of rows the
    /// page actually contained.
    #[must_use]
    pub fn has_more(&self, returned: usize, total: u64) -> bool {
        let returned = u64::try_from(returned).unwrap_or(u64::MAX);
        self.skip().saturating_add(returned) < total
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of results with its continuation flag.
///
/// Serializes as `{books, hasMore, total, page}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSlice<T> {
    #[serde(rename = "books")]
    pub items: Vec<T>,
    pub has_more: bool,
    pub total: u64,
    pub page: u32,
}

impl<T> PageSlice<T> {
    /// Assemble a page from the fetched rows and the total match count.
    #[must_use]
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = pagination.has_more(items.len(), total);
        Self {
            items,
            has_more,
            total,
            page: pagination.page(),
        }
    }
}
